#[cfg(feature = "api")]
pub mod api;

pub mod config;
pub mod handshake;
pub mod probe;
pub mod relay;
pub mod signaling;
pub mod statistics;
pub mod supervisor;
pub mod transport;

use std::sync::Arc;

use anyhow::Result;
use tokio::net::TcpListener;

use self::config::Config;
use self::statistics::Statistics;

#[rustfmt::skip]
pub static SOFTWARE: &str = concat!(
    "hifi-bridge.",
    env!("CARGO_PKG_VERSION")
);

/// Accept signaling connections and run one supervisor per browser peer.
/// Exposed as a function (rather than folded into `main`) so integration
/// tests can start the bridge directly.
pub async fn startup(config: Arc<Config>) -> Result<()> {
    let statistics = Statistics::default();
    let listener = TcpListener::bind(config.bridge.listen).await?;

    log::info!("signaling listening on {}", config.bridge.listen);

    #[cfg(feature = "api")]
    if config.api.is_some() {
        let config = config.clone();
        let statistics = statistics.clone();
        tokio::spawn(async move {
            if let Err(err) = api::start_server(config, statistics).await {
                log::error!("api server exited: {err}");
            }
        });
    }

    loop {
        let (stream, peer) = listener.accept().await?;
        let config = config.clone();
        let statistics = statistics.clone();

        tokio::spawn(async move {
            let websocket = match tokio_tungstenite::accept_async(stream).await {
                Ok(websocket) => websocket,
                Err(err) => {
                    log::warn!("websocket handshake with {peer} failed: {err}");
                    return;
                }
            };

            if let Err(err) = supervisor::run(config, statistics, websocket).await {
                log::warn!("connection from {peer} ended with an error: {err}");
            }
        });
    }
}
