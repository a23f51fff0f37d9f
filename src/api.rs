//! Optional status surface: connection count and per-connection phase.
//!
//! Deliberately small and read-only; this is an operator convenience, not a
//! control plane. No authentication is implemented, so the bind address
//! should never be exposed to anything but a trusted operator network.

use std::sync::Arc;
use std::time::Instant;

use axum::{Json, Router, extract::State, routing::get};
use serde_json::json;
use tokio::net::TcpListener;

use crate::config::Config;
use crate::statistics::Statistics;

struct ApiState {
    statistics: Statistics,
    uptime: Instant,
}

pub async fn start_server(config: Arc<Config>, statistics: Statistics) -> anyhow::Result<()> {
    let Some(api) = config.api.clone() else {
        return Ok(());
    };

    let state = Arc::new(ApiState {
        statistics,
        uptime: Instant::now(),
    });

    let app = Router::new()
        .route(
            "/info",
            get(|State(state): State<Arc<ApiState>>| async move {
                Json(json!({
                    "software": crate::SOFTWARE,
                    "uptime": state.uptime.elapsed().as_secs(),
                    "connections": state.statistics.count(),
                }))
            }),
        )
        .route(
            "/connections",
            get(|State(state): State<Arc<ApiState>>| async move {
                let connections: Vec<_> = state
                    .statistics
                    .snapshot()
                    .into_iter()
                    .map(|(client_id, phase)| json!({ "client_id": client_id, "phase": phase }))
                    .collect();

                Json(connections)
            }),
        )
        .with_state(state);

    let listener = TcpListener::bind(api.listen).await?;
    log::info!("api server listening on {}", api.listen);

    axum::serve(listener, app).await?;
    Ok(())
}
