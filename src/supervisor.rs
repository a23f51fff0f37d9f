//! Supervisor: owns every resource for one client, start to finish.
//!
//! One supervisor task per browser connection. It holds the signaling
//! socket, the WebRTC transport, the UDP socket toward the domain, and the
//! [`Connection`] state machine, and runs them all from a single event loop
//! so none of that state ever needs a lock.

use std::net::Ipv4Addr;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use bridge_core::connection::Connection;
use tokio::net::{TcpStream, UdpSocket};
use tokio::sync::mpsc;
use tokio_tungstenite::WebSocketStream;
use uuid::Uuid;

use crate::config::Config;
use crate::handshake::{self, HandshakeConfig};
use crate::probe;
use crate::relay;
use crate::signaling::{self, SignalingEvent};
use crate::statistics::Statistics;
use crate::transport::{Transport, TransportEvent};

async fn resolve(target: &str) -> Result<std::net::SocketAddr> {
    tokio::net::lookup_host(target)
        .await
        .with_context(|| format!("resolving {target}"))?
        .next()
        .with_context(|| format!("{target} resolved to no addresses"))
}

/// Drive one browser connection until it disconnects or the handshake fails
/// outright. Errors here are this connection's alone; the listener keeps
/// accepting others.
pub async fn run(config: Arc<Config>, statistics: Statistics, stream: WebSocketStream<TcpStream>) -> Result<()> {
    let client_id = Uuid::new_v4();
    statistics.register(client_id);

    let result = run_inner(config, statistics.clone(), stream, client_id).await;

    statistics.unregister(&client_id);
    if let Err(err) = &result {
        log::warn!("connection {client_id} ended with an error: {err}");
    } else {
        log::info!("connection {client_id} disconnected");
    }

    result
}

async fn run_inner(config: Arc<Config>, statistics: Statistics, stream: WebSocketStream<TcpStream>, client_id: Uuid) -> Result<()> {
    let mut connection = Connection::new(client_id);

    let local_addr = probe::local_address().await;
    connection.record_local_probe(local_addr);

    let (signaling_tx, mut signaling_rx) = mpsc::unbounded_channel();
    let signaling_handle = signaling::run(stream, signaling_tx).await;
    signaling_handle.send_connected()?;

    let stun_url = format!("stun:{}:{}", config.bridge.stun_server.hostname, config.bridge.stun_server.port);

    let (transport_tx, mut transport_rx) = mpsc::unbounded_channel();
    let transport = Transport::new(stun_url, transport_tx).await?;

    // Wait for the browser's offer before anything else can happen.
    let offer_sdp = loop {
        match signaling_rx.recv().await {
            Some(SignalingEvent::Offer(sdp)) => break sdp,
            Some(SignalingEvent::Candidate(candidate)) => {
                // Trickled before the offer is unusual but harmless to buffer... in
                // practice browsers always send the offer first, so just apply it.
                let _ = transport.add_remote_candidate(&candidate).await;
            }
            Some(SignalingEvent::Closed) | None => bail!("signaling closed before an offer arrived"),
        }
    };

    let answer_sdp = transport.handle_offer(offer_sdp).await?;
    signaling_handle.send_answer(&answer_sdp)?;

    // Drain signaling and transport events until all seven data channels are
    // bound, forwarding trickled candidates in both directions meanwhile.
    loop {
        tokio::select! {
            event = signaling_rx.recv() => match event {
                Some(SignalingEvent::Candidate(candidate)) => {
                    transport.add_remote_candidate(&candidate).await?;
                }
                Some(SignalingEvent::Offer(_)) => {
                    log::warn!("ignoring a second offer on an already-answered connection");
                }
                Some(SignalingEvent::Closed) | None => bail!("signaling closed before data channels finished opening"),
            },
            event = transport_rx.recv() => match event {
                Some(TransportEvent::IceCandidate { candidate, sdp_mid, sdp_mline_index }) => {
                    signaling_handle.send_candidate(&candidate, sdp_mid.as_deref(), sdp_mline_index)?;
                }
                Some(TransportEvent::Ready) => break,
                Some(TransportEvent::DomainChannelClosed) => bail!("domain data channel closed before the handshake started"),
                Some(TransportEvent::DataChannelMessage { .. }) | None => {}
            }
        }
    }

    let udp_socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;

    let ice_rendezvous = if config.bridge.ice_rendezvous.use_custom_ice_server {
        config
            .bridge
            .ice_rendezvous
            .custom
            .context("use_custom_ice_server is set but no custom address is configured")?
    } else {
        resolve(&config.bridge.ice_rendezvous.hostname).await?
    };

    let stun_server = resolve(&format!(
        "{}:{}",
        config.bridge.stun_server.hostname, config.bridge.stun_server.port
    ))
    .await?;

    let handshake_config = HandshakeConfig {
        stun_server,
        ice_rendezvous,
        domain_id: config.bridge.domain_id,
        place_name: config.bridge.place_name.clone(),
        protocol_version_signature: config.bridge.protocol_version_signature.clone(),
        machine_fingerprint: config.bridge.machine_fingerprint,
        hw_addr: local_addr.octets().to_vec(),
    };

    if !config.bridge.finished_domain_id_request {
        bail!("domain id resolution has not finished; refusing to start the handshake");
    }

    handshake::run(&udp_socket, &mut connection, &handshake_config, &transport).await?;
    statistics.update_phase(client_id, connection.phase());
    log::info!("connection {client_id} reached the domain, session_id={:?}", connection.session_id);

    let mut recv_buffer = [0u8; 1500];

    loop {
        tokio::select! {
            received = udp_socket.recv_from(&mut recv_buffer) => {
                let (len, from) = received.context("reading from the domain udp socket")?;
                relay::handle_udp_datagram(&udp_socket, &mut connection, &transport, &recv_buffer[..len], from, config.bridge.domain_id).await?;
            }
            event = transport_rx.recv() => match event {
                Some(TransportEvent::DataChannelMessage { label, data }) => {
                    relay::forward_data_channel_message(&udp_socket, &connection, label, &data).await?;
                }
                Some(TransportEvent::IceCandidate { candidate, sdp_mid, sdp_mline_index }) => {
                    signaling_handle.send_candidate(&candidate, sdp_mid.as_deref(), sdp_mline_index)?;
                }
                Some(TransportEvent::DomainChannelClosed) => {
                    log::info!("domain data channel closed, tearing down connection {client_id}");
                    break;
                }
                Some(TransportEvent::Ready) | None => {}
            },
            event = signaling_rx.recv() => match event {
                Some(SignalingEvent::Candidate(candidate)) => {
                    transport.add_remote_candidate(&candidate).await?;
                }
                Some(SignalingEvent::Closed) | None => {
                    log::info!("signaling closed, tearing down connection {client_id}");
                    break;
                }
                Some(SignalingEvent::Offer(_)) => {
                    log::warn!("ignoring a renegotiation offer on an established connection");
                }
            }
        }
    }

    transport.close().await?;
    Ok(())
}
