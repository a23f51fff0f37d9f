//! Handshake engine: drives a connection from a bare UDP socket through
//! STUN, ICE rendezvous, and domain-connect, then keeps the reflexive hole
//! punched with a background ping sub-engine.
//!
//! Each phase is a small loop built from the same two ingredients: a retry
//! timer bounded by [`NUM_INITIAL_REQUESTS_BEFORE_FAIL`], and a read of the
//! one UDP socket the whole connection shares. Nothing here spawns a task of
//! its own; everything happens on the caller's event loop, matching the
//! one-task-per-connection scheduling model the rest of the bridge uses.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use bridge_core::connection::{Connection, OWNER_TYPE_AGENT, Phase};
use codec::domain::{
    DomainConnectRequest, DomainConnectionDenied, DomainList, IceServerQuery, IceServerResponse, IcePing, Packet, PacketType,
    PingType,
};
use codec::stun;
use rand::Rng;
use tokio::net::UdpSocket;
use tokio::time::interval;

use crate::transport::Transport;

const INITIAL_INTERVAL_MS: u64 = 250;
const NUM_INITIAL_REQUESTS_BEFORE_FAIL: u32 = 20;
const PING_INTERVAL_MS: u64 = 250;
const PING_BURST_COUNT: u8 = (2000 / PING_INTERVAL_MS) as u8;
const RESTART_PING_MS: u64 = 1000;

const RECV_BUFFER_SIZE: usize = 1500;

/// Phase-level failure: the retry budget was spent with no valid response.
/// Not an error in the `anyhow` sense — the supervisor decides what to do
/// with a connection stuck at a phase boundary.
#[derive(Debug)]
pub struct PhaseExhausted {
    pub phase: Phase,
}

impl std::fmt::Display for PhaseExhausted {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "handshake exhausted its retry budget in phase {:?}", self.phase)
    }
}

impl std::error::Error for PhaseExhausted {}

pub struct HandshakeConfig {
    pub stun_server: SocketAddr,
    pub ice_rendezvous: SocketAddr,
    pub domain_id: uuid::Uuid,
    pub place_name: String,
    pub protocol_version_signature: Vec<u8>,
    pub machine_fingerprint: uuid::Uuid,
    pub hw_addr: Vec<u8>,
}

fn fresh_transaction_id() -> [u8; 12] {
    let mut token = [0u8; 12];
    rand::rng().fill(&mut token);
    token
}

/// Run the connection from `Phase::Probing` through `Phase::DomainConnect`,
/// leaving `connection` at `Phase::DomainConnected` on success. `domain_dc`
/// receives every datagram this engine can't interpret, verbatim.
pub async fn run(
    socket: &UdpSocket,
    connection: &mut Connection,
    config: &HandshakeConfig,
    domain_dc: &Transport,
) -> Result<DomainList> {
    connection.advance_phase(Phase::Stun)?;
    let (public_addr, public_port) = run_stun_phase(socket, config, domain_dc).await?;
    let local_port = socket.local_addr()?.port();
    connection.record_stun_result(public_addr, public_port, local_port);

    connection.advance_phase(Phase::Ice)?;
    let ice = run_ice_phase(socket, connection, config).await?;
    connection.record_ice_result(
        ice.domain_public_addr,
        ice.domain_public_port,
        ice.domain_local_addr,
        ice.domain_local_port,
    );

    connection.advance_phase(Phase::DomainConnect)?;
    let list = run_domain_connect_phase(socket, connection, config, domain_dc).await?;

    connection.advance_phase(Phase::DomainConnected)?;
    Ok(list)
}

async fn run_stun_phase(socket: &UdpSocket, config: &HandshakeConfig, domain_dc: &Transport) -> Result<(Ipv4Addr, u16)> {
    let mut ticker = interval(Duration::from_millis(INITIAL_INTERVAL_MS));
    let mut attempts = 0u32;
    let mut outstanding = fresh_transaction_id();
    let mut buffer = [0u8; RECV_BUFFER_SIZE];

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if attempts >= NUM_INITIAL_REQUESTS_BEFORE_FAIL {
                    log::warn!("stun phase exhausted after {attempts} requests");
                    return Err(PhaseExhausted { phase: Phase::Stun }.into());
                }

                outstanding = fresh_transaction_id();
                let request = stun::encode_binding_request(&outstanding);
                socket.send_to(&request, config.stun_server).await.context("sending stun request")?;
                attempts += 1;
            }
            received = socket.recv_from(&mut buffer) => {
                let (len, _from) = received.context("reading from udp socket during stun phase")?;

                match stun::decode_binding_response(&buffer[..len]) {
                    Ok(response) if response.transaction_id != outstanding => {
                        log::debug!("stun phase: ignoring response for a stale transaction id");
                    }
                    Ok(response) => match response.xor_mapped_address {
                        Some(addr) => return Ok((*addr.ip(), addr.port())),
                        None => {
                            log::debug!("stun response carried no xor-mapped-address, forwarding opaque");
                            let _ = domain_dc.send_binary("domain_server_dc", &buffer[..len]);
                        }
                    },
                    Err(err) => log::debug!("stun phase: dropping unparseable datagram: {err}"),
                }
            }
        }
    }
}

async fn run_ice_phase(socket: &UdpSocket, connection: &mut Connection, config: &HandshakeConfig) -> Result<IceServerResponse> {
    let mut ticker = interval(Duration::from_millis(INITIAL_INTERVAL_MS));
    let mut attempts = 0u32;
    let mut buffer = [0u8; RECV_BUFFER_SIZE];

    let public_addr = connection.public_addr.context("ice phase entered without a stun result")?;
    let public_port = connection.public_port.context("ice phase entered without a stun result")?;
    let local_addr = connection.local_addr.unwrap_or(Ipv4Addr::UNSPECIFIED);
    let local_port = connection.local_port.unwrap_or(0);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if attempts >= NUM_INITIAL_REQUESTS_BEFORE_FAIL {
                    log::warn!("ice phase exhausted after {attempts} requests");
                    return Err(PhaseExhausted { phase: Phase::Ice }.into());
                }

                let query = IceServerQuery {
                    client_id: connection.client_id,
                    public_addr,
                    public_port,
                    local_addr,
                    local_port,
                    domain_id: config.domain_id,
                };

                let bytes = query.encode(connection.next_sequence_number());
                socket.send_to(&bytes, config.ice_rendezvous).await.context("sending ice server query")?;
                attempts += 1;
            }
            received = socket.recv_from(&mut buffer) => {
                let (len, from) = received.context("reading from udp socket during ice phase")?;

                let Ok(mut packet) = Packet::from_received(&buffer[..len], ipv4_of(from), from.port()) else {
                    log::debug!("ice phase: dropping undersized datagram");
                    continue;
                };

                if packet.packet_type() != PacketType::IceServerQuery {
                    log::debug!("ice phase: dropping packet of unexpected type {:?}", packet.packet_type());
                    continue;
                }

                match IceServerResponse::decode(&mut packet) {
                    Ok(response) => {
                        if response.domain_id != config.domain_id {
                            log::warn!(
                                "ice server response carried domain_id {} but expected {}; proceeding anyway",
                                response.domain_id,
                                config.domain_id,
                            );
                        }

                        return Ok(response);
                    }
                    Err(err) => log::debug!("ice phase: malformed ice server response: {err}"),
                }
            }
        }
    }
}

#[derive(Clone, Copy)]
enum PingState {
    Sending(u8),
    Paused(Instant),
}

async fn run_domain_connect_phase(
    socket: &UdpSocket,
    connection: &mut Connection,
    config: &HandshakeConfig,
    domain_dc: &Transport,
) -> Result<DomainList> {
    let mut retry_ticker = interval(Duration::from_millis(INITIAL_INTERVAL_MS));
    let mut ping_ticker = interval(Duration::from_millis(PING_INTERVAL_MS));
    let mut attempts = 0u32;
    let mut ping_state = PingState::Sending(0);
    let mut buffer = [0u8; RECV_BUFFER_SIZE];

    let domain_public = SocketAddrV4::new(
        connection.domain_public_addr.context("domain-connect phase entered without an ice result")?,
        connection.domain_public_port.context("domain-connect phase entered without an ice result")?,
    );
    let domain_local = SocketAddrV4::new(
        connection.domain_local_addr.unwrap_or(Ipv4Addr::UNSPECIFIED),
        connection.domain_local_port.unwrap_or(0),
    );

    loop {
        tokio::select! {
            _ = retry_ticker.tick() => {
                if attempts >= NUM_INITIAL_REQUESTS_BEFORE_FAIL {
                    log::warn!("domain-connect phase exhausted after {attempts} requests");
                    return Err(PhaseExhausted { phase: Phase::DomainConnect }.into());
                }

                let request = DomainConnectRequest {
                    client_id: connection.client_id,
                    protocol_version_signature: config.protocol_version_signature.clone(),
                    hw_addr: config.hw_addr.clone(),
                    machine_fingerprint: config.machine_fingerprint,
                    owner_type: OWNER_TYPE_AGENT,
                    public_addr: connection.public_addr.unwrap_or(Ipv4Addr::UNSPECIFIED),
                    public_port: connection.public_port.unwrap_or(0),
                    local_addr: connection.local_addr.unwrap_or(Ipv4Addr::UNSPECIFIED),
                    local_port: connection.local_port.unwrap_or(0),
                    interested_node_types: connection.interested_node_types.clone(),
                    place_name: config.place_name.clone(),
                };

                let bytes = request.encode(connection.next_sequence_number());
                socket.send_to(&bytes, domain_public).await.context("sending domain connect request")?;
                attempts += 1;
            }
            _ = ping_ticker.tick() => {
                match ping_state {
                    PingState::Paused(since) if since.elapsed() < Duration::from_millis(RESTART_PING_MS) => {}
                    PingState::Paused(_) => {
                        ping_state = PingState::Sending(0);
                    }
                    PingState::Sending(sent) => {
                        let ping = IcePing { client_id: connection.client_id, ping_type: PingType::Public };
                        let bytes = ping.encode(PacketType::IcePing, connection.next_sequence_number());
                        let _ = socket.send_to(&bytes, domain_public).await;

                        let sent = sent + 1;
                        ping_state = if sent >= PING_BURST_COUNT {
                            PingState::Paused(Instant::now())
                        } else {
                            PingState::Sending(sent)
                        };
                    }
                }
            }
            received = socket.recv_from(&mut buffer) => {
                let (len, from) = received.context("reading from udp socket during domain-connect phase")?;

                let Ok(mut packet) = Packet::from_received(&buffer[..len], ipv4_of(from), from.port()) else {
                    log::debug!("domain-connect phase: dropping undersized datagram");
                    continue;
                };

                match packet.packet_type() {
                    PacketType::DomainList => match DomainList::decode(&mut packet) {
                        Ok(list) => {
                            if connection.apply_domain_list(config.domain_id, &list) {
                                let _ = domain_dc.send_binary("domain_server_dc", &buffer[..len]);
                                return Ok(list);
                            }

                            log::warn!("dropping domain list for a domain_id we never asked for");
                        }
                        Err(err) => log::debug!("domain-connect phase: malformed domain list: {err}"),
                    },
                    PacketType::DomainConnectionDenied => {
                        if let Ok(denied) = DomainConnectionDenied::decode(&mut packet) {
                            log::warn!("domain connection denied, reason_code={}", denied.reason_code);
                        }
                        let _ = domain_dc.send_binary("domain_server_dc", &buffer[..len]);
                    }
                    PacketType::IcePing => {
                        if let Ok(ping) = IcePing::decode(&mut packet) {
                            reply_to_ping(socket, connection, &ping, domain_local, domain_public).await;
                        }
                    }
                    _ => {
                        let _ = domain_dc.send_binary("domain_server_dc", &buffer[..len]);
                    }
                }
            }
        }
    }
}

async fn reply_to_ping(
    socket: &UdpSocket,
    connection: &mut Connection,
    ping: &IcePing,
    domain_local: SocketAddrV4,
    domain_public: SocketAddrV4,
) {
    let destination = match ping.ping_type {
        PingType::Local => domain_local,
        PingType::Public => domain_public,
    };

    let reply = IcePing {
        client_id: ping.client_id,
        ping_type: ping.ping_type,
    };

    let bytes = reply.encode(PacketType::IcePingReply, connection.next_sequence_number());
    if let Err(err) = socket.send_to(&bytes, destination).await {
        log::warn!("failed to send ice ping reply: {err}");
    }
}

fn ipv4_of(addr: SocketAddr) -> Ipv4Addr {
    match addr {
        SocketAddr::V4(addr) => *addr.ip(),
        SocketAddr::V6(_) => Ipv4Addr::UNSPECIFIED,
    }
}
