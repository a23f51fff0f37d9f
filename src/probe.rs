//! Local-address probe.
//!
//! Opens an outbound TCP connection to a well-known address and reads back
//! the local socket the OS chose for it; that's as close to "my LAN address"
//! as a host can learn without cooperation from anything else. Falls back to
//! interface enumeration when the probe itself can't connect (offline dev
//! boxes, restrictive egress rules).

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::time::timeout;

const PROBE_TARGET: &str = "8.8.8.8:53";
const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// Learn the bridge's own LAN-facing IPv4 address.
pub async fn local_address() -> Ipv4Addr {
    match timeout(PROBE_TIMEOUT, TcpStream::connect(PROBE_TARGET)).await {
        Ok(Ok(stream)) => match stream.local_addr() {
            Ok(SocketAddr::V4(addr)) => {
                log::debug!("local address probe connected, local_addr={}", addr.ip());
                return *addr.ip();
            }
            Ok(SocketAddr::V6(_)) => log::warn!("local address probe returned an ipv6 socket, falling back"),
            Err(err) => log::warn!("local address probe could not read its own local_addr: {err}"),
        },
        Ok(Err(err)) => log::warn!("local address probe failed to connect: {err}"),
        Err(_) => log::warn!("local address probe timed out"),
    }

    fallback_local_address()
}

/// Enumerate interfaces and take the first IPv4 address of the first
/// non-loopback one. `if_addrs` only ever returns interfaces the OS reports
/// as active, so there is no unbounded inner loop to guard against here.
fn fallback_local_address() -> Ipv4Addr {
    match if_addrs::get_if_addrs() {
        Ok(interfaces) => interfaces
            .into_iter()
            .filter(|iface| !iface.is_loopback())
            .find_map(|iface| match iface.ip() {
                IpAddr::V4(addr) => Some(addr),
                IpAddr::V6(_) => None,
            })
            .unwrap_or(Ipv4Addr::LOCALHOST),
        Err(err) => {
            log::error!("failed to enumerate local interfaces: {err}");
            Ipv4Addr::LOCALHOST
        }
    }
}
