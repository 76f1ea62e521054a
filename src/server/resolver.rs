use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use tracing::instrument;

use crate::protocol::Address;
use crate::utils::error::{Result, SocksError};

/// Resolve a SOCKS5 address into socket addresses. Literal IPs map directly;
/// domains go through the system resolver.
#[instrument(level = "debug", fields(port = port, address = %address))]
pub async fn resolve_address(address: &Address, port: u16) -> Result<Vec<SocketAddr>> {
    let targets: Vec<SocketAddr> = match address {
        Address::IPv4(octets) => {
            vec![SocketAddr::new(IpAddr::V4(Ipv4Addr::from(*octets)), port)]
        }
        Address::IPv6(octets) => {
            vec![SocketAddr::new(IpAddr::V6(Ipv6Addr::from(*octets)), port)]
        }
        Address::Domain(domain) => tokio::net::lookup_host((domain.as_str(), port))
            .await
            .map_err(SocksError::Io)?
            .collect(),
    };

    if targets.is_empty() {
        return Err(SocksError::Io(std::io::Error::new(
            std::io::ErrorKind::AddrNotAvailable,
            "no addresses found for destination",
        )));
    }

    Ok(targets)
}
