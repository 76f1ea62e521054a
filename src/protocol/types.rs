use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use bytes::Bytes;

use crate::utils::error::{Result, SocksError};

/// SOCKS5 version byte
pub const SOCKS_VERSION: u8 = 0x05;

/// Username/password sub-negotiation version (RFC 1929), distinct from the
/// outer SOCKS version.
pub const AUTH_VERSION: u8 = 0x01;

/// Largest encoded address tuple: type + length + 255-byte domain + port
pub const MAX_ADDR_LEN: usize = 1 + 1 + 255 + 2;

/// Authentication methods
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AuthMethod {
    NoAuth = 0x00,
    UserPass = 0x02,
    NoAcceptable = 0xFF,
}

impl From<u8> for AuthMethod {
    fn from(value: u8) -> Self {
        match value {
            0x00 => AuthMethod::NoAuth,
            0x02 => AuthMethod::UserPass,
            _ => AuthMethod::NoAcceptable,
        }
    }
}

/// SOCKS5 commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    Connect = 0x01,
    Bind = 0x02,
    UdpAssociate = 0x03,
}

impl TryFrom<u8> for Command {
    type Error = SocksError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0x01 => Ok(Command::Connect),
            0x02 => Ok(Command::Bind),
            0x03 => Ok(Command::UdpAssociate),
            _ => Err(SocksError::CmdNotSupported(value)),
        }
    }
}

/// SOCKS5 reply codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ReplyCode {
    Succeeded = 0x00,
    GeneralFailure = 0x01,
    ConnectionNotAllowed = 0x02,
    NetworkUnreachable = 0x03,
    HostUnreachable = 0x04,
    ConnectionRefused = 0x05,
    TtlExpired = 0x06,
    CommandNotSupported = 0x07,
    AddressTypeNotSupported = 0x08,
}

impl TryFrom<u8> for ReplyCode {
    type Error = SocksError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0x00 => Ok(ReplyCode::Succeeded),
            0x01 => Ok(ReplyCode::GeneralFailure),
            0x02 => Ok(ReplyCode::ConnectionNotAllowed),
            0x03 => Ok(ReplyCode::NetworkUnreachable),
            0x04 => Ok(ReplyCode::HostUnreachable),
            0x05 => Ok(ReplyCode::ConnectionRefused),
            0x06 => Ok(ReplyCode::TtlExpired),
            0x07 => Ok(ReplyCode::CommandNotSupported),
            0x08 => Ok(ReplyCode::AddressTypeNotSupported),
            _ => Err(SocksError::BadRequest),
        }
    }
}

/// Address types
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Address {
    IPv4([u8; 4]),
    IPv6([u8; 16]),
    Domain(String),
}

impl Address {
    /// Wire length of the encoded `type | addr | port` tuple.
    pub fn encoded_len(&self) -> usize {
        let addr_len = match self {
            Address::IPv4(_) => 4,
            Address::IPv6(_) => 16,
            Address::Domain(domain) => 1 + domain.len(),
        };
        1 + addr_len + 2
    }

    /// Append the on-wire `type | addr | port` form to `buf`.
    pub fn write_to(&self, buf: &mut Vec<u8>, port: u16) {
        match self {
            Address::IPv4(octets) => {
                buf.push(0x01);
                buf.extend_from_slice(octets);
            }
            Address::Domain(domain) => {
                debug_assert!(
                    !domain.is_empty() && domain.len() <= 255,
                    "invalid domain length"
                );
                buf.push(0x03);
                buf.push(domain.len() as u8);
                buf.extend_from_slice(domain.as_bytes());
            }
            Address::IPv6(octets) => {
                buf.push(0x04);
                buf.extend_from_slice(octets);
            }
        }
        buf.extend_from_slice(&port.to_be_bytes());
    }

    /// Encode the `type | addr | port` tuple.
    pub fn to_bytes(&self, port: u16) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        self.write_to(&mut buf, port);
        buf
    }

    /// Decode a `type | addr | port` tuple from the front of `buf`, returning
    /// the address, the port, and the number of bytes consumed.
    pub fn from_bytes(buf: &[u8]) -> Result<(Self, u16, usize)> {
        let atyp = *buf.first().ok_or(SocksError::BadRequest)?;

        let (address, addr_end) = match atyp {
            0x01 => {
                if buf.len() < 1 + 4 {
                    return Err(SocksError::BadRequest);
                }
                let mut octets = [0u8; 4];
                octets.copy_from_slice(&buf[1..5]);
                (Address::IPv4(octets), 5)
            }
            0x03 => {
                let len = *buf.get(1).ok_or(SocksError::BadRequest)? as usize;
                if len == 0 {
                    return Err(SocksError::BadRequest);
                }
                if buf.len() < 2 + len {
                    return Err(SocksError::BadRequest);
                }
                let domain = String::from_utf8(buf[2..2 + len].to_vec())
                    .map_err(|_| SocksError::BadRequest)?;
                (Address::Domain(domain), 2 + len)
            }
            0x04 => {
                if buf.len() < 1 + 16 {
                    return Err(SocksError::BadRequest);
                }
                let mut octets = [0u8; 16];
                octets.copy_from_slice(&buf[1..17]);
                (Address::IPv6(octets), 17)
            }
            other => return Err(SocksError::AddressType(other)),
        };

        if buf.len() < addr_end + 2 {
            return Err(SocksError::BadRequest);
        }
        let port = u16::from_be_bytes([buf[addr_end], buf[addr_end + 1]]);

        Ok((address, port, addr_end + 2))
    }

    /// `host:port` form, bracketed for IPv6 hosts.
    pub fn socket_string(&self, port: u16) -> String {
        match self {
            Address::IPv6(octets) => format!("[{}]:{}", Ipv6Addr::from(*octets), port),
            other => format!("{}:{}", other, port),
        }
    }

    /// Parse `host:port`: the host is tried as an IPv4 literal, then an IPv6
    /// literal (with or without brackets), then kept as a domain name.
    pub fn from_socket_str(s: &str) -> Result<(Self, u16)> {
        let (host, port) = s.rsplit_once(':').ok_or(SocksError::BadRequest)?;
        let port: u16 = port.parse().map_err(|_| SocksError::BadRequest)?;

        let host = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host);

        if let Ok(v4) = host.parse::<Ipv4Addr>() {
            return Ok((Address::IPv4(v4.octets()), port));
        }
        if let Ok(v6) = host.parse::<Ipv6Addr>() {
            return Ok((Address::IPv6(v6.octets()), port));
        }
        if host.is_empty() || host.len() > 255 {
            return Err(SocksError::BadRequest);
        }
        Ok((Address::Domain(host.to_string()), port))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::IPv4(octets) => write!(f, "{}", Ipv4Addr::from(*octets)),
            Address::IPv6(octets) => write!(f, "{}", Ipv6Addr::from(*octets)),
            Address::Domain(domain) => write!(f, "{}", domain),
        }
    }
}

impl From<IpAddr> for Address {
    fn from(ip: IpAddr) -> Self {
        match ip {
            IpAddr::V4(v4) => Address::IPv4(v4.octets()),
            IpAddr::V6(v6) => Address::IPv6(v6.octets()),
        }
    }
}

impl From<SocketAddr> for Address {
    fn from(addr: SocketAddr) -> Self {
        addr.ip().into()
    }
}

/// Client greeting message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientGreeting {
    pub methods: Vec<AuthMethod>,
}

/// Username/password sub-negotiation request (RFC 1929). Both fields are
/// compared byte-exact, so they stay raw bytes rather than strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserPassAuth {
    pub username: Vec<u8>,
    pub password: Vec<u8>,
}

/// SOCKS5 request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocksRequest {
    pub command: Command,
    pub address: Address,
    pub port: u16,
}

/// Header of a SOCKS5 UDP datagram envelope
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UdpHeader {
    pub frag: u8,
    pub address: Address,
    pub port: u16,
}

/// A SOCKS5 UDP datagram: envelope header plus payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UdpPacket {
    pub header: UdpHeader,
    pub data: Bytes,
}
