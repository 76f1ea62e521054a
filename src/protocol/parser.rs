use bytes::Bytes;
use smallvec::SmallVec;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace};

use super::types::*;
use crate::utils::error::{Result, SocksError};

/// Parse the client greeting (method selection message).
pub async fn parse_client_greeting<S>(stream: &mut S) -> Result<ClientGreeting>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let version = stream.read_u8().await?;
    if version != SOCKS_VERSION {
        return Err(SocksError::SocksVersion(version));
    }

    let nmethods = stream.read_u8().await?;
    if nmethods == 0 {
        return Err(SocksError::BadRequest);
    }

    // Clients typically offer 1-3 methods
    let mut methods_buf = SmallVec::<[u8; 8]>::from_elem(0, nmethods as usize);
    stream.read_exact(&mut methods_buf).await?;

    let methods: Vec<AuthMethod> = methods_buf.into_iter().map(AuthMethod::from).collect();

    trace!("parsed client greeting: {} methods", methods.len());

    Ok(ClientGreeting { methods })
}

/// Encode a client greeting.
pub fn encode_client_greeting(greeting: &ClientGreeting) -> Vec<u8> {
    let mut buf = Vec::with_capacity(2 + greeting.methods.len());
    buf.push(SOCKS_VERSION);
    buf.push(greeting.methods.len() as u8);
    buf.extend(greeting.methods.iter().map(|m| *m as u8));
    buf
}

/// Send the server's method choice.
pub async fn send_method_choice<S>(stream: &mut S, method: AuthMethod) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let buf = [SOCKS_VERSION, method as u8];
    stream.write_all(&buf).await?;
    stream.flush().await?;

    trace!("sent method choice: {:?}", method);

    Ok(())
}

/// Parse a method choice (the client side of the exchange).
pub async fn read_method_choice<S>(stream: &mut S) -> Result<AuthMethod>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let version = stream.read_u8().await?;
    if version != SOCKS_VERSION {
        return Err(SocksError::SocksVersion(version));
    }
    Ok(AuthMethod::from(stream.read_u8().await?))
}

/// Parse a username/password sub-negotiation request (RFC 1929).
pub async fn parse_userpass_auth<S>(stream: &mut S) -> Result<UserPassAuth>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let version = stream.read_u8().await?;
    if version != AUTH_VERSION {
        return Err(SocksError::AuthUserPassVer(version));
    }

    let username_len = stream.read_u8().await? as usize;
    let mut username = SmallVec::<[u8; 64]>::from_elem(0, username_len);
    stream.read_exact(&mut username).await?;

    let password_len = stream.read_u8().await? as usize;
    let mut password = SmallVec::<[u8; 64]>::from_elem(0, password_len);
    stream.read_exact(&mut password).await?;

    trace!(
        "parsed user/pass auth request, username {} bytes",
        username_len
    );

    Ok(UserPassAuth {
        username: username.to_vec(),
        password: password.to_vec(),
    })
}

/// Encode a username/password sub-negotiation request.
pub fn encode_userpass_auth(auth: &UserPassAuth) -> Vec<u8> {
    let mut buf = Vec::with_capacity(3 + auth.username.len() + auth.password.len());
    buf.push(AUTH_VERSION);
    buf.push(auth.username.len() as u8);
    buf.extend_from_slice(&auth.username);
    buf.push(auth.password.len() as u8);
    buf.extend_from_slice(&auth.password);
    buf
}

/// Send the authentication status reply: 0x00 success, 0x01 failure.
pub async fn send_auth_reply<S>(stream: &mut S, success: bool) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let status = if success { 0x00 } else { 0x01 };
    let buf = [AUTH_VERSION, status];
    stream.write_all(&buf).await?;
    stream.flush().await?;

    trace!(
        "sent auth reply: {}",
        if success { "success" } else { "failure" }
    );

    Ok(())
}

/// Parse the authentication status reply (client side); returns the raw status.
pub async fn read_auth_reply<S>(stream: &mut S) -> Result<u8>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let version = stream.read_u8().await?;
    if version != AUTH_VERSION {
        return Err(SocksError::AuthUserPassVer(version));
    }
    Ok(stream.read_u8().await?)
}

/// Parse a SOCKS5 request.
pub async fn parse_request<S>(stream: &mut S) -> Result<SocksRequest>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    // Fixed part: version, command, reserved
    let mut buf = [0u8; 3];
    stream.read_exact(&mut buf).await?;

    let version = buf[0];
    if version != SOCKS_VERSION {
        return Err(SocksError::SocksVersion(version));
    }

    // RFC 1928: the reserved field must be 0x00; tolerated here
    if buf[2] != 0x00 {
        trace!("non-zero reserved field in request: 0x{:02x}", buf[2]);
    }

    let command = Command::try_from(buf[1])?;
    let (address, port) = read_address(stream).await?;

    debug!(
        "parsed request: command={:?}, dest={}",
        command,
        address.socket_string(port)
    );

    Ok(SocksRequest {
        command,
        address,
        port,
    })
}

/// Encode a SOCKS5 request.
pub fn encode_request(request: &SocksRequest) -> Vec<u8> {
    let mut buf = Vec::with_capacity(3 + request.address.encoded_len());
    buf.push(SOCKS_VERSION);
    buf.push(request.command as u8);
    buf.push(0x00);
    request.address.write_to(&mut buf, request.port);
    buf
}

/// Read a `type | addr | port` tuple from the stream.
pub async fn read_address<S>(stream: &mut S) -> Result<(Address, u16)>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let atyp = stream.read_u8().await?;

    let address = match atyp {
        0x01 => {
            let mut octets = [0u8; 4];
            stream.read_exact(&mut octets).await?;
            Address::IPv4(octets)
        }
        0x03 => {
            let len = stream.read_u8().await? as usize;
            if len == 0 {
                return Err(SocksError::BadRequest);
            }
            let mut domain = SmallVec::<[u8; 128]>::from_elem(0, len);
            stream.read_exact(&mut domain).await?;
            let domain =
                String::from_utf8(domain.to_vec()).map_err(|_| SocksError::BadRequest)?;
            Address::Domain(domain)
        }
        0x04 => {
            let mut octets = [0u8; 16];
            stream.read_exact(&mut octets).await?;
            Address::IPv6(octets)
        }
        other => return Err(SocksError::AddressType(other)),
    };

    let port = stream.read_u16().await?;

    Ok((address, port))
}

/// Send a SOCKS5 reply with the given code and bound address.
pub async fn send_reply<S>(
    stream: &mut S,
    reply: ReplyCode,
    bind_addr: &Address,
    bind_port: u16,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let mut buf = Vec::with_capacity(3 + bind_addr.encoded_len());
    buf.push(SOCKS_VERSION);
    buf.push(reply as u8);
    buf.push(0x00);
    bind_addr.write_to(&mut buf, bind_port);

    stream.write_all(&buf).await?;
    stream.flush().await?;

    debug!(
        "sent reply: {:?}, bound {}",
        reply,
        bind_addr.socket_string(bind_port)
    );

    Ok(())
}

/// Parse a SOCKS5 reply (client side).
pub async fn read_reply<S>(stream: &mut S) -> Result<(ReplyCode, Address, u16)>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let mut buf = [0u8; 3];
    stream.read_exact(&mut buf).await?;

    if buf[0] != SOCKS_VERSION {
        return Err(SocksError::SocksVersion(buf[0]));
    }
    let reply = ReplyCode::try_from(buf[1])?;
    let (address, port) = read_address(stream).await?;

    Ok((reply, address, port))
}

/// Parse a UDP datagram envelope from raw bytes.
/// Layout: RSV(2) | FRAG(1) | ATYP(1) | DST.ADDR(var) | DST.PORT(2) | DATA
pub fn parse_udp_packet(buf: Bytes) -> Result<UdpPacket> {
    if buf.len() < 4 {
        return Err(SocksError::BadRequest);
    }

    let rsv = u16::from_be_bytes([buf[0], buf[1]]);
    if rsv != 0x0000 {
        return Err(SocksError::BadRequest);
    }

    // RFC 1928: an implementation that does not support fragmentation must
    // drop any datagram with a non-zero FRAG field
    let frag = buf[2];
    if frag != 0 {
        return Err(SocksError::UdpFrag(frag));
    }

    let (address, port, consumed) = Address::from_bytes(&buf[3..])?;
    let data = buf.slice(3 + consumed..);

    Ok(UdpPacket {
        header: UdpHeader {
            frag,
            address,
            port,
        },
        data,
    })
}

/// Serialize a UDP datagram envelope plus payload.
pub fn serialize_udp_packet(packet: &UdpPacket) -> Vec<u8> {
    let header = &packet.header;
    let mut buf = Vec::with_capacity(3 + header.address.encoded_len() + packet.data.len());

    buf.extend_from_slice(&[0x00, 0x00]);
    buf.push(header.frag);
    header.address.write_to(&mut buf, header.port);
    buf.extend_from_slice(&packet.data);

    buf
}
