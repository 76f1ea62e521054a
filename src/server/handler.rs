use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use crate::config::AuthConfig;
use crate::protocol::*;
use crate::server::proxy::relay_data;
use crate::server::resolver::resolve_address;
use crate::utils::error::{Result, SocksError};

/// Context shared by all client connections
pub struct ClientHandlerContext {
    pub auth: AuthConfig,
    /// Endpoint handed to every UDP ASSOCIATE client
    pub udp_relay_addr: SocketAddr,
}

/// Drive one accepted connection through the negotiation phases and the
/// requested command.
pub async fn handle_client(
    mut stream: TcpStream,
    ctx: Arc<ClientHandlerContext>,
    client_addr: SocketAddr,
) -> Result<()> {
    let method = select_method(&mut stream, &ctx).await?;
    authenticate(&mut stream, &ctx, method).await?;

    let request = parse_request(&mut stream).await?;

    info!(
        "request from {}: {:?} {}",
        client_addr,
        request.command,
        request.address.socket_string(request.port)
    );

    match request.command {
        Command::Connect => handle_connect(stream, &request.address, request.port).await,
        Command::UdpAssociate => {
            handle_udp_associate(stream, &request, ctx.udp_relay_addr).await
        }
        Command::Bind => {
            warn!("rejecting BIND request from {}", client_addr);
            send_reply(
                &mut stream,
                ReplyCode::CommandNotSupported,
                &Address::IPv4([0, 0, 0, 0]),
                0,
            )
            .await?;
            Ok(())
        }
    }
}

/// Read the greeting and pick the authentication method: user/pass when a
/// credential pair is configured, plain access otherwise.
async fn select_method(stream: &mut TcpStream, ctx: &ClientHandlerContext) -> Result<AuthMethod> {
    let greeting = match parse_client_greeting(stream).await {
        Ok(greeting) => greeting,
        Err(SocksError::SocksVersion(version)) => {
            // Answer 05 FF, then close
            let _ = send_method_choice(stream, AuthMethod::NoAcceptable).await;
            return Err(SocksError::SocksVersion(version));
        }
        Err(e) => return Err(e),
    };

    debug!("client offered methods: {:?}", greeting.methods);

    let preferred = if ctx.auth.credentials().is_some() {
        AuthMethod::UserPass
    } else {
        AuthMethod::NoAuth
    };

    if !greeting.methods.contains(&preferred) {
        send_method_choice(stream, AuthMethod::NoAcceptable).await?;
        return Err(SocksError::MethodNotAcceptable);
    }

    send_method_choice(stream, preferred).await?;
    Ok(preferred)
}

async fn authenticate(
    stream: &mut TcpStream,
    ctx: &ClientHandlerContext,
    method: AuthMethod,
) -> Result<()> {
    match method {
        AuthMethod::NoAuth => Ok(()),
        AuthMethod::UserPass => {
            let auth = parse_userpass_auth(stream).await?;

            let ok = ctx
                .auth
                .credentials()
                .map(|(username, password)| {
                    auth.username.as_slice() == username.as_bytes()
                        && auth.password.as_slice() == password.as_bytes()
                })
                .unwrap_or(false);

            send_auth_reply(stream, ok).await?;

            if ok {
                debug!("user authenticated");
                Ok(())
            } else {
                Err(SocksError::AuthFailed)
            }
        }
        AuthMethod::NoAcceptable => Err(SocksError::MethodNotAcceptable),
    }
}

async fn handle_connect(mut client: TcpStream, address: &Address, port: u16) -> Result<()> {
    let candidates = match resolve_address(address, port).await {
        Ok(candidates) => candidates,
        Err(e) => {
            warn!(
                "resolution failed for {}: {}",
                address.socket_string(port),
                e
            );
            send_reply(
                &mut client,
                ReplyCode::HostUnreachable,
                &Address::IPv4([0, 0, 0, 0]),
                0,
            )
            .await?;
            return Err(e);
        }
    };

    let mut last_err: Option<io::Error> = None;
    let mut upstream = None;

    for target in candidates {
        debug!("dialing {}", target);
        match TcpStream::connect(target).await {
            Ok(stream) => {
                upstream = Some(stream);
                break;
            }
            Err(e) => last_err = Some(e),
        }
    }

    let upstream = match upstream {
        Some(stream) => stream,
        None => {
            let err = last_err
                .unwrap_or_else(|| io::Error::other("no reachable upstream addresses"));
            warn!("connect to {} failed: {}", address.socket_string(port), err);
            send_reply(
                &mut client,
                dial_error_reply(&err),
                &Address::IPv4([0, 0, 0, 0]),
                0,
            )
            .await?;
            return Err(SocksError::Io(err));
        }
    };

    if let Err(e) = upstream.set_nodelay(true) {
        warn!("failed to set TCP_NODELAY on upstream socket: {}", e);
    }

    let local_addr = upstream.local_addr()?;
    send_reply(
        &mut client,
        ReplyCode::Succeeded,
        &Address::from(local_addr),
        local_addr.port(),
    )
    .await?;

    debug!("connected to {}, relaying", address.socket_string(port));

    relay_data(client, upstream).await
}

/// Map a dial failure to its SOCKS reply code.
fn dial_error_reply(err: &io::Error) -> ReplyCode {
    match err.kind() {
        io::ErrorKind::ConnectionRefused => ReplyCode::ConnectionRefused,
        io::ErrorKind::NetworkUnreachable => ReplyCode::NetworkUnreachable,
        _ => ReplyCode::HostUnreachable,
    }
}

async fn handle_udp_associate(
    mut client: TcpStream,
    request: &SocksRequest,
    relay_addr: SocketAddr,
) -> Result<()> {
    // The source the client claims here is parsed but not enforced
    debug!(
        "udp associate, client claims source {}",
        request.address.socket_string(request.port)
    );

    send_reply(
        &mut client,
        ReplyCode::Succeeded,
        &Address::from(relay_addr),
        relay_addr.port(),
    )
    .await?;

    info!("udp associate established, relay at {}", relay_addr);

    // Hold the control connection open; its close is the teardown signal
    let mut buf = [0u8; 128];
    loop {
        match client.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
    }

    debug!("control connection closed, association over");
    Ok(())
}
