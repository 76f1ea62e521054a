use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use socket2::SockRef;
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::server::handler::{handle_client, ClientHandlerContext};
use crate::server::udp::UdpRelay;
use crate::utils::error::{Result, SocksError};

/// Socket buffer size for accepted client connections
const SOCKET_BUFFER_SIZE: usize = 512 * 1024;

pub struct SocksServer {
    config: Arc<Config>,
    shutdown: CancellationToken,
}

impl SocksServer {
    pub fn new(config: Config) -> Self {
        Self {
            config: Arc::new(config),
            shutdown: CancellationToken::new(),
        }
    }

    /// Bind the TCP and UDP listeners on the same port and serve until
    /// [`stop`](Self::stop) is called.
    pub async fn run(&self) -> Result<()> {
        let bind_addr = format!(
            "{}:{}",
            self.config.server.bind_address, self.config.server.bind_port
        );

        let tcp_listener = TcpListener::bind(&bind_addr).await?;
        let udp_socket = UdpSocket::bind(&bind_addr).await?;
        let udp_port = udp_socket.local_addr()?.port();

        let relay_ip = match self.config.server.advertised_address.as_deref() {
            Some(configured) => configured.parse::<IpAddr>().map_err(|e| {
                SocksError::Config(format!("invalid advertised_address: {}", e))
            })?,
            None => discover_host_ip().await,
        };
        let udp_relay_addr = SocketAddr::new(relay_ip, udp_port);

        info!("socksrelay listening on {} (tcp/udp)", bind_addr);
        info!("advertised UDP relay address: {}", udp_relay_addr);

        let relay = UdpRelay::new(udp_socket, self.shutdown.child_token());
        tokio::spawn(async move {
            if let Err(e) = relay.run().await {
                warn!("udp relay stopped: {}", e);
            }
        });

        let ctx = Arc::new(ClientHandlerContext {
            auth: self.config.auth.clone(),
            udp_relay_addr,
        });

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("listener shutting down");
                    return Ok(());
                }
                accepted = tcp_listener.accept() => {
                    match accepted {
                        Ok((stream, client_addr)) => {
                            debug!("new connection from {}", client_addr);

                            if let Err(e) = tune_client_socket(&stream) {
                                warn!("failed to tune client socket: {}", e);
                            }

                            let ctx = ctx.clone();
                            tokio::spawn(async move {
                                if let Err(e) = handle_client(stream, ctx, client_addr).await {
                                    warn!("client {}: {}", client_addr, e);
                                }
                            });
                        }
                        Err(e) => {
                            error!("failed to accept connection: {}", e);
                        }
                    }
                }
            }
        }
    }

    /// Close both listeners. The accept and UDP receive loops observe the
    /// cancellation and return; in-flight connections end on their own
    /// sockets.
    pub fn stop(&self) {
        self.shutdown.cancel();
    }
}

/// Keepalive plus large buffers on each accepted connection.
fn tune_client_socket(stream: &TcpStream) -> std::io::Result<()> {
    stream.set_nodelay(true)?;

    let sock = SockRef::from(stream);
    sock.set_keepalive(true)?;
    sock.set_recv_buffer_size(SOCKET_BUFFER_SIZE)?;
    sock.set_send_buffer_size(SOCKET_BUFFER_SIZE)?;

    Ok(())
}

/// Discover the host's primary outbound IPv4 by opening a dummy UDP socket
/// toward an unreachable external address and reading its local endpoint.
/// Falls back to loopback when the host has no route at all.
async fn discover_host_ip() -> IpAddr {
    async fn probe() -> std::io::Result<IpAddr> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.connect("192.192.192.192:80").await?;
        Ok(socket.local_addr()?.ip())
    }

    match probe().await {
        Ok(ip) => ip,
        Err(e) => {
            warn!("host IP discovery failed, advertising loopback: {}", e);
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        }
    }
}
