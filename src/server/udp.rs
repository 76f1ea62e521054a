use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use bytes::Bytes;
use dashmap::DashMap;
use tokio::net::UdpSocket;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::protocol::{parse_udp_packet, UdpPacket};
use crate::server::resolver::resolve_address;
use crate::utils::error::{Result, SocksError};

/// Bound on connecting an association's remote socket
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Associations idle longer than this are reaped
const IDLE_TIMEOUT: Duration = Duration::from_secs(120);

/// Sweep interval of the idle reaper
const REAP_INTERVAL: Duration = Duration::from_secs(30);

/// Maximum UDP datagram size
const MAX_DATAGRAM: usize = 65535;

/// One client's relay state: a connected remote socket plus the envelope
/// header prepended verbatim to datagrams flowing back to the client.
struct UdpAssociation {
    client_addr: SocketAddr,
    remote: UdpSocket,
    /// `RSV | FRAG | ATYP | ADDR | PORT` of the most recent inbound datagram
    reply_header: Mutex<Vec<u8>>,
    last_activity: Mutex<Instant>,
    cancel: CancellationToken,
}

impl UdpAssociation {
    fn touch(&self, header: &[u8]) {
        {
            let mut cached = self.reply_header.lock().expect("mutex poisoned");
            cached.clear();
            cached.extend_from_slice(header);
        }
        self.touch_activity();
    }

    fn touch_activity(&self) {
        *self.last_activity.lock().expect("mutex poisoned") = Instant::now();
    }

    fn idle_for(&self) -> Duration {
        self.last_activity.lock().expect("mutex poisoned").elapsed()
    }

    fn reply_header(&self) -> Vec<u8> {
        self.reply_header.lock().expect("mutex poisoned").clone()
    }
}

/// Single-socket UDP relay: every client multiplexes onto the one listener
/// and is keyed by its source address. The engine is not tied to any TCP
/// control connection.
pub struct UdpRelay {
    socket: Arc<UdpSocket>,
    associations: DashMap<SocketAddr, Arc<UdpAssociation>>,
    shutdown: CancellationToken,
}

impl UdpRelay {
    pub fn new(socket: UdpSocket, shutdown: CancellationToken) -> Arc<Self> {
        Arc::new(Self {
            socket: Arc::new(socket),
            associations: DashMap::new(),
            shutdown,
        })
    }

    /// Receive loop. Runs until shutdown or a listener-level socket error;
    /// per-datagram failures only drop that datagram.
    pub async fn run(self: Arc<Self>) -> Result<()> {
        tokio::spawn(self.clone().reap_idle());

        let mut buf = vec![0u8; MAX_DATAGRAM];
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("udp relay shutting down");
                    self.close_all();
                    return Ok(());
                }
                received = self.socket.recv_from(&mut buf) => {
                    let (len, client_addr) = match received {
                        Ok(pair) => pair,
                        Err(e) => {
                            warn!("udp listener error: {}", e);
                            self.close_all();
                            return Err(SocksError::Io(e));
                        }
                    };

                    if let Err(e) = self.clone().handle_datagram(&buf[..len], client_addr).await {
                        debug!("dropped datagram from {}: {}", client_addr, e);
                    }
                }
            }
        }
    }

    async fn handle_datagram(self: Arc<Self>, raw: &[u8], client_addr: SocketAddr) -> Result<()> {
        let packet = parse_udp_packet(Bytes::copy_from_slice(raw))?;
        let header = &raw[..raw.len() - packet.data.len()];

        let association = match self.associations.get(&client_addr) {
            Some(entry) => entry.value().clone(),
            None => {
                let association = self.open_association(&packet, client_addr).await?;
                self.associations.insert(client_addr, association.clone());
                tokio::spawn(self.clone().run_reverse_pump(association.clone()));
                debug!(
                    "new association {} -> {}",
                    client_addr,
                    packet.header.address.socket_string(packet.header.port)
                );
                association
            }
        };

        association.touch(header);

        // Envelope stripped; only the payload goes to the remote
        if let Err(e) = association.remote.send(&packet.data).await {
            self.evict(&client_addr);
            return Err(SocksError::Io(e));
        }

        Ok(())
    }

    /// Dial the remote for a first-seen client. No mapping is created when
    /// the dial fails. The remote socket is fixed here; later datagrams from
    /// the same client reuse it whatever target their envelopes name.
    async fn open_association(
        &self,
        packet: &UdpPacket,
        client_addr: SocketAddr,
    ) -> Result<Arc<UdpAssociation>> {
        let header = &packet.header;
        let remote = UdpSocket::bind("0.0.0.0:0").await?;

        let connect = async {
            let targets = resolve_address(&header.address, header.port).await?;
            let target = targets
                .first()
                .copied()
                .ok_or_else(|| SocksError::Io(std::io::Error::other("no resolved target")))?;
            remote.connect(target).await?;
            Ok::<(), SocksError>(())
        };

        match timeout(CONNECT_TIMEOUT, connect).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(
                    "udp connect to {} failed: {}",
                    header.address.socket_string(header.port),
                    e
                );
                return Err(e);
            }
            Err(_) => {
                return Err(SocksError::Io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "udp association connect timed out",
                )));
            }
        }

        Ok(Arc::new(UdpAssociation {
            client_addr,
            remote,
            reply_header: Mutex::new(Vec::new()),
            last_activity: Mutex::new(Instant::now()),
            cancel: self.shutdown.child_token(),
        }))
    }

    /// Pump datagrams from the remote peer back to the client, each prefixed
    /// with the association's cached envelope header. Any error evicts the
    /// association.
    async fn run_reverse_pump(self: Arc<Self>, association: Arc<UdpAssociation>) {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        loop {
            let received = tokio::select! {
                _ = association.cancel.cancelled() => break,
                received = association.remote.recv(&mut buf) => received,
            };

            let n = match received {
                Ok(n) => n,
                Err(e) => {
                    debug!(
                        "association {} remote read error: {}",
                        association.client_addr, e
                    );
                    break;
                }
            };

            let mut reply = association.reply_header();
            reply.extend_from_slice(&buf[..n]);

            if let Err(e) = self.socket.send_to(&reply, association.client_addr).await {
                debug!(
                    "association {} client write error: {}",
                    association.client_addr, e
                );
                break;
            }

            association.touch_activity();
        }

        self.evict(&association.client_addr);
    }

    /// Evict associations with no traffic in either direction for too long.
    async fn reap_idle(self: Arc<Self>) {
        let mut interval = tokio::time::interval(REAP_INTERVAL);
        interval.tick().await;

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => return,
                _ = interval.tick() => {}
            }

            let stale: Vec<SocketAddr> = self
                .associations
                .iter()
                .filter(|entry| entry.value().idle_for() > IDLE_TIMEOUT)
                .map(|entry| *entry.key())
                .collect();

            for client_addr in stale {
                debug!("reaping idle association for {}", client_addr);
                self.evict(&client_addr);
            }
        }
    }

    fn evict(&self, client_addr: &SocketAddr) {
        if let Some((_, association)) = self.associations.remove(client_addr) {
            association.cancel.cancel();
            debug!("evicted association for {}", client_addr);
        }
    }

    fn close_all(&self) {
        for entry in self.associations.iter() {
            entry.value().cancel.cancel();
        }
        self.associations.clear();
    }

    #[cfg(test)]
    fn association_count(&self) -> usize {
        self.associations.len()
    }
}
