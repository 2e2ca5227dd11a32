//! Bidirectional UDP relay: `127.0.0.1:local_port <-> remote_host:remote_port`.
//!
//! Routing, evaluated per datagram:
//! - loopback-facing socket, source `127.0.0.1:*` -> sent to the remote
//! - remote-facing socket, source exactly the remote -> sent to the most
//!   recent loopback sender
//! - anything else is dropped without a log line
//!
//! No parsing, reassembly, or retransmission. A datagram that finds a full
//! send buffer is dropped, like any other loss on the path.

use crate::config::{ForwardingRule, Protocol};
use crate::error::{Result, TunnelError};
use crate::filter::AddressFilter;
use std::io::{self, ErrorKind};
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use tokio::net::{lookup_host, UdpSocket};
use tracing::{debug, trace};

/// Maximum UDP datagram size.
const MAX_DATAGRAM: usize = 65535;

/// Resolve `host:port` to the single address the relay talks to. IPv4 is
/// preferred when the name has both families.
pub async fn resolve_remote(host: &str, port: u16) -> Result<SocketAddr> {
    let addrs: Vec<SocketAddr> = lookup_host((host, port))
        .await
        .map_err(|e| TunnelError::Resolve {
            host: host.to_string(),
            message: e.to_string(),
        })?
        .collect();

    addrs
        .iter()
        .find(|addr| addr.is_ipv4())
        .or_else(|| addrs.first())
        .copied()
        .ok_or_else(|| TunnelError::Resolve {
            host: host.to_string(),
            message: "no addresses found".to_string(),
        })
}

/// The bound socket pair for one UDP rule. Built only once both sockets
/// exist and the remote address is resolved.
pub struct UdpRelay {
    local: UdpSocket,
    remote: UdpSocket,
    local_addr: SocketAddr,
    remote_addr: SocketAddr,
}

impl UdpRelay {
    /// Bind and relay until the task is cancelled.
    pub async fn start(local_port: u16, remote_host: &str, remote_port: u16) -> Result<()> {
        let rule = ForwardingRule::udp(local_port, remote_host, remote_port);
        Self::bind(&rule).await?.run().await
    }

    pub async fn bind(rule: &ForwardingRule) -> Result<Self> {
        let remote_addr = resolve_remote(&rule.remote_host, rule.remote_port).await?;

        let local = UdpSocket::bind((Ipv4Addr::LOCALHOST, rule.local_port))
            .await
            .map_err(|e| TunnelError::bind(Protocol::Udp, rule.local_port, e))?;
        let local_addr = local.local_addr()?;

        let wildcard: SocketAddr = if remote_addr.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let remote = open_remote_socket(wildcard, remote_addr)
            .await
            .map_err(|source| TunnelError::RemoteSocket {
                remote: remote_addr,
                source,
            })?;

        debug!("UDP relay bound on {} for {}", local_addr, remote_addr);

        Ok(Self {
            local,
            remote,
            local_addr,
            remote_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// Relay forever. Socket errors are logged and skipped; they never end
    /// the relay (ICMP unreachable shows up as ECONNREFUSED on the next recv).
    ///
    /// Sends never wait: a datagram that finds the send buffer full is
    /// dropped, so a stalled direction can't hold up the other one.
    pub async fn run(self) -> Result<()> {
        let mut router = Router::new(self.local_addr, self.remote_addr);

        let mut local_buf = vec![0u8; MAX_DATAGRAM];
        let mut remote_buf = vec![0u8; MAX_DATAGRAM];

        loop {
            tokio::select! {
                result = self.local.recv_from(&mut local_buf) => {
                    let (len, src) = match result {
                        Ok(received) => received,
                        Err(e) => {
                            debug!("UDP recv error on {}: {}", self.local_addr, e);
                            continue;
                        }
                    };

                    if router.outbound(src).is_none() {
                        continue;
                    }

                    match self.remote.try_send(&local_buf[..len]) {
                        Ok(_) => {}
                        Err(e) if e.kind() == ErrorKind::WouldBlock => {
                            trace!(
                                "Send buffer full, dropped datagram to {}",
                                self.remote_addr
                            );
                        }
                        Err(e) => debug!(
                            "Failed to send UDP datagram to {}: {}",
                            self.remote_addr, e
                        ),
                    }
                }

                result = self.remote.recv_from(&mut remote_buf) => {
                    let (len, src) = match result {
                        Ok(received) => received,
                        Err(e) => {
                            debug!("UDP recv error from {}: {}", self.remote_addr, e);
                            continue;
                        }
                    };

                    let Some(peer) = router.inbound(src) else {
                        continue;
                    };

                    match self.local.try_send_to(&remote_buf[..len], peer) {
                        Ok(_) => {}
                        Err(e) if e.kind() == ErrorKind::WouldBlock => {
                            trace!("Send buffer full, dropped datagram to {}", peer);
                        }
                        Err(e) => debug!("Failed to send UDP datagram to {}: {}", peer, e),
                    }
                }
            }
        }
    }
}

/// Remote-facing socket: wildcard of the remote's family, connected to it.
async fn open_remote_socket(
    wildcard: SocketAddr,
    remote_addr: SocketAddr,
) -> io::Result<UdpSocket> {
    let socket = UdpSocket::bind(wildcard).await?;
    socket.connect(remote_addr).await?;
    Ok(socket)
}

/// Decides, per received datagram, whether and where it gets sent. Owned by
/// the relay loop; nothing else sees the return peer.
#[derive(Debug)]
struct Router {
    local_addr: SocketAddr,
    remote_addr: SocketAddr,
    loopback: AddressFilter,
    upstream: AddressFilter,
    /// Most recent admitted loopback sender; where replies go.
    return_peer: Option<SocketAddr>,
}

impl Router {
    fn new(local_addr: SocketAddr, remote_addr: SocketAddr) -> Self {
        Self {
            local_addr,
            remote_addr,
            loopback: AddressFilter::Loopback,
            upstream: AddressFilter::exact(remote_addr),
            return_peer: None,
        }
    }

    /// A datagram from `src` arrived on the loopback socket. Returns the
    /// remote to forward it to, and remembers `src` for replies.
    fn outbound(&mut self, src: SocketAddr) -> Option<SocketAddr> {
        if src == self.local_addr || !self.loopback.admits(src) {
            return None;
        }
        self.return_peer = Some(src);
        Some(self.remote_addr)
    }

    /// A datagram from `src` arrived on the remote-facing socket. Returns the
    /// loopback peer to deliver it to.
    fn inbound(&self, src: SocketAddr) -> Option<SocketAddr> {
        if !self.upstream.admits(src) {
            return None;
        }
        self.return_peer
    }
}
