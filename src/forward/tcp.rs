use crate::config::{ForwardingRule, Protocol};
use crate::error::{Direction, Result, TunnelError};
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// Per-direction read buffer. Reads are not framed; whatever the socket has
/// (up to this size) is written straight through.
const COPY_BUFFER_SIZE: usize = 8 * 1024;

/// Pause after a failed `accept` (e.g. EMFILE) so the loop doesn't spin.
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(50);

/// Which side ended a session cleanly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    ClientClosed,
    RemoteClosed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSummary {
    pub end: SessionEnd,
    pub bytes_to_remote: u64,
    pub bytes_to_client: u64,
}

/// Emitted once per accepted connection when its session is over.
#[derive(Debug)]
pub struct SessionReport {
    pub peer: SocketAddr,
    pub outcome: Result<SessionSummary>,
}

/// Where each accepted connection gets relayed to.
#[derive(Debug, Clone)]
struct Upstream {
    host: String,
    port: u16,
    connect_timeout: Option<Duration>,
}

impl Upstream {
    async fn connect(&self) -> Result<TcpStream> {
        let connect = TcpStream::connect((self.host.as_str(), self.port));

        let result = match self.connect_timeout {
            Some(timeout) => tokio::time::timeout(timeout, connect).await.map_err(|_| {
                TunnelError::ConnectTimeout {
                    host: self.host.clone(),
                    port: self.port,
                    timeout,
                }
            })?,
            None => connect.await,
        };

        result.map_err(|source| TunnelError::Connect {
            host: self.host.clone(),
            port: self.port,
            source,
        })
    }

    async fn serve(&self, client: TcpStream) -> Result<SessionSummary> {
        // On failure `client` is dropped here, closing it without a response.
        let remote = self.connect().await?;
        relay_session(client, remote).await
    }
}

/// Listens on `127.0.0.1:local_port` and relays every accepted connection to
/// the fixed remote endpoint.
pub struct TcpForwarder {
    listener: TcpListener,
    local_addr: SocketAddr,
    upstream: Upstream,
    reports: Option<mpsc::UnboundedSender<SessionReport>>,
}

impl TcpForwarder {
    /// Bind and relay until the task is cancelled.
    pub async fn start(local_port: u16, remote_host: &str, remote_port: u16) -> Result<()> {
        let rule = ForwardingRule::tcp(local_port, remote_host, remote_port);
        Self::bind(&rule).await?.run().await
    }

    pub async fn bind(rule: &ForwardingRule) -> Result<Self> {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, rule.local_port))
            .await
            .map_err(|e| TunnelError::bind(Protocol::Tcp, rule.local_port, e))?;
        let local_addr = listener.local_addr()?;

        debug!(
            "TCP listener bound on {} for {}:{}",
            local_addr, rule.remote_host, rule.remote_port
        );

        Ok(Self {
            listener,
            local_addr,
            upstream: Upstream {
                host: rule.remote_host.clone(),
                port: rule.remote_port,
                connect_timeout: None,
            },
            reports: None,
        })
    }

    /// Bound the outbound connect. `None` waits as long as the OS does.
    pub fn with_connect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.upstream.connect_timeout = timeout;
        self
    }

    pub fn with_reports(mut self, reports: mpsc::UnboundedSender<SessionReport>) -> Self {
        self.reports = Some(reports);
        self
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept loop. Session failures never end it; dropping the returned
    /// future aborts every session it spawned.
    pub async fn run(self) -> Result<()> {
        let mut sessions: JoinSet<()> = JoinSet::new();

        loop {
            let (stream, peer) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!("Failed to accept connection on {}: {}", self.local_addr, e);
                    tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                    continue;
                }
            };

            debug!("New TCP connection from {} on {}", peer, self.local_addr);

            let upstream = self.upstream.clone();
            let reports = self.reports.clone();

            sessions.spawn(async move {
                let outcome = upstream.serve(stream).await;

                match &outcome {
                    Ok(summary) => debug!(
                        "TCP session {} ended ({:?}): {} bytes up, {} bytes down",
                        peer, summary.end, summary.bytes_to_remote, summary.bytes_to_client
                    ),
                    Err(e) => debug!("TCP session {} failed: {}", peer, e),
                }

                if let Some(reports) = reports {
                    let _ = reports.send(SessionReport { peer, outcome });
                }
            });

            while let Some(result) = sessions.try_join_next() {
                if let Err(e) = result {
                    warn!("TCP session task panicked: {}", e);
                }
            }
        }
    }
}

/// Relay bytes both ways until either direction hits end-of-stream or an
/// error, then close both connections.
pub async fn relay_session(client: TcpStream, remote: TcpStream) -> Result<SessionSummary> {
    let _ = client.set_nodelay(true);
    let _ = remote.set_nodelay(true);

    let (mut client_read, mut client_write) = client.into_split();
    let (mut remote_read, mut remote_write) = remote.into_split();

    let mut bytes_to_remote = 0u64;
    let mut bytes_to_client = 0u64;

    let end = tokio::select! {
        result = pipe(&mut client_read, &mut remote_write, &mut bytes_to_remote) => result
            .map(|()| SessionEnd::ClientClosed)
            .map_err(|source| TunnelError::Stream {
                direction: Direction::ClientToRemote,
                source,
            }),
        result = pipe(&mut remote_read, &mut client_write, &mut bytes_to_client) => result
            .map(|()| SessionEnd::RemoteClosed)
            .map_err(|source| TunnelError::Stream {
                direction: Direction::RemoteToClient,
                source,
            }),
    }?;

    Ok(SessionSummary {
        end,
        bytes_to_remote,
        bytes_to_client,
    })
}

/// Copy until EOF. Each chunk is fully written before the next read, so a
/// slow writer throttles its reader.
async fn pipe<R, W>(reader: &mut R, writer: &mut W, copied: &mut u64) -> std::io::Result<()>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut buf = vec![0u8; COPY_BUFFER_SIZE];

    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }

        writer.write_all(&buf[..n]).await?;
        writer.flush().await?;
        *copied += n as u64;
    }
}
