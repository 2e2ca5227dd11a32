use crate::config::{ForwardingRule, PortMap, Protocol};
use crate::error::{Result, TunnelError};
use crate::forward::{resolve_remote, TcpForwarder, UdpRelay};
use std::collections::BTreeSet;
use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, error, info};

/// A forwarder that holds its sockets but isn't relaying yet.
enum Forwarder {
    Tcp(TcpForwarder),
    Udp(UdpRelay),
}

impl Forwarder {
    fn local_addr(&self) -> SocketAddr {
        match self {
            Forwarder::Tcp(forwarder) => forwarder.local_addr(),
            Forwarder::Udp(relay) => relay.local_addr(),
        }
    }

    async fn run(self) -> Result<()> {
        match self {
            Forwarder::Tcp(forwarder) => forwarder.run().await,
            Forwarder::Udp(relay) => relay.run().await,
        }
    }
}

/// A rule together with the address it actually got.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub rule: ForwardingRule,
    pub local_addr: SocketAddr,
}

impl fmt::Display for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.rule.protocol {
            Protocol::Tcp => write!(
                f,
                "[TCP] forwarding {} -> {}:{}",
                self.local_addr, self.rule.remote_host, self.rule.remote_port
            ),
            Protocol::Udp => write!(
                f,
                "[UDP] proxy {} <-> {}:{}",
                self.local_addr, self.rule.remote_host, self.rule.remote_port
            ),
        }
    }
}

/// Owns the fixed rule set and starts one forwarder per rule.
#[derive(Debug, Clone)]
pub struct TunnelSupervisor {
    rules: Vec<ForwardingRule>,
    connect_timeout: Option<Duration>,
}

impl TunnelSupervisor {
    pub fn new(rules: Vec<ForwardingRule>) -> Self {
        Self {
            rules,
            connect_timeout: None,
        }
    }

    pub fn from_port_map(remote_host: &str, port_map: &PortMap) -> Self {
        Self::new(port_map.rules(remote_host))
    }

    pub fn with_connect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn rules(&self) -> &[ForwardingRule] {
        &self.rules
    }

    /// Bind every rule, then start relaying. All-or-nothing: on the first
    /// failure every socket bound so far is released and the error returned.
    pub async fn start(&self) -> Result<RunningTunnel> {
        if self.rules.is_empty() {
            return Err(TunnelError::Config("no forwarding rules".to_string()));
        }

        let hosts: BTreeSet<&str> = self.rules.iter().map(|r| r.remote_host.as_str()).collect();
        for host in hosts {
            let addr = resolve_remote(host, 0).await?;
            debug!("Remote host {} resolved to {}", host, addr.ip());
        }

        let mut bound = Vec::with_capacity(self.rules.len());
        for rule in &self.rules {
            let forwarder = match rule.protocol {
                Protocol::Tcp => Forwarder::Tcp(
                    TcpForwarder::bind(rule)
                        .await?
                        .with_connect_timeout(self.connect_timeout),
                ),
                Protocol::Udp => Forwarder::Udp(UdpRelay::bind(rule).await?),
            };
            bound.push((rule.clone(), forwarder));
        }

        let mut tasks = JoinSet::new();
        let mut bindings = Vec::with_capacity(bound.len());

        for (rule, forwarder) in bound {
            let binding = Binding {
                rule,
                local_addr: forwarder.local_addr(),
            };
            info!("{}", binding);
            bindings.push(binding);
            tasks.spawn(forwarder.run());
        }

        Ok(RunningTunnel { tasks, bindings })
    }

    /// Start, then relay until `shutdown` completes.
    pub async fn run_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        self.start().await?.run_until(shutdown).await
    }
}

/// The started forwarders. Dropping this aborts them all.
pub struct RunningTunnel {
    tasks: JoinSet<Result<()>>,
    bindings: Vec<Binding>,
}

impl RunningTunnel {
    pub fn bindings(&self) -> &[Binding] {
        &self.bindings
    }

    /// Wait for `shutdown` or for a forwarder to stop, then cancel every
    /// forwarder along with its open sessions.
    pub async fn run_until<F>(mut self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        let outcome = loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested, stopping {} forwarders", self.tasks.len());
                    break Ok(());
                }
                joined = self.tasks.join_next() => match joined {
                    None => break Ok(()),
                    Some(Ok(Ok(()))) => continue,
                    Some(Ok(Err(e))) => {
                        error!("Forwarder stopped: {}", e);
                        break Err(e);
                    }
                    Some(Err(e)) => {
                        error!("Forwarder task failed: {}", e);
                        break Err(TunnelError::Io(e.into()));
                    }
                },
            }
        };

        self.shutdown().await;
        outcome
    }

    pub async fn shutdown(mut self) {
        self.tasks.shutdown().await;
        debug!("All forwarders stopped");
    }
}
