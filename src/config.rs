use crate::error::{Result, TunnelError};
use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

/// TCP signaling (HTTP)
pub const HTTP_PORT: u16 = 8080;

/// UDP media (RTP/RTCP)
pub const RTP_PORT: u16 = 5004;

/// UDP data channel (inputs, control, etc.)
pub const DATA_PORT: u16 = 6000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    Tcp,
    Udp,
}

impl Protocol {
    /// URL scheme used when printing the reachable local endpoint.
    pub fn scheme(&self) -> &'static str {
        match self {
            Protocol::Tcp => "http",
            Protocol::Udp => "udp",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Tcp => f.write_str("TCP"),
            Protocol::Udp => f.write_str("UDP"),
        }
    }
}

/// One forwarding rule: `127.0.0.1:local_port <-> remote_host:remote_port`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardingRule {
    pub protocol: Protocol,
    pub local_port: u16,
    pub remote_host: String,
    pub remote_port: u16,
}

impl ForwardingRule {
    pub fn tcp(local_port: u16, remote_host: impl Into<String>, remote_port: u16) -> Self {
        Self {
            protocol: Protocol::Tcp,
            local_port,
            remote_host: remote_host.into(),
            remote_port,
        }
    }

    pub fn udp(local_port: u16, remote_host: impl Into<String>, remote_port: u16) -> Self {
        Self {
            protocol: Protocol::Udp,
            local_port,
            remote_host: remote_host.into(),
            remote_port,
        }
    }
}

impl fmt::Display for ForwardingRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} 127.0.0.1:{} <-> {}:{}",
            self.protocol, self.local_port, self.remote_host, self.remote_port
        )
    }
}

/// A port pair from the port map, not yet tied to a remote host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortSpec {
    pub protocol: Protocol,
    pub local_port: u16,
    pub remote_port: u16,
    pub label: Option<String>,
}

/// The fixed set of forwarded ports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortMap {
    specs: Vec<PortSpec>,
}

impl Default for PortMap {
    fn default() -> Self {
        let spec = |protocol, port, label: &str| PortSpec {
            protocol,
            local_port: port,
            remote_port: port,
            label: Some(label.to_string()),
        };

        Self {
            specs: vec![
                spec(Protocol::Tcp, HTTP_PORT, "HTTP"),
                spec(Protocol::Udp, RTP_PORT, "RTP"),
                spec(Protocol::Udp, DATA_PORT, "DATA"),
            ],
        }
    }
}

impl PortMap {
    /// Load the port map from the default config locations, falling back to
    /// the built-in map.
    pub fn load_default() -> Self {
        let paths = [
            dirs::config_dir().map(|p| p.join("rtc-tunnel").join("ports.toml")),
            dirs::home_dir().map(|p| p.join(".rtc-tunnel.toml")),
        ];

        for path in paths.into_iter().flatten() {
            if path.exists() {
                debug!("Loading port map from {:?}", path);
                match Self::load_from_file(&path) {
                    Ok(map) => return map,
                    Err(e) => warn!("Ignoring port map {:?}: {}", path, e),
                }
            }
        }

        Self::default()
    }

    /// Resolve the port map for this run: an explicit path must load, the
    /// default locations are best effort.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        match explicit {
            Some(path) => Self::load_from_file(path),
            None => Ok(Self::load_default()),
        }
    }

    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            TunnelError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;

        Self::parse(&content)
    }

    /// Parse a port map from TOML content
    ///
    /// ```toml
    /// [tcp]
    /// 8080 = 8080
    ///
    /// [udp]
    /// 5004 = 5004
    /// 6000 = "6001"
    /// ```
    pub fn parse(content: &str) -> Result<Self> {
        let mut specs = Vec::new();
        let mut seen = HashSet::new();
        let mut section: Option<Protocol> = None;

        for (index, line) in content.lines().enumerate() {
            let line_no = index + 1;
            let line = match line.split_once('#') {
                Some((before, _)) => before.trim(),
                None => line.trim(),
            };

            if line.is_empty() {
                continue;
            }

            if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
                section = match name.trim().to_ascii_lowercase().as_str() {
                    "tcp" => Some(Protocol::Tcp),
                    "udp" => Some(Protocol::Udp),
                    other => {
                        return Err(TunnelError::Config(format!(
                            "line {}: unknown section [{}]",
                            line_no, other
                        )))
                    }
                };
                continue;
            }

            let protocol = section.ok_or_else(|| {
                TunnelError::Config(format!(
                    "line {}: entry outside of a [tcp] or [udp] section",
                    line_no
                ))
            })?;

            let (key, value) = line.split_once('=').ok_or_else(|| {
                TunnelError::Config(format!("line {}: expected `local = remote`", line_no))
            })?;

            let local_port = parse_port(key, line_no)?;
            let remote_port = parse_port(value, line_no)?;
            if remote_port == 0 {
                return Err(TunnelError::Config(format!(
                    "line {}: remote port must not be 0",
                    line_no
                )));
            }

            // Port 0 asks the OS for a port, so it can't collide.
            if local_port != 0 && !seen.insert((protocol, local_port)) {
                return Err(TunnelError::Config(format!(
                    "line {}: duplicate {} port {}",
                    line_no, protocol, local_port
                )));
            }

            specs.push(PortSpec {
                protocol,
                local_port,
                remote_port,
                label: None,
            });
        }

        if specs.is_empty() {
            return Err(TunnelError::Config("port map has no entries".to_string()));
        }

        debug!("Loaded {} port map entries", specs.len());
        Ok(Self { specs })
    }

    pub fn specs(&self) -> &[PortSpec] {
        &self.specs
    }

    /// Bind every port pair to `remote_host`.
    pub fn rules(&self, remote_host: &str) -> Vec<ForwardingRule> {
        self.specs
            .iter()
            .map(|spec| ForwardingRule {
                protocol: spec.protocol,
                local_port: spec.local_port,
                remote_host: remote_host.to_string(),
                remote_port: spec.remote_port,
            })
            .collect()
    }
}

fn parse_port(raw: &str, line_no: usize) -> Result<u16> {
    let raw = raw
        .trim()
        .trim_start_matches('"')
        .trim_end_matches('"')
        .trim_start_matches('\'')
        .trim_end_matches('\'');

    raw.parse::<u16>().map_err(|_| {
        TunnelError::Config(format!("line {}: invalid port `{}`", line_no, raw))
    })
}
