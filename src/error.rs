use crate::config::Protocol;
use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

/// Which half of a TCP session an I/O failure happened on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    ClientToRemote,
    RemoteToClient,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::ClientToRemote => f.write_str("client -> remote"),
            Direction::RemoteToClient => f.write_str("remote -> client"),
        }
    }
}

#[derive(Error, Debug)]
pub enum TunnelError {
    #[error("Local {protocol} port {port} is already in use")]
    PortInUse { protocol: Protocol, port: u16 },

    #[error("Failed to bind {protocol} 127.0.0.1:{port}: {source}")]
    Bind {
        protocol: Protocol,
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to open UDP socket towards {remote}: {source}")]
    RemoteSocket {
        remote: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to resolve remote host {host}: {message}")]
    Resolve { host: String, message: String },

    #[error("Failed to connect to {host}:{port}: {source}")]
    Connect {
        host: String,
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("Connecting to {host}:{port} timed out after {timeout:?}")]
    ConnectTimeout {
        host: String,
        port: u16,
        timeout: Duration,
    },

    #[error("Stream error ({direction}): {source}")]
    Stream {
        direction: Direction,
        #[source]
        source: std::io::Error,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TunnelError {
    /// Map a bind failure to [`TunnelError::PortInUse`] when the address is taken.
    pub fn bind(protocol: Protocol, port: u16, source: std::io::Error) -> Self {
        if source.kind() == std::io::ErrorKind::AddrInUse {
            TunnelError::PortInUse { protocol, port }
        } else {
            TunnelError::Bind {
                protocol,
                port,
                source,
            }
        }
    }

    pub fn is_bind_error(&self) -> bool {
        matches!(
            self,
            TunnelError::PortInUse { .. } | TunnelError::Bind { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, TunnelError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Error, ErrorKind};

    #[test]
    fn test_addr_in_use_maps_to_port_in_use() {
        let err = TunnelError::bind(Protocol::Udp, 5004, Error::from(ErrorKind::AddrInUse));
        assert!(matches!(
            err,
            TunnelError::PortInUse {
                protocol: Protocol::Udp,
                port: 5004
            }
        ));
        assert!(err.is_bind_error());
        assert_eq!(err.to_string(), "Local UDP port 5004 is already in use");
    }

    #[test]
    fn test_other_bind_failures_keep_source() {
        let err = TunnelError::bind(
            Protocol::Tcp,
            80,
            Error::from(ErrorKind::PermissionDenied),
        );
        assert!(matches!(err, TunnelError::Bind { port: 80, .. }));
        assert!(err.is_bind_error());
    }

    #[test]
    fn test_remote_socket_error_is_not_a_local_port_error() {
        let err = TunnelError::RemoteSocket {
            remote: "192.168.2.2:5004".parse().unwrap(),
            source: Error::from(ErrorKind::PermissionDenied),
        };
        assert!(!err.is_bind_error());
        assert!(err
            .to_string()
            .starts_with("Failed to open UDP socket towards 192.168.2.2:5004"));
    }

    #[test]
    fn test_session_errors_are_not_bind_errors() {
        let err = TunnelError::Stream {
            direction: Direction::RemoteToClient,
            source: Error::from(ErrorKind::ConnectionReset),
        };
        assert!(!err.is_bind_error());
        assert!(err.to_string().contains("remote -> client"));
    }
}
