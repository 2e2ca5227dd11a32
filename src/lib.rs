//! Localhost relay for LAN WebRTC workloads.
//!
//! Browsers treat `127.0.0.1` as a secure origin but block pages from
//! reaching private-network addresses. This crate binds the signaling port
//! (TCP) and the media/data ports (UDP) on loopback and relays them, byte
//! for byte, to one fixed remote host.
//!
//! This is explicit port forwarding, not a general tunnel: fixed peer, fixed
//! ports, no NAT traversal, no payload inspection.

pub mod config;
pub mod error;
pub mod filter;
pub mod forward;
pub mod supervisor;

pub use config::{ForwardingRule, PortMap, PortSpec, Protocol};
pub use error::{Direction, Result, TunnelError};
pub use filter::AddressFilter;
pub use forward::{SessionEnd, SessionReport, SessionSummary, TcpForwarder, UdpRelay};
pub use supervisor::{Binding, RunningTunnel, TunnelSupervisor};
