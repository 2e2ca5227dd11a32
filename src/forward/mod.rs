//! TCP and UDP forwarders.
//!
//! - [`TcpForwarder`]: one loopback listener, one outbound connection and two
//!   copy loops per accepted client
//! - [`UdpRelay`]: one loopback socket and one remote socket per rule

pub mod tcp;
pub mod udp;

pub use tcp::{relay_session, SessionEnd, SessionReport, SessionSummary, TcpForwarder};
pub use udp::{resolve_remote, UdpRelay};
