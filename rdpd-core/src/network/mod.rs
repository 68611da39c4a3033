//! Transports implementing the [`Protocol`](crate::protocol::Protocol)
//! seam.

pub mod tcp;

pub use tcp::{TcpPeer, TcpPeerListener, TcpProtocol};
