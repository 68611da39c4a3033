//! Domain-specific error types for the remote display backend.
//!
//! All fallible operations return `Result<T, RdpError>`. The variants
//! follow the containment policy of the backend: peer-scoped errors
//! only ever tear down the offending peer, listener/config errors abort
//! start-up.

use thiserror::Error;

use crate::peer::PeerId;

/// The canonical error type for the backend.
#[derive(Debug, Error)]
pub enum RdpError {
    // ── Peer-scoped ──────────────────────────────────────────────
    /// The bounded descriptor-watch set is full; the new connection is
    /// rejected and closed.
    #[error("watch set exhausted: {capacity} peer descriptors already watched")]
    ResourceExhausted { capacity: usize },

    /// Malformed or unexpected peer traffic.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Capability mismatch while the peer is being negotiated.
    #[error("negotiation failed: {0}")]
    NegotiationFailed(String),

    /// The encoder could not produce a valid payload for the damage.
    #[error("codec failure: {0}")]
    CodecFailure(String),

    /// A peer phase transition was requested from the wrong phase.
    #[error("invalid peer transition: {0}")]
    InvalidTransition(&'static str),

    /// An operation referenced a peer that is no longer attached.
    #[error("unknown peer {0}")]
    UnknownPeer(PeerId),

    // ── Backend-fatal ────────────────────────────────────────────
    /// Bind or accept-path failure while starting the listener.
    #[error("listener failure: {0}")]
    ListenerFatal(String),

    /// Invalid backend configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    // ── Ambient ──────────────────────────────────────────────────
    /// The socket layer reported an error.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialisation of a wire PDU failed.
    #[error("encoding error: {0}")]
    Encoding(String),
}

impl RdpError {
    /// Errors that must abort the whole backend.
    pub fn is_fatal(&self) -> bool {
        matches!(self, RdpError::ListenerFatal(_) | RdpError::Config(_))
    }

    /// Errors whose blast radius is a single peer record.
    pub fn is_peer_scoped(&self) -> bool {
        !self.is_fatal()
    }
}

impl From<Box<bincode::ErrorKind>> for RdpError {
    fn from(e: Box<bincode::ErrorKind>) -> Self {
        RdpError::Encoding(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let e = RdpError::ResourceExhausted { capacity: 32 };
        assert!(e.to_string().contains("32"));

        let e = RdpError::CodecFailure("tile grid".into());
        assert!(e.to_string().contains("tile grid"));
    }

    #[test]
    fn fatal_classification() {
        assert!(RdpError::ListenerFatal("bind".into()).is_fatal());
        assert!(RdpError::Config("keys".into()).is_fatal());
        assert!(!RdpError::Protocol("bad pdu".into()).is_fatal());
        assert!(RdpError::ResourceExhausted { capacity: 1 }.is_peer_scoped());
    }

    #[test]
    fn from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe broke");
        let e: RdpError = io_err.into();
        assert!(matches!(e, RdpError::Io(_)));
    }
}
