//! Peer activation state machine.
//!
//! ```text
//!  Connecting ──► Negotiated ──► Activated ◄─┐
//!       │              │            │   └────┘ (re-activation)
//!       ▼              ▼            ▼
//!       └──────► Disconnecting ◄────┘
//!                      │
//!                      ▼
//!                    Closed
//! ```
//!
//! Output suspension is tracked separately from the phase; see
//! [`PeerRecord`](super::PeerRecord).

use std::time::Instant;

use crate::codec::CodecVariant;
use crate::error::RdpError;

/// Lifecycle phase of one peer connection.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PeerPhase {
    /// Accepted, capabilities not yet exchanged.
    #[default]
    Connecting,

    /// Capabilities exchanged, codec variant fixed.
    Negotiated { codec: CodecVariant },

    /// The client accepts graphics and input.
    Activated {
        codec: CodecVariant,
        /// When the peer first became active.
        since: Instant,
    },

    /// Teardown started; nothing else is sent or read.
    Disconnecting,

    /// Terminal.
    Closed,
}

impl std::fmt::Display for PeerPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connecting => write!(f, "Connecting"),
            Self::Negotiated { .. } => write!(f, "Negotiated"),
            Self::Activated { .. } => write!(f, "Activated"),
            Self::Disconnecting => write!(f, "Disconnecting"),
            Self::Closed => write!(f, "Closed"),
        }
    }
}

impl PeerPhase {
    pub fn is_activated(&self) -> bool {
        matches!(self, Self::Activated { .. })
    }

    /// `Disconnecting` or `Closed`.
    pub fn is_terminating(&self) -> bool {
        matches!(self, Self::Disconnecting | Self::Closed)
    }

    pub fn codec(&self) -> Option<CodecVariant> {
        match self {
            Self::Negotiated { codec } | Self::Activated { codec, .. } => Some(*codec),
            _ => None,
        }
    }

    // ── Transitions ──────────────────────────────────────────────

    /// Valid from: `Connecting`.
    pub fn negotiate(&mut self, codec: CodecVariant) -> Result<(), RdpError> {
        match self {
            Self::Connecting => {
                *self = Self::Negotiated { codec };
                Ok(())
            }
            _ => Err(RdpError::InvalidTransition(
                "cannot negotiate: not in Connecting state",
            )),
        }
    }

    /// Transition to `Activated`. Returns `true` on first activation.
    ///
    /// Valid from: `Negotiated`, `Activated`.
    pub fn activate(&mut self) -> Result<bool, RdpError> {
        match self {
            Self::Negotiated { codec } => {
                *self = Self::Activated {
                    codec: *codec,
                    since: Instant::now(),
                };
                Ok(true)
            }
            Self::Activated { .. } => Ok(false),
            _ => Err(RdpError::InvalidTransition(
                "cannot activate: capabilities not negotiated",
            )),
        }
    }

    /// Valid from anything but `Closed`.
    pub fn begin_disconnect(&mut self) -> Result<(), RdpError> {
        match self {
            Self::Closed => Err(RdpError::InvalidTransition(
                "cannot disconnect: already closed",
            )),
            _ => {
                *self = Self::Disconnecting;
                Ok(())
            }
        }
    }

    /// Valid from: `Disconnecting`.
    pub fn finish_close(&mut self) -> Result<(), RdpError> {
        match self {
            Self::Disconnecting => {
                *self = Self::Closed;
                Ok(())
            }
            _ => Err(RdpError::InvalidTransition(
                "cannot close: not in Disconnecting state",
            )),
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
