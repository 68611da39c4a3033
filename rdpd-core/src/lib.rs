//! # rdpd-core
//!
//! Multi-client remote display backend core.
//!
//! This crate contains:
//! - **Backend**: `Backend`, `BackendConfig`: explicit context owning the
//!   listener, the single output and the peer set
//! - **Dispatcher**: `WatchTable`, `Dispatcher`: bounded descriptor watches
//!   and per-connection event processing
//! - **Peers**: `PeerRecord`, `PeerPhase`: activation state machine
//! - **Output**: `Output`, `FrameTimer`: shadow framebuffer and paced
//!   frame distribution
//! - **Codec**: `CodecContext`: per-peer tile or bitmap update encoder
//! - **Input**: `InputTranslator`: keyboard layouts, scan codes, wheel
//!   accumulation and button state
//! - **Protocol seam**: `Protocol`, `PeerConnection`, plus a TCP transport
//! - **Error**: `RdpError`: typed, `thiserror`-based error taxonomy

pub mod backend;
pub mod codec;
pub mod compositor;
pub mod dispatcher;
pub mod error;
pub mod event_loop;
pub mod flags;
pub mod input;
pub mod network;
pub mod output;
pub mod peer;
pub mod protocol;
pub mod timer;
pub mod types;
pub mod wire;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use backend::{Backend, BackendConfig, ListenSource, SecurityConfig};
pub use codec::{CodecContext, CodecVariant, CompressionPolicy, EncodedUpdate, FrameKind, PayloadHeader};
pub use compositor::{Axis, AxisEvent, Compositor, PressState, SeatId};
pub use dispatcher::{Dispatcher, PeerSettings, Reactor, Watch, WatchKind, WatchTable};
pub use error::RdpError;
pub use event_loop::{DamageSender, EventLoop, TokioReactor, damage_channel};
pub use flags::{ExtendedPointerFlags, KeyboardFlags, PointerFlags, SyncFlags};
pub use input::{InputAction, InputTranslator, KeyboardMap, TranslatedKey, XkbRuleNames};
pub use network::{TcpPeer, TcpPeerListener, TcpProtocol};
pub use output::Output;
pub use peer::{NegotiationPolicy, PeerId, PeerPhase, PeerRecord};
pub use protocol::{
    ClientCapabilities, KeyboardInfo, NegotiatedSettings, PeerConnection, PeerEvent, Protocol,
    ProtocolListener,
};
pub use timer::FrameTimer;
pub use types::{PixelFormat, Rect, ShadowFramebuffer};
