//! Boundary to the remote-desktop protocol implementation.
//!
//! The backend drives connections through three traits and never sees
//! the wire format:
//!
//! | Trait                | Role                                          |
//! |----------------------|-----------------------------------------------|
//! | [`Protocol`]         | Opens a listener or adopts a connected socket |
//! | [`ProtocolListener`] | Non-blocking accept on the listen descriptor  |
//! | [`PeerConnection`]   | One client: pending events, updates, close    |
//!
//! Each connection is owned by exactly one peer record, and the
//! dispatcher maps descriptors back to records through its watch table.

use std::net::SocketAddr;
use std::os::fd::{OwnedFd, RawFd};

use serde::{Deserialize, Serialize};

use crate::codec::{CodecVariant, EncodedUpdate};
use crate::error::RdpError;
use crate::flags::{ExtendedPointerFlags, KeyboardFlags, PointerFlags, SyncFlags};

/// Default cap on a single update PDU.
pub const DEFAULT_MAX_REQUEST_SIZE: u32 = 16 * 1024 * 1024;

// ── Client capabilities ──────────────────────────────────────────

/// Keyboard description announced in the client core data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct KeyboardInfo {
    /// Keyboard type (4 = IBM enhanced, 7 = Japanese, 8 = Korean).
    pub kind: u32,
    pub subtype: u32,
    /// Keyboard layout identifier, low word is the language id.
    pub layout: u32,
}

/// What a client announced during connection setup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientCapabilities {
    pub client_name: String,
    pub desktop_width: u32,
    pub desktop_height: u32,
    pub color_depth: u32,
    pub surface_commands: bool,
    pub desktop_resize: bool,
    pub tile_codec: bool,
    pub bitmap_codec: bool,
    pub max_request_size: u32,
    pub keyboard: KeyboardInfo,
}

impl Default for ClientCapabilities {
    fn default() -> Self {
        Self {
            client_name: String::from("client"),
            desktop_width: 640,
            desktop_height: 480,
            color_depth: 32,
            surface_commands: true,
            desktop_resize: true,
            tile_codec: true,
            bitmap_codec: true,
            max_request_size: DEFAULT_MAX_REQUEST_SIZE,
            keyboard: KeyboardInfo {
                kind: 4,
                subtype: 0,
                layout: 0x409,
            },
        }
    }
}

/// Server decisions sent back once negotiation succeeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NegotiatedSettings {
    pub width: u32,
    pub height: u32,
    pub codec: CodecVariant,
    pub compression: bool,
}

// ── Events ───────────────────────────────────────────────────────

/// Decoded result of processing a connection's pending data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEvent {
    /// Capability exchange finished.
    Negotiated(ClientCapabilities),
    /// The client is ready to receive graphics.
    Activated,
    /// The client paused (`allow == false`) or resumed display updates.
    SuppressOutput { allow: bool },
    Synchronize { flags: SyncFlags },
    Keyboard { flags: KeyboardFlags, code: u16 },
    UnicodeKeyboard { flags: KeyboardFlags, code: u16 },
    Mouse { flags: PointerFlags, x: u16, y: u16 },
    ExtendedMouse { flags: ExtendedPointerFlags, x: u16, y: u16 },
    /// Orderly close from the client side.
    Disconnected,
}

// ── Traits ───────────────────────────────────────────────────────

/// One client connection.
pub trait PeerConnection {
    /// Descriptor to watch for readability.
    fn fd(&self) -> RawFd;

    /// Human readable peer identity, used for seat naming and logs.
    fn peer_name(&self) -> String;

    /// Process readable data without blocking and flush queued output.
    ///
    /// An `Err` terminates the peer.
    fn check_pending(&mut self) -> Result<Vec<PeerEvent>, RdpError>;

    /// Output is queued that the socket has not taken yet. The peer is
    /// dispatched again once its descriptor is writable.
    fn wants_write(&self) -> bool {
        false
    }

    /// The last [`check_pending`](Self::check_pending) stopped before
    /// draining the socket. The peer is dispatched again without
    /// waiting for readiness.
    fn has_buffered_input(&self) -> bool {
        false
    }

    fn accept_settings(&mut self, settings: &NegotiatedSettings) -> Result<(), RdpError>;

    /// Ask the client to adopt a new desktop size.
    fn resize_desktop(&mut self, width: u32, height: u32) -> Result<(), RdpError>;

    fn send_update(&mut self, update: &EncodedUpdate<'_>) -> Result<(), RdpError>;

    /// Close the connection. Called exactly once, during teardown.
    fn close(&mut self);
}

/// Non-blocking listen socket.
pub trait ProtocolListener {
    type Connection: PeerConnection;

    fn fd(&self) -> RawFd;

    /// Accept one pending connection; `Ok(None)` when none is queued.
    fn accept(&mut self) -> Result<Option<Self::Connection>, RdpError>;
}

/// Connection factory.
pub trait Protocol {
    type Connection: PeerConnection;
    type Listener: ProtocolListener<Connection = Self::Connection>;

    fn listen(&self, addr: SocketAddr) -> Result<Self::Listener, RdpError>;

    /// Wrap an already connected socket handed over at startup.
    fn adopt(&self, fd: OwnedFd) -> Result<Self::Connection, RdpError>;
}
