//! Peer records: one per connected client.
//!
//! A [`PeerRecord`] exclusively owns its connection handle and codec
//! context. It refers to its seat by [`SeatId`]; the seat itself lives
//! in the compositor. Records are created by the dispatcher, stored in
//! the [`Output`](crate::output::Output) and closed synchronously.
//!
//! Gating:
//! - input is translated only while the phase is `Activated`;
//! - frames are pushed only while output is enabled, which requires
//!   activation and is cleared by a client output suspension.

pub mod phase;

use std::fmt;

use crate::codec::{CodecContext, CodecVariant, CompressionPolicy, FrameKind};
use crate::compositor::{Compositor, SeatId};
use crate::error::RdpError;
use crate::input::{InputAction, InputTranslator, KeyboardMap};
use crate::protocol::{ClientCapabilities, NegotiatedSettings, PeerConnection, PeerEvent};
use crate::types::{Rect, ShadowFramebuffer};

pub use phase::PeerPhase;

/// Minimum colour depth the backend serves.
pub const MIN_COLOR_DEPTH: u32 = 15;

// ── PeerId ───────────────────────────────────────────────────────

/// Backend-unique peer identifier, never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(pub u64);

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer-{}", self.0)
    }
}

// ── NegotiationPolicy ────────────────────────────────────────────

/// Server side of capability negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NegotiationPolicy {
    /// Offer the tile codec to clients that support it.
    pub tile_codec: bool,
    /// Follow the client's requested desktop size.
    pub allow_client_resize: bool,
}

impl Default for NegotiationPolicy {
    fn default() -> Self {
        Self {
            tile_codec: true,
            allow_client_resize: true,
        }
    }
}

// ── PeerRecord ───────────────────────────────────────────────────

pub struct PeerRecord<C> {
    id: PeerId,
    name: String,
    connection: C,
    phase: PeerPhase,
    output_enabled: bool,
    seat: Option<SeatId>,
    capabilities: Option<ClientCapabilities>,
    requested_mode: Option<(u32, u32)>,
    /// Desktop size the client was last told.
    desktop_size: Option<(u32, u32)>,
    input: InputTranslator,
    codec: CodecContext,
}

impl<C: PeerConnection> PeerRecord<C> {
    pub fn new(id: PeerId, connection: C, compression: CompressionPolicy, axis_step_distance: i32) -> Self {
        let name = connection.peer_name();
        Self {
            id,
            name,
            connection,
            phase: PeerPhase::Connecting,
            output_enabled: false,
            seat: None,
            capabilities: None,
            requested_mode: None,
            desktop_size: None,
            input: InputTranslator::new(axis_step_distance),
            codec: CodecContext::new(compression),
        }
    }

    pub fn id(&self) -> PeerId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn phase(&self) -> &PeerPhase {
        &self.phase
    }

    pub fn is_activated(&self) -> bool {
        self.phase.is_activated()
    }

    pub fn output_enabled(&self) -> bool {
        self.output_enabled
    }

    pub fn seat(&self) -> Option<SeatId> {
        self.seat
    }

    pub fn codec(&self) -> &CodecContext {
        &self.codec
    }

    pub fn input(&self) -> &InputTranslator {
        &self.input
    }

    pub fn connection(&self) -> &C {
        &self.connection
    }

    pub fn connection_mut(&mut self) -> &mut C {
        &mut self.connection
    }

    pub fn capabilities(&self) -> Option<&ClientCapabilities> {
        self.capabilities.as_ref()
    }

    /// `None` until negotiation answered the client.
    pub fn desktop_size(&self) -> Option<(u32, u32)> {
        self.desktop_size
    }

    // ── Negotiation & activation ─────────────────────────────────

    /// Validate client capabilities against `policy` and the current
    /// output `mode`, fix the codec variant and answer the client.
    pub fn negotiate(
        &mut self,
        caps: ClientCapabilities,
        policy: &NegotiationPolicy,
        mode: (u32, u32),
    ) -> Result<NegotiatedSettings, RdpError> {
        if caps.color_depth < MIN_COLOR_DEPTH {
            return Err(RdpError::NegotiationFailed(format!(
                "colour depth {} below {MIN_COLOR_DEPTH}",
                caps.color_depth
            )));
        }
        if !caps.surface_commands {
            return Err(RdpError::NegotiationFailed(
                "client lacks surface command support".into(),
            ));
        }

        let codec = if policy.tile_codec && caps.tile_codec {
            CodecVariant::Tile
        } else if caps.bitmap_codec {
            CodecVariant::Bitmap
        } else {
            return Err(RdpError::NegotiationFailed(
                "no common codec (bitmap codec not announced)".into(),
            ));
        };

        let requested = (caps.desktop_width, caps.desktop_height);
        if requested.0 == 0 || requested.1 == 0 {
            return Err(RdpError::NegotiationFailed(format!(
                "invalid desktop size {}x{}",
                requested.0, requested.1
            )));
        }
        let (width, height) = if requested == mode {
            mode
        } else if policy.allow_client_resize {
            self.requested_mode = Some(requested);
            requested
        } else if caps.desktop_resize {
            tracing::debug!(
                target: "rdp",
                peer = %self.id,
                "client asked for {}x{}, imposing {}x{}",
                requested.0, requested.1, mode.0, mode.1
            );
            mode
        } else {
            return Err(RdpError::NegotiationFailed(format!(
                "client wants {}x{} and cannot be resized to {}x{}",
                requested.0, requested.1, mode.0, mode.1
            )));
        };

        self.codec.select_variant(codec, caps.max_request_size)?;
        self.phase.negotiate(codec)?;
        let settings = NegotiatedSettings {
            width,
            height,
            codec,
            compression: self.codec.compression().enabled,
        };
        self.connection.accept_settings(&settings)?;
        self.desktop_size = Some((width, height));
        self.name = caps.client_name.clone();
        self.capabilities = Some(caps);

        tracing::debug!(target: "rdp", peer = %self.id, ?codec, width, height, "negotiated");
        Ok(settings)
    }

    /// Mode change requested at negotiation, consumed on activation.
    pub fn take_requested_mode(&mut self) -> Option<(u32, u32)> {
        self.requested_mode.take()
    }

    /// Tell the client to adopt `width`x`height`.
    pub fn resize_desktop(&mut self, width: u32, height: u32) -> Result<(), RdpError> {
        self.connection.resize_desktop(width, height)?;
        self.desktop_size = Some((width, height));
        Ok(())
    }

    /// Enter `Activated`, attach a seat on first activation and enable
    /// output. The next pushed frame is a full frame.
    pub fn activate(&mut self, compositor: &mut dyn Compositor) -> Result<(), RdpError> {
        let first = self.phase.activate()?;
        if first {
            let info = self.capabilities.as_ref().map(|c| c.keyboard).unwrap_or_default();
            let map = KeyboardMap::resolve(info);
            let seat = compositor.attach_seat(&format!("rdp-{}", self.name), map.rule_names())?;
            self.input.set_keyboard(map);
            self.seat = Some(seat);
            tracing::debug!(target: "rdp", peer = %self.id, %seat, "activated");
        } else {
            tracing::debug!(target: "rdp", peer = %self.id, "re-activated");
        }
        self.output_enabled = true;
        self.codec.request_full_frame();
        Ok(())
    }

    /// Handle a client suspend/resume request.
    ///
    /// Resuming requests a full frame. Ignored before activation.
    pub fn set_output_enabled(&mut self, allow: bool) {
        if !self.is_activated() || self.output_enabled == allow {
            return;
        }
        self.output_enabled = allow;
        if allow {
            self.codec.request_full_frame();
        }
        tracing::debug!(target: "rdp", peer = %self.id, allow, "output suspension changed");
    }

    pub fn request_full_frame(&mut self) {
        self.codec.request_full_frame();
    }

    // ── Input ────────────────────────────────────────────────────

    /// Translate and inject one input event. Dropped unless activated.
    pub fn apply_input(&mut self, event: &PeerEvent, compositor: &mut dyn Compositor, mode: (u32, u32)) {
        let (true, Some(seat)) = (self.is_activated(), self.seat) else {
            tracing::trace!(target: "rdp::verbose", peer = %self.id, ?event, "input before activation dropped");
            return;
        };

        let actions: Vec<InputAction> = match *event {
            PeerEvent::Keyboard { flags, code } => self.input.key(flags, code).into_iter().collect(),
            PeerEvent::UnicodeKeyboard { flags, code } => {
                tracing::debug!(target: "rdp", peer = %self.id, ?flags, code, "unicode keyboard input not injected");
                Vec::new()
            }
            PeerEvent::Mouse { flags, x, y } => self.input.pointer(flags, x, y, mode),
            PeerEvent::ExtendedMouse { flags, x, y } => self.input.extended_pointer(flags, x, y, mode),
            PeerEvent::Synchronize { flags } => vec![self.input.synchronize(flags)],
            _ => Vec::new(),
        };

        for action in actions {
            match action {
                InputAction::Key { key, state } => compositor.notify_key(seat, key, state),
                InputAction::Motion { x, y } => compositor.notify_motion_absolute(seat, x, y),
                InputAction::Button { button, state } => compositor.notify_button(seat, button, state),
                InputAction::Axis(event) => compositor.notify_axis(seat, event),
                InputAction::Frame => compositor.notify_pointer_frame(seat),
                InputAction::Locks(flags) => compositor.set_keyboard_locks(seat, flags),
            }
        }
    }

    // ── Frames ───────────────────────────────────────────────────

    /// Encode and send `damage`. Returns whether a payload went out.
    ///
    /// An incremental encode that fails with a codec error is retried
    /// once as a full frame.
    pub fn push_frame(
        &mut self,
        framebuffer: &ShadowFramebuffer,
        damage: &[Rect],
        kind: FrameKind,
    ) -> Result<bool, RdpError> {
        if !self.output_enabled || !self.is_activated() {
            return Ok(false);
        }
        match self.encode_and_send(framebuffer, damage, kind) {
            Err(RdpError::CodecFailure(reason)) if kind == FrameKind::Incremental => {
                tracing::warn!(peer = %self.id, %reason, "encode failed, falling back to full frame");
                self.encode_and_send(framebuffer, damage, FrameKind::Full)
            }
            other => other,
        }
    }

    fn encode_and_send(
        &mut self,
        framebuffer: &ShadowFramebuffer,
        damage: &[Rect],
        kind: FrameKind,
    ) -> Result<bool, RdpError> {
        match self.codec.encode(framebuffer, damage, kind)? {
            Some(update) => {
                self.connection.send_update(&update)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    // ── Teardown ─────────────────────────────────────────────────

    /// Mark the peer as going away; no further frames or input.
    pub fn begin_disconnect(&mut self) {
        if self.phase.begin_disconnect().is_ok() {
            self.output_enabled = false;
        }
    }

    /// Release everything the record holds outside itself. Terminal.
    pub fn close(&mut self, compositor: &mut dyn Compositor) {
        if self.phase == PeerPhase::Closed {
            return;
        }
        self.begin_disconnect();
        if let Some(seat) = self.seat.take() {
            compositor.detach_seat(seat);
        }
        self.connection.close();
        if let Err(e) = self.phase.finish_close() {
            tracing::warn!(peer = %self.id, "close: {e}");
        }
        tracing::debug!(target: "rdp", peer = %self.id, "closed");
    }
}

impl<C> fmt::Debug for PeerRecord<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerRecord")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("phase", &self.phase)
            .field("output_enabled", &self.output_enabled)
            .field("seat", &self.seat)
            .finish_non_exhaustive()
    }
}
