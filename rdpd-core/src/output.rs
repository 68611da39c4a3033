//! The single remotely exposed output.
//!
//! [`Output`] owns the shadow framebuffer, the frame timer and every
//! peer record. A repaint cycle is strictly sequenced:
//!
//! 1. the compositor renders the pending damage into the framebuffer;
//! 2. each output-enabled peer encodes and sends from it, one after
//!    the other, with its own codec buffers;
//! 3. the frame timer is armed, and further damage waits for it.
//!
//! A peer whose push fails is moved to `Disconnecting` and reported to
//! the caller; the remaining peers are still served.

use std::time::Instant;

use crate::codec::FrameKind;
use crate::compositor::Compositor;
use crate::error::RdpError;
use crate::peer::{PeerId, PeerRecord};
use crate::protocol::PeerConnection;
use crate::timer::FrameTimer;
use crate::types::{PixelFormat, Rect, ShadowFramebuffer};

pub struct Output<C> {
    framebuffer: ShadowFramebuffer,
    timer: FrameTimer,
    pending_damage: Vec<Rect>,
    peers: Vec<PeerRecord<C>>,
    frames: u64,
}

impl<C: PeerConnection> Output<C> {
    pub fn new(width: u32, height: u32, refresh_rate: u32) -> Self {
        Self {
            framebuffer: ShadowFramebuffer::new(width, height, PixelFormat::Bgra32),
            timer: FrameTimer::new(refresh_rate),
            pending_damage: Vec::new(),
            peers: Vec::new(),
            frames: 0,
        }
    }

    pub fn mode(&self) -> (u32, u32) {
        (self.framebuffer.width(), self.framebuffer.height())
    }

    pub fn framebuffer(&self) -> &ShadowFramebuffer {
        &self.framebuffer
    }

    pub fn timer(&self) -> &FrameTimer {
        &self.timer
    }

    pub fn pending_damage(&self) -> &[Rect] {
        &self.pending_damage
    }

    /// Completed repaint cycles.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    // ── Peer collection ──────────────────────────────────────────

    pub fn attach_peer(&mut self, peer: PeerRecord<C>) {
        self.peers.push(peer);
    }

    pub fn detach_peer(&mut self, id: PeerId) -> Option<PeerRecord<C>> {
        let index = self.peers.iter().position(|p| p.id() == id)?;
        Some(self.peers.remove(index))
    }

    pub fn peer(&self, id: PeerId) -> Option<&PeerRecord<C>> {
        self.peers.iter().find(|p| p.id() == id)
    }

    pub fn peer_mut(&mut self, id: PeerId) -> Option<&mut PeerRecord<C>> {
        self.peers.iter_mut().find(|p| p.id() == id)
    }

    pub fn peers(&self) -> &[PeerRecord<C>] {
        &self.peers
    }

    pub fn peer_ids(&self) -> Vec<PeerId> {
        self.peers.iter().map(PeerRecord::id).collect()
    }

    // ── Activation ───────────────────────────────────────────────

    /// Activate a peer, apply its requested mode and send the primer
    /// full frame.
    ///
    /// Other peers that cannot follow a mode change are moved to
    /// `Disconnecting` even when this returns an error; see
    /// [`terminating`](Self::terminating).
    pub fn activate_peer(&mut self, id: PeerId, compositor: &mut dyn Compositor) -> Result<(), RdpError> {
        let peer = self.peer_mut(id).ok_or(RdpError::UnknownPeer(id))?;
        let requested = peer.take_requested_mode();
        peer.activate(compositor)?;

        if let Some((width, height)) = requested {
            if compositor.set_output_mode(width, height) {
                self.apply_mode(id, width, height, compositor);
            } else {
                let (cur_w, cur_h) = self.mode();
                tracing::debug!(
                    target: "rdp",
                    peer = %id,
                    "mode {width}x{height} rejected, keeping {cur_w}x{cur_h}"
                );
            }
        }

        let (width, height) = self.mode();
        let peer = self
            .peers
            .iter_mut()
            .find(|p| p.id() == id)
            .ok_or(RdpError::UnknownPeer(id))?;
        if peer.desktop_size() != Some((width, height)) {
            peer.resize_desktop(width, height)?;
        }
        peer.push_frame(&self.framebuffer, &[], FrameKind::Full)?;
        Ok(())
    }

    /// Suspend or resume a peer's updates. Resuming sends a full frame.
    pub fn set_peer_output(&mut self, id: PeerId, allow: bool) -> Result<(), RdpError> {
        let peer = self
            .peers
            .iter_mut()
            .find(|p| p.id() == id)
            .ok_or(RdpError::UnknownPeer(id))?;
        peer.set_output_enabled(allow);
        if allow && peer.output_enabled() {
            peer.push_frame(&self.framebuffer, &[], FrameKind::Full)?;
        }
        Ok(())
    }

    /// Reallocate for a new mode, repaint fully and resize every other
    /// negotiated peer. Peers that fail to follow start disconnecting.
    fn apply_mode(&mut self, initiator: PeerId, width: u32, height: u32, compositor: &mut dyn Compositor) {
        tracing::info!(width, height, "output mode changed");
        self.framebuffer.resize(width, height);
        self.pending_damage.clear();
        let bounds = self.framebuffer.bounds();
        compositor.repaint(&mut self.framebuffer, &[bounds]);

        for peer in self.peers.iter_mut().filter(|p| p.id() != initiator) {
            peer.request_full_frame();
            if peer.desktop_size().is_none() || peer.phase().is_terminating() {
                continue;
            }
            if let Err(e) = peer.resize_desktop(width, height) {
                tracing::warn!(peer = %peer.id(), "desktop resize failed: {e}");
                peer.begin_disconnect();
            }
        }
    }

    /// Peers in `Disconnecting` still held by the output.
    pub fn terminating(&self) -> Vec<PeerId> {
        self.peers
            .iter()
            .filter(|p| p.phase().is_terminating())
            .map(PeerRecord::id)
            .collect()
    }

    // ── Damage & repaint ─────────────────────────────────────────

    /// Queue damage for the next repaint.
    pub fn damage(&mut self, rects: &[Rect]) {
        self.pending_damage
            .extend(rects.iter().filter(|r| !r.is_empty()).copied());
    }

    /// Repaint if damage is pending and the frame timer is idle.
    ///
    /// Returns the peers whose push failed.
    pub fn repaint(&mut self, compositor: &mut dyn Compositor, now: Instant) -> Vec<PeerId> {
        if self.timer.is_armed() || self.pending_damage.is_empty() {
            return Vec::new();
        }
        let damage = std::mem::take(&mut self.pending_damage);
        compositor.repaint(&mut self.framebuffer, &damage);
        let failed = self.distribute(&damage);
        self.frames += 1;
        self.timer.arm(now);
        failed
    }

    /// Frame timer tick. Finishes the frame and starts the next repaint
    /// when damage has accumulated meanwhile.
    pub fn on_timer(&mut self, compositor: &mut dyn Compositor, now: Instant) -> Vec<PeerId> {
        if !self.timer.fire(now) {
            return Vec::new();
        }
        compositor.finish_frame();
        self.repaint(compositor, now)
    }

    /// Push `damage` to every output-enabled peer.
    pub fn distribute(&mut self, damage: &[Rect]) -> Vec<PeerId> {
        let mut failed = Vec::new();
        for peer in self.peers.iter_mut().filter(|p| p.output_enabled()) {
            if let Err(e) = peer.push_frame(&self.framebuffer, damage, FrameKind::Incremental) {
                tracing::warn!(peer = %peer.id(), "frame push failed: {e}");
                peer.begin_disconnect();
                failed.push(peer.id());
            }
        }
        failed
    }
}

impl<C> std::fmt::Debug for Output<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Output")
            .field("width", &self.framebuffer.width())
            .field("height", &self.framebuffer.height())
            .field("peers", &self.peers.len())
            .field("pending_damage", &self.pending_damage.len())
            .finish()
    }
}
