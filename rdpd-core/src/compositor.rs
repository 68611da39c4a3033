//! The local compositor as seen from the backend.
//!
//! The backend never renders or manages seats itself. It calls into a
//! [`Compositor`] to attach one seat per activated peer, inject the
//! translated input, change the output mode and fill the shadow
//! framebuffer during repaint.

use std::fmt;

use crate::error::RdpError;
use crate::flags::SyncFlags;
use crate::input::keyboard::{TranslatedKey, XkbRuleNames};
use crate::types::{Rect, ShadowFramebuffer};

/// Handle to a seat owned by the compositor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SeatId(pub u32);

impl fmt::Display for SeatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "seat-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PressState {
    Released,
    Pressed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    Vertical,
    Horizontal,
}

/// A scroll event on one axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AxisEvent {
    /// Continuous scroll distance in compositor units.
    Smooth { axis: Axis, value: f64 },
    /// Whole wheel notches, sign gives direction.
    Discrete { axis: Axis, steps: i32 },
}

/// Collaborator interface implemented by the compositor.
pub trait Compositor {
    /// Create a seat for an activated peer.
    fn attach_seat(&mut self, name: &str, keymap: &XkbRuleNames) -> Result<SeatId, RdpError>;

    /// Release a seat created by [`attach_seat`](Self::attach_seat).
    fn detach_seat(&mut self, seat: SeatId);

    /// Switch the remote output to `width × height`.
    ///
    /// Returns `false` when the mode is rejected.
    fn set_output_mode(&mut self, width: u32, height: u32) -> bool;

    /// Render `damage` into the shadow framebuffer.
    fn repaint(&mut self, framebuffer: &mut ShadowFramebuffer, damage: &[Rect]);

    /// Called once the frame timer fires after a repaint.
    fn finish_frame(&mut self) {}

    fn notify_key(&mut self, seat: SeatId, key: TranslatedKey, state: PressState);

    fn notify_motion_absolute(&mut self, seat: SeatId, x: u32, y: u32);

    /// `button` is an evdev `BTN_*` code.
    fn notify_button(&mut self, seat: SeatId, button: u32, state: PressState);

    fn notify_axis(&mut self, seat: SeatId, event: AxisEvent);

    /// Groups the pointer events sent since the previous frame.
    fn notify_pointer_frame(&mut self, seat: SeatId);

    fn set_keyboard_locks(&mut self, seat: SeatId, locks: SyncFlags);
}
