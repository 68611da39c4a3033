//! Pressed/released state of the five tracked pointer buttons.

use crate::compositor::PressState;

pub const BTN_LEFT: u32 = 0x110;
pub const BTN_RIGHT: u32 = 0x111;
pub const BTN_MIDDLE: u32 = 0x112;
pub const BTN_SIDE: u32 = 0x113;
pub const BTN_EXTRA: u32 = 0x114;

const TRACKED: usize = 5;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ButtonTracker {
    pressed: [bool; TRACKED],
}

impl ButtonTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a button report and return the transition to emit.
    ///
    /// Returns `None` for a repeat of the current state or for a
    /// button outside `BTN_LEFT..=BTN_EXTRA`.
    pub fn transition(&mut self, button: u32, pressed: bool) -> Option<PressState> {
        let slot = self.pressed.get_mut(Self::index(button)?)?;
        if *slot == pressed {
            return None;
        }
        *slot = pressed;
        Some(if pressed {
            PressState::Pressed
        } else {
            PressState::Released
        })
    }

    pub fn is_pressed(&self, button: u32) -> bool {
        Self::index(button)
            .and_then(|i| self.pressed.get(i).copied())
            .unwrap_or(false)
    }

    /// Buttons currently held, as evdev codes.
    pub fn held(&self) -> impl Iterator<Item = u32> + '_ {
        self.pressed
            .iter()
            .enumerate()
            .filter(|(_, down)| **down)
            .map(|(i, _)| BTN_LEFT + i as u32)
    }

    fn index(button: u32) -> Option<usize> {
        button.checked_sub(BTN_LEFT).map(|i| i as usize)
    }
}
