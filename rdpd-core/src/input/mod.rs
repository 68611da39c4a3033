//! Per-peer input translation.
//!
//! [`InputTranslator`] turns decoded input PDUs into [`InputAction`]s
//! for the peer's seat. It owns the per-peer state: keyboard map,
//! button vector and wheel accumulators. It never talks to the
//! compositor itself, which keeps it testable without one.

pub mod buttons;
pub mod keyboard;
pub mod scancode;
pub mod wheel;

use crate::compositor::{Axis, AxisEvent, PressState};
use crate::flags::{ExtendedPointerFlags, KeyboardFlags, PointerFlags, SyncFlags};

pub use buttons::{BTN_EXTRA, BTN_LEFT, BTN_MIDDLE, BTN_RIGHT, BTN_SIDE, ButtonTracker};
pub use keyboard::{KeyboardMap, TranslatedKey, XkbRuleNames};
pub use scancode::ScanCodeTable;
pub use wheel::{DEFAULT_AXIS_STEP_DISTANCE, WheelAccumulator};

/// One call to make on the seat.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InputAction {
    Key { key: TranslatedKey, state: PressState },
    Motion { x: u32, y: u32 },
    Button { button: u32, state: PressState },
    Axis(AxisEvent),
    Frame,
    Locks(SyncFlags),
}

#[derive(Debug, Clone)]
pub struct InputTranslator {
    scancodes: ScanCodeTable,
    keyboard: Option<KeyboardMap>,
    buttons: ButtonTracker,
    wheel: WheelAccumulator,
}

impl InputTranslator {
    pub fn new(axis_step_distance: i32) -> Self {
        Self {
            scancodes: ScanCodeTable::pc_at(),
            keyboard: None,
            buttons: ButtonTracker::new(),
            wheel: WheelAccumulator::new(axis_step_distance),
        }
    }

    pub fn set_keyboard(&mut self, map: KeyboardMap) {
        self.keyboard = Some(map);
    }

    pub fn keyboard(&self) -> Option<&KeyboardMap> {
        self.keyboard.as_ref()
    }

    pub fn buttons(&self) -> &ButtonTracker {
        &self.buttons
    }

    pub fn wheel(&self) -> &WheelAccumulator {
        &self.wheel
    }

    /// Scan code PDU. Dropped until a keyboard map is resolved.
    pub fn key(&self, flags: KeyboardFlags, code: u16) -> Option<InputAction> {
        let map = self.keyboard.as_ref()?;
        let Some(key) = map.translate(&self.scancodes, code, flags) else {
            tracing::debug!(target: "rdp", code = format_args!("{code:#x}"), ?flags, "unmapped scan code");
            return None;
        };
        let state = if flags.contains(KeyboardFlags::RELEASE) {
            PressState::Released
        } else {
            PressState::Pressed
        };
        tracing::trace!(target: "rdp::verbose", keycode = key.keycode, ?state, "key");
        Some(InputAction::Key { key, state })
    }

    /// Pointer PDU against the current `width × height` mode.
    pub fn pointer(&mut self, flags: PointerFlags, x: u16, y: u16, mode: (u32, u32)) -> Vec<InputAction> {
        let mut actions = Vec::new();

        if flags.contains(PointerFlags::MOVE) {
            push_motion(&mut actions, x, y, mode);
        }

        let button = if flags.contains(PointerFlags::BUTTON1) {
            Some(BTN_LEFT)
        } else if flags.contains(PointerFlags::BUTTON2) {
            Some(BTN_RIGHT)
        } else if flags.contains(PointerFlags::BUTTON3) {
            Some(BTN_MIDDLE)
        } else {
            None
        };
        if let Some(button) = button {
            self.push_button(&mut actions, button, flags.contains(PointerFlags::DOWN));
        }

        if flags.intersects(PointerFlags::WHEEL | PointerFlags::HWHEEL) {
            let axis = if flags.contains(PointerFlags::WHEEL) {
                Axis::Vertical
            } else {
                Axis::Horizontal
            };
            let events = self.wheel.accumulate_rdp(axis, flags.wheel_rotation());
            actions.extend(events.into_iter().map(InputAction::Axis));
        }

        finish_pointer(actions)
    }

    /// Extended pointer PDU (side buttons).
    pub fn extended_pointer(
        &mut self,
        flags: ExtendedPointerFlags,
        x: u16,
        y: u16,
        mode: (u32, u32),
    ) -> Vec<InputAction> {
        let mut actions = Vec::new();
        let button = if flags.contains(ExtendedPointerFlags::BUTTON1) {
            Some(BTN_SIDE)
        } else if flags.contains(ExtendedPointerFlags::BUTTON2) {
            Some(BTN_EXTRA)
        } else {
            None
        };
        if let Some(button) = button {
            push_motion(&mut actions, x, y, mode);
            self.push_button(&mut actions, button, flags.contains(ExtendedPointerFlags::DOWN));
        }
        finish_pointer(actions)
    }

    pub fn synchronize(&self, flags: SyncFlags) -> InputAction {
        InputAction::Locks(flags)
    }

    fn push_button(&mut self, actions: &mut Vec<InputAction>, button: u32, down: bool) {
        if let Some(state) = self.buttons.transition(button, down) {
            actions.push(InputAction::Button { button, state });
        }
    }
}

fn push_motion(actions: &mut Vec<InputAction>, x: u16, y: u16, (width, height): (u32, u32)) {
    let (x, y) = (u32::from(x), u32::from(y));
    if x < width && y < height {
        actions.push(InputAction::Motion { x, y });
    }
}

fn finish_pointer(mut actions: Vec<InputAction>) -> Vec<InputAction> {
    if !actions.is_empty() {
        actions.push(InputAction::Frame);
    }
    actions
}

// ── Tests ────────────────────────────────────────────────────────
