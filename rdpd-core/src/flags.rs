//! Flag words carried by inbound input PDUs.

use bitflags::bitflags;

bitflags! {
    /// Pointer event flags (slow-path / fast-path mouse PDU).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PointerFlags: u16 {
        const WHEEL_NEGATIVE = 0x0100;
        const WHEEL = 0x0200;
        const HWHEEL = 0x0400;
        const MOVE = 0x0800;
        const BUTTON1 = 0x1000;
        const BUTTON2 = 0x2000;
        const BUTTON3 = 0x4000;
        const DOWN = 0x8000;
        /// 9-bit two's complement rotation, sign in `WHEEL_NEGATIVE`.
        const WHEEL_ROTATION_MASK = 0x01FF;
    }
}

bitflags! {
    /// Extended pointer event flags (side buttons).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ExtendedPointerFlags: u16 {
        const BUTTON1 = 0x0001;
        const BUTTON2 = 0x0002;
        const DOWN = 0x8000;
    }
}

bitflags! {
    /// Keyboard scan-code event flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct KeyboardFlags: u16 {
        const EXTENDED = 0x0100;
        const EXTENDED1 = 0x0200;
        const DOWN = 0x4000;
        const RELEASE = 0x8000;
    }
}

bitflags! {
    /// Lock-key state reported by a synchronize PDU.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct SyncFlags: u32 {
        const SCROLL_LOCK = 0x0001;
        const NUM_LOCK = 0x0002;
        const CAPS_LOCK = 0x0004;
        const KANA_LOCK = 0x0008;
    }
}

impl PointerFlags {
    /// Signed wheel rotation in RDP units (120 per notch).
    pub fn wheel_rotation(self) -> i32 {
        let raw = (self.bits() & Self::WHEEL_ROTATION_MASK.bits()) as i32;
        if self.contains(Self::WHEEL_NEGATIVE) {
            raw - 0x200
        } else {
            raw
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wheel_rotation_positive() {
        let flags = PointerFlags::from_bits_retain(0x0200 | 0x0078);
        assert_eq!(flags.wheel_rotation(), 120);
    }

    #[test]
    fn wheel_rotation_negative() {
        // 0x188 is -120 in 9-bit two's complement.
        let flags = PointerFlags::from_bits_retain(0x0200 | 0x0188);
        assert_eq!(flags.wheel_rotation(), -120);
    }
}
