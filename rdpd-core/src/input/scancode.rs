//! Generic PC/AT (set 1) scan code → evdev keycode table.
//!
//! Index key is the scan code with the extended bit folded in as
//! `0x100 | code`, the same layout the keyboard PDU uses.

use std::collections::HashMap;

/// Extended-key marker folded into table keys.
pub const SCANCODE_EXTENDED: u16 = 0x0100;

/// Extended scan codes that have evdev equivalents.
const EXTENDED_KEYS: &[(u16, u32)] = &[
    (0x10, 165), // KEY_PREVIOUSSONG
    (0x19, 163), // KEY_NEXTSONG
    (0x1C, 96),  // KEY_KPENTER
    (0x1D, 97),  // KEY_RIGHTCTRL
    (0x20, 113), // KEY_MUTE
    (0x22, 164), // KEY_PLAYPAUSE
    (0x24, 166), // KEY_STOPCD
    (0x2E, 114), // KEY_VOLUMEDOWN
    (0x30, 115), // KEY_VOLUMEUP
    (0x35, 98),  // KEY_KPSLASH
    (0x37, 99),  // KEY_SYSRQ
    (0x38, 100), // KEY_RIGHTALT
    (0x46, 119), // KEY_PAUSE (ctrl+break)
    (0x47, 102), // KEY_HOME
    (0x48, 103), // KEY_UP
    (0x49, 104), // KEY_PAGEUP
    (0x4B, 105), // KEY_LEFT
    (0x4D, 106), // KEY_RIGHT
    (0x4F, 107), // KEY_END
    (0x50, 108), // KEY_DOWN
    (0x51, 109), // KEY_PAGEDOWN
    (0x52, 110), // KEY_INSERT
    (0x53, 111), // KEY_DELETE
    (0x5B, 125), // KEY_LEFTMETA
    (0x5C, 126), // KEY_RIGHTMETA
    (0x5D, 127), // KEY_COMPOSE
    (0x5E, 116), // KEY_POWER
    (0x5F, 142), // KEY_SLEEP
];

/// Non-extended codes above the contiguous 0x01..=0x58 block.
const HIGH_KEYS: &[(u16, u32)] = &[
    (0x64, 183), // KEY_F13
    (0x65, 184),
    (0x66, 185),
    (0x67, 186),
    (0x68, 187),
    (0x69, 188),
    (0x6A, 189),
    (0x6B, 190),
    (0x6C, 191),
    (0x6D, 192),
    (0x6E, 193), // KEY_F23
    (0x70, 93),  // KEY_KATAKANAHIRAGANA
    (0x73, 89),  // KEY_RO
    (0x76, 194), // KEY_F24
    (0x79, 92),  // KEY_HENKAN
    (0x7B, 94),  // KEY_MUHENKAN
    (0x7D, 124), // KEY_YEN
];

/// Lookup table from scan codes to evdev keycodes.
#[derive(Debug, Clone, Default)]
pub struct ScanCodeTable {
    entries: HashMap<u16, u32>,
}

impl ScanCodeTable {
    /// Empty table: every lookup misses.
    pub fn empty() -> Self {
        Self::default()
    }

    /// The standard PC/AT 101/102-key table.
    pub fn pc_at() -> Self {
        let mut entries = HashMap::with_capacity(0x58 + EXTENDED_KEYS.len() + HIGH_KEYS.len());
        // Set-1 codes 0x01..=0x58 coincide with evdev KEY_ESC..KEY_F12.
        for code in 0x01..=0x58u16 {
            entries.insert(code, code as u32);
        }
        for &(code, key) in HIGH_KEYS {
            entries.insert(code, key);
        }
        for &(code, key) in EXTENDED_KEYS {
            entries.insert(SCANCODE_EXTENDED | code, key);
        }
        Self { entries }
    }

    /// Insert or replace one mapping.
    pub fn with_entry(mut self, code: u16, extended: bool, keycode: u32) -> Self {
        self.entries.insert(Self::key(code, extended), keycode);
        self
    }

    pub fn lookup(&self, code: u16, extended: bool) -> Option<u32> {
        self.entries.get(&Self::key(code, extended)).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn key(code: u16, extended: bool) -> u16 {
        let code = code & 0x00FF;
        if extended { SCANCODE_EXTENDED | code } else { code }
    }
}
