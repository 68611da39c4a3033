//! Keyboard layout resolution and scan code translation.
//!
//! A client announces its keyboard as a `(type, subtype, layout)`
//! triple. [`KeyboardMap::resolve`] turns that into XKB rule names for
//! the seat keymap, plus any scan codes the generic table cannot
//! express.
//!
//! # Korean 103-key keyboards
//!
//! Type 8 / subtype 6 keyboards emit `0xF1` (Hanja) and `0xF2`
//! (Hangul) which have no entry in the PC/AT table. They are resolved
//! through a fixed override before the table is consulted.

use crate::flags::KeyboardFlags;
use crate::input::scancode::ScanCodeTable;
use crate::protocol::KeyboardInfo;

// ── Constants ────────────────────────────────────────────────────

pub const KBD_TYPE_JAPANESE: u32 = 7;
pub const KBD_TYPE_KOREAN: u32 = 8;
/// PC/AT 103 Enhanced Korean keyboard.
pub const KBD_SUBTYPE_KOREAN_103: u32 = 6;

/// Scan codes of the Korean hardware keys (Linux atkbd driver).
pub const ATKBD_RET_HANJA: u16 = 0xF1;
pub const ATKBD_RET_HANGEUL: u16 = 0xF2;

const KEY_HANGEUL: u32 = 122;
const KEY_HANJA: u32 = 123;
const XKB_KEY_HANGUL: u32 = 0xFF31;
const XKB_KEY_HANGUL_HANJA: u32 = 0xFF34;

const LANGID_MASK: u32 = 0xFFFF;
const LANGID_JAPANESE: u32 = 0x0411;
const LANGID_KOREAN: u32 = 0x0412;

// ── Layout table ─────────────────────────────────────────────────

struct LayoutEntry {
    code: u32,
    layout: &'static str,
    variant: Option<&'static str>,
}

const fn entry(code: u32, layout: &'static str, variant: Option<&'static str>) -> LayoutEntry {
    LayoutEntry {
        code,
        layout,
        variant,
    }
}

const LAYOUTS: &[LayoutEntry] = &[
    entry(0x0000_0401, "ara", None),
    entry(0x0000_0402, "bg", None),
    entry(0x0000_0405, "cz", None),
    entry(0x0001_0405, "cz", Some("qwerty")),
    entry(0x0000_0406, "dk", None),
    entry(0x0000_0407, "de", None),
    entry(0x0001_0407, "de", Some("qwerty")),
    entry(0x0000_0408, "gr", None),
    entry(0x0000_0409, "us", None),
    entry(0x0001_0409, "us", Some("dvorak")),
    entry(0x0002_0409, "us", Some("intl")),
    entry(0x0000_040A, "es", None),
    entry(0x0001_040A, "es", Some("nodeadkeys")),
    entry(0x0000_040B, "fi", None),
    entry(0x0000_040C, "fr", None),
    entry(0x0000_040D, "il", None),
    entry(0x0000_040E, "hu", None),
    entry(0x0000_040F, "is", None),
    entry(0x0000_0410, "it", None),
    entry(0x0000_0411, "jp", None),
    entry(0x0000_0412, "kr", None),
    entry(0x0000_0413, "nl", None),
    entry(0x0000_0414, "no", None),
    entry(0x0000_0415, "pl", None),
    entry(0x0000_0416, "br", None),
    entry(0x0000_0418, "ro", None),
    entry(0x0000_0419, "ru", None),
    entry(0x0001_0419, "ru", Some("typewriter")),
    entry(0x0000_041A, "hr", None),
    entry(0x0000_041B, "sk", None),
    entry(0x0000_041D, "se", None),
    entry(0x0000_041E, "th", None),
    entry(0x0000_041F, "tr", None),
    entry(0x0001_041F, "tr", Some("f")),
    entry(0x0000_0422, "ua", None),
    entry(0x0000_0423, "by", None),
    entry(0x0000_0424, "si", None),
    entry(0x0000_0425, "ee", None),
    entry(0x0000_0426, "lv", None),
    entry(0x0000_0427, "lt", Some("ibm")),
    entry(0x0000_0429, "ir", Some("pro")),
    entry(0x0000_042A, "vn", None),
    entry(0x0000_042B, "am", None),
    entry(0x0000_042F, "mk", None),
    entry(0x0000_0437, "ge", None),
    entry(0x0000_043F, "kz", None),
    entry(0x0000_0450, "mn", None),
    entry(0x0000_0452, "gb", Some("intl")),
    entry(0x0000_0807, "ch", Some("de_nodeadkeys")),
    entry(0x0000_0809, "gb", None),
    entry(0x0000_080A, "latam", None),
    entry(0x0000_080C, "be", None),
    entry(0x0000_0816, "pt", None),
    entry(0x0000_081A, "rs", Some("latin")),
    entry(0x0000_0C0C, "ca", Some("fr-legacy")),
    entry(0x0000_0C1A, "rs", None),
    entry(0x0000_1009, "ca", None),
    entry(0x0000_100C, "ch", Some("fr")),
    entry(0x0001_0416, "br", Some("nativo")),
    entry(0x0001_1009, "ca", Some("multix")),
];

// ── XkbRuleNames ─────────────────────────────────────────────────

/// RMLVO names handed to the seat keymap compiler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XkbRuleNames {
    pub rules: &'static str,
    pub model: &'static str,
    /// `None` keeps the compositor's default layout.
    pub layout: Option<&'static str>,
    pub variant: Option<&'static str>,
    pub options: Option<&'static str>,
}

impl Default for XkbRuleNames {
    fn default() -> Self {
        Self {
            rules: "evdev",
            model: "pc105",
            layout: None,
            variant: None,
            options: None,
        }
    }
}

// ── TranslatedKey ────────────────────────────────────────────────

/// A scan code resolved to the local input model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TranslatedKey {
    /// Linux evdev keycode.
    pub keycode: u32,
    /// Fixed keysym, only set when the keymap cannot derive it.
    pub keysym: Option<u32>,
}

// ── KeyboardMap ──────────────────────────────────────────────────

/// Per-peer keyboard resolution result.
#[derive(Debug, Clone)]
pub struct KeyboardMap {
    info: KeyboardInfo,
    rule_names: XkbRuleNames,
    overrides: Vec<(u16, TranslatedKey)>,
}

impl KeyboardMap {
    /// Resolve a client keyboard triple.
    pub fn resolve(info: KeyboardInfo) -> Self {
        let mut names = XkbRuleNames::default();
        if let Some(found) = LAYOUTS.iter().find(|e| e.code == info.layout) {
            names.layout = Some(found.layout);
            names.variant = found.variant;
        }

        let langid = info.layout & LANGID_MASK;
        if info.kind == KBD_TYPE_KOREAN && langid == LANGID_KOREAN {
            names.layout = Some("kr");
            match info.subtype {
                // Type A: right alt is Hangul, right ctrl is Hanja.
                0 | 3 => names.variant = Some("kr104"),
                KBD_SUBTYPE_KOREAN_103 => names.variant = Some("kr106"),
                _ => {}
            }
        } else if info.kind != KBD_TYPE_JAPANESE && langid == LANGID_JAPANESE {
            // xkb's "jp" expects the 106/109-key hardware.
            names.layout = Some("us");
            names.variant = None;
        }

        let mut overrides = Vec::new();
        if info.kind == KBD_TYPE_KOREAN && info.subtype == KBD_SUBTYPE_KOREAN_103 {
            overrides.push((
                ATKBD_RET_HANJA,
                TranslatedKey {
                    keycode: KEY_HANJA,
                    keysym: Some(XKB_KEY_HANGUL_HANJA),
                },
            ));
            overrides.push((
                ATKBD_RET_HANGEUL,
                TranslatedKey {
                    keycode: KEY_HANGEUL,
                    keysym: Some(XKB_KEY_HANGUL),
                },
            ));
        }

        tracing::debug!(
            target: "rdp",
            kind = info.kind,
            subtype = info.subtype,
            layout = format_args!("{:#x}", info.layout),
            "keyboard resolved to model={} layout={:?} variant={:?}",
            names.model,
            names.layout,
            names.variant,
        );

        Self {
            info,
            rule_names: names,
            overrides,
        }
    }

    pub fn info(&self) -> KeyboardInfo {
        self.info
    }

    pub fn rule_names(&self) -> &XkbRuleNames {
        &self.rule_names
    }

    /// Translate one keyboard PDU scan code.
    ///
    /// Hardware overrides win over `table`; the extended bit is
    /// ignored for them since clients disagree on whether to send it.
    pub fn translate(
        &self,
        table: &ScanCodeTable,
        code: u16,
        flags: KeyboardFlags,
    ) -> Option<TranslatedKey> {
        let base = code & 0x00FF;
        if let Some((_, key)) = self.overrides.iter().find(|(sc, _)| *sc == base) {
            return Some(*key);
        }
        table
            .lookup(base, flags.contains(KeyboardFlags::EXTENDED))
            .map(|keycode| TranslatedKey {
                keycode,
                keysym: None,
            })
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn info(kind: u32, subtype: u32, layout: u32) -> KeyboardInfo {
        KeyboardInfo {
            kind,
            subtype,
            layout,
        }
    }

    #[test]
    fn us_layout() {
        let map = KeyboardMap::resolve(info(4, 0, 0x409));
        assert_eq!(map.rule_names().layout, Some("us"));
        assert_eq!(map.rule_names().variant, None);
        assert_eq!(map.rule_names().model, "pc105");
    }

    #[test]
    fn layout_with_variant() {
        let map = KeyboardMap::resolve(info(4, 0, 0x0001_0409));
        assert_eq!(map.rule_names().layout, Some("us"));
        assert_eq!(map.rule_names().variant, Some("dvorak"));
    }

    #[test]
    fn unknown_layout_keeps_default() {
        let map = KeyboardMap::resolve(info(4, 0, 0xDEAD));
        assert_eq!(map.rule_names().layout, None);
    }

    #[test]
    fn korean_variants_by_subtype() {
        let a = KeyboardMap::resolve(info(KBD_TYPE_KOREAN, 3, 0x412));
        assert_eq!(a.rule_names().variant, Some("kr104"));
        let hw = KeyboardMap::resolve(info(KBD_TYPE_KOREAN, 6, 0x412));
        assert_eq!(hw.rule_names().variant, Some("kr106"));
    }

    #[test]
    fn japanese_layout_on_non_japanese_keyboard_falls_back_to_us() {
        let map = KeyboardMap::resolve(info(4, 0, 0x411));
        assert_eq!(map.rule_names().layout, Some("us"));
        let native = KeyboardMap::resolve(info(KBD_TYPE_JAPANESE, 2, 0x411));
        assert_eq!(native.rule_names().layout, Some("jp"));
    }

    #[test]
    fn korean_hw_keys_ignore_table() {
        // Any layout, and a table that maps both codes to garbage.
        let table = ScanCodeTable::empty()
            .with_entry(0xF1, false, 1)
            .with_entry(0xF2, true, 2);
        let map = KeyboardMap::resolve(info(KBD_TYPE_KOREAN, KBD_SUBTYPE_KOREAN_103, 0x409));

        let hanja = map.translate(&table, 0xF1, KeyboardFlags::empty()).unwrap();
        assert_eq!(hanja.keysym, Some(XKB_KEY_HANGUL_HANJA));
        assert_eq!(hanja.keycode, KEY_HANJA);

        let hangul = map.translate(&table, 0xF2, KeyboardFlags::EXTENDED).unwrap();
        assert_eq!(hangul.keysym, Some(XKB_KEY_HANGUL));
        assert_eq!(hangul.keycode, KEY_HANGEUL);
    }

    #[test]
    fn non_korean_keyboard_has_no_override() {
        let map = KeyboardMap::resolve(info(4, 0, 0x412));
        assert!(map.translate(&ScanCodeTable::pc_at(), 0xF2, KeyboardFlags::empty()).is_none());
    }

    #[test]
    fn generic_translation() {
        let map = KeyboardMap::resolve(info(4, 0, 0x409));
        let key = map
            .translate(&ScanCodeTable::pc_at(), 0x1E, KeyboardFlags::DOWN)
            .unwrap();
        assert_eq!(key.keycode, 30);
        assert_eq!(key.keysym, None);
    }
}
