//! Key combinations and modifier masks
//!
//! A key combination is a 16-bit virtual key code plus a 64-bit modifier
//! mask. Lookups compare the *canonical* form: the four primary modifiers
//! only, with layout bits (caps lock, numeric pad, help) masked off.

use serde::{Deserialize, Serialize};

/// Modifier mask over the CGEventFlags bit layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Modifiers(pub u64);

impl Modifiers {
    pub const NONE: Self = Self(0);
    pub const CAPS_LOCK: Self = Self(0x0001_0000);
    pub const SHIFT: Self = Self(0x0002_0000);
    pub const CONTROL: Self = Self(0x0004_0000);
    pub const OPTION: Self = Self(0x0008_0000);
    pub const COMMAND: Self = Self(0x0010_0000);
    pub const FUNCTION: Self = Self(0x0080_0000);

    /// The four primary modifiers; the only bits that participate in
    /// mapping lookups.
    pub const PRIMARY: Self =
        Self(Self::SHIFT.0 | Self::CONTROL.0 | Self::OPTION.0 | Self::COMMAND.0);

    pub const fn bits(self) -> u64 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Restrict to the primary subset. Idempotent.
    pub const fn canonical(self) -> Self {
        Self(self.0 & Self::PRIMARY.0)
    }
}

/// A virtual key code plus modifier mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeyCombo {
    pub key_code: u16,
    pub modifiers: Modifiers,
}

impl KeyCombo {
    pub const fn new(key_code: u16, modifiers: Modifiers) -> Self {
        Self { key_code, modifiers }
    }

    pub const fn plain(key_code: u16) -> Self {
        Self::new(key_code, Modifiers::NONE)
    }

    /// Canonical form used for table lookups.
    pub fn canonical(self) -> Self {
        Self::new(self.key_code, self.modifiers.canonical())
    }

    pub fn matches(self, other: KeyCombo) -> bool {
        self.canonical() == other.canonical()
    }

    /// Human-readable form, e.g. `⌃⌥A` or `⇧⌘0x42`. Round-trips through
    /// [`KeyCombo::parse_display`] for any combo restricted to the four
    /// primary modifiers.
    pub fn display(self) -> String {
        let mods = self.modifiers.canonical();
        let mut s = String::new();
        if mods.contains(Modifiers::CONTROL) {
            s.push('\u{2303}'); // ⌃
        }
        if mods.contains(Modifiers::OPTION) {
            s.push('\u{2325}'); // ⌥
        }
        if mods.contains(Modifiers::SHIFT) {
            s.push('\u{21E7}'); // ⇧
        }
        if mods.contains(Modifiers::COMMAND) {
            s.push('\u{2318}'); // ⌘
        }
        match key_code_name(self.key_code) {
            Some(name) => s.push_str(name),
            None => s.push_str(&format!("0x{:02X}", self.key_code)),
        }
        s
    }

    /// Inverse of [`KeyCombo::display`].
    pub fn parse_display(s: &str) -> Option<Self> {
        let mut mods = Modifiers::NONE;
        let mut rest = s;
        loop {
            let mut chars = rest.chars();
            let next = chars.next()?;
            let flag = match next {
                '\u{2303}' => Modifiers::CONTROL,
                '\u{2325}' => Modifiers::OPTION,
                '\u{21E7}' => Modifiers::SHIFT,
                '\u{2318}' => Modifiers::COMMAND,
                _ => break,
            };
            mods = mods.union(flag);
            rest = chars.as_str();
        }
        let key_code = if let Some(hex) = rest.strip_prefix("0x") {
            u16::from_str_radix(hex, 16).ok()?
        } else {
            key_code_from_name(rest)?
        };
        Some(Self::new(key_code, mods))
    }
}

/// Name for a virtual key code, for display and recorder UIs.
pub fn key_code_name(key_code: u16) -> Option<&'static str> {
    KEY_NAMES
        .iter()
        .find(|(code, _)| *code == key_code)
        .map(|(_, name)| *name)
}

/// Reverse of [`key_code_name`].
pub fn key_code_from_name(name: &str) -> Option<u16> {
    KEY_NAMES
        .iter()
        .find(|(_, n)| *n == name)
        .map(|(code, _)| *code)
}

// ANSI layout names plus the navigation block. Codes without an entry
// display as hex, which still round-trips.
const KEY_NAMES: &[(u16, &str)] = &[
    (0x00, "A"),
    (0x01, "S"),
    (0x02, "D"),
    (0x03, "F"),
    (0x04, "H"),
    (0x05, "G"),
    (0x06, "Z"),
    (0x07, "X"),
    (0x08, "C"),
    (0x09, "V"),
    (0x0B, "B"),
    (0x0C, "Q"),
    (0x0D, "W"),
    (0x0E, "E"),
    (0x0F, "R"),
    (0x10, "Y"),
    (0x11, "T"),
    (0x12, "1"),
    (0x13, "2"),
    (0x14, "3"),
    (0x15, "4"),
    (0x16, "6"),
    (0x17, "5"),
    (0x18, "="),
    (0x19, "9"),
    (0x1A, "7"),
    (0x1B, "-"),
    (0x1C, "8"),
    (0x1D, "0"),
    (0x1E, "]"),
    (0x1F, "O"),
    (0x20, "U"),
    (0x21, "["),
    (0x22, "I"),
    (0x23, "P"),
    (0x24, "Return"),
    (0x25, "L"),
    (0x26, "J"),
    (0x27, "'"),
    (0x28, "K"),
    (0x29, ";"),
    (0x2A, "\\"),
    (0x2B, ","),
    (0x2C, "/"),
    (0x2D, "N"),
    (0x2E, "M"),
    (0x2F, "."),
    (0x30, "Tab"),
    (0x31, "Space"),
    (0x32, "`"),
    (0x33, "Delete"),
    (0x35, "Escape"),
    (0x60, "F5"),
    (0x61, "F6"),
    (0x62, "F7"),
    (0x63, "F3"),
    (0x64, "F8"),
    (0x65, "F9"),
    (0x67, "F11"),
    (0x69, "F13"),
    (0x6D, "F10"),
    (0x6F, "F12"),
    (0x72, "Insert"),
    (0x73, "Home"),
    (0x74, "PageUp"),
    (0x75, "ForwardDelete"),
    (0x76, "F4"),
    (0x77, "End"),
    (0x78, "F2"),
    (0x79, "PageDown"),
    (0x7A, "F1"),
    (0x7B, "LeftArrow"),
    (0x7C, "RightArrow"),
    (0x7D, "DownArrow"),
    (0x7E, "UpArrow"),
];
