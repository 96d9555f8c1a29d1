//! User policy snapshot and the synchronized settings store
//!
//! The UI (or daemon) is the single writer; the tap callbacks are the
//! readers. Reads go through hoisted per-concern accessors so a callback
//! takes the read guard exactly once per event and copies out only the
//! fields it needs.

use std::collections::HashSet;
use std::path::Path;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::actions::{Action, ButtonMap, DragDirection, DragMap};
use crate::error::GlissadeResult;
use crate::keys::{KeyCombo, Modifiers};

/// Smooth-scroll intensity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SmoothLevel {
    Off,
    #[default]
    Smooth,
    VerySmooth,
}

/// Named keys a keyboard remap may use as its source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NamedKey {
    Home,
    End,
    Insert,
    ForwardDelete,
    PageUp,
    PageDown,
    PrintScreen,
}

impl NamedKey {
    pub const fn key_code(self) -> u16 {
        match self {
            NamedKey::Home => 0x73,
            NamedKey::End => 0x77,
            NamedKey::Insert => 0x72,
            NamedKey::ForwardDelete => 0x75,
            NamedKey::PageUp => 0x74,
            NamedKey::PageDown => 0x79,
            NamedKey::PrintScreen => 0x69,
        }
    }
}

/// Source side of a keyboard remap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RemapSource {
    Named(NamedKey),
    Custom(KeyCombo),
}

impl RemapSource {
    /// Canonical combo used for matching.
    pub fn combo(self) -> KeyCombo {
        match self {
            RemapSource::Named(key) => KeyCombo::plain(key.key_code()),
            RemapSource::Custom(combo) => combo.canonical(),
        }
    }
}

/// One keyboard remap entry.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KeyRemap {
    pub source: RemapSource,
    pub target: Action,
}

/// The complete user policy snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Master enable for mouse transformation.
    pub mouse_enabled: bool,
    /// Master enable for keyboard remapping.
    pub keyboard_enabled: bool,

    /// Negate wheel deltas for external mice.
    pub reverse_scroll: bool,
    pub smooth: SmoothLevel,

    /// Shift moves vertical wheel deltas onto the horizontal axis.
    pub shift_horizontal: bool,
    /// Option scales deltas down for precision (and bypasses smooth mode).
    pub option_precision: bool,
    pub precision_multiplier: f64,
    /// Control scales deltas up.
    pub control_fast: bool,
    pub fast_multiplier: f64,
    /// Command + wheel drives pinch-to-zoom.
    pub command_zoom: bool,

    /// Middle-drag commit threshold in pixels.
    pub drag_threshold_px: f64,
    /// Drive continuous-capable drag actions as dock swipes.
    pub continuous_gesture: bool,

    /// Treat the mouse/keyboard as external even when the registry
    /// disagrees (for devices that misreport their identity).
    pub assume_external_mouse: bool,
    pub assume_external_keyboard: bool,

    /// Bundle identifiers whose key events are never remapped.
    pub excluded_bundles: HashSet<String>,

    pub buttons: ButtonMap,
    pub drags: DragMap,
    pub remaps: Vec<KeyRemap>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            mouse_enabled: true,
            keyboard_enabled: true,
            reverse_scroll: false,
            smooth: SmoothLevel::Smooth,
            shift_horizontal: true,
            option_precision: true,
            precision_multiplier: 0.25,
            control_fast: true,
            fast_multiplier: 4.0,
            command_zoom: true,
            drag_threshold_px: 20.0,
            continuous_gesture: true,
            assume_external_mouse: false,
            assume_external_keyboard: false,
            excluded_bundles: HashSet::new(),
            buttons: ButtonMap::default(),
            drags: DragMap::default(),
            remaps: Vec::new(),
        }
    }
}

impl Settings {
    pub fn load_json(path: &Path) -> GlissadeResult<Self> {
        let data = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&data)?)
    }

    pub fn save_json(&self, path: &Path) -> GlissadeResult<()> {
        let data = serde_json::to_string_pretty(self)?;
        std::fs::write(path, data)?;
        Ok(())
    }
}

/// Fields the scroll engine needs, copied out under one read guard.
#[derive(Debug, Clone, Copy)]
pub struct ScrollPolicy {
    pub reverse: bool,
    pub smooth: SmoothLevel,
    pub shift_horizontal: bool,
    pub option_precision: bool,
    pub precision_multiplier: f64,
    pub control_fast: bool,
    pub fast_multiplier: f64,
    pub command_zoom: bool,
}

/// Fields the gesture engine needs.
#[derive(Debug, Clone, Copy)]
pub struct DragPolicy {
    pub threshold_px: f64,
    pub continuous: bool,
    pub actions: [Option<Action>; 4],
    /// Click action for button 2 when no drag commits.
    pub click_action: Option<Action>,
}

impl DragPolicy {
    pub fn action(&self, direction: DragDirection) -> Option<Action> {
        self.actions[direction.index()]
    }

    pub fn axis_continuous_capable(&self, horizontal: bool) -> bool {
        let (a, b) = if horizontal {
            (DragDirection::Left, DragDirection::Right)
        } else {
            (DragDirection::Up, DragDirection::Down)
        };
        self.action(a).is_some_and(Action::is_continuous_capable)
            || self.action(b).is_some_and(Action::is_continuous_capable)
    }
}

/// Single-writer, read-mostly settings store shared with the tap callbacks.
pub struct SettingsStore {
    inner: RwLock<Settings>,
}

impl SettingsStore {
    pub fn new(settings: Settings) -> Self {
        Self {
            inner: RwLock::new(settings),
        }
    }

    /// Writer side; UI/daemon only, never the hot path.
    pub fn update(&self, f: impl FnOnce(&mut Settings)) {
        f(&mut self.inner.write());
    }

    pub fn snapshot(&self) -> Settings {
        self.inner.read().clone()
    }

    pub fn mouse_enabled(&self) -> bool {
        self.inner.read().mouse_enabled
    }

    /// (master enable, assume-external override)
    pub fn keyboard_policy(&self) -> (bool, bool) {
        let s = self.inner.read();
        (s.keyboard_enabled, s.assume_external_keyboard)
    }

    pub fn assume_external_mouse(&self) -> bool {
        self.inner.read().assume_external_mouse
    }

    pub fn scroll_policy(&self) -> ScrollPolicy {
        let s = self.inner.read();
        ScrollPolicy {
            reverse: s.reverse_scroll,
            smooth: s.smooth,
            shift_horizontal: s.shift_horizontal,
            option_precision: s.option_precision,
            precision_multiplier: s.precision_multiplier,
            control_fast: s.control_fast,
            fast_multiplier: s.fast_multiplier,
            command_zoom: s.command_zoom,
        }
    }

    pub fn drag_policy(&self) -> DragPolicy {
        let s = self.inner.read();
        let mut actions = [None; 4];
        for direction in DragDirection::ALL {
            actions[direction.index()] = s.drags.get(direction);
        }
        DragPolicy {
            threshold_px: s.drag_threshold_px,
            continuous: s.continuous_gesture,
            actions,
            click_action: s.buttons.get(2),
        }
    }

    pub fn button_action(&self, button: u32) -> Option<Action> {
        self.inner.read().buttons.get(button)
    }

    /// Canonical remap lookup for a key event.
    pub fn remap_lookup(&self, key_code: u16, modifiers: Modifiers) -> Option<Action> {
        let incoming = KeyCombo::new(key_code, modifiers).canonical();
        let s = self.inner.read();
        s.remaps
            .iter()
            .find(|remap| remap.source.combo() == incoming)
            .map(|remap| remap.target)
    }

    pub fn is_excluded(&self, bundle_id: &str) -> bool {
        self.inner.read().excluded_bundles.contains(bundle_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::{EditAction, SystemAction};

    #[test]
    fn defaults_are_sane() {
        let s = Settings::default();
        assert!(s.mouse_enabled);
        assert_eq!(s.smooth, SmoothLevel::Smooth);
        assert!(s.precision_multiplier > 0.0 && s.precision_multiplier <= 1.0);
        assert!(s.fast_multiplier >= 1.0);
    }

    #[test]
    fn json_round_trip() {
        let mut s = Settings::default();
        s.buttons.set(3, Action::Edit(EditAction::Back)).unwrap();
        s.drags
            .set(DragDirection::Up, Action::System(SystemAction::MissionControl));
        s.remaps.push(KeyRemap {
            source: RemapSource::Named(NamedKey::Home),
            target: Action::Edit(EditAction::LineStart),
        });
        s.excluded_bundles.insert("com.example.terminal".into());

        let json = serde_json::to_string(&s).unwrap();
        let back: Settings = serde_json::from_str(&json).unwrap();
        assert_eq!(back.buttons, s.buttons);
        assert_eq!(back.drags, s.drags);
        assert_eq!(back.remaps, s.remaps);
        assert!(back.excluded_bundles.contains("com.example.terminal"));
    }

    #[test]
    fn unknown_json_fields_are_tolerated() {
        let json = r#"{"mouse_enabled": false, "future_field": 42}"#;
        let s: Settings = serde_json::from_str(json).unwrap();
        assert!(!s.mouse_enabled);
        assert!(s.keyboard_enabled);
    }

    #[test]
    fn remap_lookup_uses_canonical_modifiers() {
        let store = SettingsStore::new(Settings::default());
        store.update(|s| {
            s.remaps.push(KeyRemap {
                source: RemapSource::Named(NamedKey::Home),
                target: Action::Edit(EditAction::LineStart),
            });
        });
        // Caps lock set on the incoming event must not defeat the match.
        let action = store.remap_lookup(0x73, Modifiers::CAPS_LOCK);
        assert_eq!(action, Some(Action::Edit(EditAction::LineStart)));
        assert_eq!(store.remap_lookup(0x73, Modifiers::COMMAND), None);
    }

    #[test]
    fn drag_policy_copies_all_slots() {
        let store = SettingsStore::new(Settings::default());
        store.update(|s| {
            s.drags
                .set(DragDirection::Down, Action::System(SystemAction::AppExpose));
            s.buttons.set(2, Action::Edit(EditAction::MiddleClick)).unwrap();
        });
        let policy = store.drag_policy();
        assert_eq!(
            policy.action(DragDirection::Down),
            Some(Action::System(SystemAction::AppExpose))
        );
        assert_eq!(policy.click_action, Some(Action::Edit(EditAction::MiddleClick)));
        assert!(policy.axis_continuous_capable(false));
        assert!(!policy.axis_continuous_capable(true));
    }
}
