//! Button and key dispatcher
//!
//! Maps auxiliary button presses and remapped keystrokes to their
//! configured actions. Named editing actions resolve to fixed key
//! equivalents; system actions go through dedicated key codes or the
//! symbolic hot key API; Show Desktop is F11 with the function-key flag.

use std::sync::Arc;

use glissade_common::{Action, EditAction, KeyCombo, Modifiers, SystemAction};
use tracing::{debug, trace};

use crate::gesture::Decision;
use crate::sys::symbolic_hotkeys;
use crate::synth::EventPoster;

/// Dedicated virtual key codes for system gestures that have them.
const KEYCODE_MISSION_CONTROL: u16 = 160;
const KEYCODE_LAUNCHPAD: u16 = 131;
const KEYCODE_F11: u16 = 0x67;

/// Fixed key equivalent for a named editing action. `MiddleClick` has no
/// combo and is handled by the caller.
pub fn edit_action_combo(action: EditAction) -> Option<KeyCombo> {
    let combo = match action {
        EditAction::Back => KeyCombo::new(0x21, Modifiers::COMMAND), // ⌘[
        EditAction::Forward => KeyCombo::new(0x1E, Modifiers::COMMAND), // ⌘]
        EditAction::Copy => KeyCombo::new(0x08, Modifiers::COMMAND),
        EditAction::Cut => KeyCombo::new(0x07, Modifiers::COMMAND),
        EditAction::Paste => KeyCombo::new(0x09, Modifiers::COMMAND),
        EditAction::Undo => KeyCombo::new(0x06, Modifiers::COMMAND),
        EditAction::Redo => KeyCombo::new(0x06, Modifiers::COMMAND.union(Modifiers::SHIFT)),
        EditAction::SelectAll => KeyCombo::new(0x00, Modifiers::COMMAND),
        EditAction::Fullscreen => {
            KeyCombo::new(0x03, Modifiers::CONTROL.union(Modifiers::COMMAND))
        }
        EditAction::LineStart => KeyCombo::new(0x00, Modifiers::CONTROL), // ⌃A
        EditAction::LineEnd => KeyCombo::new(0x0E, Modifiers::CONTROL),   // ⌃E
        EditAction::DocStart => KeyCombo::new(0x7E, Modifiers::COMMAND),  // ⌘↑
        EditAction::DocEnd => KeyCombo::new(0x7D, Modifiers::COMMAND),    // ⌘↓
        EditAction::MiddleClick => return None,
    };
    Some(combo)
}

/// Execute one action through the poster.
pub fn execute_action(action: Action, poster: &dyn EventPoster) {
    match action {
        Action::Inert => {}
        Action::Custom(combo) => poster.post_key_combo(combo),
        Action::Edit(edit) => match edit_action_combo(edit) {
            Some(combo) => poster.post_key_combo(combo),
            None => poster.post_middle_click(),
        },
        Action::System(system) => match system {
            SystemAction::MissionControl => {
                poster.post_key_combo(KeyCombo::plain(KEYCODE_MISSION_CONTROL))
            }
            SystemAction::Launchpad => poster.post_key_combo(KeyCombo::plain(KEYCODE_LAUNCHPAD)),
            SystemAction::ShowDesktop => {
                poster.post_key_combo(KeyCombo::new(KEYCODE_F11, Modifiers::FUNCTION))
            }
            SystemAction::AppExpose => poster.post_symbolic_hotkey(symbolic_hotkeys::APP_EXPOSE),
            SystemAction::SpaceLeft => poster.post_symbolic_hotkey(symbolic_hotkeys::SPACE_LEFT),
            SystemAction::SpaceRight => poster.post_symbolic_hotkey(symbolic_hotkeys::SPACE_RIGHT),
        },
    }
}

pub struct Dispatcher {
    poster: Arc<dyn EventPoster>,
}

impl Dispatcher {
    pub fn new(poster: Arc<dyn EventPoster>) -> Self {
        Self { poster }
    }

    /// Auxiliary buttons other than the middle button (which the gesture
    /// engine owns). Swallows both edges of a mapped button; click-style
    /// actions fire on up, everything else on down.
    pub fn on_button(&self, button: u32, down: bool, action: Option<Action>) -> Decision {
        let Some(action) = action else {
            trace!(button, "unmapped button passed through");
            return Decision::Pass;
        };
        if action == Action::Inert {
            return Decision::Pass;
        }

        let click_style = action == Action::Edit(EditAction::MiddleClick);
        if down != click_style {
            debug!(button, ?action, "button action");
            execute_action(action, self.poster.as_ref());
        }
        Decision::Suppress
    }

    /// A key event that resolved to a remap target. Fires the target on
    /// key-down; the matching key-up is swallowed silently.
    pub fn on_key(&self, down: bool, target: Action) -> Decision {
        if target == Action::Inert {
            return Decision::Pass;
        }
        if down {
            debug!(?target, "key remap");
            execute_action(target, self.poster.as_ref());
        }
        Decision::Suppress
    }
}
