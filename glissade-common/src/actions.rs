//! Actions and mapping collections
//!
//! An action is what a mapped button, drag direction, or remapped key
//! resolves to. System actions can be driven continuously by a dock
//! swipe; editing actions and custom combos are always discrete.

use serde::{Deserialize, Serialize};

use crate::error::{GlissadeError, GlissadeResult};
use crate::keys::KeyCombo;

/// System gestures the window server can animate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SystemAction {
    MissionControl,
    AppExpose,
    ShowDesktop,
    Launchpad,
    SpaceLeft,
    SpaceRight,
}

/// Discrete editing/navigation actions with fixed key equivalents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EditAction {
    Back,
    Forward,
    Copy,
    Cut,
    Paste,
    Undo,
    Redo,
    SelectAll,
    Fullscreen,
    MiddleClick,
    LineStart,
    LineEnd,
    DocStart,
    DocEnd,
}

/// What a mapped input resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
    /// Pass the input through (or suppress it, for drag directions).
    Inert,
    System(SystemAction),
    Edit(EditAction),
    Custom(KeyCombo),
}

impl Action {
    /// True for actions a dock swipe can drive smoothly.
    pub fn is_continuous_capable(self) -> bool {
        matches!(self, Action::System(_))
    }
}

/// Drag direction for middle-button drag mappings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DragDirection {
    Up,
    Down,
    Left,
    Right,
}

impl DragDirection {
    pub const ALL: [DragDirection; 4] = [
        DragDirection::Up,
        DragDirection::Down,
        DragDirection::Left,
        DragDirection::Right,
    ];

    pub const fn index(self) -> usize {
        match self {
            DragDirection::Up => 0,
            DragDirection::Down => 1,
            DragDirection::Left => 2,
            DragDirection::Right => 3,
        }
    }

    pub const fn is_horizontal(self) -> bool {
        matches!(self, DragDirection::Left | DragDirection::Right)
    }
}

/// Per-direction drag actions. Fixed array indexed by direction ordinal;
/// no hashing on the hot path.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DragMap {
    slots: [Option<Action>; 4],
}

impl DragMap {
    pub fn set(&mut self, direction: DragDirection, action: Action) {
        self.slots[direction.index()] = Some(action);
    }

    pub fn get(&self, direction: DragDirection) -> Option<Action> {
        self.slots[direction.index()]
    }

    pub fn clear(&mut self, direction: DragDirection) {
        self.slots[direction.index()] = None;
    }

    /// True if either action on the given axis can be driven continuously.
    pub fn axis_continuous_capable(&self, horizontal: bool) -> bool {
        let (a, b) = if horizontal {
            (DragDirection::Left, DragDirection::Right)
        } else {
            (DragDirection::Up, DragDirection::Down)
        };
        self.get(a).is_some_and(Action::is_continuous_capable)
            || self.get(b).is_some_and(Action::is_continuous_capable)
    }
}

/// Highest button number a mapping may target.
pub const MAX_BUTTON: u32 = 31;

/// Per-button actions for auxiliary buttons. Buttons 0 and 1 are the
/// primary clicks and are rejected at policy time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ButtonMap {
    slots: Vec<(u32, Action)>,
}

impl ButtonMap {
    pub fn set(&mut self, button: u32, action: Action) -> GlissadeResult<()> {
        if button < 2 {
            return Err(GlissadeError::Mapping(format!(
                "button {button} is a primary click and cannot be remapped"
            )));
        }
        if button > MAX_BUTTON {
            return Err(GlissadeError::Mapping(format!(
                "button {button} exceeds the supported range"
            )));
        }
        match self.slots.iter_mut().find(|(b, _)| *b == button) {
            Some(slot) => slot.1 = action,
            None => self.slots.push((button, action)),
        }
        Ok(())
    }

    pub fn get(&self, button: u32) -> Option<Action> {
        self.slots
            .iter()
            .find(|(b, _)| *b == button)
            .map(|(_, a)| *a)
    }

    pub fn remove(&mut self, button: u32) {
        self.slots.retain(|(b, _)| *b != button);
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::Modifiers;

    #[test]
    fn primary_buttons_are_rejected() {
        let mut map = ButtonMap::default();
        assert!(map.set(0, Action::Edit(EditAction::Copy)).is_err());
        assert!(map.set(1, Action::Edit(EditAction::Copy)).is_err());
        assert!(map.set(2, Action::Edit(EditAction::Copy)).is_ok());
    }

    #[test]
    fn button_map_is_one_mapping_per_button() {
        let mut map = ButtonMap::default();
        map.set(3, Action::Edit(EditAction::Back)).unwrap();
        map.set(3, Action::Edit(EditAction::Forward)).unwrap();
        assert_eq!(map.get(3), Some(Action::Edit(EditAction::Forward)));
        assert_eq!(map.slots.len(), 1);
    }

    #[test]
    fn continuous_capability_by_axis() {
        let mut drags = DragMap::default();
        drags.set(DragDirection::Up, Action::System(SystemAction::MissionControl));
        drags.set(
            DragDirection::Left,
            Action::Custom(KeyCombo::new(0x7B, Modifiers::COMMAND)),
        );
        assert!(drags.axis_continuous_capable(false));
        assert!(!drags.axis_continuous_capable(true));
    }
}
