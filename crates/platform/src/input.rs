//! Keyboard input and key-to-action mapping.

use std::collections::HashSet;

pub use winit::keyboard::KeyCode;

/// Host actions triggered from the keyboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAction {
    ToggleVsync,
    Exit,
    ToggleFullscreen,
}

/// Maps a key press to its action.
///
/// Alt+Enter and F11 are independent triggers of the same action; F11 does
/// not depend on the Alt modifier.
pub fn map_key(key: KeyCode, alt_held: bool) -> Option<KeyAction> {
    match key {
        KeyCode::KeyV => Some(KeyAction::ToggleVsync),
        KeyCode::Escape => Some(KeyAction::Exit),
        KeyCode::Enter | KeyCode::NumpadEnter if alt_held => Some(KeyAction::ToggleFullscreen),
        KeyCode::F11 => Some(KeyAction::ToggleFullscreen),
        _ => None,
    }
}

/// Tracks held keys and the Alt modifier.
#[derive(Debug, Default)]
pub struct InputState {
    /// Currently pressed keys
    pressed_keys: HashSet<KeyCode>,
    alt_held: bool,
}

impl InputState {
    /// Create a new input state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle a key press event.
    ///
    /// Returns the mapped action only for a fresh press; auto-repeat of a
    /// held key yields `None`.
    pub fn on_key_pressed(&mut self, key: KeyCode) -> Option<KeyAction> {
        if !self.pressed_keys.insert(key) {
            return None;
        }
        map_key(key, self.alt_held)
    }

    /// Handle a key release event.
    pub fn on_key_released(&mut self, key: KeyCode) {
        self.pressed_keys.remove(&key);
    }

    /// Handle a modifier change.
    pub fn on_modifiers_changed(&mut self, alt_held: bool) {
        self.alt_held = alt_held;
    }

    /// Forget all held keys, e.g. when the window loses focus and releases
    /// will not be delivered.
    pub fn clear(&mut self) {
        self.pressed_keys.clear();
        self.alt_held = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_key_actions() {
        assert_eq!(map_key(KeyCode::KeyV, false), Some(KeyAction::ToggleVsync));
        assert_eq!(map_key(KeyCode::Escape, false), Some(KeyAction::Exit));
        assert_eq!(map_key(KeyCode::KeyA, true), None);
    }

    #[test]
    fn test_enter_requires_alt() {
        assert_eq!(map_key(KeyCode::Enter, false), None);
        assert_eq!(
            map_key(KeyCode::Enter, true),
            Some(KeyAction::ToggleFullscreen)
        );
        assert_eq!(
            map_key(KeyCode::NumpadEnter, true),
            Some(KeyAction::ToggleFullscreen)
        );
    }

    #[test]
    fn test_f11_is_independent_of_alt() {
        assert_eq!(map_key(KeyCode::F11, false), Some(KeyAction::ToggleFullscreen));
        assert_eq!(map_key(KeyCode::F11, true), Some(KeyAction::ToggleFullscreen));
    }

    #[test]
    fn test_repeat_press_yields_no_action() {
        let mut input = InputState::new();

        assert_eq!(
            input.on_key_pressed(KeyCode::KeyV),
            Some(KeyAction::ToggleVsync)
        );
        assert_eq!(input.on_key_pressed(KeyCode::KeyV), None);

        input.on_key_released(KeyCode::KeyV);
        assert_eq!(
            input.on_key_pressed(KeyCode::KeyV),
            Some(KeyAction::ToggleVsync)
        );
    }

    #[test]
    fn test_alt_enter_through_modifier_state() {
        let mut input = InputState::new();
        assert_eq!(input.on_key_pressed(KeyCode::Enter), None);
        input.on_key_released(KeyCode::Enter);

        input.on_modifiers_changed(true);
        assert_eq!(
            input.on_key_pressed(KeyCode::Enter),
            Some(KeyAction::ToggleFullscreen)
        );

        // Enter is no longer held after a focus loss
        input.clear();
        input.on_modifiers_changed(true);
        assert_eq!(
            input.on_key_pressed(KeyCode::Enter),
            Some(KeyAction::ToggleFullscreen)
        );

        input.on_key_released(KeyCode::Enter);
        input.clear();
        assert_eq!(input.on_key_pressed(KeyCode::Enter), None);
    }
}
