//! Key mapping for console input
//!
//! Converts key events to console actions.

use bitflags::bitflags;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

bitflags! {
    /// Modifier keys
    #[derive(Clone, Copy, Debug, Default, PartialEq)]
    pub struct Modifiers: u8 {
        const SHIFT = 0b0001;
        const CTRL  = 0b0010;
        const ALT   = 0b0100;
    }
}

impl From<KeyModifiers> for Modifiers {
    fn from(mods: KeyModifiers) -> Self {
        let mut result = Modifiers::empty();
        if mods.contains(KeyModifiers::SHIFT) {
            result |= Modifiers::SHIFT;
        }
        if mods.contains(KeyModifiers::CONTROL) {
            result |= Modifiers::CTRL;
        }
        if mods.contains(KeyModifiers::ALT) {
            result |= Modifiers::ALT;
        }
        result
    }
}

/// What a key press asks the console to do
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyAction {
    Insert(char),
    Backspace,
    ClearInput,
    /// Send the input line
    Submit,
    /// Unlock the input line locally
    ForceUnlock,
    Dump,
    /// Re-arm polling after the failure limit
    ResetPolling,
    Quit,
}

pub struct KeyMapper;

impl KeyMapper {
    /// Map a crossterm KeyEvent to an action
    pub fn map(event: &KeyEvent) -> Option<KeyAction> {
        let mods = Modifiers::from(event.modifiers);

        match event.code {
            KeyCode::Char(ch) if mods.contains(Modifiers::CTRL) => Self::map_ctrl(ch),
            KeyCode::Char(_) if mods.contains(Modifiers::ALT) => None,
            KeyCode::Char(ch) => Some(KeyAction::Insert(ch)),
            KeyCode::Enter => Some(KeyAction::Submit),
            KeyCode::Backspace => Some(KeyAction::Backspace),
            KeyCode::Esc => Some(KeyAction::ForceUnlock),
            _ => None,
        }
    }

    fn map_ctrl(ch: char) -> Option<KeyAction> {
        match ch.to_ascii_lowercase() {
            'q' | 'c' => Some(KeyAction::Quit),
            'd' => Some(KeyAction::Dump),
            'r' => Some(KeyAction::ResetPolling),
            'u' => Some(KeyAction::ClearInput),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key_event(code: KeyCode, mods: KeyModifiers) -> KeyEvent {
        KeyEvent::new(code, mods)
    }

    #[test]
    fn test_char_keys() {
        assert_eq!(
            KeyMapper::map(&key_event(KeyCode::Char('a'), KeyModifiers::NONE)),
            Some(KeyAction::Insert('a'))
        );
        assert_eq!(
            KeyMapper::map(&key_event(KeyCode::Char('A'), KeyModifiers::SHIFT)),
            Some(KeyAction::Insert('A'))
        );
        assert_eq!(
            KeyMapper::map(&key_event(KeyCode::Char('x'), KeyModifiers::ALT)),
            None
        );
    }

    #[test]
    fn test_control_keys() {
        let ctrl = |ch| KeyMapper::map(&key_event(KeyCode::Char(ch), KeyModifiers::CONTROL));
        assert_eq!(ctrl('q'), Some(KeyAction::Quit));
        assert_eq!(ctrl('C'), Some(KeyAction::Quit));
        assert_eq!(ctrl('d'), Some(KeyAction::Dump));
        assert_eq!(ctrl('r'), Some(KeyAction::ResetPolling));
        assert_eq!(ctrl('l'), None);
        assert_eq!(ctrl('u'), Some(KeyAction::ClearInput));
        assert_eq!(ctrl('z'), None);
    }

    #[test]
    fn test_editing_keys() {
        let none = KeyModifiers::NONE;
        assert_eq!(KeyMapper::map(&key_event(KeyCode::Enter, none)), Some(KeyAction::Submit));
        assert_eq!(
            KeyMapper::map(&key_event(KeyCode::Backspace, none)),
            Some(KeyAction::Backspace)
        );
        assert_eq!(KeyMapper::map(&key_event(KeyCode::Esc, none)), Some(KeyAction::ForceUnlock));
        assert_eq!(KeyMapper::map(&key_event(KeyCode::Up, none)), None);
    }
}
