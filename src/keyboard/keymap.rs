//! Physical scancodes and the default US-positional key table

use super::LogicalKey;

/// Represents a physical key code (Linux evdev scancode numbering)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeyCode(pub u16);

impl KeyCode {
    pub fn new(code: u16) -> Self {
        Self(code)
    }

    pub fn as_u16(&self) -> u16 {
        self.0
    }
}

impl From<u16> for KeyCode {
    fn from(code: u16) -> Self {
        Self(code)
    }
}

impl From<device_query::Keycode> for KeyCode {
    fn from(keycode: device_query::Keycode) -> Self {
        use device_query::Keycode as DK;
        // Map device_query keycodes to Linux evdev scancodes
        let code = match keycode {
            DK::Escape => 1,
            DK::Key1 => 2,
            DK::Key2 => 3,
            DK::Key3 => 4,
            DK::Key4 => 5,
            DK::Key5 => 6,
            DK::Key6 => 7,
            DK::Key7 => 8,
            DK::Key8 => 9,
            DK::Key9 => 10,
            DK::Key0 => 11,
            DK::Minus => 12,
            DK::Equal => 13,
            DK::Backspace => 14,
            DK::Tab => 15,
            DK::Q => 16,
            DK::W => 17,
            DK::E => 18,
            DK::R => 19,
            DK::T => 20,
            DK::Y => 21,
            DK::U => 22,
            DK::I => 23,
            DK::O => 24,
            DK::P => 25,
            DK::LeftBracket => 26,
            DK::RightBracket => 27,
            DK::Enter => 28,
            DK::LControl => 29,
            DK::A => 30,
            DK::S => 31,
            DK::D => 32,
            DK::F => 33,
            DK::G => 34,
            DK::H => 35,
            DK::J => 36,
            DK::K => 37,
            DK::L => 38,
            DK::Semicolon => 39,
            DK::Apostrophe => 40,
            DK::Grave => 41,
            DK::LShift => 42,
            DK::BackSlash => 43,
            DK::Z => 44,
            DK::X => 45,
            DK::C => 46,
            DK::V => 47,
            DK::B => 48,
            DK::N => 49,
            DK::M => 50,
            DK::Comma => 51,
            DK::Dot => 52,
            DK::Slash => 53,
            DK::RShift => 54,
            DK::LAlt => 56,
            DK::Space => 57,
            DK::F1 => 59,
            DK::F2 => 60,
            DK::F3 => 61,
            DK::F4 => 62,
            DK::F5 => 63,
            DK::F6 => 64,
            DK::F7 => 65,
            DK::F8 => 66,
            DK::F9 => 67,
            DK::F10 => 68,
            DK::F11 => 87,
            DK::F12 => 88,
            DK::RControl => 97,
            DK::RAlt => 100,
            DK::Up => 103,
            DK::Left => 105,
            DK::Right => 106,
            DK::Down => 108,
            DK::LMeta => 125,
            DK::RMeta => 126,
            // Keys with no logical counterpart
            _ => 0,
        };
        Self(code)
    }
}

/// Character keys by scancode on a US-positional board
const CHAR_CODES: &[(u16, char)] = &[
    (2, '1'), (3, '2'), (4, '3'), (5, '4'), (6, '5'),
    (7, '6'), (8, '7'), (9, '8'), (10, '9'), (11, '0'),
    (12, '-'), (13, '='),
    (16, 'q'), (17, 'w'), (18, 'e'), (19, 'r'), (20, 't'),
    (21, 'y'), (22, 'u'), (23, 'i'), (24, 'o'), (25, 'p'),
    (26, '['), (27, ']'),
    (30, 'a'), (31, 's'), (32, 'd'), (33, 'f'), (34, 'g'),
    (35, 'h'), (36, 'j'), (37, 'k'), (38, 'l'), (39, ';'),
    (40, '\''), (41, '`'), (43, '\\'),
    (44, 'z'), (45, 'x'), (46, 'c'), (47, 'v'), (48, 'b'),
    (49, 'n'), (50, 'm'), (51, ','), (52, '.'), (53, '/'),
];

/// Default logical identity of a scancode, before layout overrides
pub fn default_logical(code: KeyCode) -> Option<LogicalKey> {
    if let Some(&(_, c)) = CHAR_CODES.iter().find(|(sc, _)| *sc == code.0) {
        return Some(LogicalKey::Char(c));
    }
    let key = match code.0 {
        1 => LogicalKey::Escape,
        14 => LogicalKey::Backspace,
        15 => LogicalKey::Tab,
        28 => LogicalKey::Enter,
        29 | 97 => LogicalKey::Control,
        42 | 54 => LogicalKey::Shift,
        56 | 100 => LogicalKey::Alt,
        57 => LogicalKey::Space,
        59..=68 => LogicalKey::F((code.0 - 58) as u8),
        87 => LogicalKey::F(11),
        88 => LogicalKey::F(12),
        103 => LogicalKey::Up,
        105 => LogicalKey::Left,
        106 => LogicalKey::Right,
        108 => LogicalKey::Down,
        125 | 126 => LogicalKey::Meta,
        _ => return None,
    };
    Some(key)
}

/// Every scancode the default table knows about
pub fn known_codes() -> impl Iterator<Item = KeyCode> {
    (1u16..=127).map(KeyCode).filter(|c| default_logical(*c).is_some())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn home_row_is_positional() {
        assert_eq!(default_logical(KeyCode(30)), Some(LogicalKey::Char('a')));
        assert_eq!(default_logical(KeyCode(36)), Some(LogicalKey::Char('j')));
        assert_eq!(default_logical(KeyCode(57)), Some(LogicalKey::Space));
    }

    #[test]
    fn left_and_right_modifiers_share_identity() {
        assert_eq!(default_logical(KeyCode(42)), default_logical(KeyCode(54)));
        assert_eq!(default_logical(KeyCode(29)), default_logical(KeyCode(97)));
    }

    #[test]
    fn function_keys_are_numbered() {
        assert_eq!(default_logical(KeyCode(59)), Some(LogicalKey::F(1)));
        assert_eq!(default_logical(KeyCode(67)), Some(LogicalKey::F(9)));
        assert_eq!(default_logical(KeyCode(88)), Some(LogicalKey::F(12)));
    }

    #[test]
    fn device_query_codes_match_evdev_numbering() {
        assert_eq!(KeyCode::from(device_query::Keycode::A), KeyCode(30));
        assert_eq!(KeyCode::from(device_query::Keycode::Space), KeyCode(57));
        assert_eq!(KeyCode::from(device_query::Keycode::F10), KeyCode(68));
    }

    #[test]
    fn unknown_code_has_no_identity() {
        assert_eq!(default_logical(KeyCode(0)), None);
        assert_eq!(default_logical(KeyCode(240)), None);
    }
}
