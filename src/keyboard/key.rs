//! Logical key identity
//!
//! A [`LogicalKey`] is the layout-independent name a transition is recorded
//! and replayed under. It is resolved from a physical scancode through the
//! [`LayoutTable`](super::LayoutTable), never from the OS character state, so
//! an IME or a switched layout cannot change which key a sample refers to.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Stable logical key identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum LogicalKey {
    /// Printable character key, always stored lowercase
    Char(char),
    Space,
    Enter,
    Tab,
    Escape,
    Backspace,
    Up,
    Down,
    Left,
    Right,
    Shift,
    Control,
    Alt,
    Meta,
    /// Function key F1-F12
    F(u8),
}

/// Error returned when a key name cannot be parsed
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unsupported key: {0:?}")]
pub struct ParseKeyError(pub String);

impl LogicalKey {
    /// Character key, normalised to lowercase
    pub fn char(c: char) -> Self {
        Self::Char(c.to_lowercase().next().unwrap_or(c))
    }

    /// Canonical lowercase name (`a`, `space`, `f9`, ...)
    pub fn name(&self) -> String {
        match self {
            Self::Char(c) => c.to_string(),
            Self::Space => "space".into(),
            Self::Enter => "enter".into(),
            Self::Tab => "tab".into(),
            Self::Escape => "escape".into(),
            Self::Backspace => "backspace".into(),
            Self::Up => "up".into(),
            Self::Down => "down".into(),
            Self::Left => "left".into(),
            Self::Right => "right".into(),
            Self::Shift => "shift".into(),
            Self::Control => "control".into(),
            Self::Alt => "alt".into(),
            Self::Meta => "meta".into(),
            Self::F(n) => format!("f{}", n),
        }
    }

    /// Short label for tables and the status bar
    pub fn label(&self) -> String {
        match self {
            Self::Char(c) => c.to_uppercase().collect(),
            Self::Space => "Space".into(),
            Self::Enter => "Enter".into(),
            Self::Tab => "Tab".into(),
            Self::Escape => "Esc".into(),
            Self::Backspace => "Bksp".into(),
            Self::Up => "\u{2191}".into(),
            Self::Down => "\u{2193}".into(),
            Self::Left => "\u{2190}".into(),
            Self::Right => "\u{2192}".into(),
            Self::Shift => "Shift".into(),
            Self::Control => "Ctrl".into(),
            Self::Alt => "Alt".into(),
            Self::Meta => "Meta".into(),
            Self::F(n) => format!("F{}", n),
        }
    }
}

impl fmt::Display for LogicalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

impl FromStr for LogicalKey {
    type Err = ParseKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let token = s.trim();
        let mut chars = token.chars();
        if let (Some(c), None) = (chars.next(), chars.next()) {
            if c.is_whitespace() || c.is_control() {
                return Err(ParseKeyError(s.to_string()));
            }
            return Ok(Self::char(c));
        }

        let lower = token.to_lowercase();
        let key = match lower.as_str() {
            "space" => Self::Space,
            "enter" | "return" => Self::Enter,
            "tab" => Self::Tab,
            "esc" | "escape" => Self::Escape,
            "backspace" => Self::Backspace,
            "up" => Self::Up,
            "down" => Self::Down,
            "left" => Self::Left,
            "right" => Self::Right,
            "shift" => Self::Shift,
            "ctrl" | "control" => Self::Control,
            "alt" => Self::Alt,
            "meta" | "win" | "cmd" => Self::Meta,
            other => match other.strip_prefix('f').and_then(|n| n.parse::<u8>().ok()) {
                Some(n @ 1..=12) => Self::F(n),
                _ => return Err(ParseKeyError(s.to_string())),
            },
        };
        Ok(key)
    }
}

impl TryFrom<String> for LogicalKey {
    type Error = ParseKeyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<LogicalKey> for String {
    fn from(key: LogicalKey) -> Self {
        key.name()
    }
}

/// Parse a comma separated key list such as `a,s,d,f,space`
pub fn parse_key_list(input: &str) -> Result<Vec<LogicalKey>, ParseKeyError> {
    let mut keys = Vec::new();
    for token in input.split(',').map(str::trim).filter(|t| !t.is_empty()) {
        let key: LogicalKey = token.parse()?;
        if !keys.contains(&key) {
            keys.push(key);
        }
    }
    Ok(keys)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_characters_lowercase() {
        assert_eq!("A".parse::<LogicalKey>(), Ok(LogicalKey::Char('a')));
        assert_eq!(";".parse::<LogicalKey>(), Ok(LogicalKey::Char(';')));
    }

    #[test]
    fn parses_named_keys_and_aliases() {
        assert_eq!("Return".parse::<LogicalKey>(), Ok(LogicalKey::Enter));
        assert_eq!("esc".parse::<LogicalKey>(), Ok(LogicalKey::Escape));
        assert_eq!("CTRL".parse::<LogicalKey>(), Ok(LogicalKey::Control));
        assert_eq!("f10".parse::<LogicalKey>(), Ok(LogicalKey::F(10)));
    }

    #[test]
    fn rejects_unknown_names() {
        assert!("f13".parse::<LogicalKey>().is_err());
        assert!("hyper".parse::<LogicalKey>().is_err());
        assert!("".parse::<LogicalKey>().is_err());
    }

    #[test]
    fn name_round_trips_through_parse() {
        for key in [
            LogicalKey::Char('k'),
            LogicalKey::Space,
            LogicalKey::Left,
            LogicalKey::Meta,
            LogicalKey::F(9),
        ] {
            assert_eq!(key.name().parse::<LogicalKey>(), Ok(key));
        }
    }

    #[test]
    fn key_list_skips_duplicates_and_blanks() {
        let keys = parse_key_list("a, s,,a, space").unwrap();
        assert_eq!(
            keys,
            vec![LogicalKey::Char('a'), LogicalKey::Char('s'), LogicalKey::Space]
        );
    }

    #[test]
    fn serializes_as_plain_string() {
        let json = serde_json::to_string(&LogicalKey::Space).unwrap();
        assert_eq!(json, "\"space\"");
        let back: LogicalKey = serde_json::from_str("\"J\"").unwrap();
        assert_eq!(back, LogicalKey::Char('j'));
    }
}
