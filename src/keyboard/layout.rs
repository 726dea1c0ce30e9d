//! Layout-override table
//!
//! Resolves physical scancodes to [`LogicalKey`]s. The base table is the
//! US-positional map from [`keymap`](super::keymap); entries from the
//! `capture.layout_overrides` config list replace or extend it, which is
//! how a non-US board gets its keys recorded under the names the player uses.

use super::keymap::{self, KeyCode};
use super::LogicalKey;
use crate::config::LayoutOverride;
use std::collections::HashMap;

/// Scancode to logical key resolution with user overrides applied
#[derive(Debug, Clone)]
pub struct LayoutTable {
    map: HashMap<KeyCode, LogicalKey>,
}

impl LayoutTable {
    /// Default US-positional table
    pub fn new() -> Self {
        let map = keymap::known_codes()
            .filter_map(|code| keymap::default_logical(code).map(|key| (code, key)))
            .collect();
        Self { map }
    }

    /// Default table with `overrides` layered on top, later entries winning
    pub fn with_overrides(overrides: &[LayoutOverride]) -> Self {
        let mut table = Self::new();
        for o in overrides {
            table.map.insert(KeyCode(o.scancode), o.key);
        }
        table
    }

    /// Logical key for a scancode
    pub fn resolve(&self, code: KeyCode) -> Option<LogicalKey> {
        self.map.get(&code).copied()
    }

    /// All scancodes that resolve to `key`, in ascending order
    pub fn codes_for(&self, key: LogicalKey) -> Vec<KeyCode> {
        let mut codes: Vec<KeyCode> = self
            .map
            .iter()
            .filter(|(_, k)| **k == key)
            .map(|(code, _)| *code)
            .collect();
        codes.sort();
        codes
    }

    /// Scancodes covering every key in `keys`
    pub fn codes_for_all(&self, keys: &[LogicalKey]) -> Vec<KeyCode> {
        let mut codes: Vec<KeyCode> = keys.iter().flat_map(|k| self.codes_for(*k)).collect();
        codes.sort();
        codes.dedup();
        codes
    }
}

impl Default for LayoutTable {
    fn default() -> Self {
        Self::new()
    }
}
