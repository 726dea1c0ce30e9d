//! Output emitters: where scheduled key actions end up

use crate::keyboard::LogicalKey;
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use thiserror::Error;

/// Simulated key direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum KeyAction {
    Down,
    Up,
}

impl fmt::Display for KeyAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyAction::Down => write!(f, "down"),
            KeyAction::Up => write!(f, "up"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EmitError {
    #[error("output emitter unavailable: {0}")]
    Unavailable(String),

    #[error("{key} {action} rejected: {reason}")]
    Rejected {
        key: LogicalKey,
        action: KeyAction,
        reason: String,
    },
}

/// Platform key-simulation primitive
pub trait OutputEmitter: Send {
    fn emit(&mut self, key: LogicalKey, action: KeyAction) -> Result<(), EmitError>;

    fn name(&self) -> &'static str {
        "emitter"
    }
}

/// Emitter that sends real key events through enigo
#[cfg(feature = "virtual-send")]
pub struct EnigoEmitter {
    enigo: enigo::Enigo,
}

#[cfg(feature = "virtual-send")]
impl EnigoEmitter {
    pub fn new() -> Result<Self, EmitError> {
        use enigo::{Enigo, Settings};

        let enigo = Enigo::new(&Settings::default())
            .map_err(|e| EmitError::Unavailable(format!("failed to init enigo: {}", e)))?;
        Ok(Self { enigo })
    }

    pub fn is_available() -> bool {
        true
    }

    fn enigo_key(key: LogicalKey) -> enigo::Key {
        use enigo::Key;

        match key {
            LogicalKey::Char(c) => Key::Unicode(c),
            LogicalKey::Space => Key::Space,
            LogicalKey::Enter => Key::Return,
            LogicalKey::Tab => Key::Tab,
            LogicalKey::Escape => Key::Escape,
            LogicalKey::Backspace => Key::Backspace,
            LogicalKey::Up => Key::UpArrow,
            LogicalKey::Down => Key::DownArrow,
            LogicalKey::Left => Key::LeftArrow,
            LogicalKey::Right => Key::RightArrow,
            LogicalKey::Shift => Key::Shift,
            LogicalKey::Control => Key::Control,
            LogicalKey::Alt => Key::Alt,
            LogicalKey::Meta => Key::Meta,
            LogicalKey::F(n) => match n {
                1 => Key::F1,
                2 => Key::F2,
                3 => Key::F3,
                4 => Key::F4,
                5 => Key::F5,
                6 => Key::F6,
                7 => Key::F7,
                8 => Key::F8,
                9 => Key::F9,
                10 => Key::F10,
                11 => Key::F11,
                _ => Key::F12,
            },
        }
    }
}

#[cfg(feature = "virtual-send")]
impl OutputEmitter for EnigoEmitter {
    fn emit(&mut self, key: LogicalKey, action: KeyAction) -> Result<(), EmitError> {
        use enigo::{Direction, Keyboard};

        let direction = match action {
            KeyAction::Down => Direction::Press,
            KeyAction::Up => Direction::Release,
        };
        self.enigo
            .key(Self::enigo_key(key), direction)
            .map_err(|e| EmitError::Rejected {
                key,
                action,
                reason: e.to_string(),
            })
    }

    fn name(&self) -> &'static str {
        "enigo"
    }
}

/// Stub when the virtual-send feature is not enabled
#[cfg(not(feature = "virtual-send"))]
pub struct EnigoEmitter;

#[cfg(not(feature = "virtual-send"))]
impl EnigoEmitter {
    pub fn new() -> Result<Self, EmitError> {
        Err(EmitError::Unavailable(
            "built without the virtual-send feature".into(),
        ))
    }

    pub fn is_available() -> bool {
        false
    }
}

#[cfg(not(feature = "virtual-send"))]
impl OutputEmitter for EnigoEmitter {
    fn emit(&mut self, _key: LogicalKey, _action: KeyAction) -> Result<(), EmitError> {
        Err(EmitError::Unavailable(
            "built without the virtual-send feature".into(),
        ))
    }
}

/// One action captured by a [`MemoryEmitter`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmittedAction {
    pub key: LogicalKey,
    pub action: KeyAction,
    pub at: Instant,
}

/// Emitter that records instead of sending. Used for dry runs and tests.
///
/// Clones share the same log, so a caller can keep one handle while the
/// scheduler owns another.
#[derive(Debug, Clone, Default)]
pub struct MemoryEmitter {
    log: Arc<Mutex<Vec<EmittedAction>>>,
    failing: Arc<Mutex<HashSet<LogicalKey>>>,
}

impl MemoryEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every action on `key` from now on
    pub fn fail_on(&self, key: LogicalKey) {
        self.failing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key);
    }

    pub fn recover(&self, key: LogicalKey) {
        self.failing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&key);
    }

    /// Everything emitted so far, in emission order
    pub fn actions(&self) -> Vec<EmittedAction> {
        self.log.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl OutputEmitter for MemoryEmitter {
    fn emit(&mut self, key: LogicalKey, action: KeyAction) -> Result<(), EmitError> {
        let at = Instant::now();
        if self
            .failing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&key)
        {
            return Err(EmitError::Rejected {
                key,
                action,
                reason: "scripted failure".into(),
            });
        }
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(EmittedAction { key, action, at });
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
