//! System-wide record and play keys
//!
//! Hotkeys run on their own capture registration over a separate key
//! source, so they keep working while the game window has focus and while
//! a take is being recorded. Presses are queued for the session to drain.

use crate::capture::{CaptureService, KeyTransition, Sink};
use crate::config::Config;
use crate::error::Result;
use crate::keyboard::{KeySource, LogicalKey};
use crate::model::Mode;
use std::sync::mpsc::{self, Receiver};
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HotkeyAction {
    ToggleRecording,
    TogglePlayback,
}

/// One hotkey press with the time the source saw it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HotkeyPress {
    pub action: HotkeyAction,
    pub at: Instant,
}

pub struct HotkeyListener {
    // Kept for its Drop, which stops the subscription
    _capture: CaptureService,
    presses: Receiver<HotkeyPress>,
    record: LogicalKey,
    play: LogicalKey,
}

impl HotkeyListener {
    /// Subscribe `source` to the configured record and play keys
    pub fn start(source: Box<dyn KeySource>, config: &Config) -> Result<Self> {
        let record = config.hotkeys.record;
        let play = config.hotkeys.play;
        let mut capture = CaptureService::new(source, config);
        let (tx, presses) = mpsc::channel();

        let sink: Sink = Box::new(move |t: KeyTransition| {
            if t.mode != Mode::Press {
                return;
            }
            let action = if t.key == record {
                HotkeyAction::ToggleRecording
            } else if t.key == play {
                HotkeyAction::TogglePlayback
            } else {
                return;
            };
            // The receiver only goes away with the listener
            let _ = tx.send(HotkeyPress { action, at: t.at });
        });
        capture.register(&[record, play], sink)?;

        log::info!(
            "[SESSION] hotkeys: {} records, {} plays ({})",
            record,
            play,
            capture.source_name()
        );
        Ok(Self {
            _capture: capture,
            presses,
            record,
            play,
        })
    }

    pub fn is_bound(&self, key: LogicalKey) -> bool {
        key == self.record || key == self.play
    }

    /// Presses since the last drain, oldest first
    pub fn drain(&self) -> Vec<HotkeyPress> {
        self.presses.try_iter().collect()
    }
}
