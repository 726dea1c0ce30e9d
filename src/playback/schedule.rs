//! Turning a timing map into an ordered list of fire times

use super::KeyAction;
use crate::config::{Config, ConflictPolicy};
use crate::error::{Error, Result};
use crate::keyboard::LogicalKey;
use crate::model::{Mode, TimingMap};
use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// One key action at an offset from the playback start
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledAction {
    pub at: Duration,
    /// Tie-breaker for equal `at`, following the canonical per-key order
    pub seq: u64,
    pub key: LogicalKey,
    pub action: KeyAction,
    pub position_index: u32,
}

/// An action whose fire time lands before its predecessor on the same key
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConflictDetail {
    pub key: LogicalKey,
    pub action: KeyAction,
    pub position_index: u32,
    pub fire_ms: f64,
    pub predecessor_ms: f64,
}

impl fmt::Display for ConflictDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} #{} at {:.1} ms precedes its predecessor at {:.1} ms",
            self.key, self.action, self.position_index, self.fire_ms, self.predecessor_ms
        )
    }
}

/// Validated fire times, sorted by (at, seq)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Schedule {
    actions: Vec<ScheduledAction>,
    reordered: usize,
    skipped: usize,
}

impl Schedule {
    pub fn actions(&self) -> &[ScheduledAction] {
        &self.actions
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Actions clamped to their predecessor under `ConflictPolicy::Reorder`
    pub fn reordered(&self) -> usize {
        self.reordered
    }

    /// Actions left out to keep Down and Up alternating
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    /// Offset of the last action
    pub fn duration(&self) -> Duration {
        self.actions.last().map(|a| a.at).unwrap_or_default()
    }

    pub(crate) fn into_actions(self) -> Vec<ScheduledAction> {
        self.actions
    }
}

/// Build the playback schedule for every sufficiently sampled entry
///
/// Fire time is `avg_ms` plus the key's offset (global offset included),
/// floored at zero. Per key, actions must follow P0, R0, P1, R1, ... and
/// a violation is clamped or refused according to `playback.on_conflict`.
///
/// Down and Up strictly alternate per key. When an insufficient entry
/// leaves a gap, the action that would repeat a Down (or release a key
/// that is not down) is left out and counted in [`Schedule::skipped`].
pub fn build_schedule(map: &TimingMap, config: &Config) -> Result<Schedule> {
    let mut actions = Vec::new();
    let mut reordered = 0;
    let mut skipped = 0;
    let mut seq = 0u64;

    for key in map.keys() {
        let offset = config.offset_for(key) as f64;
        let mut entries: Vec<_> = map.playable().filter(|e| e.key == key).collect();
        entries.sort_by_key(|e| (e.position_index, e.mode));

        let mut predecessor: Option<f64> = None;
        let mut down = false;
        for entry in entries {
            let Some(avg) = entry.avg_ms else { continue };
            let action = match entry.mode {
                Mode::Press => KeyAction::Down,
                Mode::Release => KeyAction::Up,
            };
            if (action == KeyAction::Down) == down {
                log::debug!(
                    "[PLAYBACK] {} {} #{} skipped, its counterpart is missing",
                    key,
                    action,
                    entry.position_index
                );
                skipped += 1;
                continue;
            }
            let mut fire_ms = (avg + offset).max(0.0);

            if let Some(prev) = predecessor {
                if fire_ms < prev {
                    match config.playback.on_conflict {
                        ConflictPolicy::Reorder => {
                            log::debug!(
                                "[PLAYBACK] {} {} #{} clamped from {:.1} to {:.1} ms",
                                key,
                                action,
                                entry.position_index,
                                fire_ms,
                                prev
                            );
                            fire_ms = prev;
                            reordered += 1;
                        }
                        ConflictPolicy::Refuse => {
                            return Err(Error::ScheduleConflict(ConflictDetail {
                                key,
                                action,
                                position_index: entry.position_index,
                                fire_ms,
                                predecessor_ms: prev,
                            }));
                        }
                    }
                }
            }
            predecessor = Some(fire_ms);
            down = action == KeyAction::Down;

            actions.push(ScheduledAction {
                at: Duration::from_micros((fire_ms * 1000.0).round() as u64),
                seq,
                key,
                action,
                position_index: entry.position_index,
            });
            seq += 1;
        }
    }

    actions.sort_by_key(|a| (a.at, a.seq));
    if reordered > 0 {
        log::warn!("[PLAYBACK] {} actions reordered to keep press/release order", reordered);
    }
    if skipped > 0 {
        log::warn!("[PLAYBACK] {} actions skipped around insufficient entries", skipped);
    }
    Ok(Schedule {
        actions,
        reordered,
        skipped,
    })
}
