//! Precision playback of a timing map
//!
//! The schedule runs on one dedicated thread. Each iteration re-reads the
//! clock, fires every action that is due, and otherwise parks until just
//! before the next one and spins the remainder. Cancellation unparks the
//! thread, which then releases every key it still holds before exiting.

pub mod emitter;
pub mod schedule;

pub use emitter::{EmitError, EmittedAction, EnigoEmitter, KeyAction, MemoryEmitter, OutputEmitter};
pub use schedule::{build_schedule, ConflictDetail, Schedule, ScheduledAction};

use crate::config::Config;
use crate::error::Result;
use crate::keyboard::LogicalKey;
use crate::model::TimingMap;
use serde::Serialize;
use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, BinaryHeap};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// How a playback run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PlaybackOutcome {
    Completed,
    Stopped,
    /// Too many consecutive emit failures on `key`
    Aborted { key: LogicalKey },
}

/// Timing and failure counters of one run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlaybackReport {
    pub scheduled: usize,
    pub reordered: usize,
    /// Actions left out to keep Down and Up alternating
    pub skipped: usize,
    pub fired: usize,
    pub emit_failures: usize,
    pub compensating_releases: usize,
    /// Worst lateness of a fired action, in microseconds
    pub late_max_us: u64,
    pub late_mean_us: f64,
    pub outcome: PlaybackOutcome,
}

/// What the playback thread hands back when it exits
pub struct Finished {
    pub emitter: Box<dyn OutputEmitter>,
    pub report: PlaybackReport,
}

#[derive(Debug, Clone, Copy)]
struct Timing {
    tick: Duration,
    spin: Duration,
    max_failures: u32,
}

/// A running playback
pub struct Scheduler {
    cancel: Arc<AtomicBool>,
    handle: JoinHandle<Finished>,
    scheduled: usize,
}

impl Scheduler {
    /// Start firing a validated schedule relative to `start`
    pub fn spawn(
        start: Instant,
        schedule: Schedule,
        config: &Config,
        emitter: Box<dyn OutputEmitter>,
    ) -> Result<Self> {
        let timing = Timing {
            tick: Duration::from_millis(config.playback.tick_ms.max(1)),
            spin: Duration::from_micros(config.playback.spin_threshold_us),
            max_failures: config.playback.max_consecutive_failures,
        };
        let scheduled = schedule.len();
        let cancel = Arc::new(AtomicBool::new(false));
        let thread_cancel = Arc::clone(&cancel);

        log::info!(
            "[PLAYBACK] starting {} actions over {:?} on {}",
            scheduled,
            schedule.duration(),
            emitter.name()
        );

        let handle = thread::Builder::new()
            .name("keyfuse-playback".into())
            .spawn(move || run(start, schedule, timing, emitter, &thread_cancel))?;

        Ok(Self {
            cancel,
            handle,
            scheduled,
        })
    }

    pub fn scheduled(&self) -> usize {
        self.scheduled
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Cancel, wait for the held keys to be released, and collect the run
    pub fn stop(self) -> Option<Finished> {
        self.cancel.store(true, Ordering::Release);
        self.handle.thread().unpark();
        self.join()
    }

    /// Wait for the run to end on its own
    pub fn join(self) -> Option<Finished> {
        match self.handle.join() {
            Ok(finished) => {
                let r = &finished.report;
                log::info!(
                    "[PLAYBACK] {:?}: {}/{} fired, {} failures, {} released, late max {} us mean {:.0} us",
                    r.outcome,
                    r.fired,
                    r.scheduled,
                    r.emit_failures,
                    r.compensating_releases,
                    r.late_max_us,
                    r.late_mean_us
                );
                Some(finished)
            }
            Err(_) => {
                log::error!("[PLAYBACK] playback thread panicked");
                None
            }
        }
    }
}

/// Build the schedule for `map` and start it
///
/// A schedule conflict is reported before anything is spawned.
pub fn play(
    start: Instant,
    map: &TimingMap,
    config: &Config,
    emitter: Box<dyn OutputEmitter>,
) -> Result<Scheduler> {
    let schedule = build_schedule(map, config)?;
    Scheduler::spawn(start, schedule, config, emitter)
}

fn run(
    start: Instant,
    schedule: Schedule,
    timing: Timing,
    mut emitter: Box<dyn OutputEmitter>,
    cancel: &AtomicBool,
) -> Finished {
    let reordered = schedule.reordered();
    let skipped = schedule.skipped();
    let actions = schedule.into_actions();
    let mut queue: BinaryHeap<Reverse<(Duration, u64, usize)>> = actions
        .iter()
        .enumerate()
        .map(|(i, a)| Reverse((a.at, a.seq, i)))
        .collect();

    let mut held: BTreeSet<LogicalKey> = BTreeSet::new();
    let mut streaks: BTreeMap<LogicalKey, u32> = BTreeMap::new();
    let mut fired = 0usize;
    let mut failures = 0usize;
    let mut late_max = 0u64;
    let mut late_sum = 0u128;

    let outcome = loop {
        if cancel.load(Ordering::Acquire) {
            break PlaybackOutcome::Stopped;
        }
        let Some(&Reverse((at, _, idx))) = queue.peek() else {
            break PlaybackOutcome::Completed;
        };

        let due = start + at;
        let now = Instant::now();
        if now < due {
            let remaining = due - now;
            if remaining > timing.spin {
                thread::park_timeout((remaining - timing.spin).min(timing.tick));
            } else {
                std::hint::spin_loop();
            }
            continue;
        }

        // Pop before emitting so an action can neither repeat nor vanish
        queue.pop();
        let action = actions[idx];
        let late = (now - due).as_micros() as u64;
        late_max = late_max.max(late);
        late_sum += late as u128;

        match guarded_emit(emitter.as_mut(), action.key, action.action) {
            Ok(()) => {
                fired += 1;
                streaks.remove(&action.key);
                match action.action {
                    KeyAction::Down => held.insert(action.key),
                    KeyAction::Up => held.remove(&action.key),
                };
            }
            Err(e) => {
                failures += 1;
                let streak = streaks.entry(action.key).or_insert(0);
                *streak += 1;
                log::warn!("[PLAYBACK] {} (failure {} in a row)", e, streak);
                if timing.max_failures > 0 && *streak >= timing.max_failures {
                    log::warn!("[PLAYBACK] aborting after repeated failures on {}", action.key);
                    held.insert(action.key);
                    break PlaybackOutcome::Aborted { key: action.key };
                }
            }
        }
    };

    let attempted = fired + failures;
    let compensating_releases = release_all(emitter.as_mut(), &held);

    Finished {
        emitter,
        report: PlaybackReport {
            scheduled: actions.len(),
            reordered,
            skipped,
            fired,
            emit_failures: failures,
            compensating_releases,
            late_max_us: late_max,
            late_mean_us: if attempted == 0 {
                0.0
            } else {
                late_sum as f64 / attempted as f64
            },
            outcome,
        },
    }
}

/// Emit, turning a panicking emitter into a rejected action so the run
/// keeps its emitter and still releases what it holds
fn guarded_emit(emitter: &mut dyn OutputEmitter, key: LogicalKey, action: KeyAction) -> std::result::Result<(), EmitError> {
    panic::catch_unwind(AssertUnwindSafe(|| emitter.emit(key, action))).unwrap_or_else(|_| {
        log::error!("[PLAYBACK] {} panicked on {} {}", emitter.name(), key, action);
        Err(EmitError::Rejected {
            key,
            action,
            reason: "emitter panicked".into(),
        })
    })
}

/// One Up per held key, in key order
fn release_all(emitter: &mut dyn OutputEmitter, held: &BTreeSet<LogicalKey>) -> usize {
    for &key in held {
        if let Err(e) = guarded_emit(emitter, key, KeyAction::Up) {
            log::warn!("[PLAYBACK] compensating release failed: {}", e);
        }
    }
    held.len()
}
