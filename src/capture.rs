//! Input capture service
//!
//! A [`KeySource`] pushes raw scancode transitions into a bounded queue
//! without ever blocking. A processing thread drains that queue, resolves
//! each scancode through the [`LayoutTable`], filters the tracked keys,
//! collapses OS auto-repeat and hands the surviving transitions to a sink
//! in arrival order.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::keyboard::{KeySource, LayoutTable, LogicalKey, RawTransition, Subscription, Transition, TransitionQueue};
use crate::model::Mode;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// A deduplicated transition of a tracked key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyTransition {
    pub key: LogicalKey,
    pub mode: Mode,
    pub at: Instant,
}

/// Receives every forwarded transition on the processing thread
pub type Sink = Box<dyn FnMut(KeyTransition) + Send>;

/// Counters for one capture registration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaptureStats {
    pub forwarded: u64,
    /// Down while already down, or Up while not down
    pub repeats_dropped: u64,
    pub queue_overflows: u64,
    /// Unknown scancodes or keys outside the tracked set
    pub untracked: u64,
}

struct ActiveCapture {
    subscription: Subscription,
    stop: Arc<AtomicBool>,
    overflows: Arc<AtomicU64>,
    worker: JoinHandle<CaptureStats>,
}

pub struct CaptureService {
    source: Box<dyn KeySource>,
    layout: Arc<LayoutTable>,
    queue_capacity: usize,
    tick: Duration,
    active: Option<ActiveCapture>,
}

impl CaptureService {
    pub fn new(source: Box<dyn KeySource>, config: &Config) -> Self {
        Self {
            source,
            layout: Arc::new(LayoutTable::with_overrides(&config.capture.layout_overrides)),
            queue_capacity: config.capture.queue_capacity.max(1),
            tick: Duration::from_millis(config.playback.tick_ms.max(1)),
            active: None,
        }
    }

    /// Apply new layout and queue settings; takes effect on the next register
    pub fn reconfigure(&mut self, config: &Config) {
        self.layout = Arc::new(LayoutTable::with_overrides(&config.capture.layout_overrides));
        self.queue_capacity = config.capture.queue_capacity.max(1);
        self.tick = Duration::from_millis(config.playback.tick_ms.max(1));
    }

    pub fn source_name(&self) -> &'static str {
        self.source.name()
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    pub fn layout(&self) -> &LayoutTable {
        &self.layout
    }

    /// Start forwarding transitions of `tracked` keys to `sink`
    pub fn register(&mut self, tracked: &[LogicalKey], sink: Sink) -> Result<()> {
        if self.active.is_some() {
            return Err(Error::AlreadyRecording);
        }

        let codes = self.layout.codes_for_all(tracked);
        let (tx, rx) = mpsc::sync_channel::<RawTransition>(self.queue_capacity);
        let overflows = Arc::new(AtomicU64::new(0));
        let subscription = self
            .source
            .subscribe(&codes, TransitionQueue::new(tx, Arc::clone(&overflows)))?;

        let stop = Arc::new(AtomicBool::new(false));
        let mut processor = Processor::new(
            Arc::clone(&self.layout),
            tracked.iter().copied().collect(),
            sink,
        );
        let worker_stop = Arc::clone(&stop);
        let tick = self.tick;

        let worker = thread::Builder::new()
            .name("keyfuse-capture".into())
            .spawn(move || {
                loop {
                    match rx.recv_timeout(tick) {
                        Ok(raw) => processor.handle(raw),
                        Err(RecvTimeoutError::Timeout) => {
                            if worker_stop.load(Ordering::Acquire) {
                                break;
                            }
                        }
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                // Whatever the source queued before it was stopped still counts
                while let Ok(raw) = rx.try_recv() {
                    processor.handle(raw);
                }
                processor.stats
            })?;

        log::info!(
            "[CAPTURE] registered {} keys ({} scancodes) on {}",
            tracked.len(),
            codes.len(),
            self.source.name()
        );

        self.active = Some(ActiveCapture {
            subscription,
            stop,
            overflows,
            worker,
        });
        Ok(())
    }

    /// Stop the source, drain the queue and join the processing thread
    ///
    /// Returns `None` when nothing was registered.
    pub fn stop(&mut self) -> Option<CaptureStats> {
        let active = self.active.take()?;
        active.subscription.stop();
        active.stop.store(true, Ordering::Release);

        let mut stats = match active.worker.join() {
            Ok(stats) => stats,
            Err(_) => {
                log::error!("[CAPTURE] processing thread panicked");
                CaptureStats::default()
            }
        };
        stats.queue_overflows = active.overflows.load(Ordering::Relaxed);

        log::info!(
            "[CAPTURE] stopped: {} forwarded, {} repeats, {} overflows, {} untracked",
            stats.forwarded,
            stats.repeats_dropped,
            stats.queue_overflows,
            stats.untracked
        );
        Some(stats)
    }
}

impl Drop for CaptureService {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Per-registration resolution and repeat filtering
struct Processor {
    layout: Arc<LayoutTable>,
    tracked: HashSet<LogicalKey>,
    down: HashSet<LogicalKey>,
    sink: Sink,
    stats: CaptureStats,
}

impl Processor {
    fn new(layout: Arc<LayoutTable>, tracked: HashSet<LogicalKey>, sink: Sink) -> Self {
        Self {
            layout,
            tracked,
            down: HashSet::new(),
            sink,
            stats: CaptureStats::default(),
        }
    }

    fn handle(&mut self, raw: RawTransition) {
        let key = match self.layout.resolve(raw.code) {
            Some(key) if self.tracked.contains(&key) => key,
            _ => {
                self.stats.untracked += 1;
                return;
            }
        };

        let genuine = match raw.transition {
            Transition::Down => self.down.insert(key),
            Transition::Up => self.down.remove(&key),
        };
        if !genuine {
            self.stats.repeats_dropped += 1;
            return;
        }

        let mode = match raw.transition {
            Transition::Down => Mode::Press,
            Transition::Up => Mode::Release,
        };
        (self.sink)(KeyTransition {
            key,
            mode,
            at: raw.timestamp,
        });
        self.stats.forwarded += 1;
    }
}
