//! Sample recorder and sample store

use crate::error::{Error, Result};
use crate::keyboard::LogicalKey;
use crate::model::{Event, Mode, Sample, SampleSummary};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

/// Sealed samples in recording order. One writer, many readers.
#[derive(Debug, Clone, Default)]
pub struct SampleStore {
    samples: Arc<RwLock<Vec<Arc<Sample>>>>,
}

impl SampleStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<Arc<Sample>>> {
        self.samples.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<Arc<Sample>>> {
        self.samples.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Point-in-time copy of the sample list
    pub fn snapshot(&self) -> Vec<Arc<Sample>> {
        self.read().clone()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn get(&self, id: u64) -> Option<Arc<Sample>> {
        self.read().iter().find(|s| s.id() == id).cloned()
    }

    pub fn summaries(&self) -> Vec<SampleSummary> {
        self.read().iter().map(|s| s.summary()).collect()
    }

    fn push(&self, sample: Arc<Sample>) {
        self.write().push(sample);
    }

    fn clear(&self) -> usize {
        let mut samples = self.write();
        let n = samples.len();
        samples.clear();
        n
    }

    fn remove(&self, id: u64) -> bool {
        let mut samples = self.write();
        let before = samples.len();
        samples.retain(|s| s.id() != id);
        samples.len() != before
    }

    fn replace(&self, list: Vec<Arc<Sample>>) {
        *self.write() = list;
    }
}

/// Result of sealing a recording
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordingSummary {
    pub id: u64,
    pub event_count: usize,
    pub duration_ms: u64,
}

#[derive(Debug)]
struct Buffer {
    epoch: Instant,
    started_at: i64,
    events: Vec<Event>,
}

impl Buffer {
    fn last_delta(&self) -> u64 {
        self.events.last().map(|e| e.delta_ms).unwrap_or(0)
    }
}

#[derive(Debug)]
struct Inner {
    store: SampleStore,
    buffer: Mutex<Option<Buffer>>,
    next_id: AtomicU64,
}

/// Buffers one recording session and seals it into the store
///
/// Cloning yields another handle to the same recorder, which is how the
/// capture sink and the session share it.
#[derive(Debug, Clone)]
pub struct Recorder {
    inner: Arc<Inner>,
}

impl Recorder {
    pub fn new(store: SampleStore) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                buffer: Mutex::new(None),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    fn buffer(&self) -> MutexGuard<'_, Option<Buffer>> {
        self.inner.buffer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn store(&self) -> &SampleStore {
        &self.inner.store
    }

    pub fn is_recording(&self) -> bool {
        self.buffer().is_some()
    }

    /// Open a buffer whose deltas are measured from `epoch`
    pub fn start(&self, epoch: Instant) -> Result<()> {
        let mut buffer = self.buffer();
        if buffer.is_some() {
            return Err(Error::AlreadyRecording);
        }
        *buffer = Some(Buffer {
            epoch,
            started_at: chrono::Utc::now().timestamp_millis(),
            events: Vec::new(),
        });
        log::info!("[RECORDER] recording started");
        Ok(())
    }

    /// Append a transition. Returns false when it was ignored.
    pub fn record(&self, key: LogicalKey, mode: Mode, at: Instant) -> bool {
        let mut guard = self.buffer();
        let Some(buffer) = guard.as_mut() else {
            return false;
        };
        let Some(elapsed) = at.checked_duration_since(buffer.epoch) else {
            log::debug!("[RECORDER] {} {:?} precedes the epoch, ignored", key, mode);
            return false;
        };
        // Sources may stamp a batch after the fact; never let a delta go backwards
        let delta_ms = (elapsed.as_millis() as u64).max(buffer.last_delta());
        buffer.events.push(Event::new(key, mode, delta_ms));
        true
    }

    /// Seal the buffer into an immutable sample
    pub fn stop(&self) -> Result<RecordingSummary> {
        let buffer = self.buffer().take().ok_or(Error::NotRecording)?;
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let sample = Sample::new(id, buffer.started_at, buffer.events)?;
        let summary = RecordingSummary {
            id,
            event_count: sample.events().len(),
            duration_ms: sample.duration_ms(),
        };
        self.inner.store.push(Arc::new(sample));
        log::info!(
            "[RECORDER] sealed sample {} ({} events, {} ms)",
            summary.id,
            summary.event_count,
            summary.duration_ms
        );
        Ok(summary)
    }

    /// Drop the in-progress buffer without sealing it
    pub fn abort(&self) -> bool {
        self.buffer().take().is_some()
    }

    /// Empty the sample store. Returns how many samples were removed.
    pub fn clear(&self) -> usize {
        let n = self.inner.store.clear();
        log::info!("[RECORDER] cleared {} samples", n);
        n
    }

    pub fn delete(&self, id: u64) -> Result<()> {
        if self.inner.store.remove(id) {
            log::info!("[RECORDER] deleted sample {}", id);
            Ok(())
        } else {
            Err(Error::UnknownSample(id))
        }
    }

    /// Replace the store with persisted samples
    pub fn restore(&self, samples: Vec<Sample>) {
        let next = samples.iter().map(|s| s.id()).max().map_or(1, |m| m + 1);
        self.inner
            .next_id
            .fetch_max(next, Ordering::Relaxed);
        let count = samples.len();
        self.inner
            .store
            .replace(samples.into_iter().map(Arc::new).collect());
        log::info!("[RECORDER] restored {} samples", count);
    }
}
