//! Shared data types: events, samples and the timing map

use crate::error::{Error, Result};
use crate::keyboard::LogicalKey;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Direction of a recorded transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Mode {
    Press,
    Release,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Press => "Press",
            Mode::Release => "Release",
        }
    }
}

/// One transition inside a sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub key: LogicalKey,
    pub mode: Mode,
    /// Milliseconds since the recording epoch
    pub delta_ms: u64,
}

impl Event {
    pub fn new(key: LogicalKey, mode: Mode, delta_ms: u64) -> Self {
        Self { key, mode, delta_ms }
    }
}

/// A sealed recording. Fields are only reachable through accessors so a
/// sample cannot change after [`Recorder::stop`](crate::recorder::Recorder::stop).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "SampleRecord")]
pub struct Sample {
    id: u64,
    /// Wall-clock start, unix epoch milliseconds
    started_at: i64,
    events: Vec<Event>,
}

/// Unvalidated persisted form of a [`Sample`]
#[derive(Deserialize)]
struct SampleRecord {
    id: u64,
    started_at: i64,
    events: Vec<Event>,
}

impl TryFrom<SampleRecord> for Sample {
    type Error = Error;

    fn try_from(record: SampleRecord) -> Result<Self> {
        Sample::new(record.id, record.started_at, record.events)
    }
}

impl Sample {
    /// Build a sample, checking that events are ordered by `delta_ms`
    pub fn new(id: u64, started_at: i64, events: Vec<Event>) -> Result<Self> {
        if let Some(pair) = events.windows(2).find(|w| w[1].delta_ms < w[0].delta_ms) {
            return Err(Error::InvalidSample(format!(
                "sample {} events out of order at {} ms",
                id, pair[1].delta_ms
            )));
        }
        Ok(Self {
            id,
            started_at,
            events,
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn started_at(&self) -> i64 {
        self.started_at
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    /// Offset of the last event, 0 for an empty sample
    pub fn duration_ms(&self) -> u64 {
        self.events.last().map(|e| e.delta_ms).unwrap_or(0)
    }

    /// Ordered `delta_ms` values of one key+mode
    pub fn sequence(&self, key: LogicalKey, mode: Mode) -> Vec<u64> {
        self.events
            .iter()
            .filter(|e| e.key == key && e.mode == mode)
            .map(|e| e.delta_ms)
            .collect()
    }

    pub fn summary(&self) -> SampleSummary {
        SampleSummary {
            id: self.id,
            started_at: self.started_at,
            event_count: self.events.len(),
            duration_ms: self.duration_ms(),
        }
    }
}

/// Read-only view of a stored sample for the UI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleSummary {
    pub id: u64,
    pub started_at: i64,
    pub event_count: usize,
    pub duration_ms: u64,
}

/// Composite key of a timing map entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimingKey {
    pub key: LogicalKey,
    pub mode: Mode,
    pub position_index: u32,
}

/// Aggregated timing of one (key, mode, position)
///
/// `avg_ms`, `median_ms` and `std_ms` are `None` when no genuine value
/// survived; such an entry is insufficiently sampled and is never scheduled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimingMapEntry {
    pub key: LogicalKey,
    pub mode: Mode,
    pub position_index: u32,
    pub avg_ms: Option<f64>,
    pub median_ms: Option<f64>,
    pub std_ms: Option<f64>,
    pub sample_count: usize,
    #[serde(default)]
    pub rejected_count: usize,
    #[serde(default)]
    pub imputed_count: usize,
}

impl TimingMapEntry {
    pub fn timing_key(&self) -> TimingKey {
        TimingKey {
            key: self.key,
            mode: self.mode,
            position_index: self.position_index,
        }
    }

    pub fn is_insufficient(&self) -> bool {
        self.sample_count == 0 || self.avg_ms.is_none()
    }
}

/// Flat, ordered mapping of (key, mode, position) to its entry
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<TimingMapEntry>", into = "Vec<TimingMapEntry>")]
pub struct TimingMap {
    entries: BTreeMap<TimingKey, TimingMapEntry>,
}

impl TimingMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an entry, replacing any entry with the same composite key
    pub fn insert(&mut self, entry: TimingMapEntry) -> Option<TimingMapEntry> {
        self.entries.insert(entry.timing_key(), entry)
    }

    pub fn get(&self, key: LogicalKey, mode: Mode, position_index: u32) -> Option<&TimingMapEntry> {
        self.entries.get(&TimingKey {
            key,
            mode,
            position_index,
        })
    }

    /// Entries in (key, mode, position) order
    pub fn entries(&self) -> impl Iterator<Item = &TimingMapEntry> {
        self.entries.values()
    }

    /// Entries that can be scheduled
    pub fn playable(&self) -> impl Iterator<Item = &TimingMapEntry> {
        self.entries.values().filter(|e| !e.is_insufficient())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Keys present in the map
    pub fn keys(&self) -> Vec<LogicalKey> {
        let mut keys: Vec<LogicalKey> = self.entries.keys().map(|k| k.key).collect();
        keys.dedup();
        keys
    }
}

impl From<Vec<TimingMapEntry>> for TimingMap {
    fn from(list: Vec<TimingMapEntry>) -> Self {
        let mut map = TimingMap::new();
        for entry in list {
            map.insert(entry);
        }
        map
    }
}

/// A single take as its own timing map: one entry per event, counted by
/// ordinal position within its key+mode
impl From<&Sample> for TimingMap {
    fn from(sample: &Sample) -> Self {
        let mut map = TimingMap::new();
        let mut seen: BTreeMap<(LogicalKey, Mode), u32> = BTreeMap::new();
        for event in sample.events() {
            let position = seen.entry((event.key, event.mode)).or_insert(0);
            let delta = event.delta_ms as f64;
            map.insert(TimingMapEntry {
                key: event.key,
                mode: event.mode,
                position_index: *position,
                avg_ms: Some(delta),
                median_ms: Some(delta),
                std_ms: Some(0.0),
                sample_count: 1,
                rejected_count: 0,
                imputed_count: 0,
            });
            *position += 1;
        }
        map
    }
}

impl From<TimingMap> for Vec<TimingMapEntry> {
    fn from(map: TimingMap) -> Self {
        map.entries.into_values().collect()
    }
}
