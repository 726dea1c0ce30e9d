//! Alignment and aggregation of stored samples into a timing map
//!
//! Every sample's events are split per (key, mode) into an ordinal
//! sequence, and the n-th press of a key in one take is aligned with the
//! n-th press of that key in every other take. Per position the genuine
//! values are screened for outliers, missing positions are optionally
//! imputed, and the survivors are reduced to a mean, a median and a
//! spread. The whole pass is a pure function of the sample snapshot and
//! the configuration.

pub mod stats;

use crate::config::{Config, ExtrasPolicy, Impute, Weighting};
use crate::keyboard::LogicalKey;
use crate::model::{Mode, Sample, TimingMap, TimingMapEntry};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// An event beyond the expected length of its sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ExtraEvent {
    pub sample_id: u64,
    pub key: LogicalKey,
    pub mode: Mode,
    pub position_index: u32,
    pub delta_ms: u64,
}

/// Diagnostics of one aggregation pass
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AggregationReport {
    /// Samples in the snapshot
    pub sample_count: usize,
    /// Set when the snapshot held no samples at all
    pub insufficient_samples: bool,
    /// Events beyond the expected length, whatever the extras policy
    pub extra_count: usize,
    /// Listed only when extras are surfaced
    pub extras: Vec<ExtraEvent>,
    pub rejected_count: usize,
    pub imputed_count: usize,
    /// Entries left without any genuine value
    pub insufficient_entries: usize,
}

/// Output of [`aggregate`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Aggregation {
    pub map: TimingMap,
    pub report: AggregationReport,
}

/// Genuine values at one position after outlier screening
struct Position {
    /// (sample index, value)
    retained: Vec<(usize, f64)>,
    rejected: usize,
}

impl Position {
    fn values(&self) -> Vec<f64> {
        self.retained.iter().map(|(_, v)| *v).collect()
    }
}

/// Fuse `samples` (in store order) into a timing map
pub fn aggregate(samples: &[Arc<Sample>], config: &Config) -> Aggregation {
    let mut out = Aggregation::default();
    out.report.sample_count = samples.len();

    if samples.is_empty() {
        out.report.insufficient_samples = true;
        log::info!("[AGGREGATE] no samples, timing map is empty");
        return out;
    }

    let pairs: BTreeSet<(LogicalKey, Mode)> = samples
        .iter()
        .flat_map(|s| s.events().iter().map(|e| (e.key, e.mode)))
        .collect();

    for (key, mode) in pairs {
        aggregate_sequence(samples, key, mode, config, &mut out);
    }

    log::info!(
        "[AGGREGATE] {} samples -> {} entries ({} rejected, {} imputed, {} extras)",
        out.report.sample_count,
        out.map.len(),
        out.report.rejected_count,
        out.report.imputed_count,
        out.report.extra_count
    );
    out
}

fn aggregate_sequence(
    samples: &[Arc<Sample>],
    key: LogicalKey,
    mode: Mode,
    config: &Config,
    out: &mut Aggregation,
) {
    let seqs: Vec<Vec<u64>> = samples.iter().map(|s| s.sequence(key, mode)).collect();
    let expected = config
        .expected_for(key, mode)
        .map(|n| n as usize)
        .unwrap_or_else(|| seqs.iter().map(Vec::len).max().unwrap_or(0));

    for (sample, seq) in samples.iter().zip(&seqs) {
        for (pos, &delta_ms) in seq.iter().enumerate().skip(expected) {
            out.report.extra_count += 1;
            if config.extras == ExtrasPolicy::Surface {
                let extra = ExtraEvent {
                    sample_id: sample.id(),
                    key,
                    mode,
                    position_index: pos as u32,
                    delta_ms,
                };
                log::warn!(
                    "[AGGREGATE] extra {} {} #{} at {} ms in sample {}",
                    key,
                    mode.as_str(),
                    pos,
                    delta_ms,
                    sample.id()
                );
                out.report.extras.push(extra);
            }
        }
    }

    let weights: Vec<f64> = seqs
        .iter()
        .enumerate()
        .map(|(i, seq)| sample_weight(config, i, seqs.len(), seq.len(), expected))
        .collect();

    let positions: Vec<Position> = (0..expected)
        .map(|pos| screen_position(&seqs, pos, config))
        .collect();
    let consensus: Vec<Option<f64>> = positions.iter().map(|p| stats::mean(&p.values())).collect();

    for (pos, position) in positions.iter().enumerate() {
        let imputed = impute_position(&seqs, pos, position, &consensus, config.impute);
        let genuine = position.values();

        let (avg_ms, median_ms, std_ms) = if genuine.is_empty() {
            (None, None, None)
        } else {
            let weighted: Vec<(f64, f64)> = position
                .retained
                .iter()
                .chain(imputed.iter())
                .map(|(i, v)| (*v, weights[*i]))
                .collect();
            (
                stats::weighted_mean(&weighted),
                stats::median(&genuine),
                stats::std_dev(&genuine),
            )
        };

        let entry = TimingMapEntry {
            key,
            mode,
            position_index: pos as u32,
            avg_ms,
            median_ms,
            std_ms,
            sample_count: genuine.len(),
            rejected_count: position.rejected,
            imputed_count: imputed.len(),
        };
        if entry.is_insufficient() {
            out.report.insufficient_entries += 1;
        }
        out.report.rejected_count += entry.rejected_count;
        out.report.imputed_count += entry.imputed_count;
        out.map.insert(entry);
    }
}

fn sample_weight(config: &Config, index: usize, total: usize, count: usize, expected: usize) -> f64 {
    match config.weighting {
        Weighting::None => 1.0,
        Weighting::Completeness => {
            if expected == 0 {
                1.0
            } else {
                (count as f64 / expected as f64).min(1.0)
            }
        }
        // Newest sample in store order has age 0
        Weighting::Recency => recency_decay(config).powi((total - 1 - index) as i32),
    }
}

/// Smallest per-step decay; older samples keep a nonzero weight
const MIN_RECENCY_DECAY: f64 = 0.01;

/// `recency_decay` held to (0, 1] so older samples never outweigh newer ones
fn recency_decay(config: &Config) -> f64 {
    let decay = config.recency_decay;
    if decay.is_nan() {
        1.0
    } else {
        decay.clamp(MIN_RECENCY_DECAY, 1.0)
    }
}

fn screen_position(seqs: &[Vec<u64>], pos: usize, config: &Config) -> Position {
    let genuine: Vec<(usize, f64)> = seqs
        .iter()
        .enumerate()
        .filter_map(|(i, seq)| seq.get(pos).map(|v| (i, *v as f64)))
        .collect();
    let values: Vec<f64> = genuine.iter().map(|(_, v)| *v).collect();
    let rejected = stats::outliers(&values, config.outlier_k, config.outlier_min_spread_ms);

    let retained = genuine
        .into_iter()
        .enumerate()
        .filter(|(j, _)| !rejected.contains(j))
        .map(|(_, g)| g)
        .collect();
    Position {
        retained,
        rejected: rejected.len(),
    }
}

/// Stand-in values for samples whose sequence stops before `pos`
fn impute_position(
    seqs: &[Vec<u64>],
    pos: usize,
    position: &Position,
    consensus: &[Option<f64>],
    policy: Impute,
) -> Vec<(usize, f64)> {
    let missing = seqs.iter().enumerate().filter(|(_, seq)| seq.len() <= pos);

    match policy {
        Impute::Drop => Vec::new(),
        Impute::Average => missing
            .filter_map(|(i, _)| {
                let earlier: Vec<f64> = position
                    .retained
                    .iter()
                    .filter(|(j, _)| *j < i)
                    .map(|(_, v)| *v)
                    .collect();
                stats::mean(&earlier)
                    .or(consensus[pos])
                    .map(|v| (i, v))
            })
            .collect(),
        Impute::NearestNeighbor => missing
            .filter_map(|(i, seq)| {
                let anchor_pos = seq.len().checked_sub(1)?;
                let anchor = seq[anchor_pos] as f64;
                let gap = consensus[pos]? - consensus[anchor_pos]?;
                let value = anchor + gap;
                // Only a value after the anchor keeps the sample's own order
                (value > anchor).then_some((i, value))
            })
            .collect(),
    }
}

/// Holds the current timing map and runs rebuilds
pub struct Engine {
    map: Arc<TimingMap>,
    report: AggregationReport,
    pending: Option<JoinHandle<Aggregation>>,
}

impl Engine {
    pub fn new() -> Self {
        Self {
            map: Arc::new(TimingMap::new()),
            report: AggregationReport {
                insufficient_samples: true,
                ..AggregationReport::default()
            },
            pending: None,
        }
    }

    pub fn map(&self) -> Arc<TimingMap> {
        Arc::clone(&self.map)
    }

    pub fn report(&self) -> &AggregationReport {
        &self.report
    }

    /// Install a map loaded from disk; the report is reset
    pub fn install(&mut self, map: TimingMap) {
        self.map = Arc::new(map);
        self.report = AggregationReport::default();
    }

    pub fn is_rebuilding(&self) -> bool {
        self.pending.is_some()
    }

    /// Recompute the map on the calling thread
    pub fn rebuild(&mut self, snapshot: &[Arc<Sample>], config: &Config) -> &AggregationReport {
        let Aggregation { map, report } = aggregate(snapshot, config);
        self.map = Arc::new(map);
        self.report = report;
        &self.report
    }

    /// Recompute the map on a worker thread over an owned snapshot
    ///
    /// Returns false if a rebuild is already running.
    pub fn spawn_rebuild(&mut self, snapshot: Vec<Arc<Sample>>, config: Config) -> std::io::Result<bool> {
        if self.pending.is_some() {
            return Ok(false);
        }
        let handle = thread::Builder::new()
            .name("keyfuse-aggregate".into())
            .spawn(move || aggregate(&snapshot, &config))?;
        self.pending = Some(handle);
        Ok(true)
    }

    /// Install a finished background rebuild. Returns true if one landed.
    pub fn poll(&mut self) -> bool {
        match &self.pending {
            Some(handle) if handle.is_finished() => self.wait(),
            _ => false,
        }
    }

    /// Block until a background rebuild finishes and install it
    pub fn wait(&mut self) -> bool {
        let Some(handle) = self.pending.take() else {
            return false;
        };
        match handle.join() {
            Ok(Aggregation { map, report }) => {
                self.map = Arc::new(map);
                self.report = report;
                true
            }
            Err(_) => {
                log::error!("[AGGREGATE] rebuild thread panicked, keeping previous map");
                false
            }
        }
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExpectedCount;
    use crate::model::Event;

    fn key(c: char) -> LogicalKey {
        LogicalKey::Char(c)
    }

    fn presses(id: u64, k: char, deltas: &[u64]) -> Arc<Sample> {
        let events = deltas.iter().map(|d| Event::new(key(k), Mode::Press, *d)).collect();
        Arc::new(Sample::new(id, 0, events).unwrap())
    }

    #[test]
    fn alignment_by_ordinal_position() {
        let samples = vec![presses(1, 'a', &[100, 200]), presses(2, 'a', &[105, 195, 300])];
        let out = aggregate(&samples, &Config::default());

        let p0 = out.map.get(key('a'), Mode::Press, 0).unwrap();
        assert_eq!(p0.avg_ms, Some(102.5));
        assert_eq!(p0.sample_count, 2);
        let p1 = out.map.get(key('a'), Mode::Press, 1).unwrap();
        assert_eq!(p1.avg_ms, Some(197.5));
        let p2 = out.map.get(key('a'), Mode::Press, 2).unwrap();
        assert_eq!(p2.avg_ms, Some(300.0));
        assert_eq!(p2.sample_count, 1);
        assert_eq!(p2.std_ms, Some(0.0));
    }

    #[test]
    fn outlier_is_excluded_from_every_statistic() {
        let samples = vec![
            presses(1, 'a', &[100]),
            presses(2, 'a', &[102]),
            presses(3, 'a', &[101]),
            presses(4, 'a', &[500]),
        ];
        let config = Config {
            outlier_k: 2.0,
            ..Config::default()
        };
        let entry = aggregate(&samples, &config).map.get(key('a'), Mode::Press, 0).cloned().unwrap();
        assert_eq!(entry.avg_ms, Some(101.0));
        assert_eq!(entry.median_ms, Some(101.0));
        assert_eq!(entry.sample_count, 3);
        assert_eq!(entry.rejected_count, 1);
    }

    #[test]
    fn average_imputation_stays_within_genuine_range() {
        let samples = vec![
            presses(1, 'a', &[100, 200]),
            presses(2, 'a', &[100]),
            presses(3, 'a', &[100, 220]),
        ];
        let config = Config {
            impute: Impute::Average,
            ..Config::default()
        };
        let entry = aggregate(&samples, &config).map.get(key('a'), Mode::Press, 1).cloned().unwrap();
        // Sample 2 borrows the running average of sample 1 only
        assert_eq!(entry.imputed_count, 1);
        assert_eq!(entry.sample_count, 2);
        let avg = entry.avg_ms.unwrap();
        assert!((200.0..=220.0).contains(&avg));
        assert!((avg - 620.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn average_imputation_without_earlier_values_uses_all_retained() {
        let samples = vec![presses(1, 'a', &[100]), presses(2, 'a', &[100, 240])];
        let config = Config {
            impute: Impute::Average,
            ..Config::default()
        };
        let entry = aggregate(&samples, &config).map.get(key('a'), Mode::Press, 1).cloned().unwrap();
        assert_eq!(entry.imputed_count, 1);
        assert_eq!(entry.avg_ms, Some(240.0));
    }

    #[test]
    fn nearest_neighbor_translates_own_anchor() {
        let samples = vec![
            presses(1, 'a', &[100, 200]),
            presses(2, 'a', &[110, 210]),
            presses(3, 'a', &[115]),
        ];
        let config = Config {
            impute: Impute::NearestNeighbor,
            ..Config::default()
        };
        let entry = aggregate(&samples, &config).map.get(key('a'), Mode::Press, 1).cloned().unwrap();
        // consensus gap between positions 0 and 1 is 205 - 108.33
        assert_eq!(entry.imputed_count, 1);
        let imputed = 115.0 + (205.0 - (100.0 + 110.0 + 115.0) / 3.0);
        let expected_avg = (200.0 + 210.0 + imputed) / 3.0;
        assert!((entry.avg_ms.unwrap() - expected_avg).abs() < 1e-9);
        // median and spread see genuine values only
        assert_eq!(entry.median_ms, Some(205.0));
    }

    #[test]
    fn nearest_neighbor_never_imputes_before_its_anchor() {
        // The short take's only press lands after the consensus for position 1
        let samples = vec![presses(1, 'a', &[10, 20]), presses(2, 'a', &[500])];
        let config = Config {
            impute: Impute::NearestNeighbor,
            ..Config::default()
        };
        let out = aggregate(&samples, &config);
        let entry = out.map.get(key('a'), Mode::Press, 1).cloned().unwrap();
        assert_eq!(entry.imputed_count, 0);
        assert_eq!(entry.sample_count, 1);
        assert_eq!(entry.avg_ms, Some(20.0));
        assert_eq!(out.report.imputed_count, 0);
    }

    #[test]
    fn nearest_neighbor_without_anchor_drops() {
        let samples = vec![presses(1, 'a', &[100]), presses(2, 's', &[50])];
        let config = Config {
            impute: Impute::NearestNeighbor,
            ..Config::default()
        };
        let entry = aggregate(&samples, &config).map.get(key('a'), Mode::Press, 0).cloned().unwrap();
        assert_eq!(entry.imputed_count, 0);
        assert_eq!(entry.sample_count, 1);
    }

    #[test]
    fn extras_are_surfaced_beyond_expected_length() {
        let samples = vec![presses(1, 'a', &[100, 200, 300]), presses(2, 'a', &[100, 200])];
        let config = Config {
            extras: ExtrasPolicy::Surface,
            expected: vec![ExpectedCount {
                key: key('a'),
                mode: Mode::Press,
                count: 2,
            }],
            ..Config::default()
        };
        let out = aggregate(&samples, &config);
        assert_eq!(out.map.len(), 2);
        assert_eq!(out.report.extra_count, 1);
        assert_eq!(
            out.report.extras,
            vec![ExtraEvent {
                sample_id: 1,
                key: key('a'),
                mode: Mode::Press,
                position_index: 2,
                delta_ms: 300,
            }]
        );
    }

    #[test]
    fn expected_beyond_data_yields_insufficient_entry() {
        let samples = vec![presses(1, 'a', &[100])];
        let config = Config {
            expected: vec![ExpectedCount {
                key: key('a'),
                mode: Mode::Press,
                count: 2,
            }],
            ..Config::default()
        };
        let out = aggregate(&samples, &config);
        let entry = out.map.get(key('a'), Mode::Press, 1).unwrap();
        assert!(entry.is_insufficient());
        assert_eq!(entry.avg_ms, None);
        assert_eq!(out.report.insufficient_entries, 1);
    }

    #[test]
    fn recency_favours_newest_sample() {
        let samples = vec![presses(1, 'a', &[100]), presses(2, 'a', &[200])];
        let config = Config {
            weighting: Weighting::Recency,
            recency_decay: 0.5,
            ..Config::default()
        };
        let entry = aggregate(&samples, &config).map.get(key('a'), Mode::Press, 0).cloned().unwrap();
        // weights 0.5 and 1.0
        assert!((entry.avg_ms.unwrap() - 500.0 / 3.0).abs() < 1e-9);
        assert_eq!(entry.median_ms, Some(150.0));
    }

    #[test]
    fn recency_decay_outside_unit_range_is_clamped() {
        let samples = vec![presses(1, 'a', &[200]), presses(2, 'a', &[100])];
        let avg_with = |decay: f64| {
            let config = Config {
                weighting: Weighting::Recency,
                recency_decay: decay,
                ..Config::default()
            };
            aggregate(&samples, &config)
                .map
                .get(key('a'), Mode::Press, 0)
                .and_then(|e| e.avg_ms)
                .unwrap()
        };

        // An amplifying decay behaves like no decay at all
        assert!((avg_with(2.0) - 150.0).abs() < 1e-9);
        // A negative decay leaves the newest sample dominant, still in range
        let negative = avg_with(-0.5);
        assert!((100.0..=150.0).contains(&negative), "{}", negative);
        assert!((negative - 102.0 / 1.01).abs() < 1e-9);
        assert!((avg_with(f64::NAN) - 150.0).abs() < 1e-9);
    }

    #[test]
    fn completeness_discounts_short_samples() {
        let samples = vec![presses(1, 'a', &[100, 200]), presses(2, 'a', &[130])];
        let config = Config {
            weighting: Weighting::Completeness,
            ..Config::default()
        };
        let entry = aggregate(&samples, &config).map.get(key('a'), Mode::Press, 0).cloned().unwrap();
        // weights 1.0 and 0.5
        assert!((entry.avg_ms.unwrap() - 110.0).abs() < 1e-9);
    }

    #[test]
    fn no_samples_is_flagged_not_failed() {
        let out = aggregate(&[], &Config::default());
        assert!(out.map.is_empty());
        assert!(out.report.insufficient_samples);
    }

    #[test]
    fn repeated_runs_serialize_identically() {
        let samples = vec![
            presses(1, 'j', &[10, 40, 90]),
            presses(2, 'f', &[5, 60]),
            presses(3, 'j', &[12, 38]),
        ];
        let config = Config {
            impute: Impute::Average,
            ..Config::default()
        };
        let a = serde_json::to_string(&aggregate(&samples, &config).map).unwrap();
        let b = serde_json::to_string(&aggregate(&samples, &config).map).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn background_rebuild_lands_on_wait() {
        let mut engine = Engine::new();
        let samples = vec![presses(1, 'a', &[100])];
        assert!(engine.spawn_rebuild(samples.clone(), Config::default()).unwrap());
        assert!(!engine.spawn_rebuild(samples, Config::default()).unwrap());
        assert!(engine.wait());
        assert!(!engine.is_rebuilding());
        assert_eq!(engine.map().len(), 1);
        assert!(!engine.report().insufficient_samples);
    }
}
