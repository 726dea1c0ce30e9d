//! Session report and export functionality

use crate::aggregate::AggregationReport;
use crate::model::{SampleSummary, TimingMap};
use crate::playback::PlaybackReport;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs::File;
use std::io::Write;
use std::path::Path;

/// Everything known about the current session, for export
#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    /// Report metadata
    pub metadata: ReportMetadata,
    /// Summary statistics
    pub summary: SessionSummary,
    pub samples: Vec<SampleSummary>,
    pub aggregation: AggregationReport,
    pub last_playback: Option<PlaybackReport>,
    pub timing_map: TimingMap,
}

/// Report metadata
#[derive(Debug, Clone, Serialize)]
pub struct ReportMetadata {
    /// Report generation timestamp
    pub generated_at: String,
    /// Application version
    pub version: String,
}

/// Session summary statistics
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub sample_count: usize,
    pub total_events: usize,
    pub entries: usize,
    pub playable_entries: usize,
    /// Longest sample in ms
    pub longest_sample_ms: u64,
}

impl SessionReport {
    /// Create a new session report
    pub fn new(
        samples: Vec<SampleSummary>,
        aggregation: AggregationReport,
        last_playback: Option<PlaybackReport>,
        timing_map: TimingMap,
    ) -> Self {
        let now: DateTime<Utc> = Utc::now();
        let summary = SessionSummary {
            sample_count: samples.len(),
            total_events: samples.iter().map(|s| s.event_count).sum(),
            entries: timing_map.len(),
            playable_entries: timing_map.playable().count(),
            longest_sample_ms: samples.iter().map(|s| s.duration_ms).max().unwrap_or(0),
        };

        Self {
            metadata: ReportMetadata {
                generated_at: now.to_rfc3339(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
            summary,
            samples,
            aggregation,
            last_playback,
            timing_map,
        }
    }

    /// Default export file name, stamped with the current UTC time
    pub fn default_file_name() -> String {
        format!("keyfuse_report_{}.json", Utc::now().format("%Y%m%d_%H%M%S"))
    }

    /// Export report to JSON file
    pub fn export_json(&self, path: &Path) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        let mut file = File::create(path)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }

    /// Export report to JSON string
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
