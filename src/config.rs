//! Configuration management for keyfuse
//!
//! Provides persistent configuration that is saved to and loaded from a
//! platform-specific config file.
//!
//! ## Config File Locations
//!
//! | Platform | Path |
//! |----------|------|
//! | Linux | `~/.config/keyfuse/config.toml` |
//! | macOS | `~/Library/Application Support/keyfuse/config.toml` |
//! | Windows | `%APPDATA%\keyfuse\config.toml` |
//!
//! ## Example
//!
//! ```no_run
//! use keyfuse::config::{Config, Weighting};
//!
//! let mut config = Config::load().unwrap_or_default();
//! config.weighting = Weighting::Recency;
//! config.save().expect("Failed to save config");
//! ```

use crate::keyboard::LogicalKey;
use crate::model::Mode;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Error type for configuration operations
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to determine config directory
    #[error("Could not determine config directory")]
    NoConfigDir,
    /// IO error reading or writing config file
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    /// Failed to parse config file
    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),
    /// Failed to serialize config
    #[error("Serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
    /// A value parsed but is outside its allowed range
    #[error("Invalid value: {0}")]
    Invalid(String),
}

/// Directory holding keyfuse's config file, created on demand
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    let app_dir = dirs::config_dir()
        .ok_or(ConfigError::NoConfigDir)?
        .join("keyfuse");
    if !app_dir.exists() {
        fs::create_dir_all(&app_dir)?;
    }
    Ok(app_dir)
}

/// Returns the path to the config file.
///
/// Creates the config directory if it doesn't exist.
pub fn config_path() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join("config.toml"))
}

/// How contributing samples are weighted in `avg_ms`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Weighting {
    /// Uniform weights
    #[default]
    None,
    /// Each sample weighted by how many of the expected events it captured
    Completeness,
    /// Newest sample weighted highest, older ones decayed by `recency_decay`
    Recency,
}

/// How a sample that never reached a position is treated
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Impute {
    /// Running average of already-seen genuine values
    Average,
    /// The sample's own last value shifted by the consensus gap
    NearestNeighbor,
    /// Leave the sample out at that position
    #[default]
    Drop,
}

/// What happens to events past the expected length
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExtrasPolicy {
    /// Count them and move on
    #[default]
    Drop,
    /// List them in the aggregation report and log a warning
    Surface,
}

/// What playback does when offsets break Press/Release ordering
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConflictPolicy {
    /// Clamp offending actions to their predecessor's time
    #[default]
    Reorder,
    /// Refuse to start playback
    Refuse,
}

/// Capture backend selection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// evdev on Linux when accessible, polling otherwise
    #[default]
    Auto,
    Evdev,
    Polling,
}

/// Color theme options
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Theme {
    Dark,
    Light,
}

/// Explicit expected occurrence count for one key+mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpectedCount {
    pub key: LogicalKey,
    pub mode: Mode,
    pub count: u32,
}

/// Main application configuration
///
/// The top-level fields are the aggregation settings plus per-key playback
/// offsets; the remaining sections tune capture, playback and the terminal UI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Outlier threshold in standard deviations
    pub outlier_k: f64,
    pub weighting: Weighting,
    pub impute: Impute,
    #[serde(default)]
    pub extras: ExtrasPolicy,
    /// Per-step decay for `Weighting::Recency`, in (0, 1]
    #[serde(default = "default_recency_decay")]
    pub recency_decay: f64,
    /// Lower bound on the spread used by the outlier test, in ms
    #[serde(default = "default_min_spread")]
    pub outlier_min_spread_ms: f64,
    /// Per-key playback offset in ms (may be negative)
    #[serde(default)]
    pub offsets: BTreeMap<LogicalKey, i64>,
    /// Explicit expected lengths; unlisted key+modes use the longest sample
    #[serde(default)]
    pub expected: Vec<ExpectedCount>,
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub playback: PlaybackConfig,
    #[serde(default)]
    pub hotkeys: HotkeyConfig,
    #[serde(default)]
    pub ui: UiConfig,
}

fn default_recency_decay() -> f64 {
    0.8
}

fn default_min_spread() -> f64 {
    5.0
}

impl Default for Config {
    fn default() -> Self {
        Self {
            outlier_k: 3.0,
            weighting: Weighting::None,
            impute: Impute::Drop,
            extras: ExtrasPolicy::Drop,
            recency_decay: default_recency_decay(),
            outlier_min_spread_ms: default_min_spread(),
            offsets: BTreeMap::new(),
            expected: Vec::new(),
            capture: CaptureConfig::default(),
            playback: PlaybackConfig::default(),
            hotkeys: HotkeyConfig::default(),
            ui: UiConfig::default(),
        }
    }
}

/// Input capture configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// Keys recorded during a session
    pub tracked_keys: Vec<LogicalKey>,
    pub backend: Backend,
    /// Capacity of the hook-to-recorder queue
    pub queue_capacity: usize,
    /// Poll interval for the polling backend, in microseconds
    pub poll_interval_us: u64,
    /// Scancode overrides on top of the US-positional table
    #[serde(default)]
    pub layout_overrides: Vec<LayoutOverride>,
}

/// Maps one physical scancode to a logical key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayoutOverride {
    pub scancode: u16,
    pub key: LogicalKey,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            tracked_keys: ['a', 's', 'd', 'f', 'j', 'k', 'l']
                .into_iter()
                .map(LogicalKey::Char)
                .chain([LogicalKey::Space])
                .collect(),
            backend: Backend::Auto,
            queue_capacity: 1024,
            poll_interval_us: 1000,
            layout_overrides: Vec::new(),
        }
    }
}

/// Playback scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybackConfig {
    /// Offset applied to every key, in ms
    pub global_offset_ms: i64,
    /// Longest single wait before re-checking the clock and cancel flag
    pub tick_ms: u64,
    /// Busy-wait window before a deadline, in microseconds
    pub spin_threshold_us: u64,
    pub on_conflict: ConflictPolicy,
    /// Consecutive emit failures on one key that abort playback
    pub max_consecutive_failures: u32,
    /// Delay between the play request and the first scheduled action, in ms
    pub lead_in_ms: u64,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            global_offset_ms: 0,
            tick_ms: 5,
            spin_threshold_us: 500,
            on_conflict: ConflictPolicy::Reorder,
            max_consecutive_failures: 3,
            lead_in_ms: 3000,
        }
    }
}

/// System-wide record and play keys
///
/// These are read from the capture backend rather than the terminal, so
/// they work while the game window has focus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HotkeyConfig {
    pub enabled: bool,
    /// Starts and stops a take
    pub record: LogicalKey,
    /// Starts and stops playback of the timing map
    pub play: LogicalKey,
}

impl Default for HotkeyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            record: LogicalKey::F(9),
            play: LogicalKey::F(10),
        }
    }
}

/// UI configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UiConfig {
    /// Refresh rate for UI updates (in Hz)
    pub refresh_rate_hz: u32,
    /// Color theme (dark/light)
    pub theme: Theme,
    /// Write samples to the data dir after every recording
    pub autosave: bool,
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            refresh_rate_hz: 30,
            theme: Theme::Dark,
            autosave: true,
        }
    }
}

impl Config {
    /// Load configuration from the default config file.
    ///
    /// Returns the default configuration if the file doesn't exist.
    /// Returns an error if the file exists but cannot be parsed.
    pub fn load() -> Result<Self, ConfigError> {
        let path = config_path()?;

        if !path.exists() {
            return Ok(Self::default());
        }

        Self::load_from(&path)
    }

    /// Load configuration from a specific path.
    ///
    /// Values outside their range are rejected rather than silently used.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the numeric settings the aggregator and UI depend on
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.recency_decay > 0.0 && self.recency_decay <= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "recency_decay must be in (0, 1], got {}",
                self.recency_decay
            )));
        }
        if !(self.outlier_k >= 0.0) || self.outlier_k.is_infinite() {
            return Err(ConfigError::Invalid(format!(
                "outlier_k must be a finite value >= 0, got {}",
                self.outlier_k
            )));
        }
        if !(self.outlier_min_spread_ms >= 0.0) || self.outlier_min_spread_ms.is_infinite() {
            return Err(ConfigError::Invalid(format!(
                "outlier_min_spread_ms must be a finite value >= 0, got {}",
                self.outlier_min_spread_ms
            )));
        }
        if self.hotkeys.enabled && self.hotkeys.record == self.hotkeys.play {
            return Err(ConfigError::Invalid(format!(
                "hotkeys.record and hotkeys.play are both {}",
                self.hotkeys.record
            )));
        }
        Ok(())
    }

    /// Save configuration to the default config file.
    pub fn save(&self) -> Result<(), ConfigError> {
        let path = config_path()?;
        self.save_to(&path)
    }

    /// Save configuration to a specific path.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }

    /// Get UI refresh interval as Duration
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_micros(1_000_000 / self.ui.refresh_rate_hz.max(1) as u64)
    }

    /// Playback offset for `key`, global offset included
    pub fn offset_for(&self, key: LogicalKey) -> i64 {
        self.playback.global_offset_ms + self.offsets.get(&key).copied().unwrap_or(0)
    }

    /// Explicit expected length for a key+mode, if configured
    pub fn expected_for(&self, key: LogicalKey, mode: Mode) -> Option<u32> {
        self.expected
            .iter()
            .find(|e| e.key == key && e.mode == mode)
            .map(|e| e.count)
    }

    /// Set or clear (with 0) a per-key offset
    pub fn set_offset(&mut self, key: LogicalKey, offset_ms: i64) {
        if offset_ms == 0 {
            self.offsets.remove(&key);
        } else {
            self.offsets.insert(key, offset_ms);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    fn temp_config_path() -> PathBuf {
        env::temp_dir().join(format!("keyfuse-test-{}.toml", std::process::id()))
    }

    #[test]
    fn config_default_values() {
        let config = Config::default();
        assert_eq!(config.outlier_k, 3.0);
        assert_eq!(config.weighting, Weighting::None);
        assert_eq!(config.impute, Impute::Drop);
        assert_eq!(config.extras, ExtrasPolicy::Drop);
        assert_eq!(config.capture.tracked_keys.len(), 8);
        assert_eq!(config.playback.on_conflict, ConflictPolicy::Reorder);
        assert_eq!(config.playback.lead_in_ms, 3000);
        assert_eq!(config.hotkeys.record, LogicalKey::F(9));
        assert_eq!(config.hotkeys.play, LogicalKey::F(10));
        assert_eq!(config.ui.theme, Theme::Dark);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn config_refresh_interval() {
        let config = Config::default();
        // 30 Hz = 33333 microseconds per frame
        assert_eq!(config.refresh_interval().as_micros(), 33333);
    }

    #[test]
    fn offsets_include_global_offset() {
        let mut config = Config::default();
        config.playback.global_offset_ms = -10;
        config.set_offset(LogicalKey::Char('j'), 25);
        assert_eq!(config.offset_for(LogicalKey::Char('j')), 15);
        assert_eq!(config.offset_for(LogicalKey::Char('k')), -10);

        config.set_offset(LogicalKey::Char('j'), 0);
        assert!(config.offsets.is_empty());
    }

    #[test]
    fn config_save_and_load_roundtrip() {
        let path = temp_config_path();

        let mut config = Config::default();
        config.weighting = Weighting::Completeness;
        config.impute = Impute::NearestNeighbor;
        config.set_offset(LogicalKey::Space, -12);
        config.expected.push(ExpectedCount {
            key: LogicalKey::Char('d'),
            mode: Mode::Press,
            count: 4,
        });
        config.capture.layout_overrides.push(LayoutOverride {
            scancode: 16,
            key: LogicalKey::Char('a'),
        });

        config.save_to(&path).expect("Failed to save config");
        let loaded = Config::load_from(&path).expect("Failed to load config");

        assert_eq!(loaded.weighting, Weighting::Completeness);
        assert_eq!(loaded.impute, Impute::NearestNeighbor);
        assert_eq!(loaded.offsets.get(&LogicalKey::Space), Some(&-12));
        assert_eq!(loaded.expected_for(LogicalKey::Char('d'), Mode::Press), Some(4));
        assert_eq!(loaded.capture.layout_overrides[0].scancode, 16);
        assert_eq!(loaded.capture.layout_overrides[0].key, LogicalKey::Char('a'));

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn config_load_missing_file_is_error() {
        let path = PathBuf::from("/nonexistent/path/config.toml");
        assert!(Config::load_from(&path).is_err());
    }

    #[test]
    fn config_deserializes_minimal_toml() {
        let toml_str = r#"
outlier_k = 2.0
weighting = "Recency"
impute = "Average"

[offsets]
space = 8
j = -4
"#;

        let config: Config = toml::from_str(toml_str).expect("Failed to deserialize");

        assert_eq!(config.outlier_k, 2.0);
        assert_eq!(config.weighting, Weighting::Recency);
        assert_eq!(config.impute, Impute::Average);
        assert_eq!(config.recency_decay, 0.8);
        assert_eq!(config.offsets.get(&LogicalKey::Space), Some(&8));
        assert_eq!(config.offsets.get(&LogicalKey::Char('j')), Some(&-4));
        assert_eq!(config.capture.queue_capacity, 1024);
    }

    #[test]
    fn config_serializes_sections() {
        let toml_str = toml::to_string_pretty(&Config::default()).expect("Failed to serialize");
        assert!(toml_str.contains("outlier_k = 3.0"));
        assert!(toml_str.contains("[capture]"));
        assert!(toml_str.contains("[playback]"));
        assert!(toml_str.contains("backend = \"auto\""));
    }

    #[test]
    fn out_of_range_decay_is_rejected_on_load() {
        for (name, body) in [
            ("negative", "recency_decay = -0.5"),
            ("amplifying", "recency_decay = 2.0"),
            ("zero", "recency_decay = 0.0"),
        ] {
            let path = env::temp_dir().join(format!("keyfuse-decay-{}-{}.toml", name, std::process::id()));
            let contents = format!("outlier_k = 3.0\nweighting = \"Recency\"\nimpute = \"Drop\"\n{}\n", body);
            fs::write(&path, contents).unwrap();
            let result = Config::load_from(&path);
            let _ = fs::remove_file(&path);
            match result {
                Err(ConfigError::Invalid(msg)) => assert!(msg.contains("recency_decay"), "{}", msg),
                other => panic!("{} decay loaded: {:?}", name, other),
            }
        }
    }

    #[test]
    fn negative_outlier_k_is_rejected() {
        let mut config = Config::default();
        config.outlier_k = -1.0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
        config.outlier_k = f64::NAN;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
        config.outlier_k = 0.0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn hotkeys_must_differ() {
        let mut config = Config::default();
        config.hotkeys.play = config.hotkeys.record;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
        config.hotkeys.enabled = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn config_error_display() {
        let err = ConfigError::NoConfigDir;
        assert_eq!(err.to_string(), "Could not determine config directory");

        let io_err = ConfigError::Io(io::Error::new(io::ErrorKind::NotFound, "file not found"));
        assert!(io_err.to_string().contains("IO error"));
    }
}
