//! Main application state and logic

use super::ThemeColors;
use crate::config::Theme;
use crate::error::{Error, Result};
use crate::hotkeys::{HotkeyAction, HotkeyPress};
use crate::playback::{MemoryEmitter, PlaybackOutcome, PlaybackReport};
use crate::report::SessionReport;
use crate::session::{Session, SessionState};
use crate::store;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Current view/tab in the application
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppView {
    Samples,
    TimingMap,
    Help,
}

impl AppView {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Samples => "Samples",
            Self::TimingMap => "Timing Map",
            Self::Help => "Help",
        }
    }

    pub fn all() -> &'static [AppView] {
        &[Self::Samples, Self::TimingMap, Self::Help]
    }

    pub fn index(&self) -> usize {
        match self {
            Self::Samples => 0,
            Self::TimingMap => 1,
            Self::Help => 2,
        }
    }

    pub fn from_index(index: usize) -> Self {
        match index {
            0 => Self::Samples,
            1 => Self::TimingMap,
            _ => Self::Help,
        }
    }
}

/// Application running state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppState {
    Running,
    Quitting,
}

/// Main application
pub struct App {
    pub view: AppView,
    pub state: AppState,
    pub session: Session,
    pub colors: ThemeColors,
    /// Index into the sample list
    pub selected: usize,
    /// Where samples, maps and reports are written; `None` disables files
    pub data_dir: Option<PathBuf>,
    /// Application start time
    pub start_time: Instant,
    /// Last status message
    pub status_message: Option<String>,
    /// Status message timestamp
    pub status_time: Option<Instant>,
    theme: Theme,
    /// Recording since, for the elapsed clock
    recording_since: Option<Instant>,
}

impl App {
    pub fn new(session: Session, data_dir: Option<PathBuf>) -> Self {
        let theme = session.config().ui.theme;
        Self {
            view: AppView::Samples,
            state: AppState::Running,
            session,
            colors: ThemeColors::from_theme(theme),
            selected: 0,
            data_dir,
            start_time: Instant::now(),
            status_message: None,
            status_time: None,
            theme,
            recording_since: None,
        }
    }

    /// Start a take, or stop the current one and rebuild in the background
    pub fn toggle_recording(&mut self) {
        self.toggle_recording_at(Instant::now());
    }

    /// Like [`toggle_recording`](Self::toggle_recording), with a new take's
    /// deltas measured from `epoch`
    pub fn toggle_recording_at(&mut self, epoch: Instant) {
        if self.session.state() == SessionState::Recording {
            self.stop_recording();
            return;
        }
        match self.session.start_recording(epoch) {
            Ok(()) => {
                self.recording_since = Some(epoch);
                let hint = if self.session.hotkeys_active() {
                    self.session.config().hotkeys.record.label()
                } else {
                    "r".to_string()
                };
                self.set_status(format!("Recording... press {} to stop", hint));
            }
            Err(e) => self.report_error(e),
        }
    }

    fn stop_recording(&mut self) {
        self.recording_since = None;
        match self.session.stop_recording() {
            Ok(summary) => {
                self.set_status(format!(
                    "Sample #{}: {} events, {:.2} s",
                    summary.id,
                    summary.event_count,
                    summary.duration_ms as f64 / 1000.0
                ));
                self.selected = self.session.sample_summaries().len().saturating_sub(1);
                if let Err(e) = self.session.spawn_rebuild() {
                    self.report_error(e);
                }
                if self.session.config().ui.autosave {
                    if let Err(e) = self.write_samples() {
                        log::warn!("[SESSION] autosave failed: {}", e);
                    }
                }
            }
            Err(e) => self.report_error(e),
        }
    }

    /// Rebuild the timing map now
    pub fn rebuild(&mut self) {
        match self.session.rebuild() {
            Ok(report) => {
                let msg = format!(
                    "Rebuilt from {} samples: {} rejected, {} imputed",
                    report.sample_count, report.rejected_count, report.imputed_count
                );
                self.set_status(msg);
            }
            Err(e) => self.report_error(e),
        }
    }

    /// Start playback after the configured lead-in, or stop it
    pub fn toggle_playback(&mut self) {
        self.toggle_playback_at(Instant::now());
    }

    /// Like [`toggle_playback`](Self::toggle_playback), with the lead-in
    /// counted from `requested`
    pub fn toggle_playback_at(&mut self, requested: Instant) {
        if self.stop_running_playback() {
            return;
        }
        match self.session.play(requested + self.lead_in()) {
            Ok(0) => self.set_status("Timing map has no playable entries".to_string()),
            Ok(n) => self.set_status(format!("Playing {} actions in {:.1} s...", n, self.lead_in().as_secs_f64())),
            Err(e) => self.report_error(e),
        }
    }

    /// Play the selected take on its own, after the lead-in
    pub fn play_selected(&mut self) {
        if self.stop_running_playback() {
            return;
        }
        let Some(id) = self.session.sample_summaries().get(self.selected).map(|s| s.id) else {
            self.set_status("No sample selected".to_string());
            return;
        };
        match self.session.play_sample(id, Instant::now() + self.lead_in()) {
            Ok(n) => self.set_status(format!("Playing sample #{}: {} actions...", id, n)),
            Err(e) => self.report_error(e),
        }
    }

    fn stop_running_playback(&mut self) -> bool {
        if self.session.state() != SessionState::Playing {
            return false;
        }
        if let Some(report) = self.session.stop_playback() {
            self.playback_finished(&report);
        }
        true
    }

    fn lead_in(&self) -> Duration {
        Duration::from_millis(self.session.config().playback.lead_in_ms)
    }

    /// Run the schedule against an in-memory emitter
    pub fn dry_run(&mut self) {
        match self.session.play_with(Instant::now(), Box::new(MemoryEmitter::new())) {
            Ok(n) => self.set_status(format!("Dry run: {} actions", n)),
            Err(e) => self.report_error(e),
        }
    }

    pub fn clear_samples(&mut self) {
        match self.session.clear() {
            Ok(n) => {
                self.selected = 0;
                self.set_status(format!("Cleared {} samples", n));
                if let Err(e) = self.session.spawn_rebuild() {
                    self.report_error(e);
                }
            }
            Err(e) => self.report_error(e),
        }
    }

    pub fn delete_selected(&mut self) {
        let Some(id) = self.session.sample_summaries().get(self.selected).map(|s| s.id) else {
            return;
        };
        match self.session.delete_sample(id) {
            Ok(()) => {
                self.selected = self.selected.min(self.session.sample_summaries().len().saturating_sub(1));
                self.set_status(format!("Deleted sample #{}", id));
                if let Err(e) = self.session.spawn_rebuild() {
                    self.report_error(e);
                }
            }
            Err(e) => self.report_error(e),
        }
    }

    pub fn save_samples(&mut self) {
        match self.write_samples() {
            Ok(Some(path)) => self.set_status(format!("Saved to {}", path.display())),
            Ok(None) => self.set_status("No data directory".to_string()),
            Err(e) => self.report_error(e),
        }
    }

    fn write_samples(&self) -> Result<Option<PathBuf>> {
        let Some(dir) = &self.data_dir else {
            return Ok(None);
        };
        let path = dir.join(store::SAMPLES_FILE);
        store::save_samples(&path, &self.session.samples())?;
        Ok(Some(path))
    }

    /// Replace the stored samples with the ones saved in the data dir
    pub fn reload_samples(&mut self) {
        let Some(dir) = self.data_dir.clone() else {
            self.set_status("No data directory".to_string());
            return;
        };
        let result = store::load_samples(&dir.join(store::SAMPLES_FILE))
            .and_then(|samples| {
                let n = samples.len();
                self.session.restore_samples(samples)?;
                self.session.spawn_rebuild()?;
                Ok(n)
            });
        match result {
            Ok(n) => {
                self.selected = 0;
                self.set_status(format!("Loaded {} samples", n));
            }
            Err(e) => self.report_error(e),
        }
    }

    /// Replace the timing map with the last exported one
    pub fn load_timing_map(&mut self) {
        let Some(dir) = self.data_dir.clone() else {
            self.set_status("No data directory".to_string());
            return;
        };
        let result = store::load_timing_map(&dir.join(store::TIMING_MAP_FILE))
            .and_then(|map| {
                let n = map.len();
                self.session.install_map(map)?;
                Ok(n)
            });
        match result {
            Ok(n) => self.set_status(format!("Loaded timing map: {} entries", n)),
            Err(e) => self.report_error(e),
        }
    }

    /// Export the timing map and a session report
    pub fn export(&mut self) {
        let Some(dir) = self.data_dir.clone() else {
            self.set_status("No data directory".to_string());
            return;
        };
        let map = self.session.timing_map();
        let result = store::export_timing_map(&dir.join(store::TIMING_MAP_FILE), &map)
            .and_then(|_| self.export_report(&dir.join(SessionReport::default_file_name())).map_err(Error::from));
        match result {
            Ok(()) => self.set_status(format!("Exported to {}", dir.display())),
            Err(e) => self.report_error(e),
        }
    }

    /// Generate a report of the current session
    pub fn generate_report(&self) -> SessionReport {
        SessionReport::new(
            self.session.sample_summaries(),
            self.session.aggregation_report().clone(),
            self.session.last_playback().cloned(),
            self.session.timing_map().as_ref().clone(),
        )
    }

    /// Export report to a JSON file
    pub fn export_report(&self, path: &Path) -> std::io::Result<()> {
        self.generate_report().export_json(path)
    }

    /// Collect finished background work and act on hotkeys; call once per frame
    pub fn tick(&mut self) {
        let outcome = self.session.poll();
        if let Some(report) = outcome.playback {
            self.playback_finished(&report);
        } else if outcome.rebuilt {
            let map = self.session.timing_map();
            self.set_status(format!("Timing map rebuilt: {} entries", map.len()));
        }
        for press in outcome.hotkeys {
            self.hotkey(press);
        }
    }

    fn hotkey(&mut self, press: HotkeyPress) {
        log::debug!("[SESSION] hotkey {:?}", press.action);
        match press.action {
            HotkeyAction::ToggleRecording => self.toggle_recording_at(press.at),
            HotkeyAction::TogglePlayback => self.toggle_playback_at(press.at),
        }
    }

    fn playback_finished(&mut self, report: &PlaybackReport) {
        let msg = match report.outcome {
            PlaybackOutcome::Completed => format!(
                "Played {} actions, worst {:.1} ms late",
                report.fired,
                report.late_max_us as f64 / 1000.0
            ),
            PlaybackOutcome::Stopped => format!(
                "Stopped after {} actions, released {}",
                report.fired, report.compensating_releases
            ),
            PlaybackOutcome::Aborted { key } => {
                format!("Aborted: {} kept failing ({} failures)", key.label(), report.emit_failures)
            }
        };
        self.set_status(msg);
    }

    fn report_error(&mut self, error: Error) {
        log::warn!("[SESSION] {}", error);
        self.set_status(format!("Error: {}", error));
    }

    pub fn select_next(&mut self) {
        let len = self.session.sample_summaries().len();
        if len > 0 {
            self.selected = (self.selected + 1).min(len - 1);
        }
    }

    pub fn select_prev(&mut self) {
        self.selected = self.selected.saturating_sub(1);
    }

    /// Switch between dark and light palettes
    pub fn cycle_theme(&mut self) {
        self.theme = match self.theme {
            Theme::Dark => Theme::Light,
            Theme::Light => Theme::Dark,
        };
        self.colors = ThemeColors::from_theme(self.theme);
    }

    pub fn theme(&self) -> Theme {
        self.theme
    }

    /// Switch to the next view
    pub fn next_view(&mut self) {
        let next = (self.view.index() + 1) % AppView::all().len();
        self.view = AppView::from_index(next);
    }

    /// Switch to the previous view
    pub fn prev_view(&mut self) {
        let current = self.view.index();
        let prev = if current == 0 {
            AppView::all().len() - 1
        } else {
            current - 1
        };
        self.view = AppView::from_index(prev);
    }

    /// Request quit; playback is stopped so no key stays held
    pub fn quit(&mut self) {
        if self.session.state() == SessionState::Recording {
            self.stop_recording();
        }
        self.session.stop_playback();
        self.state = AppState::Quitting;
    }

    /// Set a status message
    pub fn set_status(&mut self, message: String) {
        self.status_message = Some(message);
        self.status_time = Some(Instant::now());
    }

    /// Get status message if still valid (within 3 seconds)
    pub fn get_status(&self) -> Option<&str> {
        match (&self.status_message, self.status_time) {
            (Some(msg), Some(time)) if time.elapsed().as_secs() < 3 => Some(msg),
            _ => None,
        }
    }

    /// Elapsed time as MM:SS; counts the current take while recording
    pub fn elapsed_formatted(&self) -> String {
        let since = self.recording_since.unwrap_or(self.start_time);
        let secs = since.elapsed().as_secs();
        format!("{:02}:{:02}", secs / 60, secs % 60)
    }

    pub fn state_label(&self) -> &'static str {
        match self.session.state() {
            SessionState::Idle => "IDLE",
            SessionState::Recording => "RECORDING",
            SessionState::Playing => "PLAYING",
            SessionState::Rebuilding => "REBUILDING",
        }
    }
}
