//! Session state machine wiring capture, recording, aggregation and playback

use crate::aggregate::{AggregationReport, Engine};
use crate::capture::{CaptureService, CaptureStats, KeyTransition, Sink};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::hotkeys::{HotkeyListener, HotkeyPress};
use crate::keyboard::{KeySource, LogicalKey};
use crate::model::{Sample, SampleSummary, TimingMap};
use crate::playback::{build_schedule, EmitError, Finished, OutputEmitter, PlaybackReport, Schedule, Scheduler};
use crate::recorder::{Recorder, RecordingSummary, SampleStore};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

/// What the session is currently doing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    Idle,
    Recording,
    Playing,
    /// A background rebuild is running and nothing else is
    Rebuilding,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Idle => "idle",
            SessionState::Recording => "recording",
            SessionState::Playing => "playing",
            SessionState::Rebuilding => "rebuilding",
        };
        f.write_str(s)
    }
}

struct ActivePlayback {
    scheduler: Scheduler,
    /// Whether the emitter belongs to the session and must be put back
    own_emitter: bool,
}

/// Things `poll` noticed since the last call
#[derive(Debug, Default, Clone, PartialEq)]
pub struct PollOutcome {
    pub playback: Option<PlaybackReport>,
    pub rebuilt: bool,
    /// Global hotkey presses, oldest first
    pub hotkeys: Vec<HotkeyPress>,
}

/// Opens a replacement for a session emitter lost with its playback thread
pub type EmitterFactory = Box<dyn FnMut() -> std::result::Result<Box<dyn OutputEmitter>, EmitError> + Send>;

pub struct Session {
    config: Config,
    capture: CaptureService,
    recorder: Recorder,
    engine: Engine,
    emitter: Option<Box<dyn OutputEmitter>>,
    reopen_emitter: Option<EmitterFactory>,
    hotkeys: Option<HotkeyListener>,
    playback: Option<ActivePlayback>,
    last_capture: Option<CaptureStats>,
    last_playback: Option<PlaybackReport>,
}

impl Session {
    pub fn new(config: Config, source: Box<dyn KeySource>, emitter: Box<dyn OutputEmitter>) -> Self {
        let capture = CaptureService::new(source, &config);
        Self {
            config,
            capture,
            recorder: Recorder::new(SampleStore::new()),
            engine: Engine::new(),
            emitter: Some(emitter),
            reopen_emitter: None,
            hotkeys: None,
            playback: None,
            last_capture: None,
            last_playback: None,
        }
    }

    pub fn state(&self) -> SessionState {
        if self.recorder.is_recording() {
            SessionState::Recording
        } else if self.playback.is_some() {
            SessionState::Playing
        } else if self.engine.is_rebuilding() {
            SessionState::Rebuilding
        } else {
            SessionState::Idle
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Replace the configuration. Capture settings apply from the next recording.
    pub fn set_config(&mut self, config: Config) -> Result<()> {
        match self.state() {
            SessionState::Recording => Err(Error::conflict(SessionState::Recording, "change configuration")),
            _ => {
                self.capture.reconfigure(&config);
                self.config = config;
                Ok(())
            }
        }
    }

    pub fn capture_backend(&self) -> &'static str {
        self.capture.source_name()
    }

    pub fn emitter_name(&self) -> Option<&'static str> {
        self.emitter.as_ref().map(|e| e.name())
    }

    /// How to reopen the session emitter if a playback thread dies with it
    pub fn set_emitter_factory(&mut self, factory: EmitterFactory) {
        self.reopen_emitter = Some(factory);
    }

    /// Route global hotkey presses through `poll`
    pub fn attach_hotkeys(&mut self, listener: HotkeyListener) {
        self.hotkeys = Some(listener);
    }

    /// Whether `key` is delivered as a global hotkey
    pub fn is_hotkey(&self, key: LogicalKey) -> bool {
        self.hotkeys.as_ref().map_or(false, |h| h.is_bound(key))
    }

    pub fn hotkeys_active(&self) -> bool {
        self.hotkeys.is_some()
    }

    /// Begin a recording whose deltas are measured from `epoch`
    pub fn start_recording(&mut self, epoch: Instant) -> Result<()> {
        match self.state() {
            SessionState::Idle => {}
            SessionState::Recording => return Err(Error::AlreadyRecording),
            state => return Err(Error::conflict(state, "start recording")),
        }

        self.recorder.start(epoch)?;
        let recorder = self.recorder.clone();
        let sink: Sink = Box::new(move |t: KeyTransition| {
            recorder.record(t.key, t.mode, t.at);
        });
        if let Err(e) = self.capture.register(&self.config.capture.tracked_keys, sink) {
            self.recorder.abort();
            log::warn!("[SESSION] capture failed to start: {}", e);
            return Err(e);
        }
        Ok(())
    }

    /// Stop capture and seal the recording into the store
    pub fn stop_recording(&mut self) -> Result<RecordingSummary> {
        if !self.recorder.is_recording() {
            return Err(Error::NotRecording);
        }
        // Drain capture first so the last transitions land in the buffer
        self.last_capture = self.capture.stop();
        self.recorder.stop()
    }

    pub fn last_capture(&self) -> Option<CaptureStats> {
        self.last_capture
    }

    /// Remove every stored sample
    pub fn clear(&mut self) -> Result<usize> {
        self.ensure_not_recording("clear samples")?;
        Ok(self.recorder.clear())
    }

    pub fn delete_sample(&mut self, id: u64) -> Result<()> {
        self.ensure_not_recording("delete a sample")?;
        self.recorder.delete(id)
    }

    /// Replace the store with persisted samples
    pub fn restore_samples(&mut self, samples: Vec<Sample>) -> Result<()> {
        self.ensure_not_recording("restore samples")?;
        self.recorder.restore(samples);
        Ok(())
    }

    /// Install a timing map loaded from disk
    pub fn install_map(&mut self, map: TimingMap) -> Result<()> {
        self.ensure_not_recording("load a timing map")?;
        self.engine.wait();
        self.engine.install(map);
        Ok(())
    }

    fn ensure_not_recording(&self, operation: &'static str) -> Result<()> {
        if self.recorder.is_recording() {
            Err(Error::conflict(SessionState::Recording, operation))
        } else {
            Ok(())
        }
    }

    /// Recompute the timing map on the calling thread
    pub fn rebuild(&mut self) -> Result<&AggregationReport> {
        self.ensure_not_recording("rebuild")?;
        self.engine.wait();
        let snapshot = self.recorder.store().snapshot();
        Ok(self.engine.rebuild(&snapshot, &self.config))
    }

    /// Recompute the timing map on a worker thread
    ///
    /// Returns false when a rebuild is already running.
    pub fn spawn_rebuild(&mut self) -> Result<bool> {
        self.ensure_not_recording("rebuild")?;
        let snapshot = self.recorder.store().snapshot();
        Ok(self.engine.spawn_rebuild(snapshot, self.config.clone())?)
    }

    /// Play the current timing map on the session emitter
    pub fn play(&mut self, start: Instant) -> Result<usize> {
        self.check_can_play()?;
        let schedule = build_schedule(&self.engine.map(), &self.config)?;
        let emitter = self.take_emitter()?;
        self.launch(start, schedule, emitter, true)
    }

    /// Play one stored take as recorded, through the same scheduler
    ///
    /// Offsets and the conflict policy apply as they do to the timing map.
    pub fn play_sample(&mut self, id: u64, start: Instant) -> Result<usize> {
        self.check_can_play()?;
        let sample = self.recorder.store().get(id).ok_or(Error::UnknownSample(id))?;
        let schedule = build_schedule(&TimingMap::from(sample.as_ref()), &self.config)?;
        let emitter = self.take_emitter()?;
        log::info!("[SESSION] playing sample {} ({} events)", id, sample.events().len());
        self.launch(start, schedule, emitter, true)
    }

    fn take_emitter(&mut self) -> Result<Box<dyn OutputEmitter>> {
        if let Some(emitter) = self.emitter.take() {
            return Ok(emitter);
        }
        let factory = self
            .reopen_emitter
            .as_mut()
            .ok_or_else(|| EmitError::Unavailable("no output emitter".into()))?;
        let emitter = factory()?;
        log::info!("[SESSION] reopened {} emitter", emitter.name());
        Ok(emitter)
    }

    /// Play the current timing map on a one-off emitter, such as a dry run
    pub fn play_with(&mut self, start: Instant, emitter: Box<dyn OutputEmitter>) -> Result<usize> {
        self.check_can_play()?;
        let schedule = build_schedule(&self.engine.map(), &self.config)?;
        self.launch(start, schedule, emitter, false)
    }

    fn check_can_play(&mut self) -> Result<()> {
        match self.state() {
            SessionState::Recording => Err(Error::conflict(SessionState::Recording, "start playback")),
            SessionState::Playing => Err(Error::conflict(SessionState::Playing, "start playback")),
            SessionState::Rebuilding => {
                // Play what the pending rebuild produces
                self.engine.wait();
                Ok(())
            }
            SessionState::Idle => Ok(()),
        }
    }

    fn launch(
        &mut self,
        start: Instant,
        schedule: Schedule,
        emitter: Box<dyn OutputEmitter>,
        own_emitter: bool,
    ) -> Result<usize> {
        let scheduler = Scheduler::spawn(start, schedule, &self.config, emitter)?;
        let scheduled = scheduler.scheduled();
        self.playback = Some(ActivePlayback {
            scheduler,
            own_emitter,
        });
        Ok(scheduled)
    }

    /// Cancel playback; held keys are released before this returns
    pub fn stop_playback(&mut self) -> Option<PlaybackReport> {
        let active = self.playback.take()?;
        let own = active.own_emitter;
        self.finish(active.scheduler.stop(), own)
    }

    fn finish(&mut self, finished: Option<Finished>, own_emitter: bool) -> Option<PlaybackReport> {
        let Some(finished) = finished else {
            if own_emitter {
                log::error!("[SESSION] output emitter lost with the playback thread; reopening on next play");
            }
            return None;
        };
        if own_emitter {
            self.emitter = Some(finished.emitter);
        }
        self.last_playback = Some(finished.report.clone());
        Some(finished.report)
    }

    /// Collect a finished playback and a finished background rebuild
    pub fn poll(&mut self) -> PollOutcome {
        let mut outcome = PollOutcome {
            rebuilt: self.engine.poll(),
            hotkeys: self.hotkeys.as_ref().map(HotkeyListener::drain).unwrap_or_default(),
            ..PollOutcome::default()
        };
        if self
            .playback
            .as_ref()
            .map_or(false, |p| p.scheduler.is_finished())
        {
            if let Some(active) = self.playback.take() {
                let own = active.own_emitter;
                outcome.playback = self.finish(active.scheduler.join(), own);
            }
        }
        outcome
    }

    pub fn last_playback(&self) -> Option<&PlaybackReport> {
        self.last_playback.as_ref()
    }

    pub fn sample_summaries(&self) -> Vec<SampleSummary> {
        self.recorder.store().summaries()
    }

    pub fn samples(&self) -> Vec<Arc<Sample>> {
        self.recorder.store().snapshot()
    }

    pub fn timing_map(&self) -> Arc<TimingMap> {
        self.engine.map()
    }

    pub fn aggregation_report(&self) -> &AggregationReport {
        self.engine.report()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.stop_playback();
        self.capture.stop();
    }
}
