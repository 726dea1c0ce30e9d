//! Integration tests for keyfuse
//!
//! These drive a full `Session` through the public API: keys enter through a
//! manual capture source, samples are fused into a timing map and played back
//! into an in-memory emitter.

use keyfuse::config::{Config, Impute};
use keyfuse::keyboard::{KeyCode, ManualSource};
use keyfuse::model::{Event, Mode, Sample, TimingMap, TimingMapEntry};
use keyfuse::playback::{KeyAction, MemoryEmitter, PlaybackOutcome, PlaybackReport};
use keyfuse::session::{Session, SessionState};
use keyfuse::{store, Error, LogicalKey};
use std::time::{Duration, Instant};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

const F: KeyCode = KeyCode(33);
const J: KeyCode = KeyCode(36);

fn key(c: char) -> LogicalKey {
    LogicalKey::Char(c)
}

fn session_with(config: Config) -> (Session, ManualSource, MemoryEmitter) {
    let feed = ManualSource::new();
    let out = MemoryEmitter::new();
    let session = Session::new(config, Box::new(feed.clone()), Box::new(out.clone()));
    (session, feed, out)
}

fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}

/// Record one take; `taps` are (scancode, down_ms, up_ms) from the epoch
fn record_take(session: &mut Session, feed: &ManualSource, taps: &[(KeyCode, u64, u64)]) -> u64 {
    let epoch = Instant::now();
    session.start_recording(epoch).unwrap();
    let mut transitions: Vec<(u64, KeyCode, bool)> = Vec::new();
    for &(code, down, up) in taps {
        transitions.push((down, code, true));
        transitions.push((up, code, false));
    }
    transitions.sort_by_key(|t| t.0);
    for (at, code, down) in transitions {
        if down {
            feed.down(code, epoch + ms(at));
        } else {
            feed.up(code, epoch + ms(at));
        }
    }
    session.stop_recording().unwrap().id
}

fn presses(id: u64, c: char, deltas: &[u64]) -> Sample {
    let events = deltas.iter().map(|d| Event::new(key(c), Mode::Press, *d)).collect();
    Sample::new(id, 0, events).unwrap()
}

fn entry(c: char, mode: Mode, position_index: u32, avg_ms: f64) -> TimingMapEntry {
    TimingMapEntry {
        key: key(c),
        mode,
        position_index,
        avg_ms: Some(avg_ms),
        median_ms: Some(avg_ms),
        std_ms: Some(0.0),
        sample_count: 1,
        rejected_count: 0,
        imputed_count: 0,
    }
}

/// Poll until the running playback hands back its report
fn wait_for_playback(session: &mut Session) -> PlaybackReport {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if let Some(report) = session.poll().playback {
            return report;
        }
        std::thread::sleep(ms(2));
    }
    panic!("playback did not finish");
}

// ---------------------------------------------------------------------------
// Recording
// ---------------------------------------------------------------------------

#[test]
fn recorded_take_keeps_deltas_from_the_epoch() {
    let (mut session, feed, _) = session_with(Config::default());
    record_take(&mut session, &feed, &[(F, 10, 30), (J, 20, 45)]);

    let samples = session.samples();
    assert_eq!(samples.len(), 1);
    let events: Vec<(LogicalKey, Mode, u64)> = samples[0]
        .events()
        .iter()
        .map(|e| (e.key, e.mode, e.delta_ms))
        .collect();
    assert_eq!(
        events,
        vec![
            (key('f'), Mode::Press, 10),
            (key('j'), Mode::Press, 20),
            (key('f'), Mode::Release, 30),
            (key('j'), Mode::Release, 45),
        ]
    );
}

#[test]
fn recording_is_mutually_exclusive() {
    let (mut session, _feed, _) = session_with(Config::default());
    session.start_recording(Instant::now()).unwrap();
    assert_eq!(session.state(), SessionState::Recording);

    assert!(matches!(session.start_recording(Instant::now()), Err(Error::AlreadyRecording)));
    assert!(matches!(
        session.play(Instant::now()),
        Err(Error::StateConflict {
            state: SessionState::Recording,
            ..
        })
    ));
    assert!(matches!(session.clear(), Err(Error::StateConflict { .. })));

    session.stop_recording().unwrap();
    assert!(matches!(session.stop_recording(), Err(Error::NotRecording)));
    assert_eq!(session.state(), SessionState::Idle);
}

#[test]
fn unavailable_capture_leaves_session_idle() {
    let session_source = ManualSource::unavailable("hook refused");
    let mut session = Session::new(
        Config::default(),
        Box::new(session_source),
        Box::new(MemoryEmitter::new()),
    );
    assert!(matches!(
        session.start_recording(Instant::now()),
        Err(Error::CaptureUnavailable(_))
    ));
    assert_eq!(session.state(), SessionState::Idle);
    assert!(session.samples().is_empty());
}

// ---------------------------------------------------------------------------
// Aggregation
// ---------------------------------------------------------------------------

#[test]
fn takes_align_by_ordinal_position() {
    let (mut session, _feed, _) = session_with(Config::default());
    session
        .restore_samples(vec![presses(1, 'a', &[100, 200]), presses(2, 'a', &[105, 195, 300])])
        .unwrap();
    session.rebuild().unwrap();

    let map = session.timing_map();
    assert_eq!(map.get(key('a'), Mode::Press, 0).unwrap().avg_ms, Some(102.5));
    assert_eq!(map.get(key('a'), Mode::Press, 1).unwrap().avg_ms, Some(197.5));
    let tail = map.get(key('a'), Mode::Press, 2).unwrap();
    assert_eq!(tail.avg_ms, Some(300.0));
    assert_eq!(tail.sample_count, 1);
}

#[test]
fn outlier_take_does_not_move_the_consensus() {
    let config = Config {
        outlier_k: 2.0,
        ..Config::default()
    };
    let (mut session, _feed, _) = session_with(config);
    session
        .restore_samples(vec![
            presses(1, 'a', &[100]),
            presses(2, 'a', &[102]),
            presses(3, 'a', &[101]),
            presses(4, 'a', &[500]),
        ])
        .unwrap();
    let report = session.rebuild().unwrap().clone();
    assert_eq!(report.rejected_count, 1);

    let entry = session.timing_map().get(key('a'), Mode::Press, 0).cloned().unwrap();
    assert_eq!(entry.avg_ms, Some(101.0));
    assert_eq!(entry.rejected_count, 1);
}

#[test]
fn average_imputation_stays_between_genuine_values() {
    let config = Config {
        impute: Impute::Average,
        ..Config::default()
    };
    let (mut session, _feed, _) = session_with(config);
    session
        .restore_samples(vec![
            presses(1, 'a', &[100, 200]),
            presses(2, 'a', &[100]),
            presses(3, 'a', &[100, 220]),
        ])
        .unwrap();
    session.rebuild().unwrap();

    let entry = session.timing_map().get(key('a'), Mode::Press, 1).cloned().unwrap();
    assert_eq!(entry.imputed_count, 1);
    let avg = entry.avg_ms.unwrap();
    assert!((200.0..=220.0).contains(&avg), "avg {} out of range", avg);
}

#[test]
fn rebuild_is_deterministic() {
    let samples = vec![
        presses(1, 'a', &[100, 210, 330]),
        presses(2, 'a', &[98, 205]),
        presses(3, 's', &[50]),
    ];

    let mut maps = Vec::new();
    for _ in 0..2 {
        let (mut session, _feed, _) = session_with(Config::default());
        session.restore_samples(samples.clone()).unwrap();
        session.rebuild().unwrap();
        maps.push(serde_json::to_string(session.timing_map().as_ref()).unwrap());
    }
    assert_eq!(maps[0], maps[1]);
}

#[test]
fn background_rebuild_reaches_the_session() {
    let (mut session, feed, _) = session_with(Config::default());
    record_take(&mut session, &feed, &[(F, 10, 30)]);
    assert!(session.spawn_rebuild().unwrap());

    let deadline = Instant::now() + Duration::from_secs(5);
    while session.state() == SessionState::Rebuilding && Instant::now() < deadline {
        session.poll();
        std::thread::sleep(ms(1));
    }
    session.poll();
    let map = session.timing_map();
    assert_eq!(map.get(key('f'), Mode::Press, 0).unwrap().avg_ms, Some(10.0));
    assert_eq!(map.get(key('f'), Mode::Release, 0).unwrap().avg_ms, Some(30.0));
}

// ---------------------------------------------------------------------------
// Playback
// ---------------------------------------------------------------------------

#[test]
fn playback_follows_offset_adjusted_order() {
    let mut config = Config::default();
    config.set_offset(key('f'), 15);
    let (mut session, feed, out) = session_with(config);
    record_take(&mut session, &feed, &[(F, 10, 30), (J, 20, 40)]);
    session.rebuild().unwrap();

    let start = Instant::now();
    assert_eq!(session.play(start).unwrap(), 4);
    assert_eq!(session.state(), SessionState::Playing);
    let report = wait_for_playback(&mut session);

    assert_eq!(report.outcome, PlaybackOutcome::Completed);
    assert_eq!(report.fired, 4);
    let fired: Vec<(LogicalKey, KeyAction)> = out.actions().iter().map(|a| (a.key, a.action)).collect();
    // f shifts from 10/30 to 25/45, behind j at 20/40
    assert_eq!(
        fired,
        vec![
            (key('j'), KeyAction::Down),
            (key('f'), KeyAction::Down),
            (key('j'), KeyAction::Up),
            (key('f'), KeyAction::Up),
        ]
    );
    for action in out.actions() {
        assert!(action.at >= start + ms(20));
    }
    assert_eq!(session.state(), SessionState::Idle);
}

#[test]
fn stop_releases_each_held_key_once() {
    let (mut session, _feed, out) = session_with(Config::default());
    session
        .install_map(TimingMap::from(vec![
            entry('f', Mode::Press, 0, 0.0),
            entry('f', Mode::Release, 0, 10_000.0),
        ]))
        .unwrap();

    session.play(Instant::now()).unwrap();
    let deadline = Instant::now() + Duration::from_secs(5);
    while out.actions().is_empty() && Instant::now() < deadline {
        std::thread::sleep(ms(1));
    }

    let report = session.stop_playback().unwrap();
    assert_eq!(report.outcome, PlaybackOutcome::Stopped);
    assert_eq!(report.compensating_releases, 1);
    let fired: Vec<(LogicalKey, KeyAction)> = out.actions().iter().map(|a| (a.key, a.action)).collect();
    assert_eq!(fired, vec![(key('f'), KeyAction::Down), (key('f'), KeyAction::Up)]);
    assert_eq!(session.state(), SessionState::Idle);

    // The session emitter is handed back for the next run
    assert_eq!(session.emitter_name(), Some("memory"));
}

#[test]
fn dry_run_leaves_the_session_emitter_alone() {
    let (mut session, _feed, out) = session_with(Config::default());
    session
        .install_map(TimingMap::from(vec![
            entry('k', Mode::Press, 0, 1.0),
            entry('k', Mode::Release, 0, 2.0),
        ]))
        .unwrap();

    let dry = MemoryEmitter::new();
    session.play_with(Instant::now(), Box::new(dry.clone())).unwrap();
    let report = wait_for_playback(&mut session);

    assert_eq!(report.fired, 2);
    assert_eq!(report.compensating_releases, 0);
    assert_eq!(dry.actions().len(), 2);
    assert!(out.actions().is_empty());
}

#[test]
fn single_take_plays_through_the_scheduler() {
    let (mut session, feed, out) = session_with(Config::default());
    record_take(&mut session, &feed, &[(F, 10, 30)]);
    let second = record_take(&mut session, &feed, &[(F, 5, 15), (J, 20, 40)]);

    let start = Instant::now();
    assert_eq!(session.play_sample(second, start).unwrap(), 4);
    let report = wait_for_playback(&mut session);

    assert_eq!(report.outcome, PlaybackOutcome::Completed);
    let fired: Vec<(LogicalKey, KeyAction)> = out.actions().iter().map(|a| (a.key, a.action)).collect();
    assert_eq!(
        fired,
        vec![
            (key('f'), KeyAction::Down),
            (key('f'), KeyAction::Up),
            (key('j'), KeyAction::Down),
            (key('j'), KeyAction::Up),
        ]
    );
    assert!(out.actions()[2].at >= start + ms(20));
    // The fused map was never built
    assert!(session.timing_map().is_empty());
    assert!(matches!(session.play_sample(42, Instant::now()), Err(Error::UnknownSample(42))));
}

#[test]
fn one_failing_key_does_not_stop_the_others() {
    let mut config = Config::default();
    config.playback.max_consecutive_failures = 3;
    let (mut session, _feed, out) = session_with(config);
    session
        .install_map(TimingMap::from(vec![
            entry('f', Mode::Press, 0, 1.0),
            entry('f', Mode::Release, 0, 2.0),
            entry('j', Mode::Press, 0, 3.0),
            entry('j', Mode::Release, 0, 4.0),
            entry('f', Mode::Press, 1, 5.0),
            entry('f', Mode::Release, 1, 6.0),
        ]))
        .unwrap();
    out.fail_on(key('j'));

    session.play(Instant::now()).unwrap();
    let report = wait_for_playback(&mut session);

    assert_eq!(report.outcome, PlaybackOutcome::Completed);
    assert_eq!(report.emit_failures, 2);
    assert_eq!(report.fired, 4);
    assert!(out.actions().iter().all(|a| a.key == key('f')));
    assert_eq!(out.actions().len(), 4);
}

// ---------------------------------------------------------------------------
// Persistence
// ---------------------------------------------------------------------------

#[test]
fn stored_samples_rebuild_the_same_map() {
    let dir = std::env::temp_dir().join(format!("keyfuse-it-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(store::SAMPLES_FILE);

    let (mut first, feed, _) = session_with(Config::default());
    record_take(&mut first, &feed, &[(F, 10, 30), (J, 20, 40)]);
    record_take(&mut first, &feed, &[(F, 12, 33), (J, 22, 41)]);
    first.rebuild().unwrap();
    store::save_samples(&path, &first.samples()).unwrap();

    let (mut second, second_feed, _) = session_with(Config::default());
    second.restore_samples(store::load_samples(&path).unwrap()).unwrap();
    second.rebuild().unwrap();

    assert_eq!(first.timing_map(), second.timing_map());
    assert_eq!(first.sample_summaries(), second.sample_summaries());

    // Ids keep counting after restored samples
    let id = record_take(&mut second, &second_feed, &[]);
    assert_eq!(id, 3);

    std::fs::remove_dir_all(dir).ok();
}
