//! Raw key transitions and the polling key source

use super::{KeyCode, KeySource, Subscription, TransitionQueue};
use crate::error::{Error, Result};
use device_query::{DeviceQuery, DeviceState};
use std::sync::atomic::Ordering;
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

/// Direction of a physical transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transition {
    Down,
    Up,
}

/// A scancode transition as reported by a source, before layout resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawTransition {
    pub code: KeyCode,
    pub transition: Transition,
    pub timestamp: Instant,
}

impl RawTransition {
    pub fn new(code: KeyCode, transition: Transition, timestamp: Instant) -> Self {
        Self {
            code,
            transition,
            timestamp,
        }
    }
}

/// Key source that diffs device_query key state on its own thread
pub struct PollingSource {
    poll_interval: Duration,
}

impl PollingSource {
    pub fn new(poll_interval: Duration) -> Self {
        Self { poll_interval }
    }
}

impl KeySource for PollingSource {
    fn name(&self) -> &'static str {
        "polling"
    }

    fn subscribe(&mut self, codes: &[KeyCode], queue: TransitionQueue) -> Result<Subscription> {
        let codes = codes.to_vec();
        let interval = self.poll_interval;
        let (ready_tx, ready_rx) = mpsc::channel::<std::result::Result<(), String>>();
        let (stop, stop_flag) = Subscription::flag();

        // DeviceState is not Send on every platform, so it is opened on the poll thread
        let handle = thread::Builder::new()
            .name("keyfuse-poll".into())
            .spawn(move || {
                let state = match DeviceState::checked_new() {
                    Some(state) => {
                        let _ = ready_tx.send(Ok(()));
                        state
                    }
                    None => {
                        let _ = ready_tx.send(Err("device_query could not open the display".into()));
                        return;
                    }
                };

                let mut last: Vec<KeyCode> = Vec::new();
                while !stop_flag.load(Ordering::Acquire) {
                    let now = Instant::now();
                    let current: Vec<KeyCode> = state
                        .get_keys()
                        .into_iter()
                        .map(KeyCode::from)
                        .filter(|c| codes.contains(c))
                        .collect();

                    for code in current.iter().filter(|c| !last.contains(c)) {
                        if !queue.push(RawTransition::new(*code, Transition::Down, now)) {
                            return;
                        }
                    }
                    for code in last.iter().filter(|c| !current.contains(c)) {
                        if !queue.push(RawTransition::new(*code, Transition::Up, now)) {
                            return;
                        }
                    }

                    last = current;
                    thread::sleep(interval);
                }
            })?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Subscription::new(stop, Some(handle))),
            Ok(Err(reason)) => {
                let _ = handle.join();
                Err(Error::CaptureUnavailable(reason))
            }
            Err(_) => {
                let _ = handle.join();
                Err(Error::CaptureUnavailable("poll thread exited during startup".into()))
            }
        }
    }
}
