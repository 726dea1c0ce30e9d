//! Key source abstraction shared by the platform backends

use super::{KeyCode, PollingSource, RawTransition};
use crate::config::{Backend, CaptureConfig};
use crate::error::Result;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{SyncSender, TrySendError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// A system-wide feed of physical key transitions
pub trait KeySource: Send {
    /// Short backend name for logs and the status bar
    fn name(&self) -> &'static str;

    /// Start delivering transitions of `codes` into `queue` until the
    /// returned subscription is stopped or dropped
    fn subscribe(&mut self, codes: &[KeyCode], queue: TransitionQueue) -> Result<Subscription>;
}

/// Producer half of the bounded capture queue
///
/// `push` never blocks. A full queue drops the transition and counts it.
#[derive(Clone)]
pub struct TransitionQueue {
    tx: SyncSender<RawTransition>,
    overflows: Arc<AtomicU64>,
}

impl TransitionQueue {
    pub fn new(tx: SyncSender<RawTransition>, overflows: Arc<AtomicU64>) -> Self {
        Self { tx, overflows }
    }

    /// Offer a transition. Returns false once the consumer is gone.
    pub fn push(&self, transition: RawTransition) -> bool {
        match self.tx.try_send(transition) {
            Ok(()) => true,
            Err(TrySendError::Full(t)) => {
                let dropped = self.overflows.fetch_add(1, Ordering::Relaxed) + 1;
                log::warn!(
                    "[CAPTURE] queue full, dropped {:?} {:?} ({} dropped so far)",
                    t.code,
                    t.transition,
                    dropped
                );
                true
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }
}

/// Handle to a running source. Stops the source when dropped.
pub struct Subscription {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Subscription {
    /// Fresh stop flag and the clone handed to the source thread
    pub fn flag() -> (Arc<AtomicBool>, Arc<AtomicBool>) {
        let stop = Arc::new(AtomicBool::new(false));
        let thread_side = Arc::clone(&stop);
        (stop, thread_side)
    }

    pub fn new(stop: Arc<AtomicBool>, handle: Option<JoinHandle<()>>) -> Self {
        Self { stop, handle }
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    /// Signal the source and wait for its thread
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("[CAPTURE] source thread panicked");
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Open the source selected by `capture.backend`
///
/// `Auto` prefers evdev on Linux and falls back to polling.
pub fn open_source(config: &CaptureConfig) -> Result<Box<dyn KeySource>> {
    let polling = || -> Box<dyn KeySource> {
        Box::new(PollingSource::new(Duration::from_micros(config.poll_interval_us.max(100))))
    };

    match config.backend {
        Backend::Polling => Ok(polling()),
        #[cfg(target_os = "linux")]
        Backend::Evdev => {
            let source = super::EvdevSource::open()?;
            log::info!("[CAPTURE] evdev reading {} devices", source.device_count());
            Ok(Box::new(source))
        }
        #[cfg(not(target_os = "linux"))]
        Backend::Evdev => Err(crate::error::Error::CaptureUnavailable(
            "evdev backend is only available on Linux".into(),
        )),
        #[cfg(target_os = "linux")]
        Backend::Auto => match super::EvdevSource::open() {
            Ok(source) => {
                log::info!("[CAPTURE] evdev reading {} devices", source.device_count());
                Ok(Box::new(source))
            }
            Err(e) => {
                log::info!("[CAPTURE] evdev unavailable ({}), using polling", e);
                Ok(polling())
            }
        },
        #[cfg(not(target_os = "linux"))]
        Backend::Auto => Ok(polling()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keyboard::Transition;
    use std::sync::mpsc;
    use std::time::Instant;

    #[test]
    fn full_queue_counts_overflow_without_blocking() {
        let (tx, rx) = mpsc::sync_channel(1);
        let overflows = Arc::new(AtomicU64::new(0));
        let queue = TransitionQueue::new(tx, Arc::clone(&overflows));
        let t = RawTransition::new(KeyCode(30), Transition::Down, Instant::now());

        assert!(queue.push(t));
        assert!(queue.push(t));
        assert_eq!(overflows.load(Ordering::Relaxed), 1);
        assert_eq!(rx.try_recv().map(|r| r.code), Ok(KeyCode(30)));
    }

    #[test]
    fn disconnected_queue_reports_false() {
        let (tx, rx) = mpsc::sync_channel(4);
        drop(rx);
        let queue = TransitionQueue::new(tx, Arc::new(AtomicU64::new(0)));
        let t = RawTransition::new(KeyCode(30), Transition::Up, Instant::now());
        assert!(!queue.push(t));
    }

    #[test]
    fn subscription_stop_sets_flag_and_joins() {
        let (stop, thread_side) = Subscription::flag();
        let handle = std::thread::spawn(move || {
            while !thread_side.load(Ordering::Acquire) {
                std::thread::yield_now();
            }
        });
        let sub = Subscription::new(Arc::clone(&stop), Some(handle));
        assert!(!sub.is_stopped());
        sub.stop();
        assert!(stop.load(Ordering::Acquire));
    }
}
