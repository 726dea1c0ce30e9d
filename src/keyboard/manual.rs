//! Scripted key source
//!
//! Transitions are pushed by the caller instead of a device. Used by the
//! test suites and for replaying a scripted input feed.

use super::{KeyCode, KeySource, RawTransition, Subscription, Transition, TransitionQueue};
use crate::error::{Error, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

#[derive(Default)]
struct Feed {
    queue: Option<(TransitionQueue, Arc<AtomicBool>)>,
    unavailable: Option<String>,
}

/// Cloneable handle; every clone feeds the same subscriber
#[derive(Clone, Default)]
pub struct ManualSource {
    feed: Arc<Mutex<Feed>>,
}

impl ManualSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// A source whose `subscribe` fails with `CaptureUnavailable`
    pub fn unavailable(reason: impl Into<String>) -> Self {
        let source = Self::new();
        if let Ok(mut feed) = source.feed.lock() {
            feed.unavailable = Some(reason.into());
        }
        source
    }

    /// Whether a live subscription is attached
    pub fn is_subscribed(&self) -> bool {
        self.feed
            .lock()
            .map(|feed| {
                feed.queue
                    .as_ref()
                    .map_or(false, |(_, stop)| !stop.load(Ordering::Acquire))
            })
            .unwrap_or(false)
    }

    /// Push one transition through the same non-blocking path a device
    /// callback uses. Returns false when nobody is subscribed.
    pub fn send(&self, code: KeyCode, transition: Transition, at: Instant) -> bool {
        let Ok(feed) = self.feed.lock() else {
            return false;
        };
        match &feed.queue {
            Some((queue, stop)) if !stop.load(Ordering::Acquire) => {
                queue.push(RawTransition::new(code, transition, at))
            }
            _ => false,
        }
    }

    pub fn down(&self, code: impl Into<KeyCode>, at: Instant) -> bool {
        self.send(code.into(), Transition::Down, at)
    }

    pub fn up(&self, code: impl Into<KeyCode>, at: Instant) -> bool {
        self.send(code.into(), Transition::Up, at)
    }
}

impl KeySource for ManualSource {
    fn name(&self) -> &'static str {
        "manual"
    }

    fn subscribe(&mut self, _codes: &[KeyCode], queue: TransitionQueue) -> Result<Subscription> {
        let mut feed = self
            .feed
            .lock()
            .map_err(|_| Error::CaptureUnavailable("manual feed poisoned".into()))?;
        if let Some(reason) = &feed.unavailable {
            return Err(Error::CaptureUnavailable(reason.clone()));
        }
        let (stop, thread_side) = Subscription::flag();
        feed.queue = Some((queue, thread_side));
        Ok(Subscription::new(stop, None))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64;
    use std::sync::mpsc;

    #[test]
    fn send_without_subscriber_is_rejected() {
        let source = ManualSource::new();
        assert!(!source.down(30u16, Instant::now()));
        assert!(!source.is_subscribed());
    }

    #[test]
    fn clones_share_the_subscriber() {
        let mut source = ManualSource::new();
        let feeder = source.clone();
        let (tx, rx) = mpsc::sync_channel(8);
        let queue = TransitionQueue::new(tx, Arc::new(AtomicU64::new(0)));

        let sub = source.subscribe(&[], queue).unwrap();
        assert!(feeder.is_subscribed());
        assert!(feeder.down(31u16, Instant::now()));
        assert_eq!(rx.try_recv().unwrap().code, KeyCode(31));

        sub.stop();
        assert!(!feeder.is_subscribed());
        assert!(!feeder.up(31u16, Instant::now()));
    }

    #[test]
    fn unavailable_source_fails_to_subscribe() {
        let mut source = ManualSource::unavailable("no hook");
        let (tx, _rx) = mpsc::sync_channel(1);
        let queue = TransitionQueue::new(tx, Arc::new(AtomicU64::new(0)));
        match source.subscribe(&[], queue) {
            Err(Error::CaptureUnavailable(reason)) => assert_eq!(reason, "no hook"),
            other => panic!("unexpected: {:?}", other.map(|_| ())),
        }
    }
}
