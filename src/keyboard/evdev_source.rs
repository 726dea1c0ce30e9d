//! Raw evdev key source for Linux
//!
//! Reads scancodes straight from `/dev/input/event*`, below any layout or
//! IME translation. Needs read access to the input devices (root or the
//! `input` group).

use super::{KeyCode, KeySource, RawTransition, Subscription, Transition, TransitionQueue};
use crate::error::{Error, Result};
use evdev::{Device, EventType, Key};
use nix::libc;
use std::io;
use std::os::unix::io::AsRawFd;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::thread;
use std::time::{Duration, Instant};

/// Kernel autorepeat value on EV_KEY events
const VALUE_REPEAT: i32 = 2;

/// Idle wait between device sweeps
const SWEEP_INTERVAL: Duration = Duration::from_micros(500);

/// Key source reading every keyboard-like evdev device
pub struct EvdevSource {
    devices: Vec<(PathBuf, Device)>,
}

impl EvdevSource {
    /// Open every readable device that reports alphabetic keys
    pub fn open() -> Result<Self> {
        Ok(Self {
            devices: open_devices()?,
        })
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }
}

fn open_devices() -> Result<Vec<(PathBuf, Device)>> {
    let devices: Vec<(PathBuf, Device)> = evdev::enumerate()
        .filter(|(_, dev)| {
            dev.supported_keys()
                .map_or(false, |keys| keys.contains(Key::KEY_A))
        })
        .collect();

    if devices.is_empty() {
        return Err(Error::CaptureUnavailable(
            "no readable keyboard devices under /dev/input; run with sudo or join the 'input' group"
                .into(),
        ));
    }

    for (path, dev) in &devices {
        set_nonblocking(dev)?;
        log::info!(
            "[CAPTURE] evdev device {} ({})",
            path.display(),
            dev.name().unwrap_or("unnamed")
        );
    }

    Ok(devices)
}

fn set_nonblocking(dev: &Device) -> Result<()> {
    let fd = dev.as_raw_fd();
    // SAFETY: fd is owned by `dev` and stays open for the duration of the call
    let ok = unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFL);
        flags >= 0 && libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) >= 0
    };
    if ok {
        Ok(())
    } else {
        Err(Error::Io(io::Error::last_os_error()))
    }
}

impl KeySource for EvdevSource {
    fn name(&self) -> &'static str {
        "evdev"
    }

    fn subscribe(&mut self, codes: &[KeyCode], queue: TransitionQueue) -> Result<Subscription> {
        let codes = codes.to_vec();
        // Devices move into the reader thread; a later subscription reopens them
        let mut devices = match std::mem::take(&mut self.devices) {
            d if d.is_empty() => open_devices()?,
            d => d,
        };
        let (stop, stop_flag) = Subscription::flag();

        let handle = thread::Builder::new()
            .name("keyfuse-evdev".into())
            .spawn(move || {
                while !stop_flag.load(Ordering::Acquire) && !devices.is_empty() {
                    let mut lost = Vec::new();

                    for (i, (path, dev)) in devices.iter_mut().enumerate() {
                        let events = match dev.fetch_events() {
                            Ok(events) => events,
                            Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
                            Err(e) => {
                                log::warn!("[CAPTURE] lost {}: {}", path.display(), e);
                                lost.push(i);
                                continue;
                            }
                        };
                        let now = Instant::now();

                        for ev in events {
                            if ev.event_type() != EventType::KEY || ev.value() == VALUE_REPEAT {
                                continue;
                            }
                            let code = KeyCode::new(ev.code());
                            if !codes.contains(&code) {
                                continue;
                            }
                            let transition = if ev.value() == 0 {
                                Transition::Up
                            } else {
                                Transition::Down
                            };
                            if !queue.push(RawTransition::new(code, transition, now)) {
                                return;
                            }
                        }
                    }

                    for i in lost.into_iter().rev() {
                        devices.remove(i);
                    }
                    thread::sleep(SWEEP_INTERVAL);
                }
            })?;

        Ok(Subscription::new(stop, Some(handle)))
    }
}
