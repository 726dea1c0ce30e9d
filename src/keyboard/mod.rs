//! Keyboard identity, layout resolution and system-wide key sources

mod event;
mod key;
pub mod keymap;
pub mod layout;
mod manual;
mod source;

#[cfg(target_os = "linux")]
mod evdev_source;

pub use event::{PollingSource, RawTransition, Transition};
pub use key::{parse_key_list, LogicalKey, ParseKeyError};
pub use keymap::KeyCode;
pub use layout::LayoutTable;
pub use manual::ManualSource;
pub use source::{open_source, KeySource, Subscription, TransitionQueue};

#[cfg(target_os = "linux")]
pub use evdev_source::EvdevSource;
