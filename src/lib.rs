//! keyfuse - record, fuse and replay rhythm-game key timing
//!
//! Repeated takes of the same key sequence are captured relative to a
//! recording epoch, aligned per key by ordinal position, fused into one
//! timing map, and replayed by a precision scheduler.

pub mod aggregate;
pub mod capture;
pub mod config;
pub mod error;
pub mod hotkeys;
pub mod keyboard;
pub mod model;
pub mod playback;
pub mod recorder;
pub mod report;
pub mod session;
pub mod store;
pub mod ui;

pub use config::Config;
pub use error::{Error, Result};
pub use keyboard::LogicalKey;
pub use model::{Event, Mode, Sample, TimingMap, TimingMapEntry};
pub use session::{Session, SessionState};
