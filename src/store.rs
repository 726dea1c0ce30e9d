//! JSON persistence for samples and timing maps
//!
//! Files live in the platform data directory under `keyfuse/`:
//!
//! | File | Content |
//! |------|---------|
//! | `samples.json` | every stored sample, in recording order |
//! | `timing_map.json` | the last exported timing map |
//!
//! Writes go to a sibling temp file which is then renamed over the target,
//! so a crash mid-write leaves the previous file intact.

use crate::error::{Error, Result};
use crate::model::{Sample, TimingMap};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, File};
use std::io::{BufReader, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const SAMPLES_FILE: &str = "samples.json";
pub const TIMING_MAP_FILE: &str = "timing_map.json";

/// Data directory for keyfuse, created on demand
pub fn data_dir() -> Result<PathBuf> {
    let dir = dirs::data_dir()
        .ok_or_else(|| Error::Io(std::io::Error::new(ErrorKind::NotFound, "no data directory")))?
        .join("keyfuse");
    if !dir.exists() {
        fs::create_dir_all(&dir)?;
    }
    Ok(dir)
}

/// Write `value` as pretty JSON via a temp file and rename
pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    {
        let mut file = File::create(&tmp)?;
        file.write_all(json.as_bytes())?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let file = File::open(path)?;
    Ok(serde_json::from_reader(BufReader::new(file))?)
}

pub fn save_samples(path: &Path, samples: &[Arc<Sample>]) -> Result<()> {
    let list: Vec<&Sample> = samples.iter().map(|s| s.as_ref()).collect();
    write_json(path, &list)?;
    log::info!("[STORE] saved {} samples to {}", samples.len(), path.display());
    Ok(())
}

/// Load samples; a missing file is an empty store
pub fn load_samples(path: &Path) -> Result<Vec<Sample>> {
    match read_json::<Vec<Sample>>(path) {
        Ok(samples) => {
            log::info!("[STORE] loaded {} samples from {}", samples.len(), path.display());
            Ok(samples)
        }
        Err(Error::Io(e)) if e.kind() == ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(e),
    }
}

pub fn export_timing_map(path: &Path, map: &TimingMap) -> Result<()> {
    write_json(path, map)?;
    log::info!("[STORE] exported {} entries to {}", map.len(), path.display());
    Ok(())
}

pub fn load_timing_map(path: &Path) -> Result<TimingMap> {
    read_json(path)
}
