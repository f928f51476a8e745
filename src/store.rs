// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! Key/value mirror of the applied fan duty.
//!
//! The fan service does not report what it is currently running at, so every
//! successful command is mirrored here, one file per key, the same way hwmon
//! exposes one value per sysfs file. Reads never fail loudly: anything that
//! goes wrong reads back as unknown.

use crate::mode::Fan;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Default directory holding the mirrored keys.
pub const DEFAULT_STORE_DIR: &str = "/var/lib/nitrofan/FanControl";

/// Directory-backed store with one integer key per fan.
#[derive(Debug, Clone)]
pub struct DutyStore {
    dir: PathBuf,
}

impl DutyStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Absolute path of the file holding `fan`'s key.
    pub fn key_path(&self, fan: Fan) -> PathBuf {
        self.dir.join(fan.store_key())
    }

    /// Read the mirrored duty for a fan.
    ///
    /// Missing keys, permission errors and malformed or out of range
    /// values all read as `None`.
    pub fn read(&self, fan: Fan) -> Option<u8> {
        read_trimmed(&self.key_path(fan))
            .and_then(|s| s.parse::<u32>().ok())
            .filter(|v| *v <= 100)
            .map(|v| v as u8)
    }

    /// Mirror a duty value, replacing the key atomically.
    pub fn write(&self, fan: Fan, percent: u8) -> io::Result<()> {
        fs::create_dir_all(&self.dir)?;
        let path = self.key_path(fan);
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, format!("{percent}\n"))?;
        fs::rename(&tmp, &path)
    }
}

fn read_trimmed(path: &Path) -> Option<String> {
    fs::read_to_string(path).ok().map(|s| s.trim().to_string())
}
