// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! Configuration file handling.
//!
//! Persists the fan mode, the remembered manual duties and the auto-mode
//! band partition to TOML, together with daemon and sensor settings.
//! Default path: `/etc/nitrofan/config.toml`
//!
//! Loading never fails on bad content: missing keys are backfilled from
//! defaults, and an unparseable file or an invalid partition is replaced
//! by defaults and written back.

use crate::band::{self, Band, BandPartition};
use crate::channel::{DEFAULT_CHANNEL_TIMEOUT_MS, DEFAULT_SERVICE_PATH};
use crate::mode::{DEFAULT_MANUAL_DUTY, Fan, Mode};
use crate::store::DEFAULT_STORE_DIR;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Default config file location.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/nitrofan/config.toml";

/// Default daemon socket path.
pub const DEFAULT_SOCKET_PATH: &str = "/run/nitrofan.sock";

/// Default poll interval in milliseconds.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 2000;

// ---------------------------------------------------------------------------
// Config types
// ---------------------------------------------------------------------------

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Mode restored on startup.
    #[serde(default)]
    pub mode: Mode,

    /// Remembered manual duty for the CPU fan (0-100).
    #[serde(default = "default_manual_duty", alias = "custom_cpu")]
    pub manual_cpu_duty: u8,

    /// Remembered manual duty for the GPU fan (0-100).
    #[serde(default = "default_manual_duty", alias = "custom_gpu")]
    pub manual_gpu_duty: u8,

    /// Auto-mode band partition, shared by both fans.
    #[serde(default = "band::default_bands", alias = "auto_fan_config")]
    pub bands: Vec<Band>,

    /// Daemon settings.
    #[serde(default)]
    pub daemon: DaemonConfig,

    /// Sensor selection.
    #[serde(default)]
    pub sensors: SensorConfig,
}

/// Daemon-specific settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Poll interval for the control loop, in milliseconds.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Path for the client Unix domain socket.
    #[serde(default = "default_socket_path")]
    pub socket_path: String,

    /// Endpoint of the privileged fan service.
    #[serde(default = "default_service_path")]
    pub service_path: String,

    /// Directory mirroring the applied duty per fan.
    #[serde(default = "default_store_dir")]
    pub store_dir: String,

    /// Upper bound on a single fan service call, in milliseconds.
    #[serde(default = "default_channel_timeout")]
    pub channel_timeout_ms: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            socket_path: DEFAULT_SOCKET_PATH.to_string(),
            service_path: DEFAULT_SERVICE_PATH.to_string(),
            store_dir: DEFAULT_STORE_DIR.to_string(),
            channel_timeout_ms: DEFAULT_CHANNEL_TIMEOUT_MS,
        }
    }
}

/// Explicit sensor ids (e.g. "hwmon3/temp1"). Unset means auto-detect.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SensorConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_sensor: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gpu_sensor: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mode: Mode::default(),
            manual_cpu_duty: DEFAULT_MANUAL_DUTY,
            manual_gpu_duty: DEFAULT_MANUAL_DUTY,
            bands: band::default_bands(),
            daemon: DaemonConfig::default(),
            sensors: SensorConfig::default(),
        }
    }
}

impl Config {
    /// The configured partition, or the default one if it is invalid.
    pub fn partition(&self) -> BandPartition {
        BandPartition::new(self.bands.clone()).unwrap_or_else(|e| {
            log::warn!("Configured band partition is invalid ({e}), using defaults");
            BandPartition::default()
        })
    }

    pub fn manual_duty(&self, fan: Fan) -> u8 {
        match fan {
            Fan::Cpu => self.manual_cpu_duty,
            Fan::Gpu => self.manual_gpu_duty,
        }
    }

    /// Replace out of range values with defaults. Returns whether anything changed.
    fn sanitize(&mut self) -> bool {
        let mut changed = false;

        for duty in [&mut self.manual_cpu_duty, &mut self.manual_gpu_duty] {
            if *duty > 100 {
                log::warn!("Manual duty {duty} out of range, using {DEFAULT_MANUAL_DUTY}");
                *duty = DEFAULT_MANUAL_DUTY;
                changed = true;
            }
        }

        if let Err(e) = band::validate(&self.bands) {
            log::warn!("Configured band partition is invalid ({e}), replacing with defaults");
            self.bands = band::default_bands();
            changed = true;
        }

        changed
    }
}

// ---------------------------------------------------------------------------
// Load / Save
// ---------------------------------------------------------------------------

/// Load config from a TOML file.
///
/// A missing file is created with defaults. Corrupt content is replaced by
/// defaults and rewritten. Only failing to read an existing file is an error.
pub fn load_config(path: &Path) -> io::Result<Config> {
    if !path.exists() {
        log::info!("No config file at {}, writing defaults", path.display());
        let config = Config::default();
        rewrite(path, &config);
        return Ok(config);
    }

    let contents = fs::read_to_string(path)?;
    let mut config: Config = match toml::from_str(&contents) {
        Ok(c) => c,
        Err(e) => {
            log::warn!(
                "Failed to parse config {}: {e}; replacing with defaults",
                path.display()
            );
            let config = Config::default();
            rewrite(path, &config);
            return Ok(config);
        }
    };

    if config.sanitize() {
        rewrite(path, &config);
    }

    log::info!("Loaded config from {}", path.display());
    Ok(config)
}

/// Save config to a TOML file, creating parent directories if needed.
pub fn save_config(path: &Path, config: &Config) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let contents = toml::to_string_pretty(config).map_err(|e| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Failed to serialize config: {e}"),
        )
    })?;

    fs::write(path, contents)?;
    log::info!("Saved config to {}", path.display());
    Ok(())
}

/// Resolve the config file path from CLI arg or default.
pub fn resolve_config_path(cli_path: Option<&str>) -> PathBuf {
    cli_path
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

fn rewrite(path: &Path, config: &Config) {
    if let Err(e) = save_config(path, config) {
        log::warn!("Could not write config to {}: {e}", path.display());
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn default_manual_duty() -> u8 {
    DEFAULT_MANUAL_DUTY
}

fn default_poll_interval() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

fn default_socket_path() -> String {
    DEFAULT_SOCKET_PATH.to_string()
}

fn default_service_path() -> String {
    DEFAULT_SERVICE_PATH.to_string()
}

fn default_store_dir() -> String {
    DEFAULT_STORE_DIR.to_string()
}

fn default_channel_timeout() -> u64 {
    DEFAULT_CHANNEL_TIMEOUT_MS
}
