// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! Temperature sources for the control loop.
//!
//! The engine only needs two optional readings per poll, one for the CPU
//! package and one for the GPU core. [`HwmonSensors`] finds them under
//! `/sys/class/hwmon`; anything else can implement [`SensorProvider`].

use crate::mode::Fan;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, TryLockError};

/// Default hwmon root.
pub const HWMON_ROOT: &str = "/sys/class/hwmon";

const CPU_CHIPS: &[&str] = &["coretemp", "k10temp", "zenpower"];
const CPU_LABELS: &[&str] = &["package", "tctl", "tdie"];
const GPU_CHIPS: &[&str] = &["amdgpu", "nouveau", "radeon", "nvidia"];
const GPU_LABELS: &[&str] = &["edge", "core", "gpu"];

// ---------------------------------------------------------------------------
// Data types
// ---------------------------------------------------------------------------

/// One poll's worth of temperatures. Either value may be missing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TempReadings {
    pub cpu_c: Option<f64>,
    pub gpu_c: Option<f64>,
}

impl TempReadings {
    pub fn for_fan(&self, fan: Fan) -> Option<f64> {
        match fan {
            Fan::Cpu => self.cpu_c,
            Fan::Gpu => self.gpu_c,
        }
    }
}

/// Supplies CPU and GPU temperatures on demand.
///
/// Implementations may be slow or fail; failures are reported as `None`.
pub trait SensorProvider {
    fn read_temps(&mut self) -> TempReadings;
}

/// A discovered hwmon temperature input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TempSensor {
    /// Unique identifier, e.g. "hwmon3/temp1"
    pub id: String,
    /// Human-readable label if available
    pub label: Option<String>,
    /// Absolute path to the `tempN_input` file (millidegrees C)
    pub input_path: PathBuf,
    /// Name of the parent hwmon device
    pub hwmon_name: String,
}

// ---------------------------------------------------------------------------
// Discovery
// ---------------------------------------------------------------------------

/// Scan an hwmon root and return every temperature input, sorted by id.
pub fn discover_temp_sensors(root: &Path) -> io::Result<Vec<TempSensor>> {
    let mut sensors = Vec::new();

    for entry in fs::read_dir(root)? {
        let entry = entry?;
        let hwmon_dir = entry.path();
        let hwmon_name = read_trimmed(&hwmon_dir.join("name")).unwrap_or_default();
        let hwmon_basename = entry.file_name().to_string_lossy().to_string();

        // Indices are not always dense (k10temp has temp1 and temp3).
        for n in 1..=32 {
            let input_path = hwmon_dir.join(format!("temp{n}_input"));
            if !input_path.exists() {
                continue;
            }

            sensors.push(TempSensor {
                id: format!("{hwmon_basename}/temp{n}"),
                label: read_trimmed(&hwmon_dir.join(format!("temp{n}_label"))),
                input_path,
                hwmon_name: hwmon_name.clone(),
            });
        }
    }

    sensors.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(sensors)
}

/// Read a sensor in degrees Celsius.
pub fn read_temp(sensor: &TempSensor) -> Option<f64> {
    read_trimmed(&sensor.input_path)
        .and_then(|s| s.parse::<i64>().ok())
        .map(|millic| millic as f64 / 1000.0)
}

/// Pick the CPU package sensor: a package/Tctl labelled input, else the
/// first input of a known CPU chip.
pub fn pick_cpu_sensor(sensors: &[TempSensor]) -> Option<&TempSensor> {
    pick(sensors, CPU_CHIPS, CPU_LABELS)
}

/// Pick the GPU core sensor on a known GPU chip, preferring an edge/core
/// labelled input.
pub fn pick_gpu_sensor(sensors: &[TempSensor]) -> Option<&TempSensor> {
    pick(sensors, GPU_CHIPS, GPU_LABELS)
}

fn pick<'a>(sensors: &'a [TempSensor], chips: &[&str], labels: &[&str]) -> Option<&'a TempSensor> {
    let on_chip = |s: &&TempSensor| chips.contains(&s.hwmon_name.as_str());
    let labelled = |s: &&TempSensor| {
        s.label.as_deref().is_some_and(|l| {
            let l = l.to_ascii_lowercase();
            labels.iter().any(|want| l.starts_with(want))
        })
    };

    sensors
        .iter()
        .filter(on_chip)
        .find(labelled)
        .or_else(|| sensors.iter().find(on_chip))
}

// ---------------------------------------------------------------------------
// Provider
// ---------------------------------------------------------------------------

/// hwmon-backed [`SensorProvider`].
///
/// Sensors are resolved lazily on the first read, either by explicit id or
/// by chip/label heuristics. Resolution is retried on later reads for as
/// long as neither sensor has been found.
#[derive(Debug, Clone)]
pub struct HwmonSensors {
    root: PathBuf,
    cpu_id: Option<String>,
    gpu_id: Option<String>,
    cpu: Option<TempSensor>,
    gpu: Option<TempSensor>,
}

impl HwmonSensors {
    pub fn new(cpu_id: Option<String>, gpu_id: Option<String>) -> Self {
        Self::with_root(HWMON_ROOT, cpu_id, gpu_id)
    }

    pub fn with_root(
        root: impl Into<PathBuf>,
        cpu_id: Option<String>,
        gpu_id: Option<String>,
    ) -> Self {
        Self {
            root: root.into(),
            cpu_id,
            gpu_id,
            cpu: None,
            gpu: None,
        }
    }

    fn resolve(&mut self) {
        let sensors = match discover_temp_sensors(&self.root) {
            Ok(s) => s,
            Err(e) => {
                log::warn!("Failed to scan {}: {e}", self.root.display());
                return;
            }
        };

        self.cpu = match &self.cpu_id {
            Some(id) => sensors.iter().find(|s| &s.id == id),
            None => pick_cpu_sensor(&sensors),
        }
        .cloned();
        self.gpu = match &self.gpu_id {
            Some(id) => sensors.iter().find(|s| &s.id == id),
            None => pick_gpu_sensor(&sensors),
        }
        .cloned();

        for (fan, sensor) in [(Fan::Cpu, &self.cpu), (Fan::Gpu, &self.gpu)] {
            match sensor {
                Some(s) => log::info!(
                    "Using {} ({}{}) for the {fan} fan",
                    s.id,
                    s.hwmon_name,
                    s.label.as_deref().map(|l| format!(", {l}")).unwrap_or_default()
                ),
                None => log::warn!("No temperature sensor found for the {fan} fan"),
            }
        }
    }
}

impl SensorProvider for HwmonSensors {
    fn read_temps(&mut self) -> TempReadings {
        if self.cpu.is_none() && self.gpu.is_none() {
            self.resolve();
        }

        TempReadings {
            cpu_c: self.cpu.as_ref().and_then(read_temp),
            gpu_c: self.gpu.as_ref().and_then(read_temp),
        }
    }
}

/// Read a shared provider unless another read still holds it.
///
/// Returns `None` while a previous read is in progress, so a hung sensor
/// costs at most one blocked reader.
pub fn try_read_temps<S: SensorProvider>(sensors: &Mutex<S>) -> Option<TempReadings> {
    let mut guard = match sensors.try_lock() {
        Ok(guard) => guard,
        Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
        Err(TryLockError::WouldBlock) => return None,
    };
    Some(guard.read_temps())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn read_trimmed(path: &Path) -> Option<String> {
    fs::read_to_string(path).ok().map(|s| s.trim().to_string())
}
