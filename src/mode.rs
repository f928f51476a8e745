// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! Fan modes and per-fan target resolution.

use crate::band::{self, Band, DOMAIN_MAX};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Duty applied to every fan in [`Mode::Max`].
pub const MAX_DUTY: u8 = DOMAIN_MAX;

/// Manual duty used when nothing has been configured.
pub const DEFAULT_MANUAL_DUTY: u8 = 50;

/// How both fans are driven.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Each fan holds its remembered manual duty.
    #[default]
    #[serde(alias = "custom", alias = "Custom", alias = "Manual")]
    Manual,
    /// Both fans at 100%.
    #[serde(alias = "Max")]
    Max,
    /// Duty follows each fan's temperature through the band partition.
    #[serde(alias = "Auto")]
    Auto,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Manual => write!(f, "manual"),
            Mode::Max => write!(f, "max"),
            Mode::Auto => write!(f, "auto"),
        }
    }
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "manual" | "custom" => Ok(Mode::Manual),
            "max" => Ok(Mode::Max),
            "auto" => Ok(Mode::Auto),
            other => Err(format!("unknown mode '{other}' (expected manual, max or auto)")),
        }
    }
}

/// One of the two controllable fans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Fan {
    Cpu,
    Gpu,
}

impl Fan {
    pub const ALL: [Fan; 2] = [Fan::Cpu, Fan::Gpu];

    /// Fan group code understood by the fan service.
    pub fn group_code(self) -> u64 {
        match self {
            Fan::Cpu => 1,
            Fan::Gpu => 4,
        }
    }

    /// Key under which the applied duty is mirrored.
    pub fn store_key(self) -> &'static str {
        match self {
            Fan::Cpu => "CPUFanPercentage",
            Fan::Gpu => "GPU1FanPercentage",
        }
    }
}

impl fmt::Display for Fan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fan::Cpu => write!(f, "cpu"),
            Fan::Gpu => write!(f, "gpu"),
        }
    }
}

impl FromStr for Fan {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cpu" => Ok(Fan::Cpu),
            "gpu" => Ok(Fan::Gpu),
            other => Err(format!("unknown fan '{other}' (expected cpu or gpu)")),
        }
    }
}

/// Live state of one fan channel.
#[derive(Debug, Clone, PartialEq)]
pub struct FanChannelState {
    /// Manual duty, kept while another mode is active.
    pub manual_duty: u8,
    /// Duty read back from the mirror store; `None` when unknown.
    pub last_applied: Option<u8>,
    /// Last duty the control loop sent, used to skip redundant sends.
    pub last_commanded: Option<u8>,
    /// Latest temperature reading for this fan's chip.
    pub temp_c: Option<f64>,
}

impl FanChannelState {
    pub fn new(manual_duty: u8) -> Self {
        Self {
            manual_duty: manual_duty.min(DOMAIN_MAX),
            last_applied: None,
            last_commanded: None,
            temp_c: None,
        }
    }
}

impl Default for FanChannelState {
    fn default() -> Self {
        Self::new(DEFAULT_MANUAL_DUTY)
    }
}

/// Resolve the duty a fan should run at.
///
/// Manual and Max never look at the temperature; Auto with no reading
/// resolves to the partition fallback.
pub fn resolve_target(mode: Mode, manual_duty: u8, bands: &[Band], temp_c: Option<f64>) -> u8 {
    match mode {
        Mode::Manual => manual_duty.min(DOMAIN_MAX),
        Mode::Max => MAX_DUTY,
        Mode::Auto => band::speed_for(bands, temp_c),
    }
}
