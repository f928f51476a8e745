// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! Client-daemon protocol over Unix domain sockets.
//!
//! Messages are newline-delimited JSON. The client sends a [`Request`]
//! and the daemon replies with a [`Response`].

use crate::band::Band;
use crate::channel::ApplyOutcome;
use crate::control::DutyCommand;
use crate::mode::{Fan, Mode};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Requests (client -> daemon)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Request {
    /// Request current mode, temperatures and duties.
    #[serde(rename = "get_status")]
    GetStatus,

    /// Switch both fans to a mode.
    #[serde(rename = "set_mode")]
    SetMode { mode: Mode },

    /// Set the remembered manual duty of one fan.
    #[serde(rename = "set_manual_duty")]
    SetManualDuty { fan: Fan, duty: u8 },

    /// Return the band partition (working copy while editing).
    #[serde(rename = "get_partition")]
    GetPartition,

    /// Move both boundaries of one band.
    #[serde(rename = "move_boundary")]
    MoveBoundary { index: usize, low: u8, high: u8 },

    /// Change the speed of one band.
    #[serde(rename = "set_band_speed")]
    SetBandSpeed { index: usize, speed: u8 },

    /// Append a band at the top of the range.
    #[serde(rename = "add_band")]
    AddBand { speed: u8 },

    /// Remove a band and renormalize.
    #[serde(rename = "remove_band")]
    RemoveBand { index: usize },

    /// Make the edited partition permanent and save it.
    #[serde(rename = "commit_partition")]
    CommitPartition,

    /// Discard partition edits.
    #[serde(rename = "cancel_partition")]
    CancelPartition,

    /// Save current configuration to disk.
    #[serde(rename = "save_config")]
    SaveConfig,

    /// Reload configuration from disk.
    #[serde(rename = "reload_config")]
    ReloadConfig,
}

// ---------------------------------------------------------------------------
// Responses (daemon -> client)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Response {
    /// Current system status.
    #[serde(rename = "status")]
    Status {
        mode: Mode,
        fans: Vec<FanStatusInfo>,
        editing: bool,
    },

    /// The band partition.
    #[serde(rename = "partition")]
    Partition { bands: Vec<Band>, editing: bool },

    /// Commands were sent to the fan service.
    #[serde(rename = "applied")]
    Applied {
        message: String,
        results: Vec<CommandResult>,
    },

    /// Operation succeeded.
    #[serde(rename = "ok")]
    Ok { message: String },

    /// Operation failed.
    #[serde(rename = "error")]
    Error { message: String },
}

/// Per-fan status sent in status messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FanStatusInfo {
    pub fan: Fan,
    pub temp_c: Option<f64>,
    pub manual_duty: u8,
    pub target: u8,
    pub last_commanded: Option<u8>,
    /// `None` when the applied duty could not be read back.
    pub last_applied: Option<u8>,
}

/// Outcome of one duty command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResult {
    pub fan: Fan,
    pub duty: u8,
    pub outcome: ApplyOutcome,
}

impl CommandResult {
    pub fn new(command: DutyCommand, outcome: ApplyOutcome) -> Self {
        Self {
            fan: command.fan,
            duty: command.duty,
            outcome,
        }
    }
}

// ---------------------------------------------------------------------------
// Serialization helpers
// ---------------------------------------------------------------------------

/// Encode a message as a newline-delimited JSON string.
pub fn encode<T: Serialize>(msg: &T) -> Result<String, serde_json::Error> {
    let mut s = serde_json::to_string(msg)?;
    s.push('\n');
    Ok(s)
}

/// Decode a message from a JSON string (newline-trimmed).
pub fn decode<'a, T: Deserialize<'a>>(s: &'a str) -> Result<T, serde_json::Error> {
    serde_json::from_str(s.trim())
}
