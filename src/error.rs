// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! Error types for band partitions and partition edits.

use thiserror::Error;

/// A band partition that fails one of its structural invariants.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PartitionError {
    /// The partition has no bands at all.
    #[error("partition has no bands")]
    Empty,

    /// The first band does not start at 0.
    #[error("first band starts at {low}, expected 0")]
    FirstLow { low: u8 },

    /// The last band does not end at 100.
    #[error("last band ends at {high}, expected 100")]
    LastHigh { high: u8 },

    /// A band whose upper bound is below its lower bound.
    #[error("band {index} is inverted ({low}-{high})")]
    Inverted { index: usize, low: u8, high: u8 },

    /// A bound or speed outside 0-100.
    #[error("band {index} has a value outside 0-100: {value}")]
    OutOfRange { index: usize, value: u8 },

    /// Two adjacent bands leave a gap or overlap.
    #[error("band {index} starts at {found}, expected {expected}")]
    NotContiguous {
        index: usize,
        expected: u16,
        found: u8,
    },
}

/// A rejected partition edit. Rejected edits leave the partition untouched.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EditError {
    #[error("band index {index} out of range (partition has {len} bands)")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("cannot remove the last remaining band")]
    LastBand,

    #[error("partition already has the maximum of {max} bands")]
    TooManyBands { max: usize },

    #[error("fan speed {0}% out of range 0-100")]
    SpeedOutOfRange(u8),

    /// Settling the working copy still left it invalid.
    #[error("edited partition is invalid: {0}")]
    Invalid(#[from] PartitionError),
}
