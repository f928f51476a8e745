// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! Fan control engine for laptops driven through the PredatorSense fan
//! service: band partitions, partition editing, modes, the binary command
//! channel and the control loop, plus the daemon's config and client
//! protocol.

pub mod band;
pub mod channel;
pub mod config;
pub mod control;
pub mod editor;
pub mod error;
pub mod mode;
pub mod protocol;
pub mod sensors;
pub mod store;
