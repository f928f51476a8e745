// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! Hardware command channel to the privileged fan service.
//!
//! A duty change is a single fixed-size little-endian packet:
//!
//! | offset | type | value                          |
//! |--------|------|--------------------------------|
//! | 0      | u16  | total length field (16)        |
//! | 2      | u8   | opcode (1 = set fan speed)     |
//! | 3      | u32  | payload length (8)             |
//! | 7      | u64  | `(duty << 8) \| fan group`     |
//!
//! Each call connects, writes the packet, reads the 9-byte acknowledgement
//! and disconnects. Successful calls are mirrored into the [`DutyStore`]
//! so the applied value can be read back without asking the service.

use crate::mode::Fan;
use crate::store::DutyStore;
use serde::{Deserialize, Serialize};
use std::io::{self, Read, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Value of the packet's length field.
pub const PACKET_LEN_FIELD: u16 = 16;

/// Opcode for "set fan speed".
pub const OPCODE_SET_FAN_SPEED: u8 = 1;

/// Length of the packet payload in bytes.
pub const PAYLOAD_LEN: u32 = 8;

/// Bytes actually written per command (packed header + payload).
pub const PACKET_SIZE: usize = 2 + 1 + 4 + 8;

/// Size of the service's acknowledgement.
pub const ACK_LEN: usize = 9;

/// Default endpoint of the fan service.
pub const DEFAULT_SERVICE_PATH: &str = "/run/predatorsense/service.sock";

/// Default bound on a single service call.
pub const DEFAULT_CHANNEL_TIMEOUT_MS: u64 = 2000;

/// Encode a set-fan-speed packet. Duties above 100 are clamped.
pub fn encode_packet(fan: Fan, duty: u8) -> [u8; PACKET_SIZE] {
    let payload = (u64::from(duty.min(100)) << 8) | fan.group_code();

    let mut packet = [0u8; PACKET_SIZE];
    packet[0..2].copy_from_slice(&PACKET_LEN_FIELD.to_le_bytes());
    packet[2] = OPCODE_SET_FAN_SPEED;
    packet[3..7].copy_from_slice(&PAYLOAD_LEN.to_le_bytes());
    packet[7..15].copy_from_slice(&payload.to_le_bytes());
    packet
}

/// Result of one apply call: success flag plus a diagnostic string
/// (the acknowledgement in hex on success, the error otherwise).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyOutcome {
    pub success: bool,
    pub detail: String,
}

impl ApplyOutcome {
    pub fn ok(detail: impl Into<String>) -> Self {
        Self {
            success: true,
            detail: detail.into(),
        }
    }

    pub fn failed(detail: impl Into<String>) -> Self {
        Self {
            success: false,
            detail: detail.into(),
        }
    }
}

/// Something that can apply a duty to a fan and report what is applied.
pub trait DutyChannel {
    /// Send a duty to the hardware. Never retried, never panics.
    fn apply(&self, fan: Fan, duty: u8) -> ApplyOutcome;

    /// Duty currently applied, `None` when it cannot be determined.
    fn read_applied(&self, fan: Fan) -> Option<u8>;
}

// ---------------------------------------------------------------------------
// Service pipe
// ---------------------------------------------------------------------------

/// Connection parameters for the fan service endpoint.
#[derive(Debug, Clone)]
pub struct ServicePipe {
    path: PathBuf,
    timeout: Duration,
}

impl ServicePipe {
    pub fn new(path: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            path: path.into(),
            timeout,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Send one packet and wait for the acknowledgement.
    ///
    /// The connection is dropped (closed) before returning.
    pub fn send(&self, packet: &[u8]) -> io::Result<[u8; ACK_LEN]> {
        let mut conn = self.open()?;
        conn.write_all(packet)?;
        conn.flush()?;

        let mut ack = [0u8; ACK_LEN];
        conn.read_exact(&mut ack)?;
        Ok(ack)
    }

    fn open(&self) -> io::Result<UnixStream> {
        let stream = UnixStream::connect(&self.path)?;
        stream.set_read_timeout(Some(self.timeout))?;
        stream.set_write_timeout(Some(self.timeout))?;
        Ok(stream)
    }
}

// ---------------------------------------------------------------------------
// Hardware channel
// ---------------------------------------------------------------------------

/// The real channel: service pipe for commands, store for read-back.
#[derive(Debug, Clone)]
pub struct HardwareChannel {
    pipe: ServicePipe,
    store: DutyStore,
}

impl HardwareChannel {
    pub fn new(pipe: ServicePipe, store: DutyStore) -> Self {
        Self { pipe, store }
    }

    pub fn store(&self) -> &DutyStore {
        &self.store
    }
}

impl DutyChannel for HardwareChannel {
    fn apply(&self, fan: Fan, duty: u8) -> ApplyOutcome {
        let duty = duty.min(100);
        let packet = encode_packet(fan, duty);

        match self.pipe.send(&packet) {
            Ok(ack) => {
                if let Err(e) = self.store.write(fan, duty) {
                    log::warn!(
                        "Applied {duty}% to {fan} fan but could not mirror it to {}: {e}",
                        self.store.dir().display()
                    );
                }
                log::debug!("Applied {duty}% to {fan} fan, ack {}", hex(&ack));
                ApplyOutcome::ok(hex(&ack))
            }
            Err(e) => {
                log::warn!("Failed to apply {duty}% to {fan} fan: {e}");
                ApplyOutcome::failed(format!(
                    "fan service at {} unavailable: {e}",
                    self.pipe.path().display()
                ))
            }
        }
    }

    fn read_applied(&self, fan: Fan) -> Option<u8> {
        self.store.read(fan)
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::net::UnixListener;
    use std::time::Instant;

    #[test]
    fn test_cpu_packet_layout() {
        let packet = encode_packet(Fan::Cpu, 60);
        assert_eq!(
            packet,
            [
                0x10, 0x00, // length field
                0x01, // opcode
                0x08, 0x00, 0x00, 0x00, // payload length
                0x01, 0x3c, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, // (60 << 8) | 1
            ]
        );
    }

    #[test]
    fn test_gpu_packet_payload() {
        let packet = encode_packet(Fan::Gpu, 100);
        let payload = u64::from_le_bytes(packet[7..15].try_into().unwrap());
        assert_eq!(payload, (100 << 8) | 4);
    }

    #[test]
    fn test_duty_is_clamped() {
        assert_eq!(encode_packet(Fan::Cpu, 250), encode_packet(Fan::Cpu, 100));
    }

    #[test]
    fn test_failed_send_leaves_mirror_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let store = DutyStore::new(dir.path().join("store"));
        store.write(Fan::Cpu, 35).unwrap();

        let channel = HardwareChannel::new(
            ServicePipe::new(dir.path().join("missing.sock"), Duration::from_millis(200)),
            store,
        );
        let outcome = channel.apply(Fan::Cpu, 60);
        assert!(!outcome.success);
        assert!(!outcome.detail.is_empty());
        assert_eq!(channel.read_applied(Fan::Cpu), Some(35));
    }

    #[test]
    fn test_round_trip_with_fake_service() {
        let dir = tempfile::tempdir().unwrap();
        let sock = dir.path().join("service.sock");
        let listener = UnixListener::bind(&sock).unwrap();

        let service = std::thread::spawn(move || {
            let (mut conn, _) = listener.accept().unwrap();
            let mut packet = [0u8; PACKET_SIZE];
            conn.read_exact(&mut packet).unwrap();
            conn.write_all(&[0, 0, 0, 0, 0, 0, 0, 0, 0x2a]).unwrap();
            packet
        });

        let channel = HardwareChannel::new(
            ServicePipe::new(&sock, Duration::from_secs(2)),
            DutyStore::new(dir.path().join("store")),
        );
        let outcome = channel.apply(Fan::Gpu, 70);
        assert!(outcome.success, "{}", outcome.detail);
        assert_eq!(outcome.detail, "00000000000000002a");
        assert_eq!(channel.read_applied(Fan::Gpu), Some(70));
        assert_eq!(channel.read_applied(Fan::Cpu), None);
        assert_eq!(service.join().unwrap(), encode_packet(Fan::Gpu, 70));
    }

    #[test]
    fn test_short_ack_is_a_failure() {
        let dir = tempfile::tempdir().unwrap();
        let sock = dir.path().join("service.sock");
        let listener = UnixListener::bind(&sock).unwrap();

        let service = std::thread::spawn(move || {
            let (mut conn, _) = listener.accept().unwrap();
            let mut packet = [0u8; PACKET_SIZE];
            conn.read_exact(&mut packet).unwrap();
            conn.write_all(&[1, 2, 3]).unwrap();
        });

        let channel = HardwareChannel::new(
            ServicePipe::new(&sock, Duration::from_secs(2)),
            DutyStore::new(dir.path().join("store")),
        );
        let outcome = channel.apply(Fan::Cpu, 40);
        service.join().unwrap();
        assert!(!outcome.success);
        assert_eq!(channel.read_applied(Fan::Cpu), None);
    }

    #[test]
    fn test_silent_service_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let sock = dir.path().join("service.sock");
        let listener = UnixListener::bind(&sock).unwrap();

        let service = std::thread::spawn(move || {
            let (mut conn, _) = listener.accept().unwrap();
            let mut packet = [0u8; PACKET_SIZE];
            conn.read_exact(&mut packet).unwrap();
            // Hold the connection open without answering.
            std::thread::sleep(Duration::from_millis(1500));
        });

        let channel = HardwareChannel::new(
            ServicePipe::new(&sock, Duration::from_millis(200)),
            DutyStore::new(dir.path().join("store")),
        );
        let started = Instant::now();
        let outcome = channel.apply(Fan::Cpu, 55);
        assert!(started.elapsed() < Duration::from_millis(1200));
        assert!(!outcome.success);
        assert!(!outcome.detail.is_empty());
        assert_eq!(channel.read_applied(Fan::Cpu), None);
        service.join().unwrap();
    }
}
