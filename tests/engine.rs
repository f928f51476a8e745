// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! Cross-module behaviour of the fan control engine.

use nitrofan::band::{self, Band, BandPartition, FALLBACK_SPEED};
use nitrofan::channel::{ApplyOutcome, DutyChannel, HardwareChannel, ServicePipe};
use nitrofan::control::{self, EngineState};
use nitrofan::editor::{self, MAX_BANDS, PartitionEditor};
use nitrofan::error::EditError;
use nitrofan::mode::{Fan, Mode};
use nitrofan::sensors::{SensorProvider, TempReadings};
use nitrofan::store::DutyStore;
use std::cell::RefCell;
use std::collections::HashMap;
use std::time::Duration;

/// Small deterministic generator so edit sequences are reproducible.
struct Lcg(u64);

impl Lcg {
    fn next(&mut self) -> u64 {
        self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        self.0 >> 33
    }

    fn below(&mut self, n: u64) -> u64 {
        self.next() % n
    }
}

fn assert_valid(bands: &[Band]) {
    if let Err(e) = band::validate(bands) {
        panic!("invalid partition {bands:?}: {e}");
    }
}

fn covers_domain(bands: &[Band]) -> bool {
    (0..=100u8).all(|t| bands.iter().any(|b| b.low <= t && t <= b.high))
        && bands.first().map(|b| b.low) == Some(0)
        && bands.last().map(|b| b.high) == Some(100)
}

#[test]
fn random_boundary_edits_keep_invariants() {
    let mut rng = Lcg(0x5eed);
    for round in 0..40 {
        let mut bands = band::default_bands();
        // Vary the band count between rounds.
        for _ in 0..(round % 5) {
            let i = rng.below(bands.len() as u64) as usize;
            if bands.len() > 1 {
                bands.remove(i);
                bands = editor::renormalize(&bands);
            }
        }
        assert_valid(&bands);

        for _ in 0..200 {
            let index = rng.below(bands.len() as u64) as usize;
            let a = rng.below(101) as u8;
            let b = rng.below(101) as u8;
            let (low, high) = (a.min(b), a.max(b));
            bands = editor::move_boundary(&bands, index, low, high).unwrap();
            assert_valid(&bands);
        }
    }
}

#[test]
fn edits_at_domain_edges_keep_invariants() {
    let mut bands = band::default_bands();
    let last = bands.len() - 1;
    for (index, low, high) in [
        (0, 0, 0),
        (0, 0, 100),
        (last, 0, 100),
        (last, 100, 100),
        (3, 100, 100),
        (3, 0, 0),
        (1, 99, 100),
        (5, 0, 1),
    ] {
        bands = editor::move_boundary(&bands, index, low, high).unwrap();
        assert_valid(&bands);
        assert_eq!(bands.len(), 7);
    }
}

#[test]
fn singleton_partition_always_spans_domain() {
    let mut bands = vec![Band::new(0, 100, 60)];
    for (low, high) in [(0, 0), (50, 50), (100, 100), (20, 80)] {
        bands = editor::move_boundary(&bands, 0, low, high).unwrap();
        assert_eq!(bands, vec![Band::new(0, 100, 60)]);
    }
}

#[test]
fn editing_band_two_low_only_moves_band_one() {
    let bands = editor::move_boundary(&band::default_bands(), 2, 55, 59).unwrap();
    let defaults = band::default_bands();
    assert_eq!(bands[1].high, 54);
    assert_eq!(bands[0], defaults[0]);
    assert_eq!(bands[3..], defaults[3..]);
}

#[test]
fn remove_then_add_restores_full_coverage() {
    let mut rng = Lcg(42);
    for _ in 0..20 {
        let mut ed = PartitionEditor::new(BandPartition::default());
        while ed.bands().len() > 1 {
            let index = rng.below(ed.bands().len() as u64) as usize;
            ed.remove_band(index).unwrap();
            assert_valid(ed.bands());

            ed.add_band(50).unwrap();
            assert!(covers_domain(ed.bands()));

            let last = ed.bands().len() - 1;
            ed.remove_band(last).unwrap();
            assert_valid(ed.bands());

            if rng.below(3) == 0 {
                break;
            }
        }
        assert!(ed.commit().is_ok());
    }
}

#[test]
fn adding_up_to_the_limit_commits_cleanly() {
    let mut ed = PartitionEditor::new(BandPartition::new(vec![Band::new(0, 100, 0)]).unwrap());
    for i in 1..MAX_BANDS {
        ed.add_band((i * 2) as u8).unwrap();
        assert!(covers_domain(ed.bands()));
        let committed = ed.commit().unwrap();
        assert_eq!(committed.len(), i + 1);
    }
    assert_eq!(
        ed.add_band(0).unwrap_err(),
        EditError::TooManyBands { max: MAX_BANDS }
    );
}

#[test]
fn lookup_is_total_over_edited_partitions() {
    let mut rng = Lcg(7);
    let mut bands = band::default_bands();
    for _ in 0..50 {
        let index = rng.below(bands.len() as u64) as usize;
        let low = rng.below(101) as u8;
        let high = low.max(rng.below(101) as u8);
        bands = editor::move_boundary(&bands, index, low, high).unwrap();

        let partition = BandPartition::new(bands.clone()).unwrap();
        let speeds: Vec<u8> = bands.iter().map(|b| b.speed).collect();
        for t in [f64::NEG_INFINITY, -20.0, 0.0, 33.3, 50.5, 99.9, 100.0, 180.0, f64::INFINITY] {
            assert!(speeds.contains(&partition.speed_for(Some(t))));
        }
        assert_eq!(partition.speed_for(None), FALLBACK_SPEED);
    }
}

struct Fixed(TempReadings);

impl SensorProvider for Fixed {
    fn read_temps(&mut self) -> TempReadings {
        self.0
    }
}

#[test]
fn max_mode_ignores_temperature_and_manual_values() {
    let mut state = EngineState::new(Mode::Auto, 12, 88, BandPartition::default());
    for temp in [None, Some(5.0), Some(72.0), Some(120.0)] {
        state.record_temps(TempReadings { cpu_c: temp, gpu_c: temp });
        let commands = state.set_mode(Mode::Max);
        assert!(commands.iter().all(|c| c.duty == 100));
        assert_eq!(state.target(Fan::Cpu), 100);
        assert_eq!(state.target(Fan::Gpu), 100);
    }
    assert_eq!(state.fan(Fan::Cpu).manual_duty, 12);
}

#[test]
fn auto_manual_auto_reproduces_target() {
    let mut state = EngineState::new(Mode::Auto, 30, 30, BandPartition::default());
    state.record_temps(TempReadings {
        cpu_c: Some(83.0),
        gpu_c: Some(41.0),
    });
    let before = state.set_mode(Mode::Auto);
    state.set_mode(Mode::Manual);
    let after = state.set_mode(Mode::Auto);
    assert_eq!(before, after);
    assert_eq!(after[0].duty, 85);
    assert_eq!(after[1].duty, 20);
}

#[test]
fn failed_send_keeps_previous_applied_value() {
    let dir = tempfile::tempdir().unwrap();
    let store = DutyStore::new(dir.path().join("FanControl"));
    store.write(Fan::Cpu, 25).unwrap();
    let channel = HardwareChannel::new(
        ServicePipe::new(dir.path().join("no-service.sock"), Duration::from_millis(100)),
        store,
    );

    let mut state = EngineState::new(Mode::Manual, 25, 25, BandPartition::default());
    let command = state.set_manual_duty(Fan::Cpu, 60).unwrap();
    let results = control::dispatch(&mut state, &channel, &[command]);
    let (_, outcome) = &results[0];
    assert!(!outcome.success);
    assert!(!outcome.detail.is_empty());

    let mut sensors = Fixed(TempReadings::default());
    control::tick(&mut state, &mut sensors, &channel);
    assert_eq!(state.fan(Fan::Cpu).last_applied, Some(25));
    assert_eq!(channel.read_applied(Fan::Cpu), Some(25));
    assert_eq!(state.fan(Fan::Cpu).last_commanded, Some(60));
}

#[derive(Default)]
struct RecordingChannel {
    applied: RefCell<HashMap<Fan, u8>>,
}

impl DutyChannel for RecordingChannel {
    fn apply(&self, fan: Fan, duty: u8) -> ApplyOutcome {
        self.applied.borrow_mut().insert(fan, duty);
        ApplyOutcome::ok("00")
    }

    fn read_applied(&self, fan: Fan) -> Option<u8> {
        self.applied.borrow().get(&fan).copied()
    }
}

#[test]
fn mode_change_wins_over_auto_batch_waiting_to_send() {
    let channel = RecordingChannel::default();
    let mut state = EngineState::new(Mode::Auto, 50, 50, BandPartition::default());
    state.record_temps(TempReadings {
        cpu_c: Some(45.0),
        gpu_c: Some(45.0),
    });

    // Loop picks auto targets, then a Max request sends before the loop does.
    let batch = state.take_pending();
    let max = state.set_mode(Mode::Max);
    control::dispatch(&mut state, &channel, &max);
    let late = state.claim(batch);
    control::send(&channel, &late);

    assert_eq!(channel.read_applied(Fan::Cpu), Some(100));
    assert_eq!(channel.read_applied(Fan::Gpu), Some(100));

    // Following ticks keep Max in place.
    let mut sensors = Fixed(TempReadings {
        cpu_c: Some(45.0),
        gpu_c: Some(45.0),
    });
    assert!(control::tick(&mut state, &mut sensors, &channel).is_empty());
    assert_eq!(state.target(Fan::Cpu), 100);

    // Back in auto, the dropped batch is recomputed and sent.
    let auto = state.set_mode(Mode::Auto);
    control::dispatch(&mut state, &channel, &auto);
    assert_eq!(channel.read_applied(Fan::Cpu), Some(20));
}
