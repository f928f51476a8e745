// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! Engine context and control loop.
//!
//! [`EngineState`] is the single place holding the process-wide mode, both
//! fan channels and the band partition (plus an optional open edit). It is
//! created once from the loaded [`Config`] and every operation goes through
//! it. Its methods only compute and record; the duty commands they return
//! are sent by the caller, so state can be locked for bookkeeping without
//! holding the lock across hardware I/O.

use crate::band::{Band, BandPartition};
use crate::channel::{ApplyOutcome, DutyChannel};
use crate::config::Config;
use crate::editor::PartitionEditor;
use crate::error::EditError;
use crate::mode::{self, Fan, FanChannelState, Mode};
use crate::sensors::{SensorProvider, TempReadings};
use serde::{Deserialize, Serialize};

/// A duty to send to one fan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DutyCommand {
    pub fan: Fan,
    pub duty: u8,
}

/// Auto commands picked by the control loop, stamped with the engine
/// generation they were computed against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingBatch {
    generation: u64,
    commands: Vec<DutyCommand>,
}

impl PendingBatch {
    pub fn commands(&self) -> &[DutyCommand] {
        &self.commands
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

/// Everything the control loop and foreground operations share.
#[derive(Debug, Clone)]
pub struct EngineState {
    mode: Mode,
    cpu: FanChannelState,
    gpu: FanChannelState,
    partition: BandPartition,
    editor: Option<PartitionEditor>,
    /// Bumped by every foreground operation that issues duty commands.
    generation: u64,
}

impl EngineState {
    pub fn new(mode: Mode, manual_cpu: u8, manual_gpu: u8, partition: BandPartition) -> Self {
        Self {
            mode,
            cpu: FanChannelState::new(manual_cpu),
            gpu: FanChannelState::new(manual_gpu),
            partition,
            editor: None,
            generation: 0,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.mode,
            config.manual_cpu_duty,
            config.manual_gpu_duty,
            config.partition(),
        )
    }

    /// Replace mode, manual duties and partition with those of `config` and
    /// return the commands that apply the mode. Any open edit is dropped;
    /// temperatures and applied duties are kept.
    pub fn apply_config(&mut self, config: &Config) -> Vec<DutyCommand> {
        self.cpu.manual_duty = config.manual_cpu_duty.min(100);
        self.gpu.manual_duty = config.manual_gpu_duty.min(100);
        self.partition = config.partition();
        if self.editor.take().is_some() {
            log::info!("Dropped open partition edit on reload");
        }
        self.set_mode(config.mode)
    }

    /// Copy the persisted fields into `config`.
    pub fn write_config(&self, config: &mut Config) {
        config.mode = self.mode;
        config.manual_cpu_duty = self.cpu.manual_duty;
        config.manual_gpu_duty = self.gpu.manual_duty;
        config.bands = self.partition.bands().to_vec();
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn fan(&self, fan: Fan) -> &FanChannelState {
        match fan {
            Fan::Cpu => &self.cpu,
            Fan::Gpu => &self.gpu,
        }
    }

    fn fan_mut(&mut self, fan: Fan) -> &mut FanChannelState {
        match fan {
            Fan::Cpu => &mut self.cpu,
            Fan::Gpu => &mut self.gpu,
        }
    }

    /// The committed partition.
    pub fn partition(&self) -> &BandPartition {
        &self.partition
    }

    /// Bands used for auto mode: the working copy while an edit is open, so
    /// edits take effect live, else the committed partition.
    pub fn active_bands(&self) -> &[Band] {
        match &self.editor {
            Some(editor) => editor.bands(),
            None => self.partition.bands(),
        }
    }

    /// Duty `fan` should run at right now.
    pub fn target(&self, fan: Fan) -> u8 {
        let state = self.fan(fan);
        mode::resolve_target(self.mode, state.manual_duty, self.active_bands(), state.temp_c)
    }

    // -----------------------------------------------------------------------
    // Foreground operations
    // -----------------------------------------------------------------------

    /// Switch mode and return the commands that apply it immediately.
    ///
    /// Manual re-applies the remembered duties, Max sends 100, Auto sends
    /// the target for the latest temperature snapshot.
    pub fn set_mode(&mut self, mode: Mode) -> Vec<DutyCommand> {
        if mode != self.mode {
            log::info!("Mode {} -> {mode}", self.mode);
        }
        self.mode = mode;
        self.generation += 1;
        Fan::ALL
            .iter()
            .map(|&fan| DutyCommand {
                fan,
                duty: self.target(fan),
            })
            .collect()
    }

    /// Remember a manual duty. In manual mode it is applied straight away.
    pub fn set_manual_duty(&mut self, fan: Fan, duty: u8) -> Option<DutyCommand> {
        let duty = duty.min(100);
        self.fan_mut(fan).manual_duty = duty;
        if self.mode != Mode::Manual {
            return None;
        }
        self.generation += 1;
        Some(DutyCommand { fan, duty })
    }

    /// The open edit session, starting one on the committed partition if needed.
    pub fn editor(&mut self) -> &mut PartitionEditor {
        let partition = &self.partition;
        self.editor
            .get_or_insert_with(|| PartitionEditor::new(partition.clone()))
    }

    pub fn is_editing(&self) -> bool {
        self.editor.is_some()
    }

    /// Close the edit session, making its working copy the committed partition.
    ///
    /// Returns the new partition, or `None` if no edit was open.
    pub fn commit_edit(&mut self) -> Result<Option<BandPartition>, EditError> {
        let Some(editor) = self.editor.as_mut() else {
            return Ok(None);
        };
        let partition = editor.commit()?;
        self.partition = partition.clone();
        self.editor = None;
        log::info!("Committed partition with {} band(s)", partition.len());
        Ok(Some(partition))
    }

    /// Close the edit session, discarding its working copy.
    pub fn cancel_edit(&mut self) -> bool {
        match self.editor.take() {
            Some(editor) => {
                self.partition = editor.cancel();
                log::info!("Discarded partition edits");
                true
            }
            None => false,
        }
    }

    // -----------------------------------------------------------------------
    // Control loop bookkeeping
    // -----------------------------------------------------------------------

    pub fn record_temps(&mut self, readings: TempReadings) {
        self.cpu.temp_c = readings.cpu_c;
        self.gpu.temp_c = readings.gpu_c;
    }

    pub fn record_applied(&mut self, fan: Fan, applied: Option<u8>) {
        self.fan_mut(fan).last_applied = applied;
    }

    /// Remember that a command was issued, whether or not it succeeded.
    /// Failed sends are not retried; they show up as a difference between
    /// commanded and applied duty.
    pub fn record_commanded(&mut self, command: DutyCommand) {
        self.fan_mut(command.fan).last_commanded = Some(command.duty);
    }

    /// Commands the periodic loop should send: in auto mode, each fan whose
    /// target differs from what was last commanded.
    pub fn pending_commands(&self) -> Vec<DutyCommand> {
        if self.mode != Mode::Auto {
            return Vec::new();
        }
        Fan::ALL
            .iter()
            .filter_map(|&fan| {
                let duty = self.target(fan);
                (self.fan(fan).last_commanded != Some(duty)).then_some(DutyCommand { fan, duty })
            })
            .collect()
    }

    /// [`pending_commands`](Self::pending_commands) stamped with the current
    /// generation. Nothing is recorded until the batch is claimed.
    pub fn take_pending(&self) -> PendingBatch {
        PendingBatch {
            generation: self.generation,
            commands: self.pending_commands(),
        }
    }

    /// Record and return the batch's commands if no foreground operation
    /// issued commands since it was taken, else drop it. A dropped batch is
    /// recomputed on the next tick.
    pub fn claim(&mut self, batch: PendingBatch) -> Vec<DutyCommand> {
        if batch.generation != self.generation {
            if !batch.is_empty() {
                log::debug!(
                    "Dropping {} stale auto command(s) from generation {}",
                    batch.commands.len(),
                    batch.generation
                );
            }
            return Vec::new();
        }
        for &cmd in &batch.commands {
            self.record_commanded(cmd);
        }
        batch.commands
    }
}

// ---------------------------------------------------------------------------
// Single-threaded drivers
// ---------------------------------------------------------------------------

/// Send commands through a channel, recording each as commanded.
pub fn dispatch<C: DutyChannel + ?Sized>(
    state: &mut EngineState,
    channel: &C,
    commands: &[DutyCommand],
) -> Vec<(DutyCommand, ApplyOutcome)> {
    for &cmd in commands {
        state.record_commanded(cmd);
    }
    send(channel, commands)
}

/// Run one control loop step: read temperatures and applied duties, then
/// send whatever auto mode needs.
pub fn tick<S, C>(
    state: &mut EngineState,
    sensors: &mut S,
    channel: &C,
) -> Vec<(DutyCommand, ApplyOutcome)>
where
    S: SensorProvider + ?Sized,
    C: DutyChannel + ?Sized,
{
    state.record_temps(sensors.read_temps());
    for fan in Fan::ALL {
        state.record_applied(fan, channel.read_applied(fan));
    }
    let batch = state.take_pending();
    let commands = state.claim(batch);
    send(channel, &commands)
}

/// Send already recorded commands through a channel.
pub fn send<C: DutyChannel + ?Sized>(
    channel: &C,
    commands: &[DutyCommand],
) -> Vec<(DutyCommand, ApplyOutcome)> {
    commands
        .iter()
        .map(|&cmd| (cmd, channel.apply(cmd.fan, cmd.duty)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::band::FALLBACK_SPEED;
    use std::cell::RefCell;
    use std::collections::HashMap;

    #[derive(Default)]
    struct FakeChannel {
        applied: RefCell<HashMap<Fan, u8>>,
        sent: RefCell<Vec<DutyCommand>>,
        offline: bool,
    }

    impl DutyChannel for FakeChannel {
        fn apply(&self, fan: Fan, duty: u8) -> ApplyOutcome {
            self.sent.borrow_mut().push(DutyCommand { fan, duty });
            if self.offline {
                return ApplyOutcome::failed("pipe busy");
            }
            self.applied.borrow_mut().insert(fan, duty);
            ApplyOutcome::ok("00")
        }

        fn read_applied(&self, fan: Fan) -> Option<u8> {
            self.applied.borrow().get(&fan).copied()
        }
    }

    struct FixedSensors(TempReadings);

    impl SensorProvider for FixedSensors {
        fn read_temps(&mut self) -> TempReadings {
            self.0
        }
    }

    fn readings(cpu: Option<f64>, gpu: Option<f64>) -> TempReadings {
        TempReadings { cpu_c: cpu, gpu_c: gpu }
    }

    #[test]
    fn test_auto_tick_sends_once() {
        let mut state = EngineState::new(Mode::Auto, 50, 50, BandPartition::default());
        let mut sensors = FixedSensors(readings(Some(72.0), Some(45.0)));
        let channel = FakeChannel::default();

        let results = tick(&mut state, &mut sensors, &channel);
        assert_eq!(results.len(), 2);
        assert_eq!(channel.read_applied(Fan::Cpu), Some(70));
        assert_eq!(channel.read_applied(Fan::Gpu), Some(20));

        // Same temperatures: nothing new to send.
        assert!(tick(&mut state, &mut sensors, &channel).is_empty());
        assert_eq!(state.fan(Fan::Cpu).last_applied, Some(70));

        sensors.0.cpu_c = Some(91.0);
        let results = tick(&mut state, &mut sensors, &channel);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0, DutyCommand { fan: Fan::Cpu, duty: 100 });
    }

    #[test]
    fn test_manual_and_max_ticks_are_quiet() {
        let channel = FakeChannel::default();
        let mut sensors = FixedSensors(readings(Some(95.0), Some(95.0)));
        for mode in [Mode::Manual, Mode::Max] {
            let mut state = EngineState::new(mode, 30, 30, BandPartition::default());
            assert!(tick(&mut state, &mut sensors, &channel).is_empty());
        }
        assert!(channel.sent.borrow().is_empty());
    }

    #[test]
    fn test_mode_switch_forces_commands() {
        let mut state = EngineState::new(Mode::Manual, 30, 40, BandPartition::default());
        state.record_temps(readings(Some(65.0), None));

        let max = state.set_mode(Mode::Max);
        assert!(max.iter().all(|c| c.duty == 100));

        let auto = state.set_mode(Mode::Auto);
        assert_eq!(
            auto,
            vec![
                DutyCommand { fan: Fan::Cpu, duty: 50 },
                DutyCommand { fan: Fan::Gpu, duty: FALLBACK_SPEED },
            ]
        );

        let manual = state.set_mode(Mode::Manual);
        assert_eq!(
            manual,
            vec![
                DutyCommand { fan: Fan::Cpu, duty: 30 },
                DutyCommand { fan: Fan::Gpu, duty: 40 },
            ]
        );
    }

    #[test]
    fn test_manual_duty_outside_manual_mode_is_remembered() {
        let mut state = EngineState::new(Mode::Max, 30, 40, BandPartition::default());
        assert_eq!(state.set_manual_duty(Fan::Cpu, 75), None);
        assert_eq!(state.target(Fan::Cpu), 100);
        state.set_mode(Mode::Manual);
        assert_eq!(state.target(Fan::Cpu), 75);
        assert_eq!(
            state.set_manual_duty(Fan::Gpu, 120),
            Some(DutyCommand { fan: Fan::Gpu, duty: 100 })
        );
    }

    #[test]
    fn test_failed_send_is_not_retried() {
        let mut state = EngineState::new(Mode::Auto, 50, 50, BandPartition::default());
        let mut sensors = FixedSensors(readings(Some(62.0), None));
        let channel = FakeChannel {
            offline: true,
            ..Default::default()
        };

        let results = tick(&mut state, &mut sensors, &channel);
        assert!(results.iter().all(|(_, o)| !o.success && !o.detail.is_empty()));
        assert_eq!(state.fan(Fan::Cpu).last_applied, None);
        assert_eq!(state.fan(Fan::Cpu).last_commanded, Some(50));

        assert!(tick(&mut state, &mut sensors, &channel).is_empty());
        assert_eq!(channel.sent.borrow().len(), 2);
    }

    #[test]
    fn test_auto_batch_taken_before_max_is_dropped() {
        let mut state = EngineState::new(Mode::Auto, 50, 50, BandPartition::default());
        let channel = FakeChannel::default();
        state.record_temps(readings(Some(45.0), Some(45.0)));

        // The loop picks its auto targets, then a mode change lands first.
        let batch = state.take_pending();
        assert_eq!(batch.commands().len(), 2);
        let max = state.set_mode(Mode::Max);
        dispatch(&mut state, &channel, &max);

        assert!(state.claim(batch).is_empty());
        assert_eq!(channel.read_applied(Fan::Cpu), Some(100));
        assert_eq!(channel.read_applied(Fan::Gpu), Some(100));
        assert_eq!(state.fan(Fan::Cpu).last_commanded, Some(100));
        assert!(state.pending_commands().is_empty());
    }

    #[test]
    fn test_dropped_batch_is_recomputed() {
        let mut state = EngineState::new(Mode::Auto, 50, 50, BandPartition::default());
        state.record_temps(readings(Some(45.0), None));

        let batch = state.take_pending();
        assert_eq!(state.set_manual_duty(Fan::Cpu, 80), None);
        assert_eq!(state.claim(batch.clone()).len(), 2);

        // Manual edits in manual mode issue a command and invalidate batches.
        state.set_mode(Mode::Manual);
        let stale = PendingBatch {
            generation: state.generation(),
            ..batch
        };
        state.set_manual_duty(Fan::Cpu, 80);
        assert!(state.claim(stale).is_empty());

        let auto = state.set_mode(Mode::Auto);
        dispatch(&mut state, &FakeChannel::default(), &auto);
        assert!(state.take_pending().is_empty());
        state.record_temps(readings(Some(85.0), None));
        let batch = state.take_pending();
        assert_eq!(
            state.claim(batch),
            vec![DutyCommand { fan: Fan::Cpu, duty: 85 }]
        );
        assert_eq!(state.fan(Fan::Cpu).last_commanded, Some(85));
    }

    #[test]
    fn test_apply_config_replaces_settings_and_keeps_readings() {
        let mut state = EngineState::new(Mode::Auto, 50, 50, BandPartition::default());
        state.record_temps(readings(Some(72.0), Some(30.0)));
        state.editor().set_speed(0, 90).unwrap();
        let before = state.generation();

        let config = Config {
            mode: Mode::Manual,
            manual_cpu_duty: 40,
            manual_gpu_duty: 60,
            ..Config::default()
        };
        let commands = state.apply_config(&config);
        assert_eq!(
            commands,
            vec![
                DutyCommand { fan: Fan::Cpu, duty: 40 },
                DutyCommand { fan: Fan::Gpu, duty: 60 },
            ]
        );
        assert!(!state.is_editing());
        assert!(state.generation() > before);
        assert_eq!(state.fan(Fan::Cpu).temp_c, Some(72.0));
    }

    #[test]
    fn test_live_edit_and_cancel() {
        let mut state = EngineState::new(Mode::Auto, 50, 50, BandPartition::default());
        state.record_temps(readings(Some(55.0), Some(55.0)));
        assert_eq!(state.target(Fan::Cpu), 35);

        state.editor().set_speed(2, 60).unwrap();
        assert_eq!(state.target(Fan::Cpu), 60);
        assert_eq!(state.pending_commands().len(), 2);

        assert!(state.cancel_edit());
        assert!(!state.is_editing());
        assert_eq!(state.target(Fan::Cpu), 35);
    }

    #[test]
    fn test_commit_edit_persists_to_config() {
        let mut state = EngineState::new(Mode::Auto, 50, 50, BandPartition::default());
        state.editor().move_boundary(2, 55, 59).unwrap();
        let committed = state.commit_edit().unwrap().unwrap();
        assert_eq!(committed.bands()[1], Band::new(40, 54, 20));
        assert_eq!(state.commit_edit().unwrap(), None);

        let mut config = Config::default();
        state.write_config(&mut config);
        assert_eq!(config.bands, committed.into_bands());
        assert_eq!(config.mode, Mode::Auto);
    }
}
