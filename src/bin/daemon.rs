// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! nitrofan-daemon: system service that owns the fan service channel, runs
//! the control loop, and accepts commands from clients over a Unix domain
//! socket.

use clap::Parser;
use nitrofan::channel::{ApplyOutcome, DutyChannel, HardwareChannel, ServicePipe};
use nitrofan::config::{self, Config};
use nitrofan::control::{DutyCommand, EngineState};
use nitrofan::error::EditError;
use nitrofan::mode::Fan;
use nitrofan::protocol::{self, CommandResult, FanStatusInfo, Request, Response};
use nitrofan::sensors::{self, HwmonSensors, TempReadings};
use nitrofan::store::DutyStore;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::{Mutex, MutexGuard};
use tokio::task;
use tokio::time::{self, Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Extra time allowed on top of the socket timeouts before a service call
/// is abandoned.
const CALL_GRACE: Duration = Duration::from_secs(1);

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(name = "nitrofan-daemon", about = "Laptop fan control daemon")]
struct Cli {
    /// Path to the configuration file.
    #[arg(short, long, default_value = config::DEFAULT_CONFIG_PATH)]
    config: String,

    /// Override the socket path.
    #[arg(short, long)]
    socket: Option<String>,
}

// ---------------------------------------------------------------------------
// Shared daemon state
// ---------------------------------------------------------------------------

struct DaemonState {
    engine: EngineState,
    config: Config,
    config_path: PathBuf,
}

impl DaemonState {
    /// Copy the engine into the config and write it to disk.
    fn persist(&mut self) -> Result<(), String> {
        self.engine.write_config(&mut self.config);
        config::save_config(&self.config_path, &self.config)
            .map_err(|e| format!("Failed to save config: {e}"))
    }
}

type SharedState = Arc<Mutex<DaemonState>>;

/// Blocking hardware access, run off the async workers with a time bound.
#[derive(Clone)]
struct Hardware {
    channel: Arc<HardwareChannel>,
    sensors: Arc<std::sync::Mutex<HwmonSensors>>,
    timeout: Duration,
    /// Held from choosing commands until they are sent, so duties reach the
    /// service in the order they were decided. Taken before the state lock.
    send_gate: Arc<Mutex<()>>,
}

impl Hardware {
    async fn gate(&self) -> MutexGuard<'_, ()> {
        self.send_gate.lock().await
    }

    async fn apply(&self, cmd: DutyCommand) -> ApplyOutcome {
        let channel = self.channel.clone();
        let call = task::spawn_blocking(move || channel.apply(cmd.fan, cmd.duty));

        match time::timeout(self.timeout, call).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => ApplyOutcome::failed(format!("fan service call aborted: {e}")),
            Err(_) => {
                log::warn!("Applying {}% to {} fan timed out", cmd.duty, cmd.fan);
                ApplyOutcome::failed(format!(
                    "fan service call timed out after {} ms",
                    self.timeout.as_millis()
                ))
            }
        }
    }

    async fn apply_all(
        &self,
        _gate: &MutexGuard<'_, ()>,
        commands: &[DutyCommand],
    ) -> Vec<CommandResult> {
        let mut results = Vec::with_capacity(commands.len());
        for &cmd in commands {
            results.push(CommandResult::new(cmd, self.apply(cmd).await));
        }
        results
    }

    /// Read temperatures and the mirrored duties in one blocking call.
    ///
    /// Skipped while an earlier read is still stuck on the sensors.
    async fn read(&self) -> Option<(TempReadings, [(Fan, Option<u8>); 2])> {
        let channel = self.channel.clone();
        let provider = self.sensors.clone();
        let read = task::spawn_blocking(move || {
            let readings = sensors::try_read_temps(&*provider)?;
            let applied = Fan::ALL.map(|fan| (fan, channel.read_applied(fan)));
            Some((readings, applied))
        });

        match time::timeout(self.timeout, read).await {
            Ok(Ok(Some(result))) => Some(result),
            Ok(Ok(None)) => {
                log::warn!("Previous sensor read still running, skipping this poll");
                None
            }
            Ok(Err(e)) => {
                log::error!("Sensor read aborted: {e}");
                None
            }
            Err(_) => {
                log::warn!("Sensor read timed out");
                None
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config_path = config::resolve_config_path(Some(&cli.config));
    let cfg = config::load_config(&config_path).unwrap_or_else(|e| {
        log::warn!("Could not load config: {e}, using defaults");
        Config::default()
    });

    if !nix::unistd::Uid::effective().is_root() {
        log::warn!("Not running as root; the fan service and duty store may refuse access");
    }

    let socket_path = cli
        .socket
        .clone()
        .unwrap_or_else(|| cfg.daemon.socket_path.clone());

    let call_timeout = Duration::from_millis(cfg.daemon.channel_timeout_ms);
    let hw = Hardware {
        channel: Arc::new(HardwareChannel::new(
            ServicePipe::new(&cfg.daemon.service_path, call_timeout),
            DutyStore::new(&cfg.daemon.store_dir),
        )),
        sensors: Arc::new(std::sync::Mutex::new(HwmonSensors::new(
            cfg.sensors.cpu_sensor.clone(),
            cfg.sensors.gpu_sensor.clone(),
        ))),
        timeout: call_timeout + CALL_GRACE,
        send_gate: Arc::new(Mutex::new(())),
    };

    log::info!(
        "Fan service at {}, mirroring duties in {}",
        cfg.daemon.service_path,
        cfg.daemon.store_dir
    );

    // Restore the persisted mode
    let mut engine = EngineState::from_config(&cfg);
    if let Some((readings, applied)) = hw.read().await {
        engine.record_temps(readings);
        for (fan, duty) in applied {
            engine.record_applied(fan, duty);
        }
    }
    let initial = engine.set_mode(engine.mode());
    for &cmd in &initial {
        engine.record_commanded(cmd);
    }
    {
        let gate = hw.gate().await;
        log_failures(&hw.apply_all(&gate, &initial).await);
    }

    let poll_interval = cfg.daemon.poll_interval_ms;
    let state: SharedState = Arc::new(Mutex::new(DaemonState {
        engine,
        config: cfg,
        config_path,
    }));

    // Clean up old socket file
    let _ = std::fs::remove_file(&socket_path);
    let listener = UnixListener::bind(&socket_path)?;

    // Make socket accessible to non-root users
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o666);
        std::fs::set_permissions(&socket_path, perms)?;
    }

    log::info!("Listening on {socket_path}");

    let shutdown = CancellationToken::new();

    // Signal handler
    let shutdown_signal = shutdown.clone();
    let mut sigterm = signal(SignalKind::terminate())?;
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
        log::info!("Received shutdown signal");
        shutdown_signal.cancel();
    });

    // Control loop
    let poller = tokio::spawn(run_poller(
        state.clone(),
        hw.clone(),
        poll_interval,
        shutdown.clone(),
    ));

    // Accept client connections
    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        tokio::spawn(handle_client(stream, state.clone(), hw.clone()));
                    }
                    Err(e) => {
                        log::error!("Failed to accept connection: {e}");
                    }
                }
            }
            _ = shutdown.cancelled() => {
                log::info!("Daemon shutting down");
                break;
            }
        }
    }

    // Let an in-flight poll finish; its hardware calls are already bounded.
    match time::timeout(hw.timeout * 3, poller).await {
        Ok(Ok(())) => log::info!("Control loop stopped"),
        Ok(Err(e)) => log::error!("Control loop task failed: {e}"),
        Err(_) => log::warn!("Control loop did not stop in time"),
    }

    // Cleanup socket
    let _ = std::fs::remove_file(&socket_path);
    Ok(())
}

// ---------------------------------------------------------------------------
// Control loop
// ---------------------------------------------------------------------------

async fn run_poller(state: SharedState, hw: Hardware, interval_ms: u64, shutdown: CancellationToken) {
    let mut interval = time::interval(Duration::from_millis(interval_ms));
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = interval.tick() => poll_once(&state, &hw).await,
            _ = shutdown.cancelled() => break,
        }
    }
}

async fn poll_once(state: &SharedState, hw: &Hardware) {
    let Some((readings, applied)) = hw.read().await else {
        return;
    };

    let batch = {
        let mut st = state.lock().await;
        st.engine.record_temps(readings);
        for (fan, duty) in applied {
            st.engine.record_applied(fan, duty);
        }
        st.engine.take_pending()
    };
    if batch.is_empty() {
        return;
    }

    // A foreground operation may have sent newer duties while we waited.
    let gate = hw.gate().await;
    let commands = state.lock().await.engine.claim(batch);
    for cmd in &commands {
        log::debug!("Auto: {} fan -> {}%", cmd.fan, cmd.duty);
    }
    log_failures(&hw.apply_all(&gate, &commands).await);
}

fn log_failures(results: &[CommandResult]) {
    for r in results.iter().filter(|r| !r.outcome.success) {
        log::warn!("{} fan not set to {}%: {}", r.fan, r.duty, r.outcome.detail);
    }
}

// ---------------------------------------------------------------------------
// Client connection handler
// ---------------------------------------------------------------------------

async fn handle_client(stream: UnixStream, state: SharedState, hw: Hardware) {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Ok(Some(line)) = lines.next_line().await {
        let response = match protocol::decode::<Request>(&line) {
            Ok(req) => process_request(req, &state, &hw).await,
            Err(e) => Response::Error {
                message: format!("Invalid request: {e}"),
            },
        };

        let encoded = match protocol::encode(&response) {
            Ok(s) => s,
            Err(e) => {
                log::error!("Failed to encode response: {e}");
                continue;
            }
        };

        if writer.write_all(encoded.as_bytes()).await.is_err() {
            break; // Client disconnected
        }
    }
}

async fn process_request(req: Request, state: &SharedState, hw: &Hardware) -> Response {
    match req {
        Request::GetStatus => {
            let st = state.lock().await;
            let engine = &st.engine;
            let fans = Fan::ALL
                .iter()
                .map(|&fan| {
                    let f = engine.fan(fan);
                    FanStatusInfo {
                        fan,
                        temp_c: f.temp_c,
                        manual_duty: f.manual_duty,
                        target: engine.target(fan),
                        last_commanded: f.last_commanded,
                        last_applied: f.last_applied,
                    }
                })
                .collect();

            Response::Status {
                mode: engine.mode(),
                fans,
                editing: engine.is_editing(),
            }
        }

        Request::SetMode { mode } => {
            let gate = hw.gate().await;
            let (commands, saved) = {
                let mut st = state.lock().await;
                let commands = st.engine.set_mode(mode);
                for &cmd in &commands {
                    st.engine.record_commanded(cmd);
                }
                (commands, st.persist())
            };
            if let Err(e) = saved {
                log::warn!("{e}");
            }

            let results = hw.apply_all(&gate, &commands).await;
            log_failures(&results);
            Response::Applied {
                message: format!("Mode set to {mode}"),
                results,
            }
        }

        Request::SetManualDuty { fan, duty } => {
            if duty > 100 {
                return Response::Error {
                    message: format!("Duty {duty}% out of range 0-100"),
                };
            }

            let gate = hw.gate().await;
            let command = {
                let mut st = state.lock().await;
                let command = st.engine.set_manual_duty(fan, duty);
                if let Some(cmd) = command {
                    st.engine.record_commanded(cmd);
                }
                command
            };

            match command {
                Some(cmd) => {
                    let results = hw.apply_all(&gate, &[cmd]).await;
                    log_failures(&results);
                    Response::Applied {
                        message: format!("Set {fan} fan to {duty}%"),
                        results,
                    }
                }
                None => Response::Ok {
                    message: format!("Remembered {duty}% for the {fan} fan in manual mode"),
                },
            }
        }

        Request::GetPartition => {
            let st = state.lock().await;
            partition_response(&st.engine)
        }

        Request::MoveBoundary { index, low, high } => {
            edit(state, |engine| engine.editor().move_boundary(index, low, high)).await
        }

        Request::SetBandSpeed { index, speed } => {
            edit(state, |engine| engine.editor().set_speed(index, speed)).await
        }

        Request::AddBand { speed } => {
            edit(state, |engine| engine.editor().add_band(speed).map(|_| ())).await
        }

        Request::RemoveBand { index } => {
            edit(state, |engine| engine.editor().remove_band(index)).await
        }

        Request::CommitPartition => {
            let mut st = state.lock().await;
            match st.engine.commit_edit() {
                Ok(Some(partition)) => match st.persist() {
                    Ok(()) => Response::Ok {
                        message: format!("Saved partition with {} band(s)", partition.len()),
                    },
                    Err(message) => Response::Error { message },
                },
                Ok(None) => Response::Ok {
                    message: "No partition edits to commit".to_string(),
                },
                Err(e) => Response::Error {
                    message: format!("Cannot commit partition: {e}"),
                },
            }
        }

        Request::CancelPartition => {
            let mut st = state.lock().await;
            let message = if st.engine.cancel_edit() {
                "Partition edits discarded"
            } else {
                "No partition edits to discard"
            };
            Response::Ok {
                message: message.to_string(),
            }
        }

        Request::SaveConfig => {
            let mut st = state.lock().await;
            match st.persist() {
                Ok(()) => Response::Ok {
                    message: format!("Config saved to {}", st.config_path.display()),
                },
                Err(message) => Response::Error { message },
            }
        }

        Request::ReloadConfig => {
            let gate = hw.gate().await;
            let commands = {
                let mut st = state.lock().await;
                let cfg = match config::load_config(&st.config_path) {
                    Ok(cfg) => cfg,
                    Err(e) => {
                        return Response::Error {
                            message: format!("Failed to reload config: {e}"),
                        };
                    }
                };
                if cfg.daemon != st.config.daemon || cfg.sensors != st.config.sensors {
                    log::warn!("Daemon and sensor settings take effect after a restart");
                }

                let commands = st.engine.apply_config(&cfg);
                for &cmd in &commands {
                    st.engine.record_commanded(cmd);
                }
                st.config = cfg;
                commands
            };

            let results = hw.apply_all(&gate, &commands).await;
            log_failures(&results);
            Response::Applied {
                message: "Config reloaded".to_string(),
                results,
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Partition editing
// ---------------------------------------------------------------------------

async fn edit<F>(state: &SharedState, op: F) -> Response
where
    F: FnOnce(&mut EngineState) -> Result<(), EditError>,
{
    let mut st = state.lock().await;
    match op(&mut st.engine) {
        Ok(()) => partition_response(&st.engine),
        Err(e) => Response::Error {
            message: e.to_string(),
        },
    }
}

fn partition_response(engine: &EngineState) -> Response {
    Response::Partition {
        bands: engine.active_bands().to_vec(),
        editing: engine.is_editing(),
    }
}
