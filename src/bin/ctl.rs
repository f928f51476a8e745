// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! nitrofan: command line client that talks to the nitrofan daemon over a
//! Unix domain socket to show status, switch modes and edit the band
//! partition.

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use nitrofan::band::Band;
use nitrofan::config;
use nitrofan::mode::{Fan, Mode};
use nitrofan::protocol::{self, CommandResult, FanStatusInfo, Request, Response};
use std::io::{self, BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::time::Duration;

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(name = "nitrofan", about = "Laptop fan control client")]
struct Cli {
    /// Path to the daemon socket.
    #[arg(short, long, default_value = config::DEFAULT_SOCKET_PATH)]
    socket: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show mode, temperatures and fan duties.
    Status,
    /// Switch both fans to manual, max or auto.
    Mode {
        #[arg(value_parser = parse_mode)]
        mode: Mode,
    },
    /// Set the manual duty of one fan (applied right away in manual mode).
    Duty {
        #[arg(value_parser = parse_fan)]
        fan: Fan,
        #[arg(value_parser = clap::value_parser!(u8).range(0..=100))]
        percent: u8,
    },
    /// Show the auto-mode band partition.
    Bands,
    /// Move the boundaries of band INDEX.
    Edit {
        index: usize,
        #[arg(value_parser = clap::value_parser!(u8).range(0..=100))]
        low: u8,
        #[arg(value_parser = clap::value_parser!(u8).range(0..=100))]
        high: u8,
    },
    /// Set the fan speed of band INDEX.
    Speed {
        index: usize,
        #[arg(value_parser = clap::value_parser!(u8).range(0..=100))]
        percent: u8,
    },
    /// Append a band at the top of the temperature range.
    Add {
        #[arg(default_value_t = 50, value_parser = clap::value_parser!(u8).range(0..=100))]
        percent: u8,
    },
    /// Remove band INDEX and spread the others over the range.
    Remove { index: usize },
    /// Save the edited partition.
    Commit,
    /// Discard partition edits.
    Cancel,
    /// Save the current settings to the config file.
    Save,
    /// Reload the config file.
    Reload,
}

fn parse_mode(s: &str) -> Result<Mode, String> {
    s.parse()
}

fn parse_fan(s: &str) -> Result<Fan, String> {
    s.parse()
}

impl Command {
    fn request(&self) -> Request {
        match *self {
            Command::Status => Request::GetStatus,
            Command::Mode { mode } => Request::SetMode { mode },
            Command::Duty { fan, percent } => Request::SetManualDuty { fan, duty: percent },
            Command::Bands => Request::GetPartition,
            Command::Edit { index, low, high } => Request::MoveBoundary { index, low, high },
            Command::Speed { index, percent } => Request::SetBandSpeed {
                index,
                speed: percent,
            },
            Command::Add { percent } => Request::AddBand { speed: percent },
            Command::Remove { index } => Request::RemoveBand { index },
            Command::Commit => Request::CommitPartition,
            Command::Cancel => Request::CancelPartition,
            Command::Save => Request::SaveConfig,
            Command::Reload => Request::ReloadConfig,
        }
    }
}

// ---------------------------------------------------------------------------
// Connection
// ---------------------------------------------------------------------------

struct Connection {
    stream: UnixStream,
    reader: BufReader<UnixStream>,
}

impl Connection {
    fn connect(path: &str) -> io::Result<Self> {
        let stream = UnixStream::connect(path)?;
        // Mode changes wait on the fan service, allow for its timeout.
        stream.set_read_timeout(Some(Duration::from_secs(10)))?;
        let reader = BufReader::new(stream.try_clone()?);
        Ok(Self { stream, reader })
    }

    fn send_request(&mut self, req: &Request) -> io::Result<Response> {
        let encoded = protocol::encode(req).map_err(|e| {
            io::Error::new(io::ErrorKind::InvalidData, format!("Encode error: {e}"))
        })?;
        self.stream.write_all(encoded.as_bytes())?;
        self.stream.flush()?;

        let mut line = String::new();
        self.reader.read_line(&mut line)?;
        protocol::decode(&line).map_err(|e| {
            io::Error::new(io::ErrorKind::InvalidData, format!("Decode error: {e}"))
        })
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();
    let mut conn = Connection::connect(&cli.socket).with_context(|| {
        format!(
            "Could not connect to daemon at {}. Is nitrofan-daemon running?",
            cli.socket
        )
    })?;
    log::debug!("Connected to daemon at {}", cli.socket);

    let response = conn
        .send_request(&cli.command.request())
        .context("Daemon did not answer")?;

    match response {
        Response::Status {
            mode,
            fans,
            editing,
        } => print_status(mode, &fans, editing),
        Response::Partition { bands, editing } => print_bands(&bands, editing),
        Response::Applied { message, results } => {
            println!("{message}");
            print_results(&results);
            if results.iter().any(|r| !r.outcome.success) {
                bail!("Some fans could not be set");
            }
        }
        Response::Ok { message } => println!("{message}"),
        Response::Error { message } => bail!(message),
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

fn print_status(mode: Mode, fans: &[FanStatusInfo], editing: bool) {
    println!("Mode: {mode}{}", if editing { " (partition edit open)" } else { "" });
    for f in fans {
        println!(
            "{:>3}  temp {:>7}  target {:>3}%  applied {:>4}  manual {:>3}%",
            f.fan.to_string().to_uppercase(),
            f.temp_c
                .map(|t| format!("{t:.1}°C"))
                .unwrap_or_else(|| "?".to_string()),
            f.target,
            f.last_applied
                .map(|d| format!("{d}%"))
                .unwrap_or_else(|| "?".to_string()),
            f.manual_duty,
        );
    }
}

fn print_bands(bands: &[Band], editing: bool) {
    if editing {
        println!("Working copy (not saved, use `commit` or `cancel`):");
    }
    let last = bands.len().saturating_sub(1);
    for (i, b) in bands.iter().enumerate() {
        let low = if i == 0 {
            "≤0".to_string()
        } else {
            b.low.to_string()
        };
        let high = if i == last {
            "100+".to_string()
        } else {
            b.high.to_string()
        };
        println!("{i:>2}  {low:>4}–{high:<4}°C  {:>3}%", b.speed);
    }
}

fn print_results(results: &[CommandResult]) {
    for r in results {
        if r.outcome.success {
            println!("  {} fan -> {}%", r.fan, r.duty);
        } else {
            println!("  {} fan -> {}% FAILED: {}", r.fan, r.duty, r.outcome.detail);
        }
    }
}
