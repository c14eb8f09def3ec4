use std::time::Duration;

use clap::{Args, Subcommand};
use rfbridge_session::{DispatcherConfig, SessionConfig};
use rfbridge_transport::DEFAULT_BAUD_RATE;

use crate::exit::{CliError, CliResult, USAGE};
use crate::output::OutputFormat;

pub mod attach;
pub mod compress_ir;
pub mod serve;
pub mod simulate;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a session against the built-in simulated device.
    Simulate(SimulateArgs),
    /// Run a session against a serial port.
    Attach(AttachArgs),
    /// Compress a learned IR pulse train.
    CompressIr(CompressIrArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Simulate(args) => simulate::run(args, format),
        Command::Attach(args) => attach::run(args, format),
        Command::CompressIr(args) => compress_ir::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

/// Options shared by every command that runs a device session.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Stop after this long (e.g. 30s, 1500ms). Default: run until Ctrl-C.
    #[arg(long)]
    pub duration: Option<String>,
    /// Deadline for each chunk acknowledgement.
    #[arg(long, default_value = "500ms")]
    pub ack_timeout: String,
    /// Bytes per command chunk.
    #[arg(long, default_value_t = rfbridge_frame::DEFAULT_CHUNK_SIZE)]
    pub chunk_size: usize,
}

impl RunArgs {
    pub fn session_config(&self) -> CliResult<SessionConfig> {
        if self.chunk_size == 0 {
            return Err(CliError::new(USAGE, "chunk size must be greater than zero"));
        }
        Ok(SessionConfig {
            dispatcher: DispatcherConfig {
                chunk_size: self.chunk_size,
                ack_timeout: parse_duration(&self.ack_timeout)?,
                ..DispatcherConfig::default()
            },
            ..SessionConfig::default()
        })
    }

    pub fn duration(&self) -> CliResult<Option<Duration>> {
        self.duration.as_deref().map(parse_duration).transpose()
    }
}

#[derive(Args, Debug)]
pub struct SimulateArgs {
    /// Name of the simulated link.
    #[arg(long, default_value = "sim0")]
    pub name: String,
    /// Interval between generated sensor events.
    #[arg(long, default_value = "5s")]
    pub event_period: String,
    /// Interval between generated command polls.
    #[arg(long, default_value = "2s")]
    pub poll_period: String,
    /// Channels the device reports on (comma-separated).
    #[arg(long, value_delimiter = ',', default_value = "1,2,3")]
    pub channels: Vec<u8>,
    /// Seed for generated sensor values.
    #[arg(long)]
    pub seed: Option<u64>,
    /// Only answer commands; generate no events or polls.
    #[arg(long)]
    pub quiet: bool,
    #[command(flatten)]
    pub run: RunArgs,
}

#[derive(Args, Debug)]
pub struct AttachArgs {
    /// Serial device (ttyUSB0 or /dev/ttyUSB0).
    #[arg(env = "RFBRIDGE_PORT")]
    pub port: String,
    /// Line speed.
    #[arg(long, env = "RFBRIDGE_BAUD", default_value_t = DEFAULT_BAUD_RATE)]
    pub baud: u32,
    /// Wait after opening before talking to the board.
    #[arg(long, default_value = "500ms")]
    pub settle: String,
    #[command(flatten)]
    pub run: RunArgs,
}

#[derive(Args, Debug)]
pub struct CompressIrArgs {
    /// Channel the signal will be replayed on.
    #[arg(long, short = 'c', default_value = "0")]
    pub channel: u8,
    /// Pulse durations in microseconds (space-separated). Read from stdin if omitted.
    #[arg(long)]
    pub pulses: Option<String>,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build information.
    #[arg(long)]
    pub extended: bool,
}

pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        _ => Ok(Duration::from_secs(value)),
    }
}
