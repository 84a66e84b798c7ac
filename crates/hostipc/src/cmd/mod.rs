use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Subcommand};
use hostipc_frame::Message;

use crate::exit::{CliError, CliResult, USAGE};
use crate::output::OutputFormat;

pub mod args;
pub mod doctor;
pub mod lock;
pub mod recv;
pub mod run;
pub mod semaphore;
pub mod send;
pub mod shm;
pub mod tick;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Send tagged messages through a named pipe.
    Send(SendArgs),
    /// Print tagged messages read from a named pipe.
    Recv(RecvArgs),
    /// Lock a named mutex, hold it, then unlock it.
    Lock(LockArgs),
    /// Take permits from a named semaphore.
    Acquire(AcquireArgs),
    /// Return permits to a named semaphore.
    Release(ReleaseArgs),
    /// Read or update a u64 counter in named shared memory.
    Shm(ShmArgs),
    /// Run a program, capture its stdout, report how it ended.
    Run(RunArgs),
    /// Print a numbered line per interval until stopped.
    Tick(TickArgs),
    /// Print each argument on its own line.
    Args(ArgsArgs),
    /// Show version information.
    Version(VersionArgs),
    /// Run local environment health checks.
    Doctor(DoctorArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Send(args) => send::run(args, format),
        Command::Recv(args) => recv::run(args, format),
        Command::Lock(args) => lock::run(args, format),
        Command::Acquire(args) => semaphore::acquire(args, format),
        Command::Release(args) => semaphore::release(args, format),
        Command::Shm(args) => shm::run(args, format),
        Command::Run(args) => run::run(args, format),
        Command::Tick(args) => tick::run(args),
        Command::Args(args) => args::run(args),
        Command::Version(args) => version::run(args, format),
        Command::Doctor(args) => doctor::run(args, format),
    }
}

#[derive(Args, Debug)]
pub struct SendArgs {
    /// Pipe name, or an absolute FIFO path.
    pub pipe: String,
    /// Messages as `u32:<n>`, `f64:<x>` or `str:<text>`.
    #[arg(required = true, value_name = "MESSAGE")]
    pub messages: Vec<Message>,
}

#[derive(Args, Debug)]
pub struct RecvArgs {
    /// Pipe name, or an absolute FIFO path.
    pub pipe: String,
    /// Exit after receiving N messages.
    #[arg(long)]
    pub count: Option<usize>,
    /// Largest string payload accepted, in bytes.
    #[arg(long, value_name = "BYTES")]
    pub max_string_len: Option<usize>,
}

#[derive(Args, Debug)]
pub struct LockArgs {
    /// Mutex name.
    pub mutex: String,
    /// Give up after waiting this long (e.g. 5s, 500ms). Implies --timed.
    #[arg(long)]
    pub timeout: Option<String>,
    /// Keep the mutex locked this long before unlocking.
    #[arg(long)]
    pub hold: Option<String>,
    /// Use the timed named mutex.
    #[arg(long)]
    pub timed: bool,
}

#[derive(Args, Debug)]
pub struct AcquireArgs {
    /// Semaphore name.
    pub semaphore: String,
    /// Number of permits to take.
    #[arg(long, default_value_t = 1)]
    pub count: u32,
    /// Initial permits if this call creates the semaphore.
    #[arg(long, default_value_t = 0)]
    pub initial: u32,
    /// Give up on a permit after waiting this long.
    #[arg(long)]
    pub timeout: Option<String>,
    /// Remove the semaphore name when done.
    #[arg(long)]
    pub remove: bool,
}

#[derive(Args, Debug)]
pub struct ReleaseArgs {
    /// Semaphore name.
    pub semaphore: String,
    /// Number of permits to return.
    #[arg(long, default_value_t = 1)]
    pub count: u32,
    /// Initial permits if this call creates the semaphore.
    #[arg(long, default_value_t = 0)]
    pub initial: u32,
    /// Pause before each release (e.g. 250ms).
    #[arg(long)]
    pub interval: Option<String>,
}

#[derive(Args, Debug)]
pub struct ShmArgs {
    /// Shared memory name.
    pub name: String,
    /// Region size in bytes (at least 8).
    #[arg(long, default_value_t = 8)]
    pub size: usize,
    /// Add N to the counter.
    #[arg(long, conflicts_with = "set")]
    pub add: Option<u64>,
    /// Overwrite the counter with N.
    #[arg(long, conflicts_with = "add")]
    pub set: Option<u64>,
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Program to run.
    pub program: PathBuf,
    /// Arguments passed to the program unchanged.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub args: Vec<String>,
    /// Kill the program if it runs longer than this.
    #[arg(long)]
    pub timeout: Option<String>,
    /// Let the program write to our stdout instead of capturing it.
    #[arg(long)]
    pub no_capture: bool,
}

#[derive(Args, Debug)]
pub struct TickArgs {
    /// Time between lines.
    #[arg(long, default_value = "100ms")]
    pub interval: String,
    /// Exit after N lines.
    #[arg(long)]
    pub count: Option<u64>,
}

#[derive(Args, Debug)]
pub struct ArgsArgs {
    /// Exit with this code after printing.
    #[arg(long, default_value_t = 0)]
    pub exit_code: i32,
    /// Arguments to print.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub args: Vec<String>,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

#[derive(Args, Debug, Default)]
pub struct DoctorArgs {}

/// Parse `500ms`, `2s` or a bare number of seconds.
pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, millis) = if let Some(num) = input.strip_suffix("ms") {
        (num, true)
    } else if let Some(num) = input.strip_suffix('s') {
        (num, false)
    } else {
        (input, false)
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    Ok(if millis {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}

pub fn parse_optional_duration(input: Option<&str>) -> CliResult<Option<Duration>> {
    input.map(parse_duration).transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_duration_seconds_and_millis() {
        assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("150ms").unwrap(), Duration::from_millis(150));
        assert_eq!(parse_duration("3").unwrap(), Duration::from_secs(3));
    }

    #[test]
    fn parse_duration_rejects_invalid_values() {
        assert!(parse_duration("0s").is_err());
        assert!(parse_duration("bad").is_err());
        assert!(parse_duration("").is_err());
    }

    #[test]
    fn optional_duration_passes_none_through() {
        assert_eq!(parse_optional_duration(None).unwrap(), None);
        assert_eq!(
            parse_optional_duration(Some("20ms")).unwrap(),
            Some(Duration::from_millis(20))
        );
    }
}
