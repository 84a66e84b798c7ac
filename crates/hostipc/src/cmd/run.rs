use std::io::Read;
use std::thread;

use hostipc_process::{ExitState, ProcessHandle, SpawnOptions};
use serde::Serialize;
use tracing::{info, warn};

use crate::cmd::{parse_optional_duration, RunArgs};
use crate::exit::{process_error, CliError, CliResult, FAILURE, INTERNAL, SUCCESS, TIMEOUT};
use crate::output::{print_report, OutputFormat, Report};

#[derive(Debug, Serialize)]
struct RunReport {
    program: String,
    pid: u32,
    state: String,
    return_code: Option<i32>,
    timed_out: bool,
    stdout: Option<String>,
}

impl Report for RunReport {
    fn title(&self) -> String {
        format!("{} {}", self.program, self.state)
    }

    fn fields(&self) -> Vec<(&'static str, String)> {
        let mut fields = vec![
            ("program", self.program.clone()),
            ("pid", self.pid.to_string()),
            ("state", self.state.clone()),
            (
                "return_code",
                self.return_code
                    .map_or_else(|| "-".to_string(), |c| c.to_string()),
            ),
            ("timed_out", self.timed_out.to_string()),
        ];
        if let Some(stdout) = &self.stdout {
            fields.push(("stdout", stdout.clone()));
        }
        fields
    }

    fn raw(&self) -> String {
        self.stdout.clone().unwrap_or_default()
    }
}

pub fn run(args: RunArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_optional_duration(args.timeout.as_deref())?;
    let options = SpawnOptions::new().capture_stdout(!args.no_capture);

    let mut child = ProcessHandle::spawn(&args.program, &args.args, &options)
        .map_err(|err| process_error("spawn failed", err))?;
    info!(pid = child.id(), program = %args.program.display(), "started");

    // Drain stdout on a separate thread so a chatty child cannot block on a
    // full pipe while we wait for it.
    let drain = child.take_stdout().map(|mut stdout| {
        thread::spawn(move || {
            let mut out = Vec::new();
            stdout.read_to_end(&mut out).map(|_| out)
        })
    });

    let mut timed_out = false;
    let state = match timeout {
        Some(timeout) => match child
            .join_timeout(timeout)
            .map_err(|err| process_error("wait failed", err))?
        {
            Some(state) => state,
            None => {
                warn!(pid = child.id(), ?timeout, "timed out, killing");
                timed_out = true;
                child.kill().map_err(|err| process_error("kill failed", err))?
            }
        },
        None => child.join().map_err(|err| process_error("wait failed", err))?,
    };

    let stdout = match drain {
        Some(handle) => {
            let bytes = handle
                .join()
                .map_err(|_| CliError::new(INTERNAL, "stdout reader panicked"))?
                .map_err(|err| crate::exit::io_error("read stdout failed", err))?;
            Some(String::from_utf8_lossy(&bytes).into_owned())
        }
        None => None,
    };

    print_report(
        &RunReport {
            program: args.program.display().to_string(),
            pid: child.id(),
            state: state_name(state),
            return_code: state.code(),
            timed_out,
            stdout,
        },
        format,
    );

    Ok(if timed_out {
        TIMEOUT
    } else if state.success() {
        SUCCESS
    } else {
        FAILURE
    })
}

fn state_name(state: ExitState) -> String {
    match state {
        ExitState::Running => "running".to_string(),
        ExitState::Exited(code) => format!("exited({code})"),
        ExitState::Killed(signal) => format!("killed({signal})"),
    }
}
