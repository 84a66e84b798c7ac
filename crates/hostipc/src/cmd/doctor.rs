use std::io::{Read, Write};
use std::thread;

use hostipc_pipe::{named_pipe_path, PipeReader, PipeWriter};
use hostipc_sync::{NamedMutex, NamedSemaphore, SharedMemory};
use serde::Serialize;

use crate::cmd::DoctorArgs;
use crate::exit::{CliResult, HEALTH_CHECK_FAILED, SUCCESS};
use crate::output::{print_json, OutputFormat};

#[derive(Clone, Copy, Debug, Serialize)]
#[serde(rename_all = "lowercase")]
enum CheckStatus {
    Pass,
    Fail,
    Info,
}

#[derive(Debug, Serialize)]
struct CheckResult {
    name: &'static str,
    status: CheckStatus,
    detail: String,
}

impl CheckResult {
    fn from_outcome(name: &'static str, outcome: Result<String, String>) -> Self {
        match outcome {
            Ok(detail) => Self {
                name,
                status: CheckStatus::Pass,
                detail,
            },
            Err(detail) => Self {
                name,
                status: CheckStatus::Fail,
                detail,
            },
        }
    }
}

#[derive(Debug, Serialize)]
struct DoctorOutput {
    checks: Vec<CheckResult>,
    overall: &'static str,
}

pub fn run(_args: DoctorArgs, format: OutputFormat) -> CliResult<i32> {
    let probe = format!("hostipc-doctor-{}", std::process::id());
    let checks = vec![
        CheckResult::from_outcome("named_pipe", named_pipe_check(&probe)),
        CheckResult::from_outcome("shared_memory", shared_memory_check(&probe)),
        CheckResult::from_outcome("named_mutex", named_mutex_check(&probe)),
        CheckResult::from_outcome("named_semaphore", named_semaphore_check(&probe)),
        compiled_features_check(),
    ];

    let has_fail = checks.iter().any(|c| matches!(c.status, CheckStatus::Fail));
    let output = DoctorOutput {
        checks,
        overall: if has_fail { "fail" } else { "pass" },
    };

    print_doctor(&output, format);

    if has_fail {
        Ok(HEALTH_CHECK_FAILED)
    } else {
        Ok(SUCCESS)
    }
}

fn print_doctor(output: &DoctorOutput, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(output),
        OutputFormat::Table | OutputFormat::Pretty => {
            println!("hostipc doctor\n");
            for c in &output.checks {
                println!(
                    "  [{:>4}] {:<18} {}",
                    status_text(c.status),
                    c.name,
                    c.detail
                );
            }
            if output.overall == "pass" {
                println!("\n  Result: all checks passed");
            } else {
                println!("\n  Result: one or more checks failed");
            }
        }
        OutputFormat::Raw => println!("{}", output.overall),
    }
}

fn status_text(status: CheckStatus) -> &'static str {
    match status {
        CheckStatus::Pass => "PASS",
        CheckStatus::Fail => "FAIL",
        CheckStatus::Info => "INFO",
    }
}

fn named_pipe_check(probe: &str) -> Result<String, String> {
    let path = named_pipe_path(probe).map_err(|err| err.to_string())?;

    // Opening a FIFO blocks until both ends are present.
    let reader = thread::spawn({
        let probe = probe.to_string();
        move || -> Result<Vec<u8>, String> {
            let mut pipe = PipeReader::create_named(&probe).map_err(|err| err.to_string())?;
            let mut buf = Vec::new();
            pipe.read_to_end(&mut buf).map_err(|err| err.to_string())?;
            Ok(buf)
        }
    });

    let mut writer = PipeWriter::open_named(probe).map_err(|err| err.to_string())?;
    writer.write_all(b"ping").map_err(|err| err.to_string())?;
    writer.close();

    let echoed = reader
        .join()
        .map_err(|_| "reader thread panicked".to_string())??;
    if echoed == b"ping" {
        Ok(format!("fifo round trip through {}", path.display()))
    } else {
        Err(format!("fifo returned {} unexpected bytes", echoed.len()))
    }
}

fn shared_memory_check(probe: &str) -> Result<String, String> {
    let shm = SharedMemory::open(probe, 64).map_err(|err| err.to_string())?;
    shm.write_at(0, b"ok").map_err(|err| err.to_string())?;
    let mut buf = [0u8; 2];
    shm.read_at(0, &mut buf).map_err(|err| err.to_string())?;
    if &buf == b"ok" {
        Ok("shm_open/mmap read-write succeeded".to_string())
    } else {
        Err("shared memory contents did not round trip".to_string())
    }
}

fn named_mutex_check(probe: &str) -> Result<String, String> {
    let mutex = NamedMutex::open(probe).map_err(|err| err.to_string())?;
    let guard = mutex
        .try_lock()
        .map_err(|err| err.to_string())?
        .ok_or_else(|| "probe mutex is held by another process".to_string())?;
    guard.unlock().map_err(|err| err.to_string())?;
    Ok("process-shared pthread mutex locked and unlocked".to_string())
}

fn named_semaphore_check(probe: &str) -> Result<String, String> {
    let semaphore = NamedSemaphore::open(probe, 1).map_err(|err| err.to_string())?;
    let acquired = semaphore.try_acquire().map_err(|err| err.to_string());
    drop(semaphore);
    NamedSemaphore::remove(probe).map_err(|err| err.to_string())?;
    if acquired? {
        Ok("sem_open/sem_trywait succeeded".to_string())
    } else {
        Err("probe semaphore had no permits".to_string())
    }
}

fn compiled_features_check() -> CheckResult {
    let mut features = vec!["cli"];
    if cfg!(feature = "sync") {
        features.push("sync");
    }
    if cfg!(feature = "process") {
        features.push("process");
    }

    CheckResult {
        name: "compiled_features",
        status: CheckStatus::Info,
        detail: features.join(", "),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doctor_output_has_overall_status() {
        let output = DoctorOutput {
            checks: vec![CheckResult::from_outcome("x", Ok("ok".to_string()))],
            overall: "pass",
        };
        let json = serde_json::to_string(&output).expect("doctor output should serialize");
        assert!(json.contains("\"overall\":\"pass\""));
        assert!(json.contains("\"status\":\"pass\""));
    }

    #[test]
    fn failed_outcome_is_fail() {
        let check = CheckResult::from_outcome("x", Err("boom".to_string()));
        assert!(matches!(check.status, CheckStatus::Fail));
        assert_eq!(check.detail, "boom");
    }
}
