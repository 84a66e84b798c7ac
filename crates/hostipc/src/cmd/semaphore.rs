use std::thread;
use std::time::Instant;

use hostipc_sync::{NamedSemaphore, SyncError};
use serde::Serialize;
use tracing::{info, warn};

use crate::cmd::{parse_optional_duration, AcquireArgs, ReleaseArgs};
use crate::exit::{sync_error, CliResult, SUCCESS};
use crate::output::{millis, print_report, OutputFormat, Report};

#[derive(Debug, Serialize)]
struct PermitReport<'a> {
    semaphore: &'a str,
    action: &'static str,
    permit: u32,
    elapsed_ms: u64,
}

impl Report for PermitReport<'_> {
    fn title(&self) -> String {
        format!("{} {}", self.action, self.semaphore)
    }

    fn fields(&self) -> Vec<(&'static str, String)> {
        vec![
            ("semaphore", self.semaphore.to_string()),
            ("action", self.action.to_string()),
            ("permit", self.permit.to_string()),
            ("elapsed_ms", self.elapsed_ms.to_string()),
        ]
    }

    fn raw(&self) -> String {
        self.permit.to_string()
    }
}

pub fn acquire(args: AcquireArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_optional_duration(args.timeout.as_deref())?;
    let semaphore = NamedSemaphore::open(&args.semaphore, args.initial)
        .map_err(|err| sync_error("open failed", err))?;

    let start = Instant::now();
    let result = (1..=args.count).try_for_each(|permit| {
        match timeout {
            Some(timeout) => {
                if !semaphore.try_acquire_for(timeout)? {
                    return Err(SyncError::Timeout(timeout));
                }
            }
            None => semaphore.acquire()?,
        }
        let elapsed_ms = millis(start.elapsed());
        info!(semaphore = %args.semaphore, permit, elapsed_ms, "acquired permit");
        print_report(
            &PermitReport {
                semaphore: &args.semaphore,
                action: "acquired",
                permit,
                elapsed_ms,
            },
            format,
        );
        Ok(())
    });

    if args.remove {
        if let Err(err) = NamedSemaphore::remove(&args.semaphore) {
            warn!(semaphore = %args.semaphore, %err, "failed to remove semaphore");
        }
    }
    result.map_err(|err| sync_error("acquire failed", err))?;
    Ok(SUCCESS)
}

pub fn release(args: ReleaseArgs, format: OutputFormat) -> CliResult<i32> {
    let interval = parse_optional_duration(args.interval.as_deref())?;
    let semaphore = NamedSemaphore::open(&args.semaphore, args.initial)
        .map_err(|err| sync_error("open failed", err))?;

    let start = Instant::now();
    for permit in 1..=args.count {
        if let Some(interval) = interval {
            thread::sleep(interval);
        }
        semaphore
            .release()
            .map_err(|err| sync_error("release failed", err))?;
        let elapsed_ms = millis(start.elapsed());
        info!(semaphore = %args.semaphore, permit, elapsed_ms, "released permit");
        print_report(
            &PermitReport {
                semaphore: &args.semaphore,
                action: "released",
                permit,
                elapsed_ms,
            },
            format,
        );
    }
    Ok(SUCCESS)
}
