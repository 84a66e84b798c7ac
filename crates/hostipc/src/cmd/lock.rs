use std::thread;
use std::time::Instant;

use hostipc_sync::{NamedMutex, NamedMutexGuard, TimedNamedMutex};
use serde::Serialize;
use tracing::info;

use crate::cmd::{parse_optional_duration, LockArgs};
use crate::exit::{sync_error, CliResult, SUCCESS};
use crate::output::{millis, print_report, OutputFormat, Report};

#[derive(Debug, Serialize)]
struct LockReport {
    mutex: String,
    timed: bool,
    waited_ms: u64,
    held_ms: u64,
}

impl Report for LockReport {
    fn title(&self) -> String {
        format!("locked {}", self.mutex)
    }

    fn fields(&self) -> Vec<(&'static str, String)> {
        vec![
            ("mutex", self.mutex.clone()),
            ("timed", self.timed.to_string()),
            ("waited_ms", self.waited_ms.to_string()),
            ("held_ms", self.held_ms.to_string()),
        ]
    }

    fn raw(&self) -> String {
        self.waited_ms.to_string()
    }
}

enum Lock {
    Plain(NamedMutex),
    Timed(TimedNamedMutex),
}

pub fn run(args: LockArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_optional_duration(args.timeout.as_deref())?;
    let hold = parse_optional_duration(args.hold.as_deref())?;
    let timed = args.timed || timeout.is_some();

    let lock = if timed {
        Lock::Timed(TimedNamedMutex::open(&args.mutex).map_err(|err| sync_error("open failed", err))?)
    } else {
        Lock::Plain(NamedMutex::open(&args.mutex).map_err(|err| sync_error("open failed", err))?)
    };

    let start = Instant::now();
    let guard: NamedMutexGuard<'_> = match (&lock, timeout) {
        (Lock::Timed(mutex), Some(timeout)) => mutex.try_lock_for(timeout),
        (Lock::Timed(mutex), None) => mutex.lock(),
        (Lock::Plain(mutex), _) => mutex.lock(),
    }
    .map_err(|err| sync_error("lock failed", err))?;
    let waited = start.elapsed();
    info!(mutex = %args.mutex, waited_ms = millis(waited), "acquired named mutex");

    let held = Instant::now();
    if let Some(hold) = hold {
        thread::sleep(hold);
    }
    guard
        .unlock()
        .map_err(|err| sync_error("unlock failed", err))?;
    let held = held.elapsed();
    info!(mutex = %args.mutex, held_ms = millis(held), "released named mutex");

    print_report(
        &LockReport {
            mutex: args.mutex,
            timed,
            waited_ms: millis(waited),
            held_ms: millis(held),
        },
        format,
    );
    Ok(SUCCESS)
}
