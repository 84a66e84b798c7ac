use std::sync::atomic::{AtomicU64, Ordering};

use hostipc_sync::SharedMemory;
use serde::Serialize;

use crate::cmd::ShmArgs;
use crate::exit::{sync_error, CliError, CliResult, SUCCESS, USAGE};
use crate::output::{print_report, OutputFormat, Report};

#[derive(Debug, Serialize)]
struct ShmReport {
    name: String,
    size: usize,
    created: bool,
    previous: u64,
    value: u64,
}

impl Report for ShmReport {
    fn title(&self) -> String {
        format!("shm {}", self.name)
    }

    fn fields(&self) -> Vec<(&'static str, String)> {
        vec![
            ("name", self.name.clone()),
            ("size", self.size.to_string()),
            ("created", self.created.to_string()),
            ("previous", self.previous.to_string()),
            ("value", self.value.to_string()),
        ]
    }

    fn raw(&self) -> String {
        self.value.to_string()
    }
}

pub fn run(args: ShmArgs, format: OutputFormat) -> CliResult<i32> {
    if args.size < std::mem::size_of::<u64>() {
        return Err(CliError::new(USAGE, "--size must be at least 8 bytes"));
    }
    let shm = SharedMemory::open(&args.name, args.size).map_err(|err| sync_error("open failed", err))?;

    // SAFETY: every bit pattern is a valid AtomicU64.
    let counter = unsafe { shm.map::<AtomicU64>(0) }.map_err(|err| sync_error("map failed", err))?;

    let previous = match (args.add, args.set) {
        (Some(add), _) => counter.fetch_add(add, Ordering::AcqRel),
        (None, Some(set)) => counter.swap(set, Ordering::AcqRel),
        (None, None) => counter.load(Ordering::Acquire),
    };

    print_report(
        &ShmReport {
            name: args.name,
            size: shm.len(),
            created: shm.is_creator(),
            previous,
            value: counter.load(Ordering::Acquire),
        },
        format,
    );
    Ok(SUCCESS)
}
