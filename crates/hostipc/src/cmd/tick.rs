use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use tracing::debug;

use crate::cmd::{parse_duration, TickArgs};
use crate::exit::{CliError, CliResult, INTERNAL, SUCCESS};
use crate::output::print_line;

pub fn run(args: TickArgs) -> CliResult<i32> {
    let interval = parse_duration(&args.interval)?;

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    let mut tick = 0u64;
    while running.load(Ordering::SeqCst) {
        if args.count.is_some_and(|count| tick >= count) {
            break;
        }
        tick += 1;
        print_line(&format!("tick {tick}"));
        thread::sleep(interval);
    }

    debug!(ticks = tick, "stopped");
    Ok(SUCCESS)
}

fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}
