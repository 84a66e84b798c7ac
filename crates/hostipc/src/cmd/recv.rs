use hostipc_frame::{FrameConfig, MessageReader};
use hostipc_pipe::PipeReader;
use tracing::{debug, info};

use crate::cmd::RecvArgs;
use crate::exit::{frame_error, pipe_error, CliResult, SUCCESS};
use crate::output::{print_message, OutputFormat};

pub fn run(args: RecvArgs, format: OutputFormat) -> CliResult<i32> {
    let mut config = FrameConfig::default();
    if let Some(max) = args.max_string_len {
        config.max_string_len = max;
    }

    info!(pipe = %args.pipe, "waiting for a writer");
    let pipe = PipeReader::open_named(&args.pipe).map_err(|err| pipe_error("open failed", err))?;
    let reader = MessageReader::with_config(pipe, config);

    let mut received = 0usize;
    for message in reader.take(args.count.unwrap_or(usize::MAX)) {
        let message = message.map_err(|err| frame_error("receive failed", err))?;
        print_message(received, &message, format);
        received += 1;
    }

    debug!(received, "pipe drained");
    Ok(SUCCESS)
}
