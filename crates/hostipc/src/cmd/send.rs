use hostipc_frame::MessageWriter;
use hostipc_pipe::PipeWriter;
use serde::Serialize;
use tracing::info;

use crate::cmd::SendArgs;
use crate::exit::{frame_error, pipe_error, CliResult, SUCCESS};
use crate::output::{print_report, OutputFormat, Report};

#[derive(Debug, Serialize)]
struct SendReport {
    pipe: String,
    messages: usize,
    bytes: usize,
}

impl Report for SendReport {
    fn title(&self) -> String {
        "sent".to_string()
    }

    fn fields(&self) -> Vec<(&'static str, String)> {
        vec![
            ("pipe", self.pipe.clone()),
            ("messages", self.messages.to_string()),
            ("bytes", self.bytes.to_string()),
        ]
    }

    fn raw(&self) -> String {
        self.messages.to_string()
    }
}

pub fn run(args: SendArgs, format: OutputFormat) -> CliResult<i32> {
    info!(pipe = %args.pipe, "waiting for a reader");
    let pipe = PipeWriter::create_named(&args.pipe).map_err(|err| pipe_error("open failed", err))?;
    let mut writer = MessageWriter::new(pipe);

    let mut bytes = 0usize;
    for message in &args.messages {
        writer
            .send(message)
            .map_err(|err| frame_error("send failed", err))?;
        bytes += message.wire_size();
    }
    writer
        .close()
        .map_err(|err| frame_error("close failed", err))?;

    print_report(
        &SendReport {
            pipe: args.pipe,
            messages: args.messages.len(),
            bytes,
        },
        format,
    );
    Ok(SUCCESS)
}
