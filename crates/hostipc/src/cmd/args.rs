use crate::cmd::ArgsArgs;
use crate::exit::CliResult;
use crate::output::print_line;

/// Echo the argument vector one per line, so a parent can check exactly
/// what it received.
pub fn run(args: ArgsArgs) -> CliResult<i32> {
    for arg in &args.args {
        print_line(arg);
    }
    Ok(args.exit_code)
}
