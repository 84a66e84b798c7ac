use serde::Serialize;

use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};
use crate::output::{print_report, OutputFormat, Report};

#[derive(Debug, Serialize)]
struct VersionReport {
    name: &'static str,
    version: &'static str,
    target: &'static str,
    profile: &'static str,
    target_os: &'static str,
    target_arch: &'static str,
    features: Vec<&'static str>,
}

impl Report for VersionReport {
    fn title(&self) -> String {
        format!("{} {}", self.name, self.version)
    }

    fn fields(&self) -> Vec<(&'static str, String)> {
        vec![
            ("name", self.name.to_string()),
            ("version", self.version.to_string()),
            ("target", self.target.to_string()),
            ("profile", self.profile.to_string()),
            ("target_os", self.target_os.to_string()),
            ("target_arch", self.target_arch.to_string()),
            ("features", self.features.join(", ")),
        ]
    }

    fn raw(&self) -> String {
        self.version.to_string()
    }
}

pub fn run(args: VersionArgs, format: OutputFormat) -> CliResult<i32> {
    if !args.extended {
        println!("hostipc {}", env!("CARGO_PKG_VERSION"));
        return Ok(SUCCESS);
    }

    print_report(&version_report(), format);
    Ok(SUCCESS)
}

fn version_report() -> VersionReport {
    let mut features = vec!["cli"];
    if cfg!(feature = "sync") {
        features.push("sync");
    }
    if cfg!(feature = "process") {
        features.push("process");
    }

    VersionReport {
        name: "hostipc",
        version: env!("CARGO_PKG_VERSION"),
        target: option_env!("HOSTIPC_BUILD_TARGET").unwrap_or("unknown"),
        profile: option_env!("HOSTIPC_BUILD_PROFILE").unwrap_or("unknown"),
        target_os: std::env::consts::OS,
        target_arch: std::env::consts::ARCH,
        features,
    }
}
