//! hoist: the command-line entry point.
//!
//! Resolves options from flags, the environment and defaults, exports the
//! environment name, and hands control to the lifecycle manager. Fatal
//! startup errors are reported on stderr.

use std::process::ExitCode;

use clap::Parser;

use hoist::cli::{Args, ConfigResolver};
use hoist::Server;

fn main() -> ExitCode {
    let args = Args::parse();
    let options = ConfigResolver::from_process_env().resolve(args);
    options.export_environment();

    match Server::new(options).start() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Startup failed");
            eprintln!("hoist: {}", e);
            ExitCode::from(e.exit_code())
        }
    }
}
