mod cli;
mod targets;

use std::process::ExitCode;

use clap::Parser;

/// Exit codes: 0 clean, 1 failures found, 2 internal error.
fn main() -> ExitCode {
    let cli = cli::Cli::parse();
    match cli.run() {
        Ok(code) => ExitCode::from(code),
        Err(error) => {
            eprintln!("error: {error:#}");
            ExitCode::from(2)
        }
    }
}
