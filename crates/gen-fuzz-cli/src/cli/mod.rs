mod fuzz;
mod reproduce;

use anyhow::Context;
use fuzz::FuzzCommand;
use reproduce::ReproduceCommand;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::targets;

#[derive(Debug, clap::Parser)]
#[command(version, about, styles = clap::builder::Styles::styled())]
pub struct Cli {
    #[clap(flatten)]
    global_options: GlobalOptions,

    #[command(subcommand)]
    command: Command,
}

impl Cli {
    pub(super) fn run(self) -> anyhow::Result<u8> {
        setup_logger(&self.global_options).context("Setting up logger")?;
        match self.command {
            Command::Fuzz(cmd) => cmd.run(self.global_options),
            Command::Reproduce(cmd) => cmd.run(self.global_options),
            Command::ListTargets(cmd) => cmd.run(),
        }
    }
}

#[derive(Debug, clap::Parser)]
struct GlobalOptions {
    #[clap(long, default_value = "info")]
    default_log_level: LevelFilter,

    /// Seeds every random decision the engine makes.
    #[clap(long, default_value_t = 0)]
    random_seed: u64,
}

#[cfg(test)]
impl GlobalOptions {
    pub(super) fn for_tests() -> Self {
        Self {
            default_log_level: LevelFilter::INFO,
            random_seed: 0,
        }
    }
}

#[derive(Debug, clap::Subcommand)]
enum Command {
    /// Run a fuzzing campaign against a compiled-in target.
    Fuzz(Box<FuzzCommand>),
    /// Re-run saved inputs and report their outcome classification.
    Reproduce(ReproduceCommand),
    /// List the targets compiled into this binary.
    ListTargets(ListTargetsCommand),
}

#[derive(Debug, clap::Parser)]
struct ListTargetsCommand {}

impl ListTargetsCommand {
    fn run(self) -> anyhow::Result<u8> {
        for target in targets::registry() {
            println!("{:<16} {}", target.name, target.description);
        }
        Ok(0)
    }
}

fn setup_logger(global_opts: &GlobalOptions) -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_timer(fmt::time::ChronoLocal::new("%Y-%m-%d %H:%M:%S".to_owned())))
        .with(
            EnvFilter::builder()
                .with_default_directive(global_opts.default_log_level.into())
                .from_env()
                .context("Constructing log filter from env.")?,
        )
        .init();

    Ok(())
}
