use std::{
    path::PathBuf,
    str::FromStr,
    sync::{Arc, Mutex},
    time::Duration,
};

use anyhow::Context;
use gen_fuzz::{
    choices::ChoiceSource,
    config::EngineKind,
    guidance::TrialOutcome,
    harness::Harness,
    schedule::load_seed_record,
    trace::{TraceSink, TrialTrace},
};
use libafl_bolts::rands::StdRand;

use super::GlobalOptions;
use crate::targets;

#[derive(Debug, clap::Parser)]
pub(super) struct ReproduceCommand {
    /// Entry point, from the compiled-in target table.
    #[clap(long)]
    target: String,

    #[clap(long, default_value = "zest", value_parser = EngineKind::from_str)]
    engine: EngineKind,

    /// Per-trial time limit in milliseconds.
    #[clap(long)]
    run_timeout: Option<u64>,

    /// Saved inputs to re-run. For split engines pass either half of a
    /// `.structure`/`.value` pair.
    #[clap(required = true)]
    files: Vec<PathBuf>,
}

impl ReproduceCommand {
    pub(super) fn run(self, global_options: GlobalOptions) -> anyhow::Result<u8> {
        let run_timeout = self.run_timeout.map(Duration::from_millis);
        let mut harness =
            targets::resolve(&self.target, run_timeout).context("Resolving fuzz target")?;

        let mut failures = 0usize;
        for path in &self.files {
            let record = load_seed_record(path, self.engine.is_split())
                .with_context(|| format!("Loading input {}", path.display()))?;
            // Replay exactly the stored bytes: no stream extension.
            let mut source = ChoiceSource::from_record(
                record,
                true,
                StdRand::with_seed(global_options.random_seed),
            );
            let mut sink = TraceSink::new(Arc::new(Mutex::new(TrialTrace::default())));
            match harness.run(&mut source, &mut sink) {
                TrialOutcome::Success => println!("{}: SUCCESS", path.display()),
                TrialOutcome::Invalid => println!("{}: INVALID", path.display()),
                TrialOutcome::Failure(failure) => {
                    failures += 1;
                    println!("{}: FAILURE ({})", path.display(), failure.message);
                }
            }
        }
        Ok(if failures > 0 { 1 } else { 0 })
    }
}
