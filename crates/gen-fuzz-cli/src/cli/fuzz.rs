use std::{path::PathBuf, str::FromStr, time::Duration};

use anyhow::Context;
use gen_fuzz::{
    campaign::Campaign,
    config::{EngineKind, FuzzConfig, StatsStyle, parse_duration},
    guidance::FuzzGuidance,
};
use tracing::info;

use super::GlobalOptions;
use crate::targets;

#[derive(Debug, clap::Parser)]
pub(super) struct FuzzCommand {
    /// Entry point to fuzz, from the compiled-in target table.
    #[clap(long)]
    target: String,

    #[clap(long, default_value = "zest", value_parser = EngineKind::from_str)]
    engine: EngineKind,

    /// Campaign duration, `[Nh][Nm][Ns]`.
    #[clap(long, value_parser = parse_duration)]
    time: Option<Duration>,

    /// Stop after this many trials.
    #[clap(long)]
    trials: Option<u64>,

    /// Disable coverage feedback; every input is generated from scratch.
    #[clap(long)]
    blind: bool,

    /// Skip coverage observation entirely (requires --blind).
    #[clap(long)]
    no_cov: bool,

    /// Directory of seed inputs, replayed once before mutation starts.
    #[clap(long = "in")]
    in_dir: Option<PathBuf>,

    #[clap(long, default_value = "fuzz-out")]
    out: PathBuf,

    /// Save redundant inputs too.
    #[clap(long)]
    save_all: bool,

    /// Persist the cumulative branch-hit counters at termination.
    #[clap(long)]
    save_branch_hit_counts: bool,

    /// Milliseconds between stats lines.
    #[clap(long, default_value_t = 300)]
    stats_refresh: u64,

    #[clap(long, default_value = "afl", value_parser = StatsStyle::from_str)]
    stats_style: StatsStyle,

    /// Stop after the first failure.
    #[clap(long)]
    exit_on_crash: bool,

    /// Per-trial time limit in milliseconds.
    #[clap(long)]
    run_timeout: Option<u64>,

    /// Disable stream extension; reads past a saved input return EOF.
    #[clap(long)]
    fixed_size: bool,

    /// Probability of drawing a parent from the whole corpus instead of
    /// the favored set.
    #[clap(long, default_value_t = 0.1)]
    p_random_parent: f64,

    /// Probability that a split-mode mutation targets structure.
    #[clap(long, default_value_t = 0.5)]
    structure_weight: f64,

    /// Admit inputs on Shannon-diversity growth alone.
    #[clap(long)]
    admit_on_diversity_gain: bool,

    #[clap(long, default_value_t = 1e-3)]
    diversity_epsilon: f64,
}

impl FuzzCommand {
    pub(super) fn run(self, global_options: GlobalOptions) -> anyhow::Result<u8> {
        let run_timeout = self.run_timeout.map(Duration::from_millis);
        let harness =
            targets::resolve(&self.target, run_timeout).context("Resolving fuzz target")?;

        let out_dir = self.out.clone();
        let config = FuzzConfig {
            engine: self.engine,
            out_dir: self.out,
            seeds_dir: self.in_dir,
            duration: self.time,
            trials: self.trials,
            random_seed: global_options.random_seed,
            blind: self.blind,
            no_cov: self.no_cov,
            save_all: self.save_all,
            save_branch_hit_counts: self.save_branch_hit_counts,
            stats_refresh: Duration::from_millis(self.stats_refresh),
            stats_style: self.stats_style,
            exit_on_crash: self.exit_on_crash,
            run_timeout,
            fixed_size: self.fixed_size,
            p_random_parent: self.p_random_parent,
            structure_weight: self.structure_weight,
            admit_on_diversity_gain: self.admit_on_diversity_gain,
            diversity_epsilon: self.diversity_epsilon,
            ..FuzzConfig::default()
        };

        let guidance = FuzzGuidance::new(config).context("Initializing guidance")?;
        let stop = guidance.stop_token();
        ctrlc::set_handler(move || stop.request_stop())
            .context("Installing interrupt handler")?;

        info!(target = self.target, "starting campaign");
        let summary = Campaign::new(guidance, harness)
            .run()
            .context("Running fuzzing campaign")?;

        if summary.failure_count > 0 {
            eprintln!(
                "{} input(s) failed; failing inputs are under {}",
                summary.failure_count,
                out_dir.join("failures").display()
            );
            Ok(1)
        } else {
            println!(
                "no failures: {} execs, {} branches covered, corpus of {}",
                summary.total_execs, summary.covered_branches, summary.corpus_size
            );
            Ok(0)
        }
    }
}
