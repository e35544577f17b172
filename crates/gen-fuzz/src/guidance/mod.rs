//! The guidance engine: schedules inputs, observes feedback, evolves
//! the corpus, and persists everything worth keeping.
//!
//! The harness drives the engine through the [`Guidance`] contract:
//! `has_input` → `get_input` → (run the target) → `handle_result`, with
//! per-thread [`TraceSink`]s reporting instrumentation in between. All
//! campaign state is owned by [`FuzzGuidance`]; there are no globals.

pub mod failures;

use std::{
    fs, io,
    path::PathBuf,
    sync::{
        Arc, Mutex, MutexGuard,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};

use libafl_bolts::rands::{Rand, StdRand};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::{
    choices::{ChoiceSource, InputRecord},
    config::{EngineKind, FuzzConfig},
    corpus::{self, Corpus, FavoritesMap, InputId, Origin},
    coverage::{
        CumulativeCoverage,
        diversity::{DiversityTracker, HillNumbers},
        novelty::{CoverageSignature, Novelty, NoveltyFilter},
    },
    error::{GuidanceError, IoContext},
    guidance::failures::{FailureRegistry, TrialFailure},
    report::{Reporter, StatsSnapshot},
    schedule::Scheduler,
    trace::{TraceSink, TrialTrace},
};

/// Classification of one completed trial.
#[derive(Debug, Clone)]
pub enum TrialOutcome {
    /// The target ran to completion; coverage counts.
    Success,
    /// An assumption on the generated input was violated; counted only.
    Invalid,
    /// The target failed unexpectedly.
    Failure(TrialFailure),
}

/// Monotonic stop request, checked between trials. The trial in flight
/// always completes.
#[derive(Debug, Clone, Default)]
pub struct StopToken(Arc<AtomicBool>);

impl StopToken {
    pub fn request_stop(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// The contract the external test harness drives.
///
/// `get_input` may be called at most once per truthful `has_input`, and
/// `handle_result` exactly once per `get_input`; the choice source
/// opened by `get_input` is handed back there, guaranteeing release on
/// every exit path.
pub trait Guidance {
    fn has_input(&mut self) -> Result<bool, GuidanceError>;

    fn get_input(&mut self) -> Result<ChoiceSource, GuidanceError>;

    /// Reporting-only hook: the harness may describe the resolved
    /// generator arguments of the current trial.
    fn observe_generated(&mut self, args: &str);

    fn handle_result(
        &mut self,
        source: ChoiceSource,
        outcome: &TrialOutcome,
    ) -> Result<(), GuidanceError>;

    /// A trace consumer for one target thread. Every spawned thread
    /// gets its own sink; branch events fold into the shared per-trial
    /// map.
    fn trace_sink(&mut self) -> TraceSink;
}

#[derive(Debug)]
struct CurrentTrial {
    parent: Option<InputId>,
    origin: Origin,
    started: Instant,
}

#[derive(Debug)]
struct CampaignStats {
    started: Instant,
    total: u64,
    valid: u64,
    invalid: u64,
}

/// End-of-campaign totals, also serialized to `campaign.json`.
#[derive(Debug, Clone, Serialize)]
pub struct CampaignSummary {
    pub engine: EngineKind,
    pub total_execs: u64,
    pub valid_execs: u64,
    pub invalid_execs: u64,
    pub corpus_size: usize,
    pub covered_branches: usize,
    pub failure_count: usize,
    pub diversity: HillNumbers,
    pub elapsed_secs: u64,
}

/// The feedback-driven engine behind [`Guidance`].
#[derive(Debug)]
pub struct FuzzGuidance {
    config: FuzzConfig,
    rng: StdRand,
    scheduler: Scheduler,
    corpus: Corpus,
    favorites: FavoritesMap,
    novelty: NoveltyFilter,
    cumulative: CumulativeCoverage,
    diversity: DiversityTracker,
    failures: FailureRegistry,
    failures_dir: PathBuf,
    reporter: Reporter,
    trace: Arc<Mutex<TrialTrace>>,
    stop: StopToken,
    deadline: Option<Instant>,
    planned: Option<crate::schedule::PlannedInput>,
    current: Option<CurrentTrial>,
    stats: CampaignStats,
    last_shannon: f64,
    last_trial_was_novel: bool,
    finished: bool,
}

impl FuzzGuidance {
    pub fn new(config: FuzzConfig) -> Result<Self, GuidanceError> {
        config.validate()?;
        fs::create_dir_all(&config.out_dir)
            .io_context(format!("creating {}", config.out_dir.display()))?;
        let corpus = Corpus::new(&config.out_dir.join("corpus"))?;
        let failures_dir = config.out_dir.join("failures");
        fs::create_dir_all(&failures_dir)
            .io_context(format!("creating {}", failures_dir.display()))?;
        let mut reporter = Reporter::new(&config.out_dir, config.stats_style, config.stats_refresh)?;
        if let Ok(json) = serde_json::to_string(&config) {
            reporter.log_event(&format!("campaign configured: {json}"))?;
        }
        let scheduler = Scheduler::new(&config)?;
        info!(engine = %config.engine, seed = config.random_seed, "guidance ready");

        Ok(Self {
            rng: StdRand::with_seed(config.random_seed),
            scheduler,
            corpus,
            favorites: FavoritesMap::new(),
            novelty: NoveltyFilter::new(),
            cumulative: CumulativeCoverage::new(),
            diversity: DiversityTracker::new(config.diversity_refresh),
            failures: FailureRegistry::new(),
            failures_dir,
            reporter,
            trace: Arc::new(Mutex::new(TrialTrace::default())),
            stop: StopToken::default(),
            deadline: config.duration.map(|duration| Instant::now() + duration),
            planned: None,
            current: None,
            stats: CampaignStats {
                started: Instant::now(),
                total: 0,
                valid: 0,
                invalid: 0,
            },
            last_shannon: 0.0,
            last_trial_was_novel: false,
            finished: false,
            config,
        })
    }

    /// Token external signal handlers use to wind the campaign down.
    pub fn stop_token(&self) -> StopToken {
        self.stop.clone()
    }

    pub fn summary(&self) -> CampaignSummary {
        CampaignSummary {
            engine: self.config.engine,
            total_execs: self.stats.total,
            valid_execs: self.stats.valid,
            invalid_execs: self.stats.invalid,
            corpus_size: self.corpus.len(),
            covered_branches: self.cumulative.covered_count(),
            failure_count: self.failures.len(),
            diversity: HillNumbers::of_coverage(&self.cumulative),
            elapsed_secs: self.stats.started.elapsed().as_secs(),
        }
    }

    pub fn corpus(&self) -> &Corpus {
        &self.corpus
    }

    fn should_stop(&self) -> bool {
        self.stop.is_requested()
            || self.deadline.is_some_and(|deadline| Instant::now() >= deadline)
            || self
                .config
                .trials
                .is_some_and(|cap| self.stats.total >= cap)
    }

    fn lock_trace(trace: &Arc<Mutex<TrialTrace>>) -> MutexGuard<'_, TrialTrace> {
        trace.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn snapshot_with(&self, hill: HillNumbers) -> StatsSnapshot {
        StatsSnapshot {
            elapsed: self.stats.started.elapsed(),
            total_execs: self.stats.total,
            valid_execs: self.stats.valid,
            invalid_execs: self.stats.invalid,
            corpus_size: self.corpus.len(),
            covered_branches: self.cumulative.covered_count(),
            failures: self.failures.len(),
            hill,
        }
    }

    /// Snapshot with freshly computed Hill numbers; plot rows use this
    /// so their values never depend on the refresh timer.
    fn snapshot_fresh(&self) -> StatsSnapshot {
        self.snapshot_with(HillNumbers::of_coverage(&self.cumulative))
    }

    fn feedback_success(
        &mut self,
        record: InputRecord,
        parent: Option<InputId>,
        origin: Origin,
        elapsed: Duration,
    ) -> Result<(), GuidanceError> {
        let (verdict, signature, exec_cost) = {
            let trace = Arc::clone(&self.trace);
            let trace = Self::lock_trace(&trace);
            let verdict = self.novelty.classify(&trace.map, &self.cumulative);
            // Observation happens-before the cumulative fold.
            self.cumulative.fold(&trace.map);
            let signature = CoverageSignature::from_map(&trace.map);
            (verdict, signature, trace.map.total_hits())
        };

        let mut diversity_gain = false;
        if self.config.admit_on_diversity_gain {
            let hill = HillNumbers::of_coverage(&self.cumulative);
            diversity_gain = hill.shannon - self.last_shannon >= self.config.diversity_epsilon;
            self.last_shannon = hill.shannon;
        }

        let novel = !matches!(verdict, Novelty::Redundant);
        self.last_trial_was_novel = novel;
        if !(novel || diversity_gain || self.config.save_all) {
            return Ok(());
        }

        let id = self
            .corpus
            .admit(
                record,
                parent,
                origin,
                signature,
                elapsed.as_nanos() as u64,
                exec_cost,
            )?
            .id;
        if let Some(input) = self.corpus.get(id) {
            self.novelty.record_admitted(&input.signature);
        }
        if let Some(input) = self.corpus.get(id) {
            self.favorites.offer(input, &self.corpus);
        }

        let reason = match verdict {
            Novelty::NewBranch => "new branch",
            Novelty::NewBucket => "new bucket",
            Novelty::Redundant if diversity_gain => "diversity gain",
            Novelty::Redundant => "save_all",
        };
        let parent = parent.map_or_else(|| "none".to_owned(), |id| id.to_string());
        info!(%id, reason, %parent, "input admitted");
        self.reporter
            .log_event(&format!("saved {id} ({origin}, {reason}, parent {parent})"))?;
        let snapshot = self.snapshot_fresh();
        self.reporter.plot_row(&snapshot)
    }

    fn feedback_failure(
        &mut self,
        record: InputRecord,
        failure: &TrialFailure,
    ) -> Result<(), GuidanceError> {
        self.last_trial_was_novel = false;
        let fingerprint = failure.fingerprint();
        if let Some(id) = self.failures.record(fingerprint) {
            corpus::write_record(&self.failures_dir, &id.to_string(), &record)?;
            let path = self.failures_dir.join(format!("{id}.stacktrace"));
            let mut body = format!("{:?}: {}\n", failure.kind, failure.message);
            if let Some(site) = &failure.site {
                body.push_str(&format!("    at {site}\n"));
            }
            if let Some(frame) = failure.call_frame {
                body.push_str(&format!("    in instrumented frame {frame}\n"));
            }
            fs::write(&path, body).io_context(format!("writing {}", path.display()))?;

            warn!(%id, message = %failure.message, "new failure saved");
            self.reporter
                .log_event(&format!("failure {id}: {}", failure.message))?;
            let snapshot = self.snapshot_fresh();
            self.reporter.plot_row(&snapshot)?;
        } else {
            debug!(message = %failure.message, "duplicate failure fingerprint");
        }
        if self.config.exit_on_crash {
            self.stop.request_stop();
        }
        Ok(())
    }

    /// Flushes terminal state exactly once: final plot row and stats
    /// line, the optional counter snapshot, and `campaign.json`.
    fn finish(&mut self) -> Result<(), GuidanceError> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;

        let snapshot = self.snapshot_fresh();
        self.reporter.plot_row(&snapshot)?;
        self.reporter.stats_line(&snapshot)?;
        if self.config.save_branch_hit_counts {
            self.reporter.write_branch_hit_counts(&self.cumulative)?;
        }

        let summary = self.summary();
        let path = self.config.out_dir.join("campaign.json");
        let json = serde_json::to_vec_pretty(&summary)
            .map_err(|error| GuidanceError::io("serializing campaign summary", io::Error::other(error)))?;
        fs::write(&path, json).io_context(format!("writing {}", path.display()))?;

        if summary.failure_count > 0 {
            info!(
                "{} inputs failed; failing inputs are under {}",
                summary.failure_count,
                self.failures_dir.display()
            );
        } else {
            info!(
                "campaign complete: {} execs, {} branches covered",
                summary.total_execs, summary.covered_branches
            );
        }
        self.reporter.log_event("campaign complete")
    }
}

impl Guidance for FuzzGuidance {
    fn has_input(&mut self) -> Result<bool, GuidanceError> {
        if self.current.is_some() {
            return Err(GuidanceError::Contract(
                "has_input called before handle_result",
            ));
        }
        if self.planned.is_some() {
            return Ok(true);
        }
        if self.should_stop() {
            self.finish()?;
            return Ok(false);
        }
        let prefer_value_only = self.config.engine.is_split() && self.last_trial_was_novel;
        let planned =
            self.scheduler
                .next(&self.corpus, &self.favorites, &mut self.rng, prefer_value_only)?;
        self.planned = Some(planned);
        Ok(true)
    }

    fn get_input(&mut self) -> Result<ChoiceSource, GuidanceError> {
        let planned = self
            .planned
            .take()
            .ok_or(GuidanceError::Contract("get_input without a scheduled trial"))?;
        Self::lock_trace(&self.trace).reset();
        let stream_rng = StdRand::with_seed(self.rng.next());
        self.current = Some(CurrentTrial {
            parent: planned.parent,
            origin: planned.origin,
            started: Instant::now(),
        });
        Ok(ChoiceSource::from_record(
            planned.record,
            self.config.fixed_size,
            stream_rng,
        ))
    }

    fn observe_generated(&mut self, args: &str) {
        debug!(args, "generator arguments resolved");
        if let Err(error) = self.reporter.log_event(&format!("trial args: {args}")) {
            warn!(%error, "could not log generated arguments");
        }
    }

    fn handle_result(
        &mut self,
        source: ChoiceSource,
        outcome: &TrialOutcome,
    ) -> Result<(), GuidanceError> {
        let trial = self
            .current
            .take()
            .ok_or(GuidanceError::Contract("handle_result without get_input"))?;
        let elapsed = trial.started.elapsed();
        let record = source.into_record();
        self.stats.total += 1;

        match outcome {
            TrialOutcome::Success => {
                self.stats.valid += 1;
                if !self.config.blind {
                    self.feedback_success(record, trial.parent, trial.origin, elapsed)?;
                }
            }
            TrialOutcome::Invalid => {
                // No fold-in, no admission.
                self.stats.invalid += 1;
                self.last_trial_was_novel = false;
            }
            TrialOutcome::Failure(failure) => {
                self.feedback_failure(record, failure)?;
            }
        }

        if self.config.engine.profiles_execution() {
            let trace = Arc::clone(&self.trace);
            let trace = Self::lock_trace(&trace);
            debug!(
                max_call_depth = trace.max_call_depth,
                alloc_bytes = trace.alloc_bytes,
                reads = trace.reads,
                "execution profile"
            );
        }

        let hill = self.diversity.refresh_if_due(&self.cumulative);
        let snapshot = self.snapshot_with(hill);
        self.reporter.maybe_stats(&snapshot)
    }

    fn trace_sink(&mut self) -> TraceSink {
        TraceSink::new(Arc::clone(&self.trace))
    }
}
