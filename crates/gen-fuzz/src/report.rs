//! Campaign persistence and the line-oriented progress dump: the plot
//! CSV, the human-readable event log, periodic stats lines and the
//! optional branch-hit-count snapshot.

use std::{
    fs::File,
    io::{BufWriter, Write},
    path::{Path, PathBuf},
    time::{Duration, Instant},
};

use itertools::Itertools;
use tracing::info;

use crate::{
    config::StatsStyle,
    coverage::{CumulativeCoverage, diversity::HillNumbers},
    error::{GuidanceError, IoContext},
};

/// A point-in-time view of the campaign, for stats lines and plot rows.
#[derive(Debug, Clone, Copy)]
pub struct StatsSnapshot {
    pub elapsed: Duration,
    pub total_execs: u64,
    pub valid_execs: u64,
    pub invalid_execs: u64,
    pub corpus_size: usize,
    pub covered_branches: usize,
    pub failures: usize,
    pub hill: HillNumbers,
}

impl StatsSnapshot {
    fn execs_per_sec(&self) -> u64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            (self.total_execs as f64 / secs) as u64
        } else {
            self.total_execs
        }
    }
}

#[derive(Debug)]
pub struct Reporter {
    out_dir: PathBuf,
    plot: BufWriter<File>,
    log: BufWriter<File>,
    style: StatsStyle,
    refresh: Duration,
    last_stats: Option<Instant>,
    started: Instant,
}

impl Reporter {
    pub fn new(
        out_dir: &Path,
        style: StatsStyle,
        refresh: Duration,
    ) -> Result<Self, GuidanceError> {
        let plot_path = out_dir.join("plot_data");
        let mut plot = BufWriter::new(
            File::create(&plot_path)
                .io_context(format!("creating {}", plot_path.display()))?,
        );
        writeln!(
            plot,
            "# total_execs, valid_execs, corpus_size, covered_branches, h1, h2"
        )
        .io_context("writing plot header")?;

        let log_path = out_dir.join("fuzz.log");
        let log = BufWriter::new(
            File::create(&log_path).io_context(format!("creating {}", log_path.display()))?,
        );
        Ok(Self {
            out_dir: out_dir.to_owned(),
            plot,
            log,
            style,
            refresh,
            last_stats: None,
            started: Instant::now(),
        })
    }

    /// Appends a timestamped line to `fuzz.log`.
    pub fn log_event(&mut self, message: &str) -> Result<(), GuidanceError> {
        let elapsed = self.started.elapsed().as_secs();
        writeln!(self.log, "[{elapsed:>6}s] {message}").io_context("writing fuzz.log")?;
        self.log.flush().io_context("flushing fuzz.log")
    }

    /// Appends one plot row. Rows are written on corpus and failure
    /// events rather than on a timer, and the leading column is the
    /// execution count — a logical timestamp — so fixed-seed runs
    /// produce byte-identical plots.
    pub fn plot_row(&mut self, snapshot: &StatsSnapshot) -> Result<(), GuidanceError> {
        writeln!(
            self.plot,
            "{}, {}, {}, {}, {:.4}, {:.4}",
            snapshot.total_execs,
            snapshot.valid_execs,
            snapshot.corpus_size,
            snapshot.covered_branches,
            snapshot.hill.shannon,
            snapshot.hill.simpson,
        )
        .io_context("writing plot_data")?;
        self.plot.flush().io_context("flushing plot_data")
    }

    /// Emits a stats line if the refresh period elapsed.
    pub fn maybe_stats(&mut self, snapshot: &StatsSnapshot) -> Result<(), GuidanceError> {
        let due = self
            .last_stats
            .is_none_or(|last| last.elapsed() >= self.refresh);
        if !due {
            return Ok(());
        }
        self.last_stats = Some(Instant::now());
        self.stats_line(snapshot)
    }

    /// Unconditional stats line, for campaign termination.
    pub fn stats_line(&mut self, snapshot: &StatsSnapshot) -> Result<(), GuidanceError> {
        let line = match self.style {
            StatsStyle::Afl => format!(
                "[+] {}s | execs: {} ({} valid, {} invalid) | corpus: {} | branches: {} | failures: {} | exec/s: {}",
                snapshot.elapsed.as_secs(),
                snapshot.total_execs,
                snapshot.valid_execs,
                snapshot.invalid_execs,
                snapshot.corpus_size,
                snapshot.covered_branches,
                snapshot.failures,
                snapshot.execs_per_sec(),
            ),
            StatsStyle::LibFuzzer => format!(
                "#{} cov: {} corp: {} crashes: {} exec/s: {}",
                snapshot.total_execs,
                snapshot.covered_branches,
                snapshot.corpus_size,
                snapshot.failures,
                snapshot.execs_per_sec(),
            ),
        };
        info!("{line}");
        self.log_event(&line)
    }

    /// Persists the cumulative counters as little-endian
    /// `(u32 slot, u32 count)` pairs for non-zero cells, sorted by slot.
    pub fn write_branch_hit_counts(
        &self,
        cumulative: &CumulativeCoverage,
    ) -> Result<(), GuidanceError> {
        let path = self.out_dir.join("branch_hit_counts");
        let mut buffer = Vec::with_capacity(cumulative.covered_count() * 8);
        for (slot, count) in cumulative.non_zero().sorted_by_key(|&(slot, _)| slot) {
            buffer.extend_from_slice(&slot.to_le_bytes());
            let count = u32::try_from(count).unwrap_or(u32::MAX);
            buffer.extend_from_slice(&count.to_le_bytes());
        }
        std::fs::write(&path, buffer).io_context(format!("writing {}", path.display()))
    }
}
