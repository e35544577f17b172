//! Ties a [`FuzzGuidance`] to a [`Harness`] and drives trials until the
//! guidance runs out of budget or is told to stop.

use derive_new::new as New;

use crate::{
    error::GuidanceError,
    guidance::{CampaignSummary, FuzzGuidance, Guidance},
    harness::Harness,
};

#[derive(Debug, New)]
pub struct Campaign<H> {
    guidance: FuzzGuidance,
    harness: H,
}

impl<H: Harness> Campaign<H> {
    pub fn guidance(&self) -> &FuzzGuidance {
        &self.guidance
    }

    /// The generate → run → observe → update loop. Single-threaded on
    /// purpose: coverage writes stay race-free and a fixed seed replays
    /// the exact same campaign.
    pub fn run(&mut self) -> Result<CampaignSummary, GuidanceError> {
        while self.guidance.has_input()? {
            let mut sink = self.guidance.trace_sink();
            let mut source = self.guidance.get_input()?;
            let outcome = self.harness.run(&mut source, &mut sink);
            // Flush the sink's profile before the result is folded.
            drop(sink);
            self.guidance.handle_result(source, &outcome)?;
        }
        Ok(self.guidance.summary())
    }
}

#[cfg(test)]
mod tests {
    use std::{
        fs,
        path::Path,
        sync::{Arc, Mutex},
    };

    use libafl_bolts::rands::StdRand;
    use tempfile::TempDir;

    use super::*;
    use crate::{
        assume,
        choices::{ChoiceKind, ChoiceSource, InputRecord, SplitRecord},
        config::{EngineKind, FuzzConfig},
        harness::PanicHarness,
        mutation,
        trace::{TraceSink, TrialTrace},
    };

    fn magic_byte(source: &mut ChoiceSource, trace: &mut TraceSink) {
        let byte = source.next_byte().unwrap_or(0);
        let hit = byte == 0x2A;
        trace.branch(1, hit);
        if hit {
            panic!("magic byte reached");
        }
    }

    fn high_bit(source: &mut ChoiceSource, trace: &mut TraceSink) {
        let byte = source.next_byte().unwrap_or(0);
        trace.branch(1, byte >= 0x80);
    }

    fn checked_div(source: &mut ChoiceSource, trace: &mut TraceSink) {
        let divisor = source.next_bounded(ChoiceKind::Value, 8).unwrap_or(0) as u32;
        assume!(divisor != 0);
        let quotient = 100 / divisor;
        trace.branch(2, quotient > 20);
    }

    fn nibble_tree(source: &mut ChoiceSource, trace: &mut TraceSink) {
        let first = source.next_byte().unwrap_or(0);
        trace.branch(1, first & 1 != 0);
        trace.branch(2, first & 2 != 0);
        if first & 1 != 0 {
            let second = source.next_byte().unwrap_or(0);
            trace.branch(3, second >= 0x80);
        }
    }

    fn token_list(source: &mut ChoiceSource, trace: &mut TraceSink) {
        let length = source.next_bounded(ChoiceKind::Structure, 8).unwrap_or(0);
        trace.branch(100 + length as u32, true);
        for _ in 0..length {
            let element = source.next_value().unwrap_or(0);
            trace.branch(200, element % 2 == 0);
        }
    }

    fn base_config(out: &Path) -> FuzzConfig {
        FuzzConfig {
            out_dir: out.to_owned(),
            random_seed: 1,
            trials: Some(256),
            ..FuzzConfig::default()
        }
    }

    #[test]
    fn seeded_crash_is_found_on_trial_one() {
        let dir = TempDir::new().unwrap();
        let seeds = dir.path().join("in");
        fs::create_dir(&seeds).unwrap();
        fs::write(seeds.join("magic"), [0x2A]).unwrap();

        let config = FuzzConfig {
            seeds_dir: Some(seeds),
            exit_on_crash: true,
            ..base_config(&dir.path().join("out"))
        };
        let guidance = FuzzGuidance::new(config).unwrap();
        let mut campaign = Campaign::new(guidance, PanicHarness::new(magic_byte));
        let summary = campaign.run().unwrap();

        assert_eq!(summary.total_execs, 1);
        assert_eq!(summary.failure_count, 1);
        let failing = fs::read(dir.path().join("out/failures/id_000000")).unwrap();
        assert_eq!(failing, [0x2A]);
        let stacktrace =
            fs::read_to_string(dir.path().join("out/failures/id_000000.stacktrace")).unwrap();
        assert!(stacktrace.contains("magic byte reached"));
    }

    #[test]
    fn novelty_admission_covers_both_arms() {
        let dir = TempDir::new().unwrap();
        let guidance = FuzzGuidance::new(base_config(&dir.path().join("out"))).unwrap();
        let mut campaign = Campaign::new(guidance, PanicHarness::new(high_bit));
        let summary = campaign.run().unwrap();

        assert!(summary.corpus_size >= 2, "corpus: {}", summary.corpus_size);
        assert_eq!(summary.covered_branches, 2);

        // One saved input per arm of the branch.
        let first_bytes = |id: u32| {
            fs::read(dir.path().join(format!("out/corpus/id_{id:06}")))
                .unwrap()
                .first()
                .copied()
                .unwrap_or(0)
        };
        let mut arms: Vec<bool> = (0..summary.corpus_size as u32)
            .map(|id| first_bytes(id) >= 0x80)
            .collect();
        arms.sort_unstable();
        arms.dedup();
        assert_eq!(arms.len(), 2);
    }

    #[test]
    fn assumption_violations_are_counted_not_saved() {
        let dir = TempDir::new().unwrap();
        let guidance = FuzzGuidance::new(base_config(&dir.path().join("out"))).unwrap();
        let mut campaign = Campaign::new(guidance, PanicHarness::new(checked_div));
        let summary = campaign.run().unwrap();

        assert!(summary.invalid_execs > 0);
        assert_eq!(
            summary.valid_execs + summary.invalid_execs,
            summary.total_execs
        );
        assert_eq!(summary.failure_count, 0);
        // Invalid runs never reach the corpus: every saved input has a
        // non-zero divisor draw.
        for entry in fs::read_dir(dir.path().join("out/corpus")).unwrap() {
            let bytes = fs::read(entry.unwrap().path()).unwrap();
            assert_ne!(bytes.first().map(|b| usize::from(*b) % 8), Some(0));
        }
    }

    #[test]
    fn split_campaign_mirrors_inputs_as_pairs() {
        let dir = TempDir::new().unwrap();
        let config = FuzzConfig {
            engine: EngineKind::BeDivFuzz,
            ..base_config(&dir.path().join("out"))
        };
        let guidance = FuzzGuidance::new(config).unwrap();
        let mut campaign = Campaign::new(guidance, PanicHarness::new(token_list));
        let summary = campaign.run().unwrap();

        assert!(summary.corpus_size >= 1);
        assert!(dir.path().join("out/corpus/id_000000.structure").is_file());
        assert!(dir.path().join("out/corpus/id_000000.value").is_file());
    }

    #[test]
    fn value_only_mutation_preserves_structural_branches() {
        let structural_slots = |record: InputRecord| {
            let shared = Arc::new(Mutex::new(TrialTrace::default()));
            let mut sink = TraceSink::new(Arc::clone(&shared));
            let mut source = ChoiceSource::from_record(record, false, StdRand::with_seed(99));
            token_list(&mut source, &mut sink);
            drop(sink);
            let trace = shared.lock().unwrap();
            let value_slots = [
                crate::coverage::branch_slot(200, true),
                crate::coverage::branch_slot(200, false),
            ];
            let mut slots: Vec<u32> = trace
                .map
                .non_zero()
                .map(|(slot, _)| slot)
                .filter(|slot| !value_slots.contains(slot))
                .collect();
            slots.sort_unstable();
            slots
        };
        // Parent encodes a 3-element list.
        let parent = SplitRecord {
            structure: vec![3],
            value: vec![1, 2, 3],
            log: Vec::new(),
        };
        let parent_structural = structural_slots(InputRecord::Split(parent.clone()));

        let mut rng = StdRand::with_seed(5);
        for _ in 0..8 {
            let child = mutation::mutate_split(&mut rng, &parent, 0.0);
            assert_eq!(child.structure, parent.structure);
            assert_eq!(
                structural_slots(InputRecord::Split(child)),
                parent_structural
            );
        }
    }

    #[test]
    fn fixed_seed_runs_are_byte_identical() {
        let run_campaign = |dir: &Path| {
            let config = FuzzConfig {
                random_seed: 7,
                trials: Some(200),
                ..base_config(dir)
            };
            let guidance = FuzzGuidance::new(config).unwrap();
            Campaign::new(guidance, PanicHarness::new(nibble_tree))
                .run()
                .unwrap()
        };

        let first = TempDir::new().unwrap();
        let second = TempDir::new().unwrap();
        let summary_one = run_campaign(first.path());
        let summary_two = run_campaign(second.path());
        assert_eq!(summary_one.corpus_size, summary_two.corpus_size);
        assert_eq!(summary_one.covered_branches, summary_two.covered_branches);

        let corpus_files = |dir: &Path| {
            let mut entries: Vec<_> = fs::read_dir(dir.join("corpus"))
                .unwrap()
                .map(|entry| entry.unwrap().path())
                .collect();
            entries.sort();
            entries
        };
        let first_files = corpus_files(first.path());
        let second_files = corpus_files(second.path());
        assert_eq!(first_files.len(), second_files.len());
        for (a, b) in first_files.iter().zip(&second_files) {
            assert_eq!(a.file_name(), b.file_name());
            assert_eq!(fs::read(a).unwrap(), fs::read(b).unwrap(), "{a:?} differs");
        }

        // plot_data carries no wall-clock column and must match verbatim.
        let plot = |dir: &Path| fs::read_to_string(dir.join("plot_data")).unwrap();
        assert_eq!(plot(first.path()), plot(second.path()));
    }

    #[test]
    fn replayed_inputs_cover_their_recorded_signature() {
        let dir = TempDir::new().unwrap();
        let config = FuzzConfig {
            trials: Some(100),
            ..base_config(&dir.path().join("out"))
        };
        let guidance = FuzzGuidance::new(config).unwrap();
        let mut campaign = Campaign::new(guidance, PanicHarness::new(nibble_tree));
        campaign.run().unwrap();

        for input in campaign.guidance().corpus().iter() {
            let shared = Arc::new(Mutex::new(TrialTrace::default()));
            let mut sink = TraceSink::new(Arc::clone(&shared));
            let mut source = ChoiceSource::from_record(
                input.record.clone(),
                true,
                StdRand::with_seed(0),
            );
            nibble_tree(&mut source, &mut sink);
            drop(sink);
            let replayed =
                crate::coverage::novelty::CoverageSignature::from_map(&shared.lock().unwrap().map);
            assert!(
                replayed.covers(&input.signature),
                "{} lost coverage on replay",
                input.id
            );
        }
    }

    #[test]
    fn stop_token_ends_the_campaign_between_trials() {
        let dir = TempDir::new().unwrap();
        let guidance = FuzzGuidance::new(base_config(&dir.path().join("out"))).unwrap();
        guidance.stop_token().request_stop();
        let mut campaign = Campaign::new(guidance, PanicHarness::new(high_bit));
        let summary = campaign.run().unwrap();
        assert_eq!(summary.total_execs, 0);
    }
}
