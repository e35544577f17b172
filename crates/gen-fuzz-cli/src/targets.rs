//! Fuzz targets compiled into the binary.
//!
//! The engine identifies entry points by name against this table; each
//! entry wires a hand-instrumented demo target into a panic-catching
//! harness. Targets read generator choices from the stream and report
//! branches through the trace sink themselves.

use std::time::Duration;

use anyhow::Context;
use gen_fuzz::{
    assume,
    choices::{ChoiceKind, ChoiceSource},
    harness::{Harness, PanicHarness},
    trace::TraceSink,
};

pub(crate) struct FuzzTarget {
    pub name: &'static str,
    pub description: &'static str,
    factory: fn(Option<Duration>) -> Box<dyn Harness>,
}

fn boxed<F>(target: F, run_timeout: Option<Duration>) -> Box<dyn Harness>
where
    F: FnMut(&mut ChoiceSource, &mut TraceSink) + 'static,
{
    Box::new(PanicHarness::new(target).with_run_timeout(run_timeout))
}

pub(crate) fn registry() -> &'static [FuzzTarget] {
    const TARGETS: &[FuzzTarget] = &[
        FuzzTarget {
            name: "magic_byte",
            description: "panics when the first input byte is 0x2A",
            factory: |timeout| boxed(magic_byte, timeout),
        },
        FuzzTarget {
            name: "high_bit",
            description: "branches on the high bit of the first byte",
            factory: |timeout| boxed(high_bit, timeout),
        },
        FuzzTarget {
            name: "checked_div",
            description: "divides by a generated value, assuming it non-zero",
            factory: |timeout| boxed(checked_div, timeout),
        },
        FuzzTarget {
            name: "token_list",
            description: "length-prefixed list; length is structural, elements are values",
            factory: |timeout| boxed(token_list, timeout),
        },
    ];
    TARGETS
}

pub(crate) fn resolve(name: &str, run_timeout: Option<Duration>) -> anyhow::Result<Box<dyn Harness>> {
    registry()
        .iter()
        .find(|target| target.name == name)
        .map(|target| (target.factory)(run_timeout))
        .with_context(|| format!("unknown target {name:?}; see `list-targets`"))
}

fn magic_byte(source: &mut ChoiceSource, trace: &mut TraceSink) {
    let byte = source.next_byte().unwrap_or(0);
    let hit = byte == 0x2A;
    trace.branch(1, hit);
    if hit {
        panic!("magic byte 0x2A reached");
    }
}

fn high_bit(source: &mut ChoiceSource, trace: &mut TraceSink) {
    let byte = source.next_byte().unwrap_or(0);
    trace.branch(10, byte >= 0x80);
    trace.branch(11, byte & 0x0F == 0);
}

fn checked_div(source: &mut ChoiceSource, trace: &mut TraceSink) {
    let divisor = source.next_bounded(ChoiceKind::Value, 16).unwrap_or(0) as u32;
    assume!(divisor != 0);
    let quotient = 1000 / divisor;
    trace.branch(20, quotient > 100);
    trace.branch(21, quotient % 2 == 0);
}

fn token_list(source: &mut ChoiceSource, trace: &mut TraceSink) {
    let length = source.next_bounded(ChoiceKind::Structure, 8).unwrap_or(0);
    trace.branch(30 + length as u32, true);
    let mut sum = 0u32;
    for _ in 0..length {
        let element = source.next_value().unwrap_or(0);
        trace.branch(40, element % 2 == 0);
        sum += u32::from(element);
    }
    trace.branch(41, sum > 255);
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use gen_fuzz::{
        choices::InputRecord,
        guidance::TrialOutcome,
        trace::TrialTrace,
    };
    use libafl_bolts::rands::StdRand;

    use super::*;

    fn run(target: &str, bytes: Vec<u8>) -> TrialOutcome {
        let mut harness = resolve(target, None).unwrap();
        let mut source = ChoiceSource::from_record(
            InputRecord::Linear { bytes },
            true,
            StdRand::with_seed(0),
        );
        let mut sink = TraceSink::new(Arc::new(Mutex::new(TrialTrace::default())));
        harness.run(&mut source, &mut sink)
    }

    #[test]
    fn unknown_target_is_an_error() {
        assert!(resolve("no_such_target", None).is_err());
    }

    #[test]
    fn registry_names_are_unique() {
        let mut names: Vec<_> = registry().iter().map(|target| target.name).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), registry().len());
    }

    #[test]
    fn magic_byte_classifies_inputs() {
        assert!(matches!(run("magic_byte", vec![0x2A]), TrialOutcome::Failure(_)));
        assert!(matches!(run("magic_byte", vec![0x00]), TrialOutcome::Success));
    }

    #[test]
    fn checked_div_flags_zero_divisors_invalid() {
        assert!(matches!(run("checked_div", vec![0]), TrialOutcome::Invalid));
        assert!(matches!(run("checked_div", vec![3]), TrialOutcome::Success));
    }
}
