//! In-process adapter between the guidance and a target function:
//! catches panics, recognizes assumption violations, and reports
//! wall-clock overruns as timeouts.

use std::{
    any::Any,
    cell::{Cell, RefCell},
    fmt,
    panic::{self, AssertUnwindSafe},
    sync::Once,
    time::{Duration, Instant},
};

use crate::{
    choices::ChoiceSource,
    guidance::{
        TrialOutcome,
        failures::{FailureKind, PanicSite, TrialFailure},
    },
    trace::TraceSink,
};

/// Runs one trial: reads choices from `source`, reports instrumentation
/// through `trace`, and classifies what happened.
pub trait Harness {
    fn run(&mut self, source: &mut ChoiceSource, trace: &mut TraceSink) -> TrialOutcome;
}

impl<H: Harness + ?Sized> Harness for Box<H> {
    fn run(&mut self, source: &mut ChoiceSource, trace: &mut TraceSink) -> TrialOutcome {
        (**self).run(source, trace)
    }
}

/// Panic payload marking an `assume!` violation rather than a bug.
#[derive(Debug)]
struct AssumptionViolated;

/// Unwinds the current trial as assumption-violated; the harness turns
/// this into an INVALID outcome. Prefer the [`assume!`](crate::assume)
/// macro.
pub fn violate_assumption() -> ! {
    panic::panic_any(AssumptionViolated)
}

thread_local! {
    static CAPTURING: Cell<bool> = const { Cell::new(false) };
    static LAST_SITE: RefCell<Option<PanicSite>> = const { RefCell::new(None) };
}

static INSTALL_HOOK: Once = Once::new();

/// Swaps in a panic hook that records the panic site and stays silent
/// while a trial is being captured; panics outside trials fall through
/// to the previous hook.
fn install_capture_hook() {
    INSTALL_HOOK.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            if CAPTURING.with(Cell::get) {
                let site = info.location().map(|location| PanicSite {
                    file: location.file().to_owned(),
                    line: location.line(),
                });
                LAST_SITE.with(|slot| *slot.borrow_mut() = site);
            } else {
                previous(info);
            }
        }));
    });
}

fn panic_message(payload: &Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}

/// Wraps a target closure. A normal return is SUCCESS, an `assume!`
/// violation INVALID, any other panic FAILURE; a run over the configured
/// timeout is FAILURE with the distinguished timeout fingerprint.
pub struct PanicHarness<F> {
    target: F,
    run_timeout: Option<Duration>,
}

impl<F> fmt::Debug for PanicHarness<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PanicHarness")
            .field("run_timeout", &self.run_timeout)
            .finish_non_exhaustive()
    }
}

impl<F> PanicHarness<F>
where
    F: FnMut(&mut ChoiceSource, &mut TraceSink),
{
    pub fn new(target: F) -> Self {
        Self {
            target,
            run_timeout: None,
        }
    }

    pub fn with_run_timeout(mut self, run_timeout: Option<Duration>) -> Self {
        self.run_timeout = run_timeout;
        self
    }
}

impl<F> Harness for PanicHarness<F>
where
    F: FnMut(&mut ChoiceSource, &mut TraceSink),
{
    fn run(&mut self, source: &mut ChoiceSource, trace: &mut TraceSink) -> TrialOutcome {
        install_capture_hook();
        CAPTURING.with(|flag| flag.set(true));
        let started = Instant::now();
        let result = panic::catch_unwind(AssertUnwindSafe(|| (self.target)(source, trace)));
        let elapsed = started.elapsed();
        CAPTURING.with(|flag| flag.set(false));

        match result {
            Ok(()) => match self.run_timeout {
                Some(limit) if elapsed > limit => {
                    TrialOutcome::Failure(TrialFailure::timeout(elapsed, limit))
                }
                _ => TrialOutcome::Success,
            },
            Err(payload) if payload.is::<AssumptionViolated>() => TrialOutcome::Invalid,
            Err(payload) => TrialOutcome::Failure(TrialFailure {
                kind: FailureKind::Panic,
                message: panic_message(&payload),
                site: LAST_SITE.with(|slot| slot.borrow_mut().take()),
                call_frame: trace.current_frame(),
            }),
        }
    }
}
