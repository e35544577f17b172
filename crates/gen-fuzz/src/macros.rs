/// Declares a precondition on generated input. A violated assumption
/// aborts the trial as INVALID: it is counted, never saved, and its
/// coverage is not folded in.
#[macro_export]
macro_rules! assume {
    ($cond:expr) => {
        if !$cond {
            $crate::harness::violate_assumption();
        }
    };
}
