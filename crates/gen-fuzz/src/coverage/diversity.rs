//! Hill numbers of orders 0, 1 and 2 over the cumulative branch-hit
//! histogram. Order 0 is branch richness, order 1 the exponential of
//! Shannon entropy, order 2 the inverse Simpson index.

use std::time::{Duration, Instant};

use derive_new::new as New;
use serde::Serialize;

use super::CumulativeCoverage;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct HillNumbers {
    /// H0: number of covered branches.
    pub richness: f64,
    /// H1 = exp(−Σ pᵢ·ln pᵢ).
    pub shannon: f64,
    /// H2 = 1 / Σ pᵢ².
    pub simpson: f64,
}

impl HillNumbers {
    pub const ZERO: Self = Self {
        richness: 0.0,
        shannon: 0.0,
        simpson: 0.0,
    };

    /// Computes all three orders from a hit-count histogram.
    pub fn compute<I>(counts: I) -> Self
    where
        I: IntoIterator<Item = u64>,
    {
        let mut total = 0u64;
        let mut richness = 0u64;
        let counts: Vec<u64> = counts.into_iter().filter(|&c| c > 0).collect();
        for &count in &counts {
            total += count;
            richness += 1;
        }
        if total == 0 {
            return Self::ZERO;
        }

        let total = total as f64;
        let mut entropy = 0.0f64;
        let mut simpson_sum = 0.0f64;
        for &count in &counts {
            let p = count as f64 / total;
            entropy -= p * p.ln();
            simpson_sum += p * p;
        }
        Self {
            richness: richness as f64,
            shannon: entropy.exp(),
            simpson: 1.0 / simpson_sum,
        }
    }

    pub fn of_coverage(cumulative: &CumulativeCoverage) -> Self {
        Self::compute(cumulative.non_zero().map(|(_, count)| count))
    }
}

/// Caches the Hill numbers for reporting, recomputing at most once per
/// refresh interval. Plot rows and the final summary always recompute so
/// their values do not depend on wall-clock timing.
#[derive(Debug, New)]
pub struct DiversityTracker {
    interval: Duration,
    #[new(default)]
    last_refresh: Option<Instant>,
    #[new(value = "HillNumbers::ZERO")]
    current: HillNumbers,
}

impl DiversityTracker {
    pub fn current(&self) -> HillNumbers {
        self.current
    }

    pub fn refresh_if_due(&mut self, cumulative: &CumulativeCoverage) -> HillNumbers {
        let due = self
            .last_refresh
            .is_none_or(|last| last.elapsed() >= self.interval);
        if due {
            self.current = HillNumbers::of_coverage(cumulative);
            self.last_refresh = Some(Instant::now());
        }
        self.current
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOLERANCE: f64 = 1e-9;

    #[test]
    fn uniform_histogram_matches_closed_form() {
        let h = HillNumbers::compute([3, 3, 3]);
        assert!((h.richness - 3.0).abs() < TOLERANCE);
        assert!((h.shannon - 3.0).abs() < TOLERANCE);
        assert!((h.simpson - 3.0).abs() < TOLERANCE);
    }

    #[test]
    fn empty_histogram_is_zero() {
        assert_eq!(HillNumbers::compute([]), HillNumbers::ZERO);
        assert_eq!(HillNumbers::compute([0, 0]), HillNumbers::ZERO);
    }

    #[test]
    fn single_branch() {
        let h = HillNumbers::compute([17]);
        assert!((h.richness - 1.0).abs() < TOLERANCE);
        assert!((h.shannon - 1.0).abs() < TOLERANCE);
        assert!((h.simpson - 1.0).abs() < TOLERANCE);
    }

    #[test]
    fn skew_orders_the_indices() {
        // For a skewed distribution H0 ≥ H1 ≥ H2.
        let h = HillNumbers::compute([100, 1, 1]);
        assert_eq!(h.richness, 3.0);
        assert!(h.richness > h.shannon);
        assert!(h.shannon > h.simpson);
        assert!(h.simpson > 1.0);
    }

    #[test]
    fn richness_equals_nonzero_cell_count() {
        let mut cumulative = CumulativeCoverage::new();
        let mut trial = crate::coverage::CoverageMap::new();
        for slot in [1, 5, 9, 200] {
            trial.increment(slot);
        }
        cumulative.fold(&trial);
        let h = HillNumbers::of_coverage(&cumulative);
        assert_eq!(h.richness as usize, cumulative.covered_count());
    }
}
