//! Reduces a trial's coverage map to a bucketed signature and decides
//! whether the run added information over everything saved so far.

use serde::Serialize;

use super::{CoverageMap, CumulativeCoverage, MAP_SIZE};

/// Power-of-two hit-count classes. Runs hitting a branch 4 and 6 times
/// look the same; 3 and 4 times do not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[repr(u8)]
pub enum HitBucket {
    One = 1,
    Two = 2,
    Three = 3,
    UpTo7 = 4,
    UpTo15 = 5,
    UpTo31 = 6,
    UpTo127 = 7,
    Saturated = 8,
}

impl HitBucket {
    /// `None` for an unhit branch.
    pub fn of(count: u32) -> Option<Self> {
        let bucket = match count {
            0 => return None,
            1 => Self::One,
            2 => Self::Two,
            3 => Self::Three,
            4..=7 => Self::UpTo7,
            8..=15 => Self::UpTo15,
            16..=31 => Self::UpTo31,
            32..=127 => Self::UpTo127,
            _ => Self::Saturated,
        };
        Some(bucket)
    }

    pub const fn rank(self) -> u8 {
        self as u8
    }
}

/// Compact summary of one run: the set of `(slot, bucket)` pairs, sorted
/// by slot. Drives novelty comparison and the re-execution invariant
/// (a rerun's signature must cover the recorded one).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CoverageSignature(Vec<(u32, HitBucket)>);

impl CoverageSignature {
    pub fn from_map(map: &CoverageMap) -> Self {
        let mut pairs: Vec<_> = map
            .non_zero()
            .filter_map(|(slot, count)| HitBucket::of(count).map(|bucket| (slot, bucket)))
            .collect();
        pairs.sort_unstable_by_key(|&(slot, _)| slot);
        Self(pairs)
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, HitBucket)> + '_ {
        self.0.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn bucket_of(&self, slot: u32) -> Option<HitBucket> {
        self.0
            .binary_search_by_key(&slot, |&(s, _)| s)
            .ok()
            .map(|idx| self.0[idx].1)
    }

    /// True if every branch of `other` appears here with at least the
    /// same bucket.
    pub fn covers(&self, other: &Self) -> bool {
        other
            .iter()
            .all(|(slot, bucket)| self.bucket_of(slot).is_some_and(|mine| mine >= bucket))
    }
}

/// What a trial contributed relative to everything saved so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Novelty {
    /// Some branch was hit that no valid execution ever hit.
    NewBranch,
    /// Some branch's hit-count bucket exceeds the maximum bucket any
    /// admitted input reached on that branch.
    NewBucket,
    Redundant,
}

/// Per-branch maximum admitted bucket, updated only when an input is
/// actually admitted, so near-miss runs keep counting as novel until one
/// of them lands in the corpus.
#[derive(Debug)]
pub struct NoveltyFilter {
    max_bucket: Box<[u8]>,
}

impl Default for NoveltyFilter {
    fn default() -> Self {
        Self {
            max_bucket: vec![0; MAP_SIZE].into_boxed_slice(),
        }
    }
}

impl NoveltyFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Classifies a trial map against the pre-fold cumulative map.
    pub fn classify(&self, trial: &CoverageMap, cumulative: &CumulativeCoverage) -> Novelty {
        let mut verdict = Novelty::Redundant;
        for (slot, count) in trial.non_zero() {
            if cumulative.value_at(slot) == 0 {
                return Novelty::NewBranch;
            }
            let Some(bucket) = HitBucket::of(count) else {
                continue;
            };
            if bucket.rank() > self.max_bucket[slot as usize] {
                verdict = Novelty::NewBucket;
            }
        }
        verdict
    }

    /// Records an admitted input's signature as the new per-branch
    /// bucket ceiling.
    pub fn record_admitted(&mut self, signature: &CoverageSignature) {
        for (slot, bucket) in signature.iter() {
            let cell = &mut self.max_bucket[slot as usize];
            *cell = (*cell).max(bucket.rank());
        }
    }
}
