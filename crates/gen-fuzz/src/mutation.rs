//! Byte-level mutation of parent inputs.
//!
//! One call produces one child: a copy of the parent with 1–4 random
//! overwrite splices. Split records are mutated per stream, with the
//! structure/value choice weighted by the caller; passing weight 0
//! freezes the structural skeleton and probes only leaf values.

use std::num::NonZero;

use libafl_bolts::rands::{Rand, StdRand};

use crate::choices::SplitRecord;

const MAX_MUTATIONS_PER_CHILD: usize = 4;
const MAX_RUN_LENGTH: usize = 4;

/// How many children one parent receives: `floor(log2(size)) + 1`.
pub fn children_budget(size: usize) -> u32 {
    size.max(1).ilog2() + 1
}

/// Overwrites a random run of 1–4 bytes with fresh random bytes.
fn splice(rng: &mut StdRand, bytes: &mut [u8]) {
    let Some(len) = NonZero::new(bytes.len()) else {
        return;
    };
    let offset = rng.below(len);
    let run = (1 + rng.below_or_zero(MAX_RUN_LENGTH)).min(len.get() - offset);
    for byte in &mut bytes[offset..offset + run] {
        *byte = rng.next() as u8;
    }
}

pub fn mutate_linear(rng: &mut StdRand, parent: &[u8]) -> Vec<u8> {
    let mut child = parent.to_vec();
    if child.is_empty() {
        // Nothing to splice; stream extension will grow the child at run
        // time from its own random tail.
        return child;
    }
    let mutations = 1 + rng.below_or_zero(MAX_MUTATIONS_PER_CHILD);
    for _ in 0..mutations {
        splice(rng, &mut child);
    }
    child
}

pub fn mutate_split(rng: &mut StdRand, parent: &SplitRecord, structure_weight: f64) -> SplitRecord {
    let mut child = SplitRecord {
        structure: parent.structure.clone(),
        value: parent.value.clone(),
        // Stale after any mutation; re-recorded when the child runs.
        log: Vec::new(),
    };
    let mutations = 1 + rng.below_or_zero(MAX_MUTATIONS_PER_CHILD);
    for _ in 0..mutations {
        let target = if rng.coinflip(structure_weight) && !child.structure.is_empty() {
            &mut child.structure
        } else {
            &mut child.value
        };
        splice(rng, target);
    }
    child
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budget_grows_logarithmically() {
        assert_eq!(children_budget(0), 1);
        assert_eq!(children_budget(1), 1);
        assert_eq!(children_budget(2), 2);
        assert_eq!(children_budget(3), 2);
        assert_eq!(children_budget(8), 4);
        assert_eq!(children_budget(1024), 11);
    }

    #[test]
    fn linear_mutation_preserves_length() {
        let parent = vec![0u8; 64];
        for seed in 0..16 {
            let child = mutate_linear(&mut StdRand::with_seed(seed), &parent);
            assert_eq!(child.len(), parent.len());
        }
    }

    #[test]
    fn linear_mutation_changes_bytes() {
        let parent = vec![0u8; 64];
        let changed = (0..16).any(|seed| {
            mutate_linear(&mut StdRand::with_seed(seed), &parent) != parent
        });
        assert!(changed);
    }

    #[test]
    fn mutation_is_deterministic_per_seed() {
        let parent: Vec<u8> = (0..32).collect();
        let one = mutate_linear(&mut StdRand::with_seed(9), &parent);
        let two = mutate_linear(&mut StdRand::with_seed(9), &parent);
        assert_eq!(one, two);
    }

    #[test]
    fn empty_parent_yields_empty_child() {
        assert!(mutate_linear(&mut StdRand::with_seed(1), &[]).is_empty());
    }

    #[test]
    fn zero_structure_weight_freezes_the_skeleton() {
        let parent = SplitRecord {
            structure: vec![3, 1, 4, 1, 5],
            value: vec![0; 32],
            log: Vec::new(),
        };
        for seed in 0..16 {
            let child = mutate_split(&mut StdRand::with_seed(seed), &parent, 0.0);
            assert_eq!(child.structure, parent.structure);
            assert_eq!(child.value.len(), parent.value.len());
            assert!(child.log.is_empty());
        }
    }

    #[test]
    fn full_structure_weight_freezes_values() {
        let parent = SplitRecord {
            structure: vec![0; 16],
            value: vec![7; 16],
            log: Vec::new(),
        };
        for seed in 0..16 {
            let child = mutate_split(&mut StdRand::with_seed(seed), &parent, 1.0);
            assert_eq!(child.value, parent.value);
        }
    }

    #[test]
    fn empty_structure_falls_back_to_values() {
        let parent = SplitRecord {
            structure: Vec::new(),
            value: vec![0; 8],
            log: Vec::new(),
        };
        let child = mutate_split(&mut StdRand::with_seed(2), &parent, 1.0);
        assert!(child.structure.is_empty());
        assert_eq!(child.value.len(), 8);
    }
}
