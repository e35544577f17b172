//! The saved-input corpus: admitted inputs, their on-disk mirror, and
//! the favored cover-set over branches.

use std::{
    fs,
    path::{Path, PathBuf},
};

use derive_more::Display;
use indexmap::{IndexMap, IndexSet};
use libafl_bolts::rands::{Rand, StdRand};
use serde::Serialize;

use crate::{
    choices::InputRecord,
    coverage::novelty::CoverageSignature,
    error::{GuidanceError, IoContext},
};

#[derive(
    Debug, Display, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize,
)]
#[display("id_{_0:06}")]
pub struct InputId(pub u32);

/// How an input came to be scheduled.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Origin {
    /// Loaded from the seed directory.
    #[display("seed")]
    Seed,
    /// Mutated from a corpus parent.
    #[display("favored")]
    Favored,
    /// Generated from scratch.
    #[display("random")]
    Random,
}

/// An admitted input. Immutable once in the corpus.
#[derive(Debug)]
pub struct SavedInput {
    pub id: InputId,
    pub parent: Option<InputId>,
    pub origin: Origin,
    pub record: InputRecord,
    pub signature: CoverageSignature,
    pub exec_time_ns: u64,
    /// Total branch events of the admitting run. Deterministic for a
    /// deterministic target, unlike wall-clock time, so it is what the
    /// favored-set tie-break uses.
    pub exec_cost: u64,
}

impl SavedInput {
    pub fn size(&self) -> usize {
        self.record.len()
    }

    /// Lexicographic (size, cost) key: smaller is a better favorite.
    fn favor_key(&self) -> (usize, u64) {
        (self.size(), self.exec_cost)
    }
}

/// Append-only in-memory corpus with an on-disk mirror under
/// `corpus/id_NNNNNN` (a `.structure`/`.value` pair for split inputs).
#[derive(Debug)]
pub struct Corpus {
    inputs: Vec<SavedInput>,
    dir: PathBuf,
}

impl Corpus {
    pub fn new(dir: &Path) -> Result<Self, GuidanceError> {
        fs::create_dir_all(dir)
            .io_context(format!("creating corpus directory {}", dir.display()))?;
        Ok(Self {
            inputs: Vec::new(),
            dir: dir.to_owned(),
        })
    }

    /// Admits an input, assigning the next id and mirroring it to disk.
    pub fn admit(
        &mut self,
        record: InputRecord,
        parent: Option<InputId>,
        origin: Origin,
        signature: CoverageSignature,
        exec_time_ns: u64,
        exec_cost: u64,
    ) -> Result<&SavedInput, GuidanceError> {
        let id = InputId(self.inputs.len() as u32);
        write_record(&self.dir, &id.to_string(), &record)?;
        self.inputs.push(SavedInput {
            id,
            parent,
            origin,
            record,
            signature,
            exec_time_ns,
            exec_cost,
        });
        Ok(&self.inputs[self.inputs.len() - 1])
    }

    pub fn get(&self, id: InputId) -> Option<&SavedInput> {
        self.inputs.get(id.0 as usize)
    }

    pub fn len(&self) -> usize {
        self.inputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SavedInput> {
        self.inputs.iter()
    }

    /// Draws the next parent: from the favored set with probability
    /// `1 − p_random`, uniformly from the whole corpus otherwise.
    pub fn select_parent(
        &self,
        favorites: &FavoritesMap,
        rng: &mut StdRand,
        p_random: f64,
    ) -> Option<InputId> {
        if self.inputs.is_empty() {
            return None;
        }
        let favored = favorites.favored_ids();
        if favored.is_empty() || rng.coinflip(p_random) {
            let index = rng.below_or_zero(self.inputs.len());
            Some(self.inputs[index].id)
        } else {
            rng.choose(favored.iter()).copied()
        }
    }
}

/// Writes an input record under `dir/<stem>` (linear) or
/// `dir/<stem>.structure` + `dir/<stem>.value` (split).
pub(crate) fn write_record(
    dir: &Path,
    stem: &str,
    record: &InputRecord,
) -> Result<(), GuidanceError> {
    match record {
        InputRecord::Linear { bytes } => {
            let path = dir.join(stem);
            fs::write(&path, bytes).io_context(format!("writing input {}", path.display()))?;
        }
        InputRecord::Split(split) => {
            for (extension, bytes) in [("structure", &split.structure), ("value", &split.value)] {
                let path = dir.join(format!("{stem}.{extension}"));
                fs::write(&path, bytes)
                    .io_context(format!("writing input {}", path.display()))?;
            }
        }
    }
    Ok(())
}

/// Branch → favored input: the smallest-cheapest admitted input covering
/// each branch. Insertion-ordered so iteration is deterministic under a
/// fixed seed.
#[derive(Debug, Default)]
pub struct FavoritesMap {
    by_branch: IndexMap<u32, InputId>,
}

impl FavoritesMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Offers a freshly admitted input as favorite for every branch it
    /// covers. Incumbents are replaced only on strict (size, cost)
    /// dominance. Returns how many branches the input now fronts.
    pub fn offer(&mut self, candidate: &SavedInput, corpus: &Corpus) -> usize {
        let mut won = 0;
        for (slot, _) in candidate.signature.iter() {
            let entry = self.by_branch.entry(slot).or_insert(candidate.id);
            if *entry == candidate.id {
                won += 1;
                continue;
            }
            let dominated = corpus
                .get(*entry)
                .is_none_or(|incumbent| candidate.favor_key() < incumbent.favor_key());
            if dominated {
                *entry = candidate.id;
                won += 1;
            }
        }
        won
    }

    pub fn favorite(&self, slot: u32) -> Option<InputId> {
        self.by_branch.get(&slot).copied()
    }

    pub fn covered_branches(&self) -> usize {
        self.by_branch.len()
    }

    /// Distinct favored inputs, in branch-insertion order.
    pub fn favored_ids(&self) -> IndexSet<InputId> {
        self.by_branch.values().copied().collect()
    }
}
