//! Decides what runs next: drain user seeds once, then interleave
//! mutation of selected parents with occasional from-scratch inputs.

use std::{
    collections::VecDeque,
    fs, io,
    path::{Path, PathBuf},
};

use libafl_bolts::rands::{Rand, StdRand};
use tracing::{debug, warn};

use crate::{
    choices::{InputRecord, SplitRecord},
    config::FuzzConfig,
    corpus::{Corpus, FavoritesMap, InputId, Origin},
    error::{GuidanceError, IoContext},
    mutation,
};

/// Bytes given to a from-scratch input when stream extension is off and
/// the generator cannot grow the stream itself.
const FIXED_RANDOM_SIZE: usize = 64;

/// One scheduled trial, ready to back a choice stream.
#[derive(Debug, Clone)]
pub struct PlannedInput {
    pub record: InputRecord,
    pub parent: Option<InputId>,
    pub origin: Origin,
}

#[derive(Debug)]
pub struct Scheduler {
    seeds: VecDeque<PathBuf>,
    pending: VecDeque<PlannedInput>,
    scheduled: u64,
    split: bool,
    fixed_size: bool,
    blind: bool,
    p_random: f64,
    structure_weight: f64,
}

impl Scheduler {
    pub fn new(config: &FuzzConfig) -> Result<Self, GuidanceError> {
        let split = config.engine.is_split();
        let seeds = match &config.seeds_dir {
            Some(dir) => scan_seeds(dir, split)?,
            None => VecDeque::new(),
        };
        if !seeds.is_empty() {
            debug!(count = seeds.len(), "seed files queued");
        }
        Ok(Self {
            seeds,
            pending: VecDeque::new(),
            scheduled: 0,
            split,
            fixed_size: config.fixed_size,
            blind: config.blind,
            p_random: config.p_random_parent,
            structure_weight: config.structure_weight,
        })
    }

    pub fn in_seeding_phase(&self) -> bool {
        !self.seeds.is_empty()
    }

    /// Plans the next trial. `prefer_value_only` freezes split structure
    /// while mutating, to probe the current skeleton for value novelty.
    pub fn next(
        &mut self,
        corpus: &Corpus,
        favorites: &FavoritesMap,
        rng: &mut StdRand,
        prefer_value_only: bool,
    ) -> Result<PlannedInput, GuidanceError> {
        let planned = self.plan(corpus, favorites, rng, prefer_value_only)?;
        self.scheduled += 1;
        Ok(planned)
    }

    fn plan(
        &mut self,
        corpus: &Corpus,
        favorites: &FavoritesMap,
        rng: &mut StdRand,
        prefer_value_only: bool,
    ) -> Result<PlannedInput, GuidanceError> {
        if let Some(path) = self.seeds.pop_front() {
            let record = load_seed_record(&path, self.split)?;
            debug!(path = %path.display(), "replaying seed");
            return Ok(PlannedInput {
                record,
                parent: None,
                origin: Origin::Seed,
            });
        }

        if self.blind || corpus.is_empty() {
            return Ok(self.random_input(rng));
        }
        // The from-scratch cadence stretches as the corpus grows.
        let cadence = 10 + corpus.len() as u64;
        if self.scheduled % cadence == 0 {
            return Ok(self.random_input(rng));
        }

        if let Some(planned) = self.pending.pop_front() {
            return Ok(planned);
        }
        self.refill_children(corpus, favorites, rng, prefer_value_only);
        match self.pending.pop_front() {
            Some(planned) => Ok(planned),
            None => Ok(self.random_input(rng)),
        }
    }

    fn refill_children(
        &mut self,
        corpus: &Corpus,
        favorites: &FavoritesMap,
        rng: &mut StdRand,
        prefer_value_only: bool,
    ) {
        let Some(parent_id) = corpus.select_parent(favorites, rng, self.p_random) else {
            return;
        };
        let Some(parent) = corpus.get(parent_id) else {
            return;
        };
        let weight = if prefer_value_only {
            0.0
        } else {
            self.structure_weight
        };
        for _ in 0..mutation::children_budget(parent.size()) {
            let record = match &parent.record {
                InputRecord::Linear { bytes } => InputRecord::Linear {
                    bytes: mutation::mutate_linear(rng, bytes),
                },
                InputRecord::Split(split) => {
                    InputRecord::Split(mutation::mutate_split(rng, split, weight))
                }
            };
            self.pending.push_back(PlannedInput {
                record,
                parent: Some(parent_id),
                origin: Origin::Favored,
            });
        }
    }

    fn random_input(&mut self, rng: &mut StdRand) -> PlannedInput {
        let mut random_bytes = |n: usize| (0..n).map(|_| rng.next() as u8).collect::<Vec<u8>>();
        // With extension enabled an empty record suffices: the stream
        // grows as the generator reads.
        let prefill = if self.fixed_size { FIXED_RANDOM_SIZE } else { 0 };
        let record = if self.split {
            InputRecord::Split(SplitRecord {
                structure: random_bytes(prefill),
                value: random_bytes(prefill),
                log: Vec::new(),
            })
        } else {
            InputRecord::Linear {
                bytes: random_bytes(prefill),
            }
        };
        PlannedInput {
            record,
            parent: None,
            origin: Origin::Random,
        }
    }
}

/// Collects seed files in name order. For split engines, a
/// `.structure`/`.value` pair is scheduled once via its `.structure`
/// half; a half with no sibling is skipped, not a fatal error.
fn scan_seeds(dir: &Path, split: bool) -> Result<VecDeque<PathBuf>, GuidanceError> {
    let context = || format!("scanning seed directory {}", dir.display());
    let mut paths = Vec::new();
    for entry in fs::read_dir(dir).io_context(context())? {
        let path = entry.io_context(context())?.path();
        if path.is_file() {
            paths.push(path);
        }
    }
    paths.sort();
    if split {
        paths.retain(|path| match path.extension().and_then(|e| e.to_str()) {
            Some("structure") => {
                let complete = path.with_extension("value").is_file();
                if !complete {
                    warn!(path = %path.display(), "skipping split seed with no .value sibling");
                }
                complete
            }
            Some("value") => {
                // Complete pairs are loaded through their .structure half.
                if !path.with_extension("structure").is_file() {
                    warn!(path = %path.display(), "skipping split seed with no .structure sibling");
                }
                false
            }
            _ => true,
        });
    }
    Ok(paths.into())
}

/// Reads one seed file into an input record.
///
/// Linear engines take the raw bytes. Split engines accept a
/// `.structure`/`.value` pair (either half may be named) or a single
/// file carrying a 4-byte big-endian structural length prefix.
pub fn load_seed_record(path: &Path, split: bool) -> Result<InputRecord, GuidanceError> {
    let read = |path: &Path| {
        fs::read(path).io_context(format!("reading seed {}", path.display()))
    };
    if !split {
        return Ok(InputRecord::Linear { bytes: read(path)? });
    }

    let extension = path.extension().and_then(|e| e.to_str());
    let (structure, value) = match extension {
        Some("structure") => (read(path)?, read(&path.with_extension("value"))?),
        Some("value") => (read(&path.with_extension("structure"))?, read(path)?),
        _ => {
            let bytes = read(path)?;
            let malformed = |detail: &str| {
                GuidanceError::io(
                    format!("reading seed {}", path.display()),
                    io::Error::new(io::ErrorKind::InvalidData, detail.to_owned()),
                )
            };
            if bytes.len() < 4 {
                return Err(malformed("missing structural length prefix"));
            }
            let (prefix, rest) = bytes.split_at(4);
            let structure_len = u32::from_be_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]) as usize;
            if structure_len > rest.len() {
                return Err(malformed("structural length prefix exceeds file size"));
            }
            let (structure, value) = rest.split_at(structure_len);
            (structure.to_vec(), value.to_vec())
        }
    };
    Ok(InputRecord::Split(SplitRecord {
        structure,
        value,
        log: Vec::new(),
    }))
}
