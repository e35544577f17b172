//! Failure classification and at-most-one-savefile-per-kind dedup.

use std::{
    fmt,
    hash::Hasher,
    time::Duration,
};

use ahash::AHasher;
use indexmap::IndexMap;
use serde::Serialize;

use crate::corpus::InputId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FailureKind {
    Panic,
    Timeout,
}

/// Where a panic unwound from, as captured by the panic hook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PanicSite {
    pub file: String,
    pub line: u32,
}

impl fmt::Display for PanicSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}

/// One unexpected target failure, as reported by the harness.
#[derive(Debug, Clone)]
pub struct TrialFailure {
    pub kind: FailureKind,
    pub message: String,
    pub site: Option<PanicSite>,
    /// Innermost instrumented call frame at the time of failure.
    pub call_frame: Option<u32>,
}

impl TrialFailure {
    pub fn timeout(elapsed: Duration, limit: Duration) -> Self {
        Self {
            kind: FailureKind::Timeout,
            message: format!(
                "trial ran {}ms, over the {}ms limit",
                elapsed.as_millis(),
                limit.as_millis()
            ),
            site: None,
            call_frame: None,
        }
    }

    /// Deduplication key: failure kind plus the failing site. The
    /// message is deliberately excluded; it often embeds input values
    /// and would split one bug into many files.
    pub fn fingerprint(&self) -> FailureFingerprint {
        let mut hasher = AHasher::default();
        hasher.write_u8(match self.kind {
            FailureKind::Panic => 0,
            FailureKind::Timeout => 1,
        });
        if let Some(site) = &self.site {
            hasher.write(site.file.as_bytes());
            hasher.write_u32(site.line);
        }
        FailureFingerprint(hasher.finish())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct FailureFingerprint(u64);

/// Grows monotonically; the first input per fingerprint wins the file.
#[derive(Debug, Default)]
pub struct FailureRegistry {
    seen: IndexMap<FailureFingerprint, InputId>,
}

impl FailureRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the savefile id for a first-seen fingerprint, `None` for
    /// a repeat.
    pub fn record(&mut self, fingerprint: FailureFingerprint) -> Option<InputId> {
        if self.seen.contains_key(&fingerprint) {
            return None;
        }
        let id = InputId(self.seen.len() as u32);
        self.seen.insert(fingerprint, id);
        Some(id)
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}
