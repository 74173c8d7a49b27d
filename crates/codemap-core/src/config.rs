//! Centralized configuration for the codemap pipeline.

use std::path::{Path, PathBuf};

use crate::models::Vocabulary;

/// Batch sizing for bulk store writes.
///
/// One transaction per batch keeps memory bounded and limits the blast
/// radius of a mid-run failure to a single batch.
pub struct BatchConfig;

impl BatchConfig {
    /// Rows per insert transaction for loaders and mappers.
    pub const INSERT_BATCH: usize = 5_000;
    /// Log progress every this many inserted mapping rows.
    pub const PROGRESS_INTERVAL: usize = 20_000;
}

/// Defaults for the conflict resolution engine.
pub struct ResolutionConfig;

impl ResolutionConfig {
    /// Minimum similarity (0.0-1.0) for a fuzzy match to claim a conflict.
    pub const DEFAULT_FUZZY_THRESHOLD: f64 = 0.85;
    /// Conflicts processed between commits.
    pub const DEFAULT_COMMIT_INTERVAL: usize = 1_000;
    /// Candidate cap when the prefix prefilter finds nothing.
    pub const FALLBACK_CANDIDATE_LIMIT: usize = 100;
}

/// Filesystem layout of the staging area: one subdirectory per vocabulary,
/// holding the already-downloaded, extracted source files.
#[derive(Debug, Clone)]
pub struct DataPaths {
    root: PathBuf,
}

impl DataPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Staging subdirectory for one vocabulary's source files.
    pub fn vocab_dir(&self, vocab: Vocabulary) -> PathBuf {
        let sub = match vocab {
            Vocabulary::Icd10 => "icd10cm",
            other => other.key(),
        };
        self.root.join(sub)
    }
}
