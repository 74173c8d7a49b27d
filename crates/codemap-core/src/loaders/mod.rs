//! Vocabulary loaders.
//!
//! One loader per vocabulary. Each locates its source files under the
//! staging tree, parses the source's native format, and bulk-inserts
//! normalized [`CodeRecord`]s with insert-if-absent semantics. Loaders are
//! independent of each other; load order is unconstrained.

mod cpt;
mod hcc;
mod hcpcs;
mod icd10;
mod ndc;
mod rxnorm;
mod snomed;

pub(crate) use hcc::{find_hcc_csv, parse_hcc_csv};
pub(crate) use rxnorm::{for_each_rrf_line, COL_RXCUI, COL_SAB, COL_SCUI, COL_SUPPRESS};

pub use cpt::CptLoader;
pub use hcc::HccLoader;
pub use hcpcs::HcpcsLoader;
pub use icd10::Icd10Loader;
pub use ndc::NdcLoader;
pub use rxnorm::RxNormLoader;
pub use snomed::SnomedLoader;

use tracing::debug;

use crate::cancel::CancellationToken;
use crate::config::{BatchConfig, DataPaths};
use crate::error::Result;
use crate::models::{CodeRecord, Vocabulary};
use crate::store::CodeStore;

/// A vocabulary loader.
pub trait Loader {
    fn vocabulary(&self) -> Vocabulary;

    /// Selection key for `--only` / `--skip`.
    fn key(&self) -> &'static str {
        self.vocabulary().key()
    }

    /// Parse the source files and insert code records.
    /// Returns the number of rows actually inserted.
    fn load(
        &self,
        store: &CodeStore,
        paths: &DataPaths,
        cancel: &CancellationToken,
    ) -> Result<usize>;
}

/// All loaders in default run order. HCPCS precedes CPT so the CPT loader's
/// DHS category enrichment finds the HCPCS rows it tags.
pub fn all_loaders() -> Vec<Box<dyn Loader>> {
    vec![
        Box::new(SnomedLoader),
        Box::new(Icd10Loader),
        Box::new(HccLoader),
        Box::new(HcpcsLoader),
        Box::new(CptLoader),
        Box::new(RxNormLoader),
        Box::new(NdcLoader),
    ]
}

/// Accumulates code records and flushes them to the store one transaction
/// per batch. Cancellation is honored at flush boundaries, so an
/// interrupted run never loses a committed batch.
pub(crate) struct CodeBatch<'a> {
    store: &'a CodeStore,
    vocab: Vocabulary,
    cancel: &'a CancellationToken,
    buf: Vec<CodeRecord>,
    pushed: usize,
    inserted: usize,
}

impl<'a> CodeBatch<'a> {
    pub(crate) fn new(
        store: &'a CodeStore,
        vocab: Vocabulary,
        cancel: &'a CancellationToken,
    ) -> Self {
        Self {
            store,
            vocab,
            cancel,
            buf: Vec::with_capacity(BatchConfig::INSERT_BATCH),
            pushed: 0,
            inserted: 0,
        }
    }

    pub(crate) fn push(&mut self, record: CodeRecord) -> Result<()> {
        self.buf.push(record);
        self.pushed += 1;
        if self.buf.len() >= BatchConfig::INSERT_BATCH {
            self.flush()?;
        }
        if self.pushed % BatchConfig::PROGRESS_INTERVAL == 0 {
            debug!(
                vocabulary = self.vocab.label(),
                processed = self.pushed,
                "Loading progress"
            );
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.cancel.check()?;
        self.inserted += self.store.insert_codes(self.vocab, &self.buf)?;
        self.buf.clear();
        Ok(())
    }

    /// Flush the final partial batch and return the total inserted count.
    pub(crate) fn finish(mut self) -> Result<usize> {
        if !self.buf.is_empty() {
            self.flush()?;
        }
        Ok(self.inserted)
    }
}
