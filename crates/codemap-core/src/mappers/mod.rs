//! Cross-vocabulary mappers.
//!
//! Direct mappers read a source-provided crosswalk, resolve both endpoints
//! against the loaded code sets, and either insert a mapping row or track a
//! conflict — never both for the same pair. The derived mapper composes two
//! direct mapping tables and raises no conflicts of its own.

mod icd10_hcc;
mod ndc_rxnorm;
mod rxnorm_snomed;
mod snomed_hcc;
mod snomed_icd10;

pub use icd10_hcc::Icd10HccMapper;
pub use ndc_rxnorm::NdcRxNormMapper;
pub use rxnorm_snomed::RxNormSnomedMapper;
pub use snomed_hcc::SnomedHccMapper;
pub use snomed_icd10::SnomedIcd10Mapper;

use std::collections::HashSet;

use tracing::debug;

use crate::cancel::CancellationToken;
use crate::config::{BatchConfig, DataPaths};
use crate::error::Result;
use crate::models::{MappingKind, MappingRecord};
use crate::store::CodeStore;

/// A mapping builder for one vocabulary pair.
pub trait Mapper {
    fn kind(&self) -> MappingKind;

    /// Selection key for `--only` / `--skip`.
    fn key(&self) -> &'static str {
        self.kind().key()
    }

    /// Build the mapping table. Returns the number of rows actually
    /// inserted.
    fn build(
        &self,
        store: &CodeStore,
        paths: &DataPaths,
        cancel: &CancellationToken,
    ) -> Result<usize>;
}

/// Direct mappers in default run order.
pub fn direct_mappers() -> Vec<Box<dyn Mapper>> {
    vec![
        Box::new(SnomedIcd10Mapper),
        Box::new(Icd10HccMapper),
        Box::new(RxNormSnomedMapper),
        Box::new(NdcRxNormMapper),
    ]
}

/// Derived mappers. These run after every direct mapper has completed.
pub fn derived_mappers() -> Vec<Box<dyn Mapper>> {
    vec![Box::new(SnomedHccMapper)]
}

/// Accumulates mapping rows, deduplicates `(source, target)` pairs within
/// the run, and flushes one transaction per batch.
pub(crate) struct MappingBatch<'a> {
    store: &'a CodeStore,
    kind: MappingKind,
    cancel: &'a CancellationToken,
    seen: HashSet<(String, String)>,
    buf: Vec<MappingRecord>,
    pushed: usize,
    inserted: usize,
}

impl<'a> MappingBatch<'a> {
    pub(crate) fn new(
        store: &'a CodeStore,
        kind: MappingKind,
        cancel: &'a CancellationToken,
    ) -> Self {
        Self {
            store,
            kind,
            cancel,
            seen: HashSet::new(),
            buf: Vec::with_capacity(BatchConfig::INSERT_BATCH),
            pushed: 0,
            inserted: 0,
        }
    }

    /// True if the pair was already pushed this run.
    pub(crate) fn contains(&self, source_code: &str, target_code: &str) -> bool {
        self.seen
            .contains(&(source_code.to_string(), target_code.to_string()))
    }

    pub(crate) fn push(&mut self, record: MappingRecord) -> Result<()> {
        let key = (record.source_code.clone(), record.target_code.clone());
        if !self.seen.insert(key) {
            return Ok(());
        }
        self.buf.push(record);
        self.pushed += 1;
        if self.buf.len() >= BatchConfig::INSERT_BATCH {
            self.flush()?;
        }
        if self.pushed % BatchConfig::PROGRESS_INTERVAL == 0 {
            debug!(
                mapping = self.kind.label(),
                pushed = self.pushed,
                "Mapping progress"
            );
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.cancel.check()?;
        self.inserted += self.store.insert_mappings(self.kind, &self.buf)?;
        self.buf.clear();
        Ok(())
    }

    pub(crate) fn finish(mut self) -> Result<usize> {
        if !self.buf.is_empty() {
            self.flush()?;
        }
        Ok(self.inserted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mapping_batch_deduplicates_pairs() {
        let store = CodeStore::open_in_memory().unwrap();
        let cancel = CancellationToken::new();
        let mut batch = MappingBatch::new(&store, MappingKind::SnomedIcd10, &cancel);
        batch.push(MappingRecord::new("44054006", "E11.9")).unwrap();
        batch.push(MappingRecord::new("44054006", "E11.9")).unwrap();
        assert!(batch.contains("44054006", "E11.9"));
        assert_eq!(batch.finish().unwrap(), 1);
    }
}
