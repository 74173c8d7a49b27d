//! RxNorm -> SNOMED mapper.
//!
//! The crosswalk lives inside RXNCONSO.RRF itself: rows with
//! `SAB=SNOMEDCT_US` tie an RXCUI to the SNOMED concept id in the SCUI
//! column.

use tracing::info;

use crate::cancel::CancellationToken;
use crate::config::DataPaths;
use crate::conflict::ConflictTracker;
use crate::error::{CodemapError, Result};
use crate::loaders::{for_each_rrf_line, COL_RXCUI, COL_SAB, COL_SCUI, COL_SUPPRESS};
use crate::models::{ConflictReason, MappingKind, MappingRecord, NewConflict, Vocabulary};
use crate::store::CodeStore;

use super::{Mapper, MappingBatch};

pub struct RxNormSnomedMapper;

impl Mapper for RxNormSnomedMapper {
    fn kind(&self) -> MappingKind {
        MappingKind::RxNormSnomed
    }

    fn build(
        &self,
        store: &CodeStore,
        paths: &DataPaths,
        cancel: &CancellationToken,
    ) -> Result<usize> {
        let dir = paths.vocab_dir(Vocabulary::RxNorm);
        info!("Building RxNorm -> SNOMED mappings");

        let rxnorm_codes = store.code_set(Vocabulary::RxNorm)?;
        let snomed_codes = store.code_set(Vocabulary::Snomed)?;

        let mut batch = MappingBatch::new(store, MappingKind::RxNormSnomed, cancel);
        let mut tracker = ConflictTracker::new(store);
        let found = for_each_rrf_line(&dir, "RXNCONSO.RRF", |line| {
            let parts: Vec<&str> = line.split('|').collect();
            if parts.len() <= COL_SUPPRESS || parts[COL_SAB] != "SNOMEDCT_US" {
                return Ok(());
            }
            let rxcui = parts[COL_RXCUI];
            let scui = parts[COL_SCUI].trim();
            if scui.is_empty() {
                return Ok(());
            }
            if batch.contains(rxcui, scui) {
                return Ok(());
            }

            if !rxnorm_codes.contains(rxcui) {
                tracker.track(NewConflict {
                    source_system: Vocabulary::RxNorm,
                    target_system: Vocabulary::Snomed,
                    source_code: rxcui.to_string(),
                    target_code: scui.to_string(),
                    source_description: None,
                    reason: ConflictReason::SourceNotFound,
                    details: Some("RXCUI not in loaded vocabulary".into()),
                })?;
                return Ok(());
            }
            if !snomed_codes.contains(scui) {
                let description = store
                    .get_code(Vocabulary::RxNorm, rxcui)?
                    .map(|r| r.description);
                tracker.track(NewConflict {
                    source_system: Vocabulary::RxNorm,
                    target_system: Vocabulary::Snomed,
                    source_code: rxcui.to_string(),
                    target_code: scui.to_string(),
                    source_description: description,
                    reason: ConflictReason::TargetNotFound,
                    details: Some(format!("SNOMED concept '{}' not in loaded vocabulary", scui)),
                })?;
                return Ok(());
            }

            batch.push(MappingRecord::new(rxcui, scui))
        })?;
        if !found {
            return Err(CodemapError::Io {
                message: "No RXNCONSO.RRF (extracted or zipped) found".into(),
                path: Some(dir),
                source: None,
            });
        }

        let conflicts = tracker.finish()?;
        let inserted = batch.finish()?;
        info!(inserted, conflicts, "RxNorm -> SNOMED mapping complete");
        Ok(inserted)
    }
}
