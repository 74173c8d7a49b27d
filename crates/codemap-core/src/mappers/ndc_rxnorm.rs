//! NDC -> RxNorm mapper.
//!
//! Built from the `ndc_codes` extra attribute the RxNorm loader attaches
//! to each concept: every listed NDC maps to its owning RXCUI. An NDC not
//! present in the FDA product file is a source-not-found conflict.

use tracing::info;

use crate::cancel::CancellationToken;
use crate::config::DataPaths;
use crate::conflict::ConflictTracker;
use crate::error::Result;
use crate::models::{ConflictReason, MappingKind, MappingRecord, NewConflict, Vocabulary};
use crate::store::CodeStore;

use super::{Mapper, MappingBatch};

pub struct NdcRxNormMapper;

impl Mapper for NdcRxNormMapper {
    fn kind(&self) -> MappingKind {
        MappingKind::NdcRxNorm
    }

    fn build(
        &self,
        store: &CodeStore,
        _paths: &DataPaths,
        cancel: &CancellationToken,
    ) -> Result<usize> {
        info!("Building NDC -> RxNorm mappings");
        let ndc_codes = store.code_set(Vocabulary::Ndc)?;

        let mut batch = MappingBatch::new(store, MappingKind::NdcRxNorm, cancel);
        let mut tracker = ConflictTracker::new(store);
        for record in store.codes(Vocabulary::RxNorm)? {
            if !record.active {
                continue;
            }
            let Some(list) = record
                .extra
                .as_ref()
                .and_then(|e| e.get("ndc_codes"))
                .and_then(|v| v.as_str())
            else {
                continue;
            };
            for ndc in list.split('|').filter(|s| !s.is_empty()) {
                if !ndc_codes.contains(ndc) {
                    tracker.track(NewConflict {
                        source_system: Vocabulary::Ndc,
                        target_system: Vocabulary::RxNorm,
                        source_code: ndc.to_string(),
                        target_code: record.code.clone(),
                        source_description: None,
                        reason: ConflictReason::SourceNotFound,
                        details: Some("NDC not in loaded product file".into()),
                    })?;
                    continue;
                }
                batch.push(MappingRecord::new(ndc, record.code.clone()))?;
            }
        }

        let conflicts = tracker.finish()?;
        let inserted = batch.finish()?;
        info!(inserted, conflicts, "NDC -> RxNorm mapping complete");
        Ok(inserted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CodeRecord, ConflictStatus};
    use crate::config::DataPaths;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_maps_embedded_ndc_lists() {
        let store = CodeStore::open_in_memory().unwrap();
        store
            .insert_codes(
                Vocabulary::RxNorm,
                &[
                    CodeRecord::new("1049221", "acetaminophen 325 MG Oral Tablet")
                        .with_extra(json!({"ndc_codes": "00904672061|00904672062"})),
                    CodeRecord::new("161", "Acetaminophen"),
                ],
            )
            .unwrap();
        store
            .insert_codes(Vocabulary::Ndc, &[CodeRecord::new("00904672061", "Tylenol")])
            .unwrap();

        let tmp = TempDir::new().unwrap();
        let inserted = NdcRxNormMapper
            .build(&store, &DataPaths::new(tmp.path()), &CancellationToken::new())
            .unwrap();
        assert_eq!(inserted, 1);
        assert!(store
            .get_mapping(MappingKind::NdcRxNorm, "00904672061", "1049221")
            .unwrap()
            .is_some());

        // Second NDC is not in the product file: conflict, no mapping.
        assert_eq!(store.conflict_count(ConflictStatus::Open).unwrap(), 1);
        let conflict = &store.open_conflicts(None).unwrap()[0];
        assert_eq!(conflict.source_code, "00904672062");
        assert_eq!(conflict.reason, ConflictReason::SourceNotFound);
    }
}
