//! ICD-10-CM -> HCC mapper.
//!
//! Reads the same CMS mappings CSV the HCC loader synthesizes categories
//! from. Each row with a V28 category becomes one mapping from the
//! decimal-formatted ICD-10 code to its `HCC<n>` record.

use tracing::info;

use crate::cancel::CancellationToken;
use crate::config::DataPaths;
use crate::conflict::ConflictTracker;
use crate::error::{CodemapError, Result};
use crate::loaders::{find_hcc_csv, parse_hcc_csv};
use crate::models::{
    format_icd10_code, ConflictReason, MappingKind, MappingRecord, NewConflict, Vocabulary,
};
use crate::store::CodeStore;

use super::{Mapper, MappingBatch};

pub struct Icd10HccMapper;

impl Mapper for Icd10HccMapper {
    fn kind(&self) -> MappingKind {
        MappingKind::Icd10Hcc
    }

    fn build(
        &self,
        store: &CodeStore,
        paths: &DataPaths,
        cancel: &CancellationToken,
    ) -> Result<usize> {
        let csv = find_hcc_csv(paths).ok_or_else(|| CodemapError::Io {
            message: "No HCC mappings CSV found".into(),
            path: Some(paths.vocab_dir(Vocabulary::Hcc)),
            source: None,
        })?;
        info!(path = %csv.display(), "Building ICD-10-CM -> HCC mappings");

        let icd10_codes = store.code_set(Vocabulary::Icd10)?;
        let hcc_codes = store.code_set(Vocabulary::Hcc)?;

        let mut batch = MappingBatch::new(store, MappingKind::Icd10Hcc, cancel);
        let mut tracker = ConflictTracker::new(store);
        for (raw_code, description, hcc_number) in parse_hcc_csv(&csv)? {
            let icd10_code = format_icd10_code(&raw_code);
            let hcc_code = format!("HCC{}", hcc_number);

            if !icd10_codes.contains(&icd10_code) {
                tracker.track(NewConflict {
                    source_system: Vocabulary::Icd10,
                    target_system: Vocabulary::Hcc,
                    source_code: icd10_code,
                    target_code: hcc_code,
                    source_description: Some(description),
                    reason: ConflictReason::SourceNotFound,
                    details: Some("ICD-10-CM code not in loaded vocabulary".into()),
                })?;
                continue;
            }
            if !hcc_codes.contains(&hcc_code) {
                tracker.track(NewConflict {
                    source_system: Vocabulary::Icd10,
                    target_system: Vocabulary::Hcc,
                    source_code: icd10_code,
                    target_code: hcc_code.clone(),
                    source_description: Some(description),
                    reason: ConflictReason::TargetNotFound,
                    details: Some(format!("HCC category '{}' not in loaded vocabulary", hcc_code)),
                })?;
                continue;
            }

            batch.push(MappingRecord {
                source_code: icd10_code,
                target_code: hcc_code,
                via_code: None,
                map_rule: None,
                map_priority: None,
                map_advice: Some("CMS-HCC model V28".into()),
            })?;
        }

        let conflicts = tracker.finish()?;
        let inserted = batch.finish()?;
        info!(inserted, conflicts, "ICD-10-CM -> HCC mapping complete");
        Ok(inserted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CodeRecord, ConflictStatus};
    use tempfile::TempDir;

    fn stage_csv(paths: &DataPaths, body: &str) {
        let dir = paths.vocab_dir(Vocabulary::Hcc);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("hcc_mappings.csv"), body).unwrap();
    }

    #[test]
    fn test_builds_mappings_and_conflicts() {
        let tmp = TempDir::new().unwrap();
        let paths = DataPaths::new(tmp.path());
        stage_csv(
            &paths,
            "Diagnosis Code,Description,,,,,CMS-HCC Model Category V28\n\
             E119,Type 2 diabetes w/o complications,,,,,38\n\
             E1165,Type 2 diabetes with hyperglycemia,,,,,37\n",
        );

        let store = CodeStore::open_in_memory().unwrap();
        store
            .insert_codes(
                Vocabulary::Icd10,
                &[CodeRecord::new("E11.9", "Type 2 diabetes mellitus without complications")],
            )
            .unwrap();
        store
            .insert_codes(Vocabulary::Hcc, &[CodeRecord::new("HCC38", "HCC Category 38")])
            .unwrap();

        let inserted = Icd10HccMapper
            .build(&store, &paths, &CancellationToken::new())
            .unwrap();
        assert_eq!(inserted, 1);

        let mapping = store
            .get_mapping(MappingKind::Icd10Hcc, "E11.9", "HCC38")
            .unwrap()
            .unwrap();
        assert_eq!(mapping.map_advice.as_deref(), Some("CMS-HCC model V28"));

        // E11.65 is absent from the ICD-10 vocabulary.
        let conflicts = store.open_conflicts(None).unwrap();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].source_code, "E11.65");
        assert_eq!(conflicts[0].reason, ConflictReason::SourceNotFound);
        assert_eq!(store.conflict_count(ConflictStatus::Open).unwrap(), 1);
    }
}
