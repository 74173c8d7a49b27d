//! SNOMED -> ICD-10-CM mapper.
//!
//! Reads the ICD-10-CM ExtendedMap refset (refset id 6011000124106) from
//! the SNOMED release zip. Active rows with a non-empty map target become
//! mapping rows carrying the refset's rule, priority, and advice; rows
//! whose endpoints are missing from the loaded vocabularies go to the
//! conflict tracker instead.

use std::fs;
use std::io::{BufRead, BufReader};

use tracing::info;

use crate::cancel::CancellationToken;
use crate::config::DataPaths;
use crate::conflict::ConflictTracker;
use crate::error::{CodemapError, Result};
use crate::files::{find_zip, find_zip_entry};
use crate::models::{
    format_icd10_code, ConflictReason, MappingKind, MappingRecord, NewConflict, Vocabulary,
};
use crate::store::CodeStore;

use super::{Mapper, MappingBatch};

const ICD10_MAP_REFSET: &str = "6011000124106";

// ExtendedMap refset columns.
const COL_ACTIVE: usize = 2;
const COL_REFSET: usize = 4;
const COL_REFERENCED: usize = 5;
const COL_PRIORITY: usize = 7;
const COL_RULE: usize = 8;
const COL_ADVICE: usize = 9;
const COL_TARGET: usize = 10;

pub struct SnomedIcd10Mapper;

impl Mapper for SnomedIcd10Mapper {
    fn kind(&self) -> MappingKind {
        MappingKind::SnomedIcd10
    }

    fn build(
        &self,
        store: &CodeStore,
        paths: &DataPaths,
        cancel: &CancellationToken,
    ) -> Result<usize> {
        let dir = paths.vocab_dir(Vocabulary::Snomed);
        let zip_path = find_zip(&dir, "SnomedCT").ok_or_else(|| CodemapError::Io {
            message: "No SnomedCT release zip found".into(),
            path: Some(dir.clone()),
            source: None,
        })?;
        let mut archive = zip::ZipArchive::new(
            fs::File::open(&zip_path).map_err(|e| CodemapError::io_with_path(e, zip_path.clone()))?,
        )?;
        let entry_name = find_zip_entry(&archive, &["Snapshot", "ExtendedMap"])
            .ok_or_else(|| CodemapError::parse("No ExtendedMap refset in archive", zip_path.clone()))?;
        info!(entry = %entry_name, "Building SNOMED -> ICD-10-CM mappings");

        let snomed_codes = store.code_set(Vocabulary::Snomed)?;
        let icd10_codes = store.code_set(Vocabulary::Icd10)?;

        let mut batch = MappingBatch::new(store, MappingKind::SnomedIcd10, cancel);
        let mut tracker = ConflictTracker::new(store);
        let entry = archive.by_name(&entry_name)?;
        for line in BufReader::new(entry).lines().skip(1) {
            let line = line?;
            let parts: Vec<&str> = line.split('\t').collect();
            if parts.len() <= COL_TARGET
                || parts[COL_ACTIVE] != "1"
                || parts[COL_REFSET] != ICD10_MAP_REFSET
            {
                continue;
            }
            let snomed_code = parts[COL_REFERENCED];
            let raw_target = parts[COL_TARGET].trim();
            if raw_target.is_empty() || raw_target == "?" {
                continue;
            }
            let icd10_code = format_icd10_code(raw_target);

            if !snomed_codes.contains(snomed_code) {
                tracker.track(NewConflict {
                    source_system: Vocabulary::Snomed,
                    target_system: Vocabulary::Icd10,
                    source_code: snomed_code.to_string(),
                    target_code: icd10_code,
                    source_description: None,
                    reason: ConflictReason::SourceNotFound,
                    details: Some("SNOMED concept not in loaded vocabulary".into()),
                })?;
                continue;
            }
            if !icd10_codes.contains(&icd10_code) {
                let description = store
                    .get_code(Vocabulary::Snomed, snomed_code)?
                    .map(|r| r.description);
                tracker.track(NewConflict {
                    source_system: Vocabulary::Snomed,
                    target_system: Vocabulary::Icd10,
                    source_code: snomed_code.to_string(),
                    target_code: icd10_code.clone(),
                    source_description: description,
                    reason: ConflictReason::TargetNotFound,
                    details: Some(format!("ICD-10-CM code '{}' not in loaded vocabulary", icd10_code)),
                })?;
                continue;
            }

            batch.push(MappingRecord {
                source_code: snomed_code.to_string(),
                target_code: icd10_code,
                via_code: None,
                map_rule: non_empty(parts[COL_RULE]),
                map_priority: parts[COL_PRIORITY].parse().ok(),
                map_advice: non_empty(parts[COL_ADVICE]),
            })?;
        }

        let conflicts = tracker.finish()?;
        let inserted = batch.finish()?;
        info!(inserted, conflicts, "SNOMED -> ICD-10-CM mapping complete");
        Ok(inserted)
    }
}

fn non_empty(s: &str) -> Option<String> {
    let s = s.trim();
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}
