//! Derived SNOMED -> HCC mapper.
//!
//! Composes the SNOMED->ICD-10 and ICD-10->HCC tables. Each reachable
//! (SNOMED, HCC) pair gets one row with `via_code` naming the ICD-10 code
//! the hop went through. When several intermediates reach the same pair,
//! the first one seen in SNOMED->ICD-10 iteration order wins. No conflicts
//! are raised here: a missing code was already caught at the direct stage.

use std::collections::HashMap;

use tracing::info;

use crate::cancel::CancellationToken;
use crate::config::DataPaths;
use crate::error::Result;
use crate::models::{MappingKind, MappingRecord};
use crate::store::CodeStore;

use super::{Mapper, MappingBatch};

pub struct SnomedHccMapper;

impl Mapper for SnomedHccMapper {
    fn kind(&self) -> MappingKind {
        MappingKind::SnomedHcc
    }

    fn build(
        &self,
        store: &CodeStore,
        _paths: &DataPaths,
        cancel: &CancellationToken,
    ) -> Result<usize> {
        info!("Deriving SNOMED -> HCC mappings via ICD-10");

        let mut icd10_to_hcc: HashMap<String, Vec<String>> = HashMap::new();
        for (icd10, hcc) in store.mapping_pairs(MappingKind::Icd10Hcc)? {
            icd10_to_hcc.entry(icd10).or_default().push(hcc);
        }

        let mut batch = MappingBatch::new(store, MappingKind::SnomedHcc, cancel);
        for (snomed, icd10) in store.mapping_pairs(MappingKind::SnomedIcd10)? {
            let Some(hccs) = icd10_to_hcc.get(&icd10) else {
                continue;
            };
            for hcc in hccs {
                // MappingBatch keeps the first-seen via_code for each pair.
                batch.push(MappingRecord {
                    source_code: snomed.clone(),
                    target_code: hcc.clone(),
                    via_code: Some(icd10.clone()),
                    map_rule: None,
                    map_priority: None,
                    map_advice: None,
                })?;
            }
        }

        let inserted = batch.finish()?;
        info!(inserted, "SNOMED -> HCC derivation complete");
        Ok(inserted)
    }
}
