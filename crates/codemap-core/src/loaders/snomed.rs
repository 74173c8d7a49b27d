//! SNOMED CT loader.
//!
//! Reads the US-edition release zip directly: the concept snapshot supplies
//! the active concept set, the description snapshot supplies the fully
//! specified name (FSN) and preferred synonym per concept. The semantic tag
//! is the parenthesized suffix of the FSN, e.g. `(disorder)`.

use std::collections::HashMap;
use std::fs;
use std::io::{BufRead, BufReader};

use serde_json::json;
use tracing::info;

use crate::cancel::CancellationToken;
use crate::config::DataPaths;
use crate::error::{CodemapError, Result};
use crate::files::{find_zip, find_zip_entry};
use crate::models::{CodeRecord, Vocabulary};
use crate::store::CodeStore;

use super::{CodeBatch, Loader};

const TYPE_FSN: &str = "900000000000003001";
const TYPE_SYNONYM: &str = "900000000000013009";

pub struct SnomedLoader;

#[derive(Default)]
struct ConceptTerms {
    fsn: Option<String>,
    synonym: Option<String>,
}

impl SnomedLoader {
    /// Strip the trailing semantic tag from an FSN, returning the bare term
    /// and the tag: `"Diabetes mellitus (disorder)"` -> `("Diabetes
    /// mellitus", Some("disorder"))`.
    fn split_fsn(fsn: &str) -> (String, Option<String>) {
        let trimmed = fsn.trim_end();
        if let Some(open) = trimmed.rfind(" (") {
            if trimmed.ends_with(')') {
                let term = trimmed[..open].to_string();
                let tag = trimmed[open + 2..trimmed.len() - 1].to_string();
                return (term, Some(tag));
            }
        }
        (trimmed.to_string(), None)
    }
}

impl Loader for SnomedLoader {
    fn vocabulary(&self) -> Vocabulary {
        Vocabulary::Snomed
    }

    fn load(
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
        info!(path = %zip_path.display(), "Loading SNOMED CT");

        let mut archive = zip::ZipArchive::new(
            fs::File::open(&zip_path).map_err(|e| CodemapError::io_with_path(e, zip_path.clone()))?,
        )?;

        // Pass 1: active concepts.
        // Columns: id, effectiveTime, active, moduleId, definitionStatusId.
        let concept_entry = find_zip_entry(&archive, &["Snapshot", "sct2_Concept_"])
            .ok_or_else(|| CodemapError::parse("No concept snapshot in archive", zip_path.clone()))?;
        let mut concepts: HashMap<String, (String, String)> = HashMap::new();
        {
            let entry = archive.by_name(&concept_entry)?;
            for line in BufReader::new(entry).lines().skip(1) {
                let line = line?;
                let mut parts = line.split('\t');
                let (Some(id), Some(effective), Some(active), Some(module)) =
                    (parts.next(), parts.next(), parts.next(), parts.next())
                else {
                    continue;
                };
                if active == "1" {
                    concepts.insert(id.to_string(), (effective.to_string(), module.to_string()));
                }
            }
        }
        info!(concepts = concepts.len(), "Active SNOMED concepts indexed");

        // Pass 2: descriptions for active concepts.
        // Columns: id, effectiveTime, active, moduleId, conceptId,
        // languageCode, typeId, term, caseSignificanceId.
        let description_entry = find_zip_entry(&archive, &["Snapshot", "sct2_Description_"])
            .ok_or_else(|| CodemapError::parse("No description snapshot in archive", zip_path.clone()))?;
        let mut terms: HashMap<String, ConceptTerms> = HashMap::new();
        {
            let entry = archive.by_name(&description_entry)?;
            for line in BufReader::new(entry).lines().skip(1) {
                let line = line?;
                let parts: Vec<&str> = line.split('\t').collect();
                if parts.len() < 8 || parts[2] != "1" {
                    continue;
                }
                let concept_id = parts[4];
                if !concepts.contains_key(concept_id) {
                    continue;
                }
                let slot = terms.entry(concept_id.to_string()).or_default();
                match parts[6] {
                    TYPE_FSN if slot.fsn.is_none() => slot.fsn = Some(parts[7].to_string()),
                    TYPE_SYNONYM if slot.synonym.is_none() => {
                        slot.synonym = Some(parts[7].to_string())
                    }
                    _ => {}
                }
            }
        }

        let mut batch = CodeBatch::new(store, Vocabulary::Snomed, cancel);
        for (concept_id, (effective_time, module_id)) in &concepts {
            let Some(slot) = terms.get(concept_id) else {
                continue;
            };
            let (fsn_term, semantic_tag) = match &slot.fsn {
                Some(fsn) => Self::split_fsn(fsn),
                None => (String::new(), None),
            };
            let description = slot
                .synonym
                .clone()
                .unwrap_or_else(|| fsn_term.clone());
            if description.is_empty() {
                continue;
            }
            batch.push(
                CodeRecord::new(concept_id.clone(), description).with_extra(json!({
                    "fsn": slot.fsn,
                    "semantic_tag": semantic_tag,
                    "effective_time": effective_time,
                    "module_id": module_id,
                })),
            )?;
        }
        let inserted = batch.finish()?;
        info!(inserted, "SNOMED CT load complete");
        Ok(inserted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_release_zip(paths: &DataPaths) {
        let dir = paths.vocab_dir(Vocabulary::Snomed);
        fs::create_dir_all(&dir).unwrap();
        let file = fs::File::create(dir.join("SnomedCT_USEditionRF2_test.zip")).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        let options = zip::write::SimpleFileOptions::default();

        writer
            .start_file(
                "Snapshot/Terminology/sct2_Concept_Snapshot_US_20250301.txt",
                options,
            )
            .unwrap();
        writer
            .write_all(
                b"id\teffectiveTime\tactive\tmoduleId\tdefinitionStatusId\n\
                  44054006\t20250301\t1\t900000000000207008\t900000000000073002\n\
                  38341003\t20250301\t1\t900000000000207008\t900000000000073002\n\
                  11111111\t20250301\t0\t900000000000207008\t900000000000073002\n",
            )
            .unwrap();

        writer
            .start_file(
                "Snapshot/Terminology/sct2_Description_Snapshot-en_US_20250301.txt",
                options,
            )
            .unwrap();
        writer
            .write_all(
                b"id\teffectiveTime\tactive\tmoduleId\tconceptId\tlanguageCode\ttypeId\tterm\tcaseSignificanceId\n\
                  1\t20250301\t1\t900000000000207008\t44054006\ten\t900000000000003001\tDiabetes mellitus type 2 (disorder)\tx\n\
                  2\t20250301\t1\t900000000000207008\t44054006\ten\t900000000000013009\tType 2 diabetes mellitus\tx\n\
                  3\t20250301\t1\t900000000000207008\t38341003\ten\t900000000000003001\tHypertensive disorder, systemic arterial (disorder)\tx\n\
                  4\t20250301\t1\t900000000000207008\t11111111\ten\t900000000000013009\tInactive concept synonym\tx\n",
            )
            .unwrap();
        writer.finish().unwrap();
    }

    #[test]
    fn test_load_active_concepts_with_terms() {
        let tmp = TempDir::new().unwrap();
        let paths = DataPaths::new(tmp.path());
        write_release_zip(&paths);

        let store = CodeStore::open_in_memory().unwrap();
        let inserted = SnomedLoader
            .load(&store, &paths, &CancellationToken::new())
            .unwrap();
        assert_eq!(inserted, 2);

        let diabetes = store.get_code(Vocabulary::Snomed, "44054006").unwrap().unwrap();
        assert_eq!(diabetes.description, "Type 2 diabetes mellitus");
        assert_eq!(diabetes.extra.unwrap()["semantic_tag"], "disorder");

        // FSN fallback when no synonym exists, semantic tag stripped.
        let htn = store.get_code(Vocabulary::Snomed, "38341003").unwrap().unwrap();
        assert_eq!(htn.description, "Hypertensive disorder, systemic arterial");

        // Inactive concept excluded entirely.
        assert!(store.get_code(Vocabulary::Snomed, "11111111").unwrap().is_none());
    }

    #[test]
    fn test_split_fsn() {
        assert_eq!(
            SnomedLoader::split_fsn("Diabetes mellitus (disorder)"),
            ("Diabetes mellitus".to_string(), Some("disorder".to_string()))
        );
        assert_eq!(
            SnomedLoader::split_fsn("Plain term"),
            ("Plain term".to_string(), None)
        );
    }

    #[test]
    fn test_rerun_is_noop() {
        let tmp = TempDir::new().unwrap();
        let paths = DataPaths::new(tmp.path());
        write_release_zip(&paths);
        let store = CodeStore::open_in_memory().unwrap();
        let cancel = CancellationToken::new();

        assert_eq!(SnomedLoader.load(&store, &paths, &cancel).unwrap(), 2);
        assert_eq!(SnomedLoader.load(&store, &paths, &cancel).unwrap(), 0);
    }
}
