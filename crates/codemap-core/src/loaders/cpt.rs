//! CPT loader.
//!
//! Parses the CMS DHS (designated health services) code-list zip. The text
//! entry alternates all-caps category headers with code lines; 5-digit
//! numeric codes are CPT and are inserted, while HCPCS-shaped codes
//! (`[A-V]` + four digits) tag already-loaded HCPCS records with their DHS
//! category instead.

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

pub struct CptLoader;

enum DhsLine {
    Category(String),
    Cpt { code: String, description: String },
    Hcpcs { code: String },
}

impl CptLoader {
    fn classify(line: &str) -> Option<DhsLine> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        let bytes = line.as_bytes();
        if line.len() >= 5 && bytes[..5].iter().all(|b| b.is_ascii_digit()) {
            let description = line[5..].trim_start_matches([' ', '-', '\t']).to_string();
            return Some(DhsLine::Cpt {
                code: line[..5].to_string(),
                description,
            });
        }
        if line.len() >= 5
            && matches!(bytes[0], b'A'..=b'V')
            && bytes[1..5].iter().all(|b| b.is_ascii_digit())
            && (line.len() == 5 || !bytes[5].is_ascii_alphanumeric())
        {
            return Some(DhsLine::Hcpcs {
                code: line[..5].to_string(),
            });
        }
        // Category headers are all-caps prose.
        let letters: Vec<u8> = bytes.iter().copied().filter(|b| b.is_ascii_alphabetic()).collect();
        if letters.len() > 3 && letters.iter().all(|b| b.is_ascii_uppercase()) {
            return Some(DhsLine::Category(line.to_string()));
        }
        None
    }
}

impl Loader for CptLoader {
    fn vocabulary(&self) -> Vocabulary {
        Vocabulary::Cpt
    }

    fn load(
        &self,
        store: &CodeStore,
        paths: &DataPaths,
        cancel: &CancellationToken,
    ) -> Result<usize> {
        let dir = paths.vocab_dir(Vocabulary::Cpt);
        let zip_path = find_zip(&dir, "").ok_or_else(|| CodemapError::Io {
            message: "No CPT code-list zip found".into(),
            path: Some(dir.clone()),
            source: None,
        })?;
        info!(path = %zip_path.display(), "Loading CPT");

        let mut archive = zip::ZipArchive::new(
            fs::File::open(&zip_path).map_err(|e| CodemapError::io_with_path(e, zip_path.clone()))?,
        )?;
        let entry_name = find_zip_entry(&archive, &[".txt"])
            .ok_or_else(|| CodemapError::parse("No text entry in CPT zip", zip_path.clone()))?;
        let entry = archive.by_name(&entry_name)?;

        let mut batch = CodeBatch::new(store, Vocabulary::Cpt, cancel);
        let mut category: Option<String> = None;
        let mut enriched = 0usize;
        for line in BufReader::new(entry).lines() {
            let line = line?;
            match Self::classify(&line) {
                Some(DhsLine::Category(name)) => category = Some(name),
                Some(DhsLine::Cpt { code, description }) => {
                    batch.push(CodeRecord::new(code, description).with_extra(json!({
                        "dhs_category": category,
                    })))?;
                }
                Some(DhsLine::Hcpcs { code }) => {
                    // Tag the HCPCS record with its DHS category, if loaded.
                    if let Some(record) = store.get_code(Vocabulary::Hcpcs, &code)? {
                        let mut extra = record.extra.unwrap_or_else(|| json!({}));
                        extra["dhs_category"] = json!(category);
                        if store.update_code_extra(Vocabulary::Hcpcs, &code, &extra)? {
                            enriched += 1;
                        }
                    }
                }
                None => {}
            }
        }
        let inserted = batch.finish()?;
        info!(inserted, hcpcs_enriched = enriched, "CPT load complete");
        Ok(inserted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_dhs_zip(paths: &DataPaths) {
        let dir = paths.vocab_dir(Vocabulary::Cpt);
        fs::create_dir_all(&dir).unwrap();
        let file = fs::File::create(dir.join("DHS_Code_List_2025.zip")).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        let options = zip::write::SimpleFileOptions::default();
        writer.start_file("DHS_Code_List_Addendum_2025.txt", options).unwrap();
        writer
            .write_all(
                b"CLINICAL LABORATORY SERVICES\n\
                  80047  Basic metabolic panel (Calcium, ionized)\n\
                  80048  Basic metabolic panel (Calcium, total)\n\
                  RADIOLOGY AND CERTAIN OTHER IMAGING SERVICES\n\
                  70010  Myelography, posterior fossa, radiological supervision\n\
                  R0070\n\
                  Some mixed-case footnote text\n",
            )
            .unwrap();
        writer.finish().unwrap();
    }

    #[test]
    fn test_load_assigns_categories_and_enriches_hcpcs() {
        let tmp = TempDir::new().unwrap();
        let paths = DataPaths::new(tmp.path());
        write_dhs_zip(&paths);

        let store = CodeStore::open_in_memory().unwrap();
        store
            .insert_codes(
                Vocabulary::Hcpcs,
                &[CodeRecord::new("R0070", "Transport of portable x-ray equipment")],
            )
            .unwrap();

        let inserted = CptLoader
            .load(&store, &paths, &CancellationToken::new())
            .unwrap();
        assert_eq!(inserted, 3);

        let lab = store.get_code(Vocabulary::Cpt, "80047").unwrap().unwrap();
        assert_eq!(lab.extra.unwrap()["dhs_category"], "CLINICAL LABORATORY SERVICES");
        let imaging = store.get_code(Vocabulary::Cpt, "70010").unwrap().unwrap();
        assert_eq!(
            imaging.extra.unwrap()["dhs_category"],
            "RADIOLOGY AND CERTAIN OTHER IMAGING SERVICES"
        );

        let enriched = store.get_code(Vocabulary::Hcpcs, "R0070").unwrap().unwrap();
        assert_eq!(
            enriched.extra.unwrap()["dhs_category"],
            "RADIOLOGY AND CERTAIN OTHER IMAGING SERVICES"
        );
    }

    #[test]
    fn test_classify() {
        assert!(matches!(
            CptLoader::classify("CLINICAL LABORATORY SERVICES"),
            Some(DhsLine::Category(_))
        ));
        assert!(matches!(
            CptLoader::classify("80047  Basic metabolic panel"),
            Some(DhsLine::Cpt { .. })
        ));
        assert!(matches!(CptLoader::classify("R0070"), Some(DhsLine::Hcpcs { .. })));
        assert!(CptLoader::classify("Some mixed-case footnote text").is_none());
        assert!(CptLoader::classify("").is_none());
    }
}
