//! NDC loader.
//!
//! Parses the FDA NDC database `product.txt`, a tab-delimited latin-1 file
//! with a header row. Columns are located by header name so column
//! reordering between releases does not break parsing. NDC codes are
//! normalized to digits only.

use std::collections::HashMap;
use std::fs;
use std::io::Read;

use serde_json::json;
use tracing::info;

use crate::cancel::CancellationToken;
use crate::config::DataPaths;
use crate::error::{CodemapError, Result};
use crate::files::{file_name_lower, files_in, find_zip, find_zip_entry};
use crate::models::{CodeRecord, Vocabulary};
use crate::store::CodeStore;

use super::{CodeBatch, Loader};

pub struct NdcLoader;

fn latin1_to_string(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}

impl NdcLoader {
    fn read_product_text(paths: &DataPaths) -> Result<String> {
        let dir = paths.vocab_dir(Vocabulary::Ndc);
        if let Some(path) = files_in(&dir)
            .into_iter()
            .find(|p| file_name_lower(p) == "product.txt")
        {
            let bytes = fs::read(&path).map_err(|e| CodemapError::io_with_path(e, path.clone()))?;
            return Ok(latin1_to_string(&bytes));
        }
        if let Some(zip_path) = find_zip(&dir, "ndctext") {
            let mut archive = zip::ZipArchive::new(
                fs::File::open(&zip_path)
                    .map_err(|e| CodemapError::io_with_path(e, zip_path.clone()))?,
            )?;
            let entry_name = find_zip_entry(&archive, &["product.txt"]).ok_or_else(|| {
                CodemapError::parse("No product.txt entry in ndctext zip", zip_path.clone())
            })?;
            let mut bytes = Vec::new();
            archive.by_name(&entry_name)?.read_to_end(&mut bytes)?;
            return Ok(latin1_to_string(&bytes));
        }
        Err(CodemapError::Io {
            message: "No product.txt (extracted or zipped) found".into(),
            path: Some(dir),
            source: None,
        })
    }
}

impl Loader for NdcLoader {
    fn vocabulary(&self) -> Vocabulary {
        Vocabulary::Ndc
    }

    fn load(
        &self,
        store: &CodeStore,
        paths: &DataPaths,
        cancel: &CancellationToken,
    ) -> Result<usize> {
        let text = Self::read_product_text(paths)?;
        info!("Loading NDC products");

        let mut lines = text.lines();
        let header = lines
            .next()
            .ok_or_else(|| CodemapError::Parse {
                message: "product.txt is empty".into(),
                path: None,
            })?;
        let columns: HashMap<String, usize> = header
            .split('\t')
            .enumerate()
            .map(|(i, name)| (name.trim().to_uppercase(), i))
            .collect();
        let ndc_col = *columns.get("PRODUCTNDC").ok_or_else(|| CodemapError::Parse {
            message: "product.txt header has no PRODUCTNDC column".into(),
            path: None,
        })?;
        let name_col = columns.get("PROPRIETARYNAME").copied();
        let generic_col = columns.get("NONPROPRIETARYNAME").copied();
        let dosage_col = columns.get("DOSAGEFORMNAME").copied();
        let route_col = columns.get("ROUTENAME").copied();

        let cell = |parts: &[&str], col: Option<usize>| -> Option<String> {
            col.and_then(|i| parts.get(i))
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        };

        let mut batch = CodeBatch::new(store, Vocabulary::Ndc, cancel);
        for line in lines {
            let parts: Vec<&str> = line.split('\t').collect();
            let Some(raw_ndc) = parts.get(ndc_col) else {
                continue;
            };
            let ndc: String = raw_ndc.chars().filter(|c| c.is_ascii_digit()).collect();
            if ndc.is_empty() {
                continue;
            }
            let proprietary = cell(&parts, name_col);
            let generic = cell(&parts, generic_col);
            let description = match (&proprietary, &generic) {
                (Some(name), Some(gen)) if name.to_lowercase() != gen.to_lowercase() => {
                    format!("{} ({})", name, gen)
                }
                (Some(name), _) => name.clone(),
                (None, Some(gen)) => gen.clone(),
                (None, None) => continue,
            };
            batch.push(CodeRecord::new(ndc, description).with_extra(json!({
                "proprietary_name": proprietary,
                "nonproprietary_name": generic,
                "dosage_form": cell(&parts, dosage_col),
                "route": cell(&parts, route_col),
            })))?;
        }
        let inserted = batch.finish()?;
        info!(inserted, "NDC load complete");
        Ok(inserted)
    }
}
