//! ICD-10-CM loader.
//!
//! Parses the CMS "order" file: fixed-width text, one row per code, with
//! the code at columns 6-13, a billable flag at column 14, the short
//! description at 16-76 and the long description from 77. Codes are stored
//! with the decimal point after the third character.

use std::fs;
use std::io::{BufRead, BufReader};

use serde_json::json;
use tracing::info;

use crate::cancel::CancellationToken;
use crate::config::DataPaths;
use crate::error::{CodemapError, Result};
use crate::files::{file_name_lower, files_in};
use crate::models::{format_icd10_code, CodeRecord, Vocabulary};
use crate::store::CodeStore;

use super::{CodeBatch, Loader};

pub struct Icd10Loader;

struct OrderLine {
    code: String,
    billable: bool,
    short_description: String,
    long_description: String,
}

impl Icd10Loader {
    fn parse_line(line: &str) -> Option<OrderLine> {
        if line.len() < 16 {
            return None;
        }
        let code = line.get(6..14)?.trim();
        if code.is_empty() || !code.as_bytes()[0].is_ascii_uppercase() {
            return None;
        }
        let billable = line.get(14..15) == Some("1");
        let short_description = line.get(16..77).unwrap_or("").trim().to_string();
        let long_description = line.get(77..).unwrap_or("").trim().to_string();
        Some(OrderLine {
            code: format_icd10_code(code),
            billable,
            short_description,
            long_description,
        })
    }
}

impl Loader for Icd10Loader {
    fn vocabulary(&self) -> Vocabulary {
        Vocabulary::Icd10
    }

    fn load(
        &self,
        store: &CodeStore,
        paths: &DataPaths,
        cancel: &CancellationToken,
    ) -> Result<usize> {
        let dir = paths.vocab_dir(Vocabulary::Icd10);
        let order_file = files_in(&dir)
            .into_iter()
            .find(|p| {
                let name = file_name_lower(p);
                name.contains("order") && name.ends_with(".txt") && !name.contains("addenda")
            })
            .ok_or_else(|| CodemapError::Io {
                message: "No ICD-10-CM order file found".into(),
                path: Some(dir.clone()),
                source: None,
            })?;
        info!(path = %order_file.display(), "Loading ICD-10-CM");

        let file = fs::File::open(&order_file)
            .map_err(|e| CodemapError::io_with_path(e, order_file.clone()))?;
        let mut batch = CodeBatch::new(store, Vocabulary::Icd10, cancel);
        for line in BufReader::new(file).lines() {
            let line = line?;
            let Some(parsed) = Self::parse_line(&line) else {
                continue;
            };
            let description = if parsed.long_description.is_empty() {
                parsed.short_description.clone()
            } else {
                parsed.long_description.clone()
            };
            batch.push(CodeRecord::new(parsed.code, description).with_extra(json!({
                "billable": parsed.billable,
                "short_description": parsed.short_description,
            })))?;
        }
        let inserted = batch.finish()?;
        info!(inserted, "ICD-10-CM load complete");
        Ok(inserted)
    }
}
