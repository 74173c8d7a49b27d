//! HCPCS Level II loader.
//!
//! Parses the CMS ANWEB fixed-width file. The file is latin-1, so it is
//! read as bytes and decoded byte-for-byte. Layout per record: code at
//! columns 0-4 (`[A-V]` + four digits), long description at 11-81, short
//! description from 82. A code spanning multiple records continues its
//! long description on the follow-on lines.

use std::fs;

use serde_json::json;
use tracing::info;

use crate::cancel::CancellationToken;
use crate::config::DataPaths;
use crate::error::{CodemapError, Result};
use crate::files::{file_name_lower, files_in};
use crate::models::{CodeRecord, Vocabulary};
use crate::store::CodeStore;

use super::{CodeBatch, Loader};

pub struct HcpcsLoader;

fn latin1_to_string(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}

fn is_hcpcs_code(code: &str) -> bool {
    code.len() == 5
        && matches!(code.as_bytes()[0], b'A'..=b'V')
        && code.as_bytes()[1..].iter().all(|b| b.is_ascii_digit())
}

impl Loader for HcpcsLoader {
    fn vocabulary(&self) -> Vocabulary {
        Vocabulary::Hcpcs
    }

    fn load(
        &self,
        store: &CodeStore,
        paths: &DataPaths,
        cancel: &CancellationToken,
    ) -> Result<usize> {
        let dir = paths.vocab_dir(Vocabulary::Hcpcs);
        let path = files_in(&dir)
            .into_iter()
            .find(|p| file_name_lower(p).ends_with(".txt"))
            .ok_or_else(|| CodemapError::Io {
                message: "No HCPCS ANWEB text file found".into(),
                path: Some(dir.clone()),
                source: None,
            })?;
        info!(path = %path.display(), "Loading HCPCS");

        let bytes = fs::read(&path).map_err(|e| CodemapError::io_with_path(e, path.clone()))?;
        let text = latin1_to_string(&bytes);

        let mut batch = CodeBatch::new(store, Vocabulary::Hcpcs, cancel);
        let mut current: Option<(String, String, String)> = None;
        for line in text.lines() {
            let chars: Vec<char> = line.chars().collect();
            if chars.len() < 12 {
                continue;
            }
            let code: String = chars[..5].iter().collect::<String>().trim().to_string();
            if !is_hcpcs_code(&code) {
                continue;
            }
            let end_long = chars.len().min(82);
            let long: String = chars[11..end_long].iter().collect::<String>().trim().to_string();
            let short: String = if chars.len() > 82 {
                chars[82..chars.len().min(110)]
                    .iter()
                    .collect::<String>()
                    .trim()
                    .to_string()
            } else {
                String::new()
            };

            match &mut current {
                Some((cur_code, cur_long, _)) if *cur_code == code => {
                    // Continuation record: extend the long description.
                    if !long.is_empty() {
                        cur_long.push(' ');
                        cur_long.push_str(&long);
                    }
                }
                _ => {
                    if let Some((code, long, short)) = current.take() {
                        push_record(&mut batch, code, long, short)?;
                    }
                    current = Some((code, long, short));
                }
            }
        }
        if let Some((code, long, short)) = current.take() {
            push_record(&mut batch, code, long, short)?;
        }

        let inserted = batch.finish()?;
        info!(inserted, "HCPCS load complete");
        Ok(inserted)
    }
}

fn push_record(
    batch: &mut CodeBatch<'_>,
    code: String,
    long: String,
    short: String,
) -> Result<()> {
    let description = if long.is_empty() { short.clone() } else { long };
    if description.is_empty() {
        return Ok(());
    }
    batch.push(CodeRecord::new(code, description).with_extra(json!({
        "short_description": short,
    })))
}
