//! HCC loader.
//!
//! HCC categories have no standalone source file; they are synthesized
//! from the V28 column of the CMS ICD-10-to-HCC mappings CSV. Each unique
//! category number becomes one `HCC<n>` code record.

use std::collections::BTreeSet;
use std::fs;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;

use serde_json::json;
use tracing::info;

use crate::cancel::CancellationToken;
use crate::config::DataPaths;
use crate::error::{CodemapError, Result};
use crate::files::{file_name_lower, files_in};
use crate::models::{CodeRecord, Vocabulary};
use crate::store::CodeStore;

use super::{CodeBatch, Loader};

pub struct HccLoader;

/// Split one CSV line, honoring double-quoted cells (quotes may contain
/// commas; doubled quotes escape a literal quote).
pub(crate) fn split_csv_line(line: &str) -> Vec<String> {
    let mut cells = Vec::new();
    let mut cell = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes && chars.peek() == Some(&'"') => {
                chars.next();
                cell.push('"');
            }
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                cells.push(std::mem::take(&mut cell));
            }
            _ => cell.push(c),
        }
    }
    cells.push(cell);
    cells
}

/// Locate the CMS HCC mappings CSV in the staging tree.
pub(crate) fn find_hcc_csv(paths: &DataPaths) -> Option<PathBuf> {
    files_in(&paths.vocab_dir(Vocabulary::Hcc))
        .into_iter()
        .find(|p| file_name_lower(p).ends_with(".csv"))
}

/// Parsed rows of the mappings CSV: `(icd10_code, description, hcc_number)`.
/// Rows without a V28 category are skipped.
pub(crate) fn parse_hcc_csv(path: &PathBuf) -> Result<Vec<(String, String, u32)>> {
    let file = fs::File::open(path).map_err(|e| CodemapError::io_with_path(e, path.clone()))?;
    let mut rows = Vec::new();
    let mut v28_column: Option<usize> = None;

    for line in BufReader::new(file).lines() {
        let line = line?;
        let cells = split_csv_line(&line);
        if cells.is_empty() {
            continue;
        }
        if v28_column.is_none() {
            // Header row: first cell starts with "Diagnosis".
            if cells[0].trim().starts_with("Diagnosis") {
                v28_column = Some(
                    cells
                        .iter()
                        .position(|c| c.contains("V28"))
                        .ok_or_else(|| CodemapError::parse("No V28 column in header", path.clone()))?,
                );
            }
            continue;
        }
        let col = v28_column.unwrap_or(6);
        let code = cells[0].trim().replace('.', "");
        if code.is_empty() || !code.as_bytes()[0].is_ascii_uppercase() {
            continue;
        }
        let Some(hcc) = cells.get(col).and_then(|c| c.trim().parse::<u32>().ok()) else {
            continue;
        };
        let description = cells.get(1).map(|c| c.trim().to_string()).unwrap_or_default();
        rows.push((code, description, hcc));
    }

    if v28_column.is_none() {
        return Err(CodemapError::parse("No 'Diagnosis' header row found", path.clone()));
    }
    Ok(rows)
}

impl Loader for HccLoader {
    fn vocabulary(&self) -> Vocabulary {
        Vocabulary::Hcc
    }

    fn load(
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
        info!(path = %csv.display(), "Loading HCC categories");

        let rows = parse_hcc_csv(&csv)?;
        let categories: BTreeSet<u32> = rows.iter().map(|(_, _, hcc)| *hcc).collect();

        let mut batch = CodeBatch::new(store, Vocabulary::Hcc, cancel);
        for number in &categories {
            batch.push(
                CodeRecord::new(
                    format!("HCC{}", number),
                    format!("HCC Category {}", number),
                )
                .with_extra(json!({ "model_version": "V28", "category_number": number })),
            )?;
        }
        let inserted = batch.finish()?;
        info!(inserted, categories = categories.len(), "HCC load complete");
        Ok(inserted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const SAMPLE_CSV: &str = "\
Payment year 2025 preamble,,,,,,\n\
Diagnosis Code,Description,FY,,,,CMS-HCC Model Category V28\n\
E119,\"Type 2 diabetes mellitus, without complications\",2025,,,,38\n\
E1165,Type 2 diabetes mellitus with hyperglycemia,2025,,,,37\n\
I10,Essential (primary) hypertension,2025,,,,\n\
A000,Cholera,2025,,,,152\n";

    fn staged_csv(paths: &DataPaths) {
        let dir = paths.vocab_dir(Vocabulary::Hcc);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("2025_hcc_mappings.csv"), SAMPLE_CSV).unwrap();
    }

    #[test]
    fn test_split_csv_line_quoted_cells() {
        assert_eq!(
            split_csv_line("a,\"b, with comma\",c"),
            vec!["a", "b, with comma", "c"]
        );
        assert_eq!(split_csv_line("x,\"he said \"\"hi\"\"\""), vec!["x", "he said \"hi\""]);
    }

    #[test]
    fn test_synthesizes_unique_categories() {
        let tmp = TempDir::new().unwrap();
        let paths = DataPaths::new(tmp.path());
        staged_csv(&paths);

        let store = CodeStore::open_in_memory().unwrap();
        let inserted = HccLoader
            .load(&store, &paths, &CancellationToken::new())
            .unwrap();
        assert_eq!(inserted, 3);

        let hcc38 = store.get_code(Vocabulary::Hcc, "HCC38").unwrap().unwrap();
        assert_eq!(hcc38.description, "HCC Category 38");
        assert_eq!(hcc38.extra.unwrap()["model_version"], "V28");
        // Row without a V28 category contributes nothing.
        assert!(store.get_code(Vocabulary::Hcc, "HCC0").unwrap().is_none());
    }

    #[test]
    fn test_parse_rows_skip_unmapped_codes() {
        let tmp = TempDir::new().unwrap();
        let paths = DataPaths::new(tmp.path());
        staged_csv(&paths);

        let rows = parse_hcc_csv(&find_hcc_csv(&paths).unwrap()).unwrap();
        assert_eq!(rows.len(), 3);
        assert!(rows.iter().any(|(code, _, hcc)| code == "E119" && *hcc == 38));
        assert!(!rows.iter().any(|(code, _, _)| code == "I10"));
    }
}
