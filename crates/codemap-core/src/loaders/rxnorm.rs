//! RxNorm loader.
//!
//! Reads the full-release RRF files, either extracted under `rrf/` or
//! straight from the release zip. `RXNCONSO.RRF` rows owned by RxNorm
//! (`SAB=RXNORM`) define the concepts; `RXNSAT.RRF` NDC attributes, when
//! present, ride along as a pipe-joined `ndc_codes` extra attribute that
//! the NDC->RxNorm mapper consumes.

use std::collections::HashMap;
use std::fs;
use std::io::{BufRead, BufReader};
use std::path::Path;

use serde_json::json;
use tracing::info;

use crate::cancel::CancellationToken;
use crate::config::DataPaths;
use crate::error::{CodemapError, Result};
use crate::files::{find_zip, find_zip_entry};
use crate::models::{CodeRecord, Vocabulary};
use crate::store::CodeStore;

use super::{CodeBatch, Loader};

// RXNCONSO.RRF column indexes.
pub(crate) const COL_RXCUI: usize = 0;
pub(crate) const COL_SCUI: usize = 9;
pub(crate) const COL_SAB: usize = 11;
pub(crate) const COL_TTY: usize = 12;
pub(crate) const COL_STR: usize = 14;
pub(crate) const COL_SUPPRESS: usize = 16;

// RXNSAT.RRF column indexes.
const SAT_RXCUI: usize = 0;
const SAT_ATN: usize = 8;
const SAT_ATV: usize = 10;

/// Stream one RRF file line by line, preferring an extracted copy under
/// `<dir>/rrf/` over the release zip. Returns false if the file is not
/// present in either place.
pub(crate) fn for_each_rrf_line(
    dir: &Path,
    file_name: &str,
    mut f: impl FnMut(&str) -> Result<()>,
) -> Result<bool> {
    let extracted = dir.join("rrf").join(file_name);
    if extracted.is_file() {
        let file = fs::File::open(&extracted)
            .map_err(|e| CodemapError::io_with_path(e, extracted.clone()))?;
        for line in BufReader::new(file).lines() {
            f(&line?)?;
        }
        return Ok(true);
    }

    let Some(zip_path) = find_zip(dir, "RxNorm") else {
        return Ok(false);
    };
    let mut archive = zip::ZipArchive::new(
        fs::File::open(&zip_path).map_err(|e| CodemapError::io_with_path(e, zip_path.clone()))?,
    )?;
    let Some(entry_name) = find_zip_entry(&archive, &[file_name]) else {
        return Ok(false);
    };
    let entry = archive.by_name(&entry_name)?;
    for line in BufReader::new(entry).lines() {
        f(&line?)?;
    }
    Ok(true)
}

pub struct RxNormLoader;

struct Concept {
    name: String,
    tty: String,
    suppressed: bool,
}

impl Loader for RxNormLoader {
    fn vocabulary(&self) -> Vocabulary {
        Vocabulary::RxNorm
    }

    fn load(
        &self,
        store: &CodeStore,
        paths: &DataPaths,
        cancel: &CancellationToken,
    ) -> Result<usize> {
        let dir = paths.vocab_dir(Vocabulary::RxNorm);
        info!(path = %dir.display(), "Loading RxNorm");

        let mut concepts: HashMap<String, Concept> = HashMap::new();
        let found = for_each_rrf_line(&dir, "RXNCONSO.RRF", |line| {
            let parts: Vec<&str> = line.split('|').collect();
            if parts.len() <= COL_SUPPRESS || parts[COL_SAB] != "RXNORM" {
                return Ok(());
            }
            let suppressed = parts[COL_SUPPRESS] != "N";
            let rxcui = parts[COL_RXCUI].to_string();
            // First row wins unless it was suppressed and this one isn't.
            let replace = match concepts.get(&rxcui) {
                Some(existing) => existing.suppressed && !suppressed,
                None => true,
            };
            if replace {
                concepts.insert(
                    rxcui,
                    Concept {
                        name: parts[COL_STR].to_string(),
                        tty: parts[COL_TTY].to_string(),
                        suppressed,
                    },
                );
            }
            Ok(())
        })?;
        if !found {
            return Err(CodemapError::Io {
                message: "No RXNCONSO.RRF (extracted or zipped) found".into(),
                path: Some(dir.clone()),
                source: None,
            });
        }
        info!(concepts = concepts.len(), "RxNorm concepts indexed");

        // NDC attributes are optional: the release may be staged without
        // RXNSAT.RRF, in which case the NDC->RxNorm mapper finds nothing.
        let mut ndc_codes: HashMap<String, Vec<String>> = HashMap::new();
        for_each_rrf_line(&dir, "RXNSAT.RRF", |line| {
            let parts: Vec<&str> = line.split('|').collect();
            if parts.len() <= SAT_ATV || parts[SAT_ATN] != "NDC" {
                return Ok(());
            }
            let ndc: String = parts[SAT_ATV].chars().filter(|c| c.is_ascii_digit()).collect();
            if ndc.is_empty() {
                return Ok(());
            }
            let list = ndc_codes.entry(parts[SAT_RXCUI].to_string()).or_default();
            if !list.contains(&ndc) {
                list.push(ndc);
            }
            Ok(())
        })?;

        let mut batch = CodeBatch::new(store, Vocabulary::RxNorm, cancel);
        for (rxcui, concept) in &concepts {
            let mut extra = json!({ "term_type": concept.tty });
            if let Some(list) = ndc_codes.get(rxcui) {
                extra["ndc_codes"] = json!(list.join("|"));
            }
            let mut record = CodeRecord::new(rxcui.clone(), concept.name.clone()).with_extra(extra);
            if concept.suppressed {
                record = record.inactive();
            }
            batch.push(record)?;
        }
        let inserted = batch.finish()?;
        info!(inserted, "RxNorm load complete");
        Ok(inserted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn conso_line(rxcui: &str, sab: &str, tty: &str, scui: &str, name: &str) -> String {
        let mut parts = vec![""; 18];
        parts[COL_RXCUI] = rxcui;
        parts[COL_SCUI] = scui;
        parts[COL_SAB] = sab;
        parts[COL_TTY] = tty;
        parts[COL_STR] = name;
        parts[COL_SUPPRESS] = "N";
        parts.join("|")
    }

    fn write_rrf(paths: &DataPaths, conso: &[String], sat: &[String]) {
        let dir = paths.vocab_dir(Vocabulary::RxNorm).join("rrf");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("RXNCONSO.RRF"), conso.join("\n")).unwrap();
        if !sat.is_empty() {
            fs::write(dir.join("RXNSAT.RRF"), sat.join("\n")).unwrap();
        }
    }

    fn sat_line(rxcui: &str, atn: &str, atv: &str) -> String {
        let mut parts = vec![""; 13];
        parts[SAT_RXCUI] = rxcui;
        parts[SAT_ATN] = atn;
        parts[SAT_ATV] = atv;
        parts.join("|")
    }

    #[test]
    fn test_load_rxnorm_owned_rows_with_ndc_attrs() {
        let tmp = TempDir::new().unwrap();
        let paths = DataPaths::new(tmp.path());
        write_rrf(
            &paths,
            &[
                conso_line("1049221", "RXNORM", "SCD", "", "acetaminophen 325 MG Oral Tablet"),
                conso_line("1049221", "RXNORM", "PSN", "", "duplicate row for same concept"),
                conso_line("161", "SNOMEDCT_US", "PT", "90332006", "Paracetamol"),
            ],
            &[
                sat_line("1049221", "NDC", "00904-6720-61"),
                sat_line("1049221", "NDC", "00904672061"),
                sat_line("1049221", "RXN_QUANTITY", "100"),
            ],
        );

        let store = CodeStore::open_in_memory().unwrap();
        let inserted = RxNormLoader
            .load(&store, &paths, &CancellationToken::new())
            .unwrap();
        assert_eq!(inserted, 1);

        let record = store.get_code(Vocabulary::RxNorm, "1049221").unwrap().unwrap();
        assert_eq!(record.description, "acetaminophen 325 MG Oral Tablet");
        let extra = record.extra.unwrap();
        assert_eq!(extra["term_type"], "SCD");
        // Normalized to digits-only and deduplicated.
        assert_eq!(extra["ndc_codes"], "00904672061");
    }

    #[test]
    fn test_missing_conso_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let paths = DataPaths::new(tmp.path());
        let store = CodeStore::open_in_memory().unwrap();
        assert!(RxNormLoader
            .load(&store, &paths, &CancellationToken::new())
            .is_err());
    }
}
