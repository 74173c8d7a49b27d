//! Pre-flight source validation.
//!
//! Validators are read-only: they inspect the staging tree and report, but
//! never touch the store. A failed validation normally just means the
//! vocabulary is skipped for this run; in strict mode the orchestrator
//! aborts before any loader executes.

use std::fs;
use std::io::{BufRead, BufReader};

use tracing::debug;

use crate::config::DataPaths;
use crate::files::{file_name_lower, files_in, find_zip, find_zip_entry};
use crate::models::Vocabulary;

/// Outcome of one validator.
#[derive(Debug, Clone)]
pub struct ValidationReport {
    pub key: &'static str,
    pub passed: bool,
    pub messages: Vec<String>,
}

impl ValidationReport {
    fn pass(key: &'static str) -> Self {
        Self {
            key,
            passed: true,
            messages: Vec::new(),
        }
    }

    fn fail(key: &'static str, message: impl Into<String>) -> Self {
        Self {
            key,
            passed: false,
            messages: vec![message.into()],
        }
    }
}

/// Pre-flight check for one vocabulary's source files.
pub trait SourceValidator {
    fn key(&self) -> &'static str;
    fn validate(&self, paths: &DataPaths) -> ValidationReport;
}

/// SNOMED CT release zip: concept + description snapshots and the
/// ICD-10 ExtendedMap refset must all be present in the archive.
pub struct SnomedValidator;

impl SourceValidator for SnomedValidator {
    fn key(&self) -> &'static str {
        Vocabulary::Snomed.key()
    }

    fn validate(&self, paths: &DataPaths) -> ValidationReport {
        let dir = paths.vocab_dir(Vocabulary::Snomed);
        let Some(zip_path) = find_zip(&dir, "SnomedCT") else {
            return ValidationReport::fail(self.key(), "No SnomedCT release zip found");
        };
        let file = match fs::File::open(&zip_path) {
            Ok(f) => f,
            Err(e) => {
                return ValidationReport::fail(
                    self.key(),
                    format!("Cannot open {}: {}", zip_path.display(), e),
                )
            }
        };
        let archive = match zip::ZipArchive::new(file) {
            Ok(a) => a,
            Err(e) => {
                return ValidationReport::fail(
                    self.key(),
                    format!("Not a readable zip: {}", e),
                )
            }
        };

        let mut report = ValidationReport::pass(self.key());
        for (entry, keywords) in [
            ("concept snapshot", &["Snapshot", "sct2_Concept_"][..]),
            ("description snapshot", &["Snapshot", "sct2_Description_"][..]),
            ("ICD-10 map refset", &["Snapshot", "ExtendedMap"][..]),
        ] {
            if find_zip_entry(&archive, keywords).is_none() {
                report.passed = false;
                report.messages.push(format!("Missing {} in archive", entry));
            }
        }
        report
    }
}

/// ICD-10-CM order file: fixed-width, codes start with a letter and two
/// digits at column 6.
pub struct Icd10Validator;

impl Icd10Validator {
    fn looks_like_order_line(line: &str) -> bool {
        if line.len() < 16 {
            return false;
        }
        let bytes = line.as_bytes();
        bytes[6].is_ascii_uppercase() && bytes[7].is_ascii_digit() && bytes[8].is_ascii_digit()
    }
}

impl SourceValidator for Icd10Validator {
    fn key(&self) -> &'static str {
        Vocabulary::Icd10.key()
    }

    fn validate(&self, paths: &DataPaths) -> ValidationReport {
        let dir = paths.vocab_dir(Vocabulary::Icd10);
        let order_file = files_in(&dir).into_iter().find(|p| {
            let name = file_name_lower(p);
            name.contains("order") && name.ends_with(".txt") && !name.contains("addenda")
        });
        let Some(order_file) = order_file else {
            return ValidationReport::fail(self.key(), "No ICD-10-CM order file (*order*.txt) found");
        };

        let file = match fs::File::open(&order_file) {
            Ok(f) => f,
            Err(e) => return ValidationReport::fail(self.key(), format!("Cannot open order file: {}", e)),
        };
        let checked = BufReader::new(file)
            .lines()
            .take(5)
            .filter_map(|l| l.ok())
            .filter(|l| Self::looks_like_order_line(l))
            .count();
        if checked == 0 {
            return ValidationReport::fail(
                self.key(),
                "Order file does not look fixed-width (no code at column 6)",
            );
        }
        ValidationReport::pass(self.key())
    }
}

/// HCC mapping CSV: must contain a header row whose first cell starts with
/// `Diagnosis`.
pub struct HccValidator;

impl SourceValidator for HccValidator {
    fn key(&self) -> &'static str {
        Vocabulary::Hcc.key()
    }

    fn validate(&self, paths: &DataPaths) -> ValidationReport {
        let dir = paths.vocab_dir(Vocabulary::Hcc);
        let Some(csv) = files_in(&dir)
            .into_iter()
            .find(|p| file_name_lower(p).ends_with(".csv"))
        else {
            return ValidationReport::fail(self.key(), "No HCC mappings CSV found");
        };
        let file = match fs::File::open(&csv) {
            Ok(f) => f,
            Err(e) => return ValidationReport::fail(self.key(), format!("Cannot open CSV: {}", e)),
        };
        let has_header = BufReader::new(file)
            .lines()
            .take(20)
            .filter_map(|l| l.ok())
            .any(|l| l.trim_start_matches('"').starts_with("Diagnosis"));
        if !has_header {
            return ValidationReport::fail(self.key(), "No 'Diagnosis' header row in first 20 lines");
        }
        ValidationReport::pass(self.key())
    }
}

/// CPT DHS code list: a zip with at least one text entry.
pub struct CptValidator;

impl SourceValidator for CptValidator {
    fn key(&self) -> &'static str {
        Vocabulary::Cpt.key()
    }

    fn validate(&self, paths: &DataPaths) -> ValidationReport {
        let dir = paths.vocab_dir(Vocabulary::Cpt);
        let Some(zip_path) = find_zip(&dir, "") else {
            return ValidationReport::fail(self.key(), "No CPT code-list zip found");
        };
        let file = match fs::File::open(&zip_path) {
            Ok(f) => f,
            Err(e) => return ValidationReport::fail(self.key(), format!("Cannot open zip: {}", e)),
        };
        let archive = match zip::ZipArchive::new(file) {
            Ok(a) => a,
            Err(e) => return ValidationReport::fail(self.key(), format!("Not a readable zip: {}", e)),
        };
        if find_zip_entry(&archive, &[".txt"]).is_none() {
            return ValidationReport::fail(self.key(), "No text entry in CPT zip");
        }
        ValidationReport::pass(self.key())
    }
}

/// HCPCS ANWEB file: fixed-width lines with a letter-plus-four-digits code
/// at the start.
pub struct HcpcsValidator;

impl SourceValidator for HcpcsValidator {
    fn key(&self) -> &'static str {
        Vocabulary::Hcpcs.key()
    }

    fn validate(&self, paths: &DataPaths) -> ValidationReport {
        let dir = paths.vocab_dir(Vocabulary::Hcpcs);
        let Some(path) = files_in(&dir)
            .into_iter()
            .find(|p| file_name_lower(p).ends_with(".txt"))
        else {
            return ValidationReport::fail(self.key(), "No HCPCS ANWEB text file found");
        };
        // Latin-1 source: read bytes, not UTF-8.
        let bytes = match fs::read(&path) {
            Ok(b) => b,
            Err(e) => return ValidationReport::fail(self.key(), format!("Cannot read file: {}", e)),
        };
        let looks_fixed_width = bytes
            .split(|b| *b == b'\n')
            .take(50)
            .any(|line| {
                line.len() > 82
                    && line[0].is_ascii_uppercase()
                    && line[1..5].iter().all(|b| b.is_ascii_digit())
            });
        if !looks_fixed_width {
            return ValidationReport::fail(
                self.key(),
                "No fixed-width HCPCS code line in first 50 lines",
            );
        }
        ValidationReport::pass(self.key())
    }
}

/// RxNorm full release: RXNCONSO.RRF (extracted or inside the release zip).
pub struct RxNormValidator;

impl SourceValidator for RxNormValidator {
    fn key(&self) -> &'static str {
        Vocabulary::RxNorm.key()
    }

    fn validate(&self, paths: &DataPaths) -> ValidationReport {
        let dir = paths.vocab_dir(Vocabulary::RxNorm);
        if dir.join("rrf").join("RXNCONSO.RRF").is_file() {
            return ValidationReport::pass(self.key());
        }
        if let Some(zip_path) = find_zip(&dir, "RxNorm") {
            let ok = fs::File::open(&zip_path)
                .ok()
                .and_then(|f| zip::ZipArchive::new(f).ok())
                .map(|a| find_zip_entry(&a, &["RXNCONSO.RRF"]).is_some())
                .unwrap_or(false);
            if ok {
                return ValidationReport::pass(self.key());
            }
            return ValidationReport::fail(self.key(), "RxNorm zip has no RXNCONSO.RRF entry");
        }
        ValidationReport::fail(self.key(), "No RXNCONSO.RRF (extracted or zipped) found")
    }
}

/// NDC product file: pipe-delimited `product.txt`, extracted or in the
/// ndctext zip.
pub struct NdcValidator;

impl SourceValidator for NdcValidator {
    fn key(&self) -> &'static str {
        Vocabulary::Ndc.key()
    }

    fn validate(&self, paths: &DataPaths) -> ValidationReport {
        let dir = paths.vocab_dir(Vocabulary::Ndc);
        let extracted = files_in(&dir)
            .into_iter()
            .find(|p| file_name_lower(p) == "product.txt");
        if let Some(path) = extracted {
            let file = match fs::File::open(&path) {
                Ok(f) => f,
                Err(e) => {
                    return ValidationReport::fail(self.key(), format!("Cannot open product.txt: {}", e))
                }
            };
            let mut first_line = String::new();
            if BufReader::new(file).read_line(&mut first_line).is_err()
                || !first_line.contains('\t') && !first_line.contains('|')
            {
                return ValidationReport::fail(self.key(), "product.txt is not delimited text");
            }
            return ValidationReport::pass(self.key());
        }
        if let Some(zip_path) = find_zip(&dir, "ndctext") {
            let ok = fs::File::open(&zip_path)
                .ok()
                .and_then(|f| zip::ZipArchive::new(f).ok())
                .map(|a| find_zip_entry(&a, &["product.txt"]).is_some())
                .unwrap_or(false);
            if ok {
                return ValidationReport::pass(self.key());
            }
            return ValidationReport::fail(self.key(), "ndctext zip has no product.txt entry");
        }
        ValidationReport::fail(self.key(), "No product.txt (extracted or zipped) found")
    }
}

/// All registered validators, one per vocabulary.
pub fn all_validators() -> Vec<Box<dyn SourceValidator>> {
    vec![
        Box::new(SnomedValidator),
        Box::new(Icd10Validator),
        Box::new(HccValidator),
        Box::new(CptValidator),
        Box::new(HcpcsValidator),
        Box::new(RxNormValidator),
        Box::new(NdcValidator),
    ]
}

/// Run every registered validator against the staging tree.
pub fn validate_all(paths: &DataPaths) -> Vec<ValidationReport> {
    all_validators()
        .iter()
        .map(|v| {
            let report = v.validate(paths);
            debug!(
                source = report.key,
                passed = report.passed,
                "Validation complete"
            );
            report
        })
        .collect()
}
