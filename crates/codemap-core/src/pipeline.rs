//! Pipeline orchestrator.
//!
//! Sequences clean -> validate -> load -> map -> derive -> resolve over one
//! store. Components run sequentially; a failing loader or mapper is
//! logged, contributes zero rows, and fails the run only in strict mode.

use std::collections::{BTreeMap, HashSet};

use serde::Serialize;
use tracing::{error, info, warn};

use crate::cancel::CancellationToken;
use crate::config::{DataPaths, ResolutionConfig};
use crate::conflict::{ResolutionEngine, ResolutionStats};
use crate::error::{CodemapError, Result};
use crate::loaders::all_loaders;
use crate::mappers::{derived_mappers, direct_mappers};
use crate::models::{ConflictStatus, MappingKind, Vocabulary};
use crate::store::CodeStore;
use crate::validate::validate_all;

/// Run configuration, assembled by the CLI.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub only: Vec<String>,
    pub skip: Vec<String>,
    pub strict: bool,
    pub clean: bool,
    pub auto_resolve: bool,
    pub resolve_limit: Option<usize>,
    pub fuzzy_threshold: f64,
    pub create_placeholders: bool,
    pub dry_run: bool,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            only: Vec::new(),
            skip: Vec::new(),
            strict: false,
            clean: false,
            auto_resolve: false,
            resolve_limit: None,
            fuzzy_threshold: ResolutionConfig::DEFAULT_FUZZY_THRESHOLD,
            create_placeholders: false,
            dry_run: false,
        }
    }
}

/// Machine-readable summary of one pipeline run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub validations_passed: usize,
    pub validations_failed: usize,
    pub loaded: BTreeMap<String, usize>,
    pub mapped: BTreeMap<String, usize>,
    pub component_errors: Vec<String>,
    pub resolution: Option<ResolutionStats>,
    pub code_counts: BTreeMap<String, usize>,
    pub mapping_counts: BTreeMap<String, usize>,
    pub open_conflicts: usize,
    pub resolved_conflicts: usize,
    pub ignored_conflicts: usize,
}

/// Every key `--only` / `--skip` accepts.
pub fn known_keys() -> Vec<&'static str> {
    Vocabulary::ALL
        .iter()
        .map(|v| v.key())
        .chain(MappingKind::ALL.iter().map(|k| k.key()))
        .collect()
}

pub struct Pipeline<'a> {
    store: &'a CodeStore,
    paths: DataPaths,
    options: PipelineOptions,
}

impl<'a> Pipeline<'a> {
    pub fn new(store: &'a CodeStore, paths: DataPaths, options: PipelineOptions) -> Result<Self> {
        if !options.only.is_empty() && !options.skip.is_empty() {
            return Err(CodemapError::Config {
                message: "--only and --skip are mutually exclusive".into(),
            });
        }
        let known: HashSet<&str> = known_keys().into_iter().collect();
        for key in options.only.iter().chain(options.skip.iter()) {
            if !known.contains(key.as_str()) {
                return Err(CodemapError::UnknownKey(key.clone()));
            }
        }
        Ok(Self {
            store,
            paths,
            options,
        })
    }

    fn selected(&self, key: &str) -> bool {
        if !self.options.only.is_empty() {
            self.options.only.iter().any(|k| k == key)
        } else {
            !self.options.skip.iter().any(|k| k == key)
        }
    }

    /// Run the full pipeline. Open conflicts at the end are expected
    /// steady state, not an error.
    pub fn run(&self, cancel: &CancellationToken) -> Result<RunSummary> {
        let mut summary = RunSummary::default();

        if self.options.clean {
            warn!("Clean mode: wiping store before run");
            self.store.wipe()?;
        }

        // Validation gates the loaders. A failed source is excluded from
        // this run; in strict mode it aborts the whole pipeline.
        let reports = validate_all(&self.paths);
        let mut excluded: HashSet<&'static str> = HashSet::new();
        for report in &reports {
            if report.passed {
                summary.validations_passed += 1;
            } else {
                summary.validations_failed += 1;
                excluded.insert(report.key);
                warn!(
                    source = report.key,
                    messages = ?report.messages,
                    "Source validation failed"
                );
            }
        }
        if self.options.strict && summary.validations_failed > 0 {
            return Err(CodemapError::ValidationFailed {
                failed: summary.validations_failed,
            });
        }

        for loader in all_loaders() {
            if !self.selected(loader.key()) || excluded.contains(loader.key()) {
                continue;
            }
            cancel.check()?;
            match loader.load(self.store, &self.paths, cancel) {
                Ok(inserted) => {
                    summary.loaded.insert(loader.key().to_string(), inserted);
                }
                Err(CodemapError::Cancelled) => return Err(CodemapError::Cancelled),
                Err(e) => self.component_failed(&mut summary, loader.key(), e)?,
            }
        }

        for mapper in direct_mappers().into_iter().chain(derived_mappers()) {
            if !self.selected(mapper.key()) {
                continue;
            }
            cancel.check()?;
            match mapper.build(self.store, &self.paths, cancel) {
                Ok(inserted) => {
                    summary.mapped.insert(mapper.key().to_string(), inserted);
                }
                Err(CodemapError::Cancelled) => return Err(CodemapError::Cancelled),
                Err(e) => self.component_failed(&mut summary, mapper.key(), e)?,
            }
        }

        if self.options.auto_resolve {
            cancel.check()?;
            let stats = ResolutionEngine::new(
                self.options.fuzzy_threshold,
                self.options.create_placeholders,
            )
            .limit(self.options.resolve_limit)
            .dry_run(self.options.dry_run)
            .run(self.store, cancel)?;
            summary.resolution = Some(stats);
        }

        self.fill_counts(&mut summary)?;
        info!(
            open_conflicts = summary.open_conflicts,
            "Pipeline run complete"
        );
        Ok(summary)
    }

    fn component_failed(
        &self,
        summary: &mut RunSummary,
        key: &str,
        err: CodemapError,
    ) -> Result<()> {
        error!(component = key, error = %err, "Component failed");
        // Source-format failures are per-component; a store error means the
        // batch rolled back and the store state is suspect, so it halts the
        // run even outside strict mode.
        if matches!(err, CodemapError::Database { .. }) {
            return Err(err);
        }
        if self.options.strict {
            return Err(CodemapError::ComponentFailed {
                component: key.to_string(),
                message: err.to_string(),
            });
        }
        summary.component_errors.push(format!("{}: {}", key, err));
        Ok(())
    }

    fn fill_counts(&self, summary: &mut RunSummary) -> Result<()> {
        for vocab in Vocabulary::ALL {
            summary
                .code_counts
                .insert(vocab.key().to_string(), self.store.code_count(vocab)?);
        }
        for kind in MappingKind::ALL {
            summary
                .mapping_counts
                .insert(kind.key().to_string(), self.store.mapping_count(kind)?);
        }
        summary.open_conflicts = self.store.conflict_count(ConflictStatus::Open)?;
        summary.resolved_conflicts = self.store.conflict_count(ConflictStatus::Resolved)?;
        summary.ignored_conflicts = self.store.conflict_count(ConflictStatus::Ignored)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_rejects_conflicting_selection() {
        let store = CodeStore::open_in_memory().unwrap();
        let options = PipelineOptions {
            only: vec!["snomed".into()],
            skip: vec!["icd10".into()],
            ..Default::default()
        };
        let tmp = TempDir::new().unwrap();
        assert!(Pipeline::new(&store, DataPaths::new(tmp.path()), options).is_err());
    }

    #[test]
    fn test_rejects_unknown_keys() {
        let store = CodeStore::open_in_memory().unwrap();
        let options = PipelineOptions {
            only: vec!["loinc".into()],
            ..Default::default()
        };
        let tmp = TempDir::new().unwrap();
        let err = Pipeline::new(&store, DataPaths::new(tmp.path()), options)
            .err()
            .unwrap();
        assert!(matches!(err, CodemapError::UnknownKey(k) if k == "loinc"));
    }

    #[test]
    fn test_strict_mode_aborts_on_validation_failure() {
        let store = CodeStore::open_in_memory().unwrap();
        let tmp = TempDir::new().unwrap();
        let options = PipelineOptions {
            strict: true,
            ..Default::default()
        };
        let pipeline = Pipeline::new(&store, DataPaths::new(tmp.path()), options).unwrap();
        let err = pipeline.run(&CancellationToken::new()).unwrap_err();
        assert!(matches!(err, CodemapError::ValidationFailed { failed: 7 }));
    }

    #[test]
    fn test_store_error_halts_run_without_strict() {
        let store = CodeStore::open_in_memory().unwrap();
        // Mangle the schema so the first insert fails at the store layer.
        store
            .execute_raw(
                "DROP TABLE icd10_codes;
                 CREATE TABLE icd10_codes (code TEXT PRIMARY KEY);",
            )
            .unwrap();

        let tmp = TempDir::new().unwrap();
        let paths = DataPaths::new(tmp.path());
        let dir = paths.vocab_dir(Vocabulary::Icd10);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("icd10cm_order_2025.txt"),
            format!(
                "{:<6}{:<8}{} {:<61}{}\n",
                "00001", "A000", "1", "Cholera d/t Vib cholerae", "Cholera due to Vibrio cholerae"
            ),
        )
        .unwrap();

        let options = PipelineOptions {
            only: vec!["icd10".into()],
            ..Default::default()
        };
        let pipeline = Pipeline::new(&store, paths, options).unwrap();
        let err = pipeline.run(&CancellationToken::new()).err().unwrap();
        assert!(matches!(err, CodemapError::Database { .. }));
    }

    #[test]
    fn test_empty_staging_tree_completes_without_strict() {
        let store = CodeStore::open_in_memory().unwrap();
        let tmp = TempDir::new().unwrap();
        let pipeline = Pipeline::new(
            &store,
            DataPaths::new(tmp.path()),
            PipelineOptions::default(),
        )
        .unwrap();

        let summary = pipeline.run(&CancellationToken::new()).unwrap();
        // All sources failed validation, so no loader ran; mappers that
        // need source files failed and were recorded, not fatal.
        assert_eq!(summary.validations_failed, 7);
        assert!(summary.loaded.is_empty());
        assert!(!summary.component_errors.is_empty());
        assert_eq!(summary.open_conflicts, 0);
    }
}
