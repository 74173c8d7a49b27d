//! Cross-system medical code mapping pipeline.
//!
//! Ingests heterogeneous vocabulary releases (SNOMED CT, ICD-10-CM, HCC,
//! CPT, HCPCS, RxNorm, NDC), normalizes them into uniform code tables in
//! one SQLite store, builds direct and derived cross-vocabulary mappings,
//! records referential-integrity conflicts as first-class data, and runs a
//! prioritized chain of automated resolution strategies over the backlog.

pub mod cancel;
pub mod config;
pub mod conflict;
pub mod error;
pub mod files;
pub mod loaders;
pub mod mappers;
pub mod models;
pub mod pipeline;
pub mod store;
pub mod validate;

pub use cancel::CancellationToken;
pub use config::{BatchConfig, DataPaths, ResolutionConfig};
pub use conflict::{ConflictTracker, ResolutionEngine, ResolutionStats};
pub use error::{CodemapError, Result};
pub use models::{
    format_icd10_code, CodeRecord, ConflictReason, ConflictStatus, MappingConflict, MappingKind,
    MappingRecord, NewConflict, Vocabulary,
};
pub use pipeline::{known_keys, Pipeline, PipelineOptions, RunSummary};
pub use store::CodeStore;
pub use validate::{validate_all, ValidationReport};
