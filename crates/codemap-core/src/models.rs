//! Core data types shared across the pipeline.
//!
//! Every vocabulary is normalized into the same [`CodeRecord`] shape; the
//! vocabulary-specific attributes that do not fit the common columns ride
//! along as an opaque JSON `extra` blob.

use serde::{Deserialize, Serialize};

/// One medical coding system handled by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Vocabulary {
    Snomed,
    Icd10,
    Hcc,
    Cpt,
    Hcpcs,
    RxNorm,
    Ndc,
}

impl Vocabulary {
    pub const ALL: [Vocabulary; 7] = [
        Vocabulary::Snomed,
        Vocabulary::Icd10,
        Vocabulary::Hcc,
        Vocabulary::Cpt,
        Vocabulary::Hcpcs,
        Vocabulary::RxNorm,
        Vocabulary::Ndc,
    ];

    /// SQLite table holding this vocabulary's code records.
    pub fn table(&self) -> &'static str {
        match self {
            Vocabulary::Snomed => "snomed_codes",
            Vocabulary::Icd10 => "icd10_codes",
            Vocabulary::Hcc => "hcc_codes",
            Vocabulary::Cpt => "cpt_codes",
            Vocabulary::Hcpcs => "hcpcs_codes",
            Vocabulary::RxNorm => "rxnorm_codes",
            Vocabulary::Ndc => "ndc_codes",
        }
    }

    /// Short system identifier used in conflict rows (e.g. `"ICD-10"`).
    pub fn system_id(&self) -> &'static str {
        match self {
            Vocabulary::Snomed => "SNOMED",
            Vocabulary::Icd10 => "ICD-10",
            Vocabulary::Hcc => "HCC",
            Vocabulary::Cpt => "CPT",
            Vocabulary::Hcpcs => "HCPCS",
            Vocabulary::RxNorm => "RxNorm",
            Vocabulary::Ndc => "NDC",
        }
    }

    /// Inverse of [`Vocabulary::system_id`], for conflict rows read back
    /// from the store.
    pub fn from_system_id(id: &str) -> Option<Vocabulary> {
        Vocabulary::ALL.into_iter().find(|v| v.system_id() == id)
    }

    /// Human-readable label for logs.
    pub fn label(&self) -> &'static str {
        match self {
            Vocabulary::Snomed => "SNOMED CT",
            Vocabulary::Icd10 => "ICD-10-CM",
            Vocabulary::Hcc => "HCC",
            Vocabulary::Cpt => "CPT",
            Vocabulary::Hcpcs => "HCPCS",
            Vocabulary::RxNorm => "RxNorm",
            Vocabulary::Ndc => "NDC",
        }
    }

    /// Lowercase key used for `--only` / `--skip` selection and for the
    /// staging subdirectory name.
    pub fn key(&self) -> &'static str {
        match self {
            Vocabulary::Snomed => "snomed",
            Vocabulary::Icd10 => "icd10",
            Vocabulary::Hcc => "hcc",
            Vocabulary::Cpt => "cpt",
            Vocabulary::Hcpcs => "hcpcs",
            Vocabulary::RxNorm => "rxnorm",
            Vocabulary::Ndc => "ndc",
        }
    }
}

/// One ordered vocabulary pair for which a mapping table exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MappingKind {
    SnomedIcd10,
    Icd10Hcc,
    RxNormSnomed,
    NdcRxNorm,
    /// Derived transitively: SNOMED → ICD-10 → HCC.
    SnomedHcc,
}

impl MappingKind {
    pub const ALL: [MappingKind; 5] = [
        MappingKind::SnomedIcd10,
        MappingKind::Icd10Hcc,
        MappingKind::RxNormSnomed,
        MappingKind::NdcRxNorm,
        MappingKind::SnomedHcc,
    ];

    pub fn table(&self) -> &'static str {
        match self {
            MappingKind::SnomedIcd10 => "snomed_icd10_mapping",
            MappingKind::Icd10Hcc => "icd10_hcc_mapping",
            MappingKind::RxNormSnomed => "rxnorm_snomed_mapping",
            MappingKind::NdcRxNorm => "ndc_rxnorm_mapping",
            MappingKind::SnomedHcc => "snomed_hcc_mapping",
        }
    }

    pub fn source(&self) -> Vocabulary {
        match self {
            MappingKind::SnomedIcd10 => Vocabulary::Snomed,
            MappingKind::Icd10Hcc => Vocabulary::Icd10,
            MappingKind::RxNormSnomed => Vocabulary::RxNorm,
            MappingKind::NdcRxNorm => Vocabulary::Ndc,
            MappingKind::SnomedHcc => Vocabulary::Snomed,
        }
    }

    pub fn target(&self) -> Vocabulary {
        match self {
            MappingKind::SnomedIcd10 => Vocabulary::Icd10,
            MappingKind::Icd10Hcc => Vocabulary::Hcc,
            MappingKind::RxNormSnomed => Vocabulary::Snomed,
            MappingKind::NdcRxNorm => Vocabulary::RxNorm,
            MappingKind::SnomedHcc => Vocabulary::Hcc,
        }
    }

    /// Whether this mapping is computed by composing two direct mappings.
    pub fn is_derived(&self) -> bool {
        matches!(self, MappingKind::SnomedHcc)
    }

    pub fn key(&self) -> &'static str {
        match self {
            MappingKind::SnomedIcd10 => "snomed-icd10",
            MappingKind::Icd10Hcc => "icd10-hcc",
            MappingKind::RxNormSnomed => "rxnorm-snomed",
            MappingKind::NdcRxNorm => "ndc-rxnorm",
            MappingKind::SnomedHcc => "snomed-hcc",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            MappingKind::SnomedIcd10 => "SNOMED -> ICD-10-CM",
            MappingKind::Icd10Hcc => "ICD-10-CM -> HCC",
            MappingKind::RxNormSnomed => "RxNorm -> SNOMED CT",
            MappingKind::NdcRxNorm => "NDC -> RxNorm",
            MappingKind::SnomedHcc => "SNOMED -> HCC (via ICD-10)",
        }
    }
}

/// Normalized code record, one row per code in a vocabulary table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeRecord {
    pub code: String,
    pub description: String,
    /// Vocabulary-specific attributes (term type, coefficient, category, ...).
    pub extra: Option<serde_json::Value>,
    /// Inactive records are excluded from new mapping computation but kept
    /// for historical lookups.
    pub active: bool,
}

impl CodeRecord {
    pub fn new(code: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            description: description.into(),
            extra: None,
            active: true,
        }
    }

    pub fn with_extra(mut self, extra: serde_json::Value) -> Self {
        self.extra = Some(extra);
        self
    }

    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }
}

/// One mapping row between a source and a target code.
#[derive(Debug, Clone, Default)]
pub struct MappingRecord {
    pub source_code: String,
    pub target_code: String,
    /// For derived mappings: the intermediate code the hop went through.
    pub via_code: Option<String>,
    pub map_rule: Option<String>,
    pub map_priority: Option<i64>,
    pub map_advice: Option<String>,
}

impl MappingRecord {
    pub fn new(source_code: impl Into<String>, target_code: impl Into<String>) -> Self {
        Self {
            source_code: source_code.into(),
            target_code: target_code.into(),
            ..Default::default()
        }
    }
}

/// Why a mapping row could not be created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConflictReason {
    SourceNotFound,
    TargetNotFound,
}

impl ConflictReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictReason::SourceNotFound => "source_not_found",
            ConflictReason::TargetNotFound => "target_not_found",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "source_not_found" => Some(ConflictReason::SourceNotFound),
            "target_not_found" => Some(ConflictReason::TargetNotFound),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConflictStatus {
    Open,
    Resolved,
    Ignored,
}

impl ConflictStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictStatus::Open => "open",
            ConflictStatus::Resolved => "resolved",
            ConflictStatus::Ignored => "ignored",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "open" => Some(ConflictStatus::Open),
            "resolved" => Some(ConflictStatus::Resolved),
            "ignored" => Some(ConflictStatus::Ignored),
            _ => None,
        }
    }
}

/// A conflict as written by a mapper, before it has a surrogate id.
#[derive(Debug, Clone)]
pub struct NewConflict {
    pub source_system: Vocabulary,
    pub target_system: Vocabulary,
    pub source_code: String,
    pub target_code: String,
    pub source_description: Option<String>,
    pub reason: ConflictReason,
    pub details: Option<String>,
}

/// A persisted conflict row. Conflicts are never deleted; they are the
/// audit trail of every referential-integrity failure a mapper hit.
#[derive(Debug, Clone, Serialize)]
pub struct MappingConflict {
    pub id: i64,
    pub source_system: String,
    pub target_system: String,
    pub source_code: String,
    pub target_code: String,
    pub source_description: Option<String>,
    pub reason: ConflictReason,
    pub details: Option<String>,
    pub status: ConflictStatus,
    pub resolution: Option<String>,
    pub resolved_code: Option<String>,
    pub created_at: String,
    pub resolved_at: Option<String>,
}

/// A resolution outcome to apply to one open conflict.
#[derive(Debug, Clone)]
pub struct ConflictUpdate {
    pub id: i64,
    /// `Resolved` or `Ignored`; a conflict is never moved back to open.
    pub status: ConflictStatus,
    /// Human-readable note recording which strategy claimed the conflict
    /// and why.
    pub resolution: String,
    pub resolved_code: Option<String>,
}

/// Format an ICD-10-CM code with the decimal point after the third
/// character: `A000` -> `A00.0`, `E1165` -> `E11.65`. Three-character
/// category codes (headers like `A00`) are returned as-is.
pub fn format_icd10_code(code: &str) -> String {
    let code = code.trim().replace('.', "");
    if code.len() > 3 {
        format!("{}.{}", &code[..3], &code[3..])
    } else {
        code
    }
}
