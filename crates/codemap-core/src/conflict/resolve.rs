//! Automated conflict resolution.
//!
//! A prioritized chain of strategies runs over the open-conflict backlog.
//! The first strategy to claim a conflict finalizes it; later strategies
//! never see it. Outcomes are committed in batches so a large backlog
//! never produces an oversized transaction.

use regex::Regex;
use strsim::normalized_levenshtein;
use tracing::{info, warn};

use crate::cancel::CancellationToken;
use crate::config::ResolutionConfig;
use crate::error::Result;
use crate::models::{
    format_icd10_code, CodeRecord, ConflictReason, ConflictStatus, ConflictUpdate,
    MappingConflict, Vocabulary,
};
use crate::store::CodeStore;

/// What a strategy decided for one conflict.
#[derive(Debug, Clone)]
pub enum Outcome {
    Resolved {
        resolved_code: Option<String>,
        resolution: String,
        /// A code record to create alongside the resolution. Only the
        /// placeholder creator sets this; the engine skips it in dry runs.
        placeholder: Option<(Vocabulary, CodeRecord)>,
    },
    Ignored {
        resolution: String,
    },
}

/// One resolution strategy in the chain.
///
/// Returning `Ok(None)` passes the conflict to the next strategy.
pub trait ResolverStrategy {
    fn name(&self) -> &'static str;

    fn resolve(
        &mut self,
        store: &CodeStore,
        conflict: &MappingConflict,
    ) -> Result<Option<Outcome>>;
}

/// Routes junk codes straight to `ignored` so they never consume fuzzy
/// matching cycles. Runs first in the default chain.
pub struct InvalidCodeFilter {
    patterns: Vec<(Regex, &'static str)>,
}

impl Default for InvalidCodeFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl InvalidCodeFilter {
    pub fn new() -> Self {
        // Compiled once per engine instance. Patterns are anchored; a code
        // must consist entirely of the junk pattern to be ignored.
        let patterns = vec![
            (Regex::new(r"^0+$").unwrap(), "all zeroes"),
            (Regex::new(r"(?i)^[x.]+$").unwrap(), "all-X placeholder"),
            (
                Regex::new(r"(?i)^(n/?a|none|null|tbd|unk(nown)?)$").unwrap(),
                "textual placeholder",
            ),
            (
                Regex::new(r"[^A-Za-z0-9.\-]").unwrap(),
                "characters outside the code alphabet",
            ),
        ];
        Self { patterns }
    }

    fn missing_code(conflict: &MappingConflict) -> &str {
        match conflict.reason {
            ConflictReason::SourceNotFound => &conflict.source_code,
            ConflictReason::TargetNotFound => &conflict.target_code,
        }
    }
}

impl ResolverStrategy for InvalidCodeFilter {
    fn name(&self) -> &'static str {
        "invalid-code-filter"
    }

    fn resolve(
        &mut self,
        _store: &CodeStore,
        conflict: &MappingConflict,
    ) -> Result<Option<Outcome>> {
        let code = Self::missing_code(conflict).trim();
        if code.is_empty() {
            return Ok(Some(Outcome::Ignored {
                resolution: "Invalid code: empty".into(),
            }));
        }
        for (pattern, label) in &self.patterns {
            if pattern.is_match(code) {
                return Ok(Some(Outcome::Ignored {
                    resolution: format!("Invalid code '{}': {}", code, label),
                }));
            }
        }
        Ok(None)
    }
}

/// Format-normalizing fuzzy matcher for ICD-10-CM target codes.
///
/// Exact decimal-variant hits short-circuit at similarity 1.0; otherwise
/// candidates sharing the 3-character category prefix are scored with
/// normalized Levenshtein and the best score at or above the threshold
/// wins. The full ICD-10 code list is loaded once per resolution pass.
pub struct Icd10FuzzyMatcher {
    threshold: f64,
    cache: Option<Icd10Cache>,
}

struct Icd10Cache {
    codes: Vec<String>,
    /// Uppercased, decimal-stripped spelling -> canonical stored code.
    variants: std::collections::HashMap<String, String>,
}

impl Icd10Cache {
    fn build(store: &CodeStore) -> Result<Self> {
        let codes: Vec<String> = store.code_set(Vocabulary::Icd10)?.into_iter().collect();
        let mut variants = std::collections::HashMap::with_capacity(codes.len() * 2);
        for code in &codes {
            variants.insert(code.to_uppercase(), code.clone());
            variants.insert(code.to_uppercase().replace('.', ""), code.clone());
        }
        Ok(Self { codes, variants })
    }
}

impl Icd10FuzzyMatcher {
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold,
            cache: None,
        }
    }
}

impl ResolverStrategy for Icd10FuzzyMatcher {
    fn name(&self) -> &'static str {
        "icd10-fuzzy-matcher"
    }

    fn resolve(
        &mut self,
        store: &CodeStore,
        conflict: &MappingConflict,
    ) -> Result<Option<Outcome>> {
        if conflict.reason != ConflictReason::TargetNotFound
            || Vocabulary::from_system_id(&conflict.target_system) != Some(Vocabulary::Icd10)
        {
            return Ok(None);
        }
        if self.cache.is_none() {
            self.cache = Some(Icd10Cache::build(store)?);
        }
        let cache = self.cache.as_ref().unwrap();

        let raw = conflict.target_code.trim().to_uppercase();
        let normalized = format_icd10_code(&raw);

        // Separator-placement mismatches resolve exactly.
        for candidate in [raw.as_str(), normalized.as_str()] {
            if let Some(canonical) = cache.variants.get(&candidate.replace('.', "")) {
                return Ok(Some(Outcome::Resolved {
                    resolved_code: Some(canonical.clone()),
                    resolution: format!(
                        "Fuzzy matched '{}' to '{}' (similarity 1.00)",
                        conflict.target_code, canonical
                    ),
                    placeholder: None,
                }));
            }
        }

        let prefix: String = normalized.chars().take(3).collect();
        let mut candidates: Vec<&String> = cache
            .codes
            .iter()
            .filter(|c| c.starts_with(&prefix))
            .filter(|c| c.len().abs_diff(normalized.len()) <= 2)
            .collect();
        if candidates.is_empty() {
            // No category match: fall back to a capped length-based scan.
            candidates = cache
                .codes
                .iter()
                .filter(|c| c.len().abs_diff(normalized.len()) <= 1)
                .take(ResolutionConfig::FALLBACK_CANDIDATE_LIMIT)
                .collect();
        }

        let best = candidates
            .into_iter()
            .map(|c| (normalized_levenshtein(&normalized, c), c))
            .filter(|(score, _)| *score >= self.threshold)
            .max_by(|a, b| a.0.total_cmp(&b.0));

        Ok(best.map(|(score, code)| Outcome::Resolved {
            resolved_code: Some(code.clone()),
            resolution: format!(
                "Fuzzy matched '{}' to '{}' (similarity {:.2})",
                conflict.target_code, code, score
            ),
            placeholder: None,
        }))
    }
}

/// Last-resort strategy: synthesize an inactive code record for the
/// missing code and resolve the conflict against it. Pollutes the store
/// with non-authoritative entries, so it is opt-in and never part of the
/// default chain.
pub struct PlaceholderCreator;

impl ResolverStrategy for PlaceholderCreator {
    fn name(&self) -> &'static str {
        "placeholder-creator"
    }

    fn resolve(
        &mut self,
        _store: &CodeStore,
        conflict: &MappingConflict,
    ) -> Result<Option<Outcome>> {
        let (system, code) = match conflict.reason {
            ConflictReason::SourceNotFound => (&conflict.source_system, &conflict.source_code),
            ConflictReason::TargetNotFound => (&conflict.target_system, &conflict.target_code),
        };
        let Some(vocab) = Vocabulary::from_system_id(system) else {
            return Ok(None);
        };
        let record = CodeRecord::new(
            code.clone(),
            format!("Placeholder for unresolved {} code {}", system, code),
        )
        .inactive();
        Ok(Some(Outcome::Resolved {
            resolved_code: Some(code.clone()),
            resolution: format!("Created inactive placeholder record for '{}'", code),
            placeholder: Some((vocab, record)),
        }))
    }
}

/// Aggregate counters for one resolution pass.
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct ResolutionStats {
    pub processed: usize,
    pub resolved: usize,
    pub ignored: usize,
    pub unresolved: usize,
    pub errors: usize,
}

/// Runs the strategy chain over the open-conflict backlog.
pub struct ResolutionEngine {
    strategies: Vec<Box<dyn ResolverStrategy>>,
    limit: Option<usize>,
    dry_run: bool,
    commit_interval: usize,
}

impl ResolutionEngine {
    /// Default chain: invalid-code filter, then the ICD-10 fuzzy matcher,
    /// then (only when enabled) the placeholder creator.
    pub fn new(fuzzy_threshold: f64, create_placeholders: bool) -> Self {
        let mut strategies: Vec<Box<dyn ResolverStrategy>> = vec![
            Box::new(InvalidCodeFilter::new()),
            Box::new(Icd10FuzzyMatcher::new(fuzzy_threshold)),
        ];
        if create_placeholders {
            strategies.push(Box::new(PlaceholderCreator));
        }
        Self::with_strategies(strategies)
    }

    pub fn with_strategies(strategies: Vec<Box<dyn ResolverStrategy>>) -> Self {
        Self {
            strategies,
            limit: None,
            dry_run: false,
            commit_interval: ResolutionConfig::DEFAULT_COMMIT_INTERVAL,
        }
    }

    /// Cap how many open conflicts this pass processes.
    pub fn limit(mut self, limit: Option<usize>) -> Self {
        self.limit = limit;
        self
    }

    /// Compute outcomes without persisting anything.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn commit_interval(mut self, interval: usize) -> Self {
        self.commit_interval = interval.max(1);
        self
    }

    /// Process the backlog once, first-match-wins per conflict.
    pub fn run(&mut self, store: &CodeStore, cancel: &CancellationToken) -> Result<ResolutionStats> {
        let conflicts = store.open_conflicts(self.limit)?;
        info!(
            conflicts = conflicts.len(),
            dry_run = self.dry_run,
            "Starting resolution pass"
        );

        let mut stats = ResolutionStats::default();
        let mut updates: Vec<ConflictUpdate> = Vec::new();
        for conflict in &conflicts {
            stats.processed += 1;
            match self.resolve_one(store, conflict) {
                Ok(Some(outcome)) => {
                    let update = match outcome {
                        Outcome::Resolved {
                            resolved_code,
                            resolution,
                            placeholder,
                        } => {
                            stats.resolved += 1;
                            if let Some((vocab, record)) = placeholder {
                                if !self.dry_run {
                                    store.insert_codes(vocab, &[record])?;
                                }
                            }
                            ConflictUpdate {
                                id: conflict.id,
                                status: ConflictStatus::Resolved,
                                resolution,
                                resolved_code,
                            }
                        }
                        Outcome::Ignored { resolution } => {
                            stats.ignored += 1;
                            ConflictUpdate {
                                id: conflict.id,
                                status: ConflictStatus::Ignored,
                                resolution,
                                resolved_code: None,
                            }
                        }
                    };
                    updates.push(update);
                }
                Ok(None) => stats.unresolved += 1,
                // One malformed conflict must not halt the backlog.
                Err(e) => {
                    stats.errors += 1;
                    warn!(conflict_id = conflict.id, error = %e, "Resolution strategy failed");
                }
            }

            if updates.len() >= self.commit_interval {
                cancel.check()?;
                if !self.dry_run {
                    store.apply_resolutions(&updates)?;
                }
                updates.clear();
            }
        }
        if !updates.is_empty() && !self.dry_run {
            store.apply_resolutions(&updates)?;
        }

        info!(
            resolved = stats.resolved,
            ignored = stats.ignored,
            unresolved = stats.unresolved,
            errors = stats.errors,
            "Resolution pass complete"
        );
        Ok(stats)
    }

    fn resolve_one(
        &mut self,
        store: &CodeStore,
        conflict: &MappingConflict,
    ) -> Result<Option<Outcome>> {
        for strategy in &mut self.strategies {
            if let Some(outcome) = strategy.resolve(store, conflict)? {
                return Ok(Some(outcome));
            }
        }
        Ok(None)
    }
}
