//! Conflict tracker.
//!
//! Mappers call [`ConflictTracker::track`] inline whenever a crosswalk row
//! references a code absent from its vocabulary. Referential-integrity
//! failures are first-class data here, not errors: at production scale they
//! number in the tens of thousands per run.

use std::collections::HashSet;

use tracing::debug;

use crate::config::BatchConfig;
use crate::error::Result;
use crate::models::{ConflictReason, NewConflict, Vocabulary};
use crate::store::CodeStore;

/// Buffers conflict rows and flushes them in batches. The store's
/// uniqueness key makes reruns idempotent; the in-memory seen-set just
/// avoids pointless writes within one run.
pub struct ConflictTracker<'a> {
    store: &'a CodeStore,
    seen: HashSet<(Vocabulary, Vocabulary, String, String, ConflictReason)>,
    buf: Vec<NewConflict>,
    tracked: usize,
}

impl<'a> ConflictTracker<'a> {
    pub fn new(store: &'a CodeStore) -> Self {
        Self {
            store,
            seen: HashSet::new(),
            buf: Vec::new(),
            tracked: 0,
        }
    }

    /// Record one missing-reference conflict with `status = open`.
    /// Duplicate tuples within the run are dropped silently.
    pub fn track(&mut self, conflict: NewConflict) -> Result<()> {
        let key = (
            conflict.source_system,
            conflict.target_system,
            conflict.source_code.clone(),
            conflict.target_code.clone(),
            conflict.reason,
        );
        if !self.seen.insert(key) {
            return Ok(());
        }
        self.buf.push(conflict);
        if self.buf.len() >= BatchConfig::INSERT_BATCH {
            self.flush()?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.tracked += self.store.insert_conflicts(&self.buf)?;
        self.buf.clear();
        Ok(())
    }

    /// Flush remaining conflicts and return how many rows were newly
    /// written (duplicates from earlier runs are not counted).
    pub fn finish(mut self) -> Result<usize> {
        if !self.buf.is_empty() {
            self.flush()?;
        }
        if self.tracked > 0 {
            debug!(conflicts = self.tracked, "Conflicts recorded");
        }
        Ok(self.tracked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ConflictStatus;

    fn conflict(target_code: &str) -> NewConflict {
        NewConflict {
            source_system: Vocabulary::Snomed,
            target_system: Vocabulary::Icd10,
            source_code: "44054006".into(),
            target_code: target_code.into(),
            source_description: Some("Type 2 diabetes mellitus".into()),
            reason: ConflictReason::TargetNotFound,
            details: None,
        }
    }

    #[test]
    fn test_deduplicates_within_run() {
        let store = CodeStore::open_in_memory().unwrap();
        let mut tracker = ConflictTracker::new(&store);
        tracker.track(conflict("E99.99")).unwrap();
        tracker.track(conflict("E99.99")).unwrap();
        tracker.track(conflict("Z99.99")).unwrap();
        assert_eq!(tracker.finish().unwrap(), 2);
        assert_eq!(store.conflict_count(ConflictStatus::Open).unwrap(), 2);
    }

    #[test]
    fn test_same_pair_with_different_reasons_is_not_a_duplicate() {
        let store = CodeStore::open_in_memory().unwrap();
        let mut tracker = ConflictTracker::new(&store);
        tracker.track(conflict("E99.99")).unwrap();
        let mut other = conflict("E99.99");
        other.reason = ConflictReason::SourceNotFound;
        tracker.track(other).unwrap();
        assert_eq!(tracker.finish().unwrap(), 2);
    }

    #[test]
    fn test_idempotent_across_runs() {
        let store = CodeStore::open_in_memory().unwrap();
        for _ in 0..2 {
            let mut tracker = ConflictTracker::new(&store);
            tracker.track(conflict("E99.99")).unwrap();
            tracker.finish().unwrap();
        }
        assert_eq!(store.conflict_count(ConflictStatus::Open).unwrap(), 1);
    }
}
