//! SQLite-backed code store.
//!
//! One database holds every vocabulary's code table, every mapping table,
//! and the conflict log. All writes are batched and transactional; inserts
//! use `OR IGNORE` so reruns over unchanged sources are no-ops.
//!
//! Thread-safe via an internal mutex on the connection.

use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::debug;

use crate::error::{CodemapError, Result};
use crate::models::{
    CodeRecord, ConflictReason, ConflictStatus, ConflictUpdate, MappingConflict, MappingKind,
    MappingRecord, NewConflict, Vocabulary,
};

/// Handle to the pipeline's SQLite store.
pub struct CodeStore {
    conn: Arc<Mutex<Connection>>,
}

impl CodeStore {
    /// Open (or create) the store at the given database path.
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref();

        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| CodemapError::Io {
                message: format!("Failed to create database directory: {}", e),
                path: Some(parent.to_path_buf()),
                source: Some(e),
            })?;
        }

        let conn = Connection::open(db_path).map_err(|e| CodemapError::Database {
            message: format!("Failed to open database: {}", e),
            source: Some(e),
        })?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(|e| CodemapError::Database {
                message: format!("Failed to set pragmas: {}", e),
                source: Some(e),
            })?;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Open an in-memory store. Used by tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| CodemapError::Database {
            message: format!("Failed to open in-memory database: {}", e),
            source: Some(e),
        })?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Run arbitrary SQL against the store. Test hook for setting up
    /// schema-level failure scenarios.
    #[cfg(test)]
    pub(crate) fn execute_raw(&self, sql: &str) -> Result<()> {
        self.lock()?.execute_batch(sql)?;
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|e| CodemapError::Database {
            message: format!("Failed to lock database: {}", e),
            source: None,
        })
    }

    /// Create all tables and indexes if they don't exist.
    fn init_schema(&self) -> Result<()> {
        let conn = self.lock()?;

        let mut ddl = String::new();
        for vocab in Vocabulary::ALL {
            ddl.push_str(&format!(
                r#"
                CREATE TABLE IF NOT EXISTS {table} (
                    code TEXT PRIMARY KEY,
                    description TEXT NOT NULL,
                    extra TEXT,
                    active INTEGER NOT NULL DEFAULT 1,
                    created_at TEXT NOT NULL
                );
                "#,
                table = vocab.table()
            ));
        }
        for kind in MappingKind::ALL {
            ddl.push_str(&format!(
                r#"
                CREATE TABLE IF NOT EXISTS {table} (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    source_code TEXT NOT NULL,
                    target_code TEXT NOT NULL,
                    via_code TEXT,
                    map_rule TEXT,
                    map_priority INTEGER,
                    map_advice TEXT,
                    active INTEGER NOT NULL DEFAULT 1,
                    UNIQUE(source_code, target_code)
                );
                CREATE INDEX IF NOT EXISTS idx_{table}_source
                    ON {table}(source_code);
                "#,
                table = kind.table()
            ));
        }
        ddl.push_str(
            r#"
            CREATE TABLE IF NOT EXISTS mapping_conflicts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                source_system TEXT NOT NULL,
                target_system TEXT NOT NULL,
                source_code TEXT NOT NULL,
                target_code TEXT NOT NULL,
                source_description TEXT,
                reason TEXT NOT NULL,
                details TEXT,
                status TEXT NOT NULL DEFAULT 'open',
                resolution TEXT,
                resolved_code TEXT,
                created_at TEXT NOT NULL,
                resolved_at TEXT,
                UNIQUE(source_system, target_system, source_code, target_code, reason)
            );
            CREATE INDEX IF NOT EXISTS idx_conflict_status
                ON mapping_conflicts(status);
            "#,
        );

        conn.execute_batch(&ddl).map_err(|e| CodemapError::Database {
            message: format!("Failed to initialize schema: {}", e),
            source: Some(e),
        })?;
        Ok(())
    }

    /// Drop every table and recreate the schema. Used by clean mode.
    pub fn wipe(&self) -> Result<()> {
        {
            let conn = self.lock()?;
            let mut ddl = String::new();
            for vocab in Vocabulary::ALL {
                ddl.push_str(&format!("DROP TABLE IF EXISTS {};\n", vocab.table()));
            }
            for kind in MappingKind::ALL {
                ddl.push_str(&format!("DROP TABLE IF EXISTS {};\n", kind.table()));
            }
            ddl.push_str("DROP TABLE IF EXISTS mapping_conflicts;\n");
            conn.execute_batch(&ddl).map_err(|e| CodemapError::Database {
                message: format!("Failed to wipe store: {}", e),
                source: Some(e),
            })?;
        }
        self.init_schema()?;
        debug!("Store wiped and schema recreated");
        Ok(())
    }

    // ── Code records ─────────────────────────────────────────────────────

    /// Bulk insert code records in one transaction, skipping codes that
    /// already exist. Returns the number of rows actually inserted.
    pub fn insert_codes(&self, vocab: Vocabulary, records: &[CodeRecord]) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(|e| CodemapError::Database {
            message: format!("Failed to begin transaction: {}", e),
            source: Some(e),
        })?;

        let now = Utc::now().to_rfc3339();
        let mut inserted = 0;
        {
            let mut stmt = tx.prepare_cached(&format!(
                "INSERT OR IGNORE INTO {} (code, description, extra, active, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                vocab.table()
            ))?;
            for record in records {
                let extra = record
                    .extra
                    .as_ref()
                    .map(|v| serde_json::to_string(v))
                    .transpose()?;
                inserted += stmt.execute(params![
                    record.code,
                    record.description,
                    extra,
                    record.active,
                    now
                ])?;
            }
        }
        tx.commit().map_err(|e| CodemapError::Database {
            message: format!("Failed to commit code batch: {}", e),
            source: Some(e),
        })?;
        Ok(inserted)
    }

    /// Replace the extra-attribute blob of an existing code record.
    /// Returns false if the code does not exist.
    pub fn update_code_extra(
        &self,
        vocab: Vocabulary,
        code: &str,
        extra: &serde_json::Value,
    ) -> Result<bool> {
        let conn = self.lock()?;
        let changed = conn.execute(
            &format!("UPDATE {} SET extra = ?1 WHERE code = ?2", vocab.table()),
            params![serde_json::to_string(extra)?, code],
        )?;
        Ok(changed > 0)
    }

    /// All active codes of a vocabulary, for endpoint resolution.
    ///
    /// Inactive records are deliberately excluded: they never participate
    /// in new mapping computation.
    pub fn code_set(&self, vocab: Vocabulary) -> Result<HashSet<String>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT code FROM {} WHERE active = 1",
            vocab.table()
        ))?;
        let codes = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<HashSet<_>, _>>()?;
        Ok(codes)
    }

    pub fn get_code(&self, vocab: Vocabulary, code: &str) -> Result<Option<CodeRecord>> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                &format!(
                    "SELECT code, description, extra, active FROM {} WHERE code = ?1",
                    vocab.table()
                ),
                params![code],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, bool>(3)?,
                    ))
                },
            )
            .optional()?;

        Ok(row.map(|(code, description, extra, active)| CodeRecord {
            code,
            description,
            extra: extra.and_then(|s| serde_json::from_str(&s).ok()),
            active,
        }))
    }

    /// All code records of a vocabulary (active and inactive).
    pub fn codes(&self, vocab: Vocabulary) -> Result<Vec<CodeRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT code, description, extra, active FROM {} ORDER BY code",
            vocab.table()
        ))?;
        let records = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, bool>(3)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(records
            .into_iter()
            .map(|(code, description, extra, active)| CodeRecord {
                code,
                description,
                extra: extra.and_then(|s| serde_json::from_str(&s).ok()),
                active,
            })
            .collect())
    }

    pub fn code_count(&self, vocab: Vocabulary) -> Result<usize> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", vocab.table()),
            [],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    // ── Mappings ─────────────────────────────────────────────────────────

    /// Bulk insert mapping rows in one transaction, skipping pairs that
    /// already exist. Returns the number of rows actually inserted.
    pub fn insert_mappings(&self, kind: MappingKind, rows: &[MappingRecord]) -> Result<usize> {
        if rows.is_empty() {
            return Ok(0);
        }
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(|e| CodemapError::Database {
            message: format!("Failed to begin transaction: {}", e),
            source: Some(e),
        })?;

        let mut inserted = 0;
        {
            let mut stmt = tx.prepare_cached(&format!(
                "INSERT OR IGNORE INTO {}
                 (source_code, target_code, via_code, map_rule, map_priority, map_advice, active)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1)",
                kind.table()
            ))?;
            for row in rows {
                inserted += stmt.execute(params![
                    row.source_code,
                    row.target_code,
                    row.via_code,
                    row.map_rule,
                    row.map_priority,
                    row.map_advice
                ])?;
            }
        }
        tx.commit().map_err(|e| CodemapError::Database {
            message: format!("Failed to commit mapping batch: {}", e),
            source: Some(e),
        })?;
        Ok(inserted)
    }

    /// All active `(source_code, target_code)` pairs of a mapping table,
    /// in insertion order.
    pub fn mapping_pairs(&self, kind: MappingKind) -> Result<Vec<(String, String)>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT source_code, target_code FROM {} WHERE active = 1 ORDER BY id",
            kind.table()
        ))?;
        let pairs = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(pairs)
    }

    pub fn get_mapping(
        &self,
        kind: MappingKind,
        source_code: &str,
        target_code: &str,
    ) -> Result<Option<MappingRecord>> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                &format!(
                    "SELECT source_code, target_code, via_code, map_rule, map_priority, map_advice
                     FROM {} WHERE source_code = ?1 AND target_code = ?2",
                    kind.table()
                ),
                params![source_code, target_code],
                |row| {
                    Ok(MappingRecord {
                        source_code: row.get(0)?,
                        target_code: row.get(1)?,
                        via_code: row.get(2)?,
                        map_rule: row.get(3)?,
                        map_priority: row.get(4)?,
                        map_advice: row.get(5)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    pub fn mapping_count(&self, kind: MappingKind) -> Result<usize> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", kind.table()),
            [],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    // ── Conflicts ────────────────────────────────────────────────────────

    /// Bulk insert conflict rows in one transaction. The uniqueness key
    /// `(source_system, target_system, source_code, target_code, reason)`
    /// makes reruns idempotent. Returns rows actually inserted.
    pub fn insert_conflicts(&self, conflicts: &[NewConflict]) -> Result<usize> {
        if conflicts.is_empty() {
            return Ok(0);
        }
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(|e| CodemapError::Database {
            message: format!("Failed to begin transaction: {}", e),
            source: Some(e),
        })?;

        let now = Utc::now().to_rfc3339();
        let mut inserted = 0;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT OR IGNORE INTO mapping_conflicts
                 (source_system, target_system, source_code, target_code,
                  source_description, reason, details, status, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'open', ?8)",
            )?;
            for conflict in conflicts {
                inserted += stmt.execute(params![
                    conflict.source_system.system_id(),
                    conflict.target_system.system_id(),
                    conflict.source_code,
                    conflict.target_code,
                    conflict.source_description,
                    conflict.reason.as_str(),
                    conflict.details,
                    now
                ])?;
            }
        }
        tx.commit().map_err(|e| CodemapError::Database {
            message: format!("Failed to commit conflict batch: {}", e),
            source: Some(e),
        })?;
        Ok(inserted)
    }

    fn conflict_from_row(row: &Row<'_>) -> rusqlite::Result<MappingConflict> {
        let reason: String = row.get(6)?;
        let status: String = row.get(8)?;
        Ok(MappingConflict {
            id: row.get(0)?,
            source_system: row.get(1)?,
            target_system: row.get(2)?,
            source_code: row.get(3)?,
            target_code: row.get(4)?,
            source_description: row.get(5)?,
            reason: ConflictReason::parse(&reason).unwrap_or(ConflictReason::TargetNotFound),
            details: row.get(7)?,
            status: ConflictStatus::parse(&status).unwrap_or(ConflictStatus::Open),
            resolution: row.get(9)?,
            resolved_code: row.get(10)?,
            created_at: row.get(11)?,
            resolved_at: row.get(12)?,
        })
    }

    const CONFLICT_COLUMNS: &'static str = "id, source_system, target_system, source_code, \
         target_code, source_description, reason, details, status, resolution, resolved_code, \
         created_at, resolved_at";

    /// Open conflicts in creation order, optionally capped.
    pub fn open_conflicts(&self, limit: Option<usize>) -> Result<Vec<MappingConflict>> {
        let conn = self.lock()?;
        let sql = match limit {
            Some(n) => format!(
                "SELECT {} FROM mapping_conflicts WHERE status = 'open' ORDER BY id LIMIT {}",
                Self::CONFLICT_COLUMNS,
                n
            ),
            None => format!(
                "SELECT {} FROM mapping_conflicts WHERE status = 'open' ORDER BY id",
                Self::CONFLICT_COLUMNS
            ),
        };
        let mut stmt = conn.prepare(&sql)?;
        let conflicts = stmt
            .query_map([], Self::conflict_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(conflicts)
    }

    pub fn get_conflict(&self, id: i64) -> Result<Option<MappingConflict>> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                &format!(
                    "SELECT {} FROM mapping_conflicts WHERE id = ?1",
                    Self::CONFLICT_COLUMNS
                ),
                params![id],
                Self::conflict_from_row,
            )
            .optional()?;
        Ok(row)
    }

    pub fn conflict_count(&self, status: ConflictStatus) -> Result<usize> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM mapping_conflicts WHERE status = ?1",
            params![status.as_str()],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Apply a batch of resolution outcomes in one transaction.
    ///
    /// Only rows still `open` are touched, so a conflict can never skip a
    /// status or be finalized twice. Returns the number of rows updated.
    pub fn apply_resolutions(&self, updates: &[ConflictUpdate]) -> Result<usize> {
        if updates.is_empty() {
            return Ok(0);
        }
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(|e| CodemapError::Database {
            message: format!("Failed to begin transaction: {}", e),
            source: Some(e),
        })?;

        let now = Utc::now().to_rfc3339();
        let mut updated = 0;
        {
            let mut stmt = tx.prepare_cached(
                "UPDATE mapping_conflicts
                 SET status = ?1, resolution = ?2, resolved_code = ?3, resolved_at = ?4
                 WHERE id = ?5 AND status = 'open'",
            )?;
            for update in updates {
                updated += stmt.execute(params![
                    update.status.as_str(),
                    update.resolution,
                    update.resolved_code,
                    now,
                    update.id
                ])?;
            }
        }
        tx.commit().map_err(|e| CodemapError::Database {
            message: format!("Failed to commit resolution batch: {}", e),
            source: Some(e),
        })?;
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> CodeStore {
        CodeStore::open_in_memory().unwrap()
    }

    #[test]
    fn test_insert_codes_is_idempotent() {
        let store = store();
        let records = vec![
            CodeRecord::new("E11.9", "Type 2 diabetes mellitus without complications"),
            CodeRecord::new("I10", "Essential (primary) hypertension"),
        ];

        assert_eq!(store.insert_codes(Vocabulary::Icd10, &records).unwrap(), 2);
        assert_eq!(store.insert_codes(Vocabulary::Icd10, &records).unwrap(), 0);
        assert_eq!(store.code_count(Vocabulary::Icd10).unwrap(), 2);
    }

    #[test]
    fn test_code_set_excludes_inactive() {
        let store = store();
        store
            .insert_codes(
                Vocabulary::Icd10,
                &[
                    CodeRecord::new("A00.0", "Cholera due to Vibrio cholerae 01"),
                    CodeRecord::new("Z99.9", "Dependence on unspecified enabling machine").inactive(),
                ],
            )
            .unwrap();

        let codes = store.code_set(Vocabulary::Icd10).unwrap();
        assert!(codes.contains("A00.0"));
        assert!(!codes.contains("Z99.9"));
        // Inactive records stay available for direct lookup.
        assert!(store.get_code(Vocabulary::Icd10, "Z99.9").unwrap().is_some());
    }

    #[test]
    fn test_code_extra_round_trip() {
        let store = store();
        let record = CodeRecord::new("1049221", "acetaminophen 325 MG Oral Tablet")
            .with_extra(serde_json::json!({"term_type": "SCD", "suppress": "N"}));
        store.insert_codes(Vocabulary::RxNorm, &[record]).unwrap();

        let loaded = store.get_code(Vocabulary::RxNorm, "1049221").unwrap().unwrap();
        assert_eq!(loaded.extra.unwrap()["term_type"], "SCD");
    }

    #[test]
    fn test_insert_mappings_deduplicates() {
        let store = store();
        let rows = vec![
            MappingRecord::new("44054006", "E11.9"),
            MappingRecord::new("44054006", "E11.9"),
            MappingRecord::new("38341003", "I10"),
        ];
        assert_eq!(
            store.insert_mappings(MappingKind::SnomedIcd10, &rows).unwrap(),
            2
        );
        assert_eq!(store.mapping_count(MappingKind::SnomedIcd10).unwrap(), 2);
    }

    #[test]
    fn test_insert_conflicts_idempotent_across_reruns() {
        let store = store();
        let conflict = NewConflict {
            source_system: Vocabulary::Snomed,
            target_system: Vocabulary::Icd10,
            source_code: "44054006".into(),
            target_code: "E99.99".into(),
            source_description: None,
            reason: ConflictReason::TargetNotFound,
            details: Some("ICD-10 code 'E99.99' not in store".into()),
        };

        assert_eq!(store.insert_conflicts(&[conflict.clone()]).unwrap(), 1);
        assert_eq!(store.insert_conflicts(&[conflict]).unwrap(), 0);
        assert_eq!(store.conflict_count(ConflictStatus::Open).unwrap(), 1);
    }

    #[test]
    fn test_apply_resolutions_only_touches_open_rows() {
        let store = store();
        store
            .insert_conflicts(&[NewConflict {
                source_system: Vocabulary::Snomed,
                target_system: Vocabulary::Icd10,
                source_code: "44054006".into(),
                target_code: "E119".into(),
                source_description: None,
                reason: ConflictReason::TargetNotFound,
                details: None,
            }])
            .unwrap();
        let id = store.open_conflicts(None).unwrap()[0].id;

        let update = ConflictUpdate {
            id,
            status: ConflictStatus::Resolved,
            resolution: "Fuzzy matched 'E119' to 'E11.9' (similarity 1.00)".into(),
            resolved_code: Some("E11.9".into()),
        };
        assert_eq!(store.apply_resolutions(&[update.clone()]).unwrap(), 1);
        // Re-applying does nothing: the row is no longer open.
        assert_eq!(store.apply_resolutions(&[update]).unwrap(), 0);

        let resolved = store.get_conflict(id).unwrap().unwrap();
        assert_eq!(resolved.status, ConflictStatus::Resolved);
        assert_eq!(resolved.resolved_code.as_deref(), Some("E11.9"));
        assert!(resolved.resolved_at.is_some());
    }

    #[test]
    fn test_wipe_recreates_empty_schema() {
        let store = store();
        store
            .insert_codes(Vocabulary::Hcc, &[CodeRecord::new("HCC37", "Diabetes")])
            .unwrap();
        store.wipe().unwrap();
        assert_eq!(store.code_count(Vocabulary::Hcc).unwrap(), 0);
    }
}
