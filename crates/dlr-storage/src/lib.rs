use chrono::{DateTime, SecondsFormat, Utc};
use dlr_core::{ActivityRecord, DeadLetterRecord, StagingArea};
use rusqlite::{Connection, OptionalExtension};
use std::collections::BTreeSet;
use std::path::Path;
use thiserror::Error;

mod canonical;
mod queue;
mod runs;
mod staging;

pub use canonical::StoredActivity;
pub use runs::{JobRunRecord, RunState};

pub const RECOVERY_SCHEMA_VERSION: i64 = 2;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("timestamp parse error: {0}")]
    Timestamp(String),
    #[error("invalid stored value: {0}")]
    InvalidValue(String),
    #[error("unsupported schema version {found}, max supported {supported}")]
    UnsupportedSchemaVersion { found: i64, supported: i64 },
}

/// List-shaped holding area. Messages leave from the head and are pushed
/// back onto the tail.
pub trait QueueStore {
    fn pop_top_n(&self, lane: &str, n: usize) -> Result<Vec<String>, StorageError>;
    fn push_back(&self, lane: &str, message: &str) -> Result<(), StorageError>;
    fn push_back_many(&self, lane: &str, messages: &[String]) -> Result<(), StorageError>;
    fn queue_len(&self, lane: &str) -> Result<usize, StorageError>;
    fn lane_lengths(&self) -> Result<Vec<(String, usize)>, StorageError>;
}

pub trait StagingStore {
    /// Not-completed records, newest first.
    fn find_not_completed(
        &self,
        area: StagingArea,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<DeadLetterRecord>, StorageError>;
    fn find_not_completed_older_than(
        &self,
        area: StagingArea,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<DeadLetterRecord>, StorageError>;
    fn find_by_key(
        &self,
        area: StagingArea,
        key: &str,
    ) -> Result<Vec<DeadLetterRecord>, StorageError>;
    fn count_not_completed(&self, area: StagingArea) -> Result<usize, StorageError>;
    fn save(&self, area: StagingArea, record: &DeadLetterRecord) -> Result<(), StorageError>;
    fn save_all(
        &self,
        area: StagingArea,
        records: &[DeadLetterRecord],
    ) -> Result<(), StorageError>;
}

pub trait CanonicalStore {
    /// Keyed records are find-or-create by key with `created_at` fixed at
    /// insert; unkeyed records are plain inserts.
    fn upsert(&self, record: &ActivityRecord, now: DateTime<Utc>) -> Result<(), StorageError>;
    fn upsert_all(
        &self,
        records: &[ActivityRecord],
        now: DateTime<Utc>,
    ) -> Result<usize, StorageError>;
    fn find_existing_keys(&self, keys: &[String]) -> Result<BTreeSet<String>, StorageError>;
    fn activity_count(&self) -> Result<usize, StorageError>;
}

pub trait JobRunStore {
    fn begin_run(
        &self,
        job: &str,
        run_id: &str,
        started_at: DateTime<Utc>,
    ) -> Result<(), StorageError>;
    fn finish_run(
        &self,
        job: &str,
        run_id: &str,
        state: RunState,
        finished_at: DateTime<Utc>,
        message: Option<&str>,
        report_json: Option<&str>,
    ) -> Result<(), StorageError>;
    fn find_run(&self, job: &str, run_id: &str) -> Result<Option<JobRunRecord>, StorageError>;
    fn recent_runs(&self, limit: usize) -> Result<Vec<JobRunRecord>, StorageError>;
}

pub struct RecoveryStore {
    conn: Connection,
}

impl RecoveryStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        let store = Self { conn };
        store.migrate()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.migrate()?;
        Ok(store)
    }

    pub fn schema_version(&self) -> Result<i64, StorageError> {
        Ok(self
            .conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))?)
    }

    pub fn migrate(&self) -> Result<(), StorageError> {
        let mut current = self.schema_version()?;
        if current > RECOVERY_SCHEMA_VERSION {
            return Err(StorageError::UnsupportedSchemaVersion {
                found: current,
                supported: RECOVERY_SCHEMA_VERSION,
            });
        }

        if current < 1 {
            let sql = include_str!("../migrations/0001_holding_areas.sql");
            self.conn.execute_batch(sql)?;
            self.conn
                .execute("PRAGMA user_version = 1", [])
                .map(|_| ())?;
            current = 1;
        }

        if current < 2 {
            let sql = include_str!("../migrations/0002_job_runs.sql");
            self.conn.execute_batch(sql)?;
            self.conn
                .execute("PRAGMA user_version = 2", [])
                .map(|_| ())?;
        }

        Ok(())
    }

    pub fn table_exists(&self, table_name: &str) -> Result<bool, StorageError> {
        let exists = self
            .conn
            .query_row(
                "
                SELECT 1
                FROM sqlite_master
                WHERE type='table' AND name = ?1
                LIMIT 1
                ",
                [table_name],
                |_| Ok(()),
            )
            .optional()?;
        Ok(exists.is_some())
    }

    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }
}

// Fixed precision keeps the stored text lexicographically ordered.
pub(crate) fn format_timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_timestamp(value: String) -> Result<DateTime<Utc>, StorageError> {
    DateTime::parse_from_rfc3339(&value)
        .map(|timestamp| timestamp.with_timezone(&Utc))
        .map_err(|err| StorageError::Timestamp(err.to_string()))
}

pub(crate) fn timestamp_column(
    index: usize,
    value: String,
) -> Result<DateTime<Utc>, rusqlite::Error> {
    parse_timestamp(value).map_err(|err| conversion_failure(index, err))
}

pub(crate) fn conversion_failure(index: usize, err: StorageError) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(index, rusqlite::types::Type::Text, Box::new(err))
}

pub(crate) fn to_sql_count(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

pub(crate) fn from_sql_count(value: i64) -> usize {
    usize::try_from(value).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn migration_creates_recovery_tables() {
        let db = RecoveryStore::open_in_memory().expect("open db");

        for table in [
            "queue_messages",
            "staging_records",
            "member_activities",
            "job_runs",
        ] {
            assert!(db.table_exists(table).expect("table check"));
        }

        assert_eq!(
            db.schema_version().expect("schema version"),
            RECOVERY_SCHEMA_VERSION
        );
    }

    #[test]
    fn reopening_file_database_keeps_schema() {
        let file = NamedTempFile::new().expect("temp db");
        {
            let db = RecoveryStore::open(file.path()).expect("open db");
            db.push_back("POST", "{}").expect("push");
        }
        let db = RecoveryStore::open(file.path()).expect("reopen db");
        assert_eq!(db.queue_len("POST").expect("len"), 1);
        assert_eq!(
            db.schema_version().expect("schema version"),
            RECOVERY_SCHEMA_VERSION
        );
    }

    #[test]
    fn newer_schema_is_rejected() {
        let file = NamedTempFile::new().expect("temp db");
        {
            let conn = Connection::open(file.path()).expect("raw open");
            conn.execute("PRAGMA user_version = 9", [])
                .expect("bump version");
        }
        let err = RecoveryStore::open(file.path())
            .err()
            .expect("newer schema must fail");
        assert!(matches!(
            err,
            StorageError::UnsupportedSchemaVersion { found: 9, .. }
        ));
    }

    #[test]
    fn timestamps_sort_as_text() {
        let early = DateTime::parse_from_rfc3339("2026-02-23T09:00:00Z")
            .expect("parse")
            .with_timezone(&Utc);
        let late = early + chrono::Duration::milliseconds(1500);
        assert!(format_timestamp(early) < format_timestamp(late));
        assert_eq!(
            parse_timestamp(format_timestamp(late)).expect("roundtrip"),
            late
        );
    }
}
