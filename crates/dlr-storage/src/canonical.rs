use crate::{
    conversion_failure, format_timestamp, from_sql_count, timestamp_column, CanonicalStore,
    RecoveryStore, StorageError,
};
use chrono::{DateTime, Utc};
use dlr_core::{ActivityRecord, ActivityType};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::collections::BTreeSet;

// Stays under SQLite's bound-parameter limit.
const KEY_LOOKUP_BATCH: usize = 500;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredActivity {
    pub id: i64,
    pub record: ActivityRecord,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn activity_from_row(row: &Row<'_>) -> Result<StoredActivity, rusqlite::Error> {
    let activity_type: String = row.get(5)?;
    let activity_type = activity_type
        .parse::<ActivityType>()
        .map_err(|err| conversion_failure(5, StorageError::InvalidValue(err)))?;
    Ok(StoredActivity {
        id: row.get(0)?,
        record: ActivityRecord {
            message_key: row.get(1)?,
            member_id: row.get(2)?,
            post_id: row.get(3)?,
            comment_id: row.get(4)?,
            activity_type,
        },
        created_at: timestamp_column(6, row.get(6)?)?,
        updated_at: timestamp_column(7, row.get(7)?)?,
    })
}

fn write_activity(
    conn: &Connection,
    record: &ActivityRecord,
    now: DateTime<Utc>,
) -> Result<(), StorageError> {
    let now = format_timestamp(now);
    if record.has_message_key() {
        conn.execute(
            "
            INSERT INTO member_activities (
                message_key,
                member_id,
                post_id,
                comment_id,
                activity_type,
                created_at,
                updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
            ON CONFLICT(message_key) DO UPDATE SET
                member_id=excluded.member_id,
                post_id=excluded.post_id,
                comment_id=excluded.comment_id,
                activity_type=excluded.activity_type,
                updated_at=excluded.updated_at
            ",
            params![
                record.message_key,
                record.member_id,
                record.post_id,
                record.comment_id,
                record.activity_type.as_str(),
                now,
            ],
        )?;
    } else {
        conn.execute(
            "
            INSERT INTO member_activities (
                message_key,
                member_id,
                post_id,
                comment_id,
                activity_type,
                created_at,
                updated_at
            ) VALUES (NULL, ?1, ?2, ?3, ?4, ?5, ?5)
            ",
            params![
                record.member_id,
                record.post_id,
                record.comment_id,
                record.activity_type.as_str(),
                now,
            ],
        )?;
    }
    Ok(())
}

impl RecoveryStore {
    pub fn find_activity_by_key(&self, key: &str) -> Result<Option<StoredActivity>, StorageError> {
        Ok(self
            .conn()
            .query_row(
                "
                SELECT id, message_key, member_id, post_id, comment_id, activity_type,
                       created_at, updated_at
                FROM member_activities
                WHERE message_key = ?1
                ",
                [key],
                activity_from_row,
            )
            .optional()?)
    }
}

impl CanonicalStore for RecoveryStore {
    fn upsert(&self, record: &ActivityRecord, now: DateTime<Utc>) -> Result<(), StorageError> {
        write_activity(self.conn(), record, now)
    }

    fn upsert_all(
        &self,
        records: &[ActivityRecord],
        now: DateTime<Utc>,
    ) -> Result<usize, StorageError> {
        let tx = self.conn().unchecked_transaction()?;
        for record in records {
            write_activity(&tx, record, now)?;
        }
        tx.commit()?;
        Ok(records.len())
    }

    fn find_existing_keys(&self, keys: &[String]) -> Result<BTreeSet<String>, StorageError> {
        let mut existing = BTreeSet::new();
        for batch in keys.chunks(KEY_LOOKUP_BATCH) {
            let placeholders = vec!["?"; batch.len()].join(", ");
            let mut statement = self.conn().prepare(&format!(
                "SELECT message_key FROM member_activities WHERE message_key IN ({placeholders})"
            ))?;
            let rows = statement.query_map(params_from_iter(batch), |row| row.get(0))?;
            for key in rows {
                existing.insert(key?);
            }
        }
        Ok(existing)
    }

    fn activity_count(&self) -> Result<usize, StorageError> {
        let count: i64 = self
            .conn()
            .query_row("SELECT COUNT(*) FROM member_activities", [], |row| row.get(0))?;
        Ok(from_sql_count(count))
    }
}
