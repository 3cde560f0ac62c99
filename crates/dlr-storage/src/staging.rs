use crate::{
    format_timestamp, from_sql_count, timestamp_column, to_sql_count, RecoveryStore,
    StagingStore, StorageError,
};
use chrono::{DateTime, Utc};
use dlr_core::{CategoryTag, DeadLetterRecord, StagingArea};
use rusqlite::{params, Connection, Row};

const RECORD_COLUMNS: &str = "
    id, message_key, payload, category, is_completed, is_editing,
    published_at, created_at, updated_at
";

fn record_from_row(row: &Row<'_>) -> Result<DeadLetterRecord, rusqlite::Error> {
    let published_at = row
        .get::<_, Option<String>>(6)?
        .map(|value| timestamp_column(6, value))
        .transpose()?;
    Ok(DeadLetterRecord {
        id: row.get(0)?,
        message_key: row.get(1)?,
        payload: row.get(2)?,
        category: row
            .get::<_, Option<String>>(3)?
            .map(|value| CategoryTag::parse(&value)),
        is_completed: row.get::<_, i64>(4)? != 0,
        is_editing: row.get::<_, i64>(5)? != 0,
        published_at,
        created_at: timestamp_column(7, row.get(7)?)?,
        updated_at: timestamp_column(8, row.get(8)?)?,
    })
}

fn save_record(
    conn: &Connection,
    area: StagingArea,
    record: &DeadLetterRecord,
) -> Result<(), StorageError> {
    if record.payload.is_empty() {
        return Err(StorageError::InvalidValue(format!(
            "staging record {} has an empty payload",
            record.id
        )));
    }
    conn.execute(
        "
        INSERT INTO staging_records (
            id,
            area,
            message_key,
            payload,
            category,
            is_completed,
            is_editing,
            published_at,
            created_at,
            updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
        ON CONFLICT(id) DO UPDATE SET
            message_key=excluded.message_key,
            payload=excluded.payload,
            category=excluded.category,
            is_completed=excluded.is_completed,
            is_editing=excluded.is_editing,
            published_at=excluded.published_at,
            updated_at=excluded.updated_at
        ",
        params![
            record.id,
            area.as_str(),
            record.message_key,
            record.payload,
            record.category.as_ref().map(|tag| tag.as_str().to_string()),
            i64::from(record.is_completed),
            i64::from(record.is_editing),
            record.published_at.map(format_timestamp),
            format_timestamp(record.created_at),
            format_timestamp(record.updated_at),
        ],
    )?;
    Ok(())
}

impl StagingStore for RecoveryStore {
    fn find_not_completed(
        &self,
        area: StagingArea,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<DeadLetterRecord>, StorageError> {
        let sql = format!(
            "
            SELECT {RECORD_COLUMNS}
            FROM staging_records
            WHERE area = ?1 AND is_completed = 0
            ORDER BY created_at DESC, rowid DESC
            LIMIT ?2 OFFSET ?3
            "
        );
        let mut statement = self.conn().prepare(&sql)?;
        let rows = statement.query_map(
            params![area.as_str(), to_sql_count(limit), to_sql_count(offset)],
            record_from_row,
        )?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn find_not_completed_older_than(
        &self,
        area: StagingArea,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<DeadLetterRecord>, StorageError> {
        let sql = format!(
            "
            SELECT {RECORD_COLUMNS}
            FROM staging_records
            WHERE area = ?1 AND is_completed = 0 AND created_at < ?2
            ORDER BY created_at DESC, rowid DESC
            "
        );
        let mut statement = self.conn().prepare(&sql)?;
        let rows = statement.query_map(
            params![area.as_str(), format_timestamp(cutoff)],
            record_from_row,
        )?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn find_by_key(
        &self,
        area: StagingArea,
        key: &str,
    ) -> Result<Vec<DeadLetterRecord>, StorageError> {
        let sql = format!(
            "
            SELECT {RECORD_COLUMNS}
            FROM staging_records
            WHERE area = ?1 AND message_key = ?2
            ORDER BY created_at DESC, rowid DESC
            "
        );
        let mut statement = self.conn().prepare(&sql)?;
        let rows = statement.query_map(params![area.as_str(), key], record_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn count_not_completed(&self, area: StagingArea) -> Result<usize, StorageError> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM staging_records WHERE area = ?1 AND is_completed = 0",
            [area.as_str()],
            |row| row.get(0),
        )?;
        Ok(from_sql_count(count))
    }

    fn save(&self, area: StagingArea, record: &DeadLetterRecord) -> Result<(), StorageError> {
        save_record(self.conn(), area, record)
    }

    fn save_all(
        &self,
        area: StagingArea,
        records: &[DeadLetterRecord],
    ) -> Result<(), StorageError> {
        let tx = self.conn().unchecked_transaction()?;
        for record in records {
            save_record(&tx, area, record)?;
        }
        tx.commit()?;
        Ok(())
    }
}
