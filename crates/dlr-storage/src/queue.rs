use crate::{
    format_timestamp, from_sql_count, to_sql_count, QueueStore, RecoveryStore, StorageError,
};
use chrono::Utc;
use rusqlite::params;

impl QueueStore for RecoveryStore {
    fn pop_top_n(&self, lane: &str, n: usize) -> Result<Vec<String>, StorageError> {
        if n == 0 {
            return Ok(Vec::new());
        }
        let tx = self.conn().unchecked_transaction()?;
        let popped = {
            let mut statement = tx.prepare(
                "
                SELECT id, payload
                FROM queue_messages
                WHERE lane = ?1
                ORDER BY id ASC
                LIMIT ?2
                ",
            )?;
            let rows = statement.query_map(params![lane, to_sql_count(n)], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
            })?;
            rows.collect::<Result<Vec<_>, _>>()?
        };
        for (id, _) in &popped {
            tx.execute("DELETE FROM queue_messages WHERE id = ?1", [id])?;
        }
        tx.commit()?;
        Ok(popped.into_iter().map(|(_, payload)| payload).collect())
    }

    fn push_back(&self, lane: &str, message: &str) -> Result<(), StorageError> {
        self.conn().execute(
            "INSERT INTO queue_messages (lane, payload, enqueued_at) VALUES (?1, ?2, ?3)",
            params![lane, message, format_timestamp(Utc::now())],
        )?;
        Ok(())
    }

    fn push_back_many(&self, lane: &str, messages: &[String]) -> Result<(), StorageError> {
        let tx = self.conn().unchecked_transaction()?;
        let enqueued_at = format_timestamp(Utc::now());
        for message in messages {
            tx.execute(
                "INSERT INTO queue_messages (lane, payload, enqueued_at) VALUES (?1, ?2, ?3)",
                params![lane, message, enqueued_at],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    fn queue_len(&self, lane: &str) -> Result<usize, StorageError> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM queue_messages WHERE lane = ?1",
            [lane],
            |row| row.get(0),
        )?;
        Ok(from_sql_count(count))
    }

    fn lane_lengths(&self) -> Result<Vec<(String, usize)>, StorageError> {
        let mut statement = self.conn().prepare(
            "
            SELECT lane, COUNT(*)
            FROM queue_messages
            GROUP BY lane
            ORDER BY lane ASC
            ",
        )?;
        let rows = statement.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, from_sql_count(row.get(1)?)))
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pop_takes_from_head_and_push_appends_to_tail() {
        let db = RecoveryStore::open_in_memory().expect("open db");
        for message in ["a", "b", "c"] {
            db.push_back("POST", message).expect("push");
        }
        db.push_back("COMMENT", "x").expect("push other lane");

        assert_eq!(db.pop_top_n("POST", 2).expect("pop"), vec!["a", "b"]);
        db.push_back("POST", "a").expect("re-push");
        assert_eq!(db.pop_top_n("POST", 10).expect("pop"), vec!["c", "a"]);
        assert!(db.pop_top_n("POST", 10).expect("pop empty").is_empty());
        assert_eq!(db.queue_len("COMMENT").expect("len"), 1);
    }

    #[test]
    fn push_back_many_keeps_order() {
        let db = RecoveryStore::open_in_memory().expect("open db");
        db.push_back("listener", "first").expect("push");
        db.push_back_many("listener", &["second".to_string(), "third".to_string()])
            .expect("push many");
        assert_eq!(
            db.pop_top_n("listener", 5).expect("pop"),
            vec!["first", "second", "third"]
        );
    }

    #[test]
    fn lane_lengths_groups_by_lane() {
        let db = RecoveryStore::open_in_memory().expect("open db");
        db.push_back("POST", "a").expect("push");
        db.push_back("POST", "b").expect("push");
        db.push_back("COMMENT", "c").expect("push");
        assert_eq!(
            db.lane_lengths().expect("lengths"),
            vec![("COMMENT".to_string(), 1), ("POST".to_string(), 2)]
        );
        assert!(db.pop_top_n("POST", 0).expect("pop zero").is_empty());
    }
}
