use crate::{
    conversion_failure, format_timestamp, timestamp_column, to_sql_count, JobRunStore,
    RecoveryStore, StorageError,
};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Started,
    Completed,
    Failed,
}

impl RunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Started => "STARTED",
            RunState::Completed => "COMPLETED",
            RunState::Failed => "FAILED",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value {
            "STARTED" => Some(RunState::Started),
            "COMPLETED" => Some(RunState::Completed),
            "FAILED" => Some(RunState::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRunRecord {
    pub job: String,
    pub run_id: String,
    pub state: RunState,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub message: Option<String>,
    pub report_json: Option<String>,
}

const RUN_COLUMNS: &str =
    "job, run_id, status, started_at, finished_at, message, report_json";

fn run_from_row(row: &Row<'_>) -> Result<JobRunRecord, rusqlite::Error> {
    let status: String = row.get(2)?;
    let state = RunState::parse(&status).ok_or_else(|| {
        conversion_failure(2, StorageError::InvalidValue(format!("run status {status}")))
    })?;
    let finished_at = row
        .get::<_, Option<String>>(4)?
        .map(|value| timestamp_column(4, value))
        .transpose()?;
    Ok(JobRunRecord {
        job: row.get(0)?,
        run_id: row.get(1)?,
        state,
        started_at: timestamp_column(3, row.get(3)?)?,
        finished_at,
        message: row.get(5)?,
        report_json: row.get(6)?,
    })
}

impl JobRunStore for RecoveryStore {
    fn begin_run(
        &self,
        job: &str,
        run_id: &str,
        started_at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        self.conn().execute(
            "
            INSERT INTO job_runs (job, run_id, status, started_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(job, run_id) DO UPDATE SET
                status=excluded.status,
                started_at=excluded.started_at,
                finished_at=NULL,
                message=NULL,
                report_json=NULL
            ",
            params![
                job,
                run_id,
                RunState::Started.as_str(),
                format_timestamp(started_at)
            ],
        )?;
        Ok(())
    }

    fn finish_run(
        &self,
        job: &str,
        run_id: &str,
        state: RunState,
        finished_at: DateTime<Utc>,
        message: Option<&str>,
        report_json: Option<&str>,
    ) -> Result<(), StorageError> {
        let changes = self.conn().execute(
            "
            UPDATE job_runs
            SET status = ?3, finished_at = ?4, message = ?5, report_json = ?6
            WHERE job = ?1 AND run_id = ?2
            ",
            params![
                job,
                run_id,
                state.as_str(),
                format_timestamp(finished_at),
                message,
                report_json
            ],
        )?;
        if changes == 0 {
            return Err(StorageError::InvalidValue(format!(
                "no run {run_id} recorded for job {job}"
            )));
        }
        Ok(())
    }

    fn find_run(&self, job: &str, run_id: &str) -> Result<Option<JobRunRecord>, StorageError> {
        let sql = format!("SELECT {RUN_COLUMNS} FROM job_runs WHERE job = ?1 AND run_id = ?2");
        Ok(self
            .conn()
            .query_row(&sql, params![job, run_id], run_from_row)
            .optional()?)
    }

    fn recent_runs(&self, limit: usize) -> Result<Vec<JobRunRecord>, StorageError> {
        let sql = format!(
            "SELECT {RUN_COLUMNS} FROM job_runs ORDER BY started_at DESC, rowid DESC LIMIT ?1"
        );
        let mut statement = self.conn().prepare(&sql)?;
        let rows = statement.query_map([to_sql_count(limit)], run_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}
