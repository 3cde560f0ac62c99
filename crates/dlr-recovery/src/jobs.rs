use crate::engine::{ChunkEngine, RunReport};
use crate::error::RecoveryError;
use crate::guards::{FileStalenessGuard, StoreBacklogGuard};
use crate::housekeeping::{cleanup_completed_files, sweep_stale_editing};
use crate::run_lock::JobRunLock;
use crate::sinks::{CanonicalSink, StagingSink};
use crate::sources::{FileSource, QueueSource, StagingSource, LISTENER_LANE};
use crate::transforms::{CanonicalTransform, StagingTransform};
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use dlr_core::StagingArea;
use dlr_storage::{CanonicalStore, JobRunStore, QueueStore, RunState, StagingStore};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobKind {
    PublisherQueueToStaging,
    QueueSnapshotToCanonical,
    QueueSnapshotStaleRecovery,
    ListenerQueueToCanonical,
    ListenerFileToStaging,
    ListenerStagingToCanonical,
    ListenerDeadLetterToCanonical,
    PublisherDeadLetterToCanonical,
    RemoteCallDeadLetterToCanonical,
    CompletedFileCleanup,
    EditingFileSweep,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobDefinition {
    pub name: &'static str,
    pub kind: JobKind,
    pub source: &'static str,
    pub sink: &'static str,
    pub default_chunk_size: usize,
}

const JOBS: [JobDefinition; 11] = [
    JobDefinition {
        name: "publisher-queue-to-staging",
        kind: JobKind::PublisherQueueToStaging,
        source: "queue lanes per event category (single pass)",
        sink: "staging queue_snapshot",
        default_chunk_size: 30,
    },
    JobDefinition {
        name: "queue-snapshot-to-canonical",
        kind: JobKind::QueueSnapshotToCanonical,
        source: "staging queue_snapshot (backlog guarded)",
        sink: "canonical upsert",
        default_chunk_size: 10,
    },
    JobDefinition {
        name: "queue-snapshot-stale-recovery",
        kind: JobKind::QueueSnapshotStaleRecovery,
        source: "stale staging queue_snapshot",
        sink: "canonical upsert",
        default_chunk_size: 10,
    },
    JobDefinition {
        name: "listener-queue-to-canonical",
        kind: JobKind::ListenerQueueToCanonical,
        source: "queue lane listener (drained)",
        sink: "canonical upsert",
        default_chunk_size: 50,
    },
    JobDefinition {
        name: "listener-file-to-staging",
        kind: JobKind::ListenerFileToStaging,
        source: "listener failure files (staleness guarded)",
        sink: "staging listener_envelope",
        default_chunk_size: 10,
    },
    JobDefinition {
        name: "listener-staging-to-canonical",
        kind: JobKind::ListenerStagingToCanonical,
        source: "staging listener_envelope",
        sink: "canonical key prefilter + upsert",
        default_chunk_size: 30,
    },
    JobDefinition {
        name: "listener-deadletter-to-canonical",
        kind: JobKind::ListenerDeadLetterToCanonical,
        source: "staging listener_dead_letter",
        sink: "canonical upsert",
        default_chunk_size: 50,
    },
    JobDefinition {
        name: "publisher-deadletter-to-canonical",
        kind: JobKind::PublisherDeadLetterToCanonical,
        source: "staging publisher_dead_letter",
        sink: "canonical upsert",
        default_chunk_size: 50,
    },
    JobDefinition {
        name: "remote-call-deadletter-to-canonical",
        kind: JobKind::RemoteCallDeadLetterToCanonical,
        source: "staging remote_call_dead_letter",
        sink: "canonical insert",
        default_chunk_size: 50,
    },
    JobDefinition {
        name: "completed-file-cleanup",
        kind: JobKind::CompletedFileCleanup,
        source: "completed listener failure files",
        sink: "delete",
        default_chunk_size: 50,
    },
    JobDefinition {
        name: "editing-file-sweep",
        kind: JobKind::EditingFileSweep,
        source: "stale editing listener failure files",
        sink: "rename to pending",
        default_chunk_size: 50,
    },
];

#[derive(Debug, Clone)]
pub struct JobRegistry {
    jobs: Vec<JobDefinition>,
}

impl JobRegistry {
    pub fn standard() -> Self {
        Self {
            jobs: JOBS.to_vec(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&JobDefinition> {
        self.jobs.iter().find(|job| job.name == name)
    }

    pub fn jobs(&self) -> &[JobDefinition] {
        &self.jobs
    }
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryThresholds {
    pub max_editing_files: usize,
    pub max_backlog_records: usize,
    pub stale_hours: i64,
    pub completed_retention_days: i64,
    pub editing_stale_minutes: i64,
}

impl Default for RecoveryThresholds {
    fn default() -> Self {
        Self {
            max_editing_files: crate::guards::DEFAULT_MAX_EDITING_FILES,
            max_backlog_records: crate::guards::DEFAULT_MAX_BACKLOG_RECORDS,
            stale_hours: 5,
            completed_retention_days: 7,
            editing_stale_minutes: 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoverySettings {
    pub listener_failure_dir: PathBuf,
    pub lock_dir: PathBuf,
    pub thresholds: RecoveryThresholds,
    pub chunk_sizes: BTreeMap<String, usize>,
}

impl RecoverySettings {
    pub fn new(listener_failure_dir: impl Into<PathBuf>, lock_dir: impl Into<PathBuf>) -> Self {
        Self {
            listener_failure_dir: listener_failure_dir.into(),
            lock_dir: lock_dir.into(),
            thresholds: RecoveryThresholds::default(),
            chunk_sizes: BTreeMap::new(),
        }
    }
}

/// What the trigger passes in for one run. Unset fields fall back to the
/// settings, then to the registry defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobParameters {
    pub requested_at: DateTime<Utc>,
    pub run_id: Option<String>,
    pub chunk_size: Option<usize>,
    pub retention_days: Option<i64>,
    pub stale_hours: Option<i64>,
    pub editing_stale_minutes: Option<i64>,
    pub failure_dir: Option<PathBuf>,
}

impl JobParameters {
    pub fn at(requested_at: DateTime<Utc>) -> Self {
        Self {
            requested_at,
            run_id: None,
            chunk_size: None,
            retention_days: None,
            stale_hours: None,
            editing_stale_minutes: None,
            failure_dir: None,
        }
    }

    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = Some(chunk_size);
        self
    }

    pub fn run_id(&self) -> String {
        self.run_id.clone().unwrap_or_else(|| {
            self.requested_at
                .to_rfc3339_opts(SecondsFormat::Millis, true)
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobOutcome {
    pub job: String,
    pub run_id: String,
    pub status: JobStatus,
    pub report: RunReport,
    pub message: Option<String>,
}

impl JobOutcome {
    pub fn is_completed(&self) -> bool {
        self.status == JobStatus::Completed
    }
}

pub struct JobRunner<'a, S> {
    store: &'a S,
    registry: JobRegistry,
    settings: RecoverySettings,
}

impl<'a, S> JobRunner<'a, S>
where
    S: QueueStore + StagingStore + CanonicalStore + JobRunStore,
{
    pub fn new(store: &'a S, settings: RecoverySettings) -> Self {
        Self {
            store,
            registry: JobRegistry::standard(),
            settings,
        }
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    /// Runs one job to COMPLETED or FAILED. Only an unknown job name or a
    /// broken run history comes back as `Err`.
    pub fn run(
        &self,
        job_name: &str,
        params: &JobParameters,
    ) -> Result<JobOutcome, RecoveryError> {
        let definition = *self
            .registry
            .get(job_name)
            .ok_or_else(|| RecoveryError::UnknownJob(job_name.to_string()))?;
        let run_id = params.run_id();
        let now = params.requested_at;

        let lock_path = JobRunLock::path_for(&self.settings.lock_dir, definition.name);
        let _lock = match JobRunLock::try_acquire(&lock_path, &run_id, now) {
            Ok(Some(lock)) => lock,
            Ok(None) => {
                let err = RecoveryError::RunInProgress {
                    job: definition.name.to_string(),
                    path: lock_path,
                };
                warn!(event = "run_in_progress", job = definition.name, run_id = %run_id);
                return Ok(failed(definition.name, &run_id, RunReport::default(), &err));
            }
            Err(err) => {
                let err = RecoveryError::from(err);
                error!(event = "run_lock_failed", job = definition.name, error = %err);
                return Ok(failed(definition.name, &run_id, RunReport::default(), &err));
            }
        };

        if let Some(previous) = self.store.find_run(definition.name, &run_id)? {
            if previous.state == RunState::Completed {
                let err = RecoveryError::RunAlreadyCompleted {
                    job: definition.name.to_string(),
                    run_id: run_id.clone(),
                };
                warn!(event = "run_already_completed", job = definition.name, run_id = %run_id);
                return Ok(failed(definition.name, &run_id, RunReport::default(), &err));
            }
        }

        self.store.begin_run(definition.name, &run_id, now)?;
        info!(event = "run_started", job = definition.name, run_id = %run_id);

        let mut report = RunReport::default();
        let result = self.execute(&definition, &run_id, params, &mut report);

        let report_json = serde_json::to_string(&report).ok();
        let finished_at = Utc::now().max(now);
        let outcome = match result {
            Ok(()) => {
                self.store.finish_run(
                    definition.name,
                    &run_id,
                    RunState::Completed,
                    finished_at,
                    None,
                    report_json.as_deref(),
                )?;
                info!(
                    event = "run_completed",
                    job = definition.name,
                    run_id = %run_id,
                    written = report.written,
                    completed = report.completed,
                    skipped = report.transform_skips
                );
                JobOutcome {
                    job: definition.name.to_string(),
                    run_id,
                    status: JobStatus::Completed,
                    report,
                    message: None,
                }
            }
            Err(err) => {
                let message = err.to_string();
                self.store.finish_run(
                    definition.name,
                    &run_id,
                    RunState::Failed,
                    finished_at,
                    Some(&message),
                    report_json.as_deref(),
                )?;
                error!(event = "run_failed", job = definition.name, run_id = %run_id, error = %err);
                failed(definition.name, &run_id, report, &err)
            }
        };
        Ok(outcome)
    }

    fn chunk_size(
        &self,
        definition: &JobDefinition,
        params: &JobParameters,
    ) -> Result<usize, RecoveryError> {
        let size = params
            .chunk_size
            .or_else(|| self.settings.chunk_sizes.get(definition.name).copied())
            .unwrap_or(definition.default_chunk_size);
        if size == 0 {
            return Err(RecoveryError::InvalidParameter(
                "chunk size must be at least 1".to_string(),
            ));
        }
        Ok(size)
    }

    fn execute(
        &self,
        definition: &JobDefinition,
        run_id: &str,
        params: &JobParameters,
        report: &mut RunReport,
    ) -> Result<(), RecoveryError> {
        let now = params.requested_at;
        let thresholds = &self.settings.thresholds;
        let failure_dir = params
            .failure_dir
            .clone()
            .unwrap_or_else(|| self.settings.listener_failure_dir.clone());
        let chunk_size = self.chunk_size(definition, params)?;
        let engine = ChunkEngine::new(definition.name, run_id, chunk_size);
        let store = self.store;

        match definition.kind {
            JobKind::PublisherQueueToStaging => engine.run(
                &mut QueueSource::per_category(store),
                &StagingTransform,
                &mut StagingSink::new(store, StagingArea::QueueSnapshot),
                now,
                report,
            ),
            JobKind::QueueSnapshotToCanonical => engine.run(
                &mut StagingSource::pending(store, StagingArea::QueueSnapshot)
                    .with_backlog_guard(StoreBacklogGuard::new(thresholds.max_backlog_records)),
                &CanonicalTransform::keyed(),
                &mut CanonicalSink::new(store),
                now,
                report,
            ),
            JobKind::QueueSnapshotStaleRecovery => {
                let stale_hours = params.stale_hours.unwrap_or(thresholds.stale_hours);
                if stale_hours < 0 {
                    return Err(RecoveryError::InvalidParameter(
                        "stale hours must not be negative".to_string(),
                    ));
                }
                let cutoff = Duration::try_hours(stale_hours)
                    .and_then(|window| now.checked_sub_signed(window))
                    .ok_or_else(|| {
                        RecoveryError::InvalidParameter(format!(
                            "stale hours {stale_hours} out of range"
                        ))
                    })?;
                engine.run(
                    &mut StagingSource::older_than(store, StagingArea::QueueSnapshot, cutoff),
                    &CanonicalTransform::keyed(),
                    &mut CanonicalSink::new(store),
                    now,
                    report,
                )
            }
            JobKind::ListenerQueueToCanonical => engine.run(
                &mut QueueSource::draining(store, LISTENER_LANE),
                &CanonicalTransform::keyed(),
                &mut CanonicalSink::new(store),
                now,
                report,
            ),
            JobKind::ListenerFileToStaging => engine.run(
                &mut FileSource::new(
                    failure_dir,
                    FileStalenessGuard::new(thresholds.max_editing_files),
                ),
                &StagingTransform,
                &mut StagingSink::new(store, StagingArea::ListenerEnvelope),
                now,
                report,
            ),
            JobKind::ListenerStagingToCanonical => engine.run(
                &mut StagingSource::pending(store, StagingArea::ListenerEnvelope),
                &CanonicalTransform::keyed(),
                &mut CanonicalSink::with_key_prefilter(store),
                now,
                report,
            ),
            JobKind::ListenerDeadLetterToCanonical => engine.run(
                &mut StagingSource::pending(store, StagingArea::ListenerDeadLetter),
                &CanonicalTransform::keyed(),
                &mut CanonicalSink::new(store),
                now,
                report,
            ),
            JobKind::PublisherDeadLetterToCanonical => engine.run(
                &mut StagingSource::pending(store, StagingArea::PublisherDeadLetter),
                &CanonicalTransform::keyed(),
                &mut CanonicalSink::new(store),
                now,
                report,
            ),
            JobKind::RemoteCallDeadLetterToCanonical => engine.run(
                &mut StagingSource::pending(store, StagingArea::RemoteCallDeadLetter),
                &CanonicalTransform::unkeyed(),
                &mut CanonicalSink::new(store),
                now,
                report,
            ),
            JobKind::CompletedFileCleanup => {
                let retention_days = params
                    .retention_days
                    .unwrap_or(thresholds.completed_retention_days);
                let cleanup =
                    cleanup_completed_files(&failure_dir, retention_days, chunk_size, now)?;
                report.read += cleanup.scanned;
                report.chunks += cleanup.batches;
                report.files_deleted += cleanup.deleted;
                report.files_failed += cleanup.failed;
                Ok(())
            }
            JobKind::EditingFileSweep => {
                let stale_minutes = params
                    .editing_stale_minutes
                    .unwrap_or(thresholds.editing_stale_minutes);
                let sweep = sweep_stale_editing(&failure_dir, stale_minutes, now)?;
                report.read += sweep.scanned;
                report.files_reclaimed += sweep.reclaimed;
                report.quarantined += sweep.quarantined;
                report.files_failed += sweep.failed;
                Ok(())
            }
        }
    }
}

fn failed(job: &str, run_id: &str, report: RunReport, err: &RecoveryError) -> JobOutcome {
    JobOutcome {
        job: job.to_string(),
        run_id: run_id.to_string(),
        status: JobStatus::Failed,
        report,
        message: Some(err.to_string()),
    }
}
