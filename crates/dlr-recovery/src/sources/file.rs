use crate::error::RecoveryError;
use crate::file_lock::{release_or_quarantine, scan, DeadLetterFile};
use crate::guards::FileStalenessGuard;
use crate::pipeline::{RecoverySource, ReleaseOutcome, RollbackSummary, SourceChunk};
use chrono::{DateTime, Utc};
use dlr_core::{DeadLetterRecord, FileLockEvent, FileLockState};
use std::collections::VecDeque;
use std::path::PathBuf;
use tracing::{debug, error, info};

/// Failure files written by the listener. The pending list is taken once,
/// after the staleness guard passes; content is read only after checkout.
pub struct FileSource {
    dir: PathBuf,
    guard: FileStalenessGuard,
    pending: VecDeque<DeadLetterFile>,
    listed: bool,
}

impl FileSource {
    pub fn new(dir: impl Into<PathBuf>, guard: FileStalenessGuard) -> Self {
        Self {
            dir: dir.into(),
            guard,
            pending: VecDeque::new(),
            listed: false,
        }
    }

    fn list_pending(&mut self) -> Result<(), RecoveryError> {
        if self.listed {
            return Ok(());
        }
        let pending = scan(&self.dir, FileLockState::Pending)?;
        info!(
            event = "pending_files_listed",
            dir = %self.dir.display(),
            count = pending.len()
        );
        self.pending = pending.into();
        self.listed = true;
        Ok(())
    }
}

impl RecoverySource for FileSource {
    type Handle = DeadLetterFile;

    fn area(&self) -> String {
        self.dir.display().to_string()
    }

    fn preflight(&mut self) -> Result<(), RecoveryError> {
        self.guard.check(&self.dir)?;
        self.list_pending()
    }

    fn next_chunk(&mut self, size: usize) -> Result<SourceChunk<DeadLetterFile>, RecoveryError> {
        self.list_pending()?;
        let take = size.min(self.pending.len());
        let items = self.pending.drain(..take).collect();
        Ok(SourceChunk {
            items,
            exhausted: self.pending.is_empty(),
        })
    }

    fn checkout(
        &mut self,
        handle: DeadLetterFile,
    ) -> Result<Option<DeadLetterFile>, RecoveryError> {
        match handle.transition(FileLockEvent::Checkout) {
            Ok(editing) => Ok(Some(editing)),
            Err(err) => {
                debug!(
                    event = "file_checkout_conflict",
                    file = %handle.path().display(),
                    error = %err
                );
                Ok(None)
            }
        }
    }

    fn load(
        &self,
        handle: &DeadLetterFile,
        now: DateTime<Utc>,
    ) -> Result<DeadLetterRecord, RecoveryError> {
        let payload = std::fs::read_to_string(handle.path())?;
        let mut record = DeadLetterRecord::new(None, payload, None, now);
        record.is_editing = true;
        Ok(record)
    }

    fn release(&mut self, handle: DeadLetterFile) -> Result<ReleaseOutcome, RecoveryError> {
        release_or_quarantine(&handle)
    }

    fn mark_completed(
        &mut self,
        handle: DeadLetterFile,
        _now: DateTime<Utc>,
    ) -> Result<(), RecoveryError> {
        handle.transition(FileLockEvent::Commit)?;
        Ok(())
    }

    fn rollback(&mut self, handles: Vec<DeadLetterFile>) -> RollbackSummary {
        let mut summary = RollbackSummary::default();
        for handle in handles {
            match release_or_quarantine(&handle) {
                Ok(ReleaseOutcome::Restored) => summary.restored += 1,
                Ok(ReleaseOutcome::Quarantined) => summary.quarantined += 1,
                Err(err) => {
                    summary.failed += 1;
                    error!(
                        event = "file_rollback_failed",
                        file = %handle.path().display(),
                        error = %err
                    );
                }
            }
        }
        summary
    }

    // Never renamed, so still pending on disk.
    fn return_unclaimed(&mut self, handles: Vec<DeadLetterFile>) -> RollbackSummary {
        RollbackSummary {
            restored: handles.len(),
            ..RollbackSummary::default()
        }
    }
}
