use crate::error::RecoveryError;
use crate::file_lock::{scan, DeadLetterFile};
use chrono::{DateTime, Duration, Utc};
use dlr_core::{FileLockEvent, FileLockState};
use std::path::Path;
use tracing::{info, warn};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CleanupReport {
    pub scanned: usize,
    pub deleted: usize,
    pub failed: usize,
    pub batches: usize,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub scanned: usize,
    pub reclaimed: usize,
    pub quarantined: usize,
    pub failed: usize,
}

fn modified_at(file: &DeadLetterFile) -> Result<DateTime<Utc>, RecoveryError> {
    let modified = std::fs::metadata(file.path())?.modified()?;
    Ok(DateTime::<Utc>::from(modified))
}

/// Deletes `completed--` files last modified before the retention window,
/// `batch_size` files at a time.
pub fn cleanup_completed_files(
    dir: &Path,
    retention_days: i64,
    batch_size: usize,
    now: DateTime<Utc>,
) -> Result<CleanupReport, RecoveryError> {
    let cutoff = Duration::try_days(retention_days.max(0))
        .and_then(|window| now.checked_sub_signed(window))
        .ok_or_else(|| {
            RecoveryError::InvalidParameter(format!("retention days {retention_days} out of range"))
        })?;
    let completed = scan(dir, FileLockState::Completed)?;
    let mut report = CleanupReport {
        scanned: completed.len(),
        ..CleanupReport::default()
    };

    let mut expired = Vec::new();
    for file in completed {
        match modified_at(&file) {
            Ok(modified) if modified < cutoff => expired.push(file),
            Ok(_) => {}
            Err(err) => {
                report.failed += 1;
                warn!(event = "cleanup_stat_failed", file = %file.path().display(), error = %err);
            }
        }
    }

    for batch in expired.chunks(batch_size.max(1)) {
        report.batches += 1;
        let mut deleted = 0;
        for file in batch {
            match std::fs::remove_file(file.path()) {
                Ok(()) => deleted += 1,
                Err(err) => {
                    report.failed += 1;
                    warn!(
                        event = "cleanup_delete_failed",
                        file = %file.path().display(),
                        error = %err
                    );
                }
            }
        }
        report.deleted += deleted;
        info!(
            event = "completed_files_deleted",
            dir = %dir.display(),
            batch = report.batches,
            count = deleted
        );
    }
    Ok(report)
}

/// Puts `editing--` files untouched for longer than `stale_minutes` back to
/// pending. A file whose pending name is already taken is parked under
/// `.error` instead of overwriting it.
pub fn sweep_stale_editing(
    dir: &Path,
    stale_minutes: i64,
    now: DateTime<Utc>,
) -> Result<SweepReport, RecoveryError> {
    let cutoff = Duration::try_minutes(stale_minutes.max(0))
        .and_then(|window| now.checked_sub_signed(window))
        .ok_or_else(|| {
            RecoveryError::InvalidParameter(format!("stale minutes {stale_minutes} out of range"))
        })?;
    let editing = scan(dir, FileLockState::Editing)?;
    let mut report = SweepReport {
        scanned: editing.len(),
        ..SweepReport::default()
    };

    for file in editing {
        let modified = match modified_at(&file) {
            Ok(modified) => modified,
            Err(err) => {
                report.failed += 1;
                warn!(event = "sweep_stat_failed", file = %file.path().display(), error = %err);
                continue;
            }
        };
        if modified >= cutoff {
            continue;
        }

        let event = if dir.join(&file.name.original).exists() {
            FileLockEvent::Quarantine
        } else {
            FileLockEvent::Release
        };
        match file.transition(event) {
            Ok(moved) => {
                if event == FileLockEvent::Release {
                    report.reclaimed += 1;
                } else {
                    report.quarantined += 1;
                }
                info!(
                    event = "editing_file_swept",
                    file = %moved.path().display(),
                    state = %moved.state()
                );
            }
            Err(err) => {
                report.failed += 1;
                warn!(event = "sweep_rename_failed", file = %file.path().display(), error = %err);
            }
        }
    }
    Ok(report)
}
