use crate::error::RecoveryError;
use crate::pipeline::ReleaseOutcome;
use dlr_core::{DeadLetterFileName, FileLockEvent, FileLockState};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{error, warn};

/// A dead-letter file on disk. State changes are renames driven by the pure
/// transition table in `dlr_core::file_state`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetterFile {
    pub dir: PathBuf,
    pub name: DeadLetterFileName,
}

impl DeadLetterFile {
    pub fn new(dir: impl Into<PathBuf>, name: DeadLetterFileName) -> Self {
        Self {
            dir: dir.into(),
            name,
        }
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join(self.name.file_name())
    }

    pub fn state(&self) -> FileLockState {
        self.name.state
    }

    pub fn transition(&self, event: FileLockEvent) -> Result<DeadLetterFile, RecoveryError> {
        let next = self.name.apply(event)?;
        let target = self.dir.join(next.file_name());
        std::fs::rename(self.path(), &target)?;
        Ok(DeadLetterFile {
            dir: self.dir.clone(),
            name: next,
        })
    }
}

/// Dead-letter files in `dir` currently in `state`, sorted by name. A missing
/// directory has no files.
pub fn scan(dir: &Path, state: FileLockState) -> Result<Vec<DeadLetterFile>, RecoveryError> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err.into()),
    };

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let Some(file_name) = entry.file_name().to_str().map(str::to_string) else {
            continue;
        };
        if let Ok(name) = DeadLetterFileName::parse(&file_name) {
            if name.state == state {
                files.push(DeadLetterFile::new(dir, name));
            }
        }
    }
    files.sort_by(|left, right| left.name.original.cmp(&right.name.original));
    Ok(files)
}

/// Counts regular files whose name starts with `prefix`, whatever their
/// extension.
pub fn count_prefixed(dir: &Path, prefix: &str) -> Result<usize, RecoveryError> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(0),
        Err(err) => return Err(err.into()),
    };

    let mut count = 0;
    for entry in entries {
        let entry = entry?;
        if entry.file_type()?.is_file() && entry.file_name().to_string_lossy().starts_with(prefix) {
            count += 1;
        }
    }
    Ok(count)
}

/// Puts a checked-out file back to pending. When that rename fails the file
/// is parked under the `.error` suffix so it stays visible.
pub fn release_or_quarantine(file: &DeadLetterFile) -> Result<ReleaseOutcome, RecoveryError> {
    match file.transition(FileLockEvent::Release) {
        Ok(_) => Ok(ReleaseOutcome::Restored),
        Err(release_err) => {
            warn!(
                event = "file_release_failed",
                file = %file.path().display(),
                error = %release_err
            );
            match file.transition(FileLockEvent::Quarantine) {
                Ok(parked) => {
                    warn!(event = "file_quarantined", file = %parked.path().display());
                    Ok(ReleaseOutcome::Quarantined)
                }
                Err(err) => {
                    error!(
                        event = "file_quarantine_failed",
                        file = %file.path().display(),
                        error = %err
                    );
                    Err(err)
                }
            }
        }
    }
}
