use crate::error::RecoveryError;
use crate::file_lock::count_prefixed;
use dlr_core::file_state::EDITING_PREFIX;
use dlr_core::StagingArea;
use dlr_storage::StagingStore;
use std::path::Path;
use tracing::error;

pub const DEFAULT_MAX_EDITING_FILES: usize = 100;
pub const DEFAULT_MAX_BACKLOG_RECORDS: usize = 100;

/// Trips when `editing--` files pile up from earlier runs that never
/// finished. Reaching the ceiling is enough.
#[derive(Debug, Clone, Copy)]
pub struct FileStalenessGuard {
    pub ceiling: usize,
}

impl FileStalenessGuard {
    pub fn new(ceiling: usize) -> Self {
        Self { ceiling }
    }

    pub fn check(&self, dir: &Path) -> Result<usize, RecoveryError> {
        let count = count_prefixed(dir, EDITING_PREFIX)?;
        if count >= self.ceiling {
            error!(
                event = "guard_tripped",
                guard = "file_staleness",
                dir = %dir.display(),
                count,
                ceiling = self.ceiling
            );
            return Err(RecoveryError::BacklogExceeded {
                area: dir.display().to_string(),
                count,
                ceiling: self.ceiling,
            });
        }
        Ok(count)
    }
}

impl Default for FileStalenessGuard {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_EDITING_FILES)
    }
}

/// Trips when a staging area holds more not-completed records than one run
/// should take on.
#[derive(Debug, Clone, Copy)]
pub struct StoreBacklogGuard {
    pub ceiling: usize,
}

impl StoreBacklogGuard {
    pub fn new(ceiling: usize) -> Self {
        Self { ceiling }
    }

    pub fn check<S: StagingStore>(
        &self,
        store: &S,
        area: StagingArea,
    ) -> Result<usize, RecoveryError> {
        let count = store
            .count_not_completed(area)
            .map_err(|err| RecoveryError::unreadable(area.as_str(), err))?;
        if count > self.ceiling {
            error!(
                event = "guard_tripped",
                guard = "store_backlog",
                area = %area,
                count,
                ceiling = self.ceiling
            );
            return Err(RecoveryError::BacklogExceeded {
                area: area.to_string(),
                count,
                ceiling: self.ceiling,
            });
        }
        Ok(count)
    }
}

impl Default for StoreBacklogGuard {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_BACKLOG_RECORDS)
    }
}
