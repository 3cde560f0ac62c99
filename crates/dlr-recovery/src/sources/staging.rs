use crate::error::RecoveryError;
use crate::guards::StoreBacklogGuard;
use crate::pipeline::{RecoverySource, ReleaseOutcome, RollbackSummary, SourceChunk};
use chrono::{DateTime, Utc};
use dlr_core::{DeadLetterRecord, StagingArea};
use dlr_storage::StagingStore;
use std::collections::{HashSet, VecDeque};
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StagingScan {
    /// Newest-first pages of not-completed records.
    Pending,
    /// One query for not-completed records created before the cutoff.
    OlderThan(DateTime<Utc>),
}

pub struct StagingSource<'a, S> {
    store: &'a S,
    area: StagingArea,
    scan: StagingScan,
    guard: Option<StoreBacklogGuard>,
    // Records returned earlier that are still not completed sit ahead of
    // the next page; the offset steps over them.
    skipped: usize,
    seen: HashSet<String>,
    buffer: VecDeque<DeadLetterRecord>,
    loaded: bool,
    exhausted: bool,
}

impl<'a, S: StagingStore> StagingSource<'a, S> {
    pub fn pending(store: &'a S, area: StagingArea) -> Self {
        Self::with_scan(store, area, StagingScan::Pending)
    }

    pub fn older_than(store: &'a S, area: StagingArea, cutoff: DateTime<Utc>) -> Self {
        Self::with_scan(store, area, StagingScan::OlderThan(cutoff))
    }

    fn with_scan(store: &'a S, area: StagingArea, scan: StagingScan) -> Self {
        Self {
            store,
            area,
            scan,
            guard: None,
            skipped: 0,
            seen: HashSet::new(),
            buffer: VecDeque::new(),
            loaded: false,
            exhausted: false,
        }
    }

    pub fn with_backlog_guard(mut self, guard: StoreBacklogGuard) -> Self {
        self.guard = Some(guard);
        self
    }

    fn next_page(&mut self, size: usize) -> Result<SourceChunk<DeadLetterRecord>, RecoveryError> {
        if self.exhausted {
            return Ok(SourceChunk::empty());
        }
        let page = self
            .store
            .find_not_completed(self.area, self.skipped, size)
            .map_err(|err| RecoveryError::unreadable(self.area.as_str(), err))?;
        self.exhausted = page.len() < size;
        let items = page
            .into_iter()
            .filter(|record| self.seen.insert(record.id.clone()))
            .collect();
        Ok(SourceChunk {
            items,
            exhausted: self.exhausted,
        })
    }

    fn next_buffered(
        &mut self,
        cutoff: DateTime<Utc>,
        size: usize,
    ) -> Result<SourceChunk<DeadLetterRecord>, RecoveryError> {
        if !self.loaded {
            let stale = self
                .store
                .find_not_completed_older_than(self.area, cutoff)
                .map_err(|err| RecoveryError::unreadable(self.area.as_str(), err))?;
            info!(
                event = "stale_records_found",
                area = %self.area,
                cutoff = %cutoff.to_rfc3339(),
                count = stale.len()
            );
            self.buffer = stale.into();
            self.loaded = true;
        }
        let take = size.min(self.buffer.len());
        let items = self.buffer.drain(..take).collect();
        Ok(SourceChunk {
            items,
            exhausted: self.buffer.is_empty(),
        })
    }
}

impl<S: StagingStore> RecoverySource for StagingSource<'_, S> {
    type Handle = DeadLetterRecord;

    fn area(&self) -> String {
        self.area.to_string()
    }

    fn preflight(&mut self) -> Result<(), RecoveryError> {
        if let Some(guard) = self.guard {
            guard.check(self.store, self.area)?;
        }
        Ok(())
    }

    fn next_chunk(&mut self, size: usize) -> Result<SourceChunk<DeadLetterRecord>, RecoveryError> {
        match self.scan {
            StagingScan::Pending => self.next_page(size),
            StagingScan::OlderThan(cutoff) => self.next_buffered(cutoff, size),
        }
    }

    fn load(
        &self,
        handle: &DeadLetterRecord,
        _now: DateTime<Utc>,
    ) -> Result<DeadLetterRecord, RecoveryError> {
        Ok(handle.clone())
    }

    fn release(&mut self, _handle: DeadLetterRecord) -> Result<ReleaseOutcome, RecoveryError> {
        self.skipped += 1;
        Ok(ReleaseOutcome::Restored)
    }

    fn mark_completed(
        &mut self,
        mut handle: DeadLetterRecord,
        now: DateTime<Utc>,
    ) -> Result<(), RecoveryError> {
        handle.mark_completed(now);
        if let Err(err) = self.store.save(self.area, &handle) {
            self.skipped += 1;
            return Err(err.into());
        }
        Ok(())
    }

    fn rollback(&mut self, handles: Vec<DeadLetterRecord>) -> RollbackSummary {
        self.skipped += handles.len();
        RollbackSummary {
            restored: handles.len(),
            ..RollbackSummary::default()
        }
    }
}
