use crate::error::RecoveryError;
use chrono::{DateTime, Utc};
use dlr_core::{DeadLetterRecord, TransformError};
use dlr_storage::StorageError;

#[derive(Debug)]
pub struct SourceChunk<H> {
    pub items: Vec<H>,
    pub exhausted: bool,
}

impl<H> SourceChunk<H> {
    pub fn empty() -> Self {
        Self {
            items: Vec::new(),
            exhausted: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    Restored,
    Quarantined,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RollbackSummary {
    pub restored: usize,
    pub quarantined: usize,
    pub failed: usize,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SinkOutcome {
    pub written: usize,
    pub duplicates_skipped: usize,
}

/// One holding area seen through the chunk protocol. `H` is whatever the
/// source needs to find the item again: a popped raw message, a staging
/// record, a checked-out file.
pub trait RecoverySource {
    type Handle;

    fn area(&self) -> String;

    /// Runs before anything is read or moved. Guards trip here.
    fn preflight(&mut self) -> Result<(), RecoveryError> {
        Ok(())
    }

    fn next_chunk(&mut self, size: usize) -> Result<SourceChunk<Self::Handle>, RecoveryError>;

    /// `Ok(None)` means someone else holds the item.
    fn checkout(&mut self, handle: Self::Handle) -> Result<Option<Self::Handle>, RecoveryError> {
        Ok(Some(handle))
    }

    fn load(
        &self,
        handle: &Self::Handle,
        now: DateTime<Utc>,
    ) -> Result<DeadLetterRecord, RecoveryError>;

    /// Returns a checked-out item that will not be written this chunk.
    fn release(&mut self, handle: Self::Handle) -> Result<ReleaseOutcome, RecoveryError>;

    fn mark_completed(
        &mut self,
        handle: Self::Handle,
        now: DateTime<Utc>,
    ) -> Result<(), RecoveryError>;

    fn rollback(&mut self, handles: Vec<Self::Handle>) -> RollbackSummary;

    /// Hands back items of an abandoned chunk that were never checked out.
    /// Sources whose reads already removed the item must put it back.
    fn return_unclaimed(&mut self, handles: Vec<Self::Handle>) -> RollbackSummary {
        self.rollback(handles)
    }
}

pub trait RecoveryTransform {
    type Output;

    fn transform(
        &self,
        record: &DeadLetterRecord,
        now: DateTime<Utc>,
    ) -> Result<Self::Output, TransformError>;
}

pub trait RecoverySink {
    type Input;

    fn write(&mut self, batch: &[Self::Input], now: DateTime<Utc>)
        -> Result<SinkOutcome, StorageError>;
}

/// Items checked out during one chunk. Owned by a single engine call and
/// dropped when the chunk commits or rolls back.
#[derive(Debug)]
pub struct ChunkContext<H> {
    pub index: usize,
    in_flight: Vec<H>,
}

impl<H> ChunkContext<H> {
    pub fn new(index: usize) -> Self {
        Self {
            index,
            in_flight: Vec::new(),
        }
    }

    pub fn hold(&mut self, handle: H) {
        self.in_flight.push(handle);
    }

    pub fn len(&self) -> usize {
        self.in_flight.len()
    }

    pub fn is_empty(&self) -> bool {
        self.in_flight.is_empty()
    }

    pub fn take(&mut self) -> Vec<H> {
        std::mem::take(&mut self.in_flight)
    }
}
