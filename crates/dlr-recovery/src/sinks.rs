use crate::pipeline::{RecoverySink, SinkOutcome};
use chrono::{DateTime, Utc};
use dlr_core::{ActivityRecord, DeadLetterRecord, StagingArea};
use dlr_storage::{CanonicalStore, StagingStore, StorageError};
use tracing::debug;

pub struct CanonicalSink<'a, C> {
    store: &'a C,
    prefilter: bool,
}

impl<'a, C: CanonicalStore> CanonicalSink<'a, C> {
    pub fn new(store: &'a C) -> Self {
        Self {
            store,
            prefilter: false,
        }
    }

    /// Looks up the batch's keys first and only writes the ones not already
    /// stored. Existing rows are left as they are.
    pub fn with_key_prefilter(store: &'a C) -> Self {
        Self {
            store,
            prefilter: true,
        }
    }
}

impl<C: CanonicalStore> RecoverySink for CanonicalSink<'_, C> {
    type Input = ActivityRecord;

    fn write(
        &mut self,
        batch: &[ActivityRecord],
        now: DateTime<Utc>,
    ) -> Result<SinkOutcome, StorageError> {
        if !self.prefilter {
            let written = self.store.upsert_all(batch, now)?;
            return Ok(SinkOutcome {
                written,
                duplicates_skipped: 0,
            });
        }

        let keys: Vec<String> = batch
            .iter()
            .filter(|record| record.has_message_key())
            .filter_map(|record| record.message_key.clone())
            .collect();
        let existing = self.store.find_existing_keys(&keys)?;
        let fresh: Vec<ActivityRecord> = batch
            .iter()
            .filter(|record| match record.message_key.as_deref() {
                Some(key) if !key.is_empty() => !existing.contains(key),
                _ => true,
            })
            .cloned()
            .collect();
        let duplicates_skipped = batch.len() - fresh.len();
        if duplicates_skipped > 0 {
            debug!(event = "duplicates_filtered", count = duplicates_skipped);
        }
        let written = self.store.upsert_all(&fresh, now)?;
        Ok(SinkOutcome {
            written,
            duplicates_skipped,
        })
    }
}

pub struct StagingSink<'a, S> {
    store: &'a S,
    area: StagingArea,
}

impl<'a, S: StagingStore> StagingSink<'a, S> {
    pub fn new(store: &'a S, area: StagingArea) -> Self {
        Self { store, area }
    }
}

impl<S: StagingStore> RecoverySink for StagingSink<'_, S> {
    type Input = DeadLetterRecord;

    fn write(
        &mut self,
        batch: &[DeadLetterRecord],
        _now: DateTime<Utc>,
    ) -> Result<SinkOutcome, StorageError> {
        self.store.save_all(self.area, batch)?;
        Ok(SinkOutcome {
            written: batch.len(),
            duplicates_skipped: 0,
        })
    }
}
