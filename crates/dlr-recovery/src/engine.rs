use crate::error::RecoveryError;
use crate::pipeline::{
    ChunkContext, RecoverySink, RecoverySource, RecoveryTransform, ReleaseOutcome,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info, warn};

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub chunks: usize,
    pub read: usize,
    pub checkout_conflicts: usize,
    pub transform_skips: usize,
    pub written: usize,
    pub duplicates_skipped: usize,
    pub completed: usize,
    pub mark_failures: usize,
    pub rolled_back: usize,
    pub quarantined: usize,
    pub rollback_failures: usize,
    pub files_deleted: usize,
    pub files_reclaimed: usize,
    pub files_failed: usize,
}

#[derive(Debug, Clone)]
pub struct ChunkEngine {
    job: String,
    run_id: String,
    chunk_size: usize,
}

impl ChunkEngine {
    pub fn new(job: impl Into<String>, run_id: impl Into<String>, chunk_size: usize) -> Self {
        Self {
            job: job.into(),
            run_id: run_id.into(),
            chunk_size: chunk_size.max(1),
        }
    }

    /// Pulls chunks until the source is exhausted. A failed sink write rolls
    /// the chunk back and ends the run with `SinkWrite`.
    pub fn run<S, T, K>(
        &self,
        source: &mut S,
        transform: &T,
        sink: &mut K,
        now: DateTime<Utc>,
        report: &mut RunReport,
    ) -> Result<(), RecoveryError>
    where
        S: RecoverySource,
        T: RecoveryTransform,
        K: RecoverySink<Input = T::Output>,
    {
        source.preflight()?;

        loop {
            let chunk = source.next_chunk(self.chunk_size)?;
            if chunk.items.is_empty() {
                break;
            }
            report.chunks += 1;
            info!(
                event = "chunk_fetched",
                job = %self.job,
                run_id = %self.run_id,
                chunk = report.chunks,
                area = %source.area(),
                count = chunk.items.len()
            );

            let exhausted = chunk.exhausted;
            self.process_chunk(source, transform, sink, chunk.items, now, report)?;
            if exhausted {
                break;
            }
        }

        info!(
            event = "run_drained",
            job = %self.job,
            run_id = %self.run_id,
            chunks = report.chunks,
            written = report.written,
            completed = report.completed
        );
        Ok(())
    }

    fn process_chunk<S, T, K>(
        &self,
        source: &mut S,
        transform: &T,
        sink: &mut K,
        items: Vec<S::Handle>,
        now: DateTime<Utc>,
        report: &mut RunReport,
    ) -> Result<(), RecoveryError>
    where
        S: RecoverySource,
        T: RecoveryTransform,
        K: RecoverySink<Input = T::Output>,
    {
        let index = report.chunks;
        let mut context = ChunkContext::new(index);
        let mut outputs = Vec::with_capacity(items.len());

        let mut unclaimed = items.into_iter();
        while let Some(item) = unclaimed.next() {
            report.read += 1;
            let handle = match source.checkout(item) {
                Ok(Some(handle)) => handle,
                Ok(None) => {
                    report.checkout_conflicts += 1;
                    debug!(event = "checkout_conflict", job = %self.job, chunk = index);
                    continue;
                }
                Err(err) => {
                    self.abandon_chunk(source, &mut context, unclaimed.collect(), report, &err);
                    return Err(err);
                }
            };

            let converted = source
                .load(&handle, now)
                .map_err(|err| err.to_string())
                .and_then(|record| {
                    transform
                        .transform(&record, now)
                        .map_err(|err| err.to_string())
                        .map(|output| (record, output))
                });

            match converted {
                Ok((record, output)) => {
                    debug!(
                        event = "record_converted",
                        job = %self.job,
                        chunk = index,
                        record_id = %record.id,
                        message_key = record.message_key.as_deref().unwrap_or("-")
                    );
                    context.hold(handle);
                    outputs.push(output);
                }
                Err(err) => {
                    report.transform_skips += 1;
                    warn!(
                        event = "record_skipped",
                        job = %self.job,
                        chunk = index,
                        error = %err
                    );
                    match source.release(handle) {
                        Ok(ReleaseOutcome::Restored) => {}
                        Ok(ReleaseOutcome::Quarantined) => report.quarantined += 1,
                        Err(err) => {
                            report.rollback_failures += 1;
                            error!(
                                event = "release_failed",
                                job = %self.job,
                                chunk = index,
                                error = %err
                            );
                        }
                    }
                }
            }
        }

        if context.is_empty() {
            return Ok(());
        }

        match sink.write(&outputs, now) {
            Ok(outcome) => {
                report.written += outcome.written;
                report.duplicates_skipped += outcome.duplicates_skipped;
                for handle in context.take() {
                    match source.mark_completed(handle, now) {
                        Ok(()) => report.completed += 1,
                        Err(err) => {
                            report.mark_failures += 1;
                            warn!(
                                event = "mark_completed_failed",
                                job = %self.job,
                                chunk = index,
                                error = %err
                            );
                        }
                    }
                }
                info!(
                    event = "chunk_committed",
                    job = %self.job,
                    run_id = %self.run_id,
                    chunk = index,
                    written = outcome.written,
                    duplicates = outcome.duplicates_skipped
                );
                Ok(())
            }
            Err(err) => {
                let err = RecoveryError::SinkWrite {
                    chunk: index,
                    message: err.to_string(),
                };
                self.abandon_chunk(source, &mut context, Vec::new(), report, &err);
                Err(err)
            }
        }
    }

    /// Puts every item of a failed chunk back where the next run will find
    /// it: held items through `rollback`, not yet claimed ones through
    /// `return_unclaimed`.
    fn abandon_chunk<S: RecoverySource>(
        &self,
        source: &mut S,
        context: &mut ChunkContext<S::Handle>,
        unclaimed: Vec<S::Handle>,
        report: &mut RunReport,
        cause: &RecoveryError,
    ) {
        let held = context.len();
        let pending = unclaimed.len();
        let mut summary = source.rollback(context.take());
        if !unclaimed.is_empty() {
            let returned = source.return_unclaimed(unclaimed);
            summary.restored += returned.restored;
            summary.quarantined += returned.quarantined;
            summary.failed += returned.failed;
        }
        report.rolled_back += summary.restored;
        report.quarantined += summary.quarantined;
        report.rollback_failures += summary.failed;
        error!(
            event = "chunk_abandoned",
            job = %self.job,
            run_id = %self.run_id,
            chunk = context.index,
            held,
            unclaimed = pending,
            restored = summary.restored,
            quarantined = summary.quarantined,
            rollback_failed = summary.failed,
            error = %cause
        );
    }
}
