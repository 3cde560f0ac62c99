pub mod engine;
pub mod error;
pub mod file_lock;
pub mod guards;
pub mod housekeeping;
pub mod jobs;
pub mod pipeline;
pub mod run_lock;
pub mod sinks;
pub mod sources;
pub mod transforms;

pub use engine::{ChunkEngine, RunReport};
pub use error::RecoveryError;
pub use guards::{FileStalenessGuard, StoreBacklogGuard};
pub use jobs::{
    JobDefinition, JobKind, JobOutcome, JobParameters, JobRegistry, JobRunner, JobStatus,
    RecoverySettings, RecoveryThresholds,
};
pub use pipeline::{
    ChunkContext, RecoverySink, RecoverySource, RecoveryTransform, ReleaseOutcome,
    RollbackSummary, SinkOutcome, SourceChunk,
};
