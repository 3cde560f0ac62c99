mod file;
mod queue;
mod staging;

pub use file::FileSource;
pub use queue::{QueueMessage, QueueSource, LISTENER_LANE};
pub use staging::{StagingScan, StagingSource};
