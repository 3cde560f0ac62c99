pub mod activity;
pub mod dead_letter;
pub mod file_state;
pub mod transform;

pub use activity::{
    ActivityEvent, ActivityMessage, ActivityRecord, ActivityType, CategoryTag, EventCategory,
    TypeSet,
};
pub use dead_letter::{DeadLetterRecord, StagingArea};
pub use file_state::{DeadLetterFileName, FileLockEvent, FileLockState, FileStateError};
pub use transform::{decode_envelope, transform_payload, transform_record, TransformError};
