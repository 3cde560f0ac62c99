use crate::pipeline::RecoveryTransform;
use chrono::{DateTime, Utc};
use dlr_core::{
    decode_envelope, transform_record, ActivityRecord, DeadLetterRecord, TransformError,
};

/// Payload to canonical activity. Remote-call dead letters are single-fire
/// and drop their key so the sink inserts instead of upserting.
#[derive(Debug, Clone, Copy)]
pub struct CanonicalTransform {
    carry_key: bool,
}

impl CanonicalTransform {
    pub fn keyed() -> Self {
        Self { carry_key: true }
    }

    pub fn unkeyed() -> Self {
        Self { carry_key: false }
    }
}

impl RecoveryTransform for CanonicalTransform {
    type Output = ActivityRecord;

    fn transform(
        &self,
        record: &DeadLetterRecord,
        _now: DateTime<Utc>,
    ) -> Result<ActivityRecord, TransformError> {
        let mut activity = transform_record(record)?;
        if !self.carry_key {
            activity.message_key = None;
        }
        Ok(activity)
    }
}

/// Raw envelope to a fresh staging record.
#[derive(Debug, Clone, Copy, Default)]
pub struct StagingTransform;

impl RecoveryTransform for StagingTransform {
    type Output = DeadLetterRecord;

    fn transform(
        &self,
        record: &DeadLetterRecord,
        now: DateTime<Utc>,
    ) -> Result<DeadLetterRecord, TransformError> {
        let message = decode_envelope(&record.payload)?;
        DeadLetterRecord::from_message(&message, now)
            .map_err(|err| TransformError::Malformed(err.to_string()))
    }
}
