use crate::activity::{ActivityMessage, CategoryTag};
use chrono::{DateTime, Utc};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StagingArea {
    QueueSnapshot,
    ListenerEnvelope,
    ListenerDeadLetter,
    PublisherDeadLetter,
    RemoteCallDeadLetter,
}

impl StagingArea {
    pub const ALL: [StagingArea; 5] = [
        StagingArea::QueueSnapshot,
        StagingArea::ListenerEnvelope,
        StagingArea::ListenerDeadLetter,
        StagingArea::PublisherDeadLetter,
        StagingArea::RemoteCallDeadLetter,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StagingArea::QueueSnapshot => "queue_snapshot",
            StagingArea::ListenerEnvelope => "listener_envelope",
            StagingArea::ListenerDeadLetter => "listener_dead_letter",
            StagingArea::PublisherDeadLetter => "publisher_dead_letter",
            StagingArea::RemoteCallDeadLetter => "remote_call_dead_letter",
        }
    }
}

impl fmt::Display for StagingArea {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StagingArea {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let normalized = input.trim().to_lowercase().replace('-', "_");
        match normalized.as_str() {
            "queue_snapshot" => Ok(StagingArea::QueueSnapshot),
            "listener_envelope" => Ok(StagingArea::ListenerEnvelope),
            "listener_dead_letter" => Ok(StagingArea::ListenerDeadLetter),
            "publisher_dead_letter" => Ok(StagingArea::PublisherDeadLetter),
            "remote_call_dead_letter" => Ok(StagingArea::RemoteCallDeadLetter),
            other => Err(format!("Unknown staging area: {other}")),
        }
    }
}

/// Unit of recovery held in a staging area or materialized from a failure
/// file. `is_editing` is only meaningful for filesystem-backed records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetterRecord {
    pub id: String,
    pub message_key: Option<String>,
    pub payload: String,
    pub category: Option<CategoryTag>,
    pub is_completed: bool,
    pub is_editing: bool,
    pub published_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DeadLetterRecord {
    pub fn new(
        message_key: Option<String>,
        payload: impl Into<String>,
        category: Option<CategoryTag>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            message_key,
            payload: payload.into(),
            category,
            is_completed: false,
            is_editing: false,
            published_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Staging copy of a decoded envelope: keyed by the envelope key, payload
    /// re-serialized, publish time taken from the event.
    pub fn from_message(
        message: &ActivityMessage,
        now: DateTime<Utc>,
    ) -> Result<Self, serde_json::Error> {
        let payload = serde_json::to_string(message)?;
        let mut record = Self::new(message.key.clone(), payload, None, now);
        record.published_at = message.event.created_at;
        Ok(record)
    }

    pub fn mark_completed(&mut self, now: DateTime<Utc>) {
        self.is_completed = true;
        self.is_editing = false;
        self.updated_at = now;
    }
}
