use std::fmt;
use thiserror::Error;

pub const EDITING_PREFIX: &str = "editing--";
pub const COMPLETED_PREFIX: &str = "completed--";
pub const ERROR_SUFFIX: &str = ".error";
pub const DEAD_LETTER_EXTENSION: &str = ".json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileLockState {
    Pending,
    Editing,
    Completed,
    Error,
}

impl FileLockState {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileLockState::Pending => "pending",
            FileLockState::Editing => "editing",
            FileLockState::Completed => "completed",
            FileLockState::Error => "error",
        }
    }
}

impl fmt::Display for FileLockState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileLockEvent {
    Checkout,
    Commit,
    Release,
    Quarantine,
}

impl FileLockEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileLockEvent::Checkout => "checkout",
            FileLockEvent::Commit => "commit",
            FileLockEvent::Release => "release",
            FileLockEvent::Quarantine => "quarantine",
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FileStateError {
    #[error("invalid file lock transition: {event} from {from}")]
    InvalidTransition {
        from: FileLockState,
        event: &'static str,
    },
    #[error("not a dead-letter file name: {0}")]
    NotDeadLetter(String),
}

pub fn transition(
    from: FileLockState,
    event: FileLockEvent,
) -> Result<FileLockState, FileStateError> {
    match (from, event) {
        (FileLockState::Pending, FileLockEvent::Checkout) => Ok(FileLockState::Editing),
        (FileLockState::Editing, FileLockEvent::Commit) => Ok(FileLockState::Completed),
        (FileLockState::Editing, FileLockEvent::Release) => Ok(FileLockState::Pending),
        (FileLockState::Editing, FileLockEvent::Quarantine) => Ok(FileLockState::Error),
        (from, event) => Err(FileStateError::InvalidTransition {
            from,
            event: event.as_str(),
        }),
    }
}

/// A dead-letter file name split into its lock state and the name the
/// producer originally wrote.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeadLetterFileName {
    pub state: FileLockState,
    pub original: String,
}

impl DeadLetterFileName {
    pub fn pending(original: impl Into<String>) -> Self {
        Self {
            state: FileLockState::Pending,
            original: original.into(),
        }
    }

    pub fn parse(file_name: &str) -> Result<Self, FileStateError> {
        if let Some(original) = file_name.strip_suffix(ERROR_SUFFIX) {
            if is_dead_letter(original) {
                return Ok(Self {
                    state: FileLockState::Error,
                    original: original.to_string(),
                });
            }
            return Err(FileStateError::NotDeadLetter(file_name.to_string()));
        }
        if !file_name.ends_with(DEAD_LETTER_EXTENSION) {
            return Err(FileStateError::NotDeadLetter(file_name.to_string()));
        }
        let (state, original) = if let Some(rest) = file_name.strip_prefix(EDITING_PREFIX) {
            (FileLockState::Editing, rest)
        } else if let Some(rest) = file_name.strip_prefix(COMPLETED_PREFIX) {
            (FileLockState::Completed, rest)
        } else {
            (FileLockState::Pending, file_name)
        };
        if !is_dead_letter(original) {
            return Err(FileStateError::NotDeadLetter(file_name.to_string()));
        }
        Ok(Self {
            state,
            original: original.to_string(),
        })
    }

    pub fn file_name(&self) -> String {
        match self.state {
            FileLockState::Pending => self.original.clone(),
            FileLockState::Editing => format!("{EDITING_PREFIX}{}", self.original),
            FileLockState::Completed => format!("{COMPLETED_PREFIX}{}", self.original),
            FileLockState::Error => format!("{}{ERROR_SUFFIX}", self.original),
        }
    }

    pub fn apply(&self, event: FileLockEvent) -> Result<Self, FileStateError> {
        Ok(Self {
            state: transition(self.state, event)?,
            original: self.original.clone(),
        })
    }
}

/// True for a bare producer file name: `.json` and no lock prefix.
pub fn is_dead_letter(file_name: &str) -> bool {
    file_name.len() > DEAD_LETTER_EXTENSION.len()
        && file_name.ends_with(DEAD_LETTER_EXTENSION)
        && !file_name.starts_with(EDITING_PREFIX)
        && !file_name.starts_with(COMPLETED_PREFIX)
}
