use ulid::Ulid;

use crate::model::Event;

#[derive(Debug)]
pub enum EngineError {
    /// Missing field, inverted interval, inconsistent date, bad text.
    Validation(String),
    NotFound(Ulid),
    VenueNameNotFound(String),
    /// Clash detected and the write was not forced. Carries every conflicting event.
    Conflict { clashes: Vec<Event> },
    DuplicateName(String),
    AlreadyExists(Ulid),
    /// Venue still has events referencing it.
    VenueInUse(Ulid),
    LimitExceeded(&'static str),
    WalError(String),
}

impl EngineError {
    pub fn validation(msg: impl Into<String>) -> Self {
        EngineError::Validation(msg.into())
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Validation(msg) => write!(f, "validation error: {msg}"),
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::VenueNameNotFound(name) => write!(f, "venue not found: {name:?}"),
            EngineError::Conflict { clashes } => {
                write!(f, "time clash detected with {} event(s)", clashes.len())
            }
            EngineError::DuplicateName(name) => write!(f, "venue name already exists: {name:?}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::VenueInUse(id) => {
                write!(f, "cannot delete venue {id}: events still reference it")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
