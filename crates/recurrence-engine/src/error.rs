//! Error types for recurrence-engine operations.

use thiserror::Error;
use uuid::Uuid;

/// Failure reported by a [`CalendarEntryStore`](crate::store::CalendarEntryStore)
/// or [`ExceptionStore`](crate::store::ExceptionStore) implementation.
///
/// The engine never retries or downgrades these; they surface as
/// [`EngineError::Storage`].
#[derive(Error, Debug)]
#[error("{message}")]
pub struct StoreError {
    pub message: String,
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl StoreError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

/// What kind of record a [`EngineError::NotFound`] refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Entry,
    Exception,
}

impl std::fmt::Display for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecordKind::Entry => f.write_str("calendar entry"),
            RecordKind::Exception => f.write_str("entry exception"),
        }
    }
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: RecordKind, id: Uuid },

    #[error("Malformed recurrence pattern: {0}")]
    MalformedPattern(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),
}

impl EngineError {
    pub fn entry_not_found(id: Uuid) -> Self {
        EngineError::NotFound {
            kind: RecordKind::Entry,
            id,
        }
    }

    pub fn exception_not_found(id: Uuid) -> Self {
        EngineError::NotFound {
            kind: RecordKind::Exception,
            id,
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
