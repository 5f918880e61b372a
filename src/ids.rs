//! Opaque identifier types. Constructors reject malformed input instead
//! of accepting a bare `String` everywhere.

use std::sync::Arc;

use derive_more::Display;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::{ErrorKind, SupervisorError};

/// Max length of a task id / prompt string we'll accept, in bytes.
pub const MAX_ID_BYTES: usize = 256;

/// Opaque, globally-unique task identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display)]
#[serde(transparent)]
pub struct TaskId(Arc<str>);

impl TaskId {
    pub fn new(raw: impl Into<String>) -> Result<Self, SupervisorError> {
        let raw = raw.into();
        if raw.is_empty() {
            return Err(SupervisorError::new(
                ErrorKind::InvalidTaskId,
                "task id must not be empty",
            ));
        }
        if raw.len() > MAX_ID_BYTES {
            return Err(SupervisorError::new(
                ErrorKind::InvalidTaskId,
                format!("task id exceeds {MAX_ID_BYTES} bytes"),
            ));
        }
        Ok(Self(Arc::from(raw)))
    }

    /// Generates a fresh random task id (UUID v7 for time-ordered ids).
    pub fn generate() -> Self {
        Self(Arc::from(Uuid::now_v7().to_string().as_str()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Opaque identifier for a live worker (one OS subprocess).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(transparent)]
pub struct WorkerId(Uuid);

impl WorkerId {
    pub fn generate() -> Self {
        Self(Uuid::now_v7())
    }
}

/// Correlation id attaching a `request` call to its eventual `respond`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(transparent)]
pub struct CorrelationId(Uuid);

impl CorrelationId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}
