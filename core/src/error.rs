use std::fmt;

/// Failure kinds surfaced by the meal-plan engine.
///
/// Callers match on the variant to decide how to respond (HTTP status, CLI
/// exit code). The store layer reports failures as `anyhow::Error`; those
/// arrive here as [`PlanError::Storage`].
#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("storage error: {0:#}")]
    Storage(anyhow::Error),
}

impl PlanError {
    pub fn validation(message: impl fmt::Display) -> Self {
        Self::Validation(message.to_string())
    }

    pub fn not_found(message: impl fmt::Display) -> Self {
        Self::NotFound(message.to_string())
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

impl From<anyhow::Error> for PlanError {
    fn from(err: anyhow::Error) -> Self {
        Self::Storage(err)
    }
}

impl From<rusqlite::Error> for PlanError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Storage(err.into())
    }
}
