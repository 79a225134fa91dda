//! Error taxonomy for page composition and versioning.

use rusqlite::ffi;

/// Errors surfaced by the node store, the version manager and the designer.
#[derive(Debug, thiserror::Error)]
pub enum PageError {
    /// Unknown or deleted page, node, or version.
    #[error("{entity} not found: {key}")]
    NotFound { entity: &'static str, key: String },

    /// Bad placement, order, key or component type.
    #[error("Invalid: {0}")]
    Invalid(String),

    /// Structural edit attempted on a locked node.
    #[error("Locked: {0}")]
    Locked(String),

    /// Stale concurrency token, duplicate key, or cyclic reparent.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Orphaned nodes, or a hard delete that would strand dependents.
    #[error("Integrity violation: {0}")]
    IntegrityViolation(String),

    #[error("Database error: {0}")]
    Database(rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, PageError>;

impl PageError {
    pub fn not_found(entity: &'static str, key: impl std::fmt::Display) -> Self {
        Self::NotFound {
            entity,
            key: key.to_string(),
        }
    }

    /// Stable machine-readable code, used by the HTTP layer.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Invalid(_) => "INVALID",
            Self::Locked(_) => "LOCKED",
            Self::Conflict(_) => "CONFLICT",
            Self::IntegrityViolation(_) => "INTEGRITY_VIOLATION",
            Self::Database(_) | Self::Serialization(_) | Self::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl From<rusqlite::Error> for PageError {
    fn from(err: rusqlite::Error) -> Self {
        if let rusqlite::Error::SqliteFailure(failure, ref message) = err {
            let detail = message.clone().unwrap_or_else(|| failure.to_string());
            match failure.extended_code {
                ffi::SQLITE_CONSTRAINT_UNIQUE | ffi::SQLITE_CONSTRAINT_PRIMARYKEY => {
                    return Self::Conflict(detail);
                }
                ffi::SQLITE_CONSTRAINT_FOREIGNKEY => {
                    return Self::IntegrityViolation(detail);
                }
                ffi::SQLITE_CONSTRAINT_CHECK => return Self::Invalid(detail),
                _ => {}
            }
        }
        Self::Database(err)
    }
}
