//! Error types for identity reconciliation
//!
//! Errors are classified by recoverability:
//! - Retryable: constraint races and lock contention, fixed by rerunning the transaction
//! - Fatal: bad input, broken graph invariants, other storage faults

use thiserror::Error;

use crate::db::DbError;

/// Message returned when neither identifier is supplied.
pub const MISSING_IDENTIFIER: &str = "Either email or phoneNumber must be provided";

/// Opaque message for every non-input failure.
pub const INTERNAL_ERROR: &str = "Internal Server Error";

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("{0}")]
    InvalidInput(String),

    // Retryable errors
    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Database busy: {0}")]
    Busy(String),

    // Non-retryable errors
    #[error("Identity graph inconsistent: {0}")]
    Consistency(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl IdentityError {
    /// Returns true if rerunning the whole transaction may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, IdentityError::Constraint(_) | IdentityError::Busy(_))
    }

    /// The message a caller is allowed to see.
    pub fn public_message(&self) -> &str {
        match self {
            IdentityError::InvalidInput(msg) => msg,
            _ => INTERNAL_ERROR,
        }
    }
}

impl From<DbError> for IdentityError {
    fn from(err: DbError) -> Self {
        if err.is_constraint_violation() {
            IdentityError::Constraint(err.to_string())
        } else if err.is_busy() {
            IdentityError::Busy(err.to_string())
        } else {
            IdentityError::Storage(err.to_string())
        }
    }
}

/// Serializable error body for the HTTP boundary
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ApiError {
    pub error: String,
}

impl From<&IdentityError> for ApiError {
    fn from(err: &IdentityError) -> Self {
        ApiError {
            error: err.public_message().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_races_are_retryable() {
        assert!(IdentityError::Constraint("x".into()).is_retryable());
        assert!(IdentityError::Busy("x".into()).is_retryable());
        assert!(!IdentityError::Consistency("x".into()).is_retryable());
        assert!(!IdentityError::Storage("x".into()).is_retryable());
        assert!(!IdentityError::InvalidInput("x".into()).is_retryable());
    }

    #[test]
    fn test_only_input_errors_leak_their_message() {
        let invalid = IdentityError::InvalidInput(MISSING_IDENTIFIER.to_string());
        assert_eq!(ApiError::from(&invalid).error, MISSING_IDENTIFIER);

        let fault = IdentityError::Consistency("cluster for contact 7 is empty".into());
        assert_eq!(ApiError::from(&fault).error, INTERNAL_ERROR);
    }

    #[test]
    fn test_db_error_classification() {
        let busy = DbError::Sqlite(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            None,
        ));
        assert!(matches!(IdentityError::from(busy), IdentityError::Busy(_)));

        let constraint = DbError::Sqlite(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CONSTRAINT),
            Some("UNIQUE constraint failed".into()),
        ));
        assert!(matches!(
            IdentityError::from(constraint),
            IdentityError::Constraint(_)
        ));

        let other = DbError::Migration("bad".into());
        assert!(matches!(IdentityError::from(other), IdentityError::Storage(_)));
    }
}
