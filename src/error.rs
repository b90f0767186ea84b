use crate::batch::{Amount, BatchId, BatchState};
use crate::id::ParticipantId;
use crate::roles::Role;
use std::fmt;
use thiserror::Error;

/// Represents all possible errors that can occur when interacting with a ledger store
#[derive(Error, Debug)]
pub enum StorageError {
    /// Database errors that occur with the underlying storage backend
    #[error("Database error: {0}")]
    Database(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Errors related to missing or invalid data
    #[error("Not found: {0}")]
    NotFound(String),

    /// Generic errors that don't fit in other categories
    #[error("Other error: {0}")]
    Other(String),
}

impl From<bincode::Error> for StorageError {
    fn from(err: bincode::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

#[cfg(feature = "rocksdb")]
impl From<rocksdb::Error> for StorageError {
    fn from(err: rocksdb::Error) -> Self {
        StorageError::Database(err.to_string())
    }
}

#[cfg(feature = "sqlite")]
impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => StorageError::NotFound("Row not found".to_string()),
            _ => StorageError::Database(err.to_string()),
        }
    }
}


/// Why an authorization check rejected the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailure {
    /// The caller does not hold the role the operation requires
    MissingRole { required: Role, actual: Role },

    /// The operation is reserved for administrators
    NotAdmin,

    /// The caller holds the right role but is not the party recorded for the
    /// batch at the earlier stage
    NotStageOwner { owner: ParticipantId },
}

impl fmt::Display for AuthFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthFailure::MissingRole { required, actual } => {
                write!(f, "requires role {}, caller holds {}", required, actual)
            }
            AuthFailure::NotAdmin => write!(f, "requires admin"),
            AuthFailure::NotStageOwner { owner } => {
                write!(f, "batch belongs to {}", owner.short())
            }
        }
    }
}

/// Caller-visible failures of ledger operations.
///
/// Every variant means the operation was aborted as a whole: no field, balance
/// or log entry was changed.
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Unauthorized: {} {reason}", .caller.short())]
    Unauthorized {
        caller: ParticipantId,
        reason: AuthFailure,
    },

    #[error("Invalid state for batch {batch_id}: expected {expected}, found {actual}")]
    InvalidState {
        batch_id: BatchId,
        expected: BatchState,
        actual: BatchState,
    },

    #[error("Payment mismatch: expected {expected}, attached {attached}")]
    PaymentMismatch { expected: Amount, attached: Amount },

    #[error("Insufficient funds: {} needs {required}, holds {available}", .payer.short())]
    InsufficientFunds {
        payer: ParticipantId,
        required: Amount,
        available: Amount,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl LedgerError {
    pub(crate) fn unauthorized(caller: &ParticipantId, reason: AuthFailure) -> Self {
        LedgerError::Unauthorized {
            caller: *caller,
            reason,
        }
    }

    /// Short, stable name of the error kind
    pub fn kind(&self) -> &'static str {
        match self {
            LedgerError::Unauthorized { .. } => "Unauthorized",
            LedgerError::InvalidState { .. } => "InvalidState",
            LedgerError::PaymentMismatch { .. } => "PaymentMismatch",
            LedgerError::InsufficientFunds { .. } => "InsufficientFunds",
            LedgerError::NotFound(_) => "NotFound",
            LedgerError::InvalidInput(_) => "InvalidInput",
            LedgerError::Storage(_) => "Storage",
        }
    }
}
