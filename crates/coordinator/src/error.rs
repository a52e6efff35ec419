//! Error types for the coordinator crate

use spindle_common::TxnId;
use thiserror::Error;

/// Coordinator errors surfaced to callers and the transport layer
#[derive(Debug, Error)]
pub enum CoordinatorError {
    /// A response named a transaction id with no live queue slot
    #[error("Transaction {0} is not pending")]
    TransactionNotFound(TxnId),

    /// The requested operation does not fit the transaction's current state
    #[error("Invalid transaction state: {0}")]
    InvalidState(String),

    /// A response arrived on a connection that is not a known partition
    #[error("Response received on an unknown connection")]
    UnknownConnection,

    /// A response declared a dependency outside `[-1, id)`
    #[error("Response for {id} declares invalid dependency {dependency}")]
    InvalidDependency { id: TxnId, dependency: TxnId },

    /// The transport refused a message
    #[error("Failed to send to partition {partition}")]
    SendFailed { partition: usize },
}

/// Result type alias for coordinator operations
pub type Result<T> = std::result::Result<T, CoordinatorError>;
