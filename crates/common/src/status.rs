//! Transaction status codes
//!
//! A partition reports one of these with every fragment response. `Ok` means
//! the fragment executed successfully; any abort value is terminal for the
//! transaction.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Outcome of a transaction round as reported by partitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionStatus {
    /// The round succeeded at every partition so far.
    Ok,
    /// The application (or the partition's execution engine) aborted.
    AbortUser,
    /// Aborted because a round timed out; presumed deadlock.
    AbortDeadlock,
    /// Aborted because a transaction this one speculatively read from aborted.
    AbortDependency,
}

impl TransactionStatus {
    /// Wire code used in message headers.
    pub fn code(self) -> i32 {
        match self {
            TransactionStatus::Ok => 0,
            TransactionStatus::AbortUser => 1,
            TransactionStatus::AbortDeadlock => 2,
            TransactionStatus::AbortDependency => 3,
        }
    }

    /// Parse a wire code.
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(TransactionStatus::Ok),
            1 => Some(TransactionStatus::AbortUser),
            2 => Some(TransactionStatus::AbortDeadlock),
            3 => Some(TransactionStatus::AbortDependency),
            _ => None,
        }
    }

    /// Whether this status is terminal for the transaction.
    pub fn is_abort(self) -> bool {
        !matches!(self, TransactionStatus::Ok)
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransactionStatus::Ok => "ok",
            TransactionStatus::AbortUser => "abort_user",
            TransactionStatus::AbortDeadlock => "abort_deadlock",
            TransactionStatus::AbortDependency => "abort_dependency",
        };
        write!(f, "{}", name)
    }
}
