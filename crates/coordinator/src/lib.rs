//! Client-side coordinator for ordered distributed transactions
//!
//! This crate orchestrates multi-round transactions over a fixed set of
//! partitions. It dispatches per-partition work fragments, integrates
//! responses, tracks cross-transaction speculative dependencies introduced by
//! out-of-order execution at partitions, decides commit/abort, and drives
//! prepare + decide completion for multi-partition transactions.
//!
//! The central pieces:
//! - [`DistributedTransaction`]: the application-facing value object holding
//!   per-round fragments and responses
//! - [`Coordinator`]: `execute` / `finish` plus the response ingress,
//!   maintaining a single global commit order for multi-partition
//!   transactions while single-partition transactions run speculatively
//!
//! ## Future Improvements (TODO)
//! - Make the commit decision durable (replication / log flush) before the
//!   completion callback runs
//! - Surface a dedicated user-visible status for round timeouts

mod coordinator;
mod error;
mod queue;
mod state;
mod transaction;

pub use coordinator::{Coordinator, CoordinatorConfig};
pub use error::{CoordinatorError, Result};
pub use queue::PendingQueue;
pub use transaction::DistributedTransaction;
