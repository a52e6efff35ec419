//! Coordinator-assigned transaction identifiers
//!
//! Ids are non-negative, monotone, and equal to the transaction's slot index
//! in the coordinator's pending queue. Partitions echo the id back in every
//! response, which is how responses are matched to queue slots.

/// Coordinator-assigned transaction id. Non-negative for live transactions;
/// the wire uses negative sentinels (see [`NO_DEPENDENCY`]).
pub type TxnId = i32;

/// Wire sentinel in `FragmentResponse::dependency` meaning "no dependency".
pub const NO_DEPENDENCY: TxnId = -1;
