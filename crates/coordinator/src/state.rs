//! Per-transaction coordinator-side record
//!
//! A `TransactionState` lives in the coordinator's pending queue at the slot
//! equal to its manager id. It carries the pending round callback, the round
//! timer, and the two sides of the speculative dependency graph:
//!
//! - `dependencies`: earlier transactions this one read speculative state
//!   from, keyed by their id, with the partition indices where it happened
//! - `dependents`: ids of later transactions that declared a dependency on
//!   this one (back-pointers; the owning edge is always the queue slot)

use crate::transaction::DistributedTransaction;
use spindle_common::TxnId;
use spindle_engine::TimerHandle;
use std::collections::{BTreeMap, BTreeSet};

/// Completion callback for one round. Captured and cleared before invocation;
/// the owner may re-enter the coordinator (or drop the transaction) from it.
pub(crate) type RoundCallback = Box<dyn FnOnce() + Send + 'static>;

pub(crate) struct TransactionState {
    manager_id: TxnId,

    /// Detached once the callback of an all-done single-partition round has
    /// been captured, because the callback owner may drop the transaction.
    transaction: Option<DistributedTransaction>,

    callback: Option<RoundCallback>,

    /// At most one live round timeout; dropping the handle cancels it.
    timer: Option<TimerHandle>,

    dependencies: BTreeMap<TxnId, Vec<usize>>,
    dependents: BTreeSet<TxnId>,
}

impl TransactionState {
    pub fn new(manager_id: TxnId, transaction: DistributedTransaction) -> Self {
        assert!(manager_id >= 0);
        Self {
            manager_id,
            transaction: Some(transaction),
            callback: None,
            timer: None,
            dependencies: BTreeMap::new(),
            dependents: BTreeSet::new(),
        }
    }

    pub fn transaction(&self) -> &DistributedTransaction {
        self.transaction
            .as_ref()
            .expect("transaction already detached")
    }

    pub fn set_callback(&mut self, callback: RoundCallback) {
        assert!(self.callback.is_none(), "round callback already pending");
        self.callback = Some(callback);
    }

    /// Arm (or re-arm) the round timeout.
    pub fn start_response_timer(&mut self, handle: TimerHandle) {
        self.timer = Some(handle);
    }

    /// Mark that we depend on `other_id` at `partition`.
    pub fn depends_on(&mut self, other_id: TxnId, partition: usize) {
        assert!(0 <= other_id && other_id < self.manager_id);
        debug_assert!(self.transaction().is_participant(partition));
        let partitions = self.dependencies.entry(other_id).or_default();
        assert!(
            !partitions.contains(&partition),
            "dependency ({other_id}, {partition}) recorded twice"
        );
        partitions.push(partition);
    }

    pub fn has_dependency_on(&self, other_id: TxnId) -> bool {
        self.dependencies.contains_key(&other_id)
    }

    /// `other_id` committed: the whole entry goes away.
    pub fn resolve_dependency(&mut self, other_id: TxnId) {
        let removed = self.dependencies.remove(&other_id);
        assert!(removed.is_some(), "resolving an unrecorded dependency");
    }

    /// Drop the `(other_id, partition)` pair, if recorded. Returns whether it
    /// was. Absence is normal: cascading abort enumerates dependents times
    /// participants. When the pair was recorded, the cached response at
    /// `partition` was speculative on `other_id` and is dropped with it.
    pub fn remove_dependency(&mut self, other_id: TxnId, partition: usize) -> bool {
        let Some(partitions) = self.dependencies.get_mut(&other_id) else {
            return false;
        };
        let Some(position) = partitions.iter().position(|p| *p == partition) else {
            return false;
        };
        partitions.remove(position);
        if partitions.is_empty() {
            self.dependencies.remove(&other_id);
        }
        self.transaction().remove_response(partition);
        true
    }

    pub fn add_dependent(&mut self, other_id: TxnId) {
        assert_ne!(other_id, self.manager_id);
        self.dependents.insert(other_id);
    }

    pub fn remove_dependent(&mut self, other_id: TxnId) {
        self.dependents.remove(&other_id);
    }

    pub fn dependent_ids(&self) -> Vec<TxnId> {
        self.dependents.iter().copied().collect()
    }

    pub fn dependency_ids(&self) -> Vec<TxnId> {
        self.dependencies.keys().copied().collect()
    }

    pub fn clear_dependencies(&mut self) {
        self.dependencies.clear();
    }

    pub fn dependencies_resolved(&self) -> bool {
        self.dependencies.is_empty()
    }

    /// Close out the round and hand back the captured callback. The
    /// transaction is detached first when the callback owner may drop it.
    pub fn finished_round(&mut self) -> Option<RoundCallback> {
        let transaction = self
            .transaction
            .as_ref()
            .expect("finishing a round on a detached state");
        let all_done = !transaction.multiple_partitions() && transaction.is_all_done();
        transaction.remove_prepare_responses();
        transaction.ready_next_round();
        if all_done {
            self.transaction = None;
        }
        self.timer = None;
        self.callback.take()
    }
}
