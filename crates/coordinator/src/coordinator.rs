//! Core coordinator implementation
//!
//! The coordinator accepts multi-round transactions from application code,
//! dispatches per-partition fragments, integrates responses, and drives
//! prepare + decide completion for multi-partition transactions. It preserves
//! a single global commit order for multi-partition transactions: at most one
//! of them (the head-of-line blocker) is unfinished at a time, while
//! single-partition transactions and speculative execution at the partitions
//! proceed underneath it.
//!
//! Out-of-order execution at a partition shows up as a `dependency` field on
//! the fragment response: the response was computed over the speculative
//! state of an earlier transaction. The coordinator records those edges,
//! holds rounds back until their dependencies commit, and unwinds cascading
//! aborts through the dependent graph when they do not.
//!
//! All mutation happens under one lock; round callbacks are captured while it
//! is held and invoked after it is released, so a callback may re-enter the
//! coordinator.

use crate::error::{CoordinatorError, Result};
use crate::queue::PendingQueue;
use crate::state::{RoundCallback, TransactionState};
use crate::transaction::DistributedTransaction;
use parking_lot::Mutex;
use spindle_common::{NO_DEPENDENCY, TransactionStatus, TxnId};
use spindle_engine::{PartitionHandle, TimerService};
use spindle_protocol::{CommitDecision, Fragment, FragmentResponse};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, error, trace, warn};

/// Coordinator tuning knobs.
#[derive(Debug, Clone, Default)]
pub struct CoordinatorConfig {
    /// When set, every multi-partition dispatch arms a round timer; a
    /// transaction whose round does not complete in time is aborted
    /// unconditionally (presumed deadlock). Off by default. Enabling this
    /// requires running inside a tokio runtime.
    pub response_timeout: Option<Duration>,
}

/// Client-side coordinator for ordered distributed transactions.
///
/// Holds one FIFO connection per partition; the partition index is the
/// connection's position. Responses are fed back in through
/// [`response_received`](Coordinator::response_received).
pub struct Coordinator {
    partitions: Vec<PartitionHandle>,
    config: CoordinatorConfig,
    timers: TimerService,
    weak_self: Weak<Coordinator>,
    inner: Mutex<Inner>,
}

struct Inner {
    queue: PendingQueue<TransactionState>,

    /// Largest id known to have committed at each partition; monotone.
    last_partition_commit: Vec<TxnId>,

    /// The unique multi-partition transaction whose prepare round has not yet
    /// been dispatched everywhere, or `None` when nothing blocks.
    first_unfinished_id: Option<TxnId>,
}

impl Coordinator {
    /// Create a coordinator over the given partition connections.
    pub fn new(partitions: Vec<PartitionHandle>, config: CoordinatorConfig) -> Arc<Self> {
        assert!(!partitions.is_empty());
        let partition_count = partitions.len();
        Arc::new_cyclic(|weak| Coordinator {
            partitions,
            config,
            timers: TimerService::new(),
            weak_self: weak.clone(),
            inner: Mutex::new(Inner {
                queue: PendingQueue::new(),
                last_partition_commit: vec![-1; partition_count],
                first_unfinished_id: None,
            }),
        })
    }

    /// Schedule the transaction's next round. `callback` fires once every
    /// response for the round has been integrated and no speculative
    /// dependency remains unresolved.
    pub fn execute(
        &self,
        transaction: &DistributedTransaction,
        callback: impl FnOnce() + Send + 'static,
    ) -> Result<()> {
        let mut inner = self.inner.lock();
        self.execute_locked(&mut inner, transaction, Box::new(callback))
    }

    fn execute_locked(
        &self,
        inner: &mut Inner,
        transaction: &DistributedTransaction,
        callback: RoundCallback,
    ) -> Result<()> {
        if transaction.sent_fragments().is_empty() {
            return Err(CoordinatorError::InvalidState(
                "execute requires queued fragments".to_string(),
            ));
        }
        debug_assert!(
            transaction.multiple_partitions() || transaction.is_all_done(),
            "multi-round single-partition transactions are unsupported"
        );

        let id = match transaction.state_id() {
            None => {
                let id = inner.queue.next_index();
                let state = TransactionState::new(id, transaction.clone());
                inner.queue.push_back(state);
                transaction.set_state_id(Some(id));
                debug!(
                    id,
                    multiple_partitions = transaction.multiple_partitions(),
                    "queued transaction"
                );
                id
            }
            Some(id) => {
                // Continuation of an in-flight multi-partition transaction.
                if transaction.received().is_empty() {
                    return Err(CoordinatorError::InvalidState(
                        "continuation before any round completed".to_string(),
                    ));
                }
                if inner.first_unfinished_id != Some(id) {
                    return Err(CoordinatorError::InvalidState(format!(
                        "transaction {} is not the unfinished transaction",
                        id
                    )));
                }
                id
            }
        };

        inner
            .queue
            .get_mut(id)
            .expect("freshly queued transaction missing")
            .set_callback(callback);

        // Single-partition transactions bypass head-of-line blocking; the
        // partition orders them after the blocker's fragments already there.
        let dispatch = inner.first_unfinished_id.is_none()
            || inner.first_unfinished_id == Some(id)
            || !transaction.multiple_partitions();
        if dispatch {
            self.send_fragments(inner, id)?;
        }
        Ok(())
    }

    /// Terminate a multi-partition transaction, driving a prepare round first
    /// when committing a transaction that is not yet all-done.
    pub fn finish(
        self: &Arc<Self>,
        transaction: &DistributedTransaction,
        commit: bool,
        callback: impl FnOnce() + Send + 'static,
    ) -> Result<()> {
        self.finish_boxed(transaction, commit, Box::new(callback))
    }

    fn finish_boxed(
        self: &Arc<Self>,
        transaction: &DistributedTransaction,
        commit: bool,
        callback: RoundCallback,
    ) -> Result<()> {
        if !transaction.multiple_partitions() {
            return Err(CoordinatorError::InvalidState(
                "finish applies to multi-partition transactions".to_string(),
            ));
        }
        if transaction.status() != TransactionStatus::Ok {
            return Err(CoordinatorError::InvalidState(format!(
                "cannot finish a transaction with status {}",
                transaction.status()
            )));
        }
        let Some(id) = transaction.state_id() else {
            return Err(CoordinatorError::InvalidState(
                "transaction is not pending".to_string(),
            ));
        };

        let mut callbacks = Vec::new();
        let result = {
            let mut inner = self.inner.lock();
            if commit && !transaction.is_all_done() {
                // Prepare round: every still-active participant gets a final
                // (possibly empty) fragment, and completion re-enters finish.
                transaction.set_all_done();
                debug_assert!(!transaction.sent_fragments().is_empty());
                // Weak: the state (and thus this callback) lives inside the
                // coordinator; a strong reference would be a cycle.
                let weak = self.weak_self.clone();
                let txn = transaction.clone();
                inner
                    .queue
                    .get_mut(id)
                    .expect("unfinished transaction missing from queue")
                    .set_callback(Box::new(move || match weak.upgrade() {
                        Some(coordinator) => coordinator.verify_prepare_round(&txn, callback),
                        None => callback(),
                    }));
                debug!(id, "starting prepare round");
                self.send_fragments(&mut inner, id)
            } else {
                match self.finish_transaction(&mut inner, id, commit, &mut callbacks) {
                    Ok(state) => {
                        drop(state);
                        // TODO: invoke asynchronously once the decision is
                        // made durable (replication / log flush).
                        callbacks.push(callback);
                        Ok(())
                    }
                    Err(err) => Err(err),
                }
            }
        };
        for cb in callbacks {
            cb();
        }
        result
    }

    /// Re-entered after a prepare round completes.
    fn verify_prepare_round(
        self: &Arc<Self>,
        transaction: &DistributedTransaction,
        callback: RoundCallback,
    ) {
        debug_assert!(transaction.is_all_done());
        if transaction.status() == TransactionStatus::Ok && transaction.state_id().is_some() {
            if let Err(err) = self.finish_boxed(transaction, true, callback) {
                error!(error = %err, "finishing a prepared transaction failed");
            }
        } else {
            // The prepare round aborted: the abort decision went out when the
            // round completed and the state is already gone. Hand control
            // back to the owner, who reads the status off the transaction.
            debug_assert!(transaction.state_id().is_none());
            callback();
        }
    }

    /// Ingress for partition responses. `connection` identifies the
    /// partition; late responses for already-completed transactions are
    /// ignored.
    pub fn response_received(
        &self,
        connection: &PartitionHandle,
        response: FragmentResponse,
    ) -> Result<()> {
        let mut callbacks = Vec::new();
        let result = {
            let mut inner = self.inner.lock();
            self.response_locked(&mut inner, connection, response, &mut callbacks)
        };
        for cb in callbacks {
            cb();
        }
        result
    }

    fn response_locked(
        &self,
        inner: &mut Inner,
        connection: &PartitionHandle,
        response: FragmentResponse,
        callbacks: &mut Vec<RoundCallback>,
    ) -> Result<()> {
        let partition = self
            .partitions
            .iter()
            .position(|handle| handle == connection)
            .ok_or(CoordinatorError::UnknownConnection)?;

        let id = response.id;
        if id < inner.queue.first_index() {
            // Late response for a trimmed transaction; its outcome was
            // already decided.
            debug!(id, partition, "ignoring response for a completed transaction");
            return Ok(());
        }
        if response.dependency < NO_DEPENDENCY || response.dependency >= id {
            return Err(CoordinatorError::InvalidDependency {
                id,
                dependency: response.dependency,
            });
        }

        let Some(state) = inner.queue.get(id) else {
            return Err(CoordinatorError::TransactionNotFound(id));
        };
        let transaction = state.transaction().clone();
        debug_assert!(
            !transaction.multiple_partitions()
                || inner.first_unfinished_id == Some(id)
                || (inner.first_unfinished_id.is_none_or(|f| f > id)
                    && transaction.is_all_done()),
            "response for a multi-partition transaction that should not be running"
        );

        trace!(id, partition, status = %response.status, dependency = response.dependency, "response received");
        let dependency = response.dependency();
        transaction.receive(partition, response.result, response.status);

        if let Some(dependency) = dependency {
            self.integrate_dependency(inner, id, dependency, partition, &transaction);
        }

        let resolved = inner
            .queue
            .get(id)
            .is_some_and(|state| state.dependencies_resolved());
        if transaction.received_all() && resolved {
            self.next_round(inner, id, callbacks)?;
        }
        Ok(())
    }

    /// Track (or reject) a dependency declared by a response at `partition`.
    fn integrate_dependency(
        &self,
        inner: &mut Inner,
        id: TxnId,
        dependency: TxnId,
        partition: usize,
        transaction: &DistributedTransaction,
    ) {
        let other_live = dependency >= inner.queue.first_index()
            && inner.queue.get(dependency).is_some();
        if other_live {
            let other_valid = inner
                .queue
                .get(dependency)
                .expect("dependency state vanished")
                .transaction()
                .has_response(partition);
            if other_valid {
                trace!(id, dependency, partition, "recording speculative dependency");
                inner
                    .queue
                    .get_mut(id)
                    .expect("state vanished during dependency tracking")
                    .depends_on(dependency, partition);
                inner
                    .queue
                    .get_mut(dependency)
                    .expect("dependency state vanished")
                    .add_dependent(id);
            } else {
                // The chain is already broken at this partition: our response
                // was computed over state that will be rolled back. The
                // partition re-executes and responds again.
                debug!(id, dependency, partition, "dependency already invalidated; dropping response");
                transaction.remove_response(partition);
            }
        } else {
            // TODO: record the last decided transaction per partition to tell
            // "already committed" from "aborted" without the equality guess.
            let last_commit = inner.last_partition_commit[partition];
            if dependency > last_commit {
                // The dependency was aborted before committing here.
                debug!(id, dependency, partition, "dependency aborted; dropping response");
                transaction.remove_response(partition);
            } else if dependency != last_commit {
                error!(
                    id,
                    dependency,
                    partition,
                    last_commit,
                    "dependency predates the last commit at this partition"
                );
                debug_assert_eq!(dependency, last_commit);
            }
        }
    }

    /// A round is complete: every participant responded and no earlier
    /// dependency remains. Aborted and single-partition transactions are
    /// terminally finished here; multi-partition transactions hand control
    /// back to the owner for the next round or `finish`.
    fn next_round(
        &self,
        inner: &mut Inner,
        id: TxnId,
        callbacks: &mut Vec<RoundCallback>,
    ) -> Result<()> {
        let (finished, commit) = {
            let state = inner.queue.get(id).expect("advancing unknown transaction");
            let transaction = state.transaction();
            debug_assert!(transaction.received_all() && state.dependencies_resolved());
            debug_assert!(transaction.multiple_partitions() || transaction.is_all_done());
            let ok = transaction.status() == TransactionStatus::Ok;
            (!ok || !transaction.multiple_partitions(), ok)
        };

        if finished {
            let mut state = self.finish_transaction(inner, id, commit, callbacks)?;
            if let Some(cb) = state.finished_round() {
                callbacks.push(cb);
            }
        } else if let Some(cb) = inner
            .queue
            .get_mut(id)
            .expect("advancing unknown transaction")
            .finished_round()
        {
            callbacks.push(cb);
        }
        Ok(())
    }

    /// Dispatch the queued fragments of `id`'s current round.
    fn send_fragments(&self, inner: &mut Inner, id: TxnId) -> Result<()> {
        let state = inner.queue.get(id).expect("dispatching unknown transaction");
        let transaction = state.transaction().clone();
        let fragments = transaction.sent_fragments();
        debug_assert!(!fragments.is_empty());

        if transaction.multiple_partitions() {
            debug_assert!(
                inner.first_unfinished_id.is_none() || inner.first_unfinished_id == Some(id)
            );
            #[cfg(debug_assertions)]
            for earlier in inner.queue.first_index()..id {
                if let Some(other) = inner.queue.get(earlier) {
                    debug_assert!(
                        other.transaction().is_all_done(),
                        "dispatching past an unfinished transaction"
                    );
                }
            }
        }

        for (partition, payload) in fragments {
            debug_assert!(transaction.is_participant(partition));
            let fragment = Fragment {
                id,
                multiple_partitions: transaction.multiple_partitions(),
                last_fragment: !transaction.is_active(partition),
                transaction: payload,
            };
            trace!(id, partition, last_fragment = fragment.last_fragment, "sending fragment");
            if !self.partitions[partition].send(fragment.into_message()) {
                return Err(CoordinatorError::SendFailed { partition });
            }
        }

        // Arm the deadlock timer for multi-partition rounds, when configured.
        if transaction.multiple_partitions()
            && let Some(timeout) = self.config.response_timeout
        {
            let weak = self.weak_self.clone();
            let handle = self.timers.schedule(timeout, move || {
                if let Some(coordinator) = weak.upgrade() {
                    coordinator.response_timeout(id);
                }
            });
            inner
                .queue
                .get_mut(id)
                .expect("dispatching unknown transaction")
                .start_response_timer(handle);
        }

        transaction.sent_messages();

        if transaction.is_all_done()
            && (inner.first_unfinished_id.is_none() || inner.first_unfinished_id == Some(id))
        {
            // This was the last round: look for the next multi-partition
            // transaction to dispatch.
            self.unblock_transactions(inner, id)?;
        } else if transaction.multiple_partitions() {
            inner.first_unfinished_id = Some(id);
        }
        Ok(())
    }

    /// Clear the head-of-line blocker and dispatch the first still-pending
    /// multi-partition transaction after `id`, if any.
    fn unblock_transactions(&self, inner: &mut Inner, id: TxnId) -> Result<()> {
        debug_assert!(
            inner.first_unfinished_id.is_none() || inner.first_unfinished_id == Some(id)
        );
        inner.first_unfinished_id = None;
        let start = (id + 1).max(inner.queue.first_index());
        for candidate in start..inner.queue.next_index() {
            // Single-partition transactions in the interval are already
            // running and are skipped.
            let multi = match inner.queue.get(candidate) {
                Some(state) => state.transaction().multiple_partitions(),
                None => continue,
            };
            if multi {
                debug!(unblocked = candidate, after = id, "dispatching next multi-partition transaction");
                self.send_fragments(inner, candidate)?;
                break;
            }
        }
        Ok(())
    }

    /// Send the commit/abort decision and drop the transaction from the
    /// queue, propagating the outcome through the dependent graph.
    fn finish_transaction(
        &self,
        inner: &mut Inner,
        id: TxnId,
        commit: bool,
        callbacks: &mut Vec<RoundCallback>,
    ) -> Result<TransactionState> {
        let state = inner
            .queue
            .take(id)
            .ok_or(CoordinatorError::TransactionNotFound(id))?;
        debug_assert!(state.dependencies_resolved());
        let transaction = state.transaction().clone();
        debug_assert!(transaction.is_all_done() || !commit);

        if transaction.multiple_partitions() {
            let participants = transaction.participants();
            debug_assert!(!participants.is_empty());
            let decision = CommitDecision { id, commit };
            debug!(id, commit, ?participants, "sending commit decision");
            for &partition in &participants {
                debug_assert!(transaction.is_prepared(partition) || !commit);
                if !self.partitions[partition].send(decision.into_message()) {
                    warn!(id, partition, "partition connection closed; decision dropped");
                }
                assert!(
                    id > inner.last_partition_commit[partition],
                    "commit decisions must be monotone per partition"
                );
                if commit {
                    inner.last_partition_commit[partition] = id;
                }
            }

            let dependents = state.dependent_ids();
            if !commit {
                // Cascade: every dependent loses its (id, partition) edges,
                // and with them the responses speculated on this transaction.
                for &partition in &participants {
                    for &dependent in &dependents {
                        self.remove_dependency(inner, dependent, id, partition);
                    }
                }
            } else {
                for &dependent in &dependents {
                    let dependent_state = inner
                        .queue
                        .get_mut(dependent)
                        .expect("dependent transaction not pending");
                    dependent_state.resolve_dependency(id);
                    let ready = dependent_state.transaction().received_all()
                        && dependent_state.dependencies_resolved();
                    if ready {
                        self.next_round(inner, dependent, callbacks)?;
                    }
                }
            }
        } else {
            debug_assert!(state.dependent_ids().is_empty());
            // Single partition: the decision must agree with the partition's
            // own status; nothing is sent.
            debug_assert_eq!(commit, transaction.status() == TransactionStatus::Ok);
        }

        transaction.set_state_id(None);
        inner.queue.trim_front();

        if inner.first_unfinished_id == Some(id) {
            // Only an abort can finish the unfinished transaction here; a
            // commit would have cleared the blocker during its prepare round.
            debug_assert!(!commit && transaction.multiple_partitions());
            self.unblock_transactions(inner, id)?;
        }
        Ok(state)
    }

    /// Drop the `(other_id, partition)` dependency from transaction `id` and
    /// recurse through its dependents. Terminates because every removal
    /// shrinks the dependency multiset and edges only point to smaller ids.
    fn remove_dependency(
        &self,
        inner: &mut Inner,
        id: TxnId,
        other_id: TxnId,
        partition: usize,
    ) -> bool {
        let Some(state) = inner.queue.get_mut(id) else {
            return false;
        };
        if !state.remove_dependency(other_id, partition) {
            return false;
        }
        trace!(id, other_id, partition, "cascading dependency removal");
        let dependents = state.dependent_ids();
        for dependent in dependents {
            let removed = self.remove_dependency(inner, dependent, id, partition);
            if removed
                && inner
                    .queue
                    .get(dependent)
                    .is_none_or(|d| !d.has_dependency_on(id))
                && let Some(state) = inner.queue.get_mut(id)
            {
                // The last edge from the dependent to us is gone.
                state.remove_dependent(dependent);
            }
        }
        true
    }

    /// Round timeout: abort unconditionally, presuming deadlock. The pending
    /// round callback runs so the owner observes the abort.
    pub fn response_timeout(&self, id: TxnId) {
        let mut callbacks = Vec::new();
        {
            let mut inner = self.inner.lock();
            if id < inner.queue.first_index() || inner.queue.get(id).is_none() {
                return; // completed while the timer fired
            }
            warn!(id, "round timed out; aborting (presumed deadlock)");
            let state = inner.queue.get_mut(id).expect("state vanished");
            let transaction = state.transaction().clone();
            transaction.mark_aborted(TransactionStatus::AbortDeadlock);

            // Its own speculative reads are moot; unhook them so earlier
            // transactions do not later resolve a ghost.
            let others = state.dependency_ids();
            state.clear_dependencies();
            for other in others {
                if let Some(other_state) = inner.queue.get_mut(other) {
                    other_state.remove_dependent(id);
                }
            }

            match self.finish_transaction(&mut inner, id, false, &mut callbacks) {
                Ok(mut state) => {
                    if let Some(cb) = state.finished_round() {
                        callbacks.push(cb);
                    }
                }
                Err(err) => error!(id, error = %err, "failed to abort timed-out transaction"),
            }
        }
        for cb in callbacks {
            cb();
        }
    }

    /// Id of the multi-partition transaction currently blocking later ones,
    /// if any.
    pub fn first_unfinished_id(&self) -> Option<TxnId> {
        self.inner.lock().first_unfinished_id
    }

    /// Largest id known to have committed at `partition` (`-1` initially).
    pub fn last_partition_commit(&self, partition: usize) -> TxnId {
        self.inner.lock().last_partition_commit[partition]
    }

    /// True when no transaction is in flight.
    pub fn is_idle(&self) -> bool {
        self.inner.lock().queue.is_empty()
    }
}
