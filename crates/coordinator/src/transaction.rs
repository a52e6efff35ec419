//! Distributed transaction value object
//!
//! A `DistributedTransaction` carries one transaction's mutable state through
//! its rounds: the fragments queued for dispatch, the responses received so
//! far, per-partition participation flags, and the overall status. The
//! application owns it and queues work on it; the coordinator drives it.
//!
//! The handle is cloneable in the style of the shared engine objects: clones
//! refer to the same transaction. Whether the transaction is single- or
//! multi-partition is declared at construction; a multi-partition transaction
//! goes through prepare + decide even if it ends up touching one partition.

use parking_lot::Mutex;
use spindle_common::{TransactionStatus, TxnId};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Lifecycle of one partition within a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PartitionState {
    /// Not a participant.
    Unused,
    /// Participant; more fragments may follow.
    Active,
    /// Participant; told (or about to be told) that its last fragment is in.
    Done,
    /// Acknowledged the last fragment with an OK response.
    Prepared,
}

struct TxnInner {
    multiple_partitions: bool,
    partition_state: Vec<PartitionState>,

    /// Fragments queued for the current round, one entry per partition.
    sent: Vec<(usize, Vec<u8>)>,

    /// Partitions with a fragment in flight this round.
    outstanding: BTreeSet<usize>,

    /// Responses received this round, keyed by partition index.
    received: BTreeMap<usize, Vec<u8>>,

    status: TransactionStatus,

    /// Set once the first round has been dispatched; the participant set is
    /// frozen from then on.
    dispatched: bool,

    /// Coordinator-owned queue slot, if pending.
    state: Option<TxnId>,
}

/// Application-facing transaction handle. See the module docs.
#[derive(Clone)]
pub struct DistributedTransaction {
    inner: Arc<Mutex<TxnInner>>,
}

impl DistributedTransaction {
    /// Create a transaction over a system of `num_partitions` partitions.
    ///
    /// `multiple_partitions` declares up front whether this transaction needs
    /// two-phase completion. Single-partition transactions must be all-done
    /// when first executed (multi-round single-partition transactions are not
    /// supported).
    pub fn new(num_partitions: usize, multiple_partitions: bool) -> Self {
        assert!(num_partitions > 0);
        Self {
            inner: Arc::new(Mutex::new(TxnInner {
                multiple_partitions,
                partition_state: vec![PartitionState::Unused; num_partitions],
                sent: Vec::new(),
                outstanding: BTreeSet::new(),
                received: BTreeMap::new(),
                status: TransactionStatus::Ok,
                dispatched: false,
                state: None,
            })),
        }
    }

    /// Queue a work fragment for `partition` in the current round.
    pub fn send(&self, partition: usize, payload: Vec<u8>) {
        let mut inner = self.inner.lock();
        assert!(partition < inner.partition_state.len());
        assert!(
            !inner.status.is_abort(),
            "cannot queue work on an aborted transaction"
        );
        assert!(
            !inner.sent.iter().any(|(p, _)| *p == partition),
            "one fragment per partition per round"
        );
        match inner.partition_state[partition] {
            PartitionState::Unused => {
                assert!(
                    !inner.dispatched,
                    "participant set is frozen after the first dispatch"
                );
                if !inner.multiple_partitions {
                    let participants = inner
                        .partition_state
                        .iter()
                        .filter(|s| **s != PartitionState::Unused)
                        .count();
                    assert!(
                        participants == 0,
                        "single-partition transaction touching a second partition"
                    );
                }
                inner.partition_state[partition] = PartitionState::Active;
            }
            PartitionState::Active => {}
            PartitionState::Done | PartitionState::Prepared => {
                panic!("partition {} was already marked done", partition)
            }
        }
        inner.sent.push((partition, payload));
    }

    /// Mark `partition` as receiving its last fragment. The fragment queued
    /// for it this round will carry the prepare flag.
    pub fn set_done(&self, partition: usize) {
        let mut inner = self.inner.lock();
        assert_eq!(inner.partition_state[partition], PartitionState::Active);
        inner.partition_state[partition] = PartitionState::Done;
    }

    /// Mark the whole transaction as issuing no more work. Every still-active
    /// participant without a queued fragment gets an empty one, so each
    /// partition sees a final fragment with the prepare flag set.
    pub fn set_all_done(&self) {
        let mut inner = self.inner.lock();
        for partition in 0..inner.partition_state.len() {
            if inner.partition_state[partition] != PartitionState::Active {
                continue;
            }
            inner.partition_state[partition] = PartitionState::Done;
            if !inner.sent.iter().any(|(p, _)| *p == partition) {
                inner.sent.push((partition, Vec::new()));
            }
        }
    }

    /// True once no participant expects further fragments.
    pub fn is_all_done(&self) -> bool {
        let inner = self.inner.lock();
        inner
            .partition_state
            .iter()
            .all(|s| *s != PartitionState::Active)
    }

    /// Whether this transaction was declared multi-partition.
    pub fn multiple_partitions(&self) -> bool {
        self.inner.lock().multiple_partitions
    }

    pub fn is_participant(&self, partition: usize) -> bool {
        self.inner.lock().partition_state[partition] != PartitionState::Unused
    }

    /// True while `partition` may still be sent more fragments.
    pub fn is_active(&self, partition: usize) -> bool {
        self.inner.lock().partition_state[partition] == PartitionState::Active
    }

    /// True once `partition` acknowledged its last fragment successfully.
    pub fn is_prepared(&self, partition: usize) -> bool {
        self.inner.lock().partition_state[partition] == PartitionState::Prepared
    }

    /// Participant partition indices, in order.
    pub fn participants(&self) -> Vec<usize> {
        self.inner
            .lock()
            .partition_state
            .iter()
            .enumerate()
            .filter(|(_, s)| **s != PartitionState::Unused)
            .map(|(p, _)| p)
            .collect()
    }

    /// Overall status; any abort value is terminal.
    pub fn status(&self) -> TransactionStatus {
        self.inner.lock().status
    }

    /// Fragments queued for the current round.
    pub fn sent_fragments(&self) -> Vec<(usize, Vec<u8>)> {
        self.inner.lock().sent.clone()
    }

    /// Record that the queued fragments went out: they become the round's
    /// outstanding set, and response collection starts fresh.
    pub fn sent_messages(&self) {
        let mut inner = self.inner.lock();
        let flushed: Vec<usize> = inner.sent.iter().map(|(p, _)| *p).collect();
        inner.outstanding.extend(flushed);
        inner.sent.clear();
        inner.received.clear();
        inner.dispatched = true;
    }

    /// Integrate one partition's response for the current round.
    pub fn receive(&self, partition: usize, result: Vec<u8>, status: TransactionStatus) {
        let mut inner = self.inner.lock();
        assert!(
            inner.partition_state[partition] != PartitionState::Unused,
            "response from a non-participant"
        );
        assert!(
            inner.outstanding.contains(&partition),
            "response without an outstanding fragment"
        );
        assert!(
            !inner.received.contains_key(&partition),
            "duplicate response for partition {partition}"
        );
        inner.received.insert(partition, result);
        if status.is_abort() {
            if inner.status == TransactionStatus::Ok {
                inner.status = status;
            }
        } else if inner.partition_state[partition] == PartitionState::Done {
            inner.partition_state[partition] = PartitionState::Prepared;
        }
    }

    /// True when every outstanding fragment of the round has a response.
    pub fn received_all(&self) -> bool {
        let inner = self.inner.lock();
        inner
            .outstanding
            .iter()
            .all(|p| inner.received.contains_key(p))
    }

    /// Responses of the current round, ordered by partition index.
    pub fn received(&self) -> Vec<(usize, Vec<u8>)> {
        self.inner
            .lock()
            .received
            .iter()
            .map(|(p, r)| (*p, r.clone()))
            .collect()
    }

    pub fn has_response(&self, partition: usize) -> bool {
        self.inner.lock().received.contains_key(&partition)
    }

    /// Drop the cached response for `partition`. Used when the response was
    /// computed over speculative state that has since been invalidated; the
    /// partition will re-execute and respond again.
    pub fn remove_response(&self, partition: usize) {
        let removed = self.inner.lock().received.remove(&partition);
        debug_assert!(removed.is_some(), "no response to remove");
    }

    /// Drop empty prepare acknowledgements so the owner only sees real
    /// results. A response counts as a prepare ack when its partition has
    /// been told it got the last fragment and the payload is empty.
    pub fn remove_prepare_responses(&self) {
        let mut inner = self.inner.lock();
        let TxnInner {
            partition_state,
            received,
            ..
        } = &mut *inner;
        received.retain(|partition, result| {
            !result.is_empty()
                || matches!(
                    partition_state[*partition],
                    PartitionState::Unused | PartitionState::Active
                )
        });
    }

    /// Close out the current round. Responses stay readable until the next
    /// dispatch.
    pub fn ready_next_round(&self) {
        let mut inner = self.inner.lock();
        debug_assert!(inner.sent.is_empty());
        inner.outstanding.clear();
    }

    /// Coordinator queue slot, while pending.
    pub fn state_id(&self) -> Option<TxnId> {
        self.inner.lock().state
    }

    pub(crate) fn set_state_id(&self, state: Option<TxnId>) {
        self.inner.lock().state = state;
    }

    pub(crate) fn mark_aborted(&self, status: TransactionStatus) {
        debug_assert!(status.is_abort());
        let mut inner = self.inner.lock();
        if inner.status == TransactionStatus::Ok {
            inner.status = status;
        }
    }
}
