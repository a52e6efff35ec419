//! Per-partition FIFO connections
//!
//! A connection is an unbounded in-memory channel: the coordinator holds the
//! [`PartitionHandle`] (send half), the partition under test holds the
//! [`PartitionInbox`]. Delivery order matches send order, which is the FIFO
//! guarantee the coordinator's ordering invariants rely on.

use crate::Message;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(0);

/// Send half of a partition connection. Cloneable; clones refer to the same
/// underlying connection and compare equal.
#[derive(Debug, Clone)]
pub struct PartitionHandle {
    id: u64,
    tx: mpsc::UnboundedSender<Message>,
}

impl PartitionHandle {
    /// Send a message on this connection. Returns `false` if the receiving
    /// side has gone away.
    pub fn send(&self, message: Message) -> bool {
        self.tx.send(message).is_ok()
    }

    /// Whether the receiving side has been dropped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Stable identity of the underlying connection.
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl PartialEq for PartitionHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for PartitionHandle {}

/// Receive half of a partition connection.
#[derive(Debug)]
pub struct PartitionInbox {
    rx: mpsc::UnboundedReceiver<Message>,
}

impl PartitionInbox {
    /// Wait for the next message.
    pub async fn recv(&mut self) -> Option<Message> {
        self.rx.recv().await
    }

    /// Take the next message if one is already queued.
    pub fn try_recv(&mut self) -> Option<Message> {
        self.rx.try_recv().ok()
    }

    /// Drain everything currently queued.
    pub fn drain(&mut self) -> Vec<Message> {
        let mut out = Vec::new();
        while let Some(msg) = self.try_recv() {
            out.push(msg);
        }
        out
    }
}

/// Create a single partition connection.
pub fn connection() -> (PartitionHandle, PartitionInbox) {
    let (tx, rx) = mpsc::unbounded_channel();
    let id = NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);
    (PartitionHandle { id, tx }, PartitionInbox { rx })
}

/// Create connections for `count` partitions. The handle at index `p` is the
/// coordinator's connection to partition `p`.
pub fn connect_partitions(count: usize) -> (Vec<PartitionHandle>, Vec<PartitionInbox>) {
    let mut handles = Vec::with_capacity(count);
    let mut inboxes = Vec::with_capacity(count);
    for _ in 0..count {
        let (handle, inbox) = connection();
        handles.push(handle);
        inboxes.push(inbox);
    }
    (handles, inboxes)
}
