//! In-memory mock of the production message transport
//!
//! This crate provides the transport surface the coordinator is written
//! against, without a real network: a `Message` envelope, per-partition FIFO
//! connections, and a timer service for round timeouts. Each partition is one
//! connection; sends on a connection are delivered in order.

pub mod connection;
pub mod message;
pub mod timer;

pub use connection::{PartitionHandle, PartitionInbox, connect_partitions, connection};
pub use message::Message;
pub use timer::{TimerHandle, TimerService};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_fifo_order() {
        let (handle, mut inbox) = connection();

        assert!(handle.send(Message::with_body(b"first".to_vec())));
        assert!(handle.send(Message::with_body(b"second".to_vec())));

        assert_eq!(inbox.try_recv().unwrap().body, b"first");
        assert_eq!(inbox.try_recv().unwrap().body, b"second");
        assert!(inbox.try_recv().is_none());
    }

    #[test]
    fn test_send_after_inbox_dropped() {
        let (handle, inbox) = connection();
        drop(inbox);

        assert!(!handle.send(Message::with_body(b"lost".to_vec())));
        assert!(handle.is_closed());
    }

    #[test]
    fn test_connect_partitions() {
        let (handles, mut inboxes) = connect_partitions(3);
        assert_eq!(handles.len(), 3);

        // Handles are distinct connections
        assert_ne!(handles[0], handles[1]);
        assert_ne!(handles[1], handles[2]);

        handles[1].send(Message::with_body(b"only one".to_vec()));
        assert!(inboxes[0].try_recv().is_none());
        assert!(inboxes[1].try_recv().is_some());
        assert!(inboxes[2].try_recv().is_none());
    }

    #[tokio::test]
    async fn test_timer_fires() {
        let timers = TimerService::new();
        let (tx, rx) = tokio::sync::oneshot::channel();

        let _handle = timers.schedule(std::time::Duration::from_millis(5), move || {
            let _ = tx.send(());
        });

        rx.await.expect("timer did not fire");
    }

    #[tokio::test]
    async fn test_timer_cancel_on_drop() {
        let timers = TimerService::new();
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();

        let handle = timers.schedule(std::time::Duration::from_millis(5), move || {
            let _ = tx.send(());
        });
        drop(handle);

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(rx.await.is_err());
    }
}
