//! Example driving an ordered distributed commit across two mock partitions
//!
//! Two tasks play the partitions: each executes the fragments it receives,
//! reports results back to the coordinator, and logs the commit decision.
//! The main task runs one multi-partition transfer through execute, prepare,
//! and commit.
//!
//! Run with: cargo run --example two_partition_commit

use spindle_coordinator::{Coordinator, CoordinatorConfig, DistributedTransaction};
use spindle_engine::connect_partitions;
use spindle_protocol::{CommitDecision, Fragment, FragmentResponse};
use std::sync::Arc;
use tokio::sync::oneshot;

#[tokio::main]
async fn main() {
    println!("=== Ordered Distributed Commit Example ===\n");

    let (handles, inboxes) = connect_partitions(2);
    let coordinator = Coordinator::new(handles.clone(), CoordinatorConfig::default());
    println!("✓ Created coordinator over 2 partitions");

    // Spawn a task per partition that executes fragments and acknowledges
    // decisions.
    for (partition, mut inbox) in inboxes.into_iter().enumerate() {
        let coordinator = coordinator.clone();
        let handle = handles[partition].clone();
        tokio::spawn(async move {
            while let Some(msg) = inbox.recv().await {
                if let Ok(fragment) = Fragment::from_message(&msg) {
                    let work = String::from_utf8_lossy(&fragment.transaction).to_string();
                    println!(
                        "  [partition {partition}] executing txn {} fragment {:?} (last: {})",
                        fragment.id, work, fragment.last_fragment
                    );
                    let result = if fragment.transaction.is_empty() {
                        Vec::new() // prepare acknowledgement
                    } else {
                        format!("done: {work}").into_bytes()
                    };
                    coordinator
                        .response_received(&handle, FragmentResponse::ok(fragment.id, result))
                        .expect("response rejected");
                } else if let Ok(decision) = CommitDecision::from_message(&msg) {
                    println!(
                        "  [partition {partition}] txn {} decision: {}",
                        decision.id,
                        if decision.commit { "COMMIT" } else { "ABORT" }
                    );
                }
            }
        });
    }

    // A transfer touching both partitions, with a second round to come.
    let txn = DistributedTransaction::new(2, true);
    txn.send(0, b"debit alice 30".to_vec());
    txn.send(1, b"credit bob 30".to_vec());

    let (round_tx, round_rx) = oneshot::channel();
    coordinator
        .execute(&txn, move || {
            let _ = round_tx.send(());
        })
        .expect("execute failed");
    round_rx.await.unwrap();
    println!("\n✓ First round complete:");
    for (partition, result) in txn.received() {
        println!("    partition {partition}: {}", String::from_utf8_lossy(&result));
    }

    // Commit: the coordinator drives the prepare round, then the decision.
    let (done_tx, done_rx) = oneshot::channel();
    coordinator
        .finish(&txn, true, move || {
            let _ = done_tx.send(());
        })
        .expect("finish failed");
    done_rx.await.unwrap();

    println!("\n✓ Transaction committed");
    println!(
        "  last committed id per partition: [{}, {}]",
        coordinator.last_partition_commit(0),
        coordinator.last_partition_commit(1)
    );
}
