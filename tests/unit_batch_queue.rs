use serde_json::json;
use spreadsheet_preview::model::ProposedOperation;
use spreadsheet_preview::queue::{BatchQueue, BatchQueueConfig};
use std::time::Duration;
use tokio::sync::mpsc;

fn config() -> BatchQueueConfig {
    BatchQueueConfig {
        debounce: Duration::from_millis(300),
        max_wait: Duration::from_millis(1_000),
        flush_threshold: 10,
    }
}

fn op(id: usize) -> ProposedOperation {
    ProposedOperation::new(
        format!("r{id}"),
        "write_range",
        json!({"range": format!("A{}", id + 1), "values": [[id]]}),
    )
}

#[tokio::test(start_paused = true)]
async fn rapid_adds_coalesce_into_one_flush() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let queue = BatchQueue::new(config(), tx);

    for i in 0..5 {
        queue.add(op(i));
    }
    tokio::time::sleep(Duration::from_millis(400)).await;

    let batch = rx.try_recv().expect("one flush");
    assert_eq!(batch.len(), 5);
    assert!(rx.try_recv().is_err(), "exactly one flush");
    assert_eq!(queue.pending_len(), 0);
}

#[tokio::test(start_paused = true)]
async fn single_add_flushes_after_debounce() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let queue = BatchQueue::new(config(), tx);

    queue.add(op(0));
    tokio::time::sleep(Duration::from_millis(299)).await;
    assert!(rx.try_recv().is_err(), "debounce not yet elapsed");

    tokio::time::sleep(Duration::from_millis(2)).await;
    let batch = rx.try_recv().expect("debounce flush");
    assert_eq!(batch.len(), 1);
    assert!(rx.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn each_add_resets_only_the_debounce_timer() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let queue = BatchQueue::new(config(), tx);

    queue.add(op(0));
    tokio::time::sleep(Duration::from_millis(200)).await;
    queue.add(op(1));
    tokio::time::sleep(Duration::from_millis(200)).await;
    // t=400: first debounce (t=300) was reset by the second add.
    assert!(rx.try_recv().is_err());

    tokio::time::sleep(Duration::from_millis(150)).await;
    // t=550: second debounce fired at t=500.
    let batch = rx.try_recv().expect("flush after quiet period");
    assert_eq!(batch.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn max_wait_guarantees_progress_under_continuous_arrival() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let queue = BatchQueue::new(config(), tx);

    for i in 0..5 {
        queue.add(op(i));
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
    // t=1000: debounce keeps getting reset, but max-wait fires anyway.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let batch = rx.try_recv().expect("max-wait flush");
    assert_eq!(batch.len(), 5);
}

#[tokio::test(start_paused = true)]
async fn oversized_batch_flushes_immediately() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let queue = BatchQueue::new(config(), tx);

    queue.add_batch((0..11).map(op).collect());

    // No timer needed; the flush happened synchronously.
    let batch = rx.try_recv().expect("size-triggered flush");
    assert_eq!(batch.len(), 11);
}

#[tokio::test(start_paused = true)]
async fn manual_flush_bypasses_timers() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let queue = BatchQueue::new(config(), tx);

    queue.add(op(0));
    queue.flush();
    let batch = rx.try_recv().expect("manual flush");
    assert_eq!(batch.len(), 1);

    // Timers were cleared; nothing fires later.
    tokio::time::sleep(Duration::from_millis(1_500)).await;
    assert!(rx.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn clear_drops_operations_without_notifying() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let queue = BatchQueue::new(config(), tx);

    queue.add(op(0));
    queue.add(op(1));
    queue.clear();
    assert_eq!(queue.pending_len(), 0);

    tokio::time::sleep(Duration::from_millis(1_500)).await;
    assert!(rx.try_recv().is_err(), "cleared queue never flushes");
}

#[tokio::test(start_paused = true)]
async fn flush_on_empty_queue_is_a_no_op() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let queue = BatchQueue::new(config(), tx);

    queue.flush();
    assert!(rx.try_recv().is_err());
}
