mod support;

use std::{
    collections::HashSet,
    sync::{Arc, Mutex},
    time::Duration,
};

use courier_core::{
    FlushExhausted, WriterError,
    snapshot::{FileSnapshotStore, SnapshotStore},
    writer::{BufferedWriter, WriterConfig},
};
use courier_model::{Message, ModelError};
use tokio::{sync::broadcast::error::TryRecvError, time::sleep};

use support::{
    MemorySnapshots, ScriptedStore, contents, message, settle, writer_config,
};

async fn start(config: WriterConfig, store: &Arc<ScriptedStore>) -> BufferedWriter {
    BufferedWriter::start(
        config,
        store.clone(),
        Arc::new(MemorySnapshots::default()),
    )
    .await
    .unwrap()
}

#[tokio::test(start_paused = true)]
async fn every_submission_is_persisted_once_in_order() {
    let store = Arc::new(ScriptedStore::new());
    let writer = start(writer_config(10, 1_000), &store).await;

    for i in 0..10 {
        writer.submit(message(i)).unwrap();
    }
    settle().await;
    for i in 10..25 {
        writer.submit(message(i)).unwrap();
    }
    sleep(Duration::from_secs(2)).await;

    let batch_lens: Vec<usize> = store.calls().iter().map(Vec::len).collect();
    assert_eq!(batch_lens, [10, 15]);

    let persisted = writer.list_all().await.unwrap();
    let expected: Vec<String> = (0..25).map(|i| format!("m{i}")).collect();
    assert_eq!(contents(&persisted), expected);

    let ids: HashSet<_> = persisted.iter().filter_map(|m| m.id).collect();
    assert_eq!(ids.len(), 25);
    assert_eq!(writer.pending_len(), 0);
}

#[tokio::test(start_paused = true)]
async fn full_batch_flushes_without_waiting_for_timeout() {
    let store = Arc::new(ScriptedStore::new());
    let writer = start(writer_config(5, 10_000), &store).await;

    for i in 0..5 {
        writer.submit(message(i)).unwrap();
    }
    sleep(Duration::from_millis(10)).await;

    assert_eq!(store.calls(), [["m0", "m1", "m2", "m3", "m4"]]);

    // The batch timer armed by the first message was cancelled.
    sleep(Duration::from_secs(30)).await;
    assert_eq!(store.call_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn partial_batch_flushes_when_timeout_elapses() {
    let store = Arc::new(ScriptedStore::new());
    let writer = start(writer_config(10, 1_000), &store).await;

    writer.submit(message(0)).unwrap();
    sleep(Duration::from_millis(500)).await;
    assert_eq!(store.call_count(), 0);

    writer.submit(message(1)).unwrap();
    sleep(Duration::from_millis(600)).await;
    assert_eq!(store.calls(), [["m0", "m1"]]);
    assert_eq!(writer.pending_len(), 0);
}

#[tokio::test(start_paused = true)]
async fn slow_store_never_sees_overlapping_flushes() {
    let store = Arc::new(ScriptedStore::gated());
    let writer = start(writer_config(3, 1_000), &store).await;

    for i in 0..3 {
        writer.submit(message(i)).unwrap();
    }
    settle().await;
    for i in 3..8 {
        writer.submit(message(i)).unwrap();
    }
    sleep(Duration::from_secs(5)).await;

    assert_eq!(store.call_count(), 1);
    let stats = writer.stats();
    assert!(stats.flush_in_progress);
    assert_eq!(stats.pending, 5);

    store.release(2);
    sleep(Duration::from_millis(10)).await;

    let calls = store.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[1], ["m3", "m4", "m5", "m6", "m7"]);
    assert_eq!(store.max_in_flight(), 1);
    assert_eq!(store.persisted_len(), 8);
    assert!(!writer.stats().flush_in_progress);
}

#[tokio::test(start_paused = true)]
async fn failed_batch_is_retried_ahead_of_later_arrivals() {
    let store = Arc::new(ScriptedStore::new());
    store.fail_next(2);
    let writer = start(writer_config(10, 50), &store).await;
    let mut failures = writer.failures();

    for i in 0..3 {
        writer.submit(message(i)).unwrap();
    }
    // Timer flush at 50ms fails; first retry due at 150ms.
    sleep(Duration::from_millis(60)).await;
    assert_eq!(store.call_count(), 1);
    assert_eq!(writer.pending_len(), 3);
    assert_eq!(writer.stats().retry_attempts, 1);

    writer.submit(message(3)).unwrap();
    // Retry at 150ms fails; second retry due at 350ms.
    sleep(Duration::from_millis(100)).await;
    assert_eq!(store.calls()[1], ["m0", "m1", "m2", "m3"]);
    assert_eq!(writer.stats().retry_attempts, 2);

    writer.submit(message(4)).unwrap();
    sleep(Duration::from_millis(300)).await;

    let calls = store.calls();
    assert_eq!(calls.len(), 3);
    assert_eq!(calls[2], ["m0", "m1", "m2", "m3", "m4"]);
    let persisted = writer.list_all().await.unwrap();
    assert_eq!(contents(&persisted), ["m0", "m1", "m2", "m3", "m4"]);
    assert_eq!(writer.stats().retry_attempts, 0);
    assert!(matches!(failures.try_recv(), Err(TryRecvError::Empty)));
}

#[tokio::test(start_paused = true)]
async fn exhausted_retries_are_published_and_messages_stay_queued() {
    let store = Arc::new(ScriptedStore::new());
    store.fail_next(3);
    let config = WriterConfig {
        max_retry_attempts: 2,
        base_retry_delay: Duration::from_millis(10),
        ..writer_config(10, 10)
    };
    let writer = start(config, &store).await;
    let mut failures = writer.failures();

    writer.submit(message(0)).unwrap();
    let exhausted = tokio::time::timeout(Duration::from_secs(60), failures.recv())
        .await
        .expect("exhaustion published")
        .unwrap();

    assert_eq!(exhausted.attempts, 2);
    assert_eq!(exhausted.pending, 1);
    assert_eq!(store.call_count(), 3);
    assert_eq!(writer.pending(), [message(0)]);

    // Nothing retries on its own once the budget is spent.
    sleep(Duration::from_secs(5)).await;
    assert_eq!(store.call_count(), 3);

    // The writer still accepts work and the next cycle carries the old batch.
    writer.submit(message(1)).unwrap();
    sleep(Duration::from_millis(50)).await;
    assert_eq!(store.calls()[3], ["m0", "m1"]);
    assert_eq!(writer.pending_len(), 0);
}

#[tokio::test(start_paused = true)]
async fn full_batch_during_backoff_flushes_immediately() {
    let store = Arc::new(ScriptedStore::new());
    store.fail_next(1);
    let config = WriterConfig {
        base_retry_delay: Duration::from_secs(10),
        ..writer_config(2, 1_000)
    };
    let writer = start(config, &store).await;

    writer.submit(message(0)).unwrap();
    writer.submit(message(1)).unwrap();
    settle().await;
    assert_eq!(store.call_count(), 1);
    assert_eq!(writer.stats().retry_attempts, 1);

    writer.submit(message(2)).unwrap();
    sleep(Duration::from_millis(10)).await;
    assert_eq!(store.calls()[1], ["m0", "m1", "m2"]);

    // The pending retry was superseded, not left to fire on an empty queue.
    sleep(Duration::from_secs(20)).await;
    assert_eq!(store.call_count(), 2);
    assert_eq!(writer.stats().retry_attempts, 0);
}

#[tokio::test(start_paused = true)]
async fn persisted_handlers_see_each_message_in_batch_order() {
    let store = Arc::new(ScriptedStore::new());
    let writer = start(writer_config(3, 1_000), &store).await;

    let seen = Arc::new(Mutex::new(Vec::new()));
    for name in ["first", "second"] {
        let seen = Arc::clone(&seen);
        writer.on_persisted(move |message: &Message| {
            assert!(message.is_persisted());
            seen.lock()
                .unwrap()
                .push(format!("{name}:{}", message.content));
        });
    }

    for i in 0..3 {
        writer.submit(message(i)).unwrap();
    }
    sleep(Duration::from_millis(10)).await;

    assert_eq!(
        *seen.lock().unwrap(),
        [
            "first:m0", "second:m0", "first:m1", "second:m1", "first:m2",
            "second:m2"
        ]
    );
    assert_eq!(writer.stats().persisted, 3);
}

#[tokio::test(start_paused = true)]
async fn submit_rejects_invalid_content() {
    let store = Arc::new(ScriptedStore::new());
    let config = WriterConfig {
        max_content_length: 5,
        ..writer_config(10, 1_000)
    };
    let writer = start(config, &store).await;

    assert!(matches!(
        writer.submit(Message::new("   ")),
        Err(WriterError::InvalidMessage(ModelError::EmptyContent))
    ));
    assert!(matches!(
        writer.submit(Message::new("too long")),
        Err(WriterError::InvalidMessage(ModelError::ContentTooLong {
            len: 8,
            max: 5
        }))
    ));
    assert_eq!(writer.pending_len(), 0);
}

#[tokio::test(start_paused = true)]
async fn shutdown_snapshots_pending_and_restart_recovers_it() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("data/pending-messages.json");

    let first_store = Arc::new(ScriptedStore::new());
    let writer = BufferedWriter::start(
        writer_config(10, 10_000),
        first_store.clone(),
        Arc::new(FileSnapshotStore::new(&path)),
    )
    .await
    .unwrap();

    let submitted: Vec<Message> = (0..3).map(message).collect();
    for m in &submitted {
        writer.submit(m.clone()).unwrap();
    }

    assert_eq!(writer.shutdown().await.unwrap(), 3);
    assert!(path.exists());
    assert!(first_store.is_closed());
    assert_eq!(first_store.call_count(), 0);
    assert!(matches!(
        writer.submit(message(9)),
        Err(WriterError::StoreUnavailable)
    ));
    assert_eq!(writer.shutdown().await.unwrap(), 0);

    let second_store = Arc::new(ScriptedStore::new());
    let restarted = BufferedWriter::start(
        writer_config(10, 10_000),
        second_store.clone(),
        Arc::new(FileSnapshotStore::new(&path)),
    )
    .await
    .unwrap();

    assert_eq!(restarted.pending(), submitted);
    assert!(!path.exists());

    sleep(Duration::from_secs(11)).await;
    let persisted = restarted.list_all().await.unwrap();
    assert_eq!(contents(&persisted), ["m0", "m1", "m2"]);
}

#[tokio::test(start_paused = true)]
async fn corrupt_snapshot_is_discarded_on_start() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pending-messages.json");
    std::fs::write(&path, b"{ not a message list").unwrap();

    let snapshots = Arc::new(FileSnapshotStore::new(&path));
    let writer = BufferedWriter::start(
        writer_config(10, 1_000),
        Arc::new(ScriptedStore::new()),
        snapshots.clone(),
    )
    .await
    .unwrap();

    assert_eq!(writer.pending_len(), 0);
    assert!(!path.exists());
    assert!(snapshots.read().await.unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn shutdown_waits_for_in_flight_flush() {
    let store = Arc::new(ScriptedStore::gated());
    let snapshots = Arc::new(MemorySnapshots::default());
    let writer = BufferedWriter::start(
        writer_config(2, 1_000),
        store.clone(),
        snapshots.clone(),
    )
    .await
    .unwrap();

    writer.submit(message(0)).unwrap();
    writer.submit(message(1)).unwrap();
    settle().await;
    writer.submit(message(2)).unwrap();

    let shutdown = tokio::spawn({
        let writer = writer.clone();
        async move { writer.shutdown().await }
    });
    settle().await;
    assert!(!shutdown.is_finished());
    assert!(!store.is_closed());

    store.release(1);
    let saved = shutdown.await.unwrap().unwrap();

    assert_eq!(saved, 1);
    assert_eq!(store.persisted_len(), 2);
    assert_eq!(store.call_count(), 1);
    let snapshot = snapshots.read().await.unwrap().unwrap();
    assert_eq!(contents(&snapshot), ["m2"]);
}

#[tokio::test(start_paused = true)]
async fn batch_failing_during_shutdown_lands_in_snapshot() {
    let store = Arc::new(ScriptedStore::gated());
    store.fail_next(1);
    let snapshots = Arc::new(MemorySnapshots::default());
    let writer = BufferedWriter::start(
        writer_config(2, 1_000),
        store.clone(),
        snapshots.clone(),
    )
    .await
    .unwrap();
    let mut failures = writer.failures();

    writer.submit(message(0)).unwrap();
    writer.submit(message(1)).unwrap();
    settle().await;

    let shutdown = tokio::spawn({
        let writer = writer.clone();
        async move { writer.shutdown().await }
    });
    settle().await;
    store.release(1);

    assert_eq!(shutdown.await.unwrap().unwrap(), 2);
    let snapshot = snapshots.read().await.unwrap().unwrap();
    assert_eq!(contents(&snapshot), ["m0", "m1"]);
    assert_eq!(store.call_count(), 1);
    assert!(matches!(failures.try_recv(), Err(TryRecvError::Empty)));
}

#[tokio::test(start_paused = true)]
async fn panicking_handler_releases_the_flush_and_shutdown_completes() {
    let store = Arc::new(ScriptedStore::new());
    let writer = start(writer_config(2, 1_000), &store).await;
    writer.on_persisted(|message: &Message| {
        if message.content == "m0" {
            panic!("handler rejected {}", message.content);
        }
    });

    writer.submit(message(0)).unwrap();
    writer.submit(message(1)).unwrap();
    sleep(Duration::from_millis(10)).await;

    // The store acknowledged the batch, so nothing is queued again.
    let stats = writer.stats();
    assert!(!stats.flush_in_progress);
    assert_eq!(stats.pending, 0);
    assert_eq!(store.persisted_len(), 2);

    for i in 2..6 {
        writer.submit(message(i)).unwrap();
    }
    sleep(Duration::from_millis(10)).await;

    assert_eq!(
        store.calls(),
        [vec!["m0", "m1"], vec!["m2", "m3"], vec!["m4", "m5"]]
    );
    assert_eq!(store.persisted_len(), 6);

    let saved = tokio::time::timeout(Duration::from_secs(60), writer.shutdown())
        .await
        .expect("shutdown finished")
        .unwrap();
    assert_eq!(saved, 0);
}

#[tokio::test(start_paused = true)]
async fn panicking_store_requeues_the_batch_for_the_snapshot() {
    let store = Arc::new(ScriptedStore::new());
    store.panic_next(1);
    let snapshots = Arc::new(MemorySnapshots::default());
    let writer = BufferedWriter::start(
        writer_config(2, 1_000),
        store.clone(),
        snapshots.clone(),
    )
    .await
    .unwrap();

    writer.submit(message(0)).unwrap();
    writer.submit(message(1)).unwrap();
    sleep(Duration::from_millis(10)).await;

    let stats = writer.stats();
    assert!(!stats.flush_in_progress);
    assert_eq!(stats.failed_flushes, 1);
    assert_eq!(contents(&writer.pending()), ["m0", "m1"]);
    assert_eq!(store.persisted_len(), 0);

    let saved = tokio::time::timeout(Duration::from_secs(60), writer.shutdown())
        .await
        .expect("shutdown finished")
        .unwrap();

    assert_eq!(saved, 2);
    assert_eq!(store.call_count(), 1);
    let snapshot = snapshots.read().await.unwrap().unwrap();
    assert_eq!(contents(&snapshot), ["m0", "m1"]);
}

#[test]
fn exhaustion_error_names_attempts_and_backlog() {
    let err = FlushExhausted {
        attempts: 3,
        pending: 12,
        reason: "store unavailable: timeout".into(),
    };
    assert_eq!(
        err.to_string(),
        "flush failed after 3 retry attempts with 12 messages pending: store unavailable: timeout"
    );
}
