//! Worker loop: polling, isolation between events, shutdown, recovery.

mod common;

use common::{FakeClient, Harness};
use serde_json::json;
use std::time::{Duration, Instant};
use storyq::engine::WorkerState;
use storyq::engine::worker::INTERRUPTED;
use storyq::model::EventStatus;

const THREE: &[&str] = &["Design", "Implement", "Test"];

#[tokio::test]
async fn poll_once_processes_pending_in_order() {
    let h = Harness::new(FakeClient::new(), THREE);
    let first = h.submit(1, "First").await;
    let second = h.submit(2, "Second").await;
    let worker = h.worker(Duration::from_secs(60));

    let processed = worker.poll_once().await.unwrap();
    assert_eq!(processed, 2);

    assert_eq!(h.event(first).await.status, EventStatus::Completed);
    assert_eq!(h.event(second).await.status, EventStatus::Completed);

    let created = h.client.created();
    assert_eq!(created.len(), 6);
    // Story 1's tasks are all linked before story 2's.
    let parents: Vec<i64> = h.client.links().iter().map(|&(_, p)| p).collect();
    assert_eq!(parents, vec![1, 1, 1, 2, 2, 2]);

    // The two follow-up events are picked up by the next cycle.
    assert_eq!(worker.poll_once().await.unwrap(), 2);
    assert_eq!(worker.poll_once().await.unwrap(), 0);
}

#[tokio::test]
async fn bad_event_does_not_block_the_rest_of_the_cycle() {
    let h = Harness::new(FakeClient::new(), THREE);
    let bogus = h.queue.publish("bogus", &json!({})).await.unwrap();
    let good = h.submit(8, "Still runs").await;
    let worker = h.worker(Duration::from_secs(60));

    assert_eq!(worker.poll_once().await.unwrap(), 2);

    assert_eq!(h.event(bogus).await.status, EventStatus::Failed);
    assert_eq!(h.event(good).await.status, EventStatus::Completed);
}

#[tokio::test]
async fn failed_event_is_not_retried() {
    let h = Harness::new(FakeClient::failing_on(1), THREE);
    let event_id = h.submit(4, "Fails once").await;
    let worker = h.worker(Duration::from_secs(60));

    worker.poll_once().await.unwrap();
    assert_eq!(h.event(event_id).await.status, EventStatus::Failed);

    assert_eq!(worker.poll_once().await.unwrap(), 0);
    assert_eq!(h.event(event_id).await.status, EventStatus::Failed);
}

#[tokio::test]
async fn running_worker_picks_up_new_events() {
    let h = Harness::new(FakeClient::new(), THREE);
    let worker = h.worker(Duration::from_millis(20));
    let handle = worker.spawn();

    let event_id = h.submit(21, "Later").await;
    h.wait_for_status(event_id, EventStatus::Completed, Duration::from_secs(5))
        .await;

    assert!(handle.shutdown(Duration::from_secs(5)).await);
    assert_eq!(worker.state(), WorkerState::Idle);
}

#[tokio::test]
async fn stop_during_sleep_exits_promptly() {
    let h = Harness::new(FakeClient::new(), THREE);
    let worker = h.worker(Duration::from_secs(3600));
    let handle = worker.spawn();

    tokio::time::timeout(Duration::from_secs(5), async {
        while worker.state() != WorkerState::Running {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(handle.state(), WorkerState::Running);

    let started = Instant::now();
    assert!(handle.shutdown(Duration::from_secs(5)).await);
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(worker.state(), WorkerState::Idle);
}

#[tokio::test]
async fn stop_mid_cycle_finishes_current_event_and_leaves_rest_pending() {
    let h = Harness::new(FakeClient::slow(Duration::from_millis(50)), THREE);
    let first = h.submit(31, "In flight").await;
    let second = h.submit(32, "Untouched").await;
    let worker = h.worker(Duration::from_secs(3600));
    let handle = worker.spawn();

    h.wait_for_status(first, EventStatus::Processing, Duration::from_secs(5))
        .await;
    assert!(handle.shutdown(Duration::from_secs(5)).await);

    assert_eq!(h.event(first).await.status, EventStatus::Completed);
    assert_eq!(h.event(second).await.status, EventStatus::Pending);
    let processing = h
        .queue
        .list(Some(EventStatus::Processing), 100)
        .await
        .unwrap();
    assert!(processing.is_empty());
}

#[tokio::test]
async fn shutdown_aborts_after_grace_period() {
    let h = Harness::new(FakeClient::slow(Duration::from_millis(300)), THREE);
    let event_id = h.submit(41, "Stuck").await;
    let worker = h.worker(Duration::from_millis(20));
    let handle = worker.spawn();

    h.wait_for_status(event_id, EventStatus::Processing, Duration::from_secs(5))
        .await;

    let started = Instant::now();
    assert!(!handle.shutdown(Duration::from_millis(50)).await);
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(worker.state(), WorkerState::Idle);

    // The handler was aborted with the worker: nothing more happens upstream.
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(h.client.created().is_empty());
    assert!(h.completion_events().await.is_empty());

    // The next run fails the interrupted event instead of leaving it stuck.
    let handle = worker.spawn();
    h.wait_for_status(event_id, EventStatus::Failed, Duration::from_secs(5))
        .await;
    assert!(handle.shutdown(Duration::from_secs(5)).await);

    let event = h.event(event_id).await;
    assert_eq!(event.error.as_deref(), Some(INTERRUPTED));
    assert!(event.processed_at.is_some());
    let processing = h
        .queue
        .list(Some(EventStatus::Processing), 100)
        .await
        .unwrap();
    assert!(processing.is_empty());
    assert!(h.client.created().is_empty());
}

#[tokio::test]
async fn outage_during_processing_still_records_outcome() {
    let h = Harness::new(FakeClient::slow(Duration::from_millis(200)), THREE);
    let event_id = h.submit(45, "Outage mid-flight").await;
    let worker = h.worker(Duration::from_millis(20));
    let handle = worker.spawn();

    h.wait_for_status(event_id, EventStatus::Processing, Duration::from_secs(5))
        .await;
    h.db.set_unavailable(true).await;
    tokio::time::sleep(Duration::from_millis(900)).await;
    h.db.set_unavailable(false).await;

    // Storage broke under the workflow, so the event fails, but it does get
    // a terminal status once storage is back.
    h.wait_for_status(event_id, EventStatus::Failed, Duration::from_secs(5))
        .await;
    let event = h.event(event_id).await;
    assert!(event.error.unwrap().contains("database"));
    assert!(event.processed_at.is_some());

    // The worker keeps going afterwards.
    let next = h.submit(46, "After the outage").await;
    h.wait_for_status(next, EventStatus::Completed, Duration::from_secs(5))
        .await;
    assert!(handle.shutdown(Duration::from_secs(5)).await);
}

#[tokio::test]
async fn storage_outage_is_retried() {
    let h = Harness::new(FakeClient::new(), THREE);
    let event_id = h.submit(51, "After outage").await;
    h.db.set_unavailable(true).await;

    let worker = h.worker(Duration::from_millis(20));
    let handle = worker.spawn();

    // Let a few cycles fail.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(handle.state(), WorkerState::Running);

    h.db.set_unavailable(false).await;
    h.wait_for_status(event_id, EventStatus::Completed, Duration::from_secs(5))
        .await;

    assert!(handle.shutdown(Duration::from_secs(5)).await);
}

#[tokio::test]
async fn second_run_is_rejected_while_running() {
    let h = Harness::new(FakeClient::new(), THREE);
    let worker = h.worker(Duration::from_secs(3600));
    let handle = worker.spawn();

    tokio::time::timeout(Duration::from_secs(5), async {
        while worker.state() != WorkerState::Running {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    let err = worker.run().await.unwrap_err();
    assert!(err.to_string().contains("already running"));

    assert!(handle.shutdown(Duration::from_secs(5)).await);
}

#[tokio::test]
async fn worker_can_restart_after_stop() {
    let h = Harness::new(FakeClient::new(), THREE);
    let worker = h.worker(Duration::from_millis(20));

    let handle = worker.spawn();
    assert!(handle.shutdown(Duration::from_secs(5)).await);
    assert_eq!(worker.state(), WorkerState::Idle);

    let handle = worker.spawn();
    let event_id = h.submit(61, "Second run").await;
    h.wait_for_status(event_id, EventStatus::Completed, Duration::from_secs(5))
        .await;
    assert!(handle.shutdown(Duration::from_secs(5)).await);
}

#[tokio::test]
async fn every_event_ends_terminal_with_one_outcome() {
    let h = Harness::new(FakeClient::failing_on(4), THREE);
    h.submit(71, "Ok").await;
    h.submit(72, "Fails on its first task").await;
    h.queue.publish("bogus", &json!({})).await.unwrap();
    let worker = h.worker(Duration::from_secs(60));

    while worker.poll_once().await.unwrap() > 0 {}

    for event in h.queue.list(None, 100).await.unwrap() {
        assert!(event.status.is_terminal(), "event {} is {}", event.id, event.status);
        assert!(event.processed_at.is_some());
        match event.status {
            EventStatus::Completed => {
                assert!(event.result.is_some() && event.error.is_none())
            }
            _ => assert!(event.error.is_some() && event.result.is_none()),
        }
    }
}
