//! Behavioral tests for the durable-queue scheduler backend, run against
//! the in-memory reference queue.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use tokio::time::{Duration, Instant, sleep};

use tempo_queue::MemoryQueue;
use tempo_scheduler::{
    BackendKind, CompletedCallback, DurableScheduler, FailedCallback, JobFailure, JobHandler,
    JobOptions, JobOutput, Scheduler, SchedulerConfig, SchedulerError, create_scheduler,
};

type Completions = Arc<Mutex<Vec<(Value, JobOutput)>>>;
type Failures = Arc<Mutex<Vec<(Value, JobFailure)>>>;

fn recording_completed() -> (CompletedCallback, Completions) {
    let record: Completions = Arc::new(Mutex::new(Vec::new()));
    let callback_record = Arc::clone(&record);
    let callback: CompletedCallback = Arc::new(move |data, output| {
        let record = Arc::clone(&callback_record);
        Box::pin(async move {
            record.lock().unwrap().push((data, output));
        })
    });
    (callback, record)
}

fn recording_failed() -> (FailedCallback, Failures) {
    let record: Failures = Arc::new(Mutex::new(Vec::new()));
    let callback_record = Arc::clone(&record);
    let callback: FailedCallback = Arc::new(move |data, failure| {
        let record = Arc::clone(&callback_record);
        Box::pin(async move {
            record.lock().unwrap().push((data, failure));
        })
    });
    (callback, record)
}

fn echo_handler() -> JobHandler {
    Arc::new(|data| Box::pin(async move { Ok(data) }))
}

fn scheduler_on_memory_queue(name: &str) -> DurableScheduler {
    DurableScheduler::new(Arc::new(MemoryQueue::new(name)))
}

async fn wait_for(mut condition: impl FnMut() -> bool, budget_ms: u64) {
    let deadline = Instant::now() + Duration::from_millis(budget_ms);
    while !condition() {
        if Instant::now() >= deadline {
            panic!("condition not met within {budget_ms}ms");
        }
        sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test(start_paused = true)]
async fn durable_job_completes_through_queue_events() {
    let scheduler = scheduler_on_memory_queue("durable-basic");
    let (on_completed, completions) = recording_completed();
    let (on_failed, failures) = recording_failed();
    scheduler.on_completed(on_completed).on_failed(on_failed);

    scheduler
        .schedule(echo_handler(), json!({"test": "data"}), JobOptions::default())
        .await
        .unwrap();

    wait_for(|| !completions.lock().unwrap().is_empty(), 10_000).await;

    let completions = completions.lock().unwrap();
    assert_eq!(completions.len(), 1);
    assert_eq!(completions[0].0, json!({"test": "data"}));
    assert_eq!(completions[0].1.value, json!({"test": "data"}));
    assert_eq!(completions[0].1.attempt, 1);
    assert!(failures.lock().unwrap().is_empty());
    scheduler.stop().await;
}

#[tokio::test(start_paused = true)]
async fn durable_job_failure_reaches_failure_callback() {
    let scheduler = scheduler_on_memory_queue("durable-fail");
    let (on_completed, completions) = recording_completed();
    let (on_failed, failures) = recording_failed();
    scheduler.on_completed(on_completed).on_failed(on_failed);

    let handler: JobHandler = Arc::new(|_| Box::pin(async move { Err("boom".to_string()) }));
    scheduler
        .schedule(handler, json!({}), JobOptions::default())
        .await
        .unwrap();

    wait_for(|| !failures.lock().unwrap().is_empty(), 10_000).await;

    let failures = failures.lock().unwrap();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].1.message, "boom");
    assert!(completions.lock().unwrap().is_empty());
    scheduler.stop().await;
}

#[tokio::test(start_paused = true)]
async fn durable_retry_counting_is_queue_native() {
    let scheduler = scheduler_on_memory_queue("durable-retry");
    let (on_completed, completions) = recording_completed();
    scheduler.on_completed(on_completed);

    // Fails once, then succeeds. retry_limit 2 maps to 2 native tries
    // (total), so the second try wins and there is no backoff wait.
    let calls = Arc::new(AtomicU32::new(0));
    let handler: JobHandler = Arc::new(move |data| {
        let calls = Arc::clone(&calls);
        Box::pin(async move {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err("first try fails".to_string())
            } else {
                Ok(data)
            }
        })
    });

    scheduler
        .schedule(
            handler,
            json!({}),
            JobOptions {
                retry_limit: 2,
                ..Default::default()
            },
        )
        .await
        .unwrap();

    wait_for(|| !completions.lock().unwrap().is_empty(), 10_000).await;
    assert_eq!(completions.lock().unwrap()[0].1.attempt, 2);
    scheduler.stop().await;
}

#[tokio::test(start_paused = true)]
async fn durable_priority_orders_due_jobs() {
    let scheduler = scheduler_on_memory_queue("durable-priority");
    let (on_completed, completions) = recording_completed();
    scheduler.on_completed(on_completed);

    // Same handler for both jobs: the queue has one processor. Delay both
    // so they are pending together when they become due.
    for (label, priority) in [("low", 10), ("high", 1)] {
        scheduler
            .schedule(
                echo_handler(),
                json!({"job": label}),
                JobOptions {
                    delay_ms: Some(100),
                    priority: Some(priority),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
    }

    wait_for(|| completions.lock().unwrap().len() >= 2, 10_000).await;

    let order: Vec<String> = completions
        .lock()
        .unwrap()
        .iter()
        .map(|(data, _)| data["job"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(order, vec!["high".to_string(), "low".to_string()]);
    scheduler.stop().await;
}

#[tokio::test(start_paused = true)]
async fn durable_cron_job_repeats() {
    let scheduler = scheduler_on_memory_queue("durable-cron");
    let (on_completed, completions) = recording_completed();
    scheduler.on_completed(on_completed);

    scheduler
        .schedule(
            echo_handler(),
            json!({"tick": true}),
            JobOptions {
                cron: Some("* * * * * *".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    wait_for(|| completions.lock().unwrap().len() >= 2, 30_000).await;
    scheduler.stop().await;
}

#[tokio::test(start_paused = true)]
async fn durable_cron_job_does_not_fire_before_its_first_tick() {
    let scheduler = scheduler_on_memory_queue("durable-cron-first-tick");
    let (on_completed, completions) = recording_completed();
    scheduler.on_completed(on_completed);

    scheduler
        .schedule(
            echo_handler(),
            json!({}),
            JobOptions {
                cron: Some("0 0 0 1 1 * 2099".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    sleep(Duration::from_secs(3_600)).await;
    assert!(completions.lock().unwrap().is_empty());
    scheduler.stop().await;
}

#[tokio::test(start_paused = true)]
async fn durable_invalid_cron_fails_synchronously() {
    let scheduler = scheduler_on_memory_queue("durable-badcron");

    let err = scheduler
        .schedule(
            echo_handler(),
            json!({}),
            JobOptions {
                cron: Some("not a cron".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, SchedulerError::InvalidCron { .. }));
    scheduler.stop().await;
}

#[tokio::test(start_paused = true)]
async fn durable_stop_suppresses_pending_jobs() {
    let scheduler = scheduler_on_memory_queue("durable-stop");
    let (on_completed, completions) = recording_completed();
    let (on_failed, failures) = recording_failed();
    scheduler.on_completed(on_completed).on_failed(on_failed);

    scheduler
        .schedule(
            echo_handler(),
            json!({}),
            JobOptions {
                delay_ms: Some(1_000),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    sleep(Duration::from_millis(200)).await;
    scheduler.stop().await;

    sleep(Duration::from_millis(10_000)).await;
    assert!(completions.lock().unwrap().is_empty());
    assert!(failures.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn factory_durable_scheduler_is_usable_through_the_trait() {
    let scheduler = create_scheduler(SchedulerConfig {
        backend: BackendKind::Durable,
        queue_name: Some("factory-durable".to_string()),
    });
    let (on_completed, completions) = recording_completed();
    scheduler.on_completed(on_completed);

    scheduler
        .schedule(echo_handler(), json!({"via": "factory"}), JobOptions::default())
        .await
        .unwrap();

    wait_for(|| !completions.lock().unwrap().is_empty(), 10_000).await;
    assert_eq!(completions.lock().unwrap()[0].0, json!({"via": "factory"}));
    scheduler.stop().await;
}
