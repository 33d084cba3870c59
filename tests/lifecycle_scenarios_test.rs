mod common;

use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use common::*;
use taskqueue_core::models::Priority;
use taskqueue_core::orchestration::SubmitTaskRequest;
use taskqueue_core::registry::TaskHandler;
use taskqueue_core::state_machine::TaskStatus;
use taskqueue_core::TaskQueueError;

const SETTLE: Duration = Duration::from_secs(5);

#[tokio::test]
async fn test_retries_then_completes() {
    let handler = ScriptedHandler::failing_times(2);
    let ts = TestSystem::build(
        fast_config(),
        vec![("email-send", Arc::clone(&handler) as Arc<dyn TaskHandler>)],
    );
    ts.system.start();

    let task_id = ts.submit("email-send", Priority::High, 3).await;
    let task = ts.wait_for_status(&task_id, TaskStatus::Completed, SETTLE).await;

    assert_eq!(task.attempt_count, 2);
    assert!(task.completed_at.is_some());
    assert_eq!(handler.calls(), 3);
    assert!(ts.dead_letters.records().is_empty());

    let metrics = ts.system.router().metrics().await.unwrap();
    assert_eq!(metrics.completed_tasks, 1);
    assert_eq!(metrics.retried_attempts, 2);
    assert_eq!(metrics.success_rate, 100.0);
    ts.shutdown().await;
}

#[tokio::test]
async fn test_unsupported_type_persists_nothing() {
    let ts = TestSystem::build(
        fast_config(),
        vec![("email-send", ScriptedHandler::succeeding() as Arc<dyn TaskHandler>)],
    );

    let err = ts
        .system
        .router()
        .submit(SubmitTaskRequest::new(
            "unregistered-type",
            Priority::Medium,
            Some(json!({"a": 1})),
        ))
        .await
        .unwrap_err();

    assert!(matches!(err, TaskQueueError::UnsupportedTaskType { .. }));
    assert!(err.is_client_error());
    assert!(ts.store.is_empty());
    let metrics = ts.system.router().metrics().await.unwrap();
    assert_eq!(metrics.submitted_tasks, 0);
    assert_eq!(metrics.total_tasks, 0);
}

#[tokio::test]
async fn test_single_attempt_failure_dead_letters() {
    let handler = AlwaysFailHandler::new();
    let ts = TestSystem::build(
        fast_config(),
        vec![("image-process", Arc::clone(&handler) as Arc<dyn TaskHandler>)],
    );
    ts.system.start();

    let task_id = ts.submit("image-process", Priority::Low, 1).await;
    let task = ts.wait_for_status(&task_id, TaskStatus::Failed, SETTLE).await;

    assert_eq!(task.attempt_count, 1);
    assert_eq!(task.attempt_count, task.max_attempts);
    assert_eq!(handler.calls(), 1);

    let records = ts.dead_letters.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].original_task_id, task_id);
    assert_eq!(records[0].attempt_count, 1);
    assert_eq!(records[0].priority, Priority::Low);
    assert_eq!(records[0].failure_reason, "permanent failure on call 1");

    let metrics = ts.system.router().metrics().await.unwrap();
    assert_eq!(metrics.failed_tasks, 1);
    assert_eq!(metrics.failed_by_task_type["image-process"], 1);
    assert_eq!(
        ts.system
            .router()
            .dead_letter_count_by_type("image-process")
            .await
            .unwrap(),
        1
    );
    ts.shutdown().await;
}

#[tokio::test]
async fn test_exhausted_retry_budget_dead_letters_with_final_attempt() {
    let handler = AlwaysFailHandler::new();
    let ts = TestSystem::build(
        fast_config(),
        vec![("report-generate", Arc::clone(&handler) as Arc<dyn TaskHandler>)],
    );
    ts.system.start();

    let task_id = ts.submit("report-generate", Priority::Medium, 3).await;
    let task = ts.wait_for_status(&task_id, TaskStatus::Failed, SETTLE).await;

    assert_eq!(task.attempt_count, 3);
    assert_eq!(handler.calls(), 3);
    let record = ts
        .system
        .router()
        .dead_letter_for(&task_id)
        .await
        .unwrap()
        .expect("dead-letter record");
    assert_eq!(record.attempt_count, 3);
    assert_eq!(record.failure_reason, "permanent failure on call 3");
    ts.shutdown().await;
}

#[tokio::test]
async fn test_cancelled_task_is_skipped_by_worker() {
    let handler = ScriptedHandler::succeeding();
    let ts = TestSystem::build(
        fast_config(),
        vec![("email-send", Arc::clone(&handler) as Arc<dyn TaskHandler>)],
    );

    let task_id = ts.submit("email-send", Priority::Medium, 3).await;
    let view = ts.system.router().cancel(&task_id).await.unwrap();
    assert_eq!(view.status, TaskStatus::Cancelled);

    ts.system.start();
    let channels = ts.system.context().channels.clone();
    assert!(
        wait_for(SETTLE, || {
            let channels = channels.clone();
            async move { channels.depth(Priority::Medium).await.unwrap() == 0 }
        })
        .await
    );
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(handler.calls(), 0);
    assert_eq!(ts.task(&task_id).await.status, TaskStatus::Cancelled);
    let metrics = ts.system.router().metrics().await.unwrap();
    assert_eq!(metrics.completed_tasks, 0);
    assert_eq!(metrics.cancelled_tasks, 1);
    ts.shutdown().await;
}

#[tokio::test]
async fn test_cancel_conflicts_outside_pending() {
    let ts = TestSystem::build(
        fast_config(),
        vec![("email-send", ScriptedHandler::succeeding() as Arc<dyn TaskHandler>)],
    );
    ts.system.start();

    let task_id = ts.submit("email-send", Priority::High, 3).await;
    ts.wait_for_status(&task_id, TaskStatus::Completed, SETTLE).await;

    let err = ts.system.router().cancel(&task_id).await.unwrap_err();
    assert!(matches!(
        err,
        TaskQueueError::StateConflict {
            status: TaskStatus::Completed,
            ..
        }
    ));
    assert_eq!(ts.task(&task_id).await.status, TaskStatus::Completed);
    ts.shutdown().await;
}

#[tokio::test]
async fn test_concurrent_submissions_across_tiers() {
    let handler = ScriptedHandler::with_delay(Vec::new(), Duration::from_millis(2));
    let ts = Arc::new(TestSystem::build(
        fast_config(),
        vec![("email-send", Arc::clone(&handler) as Arc<dyn TaskHandler>)],
    ));

    let submissions: Vec<_> = (0..100)
        .map(|i| {
            let ts = Arc::clone(&ts);
            let priority = Priority::ALL[i % 3];
            tokio::spawn(async move { ts.submit("email-send", priority, 3).await })
        })
        .collect();
    for submission in submissions {
        submission.await.unwrap();
    }

    let router = ts.system.router();
    let metrics = router.metrics().await.unwrap();
    assert_eq!(metrics.total_tasks, 100);
    assert_eq!(metrics.submitted_tasks, 100);
    assert_eq!(metrics.submitted_by_priority[&Priority::High], 34);
    assert_eq!(metrics.submitted_by_priority[&Priority::Medium], 33);
    assert_eq!(metrics.submitted_by_priority[&Priority::Low], 33);
    assert!(metrics.total_channel_depth() <= metrics.pending_tasks + metrics.processing_tasks);

    ts.system.start();
    assert!(
        wait_for(Duration::from_secs(10), move || async move {
            router.metrics().await.unwrap().completed_tasks == 100
        })
        .await
    );

    let metrics = router.metrics().await.unwrap();
    assert_eq!(metrics.total_tasks, 100);
    assert_eq!(metrics.total_channel_depth(), 0);
    assert!(metrics.total_channel_depth() <= metrics.pending_tasks + metrics.processing_tasks);
    assert_eq!(handler.calls(), 100);
    ts.shutdown().await;
}

#[tokio::test]
async fn test_handler_timeout_routes_through_retry_policy() {
    let mut config = fast_config();
    config.execution.handler_timeout_ms = 50;
    let ts = TestSystem::build(config, vec![("slow", Arc::new(HangingHandler) as Arc<dyn TaskHandler>)]);
    ts.system.start();

    let task_id = ts.submit("slow", Priority::High, 1).await;
    let task = ts.wait_for_status(&task_id, TaskStatus::Failed, SETTLE).await;

    assert!(task
        .error_message
        .as_deref()
        .is_some_and(|message| message.contains("timed out")));
    assert_eq!(ts.dead_letters.records().len(), 1);
    ts.shutdown().await;
}

#[tokio::test]
async fn test_scheduled_submission_waits_for_not_before() {
    let handler = ScriptedHandler::succeeding();
    let ts = TestSystem::build(
        fast_config(),
        vec![("email-send", Arc::clone(&handler) as Arc<dyn TaskHandler>)],
    );
    ts.system.start();

    let not_before = Utc::now() + chrono::Duration::milliseconds(300);
    let submission = ts
        .system
        .router()
        .submit(
            SubmitTaskRequest::new("email-send", Priority::High, Some(json!({})))
                .with_not_before(not_before),
        )
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(ts.task(&submission.task_id).await.status, TaskStatus::Pending);
    assert_eq!(handler.calls(), 0);

    let task = ts
        .wait_for_status(&submission.task_id, TaskStatus::Completed, SETTLE)
        .await;
    assert!(task.started_at.is_some_and(|started| started >= not_before));
    ts.shutdown().await;
}

#[tokio::test]
async fn test_recovery_resumes_pending_work_after_restart() {
    let first = TestSystem::build(
        fast_config(),
        vec![("email-send", ScriptedHandler::succeeding() as Arc<dyn TaskHandler>)],
    );
    let task_ids = vec![
        first.submit("email-send", Priority::High, 3).await,
        first.submit("email-send", Priority::Low, 3).await,
    ];
    // Never started; channel contents are lost with the process
    first.shutdown().await;

    let handler = ScriptedHandler::succeeding();
    let second = TestSystem::with_stores(
        fast_config(),
        vec![("email-send", Arc::clone(&handler) as Arc<dyn TaskHandler>)],
        Arc::clone(&first.store),
        Arc::clone(&first.dead_letters),
    );
    let report = second.system.recover().await.unwrap();
    assert_eq!(report.republished, 2);

    second.system.start();
    for task_id in &task_ids {
        second.wait_for_status(task_id, TaskStatus::Completed, SETTLE).await;
    }
    assert_eq!(handler.calls(), 2);
    second.shutdown().await;
}
