use transcribo_asr::{EnqueueRequest, FailureCause, GatewayError, ItemStatus, JobType};

use crate::fixtures::gateway::Stage;
use crate::fixtures::test_queue::{LEVEL, SEGMENT_LENGTH, TestQueue, settle};

fn auth_error() -> GatewayError {
    GatewayError::Service {
        status: 401,
        message: "Not authenticated".to_string(),
    }
}

#[tokio::test]
async fn reauth_success_requeues_no_auth_and_failed_items() {
    let queue = TestQueue::spawn();
    queue.gateway.fail_once(Stage::Upload, 0, auth_error());
    queue.gateway.fail_once(Stage::Recognize, SEGMENT_LENGTH, auth_error());
    queue.gateway.fail_once(
        Stage::Recognize,
        2 * SEGMENT_LENGTH,
        GatewayError::Request("connection reset".to_string()),
    );

    let first = queue.enqueue(JobType::Asr, 0).await;
    let second = queue.enqueue(JobType::Asr, 1).await;
    let third = queue.enqueue(JobType::Asr, 2).await;
    queue.wait_for_status(first, ItemStatus::NoAuth).await;
    queue.wait_for_status(second, ItemStatus::NoAuth).await;
    queue.wait_for_status(third, ItemStatus::Failed).await;

    assert_eq!(queue.reauth.requests(), 1);
    assert_eq!(queue.notifier.count_containing("Authentication required"), 1);

    queue.reauth.succeed();
    for id in [first, second, third] {
        queue.wait_for_status(id, ItemStatus::Finished).await;
    }
    assert_eq!(queue.item(first).reauth_attempts(), 1);
    assert_eq!(queue.item(third).reauth_attempts(), 0);
    assert_eq!(queue.segment_at(0).label("OCTRA_1"), Some("transcript 0"));
}

#[tokio::test]
async fn abandoned_reauth_fails_waiting_items() {
    let queue = TestQueue::spawn();
    queue.gateway.fail_once(Stage::Upload, 0, auth_error());
    let id = queue.enqueue(JobType::Asr, 0).await;
    queue.wait_for_status(id, ItemStatus::NoAuth).await;

    queue.reauth.abandon();
    queue.wait_for_status(id, ItemStatus::Failed).await;

    assert_eq!(queue.item(id).error(), Some("re-authentication abandoned"));
    assert_eq!(queue.notifier.count_containing("Re-authentication abandoned"), 1);
    assert_eq!(queue.gateway.call_count(Stage::Upload), 1);
}

#[tokio::test]
async fn reauth_attempts_are_bounded_when_configured() {
    let queue = TestQueue::spawn_with(|config| config.max_reauth_attempts = Some(1));
    queue.gateway.fail_once(Stage::Upload, 0, auth_error());
    queue.gateway.fail_once(Stage::Upload, 0, auth_error());

    let id = queue.enqueue(JobType::Asr, 0).await;
    queue.wait_for_status(id, ItemStatus::NoAuth).await;
    queue.reauth.succeed();
    queue.wait_for_status(id, ItemStatus::Failed).await;
    settle().await;

    assert_eq!(queue.reauth.requests(), 1);
    assert_eq!(queue.item(id).reauth_attempts(), 1);
    assert!(queue.item(id).error().is_some_and(|e| e.contains("gave up")));
}

#[tokio::test]
async fn a_new_request_follows_a_resolved_one() {
    let queue = TestQueue::spawn();
    queue.gateway.fail_once(Stage::Upload, 0, auth_error());
    let id = queue.enqueue(JobType::Asr, 0).await;
    queue.wait_for_status(id, ItemStatus::NoAuth).await;
    queue.reauth.abandon();
    queue.wait_for_status(id, ItemStatus::Failed).await;

    queue.gateway.fail_once(Stage::Upload, SEGMENT_LENGTH, auth_error());
    let next = queue.enqueue(JobType::Asr, 1).await;
    queue.wait_for_status(next, ItemStatus::NoAuth).await;
    assert_eq!(queue.reauth.requests(), 2);
}

#[tokio::test]
async fn dropped_reauth_handle_counts_as_abandoned() {
    let queue = TestQueue::spawn();
    queue.gateway.fail_once(Stage::Upload, 0, auth_error());
    let id = queue.enqueue(JobType::Asr, 0).await;
    queue.wait_for_status(id, ItemStatus::NoAuth).await;

    queue.reauth.drop_pending();
    queue.wait_for_status(id, ItemStatus::Failed).await;
    assert_eq!(queue.item(id).error(), Some("re-authentication abandoned"));

    queue.gateway.fail_once(Stage::Upload, SEGMENT_LENGTH, auth_error());
    let next = queue.enqueue(JobType::Asr, 1).await;
    queue.wait_for_status(next, ItemStatus::NoAuth).await;
    assert_eq!(queue.reauth.requests(), 2);
}

#[tokio::test]
async fn reauth_success_leaves_local_failures_failed() {
    let queue = TestQueue::spawn();
    let local = queue
        .engine
        .enqueue(EnqueueRequest::new(
            JobType::WordAlignment,
            LEVEL,
            TestQueue::segment(1),
        ))
        .await
        .unwrap();
    queue.wait_for_status(local, ItemStatus::Failed).await;
    assert_eq!(queue.notifier.count_containing("requires a transcript"), 1);

    queue.gateway.fail_once(Stage::Upload, 0, auth_error());
    let waiting = queue.enqueue(JobType::Asr, 0).await;
    queue.wait_for_status(waiting, ItemStatus::NoAuth).await;

    queue.reauth.succeed();
    queue.wait_for_status(waiting, ItemStatus::Finished).await;
    settle().await;

    assert_eq!(queue.status(local), ItemStatus::Failed);
    assert_eq!(queue.item(local).failure_cause(), Some(FailureCause::Local));
    assert_eq!(queue.notifier.count_containing("requires a transcript"), 1);
}

#[tokio::test]
async fn exhausted_items_stay_failed_after_a_later_reauth() {
    let queue = TestQueue::spawn_with(|config| config.max_reauth_attempts = Some(1));
    queue.gateway.fail_once(Stage::Upload, 0, auth_error());
    queue.gateway.fail_once(Stage::Upload, 0, auth_error());
    let exhausted = queue.enqueue(JobType::Asr, 0).await;
    queue.wait_for_status(exhausted, ItemStatus::NoAuth).await;
    queue.reauth.succeed();
    queue.wait_for_status(exhausted, ItemStatus::Failed).await;

    queue.gateway.fail_once(Stage::Upload, SEGMENT_LENGTH, auth_error());
    let other = queue.enqueue(JobType::Asr, 1).await;
    queue.wait_for_status(other, ItemStatus::NoAuth).await;
    queue.reauth.succeed();
    queue.wait_for_status(other, ItemStatus::Finished).await;
    settle().await;

    assert_eq!(queue.status(exhausted), ItemStatus::Failed);
    assert_eq!(
        queue.item(exhausted).failure_cause(),
        Some(FailureCause::ReauthExhausted)
    );
    let uploads = queue
        .gateway
        .calls()
        .into_iter()
        .filter(|call| *call == (Stage::Upload, 0))
        .count();
    assert_eq!(uploads, 2);
}
