#![allow(clippy::disallowed_methods)]

mod common;

use std::error::Error;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use actors::{FnHandler, JobHandler, QueueError, QueueResult, SHUTDOWN_ERROR};
use queue_core::{JobState, PromotionConfig};
use tokio::sync::oneshot;

use common::{eventually, memory_queue, payload_with_message};

fn noop() -> impl JobHandler {
    FnHandler::new(|_job| async { Ok(()) })
}

fn slow(duration: Duration) -> impl JobHandler {
    FnHandler::new(move |_job| async move {
        tokio::time::sleep(duration).await;
        Ok(())
    })
}

/// Callback that counts its invocations and forwards the result.
fn counting_callback(
    calls: &Arc<AtomicUsize>,
) -> (
    impl FnOnce(QueueResult<()>) + Send + 'static,
    oneshot::Receiver<QueueResult<()>>,
) {
    let (tx, rx) = oneshot::channel();
    let calls = calls.clone();
    (
        move |result| {
            calls.fetch_add(1, Ordering::SeqCst);
            let _ = tx.send(result);
        },
        rx,
    )
}

#[tokio::test]
async fn test_empty_registry_completes_synchronously() -> Result<(), Box<dyn Error>> {
    let (_store, queue) = memory_queue();
    let calls = Arc::new(AtomicUsize::new(0));
    let (callback, mut rx) = counting_callback(&calls);

    queue.shutdown_with("", Some(Duration::from_secs(1)), callback);

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(matches!(rx.try_recv(), Ok(Ok(()))));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_filtered_shutdown_stops_only_matching_workers() -> Result<(), Box<dyn Error>> {
    let (_store, queue) = memory_queue();
    queue.process("email", 2, noop()).await?;
    queue.process("sms", 2, noop()).await?;
    assert_eq!(queue.workers().len(), 4);

    let calls = Arc::new(AtomicUsize::new(0));
    let (callback, rx) = counting_callback(&calls);
    queue.shutdown_with("email", Some(Duration::from_millis(2000)), callback);

    let result = tokio::time::timeout(Duration::from_secs(5), rx).await??;
    assert!(result.is_ok());

    let remaining: Vec<String> = queue.workers().iter().map(|w| w.job_type.clone()).collect();
    assert_eq!(remaining, vec!["sms".to_string(), "sms".to_string()]);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    queue.shutdown("", None).await?;
    assert!(queue.workers().is_empty());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_filter_matches_substrings() -> Result<(), Box<dyn Error>> {
    let (_store, queue) = memory_queue();
    queue.process("email", 1, noop()).await?;
    queue.process("voicemail", 1, noop()).await?;
    queue.process("sms", 1, noop()).await?;

    queue.shutdown("mail", None).await?;

    let remaining: Vec<String> = queue.workers().iter().map(|w| w.job_type.clone()).collect();
    assert_eq!(remaining, vec!["sms".to_string()]);

    queue.shutdown("", None).await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_callback_fires_once_for_many_workers() -> Result<(), Box<dyn Error>> {
    let (_store, queue) = memory_queue();
    queue.process("email", 5, noop()).await?;
    queue.process("sms", 3, noop()).await?;

    let calls = Arc::new(AtomicUsize::new(0));
    let (callback, rx) = counting_callback(&calls);
    queue.shutdown_with("", None, callback);

    tokio::time::timeout(Duration::from_secs(5), rx).await???;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(queue.workers().is_empty());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_shutdown_waits_for_running_job() -> Result<(), Box<dyn Error>> {
    let (_store, queue) = memory_queue();
    queue.process("email", 1, slow(Duration::from_millis(200))).await?;
    let job = queue.enqueue("email", payload_with_message("slow")).await?;

    let queue_ref = &queue;
    assert!(
        eventually(Duration::from_secs(5), || async move {
            queue_ref.count_in_state(JobState::Active).await.unwrap_or(0) == 1
        })
        .await
    );

    queue.shutdown("email", None).await?;
    assert_eq!(queue.get_job(job.id).await?.state, JobState::Complete);
    assert!(queue.workers().is_empty());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_grace_period_expiry_fails_running_job() -> Result<(), Box<dyn Error>> {
    let (_store, queue) = memory_queue();
    queue.process("email", 1, slow(Duration::from_secs(30))).await?;
    queue.process("sms", 1, noop()).await?;
    let job = queue.enqueue("email", payload_with_message("stuck")).await?;

    let queue_ref = &queue;
    assert!(
        eventually(Duration::from_secs(5), || async move {
            queue_ref.count_in_state(JobState::Active).await.unwrap_or(0) == 1
        })
        .await
    );

    let result = tokio::time::timeout(
        Duration::from_secs(5),
        queue.shutdown("", Some(Duration::from_millis(100))),
    )
    .await?;
    assert!(matches!(result, Err(QueueError::ShutdownTimeout)));

    let stored = queue.get_job(job.id).await?;
    assert_eq!(stored.state, JobState::Failed);
    assert_eq!(stored.error.as_deref(), Some(SHUTDOWN_ERROR));
    assert!(queue.workers().is_empty());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_close_stops_promoter_and_workers() -> Result<(), Box<dyn Error>> {
    let (_store, queue) = memory_queue();
    let promoter = queue
        .promote(PromotionConfig::new(Duration::from_millis(50), 10))
        .await?;
    queue.process("email", 2, noop()).await?;

    queue.close().await?;

    assert!(!promoter.is_running());
    assert!(queue.workers().is_empty());
    Ok(())
}
