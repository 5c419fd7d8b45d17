#![allow(clippy::disallowed_methods)]

mod common;

use std::error::Error;
use std::time::Duration;

use db::{DbError, Store};
use queue_core::{JobId, JobState, NewJob, Priority};

use common::{memory_repositories, payload_with_message};

#[tokio::test]
async fn test_create_and_get_job() -> Result<(), Box<dyn Error>> {
    let (store, jobs, queue) = memory_repositories();

    let created = jobs
        .create(NewJob::new("email", payload_with_message("hello")).with_priority(Priority::High))
        .await?;
    assert_eq!(created.id, JobId(1));
    assert_eq!(created.state, JobState::Inactive);

    let loaded = jobs.get(created.id).await?;
    assert_eq!(loaded, created);

    assert_eq!(queue.ids_in_state(JobState::Inactive).await?, vec![created.id]);
    assert_eq!(queue.count_in_state_for_type("email", JobState::Inactive).await?, 1);
    assert_eq!(queue.types().await?, vec!["email".to_string()]);
    assert_eq!(store.llen("q:email:dispatch").await?, 1);

    let second = jobs.create(NewJob::new("email", payload_with_message("again"))).await?;
    assert_eq!(second.id, JobId(2));
    Ok(())
}

#[tokio::test]
async fn test_delayed_job_has_no_dispatch_token() -> Result<(), Box<dyn Error>> {
    let (store, jobs, queue) = memory_repositories();

    let job = jobs
        .create(NewJob::new("email", payload_with_message("later")).with_delay(Duration::from_secs(60)))
        .await?;
    assert_eq!(job.state, JobState::Delayed);
    assert_eq!(queue.count_in_state(JobState::Delayed).await?, 1);
    assert_eq!(queue.count_in_state(JobState::Inactive).await?, 0);
    assert_eq!(store.llen("q:email:dispatch").await?, 0);

    let candidates = jobs.delayed_candidates(10).await?;
    let expected = job.promote_at().timestamp_millis().to_string();
    assert_eq!(candidates, vec![(job.id.to_string(), Some(expected))]);
    Ok(())
}

#[tokio::test]
async fn test_inactive_transition_claims_once() -> Result<(), Box<dyn Error>> {
    let (store, jobs, queue) = memory_repositories();
    let job = jobs
        .create(NewJob::new("sms", payload_with_message("x")).with_delay(Duration::from_millis(1)))
        .await?;

    let mut first = jobs.get(job.id).await?;
    let mut second = jobs.get(job.id).await?;
    assert!(jobs.inactive(&mut first).await?);
    assert!(!jobs.inactive(&mut second).await?);

    assert_eq!(queue.count_in_state(JobState::Delayed).await?, 0);
    assert_eq!(queue.ids_in_state(JobState::Inactive).await?, vec![job.id]);
    assert_eq!(store.llen("q:sms:dispatch").await?, 1);
    assert_eq!(jobs.get(job.id).await?.state, JobState::Inactive);
    Ok(())
}

#[tokio::test]
async fn test_job_lifecycle() -> Result<(), Box<dyn Error>> {
    let (_store, jobs, queue) = memory_repositories();
    jobs.create(NewJob::new("email", payload_with_message("low")).with_priority(Priority::Low))
        .await?;
    let urgent = jobs
        .create(NewJob::new("email", payload_with_message("urgent")).with_priority(Priority::Critical))
        .await?;

    let popped = jobs.pop_inactive("email").await?;
    assert_eq!(popped, Some(urgent.id));

    let mut job = jobs.get(urgent.id).await?;
    assert!(jobs.active(&mut job).await?);
    assert_eq!(job.attempts, 1);
    assert!(jobs.complete(&mut job, 42).await?);

    let stored = jobs.get(urgent.id).await?;
    assert_eq!(stored.state, JobState::Complete);
    assert_eq!(stored.duration_ms, Some(42));
    assert_eq!(stored.attempts, 1);
    assert_eq!(queue.ids_in_state(JobState::Complete).await?, vec![urgent.id]);
    assert_eq!(queue.count_in_state(JobState::Active).await?, 0);
    Ok(())
}

#[tokio::test]
async fn test_failed_job_retries_until_attempts_exhausted() -> Result<(), Box<dyn Error>> {
    let (_store, jobs, queue) = memory_repositories();
    let created = jobs
        .create(NewJob::new("report", payload_with_message("flaky")).with_max_attempts(2))
        .await?;

    let mut job = jobs.get(created.id).await?;
    jobs.active(&mut job).await?;
    assert_eq!(jobs.failed(&mut job, "boom").await?, JobState::Inactive);

    jobs.active(&mut job).await?;
    assert_eq!(jobs.failed(&mut job, "boom again").await?, JobState::Failed);

    let stored = jobs.get(created.id).await?;
    assert_eq!(stored.attempts, 2);
    assert_eq!(stored.error.as_deref(), Some("boom again"));
    assert_eq!(queue.count_in_state(JobState::Failed).await?, 1);
    Ok(())
}

#[tokio::test]
async fn test_remove_job_clears_indices() -> Result<(), Box<dyn Error>> {
    let (_store, jobs, queue) = memory_repositories();
    let job = jobs.create(NewJob::new("email", payload_with_message("bye"))).await?;

    jobs.remove(job.id).await?;

    assert!(jobs.get(job.id).await.is_err_and(|e| e.is_not_found()));
    assert_eq!(queue.count_in_state(JobState::Inactive).await?, 0);
    assert_eq!(queue.count_in_state_for_type("email", JobState::Inactive).await?, 0);
    Ok(())
}

#[tokio::test]
async fn test_stats_settings_and_work_time() -> Result<(), Box<dyn Error>> {
    let (_store, jobs, queue) = memory_repositories();
    jobs.create(NewJob::new("email", payload_with_message("a"))).await?;
    jobs.create(NewJob::new("email", payload_with_message("b")).with_delay(Duration::from_secs(5)))
        .await?;

    assert_eq!(queue.work_time().await?, 0);
    queue.incr_work_time(150).await?;
    assert_eq!(queue.incr_work_time(300).await?, 450);

    let stats = queue.stats().await?;
    assert_eq!(stats.inactive, 1);
    assert_eq!(stats.delayed, 1);
    assert_eq!(stats.work_time_ms, 450);

    assert_eq!(queue.setting("mode").await?, None);
    queue.set_setting("mode", "fast").await?;
    assert_eq!(queue.setting("mode").await?.as_deref(), Some("fast"));
    Ok(())
}

#[tokio::test]
async fn test_dispatch_snapshot_and_tokens() -> Result<(), Box<dyn Error>> {
    let (_store, jobs, queue) = memory_repositories();
    for n in 0..3 {
        jobs.create(NewJob::new("email", payload_with_message(&n.to_string()))).await?;
    }

    let snapshot = queue.dispatch_snapshot("email").await?;
    assert_eq!((snapshot.dispatch_len, snapshot.inactive), (3, 3));

    assert_eq!(queue.push_dispatch_tokens("email", 2).await?, 5);
    let snapshot = queue.dispatch_snapshot("email").await?;
    assert_eq!(snapshot.dispatch_len, 5);
    Ok(())
}

#[tokio::test]
async fn test_recover_unclaimed_restores_job_after_transient_error() -> Result<(), Box<dyn Error>> {
    let (store, jobs, queue) = memory_repositories();
    let job = jobs
        .create(NewJob::new("email", payload_with_message("x")).with_priority(Priority::High))
        .await?;

    // A worker took the token and the per-type entry, then failed to load the job
    assert!(store.lpop("q:email:dispatch").await?.is_some());
    assert_eq!(jobs.pop_inactive("email").await?, Some(job.id));

    let state = jobs
        .recover_unclaimed("email", job.id, &DbError::Unavailable)
        .await?;
    assert_eq!(state, JobState::Inactive);

    let snapshot = queue.dispatch_snapshot("email").await?;
    assert_eq!(snapshot.dispatch_len, 1);
    assert_eq!(snapshot.inactive, 1);
    assert_eq!(jobs.pop_inactive("email").await?, Some(job.id));
    assert_eq!(jobs.get(job.id).await?.state, JobState::Inactive);
    Ok(())
}
