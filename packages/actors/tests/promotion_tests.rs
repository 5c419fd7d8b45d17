#![allow(clippy::disallowed_methods)]

mod common;

use std::error::Error;
use std::time::Duration;

use actors::{EventBus, PromotionReport, QueueError, promote_due};
use chrono::{TimeDelta, Utc};
use db::repositories::{JobRepository, QueueRepository};
use db::{MemoryStore, Store};
use queue_core::{JobEvent, JobState, Keys, NewJob, PromotionConfig};

use common::{eventually, memory_queue, payload_with_message};

fn repositories(store: &MemoryStore) -> (JobRepository<MemoryStore>, QueueRepository<MemoryStore>) {
    (
        JobRepository::new(store.clone(), Keys::default()),
        QueueRepository::new(store.clone(), Keys::default()),
    )
}

fn delayed(job_type: &str, delay: Duration) -> NewJob {
    NewJob::new(job_type, payload_with_message("later")).with_delay(delay)
}

#[tokio::test]
async fn test_due_jobs_are_promoted_and_others_stay_delayed() -> Result<(), Box<dyn Error>> {
    let store = MemoryStore::new();
    let (jobs, queue) = repositories(&store);
    let bus = EventBus::default();
    let mut promotions = bus.subscribe().named("promotion");

    let due = jobs.create(delayed("email", Duration::from_secs(1))).await?;
    let later = jobs.create(delayed("email", Duration::from_secs(3600))).await?;

    let report = promote_due(&jobs, &bus, 50, Utc::now() + TimeDelta::seconds(2)).await?;
    assert_eq!(
        report,
        PromotionReport {
            scanned: 2,
            promoted: 1,
            not_due: 1,
            ..Default::default()
        }
    );

    assert_eq!(queue.ids_in_state(JobState::Inactive).await?, vec![due.id]);
    assert_eq!(queue.ids_in_state(JobState::Delayed).await?, vec![later.id]);
    assert_eq!(store.llen("q:email:dispatch").await?, 1);

    let event = promotions.recv().await.ok_or("bus closed")?;
    assert_eq!(event.job_id(), Some(due.id));
    Ok(())
}

#[tokio::test]
async fn test_job_is_never_promoted_early() -> Result<(), Box<dyn Error>> {
    let store = MemoryStore::new();
    let (jobs, queue) = repositories(&store);
    let job = jobs.create(delayed("email", Duration::from_secs(10))).await?;

    let just_before = job.promote_at() - TimeDelta::milliseconds(1);
    let report = promote_due(&jobs, &EventBus::default(), 50, just_before).await?;
    assert_eq!(report.promoted, 0);
    assert_eq!(queue.count_in_state(JobState::Delayed).await?, 1);

    let report = promote_due(&jobs, &EventBus::default(), 50, job.promote_at()).await?;
    assert_eq!(report.promoted, 1);
    assert_eq!(queue.count_in_state(JobState::Inactive).await?, 1);
    Ok(())
}

#[tokio::test]
async fn test_orphaned_delayed_entry_is_removed() -> Result<(), Box<dyn Error>> {
    let store = MemoryStore::new();
    let (jobs, queue) = repositories(&store);
    store.zadd("q:jobs:delayed", 0, "9").await?;

    let report = promote_due(&jobs, &EventBus::default(), 50, Utc::now()).await?;
    assert_eq!(report.orphans_removed, 1);
    assert_eq!(report.promoted, 0);

    for state in JobState::ALL {
        assert!(queue.ids_in_state(state).await?.is_empty(), "{state} index not empty");
    }
    Ok(())
}

#[tokio::test]
async fn test_unreadable_job_does_not_block_later_jobs() -> Result<(), Box<dyn Error>> {
    let store = MemoryStore::new();
    let (jobs, queue) = repositories(&store);
    let corrupt = jobs.create(delayed("email", Duration::from_millis(10))).await?;
    store
        .hset(&format!("q:job:{}", corrupt.id), &[("data", "{not json".to_string())])
        .await?;
    let healthy = jobs.create(delayed("email", Duration::from_millis(10))).await?;
    let later = Utc::now() + TimeDelta::seconds(5);

    let report = promote_due(&jobs, &EventBus::default(), 50, later).await?;
    assert_eq!(
        report,
        PromotionReport {
            scanned: 2,
            promoted: 1,
            unreadable: 1,
            ..Default::default()
        }
    );
    assert_eq!(queue.ids_in_state(JobState::Inactive).await?, vec![healthy.id]);

    // The unreadable entry stays put and is retried without blocking anything
    let report = promote_due(&jobs, &EventBus::default(), 50, later).await?;
    assert_eq!(report.unreadable, 1);
    assert_eq!(report.promoted, 0);
    assert_eq!(queue.ids_in_state(JobState::Delayed).await?, vec![corrupt.id]);
    Ok(())
}

#[tokio::test]
async fn test_stale_delayed_entry_is_removed() -> Result<(), Box<dyn Error>> {
    let store = MemoryStore::new();
    let (jobs, queue) = repositories(&store);
    let ready = jobs
        .create(NewJob::new("email", payload_with_message("now")))
        .await?;
    store.zadd("q:jobs:delayed", 0, &ready.id.to_string()).await?;
    let due = jobs.create(delayed("email", Duration::from_millis(10))).await?;
    let later = Utc::now() + TimeDelta::seconds(5);

    let report = promote_due(&jobs, &EventBus::default(), 1, later).await?;
    assert_eq!(
        report,
        PromotionReport {
            scanned: 1,
            orphans_removed: 1,
            ..Default::default()
        }
    );
    assert_eq!(queue.ids_in_state(JobState::Delayed).await?, vec![due.id]);

    let report = promote_due(&jobs, &EventBus::default(), 1, later).await?;
    assert_eq!(report.promoted, 1);
    assert!(queue.ids_in_state(JobState::Delayed).await?.is_empty());
    assert_eq!(
        queue.ids_in_state(JobState::Inactive).await?,
        vec![ready.id, due.id]
    );
    assert_eq!(jobs.get(ready.id).await?.state, JobState::Inactive);
    Ok(())
}

#[tokio::test]
async fn test_batch_limit_bounds_each_tick() -> Result<(), Box<dyn Error>> {
    let store = MemoryStore::new();
    let (jobs, queue) = repositories(&store);
    for _ in 0..10 {
        jobs.create(delayed("email", Duration::from_millis(10))).await?;
    }
    let later = Utc::now() + TimeDelta::seconds(1);

    let report = promote_due(&jobs, &EventBus::default(), 3, later).await?;
    assert_eq!(report.scanned, 3);
    assert_eq!(report.promoted, 3);
    assert_eq!(queue.count_in_state(JobState::Delayed).await?, 7);

    let report = promote_due(&jobs, &EventBus::default(), 50, later).await?;
    assert_eq!(report.promoted, 7);
    assert_eq!(queue.count_in_state(JobState::Inactive).await?, 10);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_promoters_promote_each_job_once() -> Result<(), Box<dyn Error>> {
    let store = MemoryStore::new();
    let (jobs, queue) = repositories(&store);
    for _ in 0..20 {
        jobs.create(delayed("email", Duration::from_millis(10))).await?;
    }
    let later = Utc::now() + TimeDelta::seconds(1);

    let tasks: Vec<_> = (0..3)
        .map(|_| {
            let jobs = jobs.clone();
            tokio::spawn(async move { promote_due(&jobs, &EventBus::default(), 50, later).await })
        })
        .collect();
    let mut promoted = 0;
    for task in tasks {
        promoted += task.await??.promoted;
    }

    assert_eq!(promoted, 20);
    assert_eq!(queue.count_in_state(JobState::Inactive).await?, 20);
    assert_eq!(queue.count_in_state(JobState::Delayed).await?, 0);
    assert_eq!(store.llen("q:email:dispatch").await?, 20);
    Ok(())
}

#[tokio::test]
async fn test_store_failure_skips_tick() -> Result<(), Box<dyn Error>> {
    let store = MemoryStore::new();
    let (jobs, queue) = repositories(&store);
    jobs.create(delayed("email", Duration::from_millis(10))).await?;

    store.set_unavailable(true);
    let later = Utc::now() + TimeDelta::seconds(1);
    assert!(promote_due(&jobs, &EventBus::default(), 50, later).await.is_err());

    store.set_unavailable(false);
    assert_eq!(queue.count_in_state(JobState::Delayed).await?, 1);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_promoter_moves_delayed_job_to_inactive() -> Result<(), Box<dyn Error>> {
    let (_store, queue) = memory_queue();
    let handle = queue
        .promote(PromotionConfig::new(Duration::from_millis(100), 50))
        .await?;

    let job = queue.create_job(delayed("email", Duration::from_millis(1000))).await?;
    let mut promotions = queue.subscribe().for_job(job.id).named("promotion");

    let (queue_ref, job_id) = (&queue, job.id);
    let promoted = eventually(Duration::from_secs(3), || async move {
        let inactive = queue_ref.ids_in_state(JobState::Inactive).await.unwrap_or_default();
        let delayed = queue_ref.ids_in_state(JobState::Delayed).await.unwrap_or_default();
        inactive.contains(&job_id) && !delayed.contains(&job_id)
    })
    .await;
    assert!(promoted, "job was not promoted in time");

    let event = tokio::time::timeout(Duration::from_secs(1), promotions.recv()).await?;
    assert!(matches!(event, Some(JobEvent::Promotion { job_id, .. }) if job_id == job.id));

    handle.stop_and_wait().await;
    assert!(!handle.is_running());
    Ok(())
}

#[tokio::test]
async fn test_second_promoter_is_rejected() -> Result<(), Box<dyn Error>> {
    let (_store, queue) = memory_queue();
    let config = PromotionConfig::new(Duration::from_millis(50), 10);

    queue.promote(config.clone()).await?;
    assert!(matches!(
        queue.promote(config.clone()).await,
        Err(QueueError::PromoterRunning)
    ));

    queue.stop_promotion().await;
    let restarted = queue.promote(config).await?;
    assert!(restarted.is_running());
    queue.stop_promotion().await;
    Ok(())
}
