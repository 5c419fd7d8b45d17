//! Delayed-job promotion.
//!
//! The promoter scans the delayed index on a fixed interval and moves every
//! job whose `promote_at` has passed to `inactive`. Several promoters (in this
//! or other processes) may run against the same store: the inactive transition
//! claims a job by removing it from the delayed index, so a job is promoted by
//! exactly one of them and the others count a lost race.

use std::marker::PhantomData;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use db::repositories::JobRepository;
use db::{DbError, Store};
use queue_core::{JobEvent, JobId, JobState, PromotionConfig};
use ractor::{Actor, ActorProcessingErr, ActorRef, ActorStatus};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::events::EventChannel;
use crate::messages::PromoterMessage;

/// Outcome of one promotion tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PromotionReport {
    /// Delayed entries read (at most the batch limit).
    pub scanned: usize,
    pub promoted: usize,
    /// Entries whose job record was gone, dropped from the index.
    pub orphans_removed: usize,
    pub not_due: usize,
    /// Due jobs that disappeared or were promoted elsewhere first.
    pub lost_races: usize,
    /// Entries skipped because reading or moving them failed; retried next tick.
    pub unreadable: usize,
}

/// Promote the due jobs among the first `limit` delayed entries.
///
/// A failed candidate query aborts the tick. A failure on a single entry only
/// skips that entry, so one unreadable job never holds back the ones behind it.
pub async fn promote_due<S: Store>(
    jobs: &JobRepository<S>,
    events: &dyn EventChannel,
    limit: usize,
    now: DateTime<Utc>,
) -> Result<PromotionReport, DbError> {
    let candidates = jobs.delayed_candidates(limit).await?;
    let mut report = PromotionReport {
        scanned: candidates.len(),
        ..Default::default()
    };
    let now_ms = now.timestamp_millis();

    for (member, promote_at) in candidates {
        match promote_entry(jobs, events, &member, promote_at.as_deref(), now_ms).await {
            Ok(Entry::Promoted) => report.promoted += 1,
            Ok(Entry::Orphan) => report.orphans_removed += 1,
            Ok(Entry::NotDue) => report.not_due += 1,
            Ok(Entry::LostRace) => report.lost_races += 1,
            Err(e) => {
                tracing::warn!(member = %member, "Skipping delayed entry: {}", e);
                report.unreadable += 1;
            }
        }
    }

    Ok(report)
}

enum Entry {
    Promoted,
    Orphan,
    NotDue,
    LostRace,
}

async fn promote_entry<S: Store>(
    jobs: &JobRepository<S>,
    events: &dyn EventChannel,
    member: &str,
    promote_at: Option<&str>,
    now_ms: i64,
) -> Result<Entry, DbError> {
    let due = promote_at.and_then(|raw| raw.parse::<i64>().ok());
    let (Ok(id), Some(promote_at)) = (JobId::parse(member), due) else {
        if jobs.remove_delayed_entry(member).await? {
            tracing::debug!(member, "Removed orphaned delayed entry");
        }
        return Ok(Entry::Orphan);
    };

    if promote_at.saturating_sub(now_ms).max(0) > 0 {
        return Ok(Entry::NotDue);
    }

    let mut job = match jobs.get(id).await {
        Ok(job) => job,
        Err(e) if e.is_not_found() => {
            tracing::debug!(job_id = %id, "Delayed job vanished before promotion");
            return Ok(Entry::LostRace);
        }
        Err(e) => return Err(e),
    };
    if job.state != JobState::Delayed {
        // The record moved on without leaving the delayed index
        if jobs.remove_delayed_entry(member).await? {
            tracing::debug!(job_id = %id, state = %job.state, "Removed stale delayed entry");
            return Ok(Entry::Orphan);
        }
        return Ok(Entry::LostRace);
    }

    events.publish(JobEvent::Promotion {
        job_id: id,
        job_type: job.job_type.clone(),
        timestamp: Utc::now(),
    });

    if jobs.inactive(&mut job).await? {
        Ok(Entry::Promoted)
    } else {
        tracing::debug!(job_id = %id, "Delayed job promoted elsewhere");
        Ok(Entry::LostRace)
    }
}

/// Arguments for the promoter actor.
pub struct PromoterArgs<S> {
    pub jobs: JobRepository<S>,
    pub events: Arc<dyn EventChannel>,
    pub config: PromotionConfig,
}

/// State for the promoter actor.
pub struct PromoterState<S> {
    jobs: JobRepository<S>,
    events: Arc<dyn EventChannel>,
    config: PromotionConfig,
    ticker: Option<JoinHandle<()>>,
}

/// Actor that runs [`promote_due`] on every tick. Its mailbox keeps ticks
/// from overlapping.
pub struct PromoterActor<S>(PhantomData<S>);

impl<S> PromoterActor<S> {
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<S> Default for PromoterActor<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: Store> Actor for PromoterActor<S> {
    type Msg = PromoterMessage;
    type State = PromoterState<S>;
    type Arguments = PromoterArgs<S>;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!(
            interval_ms = args.config.interval_ms,
            batch_limit = args.config.batch_limit,
            "Starting promoter"
        );

        let period = args.config.interval().max(std::time::Duration::from_millis(1));
        let ticker = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                if myself.send_message(PromoterMessage::Tick).is_err() {
                    break;
                }
            }
        });

        Ok(PromoterState {
            jobs: args.jobs,
            events: args.events,
            config: args.config,
            ticker: Some(ticker),
        })
    }

    async fn handle(
        &self,
        _myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            PromoterMessage::Tick => {
                match promote_due(
                    &state.jobs,
                    state.events.as_ref(),
                    state.config.batch_limit,
                    Utc::now(),
                )
                .await
                {
                    Ok(report) if report.scanned > 0 => {
                        tracing::debug!(?report, "Promotion tick");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!("Promotion tick skipped: {}", e);
                    }
                }
            }
        }
        Ok(())
    }

    async fn post_stop(
        &self,
        _myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        if let Some(ticker) = state.ticker.take() {
            ticker.abort();
        }
        tracing::info!("Promoter stopped");
        Ok(())
    }
}

/// Handle to a running promoter.
#[derive(Clone)]
pub struct PromotionHandle {
    actor: ActorRef<PromoterMessage>,
}

impl PromotionHandle {
    pub(crate) fn new(actor: ActorRef<PromoterMessage>) -> Self {
        Self { actor }
    }

    pub fn is_running(&self) -> bool {
        !matches!(
            self.actor.get_status(),
            ActorStatus::Stopping | ActorStatus::Stopped
        )
    }

    /// Stop the promoter; an in-flight tick finishes first.
    pub fn stop(&self) {
        self.actor.stop(None);
    }

    /// Stop the promoter and wait until it has exited.
    pub async fn stop_and_wait(&self) {
        if let Err(e) = self.actor.stop_and_wait(None, None).await {
            tracing::debug!("Promoter already stopped: {}", e);
        }
    }
}

/// Spawn a promoter actor.
pub async fn start_promoter<S: Store>(
    args: PromoterArgs<S>,
) -> Result<PromotionHandle, ractor::SpawnErr> {
    let (actor, _handle) = Actor::spawn(None, PromoterActor::<S>::new(), args).await?;
    Ok(PromotionHandle::new(actor))
}
