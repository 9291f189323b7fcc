//! Status reconciliation loop
//!
//! One cycle: load state, take a snapshot, decide, upsert, persist.
//! Cycles run one at a time on a fixed interval; a failed cycle leaves the
//! durable state as it was and the next tick simply tries again.
//! A record that was posted but could not be saved is kept in memory and
//! takes precedence over the state file until a later save succeeds.

use chrono::{DateTime, Utc};
use std::future::Future;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::detect::{decide, PostReason};
use crate::query::StatusQuery;
use crate::render::build_payload;
use crate::snapshot::SnapshotSource;
use crate::store::{LastKnownRecord, StateError, StateFile};
use crate::webhook::{upsert, WebhookApi, WebhookError};

#[derive(Debug, Error)]
pub enum CycleError {
    #[error("webhook update failed: {0}")]
    Webhook(#[from] WebhookError),
    #[error("posted as message {message_id} but state was not saved: {source}")]
    State {
        message_id: String,
        #[source]
        source: StateError,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Nothing changed and no heartbeat due: no webhook call, no write
    Unchanged,
    Posted {
        reason: PostReason,
        message_id: String,
        created: bool,
    },
}

pub struct Reconciler<Q, W> {
    config: Config,
    source: SnapshotSource<Q>,
    webhook: W,
    state: StateFile,
    /// Posted but not yet persisted
    unsaved: Mutex<Option<LastKnownRecord>>,
}

impl<Q, W> Reconciler<Q, W>
where
    Q: StatusQuery,
    W: WebhookApi,
{
    pub fn new(config: Config, query: Q, webhook: W) -> Self {
        let source =
            SnapshotSource::new(query, config.server_label.clone(), config.display_capacity);
        let state = StateFile::new(config.state_file.clone());
        Self {
            config,
            source,
            webhook,
            state,
            unsaved: Mutex::new(None),
        }
    }

    pub fn state_file(&self) -> &StateFile {
        &self.state
    }

    /// Runs one reconciliation cycle as of `now`
    pub async fn run_cycle(&self, now: DateTime<Utc>) -> Result<CycleOutcome, CycleError> {
        debug!("status check at {}", now.to_rfc3339());

        let last = self.last_known().await;
        let current = self.source.snapshot().await;

        let Some(reason) = decide(
            last.snapshot.as_ref(),
            &current,
            last.posted_at,
            now,
            self.config.heartbeat_interval,
        ) else {
            info!("no change and heartbeat not due");
            return Ok(CycleOutcome::Unchanged);
        };

        let payload = build_payload(
            &current,
            reason,
            &self.config.server_label,
            self.config.heartbeat_interval,
            now,
        );
        let outcome = upsert(&self.webhook, &payload, last.message_id()).await?;

        let record = LastKnownRecord {
            snapshot: Some(current),
            posted_at: Some(now),
            message_id: Some(outcome.message_id.clone()),
        };
        if let Err(source) = self.state.save(&record).await {
            *self.unsaved.lock().await = Some(record);
            return Err(CycleError::State {
                message_id: outcome.message_id,
                source,
            });
        }
        *self.unsaved.lock().await = None;

        if outcome.created {
            info!("created status message {} ({:?})", outcome.message_id, reason);
        } else {
            info!("edited status message {} ({:?})", outcome.message_id, reason);
        }

        Ok(CycleOutcome::Posted {
            reason,
            message_id: outcome.message_id,
            created: outcome.created,
        })
    }

    /// Record to reconcile against: the unsaved one if a save failed earlier
    /// (retrying the save), otherwise the state file
    async fn last_known(&self) -> LastKnownRecord {
        let pending = self.unsaved.lock().await.clone();
        let Some(record) = pending else {
            return self.state.load().await;
        };

        match self.state.save(&record).await {
            Ok(()) => {
                info!("state file {} caught up", self.state.path().display());
                *self.unsaved.lock().await = None;
            }
            Err(e) => warn!("state still not saved: {}", e),
        }
        record
    }

    /// Runs cycles until `shutdown` resolves. The first cycle starts immediately;
    /// ticks missed by a slow cycle are skipped, never run concurrently.
    /// A cycle already in flight is finished before the loop exits.
    pub async fn run<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        let mut ticker = interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            "watching {}:{} every {} (heartbeat {}), state in {}",
            self.config.host,
            self.config.port,
            humantime::format_duration(self.config.poll_interval),
            humantime::format_duration(self.config.heartbeat_interval),
            self.state.path().display()
        );

        loop {
            tokio::select! {
                // shutdown is polled first so it is armed before the first cycle
                biased;
                _ = &mut shutdown => {
                    info!("shutdown requested, stopping status loop");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.run_cycle(Utc::now()).await {
                        error!("status cycle failed: {}", e);
                    }
                }
            }
        }
    }
}
