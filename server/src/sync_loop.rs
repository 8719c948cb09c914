//! The scheduler driving reconciliation cycles.
//!
//! A cycle walks `Idle → Fetching → Reconciling → Applying → Persisting →
//! Idle`. At most one cycle runs at a time, whether started by the interval
//! timer or by hand; ticks that fall due while a cycle runs are skipped.
//!
//! Stopping the loop cancels at the next phase boundary. Once a cycle has
//! started applying operations it always goes on to persist their outcome.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use listsync_engine::{
    commit, AnchorSnapshot, Conflict, Item, OpOutcome, Reconciler, Side, SnapshotMetadata,
    SyncDirectionPolicy,
};
use serde::Serialize;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use crate::applier::{OperationApplier, RetryPolicy};
use crate::client::ListClient;
use crate::error::{ClientError, CycleError, StoreError};
use crate::store::AnchorStore;

/// Where the loop currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Phase {
    #[default]
    Idle,
    Fetching,
    Reconciling,
    Applying,
    Persisting,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Idle => "idle",
            Phase::Fetching => "fetching",
            Phase::Reconciling => "reconciling",
            Phase::Applying => "applying",
            Phase::Persisting => "persisting",
        };
        f.write_str(name)
    }
}

/// Summary of one completed cycle.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleReport {
    pub cycle_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub policy: SyncDirectionPolicy,
    /// Items seen on each side, completed ones included
    pub fetched_a: usize,
    pub fetched_b: usize,
    /// The stored anchor was for another direction and was discarded
    pub anchor_reset: bool,
    pub planned: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Conflicts resolved in favour of B
    pub conflicts: Vec<Conflict>,
    /// Whether the anchor file was rewritten
    pub persisted: bool,
    /// The anchor as committed by this cycle
    pub anchor: SnapshotMetadata,
    /// A list rejected its credentials while operations were applied
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reauth_required: Option<Side>,
}

/// What the loop is doing and how the last cycle went.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub phase: Phase,
    pub cycles_completed: u64,
    pub last_report: Option<CycleReport>,
    pub last_error: Option<String>,
    /// A list rejected its credentials; someone has to log in again
    pub reauth_required: Option<Side>,
    pub stopped: bool,
}

/// Runs reconciliation cycles against two injected lists.
pub struct SyncLoop {
    list_a: Arc<dyn ListClient>,
    list_b: Arc<dyn ListClient>,
    applier: OperationApplier,
    store: AnchorStore,
    policy: SyncDirectionPolicy,
    interval: Duration,
    fetch_timeout: Duration,
    /// Single-flight guard, holding the last committed anchor once loaded
    anchor: Mutex<Option<AnchorSnapshot>>,
    status: watch::Sender<SyncStatus>,
    cancel: CancellationToken,
}

impl SyncLoop {
    pub fn new(
        list_a: Arc<dyn ListClient>,
        list_b: Arc<dyn ListClient>,
        store: AnchorStore,
        policy: SyncDirectionPolicy,
        interval: Duration,
        retry: RetryPolicy,
    ) -> Self {
        let applier = OperationApplier::new(list_a.clone(), list_b.clone(), retry);
        let (status, _) = watch::channel(SyncStatus::default());
        Self {
            list_a,
            list_b,
            applier,
            store,
            policy,
            interval,
            fetch_timeout: retry.call_timeout,
            anchor: Mutex::new(None),
            status,
            cancel: CancellationToken::new(),
        }
    }

    pub fn policy(&self) -> SyncDirectionPolicy {
        self.policy
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn store(&self) -> &AnchorStore {
        &self.store
    }

    /// Current status.
    pub fn status(&self) -> SyncStatus {
        self.status.borrow().clone()
    }

    /// Watch status changes.
    #[cfg(test)]
    pub fn subscribe(&self) -> watch::Receiver<SyncStatus> {
        self.status.subscribe()
    }

    /// Start cycling every `interval`; the first cycle starts right away.
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move { this.run().await })
    }

    /// Stop the loop. A running cycle ends at its next phase boundary.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    async fn run(&self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tracing::info!(
            interval_secs = self.interval.as_secs(),
            policy = %self.policy,
            a = self.list_a.name(),
            b = self.list_b.name(),
            "Sync loop started"
        );

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            match self.run_once().await {
                Ok(_) => {}
                Err(CycleError::Busy) => {
                    tracing::debug!("Previous cycle still running, tick skipped");
                }
                Err(CycleError::Cancelled(_)) => break,
                // Already logged; the next tick retries.
                Err(_) => {}
            }
        }

        self.status.send_modify(|status| status.stopped = true);
        tracing::info!("Sync loop stopped");
    }

    /// Run one cycle now, unless one is already running.
    pub async fn run_once(&self) -> Result<CycleReport, CycleError> {
        let mut slot = self.anchor.try_lock().map_err(|_| CycleError::Busy)?;
        let cycle_id = Uuid::new_v4();
        let span = tracing::info_span!("cycle", cycle_id = %cycle_id);

        let result = self
            .guarded_cycle(&mut slot, cycle_id)
            .instrument(span.clone())
            .await;
        span.in_scope(|| self.finish(&result));
        result
    }

    /// Run a cycle against the cached anchor, loading it on first use. On
    /// failure the prior anchor stays cached.
    async fn guarded_cycle(
        &self,
        slot: &mut Option<AnchorSnapshot>,
        cycle_id: Uuid,
    ) -> Result<CycleReport, CycleError> {
        let prior = match slot.take() {
            Some(anchor) => anchor,
            None => self.store.load().await?,
        };
        match self.cycle(cycle_id, &prior).await {
            Ok((next, report)) => {
                *slot = Some(next);
                Ok(report)
            }
            Err(e) => {
                *slot = Some(prior);
                Err(e)
            }
        }
    }

    async fn cycle(
        &self,
        cycle_id: Uuid,
        prior: &AnchorSnapshot,
    ) -> Result<(AnchorSnapshot, CycleReport), CycleError> {
        let started_at = Utc::now();

        self.enter_phase(Phase::Fetching)?;
        let (items_a, items_b) = futures::try_join!(
            self.fetch(Side::A, self.list_a.as_ref()),
            self.fetch(Side::B, self.list_b.as_ref())
        )?;
        tracing::debug!(a = items_a.len(), b = items_b.len(), "Fetched both lists");

        self.enter_phase(Phase::Reconciling)?;
        let result = Reconciler::new(self.policy)
            .with_update_support(self.list_a.supports_update())
            .reconcile(prior, &items_a, &items_b);

        if result.anchor_reset {
            tracing::warn!(policy = %self.policy, "Sync direction changed, previous anchor discarded");
        }
        for conflict in &result.conflicts {
            tracing::info!(
                anchor_id = %conflict.anchor_id,
                text_on_a = %conflict.text_on_a,
                text_on_b = %conflict.text_on_b,
                resolution = ?conflict.resolution,
                "Conflict resolved in favour of B"
            );
        }
        tracing::info!(
            planned = result.plan.len(),
            dropped = result.dropped.len(),
            linked = result.linked.len(),
            "Reconciled"
        );

        self.enter_phase(Phase::Applying)?;
        let applied = self.applier.apply(&result.plan).await;
        let outcomes = applied.outcomes;

        // No cancellation from here on: applied operations must be recorded.
        self.set_phase(Phase::Persisting);
        let finished_at = Utc::now();
        let next = commit(
            prior,
            &result,
            &outcomes,
            finished_at.timestamp_millis().max(0) as u64,
        )?;

        let changed = !next.same_records(prior) || next.policy != prior.policy;
        if changed {
            self.store.save(&next).await?;
        }

        let succeeded = outcomes.values().filter(|o| o.is_success()).count();
        let failed = outcomes
            .values()
            .filter(|o| matches!(o, OpOutcome::Failed { .. }))
            .count();
        let report = CycleReport {
            cycle_id,
            started_at,
            finished_at,
            policy: self.policy,
            fetched_a: items_a.len(),
            fetched_b: items_b.len(),
            anchor_reset: result.anchor_reset,
            planned: result.plan.len(),
            succeeded,
            failed,
            skipped: result.plan.len() - succeeded - failed,
            conflicts: result.conflicts,
            persisted: changed,
            anchor: SnapshotMetadata::from(&next),
            reauth_required: applied.auth_rejected.first().copied(),
        };
        Ok((next, report))
    }

    async fn fetch(&self, side: Side, client: &dyn ListClient) -> Result<Vec<Item>, CycleError> {
        let items = match tokio::time::timeout(self.fetch_timeout, client.fetch()).await {
            Ok(result) => result,
            Err(_) => Err(ClientError::Transient(format!(
                "no answer within {:?}",
                self.fetch_timeout
            ))),
        };
        items.map_err(|e| CycleError::from_fetch(side, e))
    }

    fn enter_phase(&self, phase: Phase) -> Result<(), CycleError> {
        if self.cancel.is_cancelled() {
            return Err(CycleError::Cancelled(phase));
        }
        self.set_phase(phase);
        Ok(())
    }

    fn set_phase(&self, phase: Phase) {
        tracing::debug!(%phase, "Phase");
        self.status.send_modify(|status| status.phase = phase);
    }

    fn finish(&self, result: &Result<CycleReport, CycleError>) {
        match result {
            Ok(CycleReport {
                reauth_required: Some(side),
                ..
            }) => {
                tracing::error!(%side, "Cycle complete, list rejected its credentials")
            }
            Ok(report) => tracing::info!(
                planned = report.planned,
                succeeded = report.succeeded,
                failed = report.failed,
                skipped = report.skipped,
                conflicts = report.conflicts.len(),
                persisted = report.persisted,
                "Cycle complete"
            ),
            Err(e @ CycleError::Auth { .. }) => {
                tracing::error!(error = %e, "Cycle aborted, re-authentication required")
            }
            Err(e @ CycleError::Persistence(_)) => {
                tracing::error!(error = %e, "Cycle aborted, previous anchor retained")
            }
            Err(CycleError::Cancelled(phase)) => {
                tracing::info!(%phase, "Cycle cancelled")
            }
            Err(e) => tracing::warn!(error = %e, "Cycle aborted"),
        }

        self.status.send_modify(|status| {
            status.phase = Phase::Idle;
            match result {
                Ok(report) => {
                    status.cycles_completed += 1;
                    status.last_report = Some(report.clone());
                    status.last_error = report
                        .reauth_required
                        .map(|side| format!("list {side} rejected its credentials"));
                    status.reauth_required = report.reauth_required;
                }
                Err(CycleError::Auth { side, .. }) => {
                    status.reauth_required = Some(*side);
                    status.last_error = result.as_ref().err().map(ToString::to_string);
                }
                Err(e) => status.last_error = Some(e.to_string()),
            }
        });
    }

    /// The last committed anchor, as stored.
    pub async fn committed_anchor(&self) -> Result<AnchorSnapshot, StoreError> {
        self.store.load().await
    }
}
