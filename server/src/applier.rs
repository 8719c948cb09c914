//! Applying a reconciliation plan to the two lists.
//!
//! Operations run independently: a failure only ever affects the operation
//! itself and whatever depends on it. Transient failures are retried with
//! bounded exponential backoff; every remote call has a timeout.

use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use listsync_engine::{OpOutcome, Operation, OperationId, OperationKind, Side};

use crate::client::{ClientResult, ListClient};
use crate::error::ClientError;

/// Retry budget for a single remote call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts in total, first try included
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles from there
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Bound on each attempt; running over counts as a transient failure
    pub call_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(8),
            call_timeout: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Delay after the given failed attempt (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }

    /// Run `call` until it succeeds, fails permanently or the attempts run out.
    ///
    /// A timeout counts as transient even for creates. A create that timed
    /// out may have landed anyway; retrying it then leaves a second copy,
    /// which later cycles treat like any item the user added.
    pub async fn run<T, F, Fut>(&self, label: &str, mut call: F) -> ClientResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ClientResult<T>>,
    {
        let mut attempt = 1;
        loop {
            let result = match tokio::time::timeout(self.call_timeout, call()).await {
                Ok(result) => result,
                Err(_) => Err(ClientError::Transient(format!(
                    "no answer within {:?}",
                    self.call_timeout
                ))),
            };

            match result {
                Err(e) if e.is_retryable() && attempt < self.max_attempts => {
                    let delay = self.backoff(attempt);
                    tracing::warn!(
                        op = %label,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}

/// What happened when a plan was applied.
#[derive(Debug, Default)]
pub struct AppliedPlan {
    pub outcomes: BTreeMap<OperationId, OpOutcome>,
    /// Lists that rejected their credentials while operations ran
    pub auth_rejected: BTreeSet<Side>,
}

/// Applies plans to the two injected lists.
pub struct OperationApplier {
    list_a: Arc<dyn ListClient>,
    list_b: Arc<dyn ListClient>,
    retry: RetryPolicy,
    /// Operations in flight at once
    concurrency: usize,
}

impl OperationApplier {
    pub fn new(list_a: Arc<dyn ListClient>, list_b: Arc<dyn ListClient>, retry: RetryPolicy) -> Self {
        Self {
            list_a,
            list_b,
            retry,
            concurrency: 4,
        }
    }

    #[cfg(test)]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    fn client(&self, side: Side) -> &dyn ListClient {
        match side {
            Side::A => self.list_a.as_ref(),
            Side::B => self.list_b.as_ref(),
        }
    }

    /// Apply `plan` and report the outcome of every operation in it.
    ///
    /// Operations run in waves: an operation waits for the one it depends
    /// on and is skipped if that did not succeed.
    pub async fn apply(&self, plan: &[Operation]) -> AppliedPlan {
        let mut outcomes: BTreeMap<OperationId, OpOutcome> = BTreeMap::new();
        let mut auth_rejected = BTreeSet::new();
        let mut pending: Vec<&Operation> = plan.iter().collect();

        while !pending.is_empty() {
            let (ready, waiting): (Vec<&Operation>, Vec<&Operation>) = pending
                .into_iter()
                .partition(|op| op.depends_on.map_or(true, |dep| outcomes.contains_key(&dep)));

            if ready.is_empty() {
                // Prerequisites that are not part of the plan never resolve.
                for op in waiting {
                    outcomes.insert(op.op_id, OpOutcome::Skipped);
                }
                break;
            }

            let mut runnable = Vec::with_capacity(ready.len());
            for op in ready {
                let blocked = op
                    .depends_on
                    .and_then(|dep| outcomes.get(&dep))
                    .is_some_and(|outcome| !outcome.is_success());
                if blocked {
                    tracing::info!(op = %op, "Skipped, prerequisite did not succeed");
                    outcomes.insert(op.op_id, OpOutcome::Skipped);
                } else {
                    runnable.push(op);
                }
            }

            let results: Vec<Vec<(&Operation, Applied)>> = stream::iter(batches(runnable))
                .map(|batch| async move {
                    let mut done = Vec::with_capacity(batch.len());
                    for op in batch {
                        done.push((op, self.apply_one(op).await));
                    }
                    done
                })
                .buffer_unordered(self.concurrency)
                .boxed()
                .collect()
                .await;
            for (op, applied) in results.into_iter().flatten() {
                if applied.auth_rejected {
                    auth_rejected.insert(op.side());
                }
                outcomes.insert(op.op_id, applied.outcome);
            }

            pending = waiting;
        }

        AppliedPlan {
            outcomes,
            auth_rejected,
        }
    }

    async fn apply_one(&self, op: &Operation) -> Applied {
        let client = self.client(op.side());
        let label = op.to_string();

        let result = match (op.kind, op.target.as_deref()) {
            (OperationKind::CreateOnA | OperationKind::CreateOnB, _) => self
                .retry
                .run(&label, || client.create(&op.text))
                .await
                .map(|remote_id| OpOutcome::Created { remote_id }),
            (OperationKind::DeleteOnA | OperationKind::DeleteOnB, Some(target)) => {
                match self.retry.run(&label, || client.delete(target)).await {
                    Ok(()) => Ok(OpOutcome::Done),
                    Err(ClientError::NotFound(_)) => Ok(OpOutcome::AlreadyAbsent),
                    Err(e) => Err(e),
                }
            }
            (OperationKind::UpdateOnA, Some(target)) => self
                .retry
                .run(&label, || client.update(target, &op.text))
                .await
                .map(|()| OpOutcome::Done),
            (_, None) => Ok(OpOutcome::Failed {
                error: "operation has no target".to_string(),
            }),
        };

        let auth_rejected = matches!(result, Err(ClientError::Auth(_)));
        let outcome = result.unwrap_or_else(|e| OpOutcome::Failed {
            error: e.to_string(),
        });

        match &outcome {
            OpOutcome::Failed { error } => {
                tracing::warn!(op = %op, list = client.name(), error = %error, "Operation failed")
            }
            _ => tracing::info!(op = %op, list = client.name(), ?outcome, "Applied"),
        }
        Applied {
            outcome,
            auth_rejected,
        }
    }
}

/// Result of a single operation.
struct Applied {
    outcome: OpOutcome,
    auth_rejected: bool,
}

/// Group operations so that two touching the same remote item never run
/// concurrently. Creates target nothing yet and each run on their own.
fn batches(ops: Vec<&Operation>) -> Vec<Vec<&Operation>> {
    let mut by_target: BTreeMap<(Side, &str), Vec<&Operation>> = BTreeMap::new();
    let mut batches = Vec::new();

    for op in ops {
        match op.target_key() {
            Some((side, target)) => by_target.entry((side, target.as_str())).or_default().push(op),
            None => batches.push(vec![op]),
        }
    }
    batches.extend(by_target.into_values());
    batches
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::memory::Call;
    use crate::client::MemoryListClient;
    use listsync_engine::OpReason;

    fn lists() -> (Arc<MemoryListClient>, Arc<MemoryListClient>) {
        (
            Arc::new(MemoryListClient::new("alexa", "a")),
            Arc::new(MemoryListClient::new("todo", "t")),
        )
    }

    fn applier(a: &Arc<MemoryListClient>, b: &Arc<MemoryListClient>) -> OperationApplier {
        OperationApplier::new(a.clone(), b.clone(), RetryPolicy::default())
    }

    fn transient() -> ClientError {
        ClientError::Transient("503 Service Unavailable".into())
    }

    #[test]
    fn backoff_doubles_up_to_the_cap() {
        let retry = RetryPolicy {
            max_attempts: 6,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(2),
            call_timeout: Duration::from_secs(10),
        };
        assert_eq!(retry.backoff(1), Duration::from_millis(500));
        assert_eq!(retry.backoff(2), Duration::from_secs(1));
        assert_eq!(retry.backoff(3), Duration::from_secs(2));
        assert_eq!(retry.backoff(5), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn create_is_retried_on_transient_errors() {
        let (a, b) = lists();
        b.fail_next(Call::Create, transient());
        b.fail_next(Call::Create, transient());

        let plan = vec![Operation::create(0, Side::B, "anc-1", "Milk", OpReason::NewItem)];
        let outcomes = applier(&a, &b).apply(&plan).await.outcomes;

        assert_eq!(
            outcomes[&0],
            OpOutcome::Created {
                remote_id: "t-1".into()
            }
        );
        assert_eq!(b.call_count(), 3);
        assert_eq!(b.texts(), vec!["Milk".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_create_skips_origin_cleanup() {
        let (a, b) = lists();
        let bread = a.insert("Bread");
        for _ in 0..3 {
            b.fail_next(Call::Create, transient());
        }

        let plan = vec![
            Operation::create(0, Side::B, "anc-1", "Bread", OpReason::NewItem),
            Operation::delete(1, Side::A, "anc-1", "Bread", bread, OpReason::OriginCleanup)
                .after(0),
        ];
        let outcomes = applier(&a, &b).apply(&plan).await.outcomes;

        assert!(matches!(outcomes[&0], OpOutcome::Failed { .. }));
        assert_eq!(outcomes[&1], OpOutcome::Skipped);
        assert_eq!(a.texts(), vec!["Bread".to_string()]);
        assert!(b.is_empty());
        // The delete was never attempted.
        assert_eq!(a.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn origin_cleanup_runs_after_copy() {
        let (a, b) = lists();
        let bread = a.insert("Bread");

        let plan = vec![
            Operation::create(0, Side::B, "anc-1", "Bread", OpReason::NewItem),
            Operation::delete(1, Side::A, "anc-1", "Bread", bread, OpReason::OriginCleanup)
                .after(0),
        ];
        let outcomes = applier(&a, &b).apply(&plan).await.outcomes;

        assert!(outcomes[&0].is_success());
        assert_eq!(outcomes[&1], OpOutcome::Done);
        assert!(a.texts().is_empty());
        assert_eq!(b.texts(), vec!["Bread".to_string()]);
    }

    #[tokio::test]
    async fn deleting_an_absent_item_succeeds() {
        let (a, b) = lists();
        let plan = vec![Operation::delete(0, Side::B, "anc-1", "Eggs", "t-404", OpReason::Removal)];

        let outcomes = applier(&a, &b).apply(&plan).await.outcomes;
        assert_eq!(outcomes[&0], OpOutcome::AlreadyAbsent);
        assert!(outcomes[&0].is_success());
    }

    #[tokio::test]
    async fn auth_errors_are_not_retried() {
        let (a, b) = lists();
        b.fail_next(Call::Create, ClientError::Auth("token expired".into()));

        let plan = vec![Operation::create(0, Side::B, "anc-1", "Milk", OpReason::NewItem)];
        let applied = applier(&a, &b).apply(&plan).await;

        assert!(matches!(applied.outcomes[&0], OpOutcome::Failed { .. }));
        assert_eq!(applied.auth_rejected, BTreeSet::from([Side::B]));
        assert_eq!(b.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn only_auth_failures_are_reported_as_rejected() {
        let (a, b) = lists();
        let eggs = a.insert("Eggs");
        b.fail_next(Call::Create, transient());
        b.fail_next(Call::Create, transient());
        b.fail_next(Call::Create, transient());

        let plan = vec![
            Operation::create(0, Side::B, "anc-1", "Milk", OpReason::NewItem),
            Operation::delete(1, Side::A, "anc-2", "Eggs", eggs, OpReason::Removal),
        ];
        let applied = applier(&a, &b).apply(&plan).await;

        assert!(matches!(applied.outcomes[&0], OpOutcome::Failed { .. }));
        assert_eq!(applied.outcomes[&1], OpOutcome::Done);
        assert!(applied.auth_rejected.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_calls_time_out_as_transient() {
        let (a, b) = lists();
        b.set_latency(Some(Duration::from_secs(60)));

        let plan = vec![Operation::create(0, Side::B, "anc-1", "Milk", OpReason::NewItem)];
        let outcomes = applier(&a, &b).apply(&plan).await.outcomes;

        match &outcomes[&0] {
            OpOutcome::Failed { error } => assert!(error.contains("no answer within")),
            other => panic!("expected failure, got {other:?}"),
        }
        assert_eq!(b.call_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn failures_are_isolated() {
        let (a, b) = lists();
        let eggs = b.insert("Eggs");
        let salt = b.insert("Salt");
        b.fail_next(Call::Delete, ClientError::Auth("revoked".into()));

        let plan = vec![
            Operation::delete(0, Side::B, "anc-1", "Eggs", eggs, OpReason::Removal),
            Operation::delete(1, Side::B, "anc-2", "Salt", salt, OpReason::Removal),
            Operation::create(2, Side::A, "anc-3", "Flour", OpReason::NewItem),
        ];
        let outcomes = applier(&a, &b).with_concurrency(1).apply(&plan).await.outcomes;

        assert_eq!(outcomes.len(), 3);
        let failed = outcomes.values().filter(|o| !o.is_success()).count();
        assert_eq!(failed, 1);
        assert_eq!(b.len(), 1);
        assert_eq!(a.texts(), vec!["Flour".to_string()]);
    }

    #[tokio::test]
    async fn replace_recreates_after_delete() {
        let (a, b) = lists();
        let butter = a.insert("Butter (unsalted)");

        let plan = vec![
            Operation::delete(
                0,
                Side::A,
                "anc-1",
                "Butter (unsalted)",
                butter,
                OpReason::ConflictReplace,
            ),
            Operation::create(1, Side::A, "anc-1", "Butter (salted)", OpReason::ConflictReplace)
                .after(0),
        ];
        let outcomes = applier(&a, &b).apply(&plan).await.outcomes;

        assert_eq!(outcomes[&0], OpOutcome::Done);
        assert!(outcomes[&1].is_success());
        assert_eq!(a.texts(), vec!["Butter (salted)".to_string()]);
    }

    #[tokio::test]
    async fn unresolvable_dependency_is_skipped() {
        let (a, b) = lists();
        let plan = vec![Operation::create(0, Side::B, "anc-1", "Milk", OpReason::NewItem).after(7)];

        let outcomes = applier(&a, &b).apply(&plan).await.outcomes;
        assert_eq!(outcomes[&0], OpOutcome::Skipped);
        assert_eq!(b.call_count(), 0);
    }

    #[test]
    fn same_target_operations_share_a_batch() {
        let ops = vec![
            Operation::delete(0, Side::A, "anc-1", "Eggs", "a-1", OpReason::Removal),
            Operation::create(1, Side::B, "anc-2", "Milk", OpReason::NewItem),
            Operation::update_on_a(2, "anc-1", "Eggs (free range)", "a-1"),
            Operation::delete(3, Side::B, "anc-3", "Salt", "a-1", OpReason::Removal),
        ];

        let batches = batches(ops.iter().collect());

        assert_eq!(batches.len(), 3);
        let shared = batches.iter().find(|batch| batch.len() == 2).unwrap();
        assert_eq!(
            shared.iter().map(|op| op.op_id).collect::<Vec<_>>(),
            vec![0, 2]
        );
    }
}
