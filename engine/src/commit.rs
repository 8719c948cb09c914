//! Folding operation outcomes back into the anchor.
//!
//! [`ReconcileResult::next_anchor`] describes the world as if every planned
//! operation succeeded. After the plan has been applied, [`commit`] narrows
//! it down to what actually happened:
//!
//! - a successful create fills in the id the remote system assigned
//! - a failed create of a new item leaves no record, so the item is seen as
//!   new again next cycle and retried rather than duplicated
//! - a failed delete or update restores the record as it was before the cycle
//! - a failed origin cleanup keeps the record and flags the delete as owed

use crate::{
    error::Result, AnchorRecord, AnchorSnapshot, Error, OpOutcome, OpReason, OperationId,
    ReconcileResult, RemoteId, Timestamp,
};
use std::collections::{BTreeMap, HashMap};

/// Build the anchor to persist from the prior anchor, the reconcile result
/// and the outcome of each operation.
///
/// Operations missing from `outcomes` count as skipped.
pub fn commit(
    prior: &AnchorSnapshot,
    result: &ReconcileResult,
    outcomes: &BTreeMap<OperationId, OpOutcome>,
    captured_at: Timestamp,
) -> Result<AnchorSnapshot> {
    if let Some(unknown) = outcomes.keys().find(|id| result.operation(**id).is_none()) {
        return Err(Error::UnknownOperation(*unknown));
    }

    // After a direction reset the prior records no longer apply.
    let empty = AnchorSnapshot::new();
    let base = if result.anchor_reset { &empty } else { prior };

    let mut next = result.next_anchor.clone();
    let mut created: HashMap<OperationId, RemoteId> = HashMap::new();

    for op in &result.plan {
        let outcome = outcomes.get(&op.op_id).unwrap_or(&OpOutcome::Skipped);

        if op.kind.is_create() {
            match outcome.created_id() {
                Some(remote_id) => {
                    created.insert(op.op_id, remote_id.clone());
                    // A record consumed by its origin cleanup has nothing to fill.
                    if let Some(record) = next.get_mut(&op.anchor_id) {
                        record.set_id(op.side(), Some(remote_id.clone()));
                    }
                }
                None if base.get(&op.anchor_id).is_none() => {
                    next.remove(&op.anchor_id);
                }
                // Existing records keep the side empty and are repaired next cycle.
                None => {}
            }
            continue;
        }

        if outcome.is_success() {
            continue;
        }

        match (op.reason, base.get(&op.anchor_id)) {
            (OpReason::OriginCleanup, Some(previous)) => {
                let mut record = previous.clone();
                record.origin_cleanup_pending = true;
                next.insert(record);
            }
            (OpReason::OriginCleanup, None) => {
                let copied = op.depends_on.and_then(|dep| created.get(&dep));
                if let (Some(id_on_b), Some(id_on_a)) = (copied, &op.target) {
                    let mut record = AnchorRecord::linked(
                        op.anchor_id.clone(),
                        op.text.clone(),
                        id_on_a.clone(),
                        id_on_b.clone(),
                    );
                    record.origin_cleanup_pending = true;
                    next.insert(record);
                }
                // Otherwise the copy failed too: the origin stays new and is retried.
            }
            (_, Some(previous)) => next.insert(previous.clone()),
            (_, None) => {}
        }
    }

    next.purge_orphans();
    next.captured_at = captured_at;
    next.validate()?;
    Ok(next)
}
