//! Three-way reconciliation of the anchor against both current lists.
//!
//! This is the core of determinism. Given the anchor and the current
//! contents of A and B, it produces an ordered plan of operations and the
//! anchor that results if every operation succeeds.
//!
//! # Algorithm
//!
//! 1. Walk the anchor records in id order and classify each by whether its
//!    remote ids are still present on either side
//! 2. Plan deletes for one-sided removals, repairs for half-linked records
//!    and conflict resolution where both sides disagree on the text
//! 3. Collect items no record claims, link equal texts across sides
//! 4. Plan creates for what is left, per the direction policy
//!
//! Nothing here performs I/O. Outcomes are folded back with
//! [`commit`](crate::commit::commit).

use crate::item::{capitalize_first, same_text};
use crate::{
    AnchorId, AnchorRecord, AnchorSnapshot, Item, OpReason, Operation, OperationId, Side,
    SyncDirectionPolicy,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet, VecDeque};

/// How a text conflict was resolved. The destination (B) always wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConflictResolution {
    /// B's text is written onto the A item in place
    UpdateOnA,
    /// The A item is deleted and recreated with B's text
    ReplaceOnA,
    /// One-way mode: B's text is adopted, A is left untouched
    AdoptOnly,
}

/// A record whose text differs between the two lists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conflict {
    /// The record in conflict
    pub anchor_id: AnchorId,
    /// Text as of the last cycle
    pub text_at_anchor: String,
    /// Current text on A
    pub text_on_a: String,
    /// Current text on B, the winner
    pub text_on_b: String,
    /// How the conflict was resolved
    pub resolution: ConflictResolution,
}

/// Result of reconciliation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileResult {
    /// Operations to apply, in order
    pub plan: Vec<Operation>,
    /// Anchor assuming every operation succeeds; ids still to be created are empty
    pub next_anchor: AnchorSnapshot,
    /// Conflicts detected and how they were resolved
    pub conflicts: Vec<Conflict>,
    /// Records dropped because the item is gone
    pub dropped: Vec<AnchorId>,
    /// Records created by linking equal texts added on both sides
    pub linked: Vec<AnchorId>,
    /// The stored anchor belonged to another direction and was discarded
    pub anchor_reset: bool,
}

impl ReconcileResult {
    fn new(next_anchor: AnchorSnapshot, anchor_reset: bool) -> Self {
        Self {
            plan: Vec::new(),
            next_anchor,
            conflicts: Vec::new(),
            dropped: Vec::new(),
            linked: Vec::new(),
            anchor_reset,
        }
    }

    /// Nothing to apply.
    pub fn is_noop(&self) -> bool {
        self.plan.is_empty()
    }

    /// Look up a planned operation.
    pub fn operation(&self, op_id: OperationId) -> Option<&Operation> {
        self.plan.iter().find(|op| op.op_id == op_id)
    }
}

/// Where a record's remote id stands on one side.
#[derive(Debug, Clone, Copy)]
enum Presence<'i> {
    /// Still listed
    Present(&'i Item),
    /// Was linked, no longer listed
    Gone,
    /// The record has no id on this side
    Untracked,
}

/// Current items of one side, indexed by remote id.
struct SideView<'i> {
    by_id: BTreeMap<&'i str, &'i Item>,
}

impl<'i> SideView<'i> {
    fn new(items: &'i [Item]) -> Self {
        let mut by_id = BTreeMap::new();
        for item in items.iter().filter(|i| i.present) {
            // A listing should not repeat ids; keep the first if it does.
            by_id.entry(item.remote_id.as_str()).or_insert(item);
        }
        Self { by_id }
    }

    fn presence(&self, remote_id: Option<&String>) -> Presence<'i> {
        match remote_id {
            None => Presence::Untracked,
            Some(id) => match self.by_id.get(id.as_str()) {
                Some(item) => Presence::Present(*item),
                None => Presence::Gone,
            },
        }
    }

    /// Items no anchor record claims, in remote id order.
    fn untracked(&self, claimed: &HashSet<&str>) -> Vec<&'i Item> {
        self.by_id
            .iter()
            .filter(|(id, item)| !claimed.contains(*id) && !item.text.trim().is_empty())
            .map(|(_, item)| *item)
            .collect()
    }
}

/// The reconciler plans operations from three snapshots.
pub struct Reconciler {
    policy: SyncDirectionPolicy,
    /// Whether list A can change an item's text in place
    a_supports_update: bool,
    /// Anchor being built
    next: AnchorSnapshot,
    /// Result being built
    result: ReconcileResult,
}

impl Reconciler {
    /// Create a new reconciler.
    pub fn new(policy: SyncDirectionPolicy) -> Self {
        Self {
            policy,
            a_supports_update: false,
            next: AnchorSnapshot::new(),
            result: ReconcileResult::new(AnchorSnapshot::new(), false),
        }
    }

    /// Declare that list A supports in-place text updates.
    ///
    /// Without it, conflicts are propagated to A by delete-then-recreate.
    pub fn with_update_support(mut self, supported: bool) -> Self {
        self.a_supports_update = supported;
        self
    }

    /// Reconcile the anchor with the current contents of both lists.
    pub fn reconcile(
        mut self,
        anchor: &AnchorSnapshot,
        current_a: &[Item],
        current_b: &[Item],
    ) -> ReconcileResult {
        let anchor_reset = matches!(anchor.policy, Some(stored) if !stored.same_direction(&self.policy));
        let base = if anchor_reset {
            anchor.reset_for(self.policy)
        } else {
            anchor.clone()
        };
        self.result.anchor_reset = anchor_reset;
        self.next = base.clone();
        self.next.policy = Some(self.policy);

        let view_a = SideView::new(current_a);
        let view_b = SideView::new(current_b);

        // Ids referenced by any record are never new, whatever happens to
        // the record this cycle.
        let mut claimed_a = HashSet::new();
        let mut claimed_b = HashSet::new();
        for record in base.iter() {
            if let Some(id) = &record.id_on_a {
                claimed_a.insert(id.as_str());
            }
            if let Some(id) = &record.id_on_b {
                claimed_b.insert(id.as_str());
            }
        }

        for record in base.iter() {
            let on_a = view_a.presence(record.id_on_a.as_ref());
            let on_b = view_b.presence(record.id_on_b.as_ref());
            self.reconcile_record(record, on_a, on_b);
        }

        let new_a = view_a.untracked(&claimed_a);
        let new_b = view_b.untracked(&claimed_b);
        self.reconcile_new_items(new_a, new_b);

        self.next.purge_orphans();
        self.result.next_anchor = self.next;
        self.result
    }

    fn reconcile_record(&mut self, record: &AnchorRecord, on_a: Presence<'_>, on_b: Presence<'_>) {
        let mirror = self.policy.is_mirror();

        match (on_a, on_b) {
            (Presence::Present(a), Presence::Present(b)) => self.reconcile_present(record, a, b),

            // Removed on A
            (Presence::Gone, Presence::Present(b)) => {
                if mirror {
                    self.push_delete(Side::B, record, &b.remote_id, OpReason::Removal);
                }
                self.drop_record(record);
            }

            // Removed on B
            (Presence::Present(a), Presence::Gone) => {
                if mirror {
                    self.push_delete(Side::A, record, &a.remote_id, OpReason::Removal);
                    self.drop_record(record);
                } else if record.origin_cleanup_pending && self.policy.deletes_origin() {
                    self.push_delete(Side::A, record, &a.remote_id, OpReason::OriginCleanup);
                    self.drop_record(record);
                } else if let Some(kept) = self.next.get_mut(&record.anchor_id) {
                    // B is downstream: a dismissal there is respected, not undone.
                    kept.id_on_b = None;
                    kept.origin_cleanup_pending = false;
                }
            }

            // Half-linked records: fill the missing side when mirroring.
            (Presence::Present(a), Presence::Untracked) => {
                if mirror {
                    self.push_create(Side::B, &record.anchor_id, &a.text, OpReason::Repair);
                }
            }
            (Presence::Untracked, Presence::Present(b)) => {
                if mirror {
                    self.push_create(Side::A, &record.anchor_id, &b.text, OpReason::Repair);
                }
            }

            // Gone everywhere it was known
            (Presence::Gone | Presence::Untracked, Presence::Gone | Presence::Untracked) => {
                self.drop_record(record);
            }
        }
    }

    fn reconcile_present(&mut self, record: &AnchorRecord, a: &Item, b: &Item) {
        if record.origin_cleanup_pending {
            if self.policy.deletes_origin() {
                self.push_delete(Side::A, record, &a.remote_id, OpReason::OriginCleanup);
                self.drop_record(record);
            } else if let Some(kept) = self.next.get_mut(&record.anchor_id) {
                kept.origin_cleanup_pending = false;
            }
            return;
        }

        if same_text(&a.text, &b.text) {
            // Both sides agree; follow an identical edit made on both.
            if !same_text(&record.text_at_anchor, &b.text) {
                self.set_text(&record.anchor_id, &b.text);
            }
            return;
        }

        let resolution = if self.policy.is_mirror() {
            if self.a_supports_update {
                let op_id = self.next_op_id();
                self.result.plan.push(Operation::update_on_a(
                    op_id,
                    record.anchor_id.clone(),
                    b.text.clone(),
                    a.remote_id.clone(),
                ));
                ConflictResolution::UpdateOnA
            } else {
                let delete_id = self.next_op_id();
                self.result.plan.push(Operation::delete(
                    delete_id,
                    Side::A,
                    record.anchor_id.clone(),
                    a.text.clone(),
                    a.remote_id.clone(),
                    OpReason::ConflictReplace,
                ));
                let create_id = self.next_op_id();
                self.result.plan.push(
                    Operation::create(
                        create_id,
                        Side::A,
                        record.anchor_id.clone(),
                        b.text.clone(),
                        OpReason::ConflictReplace,
                    )
                    .after(delete_id),
                );
                if let Some(kept) = self.next.get_mut(&record.anchor_id) {
                    kept.id_on_a = None;
                }
                ConflictResolution::ReplaceOnA
            }
        } else if same_text(&record.text_at_anchor, &b.text) {
            // One-way: B's text was already adopted in an earlier cycle.
            return;
        } else {
            ConflictResolution::AdoptOnly
        };

        self.set_text(&record.anchor_id, &b.text);
        self.result.conflicts.push(Conflict {
            anchor_id: record.anchor_id.clone(),
            text_at_anchor: record.text_at_anchor.clone(),
            text_on_a: a.text.clone(),
            text_on_b: b.text.clone(),
            resolution,
        });
    }

    fn reconcile_new_items(&mut self, new_a: Vec<&Item>, new_b: Vec<&Item>) {
        // Same text added on both sides in this cycle: link, don't copy.
        let mut unmatched_b: BTreeMap<String, VecDeque<&Item>> = BTreeMap::new();
        for item in new_b {
            unmatched_b.entry(item.match_key()).or_default().push_back(item);
        }

        for a in new_a {
            let matched = unmatched_b
                .get_mut(&a.match_key())
                .and_then(VecDeque::pop_front);

            match matched {
                Some(b) => {
                    let anchor_id = self.next.mint_anchor_id();
                    self.next.insert(AnchorRecord::linked(
                        anchor_id.clone(),
                        b.text.clone(),
                        a.remote_id.clone(),
                        b.remote_id.clone(),
                    ));
                    self.result.linked.push(anchor_id);
                }
                None => self.plan_copy_from_a(a),
            }
        }

        // One-way mode never creates on A.
        if !self.policy.is_mirror() {
            return;
        }
        for b in unmatched_b.into_values().flatten() {
            let anchor_id = self.next.mint_anchor_id();
            self.next.insert(AnchorRecord::one_sided(
                anchor_id.clone(),
                b.text.clone(),
                Side::B,
                b.remote_id.clone(),
            ));
            self.push_create(Side::A, &anchor_id, &b.text, OpReason::NewItem);
        }
    }

    fn plan_copy_from_a(&mut self, a: &Item) {
        let text = match self.policy {
            SyncDirectionPolicy::Mirror => a.text.clone(),
            SyncDirectionPolicy::OneWayAtoB { .. } => capitalize_first(&a.text),
        };
        let anchor_id = self.next.mint_anchor_id();
        let create_id = self.push_create(Side::B, &anchor_id, &text, OpReason::NewItem);

        if self.policy.deletes_origin() {
            // Once the origin is gone, nothing is left to track.
            let op_id = self.next_op_id();
            self.result.plan.push(
                Operation::delete(
                    op_id,
                    Side::A,
                    anchor_id,
                    text,
                    a.remote_id.clone(),
                    OpReason::OriginCleanup,
                )
                .after(create_id),
            );
        } else {
            self.next.insert(AnchorRecord::one_sided(
                anchor_id,
                text,
                Side::A,
                a.remote_id.clone(),
            ));
        }
    }

    fn next_op_id(&self) -> OperationId {
        self.result.plan.len() as OperationId
    }

    fn push_create(
        &mut self,
        side: Side,
        anchor_id: &AnchorId,
        text: &str,
        reason: OpReason,
    ) -> OperationId {
        let op_id = self.next_op_id();
        self.result
            .plan
            .push(Operation::create(op_id, side, anchor_id.clone(), text, reason));
        op_id
    }

    fn push_delete(&mut self, side: Side, record: &AnchorRecord, target: &str, reason: OpReason) {
        let op_id = self.next_op_id();
        self.result.plan.push(Operation::delete(
            op_id,
            side,
            record.anchor_id.clone(),
            record.text_at_anchor.clone(),
            target,
            reason,
        ));
    }

    fn drop_record(&mut self, record: &AnchorRecord) {
        if self.next.remove(&record.anchor_id).is_some() {
            self.result.dropped.push(record.anchor_id.clone());
        }
    }

    fn set_text(&mut self, anchor_id: &str, text: &str) {
        if let Some(record) = self.next.get_mut(anchor_id) {
            record.text_at_anchor = text.to_string();
        }
    }
}

/// Reconcile one cycle: the primary testable surface of the engine.
///
/// Assumes list A only supports create and delete; use [`Reconciler`]
/// directly to declare update support.
pub fn run_cycle(
    anchor: &AnchorSnapshot,
    current_a: &[Item],
    current_b: &[Item],
    policy: SyncDirectionPolicy,
) -> ReconcileResult {
    Reconciler::new(policy).reconcile(anchor, current_a, current_b)
}
