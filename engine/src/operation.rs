//! Operation types for expressing planned mutations.
//!
//! The reconciler never touches a remote list. It emits operations, the
//! caller applies them and reports an [`OpOutcome`] per operation back to
//! [`commit`](crate::commit).

use crate::{AnchorId, RemoteId, Side};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of an operation, unique within one plan.
pub type OperationId = u32;

/// What an operation does, and to which list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OperationKind {
    CreateOnA,
    CreateOnB,
    DeleteOnA,
    DeleteOnB,
    /// Replace the text of an existing item on A
    UpdateOnA,
}

impl OperationKind {
    pub fn create_on(side: Side) -> Self {
        match side {
            Side::A => Self::CreateOnA,
            Side::B => Self::CreateOnB,
        }
    }

    pub fn delete_on(side: Side) -> Self {
        match side {
            Side::A => Self::DeleteOnA,
            Side::B => Self::DeleteOnB,
        }
    }

    /// The list this operation mutates.
    pub fn side(&self) -> Side {
        match self {
            Self::CreateOnA | Self::DeleteOnA | Self::UpdateOnA => Side::A,
            Self::CreateOnB | Self::DeleteOnB => Side::B,
        }
    }

    pub fn is_create(&self) -> bool {
        matches!(self, Self::CreateOnA | Self::CreateOnB)
    }

    pub fn is_delete(&self) -> bool {
        matches!(self, Self::DeleteOnA | Self::DeleteOnB)
    }
}

/// Why the reconciler planned an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OpReason {
    /// Mirror an item that appeared on one side only
    NewItem,
    /// Fill the missing side of a record linked on one side only
    Repair,
    /// Propagate a removal to the other side
    Removal,
    /// Remove the origin item on A after it was copied to B
    OriginCleanup,
    /// Push the winning text of a conflict in place
    ConflictUpdate,
    /// Delete-then-recreate half of a conflict on a list without updates
    ConflictReplace,
}

/// A planned mutation of one remote list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    /// Operation ID, position in the plan
    pub op_id: OperationId,
    /// What to do
    pub kind: OperationKind,
    /// Anchor record this operation belongs to
    pub anchor_id: AnchorId,
    /// Text to create or update; display text for deletes
    pub text: String,
    /// Remote id to delete or update
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<RemoteId>,
    /// Why the operation was planned
    pub reason: OpReason,
    /// Operation that must succeed before this one is attempted
    #[serde(skip_serializing_if = "Option::is_none")]
    pub depends_on: Option<OperationId>,
}

impl Operation {
    /// Create a new create operation.
    pub fn create(
        op_id: OperationId,
        side: Side,
        anchor_id: impl Into<AnchorId>,
        text: impl Into<String>,
        reason: OpReason,
    ) -> Self {
        Self {
            op_id,
            kind: OperationKind::create_on(side),
            anchor_id: anchor_id.into(),
            text: text.into(),
            target: None,
            reason,
            depends_on: None,
        }
    }

    /// Create a new delete operation.
    pub fn delete(
        op_id: OperationId,
        side: Side,
        anchor_id: impl Into<AnchorId>,
        text: impl Into<String>,
        target: impl Into<RemoteId>,
        reason: OpReason,
    ) -> Self {
        Self {
            op_id,
            kind: OperationKind::delete_on(side),
            anchor_id: anchor_id.into(),
            text: text.into(),
            target: Some(target.into()),
            reason,
            depends_on: None,
        }
    }

    /// Create a new text update on A.
    pub fn update_on_a(
        op_id: OperationId,
        anchor_id: impl Into<AnchorId>,
        text: impl Into<String>,
        target: impl Into<RemoteId>,
    ) -> Self {
        Self {
            op_id,
            kind: OperationKind::UpdateOnA,
            anchor_id: anchor_id.into(),
            text: text.into(),
            target: Some(target.into()),
            reason: OpReason::ConflictUpdate,
            depends_on: None,
        }
    }

    /// Only attempt this operation once `prerequisite` succeeded.
    pub fn after(mut self, prerequisite: OperationId) -> Self {
        self.depends_on = Some(prerequisite);
        self
    }

    /// The list this operation mutates.
    pub fn side(&self) -> Side {
        self.kind.side()
    }

    /// The remote item this operation touches, if it targets an existing one.
    ///
    /// Two operations with the same key must never run concurrently.
    pub fn target_key(&self) -> Option<(Side, &RemoteId)> {
        self.target.as_ref().map(|id| (self.side(), id))
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.target {
            Some(target) if self.kind.is_delete() => write!(f, "{:?}({target})", self.kind),
            Some(target) => write!(f, "{:?}({target} -> {:?})", self.kind, self.text),
            None => write!(f, "{:?}({:?})", self.kind, self.text),
        }
    }
}

/// Result of applying one operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum OpOutcome {
    /// A create succeeded and the remote system assigned this id
    #[serde(rename_all = "camelCase")]
    Created { remote_id: RemoteId },
    /// A delete or update succeeded
    Done,
    /// A delete found the item already gone (success)
    AlreadyAbsent,
    /// The operation failed after its retries
    Failed { error: String },
    /// Not attempted because its prerequisite did not succeed
    Skipped,
}

impl OpOutcome {
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            OpOutcome::Created { .. } | OpOutcome::Done | OpOutcome::AlreadyAbsent
        )
    }

    /// The id assigned by a successful create.
    pub fn created_id(&self) -> Option<&RemoteId> {
        match self {
            OpOutcome::Created { remote_id } => Some(remote_id),
            _ => None,
        }
    }
}
