//! # listsync Engine
//!
//! A deterministic three-way reconciliation engine that keeps two lists
//! consistent: a voice-assistant shopping list (side A) and a cloud to-do
//! list (side B).
//!
//! The engine compares the anchor (the last reconciled state) with the
//! current contents of both lists and plans the create, delete and update
//! operations needed to converge. Given the same inputs it always produces
//! the same plan.
//!
//! ## Design Principles
//!
//! - **No IO**: the engine never talks to a list or a disk
//! - **Deterministic**: same inputs, same plan, same anchor
//! - **Commit after confirmation**: ids enter the anchor only once the
//!   remote system confirmed the operation
//!
//! ## Core Concepts
//!
//! ### Items and anchors
//!
//! An [`Item`] is an entry as a list reports it. An [`AnchorRecord`] links
//! the remote ids one logical entry has on each side; the
//! [`AnchorSnapshot`] is the flat table of those records.
//!
//! ### Operations
//!
//! Changes are planned as [`Operation`]s, never performed directly. An
//! operation may depend on another one, e.g. the origin cleanup of
//! [`SyncDirectionPolicy::OneWayAtoB`] waits for the copy on B.
//!
//! ### Reconciliation
//!
//! The [`Reconciler`] (or [`run_cycle`]) plans one cycle; [`commit`] folds
//! the per-operation outcomes back into the anchor to persist.
//!
//! ## Quick Start
//!
//! ```rust
//! use listsync_engine::{
//!     commit, run_cycle, AnchorSnapshot, Item, OpOutcome, OperationKind,
//!     SyncDirectionPolicy,
//! };
//! use std::collections::BTreeMap;
//!
//! // 1. First run: nothing anchored yet
//! let anchor = AnchorSnapshot::new();
//! let on_a = vec![Item::new("a-1", "Milk")];
//! let on_b = vec![];
//!
//! // 2. Plan the cycle
//! let result = run_cycle(&anchor, &on_a, &on_b, SyncDirectionPolicy::Mirror);
//! assert_eq!(result.plan.len(), 1);
//! assert_eq!(result.plan[0].kind, OperationKind::CreateOnB);
//!
//! // 3. Apply it (here: pretend B assigned id "t-1") and commit
//! let outcomes = BTreeMap::from([(
//!     result.plan[0].op_id,
//!     OpOutcome::Created { remote_id: "t-1".into() },
//! )]);
//! let next = commit(&anchor, &result, &outcomes, 1706745600000).unwrap();
//!
//! let record = next.iter().next().unwrap();
//! assert_eq!(record.id_on_a.as_deref(), Some("a-1"));
//! assert_eq!(record.id_on_b.as_deref(), Some("t-1"));
//! ```
//!
//! ## Persistence
//!
//! [`AnchorSnapshot::to_json`] and [`AnchorSnapshot::from_json`] give a
//! deterministic JSON form; writing it to disk is the caller's concern.

pub mod anchor;
pub mod commit;
pub mod error;
pub mod item;
pub mod operation;
pub mod policy;
pub mod reconcile;

// Re-export main types at crate root
pub use anchor::{AnchorRecord, AnchorSnapshot, SnapshotMetadata, SNAPSHOT_FORMAT_VERSION};
pub use commit::commit;
pub use error::Error;
pub use item::{Item, Side};
pub use operation::{OpOutcome, OpReason, Operation, OperationId, OperationKind};
pub use policy::SyncDirectionPolicy;
pub use reconcile::{run_cycle, Conflict, ConflictResolution, ReconcileResult, Reconciler};

/// Type aliases for clarity
pub type RemoteId = String;
pub type AnchorId = String;
pub type Timestamp = u64;
