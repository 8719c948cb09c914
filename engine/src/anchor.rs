//! Anchor records and snapshots.
//!
//! The anchor is the last reconciled view of both lists. It is a flat table
//! of records keyed by a locally generated id; each record links the remote
//! ids an entry has on either side. Snapshots are serialized with `BTreeMap`
//! ordering so the persisted JSON is deterministic.

use crate::{
    error::Result, AnchorId, Error, RemoteId, Side, SyncDirectionPolicy, Timestamp,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// Version of the snapshot format for future compatibility.
pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

const ANCHOR_ID_PREFIX: &str = "anc-";

/// One tracked logical item across both lists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnchorRecord {
    /// Locally generated id, stable for the record's lifetime
    pub anchor_id: AnchorId,
    /// Text as of the last reconciled cycle
    pub text_at_anchor: String,
    /// Remote id on list A, if linked
    pub id_on_a: Option<RemoteId>,
    /// Remote id on list B, if linked
    pub id_on_b: Option<RemoteId>,
    /// A delete of the origin item on A is still owed
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub origin_cleanup_pending: bool,
}

impl AnchorRecord {
    /// Create a record linked on both sides.
    pub fn linked(
        anchor_id: impl Into<AnchorId>,
        text: impl Into<String>,
        id_on_a: impl Into<RemoteId>,
        id_on_b: impl Into<RemoteId>,
    ) -> Self {
        Self {
            anchor_id: anchor_id.into(),
            text_at_anchor: text.into(),
            id_on_a: Some(id_on_a.into()),
            id_on_b: Some(id_on_b.into()),
            origin_cleanup_pending: false,
        }
    }

    /// Create a record known on a single side.
    pub fn one_sided(
        anchor_id: impl Into<AnchorId>,
        text: impl Into<String>,
        side: Side,
        remote_id: impl Into<RemoteId>,
    ) -> Self {
        let mut record = Self {
            anchor_id: anchor_id.into(),
            text_at_anchor: text.into(),
            id_on_a: None,
            id_on_b: None,
            origin_cleanup_pending: false,
        };
        record.set_id(side, Some(remote_id.into()));
        record
    }

    /// Remote id on the given side.
    pub fn id_on(&self, side: Side) -> Option<&RemoteId> {
        match side {
            Side::A => self.id_on_a.as_ref(),
            Side::B => self.id_on_b.as_ref(),
        }
    }

    /// Replace the remote id on the given side.
    pub fn set_id(&mut self, side: Side, remote_id: Option<RemoteId>) {
        match side {
            Side::A => self.id_on_a = remote_id,
            Side::B => self.id_on_b = remote_id,
        }
    }

    /// Linked on both sides.
    pub fn is_linked(&self) -> bool {
        self.id_on_a.is_some() && self.id_on_b.is_some()
    }

    /// References no remote item at all (garbage).
    pub fn is_empty(&self) -> bool {
        self.id_on_a.is_none() && self.id_on_b.is_none()
    }
}

/// The durable state written after each successful cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnchorSnapshot {
    /// Snapshot format version
    pub format_version: u32,
    /// Direction policy the records were reconciled under
    #[serde(default)]
    pub policy: Option<SyncDirectionPolicy>,
    /// All records keyed by anchor id
    pub records: BTreeMap<AnchorId, AnchorRecord>,
    /// When the snapshot was captured (milliseconds since epoch)
    pub captured_at: Timestamp,
    /// Last anchor id sequence number handed out
    #[serde(default)]
    pub next_anchor_seq: u64,
}

impl Default for AnchorSnapshot {
    fn default() -> Self {
        Self::new()
    }
}

impl AnchorSnapshot {
    /// Create an empty snapshot (the first-run state).
    pub fn new() -> Self {
        Self {
            format_version: SNAPSHOT_FORMAT_VERSION,
            policy: None,
            records: BTreeMap::new(),
            captured_at: 0,
            next_anchor_seq: 0,
        }
    }

    /// Number of tracked records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, anchor_id: &str) -> Option<&AnchorRecord> {
        self.records.get(anchor_id)
    }

    pub fn get_mut(&mut self, anchor_id: &str) -> Option<&mut AnchorRecord> {
        self.records.get_mut(anchor_id)
    }

    /// Insert a record, replacing any record with the same anchor id.
    ///
    /// The id sequence moves past the inserted id so it is never minted again.
    pub fn insert(&mut self, record: AnchorRecord) {
        if let Some(seq) = anchor_seq(&record.anchor_id) {
            self.next_anchor_seq = self.next_anchor_seq.max(seq);
        }
        self.records.insert(record.anchor_id.clone(), record);
    }

    pub fn remove(&mut self, anchor_id: &str) -> Option<AnchorRecord> {
        self.records.remove(anchor_id)
    }

    /// Iterate records in anchor id order.
    pub fn iter(&self) -> impl Iterator<Item = &AnchorRecord> {
        self.records.values()
    }

    /// Hand out a fresh anchor id. Ids are never reused, even after a reset.
    pub fn mint_anchor_id(&mut self) -> AnchorId {
        loop {
            self.next_anchor_seq += 1;
            let anchor_id = format!("{ANCHOR_ID_PREFIX}{}", self.next_anchor_seq);
            // `records` is public and may hold ids the sequence never saw.
            if !self.records.contains_key(&anchor_id) {
                return anchor_id;
            }
        }
    }

    /// Drop records that reference no remote item. Returns how many were dropped.
    pub fn purge_orphans(&mut self) -> usize {
        let before = self.records.len();
        self.records.retain(|_, r| !r.is_empty());
        before - self.records.len()
    }

    /// Check the anchor invariants: every record references at least one
    /// remote item, and no remote id is claimed twice on the same side.
    pub fn validate(&self) -> Result<()> {
        let mut seen_a = HashSet::new();
        let mut seen_b = HashSet::new();

        for (key, record) in &self.records {
            if key != &record.anchor_id {
                return Err(Error::InvalidSnapshot(format!(
                    "record stored under {key} carries anchor id {}",
                    record.anchor_id
                )));
            }
            if record.is_empty() {
                return Err(Error::EmptyAnchorRecord(record.anchor_id.clone()));
            }
            for (side, seen) in [(Side::A, &mut seen_a), (Side::B, &mut seen_b)] {
                if let Some(id) = record.id_on(side) {
                    if !seen.insert(id.clone()) {
                        return Err(Error::DuplicateRemoteId {
                            side,
                            remote_id: id.clone(),
                        });
                    }
                }
            }
        }

        Ok(())
    }

    /// Whether the tracked records equal another snapshot's, ignoring the
    /// capture time.
    pub fn same_records(&self, other: &AnchorSnapshot) -> bool {
        self.records == other.records
    }

    /// An empty snapshot for a new direction policy.
    ///
    /// The anchor id sequence carries over so that ids are never reused.
    pub fn reset_for(&self, policy: SyncDirectionPolicy) -> AnchorSnapshot {
        AnchorSnapshot {
            policy: Some(policy),
            next_anchor_seq: self.next_anchor_seq,
            ..AnchorSnapshot::new()
        }
    }

    /// Serialize to JSON with deterministic ordering.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::InvalidSnapshot(e.to_string()))
    }

    /// Serialize to pretty JSON with deterministic ordering.
    pub fn to_json_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::InvalidSnapshot(e.to_string()))
    }

    /// Deserialize from JSON and check the invariants.
    pub fn from_json(json: &str) -> Result<Self> {
        let mut snapshot: Self =
            serde_json::from_str(json).map_err(|e| Error::InvalidSnapshot(e.to_string()))?;

        // Validate format version
        if snapshot.format_version > SNAPSHOT_FORMAT_VERSION {
            return Err(Error::InvalidSnapshot(format!(
                "unsupported snapshot format version: {} (max supported: {})",
                snapshot.format_version, SNAPSHOT_FORMAT_VERSION
            )));
        }

        snapshot.purge_orphans();
        snapshot.validate()?;

        // Hand-edited files may lack the sequence; never mint an id that exists.
        let highest = snapshot
            .records
            .keys()
            .filter_map(|id| anchor_seq(id))
            .max()
            .unwrap_or(0);
        snapshot.next_anchor_seq = snapshot.next_anchor_seq.max(highest);

        Ok(snapshot)
    }
}

/// Sequence number of a minted `anc-N` id.
fn anchor_seq(anchor_id: &str) -> Option<u64> {
    anchor_id.strip_prefix(ANCHOR_ID_PREFIX)?.parse().ok()
}

/// Summary of a snapshot (without the records).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotMetadata {
    /// Snapshot format version
    pub format_version: u32,
    /// Direction policy
    pub policy: Option<SyncDirectionPolicy>,
    /// Capture time
    pub captured_at: Timestamp,
    /// Total record count
    pub record_count: usize,
    /// Records linked on both sides
    pub linked_count: usize,
    /// Records still owing an origin delete
    pub cleanup_pending_count: usize,
}

impl From<&AnchorSnapshot> for SnapshotMetadata {
    fn from(snapshot: &AnchorSnapshot) -> Self {
        Self {
            format_version: snapshot.format_version,
            policy: snapshot.policy,
            captured_at: snapshot.captured_at,
            record_count: snapshot.len(),
            linked_count: snapshot.iter().filter(|r| r.is_linked()).count(),
            cleanup_pending_count: snapshot
                .iter()
                .filter(|r| r.origin_cleanup_pending)
                .count(),
        }
    }
}
