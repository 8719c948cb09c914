//! Sync direction policy.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Which way changes flow between the two lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "camelCase")]
pub enum SyncDirectionPolicy {
    /// Changes on either side propagate to the other (default)
    #[default]
    Mirror,
    /// Creations flow from A to B only
    #[serde(rename_all = "camelCase")]
    OneWayAtoB {
        /// Delete the origin item on A once its copy exists on B
        delete_origin: bool,
    },
}

impl SyncDirectionPolicy {
    /// Build a policy from the configured direction keyword (`both` or `a2m`).
    ///
    /// `delete_origin` is ignored for `both`.
    pub fn from_direction(direction: &str, delete_origin: bool) -> Option<Self> {
        match direction.trim() {
            "both" => Some(Self::Mirror),
            "a2m" => Some(Self::OneWayAtoB { delete_origin }),
            _ => None,
        }
    }

    /// The configuration keyword for this policy.
    pub fn direction(&self) -> &'static str {
        match self {
            Self::Mirror => "both",
            Self::OneWayAtoB { .. } => "a2m",
        }
    }

    pub fn is_mirror(&self) -> bool {
        matches!(self, Self::Mirror)
    }

    pub fn deletes_origin(&self) -> bool {
        matches!(
            self,
            Self::OneWayAtoB {
                delete_origin: true
            }
        )
    }

    /// Whether an anchor produced under `other` can be reused under this policy.
    ///
    /// Only the direction matters; toggling `delete_origin` keeps the anchor.
    pub fn same_direction(&self, other: &SyncDirectionPolicy) -> bool {
        self.direction() == other.direction()
    }
}

impl fmt::Display for SyncDirectionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mirror => f.write_str("both"),
            Self::OneWayAtoB { delete_origin } => {
                write!(f, "a2m (delete_origin={delete_origin})")
            }
        }
    }
}
