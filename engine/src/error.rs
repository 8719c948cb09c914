//! Error types for the listsync engine.

use crate::{AnchorId, OperationId, RemoteId, Side};
use thiserror::Error;

/// All possible errors from the listsync engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    // State errors
    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),

    #[error("remote id {remote_id} on side {side} is claimed by more than one anchor record")]
    DuplicateRemoteId { side: Side, remote_id: RemoteId },

    #[error("anchor record {0} references no remote item")]
    EmptyAnchorRecord(AnchorId),

    // Commit errors
    #[error("outcome reported for unknown operation: {0}")]
    UnknownOperation(OperationId),
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = Error::InvalidSnapshot("truncated".into());
        assert_eq!(err.to_string(), "invalid snapshot: truncated");

        let err = Error::DuplicateRemoteId {
            side: Side::B,
            remote_id: "t-1".into(),
        };
        assert_eq!(
            err.to_string(),
            "remote id t-1 on side B is claimed by more than one anchor record"
        );

        let err = Error::UnknownOperation(7);
        assert_eq!(err.to_string(), "outcome reported for unknown operation: 7");
    }
}
