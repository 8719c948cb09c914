//! Compatibility tests for the persisted anchor format.
//!
//! The state file outlives daemon upgrades and is sometimes edited by hand,
//! so its shape is pinned here independently of the unit tests.

use listsync_engine::{
    run_cycle, AnchorSnapshot, Item, OperationKind, SyncDirectionPolicy, SNAPSHOT_FORMAT_VERSION,
};

const STATE_V1: &str = r#"{
  "formatVersion": 1,
  "policy": { "mode": "oneWayAtoB", "deleteOrigin": true },
  "records": {
    "anc-3": {
      "anchorId": "anc-3",
      "textAtAnchor": "Milk",
      "idOnA": "amzn1.item.1",
      "idOnB": "AAMkAGI2"
    },
    "anc-7": {
      "anchorId": "anc-7",
      "textAtAnchor": "Bread",
      "idOnA": "amzn1.item.2",
      "idOnB": "AAMkAGI3",
      "originCleanupPending": true
    }
  },
  "capturedAt": 1706745600000
}"#;

#[cfg(test)]
mod state_file_tests {
    use super::*;

    #[test]
    fn test_reads_version_one_state() {
        let snapshot = AnchorSnapshot::from_json(STATE_V1).unwrap();

        assert_eq!(snapshot.format_version, SNAPSHOT_FORMAT_VERSION);
        assert_eq!(snapshot.len(), 2);
        assert_eq!(
            snapshot.policy,
            Some(SyncDirectionPolicy::OneWayAtoB {
                delete_origin: true
            })
        );
        assert!(snapshot.get("anc-7").unwrap().origin_cleanup_pending);
        assert!(!snapshot.get("anc-3").unwrap().origin_cleanup_pending);
        // The missing sequence is recovered from the highest id in use.
        assert_eq!(snapshot.next_anchor_seq, 7);
    }

    #[test]
    fn test_written_state_reads_back() {
        let snapshot = AnchorSnapshot::from_json(STATE_V1).unwrap();
        let written = snapshot.to_json_pretty().unwrap();

        assert!(written.contains("\"textAtAnchor\": \"Milk\""));
        assert!(written.contains("\"nextAnchorSeq\": 7"));
        assert_eq!(AnchorSnapshot::from_json(&written).unwrap(), snapshot);
    }

    #[test]
    fn test_rejects_newer_format() {
        let newer = STATE_V1.replace("\"formatVersion\": 1", "\"formatVersion\": 2");
        assert!(AnchorSnapshot::from_json(&newer).is_err());
    }

    #[test]
    fn test_rejects_duplicate_remote_ids() {
        let duplicated = STATE_V1.replace("amzn1.item.2", "amzn1.item.1");
        assert!(AnchorSnapshot::from_json(&duplicated).is_err());
    }

    #[test]
    fn test_loaded_state_drives_next_cycle() {
        let snapshot = AnchorSnapshot::from_json(STATE_V1).unwrap();
        let policy = SyncDirectionPolicy::OneWayAtoB {
            delete_origin: true,
        };
        let a = vec![
            Item::new("amzn1.item.1", "Milk"),
            Item::new("amzn1.item.2", "Bread"),
        ];
        let b = vec![Item::new("AAMkAGI2", "Milk"), Item::new("AAMkAGI3", "Bread")];

        let result = run_cycle(&snapshot, &a, &b, policy);

        // Only the owed origin delete is issued.
        assert_eq!(result.plan.len(), 1);
        assert_eq!(result.plan[0].kind, OperationKind::DeleteOnA);
        assert_eq!(result.plan[0].target.as_deref(), Some("amzn1.item.2"));
        assert!(!result.anchor_reset);
    }

    #[test]
    fn test_direction_switch_discards_records() {
        let snapshot = AnchorSnapshot::from_json(STATE_V1).unwrap();
        let result = run_cycle(&snapshot, &[], &[], SyncDirectionPolicy::Mirror);

        assert!(result.anchor_reset);
        assert!(result.next_anchor.is_empty());
        assert_eq!(result.next_anchor.next_anchor_seq, 7);
    }
}
