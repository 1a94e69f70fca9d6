//! Compact local sync snapshot, written after every remote push.
//!
//! Preflight's fresh-sync check reads this file to confirm the two processes
//! have exchanged state recently enough to trust local cooldowns.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotContext {
    pub usage_pct: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotLimbic {
    pub last_wake: Option<DateTime<Utc>>,
    pub total_emissions: u64,
    pub quiet_until: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSnapshot {
    pub timestamp: DateTime<Utc>,
    pub context: SnapshotContext,
    pub pending: BTreeMap<String, i64>,
    pub processed_notifications_count: usize,
    pub last_commit_at: Option<DateTime<Utc>>,
    pub limbic: SnapshotLimbic,
}

pub fn write_snapshot(path: &Path, snapshot: &SyncSnapshot) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let value = serde_json::to_value(snapshot)?;
    fs::write(path, serde_json::to_string_pretty(&value)?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn snapshot_round_trips_with_parseable_timestamp() {
        let path = std::env::temp_dir().join(format!("magenta-sync-{}.json", Uuid::new_v4()));
        let snapshot = SyncSnapshot {
            timestamp: Utc::now(),
            context: SnapshotContext { usage_pct: 0.42 },
            pending: BTreeMap::from([("total".to_string(), 3)]),
            processed_notifications_count: 17,
            last_commit_at: Some(Utc::now()),
            limbic: SnapshotLimbic {
                last_wake: Some(Utc::now()),
                total_emissions: 9,
                quiet_until: None,
            },
        };
        write_snapshot(&path, &snapshot).unwrap();

        let raw = fs::read_to_string(&path).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        // The timestamp must stay RFC 3339 so the preflight freshness check
        // can parse it without knowing the full schema.
        let timestamp = value["timestamp"].as_str().unwrap();
        assert!(DateTime::parse_from_rfc3339(timestamp).is_ok());
        assert_eq!(value["processed_notifications_count"], 17);
        assert_eq!(value["pending"]["total"], 3);

        let parsed: SyncSnapshot = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed.limbic.total_emissions, 9);

        let _ = fs::remove_file(path);
    }
}
