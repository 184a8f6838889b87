//! Event types for the registry event system

use crate::models::Asset;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A complete, ordered view of one clinic's assets at a point in time.
///
/// The backing feed is whole-snapshot, not per-field patches: every delta in
/// the store produces a fresh snapshot in feed order (creation time,
/// descending). Consumers replace, never merge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetSnapshot {
    pub clinic_id: Uuid,
    pub assets: Vec<Asset>,
    pub taken_at: DateTime<Utc>,
}

impl AssetSnapshot {
    /// Number of assets currently registered
    pub fn count(&self) -> usize {
        self.assets.len()
    }
}

/// Registry event types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RegistryEvent {
    /// Full snapshot republished after a store delta
    AssetsSnapshot {
        clinic_id: Uuid,
        assets: Vec<Asset>,
        timestamp: DateTime<Utc>,
    },

    /// Live subscription failed or dropped; the local view is stale
    SyncFailed {
        clinic_id: Uuid,
        message: String,
        timestamp: DateTime<Utc>,
    },
}

impl RegistryEvent {
    /// Get event type as string for filtering
    pub fn event_type(&self) -> &str {
        match self {
            RegistryEvent::AssetsSnapshot { .. } => "AssetsSnapshot",
            RegistryEvent::SyncFailed { .. } => "SyncFailed",
        }
    }

    /// Build the snapshot event for a feed delta
    pub fn from_snapshot(snapshot: &AssetSnapshot) -> Self {
        RegistryEvent::AssetsSnapshot {
            clinic_id: snapshot.clinic_id,
            assets: snapshot.assets.clone(),
            timestamp: snapshot.taken_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization_carries_type_tag() {
        let event = RegistryEvent::SyncFailed {
            clinic_id: Uuid::new_v4(),
            message: "subscription dropped".to_string(),
            timestamp: Utc::now(),
        };

        assert_eq!(event.event_type(), "SyncFailed");

        let json = serde_json::to_string(&event).expect("event serializes");
        assert!(json.contains("\"type\":\"SyncFailed\""));

        let back: RegistryEvent = serde_json::from_str(&json).expect("event deserializes");
        match back {
            RegistryEvent::SyncFailed { message, .. } => {
                assert_eq!(message, "subscription dropped");
            }
            _ => panic!("wrong event type deserialized"),
        }
    }
}
