use std::collections::BTreeMap;

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    nodes::NodeSnapshot,
    types::{HealthState, NodeId},
};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store io: {0}")]
    Io(#[from] std::io::Error),
    #[error("store encoding: {0}")]
    Encoding(#[from] serde_json::Error),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SettingKey {
    MaxTemp,
    MinTemp,
    AcAllowed,
}

impl SettingKey {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MaxTemp => "max_temp",
            Self::MinTemp => "min_temp",
            Self::AcAllowed => "ac_allowed",
        }
    }
}

pub type StoredSettings = BTreeMap<String, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcStateEvent {
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub state: bool,
}

impl AcStateEvent {
    pub fn at(wall: NaiveDateTime, state: bool) -> Self {
        Self {
            date: wall.date(),
            time: wall.time(),
            state,
        }
    }

    pub fn timestamp(&self) -> NaiveDateTime {
        self.date.and_time(self.time)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeStatusRecord {
    pub node_id: NodeId,
    pub name: String,
    pub status: HealthState,
    pub last_seen: Option<NaiveDateTime>,
    pub last_message: Option<String>,
}

impl From<&NodeSnapshot> for NodeStatusRecord {
    fn from(node: &NodeSnapshot) -> Self {
        Self {
            node_id: node.id,
            name: node.name.clone(),
            status: node.health,
            last_seen: node.last_seen,
            last_message: node.last_message.clone(),
        }
    }
}

pub trait PersistenceGateway {
    fn load_settings(&mut self) -> Result<StoredSettings, StoreError>;

    fn save_setting(&mut self, key: SettingKey, value: &str) -> Result<(), StoreError>;

    fn append_state_event(&mut self, event: &AcStateEvent) -> Result<(), StoreError>;

    fn last_state_event(&mut self) -> Result<Option<AcStateEvent>, StoreError>;

    fn upsert_node_status(&mut self, record: &NodeStatusRecord) -> Result<(), StoreError>;

    fn is_stale(&self, timestamp: NaiveDateTime, now: NaiveDateTime, threshold_minutes: i64) -> bool {
        is_stale(timestamp, now, threshold_minutes)
    }
}

pub fn is_stale(timestamp: NaiveDateTime, now: NaiveDateTime, threshold_minutes: i64) -> bool {
    now.signed_duration_since(timestamp) > Duration::minutes(threshold_minutes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wall(hour: u32, minute: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 7, 1)
            .unwrap()
            .and_hms_opt(hour, minute, 0)
            .unwrap()
    }

    #[test]
    fn staleness_is_strictly_older_than_threshold() {
        assert!(!is_stale(wall(10, 0), wall(10, 40), 40));
        assert!(is_stale(wall(10, 0), wall(10, 41), 40));
    }

    #[test]
    fn event_splits_and_rejoins_wall_clock() {
        let event = AcStateEvent::at(wall(8, 15), true);
        assert_eq!(event.date, NaiveDate::from_ymd_opt(2026, 7, 1).unwrap());
        assert_eq!(event.timestamp(), wall(8, 15));
    }
}
