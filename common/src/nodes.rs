use chrono::NaiveDateTime;
use serde::Serialize;

use crate::{
    config::NodeConfig,
    types::{HealthState, Moment, NodeId},
};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeSnapshot {
    pub id: NodeId,
    pub name: String,
    pub health: HealthState,
    #[serde(rename = "lastSeen")]
    pub last_seen: Option<NaiveDateTime>,
    #[serde(rename = "lastMessage")]
    pub last_message: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HealthTransition {
    pub node: NodeSnapshot,
    pub from: HealthState,
}

#[derive(Debug, Clone)]
struct NodeEntry {
    id: NodeId,
    name: String,
    health: HealthState,
    last_seen_ms: Option<u64>,
    last_seen: Option<NaiveDateTime>,
    last_message: Option<String>,
}

impl NodeEntry {
    fn new(id: NodeId, name: String) -> Self {
        Self {
            id,
            name,
            health: HealthState::Unknown,
            last_seen_ms: None,
            last_seen: None,
            last_message: None,
        }
    }

    fn snapshot(&self) -> NodeSnapshot {
        NodeSnapshot {
            id: self.id,
            name: self.name.clone(),
            health: self.health,
            last_seen: self.last_seen,
            last_message: self.last_message.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NodeRegistry {
    health_interval_ms: u64,
    nodes: Vec<NodeEntry>,
}

impl NodeRegistry {
    pub fn new(configured: &[NodeConfig], health_interval_ms: u64) -> Self {
        let mut nodes: Vec<NodeEntry> = configured
            .iter()
            .map(|node| NodeEntry::new(node.id, node.name.clone()))
            .collect();
        nodes.sort_by_key(|node| node.id);
        nodes.dedup_by_key(|node| node.id);

        Self {
            health_interval_ms,
            nodes,
        }
    }

    pub fn health(&self, id: NodeId) -> Option<HealthState> {
        self.find(id).map(|node| node.health)
    }

    pub fn observe(&mut self, id: NodeId, raw: &str, now: Moment) -> Option<HealthTransition> {
        if self.find(id).is_none() {
            self.nodes.push(NodeEntry::new(id, format!("node-{}", id.0)));
            self.nodes.sort_by_key(|node| node.id);
        }
        let entry = self.nodes.iter_mut().find(|node| node.id == id)?;

        entry.last_seen_ms = Some(now.monotonic_ms);
        entry.last_seen = Some(now.wall);
        entry.last_message = Some(raw.to_string());

        let from = entry.health;
        if from == HealthState::Online {
            return None;
        }
        entry.health = HealthState::Online;
        Some(HealthTransition {
            node: entry.snapshot(),
            from,
        })
    }

    pub fn sweep(&mut self, now: Moment) -> Vec<HealthTransition> {
        let mut transitions = Vec::new();
        for entry in &mut self.nodes {
            if entry.health != HealthState::Online {
                continue;
            }
            let Some(last) = entry.last_seen_ms else {
                continue;
            };
            if now.monotonic_ms.saturating_sub(last) > self.health_interval_ms {
                entry.health = HealthState::Offline;
                transitions.push(HealthTransition {
                    node: entry.snapshot(),
                    from: HealthState::Online,
                });
            }
        }
        transitions
    }

    pub fn snapshot(&self) -> Vec<NodeSnapshot> {
        self.nodes.iter().map(NodeEntry::snapshot).collect()
    }

    fn find(&self, id: NodeId) -> Option<&NodeEntry> {
        self.nodes.iter().find(|node| node.id == id)
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;

    fn start() -> Moment {
        let wall = NaiveDate::from_ymd_opt(2026, 7, 1)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap();
        Moment::new(0, wall)
    }

    fn registry() -> NodeRegistry {
        NodeRegistry::new(
            &[
                NodeConfig {
                    id: NodeId(2),
                    name: "keypadLCD".to_string(),
                },
                NodeConfig {
                    id: NodeId(1),
                    name: "AC_Interface".to_string(),
                },
            ],
            60_000,
        )
    }

    #[test]
    fn configured_nodes_start_unknown() {
        let registry = registry();
        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].name, "AC_Interface");
        assert!(snapshot.iter().all(|node| node.health == HealthState::Unknown));
    }

    #[test]
    fn first_message_reports_transition_once() {
        let mut registry = registry();
        let now = start();

        let transition = registry.observe(NodeId(1), "k1", now).unwrap();
        assert_eq!(transition.from, HealthState::Unknown);
        assert_eq!(transition.node.health, HealthState::Online);
        assert_eq!(transition.node.last_message.as_deref(), Some("k1"));

        assert!(registry.observe(NodeId(1), "k1", now.advanced(5_000)).is_none());
    }

    #[test]
    fn sweep_marks_silent_nodes_offline_and_heartbeat_recovers() {
        let mut registry = registry();
        let now = start();
        registry.observe(NodeId(1), "k1", now);

        assert!(registry.sweep(now.advanced(60_000)).is_empty());

        let offline = registry.sweep(now.advanced(60_001));
        assert_eq!(offline.len(), 1);
        assert_eq!(registry.health(NodeId(1)), Some(HealthState::Offline));
        // Never-contacted nodes are left alone.
        assert_eq!(registry.health(NodeId(2)), Some(HealthState::Unknown));

        // Already offline: no repeated transition.
        assert!(registry.sweep(now.advanced(120_000)).is_empty());

        let back = registry.observe(NodeId(1), "k1", now.advanced(130_000)).unwrap();
        assert_eq!(back.from, HealthState::Offline);
        assert_eq!(registry.health(NodeId(1)), Some(HealthState::Online));
    }

    #[test]
    fn unconfigured_node_is_registered_on_first_message() {
        let mut registry = registry();
        let transition = registry.observe(NodeId(7), "t70.1", start()).unwrap();

        assert_eq!(transition.node.name, "node-7");
        assert_eq!(registry.snapshot().len(), 3);
        assert_eq!(registry.health(NodeId(7)), Some(HealthState::Online));
    }
}
