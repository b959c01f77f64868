use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use crate::{
    mesh::{InboundFrame, MeshTransport, TransportError},
    store::{
        AcStateEvent, NodeStatusRecord, PersistenceGateway, SettingKey, StoreError,
        StoredSettings,
    },
    types::NodeId,
};

#[derive(Debug, Default)]
pub struct MemoryStore {
    pub settings: StoredSettings,
    pub events: Vec<AcStateEvent>,
    pub nodes: BTreeMap<NodeId, NodeStatusRecord>,
    failing: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_setting(mut self, key: SettingKey, value: &str) -> Self {
        self.settings.insert(key.as_str().to_string(), value.to_string());
        self
    }

    pub fn with_event(mut self, event: AcStateEvent) -> Self {
        self.events.push(event);
        self
    }

    pub fn set_failing(&mut self, failing: bool) {
        self.failing = failing;
    }

    pub fn setting(&self, key: SettingKey) -> Option<&str> {
        self.settings.get(key.as_str()).map(String::as_str)
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.failing {
            return Err(StoreError::Unavailable("memory store offline".to_string()));
        }
        Ok(())
    }
}

impl PersistenceGateway for MemoryStore {
    fn load_settings(&mut self) -> Result<StoredSettings, StoreError> {
        self.check()?;
        Ok(self.settings.clone())
    }

    fn save_setting(&mut self, key: SettingKey, value: &str) -> Result<(), StoreError> {
        self.check()?;
        self.settings.insert(key.as_str().to_string(), value.to_string());
        Ok(())
    }

    fn append_state_event(&mut self, event: &AcStateEvent) -> Result<(), StoreError> {
        self.check()?;
        self.events.push(*event);
        Ok(())
    }

    fn last_state_event(&mut self) -> Result<Option<AcStateEvent>, StoreError> {
        self.check()?;
        Ok(self.events.last().copied())
    }

    fn upsert_node_status(&mut self, record: &NodeStatusRecord) -> Result<(), StoreError> {
        self.check()?;
        self.nodes.insert(record.node_id, record.clone());
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct LoopbackTransport {
    delivered: Vec<(NodeId, String)>,
    inbound: VecDeque<InboundFrame>,
    unreachable: HashSet<NodeId>,
    pending_failures: HashMap<NodeId, u32>,
    attempts: u32,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_inbound(&mut self, node: NodeId, payload: &str) {
        self.inbound.push_back(InboundFrame {
            node,
            payload: payload.to_string(),
        });
    }

    pub fn set_reachable(&mut self, node: NodeId, reachable: bool) {
        if reachable {
            self.unreachable.remove(&node);
        } else {
            self.unreachable.insert(node);
        }
    }

    pub fn fail_next(&mut self, node: NodeId, count: u32) {
        self.pending_failures.insert(node, count);
    }

    pub fn delivered(&self) -> Vec<(NodeId, String)> {
        self.delivered.clone()
    }

    pub fn delivered_to(&self, node: NodeId) -> Vec<String> {
        self.delivered
            .iter()
            .filter(|(target, _)| *target == node)
            .map(|(_, payload)| payload.clone())
            .collect()
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn clear(&mut self) {
        self.delivered.clear();
        self.attempts = 0;
    }
}

impl MeshTransport for LoopbackTransport {
    fn send(&mut self, node: NodeId, payload: &str) -> Result<(), TransportError> {
        self.attempts += 1;

        if self.unreachable.contains(&node) {
            return Err(TransportError::Unreachable(node));
        }
        if let Some(remaining) = self.pending_failures.get_mut(&node) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(TransportError::NoAck(node));
            }
        }

        self.delivered.push((node, payload.to_string()));
        Ok(())
    }

    fn receive(&mut self) -> Option<InboundFrame> {
        self.inbound.pop_front()
    }
}
