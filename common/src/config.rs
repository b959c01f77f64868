use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::NodeId;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub temp_warning_secs: u64,
    pub temp_safety_secs: u64,
    pub health_interval_secs: u64,
    pub sweep_interval_secs: u64,
    pub state_stale_minutes: i64,
    pub loop_interval_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            temp_warning_secs: 90,
            temp_safety_secs: 180,
            health_interval_secs: 60,
            sweep_interval_secs: 60,
            state_stale_minutes: 40,
            loop_interval_ms: 20,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u8,
    pub delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay_ms: 250,
        }
    }
}

impl RetryPolicy {
    pub fn immediate(max_attempts: u8) -> Self {
        Self {
            max_attempts,
            delay_ms: 0,
        }
    }

    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdDefaults {
    pub max_temp: f32,
    pub min_temp: f32,
}

impl Default for ThresholdDefaults {
    fn default() -> Self {
        Self {
            max_temp: 78.0,
            min_temp: 72.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConfig {
    pub id: NodeId,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshConfig {
    pub nodes: Vec<NodeConfig>,
    pub relay_node: NodeId,
    pub display_node: NodeId,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            nodes: vec![
                NodeConfig {
                    id: NodeId(1),
                    name: "AC_Interface".to_string(),
                },
                NodeConfig {
                    id: NodeId(2),
                    name: "keypadLCD".to_string(),
                },
            ],
            relay_node: NodeId(1),
            display_node: NodeId(2),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 65432,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_user: String,
    pub mqtt_pass: String,
    pub topic_prefix: String,
    pub ack_timeout_ms: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            mqtt_host: "127.0.0.1".to_string(),
            mqtt_port: 1883,
            mqtt_user: String::new(),
            mqtt_pass: String::new(),
            topic_prefix: "mesh".to_string(),
            ack_timeout_ms: 200,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub timing: TimingConfig,
    pub retry: RetryPolicy,
    pub defaults: ThresholdDefaults,
    pub mesh: MeshConfig,
    pub server: ServerConfig,
    pub bridge: BridgeConfig,
}

impl GatewayConfig {
    pub fn sanitize(&mut self) {
        let timing = &mut self.timing;
        timing.temp_warning_secs = timing.temp_warning_secs.max(1);
        timing.temp_safety_secs = timing.temp_safety_secs.max(timing.temp_warning_secs);
        timing.health_interval_secs = timing.health_interval_secs.max(1);
        timing.sweep_interval_secs = timing.sweep_interval_secs.max(1);
        timing.state_stale_minutes = timing.state_stale_minutes.max(1);
        timing.loop_interval_ms = timing.loop_interval_ms.clamp(1, 1_000);

        self.retry.max_attempts = self.retry.max_attempts.max(1);

        if !self.defaults.max_temp.is_finite()
            || !self.defaults.min_temp.is_finite()
            || self.defaults.max_temp <= self.defaults.min_temp
        {
            self.defaults = ThresholdDefaults::default();
        }

        self.bridge.ack_timeout_ms = self.bridge.ack_timeout_ms.clamp(10, 5_000);
        if self.bridge.topic_prefix.trim().is_empty() {
            self.bridge.topic_prefix = BridgeConfig::default().topic_prefix;
        }

        let mesh = &mut self.mesh;
        mesh.nodes.sort_by_key(|node| node.id);
        mesh.nodes.dedup_by_key(|node| node.id);
        for role in [mesh.relay_node, mesh.display_node] {
            if !mesh.nodes.iter().any(|node| node.id == role) {
                mesh.nodes.push(NodeConfig {
                    id: role,
                    name: format!("node-{}", role.0),
                });
            }
        }
        mesh.nodes.sort_by_key(|node| node.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_fills_defaults() {
        let raw = r#"{ "server": { "port": 7000 }, "retry": { "max_attempts": 5 } }"#;
        let config: GatewayConfig = serde_json::from_str(raw).unwrap();
        assert_eq!(config.server.port, 7000);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.delay_ms, 250);
        assert_eq!(config.timing.temp_safety_secs, 180);
    }

    #[test]
    fn sanitize_repairs_inverted_thresholds_and_zero_attempts() {
        let mut config = GatewayConfig::default();
        config.defaults.max_temp = 60.0;
        config.defaults.min_temp = 80.0;
        config.retry.max_attempts = 0;
        config.timing.temp_safety_secs = 10;
        config.sanitize();

        assert_eq!(config.defaults, ThresholdDefaults::default());
        assert_eq!(config.retry.max_attempts, 1);
        assert_eq!(config.timing.temp_safety_secs, 90);
    }

    #[test]
    fn sanitize_registers_role_nodes() {
        let mut config = GatewayConfig::default();
        config.mesh.nodes.clear();
        config.mesh.relay_node = NodeId(4);
        config.sanitize();

        let ids: Vec<u8> = config.mesh.nodes.iter().map(|node| node.id.0).collect();
        assert_eq!(ids, vec![2, 4]);
        assert_eq!(config.mesh.nodes[1].name, "node-4");
    }
}
