use std::time::Duration;

use anyhow::Context;
use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, QoS};
use tracing::{info, warn};

use gateway_common::{
    encode,
    packet::describe_message,
    topics::{self, ACK_DELIVERED, TX_SEGMENT},
    CodecError, NodeId, PacketKey, PacketValue,
};

const RELAY: NodeId = NodeId(1);
const KEYPAD: NodeId = NodeId(2);

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mqtt_host = std::env::var("MQTT_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let mqtt_port = std::env::var("MQTT_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(1883);
    let prefix = std::env::var("MESH_PREFIX").unwrap_or_else(|_| "mesh".to_string());
    let period = std::env::var("SIM_INTERVAL_SECS")
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .unwrap_or(30)
        .max(1);

    let mut mqtt_options = MqttOptions::new("mesh-sim-rust", mqtt_host, mqtt_port);

    if let Ok(user) = std::env::var("MQTT_USER") {
        let pass = std::env::var("MQTT_PASS").unwrap_or_default();
        mqtt_options.set_credentials(user, pass);
    }

    let (mqtt, mut eventloop) = AsyncClient::new(mqtt_options, 32);

    let acker = mqtt.clone();
    let ack_prefix = prefix.clone();
    tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::Publish(message))) => {
                    if let Some((TX_SEGMENT, node)) =
                        topics::parse_topic(&ack_prefix, &message.topic)
                    {
                        let payload = String::from_utf8_lossy(&message.payload);
                        info!(node = %node, "radio TX {}", describe_message(&payload));
                        if let Err(err) = acker.try_publish(
                            topics::ack_topic(&ack_prefix, node),
                            QoS::AtLeastOnce,
                            false,
                            ACK_DELIVERED,
                        ) {
                            warn!("failed to ack frame for {node}: {err}");
                        }
                    }
                }
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    info!("mesh-sim mqtt connected");
                    let filter = topics::wildcard(&ack_prefix, TX_SEGMENT);
                    if let Err(err) = acker.try_subscribe(filter, QoS::AtLeastOnce) {
                        warn!("failed to subscribe to outbound frames: {err}");
                    }
                }
                Ok(_) => {}
                Err(err) => {
                    warn!("mesh-sim mqtt poll error: {err}");
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
            }
        }
    });

    // The keypad asks for its settings when it boots.
    publish_frame(&mqtt, &prefix, KEYPAD, encode(&[(PacketKey::Sync, PacketValue::Int(1))])?)
        .await?;
    info!("mesh simulator started");

    let mut tick: u64 = 0;
    let mut interval = tokio::time::interval(Duration::from_secs(period));

    loop {
        interval.tick().await;
        tick = tick.saturating_add(1);

        publish_frame(&mqtt, &prefix, KEYPAD, keypad_reading(tick)?).await?;
        publish_frame(&mqtt, &prefix, RELAY, heartbeat()?).await?;
    }
}

async fn publish_frame(
    mqtt: &AsyncClient,
    prefix: &str,
    node: NodeId,
    payload: String,
) -> anyhow::Result<()> {
    info!(node = %node, "radio RX {}", describe_message(&payload));
    mqtt.publish(topics::rx_topic(prefix, node), QoS::AtLeastOnce, false, payload)
        .await
        .with_context(|| format!("failed to publish frame from {node}"))
}

fn keypad_reading(tick: u64) -> Result<String, CodecError> {
    let temperature_f = 72.0 + ((tick % 8) as f32 * 0.4);
    let humidity = 42.0 + ((tick % 6) as f32 * 0.5);
    encode(&[
        (PacketKey::Temperature, PacketValue::Float(temperature_f)),
        (PacketKey::Humidity, PacketValue::Float(humidity)),
    ])
}

fn heartbeat() -> Result<String, CodecError> {
    encode(&[(PacketKey::Heartbeat, PacketValue::Int(1))])
}
