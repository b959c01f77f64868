use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use rumqttc::{AsyncClient, Event, EventLoop, Incoming, MqttOptions, QoS};
use tokio::{runtime::Handle, sync::mpsc};
use tracing::{debug, info, warn};

use gateway_common::{
    config::BridgeConfig,
    topics::{self, ACK_DELIVERED, ACK_SEGMENT, RX_SEGMENT},
    InboundFrame, MeshTransport, NodeId, TransportError,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Ack {
    node: NodeId,
    delivered: bool,
    epoch: u64,
}

impl Ack {
    fn answers(&self, node: NodeId, attempt: u64) -> bool {
        self.node == node && self.epoch == attempt
    }
}

// Acks carry the epoch current when they arrive. It advances when an attempt
// starts and again when one times out, so a late ack never matches a retry.
#[derive(Debug, Clone, Default)]
struct AckEpoch(Arc<AtomicU64>);

impl AckEpoch {
    fn current(&self) -> u64 {
        self.0.load(Ordering::Acquire)
    }

    fn advance(&self) -> u64 {
        self.0.fetch_add(1, Ordering::AcqRel) + 1
    }
}

pub struct MqttMeshTransport {
    client: AsyncClient,
    runtime: Handle,
    prefix: String,
    ack_timeout: Duration,
    epoch: AckEpoch,
    inbound: mpsc::UnboundedReceiver<InboundFrame>,
    acks: mpsc::UnboundedReceiver<Ack>,
}

impl MqttMeshTransport {
    /// Must be called from inside the tokio runtime; the event loop task is
    /// spawned on it. The transport itself is then used from the owner
    /// thread, which is not a runtime thread.
    pub fn connect(config: &BridgeConfig, client_id: &str) -> Self {
        let mut options = MqttOptions::new(client_id, config.mqtt_host.clone(), config.mqtt_port);
        options.set_keep_alive(Duration::from_secs(15));
        if !config.mqtt_user.is_empty() {
            options.set_credentials(config.mqtt_user.clone(), config.mqtt_pass.clone());
        }

        let (client, eventloop) = AsyncClient::new(options, 64);
        let (inbound_tx, inbound) = mpsc::unbounded_channel();
        let (ack_tx, acks) = mpsc::unbounded_channel();
        let epoch = AckEpoch::default();

        spawn_bridge_loop(
            client.clone(),
            eventloop,
            config.topic_prefix.clone(),
            epoch.clone(),
            inbound_tx,
            ack_tx,
        );
        info!(
            "mesh bridge at {}:{} (prefix '{}')",
            config.mqtt_host, config.mqtt_port, config.topic_prefix
        );

        Self {
            client,
            runtime: Handle::current(),
            prefix: config.topic_prefix.clone(),
            ack_timeout: Duration::from_millis(config.ack_timeout_ms),
            epoch,
            inbound,
            acks,
        }
    }

    fn wait_for_ack(&mut self, node: NodeId, attempt: u64) -> Result<(), TransportError> {
        let deadline = Instant::now() + self.ack_timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let next = self
                .runtime
                .block_on(tokio::time::timeout(remaining, self.acks.recv()));
            match next {
                Ok(Some(ack)) if ack.answers(node, attempt) => {
                    return if ack.delivered {
                        Ok(())
                    } else {
                        Err(TransportError::NoAck(node))
                    };
                }
                Ok(Some(ack)) => debug!(node = %ack.node, epoch = ack.epoch, "ignoring stray ack"),
                Ok(None) => return Err(TransportError::Closed),
                Err(_) => {
                    self.epoch.advance();
                    return Err(TransportError::NoAck(node));
                }
            }
        }
    }
}

impl MeshTransport for MqttMeshTransport {
    fn send(&mut self, node: NodeId, payload: &str) -> Result<(), TransportError> {
        while self.acks.try_recv().is_ok() {}
        let attempt = self.epoch.advance();

        self.client
            .try_publish(
                topics::tx_topic(&self.prefix, node),
                QoS::AtLeastOnce,
                false,
                payload.as_bytes().to_vec(),
            )
            .map_err(|err| TransportError::Other(err.to_string()))?;

        self.wait_for_ack(node, attempt)
    }

    fn receive(&mut self) -> Option<InboundFrame> {
        self.inbound.try_recv().ok()
    }
}

fn spawn_bridge_loop(
    client: AsyncClient,
    mut eventloop: EventLoop,
    prefix: String,
    epoch: AckEpoch,
    inbound: mpsc::UnboundedSender<InboundFrame>,
    acks: mpsc::UnboundedSender<Ack>,
) {
    tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::Publish(message))) => {
                    let Some((segment, node)) = topics::parse_topic(&prefix, &message.topic)
                    else {
                        debug!("ignoring publish on {}", message.topic);
                        continue;
                    };
                    match segment {
                        RX_SEGMENT => {
                            let payload = String::from_utf8_lossy(&message.payload).into_owned();
                            if inbound.send(InboundFrame { node, payload }).is_err() {
                                break;
                            }
                        }
                        ACK_SEGMENT => {
                            let ack = Ack {
                                node,
                                delivered: &message.payload[..] == ACK_DELIVERED.as_bytes(),
                                epoch: epoch.current(),
                            };
                            if acks.send(ack).is_err() {
                                break;
                            }
                        }
                        other => debug!("ignoring bridge segment '{other}'"),
                    }
                }
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    info!("mqtt connected");
                    for segment in [RX_SEGMENT, ACK_SEGMENT] {
                        let filter = topics::wildcard(&prefix, segment);
                        if let Err(err) = client.try_subscribe(filter.clone(), QoS::AtLeastOnce) {
                            warn!("failed to subscribe to {filter}: {err}");
                        }
                    }
                }
                Ok(_) => {}
                Err(err) => {
                    warn!("mqtt poll error: {err}");
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
            }
        }
        info!("mesh bridge loop stopped");
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ack(node: u8, epoch: u64) -> Ack {
        Ack {
            node: NodeId(node),
            delivered: true,
            epoch,
        }
    }

    #[test]
    fn ack_arriving_after_a_timeout_does_not_answer_the_retry() {
        let epoch = AckEpoch::default();
        let first = epoch.advance();
        assert!(ack(1, epoch.current()).answers(NodeId(1), first));

        // first attempt times out, its ack shows up before the retry
        epoch.advance();
        let late = ack(1, epoch.current());
        let retry = epoch.advance();

        assert!(!late.answers(NodeId(1), retry));
        assert!(ack(1, epoch.current()).answers(NodeId(1), retry));
    }

    #[test]
    fn ack_for_another_node_is_ignored() {
        let epoch = AckEpoch::default();
        let attempt = epoch.advance();
        assert!(!ack(2, epoch.current()).answers(NodeId(1), attempt));
    }
}
