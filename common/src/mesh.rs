use thiserror::Error;
use tracing::{debug, error, info};

use crate::{config::RetryPolicy, packet::describe_message, types::NodeId};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("{0} is not reachable")]
    Unreachable(NodeId),
    #[error("delivery to {0} was not acknowledged")]
    NoAck(NodeId),
    #[error("transport closed")]
    Closed,
    #[error("transport failure: {0}")]
    Other(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundFrame {
    pub node: NodeId,
    pub payload: String,
}

pub trait MeshTransport {
    /// One delivery attempt. `Ok` means the radio acknowledged the frame.
    fn send(&mut self, node: NodeId, payload: &str) -> Result<(), TransportError>;

    fn receive(&mut self) -> Option<InboundFrame>;

    fn refresh(&mut self) {}
}

#[derive(Debug)]
pub struct MeshAdapter<T> {
    transport: T,
    policy: RetryPolicy,
}

impl<T: MeshTransport> MeshAdapter<T> {
    pub fn new(transport: T, policy: RetryPolicy) -> Self {
        Self { transport, policy }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn try_send(&mut self, node: NodeId, payload: &str) -> bool {
        let attempts = self.policy.max_attempts.max(1);

        for attempt in 1..=attempts {
            self.transport.refresh();
            match self.transport.send(node, payload) {
                Ok(()) => {
                    info!(node = %node, "TX {}", describe_message(payload));
                    return true;
                }
                Err(err) => {
                    debug!(node = %node, attempt, "send attempt failed: {err}");
                }
            }

            if attempt < attempts && !self.policy.delay().is_zero() {
                std::thread::sleep(self.policy.delay());
            }
        }

        error!(
            node = %node,
            "failed to send '{}' after {attempts} attempts",
            describe_message(payload)
        );
        false
    }

    pub fn poll_receive(&mut self) -> Option<InboundFrame> {
        loop {
            let frame = self.transport.receive()?;
            let payload = sanitize_payload(&frame.payload);
            if payload.is_empty() {
                debug!(node = %frame.node, "dropping empty frame");
                continue;
            }
            return Some(InboundFrame {
                node: frame.node,
                payload,
            });
        }
    }
}

pub fn sanitize_payload(raw: &str) -> String {
    raw.replace('\0', "").trim().to_string()
}
