use crate::types::NodeId;

pub const RX_SEGMENT: &str = "rx";
pub const TX_SEGMENT: &str = "tx";
pub const ACK_SEGMENT: &str = "ack";

pub const ACK_DELIVERED: &str = "1";

pub fn rx_topic(prefix: &str, node: NodeId) -> String {
    format!("{prefix}/{RX_SEGMENT}/{}", node.0)
}

pub fn tx_topic(prefix: &str, node: NodeId) -> String {
    format!("{prefix}/{TX_SEGMENT}/{}", node.0)
}

pub fn ack_topic(prefix: &str, node: NodeId) -> String {
    format!("{prefix}/{ACK_SEGMENT}/{}", node.0)
}

pub fn wildcard(prefix: &str, segment: &str) -> String {
    format!("{prefix}/{segment}/+")
}

pub fn parse_topic<'a>(prefix: &str, topic: &'a str) -> Option<(&'a str, NodeId)> {
    let rest = topic.strip_prefix(prefix)?.strip_prefix('/')?;
    let (segment, node) = rest.split_once('/')?;
    let node = node.parse::<u8>().ok()?;
    Some((segment, NodeId(node)))
}
