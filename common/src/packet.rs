use std::fmt;

use thiserror::Error;

pub const MAX_PAYLOAD_BYTES: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("not a packet: {0:?}")]
    NotAPacket(String),
    #[error("packet has no key-value pairs")]
    Empty,
    #[error("encoded packet is {len} bytes, limit is {MAX_PAYLOAD_BYTES}")]
    TooLong { len: usize },
    #[error("key '{0}' appears more than once")]
    DuplicateKey(char),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketKey {
    Sync,
    Temperature,
    Humidity,
    MaxTemp,
    MinTemp,
    AcState,
    AcAllowed,
    Brightness,
    Heartbeat,
    Query,
    Reset,
    TogglePermission,
}

impl PacketKey {
    pub const ALL: [PacketKey; 12] = [
        Self::Sync,
        Self::Temperature,
        Self::Humidity,
        Self::MaxTemp,
        Self::MinTemp,
        Self::AcState,
        Self::AcAllowed,
        Self::Brightness,
        Self::Heartbeat,
        Self::Query,
        Self::Reset,
        Self::TogglePermission,
    ];

    pub fn as_char(self) -> char {
        match self {
            Self::Sync => 's',
            Self::Temperature => 't',
            Self::Humidity => 'h',
            Self::MaxTemp => 'x',
            Self::MinTemp => 'n',
            Self::AcState => 'a',
            Self::AcAllowed => 'l',
            Self::Brightness => 'b',
            Self::Heartbeat => 'k',
            Self::Query => 'q',
            Self::Reset => 'r',
            Self::TogglePermission => 'g',
        }
    }

    pub fn from_char(key: char) -> Option<Self> {
        Self::ALL.into_iter().find(|candidate| candidate.as_char() == key)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PacketValue {
    Int(i32),
    Float(f32),
    Flag(bool),
}

impl fmt::Display for PacketValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(value) => write!(f, "{value}"),
            Self::Float(value) => write!(f, "{value:.1}"),
            Self::Flag(value) => write!(f, "{}", u8::from(*value)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pairs: Vec<(char, String)>,
}

impl Packet {
    pub fn pairs(&self) -> &[(char, String)] {
        &self.pairs
    }

    pub fn contains(&self, key: PacketKey) -> bool {
        self.raw(key.as_char()).is_some()
    }

    pub fn get(&self, key: PacketKey) -> Option<&str> {
        self.raw(key.as_char())
    }

    pub fn float(&self, key: PacketKey) -> Option<f32> {
        self.get(key)
            .and_then(|value| value.trim().parse::<f32>().ok())
            .filter(|value| value.is_finite())
    }

    pub fn flag(&self, key: PacketKey) -> Option<bool> {
        match self.get(key)?.trim() {
            "1" => Some(true),
            "0" => Some(false),
            _ => None,
        }
    }

    fn raw(&self, key: char) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(candidate, _)| *candidate == key)
            .map(|(_, value)| value.as_str())
    }

    pub fn describe(&self) -> String {
        let mut parts = Vec::new();
        for (key, value) in &self.pairs {
            let part = match PacketKey::from_char(*key) {
                Some(PacketKey::Sync) => "Sync".to_string(),
                Some(PacketKey::Temperature) => format!("Temp {value}\u{b0}F"),
                Some(PacketKey::Humidity) => format!("Humidity {value}%"),
                Some(PacketKey::MaxTemp) => format!("Max {value}"),
                Some(PacketKey::MinTemp) => format!("Min {value}"),
                Some(PacketKey::AcState) => {
                    format!("AC {}", if value == "1" { "ON" } else { "OFF" })
                }
                Some(PacketKey::AcAllowed) => {
                    format!("Allow {}", if value == "1" { "Yes" } else { "No" })
                }
                Some(PacketKey::Brightness) => format!("Brightness {value}%"),
                Some(PacketKey::Heartbeat) => "Heartbeat".to_string(),
                Some(PacketKey::Query) => "Query State".to_string(),
                Some(PacketKey::Reset) => "Reset".to_string(),
                Some(PacketKey::TogglePermission) => "Toggle Perm".to_string(),
                None => format!("?{key}={value}"),
            };
            parts.push(part);
        }

        if parts.is_empty() {
            "Unknown".to_string()
        } else {
            parts.join(", ")
        }
    }
}

/// A packet starts with a letter followed by a digit or `-`. Legacy free-text
/// messages ("TurnOnAC", "AC is ON") never match.
pub fn is_packet(raw: &str) -> bool {
    let mut chars = raw.chars();
    match (chars.next(), chars.next()) {
        (Some(first), Some(second)) => {
            first.is_alphabetic() && (second.is_ascii_digit() || second == '-')
        }
        _ => false,
    }
}

pub fn decode(raw: &str) -> Result<Packet, CodecError> {
    if !is_packet(raw) {
        return Err(CodecError::NotAPacket(raw.to_string()));
    }

    let mut pairs: Vec<(char, String)> = Vec::new();
    for segment in raw.split(',') {
        let mut chars = segment.chars();
        let Some(key) = chars.next() else {
            continue;
        };
        let value = chars.as_str();
        // A lone key without a value carries nothing to act on.
        if value.is_empty() {
            continue;
        }

        match pairs.iter_mut().find(|(existing, _)| *existing == key) {
            Some(slot) => slot.1 = value.to_string(),
            None => pairs.push((key, value.to_string())),
        }
    }

    if pairs.is_empty() {
        return Err(CodecError::Empty);
    }
    Ok(Packet { pairs })
}

pub fn encode(pairs: &[(PacketKey, PacketValue)]) -> Result<String, CodecError> {
    if pairs.is_empty() {
        return Err(CodecError::Empty);
    }

    for (index, (key, _)) in pairs.iter().enumerate() {
        if pairs[..index].iter().any(|(earlier, _)| earlier == key) {
            return Err(CodecError::DuplicateKey(key.as_char()));
        }
    }

    let encoded = pairs
        .iter()
        .map(|(key, value)| format!("{}{value}", key.as_char()))
        .collect::<Vec<_>>()
        .join(",");

    if encoded.len() > MAX_PAYLOAD_BYTES {
        return Err(CodecError::TooLong { len: encoded.len() });
    }
    Ok(encoded)
}

pub fn describe_message(raw: &str) -> String {
    match decode(raw) {
        Ok(packet) => format!("{raw} ({})", packet.describe()),
        Err(_) => raw.to_string(),
    }
}
