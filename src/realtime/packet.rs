//! Engine.IO v4 / Socket.IO v5 text packet codec.
//!
//! Engine.IO frames carry a single type digit followed by an optional payload.
//! A MESSAGE frame (`4`) wraps one Socket.IO packet:
//!
//! ```text
//! <type>[<namespace>,][<ack id>][<json>]
//! ```
//!
//! Binary packets (types 5 and 6) are not supported.

use anyhow::{anyhow, Result};
use serde_json::Value;

/// Engine.IO frame
#[derive(Debug, Clone, PartialEq)]
pub enum EnginePacket {
    Open(Value),
    Close,
    Ping(String),
    Pong(String),
    Message(String),
    Upgrade,
    Noop,
}

impl EnginePacket {
    pub fn decode(frame: &str) -> Result<Self> {
        let mut chars = frame.chars();
        let kind = chars.next().ok_or_else(|| anyhow!("Empty engine frame"))?;
        let rest = chars.as_str();
        let packet = match kind {
            '0' => EnginePacket::Open(
                serde_json::from_str(rest).map_err(|e| anyhow!("Invalid open packet: {}", e))?,
            ),
            '1' => EnginePacket::Close,
            '2' => EnginePacket::Ping(rest.to_string()),
            '3' => EnginePacket::Pong(rest.to_string()),
            '4' => EnginePacket::Message(rest.to_string()),
            '5' => EnginePacket::Upgrade,
            '6' => EnginePacket::Noop,
            other => return Err(anyhow!("Unknown engine packet type '{}'", other)),
        };
        Ok(packet)
    }

    pub fn encode(&self) -> String {
        match self {
            EnginePacket::Open(data) => format!("0{}", data),
            EnginePacket::Close => "1".to_string(),
            EnginePacket::Ping(data) => format!("2{}", data),
            EnginePacket::Pong(data) => format!("3{}", data),
            EnginePacket::Message(data) => format!("4{}", data),
            EnginePacket::Upgrade => "5".to_string(),
            EnginePacket::Noop => "6".to_string(),
        }
    }
}

/// Heartbeat parameters announced in the OPEN packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Handshake {
    pub ping_interval_ms: u64,
    pub ping_timeout_ms: u64,
}

impl Handshake {
    pub fn from_open(data: &Value) -> Self {
        Self {
            ping_interval_ms: data["pingInterval"].as_u64().unwrap_or(25_000),
            ping_timeout_ms: data["pingTimeout"].as_u64().unwrap_or(20_000),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    Connect,
    Disconnect,
    Event,
    Ack,
    ConnectError,
}

impl PacketKind {
    fn digit(self) -> char {
        match self {
            PacketKind::Connect => '0',
            PacketKind::Disconnect => '1',
            PacketKind::Event => '2',
            PacketKind::Ack => '3',
            PacketKind::ConnectError => '4',
        }
    }

    fn from_digit(c: char) -> Result<Self> {
        match c {
            '0' => Ok(PacketKind::Connect),
            '1' => Ok(PacketKind::Disconnect),
            '2' => Ok(PacketKind::Event),
            '3' => Ok(PacketKind::Ack),
            '4' => Ok(PacketKind::ConnectError),
            '5' | '6' => Err(anyhow!("Binary packets are not supported")),
            other => Err(anyhow!("Unknown socket packet type '{}'", other)),
        }
    }
}

/// Socket.IO packet
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    pub kind: PacketKind,
    pub nsp: String,
    pub id: Option<u64>,
    pub data: Option<Value>,
}

impl Packet {
    fn new(kind: PacketKind, data: Option<Value>) -> Self {
        Self {
            kind,
            nsp: "/".to_string(),
            id: None,
            data,
        }
    }

    /// CONNECT to the main namespace carrying the auth payload
    pub fn connect(auth: Value) -> Self {
        Self::new(PacketKind::Connect, Some(auth))
    }

    pub fn disconnect() -> Self {
        Self::new(PacketKind::Disconnect, None)
    }

    pub fn event(name: &str, args: Vec<Value>) -> Self {
        let mut data = vec![Value::String(name.to_string())];
        data.extend(args);
        Self::new(PacketKind::Event, Some(Value::Array(data)))
    }

    /// Event name and arguments of an EVENT packet
    pub fn as_event(&self) -> Option<(&str, &[Value])> {
        if self.kind != PacketKind::Event {
            return None;
        }
        let items = self.data.as_ref()?.as_array()?;
        let (name, args) = items.split_first()?;
        Some((name.as_str()?, args))
    }

    pub fn decode(payload: &str) -> Result<Self> {
        let mut chars = payload.chars();
        let kind = PacketKind::from_digit(
            chars
                .next()
                .ok_or_else(|| anyhow!("Empty socket packet"))?,
        )?;
        let mut rest = chars.as_str();

        let mut nsp = "/".to_string();
        if rest.starts_with('/') {
            let end = rest.find(',').unwrap_or(rest.len());
            nsp = rest[..end].to_string();
            rest = rest.get(end + 1..).unwrap_or("");
        }

        let digits = rest.chars().take_while(|c| c.is_ascii_digit()).count();
        let id = if digits > 0 {
            Some(rest[..digits].parse::<u64>()?)
        } else {
            None
        };
        rest = &rest[digits..];

        let data = if rest.is_empty() {
            None
        } else {
            Some(
                serde_json::from_str(rest)
                    .map_err(|e| anyhow!("Invalid socket packet payload: {}", e))?,
            )
        };

        Ok(Self {
            kind,
            nsp,
            id,
            data,
        })
    }

    pub fn encode(&self) -> String {
        let mut out = String::new();
        out.push(self.kind.digit());
        if self.nsp != "/" {
            out.push_str(&self.nsp);
            out.push(',');
        }
        if let Some(id) = self.id {
            out.push_str(&id.to_string());
        }
        if let Some(data) = &self.data {
            out.push_str(&data.to_string());
        }
        out
    }

    /// Wrap in an Engine.IO MESSAGE frame
    pub fn to_frame(&self) -> String {
        EnginePacket::Message(self.encode()).encode()
    }
}
