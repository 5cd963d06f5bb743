//! Message envelopes exchanged with the gateway message layer
//!
//! One JSON object per line, tagged by `op`:
//!
//! ```text
//! {"op":"lora","gw":"1357","bus":"LoRa","device":"lora0","ts":1727183838,"payload":"00000000D92D..."}
//! ```
//!
//! Replies use the same `lora` shape with the Join-Accept as payload. Other
//! operations (`startup`, `reading`, ...) belong to other consumers and are
//! parsed only far enough to be skipped.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A tagged envelope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum Envelope {
    /// Raw LoRa frame to or from a gateway radio channel
    Lora(LoraFrame),
    /// Any operation the join server does not handle
    #[serde(other)]
    Other,
}

/// LoRa frame addressed to a gateway channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoraFrame {
    /// Gateway identifier
    pub gw: String,
    /// Radio channel / device handle on the gateway
    pub device: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bus: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "chrono::serde::ts_seconds_option"
    )]
    pub ts: Option<DateTime<Utc>>,
    /// PHY payload, hex encoded on the wire
    #[serde(with = "crate::hexfmt::vec")]
    pub payload: Vec<u8>,
}

impl LoraFrame {
    /// Reply on the same gateway channel this frame came in on.
    pub fn reply(&self, payload: Vec<u8>) -> Self {
        Self {
            gw: self.gw.clone(),
            device: self.device.clone(),
            bus: self.bus.clone(),
            ts: Some(Utc::now()),
            payload,
        }
    }
}

impl Envelope {
    /// Parse one line of the inbound stream
    pub fn parse(line: &str) -> anyhow::Result<Self> {
        serde_json::from_str(line).map_err(|e| anyhow::anyhow!("Invalid envelope: {}", e))
    }

    /// Encode as a single JSON line, newline included
    pub fn to_line(&self) -> anyhow::Result<String> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}
