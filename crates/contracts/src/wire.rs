//! Wire schema (protocol v1)
//!
//! 换行分隔的 UTF-8 文本帧。控制帧为小写 token，数据帧与配置帧为单行 JSON。
//!
//! | direction   | frames                                                                  |
//! |-------------|-------------------------------------------------------------------------|
//! | Host → Node | config JSON, `start dc`, `sync`, `trigger`, `reset`, `stop`             |
//! | Node → Host | `ready`, `sync_ts:<f>`, `pulse_start_ts:<f>`, `reset_ack`, `stop`, data |

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{ChannelMap, ContractError, NodeSample, NodeTime};

/// Version carried in the configuration frame
pub const WIRE_PROTOCOL_VERSION: u32 = 1;

const SYNC_TS_PREFIX: &str = "sync_ts:";
const PULSE_START_PREFIXES: [&str; 2] = ["pulse_start_ts:", "sma_start:"];

/// Channel key used in `temperatures_C`
pub fn channel_key(channel: u8) -> String {
    format!("ch{channel}")
}

/// Whether a frame is a (possibly malformed) sync reply
pub fn is_sync_reply(frame: &str) -> bool {
    frame
        .trim()
        .to_ascii_lowercase()
        .starts_with(SYNC_TS_PREFIX)
}

/// Host → Node control token
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostCommand {
    Start,
    Sync,
    Trigger,
    Reset,
    Stop,
}

impl HostCommand {
    pub fn token(&self) -> &'static str {
        match self {
            HostCommand::Start => "start dc",
            HostCommand::Sync => "sync",
            HostCommand::Trigger => "trigger",
            HostCommand::Reset => "reset",
            HostCommand::Stop => "stop",
        }
    }

    /// Parse a control token (case-insensitive, whitespace-trimmed)
    pub fn parse(frame: &str) -> Result<Self, ContractError> {
        match frame.trim().to_ascii_lowercase().as_str() {
            "start" | "start dc" => Ok(HostCommand::Start),
            "sync" => Ok(HostCommand::Sync),
            "trigger" => Ok(HostCommand::Trigger),
            "reset" => Ok(HostCommand::Reset),
            "stop" => Ok(HostCommand::Stop),
            _ => Err(ContractError::malformed(frame, "unknown host command")),
        }
    }
}

impl fmt::Display for HostCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

/// Node → Host frame
#[derive(Debug, Clone, PartialEq)]
pub enum NodeMessage {
    Ready,
    SyncTs(NodeTime),
    ResetAck,
    /// Node-side actuation start
    PulseStart(NodeTime),
    Stop,
    Data(DataPacket),
}

impl NodeMessage {
    /// Decode one frame
    pub fn parse(frame: &str) -> Result<Self, ContractError> {
        let trimmed = frame.trim();
        if trimmed.is_empty() {
            return Err(ContractError::malformed(frame, "empty frame"));
        }

        if trimmed.starts_with('{') {
            return serde_json::from_str::<DataPacket>(trimmed)
                .map(NodeMessage::Data)
                .map_err(|e| ContractError::malformed(trimmed, e.to_string()));
        }

        let lower = trimmed.to_ascii_lowercase();
        match lower.as_str() {
            "ready" => return Ok(NodeMessage::Ready),
            "reset_ack" => return Ok(NodeMessage::ResetAck),
            "stop" => return Ok(NodeMessage::Stop),
            _ => {}
        }

        if let Some(rest) = lower.strip_prefix(SYNC_TS_PREFIX) {
            return parse_timestamp(trimmed, rest).map(NodeMessage::SyncTs);
        }
        for prefix in PULSE_START_PREFIXES {
            if let Some(rest) = lower.strip_prefix(prefix) {
                return parse_timestamp(trimmed, rest).map(NodeMessage::PulseStart);
            }
        }

        Err(ContractError::malformed(trimmed, "unknown token"))
    }

    /// Encode as a single frame (without the trailing newline)
    pub fn encode(&self) -> Result<String, ContractError> {
        Ok(match self {
            NodeMessage::Ready => "ready".to_string(),
            NodeMessage::SyncTs(t) => format!("{SYNC_TS_PREFIX}{}", t.secs()),
            NodeMessage::ResetAck => "reset_ack".to_string(),
            NodeMessage::PulseStart(t) => format!("pulse_start_ts:{}", t.secs()),
            NodeMessage::Stop => "stop".to_string(),
            NodeMessage::Data(packet) => {
                serde_json::to_string(packet).map_err(|e| ContractError::WireEncode {
                    message: e.to_string(),
                })?
            }
        })
    }

    /// Short name for logs / metrics labels
    pub fn kind(&self) -> &'static str {
        match self {
            NodeMessage::Ready => "ready",
            NodeMessage::SyncTs(_) => "sync_ts",
            NodeMessage::ResetAck => "reset_ack",
            NodeMessage::PulseStart(_) => "pulse_start_ts",
            NodeMessage::Stop => "stop",
            NodeMessage::Data(_) => "data",
        }
    }
}

fn parse_timestamp(frame: &str, value: &str) -> Result<NodeTime, ContractError> {
    let secs: f64 = value
        .trim()
        .parse()
        .map_err(|_| ContractError::malformed(frame, "timestamp is not a number"))?;
    if !secs.is_finite() {
        return Err(ContractError::malformed(frame, "timestamp is not finite"));
    }
    Ok(NodeTime(secs))
}

/// Node data packet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataPacket {
    /// Node clock, Unix seconds
    pub timestamp: f64,

    /// `chN` -> reading, `null` on a failed read
    #[serde(rename = "temperatures_C")]
    pub temperatures: ChannelMap,

    pub sma_active: bool,

    /// 1-based run index
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_index: Option<u32>,
}

impl From<DataPacket> for NodeSample {
    fn from(packet: DataPacket) -> Self {
        NodeSample {
            timestamp: NodeTime(packet.timestamp),
            channels: packet.temperatures,
            actuator_active: packet.sma_active,
            run_index: packet.run_index,
        }
    }
}

/// Actuation parameters sent to the Node
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ActuationParams {
    /// Closed-loop heating towards a target temperature
    TargetTemperature { target_temp_c: f64, max_heat_time: f64 },
    /// Fixed-length pulse (seconds)
    Pulse { pulse_duration: f64 },
}

impl Default for ActuationParams {
    fn default() -> Self {
        ActuationParams::Pulse {
            pulse_duration: 1.0,
        }
    }
}

/// First frame sent after accept
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeConfigFrame {
    pub protocol_version: u32,
    pub send_interval: f64,
    pub channels: Vec<u8>,
    pub tc_type: String,
    pub num_runs: u32,
    pub run_time: f64,
    pub lead_time: f64,
    #[serde(flatten)]
    pub actuation: ActuationParams,
}

impl NodeConfigFrame {
    pub fn encode(&self) -> Result<String, ContractError> {
        serde_json::to_string(self).map_err(|e| ContractError::WireEncode {
            message: e.to_string(),
        })
    }

    pub fn decode(frame: &str) -> Result<Self, ContractError> {
        serde_json::from_str(frame.trim()).map_err(|e| ContractError::malformed(frame, e.to_string()))
    }
}
