//! Samples and aligned records
//!
//! Node 端（温度 + 执行器状态）与 Host 端（位置）两条数据流的数据结构，
//! 以及对齐后输出的记录。

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::{ClockOffset, HostTime, NodeTime};

/// Channel id -> reading, ordered by channel id
pub type ChannelMap = BTreeMap<String, ChannelReading>;

/// Single thermocouple channel reading
///
/// A failed hardware read arrives as `null` on the wire and is kept as `Fault`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "Option<f64>", into = "Option<f64>")]
pub enum ChannelReading {
    Celsius(f64),
    Fault,
}

impl ChannelReading {
    pub fn value(&self) -> Option<f64> {
        match self {
            ChannelReading::Celsius(v) => Some(*v),
            ChannelReading::Fault => None,
        }
    }
}

impl From<Option<f64>> for ChannelReading {
    fn from(value: Option<f64>) -> Self {
        match value {
            Some(v) if v.is_finite() => ChannelReading::Celsius(v),
            _ => ChannelReading::Fault,
        }
    }
}

impl From<ChannelReading> for Option<f64> {
    fn from(reading: ChannelReading) -> Self {
        reading.value()
    }
}

/// Object position from the imaging collaborator (mm)
///
/// `None` means "no detection" and must never be defaulted to zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: Option<f64>,
    pub y: Option<f64>,
    #[serde(default)]
    pub z: Option<f64>,
}

impl Position {
    pub fn planar(x: f64, y: f64) -> Self {
        Self {
            x: Some(x),
            y: Some(y),
            z: None,
        }
    }

    pub fn missing() -> Self {
        Self::default()
    }

    pub fn is_detected(&self) -> bool {
        self.x.is_some() || self.y.is_some() || self.z.is_some()
    }
}

/// Node sample as received, on the Node clock
#[derive(Debug, Clone, PartialEq)]
pub struct NodeSample {
    pub timestamp: NodeTime,
    pub channels: ChannelMap,
    pub actuator_active: bool,
    /// 1-based run index reported by the Node, if any
    pub run_index: Option<u32>,
}

impl NodeSample {
    /// Move onto the Host clock
    pub fn corrected(self, offset: &ClockOffset) -> CorrectedNodeSample {
        CorrectedNodeSample {
            timestamp: offset.correct(self.timestamp),
            raw_timestamp: self.timestamp,
            channels: self.channels,
            actuator_active: self.actuator_active,
        }
    }
}

/// Node sample after offset correction
#[derive(Debug, Clone, PartialEq)]
pub struct CorrectedNodeSample {
    pub timestamp: HostTime,
    pub raw_timestamp: NodeTime,
    pub channels: ChannelMap,
    pub actuator_active: bool,
}

/// Host-side position sample
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HostSample {
    pub timestamp: HostTime,
    pub position: Position,
}

/// One merged row of the run output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlignedRecord {
    /// 1-based run index
    pub run_index: u32,

    /// Milliseconds since the actuation epoch (corrected Node time)
    pub elapsed_ms: f64,

    /// Corrected Node timestamp
    pub node_time: HostTime,

    /// Timestamp of the matched Host sample
    pub host_time: HostTime,

    /// |node_time − host_time| in milliseconds
    pub delta_ms: f64,

    pub position: Position,

    pub channels: ChannelMap,

    pub actuator_active: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_reading_is_fault() {
        let channels: ChannelMap =
            serde_json::from_str(r#"{"ch0": 21.5, "ch1": null}"#).unwrap();
        assert_eq!(channels["ch0"], ChannelReading::Celsius(21.5));
        assert_eq!(channels["ch1"], ChannelReading::Fault);
        assert_eq!(
            serde_json::to_string(&channels).unwrap(),
            r#"{"ch0":21.5,"ch1":null}"#
        );
    }

    #[test]
    fn missing_position_serializes_as_null() {
        let json = serde_json::to_value(Position::missing()).unwrap();
        assert!(json["x"].is_null());
        assert!(!Position::missing().is_detected());
        assert!(Position::planar(1.0, 2.0).is_detected());
    }

    #[test]
    fn corrected_sample_keeps_raw_time() {
        let sample = NodeSample {
            timestamp: NodeTime(100.5),
            channels: ChannelMap::new(),
            actuator_active: true,
            run_index: Some(1),
        };
        let corrected = sample.corrected(&ClockOffset::from_secs(0.5));
        assert_eq!(corrected.timestamp, HostTime(100.0));
        assert_eq!(corrected.raw_timestamp, NodeTime(100.5));
        assert!(corrected.actuator_active);
    }
}
