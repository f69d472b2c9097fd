use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::metrics;

/// One raw sample from the measurement source. Consumed immediately to
/// derive a [`Snapshot`]; never stored.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    pub temperature_c: f32,
    pub humidity: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComfortLabel {
    #[serde(rename = "OK")]
    Ok,
    Cold,
    Hot,
    Dry,
    Humid,
    #[serde(rename = "Cold+Dry")]
    ColdDry,
    #[serde(rename = "Cold+Hum")]
    ColdHumid,
    #[serde(rename = "Hot+Dry")]
    HotDry,
    #[serde(rename = "Hot+Hum")]
    HotHumid,
}

impl ComfortLabel {
    /// Wire-format string, used both on the display and as the line-protocol
    /// tag value. This is the only serialization point for the label.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::Cold => "Cold",
            Self::Hot => "Hot",
            Self::Dry => "Dry",
            Self::Humid => "Humid",
            Self::ColdDry => "Cold+Dry",
            Self::ColdHumid => "Cold+Hum",
            Self::HotDry => "Hot+Dry",
            Self::HotHumid => "Hot+Hum",
        }
    }
}

/// Last-known-good metrics. Every field is derived from the same [`Reading`];
/// the monitor replaces the whole value on a successful sample and leaves it
/// untouched on a failed one.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Snapshot {
    pub temperature_c: f32,
    pub humidity: f32,
    pub dew_point_c: f32,
    pub heat_index_c: f32,
    pub comfort: ComfortLabel,
}

impl Snapshot {
    pub fn from_reading(reading: Reading) -> Self {
        Self {
            temperature_c: reading.temperature_c,
            humidity: reading.humidity,
            dew_point_c: metrics::dew_point(reading.temperature_c, reading.humidity),
            heat_index_c: metrics::heat_index(reading.temperature_c, reading.humidity),
            comfort: metrics::comfort_label(reading.temperature_c, reading.humidity),
        }
    }
}

/// Transient sampling fault. Reported and rendered, never fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SensorFault {
    #[error("sensor did not acknowledge the measurement command")]
    NotReady,
    #[error("sensor frame failed CRC validation")]
    Crc,
    #[error("sensor bus transfer failed")]
    Bus,
}

/// Result of one telemetry hand-off. `Skipped` means connectivity was down
/// and no I/O was attempted at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Skipped,
    /// Transport status code: the HTTP status, or 0 where the transport has
    /// no per-request status (MQTT).
    Sent(u16),
    TransportError(String),
}
