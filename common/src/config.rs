use serde::{Deserialize, Serialize};

/// Cadence and identity of the monitoring loop. Intervals are monotonic
/// milliseconds; the reconnect interval is deliberately much shorter than the
/// sampling cadence so a dropped link recovers between samples.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    pub sense_interval_ms: u64,
    pub send_interval_ms: u64,
    pub reconnect_interval_ms: u64,
    /// `host` tag on every telemetry line; identifies this node downstream.
    pub host_tag: String,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            sense_interval_ms: 60_000,
            send_interval_ms: 60_000,
            reconnect_interval_ms: 5_000,
            host_tag: "esp32".to_string(),
        }
    }
}

impl MonitorConfig {
    /// Clamps loaded values into workable ranges and strips line-protocol
    /// separators from the host tag so a bad config cannot corrupt the wire
    /// format.
    pub fn sanitize(&mut self) {
        self.sense_interval_ms = self.sense_interval_ms.clamp(1_000, 3_600_000);
        self.send_interval_ms = self.send_interval_ms.clamp(1_000, 3_600_000);
        self.reconnect_interval_ms = self.reconnect_interval_ms.clamp(1_000, 600_000);

        self.host_tag.retain(|c| !c.is_whitespace());
        self.host_tag = self.host_tag.replace([',', '='], "-");
        if self.host_tag.is_empty() {
            self.host_tag = "esp32".to_string();
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub wifi_ssid: String,
    pub wifi_pass: String,
    /// Write endpoint for the ESP32 build's direct HTTP posts.
    pub influx_url: String,
    /// Broker for the host build's MQTT line-protocol bridge.
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_user: String,
    pub mqtt_pass: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            wifi_ssid: String::new(),
            wifi_pass: String::new(),
            influx_url: "http://192.168.1.100:8086/write?db=sensors".to_string(),
            mqtt_host: "192.168.1.100".to_string(),
            mqtt_port: 1883,
            mqtt_user: String::new(),
            mqtt_pass: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub network: NetworkConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            monitor: MonitorConfig::default(),
            network: NetworkConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_rejects_unworkable_intervals() {
        let mut config = MonitorConfig {
            sense_interval_ms: 0,
            send_interval_ms: u64::MAX,
            reconnect_interval_ms: 10,
            host_tag: "node".to_string(),
        };
        config.sanitize();

        assert_eq!(config.sense_interval_ms, 1_000);
        assert_eq!(config.send_interval_ms, 3_600_000);
        assert_eq!(config.reconnect_interval_ms, 1_000);
    }

    #[test]
    fn sanitize_keeps_host_tag_line_protocol_safe() {
        let mut config = MonitorConfig {
            host_tag: "living room,rack=2".to_string(),
            ..MonitorConfig::default()
        };
        config.sanitize();
        assert_eq!(config.host_tag, "livingroom-rack-2");

        config.host_tag = "   ".to_string();
        config.sanitize();
        assert_eq!(config.host_tag, "esp32");
    }
}
