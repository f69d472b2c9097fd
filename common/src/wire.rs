//! InfluxDB line-protocol serialization. The shape is consumed byte-for-byte
//! by downstream ingesters, so the tag order, field order, and one-digit
//! float formatting are all load-bearing.

use crate::types::Snapshot;

pub const MEASUREMENT: &str = "sensor_data";

/// MQTT topic the host build bridges telemetry through (Telegraf
/// `mqtt_consumer` with `data_format = "influx"`).
pub const TOPIC_TELEMETRY: &str = "roomsense/telemetry";

/// Renders one telemetry line: comfort as a tag, metrics as fields, floats
/// with exactly one fractional digit.
pub fn line_protocol(host_tag: &str, snapshot: &Snapshot) -> String {
    format!(
        "{MEASUREMENT},host={host_tag},comfort={} temp={:.1},humidity={:.1},dewpoint={:.1},heatindex={:.1}",
        snapshot.comfort.as_str(),
        snapshot.temperature_c,
        snapshot.humidity,
        snapshot.dew_point_c,
        snapshot.heat_index_c,
    )
}
