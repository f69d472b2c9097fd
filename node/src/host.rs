//! Host (non-ESP) runtime: a simulated sensor, a console render target, and
//! an MQTT bridge that forwards the line-protocol payload to a Telegraf
//! `mqtt_consumer` input. Used for development and soak testing without
//! hardware.

use std::{
    io::ErrorKind,
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, OnceLock,
    },
    time::{Duration, Instant},
};

use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, QoS};
use tracing::{debug, info, warn};

use roomsense_common::{
    wire, ConnectivityLink, MeasurementSource, Monitor, Reading, RenderTarget, RuntimeConfig,
    SendOutcome, SensorFault, Snapshot, TelemetrySink, TickReport,
};

/// Deterministic stand-in for the SHT3x. Readings wobble around the comfort
/// band; `SIM_FAULT_EVERY=n` makes every nth measurement fail so the error
/// path gets exercised off-hardware.
struct SimulatedSht3x {
    sample: u64,
    fault_every: Option<u64>,
}

impl SimulatedSht3x {
    fn from_env() -> Self {
        let fault_every = std::env::var("SIM_FAULT_EVERY")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .filter(|n| *n > 0);
        Self {
            sample: 0,
            fault_every,
        }
    }
}

impl MeasurementSource for SimulatedSht3x {
    fn measure(&mut self) -> Result<Reading, SensorFault> {
        self.sample = self.sample.saturating_add(1);

        if let Some(every) = self.fault_every {
            if self.sample % every == 0 {
                return Err(SensorFault::Crc);
            }
        }

        Ok(Reading {
            temperature_c: 21.5 + ((self.sample % 8) as f32 * 0.2),
            humidity: 42.0 + ((self.sample % 6) as f32 * 0.5),
        })
    }
}

/// Paints the same four-line layout the OLED shows, into the log stream.
struct ConsolePanel;

impl RenderTarget for ConsolePanel {
    fn render(&mut self, snapshot: &Snapshot) {
        info!(
            "T:{:.1} H:{:.0}%  D:{:.1} I:{:.1}  [{}]",
            snapshot.temperature_c,
            snapshot.humidity,
            snapshot.dew_point_c,
            snapshot.heat_index_c,
            snapshot.comfort.as_str()
        );
    }

    fn render_error(&mut self) {
        warn!("Sensor Error");
    }
}

struct MqttLineSink {
    mqtt: AsyncClient,
}

impl TelemetrySink for MqttLineSink {
    fn send(&mut self, connected: bool, payload: &str) -> SendOutcome {
        if !connected {
            return SendOutcome::Skipped;
        }

        // try_publish queues without awaiting the broker, which keeps the
        // tick non-blocking.
        match self
            .mqtt
            .try_publish(wire::TOPIC_TELEMETRY, QoS::AtMostOnce, false, payload)
        {
            Ok(()) => SendOutcome::Sent(0),
            Err(err) => SendOutcome::TransportError(err.to_string()),
        }
    }
}

struct MqttLink {
    connected: Arc<AtomicBool>,
}

impl ConnectivityLink for MqttLink {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    fn reconnect(&mut self) {
        // The event-loop task owns the actual redial; this only surfaces the
        // retry cadence in the logs.
        debug!("mqtt session down, reconnect pending");
    }
}

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let runtime = load_runtime_config().await.unwrap_or_else(|err| {
        warn!("failed to load runtime config: {err:#}");
        RuntimeConfig::default()
    });

    let mqtt_host = std::env::var("MQTT_HOST").unwrap_or(runtime.network.mqtt_host.clone());
    let mqtt_port = std::env::var("MQTT_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(runtime.network.mqtt_port);

    let mut mqtt_options = MqttOptions::new("roomsense-node", mqtt_host, mqtt_port);
    let mqtt_user = std::env::var("MQTT_USER").unwrap_or(runtime.network.mqtt_user.clone());
    let mqtt_pass = std::env::var("MQTT_PASS").unwrap_or(runtime.network.mqtt_pass.clone());
    if !mqtt_user.is_empty() {
        mqtt_options.set_credentials(mqtt_user, mqtt_pass);
    }

    let (mqtt, mut eventloop) = AsyncClient::new(mqtt_options, 32);
    let connected = Arc::new(AtomicBool::new(false));

    {
        let connected = connected.clone();
        tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                        info!("mqtt connected");
                        connected.store(true, Ordering::Relaxed);
                    }
                    Ok(_) => {}
                    Err(err) => {
                        connected.store(false, Ordering::Relaxed);
                        warn!("mqtt poll error: {err}");
                        tokio::time::sleep(Duration::from_secs(2)).await;
                    }
                }
            }
        });
    }

    let mut monitor = Monitor::new(runtime.monitor);
    let mut sensor = SimulatedSht3x::from_env();
    let mut panel = ConsolePanel;
    let mut sink = MqttLineSink { mqtt };
    let mut link = MqttLink { connected };

    info!(
        "monitor started (sense {}ms, send {}ms, reconnect {}ms, host tag `{}`)",
        monitor.config().sense_interval_ms,
        monitor.config().send_interval_ms,
        monitor.config().reconnect_interval_ms,
        monitor.config().host_tag
    );

    let mut interval = tokio::time::interval(Duration::from_secs(1));
    loop {
        interval.tick().await;
        let report = monitor.tick(
            monotonic_ms(),
            &mut sensor,
            &mut panel,
            &mut sink,
            &mut link,
        );
        log_report(&report);
    }
}

fn log_report(report: &TickReport) {
    if report.reconnect_attempted {
        info!("telemetry link down, reconnect attempt issued");
    }

    if let Some(Err(fault)) = &report.sensed {
        warn!("sensor read failed: {fault}");
    }

    match &report.sent {
        Some(SendOutcome::Sent(_)) => debug!("telemetry line published"),
        Some(SendOutcome::Skipped) => info!("telemetry skipped while disconnected"),
        Some(SendOutcome::TransportError(reason)) => warn!("telemetry publish failed: {reason}"),
        None => {}
    }
}

async fn load_runtime_config() -> anyhow::Result<RuntimeConfig> {
    let path = std::env::var("ROOMSENSE_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("./roomsense.json"));

    match tokio::fs::read(&path).await {
        Ok(raw) => Ok(serde_json::from_slice::<RuntimeConfig>(&raw)?),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(RuntimeConfig::default()),
        Err(err) => Err(err.into()),
    }
}

fn monotonic_ms() -> u64 {
    static START: OnceLock<Instant> = OnceLock::new();
    START
        .get_or_init(Instant::now)
        .elapsed()
        .as_millis()
        .try_into()
        .unwrap_or(u64::MAX)
}
