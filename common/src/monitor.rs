//! Cooperative scheduling core. A [`Monitor`] owns the last-known-good
//! snapshot and three activity timestamps; each `tick` runs the due-checks
//! against an injected monotonic clock and returns immediately. All I/O goes
//! through the collaborator traits, which must themselves be bounded-latency:
//! the monitor has no timeout or cancellation mechanism of its own.

use crate::{
    config::MonitorConfig,
    types::{Reading, SendOutcome, SensorFault, Snapshot},
    wire,
};

pub trait MeasurementSource {
    fn measure(&mut self) -> Result<Reading, SensorFault>;
}

pub trait RenderTarget {
    fn render(&mut self, snapshot: &Snapshot);
    fn render_error(&mut self);
}

/// See `SendOutcome`: when `connected` is false the sink must return
/// `Skipped` without attempting any I/O. Retry policy belongs to the caller's
/// cadence, never to the sink.
pub trait TelemetrySink {
    fn send(&mut self, connected: bool, payload: &str) -> SendOutcome;
}

pub trait ConnectivityLink {
    fn is_connected(&self) -> bool;
    /// Fire-and-forget; the effect is observed only through later
    /// `is_connected` polls.
    fn reconnect(&mut self);
}

/// What one tick actually did, for driver-side logging. Collaborators are
/// invoked inside `tick`; this is a record, not a command list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickReport {
    pub reconnect_attempted: bool,
    pub sensed: Option<Result<Reading, SensorFault>>,
    pub sent: Option<SendOutcome>,
}

#[derive(Debug)]
pub struct Monitor {
    config: MonitorConfig,
    snapshot: Option<Snapshot>,
    last_sense_ms: u64,
    last_send_ms: u64,
    last_reconnect_ms: u64,
}

impl Monitor {
    pub fn new(mut config: MonitorConfig) -> Self {
        config.sanitize();
        Self {
            config,
            snapshot: None,
            last_sense_ms: 0,
            last_send_ms: 0,
            last_reconnect_ms: 0,
        }
    }

    /// `None` until the first successful sample.
    pub fn snapshot(&self) -> Option<&Snapshot> {
        self.snapshot.as_ref()
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// One due-check-and-fire cycle. Evaluation order is fixed: connectivity
    /// maintenance, then sense+render, then telemetry. The checks are
    /// otherwise independent, so zero or more activities may fire in a single
    /// tick.
    pub fn tick(
        &mut self,
        now_ms: u64,
        sensor: &mut dyn MeasurementSource,
        panel: &mut dyn RenderTarget,
        sink: &mut dyn TelemetrySink,
        link: &mut dyn ConnectivityLink,
    ) -> TickReport {
        let mut report = TickReport::default();

        // Reconnect while down, throttled only by the interval. The timestamp
        // is stamped regardless of outcome; there is no retry budget.
        if !link.is_connected() && self.due(now_ms, self.last_reconnect_ms, self.config.reconnect_interval_ms)
        {
            self.last_reconnect_ms = now_ms;
            link.reconnect();
            report.reconnect_attempted = true;
        }

        if self.due(now_ms, self.last_sense_ms, self.config.sense_interval_ms) {
            self.last_sense_ms = now_ms;
            match sensor.measure() {
                Ok(reading) => {
                    let snapshot = Snapshot::from_reading(reading);
                    panel.render(&snapshot);
                    self.snapshot = Some(snapshot);
                    report.sensed = Some(Ok(reading));
                }
                Err(fault) => {
                    // A sampling fault ends the tick here: the snapshot stays
                    // frozen and the telemetry check below does not run until
                    // the next tick.
                    panel.render_error();
                    report.sensed = Some(Err(fault));
                    return report;
                }
            }
        }

        if self.due(now_ms, self.last_send_ms, self.config.send_interval_ms) {
            self.last_send_ms = now_ms;
            if let Some(snapshot) = &self.snapshot {
                let payload = wire::line_protocol(&self.config.host_tag, snapshot);
                report.sent = Some(sink.send(link.is_connected(), &payload));
            }
        }

        report
    }

    fn due(&self, now_ms: u64, last_ms: u64, interval_ms: u64) -> bool {
        now_ms.saturating_sub(last_ms) >= interval_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ComfortLabel;

    const SENSE_MS: u64 = 60_000;
    const SEND_MS: u64 = 60_000;
    const RECONNECT_MS: u64 = 5_000;

    fn test_monitor() -> Monitor {
        Monitor::new(MonitorConfig::default())
    }

    struct ScriptedSensor {
        // Front of the queue is the next measurement; repeats the last entry
        // once drained.
        script: Vec<Result<Reading, SensorFault>>,
        calls: usize,
    }

    impl ScriptedSensor {
        fn ok(temperature_c: f32, humidity: f32) -> Self {
            Self {
                script: vec![Ok(Reading {
                    temperature_c,
                    humidity,
                })],
                calls: 0,
            }
        }

        fn scripted(script: Vec<Result<Reading, SensorFault>>) -> Self {
            Self { script, calls: 0 }
        }
    }

    impl MeasurementSource for ScriptedSensor {
        fn measure(&mut self) -> Result<Reading, SensorFault> {
            let index = self.calls.min(self.script.len() - 1);
            self.calls += 1;
            self.script[index]
        }
    }

    #[derive(Default)]
    struct RecordingPanel {
        rendered: Vec<Snapshot>,
        errors: usize,
    }

    impl RenderTarget for RecordingPanel {
        fn render(&mut self, snapshot: &Snapshot) {
            self.rendered.push(*snapshot);
        }

        fn render_error(&mut self) {
            self.errors += 1;
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        sends: Vec<(bool, String)>,
    }

    impl TelemetrySink for RecordingSink {
        fn send(&mut self, connected: bool, payload: &str) -> SendOutcome {
            self.sends.push((connected, payload.to_string()));
            if connected {
                SendOutcome::Sent(204)
            } else {
                SendOutcome::Skipped
            }
        }
    }

    struct FixedLink {
        connected: bool,
        reconnects: usize,
    }

    impl FixedLink {
        fn up() -> Self {
            Self {
                connected: true,
                reconnects: 0,
            }
        }

        fn down() -> Self {
            Self {
                connected: false,
                reconnects: 0,
            }
        }
    }

    impl ConnectivityLink for FixedLink {
        fn is_connected(&self) -> bool {
            self.connected
        }

        fn reconnect(&mut self) {
            self.reconnects += 1;
        }
    }

    #[test]
    fn nothing_fires_before_first_deadline() {
        let mut monitor = test_monitor();
        let mut sensor = ScriptedSensor::ok(22.0, 45.0);
        let mut panel = RecordingPanel::default();
        let mut sink = RecordingSink::default();
        let mut link = FixedLink::up();

        let report = monitor.tick(SENSE_MS - 1, &mut sensor, &mut panel, &mut sink, &mut link);

        assert_eq!(report, TickReport::default());
        assert_eq!(sensor.calls, 0);
        assert!(panel.rendered.is_empty());
        assert!(sink.sends.is_empty());
        assert!(monitor.snapshot().is_none());
    }

    #[test]
    fn sense_and_send_fire_at_the_deadline() {
        let mut monitor = test_monitor();
        let mut sensor = ScriptedSensor::ok(22.0, 45.0);
        let mut panel = RecordingPanel::default();
        let mut sink = RecordingSink::default();
        let mut link = FixedLink::up();

        let report = monitor.tick(SENSE_MS, &mut sensor, &mut panel, &mut sink, &mut link);

        assert!(matches!(report.sensed, Some(Ok(_))));
        assert_eq!(report.sent, Some(SendOutcome::Sent(204)));
        assert_eq!(panel.rendered.len(), 1);
        assert_eq!(panel.rendered[0].comfort, ComfortLabel::Ok);
        assert_eq!(sink.sends.len(), 1);
        assert!(sink.sends[0].1.starts_with("sensor_data,host=esp32,comfort=OK "));
    }

    #[test]
    fn repeated_ticks_without_elapsed_time_are_inert() {
        let mut monitor = test_monitor();
        let mut sensor = ScriptedSensor::ok(22.0, 45.0);
        let mut panel = RecordingPanel::default();
        let mut sink = RecordingSink::default();
        let mut link = FixedLink::up();

        monitor.tick(SENSE_MS, &mut sensor, &mut panel, &mut sink, &mut link);
        let before = *monitor.snapshot().unwrap();

        for _ in 0..10 {
            let report = monitor.tick(SENSE_MS, &mut sensor, &mut panel, &mut sink, &mut link);
            assert_eq!(report, TickReport::default());
        }

        assert_eq!(sensor.calls, 1);
        assert_eq!(panel.rendered.len(), 1);
        assert_eq!(sink.sends.len(), 1);
        assert_eq!(monitor.snapshot(), Some(&before));
    }

    #[test]
    fn sensor_fault_freezes_snapshot_and_skips_due_telemetry() {
        let mut monitor = test_monitor();
        let mut sensor = ScriptedSensor::scripted(vec![
            Ok(Reading {
                temperature_c: 22.0,
                humidity: 45.0,
            }),
            Err(SensorFault::Crc),
        ]);
        let mut panel = RecordingPanel::default();
        let mut sink = RecordingSink::default();
        let mut link = FixedLink::up();

        monitor.tick(SENSE_MS, &mut sensor, &mut panel, &mut sink, &mut link);
        let before = *monitor.snapshot().unwrap();
        assert_eq!(sink.sends.len(), 1);

        // Both sense and send are due at 2*interval; the fault aborts the
        // tick before the telemetry check.
        let report = monitor.tick(2 * SENSE_MS, &mut sensor, &mut panel, &mut sink, &mut link);

        assert_eq!(report.sensed, Some(Err(SensorFault::Crc)));
        assert_eq!(report.sent, None);
        assert_eq!(panel.errors, 1);
        assert_eq!(sink.sends.len(), 1);
        assert_eq!(monitor.snapshot(), Some(&before));
    }

    #[test]
    fn stale_snapshot_is_sent_after_an_intervening_fault() {
        let mut monitor = test_monitor();
        let mut sensor = ScriptedSensor::scripted(vec![
            Ok(Reading {
                temperature_c: 22.0,
                humidity: 45.0,
            }),
            Err(SensorFault::NotReady),
        ]);
        let mut panel = RecordingPanel::default();
        let mut sink = RecordingSink::default();
        let mut link = FixedLink::up();

        monitor.tick(SEND_MS, &mut sensor, &mut panel, &mut sink, &mut link);
        let first_payload = sink.sends[0].1.clone();

        monitor.tick(2 * SEND_MS, &mut sensor, &mut panel, &mut sink, &mut link);
        assert_eq!(sink.sends.len(), 1);

        // Send timer is still due one tick later; sense is not. The payload
        // carries the values sampled before the fault.
        let report = monitor.tick(
            2 * SEND_MS + 1,
            &mut sensor,
            &mut panel,
            &mut sink,
            &mut link,
        );

        assert!(matches!(report.sent, Some(SendOutcome::Sent(_))));
        assert_eq!(sink.sends.len(), 2);
        assert_eq!(sink.sends[1].1, first_payload);
    }

    #[test]
    fn disconnected_send_is_handed_off_as_skip() {
        let mut monitor = test_monitor();
        let mut sensor = ScriptedSensor::ok(22.0, 45.0);
        let mut panel = RecordingPanel::default();
        let mut sink = RecordingSink::default();
        let mut link = FixedLink::up();

        monitor.tick(SENSE_MS, &mut sensor, &mut panel, &mut sink, &mut link);

        link.connected = false;
        let report = monitor.tick(2 * SEND_MS, &mut sensor, &mut panel, &mut sink, &mut link);

        assert_eq!(report.sent, Some(SendOutcome::Skipped));
        assert_eq!(sink.sends.len(), 2);
        assert!(!sink.sends[1].0, "sink must be told the link is down");
    }

    #[test]
    fn no_telemetry_before_the_first_successful_sample() {
        let mut monitor = test_monitor();
        let mut sensor = ScriptedSensor::scripted(vec![Err(SensorFault::NotReady)]);
        let mut panel = RecordingPanel::default();
        let mut sink = RecordingSink::default();
        let mut link = FixedLink::up();

        // Sense faults and aborts the tick; the later tick reaches the send
        // check with no snapshot and emits nothing.
        monitor.tick(SEND_MS, &mut sensor, &mut panel, &mut sink, &mut link);
        let report = monitor.tick(SEND_MS + 1, &mut sensor, &mut panel, &mut sink, &mut link);

        assert_eq!(report.sent, None);
        assert!(sink.sends.is_empty());
    }

    #[test]
    fn reconnect_fires_on_its_own_cadence_while_down() {
        let mut monitor = test_monitor();
        let mut sensor = ScriptedSensor::ok(22.0, 45.0);
        let mut panel = RecordingPanel::default();
        let mut sink = RecordingSink::default();
        let mut link = FixedLink::down();

        let report = monitor.tick(RECONNECT_MS, &mut sensor, &mut panel, &mut sink, &mut link);
        assert!(report.reconnect_attempted);
        assert_eq!(link.reconnects, 1);

        // Not due again until another full interval has passed.
        let report = monitor.tick(
            RECONNECT_MS + 1,
            &mut sensor,
            &mut panel,
            &mut sink,
            &mut link,
        );
        assert!(!report.reconnect_attempted);

        let report = monitor.tick(
            2 * RECONNECT_MS,
            &mut sensor,
            &mut panel,
            &mut sink,
            &mut link,
        );
        assert!(report.reconnect_attempted);
        assert_eq!(link.reconnects, 2);
    }

    #[test]
    fn reconnect_never_fires_while_connected() {
        let mut monitor = test_monitor();
        let mut sensor = ScriptedSensor::ok(22.0, 45.0);
        let mut panel = RecordingPanel::default();
        let mut sink = RecordingSink::default();
        let mut link = FixedLink::up();

        for step in 1..=20 {
            monitor.tick(
                step * RECONNECT_MS,
                &mut sensor,
                &mut panel,
                &mut sink,
                &mut link,
            );
        }

        assert_eq!(link.reconnects, 0);
    }

    #[test]
    fn due_activities_fire_on_the_first_tick_at_or_after_deadline() {
        let mut monitor = test_monitor();
        let mut sensor = ScriptedSensor::ok(22.0, 45.0);
        let mut panel = RecordingPanel::default();
        let mut sink = RecordingSink::default();
        let mut link = FixedLink::up();

        // Ticks arrive late; the deadline at 60s is honored on the 61s tick.
        monitor.tick(59_000, &mut sensor, &mut panel, &mut sink, &mut link);
        assert_eq!(sensor.calls, 0);

        let report = monitor.tick(61_000, &mut sensor, &mut panel, &mut sink, &mut link);
        assert!(matches!(report.sensed, Some(Ok(_))));
        assert_eq!(sensor.calls, 1);
    }
}
