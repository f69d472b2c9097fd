use std::{
    cell::RefCell,
    sync::OnceLock,
    thread,
    time::{Duration, Instant},
};

use anyhow::{anyhow, Context};
use core::fmt::Write as _;
use embedded_hal::i2c::I2c;
use embedded_hal_bus::i2c::RefCellDevice;
use embedded_svc::{
    http::{client::Client as HttpClient, Method, Status},
    io::Write,
    wifi::{AuthMethod, ClientConfiguration, Configuration},
};
use esp_idf_hal::{
    delay::FreeRtos,
    i2c::{I2cConfig, I2cDriver},
    prelude::*,
};
use esp_idf_svc::{
    eventloop::EspSystemEventLoop,
    hal::modem::Modem,
    http::client::{Configuration as HttpClientConfiguration, EspHttpConnection},
    log::EspLogger,
    wifi::{BlockingWifi, EspWifi},
};
use log::{debug, info, warn};
use ssd1306::{mode::TerminalMode, prelude::*, I2CDisplayInterface, Ssd1306};

use roomsense_common::{
    ConnectivityLink, MeasurementSource, Monitor, Reading, RenderTarget, RuntimeConfig,
    SendOutcome, SensorFault, Snapshot, TelemetrySink, TickReport,
};

const SHT3X_ADDR: u8 = 0x44;
const SHT3X_CMD_SOFT_RESET: [u8; 2] = [0x30, 0xA2];
const SHT3X_CMD_MEASURE_HIGH_REP: [u8; 2] = [0x24, 0x00];
// High-repeatability conversion takes up to 15ms; pad a little so the read
// never lands mid-conversion.
const SHT3X_MEASURE_DELAY_MS: u32 = 20;

const HTTP_TIMEOUT_SEC: u64 = 10;
const TICK_SLEEP_MS: u64 = 250;

type SharedI2c<'a> = RefCellDevice<'a, I2cDriver<'a>>;

/// SHT3x in single-shot mode, clock stretching disabled. The sensor shares
/// the I2C bus with the display.
struct Sht3x<'a> {
    i2c: SharedI2c<'a>,
}

impl<'a> Sht3x<'a> {
    fn new(mut i2c: SharedI2c<'a>) -> anyhow::Result<Self> {
        i2c.write(SHT3X_ADDR, &SHT3X_CMD_SOFT_RESET)
            .map_err(|err| anyhow!("sht3x soft reset failed: {err:?}"))?;
        FreeRtos::delay_ms(2);
        Ok(Self { i2c })
    }
}

impl MeasurementSource for Sht3x<'_> {
    fn measure(&mut self) -> Result<Reading, SensorFault> {
        self.i2c
            .write(SHT3X_ADDR, &SHT3X_CMD_MEASURE_HIGH_REP)
            .map_err(|_| SensorFault::NotReady)?;

        FreeRtos::delay_ms(SHT3X_MEASURE_DELAY_MS);

        let mut frame = [0_u8; 6];
        self.i2c
            .read(SHT3X_ADDR, &mut frame)
            .map_err(|_| SensorFault::Bus)?;

        if crc8(&frame[0..2]) != frame[2] || crc8(&frame[3..5]) != frame[5] {
            return Err(SensorFault::Crc);
        }

        let raw_temp = u16::from_be_bytes([frame[0], frame[1]]) as f32;
        let raw_hum = u16::from_be_bytes([frame[3], frame[4]]) as f32;

        Ok(Reading {
            temperature_c: -45.0 + 175.0 * raw_temp / 65535.0,
            humidity: 100.0 * raw_hum / 65535.0,
        })
    }
}

// CRC-8 from the SHT3x datasheet: polynomial 0x31, init 0xFF.
fn crc8(data: &[u8]) -> u8 {
    let mut crc = 0xFF_u8;
    for &byte in data {
        crc ^= byte;
        for _ in 0..8 {
            crc = if crc & 0x80 != 0 {
                (crc << 1) ^ 0x31
            } else {
                crc << 1
            };
        }
    }
    crc
}

/// 128x32 SSD1306 in terminal mode: four rows of sixteen characters.
struct OledPanel<'a> {
    display: Ssd1306<I2CInterface<SharedI2c<'a>>, DisplaySize128x32, TerminalMode>,
}

impl<'a> OledPanel<'a> {
    fn new(i2c: SharedI2c<'a>) -> anyhow::Result<Self> {
        let interface = I2CDisplayInterface::new(i2c);
        let mut display = Ssd1306::new(interface, DisplaySize128x32, DisplayRotation::Rotate0)
            .into_terminal_mode();

        display
            .init()
            .map_err(|err| anyhow!("display init failed: {err:?}"))?;
        display
            .clear()
            .map_err(|err| anyhow!("display clear failed: {err:?}"))?;
        let _ = display.write_str("Starting...");

        Ok(Self { display })
    }

    fn paint(&mut self, snapshot: &Snapshot) -> core::fmt::Result {
        self.display.clear().map_err(|_| core::fmt::Error)?;
        write!(
            self.display,
            "T:{:<5.1} H:{:.0}%\nD:{:<5.1} I:{:.1}\n[{}]",
            snapshot.temperature_c,
            snapshot.humidity,
            snapshot.dew_point_c,
            snapshot.heat_index_c,
            snapshot.comfort.as_str()
        )
    }
}

impl RenderTarget for OledPanel<'_> {
    fn render(&mut self, snapshot: &Snapshot) {
        if let Err(err) = self.paint(snapshot) {
            warn!("display update failed: {err:?}");
        }
    }

    fn render_error(&mut self) {
        if self.display.clear().is_ok() {
            let _ = self.display.write_str("Sensor Error");
        }
    }
}

/// POSTs one line-protocol payload per send to the configured write endpoint.
struct InfluxSink {
    url: String,
}

impl InfluxSink {
    fn post(&self, payload: &str) -> anyhow::Result<u16> {
        let http_conf = HttpClientConfiguration {
            timeout: Some(Duration::from_secs(HTTP_TIMEOUT_SEC)),
            ..Default::default()
        };
        let mut client = HttpClient::wrap(EspHttpConnection::new(&http_conf)?);

        let headers = [("Content-Type", "text/plain")];
        let mut request = client.request(Method::Post, &self.url, &headers)?;
        request.write_all(payload.as_bytes())?;

        let response = request.submit().map_err(|e| anyhow!("{e:?}"))?;
        Ok(response.status())
    }
}

impl TelemetrySink for InfluxSink {
    fn send(&mut self, connected: bool, payload: &str) -> SendOutcome {
        if !connected {
            return SendOutcome::Skipped;
        }

        match self.post(payload) {
            Ok(status) => SendOutcome::Sent(status),
            Err(err) => SendOutcome::TransportError(format!("{err:#}")),
        }
    }
}

struct WifiLink {
    wifi: EspWifi<'static>,
}

impl ConnectivityLink for WifiLink {
    fn is_connected(&self) -> bool {
        is_wifi_station_connected()
    }

    fn reconnect(&mut self) {
        // Fire-and-forget: connect() only queues the attempt, the driver
        // resolves it in the background.
        info!("wifi down, issuing reconnect");
        let _ = self.wifi.disconnect();
        if let Err(err) = self.wifi.connect() {
            warn!("wifi reconnect request failed: {err:?}");
        }
    }
}

pub fn run() -> anyhow::Result<()> {
    esp_idf_svc::sys::link_patches();
    EspLogger::initialize_default();

    let mut runtime = RuntimeConfig::default();
    apply_build_overrides(&mut runtime);

    let sys_loop = EspSystemEventLoop::take()?;
    let peripherals = Peripherals::take()?;

    let i2c_conf = I2cConfig::new().baudrate(100.kHz().into());
    let i2c = I2cDriver::new(
        peripherals.i2c0,
        peripherals.pins.gpio21,
        peripherals.pins.gpio22,
        &i2c_conf,
    )
    .context("failed to initialize i2c bus")?;
    let bus = RefCell::new(i2c);

    // A node that cannot show or sample anything is better off restarting,
    // so both inits are fatal.
    let mut panel = OledPanel::new(RefCellDevice::new(&bus))
        .context("failed to initialize display")?;
    let mut sensor =
        Sht3x::new(RefCellDevice::new(&bus)).context("failed to initialize sht3x sensor")?;

    let wifi = connect_wifi(peripherals.modem, sys_loop, &runtime)
        .context("wifi startup failed")?;
    let mut link = WifiLink { wifi };
    let mut sink = InfluxSink {
        url: runtime.network.influx_url.clone(),
    };
    let mut monitor = Monitor::new(runtime.monitor);

    info!(
        "monitor started (sense {}ms, send {}ms, reconnect {}ms, host tag `{}`)",
        monitor.config().sense_interval_ms,
        monitor.config().send_interval_ms,
        monitor.config().reconnect_interval_ms,
        monitor.config().host_tag
    );

    loop {
        let report = monitor.tick(
            monotonic_ms(),
            &mut sensor,
            &mut panel,
            &mut sink,
            &mut link,
        );
        log_report(&report);
        thread::sleep(Duration::from_millis(TICK_SLEEP_MS));
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
        Some(SendOutcome::Sent(status)) => debug!("telemetry line sent (HTTP {status})"),
        Some(SendOutcome::Skipped) => info!("telemetry skipped while disconnected"),
        Some(SendOutcome::TransportError(reason)) => warn!("telemetry send failed: {reason}"),
        None => {}
    }
}

/// Build-time credentials. The node has no provisioning surface; values are
/// baked into the image at compile time.
fn apply_build_overrides(runtime: &mut RuntimeConfig) {
    if let Some(ssid) = option_env!("WIFI_SSID") {
        runtime.network.wifi_ssid = ssid.to_string();
    }
    if let Some(pass) = option_env!("WIFI_PASS") {
        runtime.network.wifi_pass = pass.to_string();
    }
    if let Some(url) = option_env!("INFLUX_URL") {
        runtime.network.influx_url = url.to_string();
    }
    if let Some(tag) = option_env!("HOST_TAG") {
        runtime.monitor.host_tag = tag.to_string();
    }
}

fn connect_wifi(
    modem: Modem,
    sys_loop: EspSystemEventLoop,
    runtime: &RuntimeConfig,
) -> anyhow::Result<EspWifi<'static>> {
    let mut esp_wifi = EspWifi::new(modem, sys_loop.clone(), None)?;
    let mut wifi = BlockingWifi::wrap(&mut esp_wifi, sys_loop)?;

    let auth_method = if runtime.network.wifi_pass.is_empty() {
        AuthMethod::None
    } else {
        AuthMethod::WPAWPA2Personal
    };

    wifi.set_configuration(&Configuration::Client(ClientConfiguration {
        ssid: runtime
            .network
            .wifi_ssid
            .as_str()
            .try_into()
            .map_err(|_| anyhow!("wifi ssid too long"))?,
        password: runtime
            .network
            .wifi_pass
            .as_str()
            .try_into()
            .map_err(|_| anyhow!("wifi password too long"))?,
        auth_method,
        ..Default::default()
    }))?;

    wifi.start()?;
    info!("wifi started, connecting to `{}`", runtime.network.wifi_ssid);

    // One bounded attempt at boot. If it fails the monitor's reconnect
    // activity keeps retrying on its own cadence.
    match wifi.connect() {
        Ok(()) => match wifi.wait_netif_up() {
            Ok(()) => info!("wifi connected and netif up"),
            Err(err) => warn!("wifi netif up failed: {err:#}"),
        },
        Err(err) => warn!("initial wifi connect failed: {err:#}"),
    }

    drop(wifi);
    Ok(esp_wifi)
}

fn is_wifi_station_connected() -> bool {
    let mut ap_info = esp_idf_svc::sys::wifi_ap_record_t::default();
    let rc = unsafe { esp_idf_svc::sys::esp_wifi_sta_get_ap_info(&mut ap_info) };
    rc == esp_idf_svc::sys::ESP_OK
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sht3x_crc_matches_datasheet_example() {
        // The datasheet gives CRC(0xBEEF) = 0x92.
        assert_eq!(crc8(&[0xBE, 0xEF]), 0x92);
    }
}
