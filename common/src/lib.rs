pub mod config;
pub mod metrics;
pub mod monitor;
pub mod types;
pub mod wire;

pub use config::{MonitorConfig, NetworkConfig, RuntimeConfig};
pub use monitor::{
    ConnectivityLink, MeasurementSource, Monitor, RenderTarget, TelemetrySink, TickReport,
};
pub use types::{ComfortLabel, Reading, SendOutcome, SensorFault, Snapshot};
