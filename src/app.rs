use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use clap::Parser;
use futures::StreamExt;
use futures::channel::mpsc::unbounded;
use log::{debug, info, warn};
use tokio_util::sync::CancellationToken;

use crate::config::io::{default_log_directory, ConfigIO};
use crate::config::types::HubConfig;
use crate::device::btle::BtleBackend;
use crate::device::constants::{BATTERY_SERVICE, LED_SERVICE, MOTION_SERVICE, SENSOR_DEVICE_NAME};
use crate::device::hub::SensorHub;
use crate::device::types::{ConnectionState, EventKind, ScanResult, SensorEvent};
use crate::error::AppRunError;
use crate::init_logging;

#[derive(Parser, Debug, Clone, Default)]
#[command(author, version)]
#[command(about = "Connects to motion sensors over bluetooth and records their IMU data.", long_about = None)]
pub struct Args {
    /// Path to the config file. Defaults to <exe>.json if it exists, otherwise the per-user config directory
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Directory to write CSV telemetry logs to
    #[arg(long)]
    pub log_dir: Option<PathBuf>,

    /// Record IMU samples to a CSV telemetry log
    #[arg(long)]
    pub record: bool,

    /// Stop scanning after this many milliseconds
    #[arg(long)]
    pub scan_ms: Option<u64>,

    /// Address of a device to connect to. May be repeated. Without it every device
    /// advertising as the sensor is connected
    #[arg(long = "device")]
    pub devices: Vec<String>,

    /// Enable debug logging
    #[arg(long)]
    pub debug: bool,
}

impl Args {
    pub fn apply(&self, config: &mut HubConfig) {
        if let Some(log_dir) = &self.log_dir {
            config.log_directory = Some(log_dir.clone());
        }
        if self.record {
            config.write_to_file = true;
        }
        if let Some(scan_ms) = self.scan_ms {
            config.scan_duration_ms = Some(scan_ms);
        }
        if self.debug {
            config.debug = true;
        }
    }

    fn wants(&self, result: &ScanResult) -> bool {
        if self.devices.is_empty() {
            return result.name.as_deref() == Some(SENSOR_DEVICE_NAME);
        }

        self.devices.iter().any(|device| device.eq_ignore_ascii_case(&result.address))
    }
}

const OBSERVED_KINDS: [EventKind; 7] = [
    EventKind::ScanResult,
    EventKind::ScanError,
    EventKind::ConnectionStateChanged,
    EventKind::ServicesDiscovered,
    EventKind::ImuSample,
    EventKind::BatteryLevel,
    EventKind::DecodeFailed,
];

struct Session {
    hub: Arc<SensorHub>,
    args: Args,
    // addresses we asked to connect and that have not disconnected since
    requested: HashSet<String>,
}

impl Session {
    fn on_event(&mut self, event: SensorEvent) {
        match event {
            SensorEvent::ScanResult(result) => {
                if !self.args.wants(&result) || self.requested.contains(&result.address) {
                    return;
                }

                if self.hub.connection_state(&result.address) == ConnectionState::Disconnected
                    && self.hub.connect(&result.address)
                {
                    self.requested.insert(result.address);
                }
            },
            SensorEvent::ConnectionStateChanged(change) => match change.new_state {
                ConnectionState::Connected => {
                    self.hub.discover_services(&change.device_address);
                },
                ConnectionState::Disconnected => {
                    self.requested.remove(&change.device_address);
                },
                _ => {},
            },
            SensorEvent::ServicesDiscovered(discovered) => {
                let address = &discovered.device_address;
                if self.hub.has_service(address, MOTION_SERVICE) {
                    self.hub.subscribe_to_imu(address);
                }
                if self.hub.has_service(address, BATTERY_SERVICE) {
                    self.hub.subscribe_to_battery(address);
                }
                if self.hub.has_service(address, LED_SERVICE) {
                    // signal that the sensor is streaming
                    self.hub.set_green_led(address, true);
                }
            },
            SensorEvent::ImuSample(sample) => {
                debug!("{}", sample.to_csv_line());
            },
            SensorEvent::BatteryLevel(battery) => {
                info!("Battery of {} is at {}", battery.device_address, battery.level);
            },
            SensorEvent::ScanError(_) | SensorEvent::DecodeFailed(_) | SensorEvent::RawDataReceived(_) => {},
        }
    }

    fn disconnect_all(&mut self) {
        for address in self.requested.drain() {
            self.hub.disconnect(&address);
        }
    }
}

pub async fn run_app(args: Args) -> Result<(), AppRunError> {
    let config_io = ConfigIO::new(args.config.clone())?;
    let mut config = config_io.read().await?;
    args.apply(&mut config);
    if config.log_directory.is_none() {
        config.log_directory = default_log_directory();
    }

    if let Err(err) = init_logging(config.log_level()) {
        eprintln!("Failed to initialize logger: {}", err);
    }
    info!(concat!("Sensor Hub ", env!("CARGO_PKG_VERSION")));
    info!("Using config file {}", config_io.path().to_string_lossy());

    let (events_sender, events_receiver) = unbounded();
    let backend = BtleBackend::new(events_sender).await?;
    let hub = Arc::new(SensorHub::new(Box::new(backend), &config)?);
    let mut observer = hub.observe(&OBSERVED_KINDS);

    // this token is cancelled upon exit
    let cancel = CancellationToken::new();
    let pump = tokio::spawn({
        let hub = hub.clone();
        let cancel = cancel.clone();
        async move { hub.run(cancel, events_receiver).await }
    });

    hub.start_scan(config.scan_duration());

    let mut session = Session { hub: hub.clone(), args, requested: HashSet::new() };

    'mainloop: loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if let Err(err) = result {
                    warn!("Failed to listen for ctrl-c: {}", err);
                }
                info!("Interrupted; Shutting down");
                break 'mainloop;
            },
            event = observer.next() => match event {
                Some(event) => session.on_event(event),
                None => break 'mainloop,
            },
        }
    }

    hub.stop_scan();
    session.disconnect_all();

    cancel.cancel();
    if let Err(err) = pump.await {
        warn!("Event loop task failed: {}", err);
    }

    hub.shutdown();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scan_result(name: Option<&str>, address: &str) -> ScanResult {
        ScanResult { name: name.map(str::to_string), address: address.to_string(), rssi: -50 }
    }

    #[test]
    fn flags_override_config() {
        let args = Args::parse_from([
            "sensor-hub", "--record", "--log-dir", "/tmp/x", "--scan-ms", "1500", "--debug",
        ]);
        let mut config = HubConfig::default();
        args.apply(&mut config);

        assert!(config.write_to_file);
        assert!(config.debug);
        assert_eq!(config.log_directory, Some(PathBuf::from("/tmp/x")));
        assert_eq!(config.scan_duration_ms, Some(1500));
    }

    #[test]
    fn absent_flags_keep_config() {
        let args = Args::parse_from(["sensor-hub"]);
        let mut config = HubConfig { write_to_file: true, scan_duration_ms: Some(10), ..HubConfig::default() };
        args.apply(&mut config);

        assert!(config.write_to_file);
        assert_eq!(config.scan_duration_ms, Some(10));
    }

    #[test]
    fn selects_sensor_by_name_by_default() {
        let args = Args::parse_from(["sensor-hub"]);
        assert!(args.wants(&scan_result(Some(SENSOR_DEVICE_NAME), "AA:BB:CC:DD:EE:FF")));
        assert!(!args.wants(&scan_result(Some("Headphones"), "AA:BB:CC:DD:EE:FF")));
        assert!(!args.wants(&scan_result(None, "AA:BB:CC:DD:EE:FF")));
    }

    #[test]
    fn selects_requested_addresses() {
        let args = Args::parse_from(["sensor-hub", "--device", "aa:bb:cc:dd:ee:ff", "--device", "11:22:33:44:55:66"]);
        assert!(args.wants(&scan_result(None, "AA:BB:CC:DD:EE:FF")));
        assert!(!args.wants(&scan_result(Some(SENSOR_DEVICE_NAME), "00:00:00:00:00:01")));
    }
}
