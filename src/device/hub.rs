use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use chrono::Local;
use futures::{Stream, StreamExt};
use futures::channel::mpsc::UnboundedReceiver;
use log::{debug, info, warn};
use tokio_util::sync::CancellationToken;

use crate::config::types::HubConfig;
use crate::device::backend::{BackendEvent, RadioBackend};
use crate::device::constants::{
    uuid_eq, BATTERY_CHARACTERISTIC, BATTERY_SERVICE, COMMAND_LED_OFF, COMMAND_LED_ON, IMU_CHARACTERISTIC,
    LED_GREEN_CHARACTERISTIC, LED_RED_CHARACTERISTIC, LED_SERVICE, MOTION_SERVICE,
};
use crate::device::decode::{decode_battery_with, decode_imu, BatteryDecoding};
use crate::device::observers::ObserverRegistry;
use crate::device::session::SessionRegistry;
use crate::device::types::{
    BatteryLevel, ConnectionState, ConnectionStateChange, DecodeFailure, EventKind, ImuSample, RawFrame,
    SensorEvent, ServiceDescriptor, ServicesDiscovered,
};
use crate::device::wire::parse_backend_event;
use crate::error::{DecodeError, LogSinkError};
use crate::telemetry::log_sink::TelemetryLog;

/** Status reported with a successful GATT operation. */
pub const GATT_SUCCESS: i32 = 0;

struct HubState {
    registry: SessionRegistry,
    log: TelemetryLog,
    observers: ObserverRegistry,
    battery_decoding: BatteryDecoding,
}

impl HubState {
    fn emit(&mut self, event: SensorEvent) {
        self.observers.dispatch(&event);
    }

    fn report_decode_failure(&mut self, frame: &RawFrame, error: DecodeError) {
        warn!(
            "Dropping frame from {} on {}: {}",
            frame.device_address, frame.characteristic_uuid, error,
        );

        self.emit(SensorEvent::DecodeFailed(DecodeFailure {
            device_address: frame.device_address.clone(),
            characteristic_uuid: frame.characteristic_uuid.clone(),
            error,
        }));
    }

    fn on_connection_state_change(&mut self, change: ConnectionStateChange) {
        let requested = self.registry
            .get(&change.device_address)
            .map_or(false, |session| session.disconnect_requested);
        let previous = self.registry.set_state(&change.device_address, change.new_state);

        if let Some(name) = &change.device_name {
            if let Some(session) = self.registry.get_mut(&change.device_address) {
                session.name = Some(name.clone());
            }
        }

        if change.new_state == ConnectionState::Disconnected && previous != ConnectionState::Disconnected {
            if requested {
                info!("Disconnected from {}", change.device_address);
            } else {
                warn!("Connection lost to {} (status {})", change.device_address, change.status);
            }
        } else {
            info!("Device {} is now {} (status {})", change.device_address, change.new_state, change.status);
        }

        self.emit(SensorEvent::ConnectionStateChanged(change));
    }

    fn on_services_discovered(&mut self, discovered: ServicesDiscovered) {
        if discovered.status == GATT_SUCCESS {
            debug!("Discovered {} services on {}", discovered.services.len(), discovered.device_address);
            self.registry.set_services(&discovered.device_address, discovered.services.clone());
        } else {
            warn!(
                "Service discovery on {} failed with status {}; Keeping cached services",
                discovered.device_address, discovered.status,
            );
        }

        self.emit(SensorEvent::ServicesDiscovered(discovered));
    }

    fn on_data_received(&mut self, frame: RawFrame) {
        self.emit(SensorEvent::RawDataReceived(frame.clone()));

        if uuid_eq(&frame.characteristic_uuid, IMU_CHARACTERISTIC) {
            match decode_imu(&frame.payload) {
                Ok(reading) => {
                    let sample = ImuSample {
                        device_address: frame.device_address,
                        device_name: frame.device_name,
                        timestamp: Local::now(),
                        reading,
                    };
                    let line = self.log.is_enabled().then(|| sample.to_csv_line());

                    self.emit(SensorEvent::ImuSample(sample));

                    if let Some(line) = line {
                        if let Err(err) = self.log.append(&line) {
                            warn!("Failed to append to telemetry log: {}", err);
                        }
                    }
                },
                Err(err) => self.report_decode_failure(&frame, err),
            }
        } else if uuid_eq(&frame.characteristic_uuid, BATTERY_CHARACTERISTIC) {
            match decode_battery_with(&frame.payload, self.battery_decoding) {
                Ok(level) => self.emit(SensorEvent::BatteryLevel(BatteryLevel {
                    device_address: frame.device_address,
                    device_name: frame.device_name,
                    level,
                })),
                Err(err) => self.report_decode_failure(&frame, err),
            }
        }
    }
}

pub struct SensorHub {
    backend: Box<dyn RadioBackend>,
    // held for the whole processing of one event, never while calling the backend
    state: Mutex<HubState>,
}

impl SensorHub {
    pub fn new(backend: Box<dyn RadioBackend>, config: &HubConfig) -> Result<Self, LogSinkError> {
        let mut log = TelemetryLog::new(config.log_directory.clone(), config.log_buffer_lines);
        if config.write_to_file {
            log.enable()?;
        }

        let state = HubState {
            registry: SessionRegistry::new(),
            log,
            observers: ObserverRegistry::new(),
            battery_decoding: config.battery_decoding,
        };

        Ok(SensorHub { backend, state: Mutex::new(state) })
    }

    fn state(&self) -> MutexGuard<'_, HubState> {
        // the state stays consistent between statements, so a panicking observer is no reason to stop
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn observe(&self, kinds: &[EventKind]) -> UnboundedReceiver<SensorEvent> {
        self.state().observers.register(kinds)
    }

    pub fn observe_all(&self) -> UnboundedReceiver<SensorEvent> {
        self.observe(&EventKind::ALL)
    }

    pub fn handle_event(&self, event: BackendEvent) {
        let mut state = self.state();

        match event {
            BackendEvent::ScanResult(result) => {
                debug!("Scan result {} {:?} rssi {}", result.address, result.name, result.rssi);
                state.emit(SensorEvent::ScanResult(result));
            },
            BackendEvent::ScanError(error) => {
                warn!("Scan failed with code {} ({:?})", error.error_code, error.kind());
                state.emit(SensorEvent::ScanError(error));
            },
            BackendEvent::ConnectionStateChange(change) => state.on_connection_state_change(change),
            BackendEvent::ServicesDiscovered(discovered) => state.on_services_discovered(discovered),
            BackendEvent::DataReceived(frame) => state.on_data_received(frame),
        }
    }

    pub fn handle_wire_event(&self, kind: &str, json: &str) -> bool {
        match parse_backend_event(kind, json) {
            Ok(event) => {
                self.handle_event(event);
                true
            },
            Err(err) => {
                warn!("Rejecting malformed {} event: {}", kind, err);
                false
            },
        }
    }

    pub async fn run<S>(&self, cancel: CancellationToken, mut events: S)
        where S: Stream<Item = BackendEvent> + Unpin
    {
        'mainloop: loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    break 'mainloop;
                },
                event = events.next() => match event {
                    Some(event) => self.handle_event(event),
                    None => {
                        info!("Backend event stream ended");
                        break 'mainloop;
                    },
                },
            }
        }
    }

    pub fn has_permissions(&self) -> bool {
        self.backend.has_permissions()
    }

    pub fn is_bluetooth_enabled(&self) -> bool {
        self.backend.is_bluetooth_enabled()
    }

    pub fn request_bluetooth_enable(&self) {
        self.backend.request_bluetooth_enable()
    }

    pub fn request_permissions(&self) {
        self.backend.request_permissions()
    }

    pub fn start_scan(&self, duration: Option<Duration>) {
        info!("Starting scan ({:?})", duration);
        self.backend.start_scan(duration)
    }

    pub fn stop_scan(&self) {
        info!("Stopping scan");
        self.backend.stop_scan()
    }

    pub fn connect(&self, address: &str) -> bool {
        let accepted = self.backend.connect_to_device(address);
        if accepted {
            self.state().registry.upsert_address(address);
        } else {
            warn!("Connect to {} was rejected", address);
        }
        accepted
    }

    pub fn disconnect(&self, address: &str) -> bool {
        // flag first, the Disconnected event may arrive before the backend call returns
        let previous = self.set_disconnect_requested(address, true);

        let accepted = self.backend.disconnect_from_device(address);
        if !accepted {
            warn!("Disconnect from {} was rejected", address);
            self.set_disconnect_requested(address, previous);
        }
        accepted
    }

    fn set_disconnect_requested(&self, address: &str, requested: bool) -> bool {
        let mut state = self.state();
        match state.registry.get_mut(address) {
            Some(session) => std::mem::replace(&mut session.disconnect_requested, requested),
            None => false,
        }
    }

    pub fn discover_services(&self, address: &str) -> bool {
        let accepted = self.backend.discover_services_for_device(address);
        if !accepted {
            warn!("Service discovery on {} was rejected", address);
        }
        accepted
    }

    pub fn subscribe(&self, address: &str, service_uuid: &str, characteristic_uuid: &str) -> bool {
        if !self.backend.subscribe_to_characteristic(address, service_uuid, characteristic_uuid) {
            warn!("Subscribe to {} on {} was rejected", characteristic_uuid, address);
            return false;
        }

        let mut state = self.state();
        if !state.registry.subscribe(address, service_uuid, characteristic_uuid) {
            warn!(
                "Subscribed to {} on {} while the device is {}",
                characteristic_uuid, address, state.registry.get_state(address),
            );
        }
        true
    }

    pub fn unsubscribe(&self, address: &str, service_uuid: &str, characteristic_uuid: &str) -> bool {
        if !self.backend.unsubscribe_to_characteristic(address, service_uuid, characteristic_uuid) {
            warn!("Unsubscribe from {} on {} was rejected", characteristic_uuid, address);
            return false;
        }

        self.state().registry.unsubscribe(address, service_uuid, characteristic_uuid);
        true
    }

    pub fn write_characteristic(&self, address: &str, service_uuid: &str, characteristic_uuid: &str, data: &[u8]) -> bool {
        let accepted = self.backend.write_characteristic_no_response(address, service_uuid, characteristic_uuid, data);
        if !accepted {
            warn!("Write to {} on {} was rejected", characteristic_uuid, address);
        }
        accepted
    }

    pub fn subscribe_to_imu(&self, address: &str) -> bool {
        self.subscribe(address, MOTION_SERVICE, IMU_CHARACTERISTIC)
    }

    pub fn unsubscribe_from_imu(&self, address: &str) -> bool {
        self.unsubscribe(address, MOTION_SERVICE, IMU_CHARACTERISTIC)
    }

    pub fn subscribe_to_battery(&self, address: &str) -> bool {
        self.subscribe(address, BATTERY_SERVICE, BATTERY_CHARACTERISTIC)
    }

    pub fn unsubscribe_from_battery(&self, address: &str) -> bool {
        self.unsubscribe(address, BATTERY_SERVICE, BATTERY_CHARACTERISTIC)
    }

    pub fn set_red_led(&self, address: &str, on: bool) -> bool {
        let command = if on { COMMAND_LED_ON } else { COMMAND_LED_OFF };
        self.write_characteristic(address, LED_SERVICE, LED_RED_CHARACTERISTIC, &command)
    }

    pub fn set_green_led(&self, address: &str, on: bool) -> bool {
        let command = if on { COMMAND_LED_ON } else { COMMAND_LED_OFF };
        self.write_characteristic(address, LED_SERVICE, LED_GREEN_CHARACTERISTIC, &command)
    }

    pub fn connection_state(&self, address: &str) -> ConnectionState {
        self.state().registry.get_state(address)
    }

    pub fn services(&self, address: &str) -> Vec<ServiceDescriptor> {
        self.state().registry.services(address).to_vec()
    }

    pub fn has_service(&self, address: &str, service_uuid: &str) -> bool {
        self.state().registry.has_service(address, service_uuid)
    }

    pub fn is_subscribed(&self, address: &str, characteristic_uuid: &str) -> bool {
        self.state().registry.is_subscribed(address, characteristic_uuid)
    }

    pub fn subscription_count(&self, address: &str) -> usize {
        self.state().registry.subscription_count(address)
    }

    pub fn device_name(&self, address: &str) -> Option<String> {
        self.state().registry.get(address).and_then(|session| session.name.clone())
    }

    pub fn enable_write_to_file(&self, enabled: bool) -> Result<(), LogSinkError> {
        let mut state = self.state();
        if enabled {
            state.log.enable()?;
        } else {
            state.log.disable()?;
        }
        Ok(())
    }

    pub fn is_write_to_file_enabled(&self) -> bool {
        self.state().log.is_enabled()
    }

    pub fn flush_log(&self) -> Result<(), LogSinkError> {
        self.state().log.flush()
    }

    pub fn shutdown(&self) {
        let mut state = self.state();

        if let Err(err) = state.log.disable() {
            warn!("Failed to flush telemetry log: {}", err);
        }
        state.registry.clear();
        state.observers.clear();

        info!("Sensor hub shut down");
    }
}
