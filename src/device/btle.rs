use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use btleplug::api::{Central, CentralEvent, CentralState, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use futures::StreamExt;
use futures::channel::mpsc::UnboundedSender;
use log::{debug, info, warn};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::device::backend::{BackendEvent, RadioBackend};
use crate::device::types::{
    CharacteristicDescriptor, ConnectionState, ConnectionStateChange, RawFrame, ScanError, ScanErrorKind,
    ScanResult, ServiceDescriptor, ServicesDiscovered,
};
use crate::error::BackendError;

/** Generic failure status, as reported by GATT stacks for a failed connect or discovery. */
pub const GATT_ERROR: i32 = 133;

/** Service type of a primary GATT service; secondary services are reported as 1. */
const SERVICE_TYPE_PRIMARY: i32 = 0;
const SERVICE_TYPE_SECONDARY: i32 = 1;

#[derive(Clone)]
struct KnownPeripheral {
    peripheral: Peripheral,
    name: Option<String>,
}

struct Link {
    id: PeripheralId,
    cancel: CancellationToken,
}

#[derive(Default)]
struct ScanState {
    scanning: bool,
    // bumped on every start, so that a timer of an older scan does not stop a newer one
    generation: u64,
}

struct Shared {
    adapter: Adapter,
    events: UnboundedSender<BackendEvent>,
    // last reported adapter power state, an unknown state counts as powered
    powered: AtomicBool,
    scan: Mutex<ScanState>,
    peripherals: Mutex<HashMap<String, KnownPeripheral>>,
    links: Mutex<HashMap<String, Link>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Shared {
    fn emit(&self, event: BackendEvent) {
        if self.events.unbounded_send(event).is_err() {
            debug!("Dropping backend event, nobody is listening");
        }
    }

    fn emit_state(&self, address: &str, name: Option<String>, new_state: ConnectionState, status: i32) {
        self.emit(BackendEvent::ConnectionStateChange(ConnectionStateChange {
            status,
            new_state,
            device_name: name,
            device_address: address.to_string(),
        }));
    }

    fn known(&self, address: &str) -> Option<KnownPeripheral> {
        lock(&self.peripherals).get(address).cloned()
    }

    fn set_adapter_state(&self, state: &CentralState) {
        let powered = scan_error_for_state(state).is_none();
        if self.powered.swap(powered, Ordering::SeqCst) != powered {
            info!("Adapter state changed to {:?}", state);
        }
        if !powered {
            lock(&self.scan).scanning = false;
        }
    }

    fn is_scanning(&self) -> bool {
        lock(&self.scan).scanning
    }

    fn address_of_link(&self, id: &PeripheralId) -> Option<String> {
        lock(&self.links)
            .iter()
            .find(|(_, link)| &link.id == id)
            .map(|(address, _)| address.clone())
    }

    async fn on_discovered(&self, id: &PeripheralId) {
        if !self.is_scanning() {
            return;
        }

        let peripheral = match self.adapter.peripheral(id).await {
            Ok(peripheral) => peripheral,
            Err(err) => {
                debug!("Discovered peripheral vanished: {}", err);
                return;
            },
        };

        let properties = match peripheral.properties().await {
            Ok(Some(properties)) => properties,
            Ok(None) => return,
            Err(err) => {
                warn!("Could not query peripheral for properties: {:?}", err);
                return;
            },
        };

        let address = properties.address.to_string();
        let name = properties.local_name;
        lock(&self.peripherals).insert(address.clone(), KnownPeripheral { peripheral, name: name.clone() });

        self.emit(BackendEvent::ScanResult(ScanResult {
            name,
            address,
            rssi: properties.rssi.map(i32::from).unwrap_or(0),
        }));
    }

    fn on_disconnected(&self, id: &PeripheralId) {
        // links removed by an explicit disconnect have already been reported
        let Some(address) = self.address_of_link(id) else {
            return;
        };

        if let Some(link) = lock(&self.links).remove(&address) {
            link.cancel.cancel();
        }

        let name = self.known(&address).and_then(|known| known.name);
        self.emit_state(&address, name, ConnectionState::Disconnected, GATT_ERROR);
    }
}

fn scan_error_of(err: &btleplug::Error) -> ScanErrorKind {
    match err {
        btleplug::Error::PermissionDenied => ScanErrorKind::MissingScanPermission,
        _ => ScanErrorKind::InternalError,
    }
}

fn scan_error_for_state(state: &CentralState) -> Option<ScanErrorKind> {
    match state {
        CentralState::PoweredOff => Some(ScanErrorKind::BluetoothDisabled),
        _ => None,
    }
}

fn parse_uuid(value: &str) -> Option<Uuid> {
    match Uuid::parse_str(value) {
        Ok(uuid) => Some(uuid),
        Err(err) => {
            warn!("Invalid uuid {:?}: {}", value, err);
            None
        },
    }
}

fn find_characteristic(peripheral: &Peripheral, service_uuid: &str, characteristic_uuid: &str) -> Option<Characteristic> {
    let service_uuid = parse_uuid(service_uuid)?;
    let characteristic_uuid = parse_uuid(characteristic_uuid)?;

    peripheral
        .services()
        .into_iter()
        .filter(|service| service.uuid == service_uuid)
        .flat_map(|service| service.characteristics.into_iter())
        .find(|characteristic| characteristic.uuid == characteristic_uuid)
}

fn describe_services(peripheral: &Peripheral) -> Vec<ServiceDescriptor> {
    peripheral
        .services()
        .into_iter()
        .enumerate()
        .map(|(index, service)| ServiceDescriptor {
            uuid: service.uuid.to_string(),
            service_type: if service.primary { SERVICE_TYPE_PRIMARY } else { SERVICE_TYPE_SECONDARY },
            instance_id: i32::try_from(index).unwrap_or(i32::MAX),
            characteristics: service.characteristics
                .iter()
                .map(|c| CharacteristicDescriptor { uuid: c.uuid.to_string() })
                .collect(),
        })
        .collect()
}

fn central_events_task(shared: Arc<Shared>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut central_events = match shared.adapter.events().await {
            Ok(events) => events,
            Err(err) => {
                warn!("Failed to listen to adapter events: {}", err);
                return;
            },
        };

        while let Some(event) = central_events.next().await {
            match event {
                CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => {
                    shared.on_discovered(&id).await;
                },
                CentralEvent::DeviceDisconnected(id) => shared.on_disconnected(&id),
                CentralEvent::StateUpdate(state) => shared.set_adapter_state(&state),
                _ => {},
            }
        }

        info!("Adapter event stream ended");
    })
}

fn read_notifications_task(
    cancel: CancellationToken,
    shared: Arc<Shared>,
    peripheral: Peripheral,
    address: String,
    name: Option<String>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut notification_stream = match peripheral.notifications().await {
            Ok(stream) => stream,
            Err(err) => {
                warn!("Failed to read notifications of {}: {}", address, err);
                return;
            },
        };

        'mainloop: loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    break 'mainloop;
                },
                data = notification_stream.next() => match data {
                    Some(data) => shared.emit(BackendEvent::DataReceived(RawFrame {
                        device_address: address.clone(),
                        device_name: name.clone(),
                        characteristic_uuid: data.uuid.to_string(),
                        payload: data.value,
                    })),
                    None => break 'mainloop,
                },
            }
        }

        debug!("Stopped reading notifications of {}", address);
    })
}

pub struct BtleBackend {
    _manager: Manager,
    runtime: Handle,
    shared: Arc<Shared>,
}

impl BtleBackend {
    pub async fn new(events: UnboundedSender<BackendEvent>) -> Result<Self, BackendError> {
        let manager = Manager::new().await?;
        let adapter = manager.adapters().await?.into_iter().next().ok_or(BackendError::Unavailable)?;
        info!("Using adapter {}", adapter.adapter_info().await.unwrap_or("UNKNOWN".to_string()));

        let state = adapter.adapter_state().await.unwrap_or(CentralState::Unknown);
        debug!("Adapter state is {:?}", state);

        let shared = Arc::new(Shared {
            adapter,
            events,
            powered: AtomicBool::new(scan_error_for_state(&state).is_none()),
            scan: Mutex::new(ScanState::default()),
            peripherals: Mutex::new(HashMap::new()),
            links: Mutex::new(HashMap::new()),
        });

        central_events_task(shared.clone());

        Ok(BtleBackend { _manager: manager, runtime: Handle::current(), shared })
    }

    fn spawn<F>(&self, future: F)
        where F: std::future::Future<Output = ()> + Send + 'static
    {
        self.runtime.spawn(future);
    }

    fn linked_peripheral(&self, address: &str) -> Option<KnownPeripheral> {
        if !lock(&self.shared.links).contains_key(address) {
            return None;
        }
        self.shared.known(address)
    }
}

impl RadioBackend for BtleBackend {
    // desktop stacks have no runtime permission prompt, a denial surfaces as a scan error
    fn has_permissions(&self) -> bool {
        true
    }

    fn is_bluetooth_enabled(&self) -> bool {
        self.shared.powered.load(Ordering::SeqCst)
    }

    fn request_bluetooth_enable(&self) {
        info!("Enabling bluetooth is not supported on this platform");
    }

    fn request_permissions(&self) {
        info!("Requesting bluetooth permissions is not supported on this platform");
    }

    fn start_scan(&self, duration: Option<Duration>) {
        if !self.is_bluetooth_enabled() {
            warn!("Not scanning, the adapter is powered off");
            self.shared.emit(BackendEvent::ScanError(ScanError::new(ScanErrorKind::BluetoothDisabled)));
            return;
        }

        let generation = {
            let mut scan = lock(&self.shared.scan);
            if scan.scanning {
                drop(scan);
                self.shared.emit(BackendEvent::ScanError(ScanError::new(ScanErrorKind::AlreadyStarted)));
                return;
            }
            scan.scanning = true;
            scan.generation += 1;
            scan.generation
        };

        let shared = self.shared.clone();
        self.spawn(async move {
            if let Err(err) = shared.adapter.start_scan(ScanFilter::default()).await {
                warn!("Scanning failed {:?}", err);
                lock(&shared.scan).scanning = false;
                shared.emit(BackendEvent::ScanError(ScanError::new(scan_error_of(&err))));
                return;
            }

            let Some(duration) = duration else {
                return;
            };

            sleep(duration).await;

            {
                let mut scan = lock(&shared.scan);
                if !scan.scanning || scan.generation != generation {
                    return;
                }
                scan.scanning = false;
            }

            info!("Scan duration elapsed");
            if let Err(err) = shared.adapter.stop_scan().await {
                warn!("Failed to stop scan: {:?}", err);
            }
        });
    }

    fn stop_scan(&self) {
        lock(&self.shared.scan).scanning = false;

        let shared = self.shared.clone();
        self.spawn(async move {
            if let Err(err) = shared.adapter.stop_scan().await {
                warn!("Failed to stop scan: {:?}", err);
            }
        });
    }

    fn connect_to_device(&self, address: &str) -> bool {
        let Some(known) = self.shared.known(address) else {
            warn!("Device {} has not been seen in a scan", address);
            return false;
        };

        let cancel = CancellationToken::new();
        {
            let mut links = lock(&self.shared.links);
            if links.contains_key(address) {
                warn!("Device {} is already connected", address);
                return false;
            }
            links.insert(address.to_string(), Link { id: known.peripheral.id(), cancel: cancel.clone() });
        }

        self.shared.emit_state(address, known.name.clone(), ConnectionState::Connecting, 0);

        let shared = self.shared.clone();
        let address = address.to_string();
        self.spawn(async move {
            info!("Connecting to peripheral {}...", address);

            match known.peripheral.connect().await {
                Ok(()) => {
                    shared.emit_state(&address, known.name.clone(), ConnectionState::Connected, 0);
                    read_notifications_task(cancel, shared.clone(), known.peripheral, address, known.name);
                },
                Err(err) => {
                    warn!("Connecting to peripheral {} failed: {:?}", address, err);
                    lock(&shared.links).remove(&address);
                    shared.emit_state(&address, known.name, ConnectionState::Disconnected, GATT_ERROR);
                },
            }
        });

        true
    }

    fn disconnect_from_device(&self, address: &str) -> bool {
        let Some(link) = lock(&self.shared.links).remove(address) else {
            return false;
        };
        link.cancel.cancel();

        let known = self.shared.known(address);
        let name = known.as_ref().and_then(|known| known.name.clone());
        self.shared.emit_state(address, name.clone(), ConnectionState::Disconnecting, 0);

        let shared = self.shared.clone();
        let address = address.to_string();
        self.spawn(async move {
            let status = match known {
                Some(known) => match known.peripheral.disconnect().await {
                    Ok(()) => 0,
                    Err(err) => {
                        warn!("Disconnecting from {} failed: {:?}", address, err);
                        GATT_ERROR
                    },
                },
                None => 0,
            };

            shared.emit_state(&address, name, ConnectionState::Disconnected, status);
        });

        true
    }

    fn discover_services_for_device(&self, address: &str) -> bool {
        let Some(known) = self.linked_peripheral(address) else {
            return false;
        };

        let shared = self.shared.clone();
        let address = address.to_string();
        self.spawn(async move {
            let (status, services) = match known.peripheral.discover_services().await {
                Ok(()) => (0, describe_services(&known.peripheral)),
                Err(err) => {
                    warn!("Discovering services of {} failed: {:?}", address, err);
                    (GATT_ERROR, vec![])
                },
            };

            shared.emit(BackendEvent::ServicesDiscovered(ServicesDiscovered {
                status,
                device_name: known.name,
                device_address: address,
                services,
            }));
        });

        true
    }

    fn subscribe_to_characteristic(&self, address: &str, service_uuid: &str, characteristic_uuid: &str) -> bool {
        let Some(known) = self.linked_peripheral(address) else {
            return false;
        };
        let Some(characteristic) = find_characteristic(&known.peripheral, service_uuid, characteristic_uuid) else {
            warn!("Device {} has no characteristic {} in service {}", address, characteristic_uuid, service_uuid);
            return false;
        };

        let address = address.to_string();
        self.spawn(async move {
            info!("Subscribing to characteristic {} of {}", characteristic.uuid, address);
            if let Err(err) = known.peripheral.subscribe(&characteristic).await {
                warn!("Subscribing to {} of {} failed: {:?}", characteristic.uuid, address, err);
            }
        });

        true
    }

    fn unsubscribe_to_characteristic(&self, address: &str, service_uuid: &str, characteristic_uuid: &str) -> bool {
        let Some(known) = self.linked_peripheral(address) else {
            return false;
        };
        let Some(characteristic) = find_characteristic(&known.peripheral, service_uuid, characteristic_uuid) else {
            return false;
        };

        let address = address.to_string();
        self.spawn(async move {
            if let Err(err) = known.peripheral.unsubscribe(&characteristic).await {
                warn!("Unsubscribing from {} of {} failed: {:?}", characteristic.uuid, address, err);
            }
        });

        true
    }

    fn write_characteristic_no_response(
        &self,
        address: &str,
        service_uuid: &str,
        characteristic_uuid: &str,
        data: &[u8],
    ) -> bool {
        let Some(known) = self.linked_peripheral(address) else {
            return false;
        };
        let Some(characteristic) = find_characteristic(&known.peripheral, service_uuid, characteristic_uuid) else {
            warn!("Device {} has no characteristic {} in service {}", address, characteristic_uuid, service_uuid);
            return false;
        };

        let data = data.to_vec();
        let address = address.to_string();
        self.spawn(async move {
            if let Err(err) = known.peripheral.write(&characteristic, &data, WriteType::WithoutResponse).await {
                warn!("Failed to write to {} of {}: {:?}", characteristic.uuid, address, err);
            }
        });

        true
    }
}
