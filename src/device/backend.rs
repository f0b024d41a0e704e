use std::time::Duration;

use crate::device::types::{ConnectionStateChange, RawFrame, ScanError, ScanResult, ServicesDiscovered};

#[derive(Debug, Clone, PartialEq)]
pub enum BackendEvent {
    ScanResult(ScanResult),
    ScanError(ScanError),
    ConnectionStateChange(ConnectionStateChange),
    ServicesDiscovered(ServicesDiscovered),
    DataReceived(RawFrame),
}

// false means the backend rejected the attempt. Real outcomes arrive later as BackendEvents.
pub trait RadioBackend: Send + Sync {
    fn has_permissions(&self) -> bool;

    fn is_bluetooth_enabled(&self) -> bool;

    fn request_bluetooth_enable(&self);

    fn request_permissions(&self);

    fn start_scan(&self, duration: Option<Duration>);

    fn stop_scan(&self);

    fn connect_to_device(&self, address: &str) -> bool;

    fn disconnect_from_device(&self, address: &str) -> bool;

    fn discover_services_for_device(&self, address: &str) -> bool;

    fn subscribe_to_characteristic(&self, address: &str, service_uuid: &str, characteristic_uuid: &str) -> bool;

    fn unsubscribe_to_characteristic(&self, address: &str, service_uuid: &str, characteristic_uuid: &str) -> bool;

    fn write_characteristic_no_response(
        &self,
        address: &str,
        service_uuid: &str,
        characteristic_uuid: &str,
        data: &[u8],
    ) -> bool;
}
