use indexmap::{IndexMap, IndexSet};
use log::debug;

use crate::device::types::{ConnectionState, ServiceDescriptor};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionKey {
    pub service_uuid: String,
    pub characteristic_uuid: String,
}

impl SubscriptionKey {
    fn new(service_uuid: &str, characteristic_uuid: &str) -> Self {
        // UUIDs compare case-insensitively, so store them normalized
        SubscriptionKey {
            service_uuid: service_uuid.to_ascii_lowercase(),
            characteristic_uuid: characteristic_uuid.to_ascii_lowercase(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DeviceSession {
    pub state: ConnectionState,
    pub name: Option<String>,
    pub services: Vec<ServiceDescriptor>,
    pub subscriptions: IndexSet<SubscriptionKey>,
    // set by an explicit disconnect, so the following Disconnected is not reported as lost
    pub disconnect_requested: bool,
}

#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: IndexMap<String, DeviceSession>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        SessionRegistry::default()
    }

    pub fn upsert_address(&mut self, address: &str) -> &mut DeviceSession {
        if !self.sessions.contains_key(address) {
            debug!("Tracking new device {}", address);
        }
        self.sessions.entry(address.to_string()).or_default()
    }

    pub fn get(&self, address: &str) -> Option<&DeviceSession> {
        self.sessions.get(address)
    }

    pub fn get_mut(&mut self, address: &str) -> Option<&mut DeviceSession> {
        self.sessions.get_mut(address)
    }

    pub fn get_state(&self, address: &str) -> ConnectionState {
        self.sessions.get(address).map(|s| s.state).unwrap_or_default()
    }

    // closing states drop every subscription, cached services are kept
    pub fn set_state(&mut self, address: &str, new_state: ConnectionState) -> ConnectionState {
        let session = self.upsert_address(address);
        let previous = session.state;
        session.state = new_state;

        if new_state.is_closing() && !session.subscriptions.is_empty() {
            debug!("Clearing {} subscriptions of {}", session.subscriptions.len(), address);
            session.subscriptions.clear();
        }

        // a settled link ends any pending user disconnect
        if matches!(new_state, ConnectionState::Disconnected | ConnectionState::Connected) {
            session.disconnect_requested = false;
        }

        previous
    }

    pub fn set_services(&mut self, address: &str, services: Vec<ServiceDescriptor>) {
        self.upsert_address(address).services = services;
    }

    pub fn services(&self, address: &str) -> &[ServiceDescriptor] {
        self.sessions.get(address).map(|s| s.services.as_slice()).unwrap_or(&[])
    }

    pub fn has_service(&self, address: &str, service_uuid: &str) -> bool {
        self.services(address).iter().any(|s| s.uuid.eq_ignore_ascii_case(service_uuid))
    }

    pub fn subscribe(&mut self, address: &str, service_uuid: &str, characteristic_uuid: &str) -> bool {
        match self.sessions.get_mut(address) {
            Some(session) if session.state == ConnectionState::Connected => {
                session.subscriptions.insert(SubscriptionKey::new(service_uuid, characteristic_uuid));
                true
            },
            _ => false,
        }
    }

    pub fn unsubscribe(&mut self, address: &str, service_uuid: &str, characteristic_uuid: &str) -> bool {
        match self.sessions.get_mut(address) {
            Some(session) => session
                .subscriptions
                .shift_remove(&SubscriptionKey::new(service_uuid, characteristic_uuid)),
            None => false,
        }
    }

    pub fn is_subscribed(&self, address: &str, characteristic_uuid: &str) -> bool {
        self.sessions.get(address).map_or(false, |session| {
            session
                .subscriptions
                .iter()
                .any(|key| key.characteristic_uuid.eq_ignore_ascii_case(characteristic_uuid))
        })
    }

    pub fn subscription_count(&self, address: &str) -> usize {
        self.sessions.get(address).map_or(0, |s| s.subscriptions.len())
    }

    pub fn forget(&mut self, address: &str) -> bool {
        self.sessions.shift_remove(address).is_some()
    }

    pub fn clear(&mut self) {
        self.sessions.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::constants::{IMU_CHARACTERISTIC, MOTION_SERVICE, BATTERY_SERVICE, BATTERY_CHARACTERISTIC};
    use crate::device::types::CharacteristicDescriptor;

    const ADDRESS: &str = "AA:BB:CC:DD:EE:FF";

    fn motion_service() -> ServiceDescriptor {
        ServiceDescriptor {
            uuid: MOTION_SERVICE.to_string(),
            service_type: 0,
            instance_id: 0,
            characteristics: vec![CharacteristicDescriptor { uuid: IMU_CHARACTERISTIC.to_string() }],
        }
    }

    fn connected_registry() -> SessionRegistry {
        let mut registry = SessionRegistry::new();
        registry.set_state(ADDRESS, ConnectionState::Connected);
        registry
    }

    #[test]
    fn unknown_address_is_disconnected() {
        let registry = SessionRegistry::new();
        assert_eq!(registry.get_state("11:22:33:44:55:66"), ConnectionState::Disconnected);
        assert!(!registry.is_subscribed("11:22:33:44:55:66", IMU_CHARACTERISTIC));
    }

    #[test]
    fn subscribe_requires_connected_state() {
        let mut registry = SessionRegistry::new();
        assert!(!registry.subscribe(ADDRESS, MOTION_SERVICE, IMU_CHARACTERISTIC));

        registry.set_state(ADDRESS, ConnectionState::Connecting);
        assert!(!registry.subscribe(ADDRESS, MOTION_SERVICE, IMU_CHARACTERISTIC));

        registry.set_state(ADDRESS, ConnectionState::Connected);
        assert!(registry.subscribe(ADDRESS, MOTION_SERVICE, IMU_CHARACTERISTIC));
    }

    #[test]
    fn subscribing_twice_keeps_one_entry() {
        let mut registry = connected_registry();
        assert!(registry.subscribe(ADDRESS, MOTION_SERVICE, IMU_CHARACTERISTIC));
        assert!(registry.subscribe(ADDRESS, &MOTION_SERVICE.to_uppercase(), IMU_CHARACTERISTIC));
        assert_eq!(registry.subscription_count(ADDRESS), 1);
    }

    #[test]
    fn unsubscribe_removes_exactly_one_entry() {
        let mut registry = connected_registry();
        registry.subscribe(ADDRESS, MOTION_SERVICE, IMU_CHARACTERISTIC);
        registry.subscribe(ADDRESS, BATTERY_SERVICE, BATTERY_CHARACTERISTIC);

        assert!(registry.unsubscribe(ADDRESS, MOTION_SERVICE, IMU_CHARACTERISTIC));
        assert!(!registry.unsubscribe(ADDRESS, MOTION_SERVICE, IMU_CHARACTERISTIC));
        assert_eq!(registry.subscription_count(ADDRESS), 1);
        assert!(registry.is_subscribed(ADDRESS, BATTERY_CHARACTERISTIC));
        assert!(!registry.is_subscribed(ADDRESS, IMU_CHARACTERISTIC));
    }

    #[test]
    fn disconnect_clears_subscriptions_but_keeps_services() {
        let mut registry = connected_registry();
        registry.set_services(ADDRESS, vec![motion_service()]);
        registry.subscribe(ADDRESS, MOTION_SERVICE, IMU_CHARACTERISTIC);
        registry.subscribe(ADDRESS, BATTERY_SERVICE, BATTERY_CHARACTERISTIC);

        let previous = registry.set_state(ADDRESS, ConnectionState::Disconnected);

        assert_eq!(previous, ConnectionState::Connected);
        assert_eq!(registry.subscription_count(ADDRESS), 0);
        assert_eq!(registry.services(ADDRESS), &[motion_service()]);
    }

    #[test]
    fn disconnecting_also_clears_subscriptions() {
        let mut registry = connected_registry();
        registry.subscribe(ADDRESS, MOTION_SERVICE, IMU_CHARACTERISTIC);
        registry.set_state(ADDRESS, ConnectionState::Disconnecting);
        assert_eq!(registry.subscription_count(ADDRESS), 0);
    }

    #[test]
    fn settled_states_reset_disconnect_request() {
        let mut registry = connected_registry();
        registry.get_mut(ADDRESS).unwrap().disconnect_requested = true;
        registry.set_state(ADDRESS, ConnectionState::Connected);
        assert!(!registry.get(ADDRESS).unwrap().disconnect_requested);

        registry.get_mut(ADDRESS).unwrap().disconnect_requested = true;
        registry.set_state(ADDRESS, ConnectionState::Disconnecting);
        assert!(registry.get(ADDRESS).unwrap().disconnect_requested);

        registry.set_state(ADDRESS, ConnectionState::Disconnected);
        assert!(!registry.get(ADDRESS).unwrap().disconnect_requested);
    }

    #[test]
    fn services_are_replaced_wholesale() {
        let mut registry = connected_registry();
        registry.set_services(ADDRESS, vec![motion_service()]);
        assert!(registry.has_service(ADDRESS, &MOTION_SERVICE.to_uppercase()));

        registry.set_services(ADDRESS, vec![]);
        assert!(!registry.has_service(ADDRESS, MOTION_SERVICE));
    }

    #[test]
    fn forget_drops_services() {
        let mut registry = connected_registry();
        registry.set_services(ADDRESS, vec![motion_service()]);
        assert!(registry.forget(ADDRESS));
        assert!(registry.services(ADDRESS).is_empty());
        assert!(!registry.forget(ADDRESS));
    }
}
