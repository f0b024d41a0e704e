use std::str::FromStr;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Deserialize;

use crate::device::backend::BackendEvent;
use crate::device::types::{
    CharacteristicDescriptor, ConnectionState, ConnectionStateChange, RawFrame, ScanError, ScanResult,
    ServiceDescriptor, ServicesDiscovered,
};
use crate::error::WireError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireEventKind {
    ScanResult,
    ScanError,
    ConnectionStateChange,
    ServicesDiscovered,
    DataReceived,
}

impl FromStr for WireEventKind {
    type Err = WireError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "OnScanResult" => Ok(WireEventKind::ScanResult),
            "OnScanError" => Ok(WireEventKind::ScanError),
            "OnDeviceConnectionStateChange" => Ok(WireEventKind::ConnectionStateChange),
            "OnServicesDiscovered" => Ok(WireEventKind::ServicesDiscovered),
            "OnDataReceived" => Ok(WireEventKind::DataReceived),
            other => Err(WireError::UnknownEventKind(other.to_string())),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ScanResultJson {
    rssi: i32,
    name: Option<String>,
    address: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ScanErrorJson {
    error_code: i32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConnectionStateChangeJson {
    status: i32,
    new_state: i32,
    device_name: Option<String>,
    device_address: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CharacteristicItemJson {
    characteristic_uuid: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServiceItemJson {
    service_uuid: String,
    #[serde(rename = "type")]
    service_type: i32,
    instance_id: i32,
    #[serde(default)]
    characteristics: Vec<CharacteristicItemJson>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServicesDiscoveredJson {
    status: i32,
    device_name: Option<String>,
    device_address: String,
    #[serde(default)]
    services: Vec<ServiceItemJson>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DataReceivedJson {
    device_address: String,
    device_name: Option<String>,
    characteristic_uuid: String,
    data_base64: String,
}

fn decode_base64(encoded: &str) -> Result<Vec<u8>, WireError> {
    let compact: String = encoded.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    Ok(STANDARD.decode(compact)?)
}

pub fn parse_backend_event(kind: &str, json: &str) -> Result<BackendEvent, WireError> {
    parse_backend_event_of(kind.parse()?, json)
}

pub fn parse_backend_event_of(kind: WireEventKind, json: &str) -> Result<BackendEvent, WireError> {
    let event = match kind {
        WireEventKind::ScanResult => {
            let raw: ScanResultJson = serde_json::from_str(json)?;
            BackendEvent::ScanResult(ScanResult { name: raw.name, address: raw.address, rssi: raw.rssi })
        },
        WireEventKind::ScanError => {
            let raw: ScanErrorJson = serde_json::from_str(json)?;
            BackendEvent::ScanError(ScanError { error_code: raw.error_code })
        },
        WireEventKind::ConnectionStateChange => {
            let raw: ConnectionStateChangeJson = serde_json::from_str(json)?;
            let new_state = ConnectionState::from_code(raw.new_state)
                .ok_or(WireError::InvalidConnectionState(raw.new_state))?;

            BackendEvent::ConnectionStateChange(ConnectionStateChange {
                status: raw.status,
                new_state,
                device_name: raw.device_name,
                device_address: raw.device_address,
            })
        },
        WireEventKind::ServicesDiscovered => {
            let raw: ServicesDiscoveredJson = serde_json::from_str(json)?;
            let services = raw.services
                .into_iter()
                .map(|service| ServiceDescriptor {
                    uuid: service.service_uuid,
                    service_type: service.service_type,
                    instance_id: service.instance_id,
                    characteristics: service.characteristics
                        .into_iter()
                        .map(|c| CharacteristicDescriptor { uuid: c.characteristic_uuid })
                        .collect(),
                })
                .collect();

            BackendEvent::ServicesDiscovered(ServicesDiscovered {
                status: raw.status,
                device_name: raw.device_name,
                device_address: raw.device_address,
                services,
            })
        },
        WireEventKind::DataReceived => {
            let raw: DataReceivedJson = serde_json::from_str(json)?;
            BackendEvent::DataReceived(RawFrame {
                payload: decode_base64(&raw.data_base64)?,
                device_address: raw.device_address,
                device_name: raw.device_name,
                characteristic_uuid: raw.characteristic_uuid,
            })
        },
    };

    Ok(event)
}
