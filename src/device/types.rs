use chrono::{DateTime, Local};

use crate::error::DecodeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

impl ConnectionState {
    pub fn from_code(code: i32) -> Option<ConnectionState> {
        match code {
            0 => Some(ConnectionState::Disconnected),
            1 => Some(ConnectionState::Connecting),
            2 => Some(ConnectionState::Connected),
            3 => Some(ConnectionState::Disconnecting),
            _ => None,
        }
    }

    pub fn code(&self) -> i32 {
        match self {
            ConnectionState::Disconnected => 0,
            ConnectionState::Connecting => 1,
            ConnectionState::Connected => 2,
            ConnectionState::Disconnecting => 3,
        }
    }

    pub fn is_closing(&self) -> bool {
        matches!(self, ConnectionState::Disconnected | ConnectionState::Disconnecting)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let result = match self {
            ConnectionState::Disconnected => "Disconnected",
            ConnectionState::Connecting => "Connecting",
            ConnectionState::Connected => "Connected",
            ConnectionState::Disconnecting => "Disconnecting",
        };

        write!(f, "{}", result)
    }
}

// positive codes come from the platform scanner, negative ones are raised before a scan is attempted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanErrorKind {
    AlreadyStarted,
    AppRegistrationFailed,
    InternalError,
    FeatureUnsupported,
    OutOfHardwareResources,
    TooFrequent,
    MissingLocationPermission,
    MissingScanPermission,
    BluetoothDisabled,
}

impl ScanErrorKind {
    pub fn from_code(code: i32) -> Option<ScanErrorKind> {
        match code {
            1 => Some(ScanErrorKind::AlreadyStarted),
            2 => Some(ScanErrorKind::AppRegistrationFailed),
            3 => Some(ScanErrorKind::InternalError),
            4 => Some(ScanErrorKind::FeatureUnsupported),
            5 => Some(ScanErrorKind::OutOfHardwareResources),
            6 => Some(ScanErrorKind::TooFrequent),
            -3 => Some(ScanErrorKind::MissingLocationPermission),
            -4 => Some(ScanErrorKind::MissingScanPermission),
            -5 => Some(ScanErrorKind::BluetoothDisabled),
            _ => None,
        }
    }

    pub fn code(&self) -> i32 {
        match self {
            ScanErrorKind::AlreadyStarted => 1,
            ScanErrorKind::AppRegistrationFailed => 2,
            ScanErrorKind::InternalError => 3,
            ScanErrorKind::FeatureUnsupported => 4,
            ScanErrorKind::OutOfHardwareResources => 5,
            ScanErrorKind::TooFrequent => 6,
            ScanErrorKind::MissingLocationPermission => -3,
            ScanErrorKind::MissingScanPermission => -4,
            ScanErrorKind::BluetoothDisabled => -5,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScanResult {
    pub name: Option<String>,
    pub address: String,
    pub rssi: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanError {
    pub error_code: i32,
}

impl ScanError {
    pub fn new(kind: ScanErrorKind) -> Self {
        ScanError { error_code: kind.code() }
    }

    pub fn kind(&self) -> Option<ScanErrorKind> {
        ScanErrorKind::from_code(self.error_code)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionStateChange {
    pub status: i32,
    pub new_state: ConnectionState,
    pub device_name: Option<String>,
    pub device_address: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacteristicDescriptor {
    pub uuid: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDescriptor {
    pub uuid: String,
    pub service_type: i32,
    pub instance_id: i32,
    pub characteristics: Vec<CharacteristicDescriptor>,
}

impl ServiceDescriptor {
    pub fn has_characteristic(&self, characteristic_uuid: &str) -> bool {
        self.characteristics.iter().any(|c| c.uuid.eq_ignore_ascii_case(characteristic_uuid))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServicesDiscovered {
    pub status: i32,
    pub device_name: Option<String>,
    pub device_address: String,
    pub services: Vec<ServiceDescriptor>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    pub device_address: String,
    pub device_name: Option<String>,
    pub characteristic_uuid: String,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImuReading {
    pub sequence_index: u8,
    pub acc_x: f32,
    pub acc_y: f32,
    pub acc_z: f32,
    pub gyro_x: f32,
    pub gyro_y: f32,
    pub gyro_z: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImuSample {
    pub device_address: String,
    pub device_name: Option<String>,
    pub timestamp: DateTime<Local>,
    pub reading: ImuReading,
}

impl ImuSample {
    pub fn to_csv_line(&self) -> String {
        let r = &self.reading;
        format!(
            "{},{},{},{},{},{},{},{},{}",
            self.device_address,
            self.timestamp.format("%H:%M:%S%.3f"),
            r.sequence_index,
            r.acc_x,
            r.acc_y,
            r.acc_z,
            r.gyro_x,
            r.gyro_y,
            r.gyro_z,
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatteryLevel {
    pub device_address: String,
    pub device_name: Option<String>,
    pub level: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DecodeFailure {
    pub device_address: String,
    pub characteristic_uuid: String,
    pub error: DecodeError,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SensorEvent {
    ScanResult(ScanResult),
    ScanError(ScanError),
    ConnectionStateChanged(ConnectionStateChange),
    ServicesDiscovered(ServicesDiscovered),
    RawDataReceived(RawFrame),
    ImuSample(ImuSample),
    BatteryLevel(BatteryLevel),
    DecodeFailed(DecodeFailure),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    ScanResult,
    ScanError,
    ConnectionStateChanged,
    ServicesDiscovered,
    RawDataReceived,
    ImuSample,
    BatteryLevel,
    DecodeFailed,
}

impl EventKind {
    pub const ALL: [EventKind; 8] = [
        EventKind::ScanResult,
        EventKind::ScanError,
        EventKind::ConnectionStateChanged,
        EventKind::ServicesDiscovered,
        EventKind::RawDataReceived,
        EventKind::ImuSample,
        EventKind::BatteryLevel,
        EventKind::DecodeFailed,
    ];
}

impl SensorEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            SensorEvent::ScanResult(_) => EventKind::ScanResult,
            SensorEvent::ScanError(_) => EventKind::ScanError,
            SensorEvent::ConnectionStateChanged(_) => EventKind::ConnectionStateChanged,
            SensorEvent::ServicesDiscovered(_) => EventKind::ServicesDiscovered,
            SensorEvent::RawDataReceived(_) => EventKind::RawDataReceived,
            SensorEvent::ImuSample(_) => EventKind::ImuSample,
            SensorEvent::BatteryLevel(_) => EventKind::BatteryLevel,
            SensorEvent::DecodeFailed(_) => EventKind::DecodeFailed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn connection_state_codes() {
        for code in 0..4 {
            let state = ConnectionState::from_code(code).unwrap();
            assert_eq!(state.code(), code);
        }
        assert_eq!(ConnectionState::from_code(4), None);
        assert_eq!(ConnectionState::from_code(-1), None);
    }

    #[test]
    fn scan_error_table() {
        assert_eq!(ScanError { error_code: 6 }.kind(), Some(ScanErrorKind::TooFrequent));
        assert_eq!(ScanError { error_code: -5 }.kind(), Some(ScanErrorKind::BluetoothDisabled));
        assert_eq!(ScanError { error_code: 0 }.kind(), None);
        assert_eq!(ScanError::new(ScanErrorKind::MissingScanPermission).error_code, -4);
    }

    #[test]
    fn imu_sample_csv_line() {
        let sample = ImuSample {
            device_address: "AA:BB:CC:DD:EE:FF".to_string(),
            device_name: None,
            timestamp: Local.with_ymd_and_hms(2024, 3, 1, 13, 5, 9).unwrap()
                + chrono::Duration::milliseconds(42),
            reading: ImuReading {
                sequence_index: 7,
                acc_x: 1.0,
                acc_y: 2.5,
                acc_z: -3.0,
                gyro_x: 0.125,
                gyro_y: 0.0,
                gyro_z: -1.0,
            },
        };

        assert_eq!(sample.to_csv_line(), "AA:BB:CC:DD:EE:FF,13:05:09.042,7,1,2.5,-3,0.125,0,-1");
    }
}
