use std::path::PathBuf;
use std::time::Duration;
use serde::{Deserialize, Serialize};

use crate::device::constants::DEFAULT_LOG_BUFFER_LINES;
use crate::device::decode::BatteryDecoding;

fn default_log_buffer_lines() -> usize {
    DEFAULT_LOG_BUFFER_LINES
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HubConfig {
    pub log_directory: Option<PathBuf>,
    pub write_to_file: bool,
    #[serde(default = "default_log_buffer_lines")]
    pub log_buffer_lines: usize,
    pub battery_decoding: BatteryDecoding,
    pub scan_duration_ms: Option<u64>,
    pub debug: bool,
}

impl HubConfig {
    pub fn scan_duration(&self) -> Option<Duration> {
        self.scan_duration_ms.map(Duration::from_millis)
    }

    pub fn log_level(&self) -> log::LevelFilter {
        if self.debug { log::LevelFilter::Debug } else { log::LevelFilter::Info }
    }
}

impl Default for HubConfig {
    fn default() -> Self {
        HubConfig {
            log_directory: None,
            write_to_file: false,
            log_buffer_lines: DEFAULT_LOG_BUFFER_LINES,
            battery_decoding: BatteryDecoding::default(),
            scan_duration_ms: None,
            debug: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_uses_defaults() {
        let config: HubConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, HubConfig::default());
        assert_eq!(config.log_buffer_lines, 128);
        assert_eq!(config.battery_decoding, BatteryDecoding::HexAsDecimal);
    }

    #[test]
    fn parses_camel_case_fields() {
        let config: HubConfig = serde_json::from_str(r#"{
            "logDirectory": "/tmp/logs",
            "writeToFile": true,
            "logBufferLines": 16,
            "batteryDecoding": "rawByte",
            "scanDurationMs": 5000,
            "debug": true
        }"#).unwrap();

        assert_eq!(config.log_directory, Some(PathBuf::from("/tmp/logs")));
        assert!(config.write_to_file);
        assert_eq!(config.log_buffer_lines, 16);
        assert_eq!(config.battery_decoding, BatteryDecoding::RawByte);
        assert_eq!(config.scan_duration(), Some(Duration::from_secs(5)));
        assert_eq!(config.log_level(), log::LevelFilter::Debug);
    }
}
