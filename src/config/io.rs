use std::env::current_exe;
use std::path::{Path, PathBuf};
use std::str;
use directories_next::ProjectDirs;
use tokio::fs;
use log::info;

use crate::config::types::HubConfig;
use crate::error::ConfigError;

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("com", "syncsense", "sensor-hub")
}

// creates a path to <exe>.json in the same directory as the executable
// this could be useful for usb sticks
fn get_portable_config_path() -> Option<PathBuf> {
    match current_exe() {
        Ok(mut path) => {
            // F:\sensor-hub.exe => F:\sensor-hub.json
            if !path.set_extension("json") {
                eprintln!("current exe has no filename: {}", path.to_string_lossy());
                return None
            }

            Some(path)
        },
        Err(err) => {
            eprintln!("failed to get current exe path: {:?}", err);
            None
        },
    }
}

// creates a path to sensor-hub.json in an os dependent standard directory, such as %AppData% on
// windows.
fn get_local_config_path() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.config_dir().join("sensor-hub.json"))
}

fn get_config_path() -> Result<PathBuf, ConfigError> {
    if let Some(path) = get_portable_config_path() {
        if let Ok(attr) = std::fs::metadata(&path) {
            if attr.is_file() {
                return Ok(path);
            }
        }
    }

    get_local_config_path().ok_or(ConfigError::NoConfigPath)
}

pub fn default_log_directory() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.data_dir().join("logs"))
}

#[derive(Debug, Clone)]
pub struct ConfigIO {
    path: PathBuf,
}

impl ConfigIO {
    pub fn new(path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let path = match path {
            Some(path) => path,
            None => get_config_path()?,
        };

        Ok(ConfigIO { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn read(&self) -> Result<HubConfig, ConfigError> {
        let content = match fs::read(&self.path).await {
            Ok(content) => content,
            Err(err) => {
                let err = ConfigError::from(err);
                if err.is_file_not_found_error() {
                    info!("No config file at {}; Using defaults", self.path.to_string_lossy());
                    return Ok(HubConfig::default());
                }
                return Err(err);
            },
        };

        if content.iter().all(|b| b.is_ascii_whitespace()) {
            return Ok(HubConfig::default());
        }

        let content = str::from_utf8(&content)?;
        Ok(serde_json::from_str(content)?)
    }

    pub async fn save(&self, config: &HubConfig) -> Result<(), ConfigError> {
        info!("Saving config to {}", self.path.to_string_lossy());

        if let Some(directory) = self.path.parent() {
            fs::create_dir_all(directory).await?;
        }

        let content = serde_json::to_string_pretty(config)?;
        fs::write(&self.path, content.as_bytes()).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use crate::device::decode::BatteryDecoding;

    #[tokio::test]
    async fn missing_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let io = ConfigIO::new(Some(dir.path().join("absent.json"))).unwrap();
        assert_eq!(io.read().await.unwrap(), HubConfig::default());
    }

    #[tokio::test]
    async fn save_then_read() {
        let dir = TempDir::new().unwrap();
        let io = ConfigIO::new(Some(dir.path().join("nested").join("sensor-hub.json"))).unwrap();

        let config = HubConfig {
            write_to_file: true,
            battery_decoding: BatteryDecoding::RawByte,
            ..HubConfig::default()
        };
        io.save(&config).await.unwrap();

        assert_eq!(io.read().await.unwrap(), config);
    }

    #[tokio::test]
    async fn invalid_json_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{ nope").unwrap();

        let io = ConfigIO::new(Some(path)).unwrap();
        assert!(matches!(io.read().await, Err(ConfigError::JsonError { .. })));
    }
}
