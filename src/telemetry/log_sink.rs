use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use chrono::Local;
use fd_lock::RwLock;
use log::{info, warn};

use crate::device::constants::{CSV_HEADER, DEFAULT_LOG_BUFFER_LINES};
use crate::error::LogSinkError;

struct ActiveLog {
    path: PathBuf,
    file: RwLock<File>,
    pending: String,
    pending_lines: usize,
}

impl ActiveLog {
    fn write_through(&mut self) -> Result<(), LogSinkError> {
        if self.pending.is_empty() {
            return Ok(());
        }

        // never wait for the lock, appends happen on the event delivery path
        let mut guard = self.file.try_write().map_err(|source| LogSinkError::CanNotLock { source })?;
        guard.write_all(self.pending.as_bytes())?;
        guard.flush()?;

        self.pending.clear();
        self.pending_lines = 0;
        Ok(())
    }
}

pub struct TelemetryLog {
    directory: Option<PathBuf>,
    buffer_lines: usize,
    active: Option<ActiveLog>,
}

impl TelemetryLog {
    pub fn new(directory: Option<PathBuf>, buffer_lines: usize) -> Self {
        TelemetryLog {
            directory,
            buffer_lines: buffer_lines.max(1),
            active: None,
        }
    }

    pub fn with_directory(directory: impl Into<PathBuf>) -> Self {
        TelemetryLog::new(Some(directory.into()), DEFAULT_LOG_BUFFER_LINES)
    }

    pub fn is_enabled(&self) -> bool {
        self.active.is_some()
    }

    pub fn path(&self) -> Option<&Path> {
        self.active.as_ref().map(|a| a.path.as_path())
    }

    pub fn enable(&mut self) -> Result<bool, LogSinkError> {
        if self.active.is_some() {
            return Ok(false);
        }

        let directory = self.directory.as_ref().ok_or(LogSinkError::NoDirectory)?;
        std::fs::create_dir_all(directory)?;

        let (path, file) = create_log_file(directory)?;
        let mut active = ActiveLog {
            path,
            file: RwLock::new(file),
            pending: String::new(),
            pending_lines: 0,
        };

        active.pending.push_str(CSV_HEADER);
        active.pending.push('\n');
        active.write_through()?;

        info!("Writing telemetry log to {}", active.path.to_string_lossy());
        self.active = Some(active);
        Ok(true)
    }

    pub fn append(&mut self, line: &str) -> Result<(), LogSinkError> {
        let buffer_lines = self.buffer_lines;
        let active = self.active.as_mut().ok_or(LogSinkError::NotEnabled)?;

        active.pending.push_str(line);
        active.pending.push('\n');
        active.pending_lines += 1;

        if active.pending_lines >= buffer_lines {
            active.write_through()?;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), LogSinkError> {
        match self.active.as_mut() {
            Some(active) => active.write_through(),
            None => Ok(()),
        }
    }

    pub fn disable(&mut self) -> Result<bool, LogSinkError> {
        match self.active.take() {
            Some(mut active) => {
                let result = active.write_through();
                info!("Closed telemetry log {}", active.path.to_string_lossy());
                result.map(|_| true)
            },
            None => Ok(false),
        }
    }
}

impl Drop for TelemetryLog {
    fn drop(&mut self) {
        if let Err(err) = self.disable() {
            warn!("Failed to flush telemetry log on shutdown: {}", err);
        }
    }
}

fn create_log_file(directory: &Path) -> Result<(PathBuf, File), LogSinkError> {
    let stem = format!("LOG-{}", Local::now().format("%Y-%m-%d_%H%M%S"));

    // two logs opened within the same second get a numeric suffix
    for attempt in 0..100 {
        let name = match attempt {
            0 => format!("{}.csv", stem),
            n => format!("{}-{}.csv", stem, n),
        };
        let path = directory.join(name);

        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => return Ok((path, file)),
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(err) => return Err(err.into()),
        }
    }

    Err(io::Error::new(io::ErrorKind::AlreadyExists, "too many telemetry logs created within one second").into())
}
