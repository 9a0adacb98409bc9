// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

const RECORDING_FILENAME_FORMAT: &str = "xclock_timestamps_%Y-%m-%d_%H-%M-%S.csv";

/// Tunables of a device session.
///
/// Every field has a default, so a settings file only needs to list what it
/// changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    pub scan_rate_hz: u32,
    /// Defaults to half a second worth of scans.
    pub scans_per_read: Option<u32>,
    /// How long to wait for the first processed batch before giving up.
    pub ready_timeout_ms: u64,
    /// Bound on joining the acquisition thread when stopping.
    pub join_timeout_ms: u64,
    /// Pause between the last pulse and disabling the outputs.
    pub settle_delay_ms: u64,
    pub trigger_poll_interval_us: u64,
    /// Defaults to `<home>/Documents/XClock`.
    pub output_directory: Option<PathBuf>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        SessionSettings {
            scan_rate_hz: 1000,
            scans_per_read: None,
            ready_timeout_ms: 5000,
            join_timeout_ms: 2000,
            settle_delay_ms: 10,
            trigger_poll_interval_us: 1000,
            output_directory: None,
        }
    }
}

impl SessionSettings {
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let settings: SessionSettings = serde_json::from_str(&content).map_err(|err| {
            Error::new(format!(
                "Failed to parse session settings '{}': {err}",
                path.display()
            ))
        })?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.scan_rate_hz == 0 {
            return Err(Error::InvalidParameter(
                "scan_rate_hz must be positive".to_string(),
            ));
        }
        if self.scans_per_read == Some(0) {
            return Err(Error::InvalidParameter(
                "scans_per_read must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn scans_per_read(&self) -> u32 {
        self.scans_per_read
            .unwrap_or((self.scan_rate_hz / 2).max(1))
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn trigger_poll_interval(&self) -> Duration {
        Duration::from_micros(self.trigger_poll_interval_us)
    }

    pub fn output_directory(&self) -> PathBuf {
        self.output_directory.clone().unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("Documents")
                .join("XClock")
        })
    }

    /// Timestamped file in the output directory, which is created if missing.
    pub fn default_recording_path(&self) -> Result<PathBuf> {
        let directory = self.output_directory();
        std::fs::create_dir_all(&directory)?;
        Ok(directory.join(recording_filename(Local::now())))
    }
}

pub fn recording_filename(time: DateTime<Local>) -> String {
    time.format(RECORDING_FILENAME_FORMAT).to_string()
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn test_defaults() {
        let settings = SessionSettings::default();
        assert_eq!(settings.scans_per_read(), 500);
        assert_eq!(settings.join_timeout(), Duration::from_secs(2));
        assert_eq!(settings.trigger_poll_interval(), Duration::from_millis(1));
        assert!(settings.output_directory().ends_with("Documents/XClock"));
        settings.validate().unwrap();
    }

    #[test]
    fn test_partial_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"scan_rate_hz": 2000, "settle_delay_ms": 25}"#).unwrap();
        let settings = SessionSettings::from_json_file(&path).unwrap();
        assert_eq!(settings.scan_rate_hz, 2000);
        assert_eq!(settings.scans_per_read(), 1000);
        assert_eq!(settings.settle_delay(), Duration::from_millis(25));
        assert_eq!(settings.ready_timeout_ms, 5000);
    }

    #[test]
    fn test_invalid_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"scan_rate_hz": 0}"#).unwrap();
        assert!(matches!(
            SessionSettings::from_json_file(&path),
            Err(Error::InvalidParameter(_))
        ));
        std::fs::write(&path, "{not json").unwrap();
        assert!(SessionSettings::from_json_file(&path).is_err());
        assert!(SessionSettings::from_json_file(&dir.path().join("missing.json")).is_err());
    }

    #[test]
    fn test_recording_path() {
        let time = Local.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
        assert_eq!(
            recording_filename(time),
            "xclock_timestamps_2024-03-09_14-05-07.csv"
        );

        let dir = tempfile::tempdir().unwrap();
        let settings = SessionSettings {
            output_directory: Some(dir.path().join("nested").join("out")),
            ..Default::default()
        };
        let path = settings.default_recording_path().unwrap();
        assert!(path.parent().unwrap().is_dir());
        assert!(path.extension().is_some_and(|ext| ext == "csv"));
    }
}
