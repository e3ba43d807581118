use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::model::GeoSample;
use crate::reporter::ReporterState;

/// Snapshot of a location reporter activation, written as JSON after every tick.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct LiveStatus {
    pub timestamp: f64,
    pub state: ReporterState,
    pub ticks: u64,
    pub submitted: u64,
    /// Ticks that found no device identifier yet
    pub skipped: u64,
    pub failed: u64,
    pub device_id: Option<String>,
    pub last_latitude: Option<f64>,
    pub last_longitude: Option<f64>,
    pub last_error: Option<String>,
    pub uptime_seconds: u64,
}

impl LiveStatus {
    pub fn new() -> Self {
        Self {
            timestamp: current_timestamp(),
            state: ReporterState::Idle,
            ticks: 0,
            submitted: 0,
            skipped: 0,
            failed: 0,
            device_id: None,
            last_latitude: None,
            last_longitude: None,
            last_error: None,
            uptime_seconds: 0,
        }
    }

    pub(crate) fn record_sample(&mut self, sample: &GeoSample) {
        self.last_latitude = Some(sample.latitude);
        self.last_longitude = Some(sample.longitude);
    }

    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    pub fn load(path: &Path) -> std::io::Result<Self> {
        let json = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }
}

impl Default for LiveStatus {
    fn default() -> Self {
        Self::new()
    }
}

pub fn current_timestamp() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}
