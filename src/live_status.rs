use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::AcsResult;
use crate::estimator::{CycleStatus, Estimate};
use crate::mode::AcsMode;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct LiveStatus {
    pub timestamp: f64,
    pub uptime_seconds: u64,
    pub cycles: u64,
    // Cycle outcomes
    pub priming_cycles: u64,
    pub success_cycles: u64,
    pub fault_cycles: u64,
    pub last_status: CycleStatus,
    // Mode flags
    pub mode: AcsMode,
    pub night: bool,
    pub first_detumble: bool,
    // Latest estimates
    pub omega: [f32; 3],
    pub omega_magnitude: f32,
    pub sun_vector: [f32; 3],
    // Telemetry
    pub telemetry_client_connected: bool,
}

impl LiveStatus {
    pub fn new() -> Self {
        Self {
            timestamp: current_timestamp(),
            uptime_seconds: 0,
            cycles: 0,
            priming_cycles: 0,
            success_cycles: 0,
            fault_cycles: 0,
            last_status: CycleStatus::Priming,
            mode: AcsMode::Detumble,
            night: false,
            first_detumble: true,
            omega: [0.0; 3],
            omega_magnitude: 0.0,
            sun_vector: [0.0; 3],
            telemetry_client_connected: false,
        }
    }

    pub fn update(&mut self, estimate: &Estimate, uptime_seconds: u64) {
        let stats = &estimate.stats;
        self.timestamp = current_timestamp();
        self.uptime_seconds = uptime_seconds;
        self.cycles = estimate.cycle;
        self.priming_cycles = stats.priming;
        self.success_cycles = stats.success;
        self.fault_cycles = stats.fault;
        self.last_status = estimate.status;
        self.mode = estimate.mode;
        self.night = estimate.night;
        self.first_detumble = estimate.first_detumble;
        self.omega = estimate.omega.into();
        self.omega_magnitude = estimate.omega.norm();
        self.sun_vector = estimate.sun.into();
    }

    pub fn save(&self, path: impl AsRef<Path>) -> AcsResult<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
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
