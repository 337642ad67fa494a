use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::machine::MachineId;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Engine-wide tunables, read from the environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// On a rule's very first run, how far back its cursor is initialized.
    pub first_run_days: u64,
    /// Sleep between two analysis ticks.
    pub tick_seconds: u64,
    /// Window width for forward timeline scans.
    pub scan_step_hours: u64,
    /// Maximum slices fetched per timeline query.
    pub page_size: usize,
    /// Maximum machines analyzed in parallel per tick.
    pub max_machine_workers: usize,
    /// Restrict analysis to these machine ids (empty = all machines).
    pub machine_filter: Vec<MachineId>,
}

impl EngineConfig {
    /// Build config from environment variables (call `load_dotenv()` first).
    pub fn from_env() -> Self {
        let machine_filter = env_or("AUTOREASON_MACHINES", "")
            .split([',', ';', ' '])
            .filter_map(|s| s.trim().parse::<i64>().ok())
            .map(MachineId)
            .collect();
        Self {
            first_run_days: env_u64("AUTOREASON_FIRST_RUN_DAYS", 3),
            tick_seconds: env_u64("AUTOREASON_TICK_SECONDS", 2),
            scan_step_hours: env_u64("AUTOREASON_SCAN_STEP_HOURS", 24),
            page_size: env_usize("AUTOREASON_PAGE_SIZE", 100),
            max_machine_workers: env_usize("AUTOREASON_MAX_MACHINE_WORKERS", 4),
            machine_filter,
        }
    }

    pub fn first_run_period(&self) -> chrono::Duration {
        chrono::Duration::days(self.first_run_days as i64)
    }

    pub fn tick(&self) -> Duration {
        Duration::from_secs(self.tick_seconds)
    }

    pub fn scan_step(&self) -> chrono::Duration {
        chrono::Duration::hours(self.scan_step_hours as i64)
    }

    /// Whether a machine passes the configured filter.
    pub fn accepts_machine(&self, machine: MachineId) -> bool {
        self.machine_filter.is_empty() || self.machine_filter.contains(&machine)
    }

    /// Print a summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded:");
        tracing::info!("  first_run_days:      {}", self.first_run_days);
        tracing::info!("  tick_seconds:        {}", self.tick_seconds);
        tracing::info!("  scan_step_hours:     {}", self.scan_step_hours);
        tracing::info!("  page_size:           {}", self.page_size);
        tracing::info!("  max_machine_workers: {}", self.max_machine_workers);
        if self.machine_filter.is_empty() {
            tracing::info!("  machines:            all");
        } else {
            tracing::info!("  machines:            {:?}", self.machine_filter);
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            first_run_days: 3,
            tick_seconds: 2,
            scan_step_hours: 24,
            page_size: 100,
            max_machine_workers: 4,
            machine_filter: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_documented_values() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.first_run_days, 3);
        assert_eq!(cfg.tick(), Duration::from_secs(2));
        assert_eq!(cfg.scan_step(), chrono::Duration::hours(24));
        assert_eq!(cfg.page_size, 100);
        assert!(cfg.accepts_machine(MachineId(42)));
    }

    #[test]
    fn machine_filter_restricts() {
        let cfg = EngineConfig {
            machine_filter: vec![MachineId(1), MachineId(3)],
            ..Default::default()
        };
        assert!(cfg.accepts_machine(MachineId(1)));
        assert!(!cfg.accepts_machine(MachineId(2)));
    }
}
