//! Component health tracking
//!
//! Each server keeps a per-component health map. Status updates always
//! advance the last-update timestamp; a component that stops reporting is
//! visible through its stale timestamp rather than a missing entry.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Health of one component, worst first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Critical,
    Warning,
    Ok,
    Unknown,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Critical => write!(f, "critical"),
            HealthStatus::Warning => write!(f, "warning"),
            HealthStatus::Ok => write!(f, "ok"),
            HealthStatus::Unknown => write!(f, "unknown"),
        }
    }
}

/// A recorded status with its last-update time.
#[derive(Debug, Clone, Serialize)]
pub struct ComponentHealth {
    pub status: HealthStatus,
    pub updated_at: DateTime<Utc>,
}

/// Thread-safe per-component health map.
#[derive(Debug, Clone, Default)]
pub struct HealthMonitor {
    components: Arc<RwLock<HashMap<String, ComponentHealth>>>,
}

impl HealthMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a status for `component`; the timestamp only moves forward.
    pub fn set(&self, component: &str, status: HealthStatus) {
        let now = Utc::now();
        let mut components = self.components.write().unwrap();
        let entry = components
            .entry(component.to_string())
            .or_insert(ComponentHealth {
                status,
                updated_at: now,
            });
        entry.status = status;
        if now > entry.updated_at {
            entry.updated_at = now;
        }
    }

    pub fn get(&self, component: &str) -> HealthStatus {
        self.components
            .read()
            .unwrap()
            .get(component)
            .map(|c| c.status)
            .unwrap_or(HealthStatus::Unknown)
    }

    /// Remove a component's record entirely.
    pub fn remove(&self, component: &str) {
        self.components.write().unwrap().remove(component);
    }

    /// A point-in-time copy of every component's health.
    pub fn snapshot(&self) -> HashMap<String, ComponentHealth> {
        self.components.read().unwrap().clone()
    }

    /// The worst status across all components; `Unknown` when empty.
    pub fn overall(&self) -> HealthStatus {
        self.components
            .read()
            .unwrap()
            .values()
            .map(|c| c.status)
            .min()
            .unwrap_or(HealthStatus::Unknown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_until_reported() {
        let monitor = HealthMonitor::new();
        assert_eq!(monitor.get("director"), HealthStatus::Unknown);
    }

    #[test]
    fn test_set_and_overall() {
        let monitor = HealthMonitor::new();
        monitor.set("director", HealthStatus::Ok);
        monitor.set("registry", HealthStatus::Ok);
        assert_eq!(monitor.overall(), HealthStatus::Ok);

        monitor.set("registry", HealthStatus::Critical);
        assert_eq!(monitor.overall(), HealthStatus::Critical);
        assert_eq!(monitor.get("director"), HealthStatus::Ok);
    }

    #[test]
    fn test_timestamp_advances() {
        let monitor = HealthMonitor::new();
        monitor.set("director", HealthStatus::Ok);
        let first = monitor.snapshot()["director"].updated_at;

        monitor.set("director", HealthStatus::Critical);
        let second = monitor.snapshot()["director"].updated_at;
        assert!(second >= first);
    }
}
