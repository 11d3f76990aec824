//! Telemetry snapshot types streamed to monitor subscribers.

use serde::Serialize;

/// Placeholder for text probes that failed.
pub const UNKNOWN: &str = "Unknown";

/// One row of the disk usage table. Sizes are in bytes.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiskMount {
    pub filesystem: String,
    pub size: u64,
    pub used: u64,
    pub available: u64,
    /// Used percentage as reported by `df`.
    pub usage: f64,
    pub mount_point: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkInterface {
    pub name: String,
    pub ip_address: String,
    pub mac_address: String,
    /// Operational state, e.g. `"up"`.
    pub status: String,
    pub rx_bytes: u64,
    pub tx_bytes: u64,
}

/// Flat resource snapshot of a remote host.
///
/// Every field has a fallback (`"Unknown"`, `0` or empty) so a snapshot is
/// always complete even when individual probes fail.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceSnapshot {
    pub cpu_usage: f64,
    pub memory_usage: f64,
    pub memory_total: u64,
    pub memory_used: u64,
    pub disk_usage: f64,
    pub disk_total: u64,
    pub disk_used: u64,
    /// Seconds since boot.
    pub uptime: u64,
    pub hostname: String,
    pub ip_address: String,
    pub os_name: String,
    pub os_version: String,
    pub kernel_version: String,
    pub architecture: String,
    pub cpu_model: String,
    pub cpu_cores: u32,
    pub cpu_threads: u32,
    pub cpu_frequency: String,
    pub disk_mounts: Vec<DiskMount>,
    pub network_interfaces: Vec<NetworkInterface>,
    #[serde(rename = "loadAvg1m")]
    pub load_avg_1m: f64,
    #[serde(rename = "loadAvg5m")]
    pub load_avg_5m: f64,
    #[serde(rename = "loadAvg15m")]
    pub load_avg_15m: f64,
    pub total_processes: u32,
    pub running_processes: u32,
    pub swap_total: u64,
    pub swap_used: u64,
    pub swap_usage: f64,
    /// Remote wall clock, `%Y-%m-%d %H:%M:%S`.
    pub system_time: String,
    /// Collection time, RFC 3339.
    pub timestamp: String,
}

impl Default for ResourceSnapshot {
    fn default() -> Self {
        Self {
            cpu_usage: 0.0,
            memory_usage: 0.0,
            memory_total: 0,
            memory_used: 0,
            disk_usage: 0.0,
            disk_total: 0,
            disk_used: 0,
            uptime: 0,
            hostname: UNKNOWN.to_string(),
            ip_address: UNKNOWN.to_string(),
            os_name: UNKNOWN.to_string(),
            os_version: String::new(),
            kernel_version: UNKNOWN.to_string(),
            architecture: UNKNOWN.to_string(),
            cpu_model: UNKNOWN.to_string(),
            cpu_cores: 0,
            cpu_threads: 0,
            cpu_frequency: UNKNOWN.to_string(),
            disk_mounts: Vec::new(),
            network_interfaces: Vec::new(),
            load_avg_1m: 0.0,
            load_avg_5m: 0.0,
            load_avg_15m: 0.0,
            total_processes: 0,
            running_processes: 0,
            swap_total: 0,
            swap_used: 0,
            swap_usage: 0.0,
            system_time: UNKNOWN.to_string(),
            timestamp: String::new(),
        }
    }
}
