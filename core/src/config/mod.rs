//! Tunables for the pool, the terminal bridge and the resource monitor.
//!
//! All structs deserialize from camelCase JSON and fall back to the
//! defaults below for every missing field, so an empty object `{}` is a
//! valid configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Minimum allowed monitor sampling interval in milliseconds.
pub const MIN_MONITOR_INTERVAL_MS: u64 = 500;

/// Minimum idle sweep period in seconds.
pub const MIN_SWEEP_INTERVAL_SECS: u64 = 1;

/// Minimum connect, exec-open and I/O deadline in milliseconds. libssh2
/// reads a zero timeout as "wait forever".
pub const MIN_TRANSPORT_TIMEOUT_MS: u64 = 100;

/// Terminal dimensions (columns x rows).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PtySize {
    #[serde(default = "default_cols")]
    pub cols: u32,
    #[serde(default = "default_rows")]
    pub rows: u32,
}

impl Default for PtySize {
    fn default() -> Self {
        Self {
            cols: default_cols(),
            rows: default_rows(),
        }
    }
}

/// SSH session pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolConfig {
    /// Maximum number of concurrently outstanding checkouts.
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
    #[serde(default = "default_acquire_timeout_ms")]
    pub acquire_timeout_ms: u64,
    /// Cached sessions unused for longer than this are swept.
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    /// TCP connect + handshake + authentication deadline.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_exec_open_timeout_ms")]
    pub exec_open_timeout_ms: u64,
    /// Deadline for every blocking read or write on an established session.
    #[serde(default = "default_io_timeout_ms")]
    pub io_timeout_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_sessions: default_max_sessions(),
            acquire_timeout_ms: default_acquire_timeout_ms(),
            idle_timeout_secs: default_idle_timeout_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            connect_timeout_ms: default_connect_timeout_ms(),
            exec_open_timeout_ms: default_exec_open_timeout_ms(),
            io_timeout_ms: default_io_timeout_ms(),
        }
    }
}

impl PoolConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    /// Idle sweep period, clamped to [`MIN_SWEEP_INTERVAL_SECS`].
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(MIN_SWEEP_INTERVAL_SECS))
    }

    /// Timeouts handed to the transport layer, each clamped to
    /// [`MIN_TRANSPORT_TIMEOUT_MS`].
    pub fn timeouts(&self) -> TransportTimeouts {
        let bounded = |ms: u64| Duration::from_millis(ms.max(MIN_TRANSPORT_TIMEOUT_MS));
        TransportTimeouts {
            connect: bounded(self.connect_timeout_ms),
            exec_open: bounded(self.exec_open_timeout_ms),
            io: bounded(self.io_timeout_ms),
        }
    }
}

/// Deadlines applied by a [`Connector`](crate::transport::Connector).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportTimeouts {
    pub connect: Duration,
    pub exec_open: Duration,
    pub io: Duration,
}

impl Default for TransportTimeouts {
    fn default() -> Self {
        PoolConfig::default().timeouts()
    }
}

/// Resource monitor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorConfig {
    #[serde(default = "default_monitor_interval_ms")]
    pub interval_ms: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_monitor_interval_ms(),
        }
    }
}

impl MonitorConfig {
    /// Sampling period, clamped to [`MIN_MONITOR_INTERVAL_MS`].
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(MIN_MONITOR_INTERVAL_MS))
    }
}

/// Interactive terminal configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminalConfig {
    #[serde(default = "default_term")]
    pub term: String,
    #[serde(default)]
    pub size: PtySize,
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            term: default_term(),
            size: PtySize::default(),
        }
    }
}

// --- Default value functions ---

fn default_cols() -> u32 {
    80
}

fn default_rows() -> u32 {
    24
}

fn default_max_sessions() -> usize {
    20
}

fn default_acquire_timeout_ms() -> u64 {
    10_000
}

fn default_idle_timeout_secs() -> u64 {
    30 * 60
}

fn default_sweep_interval_secs() -> u64 {
    10 * 60
}

fn default_connect_timeout_ms() -> u64 {
    30_000
}

fn default_exec_open_timeout_ms() -> u64 {
    5_000
}

fn default_io_timeout_ms() -> u64 {
    30_000
}

fn default_monitor_interval_ms() -> u64 {
    2_000
}

fn default_term() -> String {
    "xterm-256color".to_string()
}
