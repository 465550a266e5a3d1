//! Status snapshots and the sources that produce them

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::handle::ProcessHandle;

/// Proxy health at one polling instant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    /// Memory in use by the proxy, in bytes
    pub memory_bytes: u64,
    /// Active lightweight tasks (goroutines for sing-box)
    pub tasks: u32,
    /// Open inbound connections
    pub inbound_connections: u32,
    /// Open outbound connections
    pub outbound_connections: u32,
    /// Current upload speed, bytes per second
    pub uplink_rate: u64,
    /// Current download speed, bytes per second
    pub downlink_rate: u64,
    /// Bytes uploaded since start
    pub uplink_total: u64,
    /// Bytes downloaded since start
    pub downlink_total: u64,
    /// When the snapshot was taken
    pub captured_at: DateTime<Utc>,
}

impl Default for StatusSnapshot {
    fn default() -> Self {
        Self {
            memory_bytes: 0,
            tasks: 0,
            inbound_connections: 0,
            outbound_connections: 0,
            uplink_rate: 0,
            downlink_rate: 0,
            uplink_total: 0,
            downlink_total: 0,
            captured_at: Utc::now(),
        }
    }
}

impl StatusSnapshot {
    /// Memory and traffic summary, one item per line
    pub fn traffic_summary(&self) -> String {
        format!(
            "Memory: {} | Tasks: {}\nUp: {}/s | Down: {}/s\nTotal up: {} | Total down: {}",
            format_bytes(self.memory_bytes),
            self.tasks,
            format_bytes(self.uplink_rate),
            format_bytes(self.downlink_rate),
            format_bytes(self.uplink_total),
            format_bytes(self.downlink_total),
        )
    }

    pub fn connection_summary(&self) -> String {
        format!(
            "Inbound: {} | Outbound: {}",
            self.inbound_connections, self.outbound_connections
        )
    }
}

impl std::fmt::Display for StatusSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}\n{}", self.traffic_summary(), self.connection_summary())
    }
}

/// Format a byte count with binary units
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    if bytes < 1024 {
        return format!("{} B", bytes);
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.1} {}", value, UNITS[unit])
}

/// Where status snapshots come from.
///
/// The poller only sees this trait, so a real management-API client can
/// replace the mock without touching the supervisor or poller.
#[async_trait]
pub trait StatusSource: Send + Sync {
    async fn query(&self, target: &ProcessHandle) -> Result<StatusSnapshot>;
}

/// Returns the same fixed figures on every query
#[derive(Debug, Clone, Default)]
pub struct MockStatusSource;

impl MockStatusSource {
    pub fn snapshot() -> StatusSnapshot {
        StatusSnapshot {
            memory_bytes: 24 * 1024 * 1024,
            tasks: 198,
            inbound_connections: 55,
            outbound_connections: 49,
            uplink_rate: 860,
            downlink_rate: 7_373,
            uplink_total: 303 * 1024,
            downlink_total: 1_153_434,
            captured_at: Utc::now(),
        }
    }
}

#[async_trait]
impl StatusSource for MockStatusSource {
    async fn query(&self, _target: &ProcessHandle) -> Result<StatusSnapshot> {
        Ok(Self::snapshot())
    }
}
