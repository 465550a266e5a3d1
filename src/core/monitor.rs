//! Resource monitoring - Status source backed by OS process information

use std::sync::Mutex;

use anyhow::{Context, Result};
use async_trait::async_trait;
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};
use tracing::trace;

use super::handle::ProcessHandle;
use super::status::{StatusSnapshot, StatusSource};

/// Reports the supervised process's resident memory as seen by the OS.
///
/// Connection and traffic counters need the proxy's own API and stay at zero.
pub struct ProcessStatusSource {
    system: Mutex<System>,
}

impl ProcessStatusSource {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }
}

impl Default for ProcessStatusSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StatusSource for ProcessStatusSource {
    async fn query(&self, target: &ProcessHandle) -> Result<StatusSnapshot> {
        let mut system = self
            .system
            .lock()
            .map_err(|e| anyhow::anyhow!("System lock poisoned: {}", e))?;

        let pid = Pid::from_u32(target.pid);
        system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[pid]),
            true,
            ProcessRefreshKind::new().with_memory(),
        );

        let process = system
            .process(pid)
            .with_context(|| format!("Process {} is not running", target.pid))?;
        trace!("PID {} uses {} bytes", target.pid, process.memory());

        Ok(StatusSnapshot {
            memory_bytes: process.memory(),
            ..Default::default()
        })
    }
}
