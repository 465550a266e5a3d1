//! Application settings management

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::log_relay::{DEFAULT_LOG_CAPACITY, MAX_LOG_CAPACITY};
use super::poller::MAX_POLL_INTERVAL;

/// Settings file name, next to the manager binary
pub const SETTINGS_FILE: &str = "settings.json";

/// Longest accepted poll interval, one day
pub const MAX_POLL_INTERVAL_SECS: u64 = MAX_POLL_INTERVAL.as_secs();

/// Proxy binary launched when no other name is configured
#[cfg(windows)]
pub const DEFAULT_EXECUTABLE: &str = "sing-box.exe";
#[cfg(not(windows))]
pub const DEFAULT_EXECUTABLE: &str = "sing-box";

/// Where status snapshots come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StatusSourceKind {
    /// Fixed placeholder figures
    #[default]
    Mock,
    /// Memory usage read from the OS
    Process,
}

impl StatusSourceKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Mock => "Mock",
            Self::Process => "Process",
        }
    }
}

/// Application settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Proxy binary, relative to the application directory unless absolute
    pub executable_name: String,
    /// Profile directory (defaults to `<app dir>/config/profiles`)
    pub profiles_directory: Option<PathBuf>,
    /// Profile used on the next start
    pub active_profile: Option<String>,
    /// Seconds between status polls
    pub poll_interval_secs: u64,
    /// Lines of proxy output kept in memory
    pub log_buffer_lines: usize,
    /// Extra arguments appended after `run -c <profile>`
    pub extra_arguments: Vec<String>,
    /// Status source used by the poller
    pub status_source: StatusSourceKind,
    /// Enable debug logging
    pub debug_logging: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            executable_name: DEFAULT_EXECUTABLE.to_string(),
            profiles_directory: None,
            active_profile: None,
            poll_interval_secs: 5,
            log_buffer_lines: DEFAULT_LOG_CAPACITY,
            extra_arguments: Vec::new(),
            status_source: StatusSourceKind::Mock,
            debug_logging: false,
        }
    }
}

impl Settings {
    /// Load settings from `path`, falling back to defaults when the file is missing
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("No settings at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings {:?}", path))?;
        let mut settings: Settings = serde_json::from_str(&raw)
            .with_context(|| format!("Invalid settings file {:?}", path))?;
        settings.validate();

        info!("Settings loaded from {:?}", path);
        Ok(settings)
    }

    /// Write settings to `path` as pretty JSON
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json).with_context(|| format!("Failed to write settings {:?}", path))?;
        debug!("Settings saved to {:?}", path);
        Ok(())
    }

    /// Default settings path inside `app_dir`
    pub fn path_in(app_dir: &Path) -> PathBuf {
        app_dir.join(SETTINGS_FILE)
    }

    /// Get the profiles directory, using the default under `app_dir` if not set
    pub fn get_profiles_directory(&self, app_dir: &Path) -> PathBuf {
        match &self.profiles_directory {
            Some(dir) if dir.is_absolute() => dir.clone(),
            Some(dir) => app_dir.join(dir),
            None => app_dir.join("config").join("profiles"),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Validate settings and fix any invalid values
    pub fn validate(&mut self) {
        self.poll_interval_secs = self.poll_interval_secs.clamp(1, MAX_POLL_INTERVAL_SECS);
        self.log_buffer_lines = self.log_buffer_lines.clamp(100, MAX_LOG_CAPACITY);
        if self.executable_name.trim().is_empty() {
            self.executable_name = DEFAULT_EXECUTABLE.to_string();
        }
    }
}
