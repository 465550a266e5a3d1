//! Process handle - Identifies the supervised process and how it was launched

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Unique identifier for one launch of the supervised process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HandleId(pub Uuid);

impl HandleId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for HandleId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for HandleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What to launch
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LaunchRequest {
    /// Path to the executable, relative paths resolve against the supervisor's base directory
    pub executable_path: PathBuf,
    /// Command line arguments
    pub arguments: Vec<String>,
    /// Working directory (defaults to executable's directory)
    pub working_directory: Option<PathBuf>,
}

impl LaunchRequest {
    pub fn new(executable_path: impl Into<PathBuf>) -> Self {
        Self {
            executable_path: executable_path.into(),
            ..Default::default()
        }
    }

    pub fn with_arguments<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.arguments = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_working_directory(mut self, path: impl Into<PathBuf>) -> Self {
        self.working_directory = Some(path.into());
        self
    }
}

/// A live supervised process.
///
/// Callers get a copy; the OS child object itself stays inside the supervisor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessHandle {
    /// Unique identifier
    pub id: HandleId,
    /// Operating system process ID
    pub pid: u32,
    /// Resolved executable path
    pub executable_path: PathBuf,
    /// Working directory the process was started in
    pub working_directory: PathBuf,
    /// Arguments passed to the executable
    pub arguments: Vec<String>,
    /// When the process was started
    pub started_at: DateTime<Utc>,
}

impl ProcessHandle {
    pub fn new(
        pid: u32,
        executable_path: impl Into<PathBuf>,
        working_directory: impl Into<PathBuf>,
        arguments: Vec<String>,
    ) -> Self {
        Self {
            id: HandleId::new(),
            pid,
            executable_path: executable_path.into(),
            working_directory: working_directory.into(),
            arguments,
            started_at: Utc::now(),
        }
    }

    /// Executable file name, for display
    pub fn display_name(&self) -> &str {
        self.executable_path
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("Unknown")
    }

    /// Profile path passed with `-c`, if any
    pub fn config_path(&self) -> Option<&Path> {
        self.arguments
            .iter()
            .position(|a| a == "-c")
            .and_then(|i| self.arguments.get(i + 1))
            .map(Path::new)
    }

    pub fn uptime(&self) -> chrono::Duration {
        Utc::now() - self.started_at
    }

    /// Format uptime as human-readable string
    pub fn uptime_string(&self) -> String {
        let secs = self.uptime().num_seconds().max(0);
        if secs < 60 {
            format!("{}s", secs)
        } else if secs < 3600 {
            format!("{}m {}s", secs / 60, secs % 60)
        } else if secs < 86400 {
            format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
        } else {
            format!("{}d {}h", secs / 86400, (secs % 86400) / 3600)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_path_from_arguments() {
        let handle = ProcessHandle::new(
            42,
            "/opt/app/sing-box",
            "/opt/app",
            vec!["run".into(), "-c".into(), "/opt/app/config/profiles/a.json".into()],
        );
        assert_eq!(
            handle.config_path(),
            Some(Path::new("/opt/app/config/profiles/a.json"))
        );
        assert_eq!(handle.display_name(), "sing-box");

        let bare = ProcessHandle::new(42, "/opt/app/sing-box", "/opt/app", vec!["run".into()]);
        assert_eq!(bare.config_path(), None);
    }

    #[test]
    fn test_handles_are_unique() {
        let a = ProcessHandle::new(1, "x", ".", Vec::new());
        let b = ProcessHandle::new(1, "x", ".", Vec::new());
        assert_ne!(a.id, b.id);
    }
}
