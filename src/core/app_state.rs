//! Application state - Joins settings, profiles and the supervised proxy

use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use anyhow::{Context, Result};
use tokio::sync::broadcast;
use tracing::{info, warn};

use super::handle::{LaunchRequest, ProcessHandle};
use super::log_relay::{LogBuffer, LogLine, LogSink};
use super::monitor::ProcessStatusSource;
use super::profile::{ConfigProfile, ProfileStore};
use super::settings::{Settings, StatusSourceKind};
use super::status::{MockStatusSource, StatusSnapshot, StatusSource};
use super::supervisor::ProcessSupervisor;

/// Pending events a slow subscriber may fall behind by before losing some
const EVENT_CAPACITY: usize = 1024;

/// What the rendering layer is told about
#[derive(Debug, Clone)]
pub enum AppEvent {
    Started(ProcessHandle),
    Stopped,
    /// The proxy ended without being asked to; `code` is `None` for a signal
    Exited {
        handle: ProcessHandle,
        code: Option<i32>,
    },
    Log(LogLine),
    Status(StatusSnapshot),
}

/// Central application state
pub struct AppState {
    /// Application settings
    pub settings: Arc<RwLock<Settings>>,
    /// Known profiles
    pub profiles: Arc<RwLock<ProfileStore>>,
    /// Proxy process supervisor
    pub supervisor: Arc<ProcessSupervisor>,
    /// Recent proxy output
    pub logs: Arc<LogBuffer>,
    /// Last snapshot from the status poller
    latest_status: Arc<RwLock<Option<StatusSnapshot>>>,
    events: broadcast::Sender<AppEvent>,
    app_dir: PathBuf,
    settings_path: PathBuf,
}

impl AppState {
    /// Create the application state.
    ///
    /// Must run inside a tokio runtime; status polling is spawned on it.
    pub fn new(mut settings: Settings, app_dir: PathBuf, settings_path: PathBuf) -> Result<Self> {
        settings.validate();
        let profiles_dir = settings.get_profiles_directory(&app_dir);
        let profiles = ProfileStore::load(&profiles_dir, settings.active_profile.as_deref())
            .context("Failed to load profiles")?;

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let logs = Arc::new(LogBuffer::new(settings.log_buffer_lines));
        let latest_status = Arc::new(RwLock::new(None));

        let log_sink = {
            let logs = Arc::clone(&logs);
            let events = events.clone();
            move |line: LogLine| {
                logs.push(line.clone());
                let _ = events.send(AppEvent::Log(line));
            }
        };

        let on_status = {
            let latest = Arc::clone(&latest_status);
            let events = events.clone();
            move |snapshot: StatusSnapshot| {
                if let Ok(mut latest) = latest.write() {
                    *latest = Some(snapshot.clone());
                }
                let _ = events.send(AppEvent::Status(snapshot));
            }
        };

        let on_exit = {
            let latest = Arc::clone(&latest_status);
            let events = events.clone();
            move |handle: &ProcessHandle, code: Option<i32>| {
                if let Ok(mut latest) = latest.write() {
                    *latest = None;
                }
                let _ = events.send(AppEvent::Exited {
                    handle: handle.clone(),
                    code,
                });
            }
        };

        let status_source: Arc<dyn StatusSource> = match settings.status_source {
            StatusSourceKind::Mock => Arc::new(MockStatusSource),
            StatusSourceKind::Process => Arc::new(ProcessStatusSource::new()),
        };

        let supervisor = ProcessSupervisor::new(Arc::new(log_sink))
            .with_base_dir(&app_dir)
            .with_status_source(status_source)
            .with_status_callback(on_status)
            .with_exit_callback(on_exit)
            .with_poll_interval(settings.poll_interval());

        info!(
            "Application state initialized ({} status source)",
            settings.status_source.label()
        );

        Ok(Self {
            settings: Arc::new(RwLock::new(settings)),
            profiles: Arc::new(RwLock::new(profiles)),
            supervisor: Arc::new(supervisor),
            logs,
            latest_status,
            events,
            app_dir,
            settings_path,
        })
    }

    pub fn app_dir(&self) -> &Path {
        &self.app_dir
    }

    /// Receive log, status and lifecycle events
    pub fn subscribe(&self) -> broadcast::Receiver<AppEvent> {
        self.events.subscribe()
    }

    /// Build the launch request for the active profile
    pub fn launch_request(&self) -> Result<LaunchRequest> {
        let settings = self
            .settings
            .read()
            .map_err(|e| anyhow::anyhow!("Settings lock poisoned: {}", e))?;
        let profiles = self
            .profiles
            .read()
            .map_err(|e| anyhow::anyhow!("Profiles lock poisoned: {}", e))?;

        let mut args = vec!["run".to_string()];
        match profiles.active() {
            Some(profile) => {
                args.push("-c".to_string());
                args.push(profile.path.to_string_lossy().to_string());
            }
            None => warn!("No active profile, starting without -c"),
        }
        args.extend(settings.extra_arguments.iter().cloned());

        Ok(LaunchRequest::new(&settings.executable_name).with_arguments(args))
    }

    /// Start the proxy with the active profile, replacing a running one
    pub fn start(&self) -> Result<ProcessHandle> {
        let request = self.launch_request()?;
        self.clear_status();

        let handle = self.supervisor.start(request)?;
        info!("sing-box running as PID {}", handle.pid);
        let _ = self.events.send(AppEvent::Started(handle.clone()));
        Ok(handle)
    }

    /// Stop the proxy if it is running
    pub fn stop(&self) -> Result<()> {
        self.supervisor.stop()?;
        self.clear_status();
        let _ = self.events.send(AppEvent::Stopped);
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.supervisor.is_running()
    }

    pub fn current(&self) -> Option<ProcessHandle> {
        self.supervisor.current()
    }

    pub fn latest_status(&self) -> Option<StatusSnapshot> {
        self.latest_status.read().ok().and_then(|s| s.clone())
    }

    /// One-line description of the proxy state
    pub fn status_line(&self) -> String {
        match self.current() {
            Some(handle) => format!(
                "Running (PID {}, up {})",
                handle.pid,
                handle.uptime_string()
            ),
            None => "Stopped".to_string(),
        }
    }

    pub fn profiles(&self) -> Vec<ConfigProfile> {
        self.profiles
            .read()
            .map(|p| p.list().to_vec())
            .unwrap_or_default()
    }

    pub fn active_profile(&self) -> Option<ConfigProfile> {
        self.profiles.read().ok()?.active().cloned()
    }

    /// Make `name` the active profile and remember it in the settings file.
    ///
    /// A running proxy keeps its profile until the next start.
    pub fn select_profile(&self, name: &str) -> Result<ConfigProfile> {
        let profile = self
            .profiles
            .write()
            .map_err(|e| anyhow::anyhow!("Profiles lock poisoned: {}", e))?
            .select(name)?
            .clone();

        let mut settings = self
            .settings
            .write()
            .map_err(|e| anyhow::anyhow!("Settings lock poisoned: {}", e))?;
        settings.active_profile = Some(profile.name.clone());
        settings.save(&self.settings_path)?;

        Ok(profile)
    }

    /// Create a new empty profile
    pub fn add_profile(&self, name: &str) -> Result<ConfigProfile> {
        let mut profiles = self
            .profiles
            .write()
            .map_err(|e| anyhow::anyhow!("Profiles lock poisoned: {}", e))?;
        Ok(profiles.add(name)?.clone())
    }

    /// Open a profile in the system editor
    pub fn open_profile(&self, name: &str) -> Result<()> {
        self.profiles
            .read()
            .map_err(|e| anyhow::anyhow!("Profiles lock poisoned: {}", e))?
            .open_in_editor(name)
    }

    /// Pick up profile files added or removed outside the manager
    pub fn refresh_profiles(&self) -> Result<()> {
        self.profiles
            .write()
            .map_err(|e| anyhow::anyhow!("Profiles lock poisoned: {}", e))?
            .refresh()
    }

    fn clear_status(&self) {
        if let Ok(mut latest) = self.latest_status.write() {
            *latest = None;
        }
    }
}
