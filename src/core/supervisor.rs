//! Process supervision - Spawning, stopping and watching the proxy process

use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use tokio::runtime::Handle;
use tracing::{debug, error, info, warn};

use super::error::{Result, SupervisorError};
use super::handle::{HandleId, LaunchRequest, ProcessHandle};
use super::log_relay::{LogRelay, LogSink, LogStream};
use super::poller::{StatusCallback, StatusPoller, DEFAULT_POLL_INTERVAL};
use super::status::{MockStatusSource, StatusSnapshot, StatusSource};
use crate::platform;

/// Directory containing the running program's own binary.
///
/// Falls back to the current directory when the binary path is unavailable.
pub fn app_directory() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."))
}

/// The one process a supervisor owns while it runs
struct RunningProcess {
    handle: ProcessHandle,
    child: Child,
    poller: StatusPoller,
}

type Slot = Mutex<Option<RunningProcess>>;

/// Called when a child that exited on its own is reaped, with its exit code
/// (`None` when killed by a signal or the status could not be read).
///
/// Runs under the supervisor lock and must not call back into the supervisor.
pub type ExitCallback = Arc<dyn Fn(&ProcessHandle, Option<i32>) + Send + Sync>;

/// Owns the lifecycle of at most one external process.
///
/// Start, stop and liveness checks all go through one lock, so there is never
/// more than one live child per supervisor.
pub struct ProcessSupervisor {
    slot: Arc<Slot>,
    /// Relative executable paths resolve against this directory
    base_dir: PathBuf,
    log_sink: Arc<dyn LogSink>,
    status_source: Arc<dyn StatusSource>,
    on_status: StatusCallback,
    on_exit: ExitCallback,
    poll_interval: Duration,
    runtime: Option<Handle>,
}

impl ProcessSupervisor {
    /// Create a supervisor delivering child output to `log_sink`.
    ///
    /// Uses the mock status source, a 5 second poll interval, the program's
    /// own directory as base, and the ambient tokio runtime if there is one.
    pub fn new(log_sink: Arc<dyn LogSink>) -> Self {
        Self {
            slot: Arc::new(Mutex::new(None)),
            base_dir: app_directory(),
            log_sink,
            status_source: Arc::new(MockStatusSource),
            on_status: Arc::new(|snapshot: StatusSnapshot| {
                debug!("Status snapshot dropped: {:?}", snapshot);
            }),
            on_exit: Arc::new(|_: &ProcessHandle, _: Option<i32>| {}),
            poll_interval: DEFAULT_POLL_INTERVAL,
            runtime: Handle::try_current().ok(),
        }
    }

    pub fn with_base_dir(mut self, base_dir: impl Into<PathBuf>) -> Self {
        self.base_dir = base_dir.into();
        self
    }

    pub fn with_status_source(mut self, source: Arc<dyn StatusSource>) -> Self {
        self.status_source = source;
        self
    }

    pub fn with_status_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(StatusSnapshot) + Send + Sync + 'static,
    {
        self.on_status = Arc::new(callback);
        self
    }

    pub fn with_exit_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(&ProcessHandle, Option<i32>) + Send + Sync + 'static,
    {
        self.on_exit = Arc::new(callback);
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Run status polling on this runtime instead of the ambient one
    pub fn with_runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Resolve an executable path against the base directory
    pub fn resolve_executable(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }

    /// Start the process described by `request`.
    ///
    /// A process that is already running is stopped first. Output capture and
    /// status polling begin before this returns.
    pub fn start(&self, request: LaunchRequest) -> Result<ProcessHandle> {
        let executable = self.resolve_executable(&request.executable_path);
        info!("Starting {:?} with {:?}", executable, request.arguments);

        if !executable.is_file() {
            return Err(SupervisorError::NotFound { path: executable });
        }
        let runtime = self
            .runtime
            .clone()
            .or_else(|| Handle::try_current().ok())
            .ok_or(SupervisorError::NoRuntime)?;

        let mut slot = self.lock_slot()?;
        if slot.is_some() {
            info!("Stopping the running process before starting a new one");
            Self::stop_locked(&mut slot)?;
        }

        let working_dir = request
            .working_directory
            .clone()
            .or_else(|| executable.parent().map(Path::to_path_buf))
            .unwrap_or_else(|| PathBuf::from("."));

        let mut cmd = Command::new(&executable);
        cmd.args(&request.arguments)
            .current_dir(&working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        platform::configure_command(&mut cmd);

        let mut child = cmd.spawn().map_err(|source| SupervisorError::SpawnFailed {
            path: executable.clone(),
            source,
        })?;

        let handle = ProcessHandle::new(
            child.id(),
            &executable,
            &working_dir,
            request.arguments.clone(),
        );
        info!("Spawned process with PID {}", handle.pid);

        if let Err(e) = self.attach_relays(&mut child) {
            error!("Failed to start log relay for PID {}: {}", handle.pid, e);
            let _ = child.kill();
            let _ = child.wait();
            return Err(e.into());
        }

        let mut poller = StatusPoller::new(Arc::clone(&self.status_source), self.poll_interval);
        let liveness = {
            let slot = Arc::downgrade(&self.slot);
            let id = handle.id;
            let on_exit = Arc::clone(&self.on_exit);
            move || Self::still_running(&slot, id, &on_exit)
        };
        if let Err(e) = poller.start(&runtime, handle.clone(), Arc::clone(&self.on_status), liveness) {
            warn!("Status polling unavailable for PID {}: {}", handle.pid, e);
        }

        *slot = Some(RunningProcess {
            handle: handle.clone(),
            child,
            poller,
        });

        Ok(handle)
    }

    /// Stop the running process, if any.
    ///
    /// Stopping with nothing running succeeds. When the kill is refused the
    /// handle stays in place.
    pub fn stop(&self) -> Result<()> {
        let mut slot = self.lock_slot()?;
        Self::stop_locked(&mut slot)
    }

    /// Handle of the running process, if any
    pub fn current(&self) -> Option<ProcessHandle> {
        let mut slot = self.lock_slot().ok()?;
        if Self::refresh(&mut slot, &self.on_exit) {
            slot.as_ref().map(|r| r.handle.clone())
        } else {
            None
        }
    }

    /// Check whether the process is still alive, clearing the handle if it exited
    pub fn is_running(&self) -> bool {
        self.lock_slot()
            .map(|mut slot| Self::refresh(&mut slot, &self.on_exit))
            .unwrap_or(false)
    }

    fn lock_slot(&self) -> Result<MutexGuard<'_, Option<RunningProcess>>> {
        self.slot
            .lock()
            .map_err(|e| SupervisorError::LockPoisoned(e.to_string()))
    }

    fn attach_relays(&self, child: &mut Child) -> std::io::Result<()> {
        if let Some(stdout) = child.stdout.take() {
            LogRelay::spawn(stdout, LogStream::Stdout, Arc::clone(&self.log_sink))?;
        }
        if let Some(stderr) = child.stderr.take() {
            LogRelay::spawn(stderr, LogStream::Stderr, Arc::clone(&self.log_sink))?;
        }
        Ok(())
    }

    fn stop_locked(slot: &mut Option<RunningProcess>) -> Result<()> {
        let Some(mut running) = slot.take() else {
            debug!("Stop requested but no process is running");
            return Ok(());
        };
        let pid = running.handle.pid;
        info!("Stopping {} (PID {})", running.handle.display_name(), pid);

        if let Ok(Some(status)) = running.child.try_wait() {
            info!("PID {} had already exited ({})", pid, status);
            running.poller.cancel();
            return Ok(());
        }

        if let Err(source) = running.child.kill() {
            error!("Failed to kill PID {}: {}", pid, source);
            *slot = Some(running);
            return Err(SupervisorError::TerminationFailed { pid, source });
        }
        running.poller.cancel();

        if let Err(e) = running.child.wait() {
            warn!("Failed to reap PID {}: {}", pid, e);
        }
        info!("Process {} stopped", pid);
        Ok(())
    }

    /// Reap the child if it has exited. Returns whether a process is still live.
    fn refresh(slot: &mut Option<RunningProcess>, on_exit: &ExitCallback) -> bool {
        let Some(running) = slot.as_mut() else {
            return false;
        };
        let code = match running.child.try_wait() {
            Ok(None) => return true,
            Ok(Some(status)) => {
                if status.success() {
                    info!("PID {} exited", running.handle.pid);
                } else {
                    warn!("PID {} exited with {}", running.handle.pid, status);
                }
                status.code()
            }
            Err(e) => {
                error!("Error checking process status: {}", e);
                None
            }
        };
        if let Some(exited) = slot.take() {
            exited.poller.cancel();
            on_exit(&exited.handle, code);
        }
        false
    }

    /// Liveness check run by the poller before every query
    fn still_running(slot: &Weak<Slot>, id: HandleId, on_exit: &ExitCallback) -> bool {
        let Some(slot) = slot.upgrade() else {
            return false;
        };
        let Ok(mut slot) = slot.lock() else {
            return false;
        };
        let ours = slot.as_ref().is_some_and(|running| running.handle.id == id);
        ours && Self::refresh(&mut slot, on_exit)
    }
}

impl Drop for ProcessSupervisor {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            error!("Failed to stop process on shutdown: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::log_relay::LogBuffer;

    fn supervisor(base: &str) -> ProcessSupervisor {
        ProcessSupervisor::new(Arc::new(LogBuffer::new(16))).with_base_dir(base)
    }

    #[test]
    fn test_relative_paths_resolve_against_base_dir() {
        let sup = supervisor("/opt/manager");
        assert_eq!(
            sup.resolve_executable(Path::new("sing-box")),
            PathBuf::from("/opt/manager/sing-box")
        );
    }

    #[test]
    #[cfg(unix)]
    fn test_absolute_paths_are_kept() {
        let sup = supervisor("/opt/manager");
        assert_eq!(
            sup.resolve_executable(Path::new("/usr/bin/sing-box")),
            PathBuf::from("/usr/bin/sing-box")
        );
    }

    #[test]
    fn test_missing_executable_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let sup = supervisor(dir.path().to_str().unwrap());

        let err = sup.start(LaunchRequest::new("sing-box")).unwrap_err();

        assert!(matches!(err, SupervisorError::NotFound { ref path } if path == &dir.path().join("sing-box")));
        assert!(sup.current().is_none());
        assert!(!sup.is_running());
    }

    #[test]
    fn test_directory_is_not_an_executable() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sing-box")).unwrap();
        let sup = supervisor(dir.path().to_str().unwrap());

        assert!(matches!(
            sup.start(LaunchRequest::new("sing-box")),
            Err(SupervisorError::NotFound { .. })
        ));
    }

    #[test]
    fn test_stop_without_process_is_noop() {
        let sup = supervisor(".");
        assert!(sup.stop().is_ok());
        assert!(sup.stop().is_ok());
    }
}
