//! Core module - Process supervision, log capture, status polling and profiles

mod app_state;
pub mod error;
mod handle;
pub mod log_relay;
mod monitor;
pub mod poller;
pub mod profile;
pub mod settings;
pub mod status;
mod supervisor;

pub use app_state::{AppEvent, AppState};
pub use error::{PollerError, SupervisorError};
pub use handle::{HandleId, LaunchRequest, ProcessHandle};
pub use log_relay::{LogBuffer, LogLine, LogRelay, LogSink, LogStream};
pub use monitor::ProcessStatusSource;
pub use poller::{PollerState, StatusCallback, StatusPoller, DEFAULT_POLL_INTERVAL};
pub use profile::{ConfigProfile, ProfileStore};
pub use settings::{Settings, StatusSourceKind};
pub use status::{MockStatusSource, StatusSnapshot, StatusSource};
pub use supervisor::{app_directory, ExitCallback, ProcessSupervisor};
