//! Platform-specific process setup

#[cfg(windows)]
pub mod windows;

#[cfg(unix)]
pub mod unix;

use std::process::Command;

/// Apply per-platform options to the command that launches the proxy
pub fn configure_command(cmd: &mut Command) {
    #[cfg(windows)]
    {
        windows::configure_command(cmd)
    }
    #[cfg(unix)]
    {
        unix::configure_command(cmd)
    }
    #[cfg(not(any(windows, unix)))]
    {
        let _ = cmd;
    }
}
