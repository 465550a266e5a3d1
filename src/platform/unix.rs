//! Unix-specific process setup

use std::os::unix::process::CommandExt;
use std::process::Command;

/// Put the proxy in its own process group so a terminal Ctrl-C reaches only
/// the manager, which then stops the proxy itself
pub fn configure_command(cmd: &mut Command) {
    cmd.process_group(0);
}
