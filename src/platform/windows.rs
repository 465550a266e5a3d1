//! Windows-specific process setup

use std::os::windows::process::CommandExt;
use std::process::Command;

/// Keep the console-subsystem proxy from opening its own window
const CREATE_NO_WINDOW: u32 = 0x08000000;

pub fn configure_command(cmd: &mut Command) {
    cmd.creation_flags(CREATE_NO_WINDOW);
}
