//! sing-box manager - Start, stop and monitor a sing-box proxy core
//!
//! The proxy runs as a supervised child process. Its output is captured line by
//! line and its status is polled on a fixed interval; both are delivered as
//! plain data so any front-end can render them.

pub mod core;
pub mod platform;

/// Application name constant
pub const APP_NAME: &str = "SingBoxManager";

/// Application version
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");
