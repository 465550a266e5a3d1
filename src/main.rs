//! Console front-end for the sing-box manager
//!
//! Starts sing-box with the active profile and prints its output and status
//! until interrupted, or manages the profile directory.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use single_instance::SingleInstance;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use singbox_manager::core::{app_directory, AppEvent, AppState, LogStream, Settings};
use singbox_manager::{APP_NAME, APP_VERSION};

/// How long trailing output may keep arriving after the proxy is gone
const DRAIN_GRACE: Duration = Duration::from_millis(250);

#[derive(Parser)]
#[command(name = "singbox-manager", version, about = "Run and monitor a sing-box proxy core")]
struct Cli {
    /// Directory holding the sing-box binary, settings and profiles
    #[arg(long, env = "SINGBOX_MANAGER_DIR")]
    app_dir: Option<PathBuf>,

    /// Settings file (defaults to settings.json in the application directory)
    #[arg(long)]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start sing-box and stream its output until Ctrl-C
    Run {
        /// Profile to activate before starting
        #[arg(long)]
        profile: Option<String>,
    },
    /// Manage configuration profiles
    #[command(subcommand)]
    Profiles(ProfileCommand),
}

#[derive(Subcommand)]
enum ProfileCommand {
    /// List profiles, marking the active one
    List,
    /// Create an empty profile
    Add { name: String },
    /// Make a profile active for the next start
    Select { name: String },
    /// Open a profile in the system editor
    Edit { name: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let app_dir = cli.app_dir.unwrap_or_else(app_directory);
    let settings_path = cli
        .settings
        .unwrap_or_else(|| Settings::path_in(&app_dir));
    let settings = Settings::load(&settings_path)?;

    init_logging(settings.debug_logging);
    info!("{} v{} starting...", APP_NAME, APP_VERSION);

    let state = AppState::new(settings, app_dir, settings_path)?;

    match cli.command {
        Command::Run { profile } => run(&state, profile.as_deref()).await,
        Command::Profiles(cmd) => manage_profiles(&state, cmd),
    }
}

/// Initialize the logging system
fn init_logging(debug: bool) {
    let default = if debug {
        "singbox_manager=debug,proxy=debug"
    } else {
        "singbox_manager=info,proxy=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn run(state: &AppState, profile: Option<&str>) -> Result<()> {
    // Two managers would fight over the same ports
    let instance = SingleInstance::new(APP_NAME)
        .map_err(|e| anyhow::anyhow!("Failed to create single instance lock: {}", e))?;
    if !instance.is_single() {
        error!("Another instance of {} is already running!", APP_NAME);
        return Ok(());
    }

    if let Some(name) = profile {
        state.select_profile(name)?;
    }

    let mut events = state.subscribe();
    let handle = state.start()?;
    match handle.config_path() {
        Some(config) => info!("Started {} with {:?}", handle.display_name(), config),
        None => info!("Started {}", handle.display_name()),
    }

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    // Reaping happens on is_running(), which then reports the exit as an event
    let mut exit_check = tokio::time::interval(Duration::from_secs(1));

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("Interrupted, stopping sing-box");
                break;
            }
            _ = exit_check.tick() => {
                state.is_running();
            }
            event = events.recv() => {
                match event {
                    Ok(AppEvent::Exited { handle, code }) => {
                        match code {
                            Some(code) => warn!("{} exited on its own with code {}", handle.display_name(), code),
                            None => warn!("{} exited on its own", handle.display_name()),
                        }
                        break;
                    }
                    Ok(event) => print_event(event),
                    Err(RecvError::Lagged(missed)) => warn!("Console fell behind, {} events dropped", missed),
                    Err(RecvError::Closed) => break,
                }
            }
        }
    }

    state.stop()?;

    // Output read after the exit was noticed, usually the reason for it
    while let Ok(Ok(event)) = tokio::time::timeout(DRAIN_GRACE, events.recv()).await {
        print_event(event);
    }

    info!("{}", state.status_line());
    Ok(())
}

fn print_event(event: AppEvent) {
    match event {
        AppEvent::Log(line) => match line.stream {
            LogStream::Stdout => info!(target: "proxy", "{}", line.text),
            LogStream::Stderr => warn!(target: "proxy", "{}", line.text),
        },
        AppEvent::Status(snapshot) => {
            info!(target: "proxy::status", "{}", snapshot.traffic_summary().replace('\n', " | "));
            info!(target: "proxy::status", "{}", snapshot.connection_summary());
        }
        _ => {}
    }
}

fn manage_profiles(state: &AppState, cmd: ProfileCommand) -> Result<()> {
    match cmd {
        ProfileCommand::List => {
            for profile in state.profiles() {
                let marker = if profile.is_active { "*" } else { " " };
                println!("{} {:<24} {}", marker, profile.name, profile.path.display());
            }
        }
        ProfileCommand::Add { name } => {
            let profile = state.add_profile(&name)?;
            println!("Created {}", profile.path.display());
        }
        ProfileCommand::Select { name } => {
            let profile = state.select_profile(&name)?;
            println!("Active profile: {}", profile.name);
        }
        ProfileCommand::Edit { name } => state.open_profile(&name)?,
    }
    Ok(())
}
