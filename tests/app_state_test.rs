use std::fs;
use std::path::Path;
use std::time::Duration;

use singbox_manager::core::{AppEvent, AppState, Settings, SupervisorError};
use tokio::time::timeout;

fn app_state(app_dir: &Path, settings: Settings) -> AppState {
    AppState::new(
        settings,
        app_dir.to_path_buf(),
        Settings::path_in(app_dir),
    )
    .unwrap()
}

#[tokio::test]
async fn test_first_run_creates_default_profile() {
    let dir = tempfile::tempdir().unwrap();
    let state = app_state(dir.path(), Settings::default());

    let active = state.active_profile().unwrap();
    assert_eq!(active.name, "default.json");
    assert_eq!(
        active.path,
        dir.path().join("config").join("profiles").join("default.json")
    );
    assert_eq!(state.profiles().len(), 1);
}

#[tokio::test]
async fn test_launch_request_uses_active_profile() {
    let dir = tempfile::tempdir().unwrap();
    let settings = Settings {
        extra_arguments: vec!["--disable-color".into()],
        ..Default::default()
    };
    let state = app_state(dir.path(), settings);
    let profile = state.add_profile("work").unwrap();
    state.select_profile("work").unwrap();

    let request = state.launch_request().unwrap();

    assert_eq!(
        request.executable_path,
        Path::new(singbox_manager::core::settings::DEFAULT_EXECUTABLE)
    );
    assert_eq!(
        request.arguments,
        vec![
            "run".to_string(),
            "-c".to_string(),
            profile.path.to_string_lossy().to_string(),
            "--disable-color".to_string(),
        ]
    );
}

#[tokio::test]
async fn test_selected_profile_is_remembered() {
    let dir = tempfile::tempdir().unwrap();
    {
        let state = app_state(dir.path(), Settings::default());
        state.add_profile("home").unwrap();
        state.select_profile("home").unwrap();
    }

    let settings = Settings::load(&Settings::path_in(dir.path())).unwrap();
    assert_eq!(settings.active_profile.as_deref(), Some("home.json"));

    let state = app_state(dir.path(), settings);
    assert_eq!(state.active_profile().unwrap().name, "home.json");
}

#[tokio::test]
async fn test_start_without_binary_reports_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let state = app_state(dir.path(), Settings::default());

    let err = state.start().unwrap_err();

    assert!(matches!(
        err.downcast_ref::<SupervisorError>(),
        Some(SupervisorError::NotFound { .. })
    ));
    assert!(!state.is_running());
    assert_eq!(state.status_line(), "Stopped");
}

/// Write an executable `fake-sing-box` script and point the settings at it
#[cfg(unix)]
fn fake_sing_box(app_dir: &Path, script: &str) -> Settings {
    use std::os::unix::fs::PermissionsExt;

    let fake = app_dir.join("fake-sing-box");
    fs::write(&fake, script).unwrap();
    fs::set_permissions(&fake, fs::Permissions::from_mode(0o755)).unwrap();
    Settings {
        executable_name: "fake-sing-box".into(),
        poll_interval_secs: 1,
        ..Default::default()
    }
}

/// Start, retrying while a concurrent fork still holds the fresh script open (ETXTBSY)
#[cfg(unix)]
async fn start_with_retry(state: &AppState) -> singbox_manager::core::ProcessHandle {
    let mut attempt = 0;
    loop {
        match state.start() {
            Ok(handle) => return handle,
            Err(err) if attempt < 5 => {
                attempt += 1;
                eprintln!("retrying start: {:#}", err);
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
            Err(err) => panic!("start failed: {:#}", err),
        }
    }
}

#[cfg(unix)]
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_run_streams_logs_and_status() {
    let dir = tempfile::tempdir().unwrap();
    let settings = fake_sing_box(dir.path(), "#!/bin/sh\necho \"sing-box $*\"\nexec sleep 30\n");
    let state = app_state(dir.path(), settings);
    let mut events = state.subscribe();

    let handle = start_with_retry(&state).await;
    assert!(state.status_line().starts_with(&format!("Running (PID {}", handle.pid)));

    let mut saw_started = false;
    let mut log_line = None;
    let mut saw_status = false;
    let collected = timeout(Duration::from_secs(10), async {
        while !(saw_started && log_line.is_some() && saw_status) {
            match events.recv().await.unwrap() {
                AppEvent::Started(h) => saw_started = h.id == handle.id,
                AppEvent::Log(line) => log_line = Some(line.text),
                AppEvent::Status(_) => saw_status = true,
                AppEvent::Stopped | AppEvent::Exited { .. } => {}
            }
        }
    })
    .await;
    assert!(collected.is_ok(), "timed out waiting for events");

    let expected_config = dir.path().join("config").join("profiles").join("default.json");
    assert_eq!(
        log_line.unwrap(),
        format!("sing-box run -c {}", expected_config.display())
    );
    assert_eq!(state.logs.len(), 1);
    assert_eq!(state.latest_status().unwrap().tasks, 198);

    state.stop().unwrap();
    assert!(state.latest_status().is_none());
    assert!(!state.is_running());
}

#[cfg(unix)]
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_unrequested_exit_is_reported_with_last_output() {
    let dir = tempfile::tempdir().unwrap();
    let settings = fake_sing_box(
        dir.path(),
        "#!/bin/sh\necho \"FATAL start service: bad config\" 1>&2\nexit 1\n",
    );
    let state = app_state(dir.path(), settings);
    let mut events = state.subscribe();

    let handle = start_with_retry(&state).await;

    let mut exit = None;
    let mut fatal_line = None;
    let collected = timeout(Duration::from_secs(10), async {
        while exit.is_none() || fatal_line.is_none() {
            tokio::select! {
                event = events.recv() => match event.unwrap() {
                    AppEvent::Exited { handle, code } => exit = Some((handle.id, code)),
                    AppEvent::Log(line) => fatal_line = Some(line.text),
                    _ => {}
                },
                _ = tokio::time::sleep(Duration::from_millis(50)) => {
                    state.is_running();
                }
            }
        }
    })
    .await;
    assert!(collected.is_ok(), "timed out waiting for the exit");

    assert_eq!(exit, Some((handle.id, Some(1))));
    assert_eq!(fatal_line.as_deref(), Some("FATAL start service: bad config"));
    assert!(state.current().is_none());
    assert!(state.stop().is_ok());
}
