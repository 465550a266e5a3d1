//! Status poller - Periodically queries a status source until cancelled

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::error::PollerError;
use super::handle::ProcessHandle;
use super::status::{StatusSnapshot, StatusSource};

/// Poll interval used when none is configured
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Longest interval a poller accepts
pub const MAX_POLL_INTERVAL: Duration = Duration::from_secs(86_400);

/// Callback receiving each snapshot.
///
/// Runs while the poller's state lock is held, so it must not call back into
/// the poller.
pub type StatusCallback = Arc<dyn Fn(StatusSnapshot) + Send + Sync>;

/// Lifecycle of a poller. `Stopped` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerState {
    Idle,
    Polling,
    Stopped,
}

/// Queries a [`StatusSource`] on a fixed interval and reports each snapshot.
///
/// A poller runs once. After cancellation a new poller has to be built.
pub struct StatusPoller {
    source: Arc<dyn StatusSource>,
    interval: Duration,
    state: Arc<Mutex<PollerState>>,
    cancel_tx: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl StatusPoller {
    pub fn new(source: Arc<dyn StatusSource>, interval: Duration) -> Self {
        let (cancel_tx, _) = watch::channel(false);
        Self {
            source,
            interval: interval.clamp(Duration::from_millis(1), MAX_POLL_INTERVAL),
            state: Arc::new(Mutex::new(PollerState::Idle)),
            cancel_tx,
            task: None,
        }
    }

    pub fn state(&self) -> PollerState {
        self.state
            .lock()
            .map(|s| *s)
            .unwrap_or(PollerState::Stopped)
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Start polling on `runtime` for `target`.
    ///
    /// `keep_polling` runs before every query; returning false stops the poller
    /// for good, as cancellation does.
    pub fn start<F>(
        &mut self,
        runtime: &Handle,
        target: ProcessHandle,
        on_status: StatusCallback,
        keep_polling: F,
    ) -> Result<(), PollerError>
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        {
            let mut state = self
                .state
                .lock()
                .map_err(|_| PollerError::NotIdle(PollerState::Stopped))?;
            if *state != PollerState::Idle {
                return Err(PollerError::NotIdle(*state));
            }
            *state = PollerState::Polling;
        }

        let source = Arc::clone(&self.source);
        let state = Arc::clone(&self.state);
        let cancel_rx = self.cancel_tx.subscribe();
        let interval = self.interval;

        info!(
            "Status polling started for PID {} every {:?}",
            target.pid, interval
        );
        self.task = Some(runtime.spawn(async move {
            run_poll_loop(
                source,
                interval,
                target,
                on_status,
                keep_polling,
                &state,
                cancel_rx,
            )
            .await;
            if let Ok(mut s) = state.lock() {
                *s = PollerState::Stopped;
            }
        }));

        Ok(())
    }

    /// Stop polling.
    ///
    /// Waits for a callback already in progress; none starts after this returns.
    pub fn cancel(&self) {
        if let Ok(mut state) = self.state.lock() {
            *state = PollerState::Stopped;
        }
        self.cancel_tx.send_replace(true);
    }

    /// Whether the background task has exited
    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, |t| t.is_finished())
    }
}

impl Drop for StatusPoller {
    fn drop(&mut self) {
        self.cancel();
    }
}

async fn run_poll_loop<F>(
    source: Arc<dyn StatusSource>,
    period: Duration,
    target: ProcessHandle,
    on_status: StatusCallback,
    keep_polling: F,
    state: &Mutex<PollerState>,
    mut cancel_rx: watch::Receiver<bool>,
) where
    F: Fn() -> bool + Send + Sync + 'static,
{
    // First tick one full period after start, like a plain ticker
    let now = Instant::now();
    let Some(first) = now.checked_add(period) else {
        warn!("Poll interval {:?} is out of range, polling disabled", period);
        return;
    };
    let mut ticker = interval_at(first, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel_rx.changed() => break,
            _ = ticker.tick() => {
                if *cancel_rx.borrow() {
                    break;
                }
                if !keep_polling() {
                    debug!("PID {} no longer supervised, polling ends", target.pid);
                    break;
                }
                match source.query(&target).await {
                    Ok(snapshot) => {
                        // Checked under the lock cancel() takes
                        let Ok(current) = state.lock() else {
                            break;
                        };
                        if *current != PollerState::Polling {
                            break;
                        }
                        on_status(snapshot);
                    }
                    Err(e) => debug!("Status query for PID {} failed, skipping tick: {:#}", target.pid, e),
                }
            }
        }
    }

    debug!("Status polling stopped for PID {}", target.pid);
}
