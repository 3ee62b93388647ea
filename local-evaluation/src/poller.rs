use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures::FutureExt;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::api::errors::FlagError;

/// How long `stop` waits for an in-flight refresh before aborting it.
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

struct PollerHandle {
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

/// Runs a refresh closure immediately and then on a fixed period, on its own task.
///
/// A failing or panicking refresh is logged and the schedule carries on.
/// Cancellation is only observed between ticks, so a refresh that has
/// started is allowed to finish.
pub struct LocalEvaluationPoller {
    poll_interval: Duration,
    state: Mutex<Option<PollerHandle>>,
}

impl LocalEvaluationPoller {
    pub fn new(poll_interval: Duration) -> Self {
        let poll_interval = if poll_interval.is_zero() {
            Duration::from_secs(1)
        } else {
            poll_interval
        };
        LocalEvaluationPoller {
            poll_interval,
            state: Mutex::new(None),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().is_some()
    }

    /// Starts polling. Returns `false` without doing anything if the poller is
    /// already running or there is no tokio runtime to run it on.
    pub fn start<F, Fut>(&self, refresh: F) -> bool
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), FlagError>> + Send + 'static,
    {
        let mut state = self.state.lock();
        if state.is_some() {
            info!("Local evaluation poller is already running");
            return false;
        }

        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(e) => {
                error!("Can't start local evaluation poller outside a tokio runtime: {}", e);
                return false;
            }
        };

        let shutdown = CancellationToken::new();
        let cancelled = shutdown.clone();
        let poll_interval = self.poll_interval;

        let task = runtime.spawn(async move {
            let mut ticker = tokio::time::interval(poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = cancelled.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                match AssertUnwindSafe(async { refresh().await })
                    .catch_unwind()
                    .await
                {
                    Ok(Ok(())) => debug!("Refreshed flag definitions"),
                    Ok(Err(e)) => warn!("Failed to refresh flag definitions: {}", e),
                    Err(_) => error!("Flag definitions refresh panicked"),
                }
            }

            info!("Local evaluation poller stopped");
        });

        info!(
            "Local evaluation poller started, polling every {:?}",
            poll_interval
        );
        *state = Some(PollerHandle { shutdown, task });
        true
    }

    /// Stops polling, waiting up to [`SHUTDOWN_TIMEOUT`] for an in-flight refresh.
    pub async fn stop(&self) {
        let Some(handle) = self.state.lock().take() else {
            debug!("Local evaluation poller is not running");
            return;
        };

        handle.shutdown.cancel();
        let mut task = handle.task;
        match tokio::time::timeout(SHUTDOWN_TIMEOUT, &mut task).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Local evaluation poller task failed: {}", e),
            Err(_) => {
                warn!("Local evaluation poller did not stop in time, aborting it");
                task.abort();
            }
        }
    }
}

impl Drop for LocalEvaluationPoller {
    fn drop(&mut self) {
        if let Some(handle) = self.state.get_mut().take() {
            handle.shutdown.cancel();
        }
    }
}
