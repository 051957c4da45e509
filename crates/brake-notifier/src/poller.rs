// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Background polling of the remote config API.
//!
//! A [`ConfigPoller`] moves through three states: idle until the first [`ConfigPoller::poll`],
//! running while its background task is alive, and stopped after
//! [`ConfigPoller::stop_polling`]. Polling again after a stop starts a fresh task with a new
//! cancellation token.
//!
//! `poll` spawns the loop and then performs one fetch inline, so the caller returns with the
//! first snapshot applied (or the failure logged). The loop exists as soon as the state reads
//! running, even if the caller abandons the `poll` future mid-fetch. Every successful fetch swaps the snapshot,
//! re-arms the timer with the snapshot's interval, and invokes the registered callback. A failed
//! fetch is logged and changes nothing: the previous snapshot and schedule stay in place.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::http::{ConfigClient, FetchError};
use crate::remote_config::RemoteConfig;

/// Invoked with the store after every successful fetch.
pub type ConfigCallback = Arc<dyn Fn(&RemoteConfig) + Send + Sync>;

/// Lifecycle of a [`ConfigPoller`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerState {
    Idle,
    Running,
    Stopped,
}

struct PollerShared {
    store: Arc<RemoteConfig>,
    client: ConfigClient,
}

impl PollerShared {
    /// Fetches a snapshot and, on success, swaps it in, reschedules, and notifies.
    async fn fetch_and_apply(
        &self,
        callback: Option<&ConfigCallback>,
        schedule: Option<&watch::Sender<Duration>>,
    ) -> Result<(), FetchError> {
        let url = self.store.config_route(self.store.base_url());
        let snapshot = self.client.fetch(&url).await?;

        self.store.replace(snapshot);
        if let Some(schedule) = schedule {
            schedule.send_replace(self.store.interval());
        }
        if let Some(callback) = callback {
            callback(&self.store);
        }
        Ok(())
    }

    async fn run(
        self: Arc<Self>,
        callback: ConfigCallback,
        schedule: Arc<watch::Sender<Duration>>,
        mut schedule_rx: watch::Receiver<Duration>,
        cancel: CancellationToken,
    ) {
        let mut ticker = new_ticker(*schedule_rx.borrow_and_update());
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("Remote config poller shutting down");
                    break;
                }
                changed = schedule_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let period = *schedule_rx.borrow_and_update();
                    debug!("Remote config poll interval set to {period:?}");
                    ticker = new_ticker(period);
                }
                _ = ticker.tick() => {
                    if cancel.is_cancelled() {
                        break;
                    }
                    if let Err(err) = self.fetch_and_apply(Some(&callback), Some(&schedule)).await {
                        warn!("fetchConfig failed: {err}");
                    }
                }
            }
        }
    }
}

/// Longest timer period armed, whatever interval the server asks for.
const MAX_TICK_PERIOD: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// First tick fires one full period from now. Periods above [`MAX_TICK_PERIOD`] are capped.
fn new_ticker(period: Duration) -> Interval {
    let period = period.min(MAX_TICK_PERIOD);
    let mut ticker = time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

struct Run {
    state: PollerState,
    callback: Option<ConfigCallback>,
    cancel: Option<CancellationToken>,
    schedule: Option<Arc<watch::Sender<Duration>>>,
    task: Option<JoinHandle<()>>,
}

/// Periodically fetches remote config into a [`RemoteConfig`] store.
pub struct ConfigPoller {
    shared: Arc<PollerShared>,
    run: Mutex<Run>,
}

impl fmt::Debug for ConfigPoller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigPoller")
            .field("state", &self.state())
            .field("base_url", &self.shared.store.base_url())
            .finish()
    }
}

impl ConfigPoller {
    /// Creates an idle poller that applies fetched snapshots to `store`.
    pub fn new(store: Arc<RemoteConfig>) -> Result<Self, FetchError> {
        let client = ConfigClient::new(store.options().remote_config_timeout)?;
        Ok(Self {
            shared: Arc::new(PollerShared { store, client }),
            run: Mutex::new(Run {
                state: PollerState::Idle,
                callback: None,
                cancel: None,
                schedule: None,
                task: None,
            }),
        })
    }

    /// Store that fetched snapshots are applied to.
    pub fn remote_config(&self) -> &Arc<RemoteConfig> {
        &self.shared.store
    }

    /// Current lifecycle state.
    pub fn state(&self) -> PollerState {
        self.lock_run().state
    }

    fn lock_run(&self) -> MutexGuard<'_, Run> {
        self.run.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Starts polling unless already running.
    ///
    /// Spawns the background loop on the current schedule, then performs one fetch before
    /// returning. Its error is logged and returned; the loop keeps running either way.
    pub async fn poll<F>(&self, callback: F) -> Result<(), FetchError>
    where
        F: Fn(&RemoteConfig) + Send + Sync + 'static,
    {
        let callback: ConfigCallback = Arc::new(callback);
        let schedule = {
            let mut run = self.lock_run();
            if run.state == PollerState::Running {
                debug!("Remote config poller already running");
                return Ok(());
            }
            let cancel = CancellationToken::new();
            let (schedule, schedule_rx) = watch::channel(self.shared.store.interval());
            let schedule = Arc::new(schedule);
            debug!(
                "Starting remote config poller with interval {:?}",
                *schedule_rx.borrow()
            );

            run.task = Some(tokio::spawn(Arc::clone(&self.shared).run(
                Arc::clone(&callback),
                Arc::clone(&schedule),
                schedule_rx,
                cancel.clone(),
            )));
            run.state = PollerState::Running;
            run.callback = Some(Arc::clone(&callback));
            run.cancel = Some(cancel);
            run.schedule = Some(Arc::clone(&schedule));
            schedule
        };

        let result = self
            .shared
            .fetch_and_apply(Some(&callback), Some(&schedule))
            .await;
        if let Err(err) = &result {
            warn!("fetchConfig failed: {err}");
        }
        result
    }

    /// Performs one fetch-and-apply outside the timer, using the callback registered by `poll`.
    pub async fn update(&self) -> Result<(), FetchError> {
        let (callback, schedule) = {
            let run = self.lock_run();
            (run.callback.clone(), run.schedule.clone())
        };
        self.shared
            .fetch_and_apply(callback.as_ref(), schedule.as_deref())
            .await
    }

    /// Disarms the timer and signals the background loop to exit.
    ///
    /// No fetch starts after this returns; one already in flight may still complete. Calling
    /// it on a poller that is not running does nothing.
    pub fn stop_polling(&self) {
        let mut run = self.lock_run();
        if run.state != PollerState::Running {
            return;
        }
        run.state = PollerState::Stopped;
        run.schedule = None;
        if let Some(cancel) = run.cancel.take() {
            cancel.cancel();
        }
        debug!("Remote config polling stopped");
    }

    /// Stops polling and waits for the background task to exit.
    pub async fn shutdown(&self) {
        self.stop_polling();
        let task = self.lock_run().task.take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}

impl Drop for ConfigPoller {
    fn drop(&mut self) {
        if let Some(cancel) = self.lock_run().cancel.take() {
            cancel.cancel();
        }
    }
}
