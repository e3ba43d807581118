//! Periodic location reporting for patient devices.
//!
//! An activation requests location permission, resolves the device identifier
//! in the background, then samples and submits the position immediately and
//! every `interval` until the returned [`ReporterHandle`] is deactivated or
//! dropped. Ticks are best effort: failures are logged and the next tick
//! carries on. A tick that outlives the interval is abandoned as failed.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, Duration, Instant, MissedTickBehavior};

use crate::api::SenseSafeApi;
use crate::error::SResult;
use crate::guard;
use crate::live_status::{current_timestamp, LiveStatus};
use crate::model::{GeoSample, LocationSubmission, RecordType};
use crate::platform::{Accuracy, PermissionStatus, Platform};
use crate::session::SessionState;

pub const DEFAULT_REPORT_INTERVAL: Duration = Duration::from_secs(60);

/// Reporter state machine states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReporterState {
    /// Not running: never started, or stopped after permission was denied
    Idle,
    RequestingPermission,
    Sampling,
    /// Deactivated, no further ticks
    Terminated,
}

#[derive(Debug, Clone)]
pub struct ReporterConfig {
    pub interval: Duration,
    /// Where to write the [`LiveStatus`] snapshot after each tick
    pub status_path: Option<PathBuf>,
}

impl Default for ReporterConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_REPORT_INTERVAL,
            status_path: None,
        }
    }
}

#[derive(Debug)]
enum TickOutcome {
    Submitted(GeoSample),
    /// Device identifier not resolved yet
    Skipped(GeoSample),
    Failed(String),
}

pub struct LocationReporter {
    api: Arc<dyn SenseSafeApi>,
    platform: Platform,
    config: ReporterConfig,
}

impl LocationReporter {
    pub fn new(api: Arc<dyn SenseSafeApi>, platform: Platform, config: ReporterConfig) -> Self {
        Self {
            api,
            platform,
            config,
        }
    }

    /// Start reporting for a patient session.
    ///
    /// # Errors
    ///
    /// Returns `NotAuthenticated` or `WrongRole` unless the session is a patient's.
    pub fn activate(&self, session: &SessionState) -> SResult<ReporterHandle> {
        let payload = guard::require_role(session, RecordType::Patient)?;
        log::info!(
            "[reporter] activating for patient {} every {}s",
            payload.user_id(),
            self.config.interval.as_secs()
        );

        let (cancel_tx, cancel_rx) = watch::channel(false);
        let (state_tx, state_rx) = watch::channel(ReporterState::RequestingPermission);
        let (device_tx, device_rx) = watch::channel::<Option<String>>(None);
        let status = Arc::new(Mutex::new(LiveStatus::new()));

        let identity = self.platform.identity.clone();
        let identity_status = status.clone();
        let identity_task = tokio::spawn(async move {
            match identity.device_id().await {
                Some(id) => {
                    log::info!("[reporter] device identifier resolved: {id}");
                    if let Ok(mut status) = identity_status.lock() {
                        status.device_id = Some(id.clone());
                    }
                    device_tx.send_replace(Some(id));
                }
                None => {
                    log::warn!("[reporter] device identifier unavailable, samples will not be submitted");
                }
            }
        });

        let worker = Worker {
            api: self.api.clone(),
            platform: self.platform.clone(),
            interval: self.config.interval,
            status_path: self.config.status_path.clone(),
            status: status.clone(),
            state: state_tx,
            device_id: device_rx,
        };
        let sampling_task = tokio::spawn(worker.run(cancel_rx));

        Ok(ReporterHandle {
            cancel: cancel_tx,
            state: state_rx,
            status,
            sampling_task: Some(sampling_task),
            identity_task,
        })
    }
}

/// Owns one reporter activation. Dropping it cancels the schedule.
pub struct ReporterHandle {
    cancel: watch::Sender<bool>,
    state: watch::Receiver<ReporterState>,
    status: Arc<Mutex<LiveStatus>>,
    sampling_task: Option<JoinHandle<()>>,
    identity_task: JoinHandle<()>,
}

impl ReporterHandle {
    pub fn state(&self) -> ReporterState {
        *self.state.borrow()
    }

    pub fn status(&self) -> LiveStatus {
        self.status
            .lock()
            .map(|status| status.clone())
            .unwrap_or_default()
    }

    /// Resolves once the reporter is no longer sampling (permission denied or deactivated).
    pub async fn stopped(&self) -> ReporterState {
        let mut rx = self.state.clone();
        let stopped = rx
            .wait_for(|s| matches!(s, ReporterState::Idle | ReporterState::Terminated))
            .await
            .map(|s| *s);
        stopped.unwrap_or_else(|_| *self.state.borrow())
    }

    /// Cancel the schedule and wait for the sampling task to wind down.
    /// A tick in flight is dropped and its result discarded.
    pub async fn deactivate(mut self) -> LiveStatus {
        self.cancel.send_replace(true);
        self.identity_task.abort();
        if let Some(task) = self.sampling_task.take() {
            if let Err(e) = task.await {
                log::error!("[reporter] sampling task ended abnormally: {e}");
            }
        }
        log::info!("[reporter] deactivated");
        self.status()
    }
}

impl Drop for ReporterHandle {
    fn drop(&mut self) {
        self.cancel.send_replace(true);
        self.identity_task.abort();
        if let Some(task) = self.sampling_task.take() {
            task.abort();
        }
    }
}

struct Worker {
    api: Arc<dyn SenseSafeApi>,
    platform: Platform,
    interval: Duration,
    status_path: Option<PathBuf>,
    status: Arc<Mutex<LiveStatus>>,
    state: watch::Sender<ReporterState>,
    device_id: watch::Receiver<Option<String>>,
}

/// Completes once cancellation is requested or the handle is gone.
async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    let _ = cancel.wait_for(|cancelled| *cancelled).await;
}

impl Worker {
    async fn run(self, mut cancel: watch::Receiver<bool>) {
        let started = Instant::now();
        self.set_state(ReporterState::RequestingPermission);

        let permission = tokio::select! {
            biased;
            _ = cancelled(&mut cancel) => {
                self.set_state(ReporterState::Terminated);
                return;
            }
            status = self.platform.permission.request_foreground_location() => status,
        };

        if permission != PermissionStatus::Granted {
            log::warn!("[reporter] location permission denied");
            self.platform.notifier.alert(
                "Permission required",
                "Location access is needed to share your location. Enable it in the system settings and open this screen again.",
            );
            self.set_state(ReporterState::Idle);
            return;
        }

        self.set_state(ReporterState::Sampling);
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancelled(&mut cancel) => break,
                _ = ticker.tick() => {}
            }

            let outcome = tokio::select! {
                biased;
                _ = cancelled(&mut cancel) => break,
                outcome = timeout(self.interval, self.tick()) => match outcome {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        log::warn!("[reporter] tick still running after {}s, abandoned", self.interval.as_secs());
                        TickOutcome::Failed("position fix timed out".to_string())
                    }
                },
            };
            self.record(outcome, started);
        }

        self.set_state(ReporterState::Terminated);
    }

    async fn tick(&self) -> TickOutcome {
        let sample = match self.platform.location.current_position(Accuracy::High).await {
            Ok(sample) => sample,
            Err(e) => {
                log::warn!("[reporter] could not get a position fix: {e}");
                return TickOutcome::Failed(e.to_string());
            }
        };

        let device_id = self.device_id.borrow().clone();
        let Some(serial_number) = device_id else {
            log::debug!("[reporter] device identifier not ready, skipping submission");
            return TickOutcome::Skipped(sample);
        };

        let submission = LocationSubmission {
            latitude: sample.latitude,
            longitude: sample.longitude,
            serial_number,
        };
        match self.api.submit_location(&submission).await {
            Ok(()) => {
                log::info!(
                    "[reporter] submitted {:.5}, {:.5}",
                    sample.latitude,
                    sample.longitude
                );
                TickOutcome::Submitted(sample)
            }
            Err(e) => {
                log::warn!("[reporter] location submission failed: {e}");
                TickOutcome::Failed(e.to_string())
            }
        }
    }

    fn record(&self, outcome: TickOutcome, started: Instant) {
        let snapshot = match self.status.lock() {
            Ok(mut status) => {
                status.ticks += 1;
                match &outcome {
                    TickOutcome::Submitted(sample) => {
                        status.submitted += 1;
                        status.last_error = None;
                        status.record_sample(sample);
                    }
                    TickOutcome::Skipped(sample) => {
                        status.skipped += 1;
                        status.record_sample(sample);
                    }
                    TickOutcome::Failed(error) => {
                        status.failed += 1;
                        status.last_error = Some(error.clone());
                    }
                }
                status.timestamp = current_timestamp();
                status.uptime_seconds = started.elapsed().as_secs();
                status.clone()
            }
            Err(_) => return,
        };

        if let Some(path) = &self.status_path {
            if let Err(e) = snapshot.save(path) {
                log::warn!("[reporter] failed to write status to {}: {e}", path.display());
            }
        }
    }

    fn set_state(&self, state: ReporterState) {
        self.state.send_replace(state);
        if let Ok(mut status) = self.status.lock() {
            status.state = state;
        }
    }
}
