use serde::{Deserialize, Serialize};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use noisewatch_foundation::{CancellationToken, SessionError, SessionState, StateTracker};
use noisewatch_level::{constants, LevelEstimator, ThresholdAlert};

use crate::capture::CaptureConfig;
use crate::source::{AudioBackend, AudioSource};

/// Session parameters. Defaults are the reference behavior: 75.0 dB
/// threshold, one cycle per 50 ms.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub capture: CaptureConfig,
    pub threshold_db: f32,
    pub cadence: Duration,
    pub max_samples_per_read: usize,
    /// Consecutive transient read failures tolerated before the session
    /// gives up. Escalation is an extension over the reference behavior,
    /// which retried forever.
    pub max_consecutive_read_errors: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            capture: CaptureConfig::default(),
            threshold_db: constants::THRESHOLD_DB,
            cadence: Duration::from_millis(constants::CADENCE_MS),
            max_samples_per_read: constants::READ_CHUNK_SAMPLES,
            max_consecutive_read_errors: 20,
        }
    }
}

/// What the reading sink receives. Readings arrive in production order;
/// a cycle that reads nothing publishes nothing.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Reading { db: f32, alert: bool },
    Error(SessionError),
}

#[derive(Debug, Default)]
pub struct SessionStats {
    pub frames_read: AtomicU64,
    pub readings_published: AtomicU64,
    pub empty_cycles: AtomicU64,
    pub read_errors: AtomicU64,
    pub alerts_raised: AtomicU64,
}

/// A running sampling session and the caller's handle to it.
///
/// The worker thread owns the audio source for the whole run; the device
/// is held exactly while the state is `Starting` or `Running` and released
/// on every exit path. `stop` blocks until the device is released;
/// `cancel` returns immediately and the loop notices within one cadence
/// interval.
pub struct SamplingSession {
    cancel: CancellationToken,
    states: StateTracker,
    stats: Arc<SessionStats>,
    worker: Option<JoinHandle<()>>,
}

impl SamplingSession {
    /// Start a new session.
    ///
    /// `permission_granted` is the externally-supplied permission gate:
    /// when false the device is never touched, the sink receives one
    /// `PermissionDenied` event, and this returns the same error.
    ///
    /// The caller is responsible for stopping any previous session first;
    /// a device still held by one surfaces here as `InitializationFailed`.
    pub fn start(
        backend: Box<dyn AudioBackend>,
        config: SessionConfig,
        permission_granted: bool,
        events: mpsc::Sender<SessionEvent>,
    ) -> Result<Self, SessionError> {
        if !permission_granted {
            let err = SessionError::PermissionDenied;
            tracing::error!("refusing to start sampling: {}", err);
            let _ = events.try_send(SessionEvent::Error(err.clone()));
            return Err(err);
        }

        let cancel = CancellationToken::new();
        let states = StateTracker::new();
        let stats = Arc::new(SessionStats::default());

        let worker = Worker {
            backend,
            config,
            events,
            cancel: cancel.clone(),
            states: states.clone(),
            stats: Arc::clone(&stats),
        };

        let handle = thread::Builder::new()
            .name("sampling-session".to_string())
            .spawn(move || worker.run())
            .map_err(|e| {
                SessionError::Unexpected(format!("failed to spawn session worker: {}", e))
            })?;

        Ok(Self {
            cancel,
            states,
            stats,
            worker: Some(handle),
        })
    }

    /// Request cancellation without waiting. The loop stops within one
    /// cadence interval plus one read latency and then releases the device.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Cancel and wait for the worker to finish. The device is released
    /// when this returns. No-op on a session that already stopped.
    pub fn stop(&mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }

    pub fn state(&self) -> SessionState {
        self.states.current()
    }

    /// Observe every state transition in order.
    pub fn subscribe_states(&self) -> crossbeam_channel::Receiver<SessionState> {
        self.states.subscribe()
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    pub fn is_finished(&self) -> bool {
        self.worker
            .as_ref()
            .map(|handle| handle.is_finished())
            .unwrap_or(true)
    }
}

impl Drop for SamplingSession {
    fn drop(&mut self) {
        // detach but make sure the worker winds down and releases the device
        self.cancel.cancel();
    }
}

enum LoopOutcome {
    Cancelled,
    ConsumerGone,
    Fatal(SessionError),
}

struct Worker {
    backend: Box<dyn AudioBackend>,
    config: SessionConfig,
    events: mpsc::Sender<SessionEvent>,
    cancel: CancellationToken,
    states: StateTracker,
    stats: Arc<SessionStats>,
}

impl Worker {
    fn run(mut self) {
        if self.states.transition(SessionState::Starting).is_err() {
            return;
        }

        let mut source = match self.backend.open(&self.config.capture) {
            Ok(source) => source,
            Err(e) => {
                let err = e.into_init_error();
                tracing::error!("failed to open audio source: {}", err);
                self.publish_error(err);
                let _ = self.states.transition(SessionState::Failed);
                return;
            }
        };

        // The device is held from here on. Every path below funnels into
        // the single cleanup that closes the source before reporting.
        if self.states.transition(SessionState::Running).is_err() {
            source.close();
            return;
        }
        tracing::info!(
            threshold_db = self.config.threshold_db,
            cadence_ms = self.config.cadence.as_millis() as u64,
            "sampling started"
        );

        let outcome = match catch_unwind(AssertUnwindSafe(|| self.sample_loop(source.as_mut()))) {
            Ok(outcome) => outcome,
            Err(panic) => LoopOutcome::Fatal(SessionError::Unexpected(panic_message(&*panic))),
        };

        let _ = self.states.transition(SessionState::Stopping);
        source.close();

        match outcome {
            LoopOutcome::Cancelled | LoopOutcome::ConsumerGone => {
                tracing::info!("sampling stopped");
                let _ = self.states.transition(SessionState::Idle);
            }
            LoopOutcome::Fatal(err) => {
                tracing::error!("sampling failed: {}", err);
                self.publish_error(err);
                let _ = self.states.transition(SessionState::Failed);
            }
        }
    }

    fn sample_loop(&mut self, source: &mut dyn AudioSource) -> LoopOutcome {
        let estimator = LevelEstimator::new();
        let mut alert = ThresholdAlert::new(self.config.threshold_db);
        let mut consecutive_errors = 0u32;

        loop {
            if self.cancel.is_cancelled() {
                return LoopOutcome::Cancelled;
            }

            match source.read_frame(self.config.max_samples_per_read) {
                Ok(Some(frame)) => {
                    consecutive_errors = 0;
                    self.stats.frames_read.fetch_add(1, Ordering::Relaxed);

                    let db = estimator.estimate(&frame.samples);
                    if alert.update(db) {
                        if alert.is_active() {
                            self.stats.alerts_raised.fetch_add(1, Ordering::Relaxed);
                            tracing::warn!(
                                db,
                                threshold_db = alert.threshold_db(),
                                "noise level crossed threshold"
                            );
                        } else {
                            tracing::info!(db, "noise level back under threshold");
                        }
                    }

                    let event = SessionEvent::Reading {
                        db,
                        alert: alert.is_active(),
                    };
                    if let Err(outcome) = self.publish(event) {
                        return outcome;
                    }
                    self.stats.readings_published.fetch_add(1, Ordering::Relaxed);
                }
                Ok(None) => {
                    self.stats.empty_cycles.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) if !e.is_fatal() => {
                    consecutive_errors += 1;
                    self.stats.read_errors.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(
                        error = %e,
                        consecutive = consecutive_errors,
                        "audio read failed; skipping cycle"
                    );
                    if consecutive_errors >= self.config.max_consecutive_read_errors {
                        return LoopOutcome::Fatal(SessionError::DeviceReadFailed(format!(
                            "{} consecutive read failures, last: {}",
                            consecutive_errors, e
                        )));
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "unrecoverable audio error");
                    return LoopOutcome::Fatal(e.into_read_error());
                }
            }

            // the cadence sleep doubles as the post-read cancellation check
            if self.cancel.wait_timeout(self.config.cadence) {
                return LoopOutcome::Cancelled;
            }
        }
    }

    /// Deliver a reading without dropping or reordering. A full channel is
    /// backpressure: retry until there is room, but stay cancellable so a
    /// stalled consumer cannot pin the device.
    fn publish(&self, event: SessionEvent) -> Result<(), LoopOutcome> {
        let mut event = event;
        loop {
            match self.events.try_send(event) {
                Ok(()) => return Ok(()),
                Err(TrySendError::Closed(_)) => {
                    tracing::debug!("reading receiver dropped; stopping session");
                    return Err(LoopOutcome::ConsumerGone);
                }
                Err(TrySendError::Full(returned)) => {
                    event = returned;
                    if self.cancel.wait_timeout(Duration::from_millis(1)) {
                        return Err(LoopOutcome::Cancelled);
                    }
                }
            }
        }
    }

    /// Best-effort delivery of a terminal error. Bounded so session
    /// teardown can never hang on a sink that stopped draining.
    fn publish_error(&self, err: SessionError) {
        let mut event = SessionEvent::Error(err);
        let deadline = Instant::now() + Duration::from_secs(2);
        loop {
            match self.events.try_send(event) {
                Ok(()) | Err(TrySendError::Closed(_)) => return,
                Err(TrySendError::Full(returned)) => {
                    if Instant::now() >= deadline {
                        tracing::warn!("sink not draining; terminal error event dropped");
                        return;
                    }
                    event = returned;
                    thread::sleep(Duration::from_millis(1));
                }
            }
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "sampling loop panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_reference_parameters() {
        let config = SessionConfig::default();
        assert_eq!(config.capture.sample_rate_hz, 44_100);
        assert_eq!(config.capture.channels, 1);
        assert_eq!(config.capture.buffer_safety_factor, 2);
        assert_eq!(config.threshold_db, 75.0);
        assert_eq!(config.cadence, Duration::from_millis(50));
    }
}
