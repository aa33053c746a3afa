use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::fault::{Fault, FaultClassifier, RecoveryAction};
use super::state::{RetryCounts, SessionEvent, SessionSnapshot, SessionStatus};
use super::watchdog::Watchdog;
use crate::config::PlayerConfig;
use crate::engine::{AdaptiveSession, EngineEvent, EngineEventReceiver, EngineFactory};
use crate::error::PlayerError;
use crate::request::{HLS_MIME_TYPE, PlaybackRequest, SourceKind};
use crate::sink::{MediaSink, MediaSource, SinkEvent};

const SESSION_EVENT_CAPACITY: usize = 64;

struct SessionState {
    status: SessionStatus,
    active_request: Option<PlaybackRequest>,
    watchdog: Watchdog,
    retry_counts: RetryCounts,
    engine: Option<Box<dyn AdaptiveSession>>,
    sink: Option<Arc<dyn MediaSink>>,
    /// Bumped on every start and stop; the driver drops work for older values.
    generation: u64,
    cancel: Option<CancellationToken>,
    driver: Option<JoinHandle<()>>,
}

struct Shared {
    classifier: FaultClassifier,
    state: Mutex<SessionState>,
    status_tx: watch::Sender<SessionStatus>,
    events: broadcast::Sender<SessionEvent>,
}

/// Owns the lifecycle of one playback attempt at a time.
///
/// Each accepted request gets a driver task that reacts to sink signals,
/// engine events and the dead-stream watchdog until the request is replaced
/// or stopped. Status changes are published on a [`watch`] channel; other
/// notifications on a broadcast channel from [`SessionController::subscribe`].
pub struct SessionController {
    config: Arc<PlayerConfig>,
    engines: Arc<dyn EngineFactory>,
    shared: Arc<Shared>,
}

impl SessionController {
    pub fn new(config: Arc<PlayerConfig>, engines: Arc<dyn EngineFactory>) -> Self {
        let (status_tx, _) = watch::channel(SessionStatus::Idle);
        let (events, _) = broadcast::channel(SESSION_EVENT_CAPACITY);
        let shared = Arc::new(Shared {
            classifier: FaultClassifier::new(config.media_recovery_limit),
            state: Mutex::new(SessionState {
                status: SessionStatus::Idle,
                active_request: None,
                watchdog: Watchdog::new(config.watchdog_timeout),
                retry_counts: RetryCounts::default(),
                engine: None,
                sink: None,
                generation: 0,
                cancel: None,
                driver: None,
            }),
            status_tx,
            events,
        });
        Self {
            config,
            engines,
            shared,
        }
    }

    pub fn config(&self) -> &PlayerConfig {
        &self.config
    }

    /// Bind `request` to `sink`, replacing whatever was playing.
    ///
    /// Must be called from within a tokio runtime. A blank URL is rejected
    /// and leaves the current session untouched.
    pub fn start_session(
        &self,
        request: PlaybackRequest,
        sink: Arc<dyn MediaSink>,
    ) -> Result<(), PlayerError> {
        if request.url().trim().is_empty() {
            return Err(PlayerError::invalid_request("stream url is empty"));
        }

        // Teardown and attach share one critical section.
        let mut state = self.shared.state.lock();
        self.shared.teardown(&mut state);

        // Subscribe before anything is attached so no early signal is missed.
        let sink_rx = sink.subscribe();
        let token = CancellationToken::new();

        state.generation += 1;
        let generation = state.generation;
        state.active_request = Some(request.clone());
        state.sink = Some(Arc::clone(&sink));
        state.watchdog.arm(Instant::now());
        self.shared.transition(&mut state, SessionStatus::Buffering);

        info!(
            url = %request.url(),
            channel = %request.display_name(),
            generation,
            "Starting playback session"
        );

        let url = request.url().to_string();
        let engine_rx = match request.source_kind() {
            SourceKind::Adaptive if self.engines.is_supported() => {
                let mut engine = self.engines.create();
                let rx = engine.attach(&url, Arc::clone(&sink));
                state.engine = Some(engine);
                debug!(url = %url, "Attached adaptive engine");
                Some(rx)
            }
            SourceKind::Adaptive if sink.can_play_type(HLS_MIME_TYPE) => {
                debug!(url = %url, "Using native HLS playback");
                sink.set_source(MediaSource::Native(url));
                None
            }
            SourceKind::Adaptive => {
                warn!(url = %url, "No adaptive playback available for this sink");
                None
            }
            SourceKind::Progressive => {
                sink.set_source(MediaSource::Progressive(url));
                None
            }
        };

        state.cancel = Some(token.clone());
        state.driver = Some(tokio::spawn(Arc::clone(&self.shared).drive(
            generation, token, sink, sink_rx, engine_rx,
        )));
        Ok(())
    }

    /// Tear down the current session. Calling this with nothing active,
    /// or repeatedly, has no effect.
    pub fn stop_session(&self) {
        let mut state = self.shared.state.lock();
        if self.shared.teardown(&mut state) {
            self.shared.transition(&mut state, SessionStatus::Idle);
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.shared.state.lock().status
    }

    /// Receiver that always holds the latest status.
    pub fn watch_status(&self) -> watch::Receiver<SessionStatus> {
        self.shared.status_tx.subscribe()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.shared.events.subscribe()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let state = self.shared.state.lock();
        SessionSnapshot {
            status: state.status,
            request: state.active_request.clone(),
            retry_counts: state.retry_counts,
            watchdog_armed: state.watchdog.is_armed(),
            adaptive_attached: state.engine.is_some(),
        }
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.stop_session();
    }
}

async fn next_engine_event(rx: &mut Option<EngineEventReceiver>) -> Option<EngineEvent> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

impl Shared {
    /// Release everything bound to the current session. Returns `false` when
    /// nothing was active. Caller holds the state lock.
    fn teardown(&self, state: &mut SessionState) -> bool {
        if state.active_request.is_none() && state.engine.is_none() && state.driver.is_none() {
            return false;
        }

        state.generation += 1;
        if let Some(token) = state.cancel.take() {
            token.cancel();
        }
        if let Some(driver) = state.driver.take() {
            driver.abort();
        }
        state.watchdog.cancel();
        if let Some(mut engine) = state.engine.take() {
            engine.destroy();
        }
        if let Some(sink) = state.sink.take() {
            sink.clear_source();
        }
        if let Some(request) = state.active_request.take() {
            debug!(url = %request.url(), "Stopped playback session");
        }
        state.retry_counts = RetryCounts::default();
        true
    }

    /// Publish a status change. Caller holds the state lock.
    fn transition(&self, state: &mut SessionState, to: SessionStatus) {
        let from = state.status;
        if from == to {
            return;
        }
        state.status = to;

        let url = state
            .active_request
            .as_ref()
            .map(|r| r.url())
            .unwrap_or_default();
        match to.failure() {
            Some(reason) => error!(url = %url, %from, "{reason}"),
            None => debug!(url = %url, %from, %to, "Session status changed"),
        }

        self.status_tx.send_replace(to);
        let _ = self.events.send(SessionEvent::StatusChanged { from, to });
    }

    async fn drive(
        self: Arc<Self>,
        generation: u64,
        token: CancellationToken,
        sink: Arc<dyn MediaSink>,
        mut sink_rx: broadcast::Receiver<SinkEvent>,
        mut engine_rx: Option<EngineEventReceiver>,
    ) {
        let mut sink_open = true;
        loop {
            let deadline = {
                let state = self.state.lock();
                if state.generation != generation {
                    break;
                }
                state.watchdog.deadline()
            };

            tokio::select! {
                biased;

                _ = token.cancelled() => break,

                _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.on_watchdog(generation);
                }

                event = sink_rx.recv(), if sink_open => match event {
                    Ok(event) => self.on_sink_event(generation, event),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Session lagged behind sink events");
                    }
                    Err(RecvError::Closed) => sink_open = false,
                },

                event = next_engine_event(&mut engine_rx), if engine_rx.is_some() => match event {
                    Some(event) => self.on_engine_event(generation, &sink, event),
                    None => engine_rx = None,
                },
            }
        }
        trace!(generation, "Session driver exited");
    }

    fn on_watchdog(&self, generation: u64) {
        let mut state = self.state.lock();
        if state.generation != generation || !state.watchdog.expire(Instant::now()) {
            return;
        }
        if state.status == SessionStatus::Buffering {
            let mut counts = state.retry_counts;
            let action = self.classifier.on_fault(Fault::Timeout, &mut counts);
            self.apply(&mut state, action);
        }
    }

    fn on_sink_event(&self, generation: u64, event: SinkEvent) {
        let mut state = self.state.lock();
        if state.generation != generation {
            return;
        }
        match event {
            SinkEvent::Playing => {
                state.watchdog.cancel();
                self.transition(&mut state, SessionStatus::Playing);
            }
            SinkEvent::Waiting => {
                if state.status == SessionStatus::Playing {
                    self.transition(&mut state, SessionStatus::Buffering);
                }
            }
            SinkEvent::Error(message) => {
                if state.engine.is_some() {
                    debug!(error = %message, "Sink error left to the adaptive engine");
                    return;
                }
                warn!(error = %message, "Media sink reported an error");
                let mut counts = state.retry_counts;
                let action = self
                    .classifier
                    .on_fault(Fault::NativeSinkFailure, &mut counts);
                self.apply(&mut state, action);
            }
            SinkEvent::Ended => {
                debug!("Media ended");
                let _ = self.events.send(SessionEvent::Ended);
            }
            _ => {}
        }
    }

    fn on_engine_event(&self, generation: u64, sink: &Arc<dyn MediaSink>, event: EngineEvent) {
        match event {
            EngineEvent::ManifestParsed { levels } => {
                if self.state.lock().generation != generation {
                    return;
                }
                debug!(levels, "Manifest parsed, starting playback");
                if let Err(e) = sink.play() {
                    debug!(error = %e, "Play request refused");
                }
            }
            EngineEvent::FragmentBuffered { sequence, bytes } => {
                trace!(sequence, bytes, "Fragment buffered");
            }
            EngineEvent::Error(engine_error) => {
                let mut state = self.state.lock();
                if state.generation != generation {
                    return;
                }
                let Some(fault) = Fault::from_engine_error(&engine_error) else {
                    debug!(error = %engine_error, "Ignoring non-fatal engine error");
                    return;
                };
                warn!(error = %engine_error, ?fault, "Adaptive engine fault");
                let action = self.classifier.on_fault(fault, &mut state.retry_counts);
                match action {
                    RecoveryAction::Reload => {
                        if let Some(engine) = state.engine.as_ref() {
                            engine.start_load();
                        }
                        let attempt = state.retry_counts.network;
                        let _ = self.events.send(SessionEvent::Recovering { fault, attempt });
                    }
                    RecoveryAction::RecoverMedia => {
                        if let Some(engine) = state.engine.as_ref() {
                            engine.recover_media_error();
                        }
                        let attempt = state.retry_counts.media;
                        let _ = self.events.send(SessionEvent::Recovering { fault, attempt });
                    }
                    RecoveryAction::Surface { .. } => self.apply(&mut state, action),
                }
            }
        }
    }

    /// Apply a surfaced action. Caller holds the state lock.
    fn apply(&self, state: &mut SessionState, action: RecoveryAction) {
        let RecoveryAction::Surface { teardown, .. } = action else {
            return;
        };
        state.watchdog.cancel();
        if teardown && let Some(mut engine) = state.engine.take() {
            engine.destroy();
        }
        if let Some(status) = action.status() {
            self.transition(state, status);
        }
    }
}
