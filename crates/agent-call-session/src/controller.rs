//! Session lifecycle controller.
//!
//! The controller is the only place session state changes. User triggers
//! (`connect`, `disconnect`, `dispose`) and transport events (`handle_event`,
//! fed by the event pump) all go through the same lock-protected transition
//! function; the lock is never held across a suspension point.

use std::{
    mem,
    sync::{Arc, Mutex, MutexGuard, PoisonError, Weak},
};

use agent_call_core::{
    ClientConfig, EventSender, MediaDevices, MediaSink, TransportAdapter, TransportEvent,
    events::TRANSPORT_STATE_READY, traits::TransportError,
};
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};
use uuid::Uuid;

use crate::{
    DiagnosticLog, DeviceState, MediaTrackManager, SessionError, SessionState, StatsMonitor,
};

/// Playback destinations for remote media.
#[derive(Clone)]
pub struct MediaSinks {
    /// Bot voice output.
    pub audio: Arc<dyn MediaSink>,
    /// Remote video surface, if the client renders video.
    pub video: Option<Arc<dyn MediaSink>>,
}

impl MediaSinks {
    #[must_use]
    pub fn audio_only(audio: Arc<dyn MediaSink>) -> Self {
        Self { audio, video: None }
    }
}

#[derive(Default)]
struct Inner {
    state: SessionState,
    /// Last state reported by `transport_state_changed`.
    transport_state: Option<String>,
    last_error: Option<SessionError>,
    /// `disconnect()` arrived while a connect step was in flight.
    disconnect_requested: bool,
    /// The transport has been touched and must be disconnected on teardown.
    transport_engaged: bool,
    /// A failed connect step is releasing resources; `Failed` follows.
    failing: bool,
    /// Bumped by every accepted `connect()`; step results from an older
    /// attempt are stale.
    attempt: u64,
    disposed: bool,
}

/// How a connect step's result is applied.
enum StepOutcome {
    /// A pending `disconnect()` wins; `Disconnecting` has not been entered yet.
    Cancel(Option<SessionError>),
    Fail(SessionError),
    /// Already in `Disconnecting` with the teardown left to run.
    Teardown,
    /// The session moved on while the step was in flight.
    Stale(Option<SessionError>),
}

/// Supervises one real-time session with the remote agent.
pub struct SessionController {
    id: Uuid,
    config: ClientConfig,
    transport: Arc<dyn TransportAdapter>,
    media: MediaTrackManager,
    stats: StatsMonitor,
    log: Arc<DiagnosticLog>,
    audio_sink: Arc<dyn MediaSink>,
    events: EventSender,
    inner: Mutex<Inner>,
    state_tx: watch::Sender<SessionState>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl SessionController {
    /// Create a session and start its event pump.
    ///
    /// Must be called from within a Tokio runtime.
    #[must_use]
    pub fn create(
        config: ClientConfig,
        transport: Arc<dyn TransportAdapter>,
        devices: Arc<dyn MediaDevices>,
        sinks: MediaSinks,
    ) -> Arc<Self> {
        let id = Uuid::new_v4();
        let log = Arc::new(DiagnosticLog::new());
        let (events, events_rx) = EventSender::channel();
        let (state_tx, _) = watch::channel(SessionState::Idle);

        let controller = Arc::new(Self {
            id,
            media: MediaTrackManager::new(devices, sinks.video, Arc::clone(&log)),
            stats: StatsMonitor::new(Arc::clone(&transport), Arc::clone(&log)),
            config,
            transport,
            log,
            audio_sink: sinks.audio,
            events,
            inner: Mutex::new(Inner::default()),
            state_tx,
            pump: Mutex::new(None),
        });

        let pump = tokio::spawn(Self::pump_events(Arc::downgrade(&controller), events_rx));
        *controller.pump.lock().unwrap_or_else(PoisonError::into_inner) = Some(pump);

        tracing::debug!(session_id = %id, base_url = %controller.config.base_url, "Session created");
        controller
    }

    async fn pump_events(this: Weak<Self>, mut rx: mpsc::UnboundedReceiver<TransportEvent>) {
        while let Some(event) = rx.recv().await {
            let Some(controller) = this.upgrade() else {
                break;
            };
            controller.handle_event(event).await;
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run the connect sequence: camera, devices, transport, track binding.
    ///
    /// Returns the state the sequence settled in: `Connected`, `Failed`, or
    /// `Idle` if a disconnect arrived mid-sequence. From any state other than
    /// `Idle`/`Failed` this is a no-op that logs one error entry.
    pub async fn connect(&self) -> SessionState {
        let attempt = {
            let mut inner = self.lock();
            if inner.disposed {
                self.log.error("connect() ignored: session disposed");
                return inner.state;
            }
            if !inner.state.accepts_connect() {
                self.log
                    .error(format!("connect() ignored: session is {}", inner.state));
                return inner.state;
            }
            inner.disconnect_requested = false;
            inner.transport_state = None;
            inner.last_error = None;
            inner.attempt += 1;
            self.transition(&mut inner, SessionState::EnablingCamera);
            inner.attempt
        };

        let camera = self.enable_camera().await;
        if let Some(end) = self
            .settle_step(attempt, camera, SessionState::InitializingDevices)
            .await
        {
            return end;
        }

        self.log.info("Initializing devices...");
        let devices = self.initialize_devices().await;
        if let Some(end) = self
            .settle_step(attempt, devices, SessionState::Connecting)
            .await
        {
            return end;
        }

        self.log.info("Connecting to bot...");
        let connected = match self.config.connect_params() {
            Ok(params) => self
                .transport
                .connect(&params, self.events.clone())
                .await
                .map_err(|e| SessionError::TransportConnect(e.to_string())),
            Err(e) => Err(SessionError::TransportConnect(e.to_string())),
        };
        if let Some(end) = self
            .settle_step(attempt, connected, SessionState::Connected)
            .await
        {
            return end;
        }

        let state = self.state();
        if state == SessionState::Connected {
            self.log.info("Connection complete");
        }
        state
    }

    async fn enable_camera(&self) -> Result<(), SessionError> {
        if !self.config.enable_cam {
            self.log.info("Camera disabled by configuration, skipping");
            return Ok(());
        }
        self.log.info("Enabling camera...");
        if self.media.toggle_local_camera().await {
            self.log.info("Camera enabled successfully, proceeding with connection");
            Ok(())
        } else {
            Err(SessionError::CameraAcquisition(
                "camera could not be enabled".to_string(),
            ))
        }
    }

    async fn initialize_devices(&self) -> Result<(), SessionError> {
        if self.config.enable_mic {
            self.media
                .enable_microphone()
                .await
                .map_err(|e| SessionError::DeviceInit(e.to_string()))?;
        }
        self.lock().transport_engaged = true;
        self.transport
            .initialize_devices()
            .await
            .map_err(|e| match e {
                TransportError::Devices(detail) => SessionError::DeviceInit(detail),
                other => SessionError::DeviceInit(other.to_string()),
            })
    }

    /// Decide what follows a settled connect step.
    ///
    /// Returns `None` after advancing to `next`, or the final state if the
    /// sequence ended here (failure, pending disconnect, or a session that
    /// moved on while the step was in flight).
    async fn settle_step(
        &self,
        attempt: u64,
        result: Result<(), SessionError>,
        next: SessionState,
    ) -> Option<SessionState> {
        let outcome = {
            let mut inner = self.lock();
            if inner.attempt != attempt {
                StepOutcome::Stale(result.err())
            } else if inner.state.is_connecting() {
                match (result, inner.disconnect_requested) {
                    (Ok(()), false) => {
                        if next == SessionState::Connected {
                            self.enter_connected(&mut inner);
                        } else {
                            self.transition(&mut inner, next);
                        }
                        return None;
                    }
                    (result, true) => StepOutcome::Cancel(result.err()),
                    (Err(e), false) => StepOutcome::Fail(e),
                }
            } else if inner.state == SessionState::Connected {
                // The transport reported `connected` before its connect call
                // settled; a late rejection ends the session like a fatal error.
                match result {
                    Ok(()) => return None,
                    Err(e) => {
                        let runtime = SessionError::TransportRuntime(e.detail().to_string());
                        self.log.error(format!("{runtime} (fatal, disconnecting)"));
                        inner.last_error = Some(runtime);
                        self.transition(&mut inner, SessionState::Disconnecting);
                        StepOutcome::Teardown
                    }
                }
            } else {
                StepOutcome::Stale(result.err())
            }
        };

        match outcome {
            StepOutcome::Cancel(failure) => {
                if let Some(e) = failure {
                    self.log.error(format!("Error connecting: {e}"));
                }
                self.log
                    .info("Disconnect requested during connect, skipping remaining steps");
                {
                    let mut inner = self.lock();
                    self.transition(&mut inner, SessionState::Disconnecting);
                }
                self.finish_teardown().await;
            }
            StepOutcome::Fail(e) => self.fail(e).await,
            StepOutcome::Teardown => self.finish_teardown().await,
            StepOutcome::Stale(failure) => {
                if let Some(e) = failure {
                    self.log.error(format!("Ignoring late connect result: {e}"));
                }
            }
        }
        Some(self.state())
    }

    /// `Connecting -> Connected`: bind tracks and start monitoring.
    ///
    /// Reached from whichever comes first of the transport's `connected`
    /// event and its connect call resolving; the second is a no-op.
    fn enter_connected(&self, inner: &mut Inner) {
        if inner.state != SessionState::Connecting || inner.disconnect_requested || inner.failing
        {
            return;
        }
        self.transition(inner, SessionState::Connected);
        self.log.info("Client connected");
        self.bind_remote_tracks();

        let log = Arc::clone(&self.log);
        self.stats.start(self.config.stats_interval(), move |sample| {
            log.info(format!("[Stats] {}", sample.payload));
        });
    }

    fn bind_remote_tracks(&self) {
        self.media.adopt_remote_tracks(self.transport.remote_tracks());
        self.media.setup_media_tracks(Arc::clone(&self.audio_sink));
        self.media.setup_track_listeners(Arc::clone(&self.audio_sink));
    }

    /// Release everything, then rest in `Failed`.
    ///
    /// The step state is kept while releasing so `connect()` stays refused
    /// until cleanup is over. A disconnect requested meanwhile ends in `Idle`.
    async fn fail(&self, error: SessionError) {
        self.log.error(format!("Error connecting: {error}"));
        {
            let mut inner = self.lock();
            inner.failing = true;
            inner.last_error = Some(error);
        }
        self.release_resources().await;

        let mut inner = self.lock();
        inner.failing = false;
        if inner.disconnect_requested {
            inner.disconnect_requested = false;
            inner.transport_state = None;
            self.transition(&mut inner, SessionState::Disconnecting);
            self.transition(&mut inner, SessionState::Idle);
        } else {
            self.transition(&mut inner, SessionState::Failed);
        }
    }

    /// `Disconnecting -> Idle` once every resource is released.
    async fn finish_teardown(&self) {
        self.release_resources().await;
        let mut inner = self.lock();
        inner.disconnect_requested = false;
        inner.transport_state = None;
        self.transition(&mut inner, SessionState::Idle);
    }

    /// Best-effort, total cleanup: every step runs even if an earlier one
    /// failed, and failures are logged only.
    async fn release_resources(&self) {
        self.stats.stop();

        let engaged = mem::take(&mut self.lock().transport_engaged);
        if engaged {
            if let Err(e) = self.transport.disconnect().await {
                self.log
                    .error(SessionError::Cleanup(e.to_string()).to_string());
            }
        }

        self.media.cleanup();
    }

    /// Disconnect and release everything.
    ///
    /// A no-op while `Idle`. During a connect step, the disconnect is
    /// honored once the in-flight step settles; this waits until then.
    pub async fn disconnect(&self) {
        let mut state_rx = self.state_tx.subscribe();
        let run_teardown = {
            let mut inner = self.lock();
            let current = inner.state;
            match current {
                SessionState::Idle => return,
                SessionState::Failed => {
                    // Failure already released everything; make sure and rest.
                    self.stats.stop();
                    self.media.cleanup();
                    self.transition(&mut inner, SessionState::Idle);
                    return;
                }
                SessionState::Connected => {
                    self.transition(&mut inner, SessionState::Disconnecting);
                    true
                }
                state if state.is_connecting() => {
                    if !inner.disconnect_requested {
                        inner.disconnect_requested = true;
                        self.log.info(format!(
                            "Disconnect requested while {state}, stopping after the current step"
                        ));
                    }
                    false
                }
                _ => false,
            }
        };

        if run_teardown {
            self.finish_teardown().await;
        } else if state_rx.wait_for(|s| *s == SessionState::Idle).await.is_err() {
            tracing::warn!(session_id = %self.id, "State channel closed while waiting for disconnect");
        }
    }

    /// Disconnect, stop the event pump and refuse further connects.
    pub async fn dispose(&self) {
        self.disconnect().await;
        {
            let mut inner = self.lock();
            if inner.disposed {
                return;
            }
            inner.disposed = true;
        }
        if let Some(pump) = self
            .pump
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            pump.abort();
        }
        self.log.info("Session disposed");
    }

    /// Consume one transport event.
    ///
    /// Events that only matter while `Connected` are logged and otherwise
    /// ignored in other states; remote track arrivals are always stored.
    pub async fn handle_event(&self, event: TransportEvent) {
        tracing::trace!(session_id = %self.id, event = event.name(), "Transport event");
        match event {
            TransportEvent::Connected => {
                let mut inner = self.lock();
                self.enter_connected(&mut inner);
            }
            TransportEvent::Disconnected => {
                self.log.info("Client disconnected");
                let run_teardown = {
                    let mut inner = self.lock();
                    if inner.state == SessionState::Connected {
                        // Nothing left to close on the transport side.
                        inner.transport_engaged = false;
                        self.transition(&mut inner, SessionState::Disconnecting);
                        true
                    } else {
                        false
                    }
                };
                if run_teardown {
                    self.finish_teardown().await;
                }
            }
            TransportEvent::TransportStateChanged { state } => {
                self.log.info(format!("Transport state changed: {state}"));
                let mut inner = self.lock();
                let ready = state == TRANSPORT_STATE_READY;
                inner.transport_state = Some(state);
                if ready && inner.state == SessionState::Connected {
                    self.bind_remote_tracks();
                }
            }
            TransportEvent::BotConnected { participant } => {
                self.log.info(format!("Bot connected: {}", to_json(&participant)));
            }
            TransportEvent::BotDisconnected { participant } => {
                self.log
                    .info(format!("Bot disconnected: {}", to_json(&participant)));
            }
            TransportEvent::BotReady { data } => {
                self.log.info(format!("Bot ready: {data}"));
                if self.state() == SessionState::Connected {
                    self.bind_remote_tracks();
                }
            }
            TransportEvent::UserTranscript { text, is_final } => {
                if is_final {
                    self.log.user_transcript(&text);
                }
            }
            TransportEvent::BotTranscript { text } => self.log.bot_transcript(&text),
            TransportEvent::MessageError { error } => {
                self.log.error(format!("Message error: {error}"));
            }
            TransportEvent::Error { error } => {
                let runtime = SessionError::TransportRuntime(error.message.clone());
                let run_teardown = {
                    let mut inner = self.lock();
                    if error.fatal && inner.state == SessionState::Connected {
                        self.log.error(format!("{runtime} (fatal, disconnecting)"));
                        inner.last_error = Some(runtime);
                        self.transition(&mut inner, SessionState::Disconnecting);
                        true
                    } else {
                        self.log.error(runtime.to_string());
                        false
                    }
                };
                if run_teardown {
                    self.finish_teardown().await;
                }
            }
            TransportEvent::TrackStarted(remote) => {
                if matches!(self.state(), SessionState::Idle | SessionState::Failed) {
                    tracing::debug!(
                        participant = %remote.participant_id,
                        track = remote.track.id(),
                        "Ignoring remote track outside a session"
                    );
                    return;
                }
                tracing::debug!(
                    participant = %remote.participant_id,
                    kind = %remote.kind(),
                    track = remote.track.id(),
                    "Remote track started"
                );
                self.media.add_remote_track(remote);
            }
            TransportEvent::TrackStopped {
                participant_id,
                kind,
            } => self.media.remove_remote_track(&participant_id, kind),
        }
    }

    fn transition(&self, inner: &mut Inner, next: SessionState) {
        let prev = inner.state;
        if prev == next {
            return;
        }
        debug_assert!(
            prev.can_transition_to(next),
            "illegal transition {prev:?} -> {next:?}"
        );
        inner.state = next;
        self.state_tx.send_replace(next);
        tracing::debug!(session_id = %self.id, from = %prev, to = %next, "Session state changed");
        self.log.info(format!("Status: {}", Self::status_of(inner)));
    }

    fn status_of(inner: &Inner) -> String {
        match inner.state {
            SessionState::Idle => "Disconnected".to_string(),
            SessionState::EnablingCamera => "Enabling camera".to_string(),
            SessionState::InitializingDevices => "Initializing devices".to_string(),
            SessionState::Connecting => inner
                .transport_state
                .as_ref()
                .map_or_else(|| "Connecting".to_string(), |s| format!("Transport: {s}")),
            SessionState::Connected => "Connected".to_string(),
            SessionState::Disconnecting => "Disconnecting".to_string(),
            SessionState::Failed => match inner.last_error {
                Some(SessionError::CameraAcquisition(_)) => "Camera Error".to_string(),
                _ => "Error".to_string(),
            },
        }
    }

    /// Session identifier.
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.lock().state
    }

    /// Human-readable status derived from the state and last transport state.
    #[must_use]
    pub fn status(&self) -> String {
        Self::status_of(&self.lock())
    }

    /// Receiver for state changes.
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    /// The session's diagnostic log (read-only for callers).
    #[must_use]
    pub fn log(&self) -> Arc<DiagnosticLog> {
        Arc::clone(&self.log)
    }

    /// Local capture state.
    #[must_use]
    pub fn device_state(&self) -> DeviceState {
        self.media.device_state()
    }

    /// Number of live local tracks.
    #[must_use]
    pub fn live_local_tracks(&self) -> usize {
        self.media.live_local_tracks()
    }

    /// Whether the stats timer is active.
    #[must_use]
    pub fn is_monitoring(&self) -> bool {
        self.stats.is_running()
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        if let Some(pump) = self
            .pump
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            pump.abort();
        }
        self.stats.stop();
        self.media.cleanup();
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|e| format!("<unserializable: {e}>"))
}
