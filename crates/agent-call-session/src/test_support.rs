//! Fake collaborators shared by the unit tests.

use std::{
    collections::VecDeque,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

use agent_call_core::{
    ConnectParams, EventSender, MediaDevices, MediaSink, MediaTrack, RemoteTrack, TrackKind,
    TrackRef, TransportAdapter, TransportEvent, traits::DeviceError, traits::TransportError,
};
use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::Notify;

/// Ordered record of collaborator calls.
pub type CallLog = Arc<Mutex<Vec<&'static str>>>;

pub fn calls(log: &CallLog) -> Vec<&'static str> {
    log.lock().unwrap().clone()
}

#[derive(Debug)]
pub struct FakeTrack {
    id: String,
    kind: TrackKind,
    live: AtomicBool,
}

impl FakeTrack {
    pub fn new(id: &str, kind: TrackKind) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            kind,
            live: AtomicBool::new(true),
        })
    }

    pub fn ended(id: &str, kind: TrackKind) -> Arc<Self> {
        let track = Self::new(id, kind);
        track.live.store(false, Ordering::SeqCst);
        track
    }
}

impl MediaTrack for FakeTrack {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> TrackKind {
        self.kind
    }

    fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    fn stop(&self) {
        self.live.store(false, Ordering::SeqCst);
    }
}

pub fn remote(participant: &str, track: &Arc<FakeTrack>) -> RemoteTrack {
    RemoteTrack::new(participant, Arc::clone(track) as TrackRef)
}

#[derive(Default)]
pub struct FakeSink {
    current: Mutex<Option<String>>,
    attaches: AtomicUsize,
}

impl FakeSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn current(&self) -> Option<String> {
        self.current.lock().unwrap().clone()
    }

    pub fn attach_count(&self) -> usize {
        self.attaches.load(Ordering::SeqCst)
    }
}

impl MediaSink for FakeSink {
    fn attach(&self, track: TrackRef) {
        self.attaches.fetch_add(1, Ordering::SeqCst);
        *self.current.lock().unwrap() = Some(track.id().to_string());
    }

    fn detach(&self) {
        *self.current.lock().unwrap() = None;
    }
}

/// Camera outcome for the next acquisition.
#[derive(Clone)]
pub enum CameraOutcome {
    Live,
    Dead,
    Fail(DeviceError),
}

pub struct FakeDevices {
    pub calls: CallLog,
    camera: Mutex<CameraOutcome>,
    microphone: Mutex<Option<DeviceError>>,
    camera_gate: Option<Arc<Notify>>,
    acquired: Mutex<Vec<Arc<FakeTrack>>>,
}

impl FakeDevices {
    pub fn new(calls: CallLog) -> Self {
        Self {
            calls,
            camera: Mutex::new(CameraOutcome::Live),
            microphone: Mutex::new(None),
            camera_gate: None,
            acquired: Mutex::new(Vec::new()),
        }
    }

    pub fn with_camera(self, outcome: CameraOutcome) -> Self {
        *self.camera.lock().unwrap() = outcome;
        self
    }

    pub fn with_microphone_error(self, error: DeviceError) -> Self {
        *self.microphone.lock().unwrap() = Some(error);
        self
    }

    /// Camera acquisition waits on the gate before completing.
    pub fn with_camera_gate(mut self, gate: Arc<Notify>) -> Self {
        self.camera_gate = Some(gate);
        self
    }

    pub fn set_camera(&self, outcome: CameraOutcome) {
        *self.camera.lock().unwrap() = outcome;
    }

    pub fn live_tracks(&self) -> usize {
        self.acquired
            .lock()
            .unwrap()
            .iter()
            .filter(|t| t.is_live())
            .count()
    }

    pub fn acquired(&self) -> usize {
        self.acquired.lock().unwrap().len()
    }
}

#[async_trait]
impl MediaDevices for FakeDevices {
    async fn acquire_camera(&self) -> Result<TrackRef, DeviceError> {
        self.calls.lock().unwrap().push("acquire_camera");
        if let Some(gate) = &self.camera_gate {
            gate.notified().await;
        }
        let outcome = self.camera.lock().unwrap().clone();
        let track = match outcome {
            CameraOutcome::Fail(e) => return Err(e),
            CameraOutcome::Live => FakeTrack::new("camera-0", TrackKind::Video),
            CameraOutcome::Dead => FakeTrack::ended("camera-0", TrackKind::Video),
        };
        self.acquired.lock().unwrap().push(Arc::clone(&track));
        Ok(track)
    }

    async fn acquire_microphone(&self) -> Result<TrackRef, DeviceError> {
        self.calls.lock().unwrap().push("acquire_microphone");
        if let Some(e) = self.microphone.lock().unwrap().clone() {
            return Err(e);
        }
        let track = FakeTrack::new("mic-0", TrackKind::Audio);
        self.acquired.lock().unwrap().push(Arc::clone(&track));
        Ok(track)
    }
}

pub struct FakeTransport {
    pub calls: CallLog,
    init_error: Mutex<Option<TransportError>>,
    connect_error: Mutex<Option<TransportError>>,
    disconnect_error: Mutex<Option<TransportError>>,
    init_gate: Option<Arc<Notify>>,
    connect_gate: Option<Arc<Notify>>,
    disconnect_gate: Option<Arc<Notify>>,
    emit_on_connect: Mutex<Vec<TransportEvent>>,
    stats: Mutex<VecDeque<Result<Value, TransportError>>>,
    stats_calls: AtomicUsize,
    events: Mutex<Option<EventSender>>,
    tracks: Mutex<Vec<RemoteTrack>>,
    last_params: Mutex<Option<ConnectParams>>,
}

impl FakeTransport {
    pub fn new(calls: CallLog) -> Self {
        Self {
            calls,
            init_error: Mutex::new(None),
            connect_error: Mutex::new(None),
            disconnect_error: Mutex::new(None),
            init_gate: None,
            connect_gate: None,
            disconnect_gate: None,
            emit_on_connect: Mutex::new(vec![TransportEvent::Connected]),
            stats: Mutex::new(VecDeque::new()),
            stats_calls: AtomicUsize::new(0),
            events: Mutex::new(None),
            tracks: Mutex::new(Vec::new()),
            last_params: Mutex::new(None),
        }
    }

    pub fn with_init_error(self, error: TransportError) -> Self {
        *self.init_error.lock().unwrap() = Some(error);
        self
    }

    pub fn with_connect_error(self, error: TransportError) -> Self {
        *self.connect_error.lock().unwrap() = Some(error);
        self
    }

    pub fn with_disconnect_error(self, error: TransportError) -> Self {
        *self.disconnect_error.lock().unwrap() = Some(error);
        self
    }

    pub fn with_init_gate(mut self, gate: Arc<Notify>) -> Self {
        self.init_gate = Some(gate);
        self
    }

    pub fn with_connect_gate(mut self, gate: Arc<Notify>) -> Self {
        self.connect_gate = Some(gate);
        self
    }

    pub fn with_disconnect_gate(mut self, gate: Arc<Notify>) -> Self {
        self.disconnect_gate = Some(gate);
        self
    }

    /// Events emitted while connect is in flight, before it resolves.
    pub fn with_events_on_connect(self, events: Vec<TransportEvent>) -> Self {
        *self.emit_on_connect.lock().unwrap() = events;
        self
    }

    pub fn with_stats(self, results: Vec<Result<Value, TransportError>>) -> Self {
        *self.stats.lock().unwrap() = results.into();
        self
    }

    pub fn with_known_track(self, track: RemoteTrack) -> Self {
        self.tracks.lock().unwrap().push(track);
        self
    }

    pub fn clear_init_error(&self) {
        *self.init_error.lock().unwrap() = None;
    }

    /// Emit an event as the transport would, after connect.
    pub fn emit(&self, event: TransportEvent) -> bool {
        self.events
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(|tx| tx.emit(event))
    }

    pub fn stats_calls(&self) -> usize {
        self.stats_calls.load(Ordering::SeqCst)
    }

    pub fn last_params(&self) -> Option<ConnectParams> {
        self.last_params.lock().unwrap().clone()
    }
}

#[async_trait]
impl TransportAdapter for FakeTransport {
    async fn initialize_devices(&self) -> Result<(), TransportError> {
        self.calls.lock().unwrap().push("initialize_devices");
        if let Some(gate) = &self.init_gate {
            gate.notified().await;
        }
        self.init_error.lock().unwrap().clone().map_or(Ok(()), Err)
    }

    async fn connect(&self, params: &ConnectParams, events: EventSender) -> Result<(), TransportError> {
        self.calls.lock().unwrap().push("connect");
        *self.last_params.lock().unwrap() = Some(params.clone());
        *self.events.lock().unwrap() = Some(events.clone());
        if let Some(gate) = &self.connect_gate {
            gate.notified().await;
        }
        if let Some(e) = self.connect_error.lock().unwrap().clone() {
            return Err(e);
        }
        for event in self.emit_on_connect.lock().unwrap().drain(..) {
            events.emit(event);
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.calls.lock().unwrap().push("disconnect");
        if let Some(gate) = &self.disconnect_gate {
            gate.notified().await;
        }
        self.disconnect_error.lock().unwrap().clone().map_or(Ok(()), Err)
    }

    async fn stats(&self) -> Result<Value, TransportError> {
        let n = self.stats_calls.fetch_add(1, Ordering::SeqCst);
        self.stats
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(json!({ "sample": n })))
    }

    fn remote_tracks(&self) -> Vec<RemoteTrack> {
        self.tracks.lock().unwrap().clone()
    }
}
