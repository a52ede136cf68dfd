//! Local camera/microphone lifecycle and remote-track-to-sink binding.

use std::{
    collections::HashMap,
    mem,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use agent_call_core::{
    MediaDevices, MediaSink, RemoteTrack, TrackKind, TrackRef, traits::DeviceError,
};

use crate::DiagnosticLog;

/// Snapshot of the local capture state.
#[derive(Debug, Clone, Default)]
pub struct DeviceState {
    /// True iff a local video track is present and live.
    pub camera_enabled: bool,
    pub local_video_track: Option<TrackRef>,
    pub local_audio_track: Option<TrackRef>,
}

/// A remote participant's track plus binding bookkeeping.
#[derive(Debug, Clone)]
pub struct RemoteParticipantTrack {
    pub participant_id: String,
    pub kind: TrackKind,
    pub track: TrackRef,
    pub sink_bound: bool,
}

type TrackKey = (String, TrackKind);

#[derive(Default)]
struct TrackState {
    local_video: Option<TrackRef>,
    local_audio: Option<TrackRef>,
    remote: HashMap<TrackKey, RemoteParticipantTrack>,
    audio_sink: Option<Arc<dyn MediaSink>>,
    /// Arrivals are bound immediately once listeners are set up.
    listening: bool,
}

/// Owns local capture tracks and binds remote tracks to playback sinks.
///
/// Remote tracks that arrive before listeners are set up are stored and bound
/// on the next `setup_media_tracks`/`setup_track_listeners` call, so no
/// arrival is dropped.
pub struct MediaTrackManager {
    devices: Arc<dyn MediaDevices>,
    video_sink: Option<Arc<dyn MediaSink>>,
    log: Arc<DiagnosticLog>,
    state: Mutex<TrackState>,
}

impl MediaTrackManager {
    /// Create a manager. Remote video is rendered to `video_sink` if given.
    #[must_use]
    pub fn new(
        devices: Arc<dyn MediaDevices>,
        video_sink: Option<Arc<dyn MediaSink>>,
        log: Arc<DiagnosticLog>,
    ) -> Self {
        Self {
            devices,
            video_sink,
            log,
            state: Mutex::new(TrackState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, TrackState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Acquire the camera, or release it if it is already enabled.
    ///
    /// Returns true only if the camera ends up live and enabled. Any
    /// acquisition failure returns false with nothing left acquired.
    pub async fn toggle_local_camera(&self) -> bool {
        let existing = self.lock().local_video.take();
        if let Some(track) = existing {
            let was_live = track.is_live();
            track.stop();
            if was_live {
                self.log.info("Camera disabled");
                return false;
            }
            tracing::debug!(track = track.id(), "Discarding ended camera track");
        }

        match self.devices.acquire_camera().await {
            Ok(track) if track.is_live() => {
                self.log.info(format!("Camera enabled ({})", track.id()));
                if let Some(stale) = self.lock().local_video.replace(track) {
                    stale.stop();
                }
                true
            }
            Ok(track) => {
                track.stop();
                self.log.error("Failed to enable camera: track ended before it could be used");
                false
            }
            Err(e) => {
                self.log.error(format!("Failed to enable camera: {e}"));
                false
            }
        }
    }

    /// Acquire the local microphone if it is not already live.
    ///
    /// # Errors
    /// Returns the device error; a track that is not live is released first.
    pub async fn enable_microphone(&self) -> Result<(), DeviceError> {
        if self.lock().local_audio.as_ref().is_some_and(|t| t.is_live()) {
            return Ok(());
        }

        let track = self.devices.acquire_microphone().await?;
        if !track.is_live() {
            track.stop();
            return Err(DeviceError::Other("microphone track ended".to_string()));
        }

        self.log.info(format!("Microphone enabled ({})", track.id()));
        if let Some(stale) = self.lock().local_audio.replace(track) {
            stale.stop();
        }
        Ok(())
    }

    /// Bind all known remote tracks: audio to `audio_sink`, video to the
    /// video sink. Already-bound tracks are left alone.
    pub fn setup_media_tracks(&self, audio_sink: Arc<dyn MediaSink>) {
        let mut state = self.lock();
        self.use_audio_sink(&mut state, audio_sink);
        self.bind_pending(&mut state);
    }

    /// Bind future remote-track arrivals as they come, plus any stored ones.
    pub fn setup_track_listeners(&self, audio_sink: Arc<dyn MediaSink>) {
        let mut state = self.lock();
        self.use_audio_sink(&mut state, audio_sink);
        state.listening = true;
        self.bind_pending(&mut state);
    }

    /// Record a remote track arrival.
    ///
    /// A track for an already-known participant/kind replaces the previous
    /// one, which is stopped. Re-announcing the same track is a no-op.
    pub fn add_remote_track(&self, remote: RemoteTrack) {
        let key = (remote.participant_id.clone(), remote.kind());
        let mut state = self.lock();

        if state
            .remote
            .get(&key)
            .is_some_and(|known| known.track.id() == remote.track.id())
        {
            return;
        }

        let entry = RemoteParticipantTrack {
            participant_id: remote.participant_id,
            kind: key.1,
            track: remote.track,
            sink_bound: false,
        };
        if let Some(previous) = state.remote.insert(key.clone(), entry) {
            previous.track.stop();
            self.log.info(format!(
                "Replaced {} track of {} ({} -> {})",
                key.1,
                key.0,
                previous.track.id(),
                state.remote[&key].track.id()
            ));
        }

        if state.listening {
            self.bind(&mut state, &key);
        } else {
            tracing::debug!(participant = %key.0, kind = %key.1, "Stored remote track until listeners are set up");
        }
    }

    /// Adopt tracks the transport knows about for participant/kind pairs not
    /// yet recorded.
    pub fn adopt_remote_tracks(&self, tracks: Vec<RemoteTrack>) {
        for remote in tracks {
            let known = self
                .lock()
                .remote
                .contains_key(&(remote.participant_id.clone(), remote.kind()));
            if !known {
                self.add_remote_track(remote);
            }
        }
    }

    /// Forget an ended remote track, detaching its sink if it was bound.
    pub fn remove_remote_track(&self, participant_id: &str, kind: TrackKind) {
        let mut state = self.lock();
        let Some(removed) = state.remote.remove(&(participant_id.to_string(), kind)) else {
            return;
        };
        self.log.info(format!("Remote {kind} track of {participant_id} ended"));

        if removed.sink_bound {
            if let Some(sink) = Self::sink_for(&state, self.video_sink.as_ref(), kind) {
                sink.detach();
            }
            // Another participant's track of the same kind takes over the sink.
            for entry in state.remote.values_mut().filter(|e| e.kind == kind) {
                entry.sink_bound = false;
            }
            if state.listening {
                self.bind_pending(&mut state);
            }
        }
    }

    /// Stop all local tracks, forget remote tracks and detach sinks.
    ///
    /// Safe to call with nothing acquired.
    pub fn cleanup(&self) {
        let (local, remote, audio_sink) = {
            let mut state = self.lock();
            state.listening = false;
            let local: Vec<TrackRef> = [state.local_video.take(), state.local_audio.take()]
                .into_iter()
                .flatten()
                .collect();
            (local, mem::take(&mut state.remote), state.audio_sink.take())
        };

        for track in &local {
            track.stop();
        }
        if let Some(sink) = audio_sink {
            sink.detach();
        }
        if remote.values().any(|e| e.kind == TrackKind::Video && e.sink_bound) {
            if let Some(sink) = &self.video_sink {
                sink.detach();
            }
        }

        if !local.is_empty() || !remote.is_empty() {
            self.log.info(format!(
                "Released {} local track(s) and {} remote track(s)",
                local.len(),
                remote.len()
            ));
        }
    }

    /// Snapshot of the local capture state.
    #[must_use]
    pub fn device_state(&self) -> DeviceState {
        let state = self.lock();
        DeviceState {
            camera_enabled: state.local_video.as_ref().is_some_and(|t| t.is_live()),
            local_video_track: state.local_video.clone(),
            local_audio_track: state.local_audio.clone(),
        }
    }

    /// Number of live local tracks.
    #[must_use]
    pub fn live_local_tracks(&self) -> usize {
        let state = self.lock();
        [&state.local_video, &state.local_audio]
            .into_iter()
            .flatten()
            .filter(|t| t.is_live())
            .count()
    }

    /// Snapshot of the remote-track bookkeeping.
    #[must_use]
    pub fn remote_tracks(&self) -> Vec<RemoteParticipantTrack> {
        self.lock().remote.values().cloned().collect()
    }

    fn use_audio_sink(&self, state: &mut TrackState, sink: Arc<dyn MediaSink>) {
        if let Some(current) = &state.audio_sink {
            if std::ptr::addr_eq(Arc::as_ptr(current), Arc::as_ptr(&sink)) {
                return;
            }
            current.detach();
            for entry in state.remote.values_mut().filter(|e| e.kind == TrackKind::Audio) {
                entry.sink_bound = false;
            }
            self.log.info("Switched audio sink");
        }
        state.audio_sink = Some(sink);
    }

    fn bind_pending(&self, state: &mut TrackState) {
        let mut pending: Vec<TrackKey> = state
            .remote
            .iter()
            .filter(|(_, e)| !e.sink_bound && e.track.is_live())
            .map(|(k, _)| k.clone())
            .collect();
        pending.sort();
        for key in pending {
            self.bind(state, &key);
        }
    }

    fn bind(&self, state: &mut TrackState, key: &TrackKey) {
        let Some(sink) = Self::sink_for(state, self.video_sink.as_ref(), key.1) else {
            tracing::debug!(participant = %key.0, kind = %key.1, "No sink for remote track");
            return;
        };
        let Some(entry) = state.remote.get_mut(key) else {
            return;
        };
        if entry.sink_bound {
            return;
        }
        sink.attach(Arc::clone(&entry.track));
        entry.sink_bound = true;
        self.log.info(format!(
            "Bound {} track {} of {} to sink",
            entry.kind,
            entry.track.id(),
            entry.participant_id
        ));
    }

    fn sink_for(
        state: &TrackState,
        video_sink: Option<&Arc<dyn MediaSink>>,
        kind: TrackKind,
    ) -> Option<Arc<dyn MediaSink>> {
        match kind {
            TrackKind::Audio => state.audio_sink.clone(),
            TrackKind::Video => video_sink.cloned(),
        }
    }
}
