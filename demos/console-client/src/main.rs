//! Console client driving a session against a scripted loopback transport.
//!
//! Run with: cargo run -p console-client-demo
//!
//! Set `AGENT_BASE_URL` to change the endpoint shown in the handshake and
//! `RUST_LOG=debug` to see state transitions.

use std::{
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};

use agent_call_core::{
    ClientConfig, ConnectParams, EventSender, MediaDevices, MediaSink, MediaTrack, Participant,
    RemoteTrack, TrackKind, TrackRef, TransportAdapter, TransportEvent,
    traits::{DeviceError, TransportError},
};
use agent_call_session::{LogCategory, MediaSinks, SessionController};
use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{Value, json};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// In-memory track standing in for a captured or received stream.
#[derive(Debug)]
struct SimulatedTrack {
    id: String,
    kind: TrackKind,
    live: AtomicBool,
}

impl SimulatedTrack {
    fn new(id: &str, kind: TrackKind) -> TrackRef {
        Arc::new(Self {
            id: id.to_string(),
            kind,
            live: AtomicBool::new(true),
        })
    }
}

impl MediaTrack for SimulatedTrack {
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
        if self.live.swap(false, Ordering::SeqCst) {
            tracing::debug!(track = %self.id, "Track stopped");
        }
    }
}

struct SimulatedDevices;

#[async_trait]
impl MediaDevices for SimulatedDevices {
    async fn acquire_camera(&self) -> Result<TrackRef, DeviceError> {
        tokio::time::sleep(Duration::from_millis(50)).await;
        Ok(SimulatedTrack::new("local-camera", TrackKind::Video))
    }

    async fn acquire_microphone(&self) -> Result<TrackRef, DeviceError> {
        Ok(SimulatedTrack::new("local-mic", TrackKind::Audio))
    }
}

/// Sink that reports what it plays.
struct ConsoleSink {
    name: &'static str,
}

impl MediaSink for ConsoleSink {
    fn attach(&self, track: TrackRef) {
        tracing::info!(sink = self.name, track = track.id(), "Playing remote track");
    }

    fn detach(&self) {
        tracing::info!(sink = self.name, "Sink detached");
    }
}

/// Transport that plays back a fixed bot conversation.
#[derive(Default)]
struct LoopbackTransport {
    events: Mutex<Option<EventSender>>,
    script: Mutex<Option<tokio::task::JoinHandle<()>>>,
    samples: AtomicU64,
}

impl LoopbackTransport {
    fn bot() -> Participant {
        Participant {
            id: "bot".to_string(),
            name: Some("Agent".to_string()),
            local: false,
        }
    }

    fn bot_audio() -> RemoteTrack {
        RemoteTrack::new("bot", SimulatedTrack::new("bot-voice", TrackKind::Audio))
    }

    async fn play_script(events: EventSender) {
        let script = [
            TransportEvent::BotConnected {
                participant: Self::bot(),
            },
            TransportEvent::TrackStarted(Self::bot_audio()),
            TransportEvent::BotReady {
                data: json!({ "version": "0.3.0" }),
            },
            TransportEvent::BotTranscript {
                text: "Hi! What can I help you with?".to_string(),
            },
            TransportEvent::UserTranscript {
                text: "What's the".to_string(),
                is_final: false,
            },
            TransportEvent::UserTranscript {
                text: "What's the weather like?".to_string(),
                is_final: true,
            },
            TransportEvent::BotTranscript {
                text: "Sunny, around twenty degrees.".to_string(),
            },
        ];
        for event in script {
            tokio::time::sleep(Duration::from_millis(400)).await;
            if !events.emit(event) {
                return;
            }
        }
    }
}

#[async_trait]
impl TransportAdapter for LoopbackTransport {
    async fn initialize_devices(&self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn connect(&self, params: &ConnectParams, events: EventSender) -> Result<(), TransportError> {
        tracing::info!(endpoint = %params.endpoint, "Connect handshake");
        events.emit(TransportEvent::TransportStateChanged {
            state: "connecting".to_string(),
        });
        tokio::time::sleep(Duration::from_millis(200)).await;
        events.emit(TransportEvent::Connected);
        events.emit(TransportEvent::TransportStateChanged {
            state: "ready".to_string(),
        });

        let script = tokio::spawn(Self::play_script(events.clone()));
        *self.script.lock().unwrap_or_else(PoisonError::into_inner) = Some(script);
        *self.events.lock().unwrap_or_else(PoisonError::into_inner) = Some(events);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        if let Some(script) = self.script.lock().unwrap_or_else(PoisonError::into_inner).take() {
            script.abort();
        }
        if let Some(events) = self.events.lock().unwrap_or_else(PoisonError::into_inner).take() {
            events.emit(TransportEvent::BotDisconnected {
                participant: Self::bot(),
            });
        }
        Ok(())
    }

    async fn stats(&self) -> Result<Value, TransportError> {
        if self.events.lock().unwrap_or_else(PoisonError::into_inner).is_none() {
            return Err(TransportError::NotConnected);
        }
        let n = self.samples.fetch_add(1, Ordering::Relaxed);
        Ok(json!({ "audio": { "packets_received": 50 * (n + 1), "jitter_ms": 4 } }))
    }

    fn remote_tracks(&self) -> Vec<RemoteTrack> {
        Vec::new()
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let mut config = ClientConfig::from_env()?;
    config.stats_interval_ms = 1000;
    config
        .request_data
        .insert("client".to_string(), json!("console-demo"));

    let session = SessionController::create(
        config,
        Arc::new(LoopbackTransport::default()),
        Arc::new(SimulatedDevices),
        MediaSinks {
            audio: Arc::new(ConsoleSink { name: "speaker" }),
            video: Some(Arc::new(ConsoleSink { name: "video" })),
        },
    );

    let mut entries = session.log().stream();
    let printer = tokio::spawn(async move {
        while let Some(entry) = entries.next().await {
            let marker = match entry.category {
                LogCategory::Info => ' ',
                LogCategory::UserTranscript => '>',
                LogCategory::BotTranscript => '<',
                LogCategory::Error => '!',
            };
            println!("{marker} {entry}");
        }
    });

    let state = session.connect().await;
    tracing::info!(session_id = %session.id(), %state, "Connect finished");

    tokio::time::sleep(Duration::from_secs(4)).await;
    session.disconnect().await;
    session.dispose().await;

    // Give the printer a moment to drain, then stop it.
    tokio::time::sleep(Duration::from_millis(100)).await;
    printer.abort();
    Ok(())
}
