//! Append-only diagnostic log with live subscription.

use std::{
    fmt,
    sync::{PoisonError, RwLock},
};

use chrono::{DateTime, SecondsFormat, Utc};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

/// Category of a log entry, used by presentation for styling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogCategory {
    Info,
    UserTranscript,
    BotTranscript,
    Error,
}

/// A timestamped diagnostic log entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub message: String,
    pub category: LogCategory,
}

impl LogEntry {
    #[must_use]
    pub fn new(category: LogCategory, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            message: message.into(),
            category,
        }
    }
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} - {}",
            self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
            self.message
        )
    }
}

/// Ordered record of lifecycle and transcript events.
///
/// Appends are crate-private: only the session controller, the media-track
/// manager and the stats monitor write here. Readers get a snapshot of the
/// history, a live receiver, or a stream that yields history then live
/// entries.
pub struct DiagnosticLog {
    history: RwLock<Vec<LogEntry>>,
    sender: broadcast::Sender<LogEntry>,
}

impl Default for DiagnosticLog {
    fn default() -> Self {
        Self::new()
    }
}

impl DiagnosticLog {
    /// Create an empty log.
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(1024);
        Self {
            history: RwLock::new(Vec::with_capacity(64)),
            sender,
        }
    }

    pub(crate) fn push(&self, entry: LogEntry) {
        match entry.category {
            LogCategory::Error => tracing::warn!(category = ?entry.category, "{}", entry.message),
            _ => tracing::info!(category = ?entry.category, "{}", entry.message),
        }

        // Hold the write lock across the send so live order matches history.
        let mut history = self.history.write().unwrap_or_else(PoisonError::into_inner);
        let _ = self.sender.send(entry.clone());
        history.push(entry);
    }

    pub(crate) fn info(&self, message: impl Into<String>) {
        self.push(LogEntry::new(LogCategory::Info, message));
    }

    pub(crate) fn error(&self, message: impl Into<String>) {
        self.push(LogEntry::new(LogCategory::Error, message));
    }

    pub(crate) fn user_transcript(&self, text: &str) {
        self.push(LogEntry::new(LogCategory::UserTranscript, format!("User: {text}")));
    }

    pub(crate) fn bot_transcript(&self, text: &str) {
        self.push(LogEntry::new(LogCategory::BotTranscript, format!("Bot: {text}")));
    }

    /// Get a receiver for live entries.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<LogEntry> {
        self.sender.subscribe()
    }

    /// Snapshot of all entries so far, in insertion order.
    #[must_use]
    pub fn entries(&self) -> Vec<LogEntry> {
        self.history
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of entries so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.history.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stream that yields history first, then live entries.
    ///
    /// A subscriber that lags behind the broadcast buffer skips the entries
    /// it missed.
    #[must_use]
    pub fn stream(&self) -> futures::stream::BoxStream<'static, LogEntry> {
        let (history, rx) = {
            let history = self.history.read().unwrap_or_else(PoisonError::into_inner);
            (history.clone(), self.sender.subscribe())
        };

        let live = BroadcastStream::new(rx).filter_map(|res| async move { res.ok() });
        futures::stream::iter(history).chain(live).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entries_keep_insertion_order() {
        let log = DiagnosticLog::new();
        log.info("first");
        log.error("second");
        log.user_transcript("hi");
        log.bot_transcript("hello there");

        let entries = log.entries();
        let messages: Vec<_> = entries.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(messages, ["first", "second", "User: hi", "Bot: hello there"]);
        assert_eq!(entries[1].category, LogCategory::Error);
        assert_eq!(entries[2].category, LogCategory::UserTranscript);
        assert_eq!(entries[3].category, LogCategory::BotTranscript);
        assert!(entries.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    }

    #[tokio::test]
    async fn test_stream_yields_history_then_live() {
        let log = DiagnosticLog::new();
        log.info("before");

        let mut stream = log.stream();
        log.info("after");

        assert_eq!(stream.next().await.unwrap().message, "before");
        assert_eq!(stream.next().await.unwrap().message, "after");
    }

    #[tokio::test]
    async fn test_subscribe_receives_live_entries() {
        let log = DiagnosticLog::new();
        let mut rx = log.subscribe();
        log.error("boom");

        let entry = rx.recv().await.unwrap();
        assert_eq!(entry.category, LogCategory::Error);
        assert_eq!(entry.message, "boom");
    }

    #[test]
    fn test_display_format() {
        let entry = LogEntry {
            timestamp: DateTime::parse_from_rfc3339("2024-05-01T10:20:30.123Z")
                .unwrap()
                .with_timezone(&Utc),
            message: "Client connected".to_string(),
            category: LogCategory::Info,
        };
        assert_eq!(entry.to_string(), "2024-05-01T10:20:30.123Z - Client connected");
    }
}
