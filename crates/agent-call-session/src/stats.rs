//! Periodic connection statistics sampling.

use std::{
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use agent_call_core::TransportAdapter;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::{
    task::JoinHandle,
    time::{Instant, MissedTickBehavior},
};

use crate::DiagnosticLog;

/// One statistics sample. Not retained beyond the callback.
#[derive(Debug, Clone, Serialize)]
pub struct StatsSample {
    pub timestamp: DateTime<Utc>,
    pub payload: Value,
}

/// Polls the transport for statistics at a fixed interval while running.
pub struct StatsMonitor {
    transport: Arc<dyn TransportAdapter>,
    log: Arc<DiagnosticLog>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl StatsMonitor {
    #[must_use]
    pub fn new(transport: Arc<dyn TransportAdapter>, log: Arc<DiagnosticLog>) -> Self {
        Self {
            transport,
            log,
            task: Mutex::new(None),
        }
    }

    /// Start polling; the first sample is taken one interval from now.
    ///
    /// Returns false without starting a second timer if already running.
    /// A failed sample is logged and skipped.
    pub fn start<F>(&self, interval: Duration, on_sample: F) -> bool
    where
        F: Fn(StatsSample) + Send + Sync + 'static,
    {
        let mut task = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            tracing::debug!("Stats monitor already running");
            return false;
        }
        if interval.is_zero() {
            self.log.error("Stats monitor not started: interval must be non-zero");
            return false;
        }

        let transport = Arc::clone(&self.transport);
        let log = Arc::clone(&self.log);
        *task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match transport.stats().await {
                    Ok(payload) => on_sample(StatsSample {
                        timestamp: Utc::now(),
                        payload,
                    }),
                    Err(e) => log.error(format!("Stats sample failed: {e}")),
                }
            }
        }));
        tracing::debug!(?interval, "Stats monitor started");
        true
    }

    /// Cancel the timer. Returns false if it was not running.
    pub fn stop(&self) -> bool {
        let handle = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        handle.is_some_and(|h| {
            h.abort();
            tracing::debug!("Stats monitor stopped");
            true
        })
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|t| !t.is_finished())
    }
}

impl Drop for StatsMonitor {
    fn drop(&mut self) {
        if let Some(handle) = self.task.get_mut().unwrap_or_else(PoisonError::into_inner).take() {
            handle.abort();
        }
    }
}
