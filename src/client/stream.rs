//! Device status stream consumer with automatic reconnection.
//!
//! One instance corresponds to one open tab: it holds a single SSE
//! connection to `/device-events`, feeds every message through the
//! reconciler to completion before reading the next, and reconnects after a
//! fixed backoff when the stream drops. Cancellation tears down both the
//! stream and the backoff timer.

use std::time::Duration;

use anyhow::{Context as _, Result};
use futures::StreamExt;
use reqwest_eventsource::{Event, EventSource};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::monitor::StatusMessage;

use super::reconciler::{KnownStateStore, Outcome, Reconciler};

/// Fixed delay before a reconnection attempt.
const RECONNECT_BACKOFF: Duration = Duration::from_secs(3);

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the opdeck server.
    pub base_url: String,
    pub reconnect_backoff: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:5000".to_string(),
            reconnect_backoff: RECONNECT_BACKOFF,
        }
    }
}

/// SSE consumer for the device status stream.
pub struct DeviceStatusClient {
    config: ClientConfig,
    http: reqwest::Client,
}

impl DeviceStatusClient {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
        }
    }

    /// Consume the stream until cancelled, reconnecting on error.
    ///
    /// Each processed report's outcome is handed to `on_outcome`. Dropped
    /// connections are re-established after the fixed backoff; state that was
    /// already known before a drop never re-notifies because the reconciler's
    /// persisted known state survives the reconnect. No error reaches the
    /// caller: when the stream cannot be re-established the last indicators
    /// simply stay as they are (stale, not cleared).
    pub async fn run<S, F>(
        &self,
        reconciler: &mut Reconciler<S>,
        mut on_outcome: F,
        cancel: CancellationToken,
    ) where
        S: KnownStateStore,
        F: FnMut(Outcome),
    {
        loop {
            match self.consume(reconciler, &mut on_outcome, &cancel).await {
                Ok(()) => debug!("device status stream closed"),
                Err(err) => warn!(error = %err, "device status stream error"),
            }

            if cancel.is_cancelled() {
                return;
            }
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(self.config.reconnect_backoff) => {}
            }
        }
    }

    /// One connection lifetime: attach, then process messages to completion
    /// one at a time.
    async fn consume<S, F>(
        &self,
        reconciler: &mut Reconciler<S>,
        on_outcome: &mut F,
        cancel: &CancellationToken,
    ) -> Result<()>
    where
        S: KnownStateStore,
        F: FnMut(Outcome),
    {
        let url = format!(
            "{}/device-events",
            self.config.base_url.trim_end_matches('/')
        );
        let request = self.http.get(&url).header("Accept", "text/event-stream");
        let mut source = EventSource::new(request).context("building event source")?;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    source.close();
                    return Ok(());
                }
                event = source.next() => {
                    match event {
                        None => return Ok(()),
                        Some(Ok(Event::Open)) => {
                            debug!(url = %url, "device status stream connected");
                        }
                        Some(Ok(Event::Message(message))) => {
                            match serde_json::from_str::<StatusMessage>(&message.data) {
                                Ok(parsed) => on_outcome(reconciler.process(&parsed)),
                                Err(err) => {
                                    // Malformed messages are dropped without
                                    // touching reconciler state.
                                    warn!(error = %err, data = %message.data, "dropping malformed status message");
                                }
                            }
                        }
                        Some(Err(err)) => {
                            source.close();
                            return Err(err.into());
                        }
                    }
                }
            }
        }
    }
}
