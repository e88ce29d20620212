//! Process-wide fan-out point for device status.
//!
//! The hub owns the authoritative snapshot and the registry of live
//! subscriber channels. All shared-state access is internal; callers only see
//! `subscribe`, `apply`, `publish`, and `snapshot`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use futures::Stream;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::model::{DeviceEvent, DeviceId, DeviceState, Snapshot, StatusMessage};

/// Size of the per-subscriber send buffer.
const SUBSCRIBER_BUFFER_SIZE: usize = 64;

/// How long a publish will wait on one subscriber before declaring it dead.
const SEND_TIMEOUT: Duration = Duration::from_secs(1);

/// Fan-out hub holding the current snapshot and all live subscriptions.
pub struct EventHub {
    snapshot: Mutex<Snapshot>,
    subscribers: DashMap<u64, mpsc::Sender<StatusMessage>>,
    next_id: AtomicU64,
}

impl EventHub {
    pub fn new() -> Self {
        Self {
            snapshot: Mutex::new(Snapshot::default()),
            subscribers: DashMap::new(),
            next_id: AtomicU64::new(0),
        }
    }

    /// Current state of both devices.
    pub fn snapshot(&self) -> Snapshot {
        self.snapshot.lock().expect("snapshot lock poisoned").clone()
    }

    /// Number of live subscriptions (diagnostics).
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Register a new subscriber.
    ///
    /// The channel is seeded with one status message per device carrying the
    /// current snapshot, so a late joiner can initialize its view before any
    /// live event arrives. Registration and the snapshot read happen under
    /// the same lock as `apply`'s update, so the seed and subsequent events
    /// never leave a gap.
    pub fn subscribe(self: &Arc<Self>) -> Subscription {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER_SIZE);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let replay = {
            let snapshot = self.snapshot.lock().expect("snapshot lock poisoned");
            self.subscribers.insert(id, tx.clone());
            DeviceId::ALL.map(|device| StatusMessage::from_state(device, snapshot.get(device)))
        };
        for message in replay {
            // Buffer is empty at this point; try_send cannot fail.
            let _ = tx.try_send(message);
        }

        debug!(subscriber = id, "status subscriber attached");
        Subscription {
            hub: Arc::clone(self),
            id,
            rx,
        }
    }

    /// Remove a subscriber. Safe to call for an already-removed id.
    pub fn unsubscribe(&self, id: u64) {
        if self.subscribers.remove(&id).is_some() {
            debug!(subscriber = id, "status subscriber detached");
        }
    }

    /// Diff a newly classified state against the snapshot.
    ///
    /// On any field-level difference the snapshot entry is replaced and a
    /// `DeviceEvent` is broadcast to every subscriber; identical states
    /// produce nothing. Events for one device are totally ordered because
    /// only that device's poll cycle calls `apply` for it.
    pub async fn apply(&self, device: DeviceId, state: DeviceState) -> Option<DeviceEvent> {
        debug_assert!(state.invariants_hold(), "bad state: {state:?}");

        let event = {
            let mut snapshot = self.snapshot.lock().expect("snapshot lock poisoned");
            let current = snapshot.get(device);
            if *current == state {
                return None;
            }
            let event = DeviceEvent {
                device,
                timestamp: Utc::now(),
                previous: current.clone(),
                current: state.clone(),
            };
            snapshot.set(device, state);
            event
        };

        self.publish(&event).await;
        Some(event)
    }

    /// Deliver an event to every live subscriber.
    ///
    /// A subscriber that cannot accept the message within the send timeout,
    /// or whose receiver is gone, is pruned. Never fails the caller.
    pub async fn publish(&self, event: &DeviceEvent) {
        let message = StatusMessage::from_state(event.device, &event.current);

        let targets: Vec<(u64, mpsc::Sender<StatusMessage>)> = self
            .subscribers
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();

        for (id, tx) in targets {
            if tx.send_timeout(message.clone(), SEND_TIMEOUT).await.is_err() {
                warn!(subscriber = id, "dropping unresponsive status subscriber");
                self.unsubscribe(id);
            }
        }
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}

/// One live subscription. Detaches from the hub on drop.
pub struct Subscription {
    hub: Arc<EventHub>,
    id: u64,
    rx: mpsc::Receiver<StatusMessage>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub async fn recv(&mut self) -> Option<StatusMessage> {
        self.rx.recv().await
    }

    /// Consume the subscription as a message stream; the hub registration is
    /// released when the stream is dropped.
    pub fn into_stream(self) -> impl Stream<Item = StatusMessage> + Send + 'static {
        SubscriptionStream { inner: self }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.hub.unsubscribe(self.id);
    }
}

struct SubscriptionStream {
    inner: Subscription,
}

impl Stream for SubscriptionStream {
    type Item = StatusMessage;

    fn poll_next(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Self::Item>> {
        self.inner.rx.poll_recv(cx)
    }
}
