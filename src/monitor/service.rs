//! Background device monitor: the poll loops driving the status pipeline.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::settings::SettingsService;

use super::classify::Classifier;
use super::hub::EventHub;
use super::model::{DeviceId, Snapshot, profile};
use super::probe::Prober;

/// Monitor timing knobs, resolved from settings.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub poll_interval: Duration,
    pub grace_window: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(1500),
            grace_window: Duration::from_secs(30),
        }
    }
}

/// Repeatedly probes both device slots and feeds transitions into the hub.
///
/// Each device has its own cycle lock: its loop finishes (or times out) one
/// probe+classify+apply pass before the next starts, and an on-demand rescan
/// can never overlap the background loop for the same device.
pub struct DeviceMonitor {
    hub: Arc<EventHub>,
    prober: Arc<dyn Prober>,
    settings: Arc<SettingsService>,
    config: MonitorConfig,
    trackers: [Mutex<Classifier>; 2],
}

impl DeviceMonitor {
    pub fn new(
        hub: Arc<EventHub>,
        prober: Arc<dyn Prober>,
        settings: Arc<SettingsService>,
        config: MonitorConfig,
    ) -> Self {
        let trackers = [
            Mutex::new(Classifier::new(config.grace_window)),
            Mutex::new(Classifier::new(config.grace_window)),
        ];
        Self {
            hub,
            prober,
            settings,
            config,
            trackers,
        }
    }

    pub fn hub(&self) -> &Arc<EventHub> {
        &self.hub
    }

    /// Spawn one poll loop per device. Loops stop when the token fires.
    pub fn spawn(self: &Arc<Self>, cancel: CancellationToken) {
        for device in DeviceId::ALL {
            let monitor = Arc::clone(self);
            let cancel = cancel.clone();
            tokio::spawn(async move {
                monitor.poll_loop(device, cancel).await;
            });
        }
        info!(
            interval_ms = self.config.poll_interval.as_millis() as u64,
            "device monitor started"
        );
    }

    async fn poll_loop(&self, device: DeviceId, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(device = %device, "poll loop stopped");
                    return;
                }
                _ = interval.tick() => {
                    self.cycle(device).await;
                }
            }
        }
    }

    /// One probe+classify+apply pass for a device.
    pub async fn cycle(&self, device: DeviceId) {
        let mut classifier = self.trackers[device.index()].lock().await;

        let profile = profile(device);
        let facts = self.prober.probe(profile).await;
        let previous = self.hub.snapshot().get(device).clone();
        let state = classifier.classify(profile, &facts, &previous);

        if let Some(event) = self.hub.apply(device, state).await {
            info!(
                device = %device,
                connected = event.current.connected,
                mode = %event.current.mode,
                path = ?event.current.mount_path,
                "device transition"
            );
            self.settings.record_transition(&event).await;
        }
    }

    /// Probe both devices immediately and return the resulting snapshot.
    pub async fn scan_once(&self) -> Snapshot {
        tokio::join!(self.cycle(DeviceId::Opz), self.cycle(DeviceId::Op1));
        self.hub.snapshot()
    }
}
