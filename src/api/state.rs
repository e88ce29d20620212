//! Application state shared across handlers.

use std::sync::Arc;

use crate::monitor::{DeviceMonitor, EventHub};
use crate::settings::SettingsService;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Fan-out hub holding the device snapshot and live subscriptions.
    pub hub: Arc<EventHub>,
    /// Background device monitor (also serves on-demand rescans).
    pub monitor: Arc<DeviceMonitor>,
    /// Configuration plus persisted detected paths.
    pub settings: Arc<SettingsService>,
}

impl AppState {
    pub fn new(
        hub: Arc<EventHub>,
        monitor: Arc<DeviceMonitor>,
        settings: Arc<SettingsService>,
    ) -> Self {
        Self {
            hub,
            monitor,
            settings,
        }
    }
}
