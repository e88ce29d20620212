//! Turns raw probe facts into stable device states.
//!
//! The classifier is the only place that applies disconnect hysteresis: a
//! device that vanishes mid mode-switch reboots its USB stack for a few
//! seconds, and reporting that gap as a disconnect would make every mode
//! switch flap. While the grace window is open the previously known state is
//! returned unchanged, so downstream diffing emits nothing.

use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use super::model::{DeviceMode, DeviceProfile, DeviceState};
use super::probe::{MountKind, RawFacts, UsbEnumeration};

/// Per-device classification state.
#[derive(Debug)]
pub struct Classifier {
    grace_window: Duration,
    /// Set while a disconnect observation is being held back.
    pending_gone_since: Option<Instant>,
}

impl Classifier {
    pub fn new(grace_window: Duration) -> Self {
        Self {
            grace_window,
            pending_gone_since: None,
        }
    }

    /// Classify one tick of raw facts against the last published state.
    pub fn classify(
        &mut self,
        profile: &DeviceProfile,
        facts: &RawFacts,
        previous: &DeviceState,
    ) -> DeviceState {
        let observed = observe(facts, previous);

        if observed.connected {
            if self.pending_gone_since.take().is_some() {
                debug!(device = %profile.id, "device re-enumerated within grace window");
            }
            return observed;
        }

        // A device that was never connected has nothing to hold back.
        if !previous.connected || previous.mode == DeviceMode::None {
            self.pending_gone_since = None;
            return observed;
        }

        let now = Instant::now();
        let since = *self.pending_gone_since.get_or_insert(now);
        if now.duration_since(since) < self.grace_window {
            // Still inside the grace window: externally nothing changed.
            return previous.clone();
        }

        debug!(device = %profile.id, "grace window elapsed, accepting disconnect");
        self.pending_gone_since = None;
        observed
    }
}

/// The state the facts describe, before hysteresis.
fn observe(facts: &RawFacts, previous: &DeviceState) -> DeviceState {
    let usb_detected = matches!(facts.usb, UsbEnumeration::Detected { .. });

    // A validated mount is authoritative even when USB enumeration is
    // unavailable (e.g. no permission to list devices).
    if let Some(mount) = &facts.mount {
        return match mount.kind {
            MountKind::Storage => DeviceState::storage(mount.path.clone(), usb_detected),
            MountKind::Upgrade => DeviceState::upgrade(usb_detected),
        };
    }

    match facts.usb {
        UsbEnumeration::Detected { storage_interface } => {
            if storage_interface {
                if previous.mount_path.is_some() {
                    // The volume went away while the device stayed enumerated.
                    DeviceState::mount_failed()
                } else {
                    // Enumerated as a disk but not mounted yet.
                    DeviceState::mounting()
                }
            } else {
                DeviceState::other()
            }
        }
        UsbEnumeration::NotDetected | UsbEnumeration::Unknown => DeviceState::disconnected(),
    }
}
