//! Per-tab reconciliation of the device status stream.
//!
//! The stream restarts on every navigation and replays the full snapshot on
//! attach, so a tab cannot tell "just changed" from "already known" by the
//! stream alone. The reconciler holds that judgement: state persisted across
//! navigations within the browsing session records the last connection
//! booleans the tab has already reacted to, and only genuine transitions
//! against it surface a notification. Status indicators are updated on every
//! report regardless.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::monitor::{DeviceId, DeviceMode, StatusMessage};

/// Fixed key under which the known state is persisted.
pub const KNOWN_STATE_KEY: &str = "opdeck.device_known_state";

/// Last connection boolean the tab has already reacted to, per device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientKnownState {
    pub opz: bool,
    pub op1: bool,
}

impl ClientKnownState {
    pub fn get(&self, id: DeviceId) -> bool {
        match id {
            DeviceId::Opz => self.opz,
            DeviceId::Op1 => self.op1,
        }
    }

    pub fn set(&mut self, id: DeviceId, connected: bool) {
        match id {
            DeviceId::Opz => self.opz = connected,
            DeviceId::Op1 => self.op1 = connected,
        }
    }
}

/// Session-scoped persistence for [`ClientKnownState`].
///
/// Lives exactly as long as the browsing session: across navigations and
/// stream reconnects, but not across sessions. Owned by one tab, never
/// shared.
pub trait KnownStateStore: Send {
    fn load(&self) -> Option<ClientKnownState>;
    fn store(&mut self, state: &ClientKnownState);
}

/// In-memory key-value store, the `sessionStorage` analogue.
#[derive(Debug, Default)]
pub struct SessionStore {
    entries: HashMap<String, String>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KnownStateStore for SessionStore {
    fn load(&self) -> Option<ClientKnownState> {
        let raw = self.entries.get(KNOWN_STATE_KEY)?;
        serde_json::from_str(raw).ok()
    }

    fn store(&mut self, state: &ClientKnownState) {
        if let Ok(raw) = serde_json::to_string(state) {
            self.entries.insert(KNOWN_STATE_KEY.to_string(), raw);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
}

/// What a surfaced notification is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    /// Storage mode with a resolved path.
    Mounted,
    /// Storage mode, volume not resolved yet.
    Mounting,
    /// Firmware-upgrade interface.
    UpgradeMode,
    /// Connected without disk access.
    ConnectedOther,
    /// Clean disconnect.
    Disconnected,
    /// USB still enumerated but the volume is gone.
    MountError,
}

/// A user-facing notification for a genuine transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub device: DeviceId,
    pub device_name: String,
    pub severity: Severity,
    pub kind: NotificationKind,
    pub message: String,
    /// Transient notices (mounting) dismiss themselves after a short delay.
    pub auto_dismiss: bool,
}

/// Status indicator refresh, emitted for every processed report.
#[derive(Debug, Clone, PartialEq)]
pub struct IndicatorUpdate {
    pub device: DeviceId,
    pub device_name: String,
    pub connected: bool,
    pub mode: DeviceMode,
    pub path: Option<std::path::PathBuf>,
}

/// Result of processing one stream message.
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    pub indicator: IndicatorUpdate,
    pub notification: Option<Notification>,
}

/// Per-tab reconciliation state machine.
pub struct Reconciler<S: KnownStateStore> {
    store: S,
    known: ClientKnownState,
    /// Whether each device has reported at least once this page load.
    reported: [bool; 2],
}

impl<S: KnownStateStore> Reconciler<S> {
    /// Read the persisted known state once at tab initialization.
    pub fn new(store: S) -> Self {
        let known = store.load().unwrap_or_default();
        Self {
            store,
            known,
            reported: [false, false],
        }
    }

    /// The first-load phase ends once both devices have reported.
    pub fn first_load_complete(&self) -> bool {
        self.reported.iter().all(|seen| *seen)
    }

    pub fn known_state(&self) -> ClientKnownState {
        self.known
    }

    /// Process one report to completion: decide whether to notify, then
    /// update the indicator and the persisted known state.
    pub fn process(&mut self, message: &StatusMessage) -> Outcome {
        let StatusMessage::DeviceStatus {
            device,
            device_name,
            connected,
            path,
            usb_detected,
            mode,
        } = message;

        let first_report = !self.reported[device.index()];
        let previously_connected = self.known.get(*device);

        let notification = if *connected && !previously_connected {
            Some(connect_notification(
                *device,
                device_name,
                *mode,
                path.as_deref(),
            ))
        } else if !first_report && !*connected && previously_connected {
            Some(disconnect_notification(*device, device_name, *usb_detected))
        } else {
            // Already known from a previous page load or an earlier report.
            None
        };

        self.reported[device.index()] = true;
        self.known.set(*device, *connected);
        self.store.store(&self.known);

        Outcome {
            indicator: IndicatorUpdate {
                device: *device,
                device_name: device_name.clone(),
                connected: *connected,
                mode: *mode,
                path: path.clone(),
            },
            notification,
        }
    }
}

fn connect_notification(
    device: DeviceId,
    name: &str,
    mode: DeviceMode,
    path: Option<&std::path::Path>,
) -> Notification {
    let (severity, kind, message, auto_dismiss) = match (mode, path) {
        (DeviceMode::Storage, Some(path)) => (
            Severity::Info,
            NotificationKind::Mounted,
            format!("{name} mounted at {}", path.display()),
            false,
        ),
        (DeviceMode::Storage, None) => (
            Severity::Info,
            NotificationKind::Mounting,
            format!("{name} connected, mounting..."),
            true,
        ),
        (DeviceMode::Upgrade, _) => (
            Severity::Warning,
            NotificationKind::UpgradeMode,
            format!("{name} is in firmware upgrade mode"),
            false,
        ),
        _ => (
            Severity::Info,
            NotificationKind::ConnectedOther,
            format!("{name} connected (no disk access in this mode)"),
            false,
        ),
    };

    Notification {
        device,
        device_name: name.to_string(),
        severity,
        kind,
        message,
        auto_dismiss,
    }
}

fn disconnect_notification(device: DeviceId, name: &str, usb_detected: bool) -> Notification {
    if usb_detected {
        Notification {
            device,
            device_name: name.to_string(),
            severity: Severity::Warning,
            kind: NotificationKind::MountError,
            message: format!("{name} is still plugged in but its disk is gone, try reconnecting"),
            auto_dismiss: false,
        }
    } else {
        Notification {
            device,
            device_name: name.to_string(),
            severity: Severity::Info,
            kind: NotificationKind::Disconnected,
            message: format!("{name} disconnected"),
            auto_dismiss: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::DeviceState;
    use std::path::PathBuf;

    fn report(device: DeviceId, state: &DeviceState) -> StatusMessage {
        StatusMessage::from_state(device, state)
    }

    fn storage() -> DeviceState {
        DeviceState::storage(PathBuf::from("/Volumes/OPZ"), true)
    }

    fn store_with(opz: bool, op1: bool) -> SessionStore {
        let mut store = SessionStore::new();
        store.store(&ClientKnownState { opz, op1 });
        store
    }

    #[test]
    fn test_fresh_tab_notifies_on_first_connect() {
        let mut reconciler = Reconciler::new(SessionStore::new());
        let outcome = reconciler.process(&report(DeviceId::Opz, &storage()));

        let note = outcome.notification.expect("one connect notification");
        assert_eq!(note.kind, NotificationKind::Mounted);
        assert_eq!(note.message, "OP-Z mounted at /Volumes/OPZ");
        assert!(outcome.indicator.connected);
    }

    #[test]
    fn test_navigation_reload_suppresses_known_connect() {
        // Persisted state says the tab already reacted to opz being connected.
        let mut reconciler = Reconciler::new(store_with(true, false));
        let outcome = reconciler.process(&report(DeviceId::Opz, &storage()));

        assert!(outcome.notification.is_none());
        // The indicator still updates.
        assert!(outcome.indicator.connected);
        assert_eq!(outcome.indicator.mode, DeviceMode::Storage);
    }

    #[test]
    fn test_first_load_disconnect_is_silent_but_recorded() {
        let mut reconciler = Reconciler::new(store_with(true, false));
        let outcome = reconciler.process(&report(DeviceId::Opz, &DeviceState::disconnected()));

        assert!(outcome.notification.is_none());
        assert!(!reconciler.known_state().opz);

        // The next connect is a genuine transition again.
        let outcome = reconciler.process(&report(DeviceId::Opz, &storage()));
        assert!(outcome.notification.is_some());
    }

    #[test]
    fn test_steady_state_disconnect_notifies() {
        let mut reconciler = Reconciler::new(SessionStore::new());
        reconciler.process(&report(DeviceId::Opz, &storage()));

        let outcome = reconciler.process(&report(DeviceId::Opz, &DeviceState::disconnected()));
        let note = outcome.notification.expect("disconnect notification");
        assert_eq!(note.kind, NotificationKind::Disconnected);
        assert_eq!(note.severity, Severity::Info);
    }

    #[test]
    fn test_mount_error_disconnect_is_a_warning() {
        let mut reconciler = Reconciler::new(SessionStore::new());
        reconciler.process(&report(DeviceId::Opz, &storage()));

        let outcome = reconciler.process(&report(DeviceId::Opz, &DeviceState::mount_failed()));
        let note = outcome.notification.expect("mount error notification");
        assert_eq!(note.kind, NotificationKind::MountError);
        assert_eq!(note.severity, Severity::Warning);
    }

    #[test]
    fn test_mounting_notice_auto_dismisses() {
        let mut reconciler = Reconciler::new(SessionStore::new());
        let outcome = reconciler.process(&report(DeviceId::Op1, &DeviceState::mounting()));

        let note = outcome.notification.expect("mounting notification");
        assert_eq!(note.kind, NotificationKind::Mounting);
        assert!(note.auto_dismiss);
    }

    #[test]
    fn test_upgrade_mode_connect_is_a_warning() {
        let mut reconciler = Reconciler::new(SessionStore::new());
        let outcome = reconciler.process(&report(DeviceId::Opz, &DeviceState::upgrade(true)));
        assert_eq!(
            outcome.notification.unwrap().kind,
            NotificationKind::UpgradeMode
        );
    }

    #[test]
    fn test_reconnect_replay_produces_no_duplicates() {
        let mut reconciler = Reconciler::new(SessionStore::new());

        // Initial replay: opz connected (notify once), op1 absent.
        assert!(
            reconciler
                .process(&report(DeviceId::Opz, &storage()))
                .notification
                .is_some()
        );
        assert!(
            reconciler
                .process(&report(DeviceId::Op1, &DeviceState::disconnected()))
                .notification
                .is_none()
        );
        assert!(reconciler.first_load_complete());

        // Stream drops; the server replays the same snapshot on reconnect.
        for _ in 0..2 {
            assert!(
                reconciler
                    .process(&report(DeviceId::Opz, &storage()))
                    .notification
                    .is_none()
            );
            assert!(
                reconciler
                    .process(&report(DeviceId::Op1, &DeviceState::disconnected()))
                    .notification
                    .is_none()
            );
        }
    }

    #[test]
    fn test_known_state_is_persisted_after_every_report() {
        let mut store = SessionStore::new();
        store.store(&ClientKnownState {
            opz: false,
            op1: true,
        });

        let mut reconciler = Reconciler::new(store);
        reconciler.process(&report(DeviceId::Opz, &storage()));

        assert_eq!(
            reconciler.known_state(),
            ClientKnownState {
                opz: true,
                op1: true
            }
        );
    }

    #[test]
    fn test_connected_other_notifies_after_fresh_load() {
        let mut reconciler = Reconciler::new(SessionStore::new());
        let outcome = reconciler.process(&report(DeviceId::Op1, &DeviceState::other()));
        let note = outcome.notification.unwrap();
        assert_eq!(note.kind, NotificationKind::ConnectedOther);
        assert_eq!(note.severity, Severity::Info);
    }
}
