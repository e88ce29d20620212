//! Test utilities and common setup.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;

use opdeck::api::{AppState, create_router};
use opdeck::monitor::{
    DeviceId, DeviceMonitor, DeviceProfile, EventHub, MonitorConfig, MountCandidate, MountKind,
    Prober, RawFacts, UsbEnumeration,
};
use opdeck::settings::{Settings, SettingsService};

/// Scripted prober: pops queued facts per device, then repeats the last one.
pub struct ScriptedProber {
    scripts: Mutex<[VecDeque<RawFacts>; 2]>,
    last: Mutex<[RawFacts; 2]>,
}

impl ScriptedProber {
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new([VecDeque::new(), VecDeque::new()]),
            last: Mutex::new([absent(), absent()]),
        }
    }

    pub fn push(&self, device: DeviceId, facts: RawFacts) {
        self.scripts.lock().unwrap()[device.index()].push_back(facts);
    }
}

#[async_trait]
impl Prober for ScriptedProber {
    async fn probe(&self, profile: &DeviceProfile) -> RawFacts {
        let idx = profile.id.index();
        if let Some(next) = self.scripts.lock().unwrap()[idx].pop_front() {
            self.last.lock().unwrap()[idx] = next.clone();
            return next;
        }
        self.last.lock().unwrap()[idx].clone()
    }
}

pub fn absent() -> RawFacts {
    RawFacts {
        usb: UsbEnumeration::NotDetected,
        mount: None,
    }
}

pub fn storage_mounted(path: &str) -> RawFacts {
    RawFacts {
        usb: UsbEnumeration::Detected {
            storage_interface: true,
        },
        mount: Some(MountCandidate {
            path: PathBuf::from(path),
            kind: MountKind::Storage,
        }),
    }
}

pub fn upgrade_mounted(path: &str) -> RawFacts {
    RawFacts {
        usb: UsbEnumeration::Detected {
            storage_interface: true,
        },
        mount: Some(MountCandidate {
            path: PathBuf::from(path),
            kind: MountKind::Upgrade,
        }),
    }
}

pub fn usb_other() -> RawFacts {
    RawFacts {
        usb: UsbEnumeration::Detected {
            storage_interface: false,
        },
        mount: None,
    }
}

/// A test application. The background poller is not spawned; tests drive
/// cycles through the monitor (or the refresh endpoint) for determinism.
pub struct TestApp {
    pub router: Router,
    pub prober: Arc<ScriptedProber>,
    pub monitor: Arc<DeviceMonitor>,
    pub hub: Arc<EventHub>,
    _state_dir: tempfile::TempDir,
}

pub fn test_app() -> TestApp {
    let state_dir = tempfile::tempdir().unwrap();
    let settings = Arc::new(SettingsService::with_state_path(
        Settings::default(),
        state_dir.path().join("detected_paths.json"),
    ));

    let prober = Arc::new(ScriptedProber::new());
    let hub = Arc::new(EventHub::new());
    // Zero grace window: disconnects report on the next cycle in tests.
    let config = MonitorConfig {
        poll_interval: Duration::from_millis(50),
        grace_window: Duration::ZERO,
    };
    let monitor = Arc::new(DeviceMonitor::new(
        Arc::clone(&hub),
        Arc::clone(&prober) as Arc<dyn Prober>,
        Arc::clone(&settings),
        config,
    ));

    let state = AppState::new(Arc::clone(&hub), Arc::clone(&monitor), settings);
    TestApp {
        router: create_router(state),
        prober,
        monitor,
        hub,
        _state_dir: state_dir,
    }
}
