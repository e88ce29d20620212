//! Configuration loading and runtime settings service.
//!
//! Static configuration is layered from an optional TOML file and
//! `OPDECK_*` environment variables. Detected mount paths are runtime state,
//! persisted to a small JSON file so the directory-open helper keeps working
//! right after a restart.

mod schema;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};

pub use schema::{DeviceSettings, MonitorSettings, ServerSettings, Settings};

use crate::monitor::{DeviceEvent, DeviceId, DeviceMode};

const APP_NAME: &str = "opdeck";
const CONFIG_FILE: &str = "config.toml";
const STATE_FILE: &str = "detected_paths.json";

/// Load settings from the given file (or the default location) plus
/// environment overrides.
pub fn load_settings(config_path: Option<&Path>) -> Result<Settings> {
    let mut builder = Config::builder();

    match config_path {
        Some(path) => {
            builder = builder.add_source(File::from(path).format(FileFormat::Toml));
        }
        None => {
            if let Some(path) = default_config_path() {
                builder =
                    builder.add_source(File::from(path).format(FileFormat::Toml).required(false));
            }
        }
    }

    let config = builder
        .add_source(Environment::with_prefix("OPDECK").separator("__"))
        .build()
        .context("assembling configuration")?;

    config.try_deserialize().context("parsing configuration")
}

/// Default config file location (`~/.config/opdeck/config.toml`).
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(APP_NAME).join(CONFIG_FILE))
}

fn default_state_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(APP_NAME)
        .join(STATE_FILE)
}

/// Last detected storage mount path per device.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct DetectedPaths {
    opz: Option<PathBuf>,
    op1: Option<PathBuf>,
}

impl DetectedPaths {
    fn get(&self, id: DeviceId) -> Option<&PathBuf> {
        match id {
            DeviceId::Opz => self.opz.as_ref(),
            DeviceId::Op1 => self.op1.as_ref(),
        }
    }

    fn set(&mut self, id: DeviceId, path: Option<PathBuf>) {
        match id {
            DeviceId::Opz => self.opz = path,
            DeviceId::Op1 => self.op1 = path,
        }
    }
}

/// Runtime settings service: static config plus persisted detected paths.
pub struct SettingsService {
    settings: Settings,
    state_path: PathBuf,
    detected: Mutex<DetectedPaths>,
}

impl SettingsService {
    pub fn new(settings: Settings) -> Self {
        Self::with_state_path(settings, default_state_path())
    }

    pub fn with_state_path(settings: Settings, state_path: PathBuf) -> Self {
        let detected = load_detected(&state_path);
        Self {
            settings,
            state_path,
            detected: Mutex::new(detected),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn developer_mode(&self) -> bool {
        self.settings.devices.developer_mode
    }

    /// Developer-mode path override for a device, if configured.
    pub fn override_path(&self, id: DeviceId) -> Option<PathBuf> {
        match id {
            DeviceId::Opz => self.settings.devices.opz_mount_path.clone(),
            DeviceId::Op1 => self.settings.devices.op1_mount_path.clone(),
        }
    }

    /// Last persisted detected path for a device.
    pub async fn detected_path(&self, id: DeviceId) -> Option<PathBuf> {
        self.detected.lock().await.get(id).cloned()
    }

    /// Fallback path for the directory-open helper: developer override when
    /// developer mode is on, otherwise the persisted detected path.
    pub async fn open_path_fallback(&self, id: DeviceId) -> Option<PathBuf> {
        if self.developer_mode() {
            self.override_path(id)
        } else {
            self.detected_path(id).await
        }
    }

    /// Track a device transition: remember a freshly resolved storage mount,
    /// forget it on disconnect. No-op in developer mode.
    pub async fn record_transition(&self, event: &DeviceEvent) {
        if self.developer_mode() {
            return;
        }

        let update = if event.current.connected
            && event.current.mode == DeviceMode::Storage
            && event.current.mount_path.is_some()
        {
            Some(event.current.mount_path.clone())
        } else if !event.current.connected {
            Some(None)
        } else {
            None
        };

        let Some(path) = update else {
            return;
        };

        let mut detected = self.detected.lock().await;
        if detected.get(event.device).cloned() == path {
            return;
        }
        detected.set(event.device, path);
        let serialized = detected.clone();
        drop(detected);

        self.save(&serialized).await;
    }

    async fn save(&self, detected: &DetectedPaths) {
        let body = match serde_json::to_vec_pretty(detected) {
            Ok(body) => body,
            Err(err) => {
                warn!(error = %err, "failed to serialize detected paths");
                return;
            }
        };
        if let Some(parent) = self.state_path.parent() {
            if let Err(err) = tokio::fs::create_dir_all(parent).await {
                warn!(error = %err, "failed to create state directory");
                return;
            }
        }
        if let Err(err) = tokio::fs::write(&self.state_path, body).await {
            warn!(path = %self.state_path.display(), error = %err, "failed to persist detected paths");
        }
    }
}

fn load_detected(path: &Path) -> DetectedPaths {
    match std::fs::read(path) {
        Ok(raw) => match serde_json::from_slice(&raw) {
            Ok(detected) => detected,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "ignoring malformed state file");
                DetectedPaths::default()
            }
        },
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => DetectedPaths::default(),
        Err(err) => {
            debug!(path = %path.display(), error = %err, "state file unreadable");
            DetectedPaths::default()
        }
    }
}
