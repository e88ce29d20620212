//! Configuration schema with defaults.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Top-level application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server: ServerSettings,
    pub monitor: MonitorSettings,
    pub devices: DeviceSettings,
}

/// HTTP server binding.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5000,
        }
    }
}

/// Device monitor tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorSettings {
    /// Poll interval per device, milliseconds.
    pub poll_interval_ms: u64,
    /// Hold time before a disappearance becomes a disconnect, seconds.
    pub grace_window_secs: u64,
    /// Upper bound on one probe, milliseconds.
    pub probe_timeout_ms: u64,
    /// Additional directories to scan for device volumes.
    pub extra_volume_roots: Vec<PathBuf>,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1500,
            grace_window_secs: 30,
            probe_timeout_ms: 2000,
            extra_volume_roots: Vec::new(),
        }
    }
}

/// Per-device user overrides.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceSettings {
    /// When set, the configured mount paths below take precedence over
    /// detected paths for the directory-open helper.
    pub developer_mode: bool,
    pub opz_mount_path: Option<PathBuf>,
    pub op1_mount_path: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toml_from_str(raw: &str) -> Settings {
        config::Config::builder()
            .add_source(config::File::from_str(raw, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.server.port, 5000);
        assert_eq!(settings.monitor.poll_interval_ms, 1500);
        assert_eq!(settings.monitor.grace_window_secs, 30);
        assert!(!settings.devices.developer_mode);
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let settings = toml_from_str(
            r#"
            [server]
            port = 8090

            [devices]
            developer_mode = true
            opz_mount_path = "/mnt/opz"
            "#,
        );
        assert_eq!(settings.server.port, 8090);
        assert_eq!(settings.server.host, "127.0.0.1");
        assert_eq!(settings.monitor.grace_window_secs, 30);
        assert!(settings.devices.developer_mode);
        assert_eq!(
            settings.devices.opz_mount_path,
            Some(PathBuf::from("/mnt/opz"))
        );
    }
}
