//! Device model: identities, profiles, tracked state, and wire messages.

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The two tracked device slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceId {
    Opz,
    Op1,
}

impl DeviceId {
    pub const ALL: [DeviceId; 2] = [DeviceId::Opz, DeviceId::Op1];

    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceId::Opz => "opz",
            DeviceId::Op1 => "op1",
        }
    }

    /// Stable index for per-device storage (`ALL[index] == self`).
    pub fn index(&self) -> usize {
        match self {
            DeviceId::Opz => 0,
            DeviceId::Op1 => 1,
        }
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operating mode a device presents over USB.
///
/// `None` is only valid while the device is not connected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceMode {
    /// Mass-storage filesystem, samples accessible.
    Storage,
    /// Firmware-upgrade interface.
    Upgrade,
    /// Enumerated but not storage (MIDI/normal mode, or powered off on cable).
    Other,
    /// Not connected.
    None,
}

impl fmt::Display for DeviceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeviceMode::Storage => "storage",
            DeviceMode::Upgrade => "upgrade",
            DeviceMode::Other => "other",
            DeviceMode::None => "none",
        };
        f.write_str(s)
    }
}

/// Expected on-disk layout of a mounted device volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceLayout {
    /// OP-Z: `samplepacks/` with numbered category folders.
    OpzSamplepacks,
    /// OP-1: top-level `drum/` and `synth/` folders.
    Op1DrumSynth,
}

/// Immutable per-device constants.
#[derive(Debug, Clone, Copy)]
pub struct DeviceProfile {
    pub id: DeviceId,
    pub name: &'static str,
    pub usb_vendor_id: u16,
    pub usb_product_ids: &'static [u16],
    pub layout: DeviceLayout,
}

/// Teenage Engineering USB vendor id (0x2367).
pub const TE_VENDOR_ID: u16 = 0x2367;

/// OP-Z. One product id for both normal and disk mode.
pub const OP_Z: DeviceProfile = DeviceProfile {
    id: DeviceId::Opz,
    name: "OP-Z",
    usb_vendor_id: TE_VENDOR_ID,
    usb_product_ids: &[0x000c],
    layout: DeviceLayout::OpzSamplepacks,
};

/// OP-1. 0x0002 is USB storage mode, 0x0004 is normal/MIDI mode.
pub const OP_1: DeviceProfile = DeviceProfile {
    id: DeviceId::Op1,
    name: "OP-1",
    usb_vendor_id: TE_VENDOR_ID,
    usb_product_ids: &[0x0002, 0x0004],
    layout: DeviceLayout::Op1DrumSynth,
};

/// Look up the profile for a device slot.
pub fn profile(id: DeviceId) -> &'static DeviceProfile {
    match id {
        DeviceId::Opz => &OP_Z,
        DeviceId::Op1 => &OP_1,
    }
}

/// Classified connection state of one device.
///
/// Invariants: `mode == None` exactly when `connected == false`, and
/// `mount_path` is only carried in storage mode while connected.
/// Construct through the helpers below to keep them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceState {
    pub connected: bool,
    pub usb_detected: bool,
    pub mode: DeviceMode,
    pub mount_path: Option<PathBuf>,
}

impl DeviceState {
    /// Not enumerated at all.
    pub fn disconnected() -> Self {
        Self {
            connected: false,
            usb_detected: false,
            mode: DeviceMode::None,
            mount_path: None,
        }
    }

    /// USB enumeration still present but the volume is gone: a mount failure,
    /// distinct from a clean disconnect.
    pub fn mount_failed() -> Self {
        Self {
            connected: false,
            usb_detected: true,
            mode: DeviceMode::None,
            mount_path: None,
        }
    }

    /// Storage mode with a resolved volume.
    pub fn storage(path: PathBuf, usb_detected: bool) -> Self {
        Self {
            connected: true,
            usb_detected,
            mode: DeviceMode::Storage,
            mount_path: Some(path),
        }
    }

    /// Storage-capable enumeration, volume not resolved yet.
    pub fn mounting() -> Self {
        Self {
            connected: true,
            usb_detected: true,
            mode: DeviceMode::Storage,
            mount_path: None,
        }
    }

    /// Firmware-upgrade interface.
    pub fn upgrade(usb_detected: bool) -> Self {
        Self {
            connected: true,
            usb_detected,
            mode: DeviceMode::Upgrade,
            mount_path: None,
        }
    }

    /// Enumerated in a non-storage mode.
    pub fn other() -> Self {
        Self {
            connected: true,
            usb_detected: true,
            mode: DeviceMode::Other,
            mount_path: None,
        }
    }

    /// Structural invariant check, used by tests and debug assertions.
    pub fn invariants_hold(&self) -> bool {
        let mode_matches = (self.mode == DeviceMode::None) == !self.connected;
        let path_ok =
            self.mount_path.is_none() || (self.mode == DeviceMode::Storage && self.connected);
        mode_matches && path_ok
    }
}

/// Current state of both tracked devices at one instant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub opz: DeviceState,
    pub op1: DeviceState,
}

impl Snapshot {
    pub fn get(&self, id: DeviceId) -> &DeviceState {
        match id {
            DeviceId::Opz => &self.opz,
            DeviceId::Op1 => &self.op1,
        }
    }

    pub fn set(&mut self, id: DeviceId, state: DeviceState) {
        match id {
            DeviceId::Opz => self.opz = state,
            DeviceId::Op1 => self.op1 = state,
        }
    }
}

impl Default for Snapshot {
    fn default() -> Self {
        Self {
            opz: DeviceState::disconnected(),
            op1: DeviceState::disconnected(),
        }
    }
}

/// One meaningful transition, emitted once and not persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceEvent {
    pub device: DeviceId,
    pub timestamp: DateTime<Utc>,
    pub previous: DeviceState,
    pub current: DeviceState,
}

/// Messages delivered over the live update stream.
///
/// Every message is independently parseable JSON tagged with `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StatusMessage {
    DeviceStatus {
        device: DeviceId,
        device_name: String,
        connected: bool,
        path: Option<PathBuf>,
        usb_detected: bool,
        mode: DeviceMode,
    },
}

impl StatusMessage {
    pub fn from_state(id: DeviceId, state: &DeviceState) -> Self {
        StatusMessage::DeviceStatus {
            device: id,
            device_name: profile(id).name.to_string(),
            connected: state.connected,
            path: state.mount_path.clone(),
            usb_detected: state.usb_detected,
            mode: state.mode,
        }
    }

    pub fn device(&self) -> DeviceId {
        match self {
            StatusMessage::DeviceStatus { device, .. } => *device,
        }
    }
}

/// Per-device entry of the snapshot query response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceReport {
    pub connected: bool,
    pub mode: DeviceMode,
    pub path: Option<PathBuf>,
    pub usb_detected: bool,
    pub device_name: String,
}

impl DeviceReport {
    pub fn from_state(id: DeviceId, state: &DeviceState) -> Self {
        Self {
            connected: state.connected,
            mode: state.mode,
            path: state.mount_path.clone(),
            usb_detected: state.usb_detected,
            device_name: profile(id).name.to_string(),
        }
    }
}

/// `GET /device-status` response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotReport {
    pub opz: DeviceReport,
    pub op1: DeviceReport,
}

impl From<&Snapshot> for SnapshotReport {
    fn from(snapshot: &Snapshot) -> Self {
        Self {
            opz: DeviceReport::from_state(DeviceId::Opz, &snapshot.opz),
            op1: DeviceReport::from_state(DeviceId::Op1, &snapshot.op1),
        }
    }
}

/// Resolve a mount path usable for opening the device folder, if any.
pub fn storage_path(state: &DeviceState) -> Option<&Path> {
    if state.mode == DeviceMode::Storage {
        state.mount_path.as_deref()
    } else {
        None
    }
}
