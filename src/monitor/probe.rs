//! Device probing: raw USB and mount facts from the OS.
//!
//! A probe is a pure read of OS state. It never errors to the caller: a scan
//! that hangs past the probe timeout (mount enumeration can stall on a
//! failing device) is absorbed into `UsbEnumeration::Unknown` so one stuck
//! device cannot stall the poll cycle.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::model::{DeviceLayout, DeviceProfile};

/// USB mass-storage interface class.
const USB_CLASS_MASS_STORAGE: u8 = 0x08;

/// Sample category folders expected inside an OP-Z `samplepacks/` directory.
const OPZ_SAMPLE_CATEGORIES: [&str; 8] = [
    "1-kick", "2-snare", "3-perc", "4-fx", "5-bass", "6-lead", "7-arpeggio", "8-chord",
];

const DIR_SAMPLEPACKS: &str = "samplepacks";
const DIR_DRUM: &str = "drum";
const DIR_SYNTH: &str = "synth";

/// Files/folders present on an OP-Z volume that is in upgrade mode instead of
/// normal disk mode.
const OPZ_UPGRADE_MARKERS: [&str; 2] = ["how_to_upgrade.txt", "systeminfo"];

/// Result of a USB enumeration check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsbEnumeration {
    /// The device is enumerated. `storage_interface` is set when it exposes a
    /// mass-storage interface (disk or upgrade mode rather than MIDI).
    Detected { storage_interface: bool },
    /// No matching enumeration.
    NotDetected,
    /// The probe timed out or USB enumeration was unavailable.
    Unknown,
}

/// What kind of device volume a mount candidate looks like.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountKind {
    Storage,
    Upgrade,
}

/// A resolved, layout-validated mount point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountCandidate {
    pub path: PathBuf,
    pub kind: MountKind,
}

/// Raw facts returned by one probe, before classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFacts {
    pub usb: UsbEnumeration,
    pub mount: Option<MountCandidate>,
}

impl RawFacts {
    /// The absorbing result for a timed-out or failed probe.
    pub fn unknown() -> Self {
        Self {
            usb: UsbEnumeration::Unknown,
            mount: None,
        }
    }
}

/// Read-only probe of OS state for one device slot.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, profile: &DeviceProfile) -> RawFacts;
}

/// Probes the host USB subsystem and platform volume roots.
pub struct SystemProber {
    timeout: Duration,
    extra_roots: Vec<PathBuf>,
}

impl SystemProber {
    pub fn new(timeout: Duration, extra_roots: Vec<PathBuf>) -> Self {
        Self {
            timeout,
            extra_roots,
        }
    }
}

#[async_trait]
impl Prober for SystemProber {
    async fn probe(&self, profile: &DeviceProfile) -> RawFacts {
        let profile = *profile;
        let extra_roots = self.extra_roots.clone();
        let scan = tokio::task::spawn_blocking(move || probe_blocking(&profile, &extra_roots));

        match tokio::time::timeout(self.timeout, scan).await {
            Ok(Ok(facts)) => facts,
            Ok(Err(err)) => {
                warn!(device = %profile.id, error = %err, "probe task panicked");
                RawFacts::unknown()
            }
            Err(_) => {
                warn!(
                    device = %profile.id,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "probe timed out"
                );
                RawFacts::unknown()
            }
        }
    }
}

fn probe_blocking(profile: &DeviceProfile, extra_roots: &[PathBuf]) -> RawFacts {
    let usb = enumerate_usb(profile);
    let mount = find_device_mount(profile, extra_roots);
    RawFacts { usb, mount }
}

/// Check USB enumeration for the profile's vendor/product ids.
fn enumerate_usb(profile: &DeviceProfile) -> UsbEnumeration {
    let devices = match nusb::list_devices() {
        Ok(devices) => devices,
        Err(err) => {
            debug!(device = %profile.id, error = %err, "usb enumeration unavailable");
            return UsbEnumeration::Unknown;
        }
    };

    for info in devices {
        if info.vendor_id() != profile.usb_vendor_id
            || !profile.usb_product_ids.contains(&info.product_id())
        {
            continue;
        }
        let storage_interface = info.class() == USB_CLASS_MASS_STORAGE
            || info
                .interfaces()
                .any(|iface| iface.class() == USB_CLASS_MASS_STORAGE);
        return UsbEnumeration::Detected { storage_interface };
    }

    UsbEnumeration::NotDetected
}

/// Scan platform volume roots for a mounted device volume.
pub fn find_device_mount(
    profile: &DeviceProfile,
    extra_roots: &[PathBuf],
) -> Option<MountCandidate> {
    for candidate in mount_candidates(extra_roots) {
        if let Some(found) = inspect_candidate(profile, &candidate) {
            return Some(found);
        }
    }
    None
}

/// Classify one candidate directory against the profile's expected layout.
fn inspect_candidate(profile: &DeviceProfile, path: &Path) -> Option<MountCandidate> {
    if !path.is_dir() {
        return None;
    }

    // Upgrade mode replaces the samplepacks folder with upgrade markers.
    if profile.layout == DeviceLayout::OpzSamplepacks && is_opz_upgrade_volume(path) {
        return Some(MountCandidate {
            path: path.to_path_buf(),
            kind: MountKind::Upgrade,
        });
    }

    if validate_layout(profile.layout, path) {
        return Some(MountCandidate {
            path: path.to_path_buf(),
            kind: MountKind::Storage,
        });
    }

    None
}

/// Validate that a path contains the expected device folder structure.
pub fn validate_layout(layout: DeviceLayout, path: &Path) -> bool {
    match layout {
        DeviceLayout::Op1DrumSynth => path.join(DIR_DRUM).is_dir() && path.join(DIR_SYNTH).is_dir(),
        DeviceLayout::OpzSamplepacks => {
            let samplepacks = path.join(DIR_SAMPLEPACKS);
            if !samplepacks.is_dir() {
                return false;
            }
            // A volume with none of the category folders is not an OP-Z.
            OPZ_SAMPLE_CATEGORIES
                .iter()
                .any(|category| samplepacks.join(category).exists())
        }
    }
}

/// Detect an OP-Z volume rebooted into firmware-upgrade mode.
pub fn is_opz_upgrade_volume(path: &Path) -> bool {
    OPZ_UPGRADE_MARKERS
        .iter()
        .any(|marker| path.join(marker).exists())
}

/// Candidate mount points for the current platform, plus configured extras.
fn mount_candidates(extra_roots: &[PathBuf]) -> Vec<PathBuf> {
    let mut candidates = Vec::new();

    if cfg!(target_os = "macos") {
        push_children(Path::new("/Volumes"), &mut candidates);
    } else if cfg!(windows) {
        for letter in b'A'..=b'Z' {
            candidates.push(PathBuf::from(format!("{}:\\", letter as char)));
        }
    } else {
        push_children(Path::new("/media"), &mut candidates);
        // /run/media/<user>/<volume>
        if let Ok(users) = std::fs::read_dir("/run/media") {
            for user in users.flatten() {
                push_children(&user.path(), &mut candidates);
            }
        }
    }

    for root in extra_roots {
        push_children(root, &mut candidates);
        candidates.push(root.clone());
    }

    candidates
}

fn push_children(root: &Path, out: &mut Vec<PathBuf>) {
    if let Ok(entries) = std::fs::read_dir(root) {
        for entry in entries.flatten() {
            out.push(entry.path());
        }
    }
}
