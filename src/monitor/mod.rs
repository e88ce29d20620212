//! Device connection tracking: probing, classification, and fan-out.
//!
//! The pipeline runs Prober -> Classifier -> hub diff/broadcast once per poll
//! tick per device. Request handlers only ever read the hub; device state is
//! mutated exclusively by this pipeline.

mod classify;
mod hub;
mod model;
mod probe;
mod service;

pub use classify::Classifier;
pub use hub::{EventHub, Subscription};
pub use model::{
    DeviceEvent, DeviceId, DeviceLayout, DeviceMode, DeviceProfile, DeviceReport, DeviceState,
    OP_1, OP_Z, Snapshot, SnapshotReport, StatusMessage, TE_VENDOR_ID, profile, storage_path,
};
pub use probe::{MountCandidate, MountKind, Prober, RawFacts, SystemProber, UsbEnumeration};
pub use service::{DeviceMonitor, MonitorConfig};
