//! Library client for the device status stream: the per-tab consumer and the
//! reconciliation state machine behind the page's status UI.

mod reconciler;
mod stream;

pub use reconciler::{
    ClientKnownState, IndicatorUpdate, KNOWN_STATE_KEY, KnownStateStore, Notification,
    NotificationKind, Outcome, Reconciler, SessionStore, Severity,
};
pub use stream::{ClientConfig, DeviceStatusClient};
