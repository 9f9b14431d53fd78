//! Device lifecycle tracking
//!
//! ## Responsibilities
//!
//! - Stable UID derivation from hardware fingerprints
//! - Device inspection (sysfs attributes + V4L2 capabilities)
//! - The tracker state machine turning raw hotplug messages into
//!   appeared / changed / disappeared events for the reconciler

mod fingerprint;
mod inspector;
mod tracker;

pub use fingerprint::{is_uid_shaped, Fingerprint};
pub use inspector::{DeviceInspector, DeviceSnapshot, SysfsInspector};
pub use tracker::{DeviceEvent, DeviceTracker, HotplugAction, HotplugMessage, DEBOUNCE_WINDOW};
