//! camwarden - zero-touch camera manager
//!
//! Reconciles three authorities so every plugged UVC camera becomes a live
//! stream with no manual configuration:
//!
//! 1. the set of physically attached video devices,
//! 2. the streaming server's declared paths (MediaMTX),
//! 3. the orchestration API's webcam registrations (Moonraker).
//!
//! ## Components
//!
//! 1. SettingsStore - durable desired state (SQLite, single source of truth)
//! 2. HardwareProbe - CPU score, encoder detection, capability enumeration
//! 3. DeviceTracker - hotplug events -> stable logical cameras
//! 4. Profile selection - capabilities + score -> streaming profile
//! 5. Transcode synthesis - deterministic ffmpeg command strings
//! 6. StreamSupervisor - converges MediaMTX paths
//! 7. RegistrationSync - converges Moonraker webcams
//! 8. Reconciler - single-writer control loop over all of the above
//! 9. Event ingress - udev subscription with polling fallback
//!
//! ## Design principles
//!
//! - The settings store is the single source of truth for desired state
//! - Only the reconciler mutates the store or calls the backends
//! - Remote objects not shaped like our UIDs are never touched

pub mod device;
pub mod error;
pub mod hardware;
pub mod ingress;
pub mod mediamtx;
pub mod models;
pub mod moonraker;
pub mod profile;
pub mod reconciler;
pub mod registration_sync;
pub mod settings_store;
pub mod state;
pub mod stream_supervisor;
pub mod transcode;
pub mod web_api;

pub use error::{Error, Result};
pub use state::{AppConfig, AppState};
