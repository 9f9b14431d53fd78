//! Reconciler - the control loop
//!
//! ## Responsibilities
//!
//! - Drain device events into the settings store
//! - Compute desired state and converge both backends against it
//! - Serialize every state transition: this is the only task that mutates
//!   the store or issues convergence calls
//!
//! Ticks fire on device events and on a periodic timer, coalesced through a
//! single-slot queue. Administrative operations enqueue a tick with a reply
//! channel and receive the tick's report once convergence settled.

mod backoff;

pub use backoff::{BackoffTable, BACKOFF_BASE, BACKOFF_CAP};

use crate::device::DeviceEvent;
use crate::error::Result;
use crate::hardware::HardwareProbe;
use crate::models::{Backend, SyncError, TickReport};
use crate::profile::{self, Overrides};
use crate::registration_sync::{render_registration, RegistrationSync, RegistryBackend, WebcamRegistration};
use crate::settings_store::{CameraRecord, SettingsStore};
use crate::stream_supervisor::{StreamBackend, StreamSupervisor};
use crate::transcode::synthesize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio_util::sync::CancellationToken;

/// Periodic tick cadence.
pub const TICK_INTERVAL: Duration = Duration::from_secs(10);
/// Upper bound for one tick, health probes and fan-out included.
pub const TICK_BUDGET: Duration = Duration::from_secs(30);

/// Request for one reconcile pass.
struct TickRequest {
    reply: Option<oneshot::Sender<TickReport>>,
}

/// Liveness of the two converged backends, as of the last tick.
#[derive(Debug, Clone, Copy, Default)]
pub struct BackendHealth {
    pub stream_reachable: bool,
    pub registry_reachable: bool,
}

/// Cheap cloneable handle for triggering ticks.
#[derive(Clone)]
pub struct ReconcilerHandle {
    tx: mpsc::Sender<TickRequest>,
}

impl ReconcilerHandle {
    /// Fire-and-forget trigger. A full queue means a tick is already
    /// pending; the trigger coalesces into it.
    pub fn trigger(&self) {
        let _ = self.tx.try_send(TickRequest { reply: None });
    }

    /// Request a tick and wait for its report (admin surface path).
    pub async fn reconcile(&self) -> TickReport {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self
            .tx
            .send(TickRequest {
                reply: Some(reply_tx),
            })
            .await
            .is_err()
        {
            return TickReport::default();
        }

        match tokio::time::timeout(TICK_BUDGET * 2, reply_rx).await {
            Ok(Ok(report)) => report,
            _ => TickReport::default(),
        }
    }
}

/// Spawn the periodic trigger task.
pub fn spawn_timer(handle: ReconcilerHandle, cancel: CancellationToken) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(TICK_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The immediate first tick duplicates the startup reconcile
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => handle.trigger(),
            }
        }
    });
}

pub struct Reconciler {
    store: SettingsStore,
    probe: HardwareProbe,
    stream: StreamSupervisor,
    registry: RegistrationSync,
    /// RTSP ingest root rendered into transcoder commands
    rtsp_base: String,
    backoff: BackoffTable,
    health: Arc<RwLock<BackendHealth>>,
    events: mpsc::Receiver<DeviceEvent>,
    ticks: mpsc::Receiver<TickRequest>,
    pending_events: Vec<DeviceEvent>,
}

impl Reconciler {
    pub fn new(
        store: SettingsStore,
        probe: HardwareProbe,
        stream_backend: Arc<dyn StreamBackend>,
        registry_backend: Arc<dyn RegistryBackend>,
        rtsp_base: String,
    ) -> (
        Self,
        ReconcilerHandle,
        mpsc::Sender<DeviceEvent>,
        Arc<RwLock<BackendHealth>>,
    ) {
        let (event_tx, event_rx) = mpsc::channel(64);
        // Single slot: extra triggers during an in-flight tick coalesce
        let (tick_tx, tick_rx) = mpsc::channel(1);
        let health = Arc::new(RwLock::new(BackendHealth::default()));

        let reconciler = Self {
            store,
            probe,
            stream: StreamSupervisor::new(stream_backend),
            registry: RegistrationSync::new(registry_backend),
            rtsp_base,
            backoff: BackoffTable::new(),
            health: health.clone(),
            events: event_rx,
            ticks: tick_rx,
            pending_events: Vec::new(),
        };

        (reconciler, ReconcilerHandle { tx: tick_tx }, event_tx, health)
    }

    /// Run until shutdown. Device-event arrival and tick requests both
    /// trigger a pass; the loop body serializes them by construction.
    pub async fn run(mut self, cancel: CancellationToken) {
        tracing::info!("Reconciler started");

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => break,

                event = self.events.recv() => {
                    match event {
                        Some(event) => {
                            self.pending_events.push(event);
                            let _ = self.guarded_tick().await;
                        }
                        None => {
                            tracing::error!("Device event channel closed, requesting shutdown");
                            cancel.cancel();
                            break;
                        }
                    }
                }

                request = self.ticks.recv() => {
                    match request {
                        Some(request) => {
                            let report = self.guarded_tick().await;
                            if let Some(reply) = request.reply {
                                let _ = reply.send(report);
                            }
                        }
                        None => break,
                    }
                }
            }
        }

        // In-progress store writes completed inside the tick; nothing is
        // buffered beyond this point.
        tracing::info!("Reconciler stopped");
    }

    async fn guarded_tick(&mut self) -> TickReport {
        match tokio::time::timeout(TICK_BUDGET, self.tick()).await {
            Ok(report) => report,
            Err(_) => {
                tracing::error!(budget = ?TICK_BUDGET, "Tick exceeded budget");
                TickReport::default()
            }
        }
    }

    /// One reconcile pass. Public so the scenario tests can drive passes
    /// without the run loop.
    pub async fn tick(&mut self) -> TickReport {
        let mut report = TickReport::default();

        // 1. Device events first so desired state reflects them
        let mut events = std::mem::take(&mut self.pending_events);
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        for event in events {
            if let Err(e) = self.apply_event(event).await {
                tracing::error!(error = %e, "Failed to apply device event");
            }
        }

        // 2. Desired state
        let records = match self.store.list().await {
            Ok(records) => records,
            Err(e) => {
                tracing::error!(error = %e, "Failed to read settings store");
                return report;
            }
        };
        let settings = match self.store.system_settings().await {
            Ok(settings) => settings,
            Err(e) => {
                tracing::error!(error = %e, "Failed to read system settings");
                return report;
            }
        };

        // 3. Liveness, probed in parallel with short deadlines
        let (stream_ok, registry_ok) = tokio::join!(
            self.stream.backend().health(),
            self.registry.backend().health()
        );
        *self.health.write().await = BackendHealth {
            stream_reachable: stream_ok,
            registry_reachable: registry_ok,
        };

        // 4. Stream paths
        let desired_streams: BTreeMap<String, String> = records
            .iter()
            .filter(|record| record.enabled && record.connected)
            .map(|record| (record.uid.clone(), synthesize(record, &self.rtsp_base)))
            .collect();

        if stream_ok {
            let (ops, errors) = self
                .stream
                .converge(&desired_streams, &mut self.backoff)
                .await;
            report.stream_ops = ops;
            report.sync_errors.extend(errors);
        } else {
            tracing::warn!("Streaming server unreachable, skipping stream convergence");
            for uid in desired_streams.keys() {
                self.backoff.record_failure(Backend::Stream, uid);
            }
            report.sync_errors.push(SyncError {
                camera_uid: None,
                backend: Backend::Stream,
                kind: "unreachable".to_string(),
                message: "streaming server health probe failed".to_string(),
            });
        }

        // 5. Webcam registrations
        let desired_webcams: BTreeMap<String, WebcamRegistration> = records
            .iter()
            .filter(|record| record.enabled && record.connected && record.moonraker_enabled)
            .map(|record| {
                (
                    record.uid.clone(),
                    render_registration(&record.uid, &record.friendly_name, &settings),
                )
            })
            .collect();

        if registry_ok {
            let (ops, errors) = self
                .registry
                .converge(&desired_webcams, &mut self.backoff)
                .await;
            report.registry_ops = ops;
            report.sync_errors.extend(errors);
        } else {
            tracing::warn!("Orchestration API unreachable, skipping registration sync");
            for uid in desired_webcams.keys() {
                self.backoff.record_failure(Backend::Registry, uid);
            }
            report.sync_errors.push(SyncError {
                camera_uid: None,
                backend: Backend::Registry,
                kind: "unreachable".to_string(),
                message: "orchestration API health probe failed".to_string(),
            });
        }

        // 6. Commit the tick's failures to the operational log
        for error in &report.sync_errors {
            let _ = self
                .store
                .append_log(
                    "warning",
                    error.camera_uid.as_deref(),
                    &format!("{}: {}", error.backend.as_str(), error.message),
                )
                .await;
        }

        tracing::debug!(
            stream_ops = report.stream_ops,
            registry_ops = report.registry_ops,
            errors = report.sync_errors.len(),
            "Tick complete"
        );

        report
    }

    async fn apply_event(&mut self, event: DeviceEvent) -> Result<()> {
        match event {
            DeviceEvent::Appeared {
                path,
                hardware_name,
                fingerprint,
                capabilities,
            } => {
                let uid = fingerprint.uid();
                let device_path = path.display().to_string();

                match self.store.get(&uid).await? {
                    Some(mut record) => {
                        record.connected = true;
                        record.device_path = Some(device_path);
                        record.hardware_name = hardware_name;
                        if capabilities.is_empty() {
                            tracing::warn!(
                                uid = %uid,
                                "Probe yielded no capabilities, keeping last known"
                            );
                        } else {
                            record.capabilities = capabilities;
                        }
                        record.updated_at = chrono::Utc::now();
                        self.store.upsert(&record).await?;
                        self.store
                            .append_log(
                                "info",
                                Some(&uid),
                                &format!("camera reconnected: {}", record.friendly_name),
                            )
                            .await?;
                    }
                    None => {
                        let selection = profile::select(
                            &capabilities,
                            self.probe.effective_score(),
                            &Overrides::default(),
                            &self.probe.encoders,
                        );

                        let mut record = CameraRecord::new(
                            uid.clone(),
                            fingerprint,
                            hardware_name,
                            Some(device_path),
                            capabilities,
                        );
                        record.format = selection.format;
                        record.resolution = selection.resolution;
                        record.framerate = selection.framerate;
                        record.bitrate = selection.bitrate;
                        record.encoder = selection.encoder;
                        record.connected = true;

                        self.store.upsert(&record).await?;
                        self.store
                            .append_log(
                                "info",
                                Some(&uid),
                                &format!("new camera: {}", record.hardware_name),
                            )
                            .await?;
                        for warning in selection.warnings {
                            self.store
                                .append_log("warning", Some(&uid), &warning)
                                .await?;
                        }
                    }
                }
            }

            DeviceEvent::Changed { uid, capabilities } => {
                if let Some(mut record) = self.store.get(&uid).await? {
                    if capabilities.is_empty() {
                        tracing::warn!(uid = %uid, "Ignoring empty capability update");
                    } else {
                        record.capabilities = capabilities;
                        record.updated_at = chrono::Utc::now();
                        self.store.upsert(&record).await?;
                    }
                }
            }

            DeviceEvent::Disappeared { uid } => {
                if let Some(mut record) = self.store.get(&uid).await? {
                    record.connected = false;
                    record.device_path = None;
                    record.updated_at = chrono::Utc::now();
                    self.store.upsert(&record).await?;
                    self.store
                        .append_log(
                            "info",
                            Some(&uid),
                            &format!("camera disconnected: {}", record.friendly_name),
                        )
                        .await?;
                }
            }
        }

        Ok(())
    }
}
