//! Device tracker state machine
//!
//! Consumes raw hotplug messages from the event ingress, debounces them,
//! inspects the surviving nodes and emits lifecycle events to the
//! reconciler. One UVC camera usually exposes several `/dev/videoN` nodes;
//! only the lowest-index capture node per fingerprint is tracked.

use crate::device::{DeviceInspector, Fingerprint};
use crate::hardware::CapabilityMap;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Window in which repeated hotplug messages for one path collapse.
pub const DEBOUNCE_WINDOW: Duration = Duration::from_millis(500);

/// Raw message from the event ingress.
#[derive(Debug, Clone)]
pub struct HotplugMessage {
    pub path: PathBuf,
    pub action: HotplugAction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HotplugAction {
    Add,
    Remove,
}

/// Lifecycle event delivered to the reconciler.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceEvent {
    Appeared {
        path: PathBuf,
        hardware_name: String,
        fingerprint: Fingerprint,
        capabilities: CapabilityMap,
    },
    Changed {
        uid: String,
        capabilities: CapabilityMap,
    },
    Disappeared {
        uid: String,
    },
}

struct Tracked {
    uid: String,
    capabilities: CapabilityMap,
}

pub struct DeviceTracker {
    inspector: Arc<dyn DeviceInspector>,
    events: mpsc::Sender<DeviceEvent>,
    /// Tracked capture nodes
    known: HashMap<PathBuf, Tracked>,
    /// uid -> the node that claims it
    claims: HashMap<String, PathBuf>,
    /// Paths awaiting their debounce deadline
    pending: HashMap<PathBuf, Instant>,
}

impl DeviceTracker {
    pub fn new(inspector: Arc<dyn DeviceInspector>, events: mpsc::Sender<DeviceEvent>) -> Self {
        Self {
            inspector,
            events,
            known: HashMap::new(),
            claims: HashMap::new(),
            pending: HashMap::new(),
        }
    }

    /// Run until the ingress channel closes or shutdown is requested.
    pub async fn run(
        mut self,
        mut ingress: mpsc::Receiver<HotplugMessage>,
        cancel: CancellationToken,
    ) {
        loop {
            let next_deadline = self.pending.values().min().copied();

            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    tracing::debug!("Device tracker shutting down");
                    break;
                }

                msg = ingress.recv() => {
                    match msg {
                        Some(msg) => {
                            if !self.handle_message(msg).await {
                                break;
                            }
                        }
                        None => break,
                    }
                }

                _ = async {
                    match next_deadline {
                        Some(deadline) => tokio::time::sleep_until(deadline).await,
                        None => std::future::pending::<()>().await,
                    }
                } => {
                    if !self.flush_due().await {
                        break;
                    }
                }
            }
        }
    }

    /// Returns false when the event consumer is gone.
    async fn handle_message(&mut self, msg: HotplugMessage) -> bool {
        match msg.action {
            HotplugAction::Add => {
                // Re-arming the deadline collapses bursts for the same path
                self.pending
                    .insert(msg.path, Instant::now() + DEBOUNCE_WINDOW);
                true
            }
            HotplugAction::Remove => {
                self.pending.remove(&msg.path);
                self.remove_path(&msg.path).await
            }
        }
    }

    async fn remove_path(&mut self, path: &Path) -> bool {
        let Some(tracked) = self.known.remove(path) else {
            return true;
        };

        if self.claims.get(&tracked.uid).map(|p| p.as_path()) == Some(path) {
            self.claims.remove(&tracked.uid);
            tracing::info!(uid = %tracked.uid, device = %path.display(), "Camera disappeared");
            return self
                .events
                .send(DeviceEvent::Disappeared { uid: tracked.uid })
                .await
                .is_ok();
        }

        true
    }

    async fn flush_due(&mut self) -> bool {
        let now = Instant::now();
        let mut due: Vec<PathBuf> = self
            .pending
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(path, _)| path.clone())
            .collect();

        // Inspect lowest node index first so it claims the fingerprint
        due.sort_by_key(|path| node_index(path));

        for path in due {
            self.pending.remove(&path);
            if !self.settle_path(&path).await {
                return false;
            }
        }

        true
    }

    async fn settle_path(&mut self, path: &Path) -> bool {
        let snapshot = match self.inspector.inspect(path).await {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => return true,
            Err(e) => {
                tracing::warn!(device = %path.display(), error = %e, "Device inspection failed");
                // A tracked node that stops answering (busy, yanked mid-probe)
                // is gone until a later event re-settles it
                return self.remove_path(path).await;
            }
        };

        let uid = snapshot.fingerprint.uid();

        if let Some(tracked) = self.known.get(path) {
            if tracked.uid == uid {
                if tracked.capabilities != snapshot.capabilities {
                    tracing::info!(uid = %uid, "Camera capabilities changed");
                    self.known.insert(
                        path.to_path_buf(),
                        Tracked {
                            uid: uid.clone(),
                            capabilities: snapshot.capabilities.clone(),
                        },
                    );
                    return self
                        .events
                        .send(DeviceEvent::Changed {
                            uid,
                            capabilities: snapshot.capabilities,
                        })
                        .await
                        .is_ok();
                }
                return true;
            }

            // The node was re-assigned to a different physical camera
            if !self.remove_path(path).await {
                return false;
            }
        }

        if let Some(claimed_by) = self.claims.get(&uid) {
            if self.known.contains_key(claimed_by) {
                tracing::debug!(
                    uid = %uid,
                    device = %path.display(),
                    primary = %claimed_by.display(),
                    "Ignoring secondary node for tracked camera"
                );
                return true;
            }
        }

        tracing::info!(
            uid = %uid,
            device = %path.display(),
            name = %snapshot.hardware_name,
            "Camera appeared"
        );

        self.known.insert(
            path.to_path_buf(),
            Tracked {
                uid: uid.clone(),
                capabilities: snapshot.capabilities.clone(),
            },
        );
        self.claims.insert(uid, path.to_path_buf());

        self.events
            .send(DeviceEvent::Appeared {
                path: path.to_path_buf(),
                hardware_name: snapshot.hardware_name,
                fingerprint: snapshot.fingerprint,
                capabilities: snapshot.capabilities,
            })
            .await
            .is_ok()
    }
}

fn node_index(path: &Path) -> u32 {
    path.file_name()
        .and_then(|n| n.to_str())
        .and_then(|n| n.strip_prefix("video"))
        .and_then(|n| n.parse().ok())
        .unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceSnapshot;
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    /// Scripted inspector: path -> snapshot
    struct FakeInspector {
        devices: Mutex<HashMap<PathBuf, DeviceSnapshot>>,
        busy: Mutex<std::collections::HashSet<PathBuf>>,
        inspections: Mutex<usize>,
    }

    impl FakeInspector {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                devices: Mutex::new(HashMap::new()),
                busy: Mutex::new(std::collections::HashSet::new()),
                inspections: Mutex::new(0),
            })
        }

        fn set_busy(&self, path: &str) {
            self.busy.lock().unwrap().insert(PathBuf::from(path));
        }

        fn add(&self, path: &str, serial: Option<&str>, bus: &str) {
            let path = PathBuf::from(path);
            let mut caps: CapabilityMap = BTreeMap::new();
            let mut sizes = BTreeMap::new();
            sizes.insert("1280x720".to_string(), vec![30, 15]);
            caps.insert("mjpeg".to_string(), sizes);

            self.devices.lock().unwrap().insert(
                path.clone(),
                DeviceSnapshot {
                    path,
                    hardware_name: "Fake Webcam".to_string(),
                    fingerprint: Fingerprint::new(
                        "046d",
                        "0825",
                        serial.map(String::from),
                        bus,
                    ),
                    capabilities: caps,
                },
            );
        }

        fn inspections(&self) -> usize {
            *self.inspections.lock().unwrap()
        }
    }

    #[async_trait]
    impl DeviceInspector for FakeInspector {
        async fn enumerate(&self) -> Vec<PathBuf> {
            let mut paths: Vec<_> = self.devices.lock().unwrap().keys().cloned().collect();
            paths.sort();
            paths
        }

        async fn inspect(&self, path: &Path) -> crate::Result<Option<DeviceSnapshot>> {
            *self.inspections.lock().unwrap() += 1;
            if self.busy.lock().unwrap().contains(path) {
                return Err(crate::Error::Busy(path.display().to_string()));
            }
            Ok(self.devices.lock().unwrap().get(path).cloned())
        }
    }

    fn add_msg(path: &str) -> HotplugMessage {
        HotplugMessage {
            path: PathBuf::from(path),
            action: HotplugAction::Add,
        }
    }

    fn remove_msg(path: &str) -> HotplugMessage {
        HotplugMessage {
            path: PathBuf::from(path),
            action: HotplugAction::Remove,
        }
    }

    async fn spawn_tracker(
        inspector: Arc<FakeInspector>,
    ) -> (
        mpsc::Sender<HotplugMessage>,
        mpsc::Receiver<DeviceEvent>,
        CancellationToken,
    ) {
        let (in_tx, in_rx) = mpsc::channel(64);
        let (ev_tx, ev_rx) = mpsc::channel(64);
        let cancel = CancellationToken::new();
        let tracker = DeviceTracker::new(inspector, ev_tx);
        tokio::spawn(tracker.run(in_rx, cancel.clone()));
        (in_tx, ev_rx, cancel)
    }

    #[tokio::test(start_paused = true)]
    async fn burst_of_adds_emits_one_appeared() {
        let inspector = FakeInspector::new();
        inspector.add("/dev/video0", Some("ABC123"), "usb-1-1");
        let (tx, mut events, _cancel) = spawn_tracker(inspector.clone()).await;

        for _ in 0..10 {
            tx.send(add_msg("/dev/video0")).await.unwrap();
            tokio::time::advance(Duration::from_millis(10)).await;
        }
        tokio::time::advance(DEBOUNCE_WINDOW + Duration::from_millis(50)).await;

        let event = events.recv().await.unwrap();
        assert!(matches!(event, DeviceEvent::Appeared { .. }));
        assert_eq!(inspector.inspections(), 1);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn remove_emits_disappeared_with_uid() {
        let inspector = FakeInspector::new();
        inspector.add("/dev/video0", Some("ABC123"), "usb-1-1");
        let (tx, mut events, _cancel) = spawn_tracker(inspector.clone()).await;

        tx.send(add_msg("/dev/video0")).await.unwrap();
        tokio::time::advance(DEBOUNCE_WINDOW + Duration::from_millis(50)).await;

        let uid = match events.recv().await.unwrap() {
            DeviceEvent::Appeared { fingerprint, .. } => fingerprint.uid(),
            other => panic!("expected Appeared, got {other:?}"),
        };

        tx.send(remove_msg("/dev/video0")).await.unwrap();
        tokio::time::advance(Duration::from_millis(10)).await;

        assert_eq!(events.recv().await.unwrap(), DeviceEvent::Disappeared { uid });
    }

    #[tokio::test(start_paused = true)]
    async fn secondary_node_is_ignored() {
        let inspector = FakeInspector::new();
        // Same physical camera exposing two capture nodes
        inspector.add("/dev/video0", Some("ABC123"), "usb-1-1");
        inspector.add("/dev/video1", Some("ABC123"), "usb-1-1");
        let (tx, mut events, _cancel) = spawn_tracker(inspector.clone()).await;

        tx.send(add_msg("/dev/video1")).await.unwrap();
        tx.send(add_msg("/dev/video0")).await.unwrap();
        tokio::time::advance(DEBOUNCE_WINDOW + Duration::from_millis(50)).await;

        match events.recv().await.unwrap() {
            DeviceEvent::Appeared { path, .. } => {
                assert_eq!(path, PathBuf::from("/dev/video0"));
            }
            other => panic!("expected Appeared, got {other:?}"),
        }
        assert!(events.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn unchanged_reobservation_is_silent() {
        let inspector = FakeInspector::new();
        inspector.add("/dev/video0", Some("ABC123"), "usb-1-1");
        let (tx, mut events, _cancel) = spawn_tracker(inspector.clone()).await;

        tx.send(add_msg("/dev/video0")).await.unwrap();
        tokio::time::advance(DEBOUNCE_WINDOW + Duration::from_millis(50)).await;
        assert!(matches!(
            events.recv().await.unwrap(),
            DeviceEvent::Appeared { .. }
        ));

        tx.send(add_msg("/dev/video0")).await.unwrap();
        tokio::time::advance(DEBOUNCE_WINDOW + Duration::from_millis(50)).await;
        assert!(events.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn busy_reinspection_emits_disappeared() {
        let inspector = FakeInspector::new();
        inspector.add("/dev/video0", Some("ABC123"), "usb-1-1");
        let (tx, mut events, _cancel) = spawn_tracker(inspector.clone()).await;

        tx.send(add_msg("/dev/video0")).await.unwrap();
        tokio::time::advance(DEBOUNCE_WINDOW + Duration::from_millis(50)).await;

        let uid = match events.recv().await.unwrap() {
            DeviceEvent::Appeared { fingerprint, .. } => fingerprint.uid(),
            other => panic!("expected Appeared, got {other:?}"),
        };

        // Another process grabs the device; a re-Add without a Remove finds
        // the node unreadable
        inspector.set_busy("/dev/video0");
        tx.send(add_msg("/dev/video0")).await.unwrap();
        tokio::time::advance(DEBOUNCE_WINDOW + Duration::from_millis(50)).await;

        assert_eq!(events.recv().await.unwrap(), DeviceEvent::Disappeared { uid });
    }

    #[tokio::test(start_paused = true)]
    async fn capability_change_emits_changed() {
        let inspector = FakeInspector::new();
        inspector.add("/dev/video0", Some("ABC123"), "usb-1-1");
        let (tx, mut events, _cancel) = spawn_tracker(inspector.clone()).await;

        tx.send(add_msg("/dev/video0")).await.unwrap();
        tokio::time::advance(DEBOUNCE_WINDOW + Duration::from_millis(50)).await;
        assert!(matches!(
            events.recv().await.unwrap(),
            DeviceEvent::Appeared { .. }
        ));

        // USB mode switch: same identity, new format table
        {
            let mut devices = inspector.devices.lock().unwrap();
            let snapshot = devices.get_mut(&PathBuf::from("/dev/video0")).unwrap();
            let mut sizes = BTreeMap::new();
            sizes.insert("640x480".to_string(), vec![30]);
            snapshot.capabilities.insert("yuyv".to_string(), sizes);
        }

        tx.send(add_msg("/dev/video0")).await.unwrap();
        tokio::time::advance(DEBOUNCE_WINDOW + Duration::from_millis(50)).await;
        assert!(matches!(
            events.recv().await.unwrap(),
            DeviceEvent::Changed { .. }
        ));
    }
}
