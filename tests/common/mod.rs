//! Shared fixtures: in-memory backends and device fixtures for the
//! reconciliation scenario tests.
#![allow(dead_code)]

use async_trait::async_trait;
use camwarden::device::{
    DeviceEvent, DeviceInspector, DeviceSnapshot, Fingerprint,
};
use camwarden::hardware::CapabilityMap;
use camwarden::registration_sync::{RegistryBackend, WebcamRegistration};
use camwarden::stream_supervisor::{StreamBackend, StreamPath};
use camwarden::Result;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// In-memory stand-in for the streaming server's control API.
#[derive(Default)]
pub struct FakeStreamServer {
    healthy: AtomicBool,
    pub paths: Mutex<BTreeMap<String, String>>,
    creates: AtomicUsize,
    deletes: AtomicUsize,
}

impl FakeStreamServer {
    pub fn new() -> Arc<Self> {
        let server = Self::default();
        server.healthy.store(true, Ordering::SeqCst);
        Arc::new(server)
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    pub fn insert_path(&self, name: &str, command: &str) {
        self.paths
            .lock()
            .unwrap()
            .insert(name.to_string(), command.to_string());
    }

    pub fn path_names(&self) -> Vec<String> {
        self.paths.lock().unwrap().keys().cloned().collect()
    }

    pub fn command_of(&self, name: &str) -> Option<String> {
        self.paths.lock().unwrap().get(name).cloned()
    }

    pub fn creates(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    pub fn deletes(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }

    pub fn ops(&self) -> usize {
        self.creates() + self.deletes()
    }
}

#[async_trait]
impl StreamBackend for FakeStreamServer {
    async fn health(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }

    async fn list_paths(&self) -> Result<Vec<StreamPath>> {
        Ok(self
            .paths
            .lock()
            .unwrap()
            .iter()
            .map(|(name, command)| StreamPath {
                name: name.clone(),
                command: command.clone(),
            })
            .collect())
    }

    async fn create_path(&self, name: &str, command: &str) -> Result<()> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        self.paths
            .lock()
            .unwrap()
            .insert(name.to_string(), command.to_string());
        Ok(())
    }

    async fn delete_path(&self, name: &str) -> Result<()> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.paths.lock().unwrap().remove(name);
        Ok(())
    }
}

/// In-memory stand-in for the orchestration API's webcam registry.
#[derive(Default)]
pub struct FakeOrchestrator {
    healthy: AtomicBool,
    pub webcams: Mutex<BTreeMap<String, WebcamRegistration>>,
    creates: AtomicUsize,
    deletes: AtomicUsize,
    renames: AtomicUsize,
}

impl FakeOrchestrator {
    pub fn new() -> Arc<Self> {
        let orchestrator = Self::default();
        orchestrator.healthy.store(true, Ordering::SeqCst);
        Arc::new(orchestrator)
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    pub fn insert_webcam(&self, registration: WebcamRegistration) {
        self.webcams
            .lock()
            .unwrap()
            .insert(registration.uid.clone(), registration);
    }

    pub fn webcam(&self, uid: &str) -> Option<WebcamRegistration> {
        self.webcams.lock().unwrap().get(uid).cloned()
    }

    pub fn uids(&self) -> Vec<String> {
        self.webcams.lock().unwrap().keys().cloned().collect()
    }

    pub fn ops(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
            + self.deletes.load(Ordering::SeqCst)
            + self.renames.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RegistryBackend for FakeOrchestrator {
    async fn health(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }

    async fn list_webcams(&self) -> Result<Vec<WebcamRegistration>> {
        Ok(self.webcams.lock().unwrap().values().cloned().collect())
    }

    async fn create_webcam(&self, registration: &WebcamRegistration) -> Result<()> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        self.webcams
            .lock()
            .unwrap()
            .insert(registration.uid.clone(), registration.clone());
        Ok(())
    }

    async fn rename_webcam(&self, uid: &str, name: &str) -> Result<()> {
        self.renames.fetch_add(1, Ordering::SeqCst);
        if let Some(webcam) = self.webcams.lock().unwrap().get_mut(uid) {
            webcam.name = name.to_string();
        }
        Ok(())
    }

    async fn delete_webcam(&self, uid: &str) -> Result<()> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.webcams.lock().unwrap().remove(uid);
        Ok(())
    }
}

/// Capabilities of the reference test camera:
/// `{mjpeg: {1280x720: [30, 15], 640x480: [30]}}`
pub fn logitech_capabilities() -> CapabilityMap {
    let mut sizes = BTreeMap::new();
    sizes.insert("1280x720".to_string(), vec![30u32, 15]);
    sizes.insert("640x480".to_string(), vec![30u32]);

    let mut capabilities = BTreeMap::new();
    capabilities.insert("mjpeg".to_string(), sizes);
    capabilities
}

pub fn logitech_fingerprint() -> Fingerprint {
    Fingerprint::new("046d", "0825", Some("ABC123".to_string()), "usb-1-1")
}

pub fn appeared(fingerprint: Fingerprint, path: &str) -> DeviceEvent {
    DeviceEvent::Appeared {
        path: PathBuf::from(path),
        hardware_name: "USB Webcam".to_string(),
        fingerprint,
        capabilities: logitech_capabilities(),
    }
}

/// Inspector answering from a scripted device table.
#[derive(Default)]
pub struct ScriptedInspector {
    pub devices: Mutex<std::collections::HashMap<PathBuf, DeviceSnapshot>>,
}

impl ScriptedInspector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add(&self, path: &str, fingerprint: Fingerprint) {
        let path = PathBuf::from(path);
        self.devices.lock().unwrap().insert(
            path.clone(),
            DeviceSnapshot {
                path,
                hardware_name: "USB Webcam".to_string(),
                fingerprint,
                capabilities: logitech_capabilities(),
            },
        );
    }
}

#[async_trait]
impl DeviceInspector for ScriptedInspector {
    async fn enumerate(&self) -> Vec<PathBuf> {
        let mut paths: Vec<_> = self.devices.lock().unwrap().keys().cloned().collect();
        paths.sort();
        paths
    }

    async fn inspect(&self, path: &std::path::Path) -> Result<Option<DeviceSnapshot>> {
        Ok(self.devices.lock().unwrap().get(path).cloned())
    }
}
