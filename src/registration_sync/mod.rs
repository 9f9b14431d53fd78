//! Registration synchronizer
//!
//! Converges orchestration-API webcam registrations to the desired set.
//! A registration is claimed by carrying the camera's UID as its unique
//! key; registrations with foreign keys are preserved untouched. URL drift
//! forces delete-then-create; a name-only difference is patched in place.

use crate::device::is_uid_shaped;
use crate::error::Result;
use crate::models::{Backend, SyncError};
use crate::reconciler::BackoffTable;
use crate::settings_store::SystemSettings;
use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Webcam registration payload as the orchestration API carries it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebcamRegistration {
    pub uid: String,
    pub name: String,
    pub stream_url: String,
    pub snapshot_url: String,
    pub service: String,
}

/// Control surface of the orchestration API.
#[async_trait]
pub trait RegistryBackend: Send + Sync {
    async fn health(&self) -> bool;
    async fn list_webcams(&self) -> Result<Vec<WebcamRegistration>>;
    async fn create_webcam(&self, registration: &WebcamRegistration) -> Result<()>;
    /// In-place mutation, used only when the name is the sole difference.
    async fn rename_webcam(&self, uid: &str, name: &str) -> Result<()>;
    async fn delete_webcam(&self, uid: &str) -> Result<()>;
}

/// Render the registration for a camera against the system settings.
pub fn render_registration(
    uid: &str,
    friendly_name: &str,
    settings: &SystemSettings,
) -> WebcamRegistration {
    let host = settings.base_host.as_deref().unwrap_or("127.0.0.1");

    let stream_url = match settings.moonraker_service.as_str() {
        "hlsstream" => format!("http://{host}:8888/{uid}/"),
        _ => format!("http://{host}:8889/{uid}/"),
    };

    WebcamRegistration {
        uid: uid.to_string(),
        name: friendly_name.to_string(),
        stream_url,
        snapshot_url: format!("http://{host}/cameras/snapshot/{uid}.jpg"),
        service: settings.moonraker_service.clone(),
    }
}

/// Operations computed for one tick.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct RegistrationPlan {
    pub create: Vec<WebcamRegistration>,
    pub replace: Vec<WebcamRegistration>,
    pub rename: Vec<(String, String)>,
    pub delete: Vec<String>,
}

impl RegistrationPlan {
    pub fn is_empty(&self) -> bool {
        self.create.is_empty()
            && self.replace.is_empty()
            && self.rename.is_empty()
            && self.delete.is_empty()
    }
}

pub fn plan(
    desired: &BTreeMap<String, WebcamRegistration>,
    observed: &[WebcamRegistration],
) -> RegistrationPlan {
    let mut plan = RegistrationPlan::default();

    let owned: BTreeMap<&str, &WebcamRegistration> = observed
        .iter()
        .filter(|webcam| is_uid_shaped(&webcam.uid))
        .map(|webcam| (webcam.uid.as_str(), webcam))
        .collect();

    for (uid, registration) in desired {
        match owned.get(uid.as_str()) {
            None => plan.create.push(registration.clone()),
            Some(existing) => {
                let urls_match = existing.stream_url == registration.stream_url
                    && existing.snapshot_url == registration.snapshot_url
                    && existing.service == registration.service;

                if !urls_match {
                    plan.replace.push(registration.clone());
                } else if existing.name != registration.name {
                    plan.rename.push((uid.clone(), registration.name.clone()));
                }
            }
        }
    }

    for (uid, _) in owned {
        if !desired.contains_key(uid) {
            plan.delete.push(uid.to_string());
        }
    }

    plan
}

pub struct RegistrationSync {
    backend: Arc<dyn RegistryBackend>,
}

enum Op {
    Create(WebcamRegistration),
    Replace(WebcamRegistration),
    Rename(String, String),
    Delete(String),
}

impl Op {
    fn uid(&self) -> &str {
        match self {
            Op::Create(reg) | Op::Replace(reg) => &reg.uid,
            Op::Rename(uid, _) | Op::Delete(uid) => uid,
        }
    }
}

impl RegistrationSync {
    pub fn new(backend: Arc<dyn RegistryBackend>) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &Arc<dyn RegistryBackend> {
        &self.backend
    }

    pub async fn converge(
        &self,
        desired: &BTreeMap<String, WebcamRegistration>,
        backoff: &mut BackoffTable,
    ) -> (usize, Vec<SyncError>) {
        let observed = match self.backend.list_webcams().await {
            Ok(webcams) => webcams,
            Err(e) => {
                return (
                    0,
                    vec![SyncError {
                        camera_uid: None,
                        backend: Backend::Registry,
                        kind: e.kind().to_string(),
                        message: format!("failed to list webcams: {e}"),
                    }],
                );
            }
        };

        let plan = plan(desired, &observed);
        if plan.is_empty() {
            return (0, Vec::new());
        }

        tracing::debug!(
            create = plan.create.len(),
            replace = plan.replace.len(),
            rename = plan.rename.len(),
            delete = plan.delete.len(),
            "Registration convergence plan"
        );

        let mut ops: Vec<Op> = Vec::new();
        ops.extend(plan.create.into_iter().map(Op::Create));
        ops.extend(plan.replace.into_iter().map(Op::Replace));
        ops.extend(plan.rename.into_iter().map(|(u, n)| Op::Rename(u, n)));
        ops.extend(plan.delete.into_iter().map(Op::Delete));

        ops.retain(|op| {
            let ready = backoff.ready(Backend::Registry, op.uid());
            if !ready {
                tracing::debug!(uid = op.uid(), "Registry op deferred by backoff");
            }
            ready
        });

        let futures = ops.iter().map(|op| {
            let backend = Arc::clone(&self.backend);
            async move {
                let result = match op {
                    Op::Create(registration) => backend.create_webcam(registration).await,
                    Op::Replace(registration) => {
                        match backend.delete_webcam(&registration.uid).await {
                            Ok(()) => backend.create_webcam(registration).await,
                            Err(e) => Err(e),
                        }
                    }
                    Op::Rename(uid, name) => backend.rename_webcam(uid, name).await,
                    Op::Delete(uid) => backend.delete_webcam(uid).await,
                };
                (op.uid().to_string(), result)
            }
        });

        let results = join_all(futures).await;

        let mut issued = 0;
        let mut errors = Vec::new();

        for (uid, result) in results {
            match result {
                Ok(()) => {
                    issued += 1;
                    backoff.record_success(Backend::Registry, &uid);
                }
                Err(e) => {
                    let delay = backoff.record_failure(Backend::Registry, &uid);
                    tracing::warn!(
                        uid = %uid,
                        error = %e,
                        retry_in = ?delay,
                        "Registration operation failed"
                    );
                    errors.push(SyncError {
                        camera_uid: Some(uid),
                        backend: Backend::Registry,
                        kind: e.kind().to_string(),
                        message: e.to_string(),
                    });
                }
            }
        }

        (issued, errors)
    }
}
