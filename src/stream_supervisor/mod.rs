//! Stream supervisor
//!
//! Converges the streaming server's declared paths to the desired set.
//! Only paths whose names look like our UIDs are owned; anything else was
//! configured by the operator and is never touched. Replacement is always
//! delete-then-create, because patching a path in place does not restart
//! the transcoder the old command spawned.

use crate::device::is_uid_shaped;
use crate::error::Result;
use crate::models::{Backend, SyncError};
use crate::reconciler::BackoffTable;
use crate::transcode::command_hash;
use async_trait::async_trait;
use futures::future::join_all;
use std::collections::BTreeMap;
use std::sync::Arc;

/// A path as the streaming server reports it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamPath {
    pub name: String,
    pub command: String,
}

/// Control surface of the streaming server.
#[async_trait]
pub trait StreamBackend: Send + Sync {
    async fn health(&self) -> bool;
    async fn list_paths(&self) -> Result<Vec<StreamPath>>;
    async fn create_path(&self, name: &str, command: &str) -> Result<()>;
    async fn delete_path(&self, name: &str) -> Result<()>;
}

/// Operations computed for one tick.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct StreamPlan {
    pub create: Vec<(String, String)>,
    pub replace: Vec<(String, String)>,
    pub delete: Vec<String>,
}

impl StreamPlan {
    pub fn is_empty(&self) -> bool {
        self.create.is_empty() && self.replace.is_empty() && self.delete.is_empty()
    }

    pub fn len(&self) -> usize {
        self.create.len() + self.replace.len() + self.delete.len()
    }
}

/// Diff desired commands against observed paths.
pub fn plan(desired: &BTreeMap<String, String>, observed: &[StreamPath]) -> StreamPlan {
    let mut plan = StreamPlan::default();

    let owned: BTreeMap<&str, &StreamPath> = observed
        .iter()
        .filter(|path| is_uid_shaped(&path.name))
        .map(|path| (path.name.as_str(), path))
        .collect();

    for (uid, command) in desired {
        match owned.get(uid.as_str()) {
            None => plan.create.push((uid.clone(), command.clone())),
            Some(existing) => {
                if command_hash(&existing.command) != command_hash(command) {
                    plan.replace.push((uid.clone(), command.clone()));
                }
            }
        }
    }

    for (name, _) in owned {
        if !desired.contains_key(name) {
            plan.delete.push(name.to_string());
        }
    }

    plan
}

pub struct StreamSupervisor {
    backend: Arc<dyn StreamBackend>,
}

enum Op {
    Create(String, String),
    Replace(String, String),
    Delete(String),
}

impl Op {
    fn uid(&self) -> &str {
        match self {
            Op::Create(uid, _) | Op::Replace(uid, _) | Op::Delete(uid) => uid,
        }
    }
}

impl StreamSupervisor {
    pub fn new(backend: Arc<dyn StreamBackend>) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &Arc<dyn StreamBackend> {
        &self.backend
    }

    /// Apply one tick's plan. Returns issued operation count and failures;
    /// a failing operation is recorded against its UID and retried after
    /// backoff, never aborting the rest of the tick.
    pub async fn converge(
        &self,
        desired: &BTreeMap<String, String>,
        backoff: &mut BackoffTable,
    ) -> (usize, Vec<SyncError>) {
        let observed = match self.backend.list_paths().await {
            Ok(paths) => paths,
            Err(e) => {
                return (
                    0,
                    vec![SyncError {
                        camera_uid: None,
                        backend: Backend::Stream,
                        kind: e.kind().to_string(),
                        message: format!("failed to list stream paths: {e}"),
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
            delete = plan.delete.len(),
            "Stream convergence plan"
        );

        let mut ops: Vec<Op> = Vec::new();
        ops.extend(plan.create.into_iter().map(|(u, c)| Op::Create(u, c)));
        ops.extend(plan.replace.into_iter().map(|(u, c)| Op::Replace(u, c)));
        ops.extend(plan.delete.into_iter().map(Op::Delete));

        // Ops for UIDs still cooling down wait for their next window
        ops.retain(|op| {
            let ready = backoff.ready(Backend::Stream, op.uid());
            if !ready {
                tracing::debug!(uid = op.uid(), "Stream op deferred by backoff");
            }
            ready
        });

        let futures = ops.iter().map(|op| {
            let backend = Arc::clone(&self.backend);
            async move {
                let result = match op {
                    Op::Create(uid, command) => backend.create_path(uid, command).await,
                    Op::Replace(uid, command) => {
                        // Never edit in place: tear down, then rebuild
                        match backend.delete_path(uid).await {
                            Ok(()) => backend.create_path(uid, command).await,
                            Err(e) => Err(e),
                        }
                    }
                    Op::Delete(uid) => backend.delete_path(uid).await,
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
                    backoff.record_success(Backend::Stream, &uid);
                }
                Err(e) => {
                    let delay = backoff.record_failure(Backend::Stream, &uid);
                    tracing::warn!(
                        uid = %uid,
                        error = %e,
                        retry_in = ?delay,
                        "Stream operation failed"
                    );
                    errors.push(SyncError {
                        camera_uid: Some(uid),
                        backend: Backend::Stream,
                        kind: e.kind().to_string(),
                        message: e.to_string(),
                    });
                }
            }
        }

        (issued, errors)
    }
}
