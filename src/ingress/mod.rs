//! Event ingress
//!
//! ## Responsibilities
//!
//! - Kernel hotplug subscription filtered to the video4linux subsystem,
//!   via a long-lived `udevadm monitor` child process
//! - Polling fallback scanning `/dev/video*` when the subscription cannot
//!   be opened at startup (no live switching between modes)
//! - Initial scan so cameras present at boot are observed
//!
//! Losing the subscription at runtime is fatal: the ingress cancels the
//! process-wide token and the service manager restarts the daemon.

use crate::device::{HotplugAction, HotplugMessage};
use std::collections::HashSet;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Cadence of the polling fallback.
const POLL_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngressMode {
    Subscription,
    Polling,
}

impl IngressMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            IngressMode::Subscription => "subscription",
            IngressMode::Polling => "polling",
        }
    }
}

/// Start the ingress task. The chosen mode is decided here, once.
pub async fn start(tx: mpsc::Sender<HotplugMessage>, cancel: CancellationToken) -> IngressMode {
    // Cameras already attached must be observed regardless of mode
    let initial = scan_video_nodes();

    match spawn_udev_monitor() {
        Ok(child) => {
            tracing::info!("Using udev subscription for camera monitoring");
            tokio::spawn(subscription_loop(child, initial, tx, cancel));
            IngressMode::Subscription
        }
        Err(e) => {
            tracing::warn!(error = %e, "udev subscription unavailable, falling back to polling");
            tokio::spawn(polling_loop(initial, tx, cancel));
            IngressMode::Polling
        }
    }
}

fn spawn_udev_monitor() -> std::io::Result<tokio::process::Child> {
    Command::new("udevadm")
        .args([
            "monitor",
            "--kernel",
            "--property",
            "--subsystem-match=video4linux",
        ])
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
}

async fn subscription_loop(
    mut child: tokio::process::Child,
    initial: Vec<PathBuf>,
    tx: mpsc::Sender<HotplugMessage>,
    cancel: CancellationToken,
) {
    let stdout = match child.stdout.take() {
        Some(stdout) => stdout,
        None => {
            tracing::error!("udevadm monitor spawned without stdout");
            cancel.cancel();
            return;
        }
    };

    for path in initial {
        if tx
            .send(HotplugMessage {
                path,
                action: HotplugAction::Add,
            })
            .await
            .is_err()
        {
            return;
        }
    }

    let mut lines = BufReader::new(stdout).lines();
    // One uevent is a block of KEY=VALUE lines terminated by a blank line
    let mut action: Option<HotplugAction> = None;
    let mut devname: Option<PathBuf> = None;

    loop {
        let line = tokio::select! {
            _ = cancel.cancelled() => {
                tracing::debug!("Event ingress shutting down");
                let _ = child.kill().await;
                return;
            }
            line = lines.next_line() => line,
        };

        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) | Err(_) => break,
        };

        let trimmed = line.trim();
        if trimmed.is_empty() {
            if let (Some(action), Some(path)) = (action.take(), devname.take()) {
                if tx.send(HotplugMessage { path, action }).await.is_err() {
                    return;
                }
            }
            action = None;
            devname = None;
            continue;
        }

        if let Some(value) = trimmed.strip_prefix("ACTION=") {
            action = match value {
                "add" => Some(HotplugAction::Add),
                "remove" => Some(HotplugAction::Remove),
                _ => None,
            };
        } else if let Some(value) = trimmed.strip_prefix("DEVNAME=") {
            if value.starts_with("/dev/video") {
                devname = Some(PathBuf::from(value));
            }
        }
    }

    if !cancel.is_cancelled() {
        // Subscription died and there is no live fallback
        tracing::error!("udev subscription lost, requesting shutdown");
        cancel.cancel();
    }
}

async fn polling_loop(
    initial: Vec<PathBuf>,
    tx: mpsc::Sender<HotplugMessage>,
    cancel: CancellationToken,
) {
    let mut known: HashSet<PathBuf> = HashSet::new();

    for path in initial {
        known.insert(path.clone());
        if tx
            .send(HotplugMessage {
                path,
                action: HotplugAction::Add,
            })
            .await
            .is_err()
        {
            return;
        }
    }

    let mut ticker = tokio::time::interval(POLL_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::debug!("Event ingress shutting down");
                return;
            }
            _ = ticker.tick() => {}
        }

        let current: HashSet<PathBuf> = scan_video_nodes().into_iter().collect();

        for path in current.difference(&known) {
            if tx
                .send(HotplugMessage {
                    path: path.clone(),
                    action: HotplugAction::Add,
                })
                .await
                .is_err()
            {
                return;
            }
        }

        for path in known.difference(&current) {
            if tx
                .send(HotplugMessage {
                    path: path.clone(),
                    action: HotplugAction::Remove,
                })
                .await
                .is_err()
            {
                return;
            }
        }

        known = current;
    }
}

/// `/dev/video*` nodes, lowest index first.
fn scan_video_nodes() -> Vec<PathBuf> {
    let mut nodes: Vec<(u32, PathBuf)> = match std::fs::read_dir("/dev") {
        Ok(entries) => entries
            .filter_map(|e| e.ok())
            .filter_map(|e| {
                let name = e.file_name().into_string().ok()?;
                let index: u32 = name.strip_prefix("video")?.parse().ok()?;
                Some((index, e.path()))
            })
            .collect(),
        Err(_) => Vec::new(),
    };

    nodes.sort_by_key(|(index, _)| *index);
    nodes.into_iter().map(|(_, path)| path).collect()
}
