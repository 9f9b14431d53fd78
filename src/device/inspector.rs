//! Device inspection
//!
//! Resolves a `/dev/videoN` node to its hardware identity and capability
//! map. The trait seam exists so the tracker can be driven by scripted
//! devices in tests; the real implementation reads sysfs and V4L2.

use crate::device::Fingerprint;
use crate::error::Result;
use crate::hardware::{probe_capabilities, CapabilityMap};
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// Everything the tracker needs to know about a live capture node.
#[derive(Debug, Clone)]
pub struct DeviceSnapshot {
    pub path: PathBuf,
    pub hardware_name: String,
    pub fingerprint: Fingerprint,
    pub capabilities: CapabilityMap,
}

#[async_trait]
pub trait DeviceInspector: Send + Sync {
    /// Candidate video nodes, lowest index first.
    async fn enumerate(&self) -> Vec<PathBuf>;

    /// Resolve a node. `Ok(None)` means the node exists but is not a UVC
    /// capture device (metadata node, hardware codec, ISP).
    async fn inspect(&self, path: &Path) -> Result<Option<DeviceSnapshot>>;
}

/// Real inspector backed by sysfs and V4L2 ioctls.
pub struct SysfsInspector {
    sysfs_root: PathBuf,
}

impl SysfsInspector {
    pub fn new() -> Self {
        Self {
            sysfs_root: PathBuf::from("/sys/class/video4linux"),
        }
    }
}

impl Default for SysfsInspector {
    fn default() -> Self {
        Self::new()
    }
}

/// Card-name fragments that mark hardware codec / ISP nodes, not cameras.
const CODEC_CARD_PATTERNS: &[&str] = &[
    "rkvdec", "rkvenc", "rkisp", "rga", "hantro", "cedrus", "decoder", "encoder", "m2m", "isp",
];

#[async_trait]
impl DeviceInspector for SysfsInspector {
    async fn enumerate(&self) -> Vec<PathBuf> {
        let mut nodes: Vec<(u32, PathBuf)> = match std::fs::read_dir("/dev") {
            Ok(entries) => entries
                .filter_map(|e| e.ok())
                .filter_map(|e| {
                    let name = e.file_name().into_string().ok()?;
                    let index: u32 = name.strip_prefix("video")?.parse().ok()?;
                    Some((index, e.path()))
                })
                .collect(),
            Err(e) => {
                tracing::error!(error = %e, "Failed to enumerate /dev");
                return Vec::new();
            }
        };

        nodes.sort_by_key(|(index, _)| *index);
        nodes.into_iter().map(|(_, path)| path).collect()
    }

    async fn inspect(&self, path: &Path) -> Result<Option<DeviceSnapshot>> {
        let path = path.to_path_buf();
        let sysfs_root = self.sysfs_root.clone();

        // ioctls and sysfs reads are blocking
        let snapshot = tokio::task::spawn_blocking(move || inspect_blocking(&sysfs_root, &path))
            .await
            .map_err(|e| crate::Error::Transient(format!("inspector task failed: {e}")))??;

        Ok(snapshot)
    }
}

fn inspect_blocking(sysfs_root: &Path, path: &Path) -> Result<Option<DeviceSnapshot>> {
    let caps = match v4l::Device::with_path(path) {
        Ok(device) => device.query_caps().map_err(crate::Error::Io)?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(crate::Error::Io(e)),
    };

    let card_lower = caps.card.to_ascii_lowercase();
    if CODEC_CARD_PATTERNS.iter().any(|p| card_lower.contains(p)) {
        tracing::debug!(device = %path.display(), card = %caps.card, "Skipping codec node");
        return Ok(None);
    }

    if !caps
        .capabilities
        .contains(v4l::capability::Flags::VIDEO_CAPTURE)
    {
        return Ok(None);
    }

    let Some(fingerprint) = usb_fingerprint(sysfs_root, path) else {
        tracing::debug!(device = %path.display(), "No USB ancestor, skipping");
        return Ok(None);
    };

    let capabilities = match probe_capabilities(path) {
        Ok(map) => map,
        // Metadata sub-nodes claim VIDEO_CAPTURE but advertise nothing
        Err(crate::Error::Protocol(_)) => return Ok(None),
        Err(e) => return Err(e),
    };

    Ok(Some(DeviceSnapshot {
        path: path.to_path_buf(),
        hardware_name: caps.card.clone(),
        fingerprint,
        capabilities,
    }))
}

/// Walk from `/sys/class/video4linux/videoN/device` up to the USB device
/// that carries idVendor / idProduct / serial attributes.
fn usb_fingerprint(sysfs_root: &Path, dev_path: &Path) -> Option<Fingerprint> {
    let node_name = dev_path.file_name()?.to_str()?;
    let device_link = sysfs_root.join(node_name).join("device");
    let mut dir = std::fs::canonicalize(device_link).ok()?;

    for _ in 0..5 {
        let vendor = read_attr(&dir, "idVendor");
        let product = read_attr(&dir, "idProduct");

        if let (Some(vendor_id), Some(product_id)) = (vendor, product) {
            let serial = read_attr(&dir, "serial");
            // The USB device directory name is the bus path (e.g. "1-1.4")
            let bus_path = dir
                .file_name()
                .and_then(|n| n.to_str())
                .map(|n| format!("usb-{n}"))
                .unwrap_or_else(|| "usb-unknown".to_string());

            return Some(Fingerprint::new(vendor_id, product_id, serial, bus_path));
        }

        dir = dir.parent()?.to_path_buf();
    }

    None
}

fn read_attr(dir: &Path, name: &str) -> Option<String> {
    let value = std::fs::read_to_string(dir.join(name)).ok()?;
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
