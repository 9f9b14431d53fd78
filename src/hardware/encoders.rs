//! Hardware encoder detection
//!
//! An encoder counts as available only when both its device node exists and
//! the transcoder binary advertises the codec. Detection runs once at
//! startup; the result is carried in the `HardwareProbe`.

use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::process::Command;

/// Encoder variants the command synthesizer can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoder {
    Software,
    Vaapi,
    V4l2m2m,
    Rkmpp,
}

impl Encoder {
    pub fn as_str(&self) -> &'static str {
        match self {
            Encoder::Software => "software",
            Encoder::Vaapi => "vaapi",
            Encoder::V4l2m2m => "v4l2m2m",
            Encoder::Rkmpp => "rkmpp",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "software" => Some(Encoder::Software),
            "vaapi" => Some(Encoder::Vaapi),
            "v4l2m2m" => Some(Encoder::V4l2m2m),
            "rkmpp" => Some(Encoder::Rkmpp),
            _ => None,
        }
    }

    /// The ffmpeg codec name this encoder maps to.
    pub fn codec_name(&self) -> &'static str {
        match self {
            Encoder::Software => "libx264",
            Encoder::Vaapi => "h264_vaapi",
            Encoder::V4l2m2m => "h264_v4l2m2m",
            Encoder::Rkmpp => "h264_rkmpp",
        }
    }
}

/// Which hardware encoders the host offers. Software is always implied.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EncoderSet {
    pub vaapi: bool,
    pub v4l2m2m: bool,
    pub rkmpp: bool,
}

impl EncoderSet {
    pub fn any_hardware(&self) -> bool {
        self.vaapi || self.v4l2m2m || self.rkmpp
    }

    pub fn has(&self, encoder: Encoder) -> bool {
        match encoder {
            Encoder::Software => true,
            Encoder::Vaapi => self.vaapi,
            Encoder::V4l2m2m => self.v4l2m2m,
            Encoder::Rkmpp => self.rkmpp,
        }
    }

    /// Hardware encoders in selection priority order, then software.
    pub fn available(&self) -> Vec<Encoder> {
        let mut out = Vec::new();
        if self.vaapi {
            out.push(Encoder::Vaapi);
        }
        if self.v4l2m2m {
            out.push(Encoder::V4l2m2m);
        }
        if self.rkmpp {
            out.push(Encoder::Rkmpp);
        }
        out.push(Encoder::Software);
        out
    }
}

/// Detect hardware encoders from device nodes plus `ffmpeg -encoders`.
pub async fn detect_encoders() -> EncoderSet {
    let ffmpeg_codecs = list_ffmpeg_encoders().await;

    let vaapi = Path::new("/dev/dri/renderD128").exists()
        && ffmpeg_codecs.contains("h264_vaapi");
    let v4l2m2m = has_m2m_node() && ffmpeg_codecs.contains("h264_v4l2m2m");
    let rkmpp = (Path::new("/dev/mpp_service").exists() || Path::new("/dev/rga").exists())
        && ffmpeg_codecs.contains("h264_rkmpp");

    let set = EncoderSet {
        vaapi,
        v4l2m2m,
        rkmpp,
    };

    if set.any_hardware() {
        tracing::info!(vaapi, v4l2m2m, rkmpp, "Hardware encoders detected");
    } else {
        tracing::info!("No hardware encoders, software encoding only");
    }

    set
}

/// Higher-numbered video nodes are where SoC m2m encoders usually appear.
fn has_m2m_node() -> bool {
    let Ok(entries) = std::fs::read_dir("/dev") else {
        return false;
    };

    entries
        .filter_map(|e| e.ok())
        .filter_map(|e| e.file_name().into_string().ok())
        .any(|name| {
            name.strip_prefix("video")
                .and_then(|idx| idx.parse::<u32>().ok())
                .map(|idx| idx >= 10)
                .unwrap_or(false)
        })
}

async fn list_ffmpeg_encoders() -> String {
    let result = Command::new("ffmpeg")
        .args(["-hide_banner", "-encoders"])
        .output()
        .await;

    match result {
        Ok(output) if output.status.success() => {
            String::from_utf8_lossy(&output.stdout).into_owned()
        }
        Ok(output) => {
            tracing::debug!(status = %output.status, "ffmpeg -encoders failed");
            String::new()
        }
        Err(e) => {
            tracing::warn!(error = %e, "ffmpeg not available, hardware encoders disabled");
            String::new()
        }
    }
}
