//! Transcoder command synthesis
//!
//! Builds the ffmpeg invocation the streaming server runs for a camera.
//! The function is deterministic: equal records produce byte-identical
//! strings, and the reconciler compares SHA-256 hashes of these strings to
//! detect drift against the streaming server's current configuration.

use crate::hardware::Encoder;
use crate::settings_store::CameraRecord;
use sha2::{Digest, Sha256};

/// VAAPI render node used by the hardware upload path.
const VAAPI_DEVICE: &str = "/dev/dri/renderD128";

/// Internal format name -> ffmpeg `-input_format` name.
fn ffmpeg_input_format(format: &str) -> &str {
    match format {
        "yuyv" => "yuyv422",
        other => other,
    }
}

/// SHA-256 hex digest of a synthesized command.
pub fn command_hash(command: &str) -> String {
    let digest = Sha256::digest(command.as_bytes());
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Build the complete transcoder command for a record.
///
/// `rtsp_base` is the streaming server's RTSP ingest root, e.g.
/// `rtsp://127.0.0.1:8554`. Detached records (no device path) still produce
/// a deterministic string, but the desired-state filter keeps them out of
/// the streaming server.
pub fn synthesize(record: &CameraRecord, rtsp_base: &str) -> String {
    let device_path = record.device_path.as_deref().unwrap_or("/dev/null");
    let input_format = record
        .input_format
        .as_deref()
        .unwrap_or_else(|| ffmpeg_input_format(&record.format));

    let mut cmd: Vec<String> = vec![
        "ffmpeg".into(),
        "-hide_banner".into(),
        "-loglevel".into(),
        "warning".into(),
    ];

    if record.encoder == Encoder::Vaapi {
        cmd.push("-vaapi_device".into());
        cmd.push(VAAPI_DEVICE.into());
    }

    cmd.extend([
        "-f".into(),
        "v4l2".into(),
        "-input_format".into(),
        input_format.into(),
        "-video_size".into(),
        record.resolution.clone(),
        "-framerate".into(),
        record.framerate.to_string(),
        "-i".into(),
        device_path.into(),
    ]);

    let filters = filter_chain(record);
    if !filters.is_empty() {
        cmd.push("-vf".into());
        cmd.push(filters.join(","));
    }

    cmd.extend(encoder_args(record));

    cmd.extend([
        "-g".into(),
        // Keyframe every two seconds
        (record.framerate * 2).to_string(),
        "-f".into(),
        "rtsp".into(),
        "-rtsp_transport".into(),
        "tcp".into(),
        format!("{}/{}", rtsp_base.trim_end_matches('/'), record.uid),
    ]);

    let ffmpeg_cmd = cmd.join(" ");

    // Controls are applied right before the transcoder starts so they stick
    // to the opened device
    if record.controls.is_empty() {
        ffmpeg_cmd
    } else {
        let ctrl: Vec<String> = record
            .controls
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect();
        format!(
            "sh -c 'v4l2-ctl -d {} --set-ctrl={}; {}'",
            device_path,
            ctrl.join(","),
            ffmpeg_cmd
        )
    }
}

/// Filter order matters: pixel-format conversion first (it also debayers raw
/// sensor data), then rotation, then the overlay, then hardware upload.
fn filter_chain(record: &CameraRecord) -> Vec<String> {
    let mut filters = Vec::new();

    if record.encoder == Encoder::Vaapi {
        filters.push("format=nv12".to_string());
    } else {
        // Most players cannot decode 4:2:2
        filters.push("format=yuv420p".to_string());
    }

    match record.rotation {
        90 => filters.push("transpose=1".to_string()),
        180 => filters.push("transpose=1,transpose=1".to_string()),
        270 => filters.push("transpose=2".to_string()),
        _ => {}
    }

    if let Some(overlay_path) = &record.overlay_path {
        let escaped = overlay_path.replace('\\', "/").replace(':', "\\:");
        filters.push(format!(
            "drawtext=textfile='{escaped}':reload=1:expansion=none\
             :fontcolor=white:fontsize=24:borderw=2:bordercolor=black\
             :x=(w-text_w)/2:y=h-th-20"
        ));
    }

    if record.encoder == Encoder::Vaapi {
        filters.push("hwupload".to_string());
    }

    filters
}

fn encoder_args(record: &CameraRecord) -> Vec<String> {
    let bitrate = &record.bitrate;

    match record.encoder {
        Encoder::Software => vec![
            "-c:v".into(),
            "libx264".into(),
            "-preset".into(),
            "ultrafast".into(),
            "-tune".into(),
            "zerolatency".into(),
            "-profile:v".into(),
            "baseline".into(),
            "-level".into(),
            "3.1".into(),
            "-bf".into(),
            "0".into(),
            "-b:v".into(),
            bitrate.clone(),
            "-maxrate".into(),
            bitrate.clone(),
            "-bufsize".into(),
            bitrate.clone(),
        ],
        Encoder::Vaapi => vec![
            "-c:v".into(),
            "h264_vaapi".into(),
            "-profile:v".into(),
            "constrained_baseline".into(),
            "-level".into(),
            "31".into(),
            "-b:v".into(),
            bitrate.clone(),
        ],
        Encoder::V4l2m2m => vec![
            "-c:v".into(),
            "h264_v4l2m2m".into(),
            "-profile:v".into(),
            "baseline".into(),
            "-level".into(),
            "31".into(),
            "-b:v".into(),
            bitrate.clone(),
        ],
        Encoder::Rkmpp => vec![
            "-c:v".into(),
            "h264_rkmpp".into(),
            "-profile:v".into(),
            "baseline".into(),
            "-level".into(),
            "31".into(),
            "-b:v".into(),
            bitrate.clone(),
        ],
    }
}
