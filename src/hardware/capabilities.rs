//! V4L2 capability enumeration
//!
//! Walks the kernel-advertised format / frame-size / frame-interval tables
//! for a device and folds them into the nested capability map the rest of
//! the daemon works with. Only discrete sizes and intervals are kept; UVC
//! cameras advertise discrete tables.

use crate::error::{Error, Result};
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::Path;

/// `format -> "WIDTHxHEIGHT" -> framerates` (descending)
pub type CapabilityMap = BTreeMap<String, BTreeMap<String, Vec<u32>>>;

/// FourCC / description spellings normalized to the internal format names.
fn normalize_format(fourcc: &str, description: &str) -> String {
    match (fourcc, description) {
        ("MJPG", _) | (_, "Motion-JPEG") => "mjpeg".to_string(),
        ("H264", _) | (_, "H.264") => "h264".to_string(),
        ("YUYV", _) | (_, "YUYV 4:2:2") => "yuyv".to_string(),
        ("NV12", _) => "nv12".to_string(),
        ("RGB3", _) => "rgb24".to_string(),
        _ => fourcc.to_ascii_lowercase(),
    }
}

/// Enumerate supported formats, resolutions and framerates for `device_path`.
///
/// Errors are typed: a missing node is `NotFound`, a node held exclusively by
/// another process is `Busy`, and a device advertising nothing at all is
/// `Protocol` (capability maps must never be empty for a live capture node).
pub fn probe_capabilities(device_path: &Path) -> Result<CapabilityMap> {
    use v4l::video::Capture;

    let device = v4l::Device::with_path(device_path).map_err(|e| classify_io(device_path, e))?;

    let mut capabilities = CapabilityMap::new();

    let formats = device
        .enum_formats()
        .map_err(|e| classify_io(device_path, e))?;

    for format in formats {
        let fourcc = match format.fourcc.str() {
            Ok(s) => s.to_string(),
            Err(_) => continue,
        };
        let name = normalize_format(&fourcc, &format.description);

        let Ok(sizes) = device.enum_framesizes(format.fourcc) else {
            continue;
        };

        for framesize in sizes {
            let v4l::framesize::FrameSizeEnum::Discrete(size) = framesize.size else {
                continue;
            };

            let mut rates: Vec<u32> = Vec::new();
            if let Ok(intervals) =
                device.enum_frameintervals(framesize.fourcc, size.width, size.height)
            {
                for interval in intervals {
                    if let v4l::frameinterval::FrameIntervalEnum::Discrete(fraction) =
                        interval.interval
                    {
                        if fraction.numerator == 0 {
                            continue;
                        }
                        let fps = fraction.denominator / fraction.numerator;
                        if fps > 0 && !rates.contains(&fps) {
                            rates.push(fps);
                        }
                    }
                }
            }

            if rates.is_empty() {
                continue;
            }
            rates.sort_unstable_by(|a, b| b.cmp(a));

            capabilities
                .entry(name.clone())
                .or_default()
                .insert(format!("{}x{}", size.width, size.height), rates);
        }
    }

    capabilities.retain(|_, sizes| !sizes.is_empty());

    if capabilities.is_empty() {
        return Err(Error::Protocol(format!(
            "{} advertises no discrete capture formats",
            device_path.display()
        )));
    }

    tracing::debug!(
        device = %device_path.display(),
        formats = capabilities.len(),
        "Probed capabilities"
    );

    Ok(capabilities)
}

fn classify_io(device_path: &Path, e: std::io::Error) -> Error {
    match e.kind() {
        ErrorKind::NotFound => Error::NotFound(format!("{}", device_path.display())),
        ErrorKind::PermissionDenied => {
            Error::Busy(format!("{}: permission denied", device_path.display()))
        }
        _ if e.raw_os_error() == Some(16) => {
            // EBUSY
            Error::Busy(format!("{}", device_path.display()))
        }
        _ => Error::Io(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fourcc_normalization() {
        assert_eq!(normalize_format("MJPG", "Motion-JPEG"), "mjpeg");
        assert_eq!(normalize_format("H264", "H.264"), "h264");
        assert_eq!(normalize_format("YUYV", "YUYV 4:2:2"), "yuyv");
        assert_eq!(normalize_format("GREY", "8-bit Greyscale"), "grey");
    }

    #[test]
    fn missing_device_is_not_found() {
        let err = probe_capabilities(Path::new("/dev/video250")).unwrap_err();
        assert_eq!(err.kind(), "not_found");
    }
}
