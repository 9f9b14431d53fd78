//! Profile selection
//!
//! Pure mapping from capabilities + effective CPU score + administrator
//! overrides to a concrete streaming profile. MJPEG leads the format
//! preference because it passes through to the encoder without an expensive
//! raw-frame conversion.

use crate::hardware::{CapabilityMap, Encoder, EncoderSet};
use serde::{Deserialize, Serialize};

/// Format preference, best first.
const FORMAT_PREFERENCE: &[&str] = &["mjpeg", "h264", "yuyv"];

/// One row of the quality ladder.
#[derive(Debug, Clone, Copy)]
pub struct Tier {
    pub ceiling: (u32, u32),
    pub target_fps: u32,
    pub bitrate: &'static str,
}

/// Quality tier for an effective score in [1, 10].
pub fn tier_for(effective_score: u8) -> Tier {
    match effective_score {
        0..=3 => Tier {
            ceiling: (640, 480),
            target_fps: 10,
            bitrate: "500K",
        },
        4..=5 => Tier {
            ceiling: (640, 480),
            target_fps: 15,
            bitrate: "1M",
        },
        6..=7 => Tier {
            ceiling: (1280, 720),
            target_fps: 15,
            bitrate: "2M",
        },
        8..=9 => Tier {
            ceiling: (1280, 720),
            target_fps: 15,
            bitrate: "2M",
        },
        _ => Tier {
            ceiling: (1280, 720),
            target_fps: 30,
            bitrate: "4M",
        },
    }
}

/// Administrator overrides. An override wins when it names a combination the
/// device actually advertises; otherwise selection falls back and a warning
/// is attached to the result.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Overrides {
    pub format: Option<String>,
    pub resolution: Option<String>,
    pub framerate: Option<u32>,
    pub bitrate: Option<String>,
}

/// Chosen profile plus any fallback warnings.
#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    pub format: String,
    pub resolution: String,
    pub framerate: u32,
    pub bitrate: String,
    pub encoder: Encoder,
    pub warnings: Vec<String>,
}

pub fn select(
    capabilities: &CapabilityMap,
    effective_score: u8,
    overrides: &Overrides,
    encoders: &EncoderSet,
) -> Selection {
    let tier = tier_for(effective_score);
    let mut warnings = Vec::new();

    if capabilities.is_empty() {
        warnings.push("no capabilities advertised, using tier defaults".to_string());
        return Selection {
            format: "mjpeg".to_string(),
            resolution: format!("{}x{}", tier.ceiling.0, tier.ceiling.1),
            framerate: tier.target_fps,
            bitrate: overrides
                .bitrate
                .clone()
                .unwrap_or_else(|| tier.bitrate.to_string()),
            encoder: pick_encoder(encoders),
            warnings,
        };
    }

    let format = pick_format(capabilities, overrides, &mut warnings);
    let resolution = pick_resolution(capabilities, &format, tier, overrides, &mut warnings);
    let framerate = pick_framerate(capabilities, &format, &resolution, tier, overrides, &mut warnings);

    let bitrate = overrides
        .bitrate
        .clone()
        .unwrap_or_else(|| tier.bitrate.to_string());

    Selection {
        format,
        resolution,
        framerate,
        bitrate,
        encoder: pick_encoder(encoders),
        warnings,
    }
}

fn pick_format(
    capabilities: &CapabilityMap,
    overrides: &Overrides,
    warnings: &mut Vec<String>,
) -> String {
    if let Some(wanted) = &overrides.format {
        if capabilities.contains_key(wanted) {
            return wanted.clone();
        }
        warnings.push(format!("format override '{wanted}' not advertised"));
    }

    for preferred in FORMAT_PREFERENCE {
        if capabilities.contains_key(*preferred) {
            return (*preferred).to_string();
        }
    }

    // Any advertised format beats none; BTreeMap order keeps this stable
    capabilities
        .keys()
        .next()
        .cloned()
        .unwrap_or_else(|| "mjpeg".to_string())
}

fn parse_resolution(s: &str) -> Option<(u32, u32)> {
    let (w, h) = s.split_once('x')?;
    Some((w.parse().ok()?, h.parse().ok()?))
}

fn pick_resolution(
    capabilities: &CapabilityMap,
    format: &str,
    tier: Tier,
    overrides: &Overrides,
    warnings: &mut Vec<String>,
) -> String {
    let Some(sizes) = capabilities.get(format) else {
        return format!("{}x{}", tier.ceiling.0, tier.ceiling.1);
    };

    if let Some(wanted) = &overrides.resolution {
        if sizes.contains_key(wanted) {
            return wanted.clone();
        }
        warnings.push(format!("resolution override '{wanted}' not advertised"));
    }

    let (ceil_w, ceil_h) = tier.ceiling;
    let target = format!("{ceil_w}x{ceil_h}");

    let mut candidates: Vec<(u32, u32, &String)> = sizes
        .keys()
        .filter_map(|key| parse_resolution(key).map(|(w, h)| (w, h, key)))
        .collect();
    candidates.sort_by_key(|(w, h, _)| (*w as u64) * (*h as u64));

    let best_under = candidates
        .iter()
        .filter(|(w, h, _)| *w <= ceil_w && *h <= ceil_h)
        .max_by_key(|(w, h, key)| {
            // Exact tier target wins ties at equal pixel count
            ((*w as u64) * (*h as u64), **key == target)
        });

    if let Some((_, _, key)) = best_under {
        return (*key).clone();
    }

    // Everything advertised exceeds the ceiling; the smallest option is the
    // closest fit from above
    if let Some((_, _, key)) = candidates.first() {
        warnings.push(format!(
            "no advertised resolution within {target}, using {key}"
        ));
        return (*key).clone();
    }

    target
}

fn pick_framerate(
    capabilities: &CapabilityMap,
    format: &str,
    resolution: &str,
    tier: Tier,
    overrides: &Overrides,
    warnings: &mut Vec<String>,
) -> u32 {
    let advertised = capabilities
        .get(format)
        .and_then(|sizes| sizes.get(resolution));

    let Some(rates) = advertised else {
        return tier.target_fps;
    };

    if let Some(wanted) = overrides.framerate {
        if rates.contains(&wanted) {
            return wanted;
        }
        warnings.push(format!("framerate override {wanted} not advertised"));
    }

    // Rates are descending; first at or under the target is the largest such
    if let Some(rate) = rates.iter().find(|rate| **rate <= tier.target_fps) {
        return *rate;
    }

    rates.last().copied().unwrap_or(tier.target_fps)
}

/// First available hardware encoder wins; they all emit H.264, so the
/// license class always matches the output codec.
fn pick_encoder(encoders: &EncoderSet) -> Encoder {
    encoders
        .available()
        .into_iter()
        .next()
        .unwrap_or(Encoder::Software)
}
