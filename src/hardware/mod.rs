//! Hardware probe
//!
//! ## Responsibilities
//!
//! - CPU capability score (deterministic, cached per process)
//! - Hardware encoder detection (vaapi / v4l2m2m / rkmpp)
//! - V4L2 capability enumeration for a device path
//!
//! All host queries happen once at startup; the rest of the daemon consumes
//! the cached `HardwareProbe`.

mod capabilities;
mod cpu;
mod encoders;

pub use capabilities::{probe_capabilities, CapabilityMap};
pub use cpu::{cpu_score, CpuSnapshot};
pub use encoders::{detect_encoders, Encoder, EncoderSet};

/// Bonus added to the CPU score when any hardware encoder is usable.
pub const ENCODER_SCORE_BONUS: u8 = 2;

/// Cached view of the host captured once at startup.
#[derive(Debug, Clone)]
pub struct HardwareProbe {
    pub cpu: CpuSnapshot,
    pub score: u8,
    pub encoders: EncoderSet,
}

impl HardwareProbe {
    /// Inspect the host. Blocking work (sysinfo refresh, ffmpeg -encoders)
    /// happens here, once.
    pub async fn detect() -> Self {
        let cpu = CpuSnapshot::capture();
        let score = cpu_score(&cpu);
        let encoders = detect_encoders().await;

        tracing::info!(
            cores = cpu.cores,
            mhz = cpu.mhz,
            arch = %cpu.arch,
            score = score,
            encoders = ?encoders.available(),
            "Hardware probe complete"
        );

        Self {
            cpu,
            score,
            encoders,
        }
    }

    /// CPU score plus the hardware-encoder bonus, capped at 10.
    pub fn effective_score(&self) -> u8 {
        if self.encoders.any_hardware() {
            (self.score + ENCODER_SCORE_BONUS).min(10)
        } else {
            self.score
        }
    }

    /// A probe with a fixed score and no hardware encoders, for tests.
    pub fn fixed(score: u8) -> Self {
        Self {
            cpu: CpuSnapshot {
                cores: 0,
                mhz: 0,
                arch: "test",
            },
            score,
            encoders: EncoderSet::default(),
        }
    }
}
