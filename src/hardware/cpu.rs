//! CPU capability scoring
//!
//! The score is a pure function of core count, nominal frequency and
//! architecture family so that the same host always lands in the same
//! quality tier. Current load is deliberately not an input.

use sysinfo::System;

/// What the score is computed from. Captured once per process.
#[derive(Debug, Clone)]
pub struct CpuSnapshot {
    /// Logical core count
    pub cores: usize,
    /// Nominal frequency of the first core in MHz
    pub mhz: u64,
    /// Architecture family (`std::env::consts::ARCH`)
    pub arch: &'static str,
}

impl CpuSnapshot {
    pub fn capture() -> Self {
        let sys = System::new_all();

        let cores = sys.cpus().len().max(1);
        let mhz = sys.cpus().first().map(|c| c.frequency()).unwrap_or(0);

        Self {
            cores,
            mhz,
            arch: std::env::consts::ARCH,
        }
    }
}

/// Map a snapshot to a score in [1, 10].
///
/// Base from core count (1 -> 2, 2 -> 4, 4 -> 6, 8+ -> 8), +1 for a nominal
/// frequency of at least 2400 MHz, +1 on x86_64.
pub fn cpu_score(cpu: &CpuSnapshot) -> u8 {
    let base: u8 = match cpu.cores {
        0..=1 => 2,
        2..=3 => 4,
        4..=7 => 6,
        _ => 8,
    };

    let freq_bonus: u8 = if cpu.mhz >= 2400 { 1 } else { 0 };
    let arch_bonus: u8 = if cpu.arch == "x86_64" { 1 } else { 0 };

    (base + freq_bonus + arch_bonus).clamp(1, 10)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(cores: usize, mhz: u64, arch: &'static str) -> CpuSnapshot {
        CpuSnapshot { cores, mhz, arch }
    }

    #[test]
    fn single_slow_core_scores_low() {
        assert_eq!(cpu_score(&snap(1, 1000, "arm")), 2);
    }

    #[test]
    fn fast_desktop_scores_ten() {
        assert_eq!(cpu_score(&snap(8, 3600, "x86_64")), 10);
    }

    #[test]
    fn arm_sbc_misses_the_arch_bonus() {
        assert_eq!(cpu_score(&snap(4, 1800, "aarch64")), 6);
        assert_eq!(cpu_score(&snap(4, 2400, "aarch64")), 7);
    }

    #[test]
    fn score_is_deterministic() {
        let s = snap(2, 2600, "x86_64");
        assert_eq!(cpu_score(&s), cpu_score(&s));
    }
}
