//! CPU generations and SIMD-driven support ranges.

use crate::models::CpuInfo;
use crate::version::{SupportRange, HIGHEST_KERNEL_MAJOR, LOWEST_KERNEL_MAJOR};

/// CPU vendor as far as macOS cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CpuVendor {
    Intel,
    Amd,
    Other,
}

/// Static facts about a CPU codename.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuGeneration {
    pub codename: &'static str,
    pub vendor: CpuVendor,
    /// Ordinal generation; Intel core generations, AMD families use their own scale.
    pub generation: u32,
    /// High-end desktop / workstation platform.
    pub hedt: bool,
}

const fn intel(codename: &'static str, generation: u32) -> CpuGeneration {
    CpuGeneration { codename, vendor: CpuVendor::Intel, generation, hedt: false }
}

const fn intel_hedt(codename: &'static str, generation: u32) -> CpuGeneration {
    CpuGeneration { codename, vendor: CpuVendor::Intel, generation, hedt: true }
}

const fn amd(codename: &'static str, generation: u32) -> CpuGeneration {
    CpuGeneration { codename, vendor: CpuVendor::Amd, generation, hedt: false }
}

pub static CPU_GENERATIONS: &[CpuGeneration] = &[
    intel("Penryn", 0),
    intel("Wolfdale", 0),
    intel("Yorkfield", 0),
    intel("Nehalem", 1),
    intel("Lynnfield", 1),
    intel("Clarkdale", 1),
    intel("Arrandale", 1),
    intel("Westmere", 1),
    intel("Sandy Bridge", 2),
    intel("Ivy Bridge", 3),
    intel_hedt("Ivy Bridge-E", 3),
    intel("Haswell", 4),
    intel_hedt("Haswell-E", 4),
    intel("Broadwell", 5),
    intel_hedt("Broadwell-E", 5),
    intel("Skylake", 6),
    intel_hedt("Skylake-X", 6),
    intel_hedt("Skylake-W", 6),
    intel("Kaby Lake", 7),
    intel("Amber Lake", 8),
    intel("Whiskey Lake", 8),
    intel("Coffee Lake", 8),
    intel("Comet Lake", 10),
    intel("Ice Lake", 10),
    intel_hedt("Cascade Lake", 10),
    intel("Rocket Lake", 11),
    intel("Tiger Lake", 11),
    intel("Alder Lake", 12),
    intel("Raptor Lake", 13),
    intel("Arrow Lake", 15),
    amd("Bulldozer", 15),
    amd("Piledriver", 15),
    amd("Steamroller", 15),
    amd("Excavator", 15),
    amd("Zen", 17),
    amd("Zen+", 17),
    amd("Zen 2", 17),
    amd("Zen 3", 19),
    amd("Zen 4", 19),
    amd("Zen 5", 26),
];

/// Newest Intel generation any Apple machine shipped with.
pub const NEWEST_APPLE_INTEL_GENERATION: u32 = 10;

/// Find a generation entry by codename. Matches on the longest known prefix
/// so that `"Coffee Lake-S"` resolves to Coffee Lake.
pub fn lookup(codename: &str) -> Option<&'static CpuGeneration> {
    let lowered = codename.trim().to_lowercase();
    CPU_GENERATIONS
        .iter()
        .filter(|g| lowered.starts_with(&g.codename.to_lowercase()))
        .max_by_key(|g| g.codename.len())
}

pub fn vendor_of(cpu: &CpuInfo) -> CpuVendor {
    if cpu.is_intel() {
        CpuVendor::Intel
    } else if cpu.is_amd() {
        CpuVendor::Amd
    } else {
        lookup(&cpu.codename).map(|g| g.vendor).unwrap_or(CpuVendor::Other)
    }
}

/// Intel core generation of a CPU, if known.
pub fn intel_generation(cpu: &CpuInfo) -> Option<u32> {
    lookup(&cpu.codename)
        .filter(|g| g.vendor == CpuVendor::Intel)
        .map(|g| g.generation)
}

/// CPU generation threshold for SMBIOS firmware-era matching, clamped to the
/// newest era Apple shipped.
pub fn era_threshold(cpu: &CpuInfo) -> u32 {
    match vendor_of(cpu) {
        CpuVendor::Intel => intel_generation(cpu)
            .unwrap_or(0)
            .min(NEWEST_APPLE_INTEL_GENERATION),
        _ => 0,
    }
}

/// Outcome of CPU classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuSupport {
    pub native: Option<SupportRange>,
    pub extended: Option<SupportRange>,
    /// SSE4.1 missing: nothing can boot.
    pub blocked: bool,
}

/// Classify a CPU by its SIMD features.
///
/// SSE4.1 is the floor for every known release; SSE4.2 is needed from
/// Mojave; AVX2 from Ventura, below which the legacy patcher still works.
pub fn classify(cpu: &CpuInfo) -> CpuSupport {
    if !cpu.has_simd("SSE4.1") {
        return CpuSupport { native: None, extended: None, blocked: true };
    }
    if !cpu.has_simd("SSE4.2") {
        return CpuSupport {
            native: SupportRange::majors(LOWEST_KERNEL_MAJOR, 17),
            extended: None,
            blocked: false,
        };
    }
    if !cpu.has_simd("AVX2") {
        return CpuSupport {
            native: SupportRange::majors(LOWEST_KERNEL_MAJOR, 21),
            extended: SupportRange::majors(22, 24),
            blocked: false,
        };
    }
    // Intel parts newer than anything Apple shipped are fine; AMD relies on kernel patches
    CpuSupport {
        native: SupportRange::majors(LOWEST_KERNEL_MAJOR, HIGHEST_KERNEL_MAJOR),
        extended: None,
        blocked: false,
    }
}
