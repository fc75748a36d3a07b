//! Mac model catalog used for SMBIOS identity selection.

use crate::kb::cpu::{self, CpuVendor};
use crate::models::{CpuInfo, Platform};
use crate::version::{SupportRange, Version};

/// Model category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelCategory {
    Desktop,
    Laptop,
    Workstation,
}

impl ModelCategory {
    /// Whether a model of this category may represent a machine of `platform`.
    pub fn serves(&self, platform: Platform) -> bool {
        match (self, platform) {
            (ModelCategory::Laptop, Platform::Laptop) => true,
            (ModelCategory::Desktop | ModelCategory::Workstation, Platform::Desktop) => true,
            _ => false,
        }
    }
}

/// Inputs the model matchers look at.
#[derive(Debug, Clone, Copy)]
pub struct ModelQuery<'a> {
    pub cpu: &'a CpuInfo,
    pub has_igpu: bool,
}

/// A Mac model.
#[derive(Clone, Copy)]
pub struct SmbiosModel {
    pub name: &'static str,
    /// Intel generation the model shipped with.
    pub firmware_era: u32,
    pub min_major: u32,
    pub max_major: u32,
    pub category: ModelCategory,
    pub board_id: &'static str,
    pub cpu_match: fn(&ModelQuery) -> bool,
}

impl SmbiosModel {
    pub fn supported_range(&self) -> Option<SupportRange> {
        SupportRange::majors(self.min_major, self.max_major)
    }

    pub fn supports(&self, target: Version) -> bool {
        self.supported_range().map(|r| r.contains(target)).unwrap_or(false)
    }

    /// Model family prefix (`iMac19,1` -> `iMac19`).
    pub fn family(&self) -> &'static str {
        self.name.split(',').next().unwrap_or(self.name)
    }
}

impl std::fmt::Debug for SmbiosModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmbiosModel")
            .field("name", &self.name)
            .field("firmware_era", &self.firmware_era)
            .field("min_major", &self.min_major)
            .field("max_major", &self.max_major)
            .field("category", &self.category)
            .finish()
    }
}

impl PartialEq for SmbiosModel {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

fn codename_is(q: &ModelQuery, names: &[&str]) -> bool {
    cpu::lookup(&q.cpu.codename)
        .map(|g| names.contains(&g.codename))
        .unwrap_or(false)
}

fn intel_with_igpu(q: &ModelQuery, names: &[&str]) -> bool {
    q.has_igpu && codename_is(q, names)
}

fn intel_headless(q: &ModelQuery) -> bool {
    cpu::vendor_of(q.cpu) == CpuVendor::Intel && !q.has_igpu
}

/// Catalog, oldest first within each category.
pub static SMBIOS_MODELS: &[SmbiosModel] = &[
    // Desktops
    SmbiosModel {
        name: "iMac12,2",
        firmware_era: 2,
        min_major: 17,
        max_major: 17,
        category: ModelCategory::Desktop,
        board_id: "Mac-942B59F58194171B",
        cpu_match: |q| codename_is(q, &["Sandy Bridge"]),
    },
    SmbiosModel {
        name: "iMac13,2",
        firmware_era: 3,
        min_major: 17,
        max_major: 19,
        category: ModelCategory::Desktop,
        board_id: "Mac-FC02E91DDD3FA6A4",
        cpu_match: |q| codename_is(q, &["Ivy Bridge"]),
    },
    SmbiosModel {
        name: "iMac15,1",
        firmware_era: 4,
        min_major: 17,
        max_major: 20,
        category: ModelCategory::Desktop,
        board_id: "Mac-42FD25EABCABB274",
        cpu_match: |q| codename_is(q, &["Haswell"]),
    },
    SmbiosModel {
        name: "iMac16,2",
        firmware_era: 5,
        min_major: 17,
        max_major: 21,
        category: ModelCategory::Desktop,
        board_id: "Mac-FFE5EF870D7BA81A",
        cpu_match: |q| codename_is(q, &["Broadwell"]),
    },
    SmbiosModel {
        name: "iMac17,1",
        firmware_era: 6,
        min_major: 17,
        max_major: 21,
        category: ModelCategory::Desktop,
        board_id: "Mac-B809C3757DA9BB8D",
        cpu_match: |q| codename_is(q, &["Skylake"]),
    },
    SmbiosModel {
        name: "iMac18,3",
        firmware_era: 7,
        min_major: 17,
        max_major: 22,
        category: ModelCategory::Desktop,
        board_id: "Mac-BE088AF8C5EB4FA2",
        cpu_match: |q| codename_is(q, &["Kaby Lake", "Skylake"]),
    },
    SmbiosModel {
        name: "Macmini8,1",
        firmware_era: 8,
        min_major: 18,
        max_major: 24,
        category: ModelCategory::Desktop,
        board_id: "Mac-7BA5B2DFE22DDD8C",
        cpu_match: |q| intel_with_igpu(q, &["Coffee Lake"]) && q.cpu.cores <= 6,
    },
    SmbiosModel {
        name: "iMac19,1",
        firmware_era: 8,
        min_major: 18,
        max_major: 24,
        category: ModelCategory::Desktop,
        board_id: "Mac-AA95B1DDAB278B95",
        cpu_match: |q| intel_with_igpu(q, &["Coffee Lake"]),
    },
    SmbiosModel {
        name: "iMac20,1",
        firmware_era: 10,
        min_major: 19,
        max_major: 24,
        category: ModelCategory::Desktop,
        board_id: "Mac-CFF7D910A743CAAF",
        cpu_match: |q| intel_with_igpu(q, &["Comet Lake", "Rocket Lake", "Alder Lake", "Raptor Lake", "Arrow Lake"]),
    },
    // Workstations
    SmbiosModel {
        name: "MacPro6,1",
        firmware_era: 3,
        min_major: 17,
        max_major: 20,
        category: ModelCategory::Workstation,
        board_id: "Mac-F60DEB81FF30ACF6",
        cpu_match: |q| codename_is(q, &["Ivy Bridge-E", "Haswell-E", "Broadwell-E"]),
    },
    SmbiosModel {
        name: "iMacPro1,1",
        firmware_era: 8,
        min_major: 17,
        max_major: 24,
        category: ModelCategory::Workstation,
        board_id: "Mac-7BA5B2D9E42DDD94",
        cpu_match: |q| intel_headless(q) || cpu::vendor_of(q.cpu) == CpuVendor::Amd,
    },
    SmbiosModel {
        name: "MacPro7,1",
        firmware_era: 10,
        min_major: 19,
        max_major: 24,
        category: ModelCategory::Workstation,
        board_id: "Mac-27AD2F918AE68F61",
        cpu_match: |q| {
            codename_is(q, &["Skylake-X", "Skylake-W", "Cascade Lake"])
                || (cpu::vendor_of(q.cpu) == CpuVendor::Amd)
                || (intel_headless(q) && cpu::era_threshold(q.cpu) >= 10)
        },
    },
    // Laptops
    SmbiosModel {
        name: "MacBookPro8,1",
        firmware_era: 2,
        min_major: 17,
        max_major: 17,
        category: ModelCategory::Laptop,
        board_id: "Mac-94245B3640C91C81",
        cpu_match: |q| codename_is(q, &["Sandy Bridge"]),
    },
    SmbiosModel {
        name: "MacBookPro10,2",
        firmware_era: 3,
        min_major: 17,
        max_major: 19,
        category: ModelCategory::Laptop,
        board_id: "Mac-AFD8A9D944EA4843",
        cpu_match: |q| codename_is(q, &["Ivy Bridge"]),
    },
    SmbiosModel {
        name: "MacBookPro11,1",
        firmware_era: 4,
        min_major: 17,
        max_major: 20,
        category: ModelCategory::Laptop,
        board_id: "Mac-189A3D4F975D5FFC",
        cpu_match: |q| codename_is(q, &["Haswell"]),
    },
    SmbiosModel {
        name: "MacBookPro12,1",
        firmware_era: 5,
        min_major: 17,
        max_major: 21,
        category: ModelCategory::Laptop,
        board_id: "Mac-E43C1C25D4880AD6",
        cpu_match: |q| codename_is(q, &["Broadwell"]),
    },
    SmbiosModel {
        name: "MacBookPro13,1",
        firmware_era: 6,
        min_major: 17,
        max_major: 21,
        category: ModelCategory::Laptop,
        board_id: "Mac-473D31EABEB93F9B",
        cpu_match: |q| codename_is(q, &["Skylake"]),
    },
    SmbiosModel {
        name: "MacBookPro14,1",
        firmware_era: 7,
        min_major: 17,
        max_major: 22,
        category: ModelCategory::Laptop,
        board_id: "Mac-B4831CEBD52A0C4C",
        cpu_match: |q| codename_is(q, &["Kaby Lake", "Amber Lake"]),
    },
    SmbiosModel {
        name: "MacBookPro15,2",
        firmware_era: 8,
        min_major: 17,
        max_major: 24,
        category: ModelCategory::Laptop,
        board_id: "Mac-827FB448E656EC26",
        cpu_match: |q| codename_is(q, &["Coffee Lake", "Whiskey Lake"]),
    },
    SmbiosModel {
        name: "MacBookPro16,2",
        firmware_era: 10,
        min_major: 19,
        max_major: 24,
        category: ModelCategory::Laptop,
        board_id: "Mac-5F9802EFE386AA28",
        cpu_match: |q| codename_is(q, &["Ice Lake", "Tiger Lake"]),
    },
    SmbiosModel {
        name: "MacBookPro16,1",
        firmware_era: 10,
        min_major: 19,
        max_major: 24,
        category: ModelCategory::Laptop,
        board_id: "Mac-E1008331FDC96864",
        cpu_match: |q| {
            codename_is(q, &["Comet Lake", "Alder Lake", "Raptor Lake"]) || cpu::vendor_of(q.cpu) == CpuVendor::Amd
        },
    },
];

pub fn lookup(name: &str) -> Option<&'static SmbiosModel> {
    SMBIOS_MODELS.iter().find(|m| m.name == name)
}
