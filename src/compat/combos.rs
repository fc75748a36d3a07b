//! Legal device combinations for multi-device categories.

use std::collections::BTreeSet;

use crate::kb::{os, pci};
use crate::models::Device;
use crate::version::{SupportRange, Version};

/// GPU grouping kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpuKind {
    AmdIntegrated,
    AmdNavi22,
    AmdNaviOther,
    IntelIntegrated,
    Other,
}

pub fn gpu_kind(device: &Device) -> GpuKind {
    let family = device.lookup_id().and_then(pci::classify_gpu).map(|c| c.family);
    match family {
        Some(pci::GpuFamily::AmdApu) => GpuKind::AmdIntegrated,
        Some(pci::GpuFamily::AmdNavi22) => GpuKind::AmdNavi22,
        Some(f) if f.is_navi() => GpuKind::AmdNaviOther,
        Some(f) if f.is_intel() => GpuKind::IntelIntegrated,
        _ if device.is_integrated_gpu() && device.manufacturer_is("intel") => GpuKind::IntelIntegrated,
        _ => GpuKind::Other,
    }
}

/// One option offered to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Combination {
    /// Member device names, in report order.
    pub members: Vec<String>,
    /// Intersection of the members' effective ranges.
    pub range: SupportRange,
}

impl Combination {
    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.members.iter().any(|m| m == name)
    }

    /// Option text: `"A + B (macOS Big Sur 11 .. macOS Sequoia 15)"`.
    pub fn label(&self) -> String {
        format!(
            "{} ({} .. {})",
            self.members.join(" + "),
            os::os_name(self.range.lo()),
            os::os_name(self.range.hi())
        )
    }
}

/// Largest group whose subsets are enumerated exhaustively.
const MAX_EXHAUSTIVE_GROUP: usize = 12;

/// All non-empty subsets of `group`, by bitmask order.
///
/// Groups above [`MAX_EXHAUSTIVE_GROUP`] only offer each device alone and the
/// whole group together.
fn subsets<'a>(group: &[&'a Device]) -> Vec<Vec<&'a Device>> {
    let n = group.len();
    if n > MAX_EXHAUSTIVE_GROUP {
        log::warn!(
            "[Combinations] {} GPUs in one group; offering singletons and the full set only",
            n
        );
        let mut out: Vec<Vec<&Device>> = group.iter().map(|d| vec![*d]).collect();
        out.push(group.to_vec());
        return out;
    }
    (1u32..(1u32 << n))
        .map(|mask| {
            group
                .iter()
                .enumerate()
                .filter(|(i, _)| mask & (1 << i) != 0)
                .map(|(_, d)| *d)
                .collect()
        })
        .collect()
}

/// Turn candidate subsets into sorted, deduplicated, legal combinations.
///
/// A subset containing a device that needs extended support at `target` is
/// legal only as a singleton. Subsets equal as name sets collapse into one.
/// Sorting is stable by `(size, upper bound)`.
fn finalize(candidates: Vec<Vec<&Device>>, target: Version) -> Vec<Combination> {
    let mut seen: BTreeSet<BTreeSet<String>> = BTreeSet::new();
    let mut combos = Vec::new();
    for subset in candidates {
        if subset.len() > 1 && subset.iter().any(|d| d.needs_extended_for(target)) {
            continue;
        }
        let key: BTreeSet<String> = subset.iter().map(|d| d.name.clone()).collect();
        if !seen.insert(key) {
            continue;
        }
        let ranges: Vec<SupportRange> = subset.iter().filter_map(|d| d.effective_range(target)).collect();
        if ranges.len() != subset.len() {
            continue;
        }
        if let Some(range) = crate::version::intersect_all(&ranges) {
            combos.push(Combination {
                members: subset.iter().map(|d| d.name.clone()).collect(),
                range,
            });
        }
    }
    combos.sort_by_key(|c| (c.len(), c.range.hi()));
    combos
}

/// GPU combinations.
///
/// Groups are generated as `{Navi other} + {Intel} + {other}`, then
/// `{AMD integrated} + {Intel} + {other}`, then `{Navi 22} + {Intel} + {other}`,
/// so that with equal keys the Navi 22 group sorts last.
pub fn gpu_combinations(gpus: &[&Device], target: Version) -> Vec<Combination> {
    let of_kind = |kind: GpuKind| {
        gpus.iter()
            .copied()
            .filter(|d| gpu_kind(d) == kind)
            .collect::<Vec<_>>()
    };
    let amd_integrated = of_kind(GpuKind::AmdIntegrated);
    let navi22 = of_kind(GpuKind::AmdNavi22);
    let navi_other = of_kind(GpuKind::AmdNaviOther);
    let mut shared = of_kind(GpuKind::IntelIntegrated);
    shared.extend(of_kind(GpuKind::Other));

    let groups: [Vec<&Device>; 3] = [
        navi_other.iter().chain(shared.iter()).copied().collect(),
        amd_integrated.iter().chain(shared.iter()).copied().collect(),
        navi22.iter().chain(shared.iter()).copied().collect(),
    ];

    let mut candidates = Vec::new();
    for group in groups.iter().filter(|g| !g.is_empty()) {
        candidates.extend(subsets(group));
    }
    finalize(candidates, target)
}

/// Single-device combinations for categories that keep at most one device.
pub fn singleton_combinations(devices: &[&Device], target: Version) -> Vec<Combination> {
    finalize(devices.iter().map(|d| vec![*d]).collect(), target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DeviceKind, GpuType};

    fn gpu(name: &str, id: &str, integrated: bool) -> Device {
        let mut d = Device::new(
            name,
            DeviceKind::Gpu {
                gpu_type: if integrated { GpuType::Integrated } else { GpuType::Discrete },
                resizable_bar: None,
            },
        )
        .with_device_id(id);
        let family = pci::classify_gpu(id).unwrap().family;
        let (native, extended) = family.support();
        d.compatibility = native;
        d.extended = extended;
        d
    }

    #[test]
    fn test_navi21_and_navi22_offer_two_singletons_with_navi22_last() {
        let navi21 = gpu("RX 6800", "1002-73bf", false);
        let navi22 = gpu("RX 6700 XT", "1002-73df", false);
        let combos = gpu_combinations(&[&navi21, &navi22], Version::upper(23));
        assert_eq!(combos.len(), 2);
        assert_eq!(combos[0].members, vec!["RX 6800"]);
        assert_eq!(combos.last().unwrap().members, vec!["RX 6700 XT"]);
    }

    #[test]
    fn test_igpu_and_polaris_collapse_duplicates() {
        let igpu = gpu("UHD 630", "8086-3e92", true);
        let polaris = gpu("RX 580", "1002-67df", false);
        let combos = gpu_combinations(&[&igpu, &polaris], Version::upper(23));
        // {UHD}, {RX 580}, {UHD, RX 580}: the AMD-integrated group repeats them
        assert_eq!(combos.len(), 3);
        assert_eq!(combos.last().unwrap().len(), 2);
    }

    #[test]
    fn test_large_gpu_group_offers_singletons_and_full_set() {
        let cards: Vec<Device> = (0..40).map(|i| gpu(&format!("RX 580 #{}", i + 1), "1002-67df", false)).collect();
        let refs: Vec<&Device> = cards.iter().collect();
        let combos = gpu_combinations(&refs, Version::upper(23));
        assert_eq!(combos.len(), 41);
        assert!(combos[..40].iter().all(|c| c.len() == 1));
        assert_eq!(combos[40].len(), 40);
    }

    #[test]
    fn test_extended_devices_only_as_singletons() {
        let igpu = gpu("UHD 630", "8086-3e92", true);
        let kepler = gpu("GTX 770", "10de-1184", false);
        let combos = gpu_combinations(&[&igpu, &kepler], Version::upper(23));
        assert!(combos.iter().all(|c| c.len() == 1));
        assert_eq!(combos.len(), 2);
    }

    #[test]
    fn test_sorted_by_size_then_upper_bound() {
        let igpu = gpu("HD 630", "8086-5912", true);
        let polaris = gpu("RX 580", "1002-67df", false);
        let combos = gpu_combinations(&[&igpu, &polaris], Version::upper(21));
        let keys: Vec<_> = combos.iter().map(|c| (c.len(), c.range.hi())).collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
        assert_eq!(combos[0].members, vec!["HD 630"]);
    }
}
