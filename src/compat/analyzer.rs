//! Compatibility analyzer.
//!
//! Annotates every device of a normalized report with native and extended
//! support ranges, collects blockers, computes the OS envelopes and suggests
//! a target.

use crate::error::Blocker;
use crate::kb::{codecs, cpu, os, pci};
use crate::models::{Device, DeviceCategory, HardwareReport};
use crate::version::{intersect_all, SupportRange, Version};

/// Output of the analyzer.
#[derive(Debug, Clone)]
pub struct Analysis {
    pub report: HardwareReport,
    pub native_envelope: Option<SupportRange>,
    pub extended_envelope: Option<SupportRange>,
    pub blockers: Vec<Blocker>,
    pub suggested_target: Option<Version>,
    pub diagnostics: Vec<String>,
}

impl Analysis {
    pub fn is_blocked(&self) -> bool {
        !self.blockers.is_empty()
    }

    /// Releases that can be targeted: every release inside the extended
    /// envelope (which contains the native one).
    pub fn targetable_releases(&self, include_beta: bool) -> Vec<&'static os::OsRelease> {
        let envelope = match self.extended_envelope.or(self.native_envelope) {
            Some(e) => e,
            None => return Vec::new(),
        };
        os::selectable_releases(include_beta)
            .filter(|r| envelope.admits_major(r.kernel_major))
            .collect()
    }

    /// Whether `target` is only reachable through extended support.
    pub fn target_needs_extended(&self, target: Version) -> bool {
        !self.native_envelope.map(|e| e.contains(target)).unwrap_or(false)
            && self.extended_envelope.map(|e| e.contains(target)).unwrap_or(false)
    }
}

/// Analyze a normalized report.
pub fn analyze(mut report: HardwareReport, include_beta: bool) -> Analysis {
    let mut blockers = Vec::new();
    let mut diagnostics = Vec::new();

    // CPU
    let cpu_support = cpu::classify(&report.cpu);
    if cpu_support.blocked {
        log::warn!("[Analyzer] CPU {} lacks SSE4.1", report.cpu.name);
        blockers.push(Blocker::NoSse4);
    }
    report.cpu.compatibility = cpu_support.native;
    report.cpu.extended = cpu_support.extended;
    if cpu::lookup(&report.cpu.codename).is_none() {
        diagnostics.push(format!("CPU codename '{}' is not in the knowledge base", report.cpu.codename));
    }

    // Devices
    let mut vmd_found = false;
    for category in DeviceCategory::ALL {
        for device in report.devices_in_mut(category) {
            let (native, extended) = classify_device(device, &mut diagnostics, &mut vmd_found);
            device.compatibility = native;
            device.extended = extended;
            log::debug!(
                "[Analyzer] {} -> native {:?}, extended {:?}",
                device.label(),
                native.map(|r| r.to_string()),
                extended.map(|r| r.to_string())
            );
        }
    }

    // Blockers over categories
    let usable = |d: &Device| d.compatibility.is_some() || d.extended.is_some();
    if !report.devices_in(DeviceCategory::Gpu).any(usable) {
        blockers.push(Blocker::NoCompatibleGpu);
    }
    if vmd_found {
        blockers.push(Blocker::IntelVmd);
    }
    if !report.devices_in(DeviceCategory::StorageController).any(usable) {
        blockers.push(Blocker::NoCompatibleStorage);
    }
    blockers.sort();
    blockers.dedup();

    // Envelopes
    let mut native_ranges: Vec<SupportRange> = report.cpu.compatibility.into_iter().collect();
    let mut extended_ranges: Vec<SupportRange> = span(report.cpu.compatibility, report.cpu.extended)
        .into_iter()
        .collect();
    for device in report.all_devices() {
        if let Some(native) = device.compatibility {
            native_ranges.push(native);
        } else if device.extended.is_some() {
            diagnostics.push(format!(
                "{} has no native support and is usable only with extended support",
                device.label()
            ));
        }
        if let Some(s) = span(device.compatibility, device.extended) {
            extended_ranges.push(s);
        }
    }
    let native_envelope = if report.cpu.compatibility.is_some() {
        intersect_all(&native_ranges)
    } else {
        None
    };
    let extended_envelope = intersect_all(&extended_ranges);
    if native_envelope.is_none() && extended_envelope.is_some() {
        diagnostics.push("No OS release is natively supported; only extended support remains".to_string());
    }

    let suggested_target = if blockers.is_empty() {
        suggest_target(&report, native_envelope, extended_envelope, include_beta, &mut diagnostics)
    } else {
        None
    };

    log::info!(
        target: "parsed",
        "[Analyzer] native {}, extended {}, blockers [{}], suggested {}",
        native_envelope.map(|e| e.to_string()).unwrap_or_else(|| "none".into()),
        extended_envelope.map(|e| e.to_string()).unwrap_or_else(|| "none".into()),
        blockers.iter().map(|b| b.code()).collect::<Vec<_>>().join(", "),
        suggested_target.map(os::os_name).unwrap_or_else(|| "none".into())
    );

    Analysis {
        report,
        native_envelope,
        extended_envelope,
        blockers,
        suggested_target,
        diagnostics,
    }
}

/// Convex hull of a native and an extended range.
fn span(native: Option<SupportRange>, extended: Option<SupportRange>) -> Option<SupportRange> {
    match (native, extended) {
        (Some(n), Some(e)) => SupportRange::new(n.lo().min(e.lo()), n.hi().max(e.hi())),
        (Some(n), None) => Some(n),
        (None, Some(e)) => Some(e),
        (None, None) => None,
    }
}

fn classify_device(
    device: &mut Device,
    diagnostics: &mut Vec<String>,
    vmd_found: &mut bool,
) -> (Option<SupportRange>, Option<SupportRange>) {
    let id = device.lookup_id().map(|s| s.to_string());
    let unknown = |diagnostics: &mut Vec<String>, device: &Device| {
        diagnostics.push(format!(
            "Unknown device id {} for {}",
            device.lookup_id().unwrap_or("(none)"),
            device.label()
        ));
        (None, None)
    };

    match device.category() {
        DeviceCategory::Gpu => match id.as_deref().and_then(pci::classify_gpu) {
            Some(class) => {
                if device.codename.is_none() {
                    device.codename = Some(class.codename.to_string());
                }
                class.family.support()
            }
            None => unknown(diagnostics, device),
        },
        DeviceCategory::Sound => match id.as_deref().and_then(codecs::lookup) {
            Some(codec) => {
                if device.codename.is_none() {
                    device.codename = Some(codec.name.to_string());
                }
                (Some(SupportRange::universal()), None)
            }
            None => unknown(diagnostics, device),
        },
        DeviceCategory::Network => match id.as_deref().and_then(pci::classify_network) {
            Some(class) => class.support(),
            None => unknown(diagnostics, device),
        },
        DeviceCategory::Bluetooth => match id.as_deref().and_then(pci::classify_bluetooth) {
            Some(_) => (Some(SupportRange::universal()), None),
            None => unknown(diagnostics, device),
        },
        DeviceCategory::StorageController => {
            let kind_hint = match &device.kind {
                crate::models::DeviceKind::StorageController { controller_type } => {
                    controller_type.clone().or_else(|| device.device_type.clone())
                }
                _ => device.device_type.clone(),
            };
            match pci::classify_storage(id.as_deref(), kind_hint.as_deref()) {
                Some(pci::StorageClass::IntelVmd) => {
                    log::warn!("[Analyzer] Intel VMD controller present: {}", device.name);
                    *vmd_found = true;
                    (None, None)
                }
                Some(class) => (class.support(), None),
                None => unknown(diagnostics, device),
            }
        }
        DeviceCategory::SdController => match id.as_deref() {
            Some(id) if pci::is_realtek_card_reader(id) => (Some(SupportRange::universal()), None),
            _ => unknown(diagnostics, device),
        },
        DeviceCategory::Biometric => {
            diagnostics.push(format!("{} is not supported by macOS", device.label()));
            (None, None)
        }
        DeviceCategory::Monitor => (Some(SupportRange::universal()), None),
    }
}

fn suggest_target(
    report: &HardwareReport,
    native_envelope: Option<SupportRange>,
    extended_envelope: Option<SupportRange>,
    include_beta: bool,
    diagnostics: &mut Vec<String>,
) -> Option<Version> {
    // STEP 1: Start from the top of the native envelope
    let (envelope, mut suggestion) = match (native_envelope, extended_envelope) {
        (Some(n), _) => (n, n.hi()),
        (None, Some(e)) => {
            diagnostics.push("Suggesting a release that requires extended support".to_string());
            (e, e.hi())
        }
        (None, None) => return None,
    };

    // STEP 2: Integrated GPU caps and per-device upper bounds
    for gpu in report.devices_in(DeviceCategory::Gpu) {
        if gpu.is_integrated_gpu() {
            let family = gpu.lookup_id().and_then(pci::classify_gpu).map(|c| c.family);
            if family == Some(pci::GpuFamily::AmdApu) {
                suggestion = suggestion.min(Version::upper(22));
            } else if let Some(cap) = gpu.lookup_id().and_then(pci::igpu_suggestion_cap) {
                suggestion = suggestion.min(Version::upper(cap));
            }
        }
    }
    for category in [
        DeviceCategory::Gpu,
        DeviceCategory::Network,
        DeviceCategory::Bluetooth,
        DeviceCategory::SdController,
    ] {
        for device in report.devices_in(category) {
            if let Some(native) = device.compatibility {
                suggestion = suggestion.min(native.hi());
            }
        }
    }

    // STEP 3: Step down past beta releases
    suggestion = suggestion.as_upper();
    while !include_beta && os::is_beta_major(suggestion.major) {
        suggestion = Version::upper(suggestion.major - 1);
    }

    if envelope.admits_major(suggestion.major) {
        Some(suggestion)
    } else {
        diagnostics.push("No release inside the supported envelope survives the suggestion rules".to_string());
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        BiosInfo, CpuInfo, DeviceKind, FirmwareType, GpuType, MotherboardInfo, Platform, SecureBoot,
    };
    use std::collections::BTreeMap;

    fn report(simd: &[&str]) -> HardwareReport {
        let mut report = HardwareReport {
            bios: BiosInfo {
                firmware_type: FirmwareType::Uefi,
                secure_boot: SecureBoot::Disabled,
            },
            motherboard: MotherboardInfo {
                manufacturer: "ASUS".into(),
                model: "PRIME Z390-A".into(),
                chipset: "Z390".into(),
                platform: Platform::Desktop,
            },
            cpu: CpuInfo {
                name: "Intel Core i7-9700K".into(),
                manufacturer: "Intel".into(),
                codename: "Coffee Lake".into(),
                cores: 8,
                threads: 8,
                simd: simd.iter().map(|s| s.to_string()).collect(),
                family: Some(6),
                model: Some(0x9E),
                compatibility: None,
                extended: None,
            },
            devices: BTreeMap::new(),
        };
        report.insert(
            Device::new(
                "Intel UHD Graphics 630",
                DeviceKind::Gpu {
                    gpu_type: GpuType::Integrated,
                    resizable_bar: None,
                },
            )
            .with_device_id("8086-3e92"),
        );
        report.insert(
            Device::new(
                "Samsung 970 EVO",
                DeviceKind::StorageController {
                    controller_type: Some("NVMe Controller".into()),
                },
            )
            .with_device_id("144d-a804"),
        );
        report
    }

    #[test]
    fn test_coffee_lake_suggestion_skips_beta() {
        let analysis = analyze(report(&["SSE4.1", "SSE4.2", "AVX2"]), false);
        assert!(analysis.blockers.is_empty());
        assert_eq!(analysis.suggested_target, Some(Version::upper(23)));
        let with_beta = analyze(report(&["SSE4.1", "SSE4.2", "AVX2"]), true);
        assert_eq!(with_beta.suggested_target, Some(Version::upper(24)));
    }

    #[test]
    fn test_sse3_cpu_is_blocked() {
        let analysis = analyze(report(&["SSE3"]), false);
        assert_eq!(analysis.blockers, vec![Blocker::NoSse4]);
        assert!(analysis.suggested_target.is_none());
    }

    #[test]
    fn test_empty_gpu_category_blocks() {
        let mut r = report(&["SSE4.1", "SSE4.2", "AVX2"]);
        r.devices.remove(&DeviceCategory::Gpu);
        let analysis = analyze(r, false);
        assert!(analysis.blockers.contains(&Blocker::NoCompatibleGpu));
    }

    #[test]
    fn test_vmd_blocks() {
        let mut r = report(&["SSE4.1", "SSE4.2", "AVX2"]);
        r.insert(
            Device::new("Intel VMD", DeviceKind::StorageController { controller_type: None })
                .with_device_id("8086-9a0b"),
        );
        let analysis = analyze(r, false);
        assert_eq!(analysis.blockers, vec![Blocker::IntelVmd]);
    }

    #[test]
    fn test_broadcom_wifi_extends_envelope() {
        let mut r = report(&["SSE4.1", "SSE4.2", "AVX2"]);
        r.insert(Device::new("BCM94360", DeviceKind::Network).with_device_id("14e4-43a0"));
        let analysis = analyze(r, false);
        assert_eq!(analysis.native_envelope.unwrap().hi().major, 22);
        assert_eq!(analysis.extended_envelope.unwrap().hi().major, 24);
        assert_eq!(analysis.suggested_target, Some(Version::upper(22)));
        assert!(analysis.target_needs_extended(Version::upper(23)));
    }

    #[test]
    fn test_kaby_lake_igpu_caps_suggestion() {
        let mut r = report(&["SSE4.1", "SSE4.2", "AVX2"]);
        r.devices.remove(&DeviceCategory::Gpu);
        r.insert(
            Device::new(
                "Intel HD Graphics 630",
                DeviceKind::Gpu {
                    gpu_type: GpuType::Integrated,
                    resizable_bar: None,
                },
            )
            .with_device_id("8086-5912"),
        );
        let analysis = analyze(r, false);
        assert_eq!(analysis.suggested_target, Some(Version::upper(22)));
    }

    #[test]
    fn test_unknown_devices_are_annotated_unsupported() {
        let mut r = report(&["SSE4.1", "SSE4.2", "AVX2"]);
        r.insert(Device::new("Mystery NIC", DeviceKind::Network).with_device_id("abcd-0001"));
        let analysis = analyze(r, false);
        let nic = analysis.report.devices_in(DeviceCategory::Network).next().unwrap();
        assert!(nic.compatibility.is_none() && nic.extended.is_none());
        assert!(analysis.diagnostics.iter().any(|d| d.contains("abcd-0001")));
    }
}
