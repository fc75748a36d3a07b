//! Hardware customizer.
//!
//! Projects an annotated report onto a target OS: devices whose ranges cover
//! the target are kept, the rest go to the disabled map. Categories that may
//! only keep some of their devices are arbitrated by the user.

use crate::error::PipelineError;
use crate::kb::{os, pci};
use crate::models::{
    CustomizedHardware, Device, DeviceCategory, DisabledDevices, FirmwareType, HardwareReport,
};
use crate::ui::{ask_choice, ask_confirm, Prompt, PromptTopic, Prompter};
use crate::version::Version;

use super::combos::{gpu_combinations, singleton_combinations, Combination};

/// Output of the customizer.
#[derive(Debug, Clone)]
pub struct Customization {
    pub hardware: CustomizedHardware,
    pub disabled: DisabledDevices,
    pub needs_extended: bool,
    pub diagnostics: Vec<String>,
}

/// Partition `report` for `target`, asking `prompter` where a choice is needed.
pub fn customize(
    report: &HardwareReport,
    target: Version,
    prompter: &dyn Prompter,
) -> Result<Customization, PipelineError> {
    let mut hardware = report.clone();
    hardware.devices.clear();
    let mut disabled = DisabledDevices::new();
    let mut diagnostics = Vec::new();

    log::info!("[Customizer] Customizing for {}", os::os_name(target));

    // STEP 1: Keep devices whose native or extended range covers the target
    for device in report.all_devices() {
        if device.natively_supports(target) {
            hardware.insert(device.clone());
        } else if device.needs_extended_for(target) {
            if device.compatibility.is_none() {
                diagnostics.push(format!(
                    "{} is kept only through extended support",
                    device.label()
                ));
            }
            hardware.insert(device.clone());
        } else {
            log::debug!("[Customizer] Disabling {}", device.label());
            disabled.insert(device.label(), device.clone());
        }
    }

    let cpu_native = report.cpu.compatibility.map(|r| r.contains(target)).unwrap_or(false);
    let cpu_extended = report.cpu.extended.map(|r| r.contains(target)).unwrap_or(false);
    if !cpu_native && !cpu_extended {
        diagnostics.push(format!(
            "CPU {} is outside its supported range for {}",
            report.cpu.name,
            os::os_name(target)
        ));
    }

    // STEP 2: Legacy firmware
    if hardware.bios.firmware_type == FirmwareType::Legacy {
        let use_uefi = ask_confirm(
            prompter,
            Prompt::confirm(
                PromptTopic::FirmwareType,
                "Firmware type",
                "This machine reports Legacy BIOS firmware. Build for UEFI instead?",
                true,
            ),
        )?;
        if use_uefi {
            hardware.bios.firmware_type = FirmwareType::Uefi;
        }
    }

    // STEP 3: Arbitrate multi-device categories
    let gpus: Vec<&Device> = hardware.devices_in(DeviceCategory::Gpu).collect();
    let gpu_choice = arbitrate(
        prompter,
        DeviceCategory::Gpu,
        "Graphics",
        &gpus,
        gpu_combinations(&gpus, target),
    )?;

    let wifi: Vec<&Device> = hardware
        .devices_in(DeviceCategory::Network)
        .filter(|d| d.lookup_id().map(pci::is_wireless_id).unwrap_or(false))
        .collect();
    let wifi_choice = arbitrate(
        prompter,
        DeviceCategory::Network,
        "Wi-Fi",
        &wifi,
        singleton_combinations(&wifi, target),
    )?;

    let bluetooth: Vec<&Device> = hardware.devices_in(DeviceCategory::Bluetooth).collect();
    let bluetooth_choice = arbitrate(
        prompter,
        DeviceCategory::Bluetooth,
        "Bluetooth",
        &bluetooth,
        singleton_combinations(&bluetooth, target),
    )?;

    // STEP 4: Move the losers to the disabled map
    let mut dropped: Vec<(DeviceCategory, String)> = Vec::new();
    for (category, candidates, choice) in [
        (DeviceCategory::Gpu, &gpus, &gpu_choice),
        (DeviceCategory::Network, &wifi, &wifi_choice),
        (DeviceCategory::Bluetooth, &bluetooth, &bluetooth_choice),
    ] {
        if let Some(chosen) = choice {
            for device in candidates.iter() {
                if !chosen.contains(&device.name) {
                    dropped.push((category, device.name.clone()));
                }
            }
        }
    }
    for (category, name) in dropped {
        if let Some(device) = hardware.remove(category, &name) {
            log::info!("[Customizer] Not selected: {}", device.label());
            disabled.insert(device.label(), device);
        }
    }

    let needs_extended = (!cpu_native && cpu_extended)
        || hardware.all_devices().any(|d| d.needs_extended_for(target));

    log::info!(
        target: "parsed",
        "[Customizer] Kept {} device(s), disabled {}, extended support {}",
        hardware.device_count(),
        disabled.len(),
        if needs_extended { "required" } else { "not required" }
    );

    Ok(Customization {
        hardware,
        disabled,
        needs_extended,
        diagnostics,
    })
}

/// Ask the user to pick one combination when a category has more than one
/// kept device. Returns `None` when no arbitration was needed.
fn arbitrate(
    prompter: &dyn Prompter,
    category: DeviceCategory,
    title: &str,
    devices: &[&Device],
    combos: Vec<Combination>,
) -> Result<Option<Combination>, PipelineError> {
    if devices.len() <= 1 {
        return Ok(None);
    }
    if combos.is_empty() {
        log::warn!("[Customizer] No legal {} combination; keeping none", title);
        return Ok(Some(Combination {
            members: Vec::new(),
            range: crate::version::SupportRange::universal(),
        }));
    }
    if combos.len() == 1 {
        return Ok(combos.into_iter().next());
    }
    let default = combos.len() - 1;
    let options = combos.iter().map(|c| c.label()).collect();
    let index = ask_choice(
        prompter,
        Prompt::choice(
            PromptTopic::DeviceSelection(category),
            format!("{} selection", title),
            format!(
                "Multiple {} devices can work together only in certain combinations. Choose one:",
                title
            ),
            options,
            default,
        ),
    )?;
    Ok(combos.into_iter().nth(index))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compat::analyzer::analyze;
    use crate::models::{
        BiosInfo, CpuInfo, DeviceKind, GpuType, MotherboardInfo, Platform, SecureBoot,
    };
    use crate::ui::{PromptResponse, ScriptedUi};
    use std::collections::BTreeMap;

    fn base(firmware: FirmwareType) -> HardwareReport {
        let mut report = HardwareReport {
            bios: BiosInfo {
                firmware_type: firmware,
                secure_boot: SecureBoot::Unknown,
            },
            motherboard: MotherboardInfo {
                manufacturer: "MSI".into(),
                model: "MAG B550".into(),
                chipset: "B550".into(),
                platform: Platform::Desktop,
            },
            cpu: CpuInfo {
                name: "AMD Ryzen 7 5800X".into(),
                manufacturer: "AMD".into(),
                codename: "Zen 3".into(),
                cores: 8,
                threads: 16,
                simd: vec!["SSE4.1".into(), "SSE4.2".into(), "AVX2".into()],
                family: Some(25),
                model: None,
                compatibility: None,
                extended: None,
            },
            devices: BTreeMap::new(),
        };
        report.insert(
            Device::new("NVMe", DeviceKind::StorageController { controller_type: Some("NVMe".into()) })
                .with_device_id("1987-5016"),
        );
        report
    }

    fn discrete(name: &str, id: &str) -> Device {
        Device::new(
            name,
            DeviceKind::Gpu {
                gpu_type: GpuType::Discrete,
                resizable_bar: Some(false),
            },
        )
        .with_device_id(id)
    }

    #[test]
    fn test_default_picks_navi22_group() {
        let mut report = base(FirmwareType::Uefi);
        report.insert(discrete("RX 6800 XT", "1002-73bf"));
        report.insert(discrete("RX 6700 XT", "1002-73df"));
        let analysis = analyze(report, false);
        let ui = ScriptedUi::new();

        let result = customize(&analysis.report, Version::upper(23), &ui).unwrap();
        let gpus: Vec<_> = result.hardware.devices_in(DeviceCategory::Gpu).map(|d| d.name.clone()).collect();
        assert_eq!(gpus, vec!["RX 6700 XT"]);
        assert!(result.disabled.contains_key("GPU: RX 6800 XT"));
        let asked = ui.asked_about(PromptTopic::DeviceSelection(DeviceCategory::Gpu));
        assert_eq!(asked.len(), 1);
        assert_eq!(asked[0].options.len(), 2);
    }

    #[test]
    fn test_legacy_firmware_declined_stays_legacy() {
        let mut report = base(FirmwareType::Legacy);
        report.insert(discrete("RX 580", "1002-67df"));
        let analysis = analyze(report, false);
        let ui = ScriptedUi::new().answer(PromptTopic::FirmwareType, PromptResponse::Confirmed(false));
        let result = customize(&analysis.report, Version::upper(23), &ui).unwrap();
        assert_eq!(result.hardware.bios.firmware_type, FirmwareType::Legacy);
    }

    #[test]
    fn test_cancel_unwinds() {
        let mut report = base(FirmwareType::Legacy);
        report.insert(discrete("RX 580", "1002-67df"));
        let analysis = analyze(report, false);
        let ui = ScriptedUi::new().answer(PromptTopic::FirmwareType, PromptResponse::Cancelled);
        let err = customize(&analysis.report, Version::upper(23), &ui).unwrap_err();
        assert!(matches!(err, PipelineError::Cancelled));
    }

    #[test]
    fn test_single_wifi_kept_and_extended_flagged() {
        let mut report = base(FirmwareType::Uefi);
        report.insert(discrete("RX 580", "1002-67df"));
        report.insert(Device::new("BCM94360CD", DeviceKind::Network).with_device_id("14e4-43a0"));
        report.insert(Device::new("AX200", DeviceKind::Network).with_device_id("8086-2723"));
        let analysis = analyze(report, false);
        let ui = ScriptedUi::new().answer(
            PromptTopic::DeviceSelection(DeviceCategory::Network),
            PromptResponse::Selected(0),
        );
        let result = customize(&analysis.report, Version::upper(23), &ui).unwrap();
        let wifi: Vec<_> = result.hardware.devices_in(DeviceCategory::Network).collect();
        assert_eq!(wifi.len(), 1);
        assert_eq!(result.hardware.device_count() + result.disabled.len(), analysis.report.device_count());
        // Both options are singletons; sorted by upper bound the Broadcom (24) comes first
        assert_eq!(wifi[0].name, "BCM94360CD");
        assert!(result.needs_extended);
    }

    #[test]
    fn test_customize_is_idempotent_on_its_output() {
        let mut report = base(FirmwareType::Uefi);
        report.insert(discrete("RX 6800 XT", "1002-73bf"));
        report.insert(discrete("RX 6700 XT", "1002-73df"));
        let analysis = analyze(report, false);
        let first = customize(&analysis.report, Version::upper(23), &ScriptedUi::new()).unwrap();
        let second = customize(&first.hardware, Version::upper(23), &ScriptedUi::new()).unwrap();
        assert_eq!(first.hardware, second.hardware);
        assert!(second.disabled.is_empty());
    }
}
