//! Property tests for the hardware customizer over random device mixes.

use std::collections::BTreeMap;

use proptest::prelude::*;

use efi_forge::compat::{analyze, customize};
use efi_forge::kb::pci;
use efi_forge::models::{
    BiosInfo, CpuInfo, Device, DeviceCategory, DeviceKind, FirmwareType, GpuType, HardwareReport, MotherboardInfo,
    Platform, SecureBoot,
};
use efi_forge::ui::{PromptResponse, PromptTopic, ScriptedUi};
use efi_forge::Version;

fn gpu(name: &str, id: &str, gpu_type: GpuType) -> Device {
    Device::new(
        name,
        DeviceKind::Gpu {
            gpu_type,
            resizable_bar: Some(false),
        },
    )
    .with_device_id(id)
}

/// Devices a desktop may report, including ones that cannot coexist.
fn pool() -> Vec<Device> {
    vec![
        gpu("UHD 630", "8086-3e98", GpuType::Integrated),
        gpu("RX 580", "1002-67df", GpuType::Discrete),
        gpu("RX 6800 XT", "1002-73bf", GpuType::Discrete),
        gpu("RX 6700 XT", "1002-73df", GpuType::Discrete),
        Device::new("AX200", DeviceKind::Network).with_device_id("8086-2723"),
        Device::new("BCM94360CD", DeviceKind::Network).with_device_id("14e4-43a0"),
        Device::new("I219-V", DeviceKind::Network).with_device_id("8086-15bc"),
        Device::new("Intel BT", DeviceKind::Bluetooth).with_usb_id("8087-0029"),
        Device::new("Broadcom BT", DeviceKind::Bluetooth).with_usb_id("0a5c-21e8"),
        Device::new(
            "ALC1220",
            DeviceKind::Sound {
                endpoints: vec!["Speaker".into()],
                layout_id: None,
            },
        )
        .with_device_id("10ec-1220"),
    ]
}

fn report(mask: u16, firmware: FirmwareType) -> HardwareReport {
    let mut report = HardwareReport {
        bios: BiosInfo {
            firmware_type: firmware,
            secure_boot: SecureBoot::Disabled,
        },
        motherboard: MotherboardInfo {
            manufacturer: "ASUS".into(),
            model: "PRIME Z390-A".into(),
            chipset: "Z390".into(),
            platform: Platform::Desktop,
        },
        cpu: CpuInfo {
            name: "Intel Core i9-9900K".into(),
            manufacturer: "Intel".into(),
            codename: "Coffee Lake".into(),
            cores: 8,
            threads: 16,
            simd: vec!["SSE4.1".into(), "SSE4.2".into(), "AVX2".into()],
            family: Some(6),
            model: None,
            compatibility: None,
            extended: None,
        },
        devices: BTreeMap::new(),
    };
    for (i, device) in pool().into_iter().enumerate() {
        if mask & (1 << i) != 0 {
            report.insert(device);
        }
    }
    report
}

fn wireless_kept(hw: &HardwareReport) -> usize {
    hw.devices_in(DeviceCategory::Network)
        .filter(|d| d.lookup_id().map(pci::is_wireless_id).unwrap_or(false))
        .count()
}

proptest! {
    #[test]
    fn prop_partition_is_conserved(mask in 0u16..1024, major in 17u32..=24, pick in 0usize..2) {
        let analysis = analyze(report(mask, FirmwareType::Uefi), true);
        let ui = ScriptedUi::new()
            .answer(PromptTopic::DeviceSelection(DeviceCategory::Gpu), PromptResponse::Selected(pick))
            .answer(PromptTopic::DeviceSelection(DeviceCategory::Network), PromptResponse::Selected(pick))
            .answer(PromptTopic::DeviceSelection(DeviceCategory::Bluetooth), PromptResponse::Selected(pick));
        let result = customize(&analysis.report, Version::upper(major), &ui).unwrap();

        prop_assert_eq!(
            result.hardware.device_count() + result.disabled.len(),
            analysis.report.device_count()
        );
        for device in result.hardware.all_devices() {
            prop_assert!(!result.disabled.contains_key(&device.label()));
        }
        prop_assert!(wireless_kept(&result.hardware) <= 1);
        prop_assert!(result.hardware.devices_in(DeviceCategory::Bluetooth).count() <= 1);
    }

    #[test]
    fn prop_customize_is_a_fixed_point(mask in 0u16..1024, major in 17u32..=24) {
        let analysis = analyze(report(mask, FirmwareType::Uefi), true);
        let target = Version::upper(major);
        let first = customize(&analysis.report, target, &ScriptedUi::new()).unwrap();
        let second = customize(&first.hardware, target, &ScriptedUi::new()).unwrap();
        prop_assert_eq!(&first.hardware, &second.hardware);
        prop_assert!(second.disabled.is_empty());
        prop_assert_eq!(first.needs_extended, second.needs_extended);
    }
}

#[test]
fn test_legacy_firmware_is_offered_uefi() {
    let analysis = analyze(report(0b1, FirmwareType::Legacy), false);
    let ui = ScriptedUi::new();
    let result = customize(&analysis.report, Version::upper(23), &ui).unwrap();
    assert_eq!(ui.asked_about(PromptTopic::FirmwareType).len(), 1);
    assert_eq!(result.hardware.bios.firmware_type, FirmwareType::Uefi);
}

#[test]
fn test_conflicting_wifi_asks_once() {
    let analysis = analyze(report(0b11_0001, FirmwareType::Uefi), false);
    let ui = ScriptedUi::new();
    let result = customize(&analysis.report, Version::upper(23), &ui).unwrap();
    assert_eq!(ui.asked_about(PromptTopic::DeviceSelection(DeviceCategory::Network)).len(), 1);
    assert_eq!(wireless_kept(&result.hardware), 1);
    assert_eq!(result.hardware.devices_in(DeviceCategory::Gpu).count(), 1);
}
