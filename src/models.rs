//! Core data types for EFI Forge.
//!
//! The hardware report is modelled as singleton sections (BIOS, Motherboard,
//! CPU) plus category-keyed device maps whose entries carry a tagged
//! per-category payload.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::version::SupportRange;

/// Device category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DeviceCategory {
    Gpu,
    Sound,
    Network,
    Bluetooth,
    Biometric,
    StorageController,
    SdController,
    Monitor,
}

impl DeviceCategory {
    /// All device categories in report order.
    pub const ALL: [DeviceCategory; 8] = [
        DeviceCategory::Gpu,
        DeviceCategory::Sound,
        DeviceCategory::Network,
        DeviceCategory::Bluetooth,
        DeviceCategory::Biometric,
        DeviceCategory::StorageController,
        DeviceCategory::SdController,
        DeviceCategory::Monitor,
    ];

    /// Section key in the hardware-report document.
    pub fn report_key(&self) -> &'static str {
        match self {
            DeviceCategory::Gpu => "GPU",
            DeviceCategory::Sound => "Sound",
            DeviceCategory::Network => "Network",
            DeviceCategory::Bluetooth => "Bluetooth",
            DeviceCategory::Biometric => "Biometric",
            DeviceCategory::StorageController => "Storage Controllers",
            DeviceCategory::SdController => "SD Controller",
            DeviceCategory::Monitor => "Monitor",
        }
    }

    pub fn from_report_key(key: &str) -> Option<Self> {
        DeviceCategory::ALL
            .iter()
            .copied()
            .find(|c| c.report_key().eq_ignore_ascii_case(key))
    }
}

impl fmt::Display for DeviceCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.report_key())
    }
}

/// Firmware type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FirmwareType {
    Uefi,
    Legacy,
}

/// Secure boot state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SecureBoot {
    Enabled,
    Disabled,
    Unknown,
}

/// Form factor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Platform {
    Desktop,
    Laptop,
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "desktop" => Ok(Platform::Desktop),
            "laptop" | "notebook" => Ok(Platform::Laptop),
            _ => Err(format!("Unknown platform: {}", s)),
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Platform::Desktop => write!(f, "Desktop"),
            Platform::Laptop => write!(f, "Laptop"),
        }
    }
}

/// Bus a device hangs off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BusType {
    Pci,
    Usb,
    Acpi,
    I2c,
    Unknown,
}

/// BIOS section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BiosInfo {
    pub firmware_type: FirmwareType,
    pub secure_boot: SecureBoot,
}

/// Motherboard section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MotherboardInfo {
    pub manufacturer: String,
    pub model: String,
    pub chipset: String,
    pub platform: Platform,
}

/// CPU section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CpuInfo {
    pub name: String,
    pub manufacturer: String,
    pub codename: String,
    pub cores: u32,
    pub threads: u32,
    pub simd: Vec<String>,
    pub family: Option<u32>,
    pub model: Option<u32>,
    pub compatibility: Option<SupportRange>,
    pub extended: Option<SupportRange>,
}

impl CpuInfo {
    pub fn has_simd(&self, feature: &str) -> bool {
        self.simd.iter().any(|f| f.eq_ignore_ascii_case(feature))
    }

    pub fn is_intel(&self) -> bool {
        self.manufacturer.to_lowercase().contains("intel")
    }

    pub fn is_amd(&self) -> bool {
        self.manufacturer.to_lowercase().contains("amd")
    }
}

/// GPU kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GpuType {
    Integrated,
    Discrete,
}

/// Category-specific device payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceKind {
    Gpu {
        gpu_type: GpuType,
        resizable_bar: Option<bool>,
    },
    Sound {
        endpoints: Vec<String>,
        layout_id: Option<u8>,
    },
    Network,
    Bluetooth,
    Biometric,
    StorageController {
        controller_type: Option<String>,
    },
    SdController,
    Monitor {
        connector: Option<String>,
        connected_gpu: Option<String>,
    },
}

impl DeviceKind {
    pub fn category(&self) -> DeviceCategory {
        match self {
            DeviceKind::Gpu { .. } => DeviceCategory::Gpu,
            DeviceKind::Sound { .. } => DeviceCategory::Sound,
            DeviceKind::Network => DeviceCategory::Network,
            DeviceKind::Bluetooth => DeviceCategory::Bluetooth,
            DeviceKind::Biometric => DeviceCategory::Biometric,
            DeviceKind::StorageController { .. } => DeviceCategory::StorageController,
            DeviceKind::SdController => DeviceCategory::SdController,
            DeviceKind::Monitor { .. } => DeviceCategory::Monitor,
        }
    }
}

/// A device entry of the hardware report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub name: String,
    /// `vvvv-dddd`, lowercase hex.
    pub device_id: Option<String>,
    /// `vvvv-pppp`, lowercase hex.
    pub usb_id: Option<String>,
    pub subsystem_id: Option<String>,
    pub revision: Option<String>,
    /// `Vendor_Device_Subsystem_Revision` composite identifier.
    pub composite_id: Option<String>,
    pub bus_type: BusType,
    pub pci_path: Option<String>,
    pub acpi_path: Option<String>,
    pub manufacturer: Option<String>,
    pub codename: Option<String>,
    pub device_type: Option<String>,
    pub kind: DeviceKind,
    pub compatibility: Option<SupportRange>,
    pub extended: Option<SupportRange>,
}

impl Device {
    /// Bare device with only a name and category payload.
    pub fn new(name: impl Into<String>, kind: DeviceKind) -> Self {
        Device {
            name: name.into(),
            device_id: None,
            usb_id: None,
            subsystem_id: None,
            revision: None,
            composite_id: None,
            bus_type: BusType::Unknown,
            pci_path: None,
            acpi_path: None,
            manufacturer: None,
            codename: None,
            device_type: None,
            kind,
            compatibility: None,
            extended: None,
        }
    }

    pub fn with_device_id(mut self, id: &str) -> Self {
        self.device_id = Some(id.to_lowercase());
        self.bus_type = BusType::Pci;
        self
    }

    pub fn with_usb_id(mut self, id: &str) -> Self {
        self.usb_id = Some(id.to_lowercase());
        self.bus_type = BusType::Usb;
        self
    }

    pub fn with_manufacturer(mut self, manufacturer: &str) -> Self {
        self.manufacturer = Some(manufacturer.to_string());
        self
    }

    pub fn with_codename(mut self, codename: &str) -> Self {
        self.codename = Some(codename.to_string());
        self
    }

    pub fn with_pci_path(mut self, path: &str) -> Self {
        self.pci_path = Some(path.to_string());
        self
    }

    pub fn with_acpi_path(mut self, path: &str) -> Self {
        self.acpi_path = Some(path.to_string());
        self
    }

    pub fn category(&self) -> DeviceCategory {
        self.kind.category()
    }

    /// The identifier used for knowledge-base lookups (PCI first, then USB).
    pub fn lookup_id(&self) -> Option<&str> {
        self.device_id.as_deref().or(self.usb_id.as_deref())
    }

    /// Vendor half of the lookup id.
    pub fn vendor_id(&self) -> Option<&str> {
        self.lookup_id().and_then(|id| id.split('-').next())
    }

    /// Product half of the lookup id.
    pub fn product_id(&self) -> Option<&str> {
        self.lookup_id().and_then(|id| id.split('-').nth(1))
    }

    pub fn manufacturer_is(&self, vendor: &str) -> bool {
        self.manufacturer
            .as_deref()
            .map(|m| m.to_lowercase().contains(&vendor.to_lowercase()))
            .unwrap_or(false)
    }

    pub fn is_integrated_gpu(&self) -> bool {
        matches!(
            self.kind,
            DeviceKind::Gpu {
                gpu_type: GpuType::Integrated,
                ..
            }
        )
    }

    /// Display label used for disabled devices: `"{category}: {name}"`.
    pub fn label(&self) -> String {
        format!("{}: {}", self.category(), self.name)
    }

    /// Whether the native range covers a target.
    pub fn natively_supports(&self, target: crate::version::Version) -> bool {
        self.compatibility.map(|r| r.contains(target)).unwrap_or(false)
    }

    /// Whether only the extended (legacy patcher) range covers a target.
    pub fn needs_extended_for(&self, target: crate::version::Version) -> bool {
        !self.natively_supports(target) && self.extended.map(|r| r.contains(target)).unwrap_or(false)
    }

    /// The range that makes this device usable at `target`, if any.
    pub fn effective_range(&self, target: crate::version::Version) -> Option<SupportRange> {
        if self.natively_supports(target) {
            self.compatibility
        } else if self.needs_extended_for(target) {
            self.extended
        } else {
            None
        }
    }
}

/// A normalized hardware report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HardwareReport {
    pub bios: BiosInfo,
    pub motherboard: MotherboardInfo,
    pub cpu: CpuInfo,
    pub devices: BTreeMap<DeviceCategory, BTreeMap<String, Device>>,
}

impl HardwareReport {
    pub fn devices_in(&self, category: DeviceCategory) -> impl Iterator<Item = &Device> {
        self.devices.get(&category).into_iter().flat_map(|m| m.values())
    }

    pub fn devices_in_mut(&mut self, category: DeviceCategory) -> impl Iterator<Item = &mut Device> {
        self.devices.get_mut(&category).into_iter().flat_map(|m| m.values_mut())
    }

    pub fn all_devices(&self) -> impl Iterator<Item = &Device> {
        self.devices.values().flat_map(|m| m.values())
    }

    pub fn insert(&mut self, device: Device) {
        self.devices
            .entry(device.category())
            .or_default()
            .insert(device.name.clone(), device);
    }

    pub fn remove(&mut self, category: DeviceCategory, name: &str) -> Option<Device> {
        let map = self.devices.get_mut(&category)?;
        let removed = map.remove(name);
        if map.is_empty() {
            self.devices.remove(&category);
        }
        removed
    }

    pub fn device_count(&self) -> usize {
        self.devices.values().map(|m| m.len()).sum()
    }

    pub fn platform(&self) -> Platform {
        self.motherboard.platform
    }

    pub fn is_laptop(&self) -> bool {
        self.motherboard.platform == Platform::Laptop
    }

    pub fn has_integrated_gpu(&self) -> bool {
        self.devices_in(DeviceCategory::Gpu).any(|d| d.is_integrated_gpu())
    }
}

/// Devices dropped by the Customizer, keyed by display label.
pub type DisabledDevices = BTreeMap<String, Device>;

/// Report after customization; same shape as the input report.
pub type CustomizedHardware = HardwareReport;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::version::Version;

    #[test]
    fn test_category_report_keys_round_trip() {
        for category in DeviceCategory::ALL {
            assert_eq!(DeviceCategory::from_report_key(category.report_key()), Some(category));
        }
    }

    #[test]
    fn test_device_label_and_ids() {
        let gpu = Device::new(
            "Intel UHD 630",
            DeviceKind::Gpu {
                gpu_type: GpuType::Integrated,
                resizable_bar: None,
            },
        )
        .with_device_id("8086-3E92");
        assert_eq!(gpu.label(), "GPU: Intel UHD 630");
        assert_eq!(gpu.vendor_id(), Some("8086"));
        assert_eq!(gpu.product_id(), Some("3e92"));
        assert!(gpu.is_integrated_gpu());
    }

    #[test]
    fn test_effective_range_prefers_native() {
        let mut wifi = Device::new("Broadcom", DeviceKind::Network).with_device_id("14e4-43a0");
        wifi.compatibility = SupportRange::majors(17, 22);
        wifi.extended = SupportRange::majors(23, 24);
        assert!(wifi.natively_supports(Version::lower(22)));
        assert!(wifi.needs_extended_for(Version::lower(23)));
        assert_eq!(wifi.effective_range(Version::lower(23)), wifi.extended);
        assert_eq!(wifi.effective_range(Version::lower(25)), None);
    }

    #[test]
    fn test_report_insert_and_remove_drops_empty_category() {
        let mut report = HardwareReport {
            bios: BiosInfo {
                firmware_type: FirmwareType::Uefi,
                secure_boot: SecureBoot::Disabled,
            },
            motherboard: MotherboardInfo {
                manufacturer: "X".into(),
                model: "Y".into(),
                chipset: "Z390".into(),
                platform: Platform::Desktop,
            },
            cpu: CpuInfo {
                name: "i7-9700K".into(),
                manufacturer: "Intel".into(),
                codename: "Coffee Lake".into(),
                cores: 8,
                threads: 8,
                simd: vec!["SSE4.1".into()],
                family: None,
                model: None,
                compatibility: None,
                extended: None,
            },
            devices: BTreeMap::new(),
        };
        report.insert(Device::new("Fingerprint", DeviceKind::Biometric));
        assert_eq!(report.device_count(), 1);
        assert!(report.remove(DeviceCategory::Biometric, "Fingerprint").is_some());
        assert!(report.devices.is_empty());
    }
}
