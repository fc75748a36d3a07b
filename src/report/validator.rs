//! Hardware report validation and normalization.
//!
//! Problems never escape as `Err`: everything lands in the outcome's
//! `errors`/`warnings` lists, and `normalized` is only populated when no
//! error was recorded.

use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use crate::error::ReportError;
use crate::models::{
    BiosInfo, BusType, CpuInfo, Device, DeviceCategory, DeviceKind, FirmwareType, GpuType,
    HardwareReport, MotherboardInfo, Platform, SecureBoot,
};

use super::ValidationOutcome;

const SECTION_BIOS: &str = "BIOS";
const SECTION_MOTHERBOARD: &str = "Motherboard";
const SECTION_CPU: &str = "CPU";

/// Device fields the validator understands.
const KNOWN_DEVICE_FIELDS: &[&str] = &[
    "Device ID",
    "USB ID",
    "Name",
    "Subsystem ID",
    "Revision",
    "Bus Type",
    "PCI Path",
    "ACPI Path",
    "Manufacturer",
    "Codename",
    "Device Type",
    "Resizable BAR",
    "Audio Endpoints",
    "Connector Type",
    "Connected GPU",
    "Controller Type",
];

/// Validate a report file on disk.
pub fn validate_file(path: &Path) -> ValidationOutcome {
    log::info!("[Validator] Reading hardware report: {}", path.display());
    match std::fs::read_to_string(path) {
        Ok(contents) => validate_str(&contents),
        Err(e) => ValidationOutcome::failed(vec![ReportError::Io(format!("{}: {}", path.display(), e))]),
    }
}

/// Validate report text.
pub fn validate_str(contents: &str) -> ValidationOutcome {
    let document: Value = match serde_json::from_str(contents) {
        Ok(v) => v,
        Err(e) => return ValidationOutcome::failed(vec![ReportError::Parse(e.to_string())]),
    };
    validate_value(&document)
}

/// Validate an already-parsed JSON document.
pub fn validate_value(document: &Value) -> ValidationOutcome {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    let root = match document.as_object() {
        Some(map) => map,
        None => {
            return ValidationOutcome::failed(vec![ReportError::Schema(
                "top level must be a dictionary keyed by category".to_string(),
            )])
        }
    };

    // STEP 1: Required singleton sections
    let motherboard = match section(root, SECTION_MOTHERBOARD, &mut errors) {
        Some(map) => Some(parse_motherboard(map, &mut warnings)),
        None => {
            if !root.contains_key(SECTION_MOTHERBOARD) {
                errors.push(ReportError::MissingMotherboard);
            }
            None
        }
    };
    let cpu = match section(root, SECTION_CPU, &mut errors) {
        Some(map) => parse_cpu(map, &mut errors, &mut warnings),
        None => {
            if !root.contains_key(SECTION_CPU) {
                errors.push(ReportError::MissingCpu);
            }
            None
        }
    };
    let bios = match section(root, SECTION_BIOS, &mut errors) {
        Some(map) => parse_bios(map, &mut warnings),
        None => {
            warnings.push("BIOS section missing; assuming UEFI firmware".to_string());
            BiosInfo {
                firmware_type: FirmwareType::Uefi,
                secure_boot: SecureBoot::Unknown,
            }
        }
    };

    // STEP 2: Category-keyed device maps
    let mut devices: BTreeMap<DeviceCategory, BTreeMap<String, Device>> = BTreeMap::new();
    let mut unknown_fields: BTreeSet<String> = BTreeSet::new();
    for (key, value) in root {
        if matches!(key.as_str(), SECTION_BIOS | SECTION_MOTHERBOARD | SECTION_CPU) {
            continue;
        }
        let category = match DeviceCategory::from_report_key(key) {
            Some(c) => c,
            None => {
                warnings.push(format!("Unknown report section '{}' ignored", key));
                continue;
            }
        };
        let entries = match value.as_object() {
            Some(map) => map,
            None => {
                errors.push(ReportError::Schema(format!(
                    "section '{}' must map device names to entries",
                    key
                )));
                continue;
            }
        };
        for (name, entry) in entries {
            match parse_device(category, name, entry, &mut unknown_fields, &mut warnings) {
                Ok(mut device) => {
                    let slot = devices.entry(category).or_default();
                    if slot.contains_key(&device.name) {
                        let base = device.name.clone();
                        let mut n = 2;
                        while slot.contains_key(&format!("{} #{}", base, n)) {
                            n += 1;
                        }
                        device.name = format!("{} #{}", base, n);
                        warnings.push(format!(
                            "{}: entry '{}' repeats the name '{}'; kept as '{}'",
                            category, name, base, device.name
                        ));
                    }
                    slot.insert(device.name.clone(), device);
                }
                Err(e) => errors.push(e),
            }
        }
    }
    for field in unknown_fields {
        warnings.push(format!("Unknown device field '{}' ignored", field));
    }

    if !errors.is_empty() {
        log::warn!("[Validator] Report rejected with {} error(s)", errors.len());
        return ValidationOutcome {
            ok: false,
            errors,
            warnings,
            normalized: None,
        };
    }

    match (motherboard, cpu) {
        (Some(motherboard), Some(cpu)) => {
            let report = HardwareReport {
                bios,
                motherboard,
                cpu,
                devices,
            };
            log::info!(
                "[Validator] Report accepted: {} device(s), {} warning(s)",
                report.device_count(),
                warnings.len()
            );
            ValidationOutcome {
                ok: true,
                errors,
                warnings,
                normalized: Some(report),
            }
        }
        _ => ValidationOutcome {
            ok: false,
            errors: vec![ReportError::Schema("incomplete CPU or Motherboard section".to_string())],
            warnings,
            normalized: None,
        },
    }
}

fn section<'a>(
    root: &'a Map<String, Value>,
    key: &str,
    errors: &mut Vec<ReportError>,
) -> Option<&'a Map<String, Value>> {
    let value = root.get(key)?;
    match value.as_object() {
        Some(map) => Some(map),
        None => {
            errors.push(ReportError::Schema(format!("section '{}' must be a dictionary", key)));
            None
        }
    }
}

fn text(map: &Map<String, Value>, key: &str) -> Option<String> {
    match map.get(key)? {
        Value::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn number(map: &Map<String, Value>, key: &str) -> Option<u32> {
    match map.get(key)? {
        Value::Number(n) => n.as_u64().and_then(|v| u32::try_from(v).ok()),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<u32>()
                .ok()
                .or_else(|| u32::from_str_radix(s.trim_start_matches("0x"), 16).ok())
        }
        _ => None,
    }
}

/// Coerce "Enabled"/"Disabled"/"Yes"/"No"/booleans.
fn flag(map: &Map<String, Value>, key: &str) -> Option<bool> {
    match map.get(key)? {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "enabled" | "yes" | "true" | "on" => Some(true),
            "disabled" | "no" | "false" | "off" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn string_list(map: &Map<String, Value>, key: &str) -> Vec<String> {
    match map.get(key) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        Some(Value::String(s)) => s
            .split(',')
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect(),
        _ => Vec::new(),
    }
}

/// Normalize `8086:3E92`, ` 8086-3e92 ` and friends to `8086-3e92`.
pub fn normalize_id(raw: &str) -> String {
    raw.trim().to_lowercase().replace([':', '_'], "-")
}

/// `Vendor_Device_Subsystem_Revision`, skipping absent parts.
pub fn compose_identifier(device_id: &str, subsystem: Option<&str>, revision: Option<&str>) -> String {
    let mut parts: Vec<String> = device_id.split('-').map(|p| p.to_string()).collect();
    if let Some(sub) = subsystem {
        parts.push(normalize_id(sub).replace('-', ""));
    }
    if let Some(rev) = revision {
        parts.push(rev.trim().to_lowercase());
    }
    parts.join("_")
}

fn parse_bios(map: &Map<String, Value>, warnings: &mut Vec<String>) -> BiosInfo {
    let firmware_type = match text(map, "Firmware Type").map(|s| s.to_lowercase()) {
        Some(ref s) if s == "uefi" => FirmwareType::Uefi,
        Some(ref s) if s == "legacy" || s == "bios" => FirmwareType::Legacy,
        other => {
            warnings.push(format!("Unrecognized firmware type {:?}; assuming UEFI", other));
            FirmwareType::Uefi
        }
    };
    let secure_boot = match flag(map, "Secure Boot") {
        Some(true) => SecureBoot::Enabled,
        Some(false) => SecureBoot::Disabled,
        None => SecureBoot::Unknown,
    };
    BiosInfo {
        firmware_type,
        secure_boot,
    }
}

fn parse_motherboard(map: &Map<String, Value>, warnings: &mut Vec<String>) -> MotherboardInfo {
    let platform = match text(map, "Platform").map(|p| p.parse::<Platform>()) {
        Some(Ok(p)) => p,
        Some(Err(e)) => {
            warnings.push(format!("{}; assuming Desktop", e));
            Platform::Desktop
        }
        None => {
            warnings.push("Motherboard platform missing; assuming Desktop".to_string());
            Platform::Desktop
        }
    };
    MotherboardInfo {
        manufacturer: text(map, "Manufacturer").unwrap_or_default(),
        model: text(map, "Model").or_else(|| text(map, "Name")).unwrap_or_default(),
        chipset: text(map, "Chipset").unwrap_or_default(),
        platform,
    }
}

fn parse_cpu(
    map: &Map<String, Value>,
    errors: &mut Vec<ReportError>,
    warnings: &mut Vec<String>,
) -> Option<CpuInfo> {
    let name = match text(map, "Processor Name") {
        Some(n) => n,
        None => {
            errors.push(ReportError::Schema("CPU section lacks 'Processor Name'".to_string()));
            return None;
        }
    };
    let manufacturer = text(map, "Manufacturer").unwrap_or_else(|| {
        let lowered = name.to_lowercase();
        if lowered.contains("intel") {
            "Intel".to_string()
        } else if lowered.contains("amd") || lowered.contains("ryzen") {
            "AMD".to_string()
        } else {
            String::new()
        }
    });
    let codename = text(map, "Codename").unwrap_or_else(|| {
        warnings.push("CPU codename missing".to_string());
        String::new()
    });
    let cores = number(map, "Core Count").unwrap_or(1);
    let threads = number(map, "Thread Count").unwrap_or(cores);
    let simd = string_list(map, "SIMD Features");
    if simd.is_empty() {
        warnings.push("CPU SIMD feature list is empty".to_string());
    }
    Some(CpuInfo {
        name,
        manufacturer,
        codename,
        cores,
        threads,
        simd,
        family: number(map, "Family"),
        model: number(map, "Model"),
        compatibility: None,
        extended: None,
    })
}

fn parse_device(
    category: DeviceCategory,
    name: &str,
    entry: &Value,
    unknown_fields: &mut BTreeSet<String>,
    warnings: &mut Vec<String>,
) -> Result<Device, ReportError> {
    let map = entry.as_object().ok_or_else(|| {
        ReportError::Schema(format!("{} entry '{}' must be a dictionary", category, name))
    })?;
    let display_name = text(map, "Name").unwrap_or_else(|| name.trim().to_string());
    let device_id = text(map, "Device ID").map(|s| normalize_id(&s));
    let usb_id = text(map, "USB ID").map(|s| normalize_id(&s));
    if display_name.is_empty() && device_id.is_none() && usb_id.is_none() {
        return Err(ReportError::Schema(format!(
            "{} entry needs a Device ID, USB ID or Name",
            category
        )));
    }
    if device_id.is_none() && usb_id.is_none() && category != DeviceCategory::Monitor {
        warnings.push(format!("{}: {} has no Device ID or USB ID", category, display_name));
    }
    for key in map.keys() {
        if !KNOWN_DEVICE_FIELDS.contains(&key.as_str()) {
            unknown_fields.insert(key.clone());
        }
    }

    let manufacturer = text(map, "Manufacturer");
    let device_type = text(map, "Device Type");
    let kind = match category {
        DeviceCategory::Gpu => {
            let integrated = match device_type.as_deref().map(|t| t.to_lowercase()) {
                Some(t) if t.contains("integrated") => true,
                Some(t) if t.contains("discrete") => false,
                _ => {
                    let lowered = display_name.to_lowercase();
                    lowered.contains("uhd") || lowered.contains("iris") || lowered.contains("hd graphics")
                }
            };
            DeviceKind::Gpu {
                gpu_type: if integrated { GpuType::Integrated } else { GpuType::Discrete },
                resizable_bar: flag(map, "Resizable BAR"),
            }
        }
        DeviceCategory::Sound => DeviceKind::Sound {
            endpoints: string_list(map, "Audio Endpoints"),
            layout_id: None,
        },
        DeviceCategory::Network => DeviceKind::Network,
        DeviceCategory::Bluetooth => DeviceKind::Bluetooth,
        DeviceCategory::Biometric => DeviceKind::Biometric,
        DeviceCategory::StorageController => DeviceKind::StorageController {
            controller_type: text(map, "Controller Type"),
        },
        DeviceCategory::SdController => DeviceKind::SdController,
        DeviceCategory::Monitor => DeviceKind::Monitor {
            connector: text(map, "Connector Type"),
            connected_gpu: text(map, "Connected GPU"),
        },
    };

    let bus_type = match text(map, "Bus Type").map(|b| b.to_uppercase()) {
        Some(b) if b.contains("PCI") => BusType::Pci,
        Some(b) if b.contains("USB") => BusType::Usb,
        Some(b) if b.contains("ACPI") => BusType::Acpi,
        Some(b) if b.contains("I2C") => BusType::I2c,
        Some(_) => BusType::Unknown,
        None if device_id.is_some() => BusType::Pci,
        None if usb_id.is_some() => BusType::Usb,
        None => BusType::Unknown,
    };
    let subsystem_id = text(map, "Subsystem ID").map(|s| normalize_id(&s));
    let revision = text(map, "Revision").map(|r| r.to_lowercase());
    let composite_id = device_id
        .as_deref()
        .map(|id| compose_identifier(id, subsystem_id.as_deref(), revision.as_deref()));

    Ok(Device {
        name: display_name,
        device_id,
        usb_id,
        subsystem_id,
        revision,
        composite_id,
        bus_type,
        pci_path: text(map, "PCI Path"),
        acpi_path: text(map, "ACPI Path"),
        manufacturer,
        codename: text(map, "Codename"),
        device_type,
        kind,
        compatibility: None,
        extended: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn minimal() -> Value {
        json!({
            "BIOS": { "Firmware Type": "UEFI", "Secure Boot": "Disabled" },
            "Motherboard": { "Manufacturer": "X", "Model": "Y", "Chipset": "Z390", "Platform": "Desktop" },
            "CPU": {
                "Processor Name": "Intel Core i5-9600K",
                "Codename": "Coffee Lake",
                "Core Count": 6,
                "SIMD Features": ["SSE4.1", "SSE4.2", "AVX2"]
            },
            "GPU": {
                "Intel UHD 630": { "Device ID": "8086-3E92", "Device Type": "Integrated GPU", "Manufacturer": "Intel" }
            }
        })
    }

    #[test]
    fn test_minimal_report_is_accepted() {
        let outcome = validate_value(&minimal());
        assert!(outcome.ok, "{:?}", outcome.errors);
        let report = outcome.normalized.unwrap();
        assert_eq!(report.cpu.cores, 6);
        assert_eq!(report.cpu.threads, 6);
        assert_eq!(report.cpu.manufacturer, "Intel");
        assert_eq!(report.bios.secure_boot, SecureBoot::Disabled);
        let gpu = report.devices_in(DeviceCategory::Gpu).next().unwrap();
        assert_eq!(gpu.device_id.as_deref(), Some("8086-3e92"));
        assert!(gpu.is_integrated_gpu());
    }

    #[test]
    fn test_entries_sharing_a_name_are_both_kept() {
        let mut doc = minimal();
        doc.as_object_mut().unwrap().insert(
            "Network".into(),
            json!({
                "Ethernet Controller 1": { "Name": "Intel I211", "Device ID": "8086-1539" },
                "Ethernet Controller 2": { "Name": "Intel I211", "Device ID": "8086-1539" }
            }),
        );
        let outcome = validate_value(&doc);
        assert!(outcome.ok, "{:?}", outcome.errors);
        let report = outcome.normalized.unwrap();
        let names: Vec<String> = report.devices_in(DeviceCategory::Network).map(|d| d.name.clone()).collect();
        assert_eq!(names, vec!["Intel I211".to_string(), "Intel I211 #2".to_string()]);
        assert!(outcome.warnings.iter().any(|w| w.contains("Ethernet Controller 2") && w.contains("Intel I211 #2")));
    }

    #[test]
    fn test_missing_cpu_is_fatal() {
        let mut doc = minimal();
        doc.as_object_mut().unwrap().remove("CPU");
        let outcome = validate_value(&doc);
        assert!(!outcome.ok);
        assert!(outcome.normalized.is_none());
        assert_eq!(outcome.errors, vec![ReportError::MissingCpu]);
    }

    #[test]
    fn test_missing_motherboard_is_fatal() {
        let mut doc = minimal();
        doc.as_object_mut().unwrap().remove("Motherboard");
        let outcome = validate_value(&doc);
        assert!(!outcome.ok);
        assert!(outcome.errors.contains(&ReportError::MissingMotherboard));
    }

    #[test]
    fn test_unparseable_input_reports_parse_error() {
        let outcome = validate_str("{ not json");
        assert!(!outcome.ok);
        assert_eq!(outcome.errors[0].code(), "REPORT_PARSE");
    }

    #[test]
    fn test_unknown_keys_only_warn() {
        let mut doc = minimal();
        doc["Fans"] = json!({});
        doc["GPU"]["Intel UHD 630"]["Firmware Blob"] = json!("x");
        let outcome = validate_value(&doc);
        assert!(outcome.ok);
        assert!(outcome.warnings.iter().any(|w| w.contains("Fans")));
        assert!(outcome.warnings.iter().any(|w| w.contains("Firmware Blob")));
    }

    #[test]
    fn test_normalization_of_ids_and_flags() {
        let mut doc = minimal();
        doc["GPU"]["RX 6800"] = json!({
            "Device ID": " 1002:73BF ",
            "Subsystem ID": "1DA2:E438",
            "Revision": "C3",
            "Resizable BAR": "Enabled"
        });
        let outcome = validate_value(&doc);
        let report = outcome.normalized.unwrap();
        let gpu = &report.devices[&DeviceCategory::Gpu]["RX 6800"];
        assert_eq!(gpu.device_id.as_deref(), Some("1002-73bf"));
        assert_eq!(gpu.composite_id.as_deref(), Some("1002_73bf_1da2e438_c3"));
        assert_eq!(
            gpu.kind,
            DeviceKind::Gpu {
                gpu_type: GpuType::Discrete,
                resizable_bar: Some(true)
            }
        );
    }

    #[test]
    fn test_non_dictionary_entry_is_schema_error() {
        let mut doc = minimal();
        doc["Network"] = json!({ "Ethernet": 5 });
        let outcome = validate_value(&doc);
        assert!(!outcome.ok);
        assert_eq!(outcome.errors[0].code(), "REPORT_SCHEMA");
    }
}
