//! Machine identity selection.

use sha2::{Digest, Sha256};

use crate::error::{PipelineError, SelectionError};
use crate::kb::cpu::{self, CpuVendor};
use crate::kb::os;
use crate::kb::smbios::{ModelCategory, ModelQuery, SmbiosModel, SMBIOS_MODELS};
use crate::models::{CustomizedHardware, Platform};
use crate::ui::{ask_choice, Prompt, PromptTopic, Prompter};
use crate::version::Version;

/// Config knobs that depend on the chosen model.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SmbiosOverrides {
    /// `Kernel.Quirks.AppleCpuPmCfgLock`
    pub apple_cpu_pm_cfg_lock: bool,
    /// `Kernel.Quirks.AppleXcpmCfgLock`
    pub apple_xcpm_cfg_lock: bool,
    /// Model needs RestrictEvents to hide memory and PCI warnings.
    pub restrict_events: bool,
    /// Model does not natively support the target; boot with `-no_compat_check`.
    pub no_compat_check: bool,
}

/// Outcome of SMBIOS selection.
#[derive(Debug, Clone, PartialEq)]
pub struct SmbiosChoice {
    pub model: &'static SmbiosModel,
    pub fallback: bool,
    pub overrides: SmbiosOverrides,
    pub warnings: Vec<String>,
}

/// Model category the platform primarily maps to.
fn primary_category(platform: Platform) -> ModelCategory {
    match platform {
        Platform::Laptop => ModelCategory::Laptop,
        Platform::Desktop => ModelCategory::Desktop,
    }
}

/// Catalog index of a model, used as the tiebreak for "newest".
fn recency(model: &SmbiosModel) -> (u32, usize) {
    let index = SMBIOS_MODELS
        .iter()
        .position(|m| m.name == model.name)
        .unwrap_or(0);
    (model.firmware_era, index)
}

/// Models that satisfy every rule: era, OS range, platform and CPU match.
pub fn qualifying_models(hardware: &CustomizedHardware, target: Version) -> Vec<&'static SmbiosModel> {
    let query = ModelQuery {
        cpu: &hardware.cpu,
        has_igpu: hardware.has_integrated_gpu(),
    };
    let threshold = cpu::era_threshold(&hardware.cpu);
    SMBIOS_MODELS
        .iter()
        .filter(|m| m.category.serves(hardware.platform()))
        .filter(|m| m.firmware_era >= threshold)
        .filter(|m| m.supports(target))
        .filter(|m| (m.cpu_match)(&query))
        .collect()
}

fn derive_overrides(hardware: &CustomizedHardware, model: &SmbiosModel, target: Version) -> SmbiosOverrides {
    let intel = cpu::vendor_of(&hardware.cpu) == CpuVendor::Intel;
    let generation = cpu::intel_generation(&hardware.cpu).unwrap_or(0);
    SmbiosOverrides {
        apple_cpu_pm_cfg_lock: intel && generation <= 3,
        apple_xcpm_cfg_lock: intel && generation >= 4,
        restrict_events: model.name == "MacPro7,1",
        no_compat_check: !model.supports(target),
    }
}

/// Choose a model for `hardware` at `target`.
///
/// The newest qualifying model wins. With none qualifying, the newest model
/// of the platform's category is used, a warning is recorded and the user
/// may pick a different one.
pub fn select_smbios(
    hardware: &CustomizedHardware,
    target: Version,
    prompter: &dyn Prompter,
) -> Result<SmbiosChoice, PipelineError> {
    let mut warnings = Vec::new();

    let qualifying = qualifying_models(hardware, target);
    let (model, fallback) = match qualifying.into_iter().max_by_key(|m| recency(m)) {
        Some(model) => (model, false),
        None => {
            let category = primary_category(hardware.platform());
            let mut in_category: Vec<&'static SmbiosModel> =
                SMBIOS_MODELS.iter().filter(|m| m.category == category).collect();
            in_category.sort_by_key(|m| std::cmp::Reverse(recency(m)));
            let fallback = *in_category
                .first()
                .ok_or_else(|| SelectionError::NoSmbiosModel(format!("{:?}", category)))?;
            let message = format!(
                "No Mac model matches {} on {}; falling back to {}",
                hardware.cpu.name,
                os::os_name(target),
                fallback.name
            );
            log::warn!("[SMBIOS] {}", message);
            warnings.push(message);

            // Offer the rest of the category, newest first; the fallback is the default
            let options: Vec<String> = in_category
                .iter()
                .map(|m| {
                    let note = if m.supports(target) { "" } else { " (unsupported on target)" };
                    format!("{}{}", m.name, note)
                })
                .collect();
            let index = ask_choice(
                prompter,
                Prompt::choice(
                    PromptTopic::SmbiosOverride,
                    "Mac model",
                    "No Mac model matches this CPU. Choose the identity to use:",
                    options,
                    0,
                ),
            )?;
            (in_category.get(index).copied().unwrap_or(fallback), true)
        }
    };

    let overrides = derive_overrides(hardware, model, target);
    if overrides.no_compat_check {
        warnings.push(format!(
            "{} does not support {}; -no_compat_check will be set",
            model.name,
            os::os_name(target)
        ));
    }
    log::info!(
        target: "parsed",
        "[SMBIOS] Selected {}{}",
        model.name,
        if fallback { " (fallback)" } else { "" }
    );
    Ok(SmbiosChoice {
        model,
        fallback,
        overrides,
        warnings,
    })
}

/// Platform identity written to `PlatformInfo.Generic`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformIdentity {
    pub serial: String,
    pub mlb: String,
    pub uuid: String,
    pub rom: [u8; 6],
}

/// Characters Apple uses in serial numbers.
const SERIAL_ALPHABET: &[u8] = b"0123456789CDFGHJKLMNPQRTVWXY";

impl PlatformIdentity {
    /// Derive a stable identity from hardware facts and the model name.
    pub fn derive(hardware: &CustomizedHardware, model: &SmbiosModel) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(model.name.as_bytes());
        hasher.update(hardware.motherboard.manufacturer.as_bytes());
        hasher.update(hardware.motherboard.model.as_bytes());
        hasher.update(hardware.cpu.name.as_bytes());
        for device in hardware.all_devices() {
            hasher.update(device.name.as_bytes());
            if let Some(id) = device.lookup_id() {
                hasher.update(id.as_bytes());
            }
        }
        let digest = hasher.finalize();

        let pick = |byte: u8| SERIAL_ALPHABET[byte as usize % SERIAL_ALPHABET.len()] as char;
        let serial: String = std::iter::once("C02".to_string())
            .chain(digest[0..9].iter().map(|b| pick(*b).to_string()))
            .collect();
        let mlb: String = serial
            .chars()
            .chain(digest[9..14].iter().map(|b| pick(*b)))
            .collect();

        let mut uuid_bytes = [0u8; 16];
        uuid_bytes.copy_from_slice(&digest[14..30]);
        uuid_bytes[6] = (uuid_bytes[6] & 0x0F) | 0x40;
        uuid_bytes[8] = (uuid_bytes[8] & 0x3F) | 0x80;
        let hex: String = uuid_bytes.iter().map(|b| format!("{:02X}", b)).collect();
        let uuid = format!(
            "{}-{}-{}-{}-{}",
            &hex[0..8],
            &hex[8..12],
            &hex[12..16],
            &hex[16..20],
            &hex[20..32]
        );

        let mut rom = [0u8; 6];
        rom.copy_from_slice(&digest[26..32]);
        PlatformIdentity { serial, mlb, uuid, rom }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        BiosInfo, CpuInfo, Device, DeviceKind, FirmwareType, GpuType, HardwareReport, MotherboardInfo,
        SecureBoot,
    };
    use crate::ui::{PromptResponse, ScriptedUi};
    use std::collections::BTreeMap;

    fn hardware(codename: &str, cores: u32, platform: Platform, igpu: bool) -> HardwareReport {
        let mut hw = HardwareReport {
            bios: BiosInfo {
                firmware_type: FirmwareType::Uefi,
                secure_boot: SecureBoot::Disabled,
            },
            motherboard: MotherboardInfo {
                manufacturer: "Gigabyte".into(),
                model: "Z390 AORUS".into(),
                chipset: "Z390".into(),
                platform,
            },
            cpu: CpuInfo {
                name: format!("Intel {}", codename),
                manufacturer: "Intel".into(),
                codename: codename.into(),
                cores,
                threads: cores * 2,
                simd: vec!["SSE4.1".into(), "SSE4.2".into(), "AVX2".into()],
                family: Some(6),
                model: None,
                compatibility: None,
                extended: None,
            },
            devices: BTreeMap::new(),
        };
        if igpu {
            hw.insert(
                Device::new(
                    "UHD 630",
                    DeviceKind::Gpu {
                        gpu_type: GpuType::Integrated,
                        resizable_bar: None,
                    },
                )
                .with_device_id("8086-3e92")
                .with_manufacturer("Intel"),
            );
        }
        hw
    }

    #[test]
    fn test_coffee_lake_desktop_picks_imac19() {
        let hw = hardware("Coffee Lake", 8, Platform::Desktop, true);
        let ui = ScriptedUi::new();
        let choice = select_smbios(&hw, Version::upper(23), &ui).unwrap();
        assert_eq!(choice.model.family(), "iMac19");
        assert!(!choice.fallback);
        assert!(choice.overrides.apple_xcpm_cfg_lock);
        assert!(!choice.overrides.no_compat_check);
        assert!(ui.asked().is_empty());
    }

    #[test]
    fn test_fallback_prompts_and_warns() {
        // Haswell desktops have no model that runs Ventura
        let hw = hardware("Haswell", 4, Platform::Desktop, true);
        let ui = ScriptedUi::new();
        let choice = select_smbios(&hw, Version::upper(22), &ui).unwrap();
        assert!(choice.fallback);
        assert_eq!(choice.model.name, "iMac20,1");
        assert!(!choice.warnings.is_empty());
        assert_eq!(ui.asked_about(PromptTopic::SmbiosOverride).len(), 1);
    }

    #[test]
    fn test_fallback_override_and_cancel() {
        let hw = hardware("Haswell", 4, Platform::Desktop, true);
        let pick_older = ScriptedUi::new().answer(PromptTopic::SmbiosOverride, PromptResponse::Selected(6));
        let choice = select_smbios(&hw, Version::upper(22), &pick_older).unwrap();
        assert_eq!(choice.model.name, "iMac15,1");
        assert!(choice.overrides.no_compat_check);

        let cancel = ScriptedUi::new().answer(PromptTopic::SmbiosOverride, PromptResponse::Cancelled);
        assert!(matches!(
            select_smbios(&hw, Version::upper(22), &cancel),
            Err(PipelineError::Cancelled)
        ));
    }

    #[test]
    fn test_identity_is_deterministic() {
        let hw = hardware("Coffee Lake", 8, Platform::Desktop, true);
        let model = crate::kb::smbios::lookup("iMac19,1").unwrap();
        let a = PlatformIdentity::derive(&hw, model);
        let b = PlatformIdentity::derive(&hw, model);
        assert_eq!(a, b);
        assert_eq!(a.serial.len(), 12);
        assert_eq!(a.mlb.len(), 17);
        assert_eq!(a.uuid.len(), 36);
        assert_eq!(&a.uuid[14..15], "4");
        let other = PlatformIdentity::derive(&hw, crate::kb::smbios::lookup("Macmini8,1").unwrap());
        assert_ne!(a.serial, other.serial);
    }
}
