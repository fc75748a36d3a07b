//! Bundled configuration template.
//!
//! Mirrors the section layout and defaults of OpenCore's `Sample.plist`.
//! Arrays the generator owns start empty.

use std::path::Path;

use crate::config::loader;
use crate::error::ConfigError;
use crate::plist::Value;

/// Top-level sections every template must carry.
pub const SECTIONS: [&str; 8] = [
    "ACPI",
    "Booter",
    "DeviceProperties",
    "Kernel",
    "Misc",
    "NVRAM",
    "PlatformInfo",
    "UEFI",
];

/// Apple NVRAM vendor GUIDs.
pub const APPLE_BOOT_GUID: &str = "7C436110-AB2A-4BBB-A880-FE41995C9F82";
pub const APPLE_VENDOR_GUID: &str = "4D1EDE05-38C7-4A6A-9CC6-4BCCA8B38C14";

fn dict<const N: usize>(pairs: [(&str, Value); N]) -> Value {
    Value::from_pairs(pairs)
}

fn empty() -> Value {
    Value::Array(Vec::new())
}

fn int(n: i64) -> Value {
    Value::Integer(n)
}

fn acpi() -> Value {
    dict([
        ("Add", empty()),
        ("Delete", empty()),
        ("Patch", empty()),
        (
            "Quirks",
            dict([
                ("FadtEnableReset", false.into()),
                ("NormalizeHeaders", false.into()),
                ("RebaseRegions", false.into()),
                ("ResetHwSig", false.into()),
                ("ResetLogoStatus", true.into()),
                ("SyncTableIds", false.into()),
            ]),
        ),
    ])
}

fn booter() -> Value {
    dict([
        ("MmioWhitelist", empty()),
        ("Patch", empty()),
        (
            "Quirks",
            dict([
                ("AllowRelocationBlock", false.into()),
                ("AvoidRuntimeDefrag", true.into()),
                ("ClearTaskSwitchBit", false.into()),
                ("DevirtualiseMmio", false.into()),
                ("DisableSingleUser", false.into()),
                ("DisableVariableWrite", false.into()),
                ("DiscardHibernateMap", false.into()),
                ("EnableSafeModeSlide", true.into()),
                ("EnableWriteUnprotector", true.into()),
                ("FixupAppleEfiImages", true.into()),
                ("ForceBooterSignature", false.into()),
                ("ForceExitBootServices", false.into()),
                ("ProtectMemoryRegions", false.into()),
                ("ProtectSecureBoot", false.into()),
                ("ProtectUefiServices", false.into()),
                ("ProvideCustomSlide", true.into()),
                ("ProvideMaxSlide", int(0)),
                ("RebuildAppleMemoryMap", false.into()),
                ("ResizeAppleGpuBars", int(-1)),
                ("SetupVirtualMap", true.into()),
                ("SignalAppleOS", false.into()),
                ("SyncRuntimePermissions", false.into()),
            ]),
        ),
    ])
}

fn device_properties() -> Value {
    dict([("Add", Value::dict()), ("Delete", Value::dict())])
}

fn kernel() -> Value {
    dict([
        ("Add", empty()),
        ("Block", empty()),
        (
            "Emulate",
            dict([
                ("Cpuid1Data", Value::data(Vec::new())),
                ("Cpuid1Mask", Value::data(Vec::new())),
                ("DummyPowerManagement", false.into()),
                ("MaxKernel", "".into()),
                ("MinKernel", "".into()),
            ]),
        ),
        ("Force", empty()),
        ("Patch", empty()),
        (
            "Quirks",
            dict([
                ("AppleCpuPmCfgLock", false.into()),
                ("AppleXcpmCfgLock", false.into()),
                ("AppleXcpmExtraMsrs", false.into()),
                ("AppleXcpmForceBoost", false.into()),
                ("CustomSMBIOSGuid", false.into()),
                ("DisableIoMapper", true.into()),
                ("DisableIoMapperMapping", false.into()),
                ("DisableLinkeditJettison", true.into()),
                ("DisableRtcChecksum", false.into()),
                ("ExtendBTFeatureFlags", false.into()),
                ("ExternalDiskIcons", false.into()),
                ("ForceAquantiaEthernet", false.into()),
                ("ForceSecureBootScheme", false.into()),
                ("IncreasePciBarSize", false.into()),
                ("LapicKernelPanic", false.into()),
                ("LegacyCommpage", false.into()),
                ("PanicNoKextDump", true.into()),
                ("PowerTimeoutKernelPanic", true.into()),
                ("ProvideCurrentCpuInfo", false.into()),
                ("SetApfsTrimTimeout", int(-1)),
                ("ThirdPartyDrives", false.into()),
                ("XhciPortLimit", false.into()),
            ]),
        ),
        (
            "Scheme",
            dict([
                ("CustomKernel", false.into()),
                ("FuzzyMatch", true.into()),
                ("KernelArch", "Auto".into()),
                ("KernelCache", "Auto".into()),
            ]),
        ),
    ])
}

fn misc() -> Value {
    dict([
        ("BlessOverride", empty()),
        (
            "Boot",
            dict([
                ("ConsoleAttributes", int(0)),
                ("HibernateMode", "None".into()),
                ("HibernateSkipsPicker", false.into()),
                ("HideAuxiliary", true.into()),
                ("InstanceIdentifier", "".into()),
                ("LauncherOption", "Disabled".into()),
                ("LauncherPath", "Default".into()),
                ("PickerAttributes", int(17)),
                ("PickerAudioAssist", false.into()),
                ("PickerMode", "Builtin".into()),
                ("PickerVariant", "Auto".into()),
                ("PollAppleHotKeys", false.into()),
                ("ShowPicker", true.into()),
                ("TakeoffDelay", int(0)),
                ("Timeout", int(5)),
            ]),
        ),
        (
            "Debug",
            dict([
                ("AppleDebug", false.into()),
                ("ApplePanic", false.into()),
                ("DisableWatchDog", false.into()),
                ("DisplayDelay", int(0)),
                ("DisplayLevel", int(2_147_483_650)),
                ("LogModules", "*".into()),
                ("SysReport", false.into()),
                ("Target", int(3)),
            ]),
        ),
        ("Entries", empty()),
        (
            "Security",
            dict([
                ("AllowSetDefault", true.into()),
                ("ApECID", int(0)),
                ("AuthRestart", false.into()),
                ("BlacklistAppleUpdate", true.into()),
                ("DmgLoading", "Signed".into()),
                ("EnablePassword", false.into()),
                ("ExposeSensitiveData", int(6)),
                ("HaltLevel", int(2_147_483_648)),
                ("PasswordHash", Value::data(Vec::new())),
                ("PasswordSalt", Value::data(Vec::new())),
                ("ScanPolicy", int(0)),
                ("SecureBootModel", "Default".into()),
                ("Vault", "Optional".into()),
            ]),
        ),
        (
            "Serial",
            dict([("Init", false.into()), ("Override", false.into())]),
        ),
        ("Tools", empty()),
    ])
}

fn nvram() -> Value {
    dict([
        (
            "Add",
            dict([
                (
                    APPLE_VENDOR_GUID,
                    dict([("DefaultBackgroundColor", Value::data(vec![0, 0, 0, 0]))]),
                ),
                (
                    APPLE_BOOT_GUID,
                    dict([
                        ("boot-args", "".into()),
                        ("csr-active-config", Value::data(vec![0, 0, 0, 0])),
                        ("prev-lang:kbd", Value::data(b"en-US:0".to_vec())),
                        ("run-efi-updater", "No".into()),
                    ]),
                ),
            ]),
        ),
        (
            "Delete",
            dict([
                (
                    APPLE_VENDOR_GUID,
                    Value::Array(vec!["DefaultBackgroundColor".into()]),
                ),
                (
                    APPLE_BOOT_GUID,
                    Value::Array(vec!["boot-args".into(), "csr-active-config".into()]),
                ),
            ]),
        ),
        ("LegacySchema", Value::dict()),
        ("WriteFlash", true.into()),
    ])
}

fn platform_info() -> Value {
    dict([
        ("Automatic", true.into()),
        ("CustomMemory", false.into()),
        (
            "Generic",
            dict([
                ("AdviseFeatures", false.into()),
                ("MaxBIOSVersion", false.into()),
                ("MLB", "".into()),
                ("ProcessorType", int(0)),
                ("ROM", Value::data(vec![0; 6])),
                ("SpoofVendor", true.into()),
                ("SystemMemoryStatus", "Auto".into()),
                ("SystemProductName", "".into()),
                ("SystemSerialNumber", "".into()),
                ("SystemUUID", "".into()),
            ]),
        ),
        ("UpdateDataHub", true.into()),
        ("UpdateNVRAM", true.into()),
        ("UpdateSMBIOS", true.into()),
        ("UpdateSMBIOSMode", "Create".into()),
        ("UseRawUuidEncoding", false.into()),
    ])
}

fn uefi() -> Value {
    dict([
        (
            "APFS",
            dict([
                ("EnableJumpstart", true.into()),
                ("GlobalConnect", false.into()),
                ("HideVerbose", true.into()),
                ("JumpstartHotPlug", false.into()),
                ("MinDate", int(0)),
                ("MinVersion", int(0)),
            ]),
        ),
        (
            "Audio",
            dict([
                ("AudioCodec", int(0)),
                ("AudioDevice", "".into()),
                ("AudioOutMask", int(1)),
                ("AudioSupport", false.into()),
                ("DisconnectHda", false.into()),
                ("MaximumGain", int(-15)),
                ("MinimumAssistGain", int(-30)),
                ("MinimumAudibleGain", int(-55)),
                ("PlayChime", "Auto".into()),
                ("ResetTrafficClass", false.into()),
                ("SetupDelay", int(0)),
            ]),
        ),
        ("ConnectDrivers", true.into()),
        ("Drivers", empty()),
        (
            "Input",
            dict([
                ("KeyFiltering", false.into()),
                ("KeyForgetThreshold", int(5)),
                ("KeySupport", true.into()),
                ("KeySupportMode", "Auto".into()),
                ("KeySwap", false.into()),
                ("PointerSupport", false.into()),
                ("PointerSupportMode", "ASUS".into()),
                ("TimerResolution", int(50000)),
            ]),
        ),
        (
            "Output",
            dict([
                ("ClearScreenOnModeSwitch", false.into()),
                ("ConsoleMode", "".into()),
                ("DirectGopRendering", false.into()),
                ("ForceResolution", false.into()),
                ("GopPassThrough", "Disabled".into()),
                ("ProvideConsoleGop", true.into()),
                ("Resolution", "Max".into()),
                ("TextRenderer", "BuiltinGraphics".into()),
                ("UIScale", int(0)),
            ]),
        ),
        (
            "ProtocolOverrides",
            dict([
                ("AppleAudio", false.into()),
                ("FirmwareVolume", false.into()),
                ("UnicodeCollation", false.into()),
            ]),
        ),
        (
            "Quirks",
            dict([
                ("EnableVectorAcceleration", true.into()),
                ("ForceOcWriteFlash", false.into()),
                ("IgnoreInvalidFlexRatio", false.into()),
                ("ReleaseUsbOwnership", false.into()),
                ("RequestBootVarRouting", true.into()),
                ("ResizeGpuBars", int(-1)),
                ("UnblockFsConnect", false.into()),
            ]),
        ),
        ("ReservedMemory", empty()),
    ])
}

/// The bundled template.
pub fn sample_config() -> Value {
    dict([
        ("ACPI", acpi()),
        ("Booter", booter()),
        ("DeviceProperties", device_properties()),
        ("Kernel", kernel()),
        ("Misc", misc()),
        ("NVRAM", nvram()),
        ("PlatformInfo", platform_info()),
        ("UEFI", uefi()),
    ])
}

/// Load a user template from JSON, or the bundled one when `path` is `None`.
pub fn load_template(path: Option<&Path>) -> Result<Value, ConfigError> {
    let path = match path {
        Some(p) => p,
        None => return Ok(sample_config()),
    };
    let template: Value = loader::load_json_file(path)?;
    let missing: Vec<&str> = SECTIONS
        .iter()
        .copied()
        .filter(|s| template.get(s).and_then(Value::as_dict).is_none())
        .collect();
    if !missing.is_empty() {
        return Err(ConfigError::ValidationFailed(format!(
            "Template {} is missing section(s): {}",
            path.display(),
            missing.join(", ")
        )));
    }
    log::info!("[Config] Using template {}", path.display());
    Ok(template)
}
