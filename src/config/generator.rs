//! ConfigGenerator: overlays selection results onto the template.
//!
//! Every array the generator owns is cleared first and refilled in a fixed
//! order, and every dictionary is a `BTreeMap`, so identical inputs give
//! identical `config.plist` bytes:
//!
//! - `ACPI.Add/Delete/Patch`: patch catalog order, then user patches
//! - `Kernel.Add`: left empty here; the assembler fills it from the
//!   installed tree
//! - `Kernel.Block`: kext catalog order
//! - `UEFI.Drivers`: load order (early drivers first)
//! - `Misc.Tools`: fixed tool order
//! - `boot-args`: base, GPU, OS, network, extended support, model, audio

use std::collections::BTreeMap;

use crate::config::template::APPLE_BOOT_GUID;
use crate::config::Settings;
use crate::error::ConfigError;
use crate::kb::cpu::{self, CpuVendor};
use crate::kb::os;
use crate::kb::pci::{self, GpuFamily, NetworkClass};
use crate::models::{CustomizedHardware, DeviceCategory, DeviceKind, DisabledDevices, FirmwareType, GpuType};
use crate::plist::{Dict, Value};
use crate::selection::{AcpiAdd, AcpiDelete, BinaryPatch, Selection};
use crate::version::Version;

/// Default location of the Intel iGPU.
pub const IGPU_PCI_PATH: &str = "PciRoot(0x0)/Pci(0x2,0x0)";

/// SIP value that lets root patches load.
const CSR_EXTENDED: [u8; 4] = [0x03, 0x08, 0x00, 0x00];
const CSR_ENABLED: [u8; 4] = [0x00, 0x00, 0x00, 0x00];

/// Everything the generator reads.
#[derive(Debug, Clone, Copy)]
pub struct GeneratorInput<'a> {
    pub hardware: &'a CustomizedHardware,
    pub disabled: &'a DisabledDevices,
    pub selection: &'a Selection,
    pub target: Version,
    pub settings: &'a Settings,
}

/// Generated configuration plus the lists the assembler prunes against.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedConfig {
    pub config: Value,
    pub drivers: Vec<String>,
    pub tools: Vec<String>,
    pub boot_args: Vec<String>,
    /// Effective `PickerAudioAssist`; off on legacy firmware.
    pub audio_assist: bool,
}

/// A UEFI driver the configuration may reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriverEntry {
    pub path: &'static str,
    pub load_early: bool,
    pub comment: &'static str,
}

/// Drivers required by firmware type and picker settings, in load order.
///
/// Legacy firmware gets the emulated NVRAM driver instead of the UEFI-only
/// NVRAM reset entry and audio driver.
pub fn required_drivers(firmware: FirmwareType, settings: &Settings) -> Vec<DriverEntry> {
    let mut drivers = Vec::new();
    let legacy = firmware == FirmwareType::Legacy;
    if legacy {
        drivers.push(DriverEntry {
            path: "OpenVariableRuntimeDxe.efi",
            load_early: true,
            comment: "Emulated NVRAM",
        });
    }
    drivers.push(DriverEntry {
        path: "OpenRuntime.efi",
        load_early: legacy,
        comment: "",
    });
    drivers.push(DriverEntry {
        path: "OpenHfsPlus.efi",
        load_early: false,
        comment: "HFS+ recovery",
    });
    if !legacy {
        drivers.push(DriverEntry {
            path: "ResetNvramEntry.efi",
            load_early: false,
            comment: "",
        });
        if settings.picker_audio_assist {
            drivers.push(DriverEntry {
                path: "AudioDxe.efi",
                load_early: false,
                comment: "Picker audio",
            });
        }
    }
    if settings.uses_gui_picker() {
        drivers.push(DriverEntry {
            path: "OpenCanopy.efi",
            load_early: false,
            comment: "Graphical picker",
        });
    }
    drivers
}

/// Tools referenced from the picker.
pub fn required_tools() -> Vec<(&'static str, &'static str)> {
    vec![("OpenShell.efi", "UEFI Shell")]
}

fn put(config: &mut Value, path: &str, value: Value) -> Result<(), ConfigError> {
    if config.set(path, value) {
        Ok(())
    } else {
        Err(ConfigError::ValidationFailed(format!("Template has no writable {}", path)))
    }
}

fn dict_at<'v>(config: &'v mut Value, path: &str) -> Result<&'v mut Dict, ConfigError> {
    if config.get(path).is_none() {
        put(config, path, Value::dict())?;
    }
    config
        .get_mut(path)
        .and_then(Value::as_dict_mut)
        .ok_or_else(|| ConfigError::ValidationFailed(format!("{} is not a dictionary", path)))
}

fn padded<const N: usize>(text: &str) -> [u8; N] {
    let mut out = [b' '; N];
    for (slot, byte) in out.iter_mut().zip(text.bytes()) {
        *slot = byte;
    }
    out
}

fn acpi_add_entry(add: &AcpiAdd) -> Value {
    Value::from_pairs([
        ("Comment", Value::from(add.comment.as_str())),
        ("Enabled", true.into()),
        ("Path", Value::from(add.file_name.as_str())),
    ])
}

fn acpi_delete_entry(delete: &AcpiDelete) -> Value {
    Value::from_pairs([
        ("All", delete.all.into()),
        ("Comment", Value::from(delete.comment.as_str())),
        ("Enabled", true.into()),
        ("OemTableId", Value::data(delete.oem_table_id.to_vec())),
        ("TableLength", Value::Integer(delete.table_length as i64)),
        ("TableSignature", Value::data(delete.table_signature.to_vec())),
    ])
}

fn acpi_patch_entry(patch: &BinaryPatch) -> Value {
    let oem = if patch.oem_table_id.is_empty() {
        Vec::new()
    } else {
        padded::<8>(&patch.oem_table_id).to_vec()
    };
    let signature = if patch.table_signature.is_empty() {
        Vec::new()
    } else {
        padded::<4>(&patch.table_signature).to_vec()
    };
    Value::from_pairs([
        ("Base", Value::from("")),
        ("BaseSkip", Value::Integer(0)),
        ("Comment", Value::from(patch.comment.as_str())),
        ("Count", Value::Integer(patch.count as i64)),
        ("Enabled", true.into()),
        ("Find", Value::data(patch.find.clone())),
        ("Limit", Value::Integer(patch.limit as i64)),
        ("Mask", Value::data(Vec::new())),
        ("OemTableId", Value::data(oem)),
        ("Replace", Value::data(patch.replace.clone())),
        ("ReplaceMask", Value::data(Vec::new())),
        ("Skip", Value::Integer(patch.skip as i64)),
        ("TableLength", Value::Integer(0)),
        ("TableSignature", Value::data(signature)),
    ])
}

/// `Kernel.Add` entry for an installed bundle.
pub fn kernel_add_entry(bundle_path: &str, executable_path: &str, min_kernel: &str, max_kernel: &str, comment: &str) -> Value {
    Value::from_pairs([
        ("Arch", Value::from("x86_64")),
        ("BundlePath", Value::from(bundle_path)),
        ("Comment", Value::from(comment)),
        ("Enabled", true.into()),
        ("ExecutablePath", Value::from(executable_path)),
        ("MaxKernel", Value::from(max_kernel)),
        ("MinKernel", Value::from(min_kernel)),
        ("PlistPath", Value::from("Contents/Info.plist")),
    ])
}

fn kernel_block_entry(identifier: &str, min_major: u32) -> Value {
    Value::from_pairs([
        ("Arch", Value::from("x86_64")),
        ("Comment", Value::from(format!("Allow {} downgrade", identifier))),
        ("Enabled", true.into()),
        ("Identifier", Value::from(identifier)),
        ("MaxKernel", Value::from("")),
        ("MinKernel", Value::from(format!("{}.0.0", min_major))),
        ("Strategy", Value::from("Exclude")),
    ])
}

fn driver_entry(driver: &DriverEntry) -> Value {
    Value::from_pairs([
        ("Arguments", Value::from("")),
        ("Comment", Value::from(driver.comment)),
        ("Enabled", true.into()),
        ("LoadEarly", driver.load_early.into()),
        ("Path", Value::from(driver.path)),
    ])
}

fn tool_entry(path: &str, name: &str) -> Value {
    Value::from_pairs([
        ("Arguments", Value::from("")),
        ("Auxiliary", true.into()),
        ("Comment", Value::from(name)),
        ("Enabled", true.into()),
        ("Flavour", Value::from("OpenShell:UEFIShell:Shell")),
        ("FullNvramAccess", false.into()),
        ("Name", Value::from(name)),
        ("Path", Value::from(path)),
        ("RealPath", false.into()),
        ("TextMode", false.into()),
    ])
}

fn gpu_family(device_id: Option<&str>) -> Option<GpuFamily> {
    device_id.and_then(pci::classify_gpu).map(|c| c.family)
}

fn kept_igpu(hardware: &CustomizedHardware) -> Option<(GpuFamily, Option<&str>)> {
    hardware
        .devices_in(DeviceCategory::Gpu)
        .filter(|d| d.is_integrated_gpu())
        .find_map(|d| {
            gpu_family(d.device_id.as_deref())
                .filter(GpuFamily::is_intel)
                .map(|f| (f, d.pci_path.as_deref()))
        })
}

fn has_discrete_amd(hardware: &CustomizedHardware) -> bool {
    hardware.devices_in(DeviceCategory::Gpu).any(|d| {
        matches!(d.kind, DeviceKind::Gpu { gpu_type: GpuType::Discrete, .. })
            && gpu_family(d.device_id.as_deref()).map(|f| f.is_amd()).unwrap_or(false)
    })
}

/// `DeviceProperties.Add` for iGPU, audio and Ethernet.
fn device_properties(input: &GeneratorInput) -> BTreeMap<String, Value> {
    let hardware = input.hardware;
    let laptop = hardware.is_laptop();
    let mut add: BTreeMap<String, Value> = BTreeMap::new();

    // STEP 1: integrated graphics framebuffer
    if let Some((family, path)) = kept_igpu(hardware) {
        let headless = !laptop && has_discrete_amd(hardware);
        // Skylake graphics is dropped after Monterey; present it as Kaby Lake
        let spoof_skylake = family == GpuFamily::IntelSkylake && input.target.major >= 22;
        let fb_family = if spoof_skylake { GpuFamily::IntelKabyLake } else { family };
        if let Some(platform_id) = pci::ig_platform_id(fb_family, laptop, headless) {
            let mut props = Dict::new();
            props.insert("AAPL,ig-platform-id".into(), Value::data(platform_id.to_vec()));
            if spoof_skylake {
                let device_id: u32 = if laptop { 0x591B } else { 0x5912 };
                props.insert("device-id".into(), Value::data(device_id.to_le_bytes().to_vec()));
            }
            if !headless && !laptop {
                props.insert("framebuffer-patch-enable".into(), Value::data(vec![1, 0, 0, 0]));
                props.insert("framebuffer-stolenmem".into(), Value::data(vec![0, 0, 0x30, 0x01]));
            }
            add.insert(path.unwrap_or(IGPU_PCI_PATH).to_string(), Value::Dict(props));
        }
    }

    // STEP 2: audio layout, only when the controller location is known
    if let Some(layout) = input.selection.audio_layout {
        if let Some(path) = hardware
            .devices_in(DeviceCategory::Sound)
            .find_map(|d| d.pci_path.as_deref())
        {
            let entry = add.entry(path.to_string()).or_insert_with(Value::dict);
            if let Some(props) = entry.as_dict_mut() {
                props.insert("layout-id".into(), Value::data(u32::from(layout).to_le_bytes().to_vec()));
            }
        }
    }

    // STEP 3: Ethernet aliases (I225-V presented as I225-LM)
    for device in hardware.devices_in(DeviceCategory::Network) {
        let is_i225 = device
            .device_id
            .as_deref()
            .and_then(pci::classify_network)
            .map(|c| c == NetworkClass::IntelI225)
            .unwrap_or(false);
        if let (true, Some(path)) = (is_i225, device.pci_path.as_deref()) {
            let entry = add.entry(path.to_string()).or_insert_with(Value::dict);
            if let Some(props) = entry.as_dict_mut() {
                props.insert("device-id".into(), Value::data(vec![0xF2, 0x15, 0x00, 0x00]));
            }
        }
    }

    add
}

/// Compose `boot-args` fragments.
pub fn boot_args(input: &GeneratorInput) -> Vec<String> {
    let hardware = input.hardware;
    let selection = input.selection;
    let mut args: Vec<String> = Vec::new();

    if input.settings.verbose_boot {
        args.push("-v".into());
    }
    args.push("keepsyms=1".into());
    args.push("debug=0x100".into());

    // GPU
    let navi = hardware
        .devices_in(DeviceCategory::Gpu)
        .any(|d| gpu_family(d.device_id.as_deref()).map(|f| f.is_navi()).unwrap_or(false));
    if navi {
        args.push("agdpmod=pikera".into());
    }
    let disabled_discrete = input.disabled.values().any(|d| {
        matches!(d.kind, DeviceKind::Gpu { gpu_type: GpuType::Discrete, .. })
    });
    if disabled_discrete && !selection.patches.is_checked("DGPU-OFF") {
        args.push("-wegnoegpu".into());
    }
    if hardware.is_laptop() {
        if let Some((GpuFamily::IntelCoffeeLake | GpuFamily::IntelIceLake, _)) = kept_igpu(hardware) {
            args.push("-igfxblr".into());
        }
    }

    // OS
    if os::is_beta_major(input.target.major) {
        args.push("-lilubetaall".into());
    }

    // Network
    let i225 = hardware.devices_in(DeviceCategory::Network).any(|d| {
        d.device_id.as_deref().and_then(pci::classify_network) == Some(NetworkClass::IntelI225)
    });
    if i225 && input.target.major >= 21 {
        args.push("e1000=0".into());
    }

    // Extended support
    if selection.needs_extended {
        args.push("amfi=0x80".into());
        if selection.kexts.contains("RestrictEvents") {
            args.push("revpatch=sbvmm".into());
        }
    }

    if selection.smbios.overrides.no_compat_check {
        args.push("-no_compat_check".into());
    }

    // Audio without a known controller path
    if let Some(layout) = selection.audio_layout {
        let has_path = hardware
            .devices_in(DeviceCategory::Sound)
            .any(|d| d.pci_path.is_some());
        if !has_path {
            args.push(format!("alcid={}", layout));
        }
    }

    args
}

/// Build the final configuration from `template`.
pub fn generate(template: &Value, input: &GeneratorInput) -> Result<GeneratedConfig, ConfigError> {
    let hardware = input.hardware;
    let selection = input.selection;
    let settings = input.settings;
    let mut config = template.clone();

    // STEP 1: ACPI sections
    let patches = &selection.patches;
    put(&mut config, "ACPI.Add", Value::Array(patches.add.iter().map(acpi_add_entry).collect()))?;
    put(&mut config, "ACPI.Delete", Value::Array(patches.delete.iter().map(acpi_delete_entry).collect()))?;
    put(&mut config, "ACPI.Patch", Value::Array(patches.patch.iter().map(acpi_patch_entry).collect()))?;

    // STEP 2: DeviceProperties
    let properties = device_properties(input);
    let add = dict_at(&mut config, "DeviceProperties.Add")?;
    add.clear();
    add.extend(properties);

    // STEP 3: Kernel
    put(&mut config, "Kernel.Add", Value::Array(Vec::new()))?;
    let blocks: Vec<Value> = selection
        .kexts
        .kexts
        .iter()
        .filter_map(|k| k.spec.block.map(|id| kernel_block_entry(id, k.spec.min_major)))
        .collect();
    put(&mut config, "Kernel.Block", Value::Array(blocks))?;
    let overrides = &selection.smbios.overrides;
    put(&mut config, "Kernel.Quirks.AppleCpuPmCfgLock", overrides.apple_cpu_pm_cfg_lock.into())?;
    put(&mut config, "Kernel.Quirks.AppleXcpmCfgLock", overrides.apple_xcpm_cfg_lock.into())?;
    let amd = cpu::vendor_of(&hardware.cpu) == CpuVendor::Amd;
    put(&mut config, "Kernel.Quirks.ProvideCurrentCpuInfo", amd.into())?;

    // STEP 4: Booter
    let rebar = hardware
        .devices_in(DeviceCategory::Gpu)
        .any(|d| matches!(d.kind, DeviceKind::Gpu { resizable_bar: Some(true), .. }));
    put(&mut config, "Booter.Quirks.ResizeAppleGpuBars", Value::Integer(if rebar { 0 } else { -1 }))?;

    // STEP 5: NVRAM
    let args = boot_args(input);
    let boot = format!("NVRAM.Add.{}", APPLE_BOOT_GUID);
    put(&mut config, &format!("{}.boot-args", boot), Value::from(args.join(" ")))?;
    let csr = if selection.needs_extended { CSR_EXTENDED } else { CSR_ENABLED };
    put(&mut config, &format!("{}.csr-active-config", boot), Value::data(csr.to_vec()))?;

    // STEP 6: PlatformInfo
    let identity = &selection.identity;
    put(&mut config, "PlatformInfo.Generic.SystemProductName", Value::from(selection.smbios.model.name))?;
    put(&mut config, "PlatformInfo.Generic.SystemSerialNumber", Value::from(identity.serial.as_str()))?;
    put(&mut config, "PlatformInfo.Generic.MLB", Value::from(identity.mlb.as_str()))?;
    put(&mut config, "PlatformInfo.Generic.SystemUUID", Value::from(identity.uuid.as_str()))?;
    put(&mut config, "PlatformInfo.Generic.ROM", Value::data(identity.rom.to_vec()))?;

    // STEP 7: Misc
    let gui = settings.uses_gui_picker();
    put(&mut config, "Misc.Boot.PickerMode", Value::from(if gui { "External" } else { "Builtin" }))?;
    put(&mut config, "Misc.Boot.PickerVariant", Value::from(settings.picker_variant.as_str()))?;
    let legacy = hardware.bios.firmware_type == FirmwareType::Legacy;
    let audio_assist = settings.picker_audio_assist && !legacy;
    put(&mut config, "Misc.Boot.PickerAudioAssist", audio_assist.into())?;
    put(&mut config, "UEFI.Audio.AudioSupport", audio_assist.into())?;
    let secure_boot_model = if selection.needs_extended { "Disabled" } else { "Default" };
    put(&mut config, "Misc.Security.SecureBootModel", Value::from(secure_boot_model))?;

    let tools = required_tools();
    put(
        &mut config,
        "Misc.Tools",
        Value::Array(tools.iter().map(|(path, name)| tool_entry(path, name)).collect()),
    )?;

    // STEP 8: UEFI drivers
    let drivers = required_drivers(hardware.bios.firmware_type, settings);
    put(&mut config, "UEFI.Drivers", Value::Array(drivers.iter().map(driver_entry).collect()))?;

    log::info!(
        target: "parsed",
        "[ConfigGenerator] {} driver(s), {} ACPI table(s), boot-args: {}",
        drivers.len(),
        patches.add.len(),
        args.join(" ")
    );

    Ok(GeneratedConfig {
        config,
        drivers: drivers.iter().map(|d| d.path.to_string()).collect(),
        tools: tools.iter().map(|(path, _)| path.to_string()).collect(),
        boot_args: args,
        audio_assist,
    })
}
