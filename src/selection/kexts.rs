//! Kext catalog and selector.
//!
//! The catalog is listed in dependency order: every entry's `requires`
//! names appear before it. Selection keeps that order, so `Kernel.Add`
//! loads parents before the kexts that link against them.

use std::collections::{BTreeMap, BTreeSet};

use crate::acpi::AcpiNamespace;
use crate::error::{PipelineError, SelectionError};
use crate::kb::codecs;
use crate::kb::cpu::{self, CpuVendor};
use crate::kb::pci::{self, BluetoothClass, GpuFamily, NetworkClass, StorageClass};
use crate::kb::smbios::SmbiosModel;
use crate::models::{CustomizedHardware, DeviceCategory, DeviceKind, DisabledDevices};
use crate::ui::{ask_choice, Prompt, PromptTopic, Prompter};
use crate::version::{Version, HIGHEST_KERNEL_MAJOR, LOWEST_KERNEL_MAJOR};

/// Inputs a kext predicate may look at.
pub struct KextContext<'a> {
    pub hardware: &'a CustomizedHardware,
    pub disabled: &'a DisabledDevices,
    pub smbios: &'a SmbiosModel,
    pub target: Version,
    /// Extended support already required by the kept devices.
    pub needs_extended: bool,
    pub namespace: &'a AcpiNamespace,
    /// Ids of the ACPI patches checked in the current round.
    pub patches: &'a BTreeSet<String>,
    /// Kexts requested by checked patches.
    pub companions: &'a BTreeSet<String>,
}

impl KextContext<'_> {
    fn vendor(&self) -> CpuVendor {
        cpu::vendor_of(&self.hardware.cpu)
    }

    fn gpu_families(&self) -> Vec<GpuFamily> {
        self.hardware
            .devices_in(DeviceCategory::Gpu)
            .filter_map(|d| d.device_id.as_deref())
            .filter_map(pci::classify_gpu)
            .map(|c| c.family)
            .collect()
    }

    fn network(&self) -> Vec<(NetworkClass, String)> {
        self.hardware
            .devices_in(DeviceCategory::Network)
            .filter_map(|d| d.device_id.as_deref())
            .filter_map(|id| pci::classify_network(id).map(|c| (c, id.to_string())))
            .collect()
    }

    fn has_network(&self, class: NetworkClass) -> bool {
        self.network().iter().any(|(c, _)| *c == class)
    }

    fn has_bluetooth(&self, class: BluetoothClass) -> bool {
        self.hardware
            .devices_in(DeviceCategory::Bluetooth)
            .filter_map(|d| d.usb_id.as_deref())
            .any(|id| pci::classify_bluetooth(id) == Some(class))
    }

    fn has_nvme(&self) -> bool {
        self.hardware
            .devices_in(DeviceCategory::StorageController)
            .any(|d| {
                let kind = match &d.kind {
                    DeviceKind::StorageController { controller_type } => controller_type.as_deref(),
                    _ => None,
                };
                pci::classify_storage(d.device_id.as_deref(), kind.or(d.device_type.as_deref()))
                    == Some(StorageClass::Nvme)
            })
    }
}

/// Build of a kext for a window of kernel majors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KextVariant {
    pub min_major: u32,
    pub max_major: u32,
    /// Bundle directory in the kext cache.
    pub source: &'static str,
}

/// Functional group, used for logging and the analyze report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum KextCategory {
    Required,
    Sensors,
    Graphics,
    Audio,
    Ethernet,
    Wifi,
    Bluetooth,
    Storage,
    Input,
    Extras,
}

/// A catalog entry.
#[derive(Clone, Copy)]
pub struct KextSpec {
    pub name: &'static str,
    pub bundle_id: &'static str,
    pub category: KextCategory,
    pub requires: &'static [&'static str],
    pub min_major: u32,
    pub max_major: u32,
    pub required_by: fn(&KextContext) -> bool,
    /// Per-OS builds; empty when a single bundle covers the whole window.
    pub variants: &'static [KextVariant],
    /// Load from the bundle even though the OS no longer ships the family.
    /// Selecting such a kext implies extended support.
    pub force_load: bool,
    /// Bundle id of the system kext to block in `Kernel.Block`.
    pub block: Option<&'static str>,
}

impl KextSpec {
    /// Whether the kext loads on `target` at all.
    pub fn supports(&self, target: Version) -> bool {
        (self.min_major..=self.max_major).contains(&target.major)
    }

    /// Bundle directory to install from, or `None` when no variant covers `target`.
    pub fn source_for(&self, target: Version) -> Option<String> {
        if self.variants.is_empty() {
            return Some(format!("{}.kext", self.name));
        }
        self.variants
            .iter()
            .find(|v| (v.min_major..=v.max_major).contains(&target.major))
            .map(|v| v.source.to_string())
    }
}

impl std::fmt::Debug for KextSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KextSpec")
            .field("name", &self.name)
            .field("bundle_id", &self.bundle_id)
            .field("category", &self.category)
            .finish()
    }
}

impl PartialEq for KextSpec {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for KextSpec {}

const ANY_OS: (u32, u32) = (LOWEST_KERNEL_MAJOR, HIGHEST_KERNEL_MAJOR);

const fn kext(
    name: &'static str,
    bundle_id: &'static str,
    category: KextCategory,
    requires: &'static [&'static str],
    window: (u32, u32),
    required_by: fn(&KextContext) -> bool,
) -> KextSpec {
    KextSpec {
        name,
        bundle_id,
        category,
        requires,
        min_major: window.0,
        max_major: window.1,
        required_by,
        variants: &[],
        force_load: false,
        block: None,
    }
}

const LILU: &[&str] = &["Lilu"];
const VSMC: &[&str] = &["Lilu", "VirtualSMC"];

static AIRPORT_ITLWM_VARIANTS: &[KextVariant] = &[
    KextVariant { min_major: 17, max_major: 17, source: "AirportItlwm-HighSierra.kext" },
    KextVariant { min_major: 18, max_major: 18, source: "AirportItlwm-Mojave.kext" },
    KextVariant { min_major: 19, max_major: 19, source: "AirportItlwm-Catalina.kext" },
    KextVariant { min_major: 20, max_major: 20, source: "AirportItlwm-BigSur.kext" },
    KextVariant { min_major: 21, max_major: 21, source: "AirportItlwm-Monterey.kext" },
    KextVariant { min_major: 22, max_major: 22, source: "AirportItlwm-Ventura.kext" },
    KextVariant { min_major: 23, max_major: 23, source: "AirportItlwm-Sonoma.kext" },
];

fn always(_ctx: &KextContext) -> bool {
    true
}

/// Catalog in dependency order.
pub static KEXT_CATALOG: &[KextSpec] = &[
    kext("Lilu", "as.vit9696.Lilu", KextCategory::Required, &[], ANY_OS, always),
    kext("VirtualSMC", "as.vit9696.VirtualSMC", KextCategory::Required, LILU, ANY_OS, always),
    kext("SMCProcessor", "as.vit9696.SMCProcessor", KextCategory::Sensors, VSMC, ANY_OS, |c| {
        c.vendor() == CpuVendor::Intel
    }),
    kext("SMCSuperIO", "ru.joedm.SMCSuperIO", KextCategory::Sensors, VSMC, ANY_OS, |c| {
        !c.hardware.is_laptop()
    }),
    kext("SMCBatteryManager", "ru.usrsse2.SMCBatteryManager", KextCategory::Sensors, VSMC, ANY_OS, |c| {
        c.hardware.is_laptop()
    }),
    kext("SMCLightSensor", "ru.usrsse2.SMCLightSensor", KextCategory::Sensors, VSMC, ANY_OS, |c| {
        c.hardware.is_laptop() && (c.namespace.find_by_hid("ACPI0008").is_some() || c.patches.contains("ALS0"))
    }),
    kext(
        "AMDRyzenCPUPowerManagement",
        "wtf.spinach.AMDRyzenCPUPowerManagement",
        KextCategory::Sensors,
        LILU,
        ANY_OS,
        |c| c.vendor() == CpuVendor::Amd,
    ),
    kext(
        "SMCAMDProcessor",
        "wtf.spinach.SMCAMDProcessor",
        KextCategory::Sensors,
        &["Lilu", "VirtualSMC", "AMDRyzenCPUPowerManagement"],
        ANY_OS,
        |c| c.vendor() == CpuVendor::Amd,
    ),
    kext("WhateverGreen", "as.vit9696.WhateverGreen", KextCategory::Graphics, LILU, ANY_OS, |c| {
        c.gpu_families()
            .iter()
            .any(|f| (f.is_intel() && *f != GpuFamily::IntelUnsupported) || (f.is_amd() && *f != GpuFamily::AmdApu) || *f == GpuFamily::NvidiaKepler)
    }),
    kext("NootedRed", "com.ChefKissInc.NootedRed", KextCategory::Graphics, LILU, (19, HIGHEST_KERNEL_MAJOR), |c| {
        c.gpu_families().contains(&GpuFamily::AmdApu)
    }),
    kext("AppleALC", "as.vit9696.AppleALC", KextCategory::Audio, LILU, ANY_OS, |c| {
        c.hardware.devices_in(DeviceCategory::Sound).next().is_some()
    }),
    kext("IntelMausi", "com.insanelymac.IntelMausiEthernet", KextCategory::Ethernet, &[], ANY_OS, |c| {
        c.has_network(NetworkClass::IntelEthernet)
    }),
    kext("LucyRTL8125Ethernet", "com.insanelymac.LucyRTL8125Ethernet", KextCategory::Ethernet, &[], ANY_OS, |c| {
        c.has_network(NetworkClass::RealtekRtl8125)
    }),
    kext("RealtekRTL8111", "com.insanelymac.RealtekRTL8111", KextCategory::Ethernet, &[], ANY_OS, |c| {
        c.has_network(NetworkClass::RealtekRtl8111)
    }),
    kext("RealtekRTL8100", "com.insanelymac.RealtekRTL8100", KextCategory::Ethernet, &[], ANY_OS, |c| {
        c.has_network(NetworkClass::RealtekRtl8100)
    }),
    kext("AppleIGC", "com.sxx.AppleIGC", KextCategory::Ethernet, &[], (20, HIGHEST_KERNEL_MAJOR), |c| {
        c.has_network(NetworkClass::IntelI225)
    }),
    kext("AtherosE2200Ethernet", "com.insanelymac.AtherosE2200Ethernet", KextCategory::Ethernet, &[], ANY_OS, |c| {
        c.has_network(NetworkClass::KillerEthernet)
    }),
    kext(
        "CatalinaBCM5701Ethernet",
        "com.apple.iokit.CatalinaBCM5701Ethernet",
        KextCategory::Ethernet,
        &[],
        (20, HIGHEST_KERNEL_MAJOR),
        |c| c.has_network(NetworkClass::BroadcomEthernet),
    ),
    KextSpec {
        variants: AIRPORT_ITLWM_VARIANTS,
        ..kext("AirportItlwm", "com.zxystd.AirportItlwm", KextCategory::Wifi, &[], (17, 23), |c| {
            c.has_network(NetworkClass::IntelWifi)
        })
    },
    kext("itlwm", "com.zxystd.itlwm", KextCategory::Wifi, &[], (24, HIGHEST_KERNEL_MAJOR), |c| {
        c.has_network(NetworkClass::IntelWifi)
    }),
    kext("AirportBrcmFixup", "as.lvs1974.AirportBrcmFixup", KextCategory::Wifi, LILU, ANY_OS, |c| {
        c.network()
            .iter()
            .any(|(class, id)| *class == NetworkClass::BroadcomWifi && pci::needs_brcm_fixup(id))
    }),
    KextSpec {
        force_load: true,
        block: Some("com.apple.iokit.IOSkywalkFamily"),
        ..kext("IOSkywalkFamily", "com.apple.iokit.IOSkywalkFamily", KextCategory::Wifi, &[], (23, HIGHEST_KERNEL_MAJOR), |c| {
            c.has_network(NetworkClass::BroadcomWifi)
        })
    },
    KextSpec {
        force_load: true,
        ..kext(
            "IO80211FamilyLegacy",
            "com.apple.iokit.IO80211FamilyLegacy",
            KextCategory::Wifi,
            &["IOSkywalkFamily"],
            (23, HIGHEST_KERNEL_MAJOR),
            |c| c.has_network(NetworkClass::BroadcomWifi),
        )
    },
    kext("AMFIPass", "com.dhinakg.AMFIPass", KextCategory::Extras, LILU, (23, HIGHEST_KERNEL_MAJOR), |c| {
        c.needs_extended
    }),
    kext("BrcmFirmwareData", "as.acidanthera.BrcmFirmwareStore", KextCategory::Bluetooth, &[], ANY_OS, |c| {
        c.has_bluetooth(BluetoothClass::Broadcom)
    }),
    kext(
        "BrcmPatchRAM3",
        "as.acidanthera.BrcmPatchRAM3",
        KextCategory::Bluetooth,
        &["BrcmFirmwareData"],
        (19, HIGHEST_KERNEL_MAJOR),
        |c| c.has_bluetooth(BluetoothClass::Broadcom),
    ),
    kext("BlueToolFixup", "as.acidanthera.BlueToolFixup", KextCategory::Bluetooth, LILU, (21, HIGHEST_KERNEL_MAJOR), |c| {
        c.has_bluetooth(BluetoothClass::Broadcom) || c.has_bluetooth(BluetoothClass::Intel)
    }),
    kext(
        "IntelBluetoothFirmware",
        "com.zxystd.IntelBluetoothFirmware",
        KextCategory::Bluetooth,
        &[],
        ANY_OS,
        |c| c.has_bluetooth(BluetoothClass::Intel),
    ),
    kext("IntelBTPatcher", "com.zxystd.IntelBTPatcher", KextCategory::Bluetooth, LILU, ANY_OS, |c| {
        c.has_bluetooth(BluetoothClass::Intel)
    }),
    kext(
        "IntelBluetoothInjector",
        "com.zxystd.IntelBluetoothInjector",
        KextCategory::Bluetooth,
        &["IntelBluetoothFirmware"],
        (LOWEST_KERNEL_MAJOR, 20),
        |c| c.has_bluetooth(BluetoothClass::Intel),
    ),
    kext("ECEnabler", "com.1Revenger1.ECEnabler", KextCategory::Extras, LILU, ANY_OS, |c| {
        c.companions.contains("ECEnabler")
    }),
    kext("RestrictEvents", "com.acidanthera.RestrictEvents", KextCategory::Extras, LILU, ANY_OS, |c| {
        c.smbios.name == "MacPro7,1" || c.vendor() == CpuVendor::Amd || (c.needs_extended && c.target.major >= 23)
    }),
    kext("NVMeFix", "com.acidanthera.NVMeFix", KextCategory::Storage, LILU, ANY_OS, |c| c.has_nvme()),
    kext("RealtekCardReader", "science.FunnyKylin.RealtekCardReader", KextCategory::Storage, &[], (18, HIGHEST_KERNEL_MAJOR), |c| {
        c.hardware
            .devices_in(DeviceCategory::SdController)
            .filter_map(|d| d.device_id.as_deref())
            .any(pci::is_realtek_card_reader)
    }),
    kext(
        "RealtekCardReaderFriend",
        "science.FunnyKylin.RealtekCardReaderFriend",
        KextCategory::Storage,
        &["Lilu", "RealtekCardReader"],
        (18, HIGHEST_KERNEL_MAJOR),
        |c| {
            c.hardware
                .devices_in(DeviceCategory::SdController)
                .filter_map(|d| d.device_id.as_deref())
                .any(pci::is_realtek_card_reader)
        },
    ),
    kext("VoodooPS2Controller", "as.acidanthera.voodoo.driver.PS2Controller", KextCategory::Input, &[], ANY_OS, |c| {
        c.hardware.is_laptop()
    }),
    kext(
        "AppleMCEReporterDisabler",
        "com.apple.driver.AppleMCEReporterDisabler",
        KextCategory::Extras,
        &[],
        (21, HIGHEST_KERNEL_MAJOR),
        |c| c.vendor() == CpuVendor::Amd,
    ),
    kext("CryptexFixup", "com.acidanthera.CryptexFixup", KextCategory::Extras, LILU, (22, HIGHEST_KERNEL_MAJOR), |c| {
        !c.hardware.cpu.has_simd("AVX2")
    }),
];

pub fn lookup(name: &str) -> Option<&'static KextSpec> {
    KEXT_CATALOG.iter().find(|k| k.name == name)
}

/// A kext chosen for installation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedKext {
    pub spec: &'static KextSpec,
    /// Bundle directory to copy from the kext cache.
    pub source: String,
    pub force_load: bool,
    /// Why it was selected.
    pub reason: String,
}

impl SelectedKext {
    pub fn name(&self) -> &'static str {
        self.spec.name
    }

    /// Directory name under `EFI/OC/Kexts`.
    pub fn bundle_name(&self) -> String {
        format!("{}.kext", self.spec.name)
    }
}

/// KextSelector output.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KextSelection {
    pub kexts: Vec<SelectedKext>,
    /// A force-loaded kext was selected.
    pub needs_extended: bool,
    pub diagnostics: Vec<String>,
}

impl KextSelection {
    pub fn names(&self) -> BTreeSet<String> {
        self.kexts.iter().map(|k| k.name().to_string()).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.kexts.iter().any(|k| k.name() == name)
    }

    /// Bundle ids to list in `Kernel.Block`.
    pub fn blocked(&self) -> Vec<&'static str> {
        self.kexts.iter().filter_map(|k| k.spec.block).collect()
    }
}

/// Add `name` and, first, everything it requires.
fn close_over(name: &'static str, wanted: &mut BTreeMap<&'static str, String>, reason: &str) -> Result<(), SelectionError> {
    let spec = lookup(name).ok_or_else(|| SelectionError::UnknownKext(name.to_string()))?;
    for dependency in spec.requires {
        if !wanted.contains_key(dependency) {
            let dep = lookup(dependency).ok_or_else(|| SelectionError::UnknownKext(dependency.to_string()))?;
            close_over(dep.name, wanted, &format!("required by {}", name))?;
        }
    }
    wanted.entry(spec.name).or_insert_with(|| reason.to_string());
    Ok(())
}

/// Evaluate the catalog against `ctx`.
///
/// `overrides` forces individual kexts on or off by name. Dependencies of a
/// selected kext are always pulled in.
pub fn select_kexts(ctx: &KextContext, overrides: &BTreeMap<String, bool>) -> Result<KextSelection, SelectionError> {
    if let Some(unknown) = overrides.keys().find(|name| lookup(name).is_none()) {
        return Err(SelectionError::UnknownKext(unknown.clone()));
    }

    let mut selection = KextSelection::default();
    let mut wanted: BTreeMap<&'static str, String> = BTreeMap::new();

    for spec in KEXT_CATALOG {
        let matched = (spec.required_by)(ctx);
        let wanted_here = overrides.get(spec.name).copied().unwrap_or(matched);
        if !wanted_here {
            continue;
        }
        if !spec.supports(ctx.target) {
            if overrides.get(spec.name) == Some(&true) {
                selection
                    .diagnostics
                    .push(format!("{} does not load on kernel {}; not installed", spec.name, ctx.target.major));
            }
            continue;
        }
        let reason = if matched { "matched hardware" } else { "user override" };
        close_over(spec.name, &mut wanted, reason)?;
    }

    for spec in KEXT_CATALOG {
        let reason = match wanted.get(spec.name) {
            Some(r) => r.clone(),
            None => continue,
        };
        let source = match spec.source_for(ctx.target) {
            Some(s) => s,
            None => {
                let message = format!("No build of {} covers kernel {}", spec.name, ctx.target.major);
                log::warn!("[KextSelector] {}", message);
                selection.diagnostics.push(message);
                continue;
            }
        };
        if spec.force_load {
            selection.needs_extended = true;
        }
        log::debug!("[KextSelector] {} ({}): {}", spec.name, source, reason);
        selection.kexts.push(SelectedKext {
            spec,
            source,
            force_load: spec.force_load,
            reason,
        });
    }

    log::info!(
        target: "parsed",
        "[KextSelector] {} kext(s) selected{}",
        selection.kexts.len(),
        if selection.needs_extended { " (extended support)" } else { "" }
    );
    Ok(selection)
}

/// Pick the AppleALC layout for the first kept audio device.
///
/// An existing `layout_id` is reused. Otherwise the codec table supplies
/// candidates for the platform; with several, the user chooses and the
/// first is the default. The choice is written back into `hardware`.
pub fn select_audio_layout(
    hardware: &mut CustomizedHardware,
    prompter: &dyn Prompter,
    diagnostics: &mut Vec<String>,
) -> Result<Option<u8>, PipelineError> {
    let platform = hardware.platform();
    let device = match hardware.devices_in_mut(DeviceCategory::Sound).next() {
        Some(d) => d,
        None => return Ok(None),
    };
    let name = device.name.clone();
    let codec = device.device_id.as_deref().and_then(codecs::lookup);

    let (endpoints, layout_id) = match &mut device.kind {
        DeviceKind::Sound { endpoints, layout_id } => (endpoints.clone(), layout_id),
        _ => return Ok(None),
    };
    if let Some(existing) = *layout_id {
        log::debug!("[KextSelector] Reusing layout-id {} for {}", existing, name);
        return Ok(Some(existing));
    }

    let codec = match codec {
        Some(c) => c,
        None => {
            let message = format!("No known layout for audio codec {}; layout-id left unset", name);
            log::warn!("[KextSelector] {}", message);
            diagnostics.push(message);
            return Ok(None);
        }
    };
    let candidates = codecs::candidates(codec, platform);
    let chosen = match candidates {
        [] => {
            diagnostics.push(format!("Codec {} has no layouts", codec.name));
            return Ok(None);
        }
        [only] => *only,
        many => {
            let options: Vec<String> = many.iter().map(|id| format!("layout-id {}", id)).collect();
            let text = if endpoints.is_empty() {
                format!("Several layouts suit {} ({}). Choose one:", name, codec.name)
            } else {
                format!(
                    "Several layouts suit {} ({}, outputs: {}). Choose one:",
                    name,
                    codec.name,
                    endpoints.join(", ")
                )
            };
            let index = ask_choice(
                prompter,
                Prompt::choice(PromptTopic::AudioLayout, "Audio layout", text, options, 0),
            )?;
            many.get(index).copied().unwrap_or(many[0])
        }
    };
    *layout_id = Some(chosen);
    log::info!(target: "parsed", "[KextSelector] Audio layout-id {} for {}", chosen, codec.name);
    Ok(Some(chosen))
}
