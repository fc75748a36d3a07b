//! Selection engine: SMBIOS model, ACPI patches and kexts.
//!
//! [`select`] runs the three selectors in order. The SMBIOS model and the
//! audio layout are settled first because both may prompt. Patches and
//! kexts are then resolved together through [`resolve::fixed_point`].

pub mod acpi;
pub mod kexts;
pub mod resolve;
pub mod smbios;

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::acpi::{AcpiNamespace, AcpiTables};
use crate::error::PipelineError;
use crate::models::{CustomizedHardware, DisabledDevices};
use crate::ui::Prompter;
use crate::version::Version;

pub use acpi::{select_patches, AcpiAdd, AcpiDelete, BinaryPatch, PatchContext, PatchSelection};
pub use kexts::{select_audio_layout, select_kexts, KextContext, KextSelection, SelectedKext};
pub use smbios::{select_smbios, PlatformIdentity, SmbiosChoice, SmbiosOverrides};

/// User adjustments applied before emission.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionOptions {
    /// Patch id -> checked.
    pub patch_overrides: BTreeMap<String, bool>,
    /// Kext name -> selected.
    pub kext_overrides: BTreeMap<String, bool>,
    /// DSDT renames authored by the user, appended to `ACPI.Patch`.
    pub user_patches: Vec<BinaryPatch>,
}

/// Everything the selectors decided for one run.
#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    pub smbios: SmbiosChoice,
    pub identity: PlatformIdentity,
    pub patches: PatchSelection,
    pub kexts: KextSelection,
    pub audio_layout: Option<u8>,
    /// Customizer's flag combined with force-loaded kexts.
    pub needs_extended: bool,
    pub rounds: usize,
    pub diagnostics: Vec<String>,
}

/// Run every selector.
///
/// `hardware` is mutable only so the chosen audio layout can be persisted
/// for later passes.
#[allow(clippy::too_many_arguments)]
pub fn select(
    hardware: &mut CustomizedHardware,
    disabled: &DisabledDevices,
    needs_extended: bool,
    target: Version,
    tables: &AcpiTables,
    options: &SelectionOptions,
    prompter: &dyn Prompter,
) -> Result<Selection, PipelineError> {
    let mut diagnostics = Vec::new();

    // STEP 1: interactive choices
    let audio_layout = select_audio_layout(hardware, prompter, &mut diagnostics)?;
    let smbios = select_smbios(hardware, target, prompter)?;
    diagnostics.extend(smbios.warnings.iter().cloned());

    // STEP 2: patches and kexts to a fixed point over the kext set
    let hardware: &CustomizedHardware = hardware;
    let namespace = AcpiNamespace::scan_all(tables.iter());
    let mut last: Option<(PatchSelection, KextSelection)> = None;
    let (_, rounds) = resolve::fixed_point(BTreeSet::new(), resolve::MAX_ROUNDS, |kext_names: &BTreeSet<String>| {
        // Force-loaded kexts from the previous round count as extended support
        let extended_so_far = needs_extended || last.as_ref().is_some_and(|(_, kexts)| kexts.needs_extended);
        let patch_ctx = PatchContext {
            hardware,
            disabled,
            smbios: smbios.model,
            target,
            tables,
            namespace: &namespace,
            kexts: kext_names,
        };
        let patches = select_patches(&patch_ctx, &options.patch_overrides, &options.user_patches)?;

        let checked: BTreeSet<String> = patches.checked_ids().into_iter().map(String::from).collect();
        let kext_ctx = KextContext {
            hardware,
            disabled,
            smbios: smbios.model,
            target,
            needs_extended: extended_so_far,
            namespace: &namespace,
            patches: &checked,
            companions: &patches.companion_kexts,
        };
        let kexts = select_kexts(&kext_ctx, &options.kext_overrides)?;
        let names = kexts.names();
        last = Some((patches, kexts));
        Ok(names)
    })?;
    let (patches, kexts) = last.ok_or_else(|| PipelineError::MissingInput("selection produced no result".into()))?;
    diagnostics.extend(patches.warnings.iter().cloned());
    diagnostics.extend(kexts.diagnostics.iter().cloned());

    // STEP 3: identity
    let identity = PlatformIdentity::derive(hardware, smbios.model);
    let needs_extended = needs_extended || kexts.needs_extended;

    log::info!(
        target: "parsed",
        "[Selection] {} with {} patch(es), {} kext(s){}",
        smbios.model.name,
        patches.checked_ids().len(),
        kexts.kexts.len(),
        if needs_extended { ", extended support" } else { "" }
    );

    Ok(Selection {
        smbios,
        identity,
        patches,
        kexts,
        audio_layout,
        needs_extended,
        rounds,
        diagnostics,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acpi::aml::{self, Data, Expr, Term};
    use crate::acpi::namespace::INTEL_LPC_ADR;
    use crate::acpi::AcpiTable;
    use crate::models::{
        BiosInfo, CpuInfo, Device, DeviceKind, FirmwareType, GpuType, HardwareReport, MotherboardInfo,
        Platform, SecureBoot,
    };
    use crate::ui::ScriptedUi;

    fn laptop() -> HardwareReport {
        let mut hw = HardwareReport {
            bios: BiosInfo {
                firmware_type: FirmwareType::Uefi,
                secure_boot: SecureBoot::Disabled,
            },
            motherboard: MotherboardInfo {
                manufacturer: "Dell".into(),
                model: "XPS 13 9370".into(),
                chipset: "Kaby Lake-R PCH".into(),
                platform: Platform::Laptop,
            },
            cpu: CpuInfo {
                name: "Intel Core i7-8550U".into(),
                manufacturer: "Intel".into(),
                codename: "Coffee Lake".into(),
                cores: 4,
                threads: 8,
                simd: vec!["SSE4.1".into(), "SSE4.2".into(), "AVX2".into()],
                family: Some(6),
                model: None,
                compatibility: None,
                extended: None,
            },
            devices: BTreeMap::new(),
        };
        hw.insert(
            Device::new(
                "UHD 620",
                DeviceKind::Gpu {
                    gpu_type: GpuType::Integrated,
                    resizable_bar: None,
                },
            )
            .with_device_id("8086-5917"),
        );
        hw
    }

    fn tables() -> AcpiTables {
        let terms = vec![Term::scope(
            "\\_SB",
            vec![Term::device(
                "PCI0",
                vec![
                    Term::name("_HID", Data::EisaId("PNP0A08".into())),
                    Term::device(
                        "LPCB",
                        vec![
                            Term::name("_ADR", Data::Int(INTEL_LPC_ADR)),
                            Term::device(
                                "BAT0",
                                vec![
                                    Term::name("_HID", Data::EisaId("PNP0C0A".into())),
                                    Term::method("_BST", 0, vec![Term::Return(Expr::int(0))]),
                                ],
                            ),
                        ],
                    ),
                ],
            )],
        )];
        let bytes = aml::definition_block(b"DSDT", "LAPTOP", &aml::encode_terms(&terms));
        AcpiTables::from_tables(vec![AcpiTable::from_bytes("DSDT.aml", bytes).unwrap()]).unwrap()
    }

    #[test]
    fn test_battery_patch_pulls_companion_kext() {
        let mut hw = laptop();
        let ui = ScriptedUi::new();
        let selection = select(
            &mut hw,
            &DisabledDevices::new(),
            false,
            Version::upper(23),
            &tables(),
            &SelectionOptions::default(),
            &ui,
        )
        .unwrap();
        assert!(selection.patches.is_checked("BATP"));
        assert!(selection.kexts.contains("ECEnabler"));
        // PNLF waits for WhateverGreen from the previous round
        assert!(selection.patches.is_checked("PNLF"));
        assert!(selection.kexts.contains("SMCLightSensor"));
        assert!(selection.rounds >= 2 && selection.rounds <= resolve::MAX_ROUNDS);
        assert!(!selection.needs_extended);
    }

    #[test]
    fn test_forced_kext_pulls_in_extended_support_kexts() {
        let mut hw = laptop();
        let options = SelectionOptions {
            kext_overrides: BTreeMap::from([("IOSkywalkFamily".to_string(), true)]),
            ..SelectionOptions::default()
        };
        let selection = select(
            &mut hw,
            &DisabledDevices::new(),
            false,
            Version::upper(23),
            &tables(),
            &options,
            &ScriptedUi::new(),
        )
        .unwrap();
        assert!(selection.kexts.contains("IOSkywalkFamily"));
        assert!(selection.needs_extended);
        assert!(selection.kexts.contains("AMFIPass"));
        assert!(selection.kexts.contains("RestrictEvents"));
    }

    #[test]
    fn test_selection_is_deterministic() {
        let run = || {
            let mut hw = laptop();
            select(
                &mut hw,
                &DisabledDevices::new(),
                false,
                Version::upper(23),
                &tables(),
                &SelectionOptions::default(),
                &ScriptedUi::new(),
            )
            .unwrap()
        };
        assert_eq!(run(), run());
    }
}
