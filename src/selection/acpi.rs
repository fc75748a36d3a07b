//! ACPI patch catalog and selector.
//!
//! Every catalog entry carries its guard and emitter as plain function
//! pointers. Guards decide the default `checked` state; emitters build the
//! `Add`/`Delete`/`Patch` fragments. Emitters share a [`PatchEnv`] so a later
//! patch can reuse a path resolved by an earlier one (the LPC bridge, the CPU
//! scope).

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::{BTreeMap, BTreeSet};

use crate::acpi::aml::{self, Data, Expr, ObjectType, Term};
use crate::acpi::{AcpiNamespace, AcpiTables};
use crate::error::SelectionError;
use crate::kb::cpu::{self, CpuVendor};
use crate::kb::smbios::SmbiosModel;
use crate::models::{CustomizedHardware, DeviceCategory, DeviceKind, DisabledDevices, GpuType};
use crate::plist::{from_hex, to_hex};
use crate::version::Version;

/// Everything a guard or emitter may look at.
pub struct PatchContext<'a> {
    pub hardware: &'a CustomizedHardware,
    pub disabled: &'a DisabledDevices,
    pub smbios: &'a SmbiosModel,
    pub target: Version,
    pub tables: &'a AcpiTables,
    pub namespace: &'a AcpiNamespace,
    /// Kext names selected by the previous resolver round.
    pub kexts: &'a BTreeSet<String>,
}

impl PatchContext<'_> {
    fn is_intel(&self) -> bool {
        cpu::vendor_of(&self.hardware.cpu) == CpuVendor::Intel
    }

    fn intel_generation(&self) -> u32 {
        cpu::intel_generation(&self.hardware.cpu).unwrap_or(0)
    }
}

/// Names resolved while emitting, visible to later emitters.
#[derive(Debug, Clone, Default)]
pub struct PatchEnv {
    pub lpc: Option<String>,
    pub cpu_paths: Vec<String>,
}

impl PatchEnv {
    fn lpc_path(&mut self, ctx: &PatchContext, id: &str) -> Result<String, SelectionError> {
        if let Some(path) = &self.lpc {
            return Ok(path.clone());
        }
        let path = ctx
            .namespace
            .lpc_bus()
            .map(|d| d.path.clone())
            .ok_or_else(|| SelectionError::MissingAcpiTable {
                id: id.to_string(),
                table: "DSDT (LPC bridge)".to_string(),
            })?;
        self.lpc = Some(path.clone());
        Ok(path)
    }

    fn cpu_path(&mut self, ctx: &PatchContext, id: &str) -> Result<String, SelectionError> {
        if self.cpu_paths.is_empty() {
            self.cpu_paths = ctx.namespace.processors();
        }
        self.cpu_paths
            .first()
            .cloned()
            .ok_or_else(|| SelectionError::MissingAcpiTable {
                id: id.to_string(),
                table: "DSDT (processor objects)".to_string(),
            })
    }
}

/// An `ACPI.Add` entry together with its table bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcpiAdd {
    pub file_name: String,
    pub comment: String,
    pub signature: [u8; 4],
    pub oem_table_id: String,
    pub bytes: Vec<u8>,
}

impl AcpiAdd {
    fn ssdt(table_id: &str, comment: &str, terms: &[Term]) -> Self {
        AcpiAdd {
            file_name: format!("SSDT-{}.aml", table_id),
            comment: comment.to_string(),
            signature: *b"SSDT",
            oem_table_id: table_id.to_string(),
            bytes: aml::ssdt(table_id, terms),
        }
    }

    pub fn length(&self) -> usize {
        self.bytes.len()
    }

    fn key(&self) -> ([u8; 4], String, usize) {
        (self.signature, self.oem_table_id.clone(), self.length())
    }
}

/// An `ACPI.Delete` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcpiDelete {
    pub comment: String,
    pub table_signature: [u8; 4],
    pub oem_table_id: [u8; 8],
    pub table_length: u32,
    pub all: bool,
}

fn hex_out<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&to_hex(bytes))
}

fn hex_in<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
    let text = String::deserialize(d)?;
    from_hex(&text).ok_or_else(|| serde::de::Error::custom(format!("invalid hex: {}", text)))
}

fn dsdt_signature() -> String {
    "DSDT".to_string()
}

/// An `ACPI.Patch` binary rename. User-authored patches are read from JSON
/// with hex-encoded `find`/`replace`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinaryPatch {
    pub comment: String,
    #[serde(serialize_with = "hex_out", deserialize_with = "hex_in")]
    pub find: Vec<u8>,
    #[serde(serialize_with = "hex_out", deserialize_with = "hex_in")]
    pub replace: Vec<u8>,
    #[serde(default)]
    pub skip: u32,
    #[serde(default)]
    pub limit: u32,
    #[serde(default)]
    pub count: u32,
    #[serde(default = "dsdt_signature")]
    pub table_signature: String,
    #[serde(default)]
    pub oem_table_id: String,
}

impl BinaryPatch {
    pub fn rename(comment: &str, find: &[u8], replace: &[u8]) -> Self {
        BinaryPatch {
            comment: comment.to_string(),
            find: find.to_vec(),
            replace: replace.to_vec(),
            skip: 0,
            limit: 0,
            count: 0,
            table_signature: dsdt_signature(),
            oem_table_id: String::new(),
        }
    }

    fn key(&self) -> (Vec<u8>, Vec<u8>, u32, u32, String, String) {
        (
            self.find.clone(),
            self.replace.clone(),
            self.skip,
            self.limit,
            self.table_signature.clone(),
            self.oem_table_id.clone(),
        )
    }
}

/// What one patch contributes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AcpiFragment {
    pub add: Vec<AcpiAdd>,
    pub delete: Vec<AcpiDelete>,
    pub patch: Vec<BinaryPatch>,
}

impl AcpiFragment {
    fn add(add: AcpiAdd) -> Self {
        AcpiFragment {
            add: vec![add],
            ..Default::default()
        }
    }
}

pub type GuardFn = fn(&PatchContext) -> Result<bool, SelectionError>;
pub type EmitFn = fn(&PatchContext, &mut PatchEnv) -> Result<Option<AcpiFragment>, SelectionError>;

/// A catalog entry.
pub struct AcpiPatch {
    pub id: &'static str,
    pub name: &'static str,
    pub guard: GuardFn,
    pub emit: EmitFn,
    /// Kext that must be loaded whenever this patch is active.
    pub companion_kext: Option<&'static str>,
}

/// Catalog in emission order.
pub static ACPI_PATCHES: &[AcpiPatch] = &[
    AcpiPatch {
        id: "EC-USBX",
        name: "Embedded controller and USB power",
        guard: guard_ec_usbx,
        emit: emit_ec_usbx,
        companion_kext: None,
    },
    AcpiPatch {
        id: "CPUR",
        name: "Processor objects for ACPI0007 firmware",
        guard: guard_cpur,
        emit: emit_cpur,
        companion_kext: None,
    },
    AcpiPatch {
        id: "PLUG",
        name: "XCPM plugin-type",
        guard: guard_plug,
        emit: emit_plug,
        companion_kext: None,
    },
    AcpiPatch {
        id: "PMC",
        name: "300-series NVRAM power management controller",
        guard: guard_pmc,
        emit: emit_pmc,
        companion_kext: None,
    },
    AcpiPatch {
        id: "AWAC",
        name: "System clock (AWAC to RTC)",
        guard: guard_awac,
        emit: emit_awac,
        companion_kext: None,
    },
    AcpiPatch {
        id: "GPRW",
        name: "Instant wake fix",
        guard: guard_gprw,
        emit: emit_gprw,
        companion_kext: None,
    },
    AcpiPatch {
        id: "XOSI",
        name: "Windows OSI emulation",
        guard: guard_xosi,
        emit: emit_xosi,
        companion_kext: None,
    },
    AcpiPatch {
        id: "PNLF",
        name: "Backlight control",
        guard: guard_pnlf,
        emit: emit_pnlf,
        companion_kext: None,
    },
    AcpiPatch {
        id: "ALS0",
        name: "Fake ambient light sensor",
        guard: guard_als0,
        emit: emit_als0,
        companion_kext: None,
    },
    AcpiPatch {
        id: "SBUS-MCHC",
        name: "SMBus and memory controller",
        guard: guard_sbus,
        emit: emit_sbus,
        companion_kext: None,
    },
    AcpiPatch {
        id: "IMEI",
        name: "Management engine interface",
        guard: guard_imei,
        emit: emit_imei,
        companion_kext: None,
    },
    AcpiPatch {
        id: "DGPU-OFF",
        name: "Power off unsupported discrete GPU",
        guard: guard_dgpu_off,
        emit: emit_dgpu_off,
        companion_kext: None,
    },
    AcpiPatch {
        id: "DROP-CPUPM",
        name: "Drop firmware CPU power management tables",
        guard: guard_drop_cpupm,
        emit: emit_drop_cpupm,
        companion_kext: None,
    },
    AcpiPatch {
        id: "BATP",
        name: "Battery status",
        guard: guard_batp,
        emit: emit_batp,
        companion_kext: Some("ECEnabler"),
    },
];

pub fn lookup(id: &str) -> Option<&'static AcpiPatch> {
    ACPI_PATCHES.iter().find(|p| p.id == id)
}

/// `_DSM` returning a flat property package.
fn dsm_properties(properties: Vec<(&str, Data)>) -> Term {
    let mut package = Vec::with_capacity(properties.len() * 2);
    for (key, value) in properties {
        package.push(Data::Str(key.to_string()));
        package.push(value);
    }
    Term::method(
        "_DSM",
        4,
        vec![
            Term::If(
                Expr::not(Expr::Arg(2)),
                vec![Term::Return(Expr::Data(Data::Buffer(vec![0x03])))],
            ),
            Term::Return(Expr::Data(Data::Package(package))),
        ],
    )
}

fn parent_of(path: &str) -> String {
    match path.rfind('.') {
        Some(i) => path[..i].to_string(),
        None => "\\".to_string(),
    }
}

fn join(parent: &str, name: &str) -> String {
    if parent == "\\" {
        format!("\\{}", name)
    } else {
        format!("{}.{}", parent, name)
    }
}

// EC-USBX

fn guard_ec_usbx(_ctx: &PatchContext) -> Result<bool, SelectionError> {
    Ok(true)
}

fn emit_ec_usbx(ctx: &PatchContext, env: &mut PatchEnv) -> Result<Option<AcpiFragment>, SelectionError> {
    let lpc = env.lpc_path(ctx, "EC-USBX")?;
    let mut terms = vec![Term::external(&lpc, ObjectType::Device)];

    // macOS expects a device literally named EC; a differently named
    // PNP0C09 device stays in place and a fake one is added beside it
    let has_ec = ctx.namespace.devices().iter().any(|d| d.name() == "EC");
    if !has_ec {
        terms.push(Term::scope(
            &lpc,
            vec![Term::device(
                "EC",
                vec![
                    Term::name("_HID", Data::Str("ACID0001".into())),
                    Term::darwin_sta(0x0F, 0),
                ],
            )],
        ));
    }
    terms.push(Term::scope(
        "\\_SB",
        vec![Term::device(
            "USBX",
            vec![
                Term::name("_ADR", Data::Int(0)),
                dsm_properties(vec![
                    ("kUSBSleepPowerSupply", Data::Int(0x13EC)),
                    ("kUSBSleepPortCurrentLimit", Data::Int(0x0834)),
                    ("kUSBWakePowerSupply", Data::Int(0x13EC)),
                    ("kUSBWakePortCurrentLimit", Data::Int(0x0834)),
                ]),
                Term::darwin_sta(0x0F, 0),
            ],
        )],
    ));
    Ok(Some(AcpiFragment::add(AcpiAdd::ssdt("EC-USBX", "Fake EC and USB power properties", &terms))))
}

// CPUR

fn guard_cpur(ctx: &PatchContext) -> Result<bool, SelectionError> {
    Ok(ctx.is_intel() && !ctx.namespace.has_legacy_processors() && !ctx.namespace.processor_devices().is_empty())
}

fn emit_cpur(ctx: &PatchContext, env: &mut PatchEnv) -> Result<Option<AcpiFragment>, SelectionError> {
    let count = ctx.namespace.processor_devices().len().min(0xFF);
    let processors: Vec<Term> = (0..count)
        .map(|i| Term::Processor(format!("CP{:02X}", i), i as u8, vec![]))
        .collect();
    env.cpu_paths = (0..count).map(|i| format!("\\_SB.CP{:02X}", i)).collect();
    let terms = vec![Term::scope("\\_SB", vec![Term::If(Expr::is_darwin(), processors)])];
    Ok(Some(AcpiFragment::add(AcpiAdd::ssdt("CPUR", "Legacy processor objects", &terms))))
}

// PLUG

fn guard_plug(ctx: &PatchContext) -> Result<bool, SelectionError> {
    // XCPM exists from Haswell on; older parts use the firmware tables
    Ok(ctx.is_intel() && ctx.intel_generation() >= 4)
}

fn emit_plug(ctx: &PatchContext, env: &mut PatchEnv) -> Result<Option<AcpiFragment>, SelectionError> {
    let cpu = env.cpu_path(ctx, "PLUG")?;
    let terms = vec![
        Term::external(&cpu, ObjectType::Processor),
        Term::scope(&cpu, vec![dsm_properties(vec![("plugin-type", Data::Int(1))])]),
    ];
    Ok(Some(AcpiFragment::add(AcpiAdd::ssdt("PLUG", "XCPM power management", &terms))))
}

// PMC

const PMC_CHIPSETS: &[&str] = &["B360", "B365", "H310", "H370", "Q370", "Z370", "Z390"];

fn guard_pmc(ctx: &PatchContext) -> Result<bool, SelectionError> {
    let chipset = ctx.hardware.motherboard.chipset.to_uppercase();
    Ok(ctx.is_intel() && PMC_CHIPSETS.iter().any(|c| chipset.contains(c)))
}

fn emit_pmc(ctx: &PatchContext, env: &mut PatchEnv) -> Result<Option<AcpiFragment>, SelectionError> {
    let lpc = env.lpc_path(ctx, "PMC")?;
    // Memory32Fixed (ReadWrite, 0xFE000000, 0x00010000)
    let crs = vec![
        0x86, 0x09, 0x00, 0x01, 0x00, 0x00, 0x00, 0xFE, 0x00, 0x00, 0x01, 0x00, 0x79, 0x00,
    ];
    let terms = vec![
        Term::external(&lpc, ObjectType::Device),
        Term::scope(
            &lpc,
            vec![Term::device(
                "PMCR",
                vec![
                    Term::name("_HID", Data::EisaId("APP9876".into())),
                    Term::name("_CRS", Data::Buffer(crs)),
                    Term::darwin_sta(0x0B, 0),
                ],
            )],
        ),
    ];
    Ok(Some(AcpiFragment::add(AcpiAdd::ssdt("PMC", "Native NVRAM on 300-series", &terms))))
}

// AWAC

fn guard_awac(ctx: &PatchContext) -> Result<bool, SelectionError> {
    Ok(ctx.namespace.find_by_hid("ACPI000E").is_some())
}

fn emit_awac(ctx: &PatchContext, env: &mut PatchEnv) -> Result<Option<AcpiFragment>, SelectionError> {
    let awac = ctx
        .namespace
        .find_by_hid("ACPI000E")
        .map(|d| d.path.clone())
        .ok_or_else(|| SelectionError::MissingAcpiTable {
            id: "AWAC".to_string(),
            table: "DSDT (ACPI000E device)".to_string(),
        })?;
    let lpc = env.lpc_path(ctx, "AWAC")?;
    let mut terms = vec![
        Term::external(&awac, ObjectType::Device),
        Term::scope(&awac, vec![Term::darwin_sta(0, 0x0F)]),
    ];
    if ctx.namespace.find_by_hid("PNP0B00").is_none() {
        // IO (Decode16, 0x0070, 0x0070, 0x01, 0x08) + IRQNoFlags {8}
        let crs = vec![
            0x47, 0x01, 0x70, 0x00, 0x70, 0x00, 0x01, 0x08, 0x22, 0x00, 0x01, 0x79, 0x00,
        ];
        terms.push(Term::external(&lpc, ObjectType::Device));
        terms.push(Term::scope(
            &lpc,
            vec![Term::device(
                "RTC0",
                vec![
                    Term::name("_HID", Data::EisaId("PNP0B00".into())),
                    Term::name("_CRS", Data::Buffer(crs)),
                    Term::darwin_sta(0x0F, 0),
                ],
            )],
        ));
    }
    Ok(Some(AcpiFragment::add(AcpiAdd::ssdt("AWAC", "Legacy RTC for AWAC firmware", &terms))))
}

// GPRW

fn wake_method(ctx: &PatchContext) -> Option<&'static str> {
    ["GPRW", "UPRW"]
        .into_iter()
        .find(|name| ctx.namespace.has_method_named(name))
}

fn guard_gprw(ctx: &PatchContext) -> Result<bool, SelectionError> {
    Ok(wake_method(ctx).is_some())
}

fn emit_gprw(ctx: &PatchContext, _env: &mut PatchEnv) -> Result<Option<AcpiFragment>, SelectionError> {
    let name = wake_method(ctx).ok_or_else(|| SelectionError::MissingAcpiTable {
        id: "GPRW".to_string(),
        table: "DSDT (GPRW method)".to_string(),
    })?;
    let path = ctx.namespace.method_path(name).unwrap_or(name).to_string();
    let renamed = format!("X{}", &name[1..]);
    let parent = parent_of(&path);
    let renamed_path = join(&parent, &renamed);

    let mut find = name.as_bytes().to_vec();
    find.push(0x02);
    let mut replace = renamed.as_bytes().to_vec();
    replace.push(0x02);

    let wake_guard = |gpe: u64| {
        Term::If(
            Expr::equal(Expr::Arg(0), Expr::int(gpe)),
            vec![Term::Return(Expr::Data(Data::Package(vec![Data::Int(gpe), Data::Int(0)])))],
        )
    };
    let terms = vec![
        Term::External(renamed_path.clone(), ObjectType::Method, 2),
        Term::scope(
            &parent,
            vec![Term::method(
                name,
                2,
                vec![
                    Term::If(Expr::is_darwin(), vec![wake_guard(0x6D), wake_guard(0x0D)]),
                    Term::Return(Expr::Call(renamed_path, vec![Expr::Arg(0), Expr::Arg(1)])),
                ],
            )],
        ),
    ];
    Ok(Some(AcpiFragment {
        add: vec![AcpiAdd::ssdt(name, "Instant wake fix", &terms)],
        delete: Vec::new(),
        patch: vec![BinaryPatch::rename(&format!("{} to {}", name, renamed), &find, &replace)],
    }))
}

// XOSI

const WINDOWS_OSI: &[&str] = &[
    "Windows 2001",
    "Windows 2006",
    "Windows 2009",
    "Windows 2012",
    "Windows 2013",
    "Windows 2015",
];

fn guard_xosi(ctx: &PatchContext) -> Result<bool, SelectionError> {
    let dsdt = ctx.tables.require(b"DSDT").map_err(|_| SelectionError::MissingAcpiTable {
        id: "XOSI".to_string(),
        table: "DSDT".to_string(),
    })?;
    Ok(ctx.hardware.is_laptop() && dsdt.contains(b"_OSI"))
}

fn emit_xosi(_ctx: &PatchContext, _env: &mut PatchEnv) -> Result<Option<AcpiFragment>, SelectionError> {
    let windows = WINDOWS_OSI
        .iter()
        .map(|name| Expr::equal(Expr::Arg(0), Expr::string(name)))
        .reduce(Expr::or)
        .unwrap_or_else(|| Expr::int(0));
    let terms = vec![Term::method(
        "XOSI",
        1,
        vec![
            Term::If(
                Expr::is_darwin(),
                vec![Term::Return(Expr::or(
                    Expr::equal(Expr::Arg(0), Expr::string("Darwin")),
                    windows,
                ))],
            ),
            Term::Return(Expr::Call("\\_OSI".to_string(), vec![Expr::Arg(0)])),
        ],
    )];
    Ok(Some(AcpiFragment {
        add: vec![AcpiAdd::ssdt("XOSI", "Report Windows to firmware", &terms)],
        delete: Vec::new(),
        patch: vec![BinaryPatch::rename("_OSI to XOSI", b"_OSI", b"XOSI")],
    }))
}

// PNLF

/// Backlight control is driven by WhateverGreen; without it the device is inert.
fn guard_pnlf(ctx: &PatchContext) -> Result<bool, SelectionError> {
    Ok(ctx.hardware.is_laptop() && ctx.hardware.has_integrated_gpu() && ctx.kexts.contains("WhateverGreen"))
}

fn emit_pnlf(ctx: &PatchContext, _env: &mut PatchEnv) -> Result<Option<AcpiFragment>, SelectionError> {
    let uid = match ctx.intel_generation() {
        0..=3 => 0x0E,
        4..=7 => 0x10,
        _ => 0x13,
    };
    let terms = vec![Term::scope(
        "\\_SB",
        vec![Term::device(
            "PNLF",
            vec![
                Term::name("_HID", Data::EisaId("APP0002".into())),
                Term::name("_CID", Data::Str("backlight".into())),
                Term::name("_UID", Data::Int(uid)),
                Term::darwin_sta(0x0B, 0),
            ],
        )],
    )];
    Ok(Some(AcpiFragment::add(AcpiAdd::ssdt("PNLF", "Backlight device", &terms))))
}

// ALS0

fn guard_als0(ctx: &PatchContext) -> Result<bool, SelectionError> {
    let has_sensor = ctx.namespace.find_by_hid("ACPI0008").is_some();
    Ok(ctx.hardware.is_laptop() && !has_sensor)
}

fn emit_als0(_ctx: &PatchContext, _env: &mut PatchEnv) -> Result<Option<AcpiFragment>, SelectionError> {
    let terms = vec![Term::scope(
        "\\_SB",
        vec![Term::device(
            "ALS0",
            vec![
                Term::name("_HID", Data::Str("ACPI0008".into())),
                Term::name("_CID", Data::Str("smc-als".into())),
                Term::name("_ALI", Data::Int(0x012C)),
                Term::name(
                    "_ALR",
                    Data::Package(vec![Data::Package(vec![Data::Int(0x64), Data::Int(0x012C)])]),
                ),
                Term::darwin_sta(0x0F, 0),
            ],
        )],
    )];
    Ok(Some(AcpiFragment::add(AcpiAdd::ssdt("ALS0", "Fake ambient light sensor", &terms))))
}

// SBUS-MCHC

fn guard_sbus(ctx: &PatchContext) -> Result<bool, SelectionError> {
    Ok(ctx.is_intel() && ctx.namespace.smbus().is_some())
}

fn emit_sbus(ctx: &PatchContext, _env: &mut PatchEnv) -> Result<Option<AcpiFragment>, SelectionError> {
    let missing = |what: &str| SelectionError::MissingAcpiTable {
        id: "SBUS-MCHC".to_string(),
        table: format!("DSDT ({})", what),
    };
    let root = ctx.namespace.pci_root().ok_or_else(|| missing("PCI root"))?.path.clone();
    let smbus = ctx.namespace.smbus().ok_or_else(|| missing("SMBus"))?.path.clone();

    let mut terms = vec![
        Term::external(&root, ObjectType::Device),
        Term::external(&smbus, ObjectType::Device),
    ];
    if ctx.namespace.host_bridge().is_none() {
        terms.push(Term::scope(
            &root,
            vec![Term::device(
                "MCHC",
                vec![Term::name("_ADR", Data::Int(0)), Term::darwin_sta(0x0F, 0)],
            )],
        ));
    }
    terms.push(Term::scope(
        &smbus,
        vec![Term::device(
            "BUS0",
            vec![
                Term::name("_CID", Data::Str("smbus".into())),
                Term::name("_ADR", Data::Int(0)),
                Term::device(
                    "DVL0",
                    vec![
                        Term::name("_ADR", Data::Int(0x57)),
                        Term::name("_CID", Data::Str("diagsvault".into())),
                        dsm_properties(vec![("address", Data::Int(0x57))]),
                    ],
                ),
                Term::darwin_sta(0x0F, 0),
            ],
        )],
    ));
    Ok(Some(AcpiFragment::add(AcpiAdd::ssdt("SBUS-MCHC", "SMBus and memory controller", &terms))))
}

// IMEI

const IMEI_ADR: u64 = 0x0016_0000;

fn guard_imei(ctx: &PatchContext) -> Result<bool, SelectionError> {
    let generation = ctx.intel_generation();
    let present = ctx
        .namespace
        .pci_root()
        .map(|root| ctx.namespace.find_child_by_adr(&root.path, IMEI_ADR).is_some())
        .unwrap_or(false);
    Ok(ctx.is_intel() && (2..=3).contains(&generation) && !present)
}

fn emit_imei(ctx: &PatchContext, _env: &mut PatchEnv) -> Result<Option<AcpiFragment>, SelectionError> {
    let root = ctx
        .namespace
        .pci_root()
        .map(|d| d.path.clone())
        .ok_or_else(|| SelectionError::MissingAcpiTable {
            id: "IMEI".to_string(),
            table: "DSDT (PCI root)".to_string(),
        })?;
    let terms = vec![
        Term::external(&root, ObjectType::Device),
        Term::scope(
            &root,
            vec![Term::device(
                "IMEI",
                vec![Term::name("_ADR", Data::Int(IMEI_ADR)), Term::darwin_sta(0x0F, 0)],
            )],
        ),
    ];
    Ok(Some(AcpiFragment::add(AcpiAdd::ssdt("IMEI", "Management engine device", &terms))))
}

// DGPU-OFF

/// ACPI path and power-off method of the first disabled discrete GPU.
fn disabled_dgpu(ctx: &PatchContext) -> Option<(String, &'static str)> {
    ctx.disabled
        .values()
        .filter(|d| d.category() == DeviceCategory::Gpu)
        .filter(|d| matches!(d.kind, DeviceKind::Gpu { gpu_type: GpuType::Discrete, .. }))
        .filter_map(|d| d.acpi_path.clone())
        .find_map(|path| {
            ["_OFF", "_PS3"]
                .into_iter()
                .find(|m| ctx.namespace.has_method(&join(&path, m)))
                .map(|m| (path, m))
        })
}

fn guard_dgpu_off(ctx: &PatchContext) -> Result<bool, SelectionError> {
    Ok(ctx.hardware.is_laptop() && disabled_dgpu(ctx).is_some())
}

fn emit_dgpu_off(ctx: &PatchContext, _env: &mut PatchEnv) -> Result<Option<AcpiFragment>, SelectionError> {
    let (path, method) = disabled_dgpu(ctx).ok_or_else(|| SelectionError::MissingAcpiTable {
        id: "DGPU-OFF".to_string(),
        table: "DSDT (discrete GPU power method)".to_string(),
    })?;
    let off = join(&path, method);
    let terms = vec![
        Term::external(&off, ObjectType::Method),
        Term::device(
            "RMD1",
            vec![
                Term::name("_HID", Data::Str("RMD10000".into())),
                Term::method(
                    "_INI",
                    0,
                    vec![Term::If(Expr::is_darwin(), vec![Term::Eval(Expr::Call(off, vec![]))])],
                ),
            ],
        ),
    ];
    Ok(Some(AcpiFragment::add(AcpiAdd::ssdt("DGPU-OFF", "Disable discrete GPU", &terms))))
}

// DROP-CPUPM

const CPU_PM_TABLE_IDS: &[&str] = &["CpuPm", "Cpu0Ist", "Cpu0Cst"];

fn guard_drop_cpupm(ctx: &PatchContext) -> Result<bool, SelectionError> {
    let has_pm_tables = ctx
        .tables
        .ssdts()
        .any(|t| CPU_PM_TABLE_IDS.iter().any(|id| t.header.oem_table_id_str().starts_with(id)));
    Ok(ctx.is_intel() && ctx.intel_generation() <= 3 && has_pm_tables)
}

fn emit_drop_cpupm(ctx: &PatchContext, _env: &mut PatchEnv) -> Result<Option<AcpiFragment>, SelectionError> {
    let delete: Vec<AcpiDelete> = ctx
        .tables
        .ssdts()
        .filter(|t| CPU_PM_TABLE_IDS.iter().any(|id| t.header.oem_table_id_str().starts_with(id)))
        .map(|t| AcpiDelete {
            comment: format!("Drop {}", t.header.oem_table_id_str()),
            table_signature: *b"SSDT",
            oem_table_id: t.header.oem_table_id,
            table_length: 0,
            all: false,
        })
        .collect();
    Ok(Some(AcpiFragment {
        delete,
        ..Default::default()
    }))
}

// BATP

fn guard_batp(ctx: &PatchContext) -> Result<bool, SelectionError> {
    Ok(ctx.hardware.is_laptop() && ctx.namespace.battery().is_some())
}

/// Only emitted when the battery exposes a status method the kext can hook.
fn emit_batp(ctx: &PatchContext, _env: &mut PatchEnv) -> Result<Option<AcpiFragment>, SelectionError> {
    let battery = match ctx.namespace.battery() {
        Some(b) => b.path.clone(),
        None => return Ok(None),
    };
    let hookable = ["_BIX", "_BIF", "_BST"]
        .iter()
        .any(|m| ctx.namespace.has_method(&join(&battery, m)));
    if !hookable {
        return Ok(None);
    }
    let terms = vec![
        Term::external(&battery, ObjectType::Device),
        Term::scope(&battery, vec![Term::name("BATP", Data::Int(1))]),
    ];
    Ok(Some(AcpiFragment::add(AcpiAdd::ssdt("BATP", "Battery status support", &terms))))
}

/// One catalog entry after selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedPatch {
    pub id: &'static str,
    pub name: &'static str,
    pub checked: bool,
    pub fragment: Option<AcpiFragment>,
}

/// PatchSelector output.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatchSelection {
    pub patches: Vec<SelectedPatch>,
    pub add: Vec<AcpiAdd>,
    pub delete: Vec<AcpiDelete>,
    pub patch: Vec<BinaryPatch>,
    pub companion_kexts: BTreeSet<String>,
    pub warnings: Vec<String>,
}

impl PatchSelection {
    pub fn checked_ids(&self) -> Vec<&'static str> {
        self.patches.iter().filter(|p| p.checked).map(|p| p.id).collect()
    }

    pub fn is_checked(&self, id: &str) -> bool {
        self.patches.iter().any(|p| p.id == id && p.checked)
    }
}

/// Keep the first position of each key, but the last value written to it.
fn dedupe_last_writer<T, K: Ord>(items: Vec<T>, key: impl Fn(&T) -> K) -> Vec<T> {
    let mut out: Vec<T> = Vec::with_capacity(items.len());
    let mut index: BTreeMap<K, usize> = BTreeMap::new();
    for item in items {
        let k = key(&item);
        match index.get(&k) {
            Some(&i) => out[i] = item,
            None => {
                index.insert(k, out.len());
                out.push(item);
            }
        }
    }
    out
}

/// Evaluate the catalog.
///
/// `overrides` toggles individual patches by id; `user_patches` are appended
/// to `Patch[]` verbatim before deduplication.
pub fn select_patches(
    ctx: &PatchContext,
    overrides: &BTreeMap<String, bool>,
    user_patches: &[BinaryPatch],
) -> Result<PatchSelection, SelectionError> {
    if let Some(unknown) = overrides.keys().find(|id| lookup(id).is_none()) {
        return Err(SelectionError::UnknownPatch(unknown.clone()));
    }

    let mut selection = PatchSelection::default();
    let mut env = PatchEnv::default();
    let mut add = Vec::new();
    let mut patch = Vec::new();

    for entry in ACPI_PATCHES {
        let guarded = match (entry.guard)(ctx) {
            Ok(v) => v,
            Err(e) => {
                let message = format!("Patch {} skipped: {}", entry.id, e);
                log::warn!("[PatchSelector] {}", message);
                selection.warnings.push(message);
                selection.patches.push(SelectedPatch {
                    id: entry.id,
                    name: entry.name,
                    checked: false,
                    fragment: None,
                });
                continue;
            }
        };
        let wanted = overrides.get(entry.id).copied().unwrap_or(guarded);
        let fragment = if wanted { (entry.emit)(ctx, &mut env)? } else { None };
        let checked = wanted && fragment.is_some();
        log::debug!("[PatchSelector] {}: guard={} checked={}", entry.id, guarded, checked);

        if let Some(fragment) = &fragment {
            add.extend(fragment.add.iter().cloned());
            selection.delete.extend(fragment.delete.iter().cloned());
            patch.extend(fragment.patch.iter().cloned());
            if let Some(kext) = entry.companion_kext {
                selection.companion_kexts.insert(kext.to_string());
            }
        }
        selection.patches.push(SelectedPatch {
            id: entry.id,
            name: entry.name,
            checked,
            fragment,
        });
    }

    patch.extend(user_patches.iter().cloned());
    selection.add = dedupe_last_writer(add, AcpiAdd::key);
    selection.patch = dedupe_last_writer(patch, BinaryPatch::key);

    log::info!(
        target: "parsed",
        "[PatchSelector] {} patch(es) active: {}",
        selection.checked_ids().len(),
        selection.checked_ids().join(", ")
    );
    Ok(selection)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acpi::namespace::{INTEL_LPC_ADR, INTEL_SMBUS_ADR};
    use crate::acpi::AcpiTable;
    use crate::models::{
        BiosInfo, CpuInfo, Device, FirmwareType, HardwareReport, MotherboardInfo, Platform, SecureBoot,
    };

    fn dsdt(laptop: bool) -> AcpiTable {
        let mut lpc = vec![
            Term::name("_ADR", Data::Int(INTEL_LPC_ADR)),
            Term::device(
                "EC0",
                vec![Term::name("_HID", Data::EisaId("PNP0C09".into()))],
            ),
        ];
        if laptop {
            lpc.push(Term::device(
                "BAT0",
                vec![
                    Term::name("_HID", Data::EisaId("PNP0C0A".into())),
                    Term::method("_BST", 0, vec![Term::Return(Expr::int(0))]),
                ],
            ));
        }
        let terms = vec![
            Term::scope(
                "\\_SB",
                vec![Term::device(
                    "PCI0",
                    vec![
                        Term::name("_HID", Data::EisaId("PNP0A08".into())),
                        Term::device("LPCB", lpc),
                        Term::device("SBUS", vec![Term::name("_ADR", Data::Int(INTEL_SMBUS_ADR))]),
                        Term::device(
                            "AWAC",
                            vec![Term::name("_HID", Data::Str("ACPI000E".into()))],
                        ),
                        Term::method("GPRW", 2, vec![Term::Return(Expr::int(0))]),
                    ],
                )],
            ),
            Term::scope(
                "\\_SB",
                vec![Term::device("PR00", vec![Term::name("_HID", Data::Str("ACPI0007".into()))])],
            ),
            Term::method(
                "OSYS",
                0,
                vec![Term::Return(Expr::Call("_OSI".into(), vec![Expr::string("Windows 2015")]))],
            ),
        ];
        let bytes = aml::definition_block(b"DSDT", "TESTDSDT", &aml::encode_terms(&terms));
        AcpiTable::from_bytes("DSDT.aml", bytes).unwrap()
    }

    fn hardware(platform: Platform) -> HardwareReport {
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
                name: "Intel Core i7-9700K".into(),
                manufacturer: "Intel".into(),
                codename: "Coffee Lake".into(),
                cores: 8,
                threads: 8,
                simd: vec!["SSE4.2".into()],
                family: Some(6),
                model: None,
                compatibility: None,
                extended: None,
            },
            devices: BTreeMap::new(),
        };
        hw.insert(
            Device::new(
                "UHD 630",
                DeviceKind::Gpu {
                    gpu_type: GpuType::Integrated,
                    resizable_bar: None,
                },
            )
            .with_device_id("8086-3e92"),
        );
        hw
    }

    struct Fixture {
        hw: HardwareReport,
        disabled: DisabledDevices,
        tables: AcpiTables,
        namespace: AcpiNamespace,
        kexts: BTreeSet<String>,
    }

    impl Fixture {
        fn new(platform: Platform) -> Self {
            let tables = AcpiTables::from_tables(vec![dsdt(platform == Platform::Laptop)]).unwrap();
            let namespace = AcpiNamespace::scan_all(tables.iter());
            Fixture {
                hw: hardware(platform),
                disabled: DisabledDevices::new(),
                tables,
                namespace,
                kexts: BTreeSet::new(),
            }
        }

        fn ctx(&self) -> PatchContext<'_> {
            PatchContext {
                hardware: &self.hw,
                disabled: &self.disabled,
                smbios: crate::kb::smbios::lookup("iMac19,1").unwrap(),
                target: Version::upper(23),
                tables: &self.tables,
                namespace: &self.namespace,
                kexts: &self.kexts,
            }
        }
    }

    #[test]
    fn test_desktop_selection() {
        let fx = Fixture::new(Platform::Desktop);
        let selection = select_patches(&fx.ctx(), &BTreeMap::new(), &[]).unwrap();
        let ids = selection.checked_ids();
        for expected in ["EC-USBX", "CPUR", "PLUG", "PMC", "AWAC", "GPRW", "SBUS-MCHC"] {
            assert!(ids.contains(&expected), "missing {}", expected);
        }
        for absent in ["XOSI", "PNLF", "ALS0", "IMEI", "BATP"] {
            assert!(!ids.contains(&absent), "unexpected {}", absent);
        }
        assert!(selection.companion_kexts.is_empty());
        assert!(selection
            .patch
            .iter()
            .any(|p| p.find == b"GPRW\x02".to_vec() && p.replace == b"XPRW\x02".to_vec()));
        // PLUG reuses the CPU scope created by CPUR
        let plug = selection.add.iter().find(|a| a.oem_table_id == "PLUG").unwrap();
        assert!(plug.bytes.windows(4).any(|w| w == b"CP00"));
        for table in &selection.add {
            assert_eq!(crate::acpi::tables::byte_sum(&table.bytes), 0);
        }
    }

    #[test]
    fn test_wake_method_name_outlives_the_context() {
        let name = {
            let fx = Fixture::new(Platform::Desktop);
            let ctx = fx.ctx();
            wake_method(&ctx)
        };
        assert_eq!(name, Some("GPRW"));
    }

    #[test]
    fn test_laptop_battery_and_light_sensor() {
        let mut fx = Fixture::new(Platform::Laptop);
        let selection = select_patches(&fx.ctx(), &BTreeMap::new(), &[]).unwrap();
        assert!(selection.is_checked("BATP"));
        assert!(selection.is_checked("XOSI"));
        assert!(selection.is_checked("ALS0"));
        assert!(!selection.is_checked("PNLF"));
        assert!(selection.companion_kexts.contains("ECEnabler"));

        fx.kexts.insert("WhateverGreen".to_string());
        let selection = select_patches(&fx.ctx(), &BTreeMap::new(), &[]).unwrap();
        assert!(selection.is_checked("PNLF"));
    }

    #[test]
    fn test_overrides_and_unknown_id() {
        let fx = Fixture::new(Platform::Desktop);
        let mut overrides = BTreeMap::new();
        overrides.insert("GPRW".to_string(), false);
        let selection = select_patches(&fx.ctx(), &overrides, &[]).unwrap();
        assert!(!selection.is_checked("GPRW"));
        assert!(selection.patch.is_empty());

        overrides.insert("NOPE".to_string(), true);
        assert_eq!(
            select_patches(&fx.ctx(), &overrides, &[]),
            Err(SelectionError::UnknownPatch("NOPE".to_string()))
        );
    }

    #[test]
    fn test_user_patches_dedupe_last_writer() {
        let fx = Fixture::new(Platform::Desktop);
        let mut first = BinaryPatch::rename("user one", b"_OSI", b"XOSI");
        first.limit = 1;
        let mut second = first.clone();
        second.comment = "user two".to_string();
        let gprw_again = BinaryPatch::rename("duplicate", b"GPRW\x02", b"XPRW\x02");
        let selection = select_patches(&fx.ctx(), &BTreeMap::new(), &[first, gprw_again, second]).unwrap();
        assert_eq!(selection.patch.len(), 2);
        assert_eq!(selection.patch[0].comment, "duplicate");
        assert_eq!(selection.patch[1].comment, "user two");
    }

    #[test]
    fn test_missing_lpc_is_named_error() {
        let terms = vec![Term::scope("\\_SB", vec![Term::device("PCI0", vec![])])];
        let bytes = aml::definition_block(b"DSDT", "BARE", &aml::encode_terms(&terms));
        let tables = AcpiTables::from_tables(vec![AcpiTable::from_bytes("DSDT.aml", bytes).unwrap()]).unwrap();
        let namespace = AcpiNamespace::scan_all(tables.iter());
        let fx = Fixture::new(Platform::Desktop);
        let ctx = PatchContext {
            tables: &tables,
            namespace: &namespace,
            ..fx.ctx()
        };
        match select_patches(&ctx, &BTreeMap::new(), &[]) {
            Err(SelectionError::MissingAcpiTable { id, .. }) => assert_eq!(id, "EC-USBX"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_user_patch_json() {
        let json = r#"[{"comment":"rename","find":"5F4F5349","replace":"584F5349"}]"#;
        let patches: Vec<BinaryPatch> = serde_json::from_str(json).unwrap();
        assert_eq!(patches[0].find, b"_OSI".to_vec());
        assert_eq!(patches[0].table_signature, "DSDT");
    }
}
