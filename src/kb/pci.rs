//! PCI/USB ID tables for graphics, networking, Bluetooth, storage and
//! card readers.
//!
//! IDs are `vendor-device`, lowercase hex, the same shape the report
//! validator normalizes to.

use crate::version::{SupportRange, HIGHEST_KERNEL_MAJOR, LOWEST_KERNEL_MAJOR};

pub const VENDOR_INTEL: &str = "8086";
pub const VENDOR_AMD: &str = "1002";
pub const VENDOR_NVIDIA: &str = "10de";
pub const VENDOR_BROADCOM: &str = "14e4";
pub const VENDOR_REALTEK: &str = "10ec";
pub const VENDOR_ATHEROS: &str = "168c";

fn universal() -> Option<SupportRange> {
    Some(SupportRange::universal())
}

fn majors(lo: u32, hi: u32) -> Option<SupportRange> {
    SupportRange::majors(lo, hi)
}

fn id_in(id: &str, table: &[&str]) -> bool {
    table.iter().any(|t| t.eq_ignore_ascii_case(id))
}

// ============================================================================
// GRAPHICS
// ============================================================================

/// Graphics family; drives support ranges, kexts and GPU grouping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GpuFamily {
    IntelSandyBridge,
    IntelIvyBridge,
    IntelHaswell,
    IntelBroadwell,
    IntelSkylake,
    IntelKabyLake,
    IntelCoffeeLake,
    IntelIceLake,
    IntelUnsupported,
    AmdGcn,
    AmdPolaris,
    AmdVega,
    AmdNavi10,
    AmdNavi21,
    AmdNavi22,
    AmdNavi24,
    AmdApu,
    NvidiaKepler,
    NvidiaMaxwellPascal,
    NvidiaUnsupported,
}

impl GpuFamily {
    pub fn is_intel(&self) -> bool {
        matches!(
            self,
            GpuFamily::IntelSandyBridge
                | GpuFamily::IntelIvyBridge
                | GpuFamily::IntelHaswell
                | GpuFamily::IntelBroadwell
                | GpuFamily::IntelSkylake
                | GpuFamily::IntelKabyLake
                | GpuFamily::IntelCoffeeLake
                | GpuFamily::IntelIceLake
                | GpuFamily::IntelUnsupported
        )
    }

    pub fn is_navi(&self) -> bool {
        matches!(
            self,
            GpuFamily::AmdNavi10 | GpuFamily::AmdNavi21 | GpuFamily::AmdNavi22 | GpuFamily::AmdNavi24
        )
    }

    pub fn is_amd(&self) -> bool {
        matches!(
            self,
            GpuFamily::AmdGcn | GpuFamily::AmdPolaris | GpuFamily::AmdVega | GpuFamily::AmdApu
        ) || self.is_navi()
    }

    pub fn is_nvidia(&self) -> bool {
        matches!(
            self,
            GpuFamily::NvidiaKepler | GpuFamily::NvidiaMaxwellPascal | GpuFamily::NvidiaUnsupported
        )
    }

    /// `(native, extended)` support for this family.
    pub fn support(&self) -> (Option<SupportRange>, Option<SupportRange>) {
        match self {
            GpuFamily::IntelSandyBridge => (majors(LOWEST_KERNEL_MAJOR, 17), majors(18, 24)),
            GpuFamily::IntelIvyBridge => (majors(LOWEST_KERNEL_MAJOR, 20), majors(21, 24)),
            GpuFamily::IntelHaswell | GpuFamily::IntelBroadwell | GpuFamily::IntelSkylake => {
                (majors(LOWEST_KERNEL_MAJOR, 21), majors(22, 24))
            }
            GpuFamily::IntelKabyLake => (majors(LOWEST_KERNEL_MAJOR, 22), None),
            GpuFamily::IntelCoffeeLake => (universal(), None),
            GpuFamily::IntelIceLake => (majors(19, HIGHEST_KERNEL_MAJOR), None),
            GpuFamily::AmdGcn => (majors(LOWEST_KERNEL_MAJOR, 21), majors(22, 24)),
            GpuFamily::AmdPolaris | GpuFamily::AmdVega => (universal(), None),
            GpuFamily::AmdNavi10 => (majors(19, HIGHEST_KERNEL_MAJOR), None),
            GpuFamily::AmdNavi21 => (majors(20, HIGHEST_KERNEL_MAJOR), None),
            GpuFamily::AmdNavi22 => (majors(21, HIGHEST_KERNEL_MAJOR), None),
            GpuFamily::AmdApu => (majors(19, 23), None),
            GpuFamily::NvidiaKepler => (majors(LOWEST_KERNEL_MAJOR, 20), majors(21, 24)),
            GpuFamily::NvidiaMaxwellPascal => (majors(LOWEST_KERNEL_MAJOR, 17), None),
            GpuFamily::IntelUnsupported | GpuFamily::AmdNavi24 | GpuFamily::NvidiaUnsupported => (None, None),
        }
    }
}

struct GpuIds {
    family: GpuFamily,
    codename: &'static str,
    ids: &'static [&'static str],
}

static GPU_IDS: &[GpuIds] = &[
    GpuIds {
        family: GpuFamily::IntelSandyBridge,
        codename: "Sandy Bridge",
        ids: &["8086-0102", "8086-0106", "8086-010a", "8086-0112", "8086-0116", "8086-0122", "8086-0126"],
    },
    GpuIds {
        family: GpuFamily::IntelIvyBridge,
        codename: "Ivy Bridge",
        ids: &["8086-0152", "8086-0156", "8086-0162", "8086-0166", "8086-016a"],
    },
    GpuIds {
        family: GpuFamily::IntelHaswell,
        codename: "Haswell",
        ids: &[
            "8086-0402", "8086-0412", "8086-0416", "8086-041e", "8086-0a16", "8086-0a1e", "8086-0a26",
            "8086-0a2e", "8086-0d22", "8086-0d26",
        ],
    },
    GpuIds {
        family: GpuFamily::IntelBroadwell,
        codename: "Broadwell",
        ids: &["8086-1616", "8086-161e", "8086-1622", "8086-1626", "8086-162b"],
    },
    GpuIds {
        family: GpuFamily::IntelSkylake,
        codename: "Skylake",
        ids: &[
            "8086-1912", "8086-1916", "8086-191b", "8086-191e", "8086-1926", "8086-1927", "8086-1932",
            "8086-193b",
        ],
    },
    GpuIds {
        family: GpuFamily::IntelKabyLake,
        codename: "Kaby Lake",
        ids: &[
            "8086-5912", "8086-5916", "8086-5917", "8086-591b", "8086-591c", "8086-591e", "8086-5926",
            "8086-5927",
        ],
    },
    GpuIds {
        family: GpuFamily::IntelCoffeeLake,
        codename: "Coffee Lake",
        ids: &[
            "8086-3e90", "8086-3e91", "8086-3e92", "8086-3e93", "8086-3e98", "8086-3e9a", "8086-3e9b",
            "8086-3ea0", "8086-3ea5", "8086-3ea9", "8086-9b21", "8086-9b41", "8086-9bc4", "8086-9bc5",
            "8086-9bc8", "8086-9bca", "8086-9be6", "8086-87c0", "8086-87ca",
        ],
    },
    GpuIds {
        family: GpuFamily::IntelIceLake,
        codename: "Ice Lake",
        ids: &["8086-8a51", "8086-8a52", "8086-8a56", "8086-8a5a", "8086-8a5c"],
    },
    GpuIds {
        family: GpuFamily::AmdGcn,
        codename: "GCN",
        ids: &[
            "1002-6798", "1002-679a", "1002-6810", "1002-6818", "1002-6819", "1002-665c", "1002-67b0",
            "1002-67b1", "1002-6938", "1002-6939", "1002-7300",
        ],
    },
    GpuIds {
        family: GpuFamily::AmdPolaris,
        codename: "Polaris",
        ids: &["1002-67c0", "1002-67df", "1002-67e0", "1002-67ef", "1002-67ff", "1002-6fdf"],
    },
    GpuIds {
        family: GpuFamily::AmdVega,
        codename: "Vega",
        ids: &["1002-687f", "1002-6863", "1002-66af"],
    },
    GpuIds {
        family: GpuFamily::AmdNavi10,
        codename: "Navi 10",
        ids: &["1002-7310", "1002-7312", "1002-731f", "1002-7340", "1002-7341", "1002-7347"],
    },
    GpuIds {
        family: GpuFamily::AmdNavi21,
        codename: "Navi 21",
        ids: &[
            "1002-73a2", "1002-73a3", "1002-73a5", "1002-73ab", "1002-73af", "1002-73bf", "1002-73e0",
            "1002-73e1", "1002-73e3", "1002-73ef", "1002-73ff",
        ],
    },
    GpuIds {
        family: GpuFamily::AmdNavi22,
        codename: "Navi 22",
        ids: &["1002-73c3", "1002-73da", "1002-73dc", "1002-73df"],
    },
    GpuIds {
        family: GpuFamily::AmdNavi24,
        codename: "Navi 24",
        ids: &["1002-743f", "1002-7422", "1002-7423"],
    },
    GpuIds {
        family: GpuFamily::AmdApu,
        codename: "Raven/Renoir",
        ids: &[
            "1002-15d8", "1002-15dd", "1002-15e7", "1002-1636", "1002-1638", "1002-164c", "1002-1681",
        ],
    },
    GpuIds {
        family: GpuFamily::NvidiaKepler,
        codename: "Kepler",
        ids: &[
            "10de-0fc6", "10de-0fc8", "10de-0fc9", "10de-0fcd", "10de-0fe0", "10de-0fe3", "10de-0fe4",
            "10de-0fe9", "10de-0fea", "10de-0fec", "10de-0ff6", "10de-1004", "10de-1005", "10de-1180",
            "10de-1183", "10de-1184", "10de-1185", "10de-1187", "10de-1189", "10de-118e", "10de-11c0",
            "10de-11c6", "10de-11c8", "10de-11e0", "10de-11e1", "10de-11e2", "10de-11e3", "10de-11fa",
            "10de-11fc", "10de-1280", "10de-1281", "10de-1282", "10de-1284", "10de-1286", "10de-1287",
            "10de-1288", "10de-1289", "10de-128b",
        ],
    },
    GpuIds {
        family: GpuFamily::NvidiaMaxwellPascal,
        codename: "Maxwell/Pascal",
        ids: &[
            "10de-13c0", "10de-13c2", "10de-1401", "10de-1406", "10de-17c8", "10de-1b06", "10de-1b80",
            "10de-1b81", "10de-1c02", "10de-1c03", "10de-1c81", "10de-1c82",
        ],
    },
];

/// Classification of a graphics device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GpuClass {
    pub family: GpuFamily,
    pub codename: &'static str,
}

/// Look up a GPU by `vendor-device` id. Unknown Intel and NVIDIA parts fall
/// into their vendor's unsupported bucket.
pub fn classify_gpu(device_id: &str) -> Option<GpuClass> {
    let id = device_id.to_lowercase();
    if let Some(entry) = GPU_IDS.iter().find(|e| id_in(&id, e.ids)) {
        return Some(GpuClass {
            family: entry.family,
            codename: entry.codename,
        });
    }
    match id.split('-').next() {
        Some(VENDOR_INTEL) => Some(GpuClass {
            family: GpuFamily::IntelUnsupported,
            codename: "Intel Xe",
        }),
        Some(VENDOR_NVIDIA) => Some(GpuClass {
            family: GpuFamily::NvidiaUnsupported,
            codename: "Turing or newer",
        }),
        _ => None,
    }
}

/// Cap applied to the suggested OS for some integrated GPU ids.
pub fn igpu_suggestion_cap(device_id: &str) -> Option<u32> {
    let product = device_id.split('-').nth(1)?.to_lowercase();
    if product.starts_with("59") || product.starts_with("87c0") {
        Some(22)
    } else if product.starts_with("09") || product.starts_with("19") {
        Some(21)
    } else {
        None
    }
}

/// `AAPL,ig-platform-id` for an Intel iGPU family, as little-endian bytes.
///
/// Laptops and desktops with a discrete card driving displays get
/// different framebuffers.
pub fn ig_platform_id(family: GpuFamily, laptop: bool, headless: bool) -> Option<[u8; 4]> {
    let id: u32 = match (family, laptop, headless) {
        (GpuFamily::IntelSandyBridge, true, _) => 0x0001_0000,
        (GpuFamily::IntelSandyBridge, false, true) => 0x0005_0000,
        (GpuFamily::IntelSandyBridge, false, false) => 0x0003_0010,
        (GpuFamily::IntelIvyBridge, true, _) => 0x0166_0003,
        (GpuFamily::IntelIvyBridge, false, true) => 0x0162_0007,
        (GpuFamily::IntelIvyBridge, false, false) => 0x0166_000A,
        (GpuFamily::IntelHaswell, true, _) => 0x0A16_0000,
        (GpuFamily::IntelHaswell, false, true) => 0x0412_0004,
        (GpuFamily::IntelHaswell, false, false) => 0x0D22_0003,
        (GpuFamily::IntelBroadwell, true, _) => 0x1616_0002,
        (GpuFamily::IntelBroadwell, false, true) => 0x1622_0003,
        (GpuFamily::IntelBroadwell, false, false) => 0x1626_0006,
        (GpuFamily::IntelSkylake, true, _) => 0x1916_0000,
        (GpuFamily::IntelSkylake, false, true) => 0x1912_0001,
        (GpuFamily::IntelSkylake, false, false) => 0x1912_0000,
        (GpuFamily::IntelKabyLake, true, _) => 0x591B_0000,
        (GpuFamily::IntelKabyLake, false, true) => 0x5912_0003,
        (GpuFamily::IntelKabyLake, false, false) => 0x5912_0000,
        (GpuFamily::IntelCoffeeLake, true, _) => 0x3EA5_0009,
        (GpuFamily::IntelCoffeeLake, false, true) => 0x3E98_0003,
        (GpuFamily::IntelCoffeeLake, false, false) => 0x3E9B_0007,
        (GpuFamily::IntelIceLake, _, _) => 0x8A52_0000,
        _ => return None,
    };
    Some(id.to_le_bytes())
}

// ============================================================================
// NETWORKING
// ============================================================================

/// Network controller class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkClass {
    IntelWifi,
    BroadcomWifi,
    AtherosWifi,
    IntelEthernet,
    IntelI225,
    RealtekRtl8111,
    RealtekRtl8125,
    RealtekRtl8100,
    KillerEthernet,
    BroadcomEthernet,
}

impl NetworkClass {
    pub fn is_wireless(&self) -> bool {
        matches!(
            self,
            NetworkClass::IntelWifi | NetworkClass::BroadcomWifi | NetworkClass::AtherosWifi
        )
    }

    pub fn support(&self) -> (Option<SupportRange>, Option<SupportRange>) {
        match self {
            NetworkClass::BroadcomWifi => (majors(LOWEST_KERNEL_MAJOR, 22), majors(23, 24)),
            NetworkClass::AtherosWifi => (majors(LOWEST_KERNEL_MAJOR, 17), majors(18, 23)),
            _ => (universal(), None),
        }
    }
}

static INTEL_WIFI_IDS: &[&str] = &[
    "8086-02f0", "8086-06f0", "8086-08b1", "8086-08b2", "8086-095a", "8086-095b", "8086-24f3",
    "8086-24fb", "8086-24fd", "8086-2526", "8086-2723", "8086-2725", "8086-2729", "8086-271b",
    "8086-271c", "8086-272b", "8086-30dc", "8086-31dc", "8086-3165", "8086-3166", "8086-34f0",
    "8086-3df0", "8086-43f0", "8086-4df0", "8086-51f0", "8086-54f0", "8086-7a70", "8086-7af0",
    "8086-7e40", "8086-9df0", "8086-a0f0",
];

static BROADCOM_WIFI_IDS: &[&str] = &[
    "14e4-4331", "14e4-4353", "14e4-4357", "14e4-43a0", "14e4-43a3", "14e4-43b1", "14e4-43b2",
    "14e4-43ba",
];

/// Broadcom cards that need AirportBrcmFixup to attach.
static BROADCOM_FIXUP_IDS: &[&str] = &["14e4-43a3", "14e4-43b1", "14e4-43b2", "14e4-4357"];

static ATHEROS_WIFI_IDS: &[&str] = &["168c-002a", "168c-0030", "168c-0032", "168c-0034"];

static INTEL_ETHERNET_IDS: &[&str] = &[
    "8086-0d4c", "8086-0d4d", "8086-0d4e", "8086-0d4f", "8086-0d53", "8086-0d55", "8086-0dc5",
    "8086-0dc6", "8086-0dc7", "8086-0dc8", "8086-1502", "8086-1503", "8086-153a", "8086-153b",
    "8086-1559", "8086-155a", "8086-156f", "8086-1570", "8086-15a0", "8086-15a1", "8086-15a2",
    "8086-15a3", "8086-15b7", "8086-15b8", "8086-15bc", "8086-15bd", "8086-15be", "8086-15d7",
    "8086-15d8", "8086-15e3", "8086-15f9", "8086-15fa", "8086-15fb", "8086-15fc", "8086-1a1c",
    "8086-1a1d",
];

static INTEL_I225_IDS: &[&str] = &["8086-0d9f", "8086-125b", "8086-125c", "8086-15f2", "8086-15f3"];

static KILLER_ETHERNET_IDS: &[&str] = &["1969-e091", "1969-e0a1", "1969-e0b1"];

static BROADCOM_ETHERNET_IDS: &[&str] = &["14e4-1684", "14e4-16b0", "14e4-16b4", "14e4-1686"];

pub fn classify_network(device_id: &str) -> Option<NetworkClass> {
    let id = device_id.to_lowercase();
    let class = if id_in(&id, INTEL_WIFI_IDS) {
        NetworkClass::IntelWifi
    } else if id_in(&id, BROADCOM_WIFI_IDS) {
        NetworkClass::BroadcomWifi
    } else if id_in(&id, ATHEROS_WIFI_IDS) {
        NetworkClass::AtherosWifi
    } else if id_in(&id, INTEL_ETHERNET_IDS) {
        NetworkClass::IntelEthernet
    } else if id_in(&id, INTEL_I225_IDS) {
        NetworkClass::IntelI225
    } else if id_in(&id, KILLER_ETHERNET_IDS) {
        NetworkClass::KillerEthernet
    } else if id_in(&id, BROADCOM_ETHERNET_IDS) {
        NetworkClass::BroadcomEthernet
    } else {
        match id.as_str() {
            "10ec-8168" => NetworkClass::RealtekRtl8111,
            "10ec-8125" => NetworkClass::RealtekRtl8125,
            "10ec-8136" => NetworkClass::RealtekRtl8100,
            _ => return None,
        }
    };
    Some(class)
}

pub fn is_wireless_id(device_id: &str) -> bool {
    classify_network(device_id).map(|c| c.is_wireless()).unwrap_or(false)
}

pub fn needs_brcm_fixup(device_id: &str) -> bool {
    id_in(device_id, BROADCOM_FIXUP_IDS)
}

// ============================================================================
// BLUETOOTH
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BluetoothClass {
    Intel,
    Broadcom,
}

static INTEL_BT_IDS: &[&str] = &[
    "8087-0025", "8087-0026", "8087-0029", "8087-0032", "8087-0033", "8087-0036", "8087-0a2a",
    "8087-0a2b", "8087-0aaa",
];

static BROADCOM_BT_IDS: &[&str] = &[
    "0930-0221", "0a5c-216f", "0a5c-21e8", "0a5c-21ec", "0a5c-22be", "0a5c-6410", "105b-e065",
    "13d3-3404", "04ca-2003",
];

pub fn classify_bluetooth(usb_id: &str) -> Option<BluetoothClass> {
    if id_in(usb_id, INTEL_BT_IDS) {
        Some(BluetoothClass::Intel)
    } else if id_in(usb_id, BROADCOM_BT_IDS) {
        Some(BluetoothClass::Broadcom)
    } else {
        None
    }
}

// ============================================================================
// STORAGE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageClass {
    IntelVmd,
    IntelRaid,
    /// Drives with controllers known to panic under macOS
    UnsupportedNvme,
    Nvme,
    Ahci,
}

static INTEL_VMD_IDS: &[&str] = &["8086-09ab", "8086-467f", "8086-9a0b", "8086-a77f", "8086-ad0b"];

static INTEL_RAID_IDS: &[&str] = &["8086-2822", "8086-2826", "8086-282a"];

static UNSUPPORTED_NVME_IDS: &[&str] = &["144d-a808", "1344-5405", "1c5c-1327"];

/// Classify a storage controller by id, falling back to its reported type.
pub fn classify_storage(device_id: Option<&str>, device_type: Option<&str>) -> Option<StorageClass> {
    if let Some(id) = device_id {
        if id_in(id, INTEL_VMD_IDS) {
            return Some(StorageClass::IntelVmd);
        }
        if id_in(id, INTEL_RAID_IDS) {
            return Some(StorageClass::IntelRaid);
        }
        if id_in(id, UNSUPPORTED_NVME_IDS) {
            return Some(StorageClass::UnsupportedNvme);
        }
    }
    let kind = device_type.map(|t| t.to_lowercase()).unwrap_or_default();
    if kind.contains("raid") {
        Some(StorageClass::IntelRaid)
    } else if kind.contains("nvm") {
        Some(StorageClass::Nvme)
    } else if kind.contains("sata") || kind.contains("ahci") {
        Some(StorageClass::Ahci)
    } else {
        None
    }
}

impl StorageClass {
    pub fn support(&self) -> Option<SupportRange> {
        match self {
            StorageClass::Nvme | StorageClass::Ahci => universal(),
            _ => None,
        }
    }
}

// ============================================================================
// SD CARD READERS
// ============================================================================

static REALTEK_CARD_READER_IDS: &[&str] = &[
    "10ec-5227", "10ec-5229", "10ec-522a", "10ec-5249", "10ec-525a", "10ec-5260", "10ec-5286",
    "10ec-5287",
];

pub fn is_realtek_card_reader(device_id: &str) -> bool {
    id_in(device_id, REALTEK_CARD_READER_IDS)
}
