//! Namespace scanner for DSDT/SSDT bodies.
//!
//! A structural walk over AML: it follows `Scope`, `Device`, `Processor` and
//! `Method` package lengths to rebuild object paths and records `_ADR` and
//! `_HID` values of devices. It does not evaluate anything; objects created
//! at runtime are invisible to it.

use std::collections::BTreeSet;

use super::aml::{decode_eisa_id, decode_pkg_length};
use super::tables::AcpiTable;

const NAME_OP: u8 = 0x08;
const ZERO_OP: u8 = 0x00;
const ONE_OP: u8 = 0x01;
const BYTE_PREFIX: u8 = 0x0A;
const WORD_PREFIX: u8 = 0x0B;
const DWORD_PREFIX: u8 = 0x0C;
const STRING_PREFIX: u8 = 0x0D;
const QWORD_PREFIX: u8 = 0x0E;
const SCOPE_OP: u8 = 0x10;
const BUFFER_OP: u8 = 0x11;
const PACKAGE_OP: u8 = 0x12;
const METHOD_OP: u8 = 0x14;
const EXT_OP_PREFIX: u8 = 0x5B;
const DEVICE_OP: u8 = 0x82;
const PROCESSOR_OP: u8 = 0x83;

pub const INTEL_LPC_ADR: u64 = 0x001F_0000;
pub const AMD_LPC_ADR: u64 = 0x0014_0003;
pub const INTEL_SMBUS_ADR: u64 = 0x001F_0004;
pub const HOST_BRIDGE_ADR: u64 = 0x0000_0000;

/// A `Device` object found in a table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcpiDevice {
    /// Absolute path, e.g. `\_SB.PCI0.LPCB`.
    pub path: String,
    pub adr: Option<u64>,
    pub hid: Option<String>,
}

impl AcpiDevice {
    /// Last path segment.
    pub fn name(&self) -> &str {
        self.path.rsplit(['.', '\\']).next().unwrap_or(&self.path)
    }

    pub fn parent(&self) -> &str {
        match self.path.rfind('.') {
            Some(i) => &self.path[..i],
            None => "\\",
        }
    }
}

/// Everything the scanner recovered from one or more tables.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AcpiNamespace {
    devices: Vec<AcpiDevice>,
    processors: Vec<String>,
    methods: BTreeSet<String>,
    names: BTreeSet<String>,
}

struct Frame {
    path: String,
    end: usize,
    device: Option<usize>,
}

struct Object {
    name: String,
    name_end: usize,
    end: usize,
}

fn valid_seg(seg: &[u8]) -> bool {
    let lead_ok = seg[0].is_ascii_uppercase() || seg[0] == b'_';
    lead_ok && seg[1..].iter().all(|b| b.is_ascii_uppercase() || b.is_ascii_digit() || *b == b'_')
}

fn seg_text(seg: &[u8]) -> String {
    let text = String::from_utf8_lossy(seg);
    let trimmed = text.trim_end_matches('_');
    if trimmed.is_empty() {
        text.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Parse a NameString at `at`. Returns the textual path and the next offset.
fn parse_name(aml: &[u8], at: usize) -> Option<(String, usize)> {
    let mut i = at;
    let mut prefix = String::new();
    if *aml.get(i)? == b'\\' {
        prefix.push('\\');
        i += 1;
    } else {
        while *aml.get(i)? == b'^' {
            prefix.push('^');
            i += 1;
        }
    }
    let count = match *aml.get(i)? {
        0x00 => {
            i += 1;
            0
        }
        0x2E => {
            i += 1;
            2
        }
        0x2F => {
            let n = *aml.get(i + 1)? as usize;
            i += 2;
            n
        }
        _ => 1,
    };
    let mut segs = Vec::with_capacity(count);
    for _ in 0..count {
        let seg = aml.get(i..i + 4)?;
        if !valid_seg(seg) {
            return None;
        }
        segs.push(seg_text(seg));
        i += 4;
    }
    if segs.is_empty() && prefix.is_empty() {
        return None;
    }
    Some((format!("{}{}", prefix, segs.join(".")), i))
}

/// Resolve `name` relative to the scope `parent`.
fn resolve(parent: &str, name: &str) -> String {
    if name.starts_with('\\') {
        return name.to_string();
    }
    let carets = name.chars().take_while(|c| *c == '^').count();
    let rest = &name[carets..];
    let mut base: Vec<&str> = parent
        .trim_start_matches('\\')
        .split('.')
        .filter(|s| !s.is_empty())
        .collect();
    for _ in 0..carets {
        base.pop();
    }
    if !rest.is_empty() {
        base.push(rest);
    }
    format!("\\{}", base.join("."))
}

/// Parse `PkgLength NameString` starting at `at`, bounded by `limit`.
fn parse_object(aml: &[u8], at: usize, limit: usize) -> Option<Object> {
    let (length, used) = decode_pkg_length(aml.get(at..)?)?;
    let end = at + length;
    if length < used || end > limit {
        return None;
    }
    let (name, name_end) = parse_name(aml, at + used)?;
    if name_end > end {
        return None;
    }
    Some(Object { name, name_end, end })
}

fn parse_integer(aml: &[u8], at: usize) -> Option<(u64, usize)> {
    let read = |n: usize| -> Option<u64> {
        let bytes = aml.get(at + 1..at + 1 + n)?;
        Some(bytes.iter().rev().fold(0u64, |acc, b| (acc << 8) | *b as u64))
    };
    match *aml.get(at)? {
        ZERO_OP => Some((0, at + 1)),
        ONE_OP => Some((1, at + 1)),
        BYTE_PREFIX => Some((read(1)?, at + 2)),
        WORD_PREFIX => Some((read(2)?, at + 3)),
        DWORD_PREFIX => Some((read(4)?, at + 5)),
        QWORD_PREFIX => Some((read(8)?, at + 9)),
        _ => None,
    }
}

fn parse_string(aml: &[u8], at: usize) -> Option<(String, usize)> {
    if *aml.get(at)? != STRING_PREFIX {
        return None;
    }
    let start = at + 1;
    let len = aml.get(start..)?.iter().position(|b| *b == 0)?;
    let text = String::from_utf8_lossy(&aml[start..start + len]).to_string();
    Some((text, start + len + 1))
}

impl AcpiNamespace {
    /// Scan a table's AML body.
    pub fn scan(table: &AcpiTable) -> Self {
        let mut ns = AcpiNamespace::default();
        ns.scan_body(table.body());
        log::debug!(
            "[ACPI] {}: {} device(s), {} method(s)",
            table.file_name,
            ns.devices.len(),
            ns.methods.len()
        );
        ns
    }

    /// Scan several tables into one namespace (DSDT first, then SSDTs).
    pub fn scan_all<'a>(tables: impl IntoIterator<Item = &'a AcpiTable>) -> Self {
        let mut ns = AcpiNamespace::default();
        for table in tables {
            ns.scan_body(table.body());
        }
        ns
    }

    fn scan_body(&mut self, aml: &[u8]) {
        let mut stack = vec![Frame {
            path: "\\".to_string(),
            end: aml.len(),
            device: None,
        }];
        let mut i = 0;
        while i < aml.len() {
            while stack.len() > 1 && stack.last().map(|f| i >= f.end).unwrap_or(false) {
                stack.pop();
            }
            let (parent, limit, device) = match stack.last() {
                Some(f) => (f.path.clone(), f.end, f.device),
                None => break,
            };

            match aml[i] {
                SCOPE_OP => {
                    if let Some(obj) = parse_object(aml, i + 1, limit) {
                        stack.push(Frame {
                            path: resolve(&parent, &obj.name),
                            end: obj.end,
                            device: None,
                        });
                        i = obj.name_end;
                        continue;
                    }
                }
                EXT_OP_PREFIX if aml.get(i + 1) == Some(&DEVICE_OP) => {
                    if let Some(obj) = parse_object(aml, i + 2, limit) {
                        let path = resolve(&parent, &obj.name);
                        self.devices.push(AcpiDevice {
                            path: path.clone(),
                            adr: None,
                            hid: None,
                        });
                        stack.push(Frame {
                            path,
                            end: obj.end,
                            device: Some(self.devices.len() - 1),
                        });
                        i = obj.name_end;
                        continue;
                    }
                }
                EXT_OP_PREFIX if aml.get(i + 1) == Some(&PROCESSOR_OP) => {
                    if let Some(obj) = parse_object(aml, i + 2, limit) {
                        self.processors.push(resolve(&parent, &obj.name));
                        i = obj.end;
                        continue;
                    }
                }
                METHOD_OP => {
                    if let Some(obj) = parse_object(aml, i + 1, limit) {
                        self.methods.insert(resolve(&parent, &obj.name));
                        i = obj.end;
                        continue;
                    }
                }
                NAME_OP => {
                    if let Some((name, next)) = parse_name(aml, i + 1) {
                        let path = resolve(&parent, &name);
                        self.names.insert(path);
                        let mut next = next;
                        if let Some(index) = device {
                            if name == "_ADR" {
                                if let Some((value, after)) = parse_integer(aml, next) {
                                    self.devices[index].adr = Some(value);
                                    next = after;
                                }
                            } else if name == "_HID" {
                                if let Some((value, after)) = parse_integer(aml, next) {
                                    self.devices[index].hid = Some(decode_eisa_id(value as u32));
                                    next = after;
                                } else if let Some((text, after)) = parse_string(aml, next) {
                                    self.devices[index].hid = Some(text);
                                    next = after;
                                }
                            }
                        }
                        i = next;
                        continue;
                    }
                }
                BUFFER_OP | PACKAGE_OP => {
                    if let Some((length, _)) = aml.get(i + 1..).and_then(decode_pkg_length) {
                        if i + 1 + length <= limit && length > 0 {
                            i += 1 + length;
                            continue;
                        }
                    }
                }
                STRING_PREFIX => {
                    if let Some((_, after)) = parse_string(aml, i) {
                        i = after;
                        continue;
                    }
                }
                _ => {}
            }
            i += 1;
        }
    }

    pub fn devices(&self) -> &[AcpiDevice] {
        &self.devices
    }

    pub fn device(&self, path: &str) -> Option<&AcpiDevice> {
        self.devices.iter().find(|d| d.path == path)
    }

    pub fn find_by_hid(&self, hid: &str) -> Option<&AcpiDevice> {
        self.devices
            .iter()
            .find(|d| d.hid.as_deref().map(|h| h.eq_ignore_ascii_case(hid)).unwrap_or(false))
    }

    /// Devices at `adr` directly below `parent`.
    pub fn find_child_by_adr(&self, parent: &str, adr: u64) -> Option<&AcpiDevice> {
        self.devices.iter().find(|d| d.adr == Some(adr) && d.parent() == parent)
    }

    /// The PCI root bridge.
    pub fn pci_root(&self) -> Option<&AcpiDevice> {
        self.find_by_hid("PNP0A08").or_else(|| self.find_by_hid("PNP0A03"))
    }

    /// The LPC/eSPI bridge below the PCI root.
    pub fn lpc_bus(&self) -> Option<&AcpiDevice> {
        let root = self.pci_root()?;
        self.find_child_by_adr(&root.path, INTEL_LPC_ADR)
            .or_else(|| self.find_child_by_adr(&root.path, AMD_LPC_ADR))
    }

    pub fn smbus(&self) -> Option<&AcpiDevice> {
        let root = self.pci_root()?;
        self.find_child_by_adr(&root.path, INTEL_SMBUS_ADR)
    }

    pub fn host_bridge(&self) -> Option<&AcpiDevice> {
        let root = self.pci_root()?;
        self.find_child_by_adr(&root.path, HOST_BRIDGE_ADR)
    }

    pub fn embedded_controller(&self) -> Option<&AcpiDevice> {
        self.find_by_hid("PNP0C09")
    }

    pub fn battery(&self) -> Option<&AcpiDevice> {
        self.find_by_hid("PNP0C0A")
    }

    /// Processor objects: legacy `Processor` declarations or `ACPI0007` devices.
    pub fn processors(&self) -> Vec<String> {
        if !self.processors.is_empty() {
            return self.processors.clone();
        }
        self.devices
            .iter()
            .filter(|d| d.hid.as_deref() == Some("ACPI0007"))
            .map(|d| d.path.clone())
            .collect()
    }

    /// `ACPI0007` processor devices, whether or not legacy objects exist.
    pub fn processor_devices(&self) -> Vec<String> {
        self.devices
            .iter()
            .filter(|d| d.hid.as_deref() == Some("ACPI0007"))
            .map(|d| d.path.clone())
            .collect()
    }

    pub fn has_legacy_processors(&self) -> bool {
        !self.processors.is_empty()
    }

    pub fn has_method(&self, path: &str) -> bool {
        self.methods.contains(path)
    }

    /// Whether any method's last segment is `name`.
    pub fn has_method_named(&self, name: &str) -> bool {
        self.methods.iter().any(|m| m.rsplit(['.', '\\']).next() == Some(name))
    }

    pub fn method_path(&self, name: &str) -> Option<&str> {
        self.methods
            .iter()
            .find(|m| m.rsplit(['.', '\\']).next() == Some(name))
            .map(|m| m.as_str())
    }

    /// Whether a `Name` object with this last segment exists.
    pub fn has_name(&self, name: &str) -> bool {
        self.names.iter().any(|n| n.rsplit(['.', '\\']).next() == Some(name))
    }

    pub fn name_path(&self, name: &str) -> Option<&str> {
        self.names
            .iter()
            .find(|n| n.rsplit(['.', '\\']).next() == Some(name))
            .map(|n| n.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acpi::aml::{self, encode_pkg_length, Data, Term};

    fn sample_dsdt() -> AcpiTable {
        let terms = vec![Term::scope(
            "\\_SB",
            vec![Term::device(
                "PCI0",
                vec![
                    Term::name("_HID", Data::EisaId("PNP0A08".into())),
                    Term::device("MCHC", vec![Term::name("_ADR", Data::Int(0))]),
                    Term::device(
                        "LPCB",
                        vec![
                            Term::name("_ADR", Data::Int(INTEL_LPC_ADR)),
                            Term::device(
                                "EC0",
                                vec![
                                    Term::name("_HID", Data::EisaId("PNP0C09".into())),
                                    Term::method("_STA", 0, vec![Term::Return(aml::Expr::int(0x0F))]),
                                ],
                            ),
                        ],
                    ),
                    Term::device("SBUS", vec![Term::name("_ADR", Data::Int(INTEL_SMBUS_ADR))]),
                    Term::method("GPRW", 2, vec![Term::Return(aml::Expr::int(0))]),
                ],
            )],
        )];
        let bytes = aml::definition_block(b"DSDT", "TESTDSDT", &aml::encode_terms(&terms));
        AcpiTable::from_bytes("DSDT.aml", bytes).unwrap()
    }

    #[test]
    fn test_scan_finds_devices_and_paths() {
        let ns = AcpiNamespace::scan(&sample_dsdt());
        assert_eq!(ns.pci_root().unwrap().path, "\\_SB.PCI0");
        assert_eq!(ns.lpc_bus().unwrap().path, "\\_SB.PCI0.LPCB");
        assert_eq!(ns.lpc_bus().unwrap().name(), "LPCB");
        assert_eq!(ns.smbus().unwrap().path, "\\_SB.PCI0.SBUS");
        assert_eq!(ns.host_bridge().unwrap().name(), "MCHC");
        assert_eq!(ns.embedded_controller().unwrap().path, "\\_SB.PCI0.LPCB.EC0");
        assert!(ns.has_method("\\_SB.PCI0.LPCB.EC0._STA"));
        assert!(ns.has_method_named("GPRW"));
        assert!(ns.battery().is_none());
    }

    #[test]
    fn test_legacy_processor_objects() {
        let mut processor = b"CPU0".to_vec();
        processor.extend_from_slice(&[0x00, 0x10, 0x04, 0x00, 0x00, 0x06]);
        let mut op = vec![EXT_OP_PREFIX, PROCESSOR_OP];
        op.extend(encode_pkg_length(processor.len()));
        op.extend(processor);

        let mut scope = aml::encode_name("\\_PR");
        scope.extend(op);
        let mut body = vec![SCOPE_OP];
        body.extend(encode_pkg_length(scope.len()));
        body.extend(scope);

        let table = AcpiTable::from_bytes("DSDT.aml", aml::definition_block(b"DSDT", "CPU", &body)).unwrap();
        let ns = AcpiNamespace::scan(&table);
        assert_eq!(ns.processors(), vec!["\\_PR.CPU0".to_string()]);
    }

    #[test]
    fn test_resolve_parent_prefix() {
        assert_eq!(resolve("\\_SB.PCI0", "^PEG0"), "\\_SB.PEG0");
        assert_eq!(resolve("\\", "_SB"), "\\_SB");
        assert_eq!(resolve("\\_SB", "\\_PR.CPU0"), "\\_PR.CPU0");
    }

    #[test]
    fn test_garbage_does_not_panic() {
        let bytes = aml::definition_block(b"DSDT", "JUNK", &[0x10, 0xFF, 0x5B, 0x82, 0x14, 0x08, 0x0D]);
        let table = AcpiTable::from_bytes("DSDT.aml", bytes).unwrap();
        let ns = AcpiNamespace::scan(&table);
        assert!(ns.devices().is_empty());
    }
}
