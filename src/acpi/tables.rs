//! Raw ACPI table files: SDT header parsing and directory loading.

use std::fs;
use std::path::Path;

use crate::error::AcpiError;

/// Size of the common System Description Table header.
pub const HEADER_LEN: usize = 36;

/// Common SDT header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SdtHeader {
    pub signature: [u8; 4],
    pub length: u32,
    pub revision: u8,
    pub checksum: u8,
    pub oem_id: [u8; 6],
    pub oem_table_id: [u8; 8],
    pub oem_revision: u32,
    pub creator_id: [u8; 4],
    pub creator_revision: u32,
}

fn u32_at(bytes: &[u8], offset: usize) -> u32 {
    let mut word = [0u8; 4];
    word.copy_from_slice(&bytes[offset..offset + 4]);
    u32::from_le_bytes(word)
}

impl SdtHeader {
    /// Parse the header at the start of `bytes`. `name` is used in errors.
    pub fn parse(name: &str, bytes: &[u8]) -> Result<Self, AcpiError> {
        if bytes.len() < HEADER_LEN {
            return Err(AcpiError::Malformed {
                name: name.to_string(),
                reason: format!("{} bytes is shorter than an SDT header", bytes.len()),
            });
        }
        let mut header = SdtHeader {
            signature: [0; 4],
            length: u32_at(bytes, 4),
            revision: bytes[8],
            checksum: bytes[9],
            oem_id: [0; 6],
            oem_table_id: [0; 8],
            oem_revision: u32_at(bytes, 24),
            creator_id: [0; 4],
            creator_revision: u32_at(bytes, 32),
        };
        header.signature.copy_from_slice(&bytes[0..4]);
        header.oem_id.copy_from_slice(&bytes[10..16]);
        header.oem_table_id.copy_from_slice(&bytes[16..24]);
        header.creator_id.copy_from_slice(&bytes[28..32]);

        if !header.signature.iter().all(|b| b.is_ascii_alphanumeric() || *b == b'_') {
            return Err(AcpiError::Malformed {
                name: name.to_string(),
                reason: "signature is not ASCII".to_string(),
            });
        }
        if (header.length as usize) < HEADER_LEN || header.length as usize > bytes.len() {
            return Err(AcpiError::Malformed {
                name: name.to_string(),
                reason: format!(
                    "header length {} does not fit file size {}",
                    header.length,
                    bytes.len()
                ),
            });
        }
        Ok(header)
    }

    pub fn signature_str(&self) -> String {
        String::from_utf8_lossy(&self.signature).to_string()
    }

    pub fn oem_id_str(&self) -> String {
        String::from_utf8_lossy(&self.oem_id).trim_end().to_string()
    }

    pub fn oem_table_id_str(&self) -> String {
        String::from_utf8_lossy(&self.oem_table_id).trim_end().to_string()
    }
}

/// Byte sum of a table; zero for a valid checksum.
pub fn byte_sum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, &b| acc.wrapping_add(b))
}

/// One table file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcpiTable {
    pub file_name: String,
    pub header: SdtHeader,
    pub data: Vec<u8>,
}

impl AcpiTable {
    pub fn from_bytes(file_name: &str, data: Vec<u8>) -> Result<Self, AcpiError> {
        let header = SdtHeader::parse(file_name, &data)?;
        let mut data = data;
        data.truncate(header.length as usize);
        Ok(AcpiTable {
            file_name: file_name.to_string(),
            header,
            data,
        })
    }

    pub fn checksum_valid(&self) -> bool {
        byte_sum(&self.data) == 0
    }

    /// AML payload after the header.
    pub fn body(&self) -> &[u8] {
        &self.data[HEADER_LEN..]
    }

    pub fn contains(&self, needle: &[u8]) -> bool {
        !needle.is_empty() && self.data.windows(needle.len()).any(|w| w == needle)
    }

    pub fn count(&self, needle: &[u8]) -> usize {
        if needle.is_empty() {
            return 0;
        }
        self.data.windows(needle.len()).filter(|w| *w == needle).count()
    }
}

/// All tables dumped from a machine, ordered by file name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AcpiTables {
    tables: Vec<AcpiTable>,
}

impl AcpiTables {
    /// Load every `*.aml` / `*.dat` file in `dir`. A DSDT is mandatory.
    pub fn load_dir(dir: &Path) -> Result<Self, AcpiError> {
        let entries = fs::read_dir(dir).map_err(|e| AcpiError::Io(format!("{}: {}", dir.display(), e)))?;
        let mut tables = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| AcpiError::Io(e.to_string()))?;
            let path = entry.path();
            let ext = path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| e.to_ascii_lowercase());
            if !matches!(ext.as_deref(), Some("aml") | Some("dat")) {
                continue;
            }
            let file_name = entry.file_name().to_string_lossy().to_string();
            let bytes = fs::read(&path).map_err(|e| AcpiError::Io(format!("{}: {}", path.display(), e)))?;
            match AcpiTable::from_bytes(&file_name, bytes) {
                Ok(table) => {
                    if !table.checksum_valid() {
                        log::warn!("[ACPI] {} has an invalid checksum", file_name);
                    }
                    tables.push(table);
                }
                Err(e) if file_name.to_ascii_uppercase().starts_with("DSDT") => return Err(e),
                Err(e) => log::warn!("[ACPI] Skipping {}: {}", file_name, e),
            }
        }
        Self::from_tables(tables)
    }

    pub fn from_tables(mut tables: Vec<AcpiTable>) -> Result<Self, AcpiError> {
        tables.sort_by(|a, b| a.file_name.cmp(&b.file_name));
        if !tables.iter().any(|t| &t.header.signature == b"DSDT") {
            return Err(AcpiError::MissingTable("DSDT".to_string()));
        }
        log::info!("[ACPI] Loaded {} table(s)", tables.len());
        Ok(AcpiTables { tables })
    }

    pub fn dsdt(&self) -> Option<&AcpiTable> {
        self.find(b"DSDT")
    }

    pub fn find(&self, signature: &[u8; 4]) -> Option<&AcpiTable> {
        self.tables.iter().find(|t| &t.header.signature == signature)
    }

    /// Look up a table by signature, failing with the table's name.
    pub fn require(&self, signature: &[u8; 4]) -> Result<&AcpiTable, AcpiError> {
        self.find(signature)
            .ok_or_else(|| AcpiError::MissingTable(String::from_utf8_lossy(signature).to_string()))
    }

    pub fn ssdts(&self) -> impl Iterator<Item = &AcpiTable> {
        self.tables.iter().filter(|t| &t.header.signature == b"SSDT")
    }

    pub fn iter(&self) -> impl Iterator<Item = &AcpiTable> {
        self.tables.iter()
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acpi::aml;
    use tempfile::TempDir;

    #[test]
    fn test_header_parses_emitted_table() {
        let bytes = aml::definition_block(b"DSDT", "TESTDSDT", &[]);
        let table = AcpiTable::from_bytes("DSDT.aml", bytes).unwrap();
        assert_eq!(table.header.signature_str(), "DSDT");
        assert_eq!(table.header.oem_table_id_str(), "TESTDSDT");
        assert_eq!(table.header.length as usize, HEADER_LEN);
        assert!(table.checksum_valid());
    }

    #[test]
    fn test_truncated_header_is_malformed() {
        let err = SdtHeader::parse("SSDT-1.aml", b"SSDT\x10\x00").unwrap_err();
        assert!(matches!(err, AcpiError::Malformed { .. }));
    }

    #[test]
    fn test_load_dir_requires_dsdt() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("SSDT-1.aml"),
            aml::definition_block(b"SSDT", "CpuSsdt", &[]),
        )
        .unwrap();
        let err = AcpiTables::load_dir(dir.path()).unwrap_err();
        assert_eq!(err, AcpiError::MissingTable("DSDT".to_string()));

        std::fs::write(dir.path().join("DSDT.aml"), aml::definition_block(b"DSDT", "ALASKA", &[])).unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"ignored").unwrap();
        let tables = AcpiTables::load_dir(dir.path()).unwrap();
        assert_eq!(tables.len(), 2);
        assert_eq!(tables.ssdts().count(), 1);
        assert!(tables.dsdt().is_some());
    }
}
