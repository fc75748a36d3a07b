//! Static knowledge base.
//!
//! Pure data plus lookups: OS releases, CPU generations, PCI/USB ID tables,
//! audio codec layouts and the Mac model catalog. The kext and ACPI patch
//! catalogs carry guard functions over selection state and live next to
//! their selectors in [`crate::selection`].

pub mod codecs;
pub mod cpu;
pub mod os;
pub mod pci;
pub mod smbios;

pub use os::{OsRelease, ReleaseStatus, OS_RELEASES};
pub use smbios::{ModelCategory, SmbiosModel, SMBIOS_MODELS};
