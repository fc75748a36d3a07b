//! ACPI input and output.
//!
//! [`tables`] reads the dumped firmware tables, [`namespace`] recovers
//! device paths from them and [`aml`] writes the SSDTs that patches add.

pub mod aml;
pub mod namespace;
pub mod tables;

pub use namespace::{AcpiDevice, AcpiNamespace};
pub use tables::{AcpiTable, AcpiTables, SdtHeader};
