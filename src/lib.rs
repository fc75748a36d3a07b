//! EFI Forge
//!
//! Builds an OpenCore EFI folder tailored to one machine from a hardware
//! report and its dumped ACPI tables.
//!
//! The system is organized into functional modules:
//! - **error**: Unified error type hierarchy
//! - **version** / **models**: OS versions, support ranges, report shapes
//! - **kb**: Static knowledge base (PCI ids, codecs, CPUs, OS releases, SMBIOS models)
//! - **report**: Hardware report schema checks and normalization
//! - **compat**: Compatibility analyzer and hardware customizer
//! - **acpi**: ACPI table reader, DSDT scanner and AML emitter
//! - **selection**: ACPI patch, kext and SMBIOS selection
//! - **plist**: Typed property-list tree and XML writer
//! - **config**: Settings, configuration template and generator
//! - **assembler**: EFI tree planning, pruning and on-disk sync
//! - **orchestrator**: Per-run state and the pipeline driver
//! - **ui**: Decision requests and progress events
//! - **system**: Sanitized subprocess runner and external collaborators

// Core foundational modules
pub mod error;
pub mod models;
pub mod version;

// Static data
pub mod kb;

// Interactive phase
pub mod compat;
pub mod report;
pub mod selection;

// ACPI tables and property lists
pub mod acpi;
pub mod plist;

// Background phase
pub mod assembler;
pub mod config;

pub mod orchestrator;
pub mod system;
pub mod ui;

// Robust, decoupled logging system
pub mod log_collector;

// Re-export the log crate for macro usage
pub use log;

pub use log_collector::{LogCollector, LogLine};

// ============================================================================
// PUBLIC RE-EXPORTS FOR CONVENIENCE
// ============================================================================

pub use error::{
    AcpiError, Blocker, BuildError, ConfigError, ExecError, PipelineError, ReportError, SelectionError,
};

pub use models::{
    CustomizedHardware, Device, DeviceCategory, DeviceKind, DisabledDevices, FirmwareType, HardwareReport, Platform,
};
pub use version::{SupportRange, Version};

pub use assembler::{assemble, AssemblyInput, AssemblyReport};
pub use compat::{analyze, customize, Analysis, Customization};
pub use config::{generate, GeneratedConfig, Settings, SettingsManager, SettingsStore};
pub use orchestrator::{Pipeline, PipelineInputs, PipelinePhase};
pub use selection::{select, Selection, SelectionOptions};
pub use ui::{BuildEvent, Prompt, PromptResponse, PromptTopic, Prompter, ScriptedUi, UiBridge, UiHandler};
