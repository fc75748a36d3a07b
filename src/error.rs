//! Unified error type hierarchy for EFI Forge
//!
//! Provides structured error handling with ReportError, Blocker, AcpiError,
//! SelectionError, BuildError, ExecError, ConfigError and the top-level
//! PipelineError. Every variant carries a stable machine code so the worker
//! can translate failures into a `build_complete(false, ..)` event.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Hardware-report input errors (surfaced by the Validator).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReportError {
    #[error("Hardware report could not be parsed: {0}")]
    Parse(String),

    #[error("Hardware report does not match the expected schema: {0}")]
    Schema(String),

    #[error("Hardware report has no CPU section")]
    MissingCpu,

    #[error("Hardware report has no Motherboard section")]
    MissingMotherboard,

    #[error("Hardware report could not be read: {0}")]
    Io(String),
}

impl ReportError {
    /// Stable machine code.
    pub fn code(&self) -> &'static str {
        match self {
            ReportError::Parse(_) => "REPORT_PARSE",
            ReportError::Schema(_) => "REPORT_SCHEMA",
            ReportError::MissingCpu => "REPORT_MISSING_CPU",
            ReportError::MissingMotherboard => "REPORT_MISSING_MOTHERBOARD",
            ReportError::Io(_) => "REPORT_IO",
        }
    }
}

/// Compatibility blockers emitted by the Analyzer.
///
/// A non-empty blocker list halts the pipeline before customization.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Blocker {
    #[error("NO_SSE4: the CPU does not support SSE4.1")]
    NoSse4,

    #[error("NO_COMPATIBLE_GPU: no GPU can drive a display under macOS")]
    NoCompatibleGpu,

    #[error("INTEL_VMD: Intel VMD is enabled")]
    IntelVmd,

    #[error("NO_COMPATIBLE_STORAGE: no storage controller is usable under macOS")]
    NoCompatibleStorage,
}

impl Blocker {
    /// Stable machine code.
    pub fn code(&self) -> &'static str {
        match self {
            Blocker::NoSse4 => "NO_SSE4",
            Blocker::NoCompatibleGpu => "NO_COMPATIBLE_GPU",
            Blocker::IntelVmd => "INTEL_VMD",
            Blocker::NoCompatibleStorage => "NO_COMPATIBLE_STORAGE",
        }
    }

    /// Human-readable explanation for the UI.
    pub fn message(&self) -> &'static str {
        match self {
            Blocker::NoSse4 => "The processor lacks SSE4.1, which every supported macOS release requires.",
            Blocker::NoCompatibleGpu => "None of the graphics devices in this machine is supported by macOS.",
            Blocker::IntelVmd => "Intel Volume Management Device is active, which hides NVMe drives from macOS.",
            Blocker::NoCompatibleStorage => "No storage controller in this machine is usable by macOS.",
        }
    }

    /// Suggested fix for the user.
    pub fn remediation(&self) -> &'static str {
        match self {
            Blocker::NoSse4 => "Use a processor with SSE4.1 support (Intel Penryn or newer, AMD Bulldozer or newer).",
            Blocker::NoCompatibleGpu => "Install a supported graphics card or use a CPU with a supported integrated GPU.",
            Blocker::IntelVmd => "Disable VMD in the firmware settings (BIOS setup) and switch the SATA/NVMe mode to AHCI.",
            Blocker::NoCompatibleStorage => "Switch the storage controller to AHCI mode in the firmware settings or add a supported NVMe/SATA controller.",
        }
    }
}

/// ACPI table reading errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AcpiError {
    #[error("Required ACPI table {0} was not found")]
    MissingTable(String),

    #[error("ACPI table {name} is malformed: {reason}")]
    Malformed { name: String, reason: String },

    #[error("ACPI directory could not be read: {0}")]
    Io(String),
}

impl AcpiError {
    /// Stable machine code.
    pub fn code(&self) -> &'static str {
        match self {
            AcpiError::MissingTable(_) => "ACPI_TABLE_MISSING",
            AcpiError::Malformed { .. } => "ACPI_MALFORMED",
            AcpiError::Io(_) => "ACPI_IO",
        }
    }
}

/// Patch, kext and SMBIOS selection errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SelectionError {
    #[error("ACPI patch {id} needs the {table} table")]
    MissingAcpiTable { id: String, table: String },

    #[error("Unknown ACPI patch: {0}")]
    UnknownPatch(String),

    #[error("Unknown kext: {0}")]
    UnknownKext(String),

    #[error("Selection did not converge after {0} rounds")]
    NoFixedPoint(usize),

    #[error("No SMBIOS model is available for the {0} category")]
    NoSmbiosModel(String),
}

/// Assembler (build phase) errors.
#[derive(Error, Debug)]
pub enum BuildError {
    #[error("Bootloader skeleton not found at {0}")]
    SkeletonMissing(PathBuf),

    #[error("Failed to write config.plist: {0}")]
    ConfigWrite(String),

    #[error("Failed to install kext {name}: {reason}")]
    KextCopy { name: String, reason: String },

    #[error("Failed to write ACPI table {name}: {reason}")]
    AcpiWrite { name: String, reason: String },

    #[error("Bootloader skeleton has no {0}")]
    SkeletonIncomplete(String),

    #[error("IO error during assembly: {0}")]
    Io(#[from] io::Error),
}

impl BuildError {
    /// Stable machine code.
    pub fn code(&self) -> &'static str {
        match self {
            BuildError::SkeletonMissing(_) => "SKELETON_MISSING",
            BuildError::ConfigWrite(_) => "CONFIG_WRITE",
            BuildError::KextCopy { .. } => "KEXT_COPY",
            BuildError::AcpiWrite { .. } => "ACPI_WRITE",
            BuildError::SkeletonIncomplete(_) => "SKELETON_INCOMPLETE",
            BuildError::Io(_) => "BUILD_IO",
        }
    }
}

/// Subprocess execution errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecError {
    #[error("Binary '{0}' is not in the allowed list")]
    BinaryNotAllowed(String),

    #[error("Argument rejected (shell metacharacters): {0}")]
    UnsafeArgument(String),

    #[error("Path outside the safe root: {0}")]
    PathOutsideRoot(String),

    #[error("Command '{cmd}' timed out after {secs}s")]
    Timeout { cmd: String, secs: u64 },

    #[error("Command '{cmd}' failed to start: {reason}")]
    Spawn { cmd: String, reason: String },

    #[error("Command '{cmd}' exited with code {code}")]
    NonZeroExit { cmd: String, code: i32 },
}

impl ExecError {
    /// Exit code the caller observes; timeouts map to 124 like coreutils `timeout`.
    pub fn exit_code(&self) -> i32 {
        match self {
            ExecError::Timeout { .. } => 124,
            ExecError::NonZeroExit { code, .. } => *code,
            _ => 126,
        }
    }
}

/// Settings file errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Settings file not found: {0}")]
    FileNotFound(String),

    #[error("Invalid JSON in settings: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("Settings validation failed: {0}")]
    ValidationFailed(String),

    #[error("IO error during settings operations: {0}")]
    IoError(#[from] io::Error),
}

/// Top-level pipeline error returned by every phase.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Hardware report rejected: {0:?}")]
    Report(Vec<ReportError>),

    #[error("Compatibility blockers: {}", format_blockers(.0))]
    Blocked(Vec<Blocker>),

    #[error(transparent)]
    Acpi(#[from] AcpiError),

    #[error(transparent)]
    Selection(#[from] SelectionError),

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    Exec(#[from] ExecError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Cancelled by user")]
    Cancelled,

    #[error("Invalid phase transition: {0}")]
    InvalidTransition(String),

    #[error("Pipeline input missing: {0}")]
    MissingInput(String),

    #[error("Target not supported by this hardware: {0}")]
    UnsupportedTarget(String),

    #[error("Resource download failed: {0}")]
    FetchFailed(String),
}

fn format_blockers(blockers: &[Blocker]) -> String {
    blockers
        .iter()
        .map(|b| b.code())
        .collect::<Vec<_>>()
        .join(", ")
}

impl PipelineError {
    /// Stable machine code for the build_complete event.
    pub fn code(&self) -> String {
        match self {
            PipelineError::Report(errors) => errors
                .first()
                .map(|e| e.code().to_string())
                .unwrap_or_else(|| "REPORT_SCHEMA".to_string()),
            PipelineError::Blocked(blockers) => format_blockers(blockers),
            PipelineError::Acpi(e) => e.code().to_string(),
            PipelineError::Selection(_) => "SELECTION".to_string(),
            PipelineError::Build(e) => e.code().to_string(),
            PipelineError::Exec(e) => format!("EXEC_{}", e.exit_code()),
            PipelineError::Config(_) => "CONFIG".to_string(),
            PipelineError::Cancelled => "CANCELLED".to_string(),
            PipelineError::InvalidTransition(_) => "INVALID_TRANSITION".to_string(),
            PipelineError::MissingInput(_) => "MISSING_INPUT".to_string(),
            PipelineError::UnsupportedTarget(_) => "UNSUPPORTED_TARGET".to_string(),
            PipelineError::FetchFailed(_) => "FETCH_FAILED".to_string(),
        }
    }

    /// Get a user-facing error message suitable for UI display
    pub fn user_message(&self) -> String {
        match self {
            PipelineError::Blocked(blockers) => blockers
                .iter()
                .map(|b| format!("{} {} Fix: {}", b.code(), b.message(), b.remediation()))
                .collect::<Vec<_>>()
                .join("\n"),
            PipelineError::Report(errors) => errors
                .iter()
                .map(|e| e.to_string())
                .collect::<Vec<_>>()
                .join("\n"),
            other => other.to_string(),
        }
    }
}
