//! Per-run state and phase tracking.
//!
//! - `PipelinePhase`: discrete phases of one build run
//! - `RunState`: current phase plus everything earlier phases produced
//!
//! Derived state is owned here so that a phase never observes a partially
//! initialized predecessor: each `store_*` call clears everything that
//! depends on the value being replaced.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::SystemTime;

use crate::compat::{Analysis, Customization};
use crate::config::GeneratedConfig;
use crate::error::PipelineError;
use crate::models::HardwareReport;
use crate::selection::Selection;
use crate::version::Version;

/// Phase enumeration, in run order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PipelinePhase {
    /// Idle; nothing derived is held.
    WaitingForInputs,

    /// Phase 1: hardware report parsing and schema checks
    Validating,

    /// Phase 2: support ranges, blockers, suggested target
    Analyzing,

    /// Phase 3: kept/disabled partition for the target
    Customizing,

    /// Phase 4: ACPI patches, kexts, SMBIOS model
    Selecting,

    /// Phase 5: config.plist contents
    Generating,

    /// Phase 6: file gathering and output tree sync
    Assembling,

    Completed,

    Failed,
}

impl PipelinePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelinePhase::WaitingForInputs => "waiting",
            PipelinePhase::Validating => "validating",
            PipelinePhase::Analyzing => "analyzing",
            PipelinePhase::Customizing => "customizing",
            PipelinePhase::Selecting => "selecting",
            PipelinePhase::Generating => "generating",
            PipelinePhase::Assembling => "assembling",
            PipelinePhase::Completed => "completed",
            PipelinePhase::Failed => "failed",
        }
    }

    /// 1-based step within a run, 0 for terminal and idle phases.
    pub fn step(&self) -> u32 {
        match self {
            PipelinePhase::Validating => 1,
            PipelinePhase::Analyzing => 2,
            PipelinePhase::Customizing => 3,
            PipelinePhase::Selecting => 4,
            PipelinePhase::Generating => 5,
            PipelinePhase::Assembling => 6,
            _ => 0,
        }
    }

    pub const TOTAL_STEPS: u32 = 6;

    /// Get all valid phase transitions FROM this phase.
    ///
    /// Every working phase can fail or unwind to `WaitingForInputs` on
    /// cancel. A completed run can be re-entered at customization (new
    /// target) or selection (toggled patches or kexts).
    pub fn valid_next_phases(&self) -> Vec<PipelinePhase> {
        use PipelinePhase::*;
        match self {
            WaitingForInputs => vec![Validating],
            Validating => vec![Analyzing, Failed, WaitingForInputs],
            Analyzing => vec![Customizing, Failed, WaitingForInputs],
            Customizing => vec![Selecting, Failed, WaitingForInputs],
            Selecting => vec![Generating, Failed, WaitingForInputs],
            Generating => vec![Assembling, Failed, WaitingForInputs],
            Assembling => vec![Completed, Failed, WaitingForInputs],
            Completed => vec![WaitingForInputs, Customizing, Selecting],
            Failed => vec![WaitingForInputs],
        }
    }

    pub fn can_transition_to(&self, next: PipelinePhase) -> bool {
        self.valid_next_phases().contains(&next)
    }
}

/// Everything one run has derived so far.
#[derive(Debug, Clone)]
pub struct RunState {
    pub phase: PipelinePhase,
    pub report: Option<HardwareReport>,
    pub analysis: Option<Analysis>,
    pub target: Option<Version>,
    pub customization: Option<Customization>,
    pub selection: Option<Selection>,
    pub generated: Option<GeneratedConfig>,
    /// Set only after a successful assembly.
    pub output: Option<PathBuf>,
    pub diagnostics: Vec<String>,
    pub error: Option<String>,
    pub start_time: SystemTime,
    pub last_update_time: SystemTime,
}

impl Default for RunState {
    fn default() -> Self {
        Self::new()
    }
}

impl RunState {
    pub fn new() -> Self {
        let now = SystemTime::now();
        RunState {
            phase: PipelinePhase::WaitingForInputs,
            report: None,
            analysis: None,
            target: None,
            customization: None,
            selection: None,
            generated: None,
            output: None,
            diagnostics: Vec::new(),
            error: None,
            start_time: now,
            last_update_time: now,
        }
    }

    /// Attempt to transition to the next phase.
    pub fn transition_to(&mut self, next: PipelinePhase) -> Result<(), PipelineError> {
        if !self.phase.can_transition_to(next) {
            return Err(PipelineError::InvalidTransition(format!(
                "{} -> {}",
                self.phase.as_str(),
                next.as_str()
            )));
        }
        if self.phase == PipelinePhase::WaitingForInputs {
            self.start_time = SystemTime::now();
        }
        self.phase = next;
        self.last_update_time = SystemTime::now();
        Ok(())
    }

    /// Record an error and mark the run as failed.
    pub fn record_error(&mut self, error: String) {
        self.error = Some(error);
        self.output = None;
        self.phase = PipelinePhase::Failed;
        self.last_update_time = SystemTime::now();
    }

    /// Drop all derived state and go back to idle.
    pub fn reset(&mut self) {
        *self = RunState::new();
    }

    pub fn store_report(&mut self, report: HardwareReport, warnings: Vec<String>) {
        self.report = Some(report);
        self.analysis = None;
        self.target = None;
        self.diagnostics = warnings;
        self.clear_from_customization();
    }

    pub fn store_analysis(&mut self, analysis: Analysis) {
        self.diagnostics.extend(analysis.diagnostics.iter().cloned());
        self.analysis = Some(analysis);
        self.target = None;
        self.clear_from_customization();
    }

    /// Choose the target; everything derived from the previous one goes.
    pub fn store_target(&mut self, target: Version) {
        self.target = Some(target);
        self.clear_from_customization();
    }

    pub fn store_customization(&mut self, customization: Customization) {
        self.diagnostics.extend(customization.diagnostics.iter().cloned());
        self.customization = Some(customization);
        self.selection = None;
        self.generated = None;
        self.output = None;
    }

    pub fn store_selection(&mut self, selection: Selection) {
        self.diagnostics.extend(selection.diagnostics.iter().cloned());
        self.diagnostics.extend(selection.smbios.warnings.iter().cloned());
        self.selection = Some(selection);
        self.generated = None;
        self.output = None;
    }

    pub fn store_generated(&mut self, generated: GeneratedConfig) {
        self.generated = Some(generated);
        self.output = None;
    }

    fn clear_from_customization(&mut self) {
        self.customization = None;
        self.selection = None;
        self.generated = None;
        self.output = None;
    }

    /// Output directory, only once the run completed.
    pub fn open_result(&self) -> Option<&PathBuf> {
        match self.phase {
            PipelinePhase::Completed => self.output.as_ref(),
            _ => None,
        }
    }

    pub fn elapsed_since_start(&self) -> Result<std::time::Duration, std::time::SystemTimeError> {
        self.start_time.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_transitions() {
        assert!(PipelinePhase::WaitingForInputs.can_transition_to(PipelinePhase::Validating));
        assert!(PipelinePhase::Validating.can_transition_to(PipelinePhase::Analyzing));
        assert!(!PipelinePhase::Validating.can_transition_to(PipelinePhase::Selecting));
        assert!(!PipelinePhase::Analyzing.can_transition_to(PipelinePhase::Assembling));
        assert!(PipelinePhase::Completed.can_transition_to(PipelinePhase::Customizing));
        assert!(!PipelinePhase::Failed.can_transition_to(PipelinePhase::Assembling));
    }

    #[test]
    fn test_every_working_phase_can_unwind() {
        for phase in [
            PipelinePhase::Validating,
            PipelinePhase::Analyzing,
            PipelinePhase::Customizing,
            PipelinePhase::Selecting,
            PipelinePhase::Generating,
            PipelinePhase::Assembling,
        ] {
            assert!(phase.can_transition_to(PipelinePhase::WaitingForInputs), "{}", phase.as_str());
            assert!(phase.can_transition_to(PipelinePhase::Failed), "{}", phase.as_str());
        }
    }

    #[test]
    fn test_invalid_transition_is_an_error() {
        let mut state = RunState::new();
        let err = state.transition_to(PipelinePhase::Generating).unwrap_err();
        assert_eq!(err.code(), "INVALID_TRANSITION");
        assert_eq!(state.phase, PipelinePhase::WaitingForInputs);
    }

    #[test]
    fn test_new_target_clears_downstream_state() {
        let mut state = RunState::new();
        state.output = Some(PathBuf::from("/tmp/out"));
        state.generated = Some(GeneratedConfig {
            config: crate::plist::Value::dict(),
            drivers: Vec::new(),
            tools: Vec::new(),
            boot_args: Vec::new(),
            audio_assist: false,
        });
        state.store_target(Version::new(23, 0, 0));
        assert!(state.generated.is_none());
        assert!(state.output.is_none());
        assert_eq!(state.target, Some(Version::new(23, 0, 0)));
    }

    #[test]
    fn test_result_hidden_until_completed() {
        let mut state = RunState::new();
        state.output = Some(PathBuf::from("/tmp/out"));
        assert!(state.open_result().is_none());
        state.phase = PipelinePhase::Completed;
        assert_eq!(state.open_result(), Some(&PathBuf::from("/tmp/out")));
        state.record_error("boom".into());
        assert!(state.open_result().is_none());
    }
}
