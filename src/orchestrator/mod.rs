//! Build orchestration: 6-phase pipeline (Validating -> Analyzing -> Customizing -> Selecting -> Generating -> Assembling).
//!
//! The interactive phases run on the caller's task and may block on the
//! prompter; the UI answers from its own thread. Assembly runs on a
//! blocking worker after the file-gathering step.

pub mod state;

use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, watch, RwLock};

pub use state::{PipelinePhase, RunState};

use crate::acpi::AcpiTables;
use crate::assembler::{self, AssemblyInput, AssemblyReport};
use crate::compat::{self, Analysis};
use crate::config::{self, template, GeneratorInput, Settings, SettingsManager};
use crate::error::{BuildError, PipelineError};
use crate::kb::os;
use crate::report;
use crate::selection::{self, KextSelection, SelectionOptions};
use crate::system::{fetch_with_retry, ResourceFetcher};
use crate::ui::{ask_confirm, BuildEvent, ProgressEvent, ProgressStatus, Prompt, PromptTopic, Prompter};
use crate::version::Version;
use crate::LogCollector;

/// Inputs of one run.
#[derive(Debug, Clone, Default)]
pub struct PipelineInputs {
    pub report_path: PathBuf,
    pub acpi_dir: PathBuf,
    /// Requested target; `None` takes the analyzer's suggestion.
    pub target: Option<Version>,
    /// JSON template overriding the bundled one.
    pub template_path: Option<PathBuf>,
    pub options: SelectionOptions,
}

/// Drives one build at a time and reports progress to the UI.
#[derive(Clone)]
pub struct Pipeline {
    /// Shared mutable state protected by RwLock for thread safety
    state: Arc<RwLock<RunState>>,

    settings: Arc<std::sync::RwLock<Settings>>,

    /// Channel for sending build events to UI
    build_tx: Option<mpsc::Sender<BuildEvent>>,

    /// Channel for receiving cancellation signals from UI
    cancel_rx: watch::Receiver<bool>,

    fetcher: Option<Arc<dyn ResourceFetcher>>,

    pub log_collector: Option<Arc<LogCollector>>,
}

impl Pipeline {
    pub fn new(
        settings: Arc<std::sync::RwLock<Settings>>,
        build_tx: Option<mpsc::Sender<BuildEvent>>,
        cancel_rx: watch::Receiver<bool>,
    ) -> Self {
        Pipeline {
            state: Arc::new(RwLock::new(RunState::new())),
            settings,
            build_tx,
            cancel_rx,
            fetcher: None,
            log_collector: None,
        }
    }

    pub fn with_fetcher(mut self, fetcher: Arc<dyn ResourceFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn with_log_collector(mut self, collector: Arc<LogCollector>) -> Self {
        self.log_collector = Some(collector);
        self
    }

    pub async fn current_phase(&self) -> PipelinePhase {
        self.state.read().await.phase
    }

    /// Copy of the run state for display.
    pub async fn snapshot(&self) -> RunState {
        self.state.read().await.clone()
    }

    pub async fn diagnostics(&self) -> Vec<String> {
        self.state.read().await.diagnostics.clone()
    }

    /// Output directory of the last run, only after it completed.
    pub async fn open_result(&self) -> Option<PathBuf> {
        self.state.read().await.open_result().cloned()
    }

    /// Settings are read once per phase; edits apply from the next phase on.
    fn settings_snapshot(&self) -> Settings {
        SettingsManager::snapshot(&self.settings)
    }

    /// Progress and log lines; dropped when the UI falls behind.
    fn emit(&self, event: BuildEvent) {
        if let Some(ref tx) = self.build_tx {
            if tx.try_send(event).is_err() {
                log::debug!("[Pipeline] Event channel full or closed; dropping event");
            }
        }
    }

    /// Phase changes and completions wait for room in the channel.
    async fn deliver(&self, event: BuildEvent) {
        if let Some(ref tx) = self.build_tx {
            if tx.send(event).await.is_err() {
                log::debug!("[Pipeline] Event channel closed");
            }
        }
    }

    fn progress(&self, phase: PipelinePhase, status: ProgressStatus, message: impl Into<String>) {
        self.emit(BuildEvent::Progress(ProgressEvent {
            phase: phase.as_str().to_string(),
            step: phase.step(),
            total: PipelinePhase::TOTAL_STEPS,
            message: message.into(),
            status,
        }));
    }

    fn publish_diagnostics(&self, lines: &[String]) {
        for line in lines {
            log::warn!("[Pipeline] {}", line);
            self.emit(BuildEvent::Log(line.clone()));
        }
    }

    fn check_cancelled(&self) -> Result<(), PipelineError> {
        if *self.cancel_rx.borrow() {
            Err(PipelineError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Transition to the next phase and emit PhaseChanged event to UI.
    pub async fn transition_phase(&self, next: PipelinePhase) -> Result<(), PipelineError> {
        self.state.write().await.transition_to(next)?;
        self.deliver(BuildEvent::PhaseChanged(next.as_str().to_string())).await;
        if let Some(ref collector) = self.log_collector {
            collector.log_parsed(format!("PHASE TRANSITION: {}", next.as_str()));
        }
        Ok(())
    }

    /// Full run from the hardware report to the EFI tree.
    pub async fn run(&self, inputs: &PipelineInputs, prompter: &dyn Prompter) -> Result<AssemblyReport, PipelineError> {
        {
            let mut state = self.state.write().await;
            if state.phase != PipelinePhase::WaitingForInputs {
                state.reset();
            }
        }
        let result = self.execute(inputs, prompter, PipelinePhase::Validating).await;
        self.finish(result).await
    }

    /// Rebuild a completed run for another target, keeping the analysis.
    pub async fn retarget(
        &self,
        target: Version,
        inputs: &PipelineInputs,
        prompter: &dyn Prompter,
    ) -> Result<AssemblyReport, PipelineError> {
        {
            let mut state = self.state.write().await;
            if state.phase != PipelinePhase::Completed {
                return Err(PipelineError::InvalidTransition(format!(
                    "{} -> {}",
                    state.phase.as_str(),
                    PipelinePhase::Customizing.as_str()
                )));
            }
            let analysis = state
                .analysis
                .as_ref()
                .ok_or_else(|| PipelineError::MissingInput("analysis".to_string()))?;
            let settings = self.settings_snapshot();
            let (target, notes) = choose_target(analysis, Some(target), settings.include_beta)?;
            state.diagnostics.extend(notes);
            state.store_target(target);
        }
        let result = self.execute(inputs, prompter, PipelinePhase::Customizing).await;
        self.finish(result).await
    }

    /// Rebuild a completed run after patch or kext toggles.
    pub async fn reselect(&self, inputs: &PipelineInputs, prompter: &dyn Prompter) -> Result<AssemblyReport, PipelineError> {
        if self.current_phase().await != PipelinePhase::Completed {
            return Err(PipelineError::InvalidTransition(format!(
                "{} -> {}",
                self.current_phase().await.as_str(),
                PipelinePhase::Selecting.as_str()
            )));
        }
        let result = self.execute(inputs, prompter, PipelinePhase::Selecting).await;
        self.finish(result).await
    }

    /// Translate the outcome of a run into state and events.
    async fn finish(&self, result: Result<AssemblyReport, PipelineError>) -> Result<AssemblyReport, PipelineError> {
        match result {
            Ok(report) => {
                {
                    let mut state = self.state.write().await;
                    state.output = Some(report.efi_dir.clone());
                }
                self.transition_phase(PipelinePhase::Completed).await?;
                log::info!(target: "parsed", "[Pipeline] BUILD COMPLETE: {}", report.efi_dir.display());
                self.deliver(BuildEvent::BuildComplete {
                    success: true,
                    output: Some(report.efi_dir.clone()),
                    code: None,
                    message: format!("EFI written to {}", report.efi_dir.display()),
                })
                .await;
                Ok(report)
            }
            Err(PipelineError::Cancelled) => {
                log::info!(target: "parsed", "[Pipeline] Cancelled; back to waiting for inputs");
                self.state.write().await.reset();
                self.deliver(BuildEvent::PhaseChanged(PipelinePhase::WaitingForInputs.as_str().to_string()))
                    .await;
                Err(PipelineError::Cancelled)
            }
            Err(e) => {
                let phase = {
                    let mut state = self.state.write().await;
                    let phase = state.phase;
                    state.record_error(e.to_string());
                    phase
                };
                log::error!("[Pipeline] {} failed: {} ({})", phase.as_str(), e, e.code());
                self.progress(phase, ProgressStatus::Error, e.user_message());
                self.deliver(BuildEvent::PhaseChanged(PipelinePhase::Failed.as_str().to_string()))
                    .await;
                // Input errors and blockers stop the run before anything is built
                if !matches!(e, PipelineError::Report(_) | PipelineError::Blocked(_)) {
                    self.deliver(BuildEvent::BuildComplete {
                        success: false,
                        output: None,
                        code: Some(e.code()),
                        message: e.user_message(),
                    })
                    .await;
                }
                Err(e)
            }
        }
    }

    async fn execute(
        &self,
        inputs: &PipelineInputs,
        prompter: &dyn Prompter,
        start: PipelinePhase,
    ) -> Result<AssemblyReport, PipelineError> {
        if start == PipelinePhase::Validating {
            self.validate_and_analyze(inputs, prompter).await?;
        }
        if start != PipelinePhase::Selecting {
            self.customize(prompter).await?;
        }
        self.select(inputs, prompter).await?;
        self.generate(inputs).await?;
        self.assemble(prompter).await
    }

    async fn validate_and_analyze(&self, inputs: &PipelineInputs, prompter: &dyn Prompter) -> Result<(), PipelineError> {
        // STEP 1: validate the report
        self.transition_phase(PipelinePhase::Validating).await?;
        let settings = self.settings_snapshot();
        self.progress(
            PipelinePhase::Validating,
            ProgressStatus::Loading,
            format!("Reading {}", inputs.report_path.display()),
        );
        let (report, warnings) = report::validate_file(&inputs.report_path)
            .into_result()
            .map_err(PipelineError::Report)?;
        self.publish_diagnostics(&warnings);
        if !warnings.is_empty() {
            let proceed = ask_confirm(
                prompter,
                Prompt::confirm(
                    PromptTopic::ReportValidation,
                    "Hardware report warnings",
                    format!("The report produced {} warning(s). Continue anyway?", warnings.len()),
                    true,
                ),
            )?;
            if !proceed {
                return Err(PipelineError::Cancelled);
            }
        }
        self.state.write().await.store_report(report.clone(), warnings);
        self.progress(PipelinePhase::Validating, ProgressStatus::Done, "Hardware report accepted");

        // STEP 2: analyze
        self.check_cancelled()?;
        self.transition_phase(PipelinePhase::Analyzing).await?;
        self.progress(PipelinePhase::Analyzing, ProgressStatus::Processing, "Checking compatibility");
        let analysis = compat::analyze(report, settings.include_beta);
        self.publish_diagnostics(&analysis.diagnostics);
        if analysis.is_blocked() {
            return Err(PipelineError::Blocked(analysis.blockers.clone()));
        }
        let (target, notes) = choose_target(&analysis, inputs.target, settings.include_beta)?;
        self.publish_diagnostics(&notes);
        log::info!(target: "parsed", "[Pipeline] Target: {}", os::os_name(target));
        {
            let mut state = self.state.write().await;
            state.store_analysis(analysis);
            state.diagnostics.extend(notes);
            state.store_target(target);
        }
        self.progress(PipelinePhase::Analyzing, ProgressStatus::Done, os::os_name(target));
        Ok(())
    }

    async fn customize(&self, prompter: &dyn Prompter) -> Result<(), PipelineError> {
        self.check_cancelled()?;
        self.transition_phase(PipelinePhase::Customizing).await?;
        let (report, target) = {
            let state = self.state.read().await;
            let report = state
                .analysis
                .as_ref()
                .map(|a| a.report.clone())
                .ok_or_else(|| PipelineError::MissingInput("analysis".to_string()))?;
            let target = state
                .target
                .ok_or_else(|| PipelineError::MissingInput("target".to_string()))?;
            (report, target)
        };
        self.progress(PipelinePhase::Customizing, ProgressStatus::Processing, "Choosing devices");
        let customization = compat::customize(&report, target, prompter)?;
        self.publish_diagnostics(&customization.diagnostics);
        let message = format!("{} device(s) disabled", customization.disabled.len());
        self.state.write().await.store_customization(customization);
        self.progress(PipelinePhase::Customizing, ProgressStatus::Done, message);
        Ok(())
    }

    async fn select(&self, inputs: &PipelineInputs, prompter: &dyn Prompter) -> Result<(), PipelineError> {
        self.check_cancelled()?;
        self.transition_phase(PipelinePhase::Selecting).await?;
        let (mut customization, target) = {
            let state = self.state.read().await;
            let customization = state
                .customization
                .clone()
                .ok_or_else(|| PipelineError::MissingInput("customization".to_string()))?;
            let target = state
                .target
                .ok_or_else(|| PipelineError::MissingInput("target".to_string()))?;
            (customization, target)
        };
        self.progress(
            PipelinePhase::Selecting,
            ProgressStatus::Loading,
            format!("Reading ACPI tables from {}", inputs.acpi_dir.display()),
        );
        let tables = AcpiTables::load_dir(&inputs.acpi_dir)?;
        let selection = selection::select(
            &mut customization.hardware,
            &customization.disabled,
            customization.needs_extended,
            target,
            &tables,
            &inputs.options,
            prompter,
        )?;
        self.publish_diagnostics(&selection.diagnostics);
        self.publish_diagnostics(&selection.smbios.warnings);
        let message = format!(
            "{} with {} kext(s) and {} ACPI table(s)",
            selection.smbios.model.name,
            selection.kexts.kexts.len(),
            selection.patches.add.len()
        );
        {
            let mut state = self.state.write().await;
            if let Some(stored) = state.customization.as_mut() {
                stored.hardware = customization.hardware;
            }
            state.store_selection(selection);
        }
        self.progress(PipelinePhase::Selecting, ProgressStatus::Done, message);
        Ok(())
    }

    async fn generate(&self, inputs: &PipelineInputs) -> Result<(), PipelineError> {
        self.check_cancelled()?;
        self.transition_phase(PipelinePhase::Generating).await?;
        let settings = self.settings_snapshot();
        self.progress(PipelinePhase::Generating, ProgressStatus::Processing, "Building config.plist");
        let template = template::load_template(inputs.template_path.as_deref())?;
        let generated = {
            let state = self.state.read().await;
            let (customization, selection, target) = match (&state.customization, &state.selection, state.target) {
                (Some(c), Some(s), Some(t)) => (c, s, t),
                _ => return Err(PipelineError::MissingInput("selection".to_string())),
            };
            config::generate(
                &template,
                &GeneratorInput {
                    hardware: &customization.hardware,
                    disabled: &customization.disabled,
                    selection,
                    target,
                    settings: &settings,
                },
            )?
        };
        let message = format!("boot-args: {}", generated.boot_args.join(" "));
        self.state.write().await.store_generated(generated);
        self.progress(PipelinePhase::Generating, ProgressStatus::Done, message);
        Ok(())
    }

    async fn assemble(&self, prompter: &dyn Prompter) -> Result<AssemblyReport, PipelineError> {
        self.check_cancelled()?;
        self.transition_phase(PipelinePhase::Assembling).await?;
        let settings = self.settings_snapshot();
        let (selection, generated) = {
            let state = self.state.read().await;
            match (&state.selection, &state.generated) {
                (Some(s), Some(g)) => (s.clone(), g.clone()),
                _ => return Err(PipelineError::MissingInput("generated config".to_string())),
            }
        };

        // STEP 1: file gathering, the last point a prompt may appear
        self.progress(PipelinePhase::Assembling, ProgressStatus::Loading, "Gathering resources");
        self.gather_resources(&settings, &selection.kexts, prompter).await?;
        self.check_cancelled()?;

        // STEP 2: plan and sync on a blocking worker
        self.progress(
            PipelinePhase::Assembling,
            ProgressStatus::Processing,
            format!("Writing {}", settings.output_path().display()),
        );
        let report = tokio::task::spawn_blocking(move || {
            let skeleton_dir = settings.skeleton_path();
            let kexts_dir = settings.kexts_path();
            let output_dir = settings.output_path();
            assembler::assemble(&AssemblyInput {
                skeleton_dir: &skeleton_dir,
                kexts_dir: &kexts_dir,
                output_dir: &output_dir,
                generated: &generated,
                patches: &selection.patches,
                kexts: &selection.kexts,
                picker_variant: &settings.picker_variant,
            })
        })
        .await
        .map_err(|e| BuildError::Io(std::io::Error::other(e.to_string())))??;

        self.publish_diagnostics(&report.stats.warnings);
        self.progress(
            PipelinePhase::Assembling,
            ProgressStatus::Done,
            format!("{} file(s) changed", report.stats.mutations()),
        );
        Ok(report)
    }

    /// Fill missing skeleton and kext cache entries through the fetcher.
    async fn gather_resources(
        &self,
        settings: &Settings,
        kexts: &KextSelection,
        prompter: &dyn Prompter,
    ) -> Result<(), PipelineError> {
        let mut missing = Vec::new();
        let skeleton = settings.skeleton_path();
        if !skeleton.join("EFI").is_dir() {
            missing.push(("skeleton:OpenCorePkg".to_string(), skeleton));
        }
        let kexts_dir = settings.kexts_path();
        for kext in &kexts.kexts {
            let path = kexts_dir.join(&kext.source);
            if !path.is_dir() {
                missing.push((format!("kext:{}", kext.source), path));
            }
        }
        if missing.is_empty() {
            return Ok(());
        }

        let fetcher = match self.fetcher {
            Some(ref fetcher) => fetcher.clone(),
            None => {
                log::warn!("[Pipeline] {} resource(s) missing and no fetcher is configured", missing.len());
                return Ok(());
            }
        };
        let names: Vec<&str> = missing.iter().map(|(url, _)| url.as_str()).collect();
        let confirmed = ask_confirm(
            prompter,
            Prompt::confirm(
                PromptTopic::Download,
                "Download resources",
                format!("Missing from the local cache: {}. Download now?", names.join(", ")),
                true,
            ),
        )?;
        if !confirmed {
            log::warn!("[Pipeline] Download declined; assembling with the current cache");
            return Ok(());
        }
        for (url, path) in &missing {
            self.check_cancelled()?;
            log::info!(target: "parsed", "[Pipeline] Downloading {}", url);
            if !fetch_with_retry(fetcher.as_ref(), url, path).await {
                return Err(PipelineError::FetchFailed(url.clone()));
            }
        }
        Ok(())
    }
}

/// Pick the run's target release.
///
/// A requested target must be one of the targetable releases; without one
/// the analyzer's suggestion is used, then the newest targetable release.
pub fn choose_target(
    analysis: &Analysis,
    requested: Option<Version>,
    include_beta: bool,
) -> Result<(Version, Vec<String>), PipelineError> {
    let releases = analysis.targetable_releases(include_beta);
    let mut notes = Vec::new();
    if let Some(requested) = requested {
        return match releases.iter().find(|r| r.kernel_major == requested.major) {
            Some(release) => {
                if analysis.target_needs_extended(release.version()) {
                    notes.push(format!("{} needs extended support", release.display_name()));
                }
                Ok((release.version(), notes))
            }
            None => Err(PipelineError::UnsupportedTarget(os::os_name(requested))),
        };
    }
    if let Some(suggested) = analysis
        .suggested_target
        .filter(|s| releases.iter().any(|r| r.kernel_major == s.major))
    {
        return Ok((suggested, notes));
    }
    match releases.last() {
        Some(newest) => {
            notes.push(format!(
                "No suggested target; falling back to the newest reachable release, {}",
                newest.display_name()
            ));
            Ok((newest.version(), notes))
        }
        None => Err(PipelineError::UnsupportedTarget(
            "no macOS release supports every kept device".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::version::SupportRange;

    fn analysis(native: Option<(u32, u32)>, extended: Option<(u32, u32)>, suggested: Option<u32>) -> Analysis {
        let (report, _) = report::validate_str(
            r#"{
                "BIOS": { "Firmware Type": "UEFI", "Secure Boot": "Disabled" },
                "Motherboard": { "Manufacturer": "X", "Model": "Y", "Chipset": "Z390", "Platform": "Desktop" },
                "CPU": { "Processor Name": "Intel Core i5-9600K", "Codename": "Coffee Lake", "Core Count": 6,
                         "SIMD Features": ["SSE4.1", "SSE4.2"] }
            }"#,
        )
        .into_result()
        .unwrap();
        Analysis {
            report,
            native_envelope: native.and_then(|(lo, hi)| SupportRange::majors(lo, hi)),
            extended_envelope: extended.and_then(|(lo, hi)| SupportRange::majors(lo, hi)),
            blockers: Vec::new(),
            suggested_target: suggested.map(Version::upper),
            diagnostics: Vec::new(),
        }
    }

    #[test]
    fn test_requested_target_inside_envelope() {
        let a = analysis(Some((17, 24)), Some((17, 24)), Some(24));
        let (target, notes) = choose_target(&a, Some(Version::upper(22)), false).unwrap();
        assert_eq!(target.major, 22);
        assert!(notes.is_empty());
    }

    #[test]
    fn test_requested_target_outside_envelope() {
        let a = analysis(Some((17, 21)), Some((17, 21)), Some(21));
        let err = choose_target(&a, Some(Version::upper(23)), false).unwrap_err();
        assert_eq!(err.code(), "UNSUPPORTED_TARGET");
    }

    #[test]
    fn test_beta_only_when_included() {
        let a = analysis(Some((17, 24)), Some((17, 24)), Some(23));
        assert!(choose_target(&a, Some(Version::upper(24)), false).is_err());
        assert_eq!(choose_target(&a, Some(Version::upper(24)), true).unwrap().0.major, 24);
    }

    #[test]
    fn test_extended_target_is_noted() {
        let a = analysis(Some((17, 21)), Some((17, 24)), Some(21));
        let (target, notes) = choose_target(&a, Some(Version::upper(23)), false).unwrap();
        assert_eq!(target.major, 23);
        assert_eq!(notes.len(), 1);
    }

    #[test]
    fn test_falls_back_to_newest_with_warning() {
        let a = analysis(None, Some((20, 23)), None);
        let (target, notes) = choose_target(&a, None, false).unwrap();
        assert_eq!(target.major, 23);
        assert!(notes[0].contains("falling back"));
    }

    #[test]
    fn test_nothing_targetable() {
        let a = analysis(None, None, None);
        assert!(choose_target(&a, None, false).is_err());
    }
}
