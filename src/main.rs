use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio::sync::mpsc;

use efi_forge::config::{Settings, SettingsManager};
use efi_forge::kb::os;
use efi_forge::selection::{BinaryPatch, SelectionOptions};
use efi_forge::system::fetch::{common_root, FETCH_TOOLS};
use efi_forge::system::{ArchiveFetcher, ExternalReportGenerator, ReportGenerator, ResourceFetcher, SafeRunner};
use efi_forge::ui::{BuildEvent, ConsoleUi, ScriptedUi, UiBridge, UiHandler};
use efi_forge::{compat, report, LogCollector, LogLine, Pipeline, PipelineInputs};

#[derive(Parser, Debug)]
#[command(name = "efi-forge", version, about = "Build an OpenCore EFI folder from a hardware report")]
struct Cli {
    /// Print every log line and progress step
    #[arg(short, long, global = true, action = clap::ArgAction::SetTrue)]
    verbose: bool,

    /// Settings file to use instead of the per-user one
    #[arg(long, value_name = "FILE", global = true)]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build an EFI folder
    Build(BuildArgs),
    /// Print the compatibility analysis of a report
    Analyze {
        #[arg(short, long, value_name = "FILE")]
        report: PathBuf,

        #[arg(long, action = clap::ArgAction::SetTrue)]
        include_beta: bool,
    },
}

#[derive(Args, Debug)]
struct BuildArgs {
    #[arg(short, long, value_name = "FILE")]
    report: PathBuf,

    /// Directory of dumped ACPI tables (must contain DSDT.aml)
    #[arg(short, long, value_name = "DIR")]
    acpi: PathBuf,

    /// Target release, e.g. `14`, `10.15` or `Sonoma`
    #[arg(long, value_name = "VERSION")]
    macos: Option<String>,

    #[arg(short, long, value_name = "DIR")]
    output: Option<PathBuf>,

    #[arg(long, value_name = "DIR")]
    skeleton: Option<PathBuf>,

    #[arg(long, value_name = "DIR")]
    kexts: Option<PathBuf>,

    /// Base URL serving `OpenCorePkg.zip` and `<Kext>.kext.zip` archives
    #[arg(long, value_name = "URL")]
    mirror: Option<String>,

    /// Report tool to run (from PATH) when the report file is missing
    #[arg(long, value_name = "PROGRAM")]
    generate_with: Option<String>,

    /// JSON answers for every prompt, for unattended builds
    #[arg(long, value_name = "FILE")]
    script: Option<PathBuf>,

    /// JSON list of DSDT renames appended to ACPI.Patch
    #[arg(long, value_name = "FILE")]
    dsdt_patches: Option<PathBuf>,

    /// JSON configuration template replacing the bundled one
    #[arg(long, value_name = "FILE")]
    template: Option<PathBuf>,

    /// Force an ACPI patch on or off
    #[arg(long = "patch", value_name = "ID=on|off")]
    patch_overrides: Vec<String>,

    /// Force a kext on or off
    #[arg(long = "kext", value_name = "NAME=on|off")]
    kext_overrides: Vec<String>,

    #[arg(long, action = clap::ArgAction::SetTrue)]
    include_beta: bool,
}

fn parse_toggles(values: &[String]) -> Result<BTreeMap<String, bool>> {
    let mut toggles = BTreeMap::new();
    for value in values {
        let (key, state) = value
            .split_once('=')
            .ok_or_else(|| anyhow!("Expected NAME=on|off, got '{}'", value))?;
        let enabled = match state.trim().to_lowercase().as_str() {
            "on" | "true" | "1" | "yes" => true,
            "off" | "false" | "0" | "no" => false,
            other => bail!("Invalid toggle '{}' for {}", other, key),
        };
        toggles.insert(key.trim().to_string(), enabled);
    }
    Ok(toggles)
}

fn load_user_patches(path: Option<&Path>) -> Result<Vec<BinaryPatch>> {
    let path = match path {
        Some(p) => p,
        None => return Ok(Vec::new()),
    };
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read DSDT patches: {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("Invalid DSDT patch file: {}", path.display()))
}

/// Run the report tool into the report's directory if the report is missing.
async fn ensure_report(report_path: &Path, program: Option<&str>) -> Result<()> {
    if report_path.exists() {
        return Ok(());
    }
    let program = match program {
        Some(p) => p,
        None => return Ok(()),
    };
    let parent = report_path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
    let out_dir = std::env::current_dir()?.join(parent);
    std::fs::create_dir_all(&out_dir).with_context(|| format!("Failed to create {}", out_dir.display()))?;

    let runner = SafeRunner::new(&out_dir, &[program]);
    let generator = ExternalReportGenerator::new(runner, program, Vec::new());
    log::info!("[Main] Generating hardware report with {}", program);
    let code = generator.generate(&out_dir).await;
    if code != 0 {
        bail!("Report tool '{}' exited with code {}", program, code);
    }
    if !report_path.exists() {
        bail!("Report tool '{}' did not write {}", program, report_path.display());
    }
    Ok(())
}

/// Archive fetcher for the configured mirror, if any.
fn mirror_fetcher(settings: &Settings) -> Option<Arc<dyn ResourceFetcher>> {
    if settings.resource_mirror.is_empty() {
        return None;
    }
    let root = common_root(&settings.skeleton_path(), &settings.kexts_path());
    let runner = SafeRunner::new(root, &FETCH_TOOLS);
    Some(Arc::new(ArchiveFetcher::new(runner, settings.resource_mirror.clone())))
}

fn init_logging(settings: &Settings, verbose: bool) -> Result<(Arc<LogCollector>, mpsc::Receiver<LogLine>)> {
    let (log_ui_tx, log_ui_rx) = mpsc::channel::<LogLine>(1024);
    let collector = LogCollector::new(settings.log_path(), log_ui_tx).map_err(anyhow::Error::msg)?;
    let collector = Arc::new(collector);

    let max_level = if verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    if let Err(e) = log::set_boxed_logger(Box::new((*collector).clone())).map(|()| log::set_max_level(max_level)) {
        eprintln!("[Main] WARNING: Failed to set LogCollector as global logger: {}", e);
    }
    let session = chrono::Local::now().format("efi-forge-%Y%m%d-%H%M%S.log").to_string();
    if let Err(e) = collector.start_new_session(&session) {
        eprintln!("[Main] WARNING: {}", e);
    }
    log::info!("EFI Forge logging initialized");
    Ok((collector, log_ui_rx))
}

fn analyze(report_path: &Path, include_beta: bool) -> Result<()> {
    let (report, warnings) = report::validate_file(report_path).into_result().map_err(|errors| {
        let lines: Vec<String> = errors.iter().map(|e| format!("{} ({})", e, e.code())).collect();
        anyhow!("Hardware report rejected:\n{}", lines.join("\n"))
    })?;
    for warning in &warnings {
        println!("warning: {}", warning);
    }

    let analysis = compat::analyze(report, include_beta);
    let describe = |range: Option<efi_forge::SupportRange>| {
        range
            .map(|r| format!("{} .. {}", os::os_name(r.lo()), os::os_name(r.hi())))
            .unwrap_or_else(|| "none".to_string())
    };
    println!("Native support:   {}", describe(analysis.native_envelope));
    println!("Extended support: {}", describe(analysis.extended_envelope));
    match analysis.suggested_target {
        Some(target) => println!("Suggested target: {}", os::os_name(target)),
        None => println!("Suggested target: none"),
    }
    let releases: Vec<String> = analysis
        .targetable_releases(include_beta)
        .iter()
        .map(|r| r.display_name())
        .collect();
    println!("Targetable:       {}", releases.join(", "));
    for line in &analysis.diagnostics {
        println!("note: {}", line);
    }
    if analysis.is_blocked() {
        for blocker in &analysis.blockers {
            println!("{}: {}", blocker.code(), blocker.message());
            println!("  Fix: {}", blocker.remediation());
        }
        bail!("Compatibility blockers found");
    }
    Ok(())
}

async fn build(
    args: BuildArgs,
    mut settings: Settings,
    verbose: bool,
    collector: Arc<LogCollector>,
    mut log_ui_rx: mpsc::Receiver<LogLine>,
) -> Result<()> {
    // STEP 1: settings overrides from the command line
    let text = |p: PathBuf| p.to_string_lossy().into_owned();
    if let Some(output) = args.output {
        settings.output_dir = text(output);
    }
    if let Some(skeleton) = args.skeleton {
        settings.skeleton_dir = text(skeleton);
    }
    if let Some(kexts) = args.kexts {
        settings.kexts_dir = text(kexts);
    }
    if let Some(mirror) = args.mirror {
        settings.resource_mirror = mirror;
    }
    settings.include_beta |= args.include_beta;

    ensure_report(&args.report, args.generate_with.as_deref()).await?;

    let target = args
        .macos
        .as_deref()
        .map(|s| os::parse_target(s).ok_or_else(|| anyhow!("Unknown macOS version '{}'", s)))
        .transpose()?;
    let inputs = PipelineInputs {
        report_path: args.report,
        acpi_dir: args.acpi,
        target,
        template_path: args.template,
        options: SelectionOptions {
            patch_overrides: parse_toggles(&args.patch_overrides)?,
            kext_overrides: parse_toggles(&args.kext_overrides)?,
            user_patches: load_user_patches(args.dsdt_patches.as_deref())?,
        },
    };

    // STEP 2: UI context and event draining
    let handler: Arc<dyn UiHandler> = match args.script {
        Some(ref script) => Arc::new(ScriptedUi::from_script_file(script)?),
        None => Arc::new(ConsoleUi::new(verbose)),
    };
    let (bridge, mut events) = UiBridge::spawn(handler.clone());
    let event_ui = handler.clone();
    let drain = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            event_ui.on_event(&event);
        }
    });
    let log_ui = handler.clone();
    tokio::spawn(async move {
        while let Some(line) = log_ui_rx.recv().await {
            if line.is_parsed() {
                log_ui.on_event(&BuildEvent::Log(line.message));
            }
        }
    });

    // STEP 3: run
    let fetcher = mirror_fetcher(&settings);
    let shared = Arc::new(RwLock::new(settings));
    let mut pipeline =
        Pipeline::new(shared, Some(bridge.events()), bridge.cancel_signal()).with_log_collector(collector.clone());
    if let Some(fetcher) = fetcher {
        pipeline = pipeline.with_fetcher(fetcher);
    }
    let prompter = bridge.prompter();
    let result = pipeline.run(&inputs, &prompter).await;
    let diagnostics = pipeline.diagnostics().await;

    drop(pipeline);
    drop(prompter);
    bridge.shutdown();
    let _ = drain.await;

    if !verbose && !diagnostics.is_empty() {
        eprintln!("{} warning(s):", diagnostics.len());
        for line in &diagnostics {
            eprintln!("  - {}", line);
        }
    }

    match result {
        Ok(report) => {
            println!("{}", report.efi_dir.display());
            Ok(())
        }
        Err(e) => bail!("{} [{}]", e.user_message(), e.code()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = match cli.settings {
        Some(ref path) => SettingsManager::load_from(path)?,
        None => SettingsManager::load()?,
    };
    let (collector, log_ui_rx) = init_logging(&settings, cli.verbose)?;

    let result = match cli.command {
        Command::Analyze { report, include_beta } => analyze(&report, include_beta || settings.include_beta),
        Command::Build(args) => build(args, settings, cli.verbose, collector.clone(), log_ui_rx).await,
    };

    if let Err(e) = collector.wait_for_empty().await {
        eprintln!("[Main] WARNING: Failed to flush logs: {}", e);
    }
    result
}
