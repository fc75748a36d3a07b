//! Assembler: materializes the EFI tree.
//!
//! The whole tree is first built as a [`TreePlan`] (skeleton, ACPI tables,
//! kexts, `config.plist`, then pruning) and only then synced to disk. The
//! sync writes nothing when the output already matches.

pub mod kexts;
pub mod prune;
pub mod sync;
pub mod tree;

use std::path::{Path, PathBuf};

use crate::config::GeneratedConfig;
use crate::error::BuildError;
use crate::plist::{self, Value};
use crate::selection::{KextSelection, PatchSelection};

pub use prune::PruneRules;
pub use sync::{SyncStats, INCOMPLETE_MARKER};
pub use tree::TreePlan;

pub const ACPI_DIR: &str = "EFI/OC/ACPI";
pub const CONFIG_PATH: &str = "EFI/OC/config.plist";

/// Files every skeleton must provide.
const SKELETON_REQUIRED: [&str; 2] = ["EFI/BOOT/BOOTx64.efi", "EFI/OC/OpenCore.efi"];

/// Inputs of one assembly.
#[derive(Debug, Clone, Copy)]
pub struct AssemblyInput<'a> {
    pub skeleton_dir: &'a Path,
    pub kexts_dir: &'a Path,
    pub output_dir: &'a Path,
    pub generated: &'a GeneratedConfig,
    pub patches: &'a PatchSelection,
    pub kexts: &'a KextSelection,
    pub picker_variant: &'a str,
}

/// Result of a successful assembly.
#[derive(Debug, Clone, PartialEq)]
pub struct AssemblyReport {
    /// `<output>/EFI`
    pub efi_dir: PathBuf,
    /// Config as written, with `Kernel.Add` filled in.
    pub config: Value,
    pub pruned: Vec<String>,
    pub stats: SyncStats,
}

/// Load the skeleton cache into a plan rooted at `EFI/`.
pub fn load_skeleton(skeleton_dir: &Path) -> Result<TreePlan, BuildError> {
    let efi = skeleton_dir.join("EFI");
    if !efi.is_dir() {
        return Err(BuildError::SkeletonMissing(skeleton_dir.to_path_buf()));
    }
    let mut plan = TreePlan::new();
    plan.add_tree(&efi, "EFI")?;
    let manifest = skeleton_dir.join(prune::MANIFEST);
    if manifest.is_file() {
        plan.add_file(prune::MANIFEST, std::fs::read(manifest)?);
    }
    for required in SKELETON_REQUIRED {
        if !plan.contains_file(required) {
            return Err(BuildError::SkeletonIncomplete(required.to_string()));
        }
    }
    Ok(plan)
}

/// Every referenced driver and tool must ship in the skeleton.
fn check_references(plan: &TreePlan, generated: &GeneratedConfig) -> Result<(), BuildError> {
    let referenced = generated
        .drivers
        .iter()
        .map(|d| tree::join(prune::DRIVERS_DIR, d))
        .chain(generated.tools.iter().map(|t| tree::join(prune::TOOLS_DIR, t)));
    for path in referenced {
        if !plan.contains_file(&path) {
            return Err(BuildError::SkeletonIncomplete(path));
        }
    }
    Ok(())
}

/// Build the full plan without touching the output directory.
pub fn plan(input: &AssemblyInput) -> Result<(TreePlan, Value, Vec<String>), BuildError> {
    // STEP 1: skeleton
    let mut plan = load_skeleton(input.skeleton_dir)?;
    plan.add_dir(ACPI_DIR);
    check_references(&plan, input.generated)?;

    // STEP 2: ACPI tables
    for table in &input.patches.add {
        plan.add_file(&tree::join(ACPI_DIR, &table.file_name), table.bytes.clone());
    }

    // STEP 3: kexts and Kernel.Add
    plan.add_dir(kexts::KEXTS_DIR);
    kexts::remove_unselected(&mut plan, input.kexts);
    kexts::install(&mut plan, input.kexts_dir, input.kexts)?;
    let mut config = input.generated.config.clone();
    if !config.set("Kernel.Add", Value::Array(kexts::kernel_add(&plan, input.kexts))) {
        return Err(BuildError::ConfigWrite("config has no Kernel section".to_string()));
    }

    // STEP 4: config.plist
    plan.add_file(CONFIG_PATH, plist::to_xml(&config).into_bytes());

    // STEP 5: prune
    let pruned = prune::prune(
        &mut plan,
        &PruneRules {
            drivers: &input.generated.drivers,
            tools: &input.generated.tools,
            picker_variant: input.picker_variant,
            audio_assist: input.generated.audio_assist,
        },
    );
    Ok((plan, config, pruned))
}

/// Assemble and sync the output directory.
///
/// On failure the output root is left with a `BUILD_INCOMPLETE` marker.
pub fn assemble(input: &AssemblyInput) -> Result<AssemblyReport, BuildError> {
    log::info!(
        target: "parsed",
        "[Assembler] Assembling {} kext(s) into {}",
        input.kexts.kexts.len(),
        input.output_dir.display()
    );
    let result = plan(input).and_then(|(plan, config, pruned)| {
        let stats = sync::sync(input.output_dir, &plan)?;
        Ok(AssemblyReport {
            efi_dir: input.output_dir.join("EFI"),
            config,
            pruned,
            stats,
        })
    });
    match result {
        Ok(report) => {
            log::info!(
                target: "parsed",
                "[Assembler] EFI ready at {} ({} change(s))",
                report.efi_dir.display(),
                report.stats.mutations()
            );
            Ok(report)
        }
        Err(e) => {
            log::error!("[Assembler] {} ({})", e, e.code());
            if input.output_dir.exists() {
                sync::mark_incomplete(input.output_dir);
            }
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::template::sample_config;
    use std::fs;
    use tempfile::tempdir;

    fn skeleton(root: &Path) {
        for file in [
            "EFI/BOOT/BOOTx64.efi",
            "EFI/OC/OpenCore.efi",
            "EFI/OC/Drivers/OpenRuntime.efi",
            "EFI/OC/Drivers/HiiDatabase.efi",
            "EFI/OC/Tools/OpenShell.efi",
        ] {
            let path = root.join(file);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, file.as_bytes()).unwrap();
        }
        fs::write(root.join("manifest.json"), b"{}").unwrap();
    }

    fn generated() -> GeneratedConfig {
        GeneratedConfig {
            config: sample_config(),
            drivers: vec!["OpenRuntime.efi".into()],
            tools: vec!["OpenShell.efi".into()],
            boot_args: Vec::new(),
            audio_assist: false,
        }
    }

    #[test]
    fn test_missing_skeleton() {
        let dir = tempdir().unwrap();
        let err = load_skeleton(&dir.path().join("nope")).unwrap_err();
        assert_eq!(err.code(), "SKELETON_MISSING");
    }

    #[test]
    fn test_referenced_driver_must_exist() {
        let dir = tempdir().unwrap();
        skeleton(dir.path());
        let mut config = generated();
        config.drivers.push("OpenCanopy.efi".into());
        let patches = PatchSelection::default();
        let kexts = KextSelection::default();
        let input = AssemblyInput {
            skeleton_dir: dir.path(),
            kexts_dir: dir.path(),
            output_dir: &dir.path().join("out"),
            generated: &config,
            patches: &patches,
            kexts: &kexts,
            picker_variant: "Auto",
        };
        let err = assemble(&input).unwrap_err();
        assert_eq!(err.code(), "SKELETON_INCOMPLETE");
    }

    #[test]
    fn test_assemble_prunes_and_writes_config() {
        let dir = tempdir().unwrap();
        skeleton(dir.path());
        let out = dir.path().join("out");
        let config = generated();
        let patches = PatchSelection::default();
        let kexts = KextSelection::default();
        let input = AssemblyInput {
            skeleton_dir: dir.path(),
            kexts_dir: dir.path(),
            output_dir: &out,
            generated: &config,
            patches: &patches,
            kexts: &kexts,
            picker_variant: "Auto",
        };
        let report = assemble(&input).unwrap();
        assert!(out.join("EFI/OC/config.plist").is_file());
        assert!(out.join("EFI/OC/ACPI").is_dir());
        assert!(out.join("EFI/OC/Kexts").is_dir());
        assert!(!out.join("EFI/OC/Drivers/HiiDatabase.efi").exists());
        assert!(!out.join("manifest.json").exists());
        assert!(report.pruned.contains(&"EFI/OC/Drivers/HiiDatabase.efi".to_string()));

        let again = assemble(&input).unwrap();
        assert_eq!(again.stats.mutations(), 0);
    }

    #[test]
    fn test_audio_resources_follow_generated_assist() {
        let dir = tempdir().unwrap();
        skeleton(dir.path());
        let audio = dir.path().join("EFI/OC/Resources/Audio/OCEFIAudio_VoiceOver_Boot.mp3");
        fs::create_dir_all(audio.parent().unwrap()).unwrap();
        fs::write(&audio, b"mp3").unwrap();
        let out = dir.path().join("out");
        let patches = PatchSelection::default();
        let kexts = KextSelection::default();
        let silent = generated();
        let mut spoken = generated();
        spoken.audio_assist = true;

        let base = AssemblyInput {
            skeleton_dir: dir.path(),
            kexts_dir: dir.path(),
            output_dir: &out,
            generated: &silent,
            patches: &patches,
            kexts: &kexts,
            picker_variant: "Auto",
        };
        let (tree, _, pruned) = plan(&base).unwrap();
        assert!(!tree.contains_dir("EFI/OC/Resources/Audio"));
        assert!(pruned.contains(&"EFI/OC/Resources/Audio".to_string()));

        let (tree, _, _) = plan(&AssemblyInput {
            generated: &spoken,
            ..base
        })
        .unwrap();
        assert!(tree.contains_dir("EFI/OC/Resources/Audio"));
    }
}
