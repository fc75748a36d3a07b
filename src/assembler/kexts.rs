//! Kext installation and `Kernel.Add` emission.

use std::path::Path;

use crate::assembler::tree::{join, TreePlan};
use crate::config::generator::kernel_add_entry;
use crate::error::BuildError;
use crate::plist::{xml, Value};
use crate::selection::{KextSelection, SelectedKext};

/// Plan directory holding installed kexts.
pub const KEXTS_DIR: &str = "EFI/OC/Kexts";

/// A bundle as found in the installed tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleInfo {
    /// Path relative to `Kexts/`.
    pub bundle_path: String,
    /// `Contents/MacOS/<CFBundleExecutable>`, empty for codeless bundles.
    pub executable_path: String,
}

/// Read `CFBundleExecutable` from a bundle in the plan.
fn inspect(plan: &TreePlan, bundle_dir: &str, bundle_path: &str) -> BundleInfo {
    let executable_path = plan
        .file(&join(bundle_dir, "Contents/Info.plist"))
        .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
        .and_then(|text| xml::find_string(&text, "CFBundleExecutable"))
        .map(|exe| format!("Contents/MacOS/{}", exe))
        .filter(|exe| plan.contains_file(&join(bundle_dir, exe)))
        .unwrap_or_default();
    BundleInfo {
        bundle_path: bundle_path.to_string(),
        executable_path,
    }
}

/// Parent bundle followed by its plug-ins sorted by name.
pub fn walk_bundle(plan: &TreePlan, name: &str) -> Vec<BundleInfo> {
    let bundle_dir = join(KEXTS_DIR, name);
    let mut bundles = vec![inspect(plan, &bundle_dir, name)];

    let plugins_dir = join(&bundle_dir, "Contents/PlugIns");
    let mut plugins: Vec<String> = plan
        .dirs_in(&plugins_dir)
        .into_iter()
        .filter(|p| p.ends_with(".kext"))
        .collect();
    plugins.sort();
    for plugin in plugins {
        bundles.push(inspect(
            plan,
            &join(&plugins_dir, &plugin),
            &format!("{}/Contents/PlugIns/{}", name, plugin),
        ));
    }
    bundles
}

/// Copy selected bundles from the kext cache into the plan.
pub fn install(plan: &mut TreePlan, kexts_dir: &Path, selection: &KextSelection) -> Result<(), BuildError> {
    for kext in &selection.kexts {
        let source = kexts_dir.join(&kext.source);
        if !source.is_dir() {
            return Err(BuildError::KextCopy {
                name: kext.name().to_string(),
                reason: format!("{} is not in the kext cache", source.display()),
            });
        }
        let target = join(KEXTS_DIR, &kext.bundle_name());
        plan.remove(&target);
        plan.add_tree(&source, &target).map_err(|e| BuildError::KextCopy {
            name: kext.name().to_string(),
            reason: e.to_string(),
        })?;
        log::debug!("[Assembler] Installed {} from {}", kext.bundle_name(), kext.source);
    }
    Ok(())
}

fn min_kernel(kext: &SelectedKext) -> String {
    if kext.force_load {
        format!("{}.0.0", kext.spec.min_major)
    } else {
        String::new()
    }
}

/// `Kernel.Add` entries for the installed tree.
///
/// Parents follow selection order, which already places dependencies
/// first; each parent is followed by its plug-ins.
pub fn kernel_add(plan: &TreePlan, selection: &KextSelection) -> Vec<Value> {
    let mut entries = Vec::new();
    for kext in &selection.kexts {
        let min = min_kernel(kext);
        for bundle in walk_bundle(plan, &kext.bundle_name()) {
            entries.push(kernel_add_entry(
                &bundle.bundle_path,
                &bundle.executable_path,
                &min,
                "",
                &kext.reason,
            ));
        }
    }
    entries
}

/// Remove bundles in `Kexts/` that no selected kext installed.
pub fn remove_unselected(plan: &mut TreePlan, selection: &KextSelection) -> Vec<String> {
    let keep: Vec<String> = selection.kexts.iter().map(|k| k.bundle_name()).collect();
    let mut removed = Vec::new();
    for name in plan.dirs_in(KEXTS_DIR) {
        if !keep.contains(&name) {
            plan.remove(&join(KEXTS_DIR, &name));
            removed.push(name);
        }
    }
    for name in plan.files_in(KEXTS_DIR) {
        plan.remove(&join(KEXTS_DIR, &name));
        removed.push(name);
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn write_bundle(dir: &Path, executable: Option<&str>, plugins: &[&str]) -> std::io::Result<()> {
        let contents = dir.join("Contents");
        fs::create_dir_all(&contents)?;
        let mut info = Value::dict();
        if let Some(exe) = executable {
            info.set("CFBundleExecutable", Value::from(exe));
            fs::create_dir_all(contents.join("MacOS"))?;
            fs::write(contents.join("MacOS").join(exe), exe.as_bytes())?;
        }
        fs::write(contents.join("Info.plist"), xml::to_xml(&info))?;
        for plugin in plugins {
            let stem = plugin.trim_end_matches(".kext");
            write_bundle(&contents.join("PlugIns").join(plugin), Some(stem), &[])?;
        }
        Ok(())
    }

    #[test]
    fn test_walk_reads_executable_and_plugins() {
        let dir = tempdir().unwrap();
        let bundle = dir.path().join("VoodooPS2Controller.kext");
        write_bundle(&bundle, Some("VoodooPS2Controller"), &["VoodooPS2Trackpad.kext", "VoodooPS2Keyboard.kext"])
            .unwrap();
        let mut plan = TreePlan::new();
        plan.add_tree(&bundle, &join(KEXTS_DIR, "VoodooPS2Controller.kext")).unwrap();

        let bundles = walk_bundle(&plan, "VoodooPS2Controller.kext");
        let paths: Vec<&str> = bundles.iter().map(|b| b.bundle_path.as_str()).collect();
        assert_eq!(
            paths,
            vec![
                "VoodooPS2Controller.kext",
                "VoodooPS2Controller.kext/Contents/PlugIns/VoodooPS2Keyboard.kext",
                "VoodooPS2Controller.kext/Contents/PlugIns/VoodooPS2Trackpad.kext",
            ]
        );
        assert_eq!(bundles[0].executable_path, "Contents/MacOS/VoodooPS2Controller");
        assert_eq!(bundles[1].executable_path, "Contents/MacOS/VoodooPS2Keyboard");
    }

    #[test]
    fn test_codeless_bundle_has_empty_executable() {
        let dir = tempdir().unwrap();
        let bundle = dir.path().join("USBMap.kext");
        write_bundle(&bundle, None, &[]).unwrap();
        let mut plan = TreePlan::new();
        plan.add_tree(&bundle, &join(KEXTS_DIR, "USBMap.kext")).unwrap();
        assert_eq!(walk_bundle(&plan, "USBMap.kext")[0].executable_path, "");
    }

    #[test]
    fn test_missing_cache_entry_is_kext_copy_error() {
        let dir = tempdir().unwrap();
        let selection = KextSelection {
            kexts: vec![SelectedKext {
                spec: crate::selection::kexts::lookup("Lilu").unwrap(),
                source: "Lilu.kext".into(),
                force_load: false,
                reason: "required".into(),
            }],
            ..KextSelection::default()
        };
        let mut plan = TreePlan::new();
        let err = install(&mut plan, dir.path(), &selection).unwrap_err();
        assert_eq!(err.code(), "KEXT_COPY");
    }
}
