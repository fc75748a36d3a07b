//! Drop skeleton content the configuration does not reference.

use crate::assembler::tree::{join, TreePlan};
use crate::config::PICKER_AUTO;

pub const DRIVERS_DIR: &str = "EFI/OC/Drivers";
pub const TOOLS_DIR: &str = "EFI/OC/Tools";
pub const RESOURCES_DIR: &str = "EFI/OC/Resources";
pub const MANIFEST: &str = "manifest.json";

/// What pruning is driven by.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PruneRules<'a> {
    pub drivers: &'a [String],
    pub tools: &'a [String],
    /// `Auto` or `<Vendor>\<Variant>`.
    pub picker_variant: &'a str,
    pub audio_assist: bool,
}

/// Remove unreferenced drivers, tools and resources from the plan.
///
/// Returns the removed plan paths.
pub fn prune(plan: &mut TreePlan, rules: &PruneRules) -> Vec<String> {
    let mut removed = Vec::new();
    let mut discard = |plan: &mut TreePlan, path: String| {
        if plan.remove(&path) {
            removed.push(path);
        }
    };

    // STEP 1: drivers and tools not in the config arrays
    for name in plan.files_in(DRIVERS_DIR) {
        if !rules.drivers.contains(&name) {
            discard(plan, join(DRIVERS_DIR, &name));
        }
    }
    for name in plan.files_in(TOOLS_DIR) {
        if !rules.tools.contains(&name) {
            discard(plan, join(TOOLS_DIR, &name));
        }
    }

    // STEP 2: audio resources only serve picker audio assist
    if !rules.audio_assist {
        discard(plan, join(RESOURCES_DIR, "Audio"));
    }

    // STEP 3: picker images, keep only the selected variant
    let images = join(RESOURCES_DIR, "Image");
    let selected: Vec<&str> = if rules.picker_variant == PICKER_AUTO || rules.picker_variant.is_empty() {
        Vec::new()
    } else {
        rules.picker_variant.split(['\\', '/']).filter(|s| !s.is_empty()).collect()
    };
    match selected.as_slice() {
        [vendor, variant, ..] => {
            for other in plan.dirs_in(&images) {
                if other != *vendor {
                    discard(plan, join(&images, &other));
                }
            }
            let vendor_dir = join(&images, vendor);
            for other in plan.dirs_in(&vendor_dir) {
                if other != *variant {
                    discard(plan, join(&vendor_dir, &other));
                }
            }
        }
        _ => discard(plan, images),
    }

    // STEP 4: bundle manifest
    discard(plan, MANIFEST.to_string());

    if !removed.is_empty() {
        log::debug!("[Assembler] Pruned {} path(s) from the skeleton", removed.len());
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;

    fn skeleton() -> TreePlan {
        let mut plan = TreePlan::new();
        for file in [
            "EFI/OC/Drivers/OpenRuntime.efi",
            "EFI/OC/Drivers/AudioDxe.efi",
            "EFI/OC/Drivers/OpenCanopy.efi",
            "EFI/OC/Tools/OpenShell.efi",
            "EFI/OC/Tools/CleanNvram.efi",
            "EFI/OC/Resources/Audio/OCEFIAudio_VoiceOver_Boot.mp3",
            "EFI/OC/Resources/Font/Terminus.hex",
            "EFI/OC/Resources/Image/Acidanthera/GoldenGate/Background.icns",
            "EFI/OC/Resources/Image/Acidanthera/Syrah/Background.icns",
            "EFI/OC/Resources/Image/Blackosx/BsxM1/Background.icns",
            "manifest.json",
        ] {
            plan.add_file(file, Vec::new());
        }
        plan
    }

    #[test]
    fn test_text_picker_prunes_images_and_audio() {
        let mut plan = skeleton();
        let drivers = vec!["OpenRuntime.efi".to_string()];
        let tools = vec!["OpenShell.efi".to_string()];
        prune(
            &mut plan,
            &PruneRules {
                drivers: &drivers,
                tools: &tools,
                picker_variant: PICKER_AUTO,
                audio_assist: false,
            },
        );
        assert_eq!(plan.files_in(DRIVERS_DIR), drivers);
        assert_eq!(plan.files_in(TOOLS_DIR), tools);
        assert_eq!(plan.dirs_in(RESOURCES_DIR), vec!["Font"]);
        assert!(!plan.contains_file(MANIFEST));
    }

    #[test]
    fn test_gui_picker_keeps_selected_variant() {
        let mut plan = skeleton();
        let drivers = vec!["OpenRuntime.efi".to_string(), "OpenCanopy.efi".to_string(), "AudioDxe.efi".to_string()];
        let tools: Vec<String> = Vec::new();
        prune(
            &mut plan,
            &PruneRules {
                drivers: &drivers,
                tools: &tools,
                picker_variant: "Acidanthera\\GoldenGate",
                audio_assist: true,
            },
        );
        assert_eq!(plan.dirs_in("EFI/OC/Resources/Image"), vec!["Acidanthera"]);
        assert_eq!(plan.dirs_in("EFI/OC/Resources/Image/Acidanthera"), vec!["GoldenGate"]);
        assert!(plan.contains_dir("EFI/OC/Resources/Audio"));
        assert!(plan.files_in(TOOLS_DIR).is_empty());
    }
}
