//! Fixtures shared by the integration tests.

use std::fs;
use std::path::Path;

use efi_forge::plist::{to_xml, Value};

/// Write a minimal kext bundle at `dir`, with optional nested plug-ins.
pub fn write_bundle(dir: &Path, executable: Option<&str>, plugins: &[&str]) -> std::io::Result<()> {
    let contents = dir.join("Contents");
    fs::create_dir_all(&contents)?;
    let mut info = Value::dict();
    if let Some(exe) = executable {
        info.set("CFBundleExecutable", Value::from(exe));
        fs::create_dir_all(contents.join("MacOS"))?;
        fs::write(contents.join("MacOS").join(exe), exe.as_bytes())?;
    }
    fs::write(contents.join("Info.plist"), to_xml(&info))?;
    for plugin in plugins {
        let stem = plugin.trim_end_matches(".kext");
        write_bundle(&contents.join("PlugIns").join(plugin), Some(stem), &[])?;
    }
    Ok(())
}
