//! Apply a tree plan to disk with as few changes as possible.
//!
//! A run over an output that already matches the plan touches nothing.
//! Otherwise `BUILD_INCOMPLETE` is written first and removed only once
//! every planned file is in place.

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::Path;

use crate::assembler::tree::{join, TreePlan};
use crate::error::BuildError;

pub const INCOMPLETE_MARKER: &str = "BUILD_INCOMPLETE";

/// What a sync did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncStats {
    pub written: usize,
    pub removed: usize,
    pub created_dirs: usize,
    pub unchanged: usize,
    /// Removal failures; these never fail the build.
    pub warnings: Vec<String>,
}

impl SyncStats {
    pub fn mutations(&self) -> usize {
        self.written + self.removed + self.created_dirs
    }
}

/// Differences between disk and plan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncDiff {
    pub create_dirs: Vec<String>,
    pub write: Vec<String>,
    pub remove_files: Vec<String>,
    pub remove_dirs: Vec<String>,
    pub unchanged: usize,
}

impl SyncDiff {
    pub fn is_empty(&self) -> bool {
        self.create_dirs.is_empty() && self.write.is_empty() && self.remove_files.is_empty() && self.remove_dirs.is_empty()
    }
}

fn scan(root: &Path, prefix: &str, files: &mut BTreeSet<String>, dirs: &mut BTreeSet<String>) -> io::Result<()> {
    let dir = TreePlan::resolve(root, prefix);
    for entry in fs::read_dir(&dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        let path = join(prefix, &name);
        if entry.file_type()?.is_dir() {
            dirs.insert(path.clone());
            scan(root, &path, files, dirs)?;
        } else {
            files.insert(path);
        }
    }
    Ok(())
}

/// Compare the tree under `root` with `plan`.
pub fn diff(root: &Path, plan: &TreePlan) -> io::Result<SyncDiff> {
    let mut existing_files = BTreeSet::new();
    let mut existing_dirs = BTreeSet::new();
    if root.is_dir() {
        scan(root, "", &mut existing_files, &mut existing_dirs)?;
    }
    existing_files.remove(INCOMPLETE_MARKER);

    let mut result = SyncDiff::default();
    for dir in plan.dirs() {
        if !existing_dirs.contains(dir) {
            result.create_dirs.push(dir.to_string());
        }
    }
    for (path, bytes) in plan.files() {
        let same = existing_files.contains(path)
            && fs::read(TreePlan::resolve(root, path))
                .map(|current| current == bytes)
                .unwrap_or(false);
        if same {
            result.unchanged += 1;
        } else {
            result.write.push(path.to_string());
        }
    }
    result.remove_files = existing_files
        .into_iter()
        .filter(|p| !plan.contains_file(p))
        .collect();
    // Deepest first so children go before parents
    let mut stale_dirs: Vec<String> = existing_dirs
        .into_iter()
        .filter(|d| !plan.contains_dir(d))
        .collect();
    stale_dirs.sort_by_key(|d| std::cmp::Reverse(d.matches('/').count()));
    result.remove_dirs = stale_dirs;
    Ok(result)
}

fn write_error(path: &str, e: io::Error) -> BuildError {
    let name = path.rsplit('/').next().unwrap_or(path).to_string();
    if path.ends_with("config.plist") {
        BuildError::ConfigWrite(e.to_string())
    } else if path.contains("/ACPI/") {
        BuildError::AcpiWrite {
            name,
            reason: e.to_string(),
        }
    } else if path.contains("/Kexts/") {
        BuildError::KextCopy {
            name,
            reason: e.to_string(),
        }
    } else {
        BuildError::Io(e)
    }
}

/// Make the tree under `root` match `plan`.
pub fn sync(root: &Path, plan: &TreePlan) -> Result<SyncStats, BuildError> {
    let marker = root.join(INCOMPLETE_MARKER);
    let changes = diff(root, plan)?;
    let mut stats = SyncStats {
        unchanged: changes.unchanged,
        ..SyncStats::default()
    };

    if changes.is_empty() && !marker.exists() {
        log::info!("[Assembler] Output already up to date ({} files)", changes.unchanged);
        return Ok(stats);
    }

    // STEP 1: flag the tree until every file is written
    fs::create_dir_all(root)?;
    fs::write(&marker, b"")?;

    // STEP 2: directories and files
    for dir in &changes.create_dirs {
        fs::create_dir_all(TreePlan::resolve(root, dir))?;
        stats.created_dirs += 1;
    }
    for path in &changes.write {
        let bytes = plan.file(path).unwrap_or_default();
        fs::write(TreePlan::resolve(root, path), bytes).map_err(|e| write_error(path, e))?;
        stats.written += 1;
    }

    // STEP 3: stale entries; failures are only warnings
    for path in &changes.remove_files {
        match fs::remove_file(TreePlan::resolve(root, path)) {
            Ok(()) => stats.removed += 1,
            Err(e) => {
                log::warn!("[Assembler] Could not remove {}: {}", path, e);
                stats.warnings.push(format!("Could not remove {}: {}", path, e));
            }
        }
    }
    for dir in &changes.remove_dirs {
        match fs::remove_dir_all(TreePlan::resolve(root, dir)) {
            Ok(()) => stats.removed += 1,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                log::warn!("[Assembler] Could not remove {}: {}", dir, e);
                stats.warnings.push(format!("Could not remove {}: {}", dir, e));
            }
        }
    }

    // STEP 4: complete
    fs::remove_file(&marker)?;
    log::info!(
        "[Assembler] Synced output: {} written, {} removed, {} unchanged",
        stats.written,
        stats.removed,
        stats.unchanged
    );
    Ok(stats)
}

/// Leave the incomplete marker after a failed build.
pub fn mark_incomplete(root: &Path) {
    if let Err(e) = fs::create_dir_all(root).and_then(|_| fs::write(root.join(INCOMPLETE_MARKER), b"")) {
        log::warn!("[Assembler] Could not write {}: {}", INCOMPLETE_MARKER, e);
    }
}
