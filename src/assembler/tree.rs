//! In-memory plan of the output tree.
//!
//! Paths are relative to the output root and always use `/` separators, so
//! plans compare equal across runs regardless of how they were built.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Files and directories the output tree should contain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TreePlan {
    files: BTreeMap<String, Vec<u8>>,
    dirs: BTreeSet<String>,
}

/// Join plan path segments.
pub fn join(parent: &str, child: &str) -> String {
    match (parent.is_empty(), child.is_empty()) {
        (true, _) => child.to_string(),
        (_, true) => parent.to_string(),
        _ => format!("{}/{}", parent.trim_end_matches('/'), child),
    }
}

fn parent_of(path: &str) -> Option<&str> {
    path.rfind('/').map(|i| &path[..i])
}

impl TreePlan {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a directory and its ancestors.
    pub fn add_dir(&mut self, path: &str) {
        let mut current = Some(path);
        while let Some(p) = current {
            if p.is_empty() || !self.dirs.insert(p.to_string()) {
                break;
            }
            current = parent_of(p);
        }
    }

    /// Add or replace a file.
    pub fn add_file(&mut self, path: &str, bytes: Vec<u8>) {
        if let Some(parent) = parent_of(path) {
            self.add_dir(parent);
        }
        self.files.insert(path.to_string(), bytes);
    }

    /// Copy a directory from disk under `prefix`.
    pub fn add_tree(&mut self, source: &Path, prefix: &str) -> io::Result<()> {
        self.add_dir(prefix);
        let mut entries: Vec<_> = fs::read_dir(source)?.collect::<Result<_, _>>()?;
        entries.sort_by_key(|e| e.file_name());
        for entry in entries {
            let name = entry.file_name().to_string_lossy().into_owned();
            let path = join(prefix, &name);
            let file_type = entry.file_type()?;
            if file_type.is_dir() {
                self.add_tree(&entry.path(), &path)?;
            } else if file_type.is_file() {
                self.add_file(&path, fs::read(entry.path())?);
            }
        }
        Ok(())
    }

    pub fn contains_file(&self, path: &str) -> bool {
        self.files.contains_key(path)
    }

    pub fn file(&self, path: &str) -> Option<&[u8]> {
        self.files.get(path).map(Vec::as_slice)
    }

    pub fn contains_dir(&self, path: &str) -> bool {
        self.dirs.contains(path)
    }

    /// Remove a file or a whole subtree. Returns whether anything went.
    pub fn remove(&mut self, path: &str) -> bool {
        let prefix = format!("{}/", path);
        let before = self.files.len() + self.dirs.len();
        self.files.retain(|p, _| p != path && !p.starts_with(&prefix));
        self.dirs.retain(|p| p != path && !p.starts_with(&prefix));
        before != self.files.len() + self.dirs.len()
    }

    /// Names of files directly inside `dir`.
    pub fn files_in(&self, dir: &str) -> Vec<String> {
        self.files
            .keys()
            .filter(|p| parent_of(p) == Some(dir))
            .filter_map(|p| p.rsplit('/').next().map(String::from))
            .collect()
    }

    /// Names of directories directly inside `dir`.
    pub fn dirs_in(&self, dir: &str) -> Vec<String> {
        self.dirs
            .iter()
            .filter(|p| parent_of(p) == Some(dir))
            .filter_map(|p| p.rsplit('/').next().map(String::from))
            .collect()
    }

    pub fn files(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.files.iter().map(|(p, b)| (p.as_str(), b.as_slice()))
    }

    pub fn dirs(&self) -> impl Iterator<Item = &str> {
        self.dirs.iter().map(String::as_str)
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    /// Absolute path of a plan entry under `root`.
    pub fn resolve(root: &Path, path: &str) -> PathBuf {
        path.split('/').fold(root.to_path_buf(), |acc, part| acc.join(part))
    }
}
