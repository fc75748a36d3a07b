//! Resource fetching from an archive mirror.
//!
//! A mirror serves one zip per resource:
//! - `skeleton:OpenCorePkg` -> `<mirror>/OpenCorePkg.zip`, unpacked into the skeleton dir
//! - `kext:<bundle>` -> `<mirror>/<bundle>.zip`, unpacked next to the bundle path
//!
//! Downloads and extraction go through [`SafeRunner`] (`curl` and `unzip`).

use std::path::{Path, PathBuf};

use futures::future::{BoxFuture, FutureExt};

use super::{ResourceFetcher, SafeRunner};

pub const FETCH_TOOLS: [&str; 2] = ["curl", "unzip"];

const SKELETON_SCHEME: &str = "skeleton:";
const KEXT_SCHEME: &str = "kext:";

/// Fetches zipped resources from a mirror.
pub struct ArchiveFetcher {
    runner: SafeRunner,
    mirror: String,
}

impl ArchiveFetcher {
    pub fn new(runner: SafeRunner, mirror: impl Into<String>) -> Self {
        let mirror = mirror.into().trim_end_matches('/').to_string();
        ArchiveFetcher { runner, mirror }
    }

    /// Archive URL for a resource name, or `None` if the name is unknown or
    /// tries to leave the mirror.
    pub fn archive_url(&self, resource: &str) -> Option<String> {
        let name = resource
            .strip_prefix(SKELETON_SCHEME)
            .or_else(|| resource.strip_prefix(KEXT_SCHEME))?;
        let safe = !name.is_empty()
            && !name.contains("..")
            && !name.starts_with('/')
            && name.chars().all(|c| c.is_ascii_alphanumeric() || "-_.+/".contains(c));
        safe.then(|| format!("{}/{}.zip", self.mirror, name))
    }

    /// Directory the archive for `resource` unpacks into.
    fn extract_dir(resource: &str, path: &Path) -> Option<PathBuf> {
        if resource.starts_with(SKELETON_SCHEME) {
            Some(path.to_path_buf())
        } else {
            path.parent().map(Path::to_path_buf)
        }
    }

    async fn fetch(&self, resource: &str, path: &Path) -> Result<(), String> {
        let url = self
            .archive_url(resource)
            .ok_or_else(|| format!("Unknown resource '{}'", resource))?;
        let dest = Self::extract_dir(resource, path).ok_or_else(|| format!("No parent for {}", path.display()))?;
        tokio::fs::create_dir_all(&dest)
            .await
            .map_err(|e| format!("Failed to create {}: {}", dest.display(), e))?;

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "resource".to_string());
        let archive = dest.join(format!("{}.zip", file_name));
        let archive_arg = archive.display().to_string();

        let curl_args: Vec<String> = ["--fail", "--silent", "--show-error", "--location", "--output"]
            .iter()
            .map(|s| s.to_string())
            .chain([archive_arg.clone(), url.clone()])
            .collect();
        self.runner.run_checked("curl", &curl_args).await.map_err(|e| e.to_string())?;

        let unzip_args = vec![
            "-q".to_string(),
            "-o".to_string(),
            archive_arg,
            "-d".to_string(),
            dest.display().to_string(),
        ];
        let unpacked = self.runner.run_checked("unzip", &unzip_args).await.map_err(|e| e.to_string());
        if let Err(e) = tokio::fs::remove_file(&archive).await {
            log::debug!("[Fetcher] Could not remove {}: {}", archive.display(), e);
        }
        unpacked?;

        if !path.is_dir() {
            return Err(format!("{} did not contain {}", url, file_name));
        }
        log::info!("[Fetcher] {} -> {}", url, path.display());
        Ok(())
    }
}

impl ResourceFetcher for ArchiveFetcher {
    fn download<'a>(&'a self, url: &'a str, path: &'a Path) -> BoxFuture<'a, bool> {
        async move {
            match self.fetch(url, path).await {
                Ok(()) => true,
                Err(e) => {
                    log::warn!("[Fetcher] {}", e);
                    false
                }
            }
        }
        .boxed()
    }
}

/// Deepest directory containing both paths; the safe root for fetch commands.
pub fn common_root(a: &Path, b: &Path) -> PathBuf {
    a.components()
        .zip(b.components())
        .take_while(|(x, y)| x == y)
        .map(|(x, _)| x)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn fetcher(root: &Path, tools: &[&str]) -> ArchiveFetcher {
        ArchiveFetcher::new(SafeRunner::new(root, tools), "https://mirror.example/efi/")
    }

    #[test]
    fn test_archive_urls() {
        let f = fetcher(Path::new("/tmp"), &FETCH_TOOLS);
        assert_eq!(
            f.archive_url("skeleton:OpenCorePkg").as_deref(),
            Some("https://mirror.example/efi/OpenCorePkg.zip")
        );
        assert_eq!(
            f.archive_url("kext:AirportItlwm-Sonoma.kext").as_deref(),
            Some("https://mirror.example/efi/AirportItlwm-Sonoma.kext.zip")
        );
        assert_eq!(f.archive_url("ftp:Lilu.kext"), None);
    }

    #[test]
    fn test_archive_url_rejects_escapes() {
        let f = fetcher(Path::new("/tmp"), &FETCH_TOOLS);
        assert_eq!(f.archive_url("kext:../../etc/passwd"), None);
        assert_eq!(f.archive_url("kext:/Lilu.kext"), None);
        assert_eq!(f.archive_url("kext:Lilu.kext?x=1&y=2"), None);
        assert_eq!(f.archive_url("skeleton:"), None);
    }

    #[test]
    fn test_common_root() {
        assert_eq!(
            common_root(Path::new("/data/efi/OpenCorePkg"), Path::new("/data/efi/Kexts")),
            PathBuf::from("/data/efi")
        );
        assert_eq!(common_root(Path::new("/a"), Path::new("/b")), PathBuf::from("/"));
    }

    #[tokio::test]
    async fn test_download_fails_without_whitelisted_tools() {
        let root = tempdir().unwrap();
        let f = fetcher(root.path(), &[]);
        let path = root.path().join("Kexts").join("Lilu.kext");
        assert!(!f.download("kext:Lilu.kext", &path).await);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_download_refuses_paths_outside_root() {
        let root = tempdir().unwrap();
        let elsewhere = tempdir().unwrap();
        let f = fetcher(root.path(), &FETCH_TOOLS);
        let path = elsewhere.path().join("Lilu.kext");
        assert!(!f.download("kext:Lilu.kext", &path).await);
        assert!(!elsewhere.path().join("Lilu.kext.zip").exists());
    }
}
