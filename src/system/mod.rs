//! System module: sanitized command execution and external collaborators.
//!
//! The pipeline never talks to the network or spawns tools itself; it goes
//! through the traits below, which the binary wires to real implementations
//! and tests replace with fakes.

pub mod exec;
pub mod fetch;

use std::fmt::Display;
use std::future::Future;
use std::path::Path;

use futures::future::FutureExt;

pub use exec::{CommandOutput, SafeRunner};
pub use fetch::ArchiveFetcher;
pub use futures::future::BoxFuture;

use crate::error::ExecError;

/// Produces a hardware report when none is available.
pub trait ReportGenerator: Send + Sync {
    /// Write a report into `out_dir`; returns the tool's exit code.
    fn generate<'a>(&'a self, out_dir: &'a Path) -> BoxFuture<'a, i32>;
}

/// Fills the skeleton and kext caches.
pub trait ResourceFetcher: Send + Sync {
    /// Download `url` to `path`; `false` on any failure.
    fn download<'a>(&'a self, url: &'a str, path: &'a Path) -> BoxFuture<'a, bool>;
}

/// Runs an external report tool through the sanitized runner.
///
/// The tool is invoked as `<binary> <args..> <out_dir>`.
pub struct ExternalReportGenerator {
    runner: SafeRunner,
    binary: String,
    args: Vec<String>,
}

impl ExternalReportGenerator {
    pub fn new(runner: SafeRunner, binary: impl Into<String>, args: Vec<String>) -> Self {
        ExternalReportGenerator {
            runner,
            binary: binary.into(),
            args,
        }
    }

    async fn run_once(&self, out_dir: &Path) -> Result<(), ExecError> {
        let mut args = self.args.clone();
        args.push(out_dir.display().to_string());
        let output = self.runner.run_checked(&self.binary, &args).await?;
        log::debug!("[ReportGenerator] {}", output.stdout_str().trim());
        Ok(())
    }
}

impl ReportGenerator for ExternalReportGenerator {
    fn generate<'a>(&'a self, out_dir: &'a Path) -> BoxFuture<'a, i32> {
        async move {
            match retry_once("report generator", move || self.run_once(out_dir)).await {
                Ok(()) => 0,
                Err(e) => {
                    log::error!("[ReportGenerator] {}", e);
                    e.exit_code()
                }
            }
        }
        .boxed()
    }
}

/// Run `op`, retrying once on failure.
pub async fn retry_once<T, E, F, Fut>(label: &str, mut op: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    match op().await {
        Ok(value) => Ok(value),
        Err(first) => {
            log::warn!("[System] {} failed ({}); retrying once", label, first);
            op().await
        }
    }
}

/// Download through `fetcher`, retrying once.
pub async fn fetch_with_retry(fetcher: &dyn ResourceFetcher, url: &str, path: &Path) -> bool {
    retry_once(url, move || async move {
        if fetcher.download(url, path).await {
            Ok(())
        } else {
            Err(format!("download of {} failed", url))
        }
    })
    .await
    .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    struct FlakyFetcher {
        calls: AtomicUsize,
        succeed_on: usize,
    }

    impl ResourceFetcher for FlakyFetcher {
        fn download<'a>(&'a self, _url: &'a str, _path: &'a Path) -> BoxFuture<'a, bool> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            let ok = call == self.succeed_on;
            async move { ok }.boxed()
        }
    }

    #[tokio::test]
    async fn test_fetch_retries_once() {
        let fetcher = FlakyFetcher {
            calls: AtomicUsize::new(0),
            succeed_on: 2,
        };
        assert!(fetch_with_retry(&fetcher, "kext:Lilu.kext", Path::new("/tmp/x")).await);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_fetch_gives_up_after_second_failure() {
        let fetcher = FlakyFetcher {
            calls: AtomicUsize::new(0),
            succeed_on: 3,
        };
        assert!(!fetch_with_retry(&fetcher, "kext:Lilu.kext", Path::new("/tmp/x")).await);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_external_generator_reports_exit_code() {
        let dir = tempdir().unwrap();
        let runner = SafeRunner::new(dir.path(), &["true", "false"]);
        let ok = ExternalReportGenerator::new(runner.clone(), "true", Vec::new());
        assert_eq!(ok.generate(dir.path()).await, 0);
        let failing = ExternalReportGenerator::new(runner, "false", Vec::new());
        assert_eq!(failing.generate(dir.path()).await, 1);
    }

    #[tokio::test]
    async fn test_generator_rejects_out_dir_outside_root() {
        let root = tempdir().unwrap();
        let elsewhere = tempdir().unwrap();
        let generator = ExternalReportGenerator::new(SafeRunner::new(root.path(), &["true"]), "true", Vec::new());
        assert_eq!(generator.generate(elsewhere.path()).await, 126);
    }
}
