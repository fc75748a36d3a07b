//! Decoupled logging pipeline for EFI builds.
//!
//! Every `log::info!()`/`log::warn!()` call lands here. Lines are handed to a
//! background OS thread over an unbounded crossbeam channel, so the worker
//! never blocks on disk or on a congested UI channel.
//!
//! ```text
//! log::info!() ---> [LogCollector] ---> crossbeam ---> [disk thread]
//!                                                         |       |
//!                                          logs/full/<ts>.log    UI channel (try_send)
//!                                          logs/parsed/<ts>.log
//! ```
//!
//! Lines logged with `target: "parsed"` are build milestones. They are written
//! to both files and forwarded to the UI.

use chrono::Local;
use crossbeam_channel::{unbounded, Sender};
use log::{Log, Metadata, Record};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Internal log line or special marker
enum LogMessage {
    Line(LogLine),
    /// Flush marker; the sender is signalled once every earlier line is on disk
    Flush(std::sync::mpsc::Sender<()>),
}

/// Session state with generation tracking for detecting session changes
#[derive(Clone, Debug)]
struct SessionState {
    path: Option<PathBuf>,
    generation: u64,
}

/// A log line with metadata
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogLine {
    pub message: String,
    /// "full" or "parsed"
    pub log_type: String,
    pub timestamp: String,
}

impl LogLine {
    pub fn new(message: String) -> Self {
        LogLine {
            message,
            log_type: "full".to_string(),
            timestamp: Local::now().format("%H:%M:%S%.3f").to_string(),
        }
    }

    pub fn parsed(message: String) -> Self {
        LogLine {
            message,
            log_type: "parsed".to_string(),
            timestamp: Local::now().format("%H:%M:%S%.3f").to_string(),
        }
    }

    pub fn is_parsed(&self) -> bool {
        self.log_type == "parsed"
    }
}

/// Unified logger that handles disk and UI dispatch
pub struct LogCollector {
    tx: Sender<LogMessage>,
    log_dir: PathBuf,
    session_state: Arc<Mutex<SessionState>>,
}

impl LogCollector {
    /// Create a collector and spawn its disk thread.
    ///
    /// Parsed lines are forwarded to `ui_tx` without blocking; a full UI
    /// channel drops the UI copy, never the disk copy.
    pub fn new(log_dir: PathBuf, ui_tx: tokio::sync::mpsc::Sender<LogLine>) -> Result<Self, String> {
        let full_log_dir = log_dir.join("full");
        let parsed_log_dir = log_dir.join("parsed");
        std::fs::create_dir_all(&full_log_dir)
            .map_err(|e| format!("Failed to create full log dir: {}", e))?;
        std::fs::create_dir_all(&parsed_log_dir)
            .map_err(|e| format!("Failed to create parsed log dir: {}", e))?;

        let (tx, rx) = unbounded::<LogMessage>();
        let session_state = Arc::new(Mutex::new(SessionState {
            path: None,
            generation: 0,
        }));
        let session_clone = Arc::clone(&session_state);

        std::thread::spawn(move || {
            let mut file_handles: HashMap<&'static str, File> = HashMap::new();
            let mut last_generation: u64 = 0;

            while let Ok(msg) = rx.recv() {
                match msg {
                    LogMessage::Line(line) => {
                        let session_path = match session_clone.lock() {
                            Ok(session) => {
                                if session.generation != last_generation {
                                    file_handles.clear();
                                    last_generation = session.generation;
                                }
                                session.path.clone()
                            }
                            Err(_) => None,
                        };

                        if !file_handles.contains_key("full") {
                            let path = session_path
                                .or_else(|| get_or_create_latest_log(&full_log_dir).ok());
                            if let Some(file) = path.and_then(|p| open_append(&p)) {
                                file_handles.insert("full", file);
                            }
                        }
                        if let Some(file) = file_handles.get_mut("full") {
                            let _ = writeln!(file, "[{}] {}", line.timestamp, line.message);
                        }

                        if line.is_parsed() {
                            if !file_handles.contains_key("parsed") {
                                if let Some(file) = get_or_create_latest_log(&parsed_log_dir)
                                    .ok()
                                    .and_then(|p| open_append(&p))
                                {
                                    file_handles.insert("parsed", file);
                                }
                            }
                            if let Some(file) = file_handles.get_mut("parsed") {
                                let _ = writeln!(file, "[{}] {}", line.timestamp, line.message);
                            }
                            let _ = ui_tx.try_send(line);
                        }
                    }
                    LogMessage::Flush(done) => {
                        for file in file_handles.values_mut() {
                            let _ = file.flush();
                        }
                        let _ = done.send(());
                    }
                }
            }
        });

        Ok(LogCollector {
            tx,
            log_dir,
            session_state,
        })
    }

    /// Start a new session with a dedicated full-log file.
    pub fn start_new_session(&self, filename: &str) -> Result<PathBuf, String> {
        let log_path = self.log_dir.join("full").join(filename);
        let mut session = self
            .session_state
            .lock()
            .map_err(|e| format!("Failed to lock session state: {}", e))?;
        session.path = Some(log_path.clone());
        session.generation = session.generation.wrapping_add(1);
        Ok(log_path)
    }

    pub fn get_session_log_path(&self) -> Option<PathBuf> {
        self.session_state.lock().ok().and_then(|s| s.path.clone())
    }

    /// Send a log line (non-blocking, cannot fail)
    pub fn log(&self, line: LogLine) {
        let _ = self.tx.send(LogMessage::Line(line));
    }

    pub fn log_str(&self, message: impl Into<String>) {
        self.log(LogLine::new(message.into()));
    }

    pub fn log_parsed(&self, message: impl Into<String>) {
        self.log(LogLine::parsed(message.into()));
    }

    /// Wait until every line sent before this call is flushed to disk.
    pub async fn wait_for_empty(&self) -> Result<(), String> {
        let (tx, rx) = std::sync::mpsc::channel::<()>();
        self.tx
            .send(LogMessage::Flush(tx))
            .map_err(|e| format!("Failed to send flush marker: {}", e))?;
        tokio::task::spawn_blocking(move || rx.recv())
            .await
            .map_err(|e| format!("Flush task failed: {}", e))?
            .map_err(|e| format!("Flush signal interrupted: {}", e))
    }
}

impl Clone for LogCollector {
    fn clone(&self) -> Self {
        LogCollector {
            tx: self.tx.clone(),
            log_dir: self.log_dir.clone(),
            session_state: Arc::clone(&self.session_state),
        }
    }
}

/// Wires `log::info!()` and friends into the collector.
impl Log for LogCollector {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            let message = format!("[{}] {}", record.level(), record.args());
            if record.target() == "parsed" {
                self.log_parsed(message);
            } else {
                self.log_str(message);
            }
        }
    }

    fn flush(&self) {}
}

fn open_append(path: &Path) -> Option<File> {
    OpenOptions::new().create(true).append(true).open(path).ok()
}

/// Get the most recent log file in `log_dir`, or create a new one
fn get_or_create_latest_log(log_dir: &Path) -> Result<PathBuf, String> {
    if let Ok(entries) = std::fs::read_dir(log_dir) {
        let mut logs: Vec<_> = entries
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().map_or(false, |ext| ext == "log"))
            .collect();
        logs.sort_by(|a, b| {
            let a_time = a.metadata().ok().and_then(|m| m.modified().ok());
            let b_time = b.metadata().ok().and_then(|m| m.modified().ok());
            b_time.cmp(&a_time)
        });
        if let Some(latest) = logs.first() {
            return Ok(latest.path());
        }
    }

    let timestamp = Local::now().format("%Y%m%d_%H%M%S");
    let log_type = if log_dir.ends_with("parsed") { "parsed" } else { "full" };
    let log_path = log_dir.join(format!("{}_{}.log", timestamp, log_type));
    File::create(&log_path).map_err(|e| format!("Failed to create log file: {}", e))?;
    Ok(log_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_log_collector_creates_directories() {
        let temp_dir = TempDir::new().unwrap();
        let (ui_tx, _ui_rx) = tokio::sync::mpsc::channel(100);
        let result = LogCollector::new(temp_dir.path().to_path_buf(), ui_tx);

        assert!(result.is_ok());
        assert!(temp_dir.path().join("full").exists());
        assert!(temp_dir.path().join("parsed").exists());
    }

    #[tokio::test]
    async fn test_parsed_lines_reach_disk_and_ui() {
        let temp_dir = TempDir::new().unwrap();
        let (ui_tx, mut ui_rx) = tokio::sync::mpsc::channel(100);
        let collector = LogCollector::new(temp_dir.path().to_path_buf(), ui_tx).unwrap();

        for i in 0..500 {
            collector.log_str(format!("detail {}", i));
        }
        collector.log_parsed("[Build] [PHASE] Assembling");
        collector.wait_for_empty().await.unwrap();

        let forwarded = ui_rx.recv().await.unwrap();
        assert_eq!(forwarded.message, "[Build] [PHASE] Assembling");

        let parsed_dir = temp_dir.path().join("parsed");
        let parsed_file = fs::read_dir(&parsed_dir).unwrap().next().unwrap().unwrap().path();
        let contents = fs::read_to_string(parsed_file).unwrap();
        assert!(contents.contains("Assembling"));
        assert!(!contents.contains("detail 1"));
    }

    #[tokio::test]
    async fn test_new_session_redirects_full_log() {
        let temp_dir = TempDir::new().unwrap();
        let (ui_tx, _ui_rx) = tokio::sync::mpsc::channel(4);
        let collector = LogCollector::new(temp_dir.path().to_path_buf(), ui_tx).unwrap();

        let session = collector.start_new_session("run_1.log").unwrap();
        collector.log_str("into the session file");
        collector.wait_for_empty().await.unwrap();

        assert_eq!(collector.get_session_log_path(), Some(session.clone()));
        assert!(fs::read_to_string(session).unwrap().contains("into the session file"));
    }
}
