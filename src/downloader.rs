//! Drives a single download from submitted URL to final state.
//!
//! ```text
//! Idle -> Validating -> PreparingDirectory -> Invoking -> ParsingResult
//!      -> Succeeded | Failed -> Idle
//! ```
//!
//! Validation failures return to `Idle` without calling the engine. Every
//! failure ends here: it is logged at ERROR, written into the state, and
//! returned to the caller as a [`DownloadError`].

use crate::engine::{DownloadEngine, ProgressCallback};
use crate::error::{DownloadError, EngineError};
use crate::logs::{self, LogBuffer};
use crate::media::{MediaIndexer, VIDEO_MIME};
use crate::models::{DownloadRequest, DownloadResult, DownloadState, LogLevel, Phase, format_megabytes};
use crate::notify::Notifier;
use crate::platform;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::fs;
use tokio::sync::watch;

const NOTIFICATION_TITLE: &str = "Downloading...";
const WRITE_PROBE: &str = ".zingy-write-test";

/// What a successful download produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadOutcome {
    pub file_path: PathBuf,
    pub file_size: Option<String>,
    pub title: Option<String>,
}

/// Holds the single-flight flag for as long as a request runs.
struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Armed once the engine is invoked. If the request future is dropped before
/// a terminal state is written, this puts the state back to idle and stops
/// the notification.
struct Abandoned<'a> {
    state: &'a watch::Sender<DownloadState>,
    notifier: &'a dyn Notifier,
    logs: &'a LogBuffer,
}

impl Drop for Abandoned<'_> {
    fn drop(&mut self) {
        let reset = self.state.send_if_modified(|s| {
            if !s.is_loading {
                return false;
            }
            s.phase = Phase::Idle;
            s.is_loading = false;
            s.progress = 0;
            s.status = String::new();
            true
        });
        if reset {
            self.notifier.stop();
            self.logs.warn("Download abandoned before the engine returned");
        }
    }
}

pub struct Downloader {
    engine: Arc<dyn DownloadEngine>,
    notifier: Arc<dyn Notifier>,
    indexer: Arc<dyn MediaIndexer>,
    logs: LogBuffer,
    state: Arc<watch::Sender<DownloadState>>,
    busy: AtomicBool,
}

impl Downloader {
    pub fn new(
        engine: Arc<dyn DownloadEngine>,
        notifier: Arc<dyn Notifier>,
        indexer: Arc<dyn MediaIndexer>,
        logs: LogBuffer,
    ) -> Self {
        let (state, _) = watch::channel(DownloadState::default());
        Self {
            engine,
            notifier,
            indexer,
            logs,
            state: Arc::new(state),
            busy: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> DownloadState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<DownloadState> {
        self.state.subscribe()
    }

    pub fn logs(&self) -> &LogBuffer {
        &self.logs
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Records the URL being edited and what platform it looks like.
    ///
    /// Ignored while a request is in flight.
    pub fn update_url(&self, url: &str) {
        if self.is_busy() {
            tracing::debug!(url, "ignoring URL edit while a download is in flight");
            return;
        }
        self.set_url(url);
    }

    fn set_url(&self, url: &str) {
        let detected = platform::detect(url).map(str::to_string);
        self.state.send_modify(|s| {
            s.url = url.to_string();
            s.error = None;
            s.success_message = None;
            s.detected_platform = detected;
        });
    }

    pub fn clear_messages(&self) {
        self.state.send_modify(|s| {
            s.error = None;
            s.success_message = None;
        });
    }

    /// Sets the URL and downloads it into `output_dir`.
    pub async fn submit(&self, url: &str, output_dir: &Path) -> Result<DownloadOutcome, DownloadError> {
        let Some(_in_flight) = InFlight::acquire(&self.busy) else {
            return Err(self.reject_busy());
        };
        self.set_url(url);
        self.run(output_dir).await
    }

    /// Downloads the URL currently held in the state.
    pub async fn download(&self, output_dir: &Path) -> Result<DownloadOutcome, DownloadError> {
        let Some(_in_flight) = InFlight::acquire(&self.busy) else {
            return Err(self.reject_busy());
        };
        self.run(output_dir).await
    }

    fn reject_busy(&self) -> DownloadError {
        self.logs.error("Error: A download is already in progress");
        DownloadError::Busy
    }

    async fn run(&self, output_dir: &Path) -> Result<DownloadOutcome, DownloadError> {
        self.set_phase(Phase::Validating);
        let (request, platform) = self.validate(output_dir)?;

        self.state.send_modify(|s| {
            s.phase = Phase::PreparingDirectory;
            s.detected_platform = Some(platform.to_string());
        });
        self.logs.info("Starting download...");
        self.logs.info(format!("URL: {}", request.url));
        self.logs.info(format!("Platform: {platform}"));
        self.logs.info(format!("Output directory: {}", request.output_dir.display()));

        if let Err(e) = self.prepare_directory(&request.output_dir).await {
            // The engine reports the real failure if the directory is unusable.
            self.logs.error(format!("Error checking directory: {e}"));
        }

        self.state.send_modify(|s| {
            s.phase = Phase::Invoking;
            s.is_loading = true;
            s.progress = 0;
            s.status = "Starting download...".to_string();
            s.error = None;
            s.success_message = None;
            s.file_size = None;
        });
        self.notifier.start(NOTIFICATION_TITLE);
        let _abandoned = Abandoned {
            state: &self.state,
            notifier: self.notifier.as_ref(),
            logs: &self.logs,
        };

        self.logs.info("Calling downloader engine...");
        let raw = match self
            .engine
            .download_video(&request.url, &request.output_dir, Some(self.progress_callback()))
            .await
        {
            Ok(raw) => raw,
            Err(e) => return Err(self.fail_invocation(e)),
        };

        self.set_phase(Phase::ParsingResult);
        let result = match self.parse_result(&raw) {
            Ok(result) => result,
            Err(e) => return Err(self.fail_invocation(e)),
        };

        if result.success {
            self.succeed(result)
        } else {
            Err(self.fail_reported(result))
        }
    }

    fn validate(&self, output_dir: &Path) -> Result<(DownloadRequest, &'static str), DownloadError> {
        let url = self.state.borrow().url.trim().to_string();

        if url.is_empty() {
            let err = DownloadError::EmptyInput;
            self.reject("Error: Empty URL".to_string(), err.to_string());
            return Err(err);
        }

        let Some(platform) = platform::detect(&url) else {
            self.reject(format!("Error: Invalid URL: {url}"), "Please enter a valid URL".to_string());
            return Err(DownloadError::InvalidUrl { url });
        };

        let request = DownloadRequest {
            url,
            output_dir: output_dir.to_path_buf(),
        };
        Ok((request, platform))
    }

    fn reject(&self, log_line: String, message: String) {
        self.state.send_modify(|s| {
            s.phase = Phase::Idle;
            s.error = Some(message);
        });
        self.logs.error(log_line);
    }

    async fn prepare_directory(&self, dir: &Path) -> Result<(), DownloadError> {
        let dir_error = |e: std::io::Error| DownloadError::DirectoryError {
            path: dir.to_path_buf(),
            message: e.to_string(),
        };

        // A path under a regular file does not exist; creating it reports why.
        let exists = match fs::try_exists(dir).await {
            Ok(exists) => exists,
            Err(e) if e.kind() == std::io::ErrorKind::NotADirectory => false,
            Err(e) => return Err(dir_error(e)),
        };
        if !exists {
            match fs::create_dir_all(dir).await {
                Ok(()) => self.logs.info("Directory created: true"),
                Err(e) => self.logs.warn(format!("Directory created: false ({e})")),
            }
        }

        let probe = dir.join(WRITE_PROBE);
        let writable = match fs::write(&probe, b"x").await {
            Ok(()) => {
                let _ = fs::remove_file(&probe).await;
                true
            }
            Err(_) => false,
        };
        if writable {
            self.logs.info("Directory is writable");
        } else {
            self.logs.warn("Directory may not be writable!");
        }
        Ok(())
    }

    fn progress_callback(&self) -> ProgressCallback {
        let state = Arc::clone(&self.state);
        let notifier = Arc::clone(&self.notifier);
        Arc::new(move |percent: u8| {
            let percent = percent.min(100);
            let changed = state.send_if_modified(|s| {
                if !s.is_loading || s.progress == percent {
                    return false;
                }
                s.progress = percent;
                s.status = format!("Downloading... {percent}%");
                true
            });
            if changed {
                notifier.update_progress(NOTIFICATION_TITLE, percent);
            }
        })
    }

    /// Decodes the engine document, replaying its log lines first.
    fn parse_result(&self, raw: &str) -> Result<DownloadResult, EngineError> {
        let mut value: Value = serde_json::from_str(raw.trim())
            .map_err(|e| EngineError::Malformed(e.to_string()))?;

        let log_field = value.as_object_mut().and_then(|obj| obj.remove("logs"));
        let log_lines = match log_field {
            None | Some(Value::Null) => Vec::new(),
            Some(field) => match engine_log_lines(field) {
                Ok(lines) => lines,
                Err(e) => {
                    self.logs.warn(e.to_string());
                    Vec::new()
                }
            },
        };
        for line in &log_lines {
            match logs::parse_line(line) {
                Some((level, message)) => self.logs.append(message, level),
                None => self.logs.append(line.clone(), LogLevel::Info),
            }
        }

        let mut result: DownloadResult =
            serde_json::from_value(value).map_err(|e| EngineError::Malformed(e.to_string()))?;
        result.log_lines = log_lines;
        Ok(result)
    }

    fn succeed(&self, result: DownloadResult) -> Result<DownloadOutcome, DownloadError> {
        let Some(file_path) = result.file_path.filter(|p| !p.trim().is_empty()) else {
            return Err(self.fail_invocation(EngineError::Malformed(
                "Download succeeded but no filename was reported".to_string(),
            )));
        };
        let path = PathBuf::from(&file_path);
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| file_path.clone());
        let file_size = result.file_size_bytes.map(format_megabytes);

        self.logs.info(format!(
            "Download successful: {file_name} ({})",
            file_size.as_deref().unwrap_or_default()
        ));
        self.logs.info(format!("Full path: {file_path}"));

        self.logs.info("Triggering media scan...");
        let scan_logs = self.logs.clone();
        self.indexer.scan(
            &path,
            VIDEO_MIME,
            Box::new(move |scanned: PathBuf, resolved: Option<String>| match resolved {
                Some(id) => scan_logs.info(format!("Media scan complete: {id}")),
                None => scan_logs.info(format!("Media scan found nothing at {}", scanned.display())),
            }),
        );

        let size_for_state = file_size.clone();
        self.state.send_modify(|s| {
            s.phase = Phase::Succeeded;
            s.is_loading = false;
            s.progress = 100;
            s.status = "Complete".to_string();
            s.success_message = Some(format!("Saved to: {file_path}"));
            s.file_size = size_for_state;
            s.url = String::new();
        });
        self.notifier.stop();
        self.set_phase(Phase::Idle);

        Ok(DownloadOutcome {
            file_path: path,
            file_size,
            title: result.title,
        })
    }

    fn fail_reported(&self, result: DownloadResult) -> DownloadError {
        let message = result
            .error_message
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| "Download failed".to_string());
        self.logs.error(format!("Download failed: {message}"));
        if let Some(traceback) = &result.traceback {
            self.logs.error(format!("Traceback: {traceback}"));
        }

        self.finish_failed(message.clone());
        DownloadError::EngineReportedFailure {
            message,
            traceback: result.traceback,
        }
    }

    fn fail_invocation(&self, error: EngineError) -> DownloadError {
        let message = error.to_string();
        self.logs.error(format!("Exception: {message}"));
        let detail = error.detail().map(str::to_string).unwrap_or_else(|| format!("{error:?}"));
        self.logs.error(format!("Stack trace: {detail}"));

        let shown = if message.trim().is_empty() {
            "An error occurred".to_string()
        } else {
            message
        };
        self.finish_failed(shown);
        DownloadError::EngineInvocation(error)
    }

    fn finish_failed(&self, message: String) {
        self.state.send_modify(|s| {
            s.phase = Phase::Failed;
            s.is_loading = false;
            s.progress = 0;
            s.status = String::new();
            s.error = Some(message);
        });
        self.notifier.stop();
        self.set_phase(Phase::Idle);
    }

    fn set_phase(&self, phase: Phase) {
        self.state.send_modify(|s| s.phase = phase);
    }
}

fn engine_log_lines(field: Value) -> Result<Vec<String>, DownloadError> {
    let Value::Array(items) = field else {
        return Err(DownloadError::LogParsing(format!("expected an array, got {field}")));
    };
    Ok(items
        .into_iter()
        .map(|item| match item {
            Value::String(line) => line,
            other => other.to_string(),
        })
        .collect())
}
