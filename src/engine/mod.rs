//! External download engines.
//!
//! An engine takes a URL and an output directory and eventually answers with
//! the JSON result document described by [`crate::models::DownloadResult`],
//! plus an optional `logs` array of `[timestamp] [LEVEL] message` lines.

mod http;
mod python;

pub use http::{DEFAULT_SERVER, HttpEngine};
pub use python::PythonEngine;

use crate::error::EngineError;
use futures::future::BoxFuture;
use std::path::Path;
use std::sync::Arc;

/// Receives download progress as a percentage.
pub type ProgressCallback = Arc<dyn Fn(u8) + Send + Sync>;

pub trait DownloadEngine: Send + Sync {
    /// Runs one download to completion and returns the raw JSON result.
    ///
    /// An `Err` means the engine could not be invoked at all; a download the
    /// engine attempted and gave up on is an `Ok` document with
    /// `"success": false`.
    fn download_video<'a>(
        &'a self,
        url: &'a str,
        output_dir: &'a Path,
        progress: Option<ProgressCallback>,
    ) -> BoxFuture<'a, Result<String, EngineError>>;
}

/// Formats a line the way engines report their own logs.
pub(crate) fn engine_log_line(level: &str, message: impl AsRef<str>) -> String {
    format!(
        "[{}] [{}] {}",
        chrono::Local::now().format("%H:%M:%S"),
        level,
        message.as_ref()
    )
}
