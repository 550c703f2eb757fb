use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tokio::task::JoinHandle;
use url::Url;

/// MIME hint passed along with every produced file.
pub const VIDEO_MIME: &str = "video/mp4";

/// Invoked once a scan finishes with the path and the identifier it resolved to.
pub type ScanCallback = Box<dyn FnOnce(PathBuf, Option<String>) + Send + 'static>;

/// Makes a freshly written file visible to whatever indexes media on the host.
///
/// `scan` must return immediately; the callback may run later on another task.
pub trait MediaIndexer: Send + Sync {
    fn scan(&self, path: &Path, mime: &str, on_complete: ScanCallback);
}

/// Resolves the file to a canonical `file://` URL.
#[derive(Debug, Default)]
pub struct FileUrlIndexer {
    pending: Mutex<Vec<JoinHandle<()>>>,
}

impl FileUrlIndexer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for every scan started so far to deliver its callback.
    pub async fn wait_idle(&self) {
        let handles = std::mem::take(&mut *self.pending.lock().unwrap_or_else(PoisonError::into_inner));
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "media scan task failed");
            }
        }
    }
}

impl MediaIndexer for FileUrlIndexer {
    fn scan(&self, path: &Path, mime: &str, on_complete: ScanCallback) {
        let path = path.to_path_buf();
        let mime = mime.to_string();
        let handle = tokio::spawn(async move {
            let resolved = match tokio::fs::canonicalize(&path).await {
                Ok(canonical) => Url::from_file_path(&canonical).ok().map(String::from),
                Err(e) => {
                    tracing::debug!(path = %path.display(), error = %e, "media scan could not resolve file");
                    None
                }
            };
            tracing::debug!(path = %path.display(), mime = %mime, resolved = ?resolved, "media scan finished");
            on_complete(path, resolved);
        });

        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        pending.retain(|h| !h.is_finished());
        pending.push(handle);
    }
}
