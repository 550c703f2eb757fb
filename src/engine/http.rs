use super::{DownloadEngine, ProgressCallback, engine_log_line};
use crate::error::EngineError;
use futures::future::BoxFuture;
use reqwest::Client;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_SERVER: &str = "http://localhost:4321";

#[derive(Debug, Deserialize)]
struct StartResponse {
    success: bool,
    download_id: Option<String>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProgressResponse {
    success: bool,
    #[serde(default)]
    progress: u32,
    #[serde(default)]
    status: String,
    #[serde(default)]
    filename: String,
    error: Option<String>,
    #[serde(default)]
    title: String,
}

#[derive(Debug, Deserialize)]
struct FileEntry {
    name: String,
    size: u64,
}

#[derive(Debug, Deserialize)]
struct FilesResponse {
    #[serde(default)]
    files: Vec<FileEntry>,
    download_dir: String,
}

/// Drives a download server through its `/api/download`, `/api/progress`
/// and `/api/files` endpoints.
///
/// The server decides where files land; the requested output directory is
/// only recorded in the logs.
#[derive(Clone)]
pub struct HttpEngine {
    client: Client,
    base_url: String,
    poll_interval: Duration,
    retries: u32,
}

impl HttpEngine {
    pub fn new(base_url: &str, retries: u32) -> Result<Self, EngineError> {
        let client = Client::builder().timeout(Duration::from_secs(300)).build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            poll_interval: Duration::from_millis(500),
            retries: retries.max(1),
        })
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get_json_with_retry<T: DeserializeOwned>(&self, path: &str) -> Result<T, EngineError> {
        let mut attempt = 0u32;

        loop {
            attempt += 1;

            match self.get_json(path).await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < self.retries => {
                    // Exponential backoff: 1s, 2s, 4s...
                    let delay_ms = (1000u64 << (attempt - 1).min(5)).min(30_000);
                    tracing::warn!(path, attempt, retries = self.retries, error = %e, "request failed, retrying");
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, EngineError> {
        let response = self
            .client
            .get(self.endpoint(path))
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json::<T>().await?)
    }

    async fn run(
        &self,
        url: &str,
        output_dir: &Path,
        progress: Option<ProgressCallback>,
    ) -> Result<String, EngineError> {
        let mut logs = vec![
            engine_log_line("INFO", format!("Server: {}", self.base_url)),
            engine_log_line("INFO", format!("Requested dir: {}", output_dir.display())),
        ];

        let start: StartResponse = self
            .client
            .post(self.endpoint("/api/download"))
            .json(&json!({ "url": url, "format": "best" }))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let download_id = match (start.success, start.download_id) {
            (true, Some(id)) => id,
            (_, _) => {
                let error = start.error.unwrap_or_else(|| "Download failed".to_string());
                logs.push(engine_log_line("ERROR", format!("Server refused download: {error}")));
                return Ok(json!({ "success": false, "error": error, "logs": logs }).to_string());
            }
        };
        logs.push(engine_log_line("INFO", format!("Download id: {download_id}")));

        let progress_path = format!("/api/progress/{download_id}");
        let mut last_percent = None;
        let finished = loop {
            tokio::time::sleep(self.poll_interval).await;
            let report: ProgressResponse = self.get_json_with_retry(&progress_path).await?;
            if !report.success {
                return Err(EngineError::Server(
                    report.error.unwrap_or_else(|| "Download not found".to_string()),
                ));
            }

            let percent = report.progress.min(100) as u8;
            if last_percent != Some(percent) {
                last_percent = Some(percent);
                if let Some(cb) = progress.as_ref() {
                    cb(percent);
                }
                logs.push(engine_log_line("DEBUG", format!("Progress: {percent}%")));
            }

            let status = report.status.clone();
            match status.as_str() {
                "completed" => break report,
                "error" => {
                    let error = report.error.unwrap_or_else(|| "Download failed".to_string());
                    logs.push(engine_log_line("ERROR", format!("Server reported: {error}")));
                    return Ok(json!({ "success": false, "error": error, "logs": logs }).to_string());
                }
                _ => {}
            }
        };

        let listing: FilesResponse = self.get_json_with_retry("/api/files").await?;
        let Some(entry) = listing.files.iter().find(|f| f.name == finished.filename) else {
            logs.push(engine_log_line("ERROR", format!("File not listed: {}", finished.filename)));
            return Ok(json!({
                "success": false,
                "error": "Download completed but file not found",
                "logs": logs,
            })
            .to_string());
        };

        let full_path = Path::new(&listing.download_dir).join(&entry.name);
        logs.push(engine_log_line("INFO", format!("File: {}", full_path.display())));

        Ok(json!({
            "success": true,
            "filename": full_path.to_string_lossy(),
            "file_size": entry.size,
            "title": finished.title,
            "logs": logs,
        })
        .to_string())
    }
}

impl DownloadEngine for HttpEngine {
    fn download_video<'a>(
        &'a self,
        url: &'a str,
        output_dir: &'a Path,
        progress: Option<ProgressCallback>,
    ) -> BoxFuture<'a, Result<String, EngineError>> {
        Box::pin(self.run(url, output_dir, progress))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, VecDeque};
    use std::sync::{Arc, Mutex};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    /// Canned JSON bodies per request path. The last body for a path repeats.
    type Routes = Arc<Mutex<HashMap<String, VecDeque<String>>>>;

    async fn stub_server(routes: Vec<(&str, Vec<&str>)>) -> String {
        let routes: Routes = Arc::new(Mutex::new(
            routes
                .into_iter()
                .map(|(path, bodies)| {
                    (path.to_string(), bodies.iter().map(|b| b.to_string()).collect())
                })
                .collect(),
        ));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                tokio::spawn(respond(socket, routes.clone()));
            }
        });
        format!("http://{addr}")
    }

    async fn respond(mut socket: TcpStream, routes: Routes) {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        let header_end = loop {
            let n = socket.read(&mut chunk).await.unwrap();
            if n == 0 {
                return;
            }
            buf.extend_from_slice(&chunk[..n]);
            if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                break pos + 4;
            }
        };
        let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
        let content_length = head
            .lines()
            .filter_map(|line| line.split_once(':'))
            .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
            .and_then(|(_, value)| value.trim().parse::<usize>().ok())
            .unwrap_or(0);
        while buf.len() < header_end + content_length {
            let n = socket.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
        }

        let path = head.split_whitespace().nth(1).unwrap_or("/").to_string();
        let body = {
            let mut routes = routes.lock().unwrap();
            routes.get_mut(&path).and_then(|bodies| {
                if bodies.len() > 1 {
                    bodies.pop_front()
                } else {
                    bodies.front().cloned()
                }
            })
        };
        let (status, body) = match body {
            Some(body) => ("200 OK", body),
            None => ("404 Not Found", "{}".to_string()),
        };
        let response = format!(
            "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        );
        let _ = socket.write_all(response.as_bytes()).await;
        let _ = socket.shutdown().await;
    }

    fn fast_engine(base_url: &str) -> HttpEngine {
        HttpEngine::new(base_url, 1)
            .unwrap()
            .with_poll_interval(Duration::from_millis(5))
    }

    async fn fetch(engine: &HttpEngine, progress: Option<ProgressCallback>) -> Result<serde_json::Value, EngineError> {
        let dir = tempfile::tempdir().unwrap();
        let raw = engine
            .download_video("https://youtu.be/abc", dir.path(), progress)
            .await?;
        Ok(serde_json::from_str(&raw).unwrap())
    }

    const STARTED: &str = r#"{"success":true,"download_id":"d1"}"#;

    #[tokio::test]
    async fn test_completed_download_is_looked_up_in_listing() {
        let base = stub_server(vec![
            ("/api/download", vec![STARTED]),
            (
                "/api/progress/d1",
                vec![
                    r#"{"success":true,"progress":40,"status":"downloading"}"#,
                    r#"{"success":true,"progress":40,"status":"downloading"}"#,
                    r#"{"success":true,"progress":100,"status":"completed","filename":"clip.mp4","title":"Clip"}"#,
                ],
            ),
            (
                "/api/files",
                vec![r#"{"files":[{"name":"other.mp4","size":1},{"name":"clip.mp4","size":1048576}],"download_dir":"/srv/downloads"}"#],
            ),
        ])
        .await;
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let progress: ProgressCallback = Arc::new(move |p: u8| sink.lock().unwrap().push(p));

        let result = fetch(&fast_engine(&base), Some(progress)).await.unwrap();

        assert_eq!(result["success"], true);
        assert_eq!(result["filename"], "/srv/downloads/clip.mp4");
        assert_eq!(result["file_size"], 1048576);
        assert_eq!(result["title"], "Clip");
        assert_eq!(*seen.lock().unwrap(), vec![40, 100]);
        let logs = result["logs"].as_array().unwrap();
        assert!(logs.iter().any(|l| l.as_str().unwrap().ends_with("Download id: d1")));
    }

    #[tokio::test]
    async fn test_refused_start_is_reported_failure() {
        let base = stub_server(vec![(
            "/api/download",
            vec![r#"{"success":false,"error":"URL is required"}"#],
        )])
        .await;

        let result = fetch(&fast_engine(&base), None).await.unwrap();
        assert_eq!(result["success"], false);
        assert_eq!(result["error"], "URL is required");
    }

    #[tokio::test]
    async fn test_error_status_is_reported_failure() {
        let base = stub_server(vec![
            ("/api/download", vec![STARTED]),
            (
                "/api/progress/d1",
                vec![r#"{"success":true,"progress":10,"status":"error","error":"Video unavailable"}"#],
            ),
        ])
        .await;

        let result = fetch(&fast_engine(&base), None).await.unwrap();
        assert_eq!(result["success"], false);
        assert_eq!(result["error"], "Video unavailable");
    }

    #[tokio::test]
    async fn test_unlisted_file_is_reported_failure() {
        let base = stub_server(vec![
            ("/api/download", vec![STARTED]),
            (
                "/api/progress/d1",
                vec![r#"{"success":true,"progress":100,"status":"completed","filename":"clip.mp4"}"#],
            ),
            ("/api/files", vec![r#"{"files":[],"download_dir":"/srv/downloads"}"#]),
        ])
        .await;

        let result = fetch(&fast_engine(&base), None).await.unwrap();
        assert_eq!(result["success"], false);
        assert_eq!(result["error"], "Download completed but file not found");
    }

    #[tokio::test]
    async fn test_unknown_download_id_is_server_error() {
        let base = stub_server(vec![
            ("/api/download", vec![STARTED]),
            ("/api/progress/d1", vec![r#"{"success":false,"error":"Download not found"}"#]),
        ])
        .await;

        let err = fetch(&fast_engine(&base), None).await.unwrap_err();
        assert!(matches!(&err, EngineError::Server(m) if m == "Download not found"));
    }

    #[test]
    fn test_endpoint_joins_without_double_slash() {
        let engine = HttpEngine::new("http://localhost:4321/", 3).unwrap();
        assert_eq!(engine.endpoint("/api/files"), "http://localhost:4321/api/files");
    }

    #[test]
    fn test_progress_response_defaults() {
        let report: ProgressResponse =
            serde_json::from_str(r#"{"success":true,"status":"downloading"}"#).unwrap();
        assert_eq!(report.progress, 0);
        assert!(report.filename.is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_server_is_invocation_error() {
        // Port 9 (discard) is essentially never served over http locally.
        let engine = HttpEngine::new("http://127.0.0.1:9", 1).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let err = engine
            .download_video("https://youtu.be/abc", dir.path(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Http(_)));
    }
}
