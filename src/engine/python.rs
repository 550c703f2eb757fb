use super::{DownloadEngine, ProgressCallback};
use crate::error::EngineError;
use futures::future::BoxFuture;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::OnceLock;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::OnceCell;

/// Prefix of the stdout line carrying the JSON result.
const RESULT_MARKER: &str = "@@ZINGY_RESULT@@ ";

const DRIVER: &str = r#"
import json, sys
import downloader
result = downloader.download_video(sys.argv[1], sys.argv[2], None)
if not isinstance(result, str):
    result = json.dumps(result)
sys.stdout.write("\n" + sys.argv[3] + result.replace("\n", " ") + "\n")
sys.stdout.flush()
"#;

fn progress_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"Progress: (\d{1,3})%").expect("static regex"))
}

/// Runs `downloader.download_video` in a Python subprocess.
pub struct PythonEngine {
    interpreter: PathBuf,
    module_dir: Option<PathBuf>,
    /// Interpreter version, probed once on first use.
    version: OnceCell<String>,
}

impl PythonEngine {
    pub fn new(interpreter: impl Into<PathBuf>, module_dir: Option<PathBuf>) -> Self {
        Self {
            interpreter: interpreter.into(),
            module_dir,
            version: OnceCell::new(),
        }
    }

    pub fn interpreter(&self) -> &Path {
        &self.interpreter
    }

    async fn ensure_started(&self) -> Result<&str, EngineError> {
        let version = self
            .version
            .get_or_try_init(|| async {
                let output = Command::new(&self.interpreter)
                    .arg("--version")
                    .stdin(Stdio::null())
                    .output()
                    .await
                    .map_err(|e| {
                        EngineError::InterpreterMissing(format!("{}: {e}", self.interpreter.display()))
                    })?;
                if !output.status.success() {
                    return Err(EngineError::InterpreterMissing(format!(
                        "{} --version exited with {}",
                        self.interpreter.display(),
                        output.status
                    )));
                }
                // Older interpreters print the version on stderr.
                let mut text = String::from_utf8_lossy(&output.stdout).trim().to_string();
                if text.is_empty() {
                    text = String::from_utf8_lossy(&output.stderr).trim().to_string();
                }
                tracing::info!(interpreter = %self.interpreter.display(), version = %text, "Python runtime ready");
                Ok::<String, EngineError>(text)
            })
            .await?;
        Ok(version.as_str())
    }

    async fn run(
        &self,
        url: &str,
        output_dir: &Path,
        progress: Option<ProgressCallback>,
    ) -> Result<String, EngineError> {
        self.ensure_started().await?;

        let mut cmd = Command::new(&self.interpreter);
        cmd.arg("-u")
            .arg("-c")
            .arg(DRIVER)
            .arg(url)
            .arg(output_dir)
            .arg(RESULT_MARKER)
            .env("PYTHONUNBUFFERED", "1")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.module_dir {
            let mut paths = vec![dir.clone()];
            if let Some(existing) = std::env::var_os("PYTHONPATH") {
                paths.extend(std::env::split_paths(&existing));
            }
            let joined = std::env::join_paths(paths)
                .map_err(|e| EngineError::Malformed(format!("invalid PYTHONPATH entry: {e}")))?;
            cmd.env("PYTHONPATH", joined);
        }

        tracing::debug!(url, output_dir = %output_dir.display(), "spawning python downloader");
        let mut child = cmd.spawn()?;

        let mut stderr = child.stderr.take();
        let stderr_task = tokio::spawn(async move {
            let mut text = String::new();
            if let Some(stderr) = stderr.as_mut() {
                let _ = stderr.read_to_string(&mut text).await;
            }
            text
        });

        let mut result = None;
        if let Some(stdout) = child.stdout.take() {
            let mut lines = BufReader::new(stdout).lines();
            while let Some(line) = lines.next_line().await? {
                if let Some(json) = line.strip_prefix(RESULT_MARKER) {
                    result = Some(json.to_string());
                    continue;
                }
                if let (Some(cb), Some(percent)) = (progress.as_ref(), parse_progress(&line)) {
                    cb(percent);
                }
                tracing::trace!(target: "zingy::engine", "{line}");
            }
        }

        let status = child.wait().await?;
        let stderr = stderr_task.await.unwrap_or_default();

        if !status.success() {
            let code = status.code();
            return Err(EngineError::ProcessFailed {
                code,
                message: failure_message(code, &stderr),
                stderr,
            });
        }
        result.ok_or(EngineError::NoResult { stderr })
    }
}

impl DownloadEngine for PythonEngine {
    fn download_video<'a>(
        &'a self,
        url: &'a str,
        output_dir: &'a Path,
        progress: Option<ProgressCallback>,
    ) -> BoxFuture<'a, Result<String, EngineError>> {
        Box::pin(self.run(url, output_dir, progress))
    }
}

/// The last non-empty stderr line, which is where Python prints the
/// uncaught exception.
fn failure_message(code: Option<i32>, stderr: &str) -> String {
    stderr
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .last()
        .map(str::to_string)
        .unwrap_or_else(|| {
            code.map_or_else(
                || "engine terminated by a signal".to_string(),
                |c| format!("engine exited with code {c}"),
            )
        })
}

/// Extracts the percentage from a `Progress: N%` log line.
fn parse_progress(line: &str) -> Option<u8> {
    let caps = progress_pattern().captures(line)?;
    let value: u16 = caps.get(1)?.as_str().parse().ok()?;
    Some(value.min(100) as u8)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_parse_progress() {
        assert_eq!(parse_progress("[10:00:00] [INFO] Progress: 42%"), Some(42));
        assert_eq!(parse_progress("Progress: 100%"), Some(100));
        assert_eq!(parse_progress("Progress: 999%"), Some(100));
        assert_eq!(parse_progress("Downloading: 10/20 bytes"), None);
    }

    #[test]
    fn test_failure_message_prefers_last_stderr_line() {
        let stderr = "Traceback (most recent call last):\n  File \"<string>\", line 3\nTimeoutError: timeout\n\n";
        assert_eq!(failure_message(Some(1), stderr), "TimeoutError: timeout");
        assert_eq!(failure_message(Some(2), "  \n"), "engine exited with code 2");
        assert_eq!(failure_message(None, ""), "engine terminated by a signal");
    }

    fn python3_available() -> bool {
        std::process::Command::new("python3")
            .arg("--version")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    /// Writes `downloader.py` with the given body and returns its directory.
    fn fake_module(body: &str) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("downloader.py"), body).unwrap();
        dir
    }

    #[tokio::test]
    async fn test_result_line_and_progress_are_read_from_stdout() {
        if !python3_available() {
            eprintln!("python3 not found, skipping");
            return;
        }
        let module = fake_module(
            r#"import json

def download_video(url, output_dir, progress_callback):
    print("[10:00:00] [INFO] Progress: 25%")
    print("Progress: 100%")
    return json.dumps({
        "success": True,
        "filename": output_dir + "/clip.mp4",
        "file_size": 10,
        "logs": ["[10:00:00] [INFO] fetched " + url],
    })
"#,
        );
        let out = tempfile::tempdir().unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let progress: ProgressCallback = Arc::new(move |p: u8| sink.lock().unwrap().push(p));

        let engine = PythonEngine::new("python3", Some(module.path().to_path_buf()));
        let raw = engine
            .download_video("https://youtu.be/abc", out.path(), Some(progress))
            .await
            .unwrap();

        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["success"], true);
        assert_eq!(
            value["filename"].as_str().unwrap(),
            format!("{}/clip.mp4", out.path().display())
        );
        assert_eq!(value["logs"][0], "[10:00:00] [INFO] fetched https://youtu.be/abc");
        assert_eq!(*seen.lock().unwrap(), vec![25, 100]);
    }

    #[tokio::test]
    async fn test_dict_result_is_serialized() {
        if !python3_available() {
            eprintln!("python3 not found, skipping");
            return;
        }
        let module = fake_module(
            "def download_video(url, output_dir, progress_callback):\n    return {'success': False, 'error': 'Unsupported URL'}\n",
        );
        let engine = PythonEngine::new("python3", Some(module.path().to_path_buf()));
        let out = tempfile::tempdir().unwrap();
        let raw = engine
            .download_video("https://vimeo.com/1", out.path(), None)
            .await
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["success"], false);
        assert_eq!(value["error"], "Unsupported URL");
    }

    #[tokio::test]
    async fn test_import_error_carries_exception_message() {
        if !python3_available() {
            eprintln!("python3 not found, skipping");
            return;
        }
        let module = fake_module("raise TimeoutError('timeout')\n");
        let engine = PythonEngine::new("python3", Some(module.path().to_path_buf()));
        let out = tempfile::tempdir().unwrap();
        let err = engine
            .download_video("https://youtu.be/abc", out.path(), None)
            .await
            .unwrap_err();

        assert!(matches!(err, EngineError::ProcessFailed { code: Some(1), .. }));
        assert_eq!(err.to_string(), "TimeoutError: timeout");
        assert!(err.detail().unwrap().starts_with("Traceback"));
    }

    #[tokio::test]
    async fn test_exit_without_result_line() {
        if !python3_available() {
            eprintln!("python3 not found, skipping");
            return;
        }
        let module = fake_module(
            "import os, sys\n\ndef download_video(url, output_dir, progress_callback):\n    sys.stderr.write('gave up\\n')\n    sys.stderr.flush()\n    os._exit(0)\n",
        );
        let engine = PythonEngine::new("python3", Some(module.path().to_path_buf()));
        let out = tempfile::tempdir().unwrap();
        let err = engine
            .download_video("https://youtu.be/abc", out.path(), None)
            .await
            .unwrap_err();

        assert!(matches!(err, EngineError::NoResult { .. }));
        assert_eq!(err.detail(), Some("gave up"));
    }

    #[tokio::test]
    async fn test_missing_interpreter() {
        let engine = PythonEngine::new("/nonexistent/python-zingy", None);
        let dir = tempfile::tempdir().unwrap();
        let err = engine
            .download_video("https://youtu.be/abc", dir.path(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InterpreterMissing(_)));
    }
}
