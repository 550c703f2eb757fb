use std::path::PathBuf;
use thiserror::Error;

/// Failures that terminate at the orchestrator boundary.
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("Please enter a URL")]
    EmptyInput,

    #[error("Please enter a valid URL")]
    InvalidUrl { url: String },

    #[error("a download is already in progress")]
    Busy,

    #[error("directory error for {path}: {message}")]
    DirectoryError { path: PathBuf, message: String },

    #[error("{0}")]
    EngineInvocation(#[from] EngineError),

    #[error("{message}")]
    EngineReportedFailure {
        message: String,
        traceback: Option<String>,
    },

    #[error("Error parsing logs: {0}")]
    LogParsing(String),
}

/// Failures raised while calling an external download engine.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("python interpreter not available: {0}")]
    InterpreterMissing(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// `message` is the last line the engine wrote to stderr, usually the
    /// exception it raised.
    #[error("{message}")]
    ProcessFailed {
        code: Option<i32>,
        message: String,
        stderr: String,
    },

    #[error("engine produced no result")]
    NoResult { stderr: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{0}")]
    Server(String),

    #[error("malformed engine result: {0}")]
    Malformed(String),
}

impl EngineError {
    /// Extra diagnostic text, such as the interpreter's stderr.
    pub fn detail(&self) -> Option<&str> {
        match self {
            EngineError::ProcessFailed { stderr, .. } | EngineError::NoResult { stderr } => {
                let trimmed = stderr.trim();
                (!trimmed.is_empty()).then_some(trimmed)
            }
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unknown theme: {0} (expected light, dark or auto)")]
    InvalidTheme(String),
}
