pub mod downloader;
pub mod engine;
mod error;
pub mod logs;
pub mod media;
pub mod models;
pub mod notify;
pub mod platform;
pub mod settings;

pub use downloader::{DownloadOutcome, Downloader};
pub use error::{DownloadError, EngineError, SettingsError};
pub use platform::detect;
