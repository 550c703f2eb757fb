use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum EngineKind {
    /// Run the `downloader` Python module in a subprocess
    Python,
    /// Talk to a running download server
    Http,
}

#[derive(Parser, Debug)]
#[command(name = "zingy")]
#[command(author, version, about = "Download videos from YouTube, Instagram, TikTok and more", long_about = None)]
pub struct Args {
    /// Settings file (default: <config dir>/zingy/settings.json)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Download engine
    #[arg(short, long, value_enum, default_value = "python", global = true)]
    pub engine: EngineKind,

    /// Python interpreter used by the python engine
    #[arg(long, default_value = "python3", global = true)]
    pub python: PathBuf,

    /// Directory containing downloader.py
    #[arg(long, global = true)]
    pub module_dir: Option<PathBuf>,

    /// Download server used by the http engine
    #[arg(long, default_value = zingy::engine::DEFAULT_SERVER, global = true)]
    pub server: String,

    /// Number of attempts for each server poll
    #[arg(short, long, default_value = "3", global = true)]
    pub retries: u32,

    /// Hide the progress indicator
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Print debug diagnostics
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Download a single video
    Download {
        /// Video URL
        url: String,

        /// Output directory (default: the configured download path)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Write the session log to this file when done
        #[arg(long)]
        export_logs: Option<PathBuf>,
    },

    /// Show which platform a URL belongs to
    Detect {
        url: String,
    },

    /// Show or change persisted settings
    Settings {
        #[command(subcommand)]
        action: Option<SettingsAction>,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum SettingsAction {
    /// Print the current settings
    Show,
    /// Set the download directory
    SetPath { path: PathBuf },
    /// Set the theme (light, dark or auto)
    SetTheme { theme: String },
    /// Reset the download directory to its default
    Reset,
}
