mod cli;

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use cli::{Args, Command, EngineKind, SettingsAction};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use zingy::engine::{DownloadEngine, HttpEngine, PythonEngine};
use zingy::logs::LogBuffer;
use zingy::media::FileUrlIndexer;
use zingy::notify::{Notifier, SilentNotifier, TerminalNotifier};
use zingy::settings::{self, SettingsStore, Theme};
use zingy::{DownloadError, Downloader, platform};

fn init_tracing(verbose: bool) {
    let default = if verbose { "zingy=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn build_engine(args: &Args) -> Result<Arc<dyn DownloadEngine>> {
    let engine: Arc<dyn DownloadEngine> = match args.engine {
        EngineKind::Python => Arc::new(PythonEngine::new(&args.python, args.module_dir.clone())),
        EngineKind::Http => Arc::new(
            HttpEngine::new(&args.server, args.retries).context("Failed to build HTTP client")?,
        ),
    };
    Ok(engine)
}

async fn run_download(
    args: &Args,
    store: &SettingsStore,
    url: &str,
    output: Option<PathBuf>,
    export_logs: Option<PathBuf>,
) -> Result<()> {
    let output_dir = output.unwrap_or_else(|| store.download_path());
    let notifier: Arc<dyn Notifier> = if args.quiet {
        Arc::new(SilentNotifier)
    } else {
        Arc::new(TerminalNotifier::new())
    };

    let logs = LogBuffer::new();
    logs.info("App initialized");
    let indexer = Arc::new(FileUrlIndexer::new());
    let downloader = Downloader::new(build_engine(args)?, notifier, indexer.clone(), logs);

    let result = downloader.submit(url, &output_dir).await;

    if let Some(path) = export_logs {
        indexer.wait_idle().await;
        downloader
            .logs()
            .export(&path)
            .with_context(|| format!("Failed to write log file {}", path.display()))?;
    }

    let state = downloader.state();
    match result {
        Ok(outcome) => {
            if let Some(message) = state.success_message {
                println!("{message}");
            }
            if let Some(size) = outcome.file_size {
                println!("Size: {size}");
            }
            Ok(())
        }
        Err(e) => {
            if args.verbose {
                eprintln!("{}", downloader.logs().format());
            }
            if let DownloadError::EngineReportedFailure { traceback: Some(tb), .. } = &e {
                tracing::debug!(traceback = %tb, "engine traceback");
            }
            Err(anyhow!(state.error.unwrap_or_else(|| e.to_string())))
        }
    }
}

async fn run_settings(store: &SettingsStore, action: Option<SettingsAction>) -> Result<()> {
    match action.unwrap_or(SettingsAction::Show) {
        SettingsAction::Show => {}
        SettingsAction::SetPath { path } => {
            store.set_download_path(&path).await.context("Failed to save download path")?;
        }
        SettingsAction::SetTheme { theme } => {
            let theme: Theme = theme.parse()?;
            store.set_theme(theme).await.context("Failed to save theme")?;
        }
        SettingsAction::Reset => {
            store.reset_to_defaults().await.context("Failed to reset settings")?;
        }
    }

    println!("settings file: {}", store.settings_file().display());
    println!("download_path: {}", store.download_path().display());
    println!("theme:         {}", store.theme());
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    if let Command::Detect { url } = &args.command {
        println!("{}", platform::detect(url).unwrap_or("unknown"));
        return Ok(());
    }

    let config = args.config.clone().unwrap_or_else(settings::default_settings_file);
    let store = SettingsStore::open(&config)
        .await
        .with_context(|| format!("Failed to load settings from {}", config.display()))?;

    match &args.command {
        Command::Download { url, output, export_logs } => {
            run_download(&args, &store, url, output.clone(), export_logs.clone()).await
        }
        Command::Settings { action } => run_settings(&store, action.clone()).await,
        Command::Detect { .. } => Ok(()),
    }
}
