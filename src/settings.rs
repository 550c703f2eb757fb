use crate::error::SettingsError;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tokio::fs;
use tokio::sync::{Mutex, watch};

/// Folder created under the platform movies directory.
pub const DEFAULT_FOLDER: &str = "Zingy";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    Light,
    #[default]
    Dark,
    Auto,
}

impl Theme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Theme::Light => "light",
            Theme::Dark => "dark",
            Theme::Auto => "auto",
        }
    }
}

impl fmt::Display for Theme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Theme {
    type Err = SettingsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "light" => Ok(Theme::Light),
            "dark" => Ok(Theme::Dark),
            "auto" => Ok(Theme::Auto),
            other => Err(SettingsError::InvalidTheme(other.to_string())),
        }
    }
}

/// On-disk form. Absent keys mean "use the default".
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoredSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    download_path: Option<String>,
    #[serde(
        default,
        deserialize_with = "lenient_theme",
        skip_serializing_if = "Option::is_none"
    )]
    theme: Option<Theme>,
}

/// An unrecognised stored theme falls back to the default instead of making
/// the whole file unreadable.
fn lenient_theme<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Theme>, D::Error> {
    let raw = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match raw {
        None => None,
        Some(serde_json::Value::String(name)) => match name.parse() {
            Ok(theme) => Some(theme),
            Err(e) => {
                tracing::warn!(error = %e, "ignoring stored theme");
                None
            }
        },
        Some(other) => {
            tracing::warn!(value = %other, "ignoring stored theme");
            None
        }
    })
}

/// The platform movies directory joined with [`DEFAULT_FOLDER`].
pub fn default_download_path() -> PathBuf {
    dirs::video_dir()
        .or_else(|| dirs::home_dir().map(|home| home.join("Movies")))
        .unwrap_or_else(|| PathBuf::from("."))
        .join(DEFAULT_FOLDER)
}

/// Default location of the settings file.
pub fn default_settings_file() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("zingy")
        .join("settings.json")
}

/// Persisted key-value settings with change notification.
pub struct SettingsStore {
    settings_file: PathBuf,
    default_path: PathBuf,
    stored: Mutex<StoredSettings>,
    download_path_tx: watch::Sender<PathBuf>,
    theme_tx: watch::Sender<Theme>,
}

impl SettingsStore {
    pub async fn open(settings_file: impl Into<PathBuf>) -> Result<Self, SettingsError> {
        Self::open_with_default(settings_file, default_download_path()).await
    }

    pub async fn open_with_default(
        settings_file: impl Into<PathBuf>,
        default_path: impl Into<PathBuf>,
    ) -> Result<Self, SettingsError> {
        let settings_file = settings_file.into();
        let default_path = default_path.into();
        let stored = load_stored(&settings_file).await?;

        let (download_path_tx, _) = watch::channel(resolve_path(&stored, &default_path));
        let (theme_tx, _) = watch::channel(stored.theme.unwrap_or_default());

        Ok(Self {
            settings_file,
            default_path,
            stored: Mutex::new(stored),
            download_path_tx,
            theme_tx,
        })
    }

    pub fn settings_file(&self) -> &Path {
        &self.settings_file
    }

    pub fn default_path(&self) -> &Path {
        &self.default_path
    }

    pub fn download_path(&self) -> PathBuf {
        self.download_path_tx.borrow().clone()
    }

    pub fn theme(&self) -> Theme {
        *self.theme_tx.borrow()
    }

    pub fn watch_download_path(&self) -> watch::Receiver<PathBuf> {
        self.download_path_tx.subscribe()
    }

    pub fn watch_theme(&self) -> watch::Receiver<Theme> {
        self.theme_tx.subscribe()
    }

    pub async fn set_download_path(&self, path: impl AsRef<Path>) -> Result<(), SettingsError> {
        let path = path.as_ref().to_string_lossy().to_string();
        self.update(|stored| stored.download_path = Some(path)).await
    }

    pub async fn set_theme(&self, theme: Theme) -> Result<(), SettingsError> {
        self.update(|stored| stored.theme = Some(theme)).await
    }

    /// Drops the download-path override. The theme is left as it is.
    pub async fn reset_to_defaults(&self) -> Result<(), SettingsError> {
        self.update(|stored| stored.download_path = None).await
    }

    async fn update(&self, edit: impl FnOnce(&mut StoredSettings)) -> Result<(), SettingsError> {
        let mut stored = self.stored.lock().await;
        let mut next = stored.clone();
        edit(&mut next);
        save_stored(&self.settings_file, &next).await?;
        *stored = next;

        let path = resolve_path(&stored, &self.default_path);
        self.download_path_tx.send_if_modified(|current| {
            if *current == path {
                return false;
            }
            *current = path;
            true
        });
        let theme = stored.theme.unwrap_or_default();
        self.theme_tx.send_if_modified(|current| {
            if *current == theme {
                return false;
            }
            *current = theme;
            true
        });
        Ok(())
    }
}

fn resolve_path(stored: &StoredSettings, default_path: &Path) -> PathBuf {
    stored
        .download_path
        .as_deref()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| default_path.to_path_buf())
}

async fn load_stored(path: &Path) -> Result<StoredSettings, SettingsError> {
    if !fs::try_exists(path).await? {
        return Ok(StoredSettings::default());
    }
    let content = fs::read_to_string(path).await?;
    if content.trim().is_empty() {
        return Ok(StoredSettings::default());
    }
    Ok(serde_json::from_str(&content)?)
}

async fn save_stored(path: &Path, stored: &StoredSettings) -> Result<(), SettingsError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).await?;
        }
    }
    let content = serde_json::to_string_pretty(stored)?;
    fs::write(path, format!("{content}\n")).await?;
    Ok(())
}
