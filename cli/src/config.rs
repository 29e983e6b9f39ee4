//! Persisted CLI preferences.

use std::{env, fs, path::PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

/// Preferences stored as TOML in the user's config directory.
///
/// Storage location:
/// - Linux: $XDG_CONFIG_HOME/zap/config.toml or $HOME/.config/zap/config.toml
/// - macOS: $HOME/Library/Application Support/zap/config.toml
/// - Windows: %APPDATA%\zap\config.toml
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub(crate) struct AppConfig {
    default_output_dir: Option<String>,
}

impl AppConfig {
    fn config_dir() -> Result<PathBuf> {
        #[cfg(target_os = "windows")]
        {
            if let Ok(appdata) = env::var("APPDATA") {
                return Ok(PathBuf::from(appdata).join("zap"));
            }
            if let Ok(userprofile) = env::var("USERPROFILE") {
                return Ok(PathBuf::from(userprofile)
                    .join(".config")
                    .join("zap"));
            }
            return Err(anyhow!(
                "Unable to determine config directory \
                 (missing APPDATA/USERPROFILE)"
            ));
        }

        #[cfg(target_os = "macos")]
        {
            if let Ok(home) = env::var("HOME") {
                return Ok(PathBuf::from(home)
                    .join("Library")
                    .join("Application Support")
                    .join("zap"));
            }
            return Err(anyhow!(
                "Unable to determine config directory (missing HOME)"
            ));
        }

        #[cfg(not(any(target_os = "windows", target_os = "macos")))]
        {
            let config_dir = if let Ok(xdg_config_home) =
                env::var("XDG_CONFIG_HOME")
            {
                PathBuf::from(xdg_config_home)
            } else if let Ok(home) = env::var("HOME") {
                PathBuf::from(home).join(".config")
            } else {
                return Err(anyhow!(
                    "Unable to determine config directory \
                     (missing XDG_CONFIG_HOME/HOME)"
                ));
            };
            Ok(config_dir.join("zap"))
        }
    }

    fn config_file() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Reads the config file, or the defaults when there is none yet.
    pub(crate) fn load() -> Result<Self> {
        let config_file = Self::config_file()?;
        if !config_file.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&config_file).with_context(|| {
            format!("Failed to read config file: {}", config_file.display())
        })?;
        toml::from_str(&content).with_context(|| "Failed to parse config file")
    }

    pub(crate) fn save(&self) -> Result<()> {
        let config_dir = Self::config_dir()?;
        let config_file = Self::config_file()?;

        if !config_dir.exists() {
            fs::create_dir_all(&config_dir).with_context(|| {
                format!(
                    "Failed to create config directory: {}",
                    config_dir.display()
                )
            })?;
        }

        let content = toml::to_string_pretty(self)
            .with_context(|| "Failed to serialize config")?;
        fs::write(&config_file, content).with_context(|| {
            format!("Failed to write config file: {}", config_file.display())
        })
    }

    pub(crate) fn default_output_dir(&self) -> Option<&String> {
        self.default_output_dir.as_ref()
    }
}

/// Returns the saved default output directory, if any.
pub fn get_default_output_dir() -> Result<Option<String>> {
    Ok(AppConfig::load()?.default_output_dir().cloned())
}

pub fn set_default_output_dir(dir: String) -> Result<()> {
    let mut config = AppConfig::load()?;
    config.default_output_dir = Some(dir);
    config.save()
}

pub fn clear_default_output_dir() -> Result<()> {
    let mut config = AppConfig::load()?;
    config.default_output_dir = None;
    config.save()
}

/// Where received files go when nothing is configured:
/// `$HOME/Downloads/Zap` (`%USERPROFILE%` on Windows), else the current
/// directory.
pub fn suggested_default_output_dir() -> PathBuf {
    #[cfg(target_os = "windows")]
    let home = env::var("USERPROFILE");
    #[cfg(not(target_os = "windows"))]
    let home = env::var("HOME");

    match home {
        Ok(home) => PathBuf::from(home).join("Downloads").join("Zap"),
        Err(_) => env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
    }
}

/// Picks the output directory: `explicit`, then the saved default, then
/// [`suggested_default_output_dir`]. With `save`, an explicit directory
/// becomes the new default.
pub fn resolve_output_dir(
    explicit: Option<PathBuf>,
    save: bool,
) -> Result<PathBuf> {
    match explicit {
        Some(dir) => {
            if save {
                let display = dir.display().to_string();
                set_default_output_dir(display.clone()).with_context(|| {
                    "Failed to save default output directory"
                })?;
                println!("Saved '{display}' as default output directory");
            }
            Ok(dir)
        }
        None => Ok(match get_default_output_dir()? {
            Some(dir) => PathBuf::from(dir),
            None => suggested_default_output_dir(),
        }),
    }
}
