use std::path::PathBuf;

use directories::ProjectDirs;
use serde::Deserialize;

/// Application configuration loaded from TOML config file.
/// All fields have sensible defaults — the config file is optional.
#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct AppConfig {
    /// Custom database path (overrides XDG default).
    pub db_path: Option<PathBuf>,
    /// Number of pipeline workers. 0 = auto-detect (cores / 2, min 1).
    pub workers: usize,
    /// Disable the extended DSP tier even if it probes fine.
    pub disable_dsp: bool,
    /// External ffmpeg transcoder settings (last-resort decode backend).
    pub ffmpeg: FfmpegConfig,
}

/// Settings for the ffmpeg subprocess decode backend.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct FfmpegConfig {
    /// Binary name or path. Also overridable via FFMPEG_BINARY.
    pub binary: String,
    /// Hard timeout for one transcode, in seconds.
    pub timeout_secs: u64,
}

impl Default for FfmpegConfig {
    fn default() -> Self {
        Self {
            binary: "ffmpeg".to_string(),
            timeout_secs: 30,
        }
    }
}

impl FfmpegConfig {
    /// Resolve the binary, honoring the FFMPEG_BINARY env override.
    pub fn resolve_binary(&self) -> String {
        std::env::var("FFMPEG_BINARY").unwrap_or_else(|_| self.binary.clone())
    }
}

impl AppConfig {
    /// Load config from `~/.config/soundalike/config.toml`.
    /// Returns default config if file doesn't exist.
    /// Logs a warning if the file exists but can't be parsed.
    pub fn load() -> Self {
        let config_path = Self::config_path();
        match config_path {
            Some(path) if path.exists() => match std::fs::read_to_string(&path) {
                Ok(contents) => match toml::from_str::<AppConfig>(&contents) {
                    Ok(config) => {
                        log::info!("Loaded config from {}", path.display());
                        config
                    }
                    Err(e) => {
                        log::warn!("Failed to parse {}: {}. Using defaults.", path.display(), e);
                        Self::default()
                    }
                },
                Err(e) => {
                    log::warn!("Failed to read {}: {}. Using defaults.", path.display(), e);
                    Self::default()
                }
            },
            _ => {
                log::debug!("No config file found, using defaults");
                Self::default()
            }
        }
    }

    /// Resolve worker count: 0 → auto-detect (cores / 2, min 1).
    pub fn resolve_workers(&self) -> usize {
        if self.workers > 0 {
            self.workers
        } else {
            let cores = std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(2);
            (cores / 2).max(1)
        }
    }

    /// Get the config file path.
    fn config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", crate::APP_NAME)
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }
}

/// Resolve the default database path using XDG data directory.
pub fn default_db_path() -> PathBuf {
    if let Some(dirs) = ProjectDirs::from("", "", crate::APP_NAME) {
        let data_dir = dirs.data_dir();
        std::fs::create_dir_all(data_dir).ok();
        data_dir.join("soundalike.db")
    } else {
        // Fallback: current directory
        PathBuf::from("soundalike.db")
    }
}
