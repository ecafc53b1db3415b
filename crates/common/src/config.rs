//! Application configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Global configuration for the recording core.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Live recording defaults.
    pub recording: RecordingDefaults,

    /// Segment export defaults.
    pub export: ExportDefaults,

    /// Logging configuration.
    pub logging: LoggingConfig,
}

/// What to do when the screen feed ends mid-recording (for example the
/// user clicked "stop sharing" in the OS picker).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScreenLossPolicy {
    /// Keep recording; the compositor samples the last frame it saw.
    #[default]
    KeepSampling,
    /// Stop the session on the next tick.
    AutoStop,
}

/// Default live-recording parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingDefaults {
    /// Target frame rate.
    pub fps: u32,

    /// Compositing surface width in pixels.
    pub width: u32,

    /// Compositing surface height in pixels.
    pub height: u32,

    /// Camera bubble diameter for the overlay layout, in pixels.
    pub overlay_diameter: u32,

    /// Initial overlay center, percent of width.
    pub overlay_x_percent: f64,

    /// Initial overlay center, percent of height.
    pub overlay_y_percent: f64,

    /// Media time covered by each encoded chunk.
    pub chunk_interval_ms: u32,

    /// Mixed audio track sample rate.
    pub audio_sample_rate: u32,

    /// Reaction to losing the screen feed mid-session.
    pub screen_loss_policy: ScreenLossPolicy,
}

/// Default export parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportDefaults {
    /// Frame rate used to resample segments.
    pub fps: u32,

    /// Upper bound on waiting for a single seek to complete.
    pub seek_timeout_ms: u64,

    /// Silence appended after the last frame before finalizing.
    pub trailing_buffer_ms: u64,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "duocast=debug,warn").
    pub level: String,

    /// Whether to output structured JSON logs.
    pub json: bool,

    /// Whether to emit ANSI colors.
    pub ansi: bool,
}

impl Default for RecordingDefaults {
    fn default() -> Self {
        Self {
            fps: 30,
            width: 1280,
            height: 720,
            overlay_diameter: 240,
            overlay_x_percent: 85.0,
            overlay_y_percent: 80.0,
            chunk_interval_ms: 1000,
            audio_sample_rate: 48000,
            screen_loss_policy: ScreenLossPolicy::KeepSampling,
        }
    }
}

impl Default for ExportDefaults {
    fn default() -> Self {
        Self {
            fps: 30,
            seek_timeout_ms: 5000,
            trailing_buffer_ms: 500,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            ansi: true,
        }
    }
}

impl AppConfig {
    /// Load config from the standard location, falling back to defaults.
    pub fn load() -> Self {
        Self::load_from(&config_file_path())
    }

    /// Load config from an explicit path, falling back to defaults.
    pub fn load_from(path: &std::path::Path) -> Self {
        if !path.exists() {
            return Self::default();
        }
        match std::fs::read_to_string(path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(config) => config,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Failed to parse config");
                    Self::default()
                }
            },
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Failed to read config");
                Self::default()
            }
        }
    }

    /// Save config to the standard location.
    pub fn save(&self) -> Result<(), std::io::Error> {
        self.save_to(&config_file_path())
    }

    /// Save config to an explicit path.
    pub fn save_to(&self, path: &std::path::Path) -> Result<(), std::io::Error> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(path, json)
    }
}

/// Standard config file location.
pub fn config_file_path() -> PathBuf {
    let base = std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".config")
        });
    base.join("duocast").join("config.json")
}
