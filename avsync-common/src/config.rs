//! Bootstrap configuration loading and config file resolution
//!
//! Configuration is a single TOML file with four optional tables:
//! `[renderer]`, `[sink]`, `[session]` and `[logging]`. Every field has a
//! built-in default, so a missing file or a partial file is valid.
//!
//! Config file resolution priority:
//! 1. Command-line argument (highest priority)
//! 2. `AVSYNC_CONFIG` environment variable
//! 3. Platform config directory (`<config_dir>/avsync/<module>.toml`)
//! 4. Built-in defaults (no file)

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "AVSYNC_CONFIG";

/// Renderer tuning, passed to the renderer at construction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    /// Maximum lateness (us) before a video frame is dropped instead of rendered
    pub sync_window_us: i64,

    /// Minimum wall-clock spacing (us) between position notifications
    pub min_position_update_interval_us: i64,

    /// While re-syncing queues after a discontinuity, audio leading the first
    /// video frame by more than this (us) is dropped
    pub sync_queues_max_lead_us: i64,

    /// Video frames required before the start anchor is chosen when both
    /// streams are present
    pub start_gate_min_video_frames: usize,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            sync_window_us: 40_000,
            min_position_update_interval_us: 100_000,
            sync_queues_max_lead_us: 100_000,
            start_gate_min_video_frames: 2,
        }
    }
}

impl RendererConfig {
    /// Reject values the renderer cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.sync_window_us <= 0 {
            return Err(Error::Config(format!(
                "sync_window_us must be positive, got {}",
                self.sync_window_us
            )));
        }
        if self.min_position_update_interval_us < 0 {
            return Err(Error::Config(format!(
                "min_position_update_interval_us must not be negative, got {}",
                self.min_position_update_interval_us
            )));
        }
        if self.sync_queues_max_lead_us < 0 {
            return Err(Error::Config(format!(
                "sync_queues_max_lead_us must not be negative, got {}",
                self.sync_queues_max_lead_us
            )));
        }
        if self.start_gate_min_video_frames == 0 {
            return Err(Error::Config(
                "start_gate_min_video_frames must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Audio sink parameters (16-bit interleaved PCM)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkConfig {
    pub sample_rate: u32,
    pub channels: u16,
    /// Sink buffer capacity in frames
    pub buffer_frames: u32,
    /// Reported device latency in milliseconds
    pub latency_ms: u32,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            channels: 2,
            buffer_frames: 4_096,
            latency_ms: 40,
        }
    }
}

/// Synthetic session parameters used by the session binary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub duration_secs: u64,
    pub video_fps: u32,
    /// Duration of each synthetic audio buffer
    pub audio_chunk_ms: u32,
    pub live: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            duration_secs: 10,
            video_fps: 30,
            audio_chunk_ms: 20,
            live: false,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level filter (trace, debug, info, warn, error or a full EnvFilter directive)
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "avsync_renderer=info".to_string(),
        }
    }
}

/// Bootstrap configuration loaded from TOML file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    pub renderer: RendererConfig,
    pub sink: SinkConfig,
    pub session: SessionConfig,
    pub logging: LoggingConfig,
}

impl TomlConfig {
    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: TomlConfig = toml::from_str(content)?;
        config.renderer.validate()?;
        if config.sink.channels == 0 || config.sink.sample_rate == 0 {
            return Err(Error::Config(
                "sink sample_rate and channels must be non-zero".to_string(),
            ));
        }
        Ok(config)
    }

    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Load configuration if a path is given and exists, else use defaults
    ///
    /// A missing file is not fatal: a warning is logged and defaults apply.
    /// A file that exists but fails to parse is an error.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) if path.exists() => {
                info!("Loading configuration from {}", path.display());
                Self::load(path)
            }
            Some(path) => {
                warn!(
                    "Config file {} not found, using built-in defaults",
                    path.display()
                );
                Ok(Self::default())
            }
            None => {
                info!("No config file, using built-in defaults");
                Ok(Self::default())
            }
        }
    }
}

/// Resolves which config file (if any) a module should load
pub struct ConfigResolver {
    module_name: String,
}

impl ConfigResolver {
    pub fn new(module_name: &str) -> Self {
        Self {
            module_name: module_name.to_string(),
        }
    }

    /// Resolve the config file path following the documented priority order
    ///
    /// The CLI and env var paths are returned even when the file does not
    /// exist, so the caller can warn about them. The platform default is only
    /// returned when present.
    pub fn resolve(&self, cli_arg: Option<&Path>) -> Option<PathBuf> {
        if let Some(path) = cli_arg {
            return Some(path.to_path_buf());
        }

        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            if !path.is_empty() {
                return Some(PathBuf::from(path));
            }
        }

        self.platform_config_path().filter(|p| p.exists())
    }

    /// `<config_dir>/avsync/<module>.toml` for the current platform
    pub fn platform_config_path(&self) -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("avsync").join(format!("{}.toml", self.module_name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_renderer_defaults() {
        let config = RendererConfig::default();
        assert_eq!(config.sync_window_us, 40_000);
        assert_eq!(config.min_position_update_interval_us, 100_000);
        assert_eq!(config.sync_queues_max_lead_us, 100_000);
        assert_eq!(config.start_gate_min_video_frames, 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_window() {
        let config = RendererConfig {
            sync_window_us: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = TomlConfig::from_toml_str(
            r#"
            [renderer]
            sync_window_us = 60000

            [logging]
            level = "debug"
            "#,
        )
        .unwrap();

        assert_eq!(config.renderer.sync_window_us, 60_000);
        assert_eq!(config.renderer.min_position_update_interval_us, 100_000);
        assert_eq!(config.sink, SinkConfig::default());
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_invalid_toml_is_error() {
        let result = TomlConfig::from_toml_str("[renderer\nsync_window_us = 1");
        assert!(matches!(result, Err(Error::Toml(_))));
    }

    #[test]
    fn test_invalid_sink_rejected() {
        let result = TomlConfig::from_toml_str("[sink]\nchannels = 0");
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_platform_path_includes_module_name() {
        let resolver = ConfigResolver::new("avsync-renderer");
        if let Some(path) = resolver.platform_config_path() {
            assert!(path.ends_with("avsync/avsync-renderer.toml"));
        }
    }
}
