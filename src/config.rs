// =============================================================================
// CONFIGURATION - Load settings from config.toml
// =============================================================================
//
// Every field has a default, so a partial (or missing) config.toml is fine.

use anyhow::{Context, Result};
use ash::vk;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Root configuration structure
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub window: WindowConfig,
    pub graphics: GraphicsConfig,
    pub debug: DebugConfig,
    pub paths: PathsConfig,
}

/// Window settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    /// Window title, also reported to Vulkan as the application name
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub resizable: bool,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "Hello Triangle".to_string(),
            width: 800,
            height: 600,
            resizable: false,
        }
    }
}

/// Graphics settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct GraphicsConfig {
    pub present_mode: String,
    pub clear_color: [f32; 4],
    pub max_frames_in_flight: usize,
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            present_mode: "mailbox".to_string(),
            clear_color: [0.0, 0.0, 0.0, 1.0],
            max_frames_in_flight: 2,
        }
    }
}

/// Debug settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    pub validation_layers: bool,
    pub list_extensions: bool,
    pub log_to_file: bool,
    pub log_file: String,
    pub show_fps: bool,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            validation_layers: true,
            list_extensions: true,
            log_to_file: false,
            log_file: "vulkan_debug.log".to_string(),
            show_fps: true,
        }
    }
}

/// Filesystem locations
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Directory holding the compiled `*.spv` shaders
    pub shader_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            shader_dir: PathBuf::from("shaders"),
        }
    }
}

impl Config {
    /// Load configuration from a specific path.
    ///
    /// A missing file yields defaults; the logger is not up yet, so nothing is logged here.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        Self::parse(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }

    /// Parse configuration from TOML text
    pub fn parse(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Preferred present mode as Vulkan enum (FIFO when unrecognized)
    pub fn present_mode(&self) -> vk::PresentModeKHR {
        parse_present_mode(&self.graphics.present_mode).unwrap_or(vk::PresentModeKHR::FIFO)
    }

    /// Number of frames that may be in flight at once (never zero)
    pub fn frames_in_flight(&self) -> usize {
        self.graphics.max_frames_in_flight.max(1)
    }

    /// Settings that were replaced by a fallback, for logging once at startup
    pub fn warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if parse_present_mode(&self.graphics.present_mode).is_none() {
            warnings.push(format!(
                "Unknown present mode '{}', defaulting to FIFO",
                self.graphics.present_mode
            ));
        }
        if self.graphics.max_frames_in_flight == 0 {
            warnings.push("max_frames_in_flight = 0 is invalid, using 1".to_string());
        }

        warnings
    }

    /// Validation layers are only enabled in debug builds
    pub fn validation_enabled(&self) -> bool {
        cfg!(debug_assertions) && self.debug.validation_layers
    }
}

fn parse_present_mode(name: &str) -> Option<vk::PresentModeKHR> {
    match name.to_lowercase().as_str() {
        "immediate" => Some(vk::PresentModeKHR::IMMEDIATE),
        "mailbox" => Some(vk::PresentModeKHR::MAILBOX),
        "fifo" => Some(vk::PresentModeKHR::FIFO),
        "fifo_relaxed" => Some(vk::PresentModeKHR::FIFO_RELAXED),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_window_settings() {
        let config = Config::default();
        assert_eq!(config.window.width, 800);
        assert_eq!(config.window.height, 600);
        assert!(!config.window.resizable);
        assert_eq!(config.graphics.max_frames_in_flight, 2);
        assert_eq!(config.graphics.clear_color, [0.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_partial_config_keeps_defaults() {
        let config = Config::parse(
            r#"
            [window]
            title = "Triangle"

            [graphics]
            max_frames_in_flight = 3
            "#,
        )
        .unwrap();

        assert_eq!(config.window.title, "Triangle");
        assert_eq!(config.window.width, 800);
        assert_eq!(config.graphics.max_frames_in_flight, 3);
        assert_eq!(config.graphics.present_mode, "mailbox");
        assert_eq!(config.paths.shader_dir, PathBuf::from("shaders"));
    }

    #[test]
    fn test_empty_config_is_default() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.window.title, "Hello Triangle");
        assert!(config.debug.show_fps);
    }

    #[test]
    fn test_invalid_config_is_error() {
        assert!(Config::parse("[window]\nwidth = \"wide\"").is_err());
    }

    #[test]
    fn test_present_mode_parsing() {
        let mut config = Config::default();
        assert_eq!(config.present_mode(), vk::PresentModeKHR::MAILBOX);

        config.graphics.present_mode = "FIFO_Relaxed".to_string();
        assert_eq!(config.present_mode(), vk::PresentModeKHR::FIFO_RELAXED);

        config.graphics.present_mode = "vsync-please".to_string();
        assert_eq!(config.present_mode(), vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn test_zero_frames_in_flight_is_clamped() {
        let mut config = Config::default();
        config.graphics.max_frames_in_flight = 0;
        assert_eq!(config.frames_in_flight(), 1);
    }

    #[test]
    fn test_fallbacks_reported_once() {
        assert!(Config::default().warnings().is_empty());

        let mut config = Config::default();
        config.graphics.max_frames_in_flight = 0;
        config.graphics.present_mode = "vsync-please".to_string();
        let warnings = config.warnings();

        assert_eq!(warnings.len(), 2);
        assert!(warnings[0].contains("vsync-please"));
        assert!(warnings[1].contains("max_frames_in_flight"));
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let config = Config::load_from_path("definitely/not/here/config.toml").unwrap();
        assert_eq!(config.window.height, 600);
    }
}
