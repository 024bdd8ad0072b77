use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub vsync: bool,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "Prism".to_string(),
            width: 800,
            height: 600,
            vsync: true,
        }
    }
}

impl WindowConfig {
    pub fn aspect_ratio(&self) -> f32 {
        self.width as f32 / self.height.max(1) as f32
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub window: WindowConfig,
    /// Shader and model paths are resolved relative to this directory.
    pub resources_root: PathBuf,
    pub log_filter: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            window: WindowConfig::default(),
            resources_root: PathBuf::from("resources"),
            log_filter: "info".to_string(),
        }
    }
}

impl AppConfig {
    pub const FILE_NAME: &'static str = "prism.json";
    pub const RESOURCES_ENV: &'static str = "PRISM_RESOURCES";

    /// `prism.json` from the working directory (defaults when absent), then
    /// the `PRISM_RESOURCES` override.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::load_from(Path::new(Self::FILE_NAME))?;
        if let Some(root) = std::env::var_os(Self::RESOURCES_ENV) {
            config.resources_root = PathBuf::from(root);
        }
        Ok(config)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Json {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn with_window(mut self, title: &str, width: u32, height: u32) -> Self {
        self.window.title = title.to_string();
        self.window.width = width;
        self.window.height = height;
        self
    }

    /// Resource-relative paths may carry a leading slash ("/screenSpace/x.frag").
    pub fn resource_path(&self, relative: &str) -> PathBuf {
        self.resources_root.join(relative.trim_start_matches(['/', '\\']))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config: AppConfig =
            serde_json::from_str(r#"{ "window": { "width": 1024 } }"#).unwrap();
        assert_eq!(config.window.width, 1024);
        assert_eq!(config.window.height, 600);
        assert_eq!(config.resources_root, PathBuf::from("resources"));
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let config = AppConfig::load_from(Path::new("definitely/not/here.json")).unwrap();
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn test_resource_path_strips_leading_slash() {
        let config = AppConfig::default();
        assert_eq!(
            config.resource_path("/shaders/screen_space/fullscreen.vert"),
            PathBuf::from("resources/shaders/screen_space/fullscreen.vert")
        );
    }
}
