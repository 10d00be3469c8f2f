use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::transform::PageSize;

pub const DEFAULT_RESOLUTION: f32 = 160.0;
pub const DEFAULT_BACKGROUND: u32 = 0xFFFF_FFFF;
pub const DEFAULT_PENDING: u32 = 0xFFD0_D0D0;
pub const DEFAULT_FALLBACK_SIZE: PageSize = PageSize::new(100.0, 100.0);

/// Session settings, read from TOML. Colors are packed `0xAARRGGBB`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    pub resolution: f32,
    pub background_color: u32,
    pub pending_color: u32,
    pub fallback_size: PageSize,
    pub anti_alias: bool,
    pub password: Option<String>,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            resolution: DEFAULT_RESOLUTION,
            background_color: DEFAULT_BACKGROUND,
            pending_color: DEFAULT_PENDING,
            fallback_size: DEFAULT_FALLBACK_SIZE,
            anti_alias: true,
            password: None,
        }
    }
}

impl RenderConfig {
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: RenderConfig = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let source = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&source)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.resolution.is_finite() && self.resolution > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "resolution must be positive, got {}",
                self.resolution
            )));
        }
        let PageSize { width, height } = self.fallback_size;
        if !(width >= 1.0 && height >= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "fallback_size must be at least 1x1, got {width}x{height}"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_source_yields_defaults() {
        let config = RenderConfig::from_toml_str("").unwrap();
        assert_eq!(config, RenderConfig::default());
        assert_eq!(config.resolution, 160.0);
        assert_eq!(config.pending_color, 0xFFD0D0D0);
        assert_eq!(config.fallback_size, PageSize::new(100.0, 100.0));
        assert!(config.anti_alias);
    }

    #[test]
    fn partial_override_keeps_other_defaults() {
        let config = RenderConfig::from_toml_str(
            r#"
            resolution = 96.0
            password = "hunter2"
            anti_alias = false

            [fallback_size]
            width = 200.0
            height = 300.0
            "#,
        )
        .unwrap();
        assert_eq!(config.resolution, 96.0);
        assert_eq!(config.password.as_deref(), Some("hunter2"));
        assert_eq!(config.fallback_size, PageSize::new(200.0, 300.0));
        assert!(!config.anti_alias);
        assert_eq!(config.background_color, DEFAULT_BACKGROUND);
    }

    #[test]
    fn rejects_invalid_values() {
        assert!(matches!(
            RenderConfig::from_toml_str("resolution = 0.0"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            RenderConfig::from_toml_str("[fallback_size]\nwidth = 0.0\nheight = 10.0"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            RenderConfig::from_toml_str("resolution = \"high\""),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn load_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = RenderConfig::load(&dir.path().join("missing.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
