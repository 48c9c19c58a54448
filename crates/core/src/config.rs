//! Renderer configuration loaded from TOML.
//!
//! Every field has a default, so a config file only needs to name what it changes:
//!
//! ```toml
//! frames_in_flight = 3
//! clear_color = [0.1, 0.1, 0.1, 1.0]
//!
//! [window]
//! width = 1280
//! height = 720
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Largest supported number of frames in flight.
pub const MAX_FRAMES_IN_FLIGHT: usize = 3;

/// Top-level configuration for the renderer and the demo application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    /// Initial window parameters.
    pub window: WindowConfig,
    /// Force validation layers on or off. `None` enables them in debug builds only.
    pub validation: Option<bool>,
    /// Also forward INFO and VERBOSE validation messages.
    pub validation_verbose: bool,
    /// Number of frames the CPU may record ahead of the GPU (K).
    pub frames_in_flight: usize,
    /// Color the render pass clears to.
    pub clear_color: [f32; 4],
    /// SPIR-V shader locations.
    pub shaders: ShaderConfig,
    /// Descriptor pool sizing.
    pub descriptors: DescriptorConfig,
    /// Seconds between frame statistics reports.
    pub stats_interval_secs: f64,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            window: WindowConfig::default(),
            validation: None,
            validation_verbose: false,
            frames_in_flight: 2,
            clear_color: [0.0, 0.0, 0.0, 1.0],
            shaders: ShaderConfig::default(),
            descriptors: DescriptorConfig::default(),
            stats_interval_secs: 2.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub width: u32,
    pub height: u32,
    pub title: String,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            width: 800,
            height: 600,
            title: "vkloop".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShaderConfig {
    pub vertex: PathBuf,
    pub fragment: PathBuf,
}

impl Default for ShaderConfig {
    fn default() -> Self {
        Self {
            vertex: PathBuf::from("shaders/spirv/triangle.vert.spv"),
            fragment: PathBuf::from("shaders/spirv/triangle.frag.spv"),
        }
    }
}

/// Descriptor types the pool can be sized for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DescriptorKind {
    UniformBuffer,
    StorageBuffer,
    CombinedImageSampler,
    SampledImage,
    StorageImage,
    Sampler,
}

/// One `(type, ratio)` entry; the pool holds `ratio * max_sets` descriptors of `kind`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PoolRatio {
    pub kind: DescriptorKind,
    pub ratio: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DescriptorConfig {
    pub max_sets: u32,
    pub ratios: Vec<PoolRatio>,
}

impl Default for DescriptorConfig {
    fn default() -> Self {
        Self {
            max_sets: 16,
            ratios: vec![
                PoolRatio {
                    kind: DescriptorKind::UniformBuffer,
                    ratio: 1.0,
                },
                PoolRatio {
                    kind: DescriptorKind::CombinedImageSampler,
                    ratio: 1.0,
                },
            ],
        }
    }
}

impl RendererConfig {
    /// Loads and validates a configuration file. Only `.toml` is supported.
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.extension().and_then(|ext| ext.to_str()) != Some("toml") {
            return Err(Error::Config(format!(
                "Unsupported config format: {}",
                path.display()
            )));
        }

        let contents = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&contents)?;
        tracing::info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Parses and validates a configuration from TOML text.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: Self = toml::from_str(contents).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Writes the configuration as pretty-printed TOML.
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let contents =
            toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Checks value ranges that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.frames_in_flight == 0 || self.frames_in_flight > MAX_FRAMES_IN_FLIGHT {
            return Err(Error::Config(format!(
                "frames_in_flight must be between 1 and {}, got {}",
                MAX_FRAMES_IN_FLIGHT, self.frames_in_flight
            )));
        }
        if self.window.width == 0 || self.window.height == 0 {
            return Err(Error::Config(format!(
                "window size must be nonzero, got {}x{}",
                self.window.width, self.window.height
            )));
        }
        if self.descriptors.max_sets == 0 {
            return Err(Error::Config("descriptors.max_sets must be nonzero".into()));
        }
        if let Some(bad) = self
            .descriptors
            .ratios
            .iter()
            .find(|r| !r.ratio.is_finite() || r.ratio <= 0.0)
        {
            return Err(Error::Config(format!(
                "descriptor ratio for {:?} must be positive, got {}",
                bad.kind, bad.ratio
            )));
        }
        if !(self.stats_interval_secs > 0.0) {
            return Err(Error::Config("stats_interval_secs must be positive".into()));
        }
        Ok(())
    }

    /// Whether validation layers should be requested for this build.
    pub fn validation_enabled(&self) -> bool {
        self.validation.unwrap_or(cfg!(debug_assertions))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = RendererConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.frames_in_flight, 2);
        assert_eq!(config.window.width, 800);
        assert_eq!(config.window.height, 600);
    }

    #[test]
    fn test_empty_toml_yields_defaults() {
        let config = RendererConfig::from_toml_str("").unwrap();
        assert_eq!(config, RendererConfig::default());
    }

    #[test]
    fn test_partial_toml_overrides_fields() {
        let config = RendererConfig::from_toml_str(
            r#"
            frames_in_flight = 3
            validation = false
            clear_color = [0.2, 0.3, 0.4, 1.0]

            [window]
            width = 1280

            [descriptors]
            max_sets = 8
            ratios = [{ kind = "storage_buffer", ratio = 2.0 }]
            "#,
        )
        .unwrap();

        assert_eq!(config.frames_in_flight, 3);
        assert_eq!(config.validation, Some(false));
        assert!(!config.validation_enabled());
        assert_eq!(config.clear_color, [0.2, 0.3, 0.4, 1.0]);
        assert_eq!(config.window.width, 1280);
        assert_eq!(config.window.height, 600);
        assert_eq!(config.descriptors.max_sets, 8);
        assert_eq!(
            config.descriptors.ratios,
            vec![PoolRatio {
                kind: DescriptorKind::StorageBuffer,
                ratio: 2.0
            }]
        );
    }

    #[test]
    fn test_rejects_zero_frames_in_flight() {
        let err = RendererConfig::from_toml_str("frames_in_flight = 0").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_rejects_too_many_frames_in_flight() {
        let err = RendererConfig::from_toml_str("frames_in_flight = 4").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_rejects_zero_window() {
        let err = RendererConfig::from_toml_str("[window]\nheight = 0").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_rejects_non_positive_ratio() {
        let err = RendererConfig::from_toml_str(
            "[descriptors]\nratios = [{ kind = \"sampler\", ratio = 0.0 }]",
        )
        .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_rejects_malformed_toml() {
        let err = RendererConfig::from_toml_str("frames_in_flight = ").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_rejects_unsupported_extension() {
        let err = RendererConfig::load_from_file("settings.ron").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let path = std::env::temp_dir().join("vkloop-config-does-not-exist.toml");
        let err = RendererConfig::load_from_file(&path).unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_save_then_load_preserves_values() {
        let path = std::env::temp_dir().join(format!(
            "vkloop-config-{}.toml",
            std::process::id()
        ));
        let mut config = RendererConfig::default();
        config.frames_in_flight = 1;
        config.window.title = "saved".to_string();

        config.save_to_file(&path).unwrap();
        let loaded = RendererConfig::load_from_file(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(loaded, config);
    }
}
