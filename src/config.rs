//! Pipeline feature configuration.
//!
//! A [`PipelineConfig`] is an immutable description of which passes the
//! renderer should build. It is handed to the assembler as a value; changing
//! any field means rebuilding the graph (see [`Renderer::set_config`]).
//!
//! Configurations can be written in code with builder setters:
//!
//! ```ignore
//! let config = PipelineConfig::new()
//!     .shadow(true)
//!     .bloom(false)
//!     .antialias(true);
//! ```
//!
//! or loaded from JSON, where every omitted field keeps its default:
//!
//! ```ignore
//! let config = PipelineConfig::from_json(r#"{ "shadow": { "enabled": true } }"#)?;
//! ```
//!
//! [`Renderer::set_config`]: crate::Renderer::set_config

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Shadow map settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShadowQuality {
    pub enabled: bool,
    /// Square shadow map size in pixels.
    pub resolution: u32,
    /// Only re-render shadows when the scene asks for it.
    pub enable_cache: bool,
    pub intensity: f32,
}

impl Default for ShadowQuality {
    fn default() -> Self {
        Self {
            enabled: false,
            resolution: 1024,
            enable_cache: false,
            intensity: 0.2,
        }
    }
}

/// Bloom settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BloomSettings {
    pub enabled: bool,
    /// Size of the bright-pass image relative to the surface.
    pub resolution_ratio: f32,
    pub gamma: f32,
}

impl Default for BloomSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            resolution_ratio: 0.1,
            gamma: 2.0,
        }
    }
}

/// Screen-space ambient occlusion settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SsaoSettings {
    pub enabled: bool,
    pub resolution_ratio: f32,
    /// Strength of the darken composite over the scene image.
    pub intensity: f32,
}

impl Default for SsaoSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            resolution_ratio: 0.5,
            intensity: 0.2,
        }
    }
}

/// Settings of the main scene image and the final composite.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderingImage {
    pub resolution_ratio: f32,
    pub gamma: f32,
    pub alpha: f32,
}

impl Default for RenderingImage {
    fn default() -> Self {
        Self {
            resolution_ratio: 1.0,
            gamma: 1.0,
            alpha: 1.0,
        }
    }
}

/// Debug grid showing every intermediate image instead of the final frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreviewSettings {
    pub enabled: bool,
    pub antialias: bool,
}

impl Default for PreviewSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            antialias: true,
        }
    }
}

/// Full pipeline configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Master switch for post-processing (bloom).
    pub postprocess: bool,
    pub antialias: bool,
    pub shadow: ShadowQuality,
    pub bloom: BloomSettings,
    pub ssao: SsaoSettings,
    pub rendering: RenderingImage,
    pub preview: PreviewSettings,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            postprocess: true,
            antialias: false,
            shadow: ShadowQuality::default(),
            bloom: BloomSettings::default(),
            ssao: SsaoSettings::default(),
            rendering: RenderingImage::default(),
            preview: PreviewSettings::default(),
        }
    }
}

impl PipelineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a JSON document. Missing fields take their default value.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn postprocess(mut self, enabled: bool) -> Self {
        self.postprocess = enabled;
        self
    }

    pub fn antialias(mut self, enabled: bool) -> Self {
        self.antialias = enabled;
        self
    }

    pub fn shadow(mut self, enabled: bool) -> Self {
        self.shadow.enabled = enabled;
        self
    }

    pub fn shadow_resolution(mut self, resolution: u32) -> Self {
        self.shadow.resolution = resolution;
        self
    }

    pub fn shadow_cache(mut self, enabled: bool) -> Self {
        self.shadow.enable_cache = enabled;
        self
    }

    pub fn bloom(mut self, enabled: bool) -> Self {
        self.bloom.enabled = enabled;
        self
    }

    pub fn ssao(mut self, enabled: bool) -> Self {
        self.ssao.enabled = enabled;
        self
    }

    pub fn preview(mut self, enabled: bool) -> Self {
        self.preview.enabled = enabled;
        self
    }

    pub fn gamma(mut self, gamma: f32) -> Self {
        self.rendering.gamma = gamma;
        self
    }

    pub fn alpha(mut self, alpha: f32) -> Self {
        self.rendering.alpha = alpha;
        self
    }

    pub fn resolution_ratio(mut self, ratio: f32) -> Self {
        self.rendering.resolution_ratio = ratio;
        self
    }

    /// Bloom runs only when post-processing is on as well.
    pub fn bloom_active(&self) -> bool {
        self.postprocess && self.bloom.enabled
    }

    /// Whether any offscreen pass is needed. When false the assembler takes
    /// the direct scene-to-screen path.
    pub fn needs_offscreen(&self) -> bool {
        self.shadow.enabled || self.bloom_active() || self.ssao.enabled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_enable_bloom_only() {
        let config = PipelineConfig::default();
        assert!(config.bloom_active());
        assert!(!config.shadow.enabled);
        assert!(!config.ssao.enabled);
        assert_eq!(config.shadow.resolution, 1024);
        assert_eq!(config.bloom.resolution_ratio, 0.1);
    }

    #[test]
    fn bloom_requires_postprocess() {
        let config = PipelineConfig::new().postprocess(false);
        assert!(!config.bloom_active());
        assert!(!config.needs_offscreen());
        assert!(config.shadow(true).needs_offscreen());
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config =
            PipelineConfig::from_json(r#"{ "shadow": { "enabled": true, "enable_cache": true } }"#)
                .unwrap();
        assert!(config.shadow.enabled);
        assert!(config.shadow.enable_cache);
        assert_eq!(config.shadow.resolution, 1024);
        assert_eq!(config.rendering, RenderingImage::default());
    }

    #[test]
    fn malformed_json_is_config_error() {
        let err = PipelineConfig::from_json("{ shadow: ").unwrap_err();
        assert!(matches!(err, crate::PipelineError::Config(_)));
    }
}
