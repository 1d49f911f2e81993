//! Shading vocabulary shared by pipeline nodes and render backends.
//!
//! Nodes never talk to shaders directly. They activate a [`ShaderKind`] on the
//! backend, push [`ShaderParam`] values and issue a draw. Each backend decides
//! how those map onto real GPU state.

use serde::{Deserialize, Serialize};

/// Opaque handle to a texture owned by a render backend.
///
/// Handles are cheap to copy and compare. A handle stays valid until the
/// render target (or registered texture) that produced it is destroyed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureHandle(pub(crate) u64);

impl TextureHandle {
    /// Raw numeric id, mostly useful for logging.
    pub fn id(self) -> u64 {
        self.0
    }
}

/// RGBA color with components in `0.0..=1.0`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Color {
    pub const fn rgba(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    pub const fn rgb(r: f32, g: f32, b: f32) -> Self {
        Self { r, g, b, a: 1.0 }
    }

    pub const WHITE: Color = Color::rgba(1.0, 1.0, 1.0, 1.0);
    pub const BLACK: Color = Color::rgba(0.0, 0.0, 0.0, 1.0);
    pub const TRANSPARENT: Color = Color::rgba(0.0, 0.0, 0.0, 0.0);
}

impl Default for Color {
    fn default() -> Self {
        Color::BLACK
    }
}

impl From<Color> for wgpu::Color {
    fn from(c: Color) -> Self {
        wgpu::Color {
            r: c.r as f64,
            g: c.g as f64,
            b: c.b as f64,
            a: c.a as f64,
        }
    }
}

/// Shader programs a node can activate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ShaderKind {
    /// Lit scene shading, optionally sampling a shadow map.
    Standard,
    /// Light-space depth for shadow casters.
    ShadowMap,
    /// Per-pixel geometry attributes (see [`AttributeChannel`]).
    Attribute,
    /// Screen-space ambient occlusion from depth and normal maps.
    Ssao,
    /// Full-surface image filter with optional second-texture combine.
    Image,
    /// Like [`ShaderKind::Image`] but targeting the visible surface.
    Screen,
}

/// Single-texture filter applied by the image shader.
///
/// The numeric codes are what the shader switches on.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum FilterKind {
    #[default]
    None,
    LinearInterp,
    GaussBlurHorizontal,
    GaussBlurVertical,
    LightPass,
    Blur3,
    Blur5,
    AntialiasSimple,
    AntialiasCross,
    Ssao,
}

impl FilterKind {
    pub const fn code(self) -> u32 {
        match self {
            FilterKind::None => 0,
            FilterKind::LinearInterp => 1,
            FilterKind::GaussBlurHorizontal => 2,
            FilterKind::GaussBlurVertical => 3,
            FilterKind::LightPass => 4,
            FilterKind::Blur3 => 5,
            FilterKind::Blur5 => 6,
            FilterKind::AntialiasSimple => 7,
            FilterKind::AntialiasCross => 8,
            FilterKind::Ssao => 20,
        }
    }
}

/// How the second texture is merged into the filtered first texture.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum CombineKind {
    #[default]
    None,
    Add,
    Subtract,
    Lighten,
    Darken,
}

impl CombineKind {
    pub const fn code(self) -> u32 {
        match self {
            CombineKind::None => 0,
            CombineKind::Add => 1,
            CombineKind::Subtract => 2,
            CombineKind::Lighten => 3,
            CombineKind::Darken => 4,
        }
    }
}

/// Geometry attribute written by the attribute shader.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AttributeChannel {
    Depth,
    Normal,
}

impl AttributeChannel {
    pub const fn code(self) -> u32 {
        match self {
            AttributeChannel::Depth => 0,
            AttributeChannel::Normal => 1,
        }
    }
}

/// A parameter pushed to the currently active shader.
///
/// `None` texture values unbind the slot.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ShaderParam {
    Texture(Option<TextureHandle>),
    SecondTexture(Option<TextureHandle>),
    ShadowMap(Option<TextureHandle>),
    DepthMap(Option<TextureHandle>),
    NormalMap(Option<TextureHandle>),
    Filter(FilterKind),
    Combine(CombineKind),
    SecondIntensity(f32),
    /// Pixel size of the pass, used for texel offsets.
    Resolution([f32; 2]),
    Gamma(f32),
    Antialias(bool),
    Alpha(f32),
    AttributeChannel(AttributeChannel),
    SsaoRadius(f32),
    SsaoBias(f32),
    /// Darkening applied where the shadow map occludes.
    ShadowIntensity(f32),
    FlipY(bool),
}

/// Rectangle in normalized device coordinates (`-1.0..=1.0` on both axes,
/// origin bottom-left).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ScreenQuad {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl ScreenQuad {
    pub const fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// The quad covering the whole viewport.
    pub const FULL: ScreenQuad = ScreenQuad::new(-1.0, -1.0, 2.0, 2.0);

    /// Converts the quad to a pixel rectangle `(x, y, w, h)` with a top-left
    /// origin, as expected by viewport APIs.
    pub fn to_pixels(self, surface_width: u32, surface_height: u32) -> (f32, f32, f32, f32) {
        let sw = surface_width as f32;
        let sh = surface_height as f32;
        let w = self.width * 0.5 * sw;
        let h = self.height * 0.5 * sh;
        let x = (self.x + 1.0) * 0.5 * sw;
        let bottom = (self.y + 1.0) * 0.5 * sh;
        (x, sh - bottom - h, w, h)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_codes_match_shader_switch() {
        assert_eq!(FilterKind::None.code(), 0);
        assert_eq!(FilterKind::GaussBlurVertical.code(), 3);
        assert_eq!(FilterKind::Blur3.code(), 5);
        assert_eq!(FilterKind::AntialiasCross.code(), 8);
        assert_eq!(FilterKind::Ssao.code(), 20);
        assert_eq!(CombineKind::Lighten.code(), 3);
        assert_eq!(CombineKind::Darken.code(), 4);
    }

    #[test]
    fn full_quad_covers_surface() {
        assert_eq!(ScreenQuad::FULL.to_pixels(800, 600), (0.0, 0.0, 800.0, 600.0));
    }

    #[test]
    fn bottom_left_cell_maps_to_lower_half() {
        let cell = ScreenQuad::new(-1.0, -1.0, 1.0, 1.0);
        assert_eq!(cell.to_pixels(800, 600), (0.0, 300.0, 400.0, 300.0));
    }
}
