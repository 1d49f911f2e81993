//! Render targets owned by pipeline nodes.

use crate::shading::TextureHandle;

/// Parameters for allocating a [`RenderTarget`].
///
/// # Example
///
/// ```ignore
/// let desc = TargetDescriptor::new("bloom-small", 128, 72)
///     .depth(false)
///     .clear_on_use(false);
/// let target = backend.create_target(&desc)?;
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TargetDescriptor {
    /// Debug label (visible in GPU debuggers and in logs).
    pub label: String,
    pub width: u32,
    pub height: u32,
    /// Allocate a depth attachment alongside the color texture.
    pub depth: bool,
    /// Clear color (and depth) every time the target is bound.
    pub clear_on_use: bool,
}

impl TargetDescriptor {
    /// A color + depth target that clears when bound. Zero sizes are raised
    /// to one pixel.
    pub fn new(label: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            label: label.into(),
            width: width.max(1),
            height: height.max(1),
            depth: true,
            clear_on_use: true,
        }
    }

    pub fn depth(mut self, depth: bool) -> Self {
        self.depth = depth;
        self
    }

    pub fn clear_on_use(mut self, clear: bool) -> Self {
        self.clear_on_use = clear;
        self
    }

    /// The same target at another size. Zero sizes are raised to one pixel.
    pub fn resized(&self, width: u32, height: u32) -> Self {
        Self {
            width: width.max(1),
            height: height.max(1),
            ..self.clone()
        }
    }
}

/// An off-screen color (and optional depth) attachment at a fixed pixel size.
///
/// A render target is created by a [`RenderBackend`](crate::RenderBackend)
/// and owned by exactly one pipeline node. Other nodes only ever see its
/// color [`TextureHandle`] through the owner's output. The type is
/// deliberately not `Clone`: [`RenderBackend::destroy_target`] takes it by
/// value, so a destroyed target cannot be bound again.
///
/// [`RenderBackend::destroy_target`]: crate::RenderBackend::destroy_target
#[derive(Debug, PartialEq, Eq)]
pub struct RenderTarget {
    label: String,
    color: TextureHandle,
    depth: Option<TextureHandle>,
    width: u32,
    height: u32,
    clear_on_use: bool,
}

impl RenderTarget {
    /// Assembles a target from handles allocated by a backend.
    ///
    /// Only backend implementations should call this.
    pub fn from_parts(
        desc: &TargetDescriptor,
        color: TextureHandle,
        depth: Option<TextureHandle>,
    ) -> Self {
        Self {
            label: desc.label.clone(),
            color,
            depth,
            width: desc.width,
            height: desc.height,
            clear_on_use: desc.clear_on_use,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// The sampleable color texture.
    pub fn texture(&self) -> TextureHandle {
        self.color
    }

    pub fn depth_texture(&self) -> Option<TextureHandle> {
        self.depth
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn has_depth(&self) -> bool {
        self.depth.is_some()
    }

    pub fn clears_on_use(&self) -> bool {
        self.clear_on_use
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_size_is_clamped() {
        let desc = TargetDescriptor::new("empty", 0, 0);
        assert_eq!((desc.width, desc.height), (1, 1));
    }

    #[test]
    fn resized_descriptor_keeps_flags() {
        let desc = TargetDescriptor::new("filter", 64, 64)
            .depth(false)
            .clear_on_use(false);
        let resized = desc.resized(128, 0);
        assert_eq!(resized.label, "filter");
        assert_eq!((resized.width, resized.height), (128, 1));
        assert!(!resized.depth);
        assert!(!resized.clear_on_use);
    }
}
