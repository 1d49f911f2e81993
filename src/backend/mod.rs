//! Render backends.
//!
//! Pipeline nodes never touch the GPU directly. Every target allocation,
//! shader activation and draw goes through the [`RenderBackend`] trait, which
//! keeps the graph logic independent of the graphics API:
//!
//! - [`WgpuBackend`]: the real thing, rendering through `wgpu` into a window
//!   surface.
//! - [`HeadlessBackend`]: allocates handles and records every command without
//!   a GPU. Used by the test suite and for offline runs of the graph.
//!
//! # Activation contract
//!
//! A pass follows the same shape on every backend:
//!
//! ```text
//! use_target(t) ─▶ set_viewport ─▶ use_shader(k) ─▶ set_param* ─▶ draw_* ─▶ disuse_shader ─▶ disuse_target(t)
//! ```
//!
//! Draws issued while no target is bound go to the visible surface.

mod headless;
mod wgpu_backend;

pub use headless::{Command, HeadlessBackend};
pub use wgpu_backend::{SceneBatch, SceneDraw, SceneRenderer, WgpuBackend};

use crate::error::Result;
use crate::render_graph::{RenderTarget, TargetDescriptor};
use crate::scene::{MeshId, Scene, SceneObject};
use crate::shading::{Color, ScreenQuad, ShaderKind, ShaderParam};

/// GPU abstraction used by every pipeline node.
pub trait RenderBackend {
    /// Backend name for logging.
    fn name(&self) -> &'static str;

    /// Physical size of the visible surface in pixels.
    fn surface_size(&self) -> (u32, u32);

    /// Reconfigures the visible surface.
    fn resize_surface(&mut self, width: u32, height: u32);

    /// Acquires the surface and starts recording a frame.
    fn begin_frame(&mut self) -> Result<()>;

    /// Submits the recorded frame and presents it.
    fn end_frame(&mut self);

    /// Allocates a render target. Failure is fatal for the graph being built.
    fn create_target(&mut self, desc: &TargetDescriptor) -> Result<RenderTarget>;

    /// Releases a render target and its textures.
    fn destroy_target(&mut self, target: RenderTarget);

    /// Redirects subsequent draws into `target`, clearing it first if it was
    /// created with `clear_on_use`.
    fn use_target(&mut self, target: &RenderTarget);

    /// Restores drawing to the visible surface.
    fn disuse_target(&mut self, target: &RenderTarget);

    /// Sets the pixel size of the current drawing area.
    fn set_viewport(&mut self, width: u32, height: u32);

    /// Clears the current drawing area.
    fn clear(&mut self, color: Color);

    fn use_shader(&mut self, shader: ShaderKind);

    fn disuse_shader(&mut self);

    /// Sets a parameter on the active shader.
    fn set_param(&mut self, param: ShaderParam);

    fn begin_scene(&mut self, scene: &Scene);

    fn begin_object(&mut self, _object: &SceneObject) {}

    fn begin_mesh(&mut self, _mesh: MeshId) {}

    fn draw_mesh(&mut self, mesh: MeshId);

    fn end_mesh(&mut self, _mesh: MeshId) {}

    fn end_object(&mut self, _object: &SceneObject) {}

    fn end_scene(&mut self, scene: &Scene);

    /// Draws a textured quad with the active image/screen shader.
    fn draw_quad(&mut self, quad: ScreenQuad);
}
