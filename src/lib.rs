//! # Refract
//!
//! **A frame-graph render pipeline: shadows, bloom, SSAO and a debug preview
//! grid, wired from a handful of options.**
//!
//! Each effect is a node that renders into its own offscreen target. Nodes
//! reference their inputs through named ports, and a frame walks the graph
//! from its roots so every upstream pass completes before anything samples
//! it. The [`Renderer`] rebuilds the graph when the configuration changes and
//! skips frames when nothing is dirty.
//!
//! ## Quick Start
//!
//! ```no_run
//! use refract::*;
//!
//! fn main() -> refract::Result<()> {
//!     let backend = HeadlessBackend::new(800, 600);
//!     let config = PipelineConfig::new().shadow(true).bloom(true).ssao(true);
//!     let mut renderer = Renderer::new(backend, config)?;
//!
//!     renderer
//!         .scene_mut()
//!         .add(SceneObject::new("teapot").mesh(MeshId(0)));
//!
//!     if let Some(stats) = renderer.render()? {
//!         println!("{} passes", stats.render_passes);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Backends
//!
//! - [`WgpuBackend`] renders into a window through `wgpu`. Scene meshes are
//!   drawn by a host [`SceneRenderer`].
//! - [`HeadlessBackend`] records every call without a GPU.

mod backend;
mod camera;
mod config;
mod error;
mod gpu;
pub mod render_graph;
mod renderer;
pub mod scene;
mod shading;

pub use backend::{
    Command, HeadlessBackend, RenderBackend, SceneBatch, SceneDraw, SceneRenderer, WgpuBackend,
};
pub use camera::{Camera, Light};
pub use config::{
    BloomSettings, PipelineConfig, PreviewSettings, RenderingImage, ShadowQuality, SsaoSettings,
};
pub use error::{PipelineError, Result};
pub use gpu::GpuContext;
pub use render_graph::{
    FrameStats, NodeId, NodeKind, PipelineGraph, PipelineNode, Port, assemble, run_frame,
};
pub use renderer::Renderer;
pub use scene::{Background, MeshId, ObjectKind, Scene, SceneObject};
pub use shading::{
    AttributeChannel, Color, CombineKind, FilterKind, ScreenQuad, ShaderKind, ShaderParam,
    TextureHandle,
};
