//! Host-facing owner of the backend, the scene and the assembled graph.

use crate::backend::RenderBackend;
use crate::config::PipelineConfig;
use crate::error::Result;
use crate::render_graph::{FrameStats, PipelineGraph, assemble, run_frame};
use crate::scene::Scene;

/// Drives the pipeline from a host loop.
///
/// Frames only render when something is dirty: the scene asked for an
/// update, it is animating, or an overlay needs redrawing. Call
/// [`render`](Self::render) every tick and it returns `None` when the frame
/// was skipped.
///
/// # Example
///
/// ```ignore
/// let mut renderer = Renderer::new(backend, PipelineConfig::new().shadow(true))?;
/// loop {
///     if let Some(stats) = renderer.render()? {
///         log::trace!("{} passes", stats.render_passes);
///     }
/// }
/// ```
pub struct Renderer<B: RenderBackend> {
    backend: B,
    config: PipelineConfig,
    scene: Scene,
    graph: PipelineGraph,
    overlay_dirty: bool,
}

impl<B: RenderBackend> Renderer<B> {
    /// Assembles the graph for `config` and schedules the first frame.
    pub fn new(backend: B, config: PipelineConfig) -> Result<Self> {
        Self::with_scene(backend, config, Scene::new())
    }

    pub fn with_scene(mut backend: B, config: PipelineConfig, mut scene: Scene) -> Result<Self> {
        let graph = assemble(&config, &mut backend)?;
        log::info!(
            "renderer: {} backend, {} pipeline nodes",
            backend.name(),
            graph.len()
        );
        scene.request_update_frame();
        scene.request_shadow_map_update();
        Ok(Self {
            backend,
            config,
            scene,
            graph,
            overlay_dirty: false,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn scene(&self) -> &Scene {
        &self.scene
    }

    pub fn scene_mut(&mut self) -> &mut Scene {
        &mut self.scene
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn graph(&self) -> &PipelineGraph {
        &self.graph
    }

    /// Rebuilds the graph if `config` differs from the current one, or if
    /// the previous rebuild failed.
    ///
    /// The old graph is destroyed before the new one is assembled, so its
    /// targets are released even if assembly fails. On failure the current
    /// configuration is kept and the graph stays empty until a later call
    /// succeeds.
    pub fn set_config(&mut self, config: PipelineConfig) -> Result<()> {
        if config == self.config && !self.graph.is_empty() {
            return Ok(());
        }
        log::info!("renderer: configuration changed, rebuilding pipeline");
        self.graph.destroy(&mut self.backend);
        self.graph = assemble(&config, &mut self.backend)?;
        self.config = config;
        self.scene.request_update_frame();
        self.scene.request_shadow_map_update();
        Ok(())
    }

    /// Resizes the surface and every surface-relative node.
    pub fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        self.backend.resize_surface(width, height);
        let (width, height) = self.backend.surface_size();
        self.graph.resize(&mut self.backend, width, height)?;
        self.scene.request_update_frame();
        Ok(())
    }

    /// Marks a host overlay (UI, gizmos) as needing a redraw.
    pub fn request_overlay_redraw(&mut self) {
        self.overlay_dirty = true;
    }

    /// Whether the next [`render`](Self::render) call will draw.
    pub fn needs_frame(&self) -> bool {
        self.scene.update_requested || self.scene.animating || self.overlay_dirty
    }

    /// Renders a frame if anything is dirty and clears the dirty flags.
    pub fn render(&mut self) -> Result<Option<FrameStats>> {
        if !self.needs_frame() {
            return Ok(None);
        }
        self.scene.update_requested = false;
        self.overlay_dirty = false;

        match run_frame(&mut self.graph, &mut self.backend, &mut self.scene) {
            Ok(stats) => Ok(Some(stats)),
            Err(err) => {
                log::warn!("renderer: frame skipped: {err}");
                self.scene.request_update_frame();
                Err(err)
            }
        }
    }

    /// Releases every pipeline target. Safe to call twice.
    pub fn destroy(&mut self) {
        self.graph.destroy(&mut self.backend);
    }
}

impl<B: RenderBackend> Drop for Renderer<B> {
    fn drop(&mut self) {
        self.destroy();
    }
}
