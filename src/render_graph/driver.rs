//! Per-frame execution of a pipeline graph.

use crate::backend::RenderBackend;
use crate::error::Result;
use crate::render_graph::{PipelineGraph, RenderContext};
use crate::scene::Scene;

/// Counters gathered while rendering one frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameStats {
    /// GPU passes actually issued.
    pub render_passes: u32,
    /// Full scene rasterizations with the standard shader.
    pub scene_renders: u32,
    /// Shadow cache refreshes.
    pub shadow_renders: u32,
    /// Draws skipped because an input had nothing to sample.
    pub skipped_draws: u32,
}

/// Renders one frame: clears every root, then processes them in order.
///
/// All roots are cleared before any is processed so a subgraph shared by
/// two roots still renders only once.
///
/// # Errors
///
/// Returns [`PipelineError::Surface`](crate::PipelineError::Surface) when
/// the backend can't start a frame. Nothing is drawn in that case.
pub fn run_frame(
    graph: &mut PipelineGraph,
    backend: &mut dyn RenderBackend,
    scene: &mut Scene,
) -> Result<FrameStats> {
    backend.begin_frame()?;

    let mut stats = FrameStats::default();
    let roots = graph.roots().to_vec();
    {
        let mut ctx = RenderContext {
            backend: &mut *backend,
            scene,
            stats: &mut stats,
        };
        for root in &roots {
            graph.clear(*root);
        }
        for root in roots {
            graph.process(root, &mut ctx);
        }
    }

    backend.end_frame();
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PipelineError;
    use crate::backend::{Command, HeadlessBackend};
    use crate::render_graph::{
        FilterNode, ImageOptions, Port, SceneImageNode, ScreenNode, SizePolicy,
    };
    use crate::scene::{MeshId, SceneObject};
    use crate::shading::FilterKind;

    #[test]
    fn frame_is_bracketed_and_nodes_render_once() {
        let mut backend = HeadlessBackend::new(64, 64);
        let mut graph = PipelineGraph::new();
        let image = graph.insert(
            SceneImageNode::new(&mut backend, "scene", SizePolicy::Surface(1.0)).unwrap(),
        );
        let screen = graph.insert(ScreenNode::new(
            &backend,
            ImageOptions::new("screen", FilterKind::LinearInterp),
        ));
        let side = graph.insert(
            FilterNode::new(&mut backend, ImageOptions::new("side", FilterKind::Blur5)).unwrap(),
        );
        graph.connect(screen, Port::Input, image).unwrap();
        graph.connect(side, Port::Input, image).unwrap();
        graph.add_root(side);
        graph.add_root(screen);

        let mut scene = Scene::new();
        scene.add(SceneObject::new("box").mesh(MeshId(0)));
        backend.clear_commands();
        let stats = run_frame(&mut graph, &mut backend, &mut scene).unwrap();

        assert_eq!(stats.scene_renders, 1);
        assert_eq!(stats.render_passes, 3);
        let cmds = backend.commands();
        assert_eq!(cmds.first(), Some(&Command::BeginFrame));
        assert_eq!(cmds.last(), Some(&Command::EndFrame));

        backend.clear_commands();
        let stats = run_frame(&mut graph, &mut backend, &mut scene).unwrap();
        assert_eq!(stats.scene_renders, 1);
    }

    #[test]
    fn lost_surface_draws_nothing() {
        let mut backend = HeadlessBackend::new(64, 64);
        let mut graph = PipelineGraph::new();
        let image = graph.insert(
            SceneImageNode::new(&mut backend, "scene", SizePolicy::Surface(1.0)).unwrap(),
        );
        graph.add_root(image);
        backend.set_surface_lost(true);
        backend.clear_commands();

        let err = run_frame(&mut graph, &mut backend, &mut Scene::new()).unwrap_err();
        assert!(matches!(err, PipelineError::Surface(_)));
        assert!(backend.commands().is_empty());
    }
}
