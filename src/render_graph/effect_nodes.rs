//! Composite effects built from primitive nodes, plus SSAO and the preview
//! grid.
//!
//! Composites don't duplicate rendering logic. A [`BlurNode`] owns two
//! [`FilterNode`]s and only redirects its input port and forwards its
//! output, so from the outside it behaves like a single node:
//!
//! ```text
//!          ┌────────────────────── BlurNode ──────────────────────┐
//! input ──▶│ FilterNode (gauss-h) ───▶ FilterNode (gauss-v)       │──▶ output
//!          └──────────────────────────────────────────────────────┘
//! ```

use smallvec::{SmallVec, smallvec};

use crate::backend::RenderBackend;
use crate::error::{PipelineError, Result};
use crate::render_graph::{
    FilterNode, ImageOptions, NodeId, NodeKind, NodeOutput, NodeState, OwnedTarget,
    PipelineGraph, PipelineNode, Port, PortTextures, RenderContext, SizePolicy, TargetDescriptor,
    unknown_port, wired,
};
use crate::shading::{CombineKind, FilterKind, ScreenQuad, ShaderKind, ShaderParam};

/// Default SSAO sampling radius in view space.
pub const SSAO_RADIUS: f32 = 0.5;
/// Default SSAO depth bias.
pub const SSAO_BIAS: f32 = 0.025;

/// Separable Gaussian blur: a horizontal filter feeding a vertical one.
pub struct BlurNode {
    label: String,
    state: NodeState,
    horizontal: NodeId,
    vertical: NodeId,
}

impl BlurNode {
    /// Builds both passes into `graph` and returns the composite's id.
    ///
    /// `gamma`, if given, is applied by the vertical pass. A fixed `size`
    /// pins both passes; otherwise they follow `policy`.
    pub fn build(
        graph: &mut PipelineGraph,
        backend: &mut dyn RenderBackend,
        label: &str,
        policy: SizePolicy,
        size: Option<(u32, u32)>,
        gamma: Option<f32>,
    ) -> Result<NodeId> {
        let opts = |suffix: &str, filter: FilterKind| {
            let mut opts = ImageOptions::new(format!("{label}-{suffix}"), filter).policy(policy);
            opts.size = size;
            opts
        };

        let horizontal = graph.insert(FilterNode::new(
            backend,
            opts("h", FilterKind::GaussBlurHorizontal),
        )?);
        let vertical = graph.insert(FilterNode::new(
            backend,
            opts("v", FilterKind::GaussBlurVertical).gamma(gamma),
        )?);
        graph.connect(vertical, Port::Input, horizontal)?;

        let state = match size {
            Some((w, h)) => NodeState::new(w, h, policy),
            None => NodeState::for_surface(backend.surface_size(), policy),
        };
        Ok(graph.insert(Self {
            label: label.to_string(),
            state,
            horizontal,
            vertical,
        }))
    }

    pub fn horizontal(&self) -> NodeId {
        self.horizontal
    }

    pub fn vertical(&self) -> NodeId {
        self.vertical
    }
}

impl PipelineNode for BlurNode {
    fn label(&self) -> &str {
        &self.label
    }

    fn kind(&self) -> NodeKind {
        NodeKind::Blur
    }

    fn state(&self) -> &NodeState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut NodeState {
        &mut self.state
    }

    fn redirect(&self, port: Port) -> Option<NodeId> {
        (port == Port::Input).then_some(self.horizontal)
    }

    fn owned(&self) -> SmallVec<[NodeId; 2]> {
        smallvec![self.horizontal, self.vertical]
    }

    fn output(&self) -> NodeOutput {
        NodeOutput::Forward(self.vertical)
    }

    fn render(&mut self, _ctx: &mut RenderContext<'_>, _inputs: &PortTextures) {}
}

/// Blurred shadow map that only re-renders when the scene asks for it.
///
/// With caching enabled the whole shadow subtree (shadow map and blur) is
/// skipped unless the scene's `shadow_map_update_requested` flag is set; the
/// flag is consumed either way. The last blurred texture stays valid in
/// between.
pub struct ShadowCacheNode {
    state: NodeState,
    blur: NodeId,
    cache_enabled: bool,
}

impl ShadowCacheNode {
    /// Wraps a fixed-size blur of `resolution` around the shadow input.
    pub fn build(
        graph: &mut PipelineGraph,
        backend: &mut dyn RenderBackend,
        resolution: u32,
        cache_enabled: bool,
    ) -> Result<NodeId> {
        let blur = BlurNode::build(
            graph,
            backend,
            "shadow-blur",
            SizePolicy::Fixed,
            Some((resolution, resolution)),
            None,
        )?;
        Ok(graph.insert(Self {
            state: NodeState::new(resolution, resolution, SizePolicy::Fixed),
            blur,
            cache_enabled,
        }))
    }

    pub fn cache_enabled(&self) -> bool {
        self.cache_enabled
    }
}

impl PipelineNode for ShadowCacheNode {
    fn label(&self) -> &str {
        "shadow-cache"
    }

    fn kind(&self) -> NodeKind {
        NodeKind::ShadowCache
    }

    fn state(&self) -> &NodeState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut NodeState {
        &mut self.state
    }

    fn redirect(&self, port: Port) -> Option<NodeId> {
        (port == Port::Input).then_some(self.blur)
    }

    fn owned(&self) -> SmallVec<[NodeId; 2]> {
        smallvec![self.blur]
    }

    fn output(&self) -> NodeOutput {
        NodeOutput::Forward(self.blur)
    }

    fn should_process(&mut self, ctx: &mut RenderContext<'_>) -> bool {
        let requested = ctx.scene.take_shadow_map_update();
        !self.cache_enabled || requested
    }

    fn render(&mut self, ctx: &mut RenderContext<'_>, _inputs: &PortTextures) {
        ctx.stats.shadow_renders += 1;
        if self.cache_enabled {
            log::debug!("shadow-cache: shadow map re-rendered");
        }
    }
}

/// Screen-space ambient occlusion from depth and normal attribute maps.
pub struct SsaoNode {
    state: NodeState,
    target: OwnedTarget,
    depth_map: Option<NodeId>,
    normal_map: Option<NodeId>,
    radius: f32,
    bias: f32,
}

impl SsaoNode {
    pub fn new(backend: &mut dyn RenderBackend, policy: SizePolicy) -> Result<Self> {
        let state = NodeState::for_surface(backend.surface_size(), policy);
        let target = OwnedTarget::create(
            backend,
            TargetDescriptor::new("ssao", state.width, state.height),
        )?;
        Ok(Self {
            state,
            target,
            depth_map: None,
            normal_map: None,
            radius: SSAO_RADIUS,
            bias: SSAO_BIAS,
        })
    }
}

impl PipelineNode for SsaoNode {
    fn label(&self) -> &str {
        "ssao"
    }

    fn kind(&self) -> NodeKind {
        NodeKind::Ssao
    }

    fn state(&self) -> &NodeState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut NodeState {
        &mut self.state
    }

    fn ports(&self) -> SmallVec<[(Port, NodeId); 4]> {
        wired([
            (Port::DepthMap, self.depth_map),
            (Port::NormalMap, self.normal_map),
        ])
    }

    fn set_port(&mut self, port: Port, source: Option<NodeId>) -> Result<()> {
        match port {
            Port::DepthMap => self.depth_map = source,
            Port::NormalMap => self.normal_map = source,
            _ => return Err(unknown_port(self, port)),
        }
        Ok(())
    }

    fn output(&self) -> NodeOutput {
        NodeOutput::Texture(self.target.texture())
    }

    fn render(&mut self, ctx: &mut RenderContext<'_>, inputs: &PortTextures) {
        let Some(depth) = inputs.get(Port::DepthMap) else {
            ctx.skip_draw("ssao", Port::DepthMap);
            return;
        };
        let Some(normal) = inputs.get(Port::NormalMap) else {
            ctx.skip_draw("ssao", Port::NormalMap);
            return;
        };
        let Some(target) = self.target.get() else {
            return;
        };

        ctx.backend.use_shader(ShaderKind::Ssao);
        ctx.backend.use_target(target);
        ctx.backend.set_viewport(target.width(), target.height());
        for param in [
            ShaderParam::DepthMap(Some(depth)),
            ShaderParam::NormalMap(Some(normal)),
            ShaderParam::SsaoRadius(self.radius),
            ShaderParam::SsaoBias(self.bias),
            ShaderParam::FlipY(true),
            ShaderParam::Resolution([target.width() as f32, target.height() as f32]),
        ] {
            ctx.backend.set_param(param);
        }
        ctx.backend.begin_scene(ctx.scene);
        ctx.backend.draw_quad(ScreenQuad::FULL);
        ctx.backend.end_scene(ctx.scene);
        ctx.backend.disuse_shader();
        ctx.backend.disuse_target(target);
        ctx.count_pass();
    }

    fn resize(&mut self, backend: &mut dyn RenderBackend, width: u32, height: u32) -> Result<()> {
        self.state.width = width.max(1);
        self.state.height = height.max(1);
        self.target.resize(backend, width, height)
    }

    fn destroy(&mut self, backend: &mut dyn RenderBackend) {
        self.depth_map = None;
        self.normal_map = None;
        self.target.destroy(backend);
    }
}

/// Debug compositor drawing several node outputs on a square grid.
///
/// Cells fill row-major from the bottom-left corner. Add sources with
/// [`PipelineGraph::add_preview`].
pub struct PreviewNode {
    state: NodeState,
    columns: usize,
    rows: usize,
    antialias: bool,
    cells: Vec<(Option<NodeId>, ScreenQuad)>,
}

impl PreviewNode {
    /// A grid just large enough for `count` previews.
    pub fn new(backend: &dyn RenderBackend, count: usize, antialias: bool) -> Self {
        let side = (count.max(1) as f32).sqrt().ceil() as usize;
        Self {
            state: NodeState::for_surface(backend.surface_size(), SizePolicy::Surface(1.0)),
            columns: side,
            rows: side,
            antialias,
            cells: Vec::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.columns * self.rows
    }

    /// NDC quad of cell `index`.
    pub fn cell_quad(&self, index: usize) -> ScreenQuad {
        let w = 2.0 / self.columns as f32;
        let h = 2.0 / self.rows as f32;
        let col = index % self.columns;
        let row = index / self.columns;
        ScreenQuad::new(-1.0 + col as f32 * w, -1.0 + row as f32 * h, w, h)
    }

    pub fn cells(&self) -> &[(Option<NodeId>, ScreenQuad)] {
        &self.cells
    }
}

impl PipelineNode for PreviewNode {
    fn label(&self) -> &str {
        "pipeline-preview"
    }

    fn kind(&self) -> NodeKind {
        NodeKind::Preview
    }

    fn state(&self) -> &NodeState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut NodeState {
        &mut self.state
    }

    fn ports(&self) -> SmallVec<[(Port, NodeId); 4]> {
        self.cells
            .iter()
            .enumerate()
            .filter_map(|(i, (src, _))| src.map(|id| (Port::Preview(i), id)))
            .collect()
    }

    fn set_port(&mut self, port: Port, source: Option<NodeId>) -> Result<()> {
        let Port::Preview(index) = port else {
            return Err(unknown_port(self, port));
        };
        if let Some(cell) = self.cells.get_mut(index) {
            cell.0 = source;
            return Ok(());
        }
        if index != self.cells.len() {
            return Err(unknown_port(self, port));
        }
        if index >= self.capacity() {
            return Err(PipelineError::PreviewGridFull {
                capacity: self.capacity(),
            });
        }
        let quad = self.cell_quad(index);
        self.cells.push((source, quad));
        Ok(())
    }

    fn output(&self) -> NodeOutput {
        NodeOutput::Surface
    }

    fn render(&mut self, ctx: &mut RenderContext<'_>, inputs: &PortTextures) {
        let mut drawn = false;
        for (i, (source, quad)) in self.cells.iter().enumerate() {
            if source.is_none() {
                continue;
            }
            let Some(texture) = inputs.get(Port::Preview(i)) else {
                ctx.skip_draw("pipeline-preview", Port::Preview(i));
                continue;
            };

            let b = &mut *ctx.backend;
            b.set_viewport(self.state.width, self.state.height);
            b.use_shader(ShaderKind::Screen);
            for param in [
                ShaderParam::Texture(Some(texture)),
                ShaderParam::SecondTexture(None),
                ShaderParam::Filter(FilterKind::LinearInterp),
                ShaderParam::Combine(CombineKind::None),
                ShaderParam::Gamma(1.0),
                ShaderParam::Antialias(self.antialias),
                ShaderParam::FlipY(true),
                ShaderParam::Alpha(1.0),
                ShaderParam::Resolution([self.state.width as f32, self.state.height as f32]),
            ] {
                b.set_param(param);
            }
            b.draw_quad(*quad);
            b.disuse_shader();
            drawn = true;
        }
        if drawn {
            ctx.count_pass();
        }
    }

    fn destroy(&mut self, _backend: &mut dyn RenderBackend) {
        self.cells.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Command, HeadlessBackend};
    use crate::render_graph::{FrameStats, ImageSourceNode, ShadowMapNode};
    use crate::scene::{MeshId, Scene, SceneObject};

    fn run(
        graph: &mut PipelineGraph,
        root: NodeId,
        backend: &mut HeadlessBackend,
        scene: &mut Scene,
    ) -> FrameStats {
        let mut stats = FrameStats::default();
        let mut ctx = RenderContext {
            backend,
            scene,
            stats: &mut stats,
        };
        graph.clear(root);
        graph.process(root, &mut ctx);
        stats
    }

    fn shadow_chain(cache: bool) -> (PipelineGraph, NodeId, HeadlessBackend) {
        let mut backend = HeadlessBackend::new(64, 64);
        let mut graph = PipelineGraph::new();
        let shadow = graph.insert(ShadowMapNode::new(&mut backend, 128).unwrap());
        let cache = ShadowCacheNode::build(&mut graph, &mut backend, 128, cache).unwrap();
        graph.connect(cache, Port::Input, shadow).unwrap();
        (graph, cache, backend)
    }

    fn caster_scene() -> Scene {
        let mut scene = Scene::new();
        scene.add(SceneObject::new("box").mesh(MeshId(0)));
        scene
    }

    #[test]
    fn blur_redirects_input_and_forwards_output() {
        let mut backend = HeadlessBackend::new(64, 64);
        let tex = backend.register_texture();
        let mut graph = PipelineGraph::new();
        let src = graph.insert(ImageSourceNode::new("src", Some(tex)));
        let blur =
            BlurNode::build(&mut graph, &mut backend, "bloom", SizePolicy::Surface(0.5), None, Some(2.0))
                .unwrap();
        graph.connect(blur, Port::Input, src).unwrap();

        let h = graph.find("bloom-h").unwrap();
        let v = graph.find("bloom-v").unwrap();
        assert_eq!(graph.port_source(blur, Port::Input), Some(src));
        assert_eq!(graph.port_source(h, Port::Input), Some(src));
        assert_eq!(graph.port_source(v, Port::Input), Some(h));
        assert_eq!(graph.output_texture(blur), graph.output_texture(v));
        assert!(graph.output_texture(blur).is_some());

        let mut scene = Scene::new();
        let stats = run(&mut graph, blur, &mut backend, &mut scene);
        assert_eq!(stats.render_passes, 2);
        assert_eq!(backend.quads_into("bloom-h"), 1);
        assert_eq!(backend.quads_into("bloom-v"), 1);
        // gamma only on the vertical pass
        let gammas: Vec<_> = backend
            .commands()
            .iter()
            .filter_map(|c| match c {
                Command::Param(ShaderParam::Gamma(g)) => Some(*g),
                _ => None,
            })
            .collect();
        assert_eq!(gammas, [1.0, 2.0]);
    }

    #[test]
    fn destroying_blur_releases_both_targets() {
        let mut backend = HeadlessBackend::new(64, 64);
        let mut graph = PipelineGraph::new();
        let blur =
            BlurNode::build(&mut graph, &mut backend, "blur", SizePolicy::Surface(1.0), None, None)
                .unwrap();
        assert_eq!(backend.live_targets(), 2);
        assert_eq!(graph.len(), 3);

        graph.destroy_node(&mut backend, blur);
        assert_eq!(backend.live_targets(), 0);
        assert!(graph.is_empty());
    }

    #[test]
    fn cached_shadow_renders_only_when_requested() {
        let (mut graph, cache, mut backend) = shadow_chain(true);
        let mut scene = caster_scene();
        scene.shadow_map_update_requested = false;

        let stats = run(&mut graph, cache, &mut backend, &mut scene);
        assert_eq!(stats.shadow_renders, 0);
        assert_eq!(backend.mesh_draws_with(ShaderKind::ShadowMap), 0);

        scene.request_shadow_map_update();
        let stats = run(&mut graph, cache, &mut backend, &mut scene);
        assert_eq!(stats.shadow_renders, 1);
        assert_eq!(backend.mesh_draws_with(ShaderKind::ShadowMap), 1);
        assert!(!scene.shadow_map_update_requested);

        let stats = run(&mut graph, cache, &mut backend, &mut scene);
        assert_eq!(stats.shadow_renders, 0);
        assert_eq!(backend.mesh_draws_with(ShaderKind::ShadowMap), 1);
    }

    #[test]
    fn uncached_shadow_renders_every_frame() {
        let (mut graph, cache, mut backend) = shadow_chain(false);
        let mut scene = caster_scene();
        for _ in 0..3 {
            let stats = run(&mut graph, cache, &mut backend, &mut scene);
            assert_eq!(stats.shadow_renders, 1);
            assert_eq!(stats.render_passes, 3);
        }
    }

    #[test]
    fn shadow_cache_output_survives_skipped_frames() {
        let (mut graph, cache, mut backend) = shadow_chain(true);
        let before = graph.output_texture(cache);
        assert!(before.is_some());
        let mut scene = caster_scene();
        scene.shadow_map_update_requested = false;
        run(&mut graph, cache, &mut backend, &mut scene);
        assert_eq!(graph.output_texture(cache), before);
    }

    #[test]
    fn ssao_binds_maps_inside_scene_bracket() {
        let mut backend = HeadlessBackend::new(64, 64);
        let depth = backend.register_texture();
        let normal = backend.register_texture();
        let mut graph = PipelineGraph::new();
        let d = graph.insert(ImageSourceNode::new("depth", Some(depth)));
        let n = graph.insert(ImageSourceNode::new("normal", Some(normal)));
        let ssao = graph.insert(SsaoNode::new(&mut backend, SizePolicy::Surface(0.5)).unwrap());
        graph.connect(ssao, Port::DepthMap, d).unwrap();
        graph.connect(ssao, Port::NormalMap, n).unwrap();

        let mut scene = Scene::new();
        let stats = run(&mut graph, ssao, &mut backend, &mut scene);
        assert_eq!(stats.render_passes, 1);

        let cmds = backend.commands();
        let begin = cmds.iter().position(|c| *c == Command::BeginScene).unwrap();
        let quad = cmds
            .iter()
            .position(|c| matches!(c, Command::DrawQuad { target: Some(t), .. } if t == "ssao"))
            .unwrap();
        let end = cmds.iter().position(|c| *c == Command::EndScene).unwrap();
        assert!(begin < quad && quad < end);
        assert!(cmds.contains(&Command::Param(ShaderParam::SsaoRadius(0.5))));
        assert!(cmds.contains(&Command::Param(ShaderParam::SsaoBias(0.025))));
        assert!(cmds.contains(&Command::Param(ShaderParam::DepthMap(Some(depth)))));
        assert!(cmds.contains(&Command::Param(ShaderParam::NormalMap(Some(normal)))));
    }

    #[test]
    fn ssao_skips_without_normals() {
        let mut backend = HeadlessBackend::new(64, 64);
        let depth = backend.register_texture();
        let mut graph = PipelineGraph::new();
        let d = graph.insert(ImageSourceNode::new("depth", Some(depth)));
        let ssao = graph.insert(SsaoNode::new(&mut backend, SizePolicy::Surface(0.5)).unwrap());
        graph.connect(ssao, Port::DepthMap, d).unwrap();

        let stats = run(&mut graph, ssao, &mut backend, &mut Scene::new());
        assert_eq!(stats.skipped_draws, 1);
        assert_eq!(backend.quads_into("ssao"), 0);
    }

    #[test]
    fn preview_cells_fill_from_bottom_left() {
        let backend = HeadlessBackend::new(64, 64);
        let preview = PreviewNode::new(&backend, 7, false);
        assert_eq!(preview.capacity(), 9);
        let third = 2.0 / 3.0;
        assert_eq!(preview.cell_quad(0), ScreenQuad::new(-1.0, -1.0, third, third));
        assert_eq!(
            preview.cell_quad(4),
            ScreenQuad::new(-1.0 + third, -1.0 + third, third, third)
        );
        assert_eq!(
            preview.cell_quad(6),
            ScreenQuad::new(-1.0, -1.0 + 2.0 * third, third, third)
        );
    }

    #[test]
    fn preview_draws_each_source_and_rejects_overflow() {
        let mut backend = HeadlessBackend::new(64, 64);
        let mut graph = PipelineGraph::new();
        let preview = graph.insert(PreviewNode::new(&backend, 4, true));
        let mut sources = Vec::new();
        for label in ["a", "b", "c"] {
            let tex = backend.register_texture();
            sources.push(graph.insert(ImageSourceNode::new(label, Some(tex))));
        }
        let pending = graph.insert(ImageSourceNode::new("pending", None));
        for src in &sources {
            graph.add_preview(preview, Some(*src)).unwrap();
        }
        graph.add_preview(preview, None).unwrap();
        graph.add_preview(preview, Some(pending)).unwrap();

        let extra = graph.insert(ImageSourceNode::new("extra", None));
        let err = graph.add_preview(preview, Some(extra)).unwrap_err();
        assert!(matches!(err, PipelineError::PreviewGridFull { capacity: 4 }));

        let stats = run(&mut graph, preview, &mut backend, &mut Scene::new());
        let quads = backend.quads_on_surface();
        assert_eq!(quads.len(), 3);
        assert_eq!(quads[0], ScreenQuad::new(-1.0, -1.0, 1.0, 1.0));
        assert_eq!(quads[1], ScreenQuad::new(0.0, -1.0, 1.0, 1.0));
        assert_eq!(quads[2], ScreenQuad::new(-1.0, 0.0, 1.0, 1.0));
        assert_eq!(stats.skipped_draws, 1);
        assert_eq!(stats.render_passes, 1);
    }
}
