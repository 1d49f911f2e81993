//! Nodes that rasterize the scene object list.

use smallvec::SmallVec;

use crate::backend::RenderBackend;
use crate::error::Result;
use crate::render_graph::{
    NodeId, NodeKind, NodeOutput, NodeState, OwnedTarget, PipelineNode, Port, PortTextures,
    RenderContext, SizePolicy, TargetDescriptor, unknown_port, wired,
};
use crate::scene::{Background, ObjectKind, SceneObject};
use crate::shading::{
    AttributeChannel, CombineKind, FilterKind, ScreenQuad, ShaderKind, ShaderParam, TextureHandle,
};

const DEFAULT_SHADOW_INTENSITY: f32 = 0.2;

/// Rasterizes every object accepted by `include` with `shader`.
///
/// Rejected objects are skipped along with their children. Meshes are only
/// drawn for generic objects; lights and cameras still recurse.
pub(crate) fn rasterize_scene(
    ctx: &mut RenderContext<'_>,
    shader: ShaderKind,
    params: &[ShaderParam],
    include: fn(&SceneObject) -> bool,
) {
    ctx.backend.use_shader(shader);
    for param in params {
        ctx.backend.set_param(*param);
    }
    ctx.backend.begin_scene(ctx.scene);
    for obj in &ctx.scene.objects {
        draw_object(ctx.backend, obj, include);
    }
    ctx.backend.end_scene(ctx.scene);
    ctx.backend.disuse_shader();
}

fn draw_object(backend: &mut dyn RenderBackend, obj: &SceneObject, include: fn(&SceneObject) -> bool) {
    if !include(obj) {
        return;
    }

    backend.begin_object(obj);
    if obj.kind == ObjectKind::Generic {
        for &mesh in &obj.meshes {
            backend.begin_mesh(mesh);
            backend.draw_mesh(mesh);
            backend.end_mesh(mesh);
        }
    }
    for child in &obj.children {
        draw_object(backend, child, include);
    }
    backend.end_object(obj);
}

fn visible_geometry(obj: &SceneObject) -> bool {
    obj.visible && obj.kind != ObjectKind::Camera
}

fn shadow_caster(obj: &SceneObject) -> bool {
    obj.cast_shadow && visible_geometry(obj)
}

/// Clears to the background color or draws the background image.
fn render_background(ctx: &mut RenderContext<'_>) {
    match ctx.scene.background {
        Background::Color(color) => ctx.backend.clear(color),
        Background::Texture(tex) => {
            let b = &mut *ctx.backend;
            b.use_shader(ShaderKind::Image);
            b.set_param(ShaderParam::Texture(Some(tex)));
            b.set_param(ShaderParam::SecondTexture(None));
            b.set_param(ShaderParam::Filter(FilterKind::None));
            b.set_param(ShaderParam::Combine(CombineKind::None));
            b.set_param(ShaderParam::FlipY(true));
            b.draw_quad(ScreenQuad::FULL);
            b.disuse_shader();
        }
    }
}

/// Main scene draw with the standard shader. Counts scene renders and warns
/// when the scene is drawn more than once per frame.
fn render_standard(
    ctx: &mut RenderContext<'_>,
    label: &str,
    shadow_map: Option<TextureHandle>,
    shadow_intensity: f32,
) {
    ctx.stats.scene_renders += 1;
    if ctx.stats.scene_renders > 1 {
        log::warn!(
            "{label}: scene rendered {} times this frame",
            ctx.stats.scene_renders
        );
    }
    render_background(ctx);
    rasterize_scene(
        ctx,
        ShaderKind::Standard,
        &[
            ShaderParam::ShadowMap(shadow_map),
            ShaderParam::ShadowIntensity(shadow_intensity),
        ],
        visible_geometry,
    );
}

/// Minimal path: draws the scene straight to the visible surface.
///
/// Used when no offscreen effect is enabled. Owns no render target.
pub struct SceneToScreenNode {
    state: NodeState,
}

impl SceneToScreenNode {
    pub fn new(backend: &dyn RenderBackend) -> Self {
        Self {
            state: NodeState::for_surface(backend.surface_size(), SizePolicy::Surface(1.0)),
        }
    }
}

impl PipelineNode for SceneToScreenNode {
    fn label(&self) -> &str {
        "scene-to-screen"
    }

    fn kind(&self) -> NodeKind {
        NodeKind::SceneToScreen
    }

    fn state(&self) -> &NodeState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut NodeState {
        &mut self.state
    }

    fn output(&self) -> NodeOutput {
        NodeOutput::Surface
    }

    fn render(&mut self, ctx: &mut RenderContext<'_>, _inputs: &PortTextures) {
        ctx.backend.set_viewport(self.state.width, self.state.height);
        render_standard(ctx, "scene-to-screen", None, 0.0);
        ctx.count_pass();
    }
}

/// Renders the scene into an owned color + depth target.
///
/// An optional [`Port::ShadowMap`] is published to the standard shader.
pub struct SceneImageNode {
    label: String,
    state: NodeState,
    target: OwnedTarget,
    shadow_map: Option<NodeId>,
    shadow_intensity: f32,
}

impl SceneImageNode {
    pub fn new(
        backend: &mut dyn RenderBackend,
        label: impl Into<String>,
        policy: SizePolicy,
    ) -> Result<Self> {
        let label = label.into();
        let state = NodeState::for_surface(backend.surface_size(), policy);
        let target = OwnedTarget::create(
            backend,
            TargetDescriptor::new(label.clone(), state.width, state.height),
        )?;
        Ok(Self {
            label,
            state,
            target,
            shadow_map: None,
            shadow_intensity: DEFAULT_SHADOW_INTENSITY,
        })
    }

    /// How dark shadowed areas get, `0.0` to `1.0`.
    pub fn shadow_intensity(mut self, intensity: f32) -> Self {
        self.shadow_intensity = intensity.clamp(0.0, 1.0);
        self
    }
}

impl PipelineNode for SceneImageNode {
    fn label(&self) -> &str {
        &self.label
    }

    fn kind(&self) -> NodeKind {
        NodeKind::SceneImage
    }

    fn state(&self) -> &NodeState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut NodeState {
        &mut self.state
    }

    fn ports(&self) -> SmallVec<[(Port, NodeId); 4]> {
        wired([(Port::ShadowMap, self.shadow_map)])
    }

    fn set_port(&mut self, port: Port, source: Option<NodeId>) -> Result<()> {
        match port {
            Port::ShadowMap => {
                self.shadow_map = source;
                Ok(())
            }
            _ => Err(unknown_port(self, port)),
        }
    }

    fn output(&self) -> NodeOutput {
        NodeOutput::Texture(self.target.texture())
    }

    fn render(&mut self, ctx: &mut RenderContext<'_>, inputs: &PortTextures) {
        let Some(target) = self.target.get() else {
            return;
        };

        ctx.backend.use_target(target);
        ctx.backend.set_viewport(target.width(), target.height());
        render_standard(
            ctx,
            &self.label,
            inputs.get(Port::ShadowMap),
            self.shadow_intensity,
        );
        ctx.backend.disuse_target(target);
        ctx.count_pass();
    }

    fn resize(&mut self, backend: &mut dyn RenderBackend, width: u32, height: u32) -> Result<()> {
        self.state.width = width.max(1);
        self.state.height = height.max(1);
        self.target.resize(backend, width, height)
    }

    fn destroy(&mut self, backend: &mut dyn RenderBackend) {
        self.shadow_map = None;
        self.target.destroy(backend);
    }
}

/// Rasterizes shadow casters from the light into a fixed-size depth map.
pub struct ShadowMapNode {
    state: NodeState,
    target: OwnedTarget,
}

impl ShadowMapNode {
    pub fn new(backend: &mut dyn RenderBackend, resolution: u32) -> Result<Self> {
        let state = NodeState::new(resolution, resolution, SizePolicy::Fixed);
        let target = OwnedTarget::create(
            backend,
            TargetDescriptor::new("shadow-map", state.width, state.height),
        )?;
        Ok(Self { state, target })
    }
}

impl PipelineNode for ShadowMapNode {
    fn label(&self) -> &str {
        "shadow-map"
    }

    fn kind(&self) -> NodeKind {
        NodeKind::ShadowMap
    }

    fn state(&self) -> &NodeState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut NodeState {
        &mut self.state
    }

    fn output(&self) -> NodeOutput {
        NodeOutput::Texture(self.target.texture())
    }

    fn render(&mut self, ctx: &mut RenderContext<'_>, _inputs: &PortTextures) {
        let Some(target) = self.target.get() else {
            return;
        };

        ctx.backend.use_target(target);
        ctx.backend.set_viewport(target.width(), target.height());
        rasterize_scene(ctx, ShaderKind::ShadowMap, &[], shadow_caster);
        ctx.backend.disuse_target(target);
        ctx.count_pass();
    }

    fn resize(&mut self, backend: &mut dyn RenderBackend, width: u32, height: u32) -> Result<()> {
        self.state.width = width.max(1);
        self.state.height = height.max(1);
        self.target.resize(backend, width, height)
    }

    fn destroy(&mut self, backend: &mut dyn RenderBackend) {
        self.target.destroy(backend);
    }
}

/// Writes one geometry attribute (depth or normal) of all visible objects.
pub struct AttributeNode {
    label: String,
    state: NodeState,
    channel: AttributeChannel,
    target: OwnedTarget,
}

impl AttributeNode {
    pub fn new(
        backend: &mut dyn RenderBackend,
        channel: AttributeChannel,
        policy: SizePolicy,
    ) -> Result<Self> {
        let label = match channel {
            AttributeChannel::Depth => "depth-map",
            AttributeChannel::Normal => "normal-map",
        }
        .to_string();
        let state = NodeState::for_surface(backend.surface_size(), policy);
        let target = OwnedTarget::create(
            backend,
            TargetDescriptor::new(label.clone(), state.width, state.height),
        )?;
        Ok(Self {
            label,
            state,
            channel,
            target,
        })
    }

    pub fn channel(&self) -> AttributeChannel {
        self.channel
    }
}

impl PipelineNode for AttributeNode {
    fn label(&self) -> &str {
        &self.label
    }

    fn kind(&self) -> NodeKind {
        NodeKind::Attribute
    }

    fn state(&self) -> &NodeState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut NodeState {
        &mut self.state
    }

    fn output(&self) -> NodeOutput {
        NodeOutput::Texture(self.target.texture())
    }

    fn render(&mut self, ctx: &mut RenderContext<'_>, _inputs: &PortTextures) {
        let Some(target) = self.target.get() else {
            return;
        };

        ctx.backend.use_target(target);
        ctx.backend.set_viewport(target.width(), target.height());
        rasterize_scene(
            ctx,
            ShaderKind::Attribute,
            &[ShaderParam::AttributeChannel(self.channel)],
            visible_geometry,
        );
        ctx.backend.disuse_target(target);
        ctx.count_pass();
    }

    fn resize(&mut self, backend: &mut dyn RenderBackend, width: u32, height: u32) -> Result<()> {
        self.state.width = width.max(1);
        self.state.height = height.max(1);
        self.target.resize(backend, width, height)
    }

    fn destroy(&mut self, backend: &mut dyn RenderBackend) {
        self.target.destroy(backend);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Command, HeadlessBackend};
    use crate::render_graph::{FrameStats, PipelineGraph};
    use crate::scene::{MeshId, Scene};
    use crate::shading::Color;

    fn scene() -> Scene {
        let mut scene = Scene::new();
        scene.add(
            SceneObject::new("table")
                .mesh(MeshId(0))
                .child(SceneObject::new("cup").mesh(MeshId(1)).cast_shadow(false)),
        );
        scene.add(SceneObject::new("hidden").mesh(MeshId(2)).visible(false));
        scene.add(SceneObject::new("cam").kind(ObjectKind::Camera).mesh(MeshId(3)));
        scene.add(
            SceneObject::new("lamp")
                .kind(ObjectKind::Light)
                .mesh(MeshId(4))
                .child(SceneObject::new("shade").mesh(MeshId(5))),
        );
        scene
    }

    fn run(graph: &mut PipelineGraph, root: NodeId, backend: &mut HeadlessBackend, scene: &mut Scene) -> FrameStats {
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

    fn drawn_meshes(backend: &HeadlessBackend, shader: ShaderKind) -> Vec<usize> {
        backend
            .commands()
            .iter()
            .filter_map(|c| match c {
                Command::DrawMesh {
                    shader: Some(s),
                    mesh,
                    ..
                } if *s == shader => Some(mesh.0),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn standard_pass_skips_hidden_and_cameras() {
        let mut backend = HeadlessBackend::new(64, 64);
        let mut graph = PipelineGraph::new();
        let node = SceneImageNode::new(&mut backend, "scene", SizePolicy::Surface(1.0)).unwrap();
        let id = graph.insert(node);
        let mut scene = scene();

        let stats = run(&mut graph, id, &mut backend, &mut scene);
        assert_eq!(drawn_meshes(&backend, ShaderKind::Standard), [0, 1, 5]);
        assert_eq!(stats.scene_renders, 1);
        assert_eq!(stats.render_passes, 1);
        assert!(backend.commands().contains(&Command::Param(ShaderParam::ShadowMap(None))));
    }

    #[test]
    fn shadow_pass_draws_casters_only() {
        let mut backend = HeadlessBackend::new(64, 64);
        let mut graph = PipelineGraph::new();
        let id = graph.insert(ShadowMapNode::new(&mut backend, 256).unwrap());
        let mut scene = scene();

        let stats = run(&mut graph, id, &mut backend, &mut scene);
        assert_eq!(drawn_meshes(&backend, ShaderKind::ShadowMap), [0, 5]);
        assert_eq!(stats.scene_renders, 0);
        assert!(backend.commands().contains(&Command::CreateTarget {
            label: "shadow-map".into(),
            width: 256,
            height: 256,
        }));
    }

    #[test]
    fn shadow_port_is_published_to_standard_shader() {
        let mut backend = HeadlessBackend::new(64, 64);
        let mut graph = PipelineGraph::new();
        let shadow = ShadowMapNode::new(&mut backend, 128).unwrap();
        let shadow_tex = match shadow.output() {
            NodeOutput::Texture(Some(tex)) => tex,
            other => panic!("unexpected output {other:?}"),
        };
        let shadow = graph.insert(shadow);
        let image = graph.insert(
            SceneImageNode::new(&mut backend, "scene", SizePolicy::Surface(1.0)).unwrap(),
        );
        graph.connect(image, Port::ShadowMap, shadow).unwrap();
        let mut scene = scene();

        let stats = run(&mut graph, image, &mut backend, &mut scene);
        assert_eq!(stats.render_passes, 2);
        assert!(backend
            .commands()
            .contains(&Command::Param(ShaderParam::ShadowMap(Some(shadow_tex)))));
    }

    #[test]
    fn object_and_mesh_brackets_are_balanced() {
        let mut backend = HeadlessBackend::new(64, 64);
        let mut graph = PipelineGraph::new();
        let id = graph.insert(
            SceneImageNode::new(&mut backend, "scene", SizePolicy::Surface(1.0)).unwrap(),
        );
        let mut scene = scene();
        run(&mut graph, id, &mut backend, &mut scene);

        let mut objects: Vec<String> = Vec::new();
        let mut mesh: Option<MeshId> = None;
        let mut draws = 0;
        for cmd in backend.commands() {
            match cmd {
                Command::BeginObject(name) => objects.push(name.clone()),
                Command::EndObject(name) => assert_eq!(objects.pop().as_ref(), Some(name)),
                Command::BeginMesh(m) => {
                    assert!(!objects.is_empty());
                    assert_eq!(mesh.replace(*m), None);
                }
                Command::DrawMesh { mesh: m, .. } => {
                    assert_eq!(mesh, Some(*m));
                    draws += 1;
                }
                Command::EndMesh(m) => assert_eq!(mesh.take(), Some(*m)),
                _ => {}
            }
        }
        assert!(objects.is_empty());
        assert_eq!(mesh, None);
        assert_eq!(draws, 3);
    }

    #[test]
    fn attribute_pass_sets_channel() {
        let mut backend = HeadlessBackend::new(64, 64);
        let mut graph = PipelineGraph::new();
        let id = graph.insert(
            AttributeNode::new(&mut backend, AttributeChannel::Normal, SizePolicy::Surface(1.0))
                .unwrap(),
        );
        let mut scene = scene();

        run(&mut graph, id, &mut backend, &mut scene);
        assert!(backend.commands().contains(&Command::Param(ShaderParam::AttributeChannel(
            AttributeChannel::Normal
        ))));
        assert_eq!(drawn_meshes(&backend, ShaderKind::Attribute), [0, 1, 5]);
    }

    #[test]
    fn minimal_path_draws_to_surface() {
        let mut backend = HeadlessBackend::new(64, 48);
        let mut graph = PipelineGraph::new();
        let id = graph.insert(SceneToScreenNode::new(&backend));
        let mut scene = scene();
        scene.background = Background::Color(Color::WHITE);

        run(&mut graph, id, &mut backend, &mut scene);
        assert_eq!(backend.live_targets(), 0);
        assert!(backend.commands().contains(&Command::Viewport { width: 64, height: 48 }));
        assert!(backend.commands().contains(&Command::Clear {
            target: None,
            color: Color::WHITE,
        }));
        assert!(backend.commands().iter().all(|c| match c {
            Command::DrawMesh { target, .. } => target.is_none(),
            _ => true,
        }));
    }

    #[test]
    fn image_background_is_drawn_as_quad() {
        let mut backend = HeadlessBackend::new(64, 64);
        let bg = backend.register_texture();
        let mut graph = PipelineGraph::new();
        let id = graph.insert(
            SceneImageNode::new(&mut backend, "scene", SizePolicy::Surface(1.0)).unwrap(),
        );
        let mut scene = Scene::new();
        scene.background = Background::Texture(bg);

        run(&mut graph, id, &mut backend, &mut scene);
        assert_eq!(backend.quads_into("scene"), 1);
        assert!(backend
            .commands()
            .contains(&Command::Param(ShaderParam::Texture(Some(bg)))));
    }

    #[test]
    fn destroyed_scene_image_outputs_nothing() {
        let mut backend = HeadlessBackend::new(64, 64);
        let mut node = SceneImageNode::new(&mut backend, "scene", SizePolicy::Surface(1.0)).unwrap();
        node.destroy(&mut backend);
        node.destroy(&mut backend);
        assert_eq!(node.output(), NodeOutput::Texture(None));
        assert_eq!(backend.live_targets(), 0);

        let mut graph = PipelineGraph::new();
        let id = graph.insert(node);
        let mut scene = scene();
        let stats = run(&mut graph, id, &mut backend, &mut scene);
        assert_eq!(stats.render_passes, 0);
        assert_eq!(backend.mesh_draws_with(ShaderKind::Standard), 0);
    }
}
