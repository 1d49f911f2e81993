//! Full-surface image filters: offscreen filter, screen composite and
//! external image sources.

use smallvec::SmallVec;

use crate::backend::RenderBackend;
use crate::error::Result;
use crate::render_graph::{
    NodeId, NodeKind, NodeOutput, NodeState, OwnedTarget, PipelineNode, Port, PortTextures,
    RenderContext, SizePolicy, TargetDescriptor, unknown_port, wired,
};
use crate::shading::{CombineKind, FilterKind, ScreenQuad, ShaderKind, ShaderParam, TextureHandle};

/// Settings shared by [`FilterNode`] and [`ScreenNode`].
///
/// # Example
///
/// ```ignore
/// let opts = ImageOptions::new("ssao-composite", FilterKind::LinearInterp)
///     .combine(CombineKind::Darken, 0.2)
///     .policy(SizePolicy::Surface(1.0));
/// let node = FilterNode::new(&mut backend, opts)?;
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct ImageOptions {
    pub label: String,
    pub filter: FilterKind,
    /// How [`Port::Tex2`] is merged in.
    pub combine: CombineKind,
    pub tex2_intensity: f32,
    pub gamma: Option<f32>,
    pub antialias: bool,
    /// Flip the texture coordinate Y axis when sampling.
    pub flip_y: bool,
    /// Output alpha. Only used when drawing to the surface.
    pub alpha: f32,
    pub policy: SizePolicy,
    /// Explicit size, required for [`SizePolicy::Fixed`].
    pub size: Option<(u32, u32)>,
}

impl ImageOptions {
    pub fn new(label: impl Into<String>, filter: FilterKind) -> Self {
        Self {
            label: label.into(),
            filter,
            combine: CombineKind::None,
            tex2_intensity: 1.0,
            gamma: None,
            antialias: false,
            flip_y: true,
            alpha: 1.0,
            policy: SizePolicy::Surface(1.0),
            size: None,
        }
    }

    pub fn combine(mut self, combine: CombineKind, intensity: f32) -> Self {
        self.combine = combine;
        self.tex2_intensity = intensity;
        self
    }

    pub fn gamma(mut self, gamma: Option<f32>) -> Self {
        self.gamma = gamma;
        self
    }

    pub fn antialias(mut self, antialias: bool) -> Self {
        self.antialias = antialias;
        self
    }

    pub fn flip_y(mut self, flip: bool) -> Self {
        self.flip_y = flip;
        self
    }

    pub fn alpha(mut self, alpha: f32) -> Self {
        self.alpha = alpha;
        self
    }

    pub fn policy(mut self, policy: SizePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Fixed pixel size that ignores surface resizes.
    pub fn fixed(mut self, width: u32, height: u32) -> Self {
        self.policy = SizePolicy::Fixed;
        self.size = Some((width, height));
        self
    }

    fn state(&self, surface: (u32, u32)) -> NodeState {
        match self.size {
            Some((w, h)) => NodeState::new(w, h, self.policy),
            None => NodeState::for_surface(surface, self.policy),
        }
    }

    /// Pushes the image shader parameters for one draw.
    fn push_params(
        &self,
        backend: &mut dyn RenderBackend,
        input: TextureHandle,
        tex2: Option<TextureHandle>,
        resolution: (u32, u32),
    ) {
        backend.set_param(ShaderParam::Texture(Some(input)));
        backend.set_param(ShaderParam::SecondTexture(tex2));
        backend.set_param(ShaderParam::Filter(self.filter));
        backend.set_param(ShaderParam::Combine(self.combine));
        backend.set_param(ShaderParam::SecondIntensity(self.tex2_intensity));
        backend.set_param(ShaderParam::Gamma(self.gamma.unwrap_or(1.0)));
        backend.set_param(ShaderParam::Antialias(self.antialias));
        backend.set_param(ShaderParam::FlipY(self.flip_y));
        backend.set_param(ShaderParam::Resolution([
            resolution.0 as f32,
            resolution.1 as f32,
        ]));
    }
}

/// Filters [`Port::Input`] (optionally combined with [`Port::Tex2`]) into
/// an owned color target.
pub struct FilterNode {
    opts: ImageOptions,
    state: NodeState,
    target: OwnedTarget,
    input: Option<NodeId>,
    tex2: Option<NodeId>,
}

impl FilterNode {
    pub fn new(backend: &mut dyn RenderBackend, opts: ImageOptions) -> Result<Self> {
        let state = opts.state(backend.surface_size());
        let target = OwnedTarget::create(
            backend,
            TargetDescriptor::new(opts.label.clone(), state.width, state.height)
                .depth(false)
                .clear_on_use(false),
        )?;
        Ok(Self {
            opts,
            state,
            target,
            input: None,
            tex2: None,
        })
    }

    pub fn options(&self) -> &ImageOptions {
        &self.opts
    }
}

impl PipelineNode for FilterNode {
    fn label(&self) -> &str {
        &self.opts.label
    }

    fn kind(&self) -> NodeKind {
        NodeKind::Filter
    }

    fn state(&self) -> &NodeState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut NodeState {
        &mut self.state
    }

    fn ports(&self) -> SmallVec<[(Port, NodeId); 4]> {
        wired([(Port::Input, self.input), (Port::Tex2, self.tex2)])
    }

    fn set_port(&mut self, port: Port, source: Option<NodeId>) -> Result<()> {
        match port {
            Port::Input => self.input = source,
            Port::Tex2 => self.tex2 = source,
            _ => return Err(unknown_port(self, port)),
        }
        Ok(())
    }

    fn output(&self) -> NodeOutput {
        NodeOutput::Texture(self.target.texture())
    }

    fn render(&mut self, ctx: &mut RenderContext<'_>, inputs: &PortTextures) {
        let Some(input) = inputs.get(Port::Input) else {
            ctx.skip_draw(&self.opts.label, Port::Input);
            return;
        };
        let Some(target) = self.target.get() else {
            return;
        };

        let b = &mut *ctx.backend;
        b.use_target(target);
        b.set_viewport(target.width(), target.height());
        b.use_shader(ShaderKind::Image);
        self.opts
            .push_params(b, input, inputs.get(Port::Tex2), target.size());
        b.draw_quad(ScreenQuad::FULL);
        b.disuse_shader();
        b.disuse_target(target);
        ctx.count_pass();
    }

    fn resize(&mut self, backend: &mut dyn RenderBackend, width: u32, height: u32) -> Result<()> {
        self.state.width = width.max(1);
        self.state.height = height.max(1);
        self.target.resize(backend, width, height)
    }

    fn destroy(&mut self, backend: &mut dyn RenderBackend) {
        self.input = None;
        self.tex2 = None;
        self.target.destroy(backend);
    }
}

/// Final composite: the filter/combine logic of [`FilterNode`] drawn to the
/// visible surface. Terminal, so it has no sampleable output.
pub struct ScreenNode {
    opts: ImageOptions,
    state: NodeState,
    input: Option<NodeId>,
    tex2: Option<NodeId>,
}

impl ScreenNode {
    pub fn new(backend: &dyn RenderBackend, opts: ImageOptions) -> Self {
        let state = opts.state(backend.surface_size());
        Self {
            opts,
            state,
            input: None,
            tex2: None,
        }
    }

    pub fn options(&self) -> &ImageOptions {
        &self.opts
    }
}

impl PipelineNode for ScreenNode {
    fn label(&self) -> &str {
        &self.opts.label
    }

    fn kind(&self) -> NodeKind {
        NodeKind::Screen
    }

    fn state(&self) -> &NodeState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut NodeState {
        &mut self.state
    }

    fn ports(&self) -> SmallVec<[(Port, NodeId); 4]> {
        wired([(Port::Input, self.input), (Port::Tex2, self.tex2)])
    }

    fn set_port(&mut self, port: Port, source: Option<NodeId>) -> Result<()> {
        match port {
            Port::Input => self.input = source,
            Port::Tex2 => self.tex2 = source,
            _ => return Err(unknown_port(self, port)),
        }
        Ok(())
    }

    fn output(&self) -> NodeOutput {
        NodeOutput::Surface
    }

    fn render(&mut self, ctx: &mut RenderContext<'_>, inputs: &PortTextures) {
        let Some(input) = inputs.get(Port::Input) else {
            ctx.skip_draw(&self.opts.label, Port::Input);
            return;
        };

        let b = &mut *ctx.backend;
        b.set_viewport(self.state.width, self.state.height);
        b.use_shader(ShaderKind::Screen);
        self.opts
            .push_params(b, input, inputs.get(Port::Tex2), self.state.size());
        b.set_param(ShaderParam::Alpha(self.opts.alpha));
        b.draw_quad(ScreenQuad::FULL);
        b.disuse_shader();
        ctx.count_pass();
    }

    fn destroy(&mut self, _backend: &mut dyn RenderBackend) {
        self.input = None;
        self.tex2 = None;
    }
}

/// Feeds an externally owned texture (e.g. a decoded image) into the graph.
///
/// Without a texture the node outputs nothing and consumers skip their
/// draws.
pub struct ImageSourceNode {
    label: String,
    state: NodeState,
    texture: Option<TextureHandle>,
}

impl ImageSourceNode {
    pub fn new(label: impl Into<String>, texture: Option<TextureHandle>) -> Self {
        Self {
            label: label.into(),
            state: NodeState::new(1, 1, SizePolicy::Fixed),
            texture,
        }
    }
}

impl PipelineNode for ImageSourceNode {
    fn label(&self) -> &str {
        &self.label
    }

    fn kind(&self) -> NodeKind {
        NodeKind::ImageSource
    }

    fn state(&self) -> &NodeState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut NodeState {
        &mut self.state
    }

    fn output(&self) -> NodeOutput {
        NodeOutput::Texture(self.texture)
    }

    fn render(&mut self, _ctx: &mut RenderContext<'_>, _inputs: &PortTextures) {}

    fn destroy(&mut self, _backend: &mut dyn RenderBackend) {
        self.texture = None;
    }
}
