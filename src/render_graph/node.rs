//! The pipeline node trait and the vocabulary shared by all node variants.

use std::fmt;

use smallvec::SmallVec;

use crate::backend::RenderBackend;
use crate::error::{PipelineError, Result};
use crate::render_graph::{FrameStats, RenderTarget, TargetDescriptor};
use crate::scene::Scene;
use crate::shading::TextureHandle;

slotmap::new_key_type! {
    /// Handle to a node stored in a [`PipelineGraph`](crate::PipelineGraph).
    pub struct NodeId;
}

/// Named input slot of a node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Port {
    /// Primary image input.
    Input,
    /// Second image merged by the combine stage.
    Tex2,
    ShadowMap,
    DepthMap,
    NormalMap,
    /// Cell `i` of a preview grid.
    Preview(usize),
}

impl fmt::Display for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Port::Input => f.write_str("input"),
            Port::Tex2 => f.write_str("tex2"),
            Port::ShadowMap => f.write_str("shadow-map"),
            Port::DepthMap => f.write_str("depth-map"),
            Port::NormalMap => f.write_str("normal-map"),
            Port::Preview(i) => write!(f, "preview[{i}]"),
        }
    }
}

/// What a node exposes to its consumers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeOutput {
    /// A sampleable texture. `None` when there is currently nothing to
    /// sample (target destroyed, image not loaded yet).
    Texture(Option<TextureHandle>),
    /// The output of another node. Used by composite wrappers.
    Forward(NodeId),
    /// Draws to the visible surface; nothing to sample.
    Surface,
}

/// Variant tag of a node, used for topology queries and logging.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NodeKind {
    SceneToScreen,
    SceneImage,
    ShadowMap,
    ShadowCache,
    Attribute,
    Ssao,
    Filter,
    Blur,
    Screen,
    ImageSource,
    Preview,
}

/// How a node's size follows the surface on resize.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SizePolicy {
    /// Keeps its size (e.g. shadow maps).
    Fixed,
    /// A ratio of the surface size.
    Surface(f32),
}

impl SizePolicy {
    /// Size for a surface of `surface`, or `None` for fixed nodes.
    pub fn size_for(self, surface: (u32, u32)) -> Option<(u32, u32)> {
        match self {
            SizePolicy::Fixed => None,
            SizePolicy::Surface(ratio) => Some((
                ((surface.0 as f32 * ratio) as u32).max(1),
                ((surface.1 as f32 * ratio) as u32).max(1),
            )),
        }
    }
}

/// Per-node bookkeeping common to every variant.
#[derive(Clone, Debug, PartialEq)]
pub struct NodeState {
    /// Set once the node has been processed this frame.
    pub rendered: bool,
    pub width: u32,
    pub height: u32,
    pub policy: SizePolicy,
}

impl NodeState {
    pub fn new(width: u32, height: u32, policy: SizePolicy) -> Self {
        Self {
            rendered: false,
            width: width.max(1),
            height: height.max(1),
            policy,
        }
    }

    /// State sized by `policy` against the current surface. Fixed nodes
    /// take the surface size.
    pub fn for_surface(surface: (u32, u32), policy: SizePolicy) -> Self {
        let (w, h) = policy.size_for(surface).unwrap_or(surface);
        Self::new(w, h, policy)
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

/// Everything a node needs while rendering a frame.
pub struct RenderContext<'a> {
    pub backend: &'a mut dyn RenderBackend,
    pub scene: &'a mut Scene,
    pub stats: &'a mut FrameStats,
}

impl RenderContext<'_> {
    /// Records one GPU pass.
    pub fn count_pass(&mut self) {
        self.stats.render_passes += 1;
    }

    /// Records a draw skipped because `port` had nothing to sample.
    pub fn skip_draw(&mut self, node: &str, port: Port) {
        log::trace!("{node}: `{port}` has no texture, skipping draw");
        self.stats.skipped_draws += 1;
    }
}

/// Resolved textures of a node's wired ports, gathered after upstream
/// processing.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PortTextures(SmallVec<[(Port, Option<TextureHandle>); 4]>);

impl PortTextures {
    pub fn push(&mut self, port: Port, texture: Option<TextureHandle>) {
        self.0.push((port, texture));
    }

    /// Texture of `port`, or `None` when unwired or empty.
    pub fn get(&self, port: Port) -> Option<TextureHandle> {
        self.0
            .iter()
            .find(|(p, _)| *p == port)
            .and_then(|(_, tex)| *tex)
    }

    pub fn iter(&self) -> impl Iterator<Item = &(Port, Option<TextureHandle>)> {
        self.0.iter()
    }
}

impl FromIterator<(Port, Option<TextureHandle>)> for PortTextures {
    fn from_iter<I: IntoIterator<Item = (Port, Option<TextureHandle>)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// A unit of the pipeline graph.
///
/// Nodes hold non-owning [`NodeId`] references to their upstream producers.
/// The [`PipelineGraph`](crate::PipelineGraph) drives the lifecycle:
///
/// ```text
/// clear() ─▶ process() ─▶ [should_process gate] ─▶ process(upstream…) ─▶ render()
/// ```
///
/// Implementors only describe their ports and do their own drawing; the
/// graph handles memoization, traversal order and port validation.
///
/// # Implementing Custom Nodes
///
/// ```ignore
/// struct Tint {
///     state: NodeState,
///     input: Option<NodeId>,
///     target: OwnedTarget,
/// }
///
/// impl PipelineNode for Tint {
///     fn label(&self) -> &str { "tint" }
///     fn kind(&self) -> NodeKind { NodeKind::Filter }
///     fn state(&self) -> &NodeState { &self.state }
///     fn state_mut(&mut self) -> &mut NodeState { &mut self.state }
///     fn ports(&self) -> SmallVec<[(Port, NodeId); 4]> {
///         self.input.map(|id| (Port::Input, id)).into_iter().collect()
///     }
///     fn set_port(&mut self, port: Port, source: Option<NodeId>) -> Result<()> {
///         match port {
///             Port::Input => { self.input = source; Ok(()) }
///             _ => Err(unknown_port(self, port)),
///         }
///     }
///     fn output(&self) -> NodeOutput { NodeOutput::Texture(self.target.texture()) }
///     fn render(&mut self, ctx: &mut RenderContext<'_>, inputs: &PortTextures) {
///         // bind target, set params, draw_quad...
///     }
/// }
/// ```
pub trait PipelineNode {
    /// Debug name, unique within a graph by convention.
    fn label(&self) -> &str;

    fn kind(&self) -> NodeKind;

    fn state(&self) -> &NodeState;

    fn state_mut(&mut self) -> &mut NodeState;

    /// Wired input ports and the nodes feeding them.
    fn ports(&self) -> SmallVec<[(Port, NodeId); 4]> {
        SmallVec::new()
    }

    /// Wires (`Some`) or unwires (`None`) a port. Only called by
    /// [`PipelineGraph::connect`](crate::PipelineGraph::connect) and
    /// `disconnect`, which validate the producer first.
    fn set_port(&mut self, port: Port, _source: Option<NodeId>) -> Result<()> {
        Err(unknown_port(self, port))
    }

    /// Inner node that actually owns `port`, for composite wrappers.
    fn redirect(&self, _port: Port) -> Option<NodeId> {
        None
    }

    /// Inner nodes whose lifetime this node owns.
    fn owned(&self) -> SmallVec<[NodeId; 2]> {
        SmallVec::new()
    }

    fn output(&self) -> NodeOutput;

    /// Gate consulted once per frame before upstream processing. Returning
    /// `false` keeps the previous output and skips the whole subtree.
    fn should_process(&mut self, _ctx: &mut RenderContext<'_>) -> bool {
        true
    }

    /// Per-variant GPU work. Upstream ports are already processed.
    fn render(&mut self, ctx: &mut RenderContext<'_>, inputs: &PortTextures);

    /// Updates the node size, recreating owned targets only when it changed.
    fn resize(&mut self, _backend: &mut dyn RenderBackend, width: u32, height: u32) -> Result<()> {
        let state = self.state_mut();
        state.width = width.max(1);
        state.height = height.max(1);
        Ok(())
    }

    /// Releases owned GPU resources and drops port references. Idempotent.
    fn destroy(&mut self, _backend: &mut dyn RenderBackend) {}
}

/// Error for a port the node doesn't have.
pub fn unknown_port<N: PipelineNode + ?Sized>(node: &N, port: Port) -> PipelineError {
    PipelineError::UnknownPort {
        node: node.label().to_string(),
        port,
    }
}

/// A render target slot owned by a node.
///
/// Wraps the create/resize/destroy dance shared by every texture-producing
/// node. A failed allocation leaves the slot empty but retryable; only
/// [`destroy`](Self::destroy) retires it for good.
#[derive(Debug)]
pub struct OwnedTarget {
    desc: TargetDescriptor,
    target: Option<RenderTarget>,
    destroyed: bool,
}

impl OwnedTarget {
    /// Allocates the target right away. Allocation failure is fatal.
    pub fn create(backend: &mut dyn RenderBackend, desc: TargetDescriptor) -> Result<Self> {
        let target = backend.create_target(&desc)?;
        Ok(Self {
            desc,
            target: Some(target),
            destroyed: false,
        })
    }

    pub fn get(&self) -> Option<&RenderTarget> {
        self.target.as_ref()
    }

    pub fn texture(&self) -> Option<TextureHandle> {
        self.target.as_ref().map(RenderTarget::texture)
    }

    /// Size of the live target, or of the last one that was allocated.
    pub fn size(&self) -> (u32, u32) {
        (self.desc.width, self.desc.height)
    }

    /// Recreates the target at the new size.
    ///
    /// No-op when a live target already has that size, or once the slot was
    /// destroyed. An empty slot left by a failed allocation is allocated
    /// again.
    pub fn resize(&mut self, backend: &mut dyn RenderBackend, width: u32, height: u32) -> Result<()> {
        if self.destroyed {
            return Ok(());
        }
        let desc = self.desc.resized(width, height);
        if self.target.is_some() && self.desc == desc {
            return Ok(());
        }

        log::trace!(
            "resizing target {:?} {}x{} -> {}x{}",
            desc.label,
            self.desc.width,
            self.desc.height,
            desc.width,
            desc.height
        );
        if let Some(old) = self.target.take() {
            backend.destroy_target(old);
        }
        self.target = Some(backend.create_target(&desc)?);
        self.desc = desc;
        Ok(())
    }

    pub fn destroy(&mut self, backend: &mut dyn RenderBackend) {
        self.destroyed = true;
        if let Some(target) = self.target.take() {
            backend.destroy_target(target);
        }
    }
}

/// Collects `(port, id)` pairs for the wired entries of a fixed port list.
pub(crate) fn wired<const N: usize>(
    ports: [(Port, Option<NodeId>); N],
) -> SmallVec<[(Port, NodeId); 4]> {
    ports
        .into_iter()
        .filter_map(|(port, id)| id.map(|id| (port, id)))
        .collect()
}
