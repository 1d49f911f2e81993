//! The pipeline graph: an arena of nodes plus the frame roots.

use std::fmt;

use slotmap::SlotMap;
use smallvec::SmallVec;

use crate::backend::RenderBackend;
use crate::error::{PipelineError, Result};
use crate::render_graph::{
    NodeId, NodeKind, NodeOutput, PipelineNode, Port, PortTextures, RenderContext,
};
use crate::shading::TextureHandle;

/// Longest redirect/forward chain followed before giving up.
const MAX_CHAIN: usize = 16;

/// A directed acyclic graph of render passes.
///
/// Nodes live in a slot map and refer to each other by [`NodeId`], so a port
/// can never dangle: a destroyed producer simply resolves to "nothing to
/// sample". Only roots are driven directly each frame; every other node is
/// reached through port references.
///
/// ```text
/// ┌────────────┐   ┌──────────────┐   ┌─────────────┐   ┌──────────────┐
/// │ Shadow Map │──▶│ Shadow Cache │──▶│ Scene Image │──▶│    Screen    │ (root)
/// └────────────┘   └──────────────┘   └──────┬──────┘   └──────▲───────┘
///                                            │                 │ tex2
///                                            ▼                 │
///                                     ┌─────────────┐   ┌──────┴───────┐
///                                     │ Bloom blur3 │──▶│ Two-Pass Blur│
///                                     └─────────────┘   └──────────────┘
/// ```
///
/// # Example
///
/// ```ignore
/// let mut graph = PipelineGraph::new();
/// let scene = graph.insert(SceneImageNode::new(&mut backend, "scene", SizePolicy::Surface(1.0))?);
/// let screen = graph.insert(ScreenNode::new(&backend, ImageOptions::new("screen", FilterKind::None)));
/// graph.connect(screen, Port::Input, scene)?;
/// graph.add_root(screen);
///
/// // Each frame:
/// let stats = run_frame(&mut graph, &mut backend, &mut scene)?;
/// ```
#[derive(Default)]
pub struct PipelineGraph {
    nodes: SlotMap<NodeId, Box<dyn PipelineNode>>,
    roots: Vec<NodeId>,
}

impl PipelineGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Moves a node into the arena.
    pub fn insert<N: PipelineNode + 'static>(&mut self, node: N) -> NodeId {
        let label = node.label().to_string();
        let id = self.nodes.insert(Box::new(node));
        log::trace!("graph: inserted `{label}` as {id:?}");
        id
    }

    pub fn node(&self, id: NodeId) -> Option<&dyn PipelineNode> {
        self.nodes.get(id).map(|n| n.as_ref())
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Registers a node to be driven every frame, in insertion order.
    pub fn add_root(&mut self, id: NodeId) {
        if !self.roots.contains(&id) {
            self.roots.push(id);
        }
    }

    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    /// First node whose label is `label`.
    pub fn find(&self, label: &str) -> Option<NodeId> {
        self.nodes
            .iter()
            .find(|(_, n)| n.label() == label)
            .map(|(id, _)| id)
    }

    fn get(&self, id: NodeId) -> Result<&dyn PipelineNode> {
        self.node(id).ok_or(PipelineError::UnknownNode(id))
    }

    fn label_of(&self, id: NodeId) -> String {
        self.node(id)
            .map(|n| n.label().to_string())
            .unwrap_or_else(|| format!("{id:?}"))
    }

    /// Wires `producer`'s output into `consumer`'s `port`.
    ///
    /// Composite consumers forward the port to the inner node that owns it.
    /// Fails with [`PipelineError::Wiring`] if the producer's output can't
    /// resolve to a texture, and with [`PipelineError::Cycle`] if the edge
    /// would close a loop.
    pub fn connect(&mut self, consumer: NodeId, port: Port, producer: NodeId) -> Result<()> {
        let consumer = self.resolve_port_owner(consumer, port)?;
        self.get(producer)?;

        if !self.produces_texture(producer) {
            return Err(PipelineError::Wiring {
                consumer: self.label_of(consumer),
                port,
                producer: self.label_of(producer),
            });
        }

        if producer == consumer || self.depends_on(producer, consumer) {
            return Err(PipelineError::Cycle {
                consumer: self.label_of(consumer),
                producer: self.label_of(producer),
            });
        }

        let node = self
            .nodes
            .get_mut(consumer)
            .ok_or(PipelineError::UnknownNode(consumer))?;
        node.set_port(port, Some(producer))?;
        log::trace!(
            "graph: {} `{port}` <- {}",
            self.label_of(consumer),
            self.label_of(producer)
        );
        Ok(())
    }

    /// Unwires `port` on `consumer`.
    pub fn disconnect(&mut self, consumer: NodeId, port: Port) -> Result<()> {
        let consumer = self.resolve_port_owner(consumer, port)?;
        self.nodes
            .get_mut(consumer)
            .ok_or(PipelineError::UnknownNode(consumer))?
            .set_port(port, None)
    }

    /// Appends `source` to the next free cell of a preview node. `None` is
    /// ignored, so optional chains can be listed unconditionally.
    pub fn add_preview(&mut self, preview: NodeId, source: Option<NodeId>) -> Result<()> {
        let Some(source) = source else {
            return Ok(());
        };
        let taken: SmallVec<[usize; 8]> = self
            .get(preview)?
            .ports()
            .iter()
            .filter_map(|(p, _)| match p {
                Port::Preview(i) => Some(*i),
                _ => None,
            })
            .collect();
        let next = (0..).find(|i| !taken.contains(i)).unwrap_or(taken.len());
        self.connect(preview, Port::Preview(next), source)
    }

    /// Node currently wired into `port` of `consumer`.
    pub fn port_source(&self, consumer: NodeId, port: Port) -> Option<NodeId> {
        let owner = self.resolve_port_owner(consumer, port).ok()?;
        self.node(owner)?
            .ports()
            .into_iter()
            .find(|(p, _)| *p == port)
            .map(|(_, id)| id)
    }

    /// Texture a node currently exposes, following forwards.
    pub fn output_texture(&self, id: NodeId) -> Option<TextureHandle> {
        let mut id = id;
        for _ in 0..MAX_CHAIN {
            match self.node(id)?.output() {
                NodeOutput::Texture(tex) => return tex,
                NodeOutput::Forward(next) => id = next,
                NodeOutput::Surface => return None,
            }
        }
        None
    }

    fn produces_texture(&self, id: NodeId) -> bool {
        let mut id = id;
        for _ in 0..MAX_CHAIN {
            match self.node(id).map(|n| n.output()) {
                Some(NodeOutput::Texture(_)) => return true,
                Some(NodeOutput::Forward(next)) => id = next,
                Some(NodeOutput::Surface) | None => return false,
            }
        }
        false
    }

    fn resolve_port_owner(&self, id: NodeId, port: Port) -> Result<NodeId> {
        let mut id = id;
        for _ in 0..MAX_CHAIN {
            match self.get(id)?.redirect(port) {
                Some(inner) => id = inner,
                None => return Ok(id),
            }
        }
        Err(PipelineError::UnknownPort {
            node: self.label_of(id),
            port,
        })
    }

    /// Port producers followed by owned inner nodes.
    fn edges(node: &dyn PipelineNode) -> SmallVec<[NodeId; 6]> {
        node.ports()
            .into_iter()
            .map(|(_, id)| id)
            .chain(node.owned())
            .collect()
    }

    /// Whether `target` is upstream of (or owned by) `from`.
    fn depends_on(&self, from: NodeId, target: NodeId) -> bool {
        let mut stack: Vec<NodeId> = vec![from];
        let mut seen: Vec<NodeId> = Vec::new();
        while let Some(id) = stack.pop() {
            if seen.contains(&id) {
                continue;
            }
            seen.push(id);
            let Some(node) = self.node(id) else { continue };
            for next in Self::edges(node) {
                if next == target {
                    return true;
                }
                stack.push(next);
            }
        }
        false
    }

    /// Renders `id` and, first, everything upstream of it. At most once per
    /// frame per node, however many consumers reach it.
    pub fn process(&mut self, id: NodeId, ctx: &mut RenderContext<'_>) {
        let upstream = {
            let Some(node) = self.nodes.get_mut(id) else {
                return;
            };
            if node.state().rendered {
                return;
            }
            node.state_mut().rendered = true;
            if !node.should_process(ctx) {
                return;
            }
            Self::edges(node.as_ref())
        };

        for up in upstream {
            self.process(up, ctx);
        }

        let inputs = self.port_textures(id);
        if let Some(node) = self.nodes.get_mut(id) {
            node.render(ctx, &inputs);
        }
    }

    fn port_textures(&self, id: NodeId) -> PortTextures {
        self.node(id)
            .map(|n| {
                n.ports()
                    .into_iter()
                    .map(|(port, src)| (port, self.output_texture(src)))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Resets the rendered flag of `id` and everything upstream.
    pub fn clear(&mut self, id: NodeId) {
        let mut stack = vec![id];
        let mut seen: Vec<NodeId> = Vec::new();
        while let Some(id) = stack.pop() {
            if seen.contains(&id) {
                continue;
            }
            seen.push(id);
            let Some(node) = self.nodes.get_mut(id) else {
                continue;
            };
            node.state_mut().rendered = false;
            stack.extend(Self::edges(node.as_ref()));
        }
    }

    /// Applies each node's size policy for a surface of `width` x `height`.
    pub fn resize(&mut self, backend: &mut dyn RenderBackend, width: u32, height: u32) -> Result<()> {
        for node in self.nodes.values_mut() {
            if let Some((w, h)) = node.state().policy.size_for((width, height)) {
                node.resize(backend, w, h)?;
            }
        }
        Ok(())
    }

    /// Destroys `id` and the inner nodes it owns, removing them from the
    /// arena. Ports of other nodes pointing at them resolve to nothing.
    pub fn destroy_node(&mut self, backend: &mut dyn RenderBackend, id: NodeId) {
        let Some(mut node) = self.nodes.remove(id) else {
            return;
        };
        let owned = node.owned();
        node.destroy(backend);
        self.roots.retain(|r| *r != id);
        for inner in owned {
            self.destroy_node(backend, inner);
        }
    }

    /// Destroys every node. The graph is empty afterwards.
    pub fn destroy(&mut self, backend: &mut dyn RenderBackend) {
        if !self.nodes.is_empty() {
            log::debug!("graph: destroying {} nodes", self.nodes.len());
        }
        for (_, mut node) in self.nodes.drain() {
            node.destroy(backend);
        }
        self.roots.clear();
    }

    /// Every node reachable from `root` (including itself), each once.
    pub fn reachable(&self, root: NodeId) -> Vec<NodeId> {
        let mut order = Vec::new();
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            if order.contains(&id) {
                continue;
            }
            let Some(node) = self.node(id) else { continue };
            order.push(id);
            stack.extend(Self::edges(node).into_iter().rev());
        }
        order
    }

    /// Number of nodes of `kind` reachable from `root`.
    pub fn count_kind(&self, root: NodeId, kind: NodeKind) -> usize {
        self.reachable(root)
            .into_iter()
            .filter(|id| self.node(*id).is_some_and(|n| n.kind() == kind))
            .count()
    }
}

impl fmt::Debug for PipelineGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineGraph")
            .field("nodes", &self.nodes.len())
            .field("roots", &self.roots)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::HeadlessBackend;
    use crate::render_graph::{FrameStats, NodeState, SizePolicy, wired};
    use crate::scene::Scene;
    use std::cell::Cell;
    use std::rc::Rc;

    /// Test node counting its renders.
    struct TestNode {
        label: &'static str,
        state: NodeState,
        input: Option<NodeId>,
        tex2: Option<NodeId>,
        output: NodeOutput,
        renders: Rc<Cell<u32>>,
        seen: Rc<Cell<Option<TextureHandle>>>,
    }

    impl TestNode {
        fn texture(label: &'static str, tex: u64) -> Self {
            Self {
                label,
                state: NodeState::new(8, 8, SizePolicy::Surface(0.5)),
                input: None,
                tex2: None,
                output: NodeOutput::Texture(Some(TextureHandle(tex))),
                renders: Rc::default(),
                seen: Rc::default(),
            }
        }

        fn terminal(label: &'static str) -> Self {
            Self {
                output: NodeOutput::Surface,
                ..Self::texture(label, 0)
            }
        }
    }

    impl PipelineNode for TestNode {
        fn label(&self) -> &str {
            self.label
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
                _ => return Err(crate::render_graph::unknown_port(self, port)),
            }
            Ok(())
        }
        fn output(&self) -> NodeOutput {
            self.output
        }
        fn render(&mut self, _ctx: &mut RenderContext<'_>, inputs: &PortTextures) {
            self.renders.set(self.renders.get() + 1);
            self.seen.set(inputs.get(Port::Input));
        }
    }

    fn frame(graph: &mut PipelineGraph, backend: &mut HeadlessBackend, scene: &mut Scene) {
        let mut stats = FrameStats::default();
        let mut ctx = RenderContext {
            backend,
            scene,
            stats: &mut stats,
        };
        let roots = graph.roots().to_vec();
        for root in &roots {
            graph.clear(*root);
        }
        for root in &roots {
            graph.process(*root, &mut ctx);
        }
    }

    #[test]
    fn second_process_in_a_frame_is_a_no_op() {
        let mut graph = PipelineGraph::new();
        let node = TestNode::texture("leaf", 1);
        let renders = node.renders.clone();
        let id = graph.insert(node);

        let mut backend = HeadlessBackend::new(16, 16);
        let mut scene = Scene::new();
        let mut stats = FrameStats::default();
        let mut ctx = RenderContext {
            backend: &mut backend,
            scene: &mut scene,
            stats: &mut stats,
        };
        graph.process(id, &mut ctx);
        graph.process(id, &mut ctx);
        assert_eq!(renders.get(), 1);

        graph.clear(id);
        graph.process(id, &mut ctx);
        assert_eq!(renders.get(), 2);
    }

    #[test]
    fn shared_upstream_renders_once_per_frame() {
        let mut graph = PipelineGraph::new();
        let shared = TestNode::texture("shared", 1);
        let renders = shared.renders.clone();
        let shared = graph.insert(shared);

        let a = graph.insert(TestNode::texture("a", 2));
        let b = graph.insert(TestNode::texture("b", 3));
        let root = graph.insert(TestNode::terminal("root"));
        graph.connect(a, Port::Input, shared).unwrap();
        graph.connect(b, Port::Input, shared).unwrap();
        graph.connect(root, Port::Input, a).unwrap();
        graph.connect(root, Port::Tex2, b).unwrap();
        graph.add_root(root);

        let mut backend = HeadlessBackend::new(16, 16);
        let mut scene = Scene::new();
        frame(&mut graph, &mut backend, &mut scene);
        assert_eq!(renders.get(), 1);
        frame(&mut graph, &mut backend, &mut scene);
        assert_eq!(renders.get(), 2);
    }

    #[test]
    fn render_sees_upstream_texture() {
        let mut graph = PipelineGraph::new();
        let src = graph.insert(TestNode::texture("src", 42));
        let sink = TestNode::terminal("sink");
        let seen = sink.seen.clone();
        let sink = graph.insert(sink);
        graph.connect(sink, Port::Input, src).unwrap();
        graph.add_root(sink);

        let mut backend = HeadlessBackend::new(16, 16);
        frame(&mut graph, &mut backend, &mut Scene::new());
        assert_eq!(seen.get(), Some(TextureHandle(42)));
    }

    #[test]
    fn surface_producer_is_a_wiring_error() {
        let mut graph = PipelineGraph::new();
        let screen = graph.insert(TestNode::terminal("screen"));
        let consumer = graph.insert(TestNode::texture("filter", 1));
        let err = graph.connect(consumer, Port::Input, screen).unwrap_err();
        assert!(matches!(err, PipelineError::Wiring { .. }));
        assert_eq!(graph.port_source(consumer, Port::Input), None);
    }

    #[test]
    fn unknown_port_is_rejected() {
        let mut graph = PipelineGraph::new();
        let a = graph.insert(TestNode::texture("a", 1));
        let b = graph.insert(TestNode::texture("b", 2));
        let err = graph.connect(a, Port::DepthMap, b).unwrap_err();
        assert!(matches!(err, PipelineError::UnknownPort { .. }));
    }

    #[test]
    fn cycles_are_rejected() {
        let mut graph = PipelineGraph::new();
        let a = graph.insert(TestNode::texture("a", 1));
        let b = graph.insert(TestNode::texture("b", 2));
        let c = graph.insert(TestNode::texture("c", 3));
        graph.connect(b, Port::Input, a).unwrap();
        graph.connect(c, Port::Input, b).unwrap();

        let err = graph.connect(a, Port::Input, c).unwrap_err();
        assert!(matches!(err, PipelineError::Cycle { .. }));
        let err = graph.connect(a, Port::Tex2, a).unwrap_err();
        assert!(matches!(err, PipelineError::Cycle { .. }));
    }

    #[test]
    fn destroyed_producer_resolves_to_nothing() {
        let mut graph = PipelineGraph::new();
        let mut backend = HeadlessBackend::new(16, 16);
        let src = graph.insert(TestNode::texture("src", 5));
        let sink = TestNode::terminal("sink");
        let seen = sink.seen.clone();
        let sink = graph.insert(sink);
        graph.connect(sink, Port::Input, src).unwrap();
        graph.add_root(sink);

        graph.destroy_node(&mut backend, src);
        assert!(!graph.contains(src));
        assert_eq!(graph.output_texture(src), None);
        frame(&mut graph, &mut backend, &mut Scene::new());
        assert_eq!(seen.get(), None);
    }

    #[test]
    fn resize_applies_policies() {
        let mut graph = PipelineGraph::new();
        let mut backend = HeadlessBackend::new(16, 16);
        let scaled = graph.insert(TestNode::texture("scaled", 1));
        let mut fixed = TestNode::texture("fixed", 2);
        fixed.state.policy = SizePolicy::Fixed;
        let fixed = graph.insert(fixed);

        graph.resize(&mut backend, 200, 100).unwrap();
        assert_eq!(graph.node(scaled).unwrap().state().size(), (100, 50));
        assert_eq!(graph.node(fixed).unwrap().state().size(), (8, 8));
    }

    #[test]
    fn reachable_lists_each_node_once() {
        let mut graph = PipelineGraph::new();
        let shared = graph.insert(TestNode::texture("shared", 1));
        let root = graph.insert(TestNode::terminal("root"));
        graph.connect(root, Port::Input, shared).unwrap();
        graph.connect(root, Port::Tex2, shared).unwrap();
        assert_eq!(graph.reachable(root), vec![root, shared]);
        assert_eq!(graph.count_kind(root, NodeKind::Filter), 2);
    }

    #[test]
    fn clear_terminates_on_a_forced_loop() {
        let mut graph = PipelineGraph::new();
        let a = graph.insert(TestNode::texture("a", 1));
        let b = graph.insert(TestNode::texture("b", 2));
        graph.connect(b, Port::Input, a).unwrap();
        // bypass `connect` to close the loop
        graph.nodes[a].set_port(Port::Input, Some(b)).unwrap();
        graph.nodes[a].state_mut().rendered = true;
        graph.nodes[b].state_mut().rendered = true;

        graph.clear(b);
        assert!(!graph.node(a).unwrap().state().rendered);
        assert!(!graph.node(b).unwrap().state().rendered);
        assert_eq!(graph.reachable(b).len(), 2);
    }

    #[test]
    fn debug_lists_size_and_roots() {
        let mut graph = PipelineGraph::new();
        let root = graph.insert(TestNode::terminal("root"));
        graph.add_root(root);
        let text = format!("{graph:?}");
        assert!(text.starts_with("PipelineGraph { nodes: 1, roots: ["));
    }

    #[test]
    fn destroy_empties_graph() {
        let mut graph = PipelineGraph::new();
        let mut backend = HeadlessBackend::new(16, 16);
        let root = graph.insert(TestNode::terminal("root"));
        graph.add_root(root);
        graph.destroy(&mut backend);
        assert!(graph.is_empty());
        assert!(graph.roots().is_empty());
        graph.destroy(&mut backend);
    }
}
