//! Builds a pipeline graph from a [`PipelineConfig`].

use crate::backend::RenderBackend;
use crate::config::PipelineConfig;
use crate::error::Result;
use crate::render_graph::{
    AttributeNode, BlurNode, FilterNode, ImageOptions, NodeId, PipelineGraph, Port, PreviewNode,
    SceneImageNode, SceneToScreenNode, ScreenNode, ShadowCacheNode, ShadowMapNode, SizePolicy,
    SsaoNode,
};
use crate::shading::{AttributeChannel, CombineKind, FilterKind};

/// Wires the node graph for `config` and registers its single root.
///
/// Shadow map → cache → scene image, then the optional bloom and SSAO
/// chains, then the final composite (or the preview grid). With none of
/// shadow, bloom or SSAO active the graph is a lone [`SceneToScreenNode`].
///
/// # Errors
///
/// Any wiring or target-creation failure. Targets created before the
/// failure are released again.
pub fn assemble(config: &PipelineConfig, backend: &mut dyn RenderBackend) -> Result<PipelineGraph> {
    let mut graph = PipelineGraph::new();
    match build(&mut graph, config, backend) {
        Ok(root) => {
            graph.add_root(root);
            log::debug!(
                "assembled pipeline: {} nodes (shadow: {}, bloom: {}, ssao: {}, preview: {})",
                graph.len(),
                config.shadow.enabled,
                config.bloom_active(),
                config.ssao.enabled,
                config.preview.enabled,
            );
            Ok(graph)
        }
        Err(err) => {
            log::warn!("pipeline assembly failed: {err}");
            graph.destroy(backend);
            Err(err)
        }
    }
}

/// Output node of each optional chain, for the preview grid.
#[derive(Default)]
struct Chains {
    shadow: Option<NodeId>,
    bloom: Option<NodeId>,
    depth: Option<NodeId>,
    normal: Option<NodeId>,
    ssao: Option<NodeId>,
}

fn build(
    graph: &mut PipelineGraph,
    config: &PipelineConfig,
    backend: &mut dyn RenderBackend,
) -> Result<NodeId> {
    if !config.needs_offscreen() {
        return Ok(graph.insert(SceneToScreenNode::new(backend)));
    }

    let mut chains = Chains::default();
    let image_policy = SizePolicy::Surface(config.rendering.resolution_ratio);

    if config.shadow.enabled {
        let resolution = config.shadow.resolution;
        let map = graph.insert(ShadowMapNode::new(backend, resolution)?);
        let cache =
            ShadowCacheNode::build(graph, backend, resolution, config.shadow.enable_cache)?;
        graph.connect(cache, Port::Input, map)?;
        chains.shadow = Some(cache);
    }

    let scene_image = graph.insert(
        SceneImageNode::new(backend, "scene-image", image_policy)?
            .shadow_intensity(config.shadow.intensity),
    );
    if let Some(shadow) = chains.shadow {
        graph.connect(scene_image, Port::ShadowMap, shadow)?;
    }

    if config.bloom_active() {
        let policy = SizePolicy::Surface(config.bloom.resolution_ratio);
        let small = graph.insert(FilterNode::new(
            backend,
            ImageOptions::new("bloom-small", FilterKind::Blur3)
                .policy(policy)
                .gamma(Some(config.bloom.gamma)),
        )?);
        graph.connect(small, Port::Input, scene_image)?;
        let blur = BlurNode::build(graph, backend, "bloom-blur", policy, None, None)?;
        graph.connect(blur, Port::Input, small)?;
        chains.bloom = Some(blur);
    }

    let mut image = scene_image;
    if config.ssao.enabled {
        let depth = graph.insert(AttributeNode::new(
            backend,
            AttributeChannel::Depth,
            SizePolicy::Surface(1.0),
        )?);
        let normal = graph.insert(AttributeNode::new(
            backend,
            AttributeChannel::Normal,
            SizePolicy::Surface(1.0),
        )?);
        let ratio = config.ssao.resolution_ratio;
        let ssao = graph.insert(SsaoNode::new(backend, SizePolicy::Surface(ratio))?);
        graph.connect(ssao, Port::DepthMap, depth)?;
        graph.connect(ssao, Port::NormalMap, normal)?;

        let blur = BlurNode::build(
            graph,
            backend,
            "ssao-blur",
            SizePolicy::Surface(ratio * 0.5),
            None,
            None,
        )?;
        graph.connect(blur, Port::Input, ssao)?;

        let composite = graph.insert(FilterNode::new(
            backend,
            ImageOptions::new("ssao-composite", FilterKind::LinearInterp)
                .combine(CombineKind::Darken, config.ssao.intensity)
                .policy(image_policy),
        )?);
        graph.connect(composite, Port::Input, scene_image)?;
        graph.connect(composite, Port::Tex2, blur)?;

        chains.depth = Some(depth);
        chains.normal = Some(normal);
        chains.ssao = Some(ssao);
        image = composite;
    }

    let final_opts = |label: &str| {
        ImageOptions::new(label, FilterKind::LinearInterp)
            .combine(CombineKind::Lighten, 1.0)
            .gamma(Some(config.rendering.gamma))
            .antialias(config.antialias)
            .alpha(config.rendering.alpha)
    };

    if !config.preview.enabled {
        let screen = graph.insert(ScreenNode::new(backend, final_opts("final-screen")));
        graph.connect(screen, Port::Input, image)?;
        if let Some(bloom) = chains.bloom {
            graph.connect(screen, Port::Tex2, bloom)?;
        }
        return Ok(screen);
    }

    let final_image = graph.insert(FilterNode::new(
        backend,
        final_opts("final-image").policy(image_policy),
    )?);
    graph.connect(final_image, Port::Input, image)?;
    if let Some(bloom) = chains.bloom {
        graph.connect(final_image, Port::Tex2, bloom)?;
    }

    let sources = [
        Some(final_image),
        Some(scene_image),
        chains.shadow,
        chains.bloom,
        chains.depth,
        chains.normal,
        chains.ssao,
    ];
    let count = sources.iter().flatten().count();
    let preview = graph.insert(PreviewNode::new(backend, count, config.preview.antialias));
    for source in sources {
        graph.add_preview(preview, source)?;
    }
    Ok(preview)
}
