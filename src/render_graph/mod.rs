//! Node-based multi-pass rendering pipeline.
//!
//! Every node renders into its own offscreen [`RenderTarget`] (or straight to
//! the surface) and exposes that target as its output. Consumers reference
//! producers through named [`Port`]s, so one producer may feed any number of
//! consumers. A frame walks the graph from its roots depth-first; each node
//! renders at most once per frame.
//!
//! # Architecture
//!
//! A fully featured pipeline, as wired by [`assemble`]:
//!
//! ```text
//! ┌───────────┐   ┌─────────────┐   ┌─────────────┐
//! │ ShadowMap │──▶│ ShadowCache │──▶│ SceneImage  │──┬────────────────────────┐
//! └───────────┘   └─────────────┘   └─────────────┘  │                        │
//!                                                    ▼                        ▼
//! ┌───────┐ ┌────────┐   ┌──────┐   ┌──────┐   ┌────────────┐        ┌─────────────┐
//! │ depth │ │ normal │──▶│ Ssao │──▶│ Blur │──▶│  composite │──────▶ │             │
//! └───────┘ └────────┘   └──────┘   └──────┘   │  (darken)  │        │   Screen    │
//!                                              └────────────┘        │  (lighten)  │
//!                         ┌────────────┐   ┌──────┐                  │             │
//!        SceneImage ────▶ │ bloom-small│──▶│ Blur │────────────────▶ │             │
//!                         └────────────┘   └──────┘                  └─────────────┘
//! ```
//!
//! With no shadow, bloom or SSAO the whole graph collapses into a single
//! [`SceneToScreenNode`].
//!
//! # Node Types
//!
//! - [`SceneToScreenNode`] / [`SceneImageNode`]: rasterize the scene
//! - [`ShadowMapNode`] / [`ShadowCacheNode`]: light-space depth and its cached blur
//! - [`AttributeNode`] / [`SsaoNode`]: geometry buffers and ambient occlusion
//! - [`FilterNode`] / [`BlurNode`]: full-screen filters, two-input combines
//! - [`ScreenNode`] / [`PreviewNode`]: final composite or a debug grid of chains
//! - [`ImageSourceNode`]: wraps an externally owned texture
//!
//! # Example
//!
//! ```ignore
//! use refract::{HeadlessBackend, PipelineConfig, Scene, assemble, run_frame};
//!
//! let mut backend = HeadlessBackend::new(800, 600);
//! let config = PipelineConfig::new().shadow(true).bloom(true);
//! let mut graph = assemble(&config, &mut backend)?;
//!
//! let mut scene = Scene::new();
//! let stats = run_frame(&mut graph, &mut backend, &mut scene)?;
//! ```

mod assembler;
mod driver;
mod effect_nodes;
mod filter_nodes;
mod graph;
mod node;
mod render_target;
mod scene_nodes;

pub use assembler::assemble;
pub use driver::{FrameStats, run_frame};
pub use effect_nodes::{
    BlurNode, PreviewNode, SSAO_BIAS, SSAO_RADIUS, ShadowCacheNode, SsaoNode,
};
pub use filter_nodes::{FilterNode, ImageOptions, ImageSourceNode, ScreenNode};
pub use graph::PipelineGraph;
pub(crate) use node::wired;
pub use node::{
    NodeId, NodeKind, NodeOutput, NodeState, OwnedTarget, PipelineNode, Port, PortTextures,
    RenderContext, SizePolicy, unknown_port,
};
pub use render_target::{RenderTarget, TargetDescriptor};
pub use scene_nodes::{AttributeNode, SceneImageNode, SceneToScreenNode, ShadowMapNode};
