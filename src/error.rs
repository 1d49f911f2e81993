//! Error types for pipeline assembly and frame execution.
//!
//! Wiring mistakes and resource exhaustion are fatal and surface as a
//! [`PipelineError`] from assembly, `connect` or `resize`. A node whose input
//! has nothing to sample at draw time is *not* an error: the draw is skipped
//! for that frame and counted in [`FrameStats`](crate::FrameStats).

use thiserror::Error;

use crate::render_graph::{NodeId, Port};

/// Errors produced while building, resizing or running a pipeline graph.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// A texture-typed port was fed by a node whose output is not a texture.
    #[error(
        "{consumer}: port `{port}` requires a texture-producing node, but `{producer}` has no texture output"
    )]
    Wiring {
        /// Label of the node that owns the port.
        consumer: String,
        /// The port being connected.
        port: Port,
        /// Label of the node that was offered as producer.
        producer: String,
    },

    /// The node does not expose the requested port.
    #[error("{node} has no `{port}` port")]
    UnknownPort { node: String, port: Port },

    /// A node id that does not belong to the graph (or was never inserted).
    #[error("node {0:?} is not part of this graph")]
    UnknownNode(NodeId),

    /// Connecting the producer would close a loop in the graph.
    #[error("connecting `{producer}` into `{consumer}` would create a cycle")]
    Cycle { consumer: String, producer: String },

    /// The preview grid has no free cell left.
    #[error("preview grid is full ({capacity} cells)")]
    PreviewGridFull { capacity: usize },

    /// The backend could not allocate a render target.
    #[error("failed to create render target `{label}` ({width}x{height}): {reason}")]
    TargetCreation {
        label: String,
        width: u32,
        height: u32,
        reason: String,
    },

    /// The visible surface could not be acquired for this frame.
    #[error("surface unavailable: {0}")]
    Surface(String),

    /// A configuration document could not be parsed.
    #[error("invalid pipeline configuration: {0}")]
    Config(#[from] serde_json::Error),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, PipelineError>;
