//! Headless backend that records commands instead of drawing.
//!
//! This backend doesn't perform any GPU work. It hands out texture handles,
//! tracks which render targets are alive and keeps an ordered log of every
//! call so tests can assert on what the graph actually did.

use std::collections::BTreeMap;

use crate::backend::RenderBackend;
use crate::error::{PipelineError, Result};
use crate::render_graph::{RenderTarget, TargetDescriptor};
use crate::scene::{MeshId, Scene, SceneObject};
use crate::shading::{Color, ScreenQuad, ShaderKind, ShaderParam, TextureHandle};

/// One recorded backend call.
///
/// Calls that draw carry the label of the target they landed in, or `None`
/// for the visible surface.
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    BeginFrame,
    EndFrame,
    CreateTarget { label: String, width: u32, height: u32 },
    DestroyTarget { label: String },
    UseTarget { label: String },
    DisuseTarget { label: String },
    Viewport { width: u32, height: u32 },
    Clear { target: Option<String>, color: Color },
    UseShader(ShaderKind),
    DisuseShader,
    Param(ShaderParam),
    BeginScene,
    BeginObject(String),
    BeginMesh(MeshId),
    DrawMesh {
        target: Option<String>,
        shader: Option<ShaderKind>,
        mesh: MeshId,
    },
    EndMesh(MeshId),
    EndObject(String),
    EndScene,
    DrawQuad { target: Option<String>, quad: ScreenQuad },
}

/// Command-recording backend.
#[derive(Debug)]
pub struct HeadlessBackend {
    width: u32,
    height: u32,
    next_handle: u64,
    /// Live target color handles and their labels.
    live: BTreeMap<TextureHandle, String>,
    bound: Vec<String>,
    shader: Option<ShaderKind>,
    commands: Vec<Command>,
    target_limit: Option<usize>,
    surface_lost: bool,
}

impl HeadlessBackend {
    /// Create a headless backend with the given surface size.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width: width.max(1),
            height: height.max(1),
            next_handle: 1,
            live: BTreeMap::new(),
            bound: Vec::new(),
            shader: None,
            commands: Vec::new(),
            target_limit: None,
            surface_lost: false,
        }
    }

    /// Fail target creation once `limit` targets are alive.
    pub fn with_target_limit(mut self, limit: usize) -> Self {
        self.target_limit = Some(limit);
        self
    }

    /// Changes the live-target limit; `None` removes it.
    pub fn set_target_limit(&mut self, limit: Option<usize>) {
        self.target_limit = limit;
    }

    /// Make `begin_frame` fail until reset.
    pub fn set_surface_lost(&mut self, lost: bool) {
        self.surface_lost = lost;
    }

    /// Registers an externally owned texture, e.g. a decoded background image.
    pub fn register_texture(&mut self) -> TextureHandle {
        self.alloc()
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn clear_commands(&mut self) {
        self.commands.clear();
    }

    /// Number of render targets currently alive.
    pub fn live_targets(&self) -> usize {
        self.live.len()
    }

    pub fn is_live(&self, texture: TextureHandle) -> bool {
        self.live.contains_key(&texture)
    }

    /// Labels of live targets, in allocation order.
    pub fn live_labels(&self) -> Vec<&str> {
        self.live.values().map(String::as_str).collect()
    }

    /// Number of recorded commands matching `pred`.
    pub fn count(&self, pred: impl Fn(&Command) -> bool) -> usize {
        self.commands.iter().filter(|c| pred(c)).count()
    }

    /// Quad draws that landed in the target labelled `label`.
    pub fn quads_into(&self, label: &str) -> usize {
        self.count(|c| {
            matches!(c, Command::DrawQuad { target: Some(t), .. } if t == label)
        })
    }

    /// Quad draws that landed on the visible surface.
    pub fn quads_on_surface(&self) -> Vec<ScreenQuad> {
        self.commands
            .iter()
            .filter_map(|c| match c {
                Command::DrawQuad { target: None, quad } => Some(*quad),
                _ => None,
            })
            .collect()
    }

    /// Mesh draws issued while `shader` was active.
    pub fn mesh_draws_with(&self, shader: ShaderKind) -> usize {
        self.count(|c| matches!(c, Command::DrawMesh { shader: Some(s), .. } if *s == shader))
    }

    fn alloc(&mut self) -> TextureHandle {
        let handle = TextureHandle(self.next_handle);
        self.next_handle += 1;
        handle
    }

    fn current_target(&self) -> Option<String> {
        self.bound.last().cloned()
    }
}

impl RenderBackend for HeadlessBackend {
    fn name(&self) -> &'static str {
        "Headless Backend"
    }

    fn surface_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn resize_surface(&mut self, width: u32, height: u32) {
        self.width = width.max(1);
        self.height = height.max(1);
    }

    fn begin_frame(&mut self) -> Result<()> {
        if self.surface_lost {
            return Err(PipelineError::Surface("headless surface marked lost".into()));
        }
        self.commands.push(Command::BeginFrame);
        Ok(())
    }

    fn end_frame(&mut self) {
        self.commands.push(Command::EndFrame);
    }

    fn create_target(&mut self, desc: &TargetDescriptor) -> Result<RenderTarget> {
        if let Some(limit) = self.target_limit {
            if self.live.len() >= limit {
                return Err(PipelineError::TargetCreation {
                    label: desc.label.clone(),
                    width: desc.width,
                    height: desc.height,
                    reason: format!("headless target limit of {limit} reached"),
                });
            }
        }

        log::trace!(
            "HeadlessBackend: creating target {:?} ({}x{}, depth: {})",
            desc.label,
            desc.width,
            desc.height,
            desc.depth
        );
        let color = self.alloc();
        let depth = desc.depth.then(|| self.alloc());
        self.live.insert(color, desc.label.clone());
        self.commands.push(Command::CreateTarget {
            label: desc.label.clone(),
            width: desc.width,
            height: desc.height,
        });
        Ok(RenderTarget::from_parts(desc, color, depth))
    }

    fn destroy_target(&mut self, target: RenderTarget) {
        log::trace!("HeadlessBackend: destroying target {:?}", target.label());
        self.live.remove(&target.texture());
        self.commands.push(Command::DestroyTarget {
            label: target.label().to_string(),
        });
    }

    fn use_target(&mut self, target: &RenderTarget) {
        self.bound.push(target.label().to_string());
        self.commands.push(Command::UseTarget {
            label: target.label().to_string(),
        });
    }

    fn disuse_target(&mut self, target: &RenderTarget) {
        if let Some(pos) = self.bound.iter().rposition(|l| l == target.label()) {
            self.bound.remove(pos);
        }
        self.commands.push(Command::DisuseTarget {
            label: target.label().to_string(),
        });
    }

    fn set_viewport(&mut self, width: u32, height: u32) {
        self.commands.push(Command::Viewport { width, height });
    }

    fn clear(&mut self, color: Color) {
        let target = self.current_target();
        self.commands.push(Command::Clear { target, color });
    }

    fn use_shader(&mut self, shader: ShaderKind) {
        self.shader = Some(shader);
        self.commands.push(Command::UseShader(shader));
    }

    fn disuse_shader(&mut self) {
        self.shader = None;
        self.commands.push(Command::DisuseShader);
    }

    fn set_param(&mut self, param: ShaderParam) {
        self.commands.push(Command::Param(param));
    }

    fn begin_scene(&mut self, _scene: &Scene) {
        self.commands.push(Command::BeginScene);
    }

    fn begin_object(&mut self, object: &SceneObject) {
        self.commands.push(Command::BeginObject(object.name.clone()));
    }

    fn begin_mesh(&mut self, mesh: MeshId) {
        self.commands.push(Command::BeginMesh(mesh));
    }

    fn draw_mesh(&mut self, mesh: MeshId) {
        let target = self.current_target();
        let shader = self.shader;
        self.commands.push(Command::DrawMesh {
            target,
            shader,
            mesh,
        });
    }

    fn end_mesh(&mut self, mesh: MeshId) {
        self.commands.push(Command::EndMesh(mesh));
    }

    fn end_object(&mut self, object: &SceneObject) {
        self.commands.push(Command::EndObject(object.name.clone()));
    }

    fn end_scene(&mut self, _scene: &Scene) {
        self.commands.push(Command::EndScene);
    }

    fn draw_quad(&mut self, quad: ScreenQuad) {
        let target = self.current_target();
        self.commands.push(Command::DrawQuad { target, quad });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn targets_are_tracked_until_destroyed() {
        let mut backend = HeadlessBackend::new(320, 240);
        let a = backend
            .create_target(&TargetDescriptor::new("a", 32, 32))
            .unwrap();
        let b = backend
            .create_target(&TargetDescriptor::new("b", 16, 16).depth(false))
            .unwrap();
        assert!(a.has_depth());
        assert!(!b.has_depth());
        assert_ne!(a.texture(), b.texture());
        assert_eq!(backend.live_targets(), 2);

        let handle = a.texture();
        backend.destroy_target(a);
        assert!(!backend.is_live(handle));
        assert_eq!(backend.live_labels(), ["b"]);
    }

    #[test]
    fn target_limit_reports_exhaustion() {
        let mut backend = HeadlessBackend::new(64, 64).with_target_limit(1);
        backend
            .create_target(&TargetDescriptor::new("first", 8, 8))
            .unwrap();
        let err = backend
            .create_target(&TargetDescriptor::new("second", 8, 8))
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::TargetCreation { ref label, .. } if label == "second"
        ));
    }

    #[test]
    fn draws_record_bound_target() {
        let mut backend = HeadlessBackend::new(64, 64);
        let target = backend
            .create_target(&TargetDescriptor::new("offscreen", 8, 8))
            .unwrap();
        backend.use_target(&target);
        backend.draw_quad(ScreenQuad::FULL);
        backend.disuse_target(&target);
        backend.draw_quad(ScreenQuad::FULL);

        assert_eq!(backend.quads_into("offscreen"), 1);
        assert_eq!(backend.quads_on_surface().len(), 1);
    }

    #[test]
    fn lost_surface_fails_frame() {
        let mut backend = HeadlessBackend::new(64, 64);
        backend.set_surface_lost(true);
        assert!(matches!(
            backend.begin_frame(),
            Err(PipelineError::Surface(_))
        ));
    }
}
