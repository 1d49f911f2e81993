//! Minimal scene model consumed by the render pipeline.
//!
//! The pipeline only needs an ordered object list, a camera, a light and the
//! redraw flags. Everything else about scene management lives with the host.

use glam::Mat4;

use crate::camera::{Camera, Light};
use crate::shading::{Color, TextureHandle};

/// Type-safe handle to a mesh uploaded by the host renderer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MeshId(pub usize);

/// What an object represents in the scene.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    #[default]
    Generic,
    Camera,
    Light,
}

/// A node of the scene tree.
#[derive(Clone, Debug)]
pub struct SceneObject {
    pub name: String,
    pub kind: ObjectKind,
    pub visible: bool,
    pub cast_shadow: bool,
    pub transform: Mat4,
    pub meshes: Vec<MeshId>,
    pub children: Vec<SceneObject>,
}

impl SceneObject {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ObjectKind::Generic,
            visible: true,
            cast_shadow: true,
            transform: Mat4::IDENTITY,
            meshes: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn kind(mut self, kind: ObjectKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn mesh(mut self, mesh: MeshId) -> Self {
        self.meshes.push(mesh);
        self
    }

    pub fn child(mut self, child: SceneObject) -> Self {
        self.children.push(child);
        self
    }

    pub fn transform(mut self, transform: Mat4) -> Self {
        self.transform = transform;
        self
    }

    pub fn visible(mut self, visible: bool) -> Self {
        self.visible = visible;
        self
    }

    pub fn cast_shadow(mut self, cast_shadow: bool) -> Self {
        self.cast_shadow = cast_shadow;
        self
    }
}

/// What is drawn behind the scene objects.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Background {
    Color(Color),
    Texture(TextureHandle),
}

impl Default for Background {
    fn default() -> Self {
        Background::Color(Color::rgb(0.93, 0.93, 0.93))
    }
}

/// The renderable scene plus the flags the renderer polls every tick.
#[derive(Clone, Debug, Default)]
pub struct Scene {
    pub objects: Vec<SceneObject>,
    pub camera: Camera,
    pub light: Light,
    pub background: Background,
    /// Set by the host when shadow casters moved. Consumed by the shadow cache.
    pub shadow_map_update_requested: bool,
    /// Set when the next tick should produce a frame.
    pub update_requested: bool,
    /// While true every tick produces a frame.
    pub animating: bool,
}

impl Scene {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, object: SceneObject) {
        self.objects.push(object);
        self.request_update_frame();
        self.request_shadow_map_update();
    }

    pub fn request_update_frame(&mut self) {
        self.update_requested = true;
    }

    pub fn request_shadow_map_update(&mut self) {
        self.shadow_map_update_requested = true;
    }

    /// Returns whether a shadow update was pending and clears the flag.
    pub fn take_shadow_map_update(&mut self) -> bool {
        std::mem::take(&mut self.shadow_map_update_requested)
    }
}
