use glam::{Mat4, Vec3};

/// A perspective camera for 3D scenes.
///
/// Provides position, look target, and field of view.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Camera {
    pub position: Vec3,
    pub target: Vec3,
    pub up: Vec3,
    pub fov: f32, // radians
    pub near: f32,
    pub far: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            position: Vec3::new(0.0, 0.0, 5.0),
            target: Vec3::ZERO,
            up: Vec3::Y,
            fov: 45f32.to_radians(),
            near: 0.1,
            far: 1000.0,
        }
    }
}

impl Camera {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn at(mut self, x: f32, y: f32, z: f32) -> Self {
        self.position = Vec3::new(x, y, z);
        self
    }

    pub fn looking_at(mut self, target_x: f32, target_y: f32, target_z: f32) -> Self {
        self.target = Vec3::new(target_x, target_y, target_z);
        self
    }

    pub fn with_fov(mut self, fov_degrees: f32) -> Self {
        self.fov = fov_degrees.to_radians();
        self
    }

    pub fn forward(&self) -> Vec3 {
        (self.target - self.position).normalize_or_zero()
    }

    /// Compute the right vector from forward and up.
    pub fn right(&self) -> Vec3 {
        self.forward().cross(self.up).normalize_or_zero()
    }

    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_at_rh(self.position, self.target, self.up)
    }

    pub fn projection_matrix(&self, aspect: f32) -> Mat4 {
        Mat4::perspective_rh(self.fov, aspect.max(f32::EPSILON), self.near, self.far)
    }

    /// Combined projection * view.
    pub fn view_projection(&self, aspect: f32) -> Mat4 {
        self.projection_matrix(aspect) * self.view_matrix()
    }
}

/// Directional light used for scene shading and shadow mapping.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Light {
    pub position: Vec3,
    pub target: Vec3,
    pub intensity: f32,
    /// Half extent of the orthographic shadow frustum.
    pub shadow_extent: f32,
}

impl Default for Light {
    fn default() -> Self {
        Self {
            position: Vec3::new(10.0, 20.0, 10.0),
            target: Vec3::ZERO,
            intensity: 1.0,
            shadow_extent: 20.0,
        }
    }
}

impl Light {
    pub fn direction(&self) -> Vec3 {
        (self.target - self.position).normalize_or_zero()
    }

    /// Light-space matrix used when rendering and sampling the shadow map.
    pub fn view_projection(&self) -> Mat4 {
        let e = self.shadow_extent;
        let up = if self.direction().abs_diff_eq(Vec3::NEG_Y, 1e-4)
            || self.direction().abs_diff_eq(Vec3::Y, 1e-4)
        {
            Vec3::Z
        } else {
            Vec3::Y
        };
        let view = Mat4::look_at_rh(self.position, self.target, up);
        let depth = self.position.distance(self.target) + e;
        Mat4::orthographic_rh(-e, e, -e, e, 0.1, depth * 2.0) * view
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_sets_position_and_fov() {
        let cam = Camera::new().at(1.0, 2.0, 3.0).with_fov(90.0);
        assert_eq!(cam.position, Vec3::new(1.0, 2.0, 3.0));
        assert!((cam.fov - std::f32::consts::FRAC_PI_2).abs() < 1e-6);
    }

    #[test]
    fn right_is_orthogonal_to_forward() {
        let cam = Camera::new().at(0.0, 0.0, 5.0).looking_at(0.0, 0.0, 0.0);
        assert!(cam.forward().dot(cam.right()).abs() < 1e-6);
        assert!((cam.right() - Vec3::X).length() < 1e-6);
    }

    #[test]
    fn overhead_light_still_has_finite_matrix() {
        let light = Light {
            position: Vec3::new(0.0, 10.0, 0.0),
            ..Light::default()
        };
        assert!(light.view_projection().is_finite());
    }
}
