use glam::{Mat4, Vec3};

/// View and projection for one frame. Whatever drives the camera (input
/// controller, animation, test) hands the renderer these two matrices.
#[derive(Clone, Copy, Debug)]
pub struct Camera {
    view: Mat4,
    projection: Mat4,
    position: Vec3,
}

impl Camera {
    /// Position is recovered from the inverse view matrix.
    pub fn new(view: Mat4, projection: Mat4) -> Self {
        let position = view.inverse().transform_point3(Vec3::ZERO);
        Self {
            view,
            projection,
            position,
        }
    }

    pub fn look_at(eye: Vec3, target: Vec3, fov_y_radians: f32, aspect: f32, near: f32, far: f32) -> Self {
        Self {
            view: Mat4::look_at_rh(eye, target, Vec3::Y),
            projection: Mat4::perspective_rh(fov_y_radians, aspect, near, far),
            position: eye,
        }
    }

    pub fn set_matrices(&mut self, view: Mat4, projection: Mat4) {
        *self = Self::new(view, projection);
    }

    pub fn view(&self) -> Mat4 {
        self.view
    }

    pub fn projection(&self) -> Mat4 {
        self.projection
    }

    pub fn view_proj(&self) -> Mat4 {
        self.projection * self.view
    }

    pub fn position(&self) -> Vec3 {
        self.position
    }
}

impl Default for Camera {
    fn default() -> Self {
        Self::look_at(
            Vec3::new(0.0, 0.0, 3.0),
            Vec3::ZERO,
            60f32.to_radians(),
            16.0 / 9.0,
            0.1,
            100.0,
        )
    }
}
