//! Light-space matrices for shadow mapping.

use glam::{Mat4, Vec3};

use super::bounds::BoundingBox;
use super::lights::{Light, LightKind};

/// Near plane of target-light shadow frusta.
pub const TARGET_SHADOW_NEAR: f32 = 0.1;
/// Far plane of target-light shadow frusta.
pub const TARGET_SHADOW_FAR: f32 = 200.0;

const MIN_EXTENT: f32 = 1e-3;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LightMatrices {
    pub view: Mat4,
    pub projection: Mat4,
}

impl LightMatrices {
    pub fn view_projection(&self) -> Mat4 {
        self.projection * self.view
    }
}

/// Up vector orthogonal to `direction`. Falls back to +Z when the light
/// points (nearly) straight up or down.
pub fn shadow_up_vector(direction: Vec3) -> Vec3 {
    let direction = safe_normalize(direction, Vec3::NEG_Y);
    let up = if direction.dot(Vec3::Y).abs() > 0.999 {
        Vec3::Z
    } else {
        Vec3::Y
    };
    (up - direction * up.dot(direction)).normalize()
}

/// Orthographic light frustum that encloses `bounds` entirely.
///
/// The eye sits one box diagonal behind the box centre along the light
/// direction; the ortho bounds are the light-space box extents with
/// `near = 0` and `far = -min.z`.
pub fn directional_light_matrices(direction: Vec3, bounds: &BoundingBox) -> LightMatrices {
    let direction = safe_normalize(direction, Vec3::NEG_Y);
    let center = bounds.center();
    let diagonal = bounds.diagonal().max(MIN_EXTENT);
    let position = center - direction * diagonal;

    let view = Mat4::look_at_rh(position, center, shadow_up_vector(direction));
    let light_box = bounds.transformed(view);

    let (mut left, mut right) = (light_box.min.x, light_box.max.x);
    let (mut bottom, mut top) = (light_box.min.y, light_box.max.y);
    if right - left < MIN_EXTENT {
        left -= MIN_EXTENT;
        right += MIN_EXTENT;
    }
    if top - bottom < MIN_EXTENT {
        bottom -= MIN_EXTENT;
        top += MIN_EXTENT;
    }
    let near = 0.0;
    let far = (-light_box.min.z).max(near + MIN_EXTENT);

    LightMatrices {
        view,
        projection: Mat4::orthographic_rh(left, right, bottom, top, near, far),
    }
}

/// Square perspective frustum matching the light cone.
pub fn target_light_matrices(position: Vec3, target: Vec3, cone_angle_deg: f32) -> LightMatrices {
    let direction = safe_normalize(target - position, Vec3::NEG_Y);
    let fov = cone_angle_deg
        .to_radians()
        .clamp(0.01, std::f32::consts::PI - 0.01);

    LightMatrices {
        view: Mat4::look_at_rh(position, position + direction, shadow_up_vector(direction)),
        projection: Mat4::perspective_rh(fov, 1.0, TARGET_SHADOW_NEAR, TARGET_SHADOW_FAR),
    }
}

/// Matrices for any shadow-capable light; `None` for point lights.
pub fn light_matrices(light: &Light, scene_bounds: &BoundingBox) -> Option<LightMatrices> {
    match light.kind() {
        LightKind::Directional => Some(directional_light_matrices(light.direction(), scene_bounds)),
        LightKind::Target => Some(target_light_matrices(
            light.position(),
            light.target_point(),
            light.cone_angle_deg,
        )),
        LightKind::Point => None,
    }
}

fn safe_normalize(vec: Vec3, fallback: Vec3) -> Vec3 {
    if vec.length_squared() > 1e-12 {
        vec.normalize()
    } else {
        fallback
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f32 = 1e-4;

    fn assert_in_clip_volume(view_proj: Mat4, point: Vec3) {
        let clip = view_proj * point.extend(1.0);
        assert!(clip.w > 0.0);
        let ndc = clip.truncate() / clip.w;
        assert!(
            ndc.x.abs() <= 1.0 + EPS && ndc.y.abs() <= 1.0 + EPS,
            "{point:?} projects outside xy: {ndc:?}"
        );
        assert!(
            ndc.z >= -EPS && ndc.z <= 1.0 + EPS,
            "{point:?} projects outside depth: {ndc:?}"
        );
    }

    #[test]
    fn up_vector_is_orthogonal_even_for_vertical_lights() {
        for direction in [Vec3::NEG_Y, Vec3::Y, Vec3::new(1.0, -1.0, 0.3)] {
            let up = shadow_up_vector(direction);
            assert!((up.length() - 1.0).abs() < EPS);
            assert!(up.dot(direction.normalize()).abs() < EPS);
        }
    }

    #[test]
    fn target_light_centres_its_target() {
        let matrices = target_light_matrices(Vec3::new(0.0, 10.0, 0.0), Vec3::ZERO, 80.0);
        let clip = matrices.view_projection() * Vec3::ZERO.extend(1.0);
        let ndc = clip.truncate() / clip.w;
        assert!(ndc.x.abs() < EPS && ndc.y.abs() < EPS);
        assert_in_clip_volume(matrices.view_projection(), Vec3::new(3.0, 0.0, 3.0));
    }

    #[test]
    fn directional_frustum_contains_flat_box() {
        let bounds = BoundingBox::new(Vec3::new(-10.0, 0.0, -10.0), Vec3::new(10.0, 0.0, 10.0));
        let matrices = directional_light_matrices(Vec3::NEG_Y, &bounds);
        for corner in bounds.corners() {
            assert_in_clip_volume(matrices.view_projection(), corner);
        }
    }

    #[test]
    fn degenerate_point_box_still_yields_finite_matrices() {
        let bounds = BoundingBox::new(Vec3::ONE, Vec3::ONE);
        let matrices = directional_light_matrices(Vec3::new(0.3, -1.0, 0.2), &bounds);
        assert!(matrices.view_projection().is_finite());
    }

    #[test]
    fn point_lights_have_no_light_matrices() {
        let bounds = BoundingBox::new(Vec3::ZERO, Vec3::ONE);
        assert!(light_matrices(&Light::point(Vec3::ONE), &bounds).is_none());
        assert!(light_matrices(&Light::directional(Vec3::NEG_Y), &bounds).is_some());
    }
}
