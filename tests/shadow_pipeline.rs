use glam::{Mat4, Vec3};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use wgpu_instanced::renderer::internal::shadows::shadow_casters;
use wgpu_instanced::renderer::shadow_math::{
    directional_light_matrices, light_matrices, shadow_up_vector, target_light_matrices,
};
use wgpu_instanced::{BoundingBox, Light};

const EPSILON: f32 = 1e-4;

/// Same mapping the material shader uses before the comparison lookup.
fn project_shadow_cpu(matrix: Mat4, world_pos: Vec3) -> Vec3 {
    let clip = matrix * world_pos.extend(1.0);
    if clip.w <= 0.0 {
        return Vec3::splat(-1.0);
    }
    let ndc = clip.truncate() / clip.w;
    Vec3::new(ndc.x * 0.5 + 0.5, -ndc.y * 0.5 + 0.5, ndc.z)
}

fn compute_ndc(matrix: Mat4, world_pos: Vec3) -> Vec3 {
    let clip = matrix * world_pos.extend(1.0);
    clip.truncate() / clip.w
}

fn assert_in_shadow_map(projected: Vec3) {
    assert!(projected.x >= -EPSILON && projected.x <= 1.0 + EPSILON, "{projected:?}");
    assert!(projected.y >= -EPSILON && projected.y <= 1.0 + EPSILON, "{projected:?}");
    assert!(projected.z >= -EPSILON && projected.z <= 1.0 + EPSILON, "{projected:?}");
}

fn random_box(rng: &mut SmallRng) -> BoundingBox {
    let a = Vec3::new(
        rng.gen_range(-50.0..50.0),
        rng.gen_range(-50.0..50.0),
        rng.gen_range(-50.0..50.0),
    );
    let extent = Vec3::new(
        rng.gen_range(0.01..30.0),
        rng.gen_range(0.01..30.0),
        rng.gen_range(0.01..30.0),
    );
    BoundingBox::new(a, a + extent)
}

fn random_direction(rng: &mut SmallRng) -> Vec3 {
    loop {
        let d = Vec3::new(
            rng.gen_range(-1.0..1.0),
            rng.gen_range(-1.0..1.0),
            rng.gen_range(-1.0..1.0),
        );
        if d.length_squared() > 0.01 {
            return d.normalize();
        }
    }
}

#[test]
fn directional_frustum_contains_every_bounding_box_corner() {
    let mut rng = SmallRng::seed_from_u64(7);
    for _ in 0..200 {
        let bounds = random_box(&mut rng);
        let direction = random_direction(&mut rng);
        let view_proj = directional_light_matrices(direction, &bounds).view_projection();

        for corner in bounds.corners() {
            assert_in_shadow_map(project_shadow_cpu(view_proj, corner));
        }
    }
}

#[test]
fn directional_frustum_survives_straight_down_light() {
    let bounds = BoundingBox::new(Vec3::new(-5.0, 0.0, -5.0), Vec3::new(5.0, 2.0, 5.0));
    assert!(shadow_up_vector(Vec3::NEG_Y).abs_diff_eq(Vec3::Z, EPSILON));

    let matrices = directional_light_matrices(Vec3::NEG_Y, &bounds);
    assert!(matrices.view.is_finite() && matrices.projection.is_finite());
    for corner in bounds.corners() {
        assert_in_shadow_map(project_shadow_cpu(matrices.view_projection(), corner));
    }
}

#[test]
fn flat_scene_still_gets_a_valid_frustum() {
    let bounds = BoundingBox::new(Vec3::new(-10.0, 0.0, -10.0), Vec3::new(10.0, 0.0, 10.0));
    let view_proj = directional_light_matrices(Vec3::new(0.3, -1.0, 0.2), &bounds).view_projection();
    assert!(view_proj.is_finite());
    assert_in_shadow_map(project_shadow_cpu(view_proj, Vec3::ZERO));
}

#[test]
fn shadow_texture_axis_is_flipped_from_clip_space() {
    let bounds = BoundingBox::new(Vec3::splat(-5.0), Vec3::splat(5.0));
    let direction = Vec3::NEG_Y;
    let view_proj = directional_light_matrices(direction, &bounds).view_projection();
    let up = shadow_up_vector(direction);

    let top_world = up * 4.0;
    let bottom_world = -up * 4.0;

    let ndc_top = compute_ndc(view_proj, top_world);
    let ndc_bottom = compute_ndc(view_proj, bottom_world);
    assert!(ndc_top.y > ndc_bottom.y);

    let tex_top = project_shadow_cpu(view_proj, top_world);
    let tex_bottom = project_shadow_cpu(view_proj, bottom_world);
    assert!(tex_top.y < tex_bottom.y);
    assert!((tex_top.z - ndc_top.z).abs() < EPSILON);
}

#[test]
fn target_shadow_projection_rejects_points_behind_light() {
    let view_proj = target_light_matrices(Vec3::new(0.0, 10.0, 0.0), Vec3::ZERO, 60.0).view_projection();

    let behind_light = Vec3::new(0.0, 15.0, 0.0);
    assert!((view_proj * behind_light.extend(1.0)).w <= 0.0);
    assert_eq!(project_shadow_cpu(view_proj, behind_light), Vec3::splat(-1.0));

    assert_in_shadow_map(project_shadow_cpu(view_proj, Vec3::ZERO));
}

#[test]
fn target_frustum_matches_cone_angle() {
    let position = Vec3::new(0.0, 5.0, 0.0);
    let view_proj = target_light_matrices(position, Vec3::ZERO, 80.0).view_projection();

    // A point just inside the 40 degree half angle lands inside the map,
    // one just outside does not.
    let inside = Vec3::new((39f32).to_radians().tan() * 5.0, 0.0, 0.0);
    let outside = Vec3::new((41f32).to_radians().tan() * 5.0, 0.0, 0.0);
    assert_in_shadow_map(project_shadow_cpu(view_proj, inside));
    let projected = project_shadow_cpu(view_proj, outside);
    assert!(projected.x < 0.0 || projected.x > 1.0 || projected.y < 0.0 || projected.y > 1.0);
}

#[test]
fn only_directional_and_target_lights_get_layers() {
    let lights = vec![
        Light::target(Vec3::new(0.0, 5.0, 0.0), Vec3::ZERO, 80.0).with_shadow(),
        Light::directional(Vec3::new(0.0, -1.0, 0.3)).with_shadow(),
        Light::point(Vec3::new(1.0, 2.0, 3.0)).with_shadow(),
    ];
    assert_eq!(shadow_casters(&lights), vec![0, 1]);

    let bounds = BoundingBox::new(Vec3::splat(-1.0), Vec3::splat(1.0));
    assert!(light_matrices(&lights[0], &bounds).is_some());
    assert!(light_matrices(&lights[1], &bounds).is_some());
    assert!(light_matrices(&lights[2], &bounds).is_none());
}
