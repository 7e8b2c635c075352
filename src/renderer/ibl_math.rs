//! CPU reference for the image-based lighting precomputation.
//!
//! The GPU shaders implement the same integrals; these functions are used to
//! check them and to document the conventions (cube face orientation, the
//! irradiance scale, split-sum LUT layout).

use std::f32::consts::PI;

use glam::{Mat3, Mat4, Vec2, Vec3};

/// Irradiance values are stored pre-divided by pi, so a constant
/// environment of radiance `c` convolves to `c`.
pub const SH_BAND_WEIGHTS: [f32; 3] = [1.0, 2.0 / 3.0, 0.25];

/// Direction through texel coordinate `(u, v)` in `[-1, 1]` of a cube
/// face, `v` pointing down the image. Faces are +X, -X, +Y, -Y, +Z, -Z.
pub fn cube_face_direction(face: u32, u: f32, v: f32) -> Vec3 {
    match face {
        0 => Vec3::new(1.0, -v, -u),
        1 => Vec3::new(-1.0, -v, u),
        2 => Vec3::new(u, 1.0, v),
        3 => Vec3::new(u, -1.0, -v),
        4 => Vec3::new(u, -v, 1.0),
        _ => Vec3::new(-u, -v, -1.0),
    }
}

/// View matrix rendering cube face `face` with a 90 degree frustum: a
/// direction through face texel `(u, v)` lands on NDC `(u, -v)`.
pub fn cube_face_view(face: u32) -> Mat4 {
    let forward = cube_face_direction(face, 0.0, 0.0);
    let right = cube_face_direction(face, 1.0, 0.0) - forward;
    let up = forward - cube_face_direction(face, 0.0, 1.0);
    Mat4::from_mat3(Mat3::from_cols(right, up, -forward).transpose())
}

pub fn cube_face_projection() -> Mat4 {
    Mat4::perspective_rh(std::f32::consts::FRAC_PI_2, 1.0, 0.1, 10.0)
}

/// Solid angle of the texel centred at `(u, v)` on a `size` x `size` face.
pub fn texel_solid_angle(u: f32, v: f32, size: u32) -> f32 {
    let texel = 2.0 / size as f32;
    texel * texel / (1.0 + u * u + v * v).powf(1.5)
}

/// Roughness assigned to prefiltered mip `mip` of `mip_count`.
pub fn prefilter_roughness(mip: u32, mip_count: u32) -> f32 {
    if mip_count <= 1 {
        0.0
    } else {
        mip as f32 / (mip_count - 1) as f32
    }
}

pub fn mip_size(base: u32, mip: u32) -> u32 {
    (base >> mip).max(1)
}

pub fn radical_inverse_vdc(bits: u32) -> f32 {
    bits.reverse_bits() as f32 * 2.328_306_4e-10
}

pub fn hammersley(i: u32, n: u32) -> Vec2 {
    Vec2::new(i as f32 / n as f32, radical_inverse_vdc(i))
}

/// GGX-distributed half vector around `n`.
pub fn importance_sample_ggx(xi: Vec2, n: Vec3, roughness: f32) -> Vec3 {
    let a = roughness * roughness;

    let phi = 2.0 * PI * xi.x;
    let cos_theta = ((1.0 - xi.y) / (1.0 + (a * a - 1.0) * xi.y)).sqrt();
    let sin_theta = (1.0 - cos_theta * cos_theta).max(0.0).sqrt();
    let h = Vec3::new(phi.cos() * sin_theta, phi.sin() * sin_theta, cos_theta);

    let up = if n.z.abs() < 0.999 { Vec3::Z } else { Vec3::X };
    let tangent = up.cross(n).normalize();
    let bitangent = n.cross(tangent);

    (tangent * h.x + bitangent * h.y + n * h.z).normalize()
}

/// GGX normal distribution function.
pub fn distribution_ggx(n_dot_h: f32, roughness: f32) -> f32 {
    let a = roughness * roughness;
    let a2 = a * a;
    let denom = n_dot_h * n_dot_h * (a2 - 1.0) + 1.0;
    a2 / (PI * denom * denom).max(f32::MIN_POSITIVE)
}

/// Source mip to read for one prefilter sample, from the ratio of the
/// sample's solid angle to a texel's. With N = V the sample pdf is D / 4.
pub fn prefilter_source_lod(n_dot_h: f32, roughness: f32, sample_count: u32, face_size: u32) -> f32 {
    if roughness <= 0.0 {
        return 0.0;
    }
    let pdf = distribution_ggx(n_dot_h, roughness) / 4.0 + 1e-4;
    let texel = 4.0 * PI / (6.0 * (face_size * face_size) as f32);
    let sample = 1.0 / (sample_count.max(1) as f32 * pdf + 1e-4);
    (0.5 * (sample / texel).log2()).max(0.0)
}

fn geometry_schlick_ggx(n_dot_v: f32, roughness: f32) -> f32 {
    let k = roughness * roughness / 2.0;
    n_dot_v / (n_dot_v * (1.0 - k) + k)
}

fn geometry_smith(n_dot_v: f32, n_dot_l: f32, roughness: f32) -> f32 {
    geometry_schlick_ggx(n_dot_v, roughness) * geometry_schlick_ggx(n_dot_l, roughness)
}

/// Split-sum BRDF integral: `(scale, bias)` applied to F0.
pub fn integrate_brdf(n_dot_v: f32, roughness: f32, sample_count: u32) -> Vec2 {
    let n_dot_v = n_dot_v.clamp(1e-4, 1.0);
    let v = Vec3::new((1.0 - n_dot_v * n_dot_v).sqrt(), 0.0, n_dot_v);
    let n = Vec3::Z;

    let mut scale = 0.0;
    let mut bias = 0.0;
    for i in 0..sample_count {
        let h = importance_sample_ggx(hammersley(i, sample_count), n, roughness);
        let l = (2.0 * v.dot(h) * h - v).normalize();

        let n_dot_l = l.z.max(0.0);
        if n_dot_l > 0.0 {
            let n_dot_h = h.z.max(1e-4);
            let v_dot_h = v.dot(h).max(0.0);

            let g = geometry_smith(n_dot_v, n_dot_l, roughness);
            let g_vis = g * v_dot_h / (n_dot_h * n_dot_v);
            let fc = (1.0 - v_dot_h).powi(5);

            scale += (1.0 - fc) * g_vis;
            bias += fc * g_vis;
        }
    }

    Vec2::new(scale, bias) / sample_count.max(1) as f32
}

/// Real spherical-harmonic basis up to band 2, evaluated at unit `dir`.
pub fn sh9_basis(dir: Vec3) -> [f32; 9] {
    let (x, y, z) = (dir.x, dir.y, dir.z);
    [
        0.282_095,
        0.488_603 * y,
        0.488_603 * z,
        0.488_603 * x,
        1.092_548 * x * y,
        1.092_548 * y * z,
        0.315_392 * (3.0 * z * z - 1.0),
        1.092_548 * x * z,
        0.546_274 * (x * x - y * y),
    ]
}

/// Projects weighted radiance samples `(direction, radiance, solid_angle)`
/// onto 9 coefficients. Weights are renormalised to cover the full sphere.
pub fn project_sh9(samples: impl IntoIterator<Item = (Vec3, Vec3, f32)>) -> [Vec3; 9] {
    let mut coefficients = [Vec3::ZERO; 9];
    let mut total_weight = 0.0;

    for (dir, radiance, weight) in samples {
        let basis = sh9_basis(dir.normalize());
        for (coefficient, b) in coefficients.iter_mut().zip(basis) {
            *coefficient += radiance * b * weight;
        }
        total_weight += weight;
    }

    if total_weight > 0.0 {
        let norm = 4.0 * PI / total_weight;
        for coefficient in &mut coefficients {
            *coefficient *= norm;
        }
    }
    coefficients
}

/// Cosine-convolved irradiance (divided by pi) at `normal`.
pub fn sh9_irradiance(coefficients: &[Vec3; 9], normal: Vec3) -> Vec3 {
    let basis = sh9_basis(normal.normalize());
    let band = |index: usize| match index {
        0 => SH_BAND_WEIGHTS[0],
        1..=3 => SH_BAND_WEIGHTS[1],
        _ => SH_BAND_WEIGHTS[2],
    };

    coefficients
        .iter()
        .zip(basis)
        .enumerate()
        .fold(Vec3::ZERO, |sum, (index, (coefficient, b))| {
            sum + *coefficient * b * band(index)
        })
        .max(Vec3::ZERO)
}

/// Hemisphere integral by nested angle stepping. Slow; the reference the
/// SH path is checked against.
pub fn irradiance_brute_force(normal: Vec3, sample_delta: f32, environment: impl Fn(Vec3) -> Vec3) -> Vec3 {
    let normal = normal.normalize();
    let up = if normal.y.abs() < 0.999 { Vec3::Y } else { Vec3::X };
    let right = up.cross(normal).normalize();
    let up = normal.cross(right);

    let mut irradiance = Vec3::ZERO;
    let mut sample_count = 0u32;

    let mut phi = 0.0f32;
    while phi < 2.0 * PI {
        let mut theta = 0.0f32;
        while theta < 0.5 * PI {
            let tangent_sample = Vec3::new(theta.sin() * phi.cos(), theta.sin() * phi.sin(), theta.cos());
            let sample = tangent_sample.x * right + tangent_sample.y * up + tangent_sample.z * normal;

            irradiance += environment(sample) * theta.cos() * theta.sin();
            sample_count += 1;
            theta += sample_delta;
        }
        phi += sample_delta;
    }

    PI * irradiance / sample_count.max(1) as f32
}

/// Samples `environment` at every texel centre of a `size`-texel cube.
pub fn cube_samples(size: u32, environment: impl Fn(Vec3) -> Vec3) -> Vec<(Vec3, Vec3, f32)> {
    let mut samples = Vec::with_capacity((size * size * 6) as usize);
    for face in 0..6 {
        for y in 0..size {
            for x in 0..size {
                let u = (x as f32 + 0.5) / size as f32 * 2.0 - 1.0;
                let v = (y as f32 + 0.5) / size as f32 * 2.0 - 1.0;
                let dir = cube_face_direction(face, u, v).normalize();
                samples.push((dir, environment(dir), texel_solid_angle(u, v, size)));
            }
        }
    }
    samples
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mirror_brdf_is_pure_scale() {
        let lut = integrate_brdf(1.0, 0.0, 1024);
        assert!((lut.x - 1.0).abs() < 0.05, "scale {}", lut.x);
        assert!(lut.y.abs() < 0.05, "bias {}", lut.y);
    }

    #[test]
    fn brdf_terms_stay_in_unit_range() {
        for &(n_dot_v, roughness) in &[(0.1, 0.9), (0.5, 0.5), (0.9, 0.2)] {
            let lut = integrate_brdf(n_dot_v, roughness, 256);
            assert!(lut.x >= 0.0 && lut.y >= 0.0 && lut.x + lut.y <= 1.0 + 1e-3, "{lut:?}");
        }
    }

    #[test]
    fn hammersley_stays_in_unit_square() {
        for i in 0..64 {
            let p = hammersley(i, 64);
            assert!((0.0..1.0).contains(&p.x) && (0.0..1.0).contains(&p.y));
        }
        assert_eq!(radical_inverse_vdc(1), 0.5);
    }

    #[test]
    fn ggx_with_zero_roughness_returns_normal() {
        let n = Vec3::new(0.0, 1.0, 0.0);
        let h = importance_sample_ggx(hammersley(5, 16), n, 0.0);
        assert!(h.abs_diff_eq(n, 1e-5));
    }

    #[test]
    fn cube_face_views_map_texels_to_ndc() {
        let view_proj = |face| cube_face_projection() * cube_face_view(face);
        for face in 0..6 {
            for &(u, v) in &[(0.0, 0.0), (0.5, -0.25), (-0.8, 0.6)] {
                let clip = view_proj(face) * cube_face_direction(face, u, v).extend(1.0);
                assert!(clip.w > 0.0);
                let ndc = clip.truncate() / clip.w;
                assert!((ndc.x - u).abs() < 1e-5, "face {face}: {ndc:?}");
                assert!((ndc.y + v).abs() < 1e-5, "face {face}: {ndc:?}");
                assert!((0.0..=1.0).contains(&ndc.z));
            }
        }
    }

    #[test]
    fn texel_solid_angles_cover_the_sphere() {
        let samples = cube_samples(32, |_| Vec3::ONE);
        let total: f32 = samples.iter().map(|(_, _, w)| w).sum();
        assert!((total - 4.0 * PI).abs() < 0.05, "{total}");
    }

    #[test]
    fn constant_environment_convolves_to_itself() {
        let color = Vec3::new(0.2, 0.5, 1.0);
        let sh = project_sh9(cube_samples(16, |_| color));
        let irradiance = sh9_irradiance(&sh, Vec3::new(0.3, 0.8, -0.1));
        assert!(irradiance.abs_diff_eq(color, 1e-3), "{irradiance:?}");

        let brute = irradiance_brute_force(Vec3::Y, 0.05, |_| color);
        assert!(brute.abs_diff_eq(color, 0.05), "{brute:?}");
    }

    #[test]
    fn sh_irradiance_matches_brute_force_on_sky_gradient() {
        let sky = |dir: Vec3| Vec3::splat(1.0 + 0.5 * dir.y);
        let sh = project_sh9(cube_samples(16, sky));

        for normal in [Vec3::Y, Vec3::NEG_Y, Vec3::X, Vec3::new(0.5, 0.5, 0.7)] {
            let from_sh = sh9_irradiance(&sh, normal);
            let brute = irradiance_brute_force(normal, 0.05, sky);
            assert!(
                from_sh.abs_diff_eq(brute, 0.06),
                "{normal:?}: sh {from_sh:?} vs brute {brute:?}"
            );
        }
    }

    #[test]
    fn prefilter_lod_grows_with_roughness() {
        assert_eq!(prefilter_source_lod(1.0, 0.0, 64, 512), 0.0);

        // Sampled at the lobe centre, a sharp lobe stays on the base mip.
        let sharp = prefilter_source_lod(1.0, 0.05, 256, 512);
        let rough = prefilter_source_lod(0.7, 1.0, 256, 512);
        assert!(sharp < 0.5, "sharp {sharp}");
        assert!(rough > 3.0, "rough {rough}");

        // More samples or a smaller face read finer mips.
        assert!(prefilter_source_lod(0.7, 1.0, 1024, 512) < rough);
        assert!(prefilter_source_lod(0.7, 1.0, 256, 64) < rough);
    }

    #[test]
    fn prefilter_roughness_spans_mips() {
        assert_eq!(prefilter_roughness(0, 5), 0.0);
        assert_eq!(prefilter_roughness(4, 5), 1.0);
        assert_eq!(prefilter_roughness(0, 1), 0.0);
        assert_eq!(mip_size(512, 4), 32);
        assert_eq!(mip_size(4, 5), 1);
    }
}
