use glam::Vec3;
use std::f32::consts::PI;

use super::bounds::BoundingBox;
use super::vertex::{v, TangentFrame, Vertex};

/// CPU-side geometry: interleaved vertices, a parallel tangent stream and
/// counter-clockwise triangle indices.
#[derive(Debug, Clone, Default)]
pub struct MeshData {
    pub vertices: Vec<Vertex>,
    pub tangents: Vec<TangentFrame>,
    pub indices: Vec<u32>,
}

impl MeshData {
    pub fn bounds(&self) -> Option<BoundingBox> {
        BoundingBox::from_points(self.vertices.iter().map(|vertex| Vec3::from(vertex.pos)))
    }

    fn push(&mut self, vertex: Vertex, tangent: Vec3, bitangent: Vec3) {
        self.vertices.push(vertex);
        self.tangents.push(TangentFrame {
            tangent: tangent.to_array(),
            bitangent: bitangent.to_array(),
        });
    }

    /// Appends a unit quad facing `normal`, centred at `normal * offset`.
    /// `tangent` is the +u direction.
    fn push_quad(&mut self, normal: Vec3, tangent: Vec3, offset: f32, half_extent: f32) {
        let base = self.vertices.len() as u32;
        // n x t keeps the winding counter-clockwise seen from the normal side.
        let side = normal.cross(tangent);
        let center = normal * offset;
        let corners = [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)];

        for (s, t) in corners {
            let pos = center + (tangent * s + side * t) * half_extent;
            let uv = [0.5 + s * 0.5, 0.5 - t * 0.5];
            self.push(v(pos.to_array(), normal.to_array(), uv), tangent, -side);
        }

        self.indices
            .extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
    }
}

/// Unit cube centred on the origin.
pub fn cube() -> MeshData {
    let faces = [
        (Vec3::X, Vec3::NEG_Z),
        (Vec3::NEG_X, Vec3::Z),
        (Vec3::Y, Vec3::X),
        (Vec3::NEG_Y, Vec3::X),
        (Vec3::Z, Vec3::X),
        (Vec3::NEG_Z, Vec3::NEG_X),
    ];

    let mut mesh = MeshData::default();
    for (normal, tangent) in faces {
        mesh.push_quad(normal, tangent, 0.5, 0.5);
    }
    mesh
}

/// `size` x `size` plane in XZ facing +Y.
pub fn plane(size: f32) -> MeshData {
    let mut mesh = MeshData::default();
    mesh.push_quad(Vec3::Y, Vec3::X, 0.0, size * 0.5);
    mesh
}

/// Unit-radius UV sphere.
pub fn sphere(segments: u32, rings: u32) -> MeshData {
    let segments = segments.max(3);
    let rings = rings.max(2);
    let mut mesh = MeshData::default();

    for ring in 0..=rings {
        let phi = PI * ring as f32 / rings as f32;
        let (sin_phi, cos_phi) = phi.sin_cos();

        for segment in 0..=segments {
            let theta = 2.0 * PI * segment as f32 / segments as f32;
            let (sin_theta, cos_theta) = theta.sin_cos();

            let normal = Vec3::new(sin_phi * cos_theta, cos_phi, sin_phi * sin_theta);
            let uv = [
                segment as f32 / segments as f32,
                ring as f32 / rings as f32,
            ];

            let tangent = Vec3::new(-sin_theta, 0.0, cos_theta);
            let bitangent = Vec3::new(cos_phi * cos_theta, -sin_phi, cos_phi * sin_theta);
            mesh.push(
                v(normal.to_array(), normal.to_array(), uv),
                tangent,
                bitangent,
            );
        }
    }

    for ring in 0..rings {
        for segment in 0..segments {
            let current = ring * (segments + 1) + segment;
            let next = current + segments + 1;

            mesh.indices
                .extend_from_slice(&[current, current + 1, next, current + 1, next + 1, next]);
        }
    }

    mesh
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_outward_winding(mesh: &MeshData) {
        for tri in mesh.indices.chunks(3) {
            let [a, b, c] = [tri[0], tri[1], tri[2]].map(|i| Vec3::from(mesh.vertices[i as usize].pos));
            let face_normal = (b - a).cross(c - a);
            if face_normal.length_squared() < 1e-12 {
                continue;
            }
            let centroid = (a + b + c) / 3.0;
            assert!(face_normal.dot(centroid) > 0.0, "inward-facing triangle {:?}", tri);
        }
    }

    #[test]
    fn cube_is_24_vertices_36_indices() {
        let mesh = cube();
        assert_eq!(mesh.vertices.len(), 24);
        assert_eq!(mesh.tangents.len(), 24);
        assert_eq!(mesh.indices.len(), 36);

        let bounds = mesh.bounds().unwrap();
        assert_eq!(bounds.min, Vec3::splat(-0.5));
        assert_eq!(bounds.max, Vec3::splat(0.5));
    }

    #[test]
    fn cube_and_sphere_wind_counter_clockwise_outward() {
        assert_outward_winding(&cube());
        assert_outward_winding(&sphere(16, 8));
    }

    #[test]
    fn tangent_frames_are_orthogonal_to_normals() {
        let mesh = cube();
        for (vertex, frame) in mesh.vertices.iter().zip(&mesh.tangents) {
            let n = Vec3::from(vertex.normal);
            assert!(n.dot(Vec3::from(frame.tangent)).abs() < 1e-6);
            assert!(n.dot(Vec3::from(frame.bitangent)).abs() < 1e-6);
        }
    }

    #[test]
    fn plane_faces_up() {
        let mesh = plane(4.0);
        assert!(mesh.vertices.iter().all(|v| v.normal == [0.0, 1.0, 0.0]));
        let bounds = mesh.bounds().unwrap();
        assert_eq!(bounds.max.x, 2.0);
    }
}
