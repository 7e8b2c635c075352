use std::sync::Arc;

use glam::Mat4;

use crate::renderer::{BoundingBox, Material, Mesh};

/// One placed copy of a mesh. The mesh and material are fixed at
/// construction; the transform may change every frame.
#[derive(Debug, Clone)]
pub struct ModelInstance {
    mesh: Arc<Mesh>,
    material: Material,
    pub transform: Mat4,
}

impl ModelInstance {
    pub fn new(mesh: Arc<Mesh>, material: impl Into<Material>, transform: Mat4) -> Self {
        Self {
            mesh,
            material: material.into(),
            transform,
        }
    }

    pub fn mesh(&self) -> &Arc<Mesh> {
        &self.mesh
    }

    pub fn material(&self) -> &Material {
        &self.material
    }

    pub fn world_bounds(&self) -> BoundingBox {
        self.mesh.bounds().transformed(self.transform)
    }
}
