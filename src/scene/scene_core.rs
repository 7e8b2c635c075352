use std::sync::Arc;

use super::instance::ModelInstance;
use crate::renderer::{BoundingBox, EnvironmentMap, Light};
use crate::scene::Camera;

/// Everything the renderer reads per frame. The renderer only writes back
/// shadow-map matrices onto [`Light`]s.
pub struct Scene {
    camera: Camera,
    pub lights: Vec<Light>,
    models: Vec<ModelInstance>,
    environment: Option<Arc<EnvironmentMap>>,
    revision: u64,
}

impl Scene {
    pub fn new() -> Self {
        Self {
            camera: Camera::default(),
            lights: Vec::new(),
            models: Vec::new(),
            environment: None,
            revision: 0,
        }
    }

    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    pub fn camera_mut(&mut self) -> &mut Camera {
        &mut self.camera
    }

    pub fn set_camera(&mut self, camera: Camera) {
        self.camera = camera;
    }

    pub fn add_light(&mut self, light: Light) -> usize {
        let index = self.lights.len();
        self.lights.push(light);
        index
    }

    pub fn add_model(&mut self, model: ModelInstance) -> usize {
        let index = self.models.len();
        self.models.push(model);
        self.revision += 1;
        index
    }

    pub fn remove_model(&mut self, index: usize) -> Option<ModelInstance> {
        if index >= self.models.len() {
            return None;
        }
        self.revision += 1;
        Some(self.models.remove(index))
    }

    pub fn clear_models(&mut self) {
        self.models.clear();
        self.revision += 1;
    }

    pub fn models(&self) -> &[ModelInstance] {
        &self.models
    }

    /// Mutable access for per-frame transform updates. Does not count as a
    /// change to the instance list.
    pub fn model_mut(&mut self, index: usize) -> Option<&mut ModelInstance> {
        self.models.get_mut(index)
    }

    /// Bumped whenever the instance list or the environment changes; render
    /// groups are rebuilt when it moves.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn environment(&self) -> Option<&Arc<EnvironmentMap>> {
        self.environment.as_ref()
    }

    pub fn set_environment(&mut self, environment: Option<Arc<EnvironmentMap>>) {
        self.environment = environment;
        self.revision += 1;
    }

    /// World-space union of every instance's transformed local bounds.
    pub fn bounding_box(&self) -> Option<BoundingBox> {
        self.models
            .iter()
            .map(ModelInstance::world_bounds)
            .reduce(|acc, bounds| acc.union(&bounds))
    }
}

impl Default for Scene {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::{primitives, Material, Mesh};
    use glam::{Mat4, Vec3};

    #[test]
    fn bounding_box_unions_transformed_instances() {
        let cube = Mesh::from_data("Cube", &primitives::cube()).unwrap();
        let mut scene = Scene::new();
        assert!(scene.bounding_box().is_none());

        scene.add_model(ModelInstance::new(cube.clone(), Material::default(), Mat4::IDENTITY));
        scene.add_model(ModelInstance::new(
            cube,
            Material::default(),
            Mat4::from_translation(Vec3::new(4.0, 0.0, 0.0)),
        ));

        let bounds = scene.bounding_box().unwrap();
        assert_eq!(bounds.min, Vec3::splat(-0.5));
        assert_eq!(bounds.max, Vec3::new(4.5, 0.5, 0.5));
    }

    #[test]
    fn transform_edits_keep_revision() {
        let cube = Mesh::from_data("Cube", &primitives::cube()).unwrap();
        let mut scene = Scene::new();
        scene.add_model(ModelInstance::new(cube, Material::default(), Mat4::IDENTITY));
        let revision = scene.revision();

        if let Some(model) = scene.model_mut(0) {
            model.transform = Mat4::from_translation(Vec3::Y);
        }
        assert_eq!(scene.revision(), revision);

        scene.remove_model(0);
        assert!(scene.revision() > revision);
        assert!(scene.remove_model(0).is_none());
    }
}
