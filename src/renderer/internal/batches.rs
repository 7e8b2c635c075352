use std::sync::Arc;

use rayon::prelude::*;

use crate::error::{RenderError, Result};
use crate::renderer::batch::{GroupKey, InstanceGroup};
use crate::renderer::internal::bindings::CachedBindGroup;
use crate::renderer::internal::buffers::{BufferWrite, GpuBuffer};
use crate::renderer::internal::context::RenderContext;
use crate::renderer::internal::materials::MaterialGpu;
use crate::renderer::internal::pipeline::MaterialPipeline;
use crate::renderer::mesh::Mesh;
use crate::renderer::vertex::InstanceRaw;
use crate::scene::ModelInstance;

const INSTANCE_STRIDE: u64 = std::mem::size_of::<InstanceRaw>() as u64;

/// An [`InstanceGroup`] with its instance storage buffer and cached bind
/// groups. Rebuilt from scratch whenever the scene's instance list changes.
pub struct RenderGroup {
    key: GroupKey,
    mesh: Arc<Mesh>,
    instances: Vec<usize>,
    instance_buffer: GpuBuffer,
    scene_bind_group: CachedBindGroup,
    shadow_bind_group: CachedBindGroup,
    pub(crate) pipeline: Option<Arc<MaterialPipeline>>,
    pub(crate) material: Option<Arc<MaterialGpu>>,
}

impl RenderGroup {
    pub fn from_group(group: InstanceGroup) -> Self {
        let capacity = group.instances.len() as u64 * INSTANCE_STRIDE;
        Self {
            instance_buffer: GpuBuffer::new_dynamic(
                format!("{}Instances", group.mesh.label()),
                wgpu::BufferUsages::STORAGE,
                capacity,
            ),
            key: group.key,
            mesh: group.mesh,
            instances: group.instances,
            scene_bind_group: CachedBindGroup::new(),
            shadow_bind_group: CachedBindGroup::new(),
            pipeline: None,
            material: None,
        }
    }

    pub fn key(&self) -> &GroupKey {
        &self.key
    }

    pub fn mesh(&self) -> &Arc<Mesh> {
        &self.mesh
    }

    /// Scene indices of the members, in instance-index order.
    pub fn instances(&self) -> &[usize] {
        &self.instances
    }

    pub fn instance_count(&self) -> u32 {
        self.instances.len() as u32
    }

    /// Packs the current transforms of the members, in draw order.
    pub fn pack_instances(&self, models: &[ModelInstance]) -> Result<Vec<InstanceRaw>> {
        if let Some(&index) = self.instances.iter().find(|&&index| index >= models.len()) {
            return Err(RenderError::Binding {
                label: self.instance_buffer.label().to_string(),
                message: format!("instance {index} not in a scene of {} models", models.len()),
            });
        }

        Ok(self
            .instances
            .par_iter()
            .map(|&index| InstanceRaw::from_model(models[index].transform))
            .collect())
    }

    /// Uploads this frame's transforms. A reallocated buffer invalidates
    /// the bind groups that reference it.
    pub fn write_to_gpu(&mut self, context: &RenderContext, models: &[ModelInstance]) -> Result<BufferWrite> {
        let raw = self.pack_instances(models)?;
        let write = self
            .instance_buffer
            .write_bytes(context, bytemuck::cast_slice(&raw))?;
        if write.reallocated {
            self.scene_bind_group.invalidate();
            self.shadow_bind_group.invalidate();
        }
        Ok(write)
    }

    pub fn instance_buffer(&self) -> Result<wgpu::Buffer> {
        self.instance_buffer.buffer()
    }

    /// Group 0 of the material pass, created on first use.
    pub fn bind_group(
        &mut self,
        create: impl FnOnce() -> Result<wgpu::BindGroup>,
    ) -> Result<&wgpu::BindGroup> {
        self.scene_bind_group.get_or_create(create)
    }

    pub(crate) fn shadow_bind_group(
        &mut self,
        create: impl FnOnce() -> Result<wgpu::BindGroup>,
    ) -> Result<&wgpu::BindGroup> {
        self.shadow_bind_group.get_or_create(create)
    }

    /// Drops cached bind groups, e.g. after the shared scene buffers moved.
    pub fn invalidate_bind_groups(&mut self) {
        self.scene_bind_group.invalidate();
        self.shadow_bind_group.invalidate();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::batch::group_instances;
    use crate::renderer::material::PbrMaterial;
    use crate::renderer::primitives;
    use glam::{Mat4, Vec3};

    fn row_of_cubes(count: usize) -> Vec<ModelInstance> {
        let cube = Mesh::from_data("Cube", &primitives::cube()).unwrap();
        (0..count)
            .map(|i| {
                ModelInstance::new(
                    cube.clone(),
                    PbrMaterial::default(),
                    Mat4::from_translation(Vec3::new(i as f32, 0.0, 0.0)),
                )
            })
            .collect()
    }

    #[test]
    fn packed_order_matches_instance_order() {
        let models = row_of_cubes(5);
        let group = RenderGroup::from_group(group_instances(&models).remove(0));

        let raw = group.pack_instances(&models).unwrap();
        assert_eq!(raw.len(), 5);
        for (i, entry) in raw.iter().enumerate() {
            assert_eq!(entry.model[3][0], i as f32);
        }
    }

    #[test]
    fn stale_instance_indices_are_rejected() {
        let models = row_of_cubes(3);
        let group = RenderGroup::from_group(group_instances(&models).remove(0));
        assert!(matches!(
            group.pack_instances(&models[..1]),
            Err(RenderError::Binding { .. })
        ));
    }

    #[test]
    fn buffer_is_unallocated_until_first_write() {
        let models = row_of_cubes(2);
        let group = RenderGroup::from_group(group_instances(&models).remove(0));
        assert_eq!(group.instance_count(), 2);
        assert!(matches!(
            group.instance_buffer(),
            Err(RenderError::Uninitialized { .. })
        ));
    }
}
