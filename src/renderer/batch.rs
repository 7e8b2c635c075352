// renderer/batch.rs
use std::collections::HashMap;
use std::sync::Arc;

use super::internal::buffers::BufferId;
use super::material::Material;
use super::mesh::Mesh;
use crate::scene::ModelInstance;

/// What makes two instances drawable with one instanced draw call.
/// Materials compare by value, so identically configured materials built
/// separately share a group.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GroupKey {
    pub vertex_buffer: BufferId,
    /// Only set when the material asks for tangent data and the mesh has it.
    pub tangent_buffer: Option<BufferId>,
    pub material: Material,
}

impl GroupKey {
    pub fn for_instance(instance: &ModelInstance) -> Self {
        let mesh = instance.mesh();
        let material = instance.material();
        let tangent_buffer = if material.use_tangent_data() {
            mesh.tangent_buffer_id()
        } else {
            None
        };

        Self {
            vertex_buffer: mesh.vertex_buffer_id(),
            tangent_buffer,
            material: material.clone(),
        }
    }

    pub fn uses_tangents(&self) -> bool {
        self.tangent_buffer.is_some()
    }
}

/// Instances sharing a [`GroupKey`], as indices into the scene's model list
/// in scene order. Never empty.
#[derive(Debug, Clone)]
pub struct InstanceGroup {
    pub key: GroupKey,
    pub mesh: Arc<Mesh>,
    pub instances: Vec<usize>,
}

impl InstanceGroup {
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }
}

/// Partitions `models` into draw groups in one pass. Groups come out in
/// order of first appearance; a group only exists once an instance lands in it.
pub fn group_instances(models: &[ModelInstance]) -> Vec<InstanceGroup> {
    let mut groups: Vec<InstanceGroup> = Vec::new();
    let mut lookup: HashMap<GroupKey, usize> = HashMap::new();

    for (index, model) in models.iter().enumerate() {
        let key = GroupKey::for_instance(model);
        if model.material().use_tangent_data() && key.tangent_buffer.is_none() {
            log::debug!(
                "{} requests tangent data but has no tangent stream",
                model.mesh().label()
            );
        }

        match lookup.get(&key) {
            Some(&slot) => groups[slot].instances.push(index),
            None => {
                lookup.insert(key.clone(), groups.len());
                groups.push(InstanceGroup {
                    key,
                    mesh: Arc::clone(model.mesh()),
                    instances: vec![index],
                });
            }
        }
    }

    groups
}
