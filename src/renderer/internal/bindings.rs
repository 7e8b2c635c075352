//! Declarative shader resource bindings.
//!
//! A [`BindingLayout`] is an ordered list of binding descriptors split into
//! numbered groups; the binding index of a descriptor is its position in
//! its group. From it we derive the abstract `wgpu::BindGroupLayout`s a
//! pipeline is created with, and, at draw time, the concrete bind group
//! entries resolved against live resources.

use crate::error::{RenderError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindingKind {
    UniformBuffer,
    StorageBuffer {
        read_only: bool,
    },
    Texture {
        sample_type: wgpu::TextureSampleType,
        dimension: wgpu::TextureViewDimension,
    },
    Sampler(wgpu::SamplerBindingType),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BindingDesc {
    pub label: &'static str,
    pub kind: BindingKind,
    pub visibility: wgpu::ShaderStages,
}

impl BindingDesc {
    fn layout_entry(&self, binding: u32) -> wgpu::BindGroupLayoutEntry {
        let ty = match self.kind {
            BindingKind::UniformBuffer => wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            BindingKind::StorageBuffer { read_only } => wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            BindingKind::Texture {
                sample_type,
                dimension,
            } => wgpu::BindingType::Texture {
                sample_type,
                view_dimension: dimension,
                multisampled: false,
            },
            BindingKind::Sampler(ty) => wgpu::BindingType::Sampler(ty),
        };

        wgpu::BindGroupLayoutEntry {
            binding,
            visibility: self.visibility,
            ty,
            count: None,
        }
    }
}

/// A live resource to place in a binding slot.
#[derive(Debug, Clone, Copy)]
pub enum BoundResource<'a> {
    Buffer(&'a wgpu::Buffer),
    TextureView(&'a wgpu::TextureView),
    Sampler(&'a wgpu::Sampler),
}

impl<'a> BoundResource<'a> {
    fn matches(&self, kind: &BindingKind) -> bool {
        matches!(
            (self, kind),
            (
                BoundResource::Buffer(_),
                BindingKind::UniformBuffer | BindingKind::StorageBuffer { .. }
            ) | (BoundResource::TextureView(_), BindingKind::Texture { .. })
                | (BoundResource::Sampler(_), BindingKind::Sampler(_))
        )
    }

    fn binding_resource(self) -> wgpu::BindingResource<'a> {
        match self {
            BoundResource::Buffer(buffer) => buffer.as_entire_binding(),
            BoundResource::TextureView(view) => wgpu::BindingResource::TextureView(view),
            BoundResource::Sampler(sampler) => wgpu::BindingResource::Sampler(sampler),
        }
    }
}

/// Accumulates binding descriptors. Each call to [`group`](Self::group)
/// opens the next numbered group.
#[derive(Debug, Default)]
pub struct BindingLayoutBuilder {
    groups: Vec<Vec<BindingDesc>>,
}

impl BindingLayoutBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn group(mut self) -> Self {
        self.groups.push(Vec::new());
        self
    }

    fn push(mut self, label: &'static str, kind: BindingKind, visibility: wgpu::ShaderStages) -> Self {
        if self.groups.is_empty() {
            self.groups.push(Vec::new());
        }
        if let Some(group) = self.groups.last_mut() {
            group.push(BindingDesc {
                label,
                kind,
                visibility,
            });
        }
        self
    }

    pub fn uniform_buffer(self, label: &'static str, visibility: wgpu::ShaderStages) -> Self {
        self.push(label, BindingKind::UniformBuffer, visibility)
    }

    pub fn storage_buffer(self, label: &'static str, visibility: wgpu::ShaderStages) -> Self {
        self.push(
            label,
            BindingKind::StorageBuffer { read_only: true },
            visibility,
        )
    }

    /// Writable storage, for compute outputs.
    pub fn storage_buffer_rw(self, label: &'static str, visibility: wgpu::ShaderStages) -> Self {
        self.push(
            label,
            BindingKind::StorageBuffer { read_only: false },
            visibility,
        )
    }

    pub fn texture(self, label: &'static str, dimension: wgpu::TextureViewDimension) -> Self {
        self.texture_for(label, dimension, wgpu::ShaderStages::FRAGMENT)
    }

    pub fn texture_for(
        self,
        label: &'static str,
        dimension: wgpu::TextureViewDimension,
        visibility: wgpu::ShaderStages,
    ) -> Self {
        self.push(
            label,
            BindingKind::Texture {
                sample_type: wgpu::TextureSampleType::Float { filterable: true },
                dimension,
            },
            visibility,
        )
    }

    pub fn cube_texture(self, label: &'static str) -> Self {
        self.texture(label, wgpu::TextureViewDimension::Cube)
    }

    pub fn depth_texture_array(self, label: &'static str) -> Self {
        self.push(
            label,
            BindingKind::Texture {
                sample_type: wgpu::TextureSampleType::Depth,
                dimension: wgpu::TextureViewDimension::D2Array,
            },
            wgpu::ShaderStages::FRAGMENT,
        )
    }

    pub fn sampler(self, label: &'static str, ty: wgpu::SamplerBindingType) -> Self {
        self.push(label, BindingKind::Sampler(ty), wgpu::ShaderStages::FRAGMENT)
    }

    pub fn build(self) -> BindingLayout {
        BindingLayout {
            groups: self.groups,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BindingLayout {
    groups: Vec<Vec<BindingDesc>>,
}

impl BindingLayout {
    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    pub fn bindings(&self, group: usize) -> &[BindingDesc] {
        self.groups.get(group).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Abstract layout entries for `group`; binding index = list position.
    pub fn layout_entries(&self, group: usize) -> Vec<wgpu::BindGroupLayoutEntry> {
        self.bindings(group)
            .iter()
            .enumerate()
            .map(|(index, desc)| desc.layout_entry(index as u32))
            .collect()
    }

    pub fn create_layouts(&self, device: &wgpu::Device, label: &str) -> Vec<wgpu::BindGroupLayout> {
        (0..self.groups.len())
            .map(|group| {
                device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                    label: Some(&format!("{label}Group{group}Layout")),
                    entries: &self.layout_entries(group),
                })
            })
            .collect()
    }

    /// Concrete entries for `group`, checked slot by slot against the
    /// declared kinds.
    pub fn resolve<'a>(
        &self,
        group: usize,
        resources: &[BoundResource<'a>],
    ) -> Result<Vec<wgpu::BindGroupEntry<'a>>> {
        let bindings = self.bindings(group);
        if bindings.len() != resources.len() {
            return Err(RenderError::Binding {
                label: format!("group {group}"),
                message: format!(
                    "expected {} resources, got {}",
                    bindings.len(),
                    resources.len()
                ),
            });
        }

        bindings
            .iter()
            .zip(resources)
            .enumerate()
            .map(|(index, (desc, resource))| {
                if !resource.matches(&desc.kind) {
                    return Err(RenderError::Binding {
                        label: desc.label.to_string(),
                        message: format!("slot {index} expects {:?}", desc.kind),
                    });
                }
                Ok(wgpu::BindGroupEntry {
                    binding: index as u32,
                    resource: resource.binding_resource(),
                })
            })
            .collect()
    }

    pub fn create_bind_group(
        &self,
        device: &wgpu::Device,
        layout: &wgpu::BindGroupLayout,
        group: usize,
        label: &str,
        resources: &[BoundResource<'_>],
    ) -> Result<wgpu::BindGroup> {
        let entries = self.resolve(group, resources)?;
        Ok(device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(label),
            layout,
            entries: &entries,
        }))
    }
}

/// Concrete bind group kept until explicitly invalidated. Per-frame buffers
/// keep stable handles, so their byte updates never require a rebuild.
#[derive(Debug, Default)]
pub struct CachedBindGroup {
    group: Option<wgpu::BindGroup>,
    rebuilds: u32,
}

impl CachedBindGroup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_create(
        &mut self,
        create: impl FnOnce() -> Result<wgpu::BindGroup>,
    ) -> Result<&wgpu::BindGroup> {
        if self.group.is_none() {
            self.group = Some(create()?);
            self.rebuilds += 1;
        }
        self.group
            .as_ref()
            .ok_or_else(|| RenderError::uninitialized("CachedBindGroup"))
    }

    pub fn get(&self) -> Option<&wgpu::BindGroup> {
        self.group.as_ref()
    }

    pub fn invalidate(&mut self) {
        self.group = None;
    }

    pub fn is_valid(&self) -> bool {
        self.group.is_some()
    }

    /// How many times the group has been created.
    pub fn rebuilds(&self) -> u32 {
        self.rebuilds
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shadow_layout() -> BindingLayout {
        BindingLayoutBuilder::new()
            .group()
            .storage_buffer("Instances", wgpu::ShaderStages::VERTEX)
            .uniform_buffer("Scene", wgpu::ShaderStages::VERTEX_FRAGMENT)
            .group()
            .depth_texture_array("ShadowMaps")
            .sampler("ShadowSampler", wgpu::SamplerBindingType::Comparison)
            .build()
    }

    #[test]
    fn binding_index_is_position_in_group() {
        let layout = shadow_layout();
        assert_eq!(layout.group_count(), 2);

        let group0 = layout.layout_entries(0);
        assert_eq!(group0.len(), 2);
        assert_eq!(group0[0].binding, 0);
        assert_eq!(group0[1].binding, 1);
        assert!(matches!(
            group0[0].ty,
            wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only: true },
                ..
            }
        ));

        let group1 = layout.layout_entries(1);
        assert!(matches!(
            group1[0].ty,
            wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Depth,
                view_dimension: wgpu::TextureViewDimension::D2Array,
                ..
            }
        ));
        assert!(matches!(
            group1[1].ty,
            wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Comparison)
        ));
    }

    #[test]
    fn bindings_without_explicit_group_land_in_group_zero() {
        let layout = BindingLayoutBuilder::new()
            .uniform_buffer("Camera", wgpu::ShaderStages::VERTEX)
            .build();
        assert_eq!(layout.group_count(), 1);
        assert_eq!(layout.bindings(0)[0].label, "Camera");
    }

    #[test]
    fn resolve_rejects_wrong_resource_count() {
        let layout = shadow_layout();
        let err = layout.resolve(1, &[]).unwrap_err();
        assert!(matches!(err, RenderError::Binding { .. }));
    }

    #[test]
    fn cached_bind_group_starts_invalid() {
        let mut cache = CachedBindGroup::new();
        assert!(!cache.is_valid());
        cache.invalidate();
        assert_eq!(cache.rebuilds(), 0);
        assert!(cache.get().is_none());
    }
}
