use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use crate::error::{RenderError, Result};
use crate::renderer::internal::bindings::{BindingLayout, BindingLayoutBuilder, BoundResource};
use crate::renderer::internal::context::{DeviceId, RenderContext};
use crate::renderer::internal::materials::MaterialGpu;
use crate::renderer::material::ShadingModel;
use crate::renderer::vertex::{TangentFrame, VertexLayout};
use crate::renderer::PipelineBuilder;

pub const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

pub const SCENE_GROUP: usize = 0;
pub const SHADOW_GROUP: usize = 1;
pub const ENVIRONMENT_GROUP: usize = 2;

/// WGSL override holding the shadow layer resolution used for PCF offsets.
pub const SHADOW_MAP_SIZE_CONSTANT: &str = "SHADOW_MAP_SIZE";

/// Everything that changes the compiled pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PipelineKey {
    pub shading_model: ShadingModel,
    pub has_tangents: bool,
    pub has_environment: bool,
    /// Compiled into the fragment stage as `SHADOW_MAP_SIZE`.
    pub shadow_map_size: u32,
    pub sample_count: u32,
    pub color_format: wgpu::TextureFormat,
    pub vertex_layout: VertexLayout,
}

impl PipelineKey {
    fn label(&self) -> String {
        format!(
            "{:?}{}{}Pipeline",
            self.shading_model,
            if self.has_tangents { "Tangent" } else { "" },
            if self.has_environment { "Env" } else { "" },
        )
    }

    fn vertex_entry(&self) -> &'static str {
        if self.has_tangents {
            "vs_tangent"
        } else {
            "vs_main"
        }
    }

    fn fragment_entry(&self) -> &'static str {
        match (self.has_tangents, self.has_environment) {
            (false, false) => "fs_main",
            (false, true) => "fs_main_env",
            (true, false) => "fs_tangent",
            (true, true) => "fs_tangent_env",
        }
    }
}

/// Build-once map. Values are shared; a key is never built twice.
#[derive(Debug)]
pub struct BuildCache<K, V> {
    entries: HashMap<K, Arc<V>>,
    builds: usize,
}

impl<K, V> Default for BuildCache<K, V> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
            builds: 0,
        }
    }
}

impl<K: Eq + Hash, V> BuildCache<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &K) -> Option<Arc<V>> {
        self.entries.get(key).cloned()
    }

    pub fn get_or_try_insert(&mut self, key: K, build: impl FnOnce(&K) -> Result<V>) -> Result<Arc<V>> {
        if let Some(value) = self.entries.get(&key) {
            return Ok(Arc::clone(value));
        }
        let value = build(&key)?;
        Ok(self.insert(key, value))
    }

    pub fn insert(&mut self, key: K, value: V) -> Arc<V> {
        let value = Arc::new(value);
        self.entries.insert(key, Arc::clone(&value));
        self.builds += 1;
        value
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of values built over the cache's lifetime.
    pub fn builds(&self) -> usize {
        self.builds
    }

    pub fn retain(&mut self, keep: impl FnMut(&K, &mut Arc<V>) -> bool) {
        self.entries.retain(keep);
    }
}

/// Resource interface of a material pipeline: group 0 per render group,
/// group 1 shadow maps, group 2 environment.
pub fn material_binding_layout(model: ShadingModel) -> BindingLayout {
    use wgpu::ShaderStages;

    let mut builder = BindingLayoutBuilder::new()
        .group()
        .storage_buffer("Instances", ShaderStages::VERTEX)
        .uniform_buffer("Scene", ShaderStages::VERTEX_FRAGMENT)
        .storage_buffer("Lights", ShaderStages::FRAGMENT)
        .uniform_buffer("Material", ShaderStages::FRAGMENT);

    let maps: &[&'static str] = match model {
        ShadingModel::BlinnPhong => &["DiffuseMap", "SpecularMap", "NormalMap"],
        ShadingModel::Pbr => &[
            "AlbedoMap",
            "MetallicMap",
            "RoughnessMap",
            "OcclusionMap",
            "NormalMap",
        ],
    };
    for &label in maps {
        builder = builder.texture(label, wgpu::TextureViewDimension::D2);
    }

    builder
        .sampler("MaterialSampler", wgpu::SamplerBindingType::Filtering)
        .group()
        .depth_texture_array("ShadowMaps")
        .sampler("ShadowSampler", wgpu::SamplerBindingType::Comparison)
        .storage_buffer("ShadowMatrices", ShaderStages::FRAGMENT)
        .group()
        .cube_texture("IrradianceMap")
        .cube_texture("PrefilteredMap")
        .texture("BrdfLut", wgpu::TextureViewDimension::D2)
        .sampler("EnvironmentSampler", wgpu::SamplerBindingType::Filtering)
        .build()
}

fn shader_source(model: ShadingModel) -> String {
    let lighting = match model {
        ShadingModel::BlinnPhong => include_str!("../../shader/blinn_phong.wgsl"),
        ShadingModel::Pbr => include_str!("../../shader/pbr.wgsl"),
    };
    format!("{}\n{}", include_str!("../../shader/common.wgsl"), lighting)
}

/// Runs `create` inside a validation error scope. Shader or layout errors
/// come back as [`RenderError::Pipeline`] instead of a device panic.
pub async fn validated<T>(context: &RenderContext, label: &str, create: impl FnOnce() -> T) -> Result<T> {
    context.device.push_error_scope(wgpu::ErrorFilter::Validation);
    let value = create();
    match context.device.pop_error_scope().await {
        Some(error) => {
            log::error!("{} failed: {}", label, error);
            Err(RenderError::Pipeline {
                label: label.to_string(),
                message: error.to_string(),
            })
        }
        None => Ok(value),
    }
}

/// A compiled material pipeline and the layouts its bind groups are built
/// against.
#[derive(Debug)]
pub struct MaterialPipeline {
    key: PipelineKey,
    pipeline: wgpu::RenderPipeline,
    layout: BindingLayout,
    bind_group_layouts: Vec<wgpu::BindGroupLayout>,
}

impl MaterialPipeline {
    /// Compiles the variant named by `key`. Fails with
    /// [`RenderError::Pipeline`] on any validation error.
    pub async fn build(context: &RenderContext, key: PipelineKey) -> Result<Self> {
        let label = key.label();
        log::info!("Building {}", label);

        let layout = material_binding_layout(key.shading_model);
        let (pipeline, bind_group_layouts) = validated(context, &label, || {
            let shader = context
                .device
                .create_shader_module(wgpu::ShaderModuleDescriptor {
                    label: Some(&label),
                    source: wgpu::ShaderSource::Wgsl(shader_source(key.shading_model).into()),
                });

            let bind_group_layouts = layout.create_layouts(&context.device, &label);
            let layout_refs: Vec<&wgpu::BindGroupLayout> = bind_group_layouts.iter().collect();
            let pipeline_layout =
                context
                    .device
                    .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                        label: Some(&label),
                        bind_group_layouts: &layout_refs,
                        push_constant_ranges: &[],
                    });

            let attributes = key.vertex_layout.attributes();
            let mut builder = PipelineBuilder::new(&context.device, &pipeline_layout, &shader)
                .with_label(&label)
                .with_vertex_entry(key.vertex_entry())
                .with_fragment_entry(key.fragment_entry())
                .with_vertex_buffer(key.vertex_layout.buffer_layout(&attributes))
                .with_color_target(key.color_format, Some(wgpu::BlendState::REPLACE))
                .with_depth_stencil(DEPTH_FORMAT, true, wgpu::CompareFunction::LessEqual)
                .with_multisample(key.sample_count)
                .with_constant(SHADOW_MAP_SIZE_CONSTANT, key.shadow_map_size as f64);
            if key.has_tangents {
                builder = builder.with_vertex_buffer(TangentFrame::layout());
            }
            (builder.build(), bind_group_layouts)
        })
        .await?;

        Ok(Self {
            key,
            pipeline,
            layout,
            bind_group_layouts,
        })
    }

    pub fn key(&self) -> &PipelineKey {
        &self.key
    }

    pub fn pipeline(&self) -> &wgpu::RenderPipeline {
        &self.pipeline
    }

    pub fn binding_layout(&self) -> &BindingLayout {
        &self.layout
    }

    fn group_layout(&self, group: usize) -> Result<&wgpu::BindGroupLayout> {
        self.bind_group_layouts.get(group).ok_or_else(|| RenderError::Binding {
            label: self.key.label(),
            message: format!("no bind group layout {group}"),
        })
    }

    /// Group 0: instance transforms, scene and lights, then the material.
    pub fn create_scene_bind_group(
        &self,
        device: &wgpu::Device,
        label: &str,
        instances: &wgpu::Buffer,
        scene: &wgpu::Buffer,
        lights: &wgpu::Buffer,
        material: &MaterialGpu,
    ) -> Result<wgpu::BindGroup> {
        let material_uniform = material.uniform.buffer()?;
        let mut resources = vec![
            BoundResource::Buffer(instances),
            BoundResource::Buffer(scene),
            BoundResource::Buffer(lights),
            BoundResource::Buffer(&material_uniform),
        ];
        resources.extend(
            material
                .textures
                .iter()
                .map(|texture| BoundResource::TextureView(&texture.view)),
        );
        resources.push(BoundResource::Sampler(&material.sampler));

        self.layout.create_bind_group(
            device,
            self.group_layout(SCENE_GROUP)?,
            SCENE_GROUP,
            label,
            &resources,
        )
    }

    pub fn create_shadow_bind_group(
        &self,
        device: &wgpu::Device,
        shadow_maps: &wgpu::TextureView,
        comparison_sampler: &wgpu::Sampler,
        shadow_matrices: &wgpu::Buffer,
    ) -> Result<wgpu::BindGroup> {
        self.layout.create_bind_group(
            device,
            self.group_layout(SHADOW_GROUP)?,
            SHADOW_GROUP,
            "ShadowBindGroup",
            &[
                BoundResource::TextureView(shadow_maps),
                BoundResource::Sampler(comparison_sampler),
                BoundResource::Buffer(shadow_matrices),
            ],
        )
    }

    pub fn create_environment_bind_group(
        &self,
        device: &wgpu::Device,
        irradiance: &wgpu::TextureView,
        prefiltered: &wgpu::TextureView,
        brdf_lut: &wgpu::TextureView,
        sampler: &wgpu::Sampler,
    ) -> Result<wgpu::BindGroup> {
        self.layout.create_bind_group(
            device,
            self.group_layout(ENVIRONMENT_GROUP)?,
            ENVIRONMENT_GROUP,
            "EnvironmentBindGroup",
            &[
                BoundResource::TextureView(irradiance),
                BoundResource::TextureView(prefiltered),
                BoundResource::TextureView(brdf_lut),
                BoundResource::Sampler(sampler),
            ],
        )
    }
}

/// One pipeline per (device, key) for the cache's lifetime.
#[derive(Debug, Default)]
pub struct PipelineCache {
    pipelines: BuildCache<(DeviceId, PipelineKey), MaterialPipeline>,
}

impl PipelineCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get_or_build(
        &mut self,
        context: &RenderContext,
        key: PipelineKey,
    ) -> Result<Arc<MaterialPipeline>> {
        let cache_key = (context.id(), key);
        if let Some(pipeline) = self.pipelines.get(&cache_key) {
            return Ok(pipeline);
        }
        let pipeline = MaterialPipeline::build(context, key).await?;
        Ok(self.pipelines.insert(cache_key, pipeline))
    }

    pub fn get(&self, context: &RenderContext, key: &PipelineKey) -> Option<Arc<MaterialPipeline>> {
        self.pipelines.get(&(context.id(), *key))
    }

    pub fn len(&self) -> usize {
        self.pipelines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pipelines.is_empty()
    }

    pub fn builds(&self) -> usize {
        self.pipelines.builds()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(shading_model: ShadingModel, has_tangents: bool, has_environment: bool) -> PipelineKey {
        PipelineKey {
            shading_model,
            has_tangents,
            has_environment,
            shadow_map_size: 1024,
            sample_count: 1,
            color_format: wgpu::TextureFormat::Rgba8UnormSrgb,
            vertex_layout: VertexLayout::INTERLEAVED,
        }
    }

    #[test]
    fn build_cache_never_builds_a_key_twice() {
        let mut cache: BuildCache<PipelineKey, String> = BuildCache::new();
        let pbr = key(ShadingModel::Pbr, true, false);

        let first = cache.get_or_try_insert(pbr, |k| Ok(k.label())).unwrap();
        let second = cache
            .get_or_try_insert(pbr, |_| panic!("rebuilt a cached key"))
            .unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.builds(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn failed_builds_are_not_cached() {
        let mut cache: BuildCache<u32, u32> = BuildCache::new();
        let err = cache.get_or_try_insert(1, |_| Err(RenderError::Device("lost".into())));
        assert!(err.is_err());
        assert!(cache.is_empty());
        assert_eq!(*cache.get_or_try_insert(1, |_| Ok(5)).unwrap(), 5);
    }

    #[test]
    fn four_variants_have_distinct_entry_points() {
        let variants = [
            key(ShadingModel::BlinnPhong, true, false),
            key(ShadingModel::BlinnPhong, false, false),
            key(ShadingModel::Pbr, true, false),
            key(ShadingModel::Pbr, false, false),
        ];
        let labels: std::collections::HashSet<_> = variants.iter().map(PipelineKey::label).collect();
        assert_eq!(labels.len(), 4);
        assert_eq!(variants[0].vertex_entry(), "vs_tangent");
        assert_eq!(variants[1].fragment_entry(), "fs_main");
        assert_eq!(key(ShadingModel::Pbr, true, true).fragment_entry(), "fs_tangent_env");
    }

    #[test]
    fn shadow_resolution_is_a_compiled_constant() {
        let shared = include_str!("../../shader/common.wgsl");
        assert!(shared.contains(&format!("override {SHADOW_MAP_SIZE_CONSTANT}: f32")));

        let small = key(ShadingModel::Pbr, false, false);
        let large = PipelineKey {
            shadow_map_size: 4096,
            ..small
        };
        assert_ne!(small, large);
        assert_eq!(small.label(), large.label());
    }

    #[test]
    fn material_layouts_declare_three_groups() {
        let blinn = material_binding_layout(ShadingModel::BlinnPhong);
        let pbr = material_binding_layout(ShadingModel::Pbr);
        assert_eq!(blinn.group_count(), 3);
        assert_eq!(pbr.group_count(), 3);
        // 4 buffers + maps + sampler
        assert_eq!(blinn.bindings(SCENE_GROUP).len(), 8);
        assert_eq!(pbr.bindings(SCENE_GROUP).len(), 10);
        assert_eq!(blinn.bindings(SHADOW_GROUP), pbr.bindings(SHADOW_GROUP));
        assert_eq!(blinn.bindings(ENVIRONMENT_GROUP).len(), 4);
    }
}
