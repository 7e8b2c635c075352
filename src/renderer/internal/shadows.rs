use std::mem;
use std::sync::Arc;

use glam::Mat4;

use crate::error::{ConfigError, RenderError, Result};
use crate::renderer::bounds::BoundingBox;
use crate::renderer::internal::batches::RenderGroup;
use crate::renderer::internal::bindings::{BindingLayout, BindingLayoutBuilder, BoundResource};
use crate::renderer::internal::buffers::GpuBuffer;
use crate::renderer::internal::context::RenderContext;
use crate::renderer::internal::pipeline::{BuildCache, DEPTH_FORMAT};
use crate::renderer::lights::{Light, ShadowMapInfo, MAX_LIGHTS};
use crate::renderer::shadow_math;
use crate::renderer::uniforms::ShadowPassUniform;
use crate::renderer::vertex::VertexLayout;
use crate::renderer::PipelineBuilder;

const MATRIX_SIZE: u64 = mem::size_of::<ShadowPassUniform>() as u64;

/// Depth array with one layer per shadow-casting light.
struct ShadowArray {
    texture: wgpu::Texture,
    array_view: wgpu::TextureView,
    layer_views: Vec<wgpu::TextureView>,
}

impl ShadowArray {
    fn new(device: &wgpu::Device, label: &str, layers: u32, size: u32) -> Self {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width: size,
                height: size,
                depth_or_array_layers: layers,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: DEPTH_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
            view_formats: &[],
        });

        let array_view = texture.create_view(&wgpu::TextureViewDescriptor {
            label: Some(&format!("{label}ArrayView")),
            dimension: Some(wgpu::TextureViewDimension::D2Array),
            aspect: wgpu::TextureAspect::DepthOnly,
            array_layer_count: Some(layers),
            ..Default::default()
        });

        let layer_views = (0..layers)
            .map(|layer| {
                texture.create_view(&wgpu::TextureViewDescriptor {
                    label: Some(&format!("{label}Layer{layer}")),
                    dimension: Some(wgpu::TextureViewDimension::D2),
                    aspect: wgpu::TextureAspect::DepthOnly,
                    base_array_layer: layer,
                    array_layer_count: Some(1),
                    ..Default::default()
                })
            })
            .collect();

        Self {
            texture,
            array_view,
            layer_views,
        }
    }
}

/// Validates the caster set and allocates the depth array.
#[derive(Debug, Clone, Copy)]
pub struct ShadowMapBuilder {
    size: u32,
}

impl ShadowMapBuilder {
    pub fn new(size: u32) -> Self {
        Self { size: size.max(1) }
    }

    /// One layer per light that [`casts_shadow`](Light::casts_shadow), in
    /// light order. Point lights are skipped even when flagged. Fails when
    /// nothing is left.
    pub fn build(&self, context: &RenderContext, lights: &[Light]) -> Result<ShadowMaps> {
        let casters = shadow_casters(lights);
        if casters.is_empty() {
            log::error!("Shadow maps requested without any eligible light");
            return Err(ConfigError::NoShadowCasters.into());
        }
        if casters.len() > MAX_LIGHTS {
            log::warn!(
                "{} shadow casters; lights past {} are not shaded",
                casters.len(),
                MAX_LIGHTS
            );
        }

        log::info!(
            "Creating {} shadow map layers at {}x{}",
            casters.len(),
            self.size,
            self.size
        );
        Ok(ShadowMaps::new(context, casters, self.size))
    }
}

/// Indices of the lights that get a shadow layer.
pub fn shadow_casters(lights: &[Light]) -> Vec<usize> {
    lights
        .iter()
        .enumerate()
        .filter(|(_, light)| light.casts_shadow())
        .map(|(index, _)| index)
        .collect()
}

fn shadow_pass_layout() -> BindingLayout {
    BindingLayoutBuilder::new()
        .group()
        .storage_buffer("Instances", wgpu::ShaderStages::VERTEX)
        .uniform_buffer("ShadowPass", wgpu::ShaderStages::VERTEX)
        .build()
}

struct ShadowDraw {
    pipeline: wgpu::RenderPipeline,
    bind_group: wgpu::BindGroup,
    vertices: wgpu::Buffer,
    indices: Option<wgpu::Buffer>,
    element_count: u32,
    instance_count: u32,
}

/// Shadow-map array, the light matrices and the depth-only pass that
/// fills it.
pub struct ShadowMaps {
    size: u32,
    casters: Vec<usize>,
    array: ShadowArray,
    /// Light-space view-projections, read by the material pass.
    matrices: GpuBuffer,
    /// One matrix per layer; copied into `pass_uniform` before each layer.
    staging: wgpu::Buffer,
    pass_uniform: GpuBuffer,
    layout: BindingLayout,
    bind_group_layout: wgpu::BindGroupLayout,
    pipeline_layout: wgpu::PipelineLayout,
    shader: wgpu::ShaderModule,
    pipelines: BuildCache<VertexLayout, wgpu::RenderPipeline>,
}

impl ShadowMaps {
    fn new(context: &RenderContext, casters: Vec<usize>, size: u32) -> Self {
        let device = &context.device;
        let layers = casters.len().max(1) as u32;

        let layout = shadow_pass_layout();
        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("ShadowPassLayout"),
            entries: &layout.layout_entries(0),
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("ShadowPipelineLayout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("ShadowShader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("../../shader/shadow.wgsl").into()),
        });

        let staging = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("ShadowStagingBuffer"),
            size: MATRIX_SIZE * layers as u64,
            usage: wgpu::BufferUsages::COPY_SRC | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        Self {
            size,
            array: ShadowArray::new(device, "ShadowMaps", layers, size),
            matrices: GpuBuffer::new_dynamic(
                "ShadowMatrices",
                wgpu::BufferUsages::STORAGE,
                MATRIX_SIZE * layers as u64,
            ),
            staging,
            pass_uniform: GpuBuffer::new_dynamic(
                "ShadowPassUniform",
                wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                MATRIX_SIZE,
            ),
            casters,
            layout,
            bind_group_layout,
            pipeline_layout,
            shader,
            pipelines: BuildCache::new(),
        }
    }

    /// Single-layer stand-in bound when no light casts shadows, so the
    /// material pipelines always have group 1. Never rendered into.
    pub fn placeholder(context: &RenderContext) -> Result<Self> {
        let maps = Self::new(context, Vec::new(), 1);
        maps.matrices.write_to_gpu(context)?;
        Ok(maps)
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn layer_count(&self) -> u32 {
        self.casters.len() as u32
    }

    /// Whether these maps still fit `lights` at `size`. The placeholder
    /// fits any light set without casters.
    pub fn matches(&self, lights: &[Light], size: u32) -> bool {
        self.casters == shadow_casters(lights) && (self.casters.is_empty() || self.size == size)
    }

    pub fn array_view(&self) -> &wgpu::TextureView {
        &self.array.array_view
    }

    pub fn layer_view(&self, layer: u32) -> Option<&wgpu::TextureView> {
        self.array.layer_views.get(layer as usize)
    }

    pub fn texture(&self) -> &wgpu::Texture {
        &self.array.texture
    }

    pub fn matrices_buffer(&self) -> Result<wgpu::Buffer> {
        self.matrices.buffer()
    }

    /// Recomputes every caster's light-space matrices against the scene
    /// bounds and writes them back onto the lights. Non-casters lose any
    /// previous shadow map.
    pub fn update(
        &mut self,
        context: &RenderContext,
        lights: &mut [Light],
        scene_bounds: &BoundingBox,
    ) -> Result<()> {
        for light in lights.iter_mut() {
            light.set_shadow_map(None);
        }

        let mut view_projections = Vec::with_capacity(self.casters.len());
        for (layer, &index) in self.casters.iter().enumerate() {
            let Some(light) = lights.get_mut(index) else {
                return Err(RenderError::Binding {
                    label: "ShadowMaps".into(),
                    message: format!("caster {index} missing from {} lights", lights.len()),
                });
            };
            match shadow_math::light_matrices(light, scene_bounds) {
                Some(matrices) => {
                    view_projections.push(ShadowPassUniform::new(matrices.view_projection()));
                    light.set_shadow_map(Some(ShadowMapInfo {
                        layer: layer as u32,
                        view: matrices.view,
                        projection: matrices.projection,
                    }));
                }
                None => view_projections.push(ShadowPassUniform::new(Mat4::IDENTITY)),
            }
        }

        let bytes: &[u8] = bytemuck::cast_slice(&view_projections);
        context.queue.write_buffer(&self.staging, 0, bytes);
        self.matrices.write_bytes(context, bytes)?;
        self.pass_uniform.write_to_gpu(context)?;
        Ok(())
    }

    fn pipeline(&mut self, context: &RenderContext, vertex_layout: VertexLayout) -> Result<Arc<wgpu::RenderPipeline>> {
        let (pipeline_layout, shader) = (&self.pipeline_layout, &self.shader);
        self.pipelines.get_or_try_insert(vertex_layout, |layout| {
            let position = [wgpu::VertexAttribute {
                format: wgpu::VertexFormat::Float32x3,
                offset: layout.position_offset as u64,
                shader_location: 0,
            }];
            Ok(PipelineBuilder::new(&context.device, pipeline_layout, shader)
                .with_label("ShadowPipeline")
                .depth_only()
                .with_vertex_buffer(layout.buffer_layout(&position))
                .with_depth_stencil(DEPTH_FORMAT, true, wgpu::CompareFunction::LessEqual)
                .with_depth_bias(2, 2.0)
                .build())
        })
    }

    fn prepare_draws(&mut self, context: &RenderContext, groups: &mut [RenderGroup]) -> Result<Vec<ShadowDraw>> {
        let pass_uniform = self.pass_uniform.buffer()?;
        let mut draws = Vec::with_capacity(groups.len());

        for group in groups.iter_mut() {
            let mesh = Arc::clone(group.mesh());
            let pipeline = self.pipeline(context, mesh.layout())?;
            let instances = group.instance_buffer()?;
            let (layout, bind_group_layout) = (&self.layout, &self.bind_group_layout);
            let bind_group = group
                .shadow_bind_group(|| {
                    layout.create_bind_group(
                        &context.device,
                        bind_group_layout,
                        0,
                        "ShadowPassBindGroup",
                        &[
                            BoundResource::Buffer(&instances),
                            BoundResource::Buffer(&pass_uniform),
                        ],
                    )
                })?
                .clone();

            let indices = mesh.index_buffer().transpose()?;
            let element_count = if indices.is_some() {
                mesh.index_count()
            } else {
                mesh.vertex_count()
            };
            draws.push(ShadowDraw {
                pipeline: (*pipeline).clone(),
                bind_group,
                vertices: mesh.vertex_buffer()?,
                indices,
                element_count,
                instance_count: group.instance_count(),
            });
        }
        Ok(draws)
    }

    /// Records one depth-only pass per layer. Returns the number of draw
    /// calls issued.
    pub fn render(
        &mut self,
        context: &RenderContext,
        encoder: &mut wgpu::CommandEncoder,
        groups: &mut [RenderGroup],
    ) -> Result<u32> {
        if self.casters.is_empty() {
            return Ok(0);
        }
        let draws = self.prepare_draws(context, groups)?;
        let pass_uniform = self.pass_uniform.buffer()?;
        let mut draw_calls = 0;

        for layer in 0..self.layer_count() {
            encoder.copy_buffer_to_buffer(
                &self.staging,
                layer as u64 * MATRIX_SIZE,
                &pass_uniform,
                0,
                MATRIX_SIZE,
            );

            let Some(view) = self.layer_view(layer) else {
                continue;
            };
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("ShadowPass"),
                color_attachments: &[],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(1.0),
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
            });

            for draw in &draws {
                pass.set_pipeline(&draw.pipeline);
                pass.set_bind_group(0, &draw.bind_group, &[]);
                pass.set_vertex_buffer(0, draw.vertices.slice(..));
                match &draw.indices {
                    Some(indices) => {
                        pass.set_index_buffer(indices.slice(..), wgpu::IndexFormat::Uint32);
                        pass.draw_indexed(0..draw.element_count, 0, 0..draw.instance_count);
                    }
                    None => pass.draw(0..draw.element_count, 0..draw.instance_count),
                }
                draw_calls += 1;
            }
        }

        Ok(draw_calls)
    }

    /// Light-space view-projection per layer, as last written by `update`.
    pub fn view_projections(&self, lights: &[Light]) -> Vec<Mat4> {
        self.casters
            .iter()
            .filter_map(|&index| lights.get(index)?.shadow_map())
            .map(ShadowMapInfo::view_projection)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    #[test]
    fn point_lights_are_not_shadow_casters() {
        let lights = vec![
            Light::target(Vec3::new(0.0, 5.0, 0.0), Vec3::ZERO, 80.0).with_shadow(),
            Light::point(Vec3::ONE).with_shadow(),
            Light::directional(Vec3::new(0.2, -1.0, 0.1)).with_shadow(),
            Light::directional(Vec3::NEG_Y),
        ];
        assert_eq!(shadow_casters(&lights), vec![0, 2]);
    }

    #[test]
    fn pass_layout_is_instances_then_uniform() {
        let layout = shadow_pass_layout();
        assert_eq!(layout.group_count(), 1);
        assert_eq!(layout.bindings(0)[0].label, "Instances");
        assert_eq!(layout.bindings(0)[1].label, "ShadowPass");
    }
}
