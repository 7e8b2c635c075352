// renderer/renderer_core.rs
use std::collections::HashMap;
use std::mem;
use std::sync::Arc;

use glam::Vec3;

use crate::error::{RenderError, Result};
use crate::renderer::batch::group_instances;
use crate::renderer::bounds::BoundingBox;
use crate::renderer::depth::FrameTargets;
use crate::renderer::internal::batches::RenderGroup;
use crate::renderer::internal::buffers::GpuBuffer;
use crate::renderer::internal::context::{DeviceId, RenderContext};
use crate::renderer::internal::environment::{
    BrdfLutCache, EnvironmentFallback, EnvironmentMap, EnvironmentMapBuilder, EnvironmentSource,
};
use crate::renderer::internal::materials::MaterialCache;
use crate::renderer::internal::pipeline::{PipelineCache, PipelineKey};
use crate::renderer::internal::samplers::{SamplerCache, SamplerKind};
use crate::renderer::internal::shadows::{shadow_casters, ShadowMapBuilder, ShadowMaps};
use crate::renderer::internal::timer::GpuTimer;
use crate::renderer::lights::LightsUniform;
use crate::renderer::texture::ImageLoader;
use crate::renderer::uniforms::SceneUniform;
use crate::scene::Scene;
use crate::settings::RenderSettings;

const SCENE_UNIFORM_SIZE: u64 = mem::size_of::<SceneUniform>() as u64;
const LIGHTS_UNIFORM_SIZE: u64 = mem::size_of::<LightsUniform>() as u64;
const ENVIRONMENT_INTENSITY: f32 = 1.0;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub render_groups: u32,
    pub instances: u32,
    /// Depth-only passes, one per shadow layer.
    pub shadow_passes: u32,
    /// Shadow and main-pass draw calls together.
    pub draw_calls: u32,
    /// Pipelines compiled over the renderer's lifetime.
    pub pipelines_built: u32,
}

/// What `prepare` built against. A frame whose scene or settings moved
/// past this must be prepared again.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct PreparedState {
    device: DeviceId,
    revision: u64,
    has_environment: bool,
    sample_count: u32,
    color_format: wgpu::TextureFormat,
    shadow_map_size: u32,
}

/// Groups 1 and 2, built once per pipeline after the shadow maps and the
/// environment are known.
struct PassBindGroups {
    shadow: wgpu::BindGroup,
    environment: wgpu::BindGroup,
}

struct MainDraw {
    pipeline: wgpu::RenderPipeline,
    scene: wgpu::BindGroup,
    shadow: wgpu::BindGroup,
    environment: wgpu::BindGroup,
    vertices: wgpu::Buffer,
    tangents: Option<wgpu::Buffer>,
    indices: Option<wgpu::Buffer>,
    element_count: u32,
    instance_count: u32,
}

/// Frame orchestration: batches the scene, owns the caches and records the
/// shadow and main passes.
pub struct Renderer {
    settings: RenderSettings,
    color_format: wgpu::TextureFormat,
    loader: Arc<dyn ImageLoader>,
    samplers: SamplerCache,
    materials: MaterialCache,
    pipelines: PipelineCache,
    brdf_luts: BrdfLutCache,
    groups: Vec<RenderGroup>,
    scene_buffer: GpuBuffer,
    lights_buffer: GpuBuffer,
    shadows: Option<ShadowMaps>,
    environment: Option<Arc<EnvironmentMap>>,
    fallback: Option<EnvironmentFallback>,
    pass_bind_groups: HashMap<PipelineKey, PassBindGroups>,
    targets: Option<FrameTargets>,
    timer: Option<GpuTimer>,
    prepared: Option<PreparedState>,
    stats: FrameStats,
}

impl Renderer {
    pub fn new(settings: RenderSettings, color_format: wgpu::TextureFormat, loader: Arc<dyn ImageLoader>) -> Self {
        Self {
            settings: settings.validate(),
            color_format,
            materials: MaterialCache::new(Arc::clone(&loader)),
            loader,
            samplers: SamplerCache::new(),
            pipelines: PipelineCache::new(),
            brdf_luts: BrdfLutCache::new(),
            groups: Vec::new(),
            scene_buffer: GpuBuffer::new_dynamic(
                "SceneUniform",
                wgpu::BufferUsages::UNIFORM,
                SCENE_UNIFORM_SIZE,
            ),
            lights_buffer: GpuBuffer::new_dynamic(
                "Lights",
                wgpu::BufferUsages::STORAGE,
                LIGHTS_UNIFORM_SIZE,
            ),
            shadows: None,
            environment: None,
            fallback: None,
            pass_bind_groups: HashMap::new(),
            targets: None,
            timer: None,
            prepared: None,
            stats: FrameStats::default(),
        }
    }

    pub fn settings(&self) -> &RenderSettings {
        &self.settings
    }

    /// Changes take effect at the next [`prepare`](Self::prepare).
    pub fn settings_mut(&mut self) -> &mut RenderSettings {
        &mut self.settings
    }

    pub fn color_format(&self) -> wgpu::TextureFormat {
        self.color_format
    }

    pub fn set_color_format(&mut self, format: wgpu::TextureFormat) {
        self.color_format = format;
    }

    /// Counters from the last successful `render`.
    pub fn stats(&self) -> FrameStats {
        self.stats
    }

    pub fn pipeline_count(&self) -> usize {
        self.pipelines.len()
    }

    /// Builds the IBL chain for `source` with the current settings. The
    /// result is shareable between scenes on the same device.
    pub async fn build_environment(
        &mut self,
        context: &RenderContext,
        source: &EnvironmentSource,
    ) -> Result<Arc<EnvironmentMap>> {
        let builder = EnvironmentMapBuilder::new(&self.settings);
        let map = builder
            .build(
                context,
                source,
                self.loader.as_ref(),
                &mut self.samplers,
                &mut self.brdf_luts,
            )
            .await?;
        Ok(Arc::new(map))
    }

    fn scene_environment(context: &RenderContext, scene: &Scene) -> Option<Arc<EnvironmentMap>> {
        let environment = scene.environment()?;
        if environment.device() != context.id() {
            log::warn!("Environment map was built on another device; rendering without it");
            return None;
        }
        Some(Arc::clone(environment))
    }

    fn current_state(&self, context: &RenderContext, scene: &Scene) -> PreparedState {
        PreparedState {
            device: context.id(),
            revision: scene.revision(),
            has_environment: Self::scene_environment(context, scene).is_some(),
            sample_count: self.settings.aa_sample_count,
            color_format: self.color_format,
            shadow_map_size: self.settings.shadow_map_size,
        }
    }

    /// Batches the scene, uploads geometry and materials, compiles every
    /// pipeline variant it needs and allocates the shadow maps. Must run
    /// again after the instance list, environment or settings change.
    pub async fn prepare(&mut self, context: &RenderContext, scene: &mut Scene) -> Result<()> {
        if self.prepared.is_some_and(|prepared| prepared.device != context.id()) {
            log::info!("Device changed; dropping per-device frame resources");
            self.shadows = None;
            self.fallback = None;
            self.targets = None;
            self.timer = None;
        }
        self.settings = self.settings.clone().validate();
        let state = self.current_state(context, scene);
        self.environment = Self::scene_environment(context, scene);

        let mut groups: Vec<RenderGroup> = group_instances(scene.models())
            .into_iter()
            .map(RenderGroup::from_group)
            .collect();
        log::info!(
            "Preparing {} models in {} render groups",
            scene.models().len(),
            groups.len()
        );

        for group in &mut groups {
            group.mesh().ensure_uploaded(context)?;
            let material = self
                .materials
                .get_or_create(context, &mut self.samplers, &group.key().material)?;
            let key = PipelineKey {
                shading_model: group.key().material.shading_model(),
                has_tangents: group.key().uses_tangents(),
                has_environment: state.has_environment,
                shadow_map_size: state.shadow_map_size,
                sample_count: state.sample_count,
                color_format: state.color_format,
                vertex_layout: group.mesh().layout(),
            };
            let pipeline = self.pipelines.get_or_build(context, key).await?;
            group.write_to_gpu(context, scene.models())?;
            group.material = Some(material);
            group.pipeline = Some(pipeline);
        }
        self.groups = groups;

        self.prepare_shadows(context, scene)?;
        if self.environment.is_none() && self.fallback.is_none() {
            self.fallback = Some(EnvironmentFallback::new(context));
        }

        self.scene_buffer.write_bytes(context, bytemuck::bytes_of(&SceneUniform::default()))?;
        self.lights_buffer
            .write_bytes(context, bytemuck::bytes_of(&LightsUniform::from_lights(&scene.lights)))?;
        self.create_pass_bind_groups(context)?;

        if self.settings.gpu_timing && self.timer.is_none() {
            self.timer = GpuTimer::new(context);
        } else if !self.settings.gpu_timing {
            self.timer = None;
        }

        self.prepared = Some(state);
        Ok(())
    }

    fn prepare_shadows(&mut self, context: &RenderContext, scene: &mut Scene) -> Result<()> {
        let size = self.settings.shadow_map_size;
        let reusable = self.prepared.is_some_and(|prepared| prepared.device == context.id())
            && self
                .shadows
                .as_ref()
                .is_some_and(|shadows| shadows.matches(&scene.lights, size));
        if !reusable {
            let shadows = if shadow_casters(&scene.lights).is_empty() {
                log::debug!("No shadow casters; binding a placeholder shadow array");
                ShadowMaps::placeholder(context)?
            } else {
                ShadowMapBuilder::new(size).build(context, &scene.lights)?
            };
            self.shadows = Some(shadows);
        }

        let bounds = scene_bounds(scene);
        if let Some(shadows) = self.shadows.as_mut() {
            shadows.update(context, &mut scene.lights, &bounds)?;
        }
        Ok(())
    }

    fn create_pass_bind_groups(&mut self, context: &RenderContext) -> Result<()> {
        self.pass_bind_groups.clear();
        let shadows = self
            .shadows
            .as_ref()
            .ok_or_else(|| RenderError::uninitialized("ShadowMaps"))?;
        let shadow_matrices = shadows.matrices_buffer()?;
        let comparison = self.samplers.get(context, SamplerKind::DepthComparison);
        let environment_sampler = self.samplers.get(context, SamplerKind::LinearClamp);

        let (irradiance, prefiltered, brdf_lut) = match (&self.environment, &self.fallback) {
            (Some(environment), _) => (
                &environment.irradiance().view,
                &environment.prefiltered().view,
                &environment.brdf_lut().view,
            ),
            (None, Some(fallback)) => (
                &fallback.irradiance.view,
                &fallback.prefiltered.view,
                &fallback.brdf_lut.view,
            ),
            (None, None) => return Err(RenderError::uninitialized("EnvironmentFallback")),
        };

        for group in &self.groups {
            let Some(pipeline) = group.pipeline.as_ref() else {
                continue;
            };
            if self.pass_bind_groups.contains_key(pipeline.key()) {
                continue;
            }
            let bind_groups = PassBindGroups {
                shadow: pipeline.create_shadow_bind_group(
                    &context.device,
                    shadows.array_view(),
                    &comparison,
                    &shadow_matrices,
                )?,
                environment: pipeline.create_environment_bind_group(
                    &context.device,
                    irradiance,
                    prefiltered,
                    brdf_lut,
                    &environment_sampler,
                )?,
            };
            self.pass_bind_groups.insert(*pipeline.key(), bind_groups);
        }
        Ok(())
    }

    /// Renders one frame of `scene` into `target`. Fails with
    /// [`RenderError::Uninitialized`] if the scene changed since the last
    /// [`prepare`](Self::prepare).
    pub fn render(&mut self, context: &RenderContext, scene: &mut Scene, target: &wgpu::Texture) -> Result<FrameStats> {
        let mut state = self.current_state(context, scene);
        state.color_format = target.format();
        let shadows_fit = self
            .shadows
            .as_ref()
            .is_some_and(|shadows| shadows.matches(&scene.lights, state.shadow_map_size));
        if self.prepared != Some(state) || !shadows_fit {
            log::error!("Frame submitted before the scene was prepared");
            return Err(RenderError::uninitialized("PreparedScene"));
        }

        let (width, height) = (target.width(), target.height());
        if !self
            .targets
            .as_ref()
            .is_some_and(|targets| targets.matches(width, height, state.color_format, state.sample_count))
        {
            self.targets = Some(FrameTargets::new(
                &context.device,
                width,
                height,
                state.color_format,
                state.sample_count,
            ));
        }

        self.write_frame_uniforms(context, scene)?;
        for group in &mut self.groups {
            group.write_to_gpu(context, scene.models())?;
        }

        let mut encoder = context.encoder("FrameEncoder");
        let (shadow_passes, shadow_draws) = match self.shadows.as_mut() {
            Some(shadows) => {
                let draws = shadows.render(context, &mut encoder, &mut self.groups)?;
                (shadows.layer_count(), draws)
            }
            None => (0, 0),
        };

        let draws = self.prepare_main_draws(context)?;
        let view = target.create_view(&wgpu::TextureViewDescriptor::default());
        let targets = self
            .targets
            .as_ref()
            .ok_or_else(|| RenderError::uninitialized("FrameTargets"))?;
        let (color_view, resolve_target) = targets.color_attachment(&view);
        let [r, g, b, a] = self.settings.clear_color;

        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("MainPass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: color_view,
                    depth_slice: None,
                    resolve_target,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color { r, g, b, a }),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &targets.depth,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(1.0),
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                timestamp_writes: self.timer.as_ref().map(GpuTimer::pass_writes),
                occlusion_query_set: None,
            });

            for draw in &draws {
                pass.set_pipeline(&draw.pipeline);
                pass.set_bind_group(0, &draw.scene, &[]);
                pass.set_bind_group(1, &draw.shadow, &[]);
                pass.set_bind_group(2, &draw.environment, &[]);
                pass.set_vertex_buffer(0, draw.vertices.slice(..));
                if let Some(tangents) = &draw.tangents {
                    pass.set_vertex_buffer(1, tangents.slice(..));
                }
                match &draw.indices {
                    Some(indices) => {
                        pass.set_index_buffer(indices.slice(..), wgpu::IndexFormat::Uint32);
                        pass.draw_indexed(0..draw.element_count, 0, 0..draw.instance_count);
                    }
                    None => pass.draw(0..draw.element_count, 0..draw.instance_count),
                }
            }
        }

        if let Some(timer) = self.timer.as_mut() {
            timer.resolve(&mut encoder);
        }
        context.queue.submit(Some(encoder.finish()));

        self.stats = FrameStats {
            render_groups: self.groups.len() as u32,
            instances: self.groups.iter().map(RenderGroup::instance_count).sum(),
            shadow_passes,
            draw_calls: shadow_draws + draws.len() as u32,
            pipelines_built: self.pipelines.builds() as u32,
        };
        Ok(self.stats)
    }

    fn write_frame_uniforms(&mut self, context: &RenderContext, scene: &mut Scene) -> Result<()> {
        let camera = scene.camera();
        let mut uniform = SceneUniform::new(camera.view_proj(), camera.position());
        if let Some(environment) = &self.environment {
            uniform = uniform.with_environment(environment.max_mip_level(), ENVIRONMENT_INTENSITY);
        }

        let bounds = scene_bounds(scene);
        if let Some(shadows) = self.shadows.as_mut() {
            shadows.update(context, &mut scene.lights, &bounds)?;
        }

        let scene_write = self.scene_buffer.write_bytes(context, bytemuck::bytes_of(&uniform))?;
        let lights_write = self
            .lights_buffer
            .write_bytes(context, bytemuck::bytes_of(&LightsUniform::from_lights(&scene.lights)))?;
        if scene_write.reallocated || lights_write.reallocated {
            for group in &mut self.groups {
                group.invalidate_bind_groups();
            }
        }
        Ok(())
    }

    fn prepare_main_draws(&mut self, context: &RenderContext) -> Result<Vec<MainDraw>> {
        let scene_buffer = self.scene_buffer.buffer()?;
        let lights_buffer = self.lights_buffer.buffer()?;
        let mut draws = Vec::with_capacity(self.groups.len());

        for group in &mut self.groups {
            let (Some(pipeline), Some(material)) = (group.pipeline.clone(), group.material.clone()) else {
                return Err(RenderError::uninitialized(format!("{}Pipeline", group.mesh().label())));
            };
            let pass_groups = self
                .pass_bind_groups
                .get(pipeline.key())
                .ok_or_else(|| RenderError::uninitialized("PassBindGroups"))?;

            let mesh = Arc::clone(group.mesh());
            let instances = group.instance_buffer()?;
            let label = format!("{}SceneBindGroup", mesh.label());
            let scene = group
                .bind_group(|| {
                    pipeline.create_scene_bind_group(
                        &context.device,
                        &label,
                        &instances,
                        &scene_buffer,
                        &lights_buffer,
                        &material,
                    )
                })?
                .clone();

            let tangents = if group.key().uses_tangents() {
                mesh.tangent_buffer().transpose()?
            } else {
                None
            };
            let indices = mesh.index_buffer().transpose()?;
            let element_count = if indices.is_some() {
                mesh.index_count()
            } else {
                mesh.vertex_count()
            };

            draws.push(MainDraw {
                pipeline: pipeline.pipeline().clone(),
                scene,
                shadow: pass_groups.shadow.clone(),
                environment: pass_groups.environment.clone(),
                vertices: mesh.vertex_buffer()?,
                tangents,
                indices,
                element_count,
                instance_count: group.instance_count(),
            });
        }
        Ok(draws)
    }

    /// Blocks until the last frame's main-pass timing is readable. `None`
    /// when timing is off or unsupported.
    pub fn read_gpu_time_ms(&mut self, context: &RenderContext) -> Result<Option<f64>> {
        match self.timer.as_mut() {
            Some(timer) => timer.read_ms(context),
            None => Ok(None),
        }
    }
}

/// Shadow fitting volume. An empty scene fits around the origin.
fn scene_bounds(scene: &Scene) -> BoundingBox {
    scene
        .bounding_box()
        .unwrap_or_else(|| BoundingBox::new(Vec3::splat(-1.0), Vec3::splat(1.0)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::texture::FsImageLoader;

    #[test]
    fn new_renderer_validates_settings() {
        let settings = RenderSettings {
            aa_sample_count: 2,
            ..RenderSettings::default()
        };
        let renderer = Renderer::new(settings, wgpu::TextureFormat::Rgba8UnormSrgb, Arc::new(FsImageLoader));
        assert_eq!(renderer.settings().aa_sample_count, 1);
        assert_eq!(renderer.stats(), FrameStats::default());
        assert_eq!(renderer.pipeline_count(), 0);
    }

    #[test]
    fn empty_scene_bounds_surround_origin() {
        let bounds = scene_bounds(&Scene::new());
        assert!(bounds.contains(Vec3::ZERO, 0.0));
    }

    #[test]
    fn frame_uniform_sizes_match_shader_structs() {
        assert_eq!(SCENE_UNIFORM_SIZE, 96);
        // counts + 16 lights of six vec4s
        assert_eq!(LIGHTS_UNIFORM_SIZE, 16 + 16 * 96);
    }
}
