//! Image-based lighting precomputation.
//!
//! Stages run strictly in order, each submitted and waited on before the
//! next samples its output: source upload, cube projection and its mip
//! chain, irradiance
//! (SH projection or brute force), GGX prefiltering per mip, then the BRDF
//! LUT, which is shared by every environment on the device.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use bytemuck::{Pod, Zeroable};
use wgpu::util::DeviceExt;

use crate::error::{ConfigError, RenderError, Result};
use crate::renderer::ibl_math;
use crate::renderer::internal::bindings::{BindingLayout, BindingLayoutBuilder, BoundResource};
use crate::renderer::internal::context::{DeviceId, RenderContext};
use crate::renderer::internal::pipeline::{validated, BuildCache};
use crate::renderer::internal::samplers::{SamplerCache, SamplerKind};
use crate::renderer::texture::{GpuTexture, ImageLoader};
use crate::renderer::PipelineBuilder;
use crate::settings::{max_mip_levels, IrradianceStrategy, RenderSettings};

pub const CUBE_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba16Float;
pub const BRDF_LUT_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rg16Float;

const CUBE_VERTEX_COUNT: u32 = 36;
const SH_PARTIALS: u64 = 6 * 10;

/// Where the environment radiance comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum EnvironmentSource {
    /// One latitude-longitude image, rotated about +Y by `rotation_deg`.
    Equirectangular { path: PathBuf, rotation_deg: f32 },
    /// Six face images in +X, -X, +Y, -Y, +Z, -Z order.
    CubeFaces { paths: [PathBuf; 6] },
}

impl EnvironmentSource {
    /// One path means equirectangular, six mean cube faces. Anything else
    /// is rejected.
    pub fn from_paths<P: AsRef<Path>>(
        paths: &[P],
        rotation_deg: f32,
    ) -> std::result::Result<Self, ConfigError> {
        match paths {
            [path] => Ok(Self::Equirectangular {
                path: path.as_ref().to_path_buf(),
                rotation_deg,
            }),
            [px, nx, py, ny, pz, nz] => Ok(Self::CubeFaces {
                paths: [px, nx, py, ny, pz, nz].map(|path| path.as_ref().to_path_buf()),
            }),
            _ => Err(ConfigError::EnvironmentSourceCount { count: paths.len() }),
        }
    }

    pub fn paths(&self) -> Vec<&Path> {
        match self {
            Self::Equirectangular { path, .. } => vec![path.as_path()],
            Self::CubeFaces { paths } => paths.iter().map(PathBuf::as_path).collect(),
        }
    }

    fn rotation_radians(&self) -> f32 {
        match self {
            Self::Equirectangular { rotation_deg, .. } => rotation_deg.to_radians(),
            Self::CubeFaces { .. } => 0.0,
        }
    }
}

/// Six-layer render-target cube texture.
#[derive(Debug)]
pub struct CubeTexture {
    pub texture: wgpu::Texture,
    /// `Cube` view over every mip.
    pub view: wgpu::TextureView,
    pub size: u32,
    pub mip_level_count: u32,
}

impl CubeTexture {
    fn new(device: &wgpu::Device, label: &str, size: u32, mip_level_count: u32) -> Self {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width: size,
                height: size,
                depth_or_array_layers: 6,
            },
            mip_level_count,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: CUBE_FORMAT,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor {
            label: Some(&format!("{label}CubeView")),
            dimension: Some(wgpu::TextureViewDimension::Cube),
            array_layer_count: Some(6),
            ..Default::default()
        });
        Self {
            texture,
            view,
            size,
            mip_level_count,
        }
    }

    /// Mip 0 as a 2D array, for `textureLoad` in compute.
    fn layers_view(&self) -> wgpu::TextureView {
        self.texture.create_view(&wgpu::TextureViewDescriptor {
            label: Some("CubeLayersView"),
            dimension: Some(wgpu::TextureViewDimension::D2Array),
            base_mip_level: 0,
            mip_level_count: Some(1),
            array_layer_count: Some(6),
            ..Default::default()
        })
    }

    /// One mip as a `Cube` view, so it can be sampled while another mip
    /// of the same texture is rendered.
    fn mip_view(&self, mip: u32) -> wgpu::TextureView {
        self.texture.create_view(&wgpu::TextureViewDescriptor {
            label: Some("CubeMipView"),
            dimension: Some(wgpu::TextureViewDimension::Cube),
            base_mip_level: mip,
            mip_level_count: Some(1),
            array_layer_count: Some(6),
            ..Default::default()
        })
    }

    fn face_view(&self, face: u32, mip: u32) -> wgpu::TextureView {
        self.texture.create_view(&wgpu::TextureViewDescriptor {
            label: Some("CubeFaceView"),
            dimension: Some(wgpu::TextureViewDimension::D2),
            base_mip_level: mip,
            mip_level_count: Some(1),
            base_array_layer: face,
            array_layer_count: Some(1),
            ..Default::default()
        })
    }
}

/// Split-sum lookup texture: x is NdotV, y is roughness.
#[derive(Debug)]
pub struct BrdfLut {
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
    pub size: u32,
}

impl BrdfLut {
    fn new(device: &wgpu::Device, size: u32) -> Self {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("BrdfLut"),
            size: wgpu::Extent3d {
                width: size,
                height: size,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: BRDF_LUT_FORMAT,
            usage: wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Self {
            texture,
            view,
            size,
        }
    }

    async fn build(context: &RenderContext, size: u32, sample_count: u32) -> Result<Self> {
        log::info!("Integrating {}x{} BRDF LUT ({} samples)", size, size, sample_count);

        let layout = BindingLayoutBuilder::new()
            .group()
            .uniform_buffer("BrdfParams", wgpu::ShaderStages::FRAGMENT)
            .build();
        let source = format!(
            "{}\n{}",
            include_str!("../../shader/ggx.wgsl"),
            include_str!("../../shader/brdf_lut.wgsl")
        );
        let stage = StagePipeline::render(context, "BrdfLutPipeline", &source, layout, BRDF_LUT_FORMAT, false).await?;

        let lut = Self::new(&context.device, size);
        let params = params_buffer(context, "BrdfParams", [sample_count as f32, 0.0, 0.0, 0.0]);
        let bind_group = stage.bind_group(context, 0, &[BoundResource::Buffer(&params)])?;

        let mut encoder = context.encoder("BrdfLutEncoder");
        {
            let mut pass = begin_target_pass(&mut encoder, "BrdfLutPass", &lut.view);
            pass.set_pipeline(&stage.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.draw(0..3, 0..1);
        }
        context.submit_and_wait(encoder)?;
        params.destroy();

        Ok(lut)
    }
}

/// One BRDF LUT per (device, size, sample count).
#[derive(Debug, Default)]
pub struct BrdfLutCache {
    luts: BuildCache<(DeviceId, u32, u32), BrdfLut>,
}

impl BrdfLutCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get_or_build(
        &mut self,
        context: &RenderContext,
        size: u32,
        sample_count: u32,
    ) -> Result<Arc<BrdfLut>> {
        let key = (context.id(), size, sample_count);
        if let Some(lut) = self.luts.get(&key) {
            return Ok(lut);
        }
        let lut = BrdfLut::build(context, size, sample_count).await?;
        Ok(self.luts.insert(key, lut))
    }

    pub fn len(&self) -> usize {
        self.luts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.luts.is_empty()
    }
}

/// The finished IBL textures. Immutable once built.
#[derive(Debug)]
pub struct EnvironmentMap {
    device: DeviceId,
    source: EnvironmentSource,
    strategy: IrradianceStrategy,
    flat: GpuTexture,
    cube: CubeTexture,
    irradiance: CubeTexture,
    prefiltered: CubeTexture,
    brdf_lut: Arc<BrdfLut>,
}

impl EnvironmentMap {
    pub fn device(&self) -> DeviceId {
        self.device
    }

    pub fn source(&self) -> &EnvironmentSource {
        &self.source
    }

    pub fn irradiance_strategy(&self) -> IrradianceStrategy {
        self.strategy
    }

    /// The uploaded source: a 2D view for equirectangular input, a 2D
    /// array for cube faces.
    pub fn flat(&self) -> &GpuTexture {
        &self.flat
    }

    pub fn cube(&self) -> &CubeTexture {
        &self.cube
    }

    pub fn irradiance(&self) -> &CubeTexture {
        &self.irradiance
    }

    pub fn prefiltered(&self) -> &CubeTexture {
        &self.prefiltered
    }

    pub fn brdf_lut(&self) -> &Arc<BrdfLut> {
        &self.brdf_lut
    }

    pub fn prefiltered_mip_count(&self) -> u32 {
        self.prefiltered.mip_level_count
    }

    /// LOD sampled at roughness 1.
    pub fn max_mip_level(&self) -> u32 {
        self.prefiltered.mip_level_count.saturating_sub(1)
    }
}

/// 1x1 black stand-ins bound in group 2 when a scene has no environment.
#[derive(Debug)]
pub struct EnvironmentFallback {
    pub irradiance: CubeTexture,
    pub prefiltered: CubeTexture,
    pub brdf_lut: BrdfLut,
}

impl EnvironmentFallback {
    pub fn new(context: &RenderContext) -> Self {
        Self {
            irradiance: CubeTexture::new(&context.device, "FallbackIrradiance", 1, 1),
            prefiltered: CubeTexture::new(&context.device, "FallbackPrefiltered", 1, 1),
            brdf_lut: BrdfLut::new(&context.device, 1),
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct FaceViewsUniform {
    view_proj: [[[f32; 4]; 4]; 6],
}

impl FaceViewsUniform {
    fn new() -> Self {
        let projection = ibl_math::cube_face_projection();
        let mut view_proj = [[[0.0; 4]; 4]; 6];
        for (face, matrix) in view_proj.iter_mut().enumerate() {
            *matrix = (projection * ibl_math::cube_face_view(face as u32)).to_cols_array_2d();
        }
        Self { view_proj }
    }
}

fn params_buffer(context: &RenderContext, label: &str, values: [f32; 4]) -> wgpu::Buffer {
    context.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some(label),
        contents: bytemuck::cast_slice(&values),
        usage: wgpu::BufferUsages::UNIFORM,
    })
}

fn begin_target_pass<'e>(
    encoder: &'e mut wgpu::CommandEncoder,
    label: &str,
    view: &wgpu::TextureView,
) -> wgpu::RenderPass<'e> {
    encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
        label: Some(label),
        color_attachments: &[Some(wgpu::RenderPassColorAttachment {
            view,
            depth_slice: None,
            resolve_target: None,
            ops: wgpu::Operations {
                load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                store: wgpu::StoreOp::Store,
            },
        })],
        depth_stencil_attachment: None,
        timestamp_writes: None,
        occlusion_query_set: None,
    })
}

/// A precomputation pipeline with the layouts its bind groups need.
struct StagePipeline {
    label: String,
    layout: BindingLayout,
    group_layouts: Vec<wgpu::BindGroupLayout>,
    pipeline: wgpu::RenderPipeline,
}

impl StagePipeline {
    async fn render(
        context: &RenderContext,
        label: &str,
        source: &str,
        layout: BindingLayout,
        format: wgpu::TextureFormat,
        cube: bool,
    ) -> Result<Self> {
        let (group_layouts, pipeline) = validated(context, label, || {
            let shader = context.device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(label),
                source: wgpu::ShaderSource::Wgsl(source.into()),
            });
            let group_layouts = layout.create_layouts(&context.device, label);
            let layout_refs: Vec<&wgpu::BindGroupLayout> = group_layouts.iter().collect();
            let pipeline_layout = context.device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(label),
                bind_group_layouts: &layout_refs,
                push_constant_ranges: &[],
            });

            let mut builder = PipelineBuilder::new(&context.device, &pipeline_layout, &shader)
                .with_label(label)
                .with_color_target(format, None)
                .with_no_culling();
            if cube {
                builder = builder.with_vertex_entry("vs_cube");
            }
            (group_layouts, builder.build())
        })
        .await?;

        Ok(Self {
            label: label.to_string(),
            layout,
            group_layouts,
            pipeline,
        })
    }

    fn bind_group(
        &self,
        context: &RenderContext,
        group: usize,
        resources: &[BoundResource<'_>],
    ) -> Result<wgpu::BindGroup> {
        let Some(group_layout) = self.group_layouts.get(group) else {
            return Err(RenderError::Binding {
                label: self.label.clone(),
                message: format!("no bind group layout {group}"),
            });
        };
        self.layout.create_bind_group(
            &context.device,
            group_layout,
            group,
            &format!("{}Group{}", self.label, group),
            resources,
        )
    }

    /// Draws the unit cube into each face of `target` at `mip`.
    fn render_faces(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        bind_groups: &[&wgpu::BindGroup],
        target: &CubeTexture,
        mip: u32,
    ) {
        for face in 0..6 {
            let view = target.face_view(face, mip);
            let mut pass = begin_target_pass(encoder, &self.label, &view);
            pass.set_pipeline(&self.pipeline);
            for (index, bind_group) in bind_groups.iter().enumerate() {
                pass.set_bind_group(index as u32, *bind_group, &[]);
            }
            pass.draw(0..CUBE_VERTEX_COUNT, face..face + 1);
        }
    }
}

fn cube_source(fragment: &str) -> String {
    format!("{}\n{}", include_str!("../../shader/cube.wgsl"), fragment)
}

/// Runs the four IBL stages for one source.
#[derive(Debug, Clone)]
pub struct EnvironmentMapBuilder {
    environment_map_size: u32,
    irradiance_size: u32,
    specular_mip_count: u32,
    brdf_lut_size: u32,
    irradiance_strategy: IrradianceStrategy,
    irradiance_sample_delta: f32,
    prefilter_sample_count: u32,
    brdf_sample_count: u32,
}

impl EnvironmentMapBuilder {
    pub fn new(settings: &RenderSettings) -> Self {
        let environment_map_size = settings.environment_map_size.max(1);
        Self {
            environment_map_size,
            irradiance_size: settings.irradiance_size.max(1),
            specular_mip_count: settings
                .specular_mip_count
                .clamp(1, max_mip_levels(environment_map_size)),
            brdf_lut_size: settings.brdf_lut_size.max(1),
            irradiance_strategy: settings.irradiance_strategy,
            irradiance_sample_delta: settings.irradiance_sample_delta,
            prefilter_sample_count: settings.prefilter_sample_count.max(1),
            brdf_sample_count: settings.brdf_sample_count.max(1),
        }
    }

    pub fn with_irradiance_strategy(mut self, strategy: IrradianceStrategy) -> Self {
        self.irradiance_strategy = strategy;
        self
    }

    pub fn specular_mip_count(&self) -> u32 {
        self.specular_mip_count
    }

    pub async fn build(
        &self,
        context: &RenderContext,
        source: &EnvironmentSource,
        loader: &dyn ImageLoader,
        samplers: &mut SamplerCache,
        brdf_luts: &mut BrdfLutCache,
    ) -> Result<EnvironmentMap> {
        let started = Instant::now();
        log::info!(
            "Building environment map from {:?} ({}px, {} specular mips, {:?} irradiance)",
            source.paths(),
            self.environment_map_size,
            self.specular_mip_count,
            self.irradiance_strategy
        );

        let face_views = context.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("CubeFaceViews"),
            contents: bytemuck::bytes_of(&FaceViewsUniform::new()),
            usage: wgpu::BufferUsages::UNIFORM,
        });

        let flat = self.upload_source(context, source, loader)?;
        let cube = self
            .project_to_cube(context, source, &flat, &face_views, samplers)
            .await?;
        self.generate_mips(context, &cube, &face_views, samplers).await?;
        let irradiance = match self.irradiance_strategy {
            IrradianceStrategy::SphericalHarmonics => {
                self.convolve_sh(context, &cube, &face_views).await?
            }
            IrradianceStrategy::BruteForce => {
                self.convolve_brute_force(context, &cube, &face_views, samplers)
                    .await?
            }
        };
        let prefiltered = self.prefilter(context, &cube, &face_views, samplers).await?;
        let brdf_lut = brdf_luts
            .get_or_build(context, self.brdf_lut_size, self.brdf_sample_count)
            .await?;
        face_views.destroy();

        log::info!("Environment map ready in {:.2?}", started.elapsed());
        Ok(EnvironmentMap {
            device: context.id(),
            source: source.clone(),
            strategy: self.irradiance_strategy,
            flat,
            cube,
            irradiance,
            prefiltered,
            brdf_lut,
        })
    }

    fn upload_source(
        &self,
        context: &RenderContext,
        source: &EnvironmentSource,
        loader: &dyn ImageLoader,
    ) -> Result<GpuTexture> {
        let images = source
            .paths()
            .into_iter()
            .map(|path| loader.load(path))
            .collect::<Result<Vec<_>>>()?;
        GpuTexture::from_layers(context, &images, true, "EnvironmentSource")
    }

    async fn project_to_cube(
        &self,
        context: &RenderContext,
        source: &EnvironmentSource,
        flat: &GpuTexture,
        face_views: &wgpu::Buffer,
        samplers: &mut SamplerCache,
    ) -> Result<CubeTexture> {
        let (fragment, dimension, sampler) = match source {
            EnvironmentSource::Equirectangular { .. } => (
                include_str!("../../shader/equirect_to_cube.wgsl"),
                wgpu::TextureViewDimension::D2,
                samplers.get(context, SamplerKind::Linear),
            ),
            EnvironmentSource::CubeFaces { .. } => (
                include_str!("../../shader/faces_to_cube.wgsl"),
                wgpu::TextureViewDimension::D2Array,
                samplers.get(context, SamplerKind::LinearClamp),
            ),
        };
        let layout = BindingLayoutBuilder::new()
            .group()
            .uniform_buffer("FaceViews", wgpu::ShaderStages::VERTEX)
            .group()
            .texture("Source", dimension)
            .sampler("SourceSampler", wgpu::SamplerBindingType::Filtering)
            .uniform_buffer("ProjectionParams", wgpu::ShaderStages::FRAGMENT)
            .build();
        let stage =
            StagePipeline::render(context, "CubeProjection", &cube_source(fragment), layout, CUBE_FORMAT, true)
                .await?;

        let cube = CubeTexture::new(
            &context.device,
            "EnvironmentCube",
            self.environment_map_size,
            max_mip_levels(self.environment_map_size),
        );
        let params = params_buffer(
            context,
            "ProjectionParams",
            [source.rotation_radians(), 0.0, 0.0, 0.0],
        );
        let faces_group = stage.bind_group(context, 0, &[BoundResource::Buffer(face_views)])?;
        let source_group = stage.bind_group(
            context,
            1,
            &[
                BoundResource::TextureView(&flat.view),
                BoundResource::Sampler(&sampler),
                BoundResource::Buffer(&params),
            ],
        )?;

        let mut encoder = context.encoder("CubeProjectionEncoder");
        stage.render_faces(&mut encoder, &[&faces_group, &source_group], &cube, 0);
        context.submit_and_wait(encoder)?;
        params.destroy();

        Ok(cube)
    }

    /// Downsamples mip 0 into the rest of the chain. The prefilter reads
    /// these so rough lobes do not alias.
    async fn generate_mips(
        &self,
        context: &RenderContext,
        cube: &CubeTexture,
        face_views: &wgpu::Buffer,
        samplers: &mut SamplerCache,
    ) -> Result<()> {
        if cube.mip_level_count <= 1 {
            return Ok(());
        }
        let layout = BindingLayoutBuilder::new()
            .group()
            .uniform_buffer("FaceViews", wgpu::ShaderStages::VERTEX)
            .group()
            .cube_texture("SourceMip")
            .sampler("SourceSampler", wgpu::SamplerBindingType::Filtering)
            .build();
        let stage = StagePipeline::render(
            context,
            "CubeMipChain",
            &cube_source(include_str!("../../shader/downsample_cube.wgsl")),
            layout,
            CUBE_FORMAT,
            true,
        )
        .await?;

        let sampler = samplers.get(context, SamplerKind::LinearClamp);
        let faces_group = stage.bind_group(context, 0, &[BoundResource::Buffer(face_views)])?;
        let mut encoder = context.encoder("CubeMipChainEncoder");
        for mip in 1..cube.mip_level_count {
            let source = cube.mip_view(mip - 1);
            let source_group = stage.bind_group(
                context,
                1,
                &[BoundResource::TextureView(&source), BoundResource::Sampler(&sampler)],
            )?;
            stage.render_faces(&mut encoder, &[&faces_group, &source_group], cube, mip);
        }
        context.submit_and_wait(encoder)?;
        log::debug!("Generated {} environment cube mips", cube.mip_level_count);

        Ok(())
    }

    async fn convolve_sh(
        &self,
        context: &RenderContext,
        cube: &CubeTexture,
        face_views: &wgpu::Buffer,
    ) -> Result<CubeTexture> {
        let device = &context.device;
        let label = "ShProjection";

        let project_layout = BindingLayoutBuilder::new()
            .group()
            .texture_for("EnvironmentFaces", wgpu::TextureViewDimension::D2Array, wgpu::ShaderStages::COMPUTE)
            .storage_buffer_rw("ShPartials", wgpu::ShaderStages::COMPUTE)
            .build();
        let (project_group_layouts, project_pipeline) = validated(context, label, || {
            let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(label),
                source: wgpu::ShaderSource::Wgsl(
                    format!(
                        "{}\n{}",
                        include_str!("../../shader/sh9.wgsl"),
                        include_str!("../../shader/sh_project.wgsl")
                    )
                    .into(),
                ),
            });
            let group_layouts = project_layout.create_layouts(device, label);
            let layout_refs: Vec<&wgpu::BindGroupLayout> = group_layouts.iter().collect();
            let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(label),
                bind_group_layouts: &layout_refs,
                push_constant_ranges: &[],
            });
            let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(label),
                layout: Some(&pipeline_layout),
                module: &shader,
                entry_point: Some("cs_main"),
                compilation_options: Default::default(),
                cache: None,
            });
            (group_layouts, pipeline)
        })
        .await?;

        let evaluate_layout = BindingLayoutBuilder::new()
            .group()
            .uniform_buffer("FaceViews", wgpu::ShaderStages::VERTEX)
            .group()
            .storage_buffer("ShPartials", wgpu::ShaderStages::FRAGMENT)
            .build();
        let evaluate_source = cube_source(&format!(
            "{}\n{}",
            include_str!("../../shader/sh9.wgsl"),
            include_str!("../../shader/sh_irradiance.wgsl")
        ));
        let evaluate =
            StagePipeline::render(context, "ShIrradiance", &evaluate_source, evaluate_layout, CUBE_FORMAT, true)
                .await?;

        let partials = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("ShPartials"),
            size: SH_PARTIALS * 16,
            usage: wgpu::BufferUsages::STORAGE,
            mapped_at_creation: false,
        });
        let layers = cube.layers_view();
        let Some(project_group_layout) = project_group_layouts.first() else {
            return Err(RenderError::Binding {
                label: label.into(),
                message: "no bind group layout 0".into(),
            });
        };
        let project_group = project_layout.create_bind_group(
            device,
            project_group_layout,
            0,
            "ShProjectionGroup0",
            &[
                BoundResource::TextureView(&layers),
                BoundResource::Buffer(&partials),
            ],
        )?;
        let faces_group = evaluate.bind_group(context, 0, &[BoundResource::Buffer(face_views)])?;
        let partials_group = evaluate.bind_group(context, 1, &[BoundResource::Buffer(&partials)])?;

        let irradiance = CubeTexture::new(device, "IrradianceCube", self.irradiance_size, 1);
        let mut encoder = context.encoder("ShIrradianceEncoder");
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some(label),
                timestamp_writes: None,
            });
            pass.set_pipeline(&project_pipeline);
            pass.set_bind_group(0, &project_group, &[]);
            pass.dispatch_workgroups(6, 1, 1);
        }
        evaluate.render_faces(&mut encoder, &[&faces_group, &partials_group], &irradiance, 0);
        context.submit_and_wait(encoder)?;
        partials.destroy();

        Ok(irradiance)
    }

    async fn convolve_brute_force(
        &self,
        context: &RenderContext,
        cube: &CubeTexture,
        face_views: &wgpu::Buffer,
        samplers: &mut SamplerCache,
    ) -> Result<CubeTexture> {
        let layout = BindingLayoutBuilder::new()
            .group()
            .uniform_buffer("FaceViews", wgpu::ShaderStages::VERTEX)
            .group()
            .cube_texture("EnvironmentCube")
            .sampler("EnvironmentSampler", wgpu::SamplerBindingType::Filtering)
            .uniform_buffer("IrradianceParams", wgpu::ShaderStages::FRAGMENT)
            .build();
        let stage = StagePipeline::render(
            context,
            "IrradianceConvolution",
            &cube_source(include_str!("../../shader/irradiance.wgsl")),
            layout,
            CUBE_FORMAT,
            true,
        )
        .await?;

        let sampler = samplers.get(context, SamplerKind::LinearClamp);
        let params = params_buffer(
            context,
            "IrradianceParams",
            [self.irradiance_sample_delta, 0.0, 0.0, 0.0],
        );
        let faces_group = stage.bind_group(context, 0, &[BoundResource::Buffer(face_views)])?;
        let source_group = stage.bind_group(
            context,
            1,
            &[
                BoundResource::TextureView(&cube.view),
                BoundResource::Sampler(&sampler),
                BoundResource::Buffer(&params),
            ],
        )?;

        let irradiance = CubeTexture::new(&context.device, "IrradianceCube", self.irradiance_size, 1);
        let mut encoder = context.encoder("IrradianceEncoder");
        stage.render_faces(&mut encoder, &[&faces_group, &source_group], &irradiance, 0);
        context.submit_and_wait(encoder)?;
        params.destroy();

        Ok(irradiance)
    }

    async fn prefilter(
        &self,
        context: &RenderContext,
        cube: &CubeTexture,
        face_views: &wgpu::Buffer,
        samplers: &mut SamplerCache,
    ) -> Result<CubeTexture> {
        let layout = BindingLayoutBuilder::new()
            .group()
            .uniform_buffer("FaceViews", wgpu::ShaderStages::VERTEX)
            .group()
            .cube_texture("EnvironmentCube")
            .sampler("EnvironmentSampler", wgpu::SamplerBindingType::Filtering)
            .uniform_buffer("PrefilterParams", wgpu::ShaderStages::FRAGMENT)
            .build();
        let source = cube_source(&format!(
            "{}\n{}",
            include_str!("../../shader/ggx.wgsl"),
            include_str!("../../shader/prefilter.wgsl")
        ));
        let stage = StagePipeline::render(context, "SpecularPrefilter", &source, layout, CUBE_FORMAT, true).await?;

        let sampler = samplers.get(context, SamplerKind::LinearClamp);
        let prefiltered = CubeTexture::new(
            &context.device,
            "PrefilteredCube",
            self.environment_map_size,
            self.specular_mip_count,
        );
        let faces_group = stage.bind_group(context, 0, &[BoundResource::Buffer(face_views)])?;

        let mut params = Vec::with_capacity(self.specular_mip_count as usize);
        let mut encoder = context.encoder("PrefilterEncoder");
        for mip in 0..self.specular_mip_count {
            let roughness = ibl_math::prefilter_roughness(mip, self.specular_mip_count);
            log::debug!(
                "Prefiltering mip {} ({}px) at roughness {:.2}",
                mip,
                ibl_math::mip_size(self.environment_map_size, mip),
                roughness
            );
            let mip_params = params_buffer(
                context,
                "PrefilterParams",
                [roughness, self.prefilter_sample_count as f32, 0.0, 0.0],
            );
            let source_group = stage.bind_group(
                context,
                1,
                &[
                    BoundResource::TextureView(&cube.view),
                    BoundResource::Sampler(&sampler),
                    BoundResource::Buffer(&mip_params),
                ],
            )?;
            stage.render_faces(&mut encoder, &[&faces_group, &source_group], &prefiltered, mip);
            params.push(mip_params);
        }
        context.submit_and_wait(encoder)?;
        for buffer in params {
            buffer.destroy();
        }

        Ok(prefiltered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_path_is_equirectangular() {
        let source = EnvironmentSource::from_paths(&["sky.hdr"], 90.0).unwrap();
        assert_eq!(
            source,
            EnvironmentSource::Equirectangular {
                path: PathBuf::from("sky.hdr"),
                rotation_deg: 90.0,
            }
        );
        assert!((source.rotation_radians() - std::f32::consts::FRAC_PI_2).abs() < 1e-6);
    }

    #[test]
    fn six_paths_are_cube_faces_in_order() {
        let names = ["px.png", "nx.png", "py.png", "ny.png", "pz.png", "nz.png"];
        let source = EnvironmentSource::from_paths(&names, 45.0).unwrap();
        let paths: Vec<_> = source.paths().iter().map(|p| p.to_string_lossy().into_owned()).collect();
        assert_eq!(paths, names);
        assert_eq!(source.rotation_radians(), 0.0);
    }

    #[test]
    fn other_path_counts_are_rejected() {
        for count in [0, 2, 5, 7] {
            let paths = vec!["face.png"; count];
            assert_eq!(
                EnvironmentSource::from_paths(&paths, 0.0),
                Err(ConfigError::EnvironmentSourceCount { count })
            );
        }
    }

    #[test]
    fn builder_clamps_mips_to_the_cube_size() {
        let settings = RenderSettings {
            environment_map_size: 16,
            specular_mip_count: 12,
            ..RenderSettings::default()
        };
        assert_eq!(EnvironmentMapBuilder::new(&settings).specular_mip_count(), 5);
    }

    #[test]
    fn face_views_uniform_is_six_matrices() {
        assert_eq!(std::mem::size_of::<FaceViewsUniform>(), 6 * 64);
    }
}
