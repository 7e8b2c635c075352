//! Tests that need a real device. Each one returns early when the machine
//! has no usable adapter.

use std::path::Path;
use std::sync::{mpsc, Arc};

use glam::{Mat4, Vec3};
use wgpu_instanced::renderer::ibl_math;
use wgpu_instanced::renderer::internal::environment::BrdfLutCache;
use wgpu_instanced::renderer::primitives;
use wgpu_instanced::renderer::{PipelineCache, PipelineKey, ShadowMapBuilder, VertexLayout};
use wgpu_instanced::{
    BlinnPhongMaterial, Camera, ConfigError, EnvironmentSource, FsImageLoader, ImageData,
    ImageLoader, Light, Mesh, ModelInstance, PbrMaterial, RenderContext, RenderError,
    RenderSettings, Renderer, Result, Scene, ShadingModel,
};

const FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8UnormSrgb;

fn headless() -> Option<RenderContext> {
    match pollster::block_on(RenderContext::headless()) {
        Ok(context) => Some(context),
        Err(err) => {
            eprintln!("skipping GPU test: {err}");
            None
        }
    }
}

/// Serves a flat grey HDR image for any path.
struct ConstantLoader;

impl ImageLoader for ConstantLoader {
    fn load(&self, _path: &Path) -> Result<ImageData> {
        Ok(ImageData::rgba32f(16, 8, &[[0.5, 0.5, 0.5, 1.0]; 16 * 8]))
    }
}

fn target(context: &RenderContext, width: u32, height: u32) -> wgpu::Texture {
    context.device.create_texture(&wgpu::TextureDescriptor {
        label: Some("TestTarget"),
        size: wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: FORMAT,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
        view_formats: &[],
    })
}

fn cube_grid() -> Scene {
    let cube = Mesh::from_data("Cube", &primitives::cube()).unwrap();
    let material = PbrMaterial::new([0.7, 0.2, 0.2]);
    let mut scene = Scene::new();
    scene.set_camera(Camera::look_at(
        Vec3::new(4.0, 6.0, 8.0),
        Vec3::ZERO,
        60f32.to_radians(),
        1.0,
        0.1,
        100.0,
    ));
    for i in 0..16 {
        scene.add_model(ModelInstance::new(
            cube.clone(),
            material.clone(),
            Mat4::from_translation(Vec3::new((i % 4) as f32 * 1.5, 0.0, (i / 4) as f32 * 1.5)),
        ));
    }
    scene.add_light(Light::directional(Vec3::new(-0.3, -1.0, -0.2)).with_shadow());
    scene
}

#[test]
fn pipeline_cache_builds_each_key_once() {
    let Some(context) = headless() else { return };
    let key = PipelineKey {
        shading_model: ShadingModel::BlinnPhong,
        has_tangents: false,
        has_environment: false,
        shadow_map_size: 1024,
        sample_count: 1,
        color_format: FORMAT,
        vertex_layout: VertexLayout::INTERLEAVED,
    };

    let mut cache = PipelineCache::new();
    let first = pollster::block_on(cache.get_or_build(&context, key)).unwrap();
    let second = pollster::block_on(cache.get_or_build(&context, key)).unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(cache.builds(), 1);

    let tangent_key = PipelineKey {
        has_tangents: true,
        ..key
    };
    pollster::block_on(cache.get_or_build(&context, tangent_key)).unwrap();
    assert_eq!(cache.len(), 2);
}

#[test]
fn shadow_builder_rejects_scenes_without_casters() {
    let Some(context) = headless() else { return };
    let lights = vec![Light::point(Vec3::Y).with_shadow(), Light::directional(Vec3::NEG_Y)];
    let result = ShadowMapBuilder::new(256).build(&context, &lights);
    assert!(matches!(
        result,
        Err(RenderError::Config(ConfigError::NoShadowCasters))
    ));
}

#[test]
fn sixteen_cubes_render_in_one_instanced_draw() {
    let Some(context) = headless() else { return };
    let mut renderer = Renderer::new(RenderSettings::default(), FORMAT, Arc::new(ConstantLoader));
    let mut scene = cube_grid();
    let target = target(&context, 64, 64);

    pollster::block_on(renderer.prepare(&context, &mut scene)).unwrap();
    let stats = renderer.render(&context, &mut scene, &target).unwrap();

    assert_eq!(stats.render_groups, 1);
    assert_eq!(stats.instances, 16);
    assert_eq!(stats.shadow_passes, 1);
    // one shadow draw plus one main draw
    assert_eq!(stats.draw_calls, 2);
    assert_eq!(stats.pipelines_built, 1);
    assert!(scene.lights[0].shadow_map().is_some());
}

#[test]
fn render_after_scene_change_requires_prepare() {
    let Some(context) = headless() else { return };
    let mut renderer = Renderer::new(RenderSettings::default(), FORMAT, Arc::new(ConstantLoader));
    let mut scene = cube_grid();
    let target = target(&context, 32, 32);

    assert!(matches!(
        renderer.render(&context, &mut scene, &target),
        Err(RenderError::Uninitialized { .. })
    ));

    pollster::block_on(renderer.prepare(&context, &mut scene)).unwrap();
    renderer.render(&context, &mut scene, &target).unwrap();

    let sphere = Mesh::from_data("Sphere", &primitives::sphere(8, 4)).unwrap();
    scene.add_model(ModelInstance::new(
        sphere,
        BlinnPhongMaterial::new([0.1, 0.2, 0.9]),
        Mat4::IDENTITY,
    ));
    assert!(matches!(
        renderer.render(&context, &mut scene, &target),
        Err(RenderError::Uninitialized { .. })
    ));

    pollster::block_on(renderer.prepare(&context, &mut scene)).unwrap();
    let stats = renderer.render(&context, &mut scene, &target).unwrap();
    assert_eq!(stats.render_groups, 2);
}

#[test]
fn environment_mips_are_clamped_to_cube_size() {
    let Some(context) = headless() else { return };
    let settings = RenderSettings {
        environment_map_size: 16,
        irradiance_size: 4,
        specular_mip_count: 12,
        brdf_lut_size: 16,
        prefilter_sample_count: 16,
        brdf_sample_count: 16,
        ..RenderSettings::default()
    };
    let mut renderer = Renderer::new(settings, FORMAT, Arc::new(ConstantLoader));
    let source = EnvironmentSource::from_paths(&["sky.hdr"], 0.0).unwrap();

    let environment = pollster::block_on(renderer.build_environment(&context, &source)).unwrap();
    assert_eq!(environment.cube().size, 16);
    assert_eq!(environment.cube().mip_level_count, 5);
    assert_eq!(environment.irradiance().size, 4);
    assert_eq!(environment.prefiltered_mip_count(), 5);
    assert_eq!(environment.max_mip_level(), 4);
    assert_eq!(environment.brdf_lut().size, 16);

    let mut scene = cube_grid();
    scene.set_environment(Some(environment));
    pollster::block_on(renderer.prepare(&context, &mut scene)).unwrap();
    let stats = renderer.render(&context, &mut scene, &target(&context, 32, 32)).unwrap();
    assert_eq!(stats.render_groups, 1);
}

#[test]
fn unreadable_texture_fails_prepare() {
    let Some(context) = headless() else { return };
    let mut renderer = Renderer::new(RenderSettings::default(), FORMAT, Arc::new(FsImageLoader));
    let cube = Mesh::from_data("Cube", &primitives::cube()).unwrap();
    let mut scene = Scene::new();
    scene.add_model(ModelInstance::new(
        cube,
        PbrMaterial::default().with_albedo_map("does/not/exist/albedo.png"),
        Mat4::IDENTITY,
    ));

    let result = pollster::block_on(renderer.prepare(&context, &mut scene));
    match result {
        Err(RenderError::Image { path, .. }) => {
            assert_eq!(path, Path::new("does/not/exist/albedo.png"));
        }
        other => panic!("expected an image error, got {other:?}"),
    }
    assert!(matches!(
        renderer.render(&context, &mut scene, &target(&context, 16, 16)),
        Err(RenderError::Uninitialized { .. })
    ));
}

#[test]
fn target_directional_and_point_lights_make_two_shadow_layers() {
    let Some(context) = headless() else { return };
    let lights = vec![
        Light::target(Vec3::new(0.0, 6.0, 0.0), Vec3::ZERO, 80.0).with_shadow(),
        Light::directional(Vec3::new(-0.3, -1.0, -0.2)).with_shadow(),
        Light::point(Vec3::new(2.0, 3.0, 0.0)).with_shadow(),
    ];
    let maps = ShadowMapBuilder::new(256).build(&context, &lights).unwrap();
    assert_eq!(maps.layer_count(), 2);
    assert_eq!(maps.size(), 256);

    let mut renderer = Renderer::new(RenderSettings::default(), FORMAT, Arc::new(ConstantLoader));
    let mut scene = cube_grid();
    scene.lights = lights;
    pollster::block_on(renderer.prepare(&context, &mut scene)).unwrap();
    let stats = renderer.render(&context, &mut scene, &target(&context, 32, 32)).unwrap();
    assert_eq!(stats.shadow_passes, 2);
    assert!(scene.lights[2].shadow_map().is_none());
}

#[test]
fn shadow_resolution_change_builds_a_new_pipeline() {
    let Some(context) = headless() else { return };
    let mut renderer = Renderer::new(RenderSettings::default(), FORMAT, Arc::new(ConstantLoader));
    let mut scene = cube_grid();
    let target = target(&context, 32, 32);

    pollster::block_on(renderer.prepare(&context, &mut scene)).unwrap();
    renderer.render(&context, &mut scene, &target).unwrap();
    assert_eq!(renderer.pipeline_count(), 1);

    renderer.settings_mut().shadow_map_size = 2048;
    pollster::block_on(renderer.prepare(&context, &mut scene)).unwrap();
    renderer.render(&context, &mut scene, &target).unwrap();
    assert_eq!(renderer.pipeline_count(), 2);
}

/// Reads an Rg16Float texture whose rows are exactly 256 bytes.
fn read_rg16(context: &RenderContext, texture: &wgpu::Texture) -> Vec<[f32; 2]> {
    let size = texture.size();
    let bytes_per_row = size.width * 4;
    assert_eq!(bytes_per_row % wgpu::COPY_BYTES_PER_ROW_ALIGNMENT, 0);
    let buffer = context.device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("LutReadback"),
        size: (bytes_per_row * size.height) as u64,
        usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
        mapped_at_creation: false,
    });
    let mut encoder = context
        .device
        .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: None });
    encoder.copy_texture_to_buffer(
        wgpu::TexelCopyTextureInfo {
            texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        wgpu::TexelCopyBufferInfo {
            buffer: &buffer,
            layout: wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(bytes_per_row),
                rows_per_image: Some(size.height),
            },
        },
        size,
    );
    context.submit_and_wait(encoder).unwrap();

    let slice = buffer.slice(..);
    let (sender, receiver) = mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = sender.send(result);
    });
    context
        .device
        .poll(wgpu::PollType::Wait {
            submission_index: None,
            timeout: None,
        })
        .unwrap();
    receiver.recv().unwrap().unwrap();

    let texels = {
        let mapped = slice.get_mapped_range();
        let halves: Vec<u16> = bytemuck::pod_collect_to_vec(&mapped);
        halves
            .chunks_exact(2)
            .map(|rg| [half::f16::from_bits(rg[0]).to_f32(), half::f16::from_bits(rg[1]).to_f32()])
            .collect()
    };
    buffer.unmap();
    texels
}

#[test]
fn brdf_lut_matches_cpu_integral() {
    let Some(context) = headless() else { return };
    const SIZE: u32 = 64;
    const SAMPLES: u32 = 512;
    let mut luts = BrdfLutCache::new();
    let lut = pollster::block_on(luts.get_or_build(&context, SIZE, SAMPLES)).unwrap();
    let texels = read_rg16(&context, &lut.texture);

    // Texel centres: x is NdotV, y is roughness.
    let coordinate = |index: u32| (index as f32 + 0.5) / SIZE as f32;
    for (x, y) in [(SIZE - 1, 0), (SIZE / 2, SIZE / 2), (SIZE / 4, 3 * SIZE / 4)] {
        let gpu = texels[(y * SIZE + x) as usize];
        let cpu = ibl_math::integrate_brdf(coordinate(x), coordinate(y), SAMPLES);
        assert!((gpu[0] - cpu.x).abs() < 0.01, "scale at ({x}, {y}): {} vs {}", gpu[0], cpu.x);
        assert!((gpu[1] - cpu.y).abs() < 0.01, "bias at ({x}, {y}): {} vs {}", gpu[1], cpu.y);
    }

    // Mirror reflection seen head on: all scale, no bias.
    let corner = texels[(SIZE - 1) as usize];
    assert!((corner[0] - 1.0).abs() < 0.02, "{corner:?}");
    assert!(corner[1].abs() < 0.02, "{corner:?}");
}

#[test]
fn cube_face_sources_need_six_paths() {
    let faces = ["px.png", "nx.png", "py.png", "ny.png", "pz.png", "nz.png"];
    let source = EnvironmentSource::from_paths(&faces, 0.0).unwrap();
    assert_eq!(source.paths().len(), 6);

    assert_eq!(
        EnvironmentSource::from_paths(&faces[..3], 0.0),
        Err(ConfigError::EnvironmentSourceCount { count: 3 })
    );
}
