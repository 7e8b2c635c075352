use std::sync::{mpsc, Arc};

use glam::{Mat4, Vec3};
use wgpu_instanced::renderer::primitives;
use wgpu_instanced::{
    BlinnPhongMaterial, Camera, EnvironmentSource, FsImageLoader, Light, Mesh, ModelInstance,
    PbrMaterial, RenderContext, RenderError, RenderSettings, Renderer, Result, Scene,
};

const WIDTH: u32 = 1280;
const HEIGHT: u32 = 720;
const FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8UnormSrgb;
const OUTPUT: &str = "frame.png";

fn main() {
    wgpu_instanced::init_logging();
    if let Err(err) = pollster::block_on(run()) {
        log::error!("Offscreen render failed: {err}");
        std::process::exit(1);
    }
}

/// Renders one frame of the demo scene and writes it to `frame.png`.
/// Optional arguments name 1 equirectangular or 6 cube-face images.
async fn run() -> Result<()> {
    let context = RenderContext::headless().await?;
    let settings = RenderSettings::load();
    let mut renderer = Renderer::new(settings, FORMAT, Arc::new(FsImageLoader));

    let mut scene = demo_scene()?;
    let environment_paths: Vec<String> = std::env::args().skip(1).collect();
    if !environment_paths.is_empty() {
        let source = EnvironmentSource::from_paths(environment_paths.as_slice(), 0.0)?;
        let environment = renderer.build_environment(&context, &source).await?;
        scene.set_environment(Some(environment));
    }

    renderer.prepare(&context, &mut scene).await?;

    let target = context.device.create_texture(&wgpu::TextureDescriptor {
        label: Some("OffscreenTarget"),
        size: wgpu::Extent3d {
            width: WIDTH,
            height: HEIGHT,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: FORMAT,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
        view_formats: &[],
    });

    let stats = renderer.render(&context, &mut scene, &target)?;
    log::info!(
        "{} groups, {} instances, {} shadow passes, {} draw calls, {} pipelines",
        stats.render_groups,
        stats.instances,
        stats.shadow_passes,
        stats.draw_calls,
        stats.pipelines_built
    );
    if let Some(ms) = renderer.read_gpu_time_ms(&context)? {
        log::info!("Main pass took {ms:.3} ms on the GPU");
    }

    let pixels = read_back(&context, &target)?;
    image::save_buffer(OUTPUT, &pixels, WIDTH, HEIGHT, image::ColorType::Rgba8).map_err(|err| {
        RenderError::Image {
            path: OUTPUT.into(),
            message: err.to_string(),
        }
    })?;
    log::info!("Wrote {OUTPUT}");
    Ok(())
}

fn demo_scene() -> Result<Scene> {
    let cube = Mesh::from_data("Cube", &primitives::cube())?;
    let sphere = Mesh::from_data("Sphere", &primitives::sphere(48, 24))?;
    let floor = Mesh::from_data("Floor", &primitives::plane(20.0))?;

    let mut scene = Scene::new();
    scene.set_camera(Camera::look_at(
        Vec3::new(6.0, 5.0, 9.0),
        Vec3::new(0.0, 0.5, 0.0),
        50f32.to_radians(),
        WIDTH as f32 / HEIGHT as f32,
        0.1,
        100.0,
    ));

    scene.add_model(ModelInstance::new(
        floor,
        BlinnPhongMaterial::new([0.6, 0.6, 0.6]).with_shininess(8.0),
        Mat4::IDENTITY,
    ));

    // 4x4 grid sharing one material: a single instanced draw.
    let cube_material = PbrMaterial::new([0.8, 0.3, 0.2]).with_roughness(0.4);
    for i in 0..16 {
        let x = (i % 4) as f32 * 1.5 - 2.25;
        let z = (i / 4) as f32 * 1.5 - 2.25;
        scene.add_model(ModelInstance::new(
            cube.clone(),
            cube_material.clone(),
            Mat4::from_translation(Vec3::new(x, 0.5, z)) * Mat4::from_scale(Vec3::splat(0.8)),
        ));
    }

    scene.add_model(ModelInstance::new(
        sphere.clone(),
        PbrMaterial::new([0.9, 0.9, 0.95]).with_metallic(1.0).with_roughness(0.2),
        Mat4::from_translation(Vec3::new(-1.5, 2.0, 0.0)),
    ));
    scene.add_model(ModelInstance::new(
        sphere,
        BlinnPhongMaterial::new([0.2, 0.4, 0.9]).with_shininess(64.0),
        Mat4::from_translation(Vec3::new(1.5, 2.0, 0.0)),
    ));

    scene.add_light(Light::directional(Vec3::new(-0.4, -1.0, -0.3)).with_shadow());
    scene.add_light(
        Light::target(Vec3::new(4.0, 6.0, 4.0), Vec3::ZERO, 45.0)
            .with_intensity(2.0)
            .with_shadow(),
    );
    scene.add_light(Light::point(Vec3::new(0.0, 3.0, -3.0)).with_color(Vec3::new(1.0, 0.8, 0.6)));
    Ok(scene)
}

fn read_back(context: &RenderContext, texture: &wgpu::Texture) -> Result<Vec<u8>> {
    let unpadded = WIDTH * 4;
    let padded = unpadded.next_multiple_of(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT);
    let buffer = context.device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("FrameReadback"),
        size: padded as u64 * HEIGHT as u64,
        usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
        mapped_at_creation: false,
    });

    let mut encoder = context
        .device
        .create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("ReadbackEncoder"),
        });
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
                bytes_per_row: Some(padded),
                rows_per_image: Some(HEIGHT),
            },
        },
        texture.size(),
    );
    context.submit_and_wait(encoder)?;

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
        .map_err(|err| RenderError::Device(format!("readback wait failed: {err}")))?;
    receiver
        .recv()
        .map_err(|err| RenderError::Device(format!("readback dropped: {err}")))?
        .map_err(|err| RenderError::Device(format!("readback failed: {err}")))?;

    let mut pixels = Vec::with_capacity((unpadded * HEIGHT) as usize);
    {
        let mapped = slice.get_mapped_range();
        for row in mapped.chunks(padded as usize) {
            pixels.extend_from_slice(&row[..unpadded as usize]);
        }
    }
    buffer.unmap();
    Ok(pixels)
}
