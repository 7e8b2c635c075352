use std::path::Path;

use half::f16;

use crate::error::{RenderError, Result};
use crate::renderer::internal::context::RenderContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Rgba8,
    /// Linear HDR data, uploaded as `Rgba16Float`.
    Rgba32Float,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Rgba8 => 4,
            PixelFormat::Rgba32Float => 16,
        }
    }
}

/// Raw decoded pixels, tightly packed rows.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageData {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub pixels: Vec<u8>,
}

impl ImageData {
    pub fn rgba8(width: u32, height: u32, pixels: Vec<u8>) -> Self {
        Self {
            width,
            height,
            format: PixelFormat::Rgba8,
            pixels,
        }
    }

    pub fn rgba32f(width: u32, height: u32, texels: &[[f32; 4]]) -> Self {
        Self {
            width,
            height,
            format: PixelFormat::Rgba32Float,
            pixels: bytemuck::cast_slice(texels).to_vec(),
        }
    }

    pub fn solid(color: [u8; 4]) -> Self {
        Self::rgba8(1, 1, color.to_vec())
    }

    pub fn is_hdr(&self) -> bool {
        self.format == PixelFormat::Rgba32Float
    }

    fn expected_len(&self) -> usize {
        self.width as usize * self.height as usize * self.format.bytes_per_pixel()
    }

    fn check(&self, label: &str) -> Result<()> {
        if self.width == 0 || self.height == 0 || self.pixels.len() != self.expected_len() {
            return Err(RenderError::Image {
                path: label.into(),
                message: format!(
                    "{}x{} {:?} image has {} bytes, expected {}",
                    self.width,
                    self.height,
                    self.format,
                    self.pixels.len(),
                    self.expected_len()
                ),
            });
        }
        Ok(())
    }

    /// Bytes as uploaded: RGBA8 unchanged, float data narrowed to f16.
    fn upload_bytes(&self) -> Vec<u8> {
        match self.format {
            PixelFormat::Rgba8 => self.pixels.clone(),
            PixelFormat::Rgba32Float => {
                let halves: Vec<u16> = self
                    .pixels
                    .chunks_exact(4)
                    .map(|bytes| {
                        let value = f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
                        f16::from_f32(value).to_bits()
                    })
                    .collect();
                bytemuck::cast_slice(&halves).to_vec()
            }
        }
    }

    fn texture_format(&self, srgb: bool) -> wgpu::TextureFormat {
        match (self.format, srgb) {
            (PixelFormat::Rgba8, true) => wgpu::TextureFormat::Rgba8UnormSrgb,
            (PixelFormat::Rgba8, false) => wgpu::TextureFormat::Rgba8Unorm,
            (PixelFormat::Rgba32Float, _) => wgpu::TextureFormat::Rgba16Float,
        }
    }

    fn upload_bytes_per_row(&self) -> u32 {
        match self.format {
            PixelFormat::Rgba8 => self.width * 4,
            PixelFormat::Rgba32Float => self.width * 8,
        }
    }
}

/// Black-box image source. The renderer only ever asks for decoded pixels.
pub trait ImageLoader: Send + Sync {
    fn load(&self, path: &Path) -> Result<ImageData>;
}

/// Decodes files with the `image` crate. `.hdr` and `.exr` files keep
/// their float range; everything else becomes RGBA8.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsImageLoader;

impl ImageLoader for FsImageLoader {
    fn load(&self, path: &Path) -> Result<ImageData> {
        log::info!("Loading image: {:?}", path);
        let image = image::open(path).map_err(|err| RenderError::Image {
            path: path.to_path_buf(),
            message: err.to_string(),
        })?;

        let is_hdr = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| matches!(ext.to_ascii_lowercase().as_str(), "hdr" | "exr"))
            .unwrap_or(false);

        if is_hdr {
            let rgba = image.to_rgba32f();
            let (width, height) = rgba.dimensions();
            Ok(ImageData {
                width,
                height,
                format: PixelFormat::Rgba32Float,
                pixels: bytemuck::cast_slice(rgba.as_raw()).to_vec(),
            })
        } else {
            let rgba = image.to_rgba8();
            let (width, height) = rgba.dimensions();
            Ok(ImageData::rgba8(width, height, rgba.into_raw()))
        }
    }
}

/// A sampled texture and its default view.
#[derive(Debug)]
pub struct GpuTexture {
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
    pub mip_level_count: u32,
}

impl GpuTexture {
    pub fn from_image(
        context: &RenderContext,
        image: &ImageData,
        srgb: bool,
        label: &str,
    ) -> Result<Self> {
        Self::from_layers(context, std::slice::from_ref(image), srgb, label)
    }

    /// Uploads equally sized images as the layers of one texture. A single
    /// image gives a plain 2D view, several give a 2D array view.
    pub fn from_layers(
        context: &RenderContext,
        layers: &[ImageData],
        srgb: bool,
        label: &str,
    ) -> Result<Self> {
        let Some(first) = layers.first() else {
            return Err(RenderError::Image {
                path: label.into(),
                message: "no image layers".into(),
            });
        };
        for layer in layers {
            layer.check(label)?;
            if (layer.width, layer.height, layer.format) != (first.width, first.height, first.format) {
                return Err(RenderError::Image {
                    path: label.into(),
                    message: format!(
                        "layer is {}x{} {:?}, expected {}x{} {:?}",
                        layer.width, layer.height, layer.format, first.width, first.height, first.format
                    ),
                });
            }
        }

        let format = first.texture_format(srgb);
        let size = wgpu::Extent3d {
            width: first.width,
            height: first.height,
            depth_or_array_layers: layers.len() as u32,
        };
        let texture = context.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });

        for (index, layer) in layers.iter().enumerate() {
            context.queue.write_texture(
                wgpu::TexelCopyTextureInfo {
                    texture: &texture,
                    mip_level: 0,
                    origin: wgpu::Origin3d {
                        x: 0,
                        y: 0,
                        z: index as u32,
                    },
                    aspect: wgpu::TextureAspect::All,
                },
                &layer.upload_bytes(),
                wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(layer.upload_bytes_per_row()),
                    rows_per_image: Some(layer.height),
                },
                wgpu::Extent3d {
                    depth_or_array_layers: 1,
                    ..size
                },
            );
        }

        let dimension = if layers.len() == 1 {
            wgpu::TextureViewDimension::D2
        } else {
            wgpu::TextureViewDimension::D2Array
        };
        let view = texture.create_view(&wgpu::TextureViewDescriptor {
            label: Some(label),
            dimension: Some(dimension),
            ..Default::default()
        });

        Ok(Self {
            texture,
            view,
            mip_level_count: 1,
        })
    }

    pub fn solid_color(context: &RenderContext, color: [u8; 4], srgb: bool, label: &str) -> Result<Self> {
        Self::from_image(context, &ImageData::solid(color), srgb, label)
    }
}
