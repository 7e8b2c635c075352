use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use crate::error::Result;
use crate::renderer::internal::buffers::GpuBuffer;
use crate::renderer::internal::context::{DeviceId, RenderContext};
use crate::renderer::internal::pipeline::BuildCache;
use crate::renderer::internal::samplers::{SamplerCache, SamplerKind};
use crate::renderer::material::{Material, TextureSlot};
use crate::renderer::texture::{GpuTexture, ImageLoader};

/// GPU side of a material: one texture per slot in binding order, the
/// packed scalar uniform and the sampler they are read with.
#[derive(Debug)]
pub struct MaterialGpu {
    pub textures: Vec<Arc<GpuTexture>>,
    pub uniform: GpuBuffer,
    pub sampler: wgpu::Sampler,
}

/// Materials keyed by value. Image files and solid fallbacks are shared
/// between materials that reference the same path or color. Slots without
/// a path get the solid fallback; a path that fails to load is an error.
pub struct MaterialCache {
    loader: Arc<dyn ImageLoader>,
    device: Option<DeviceId>,
    materials: BuildCache<Material, MaterialGpu>,
    images: HashMap<(PathBuf, bool), Arc<GpuTexture>>,
    solids: HashMap<([u8; 4], bool), Arc<GpuTexture>>,
}

impl MaterialCache {
    pub fn new(loader: Arc<dyn ImageLoader>) -> Self {
        Self {
            loader,
            device: None,
            materials: BuildCache::new(),
            images: HashMap::new(),
            solids: HashMap::new(),
        }
    }

    pub fn get_or_create(
        &mut self,
        context: &RenderContext,
        samplers: &mut SamplerCache,
        material: &Material,
    ) -> Result<Arc<MaterialGpu>> {
        if self.device != Some(context.id()) {
            if self.device.is_some() {
                log::info!("Device changed; dropping {} cached materials", self.materials.len());
            }
            self.materials = BuildCache::new();
            self.images.clear();
            self.solids.clear();
            self.device = Some(context.id());
        }

        if let Some(cached) = self.materials.get(material) {
            return Ok(cached);
        }

        let textures = material
            .texture_slots()
            .into_iter()
            .map(|slot| self.texture(context, slot))
            .collect::<Result<Vec<_>>>()?;

        let uniform = GpuBuffer::new_static(
            format!("{:?}MaterialUniform", material.shading_model()),
            wgpu::BufferUsages::UNIFORM,
            bytemuck::bytes_of(&material.uniform()).to_vec(),
        );
        uniform.write_to_gpu(context)?;

        let gpu = MaterialGpu {
            textures,
            uniform,
            sampler: samplers.get(context, SamplerKind::Linear),
        };
        Ok(self.materials.insert(material.clone(), gpu))
    }

    fn texture(&mut self, context: &RenderContext, slot: TextureSlot<'_>) -> Result<Arc<GpuTexture>> {
        if let Some(path) = slot.path {
            let key = (path.clone(), slot.srgb);
            if let Some(texture) = self.images.get(&key) {
                return Ok(Arc::clone(texture));
            }
            let image = self.loader.load(path)?;
            let texture = Arc::new(GpuTexture::from_image(
                context,
                &image,
                slot.srgb,
                &path.to_string_lossy(),
            )?);
            self.images.insert(key, Arc::clone(&texture));
            return Ok(texture);
        }

        let key = (slot.fallback, slot.srgb);
        if let Some(texture) = self.solids.get(&key) {
            return Ok(Arc::clone(texture));
        }
        let texture = Arc::new(GpuTexture::solid_color(
            context,
            slot.fallback,
            slot.srgb,
            "MaterialFallback",
        )?);
        self.solids.insert(key, Arc::clone(&texture));
        Ok(texture)
    }

    pub fn len(&self) -> usize {
        self.materials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.materials.is_empty()
    }
}
