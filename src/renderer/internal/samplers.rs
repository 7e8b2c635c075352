use std::collections::HashMap;

use crate::renderer::internal::context::{DeviceId, RenderContext};

/// The sampler configurations the renderer uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SamplerKind {
    /// Repeating trilinear, for material textures.
    Linear,
    /// Clamped trilinear, for cube maps and the BRDF LUT.
    LinearClamp,
    /// `LessEqual` comparison sampler for shadow lookups.
    DepthComparison,
}

impl SamplerKind {
    pub fn binding_type(self) -> wgpu::SamplerBindingType {
        match self {
            SamplerKind::Linear | SamplerKind::LinearClamp => wgpu::SamplerBindingType::Filtering,
            SamplerKind::DepthComparison => wgpu::SamplerBindingType::Comparison,
        }
    }

    fn descriptor(self) -> wgpu::SamplerDescriptor<'static> {
        match self {
            SamplerKind::Linear => wgpu::SamplerDescriptor {
                label: Some("LinearSampler"),
                address_mode_u: wgpu::AddressMode::Repeat,
                address_mode_v: wgpu::AddressMode::Repeat,
                address_mode_w: wgpu::AddressMode::Repeat,
                mag_filter: wgpu::FilterMode::Linear,
                min_filter: wgpu::FilterMode::Linear,
                mipmap_filter: wgpu::FilterMode::Linear,
                ..Default::default()
            },
            SamplerKind::LinearClamp => wgpu::SamplerDescriptor {
                label: Some("LinearClampSampler"),
                address_mode_u: wgpu::AddressMode::ClampToEdge,
                address_mode_v: wgpu::AddressMode::ClampToEdge,
                address_mode_w: wgpu::AddressMode::ClampToEdge,
                mag_filter: wgpu::FilterMode::Linear,
                min_filter: wgpu::FilterMode::Linear,
                mipmap_filter: wgpu::FilterMode::Linear,
                ..Default::default()
            },
            SamplerKind::DepthComparison => wgpu::SamplerDescriptor {
                label: Some("ShadowSampler"),
                address_mode_u: wgpu::AddressMode::ClampToEdge,
                address_mode_v: wgpu::AddressMode::ClampToEdge,
                address_mode_w: wgpu::AddressMode::ClampToEdge,
                mag_filter: wgpu::FilterMode::Linear,
                min_filter: wgpu::FilterMode::Linear,
                mipmap_filter: wgpu::FilterMode::Nearest,
                compare: Some(wgpu::CompareFunction::LessEqual),
                ..Default::default()
            },
        }
    }
}

/// One sampler per (device, configuration), owned by the renderer and lent
/// to the builders that need one.
#[derive(Debug, Default)]
pub struct SamplerCache {
    samplers: HashMap<(DeviceId, SamplerKind), wgpu::Sampler>,
}

impl SamplerCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&mut self, context: &RenderContext, kind: SamplerKind) -> wgpu::Sampler {
        self.samplers
            .entry((context.id(), kind))
            .or_insert_with(|| {
                log::debug!("Creating {:?} sampler", kind);
                context.device.create_sampler(&kind.descriptor())
            })
            .clone()
    }

    pub fn len(&self) -> usize {
        self.samplers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samplers.is_empty()
    }
}
