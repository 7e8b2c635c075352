use crate::renderer::internal::pipeline::DEPTH_FORMAT;

/// Depth buffer and, with MSAA on, the multisampled colour target that
/// resolves into the caller's view. Recreated when size, format or sample
/// count change.
pub struct FrameTargets {
    pub depth: wgpu::TextureView,
    pub msaa_color: Option<wgpu::TextureView>,
    width: u32,
    height: u32,
    format: wgpu::TextureFormat,
    sample_count: u32,
}

impl FrameTargets {
    pub fn new(
        device: &wgpu::Device,
        width: u32,
        height: u32,
        format: wgpu::TextureFormat,
        sample_count: u32,
    ) -> Self {
        let size = wgpu::Extent3d {
            width: width.max(1),
            height: height.max(1),
            depth_or_array_layers: 1,
        };
        let depth = device
            .create_texture(&wgpu::TextureDescriptor {
                label: Some("Depth"),
                size,
                mip_level_count: 1,
                sample_count,
                dimension: wgpu::TextureDimension::D2,
                format: DEPTH_FORMAT,
                usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
                view_formats: &[],
            })
            .create_view(&wgpu::TextureViewDescriptor::default());

        let msaa_color = (sample_count > 1).then(|| {
            device
                .create_texture(&wgpu::TextureDescriptor {
                    label: Some("MsaaColor"),
                    size,
                    mip_level_count: 1,
                    sample_count,
                    dimension: wgpu::TextureDimension::D2,
                    format,
                    usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
                    view_formats: &[],
                })
                .create_view(&wgpu::TextureViewDescriptor::default())
        });

        log::debug!("Frame targets {}x{} ({} samples)", size.width, size.height, sample_count);
        Self {
            depth,
            msaa_color,
            width: size.width,
            height: size.height,
            format,
            sample_count,
        }
    }

    pub fn matches(&self, width: u32, height: u32, format: wgpu::TextureFormat, sample_count: u32) -> bool {
        (self.width, self.height, self.format, self.sample_count)
            == (width.max(1), height.max(1), format, sample_count)
    }

    /// Colour attachment and resolve target for a pass drawing into `view`.
    pub fn color_attachment<'a>(
        &'a self,
        view: &'a wgpu::TextureView,
    ) -> (&'a wgpu::TextureView, Option<&'a wgpu::TextureView>) {
        match &self.msaa_color {
            Some(msaa) => (msaa, Some(view)),
            None => (view, None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn depth_format_is_depth32float() {
        // The shadow array and the main pass share one depth format.
        assert!(matches!(DEPTH_FORMAT, wgpu::TextureFormat::Depth32Float));
    }
}
