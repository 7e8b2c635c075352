use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{RenderError, Result};

static NEXT_DEVICE_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a device. Lazy GPU resources remember the id
/// they were allocated on and reallocate when handed a different one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(u64);

impl DeviceId {
    pub(crate) fn next() -> Self {
        Self(NEXT_DEVICE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Shared device and queue. Device and queue are read-only to everything
/// that borrows the context; all submission goes through this one queue.
pub struct RenderContext {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    id: DeviceId,
    supports_timestamps: bool,
}

impl RenderContext {
    /// Wraps a device created elsewhere (window surface setup, test harness).
    pub fn from_parts(device: wgpu::Device, queue: wgpu::Queue) -> Self {
        let supports_timestamps = device.features().contains(wgpu::Features::TIMESTAMP_QUERY);
        Self {
            device,
            queue,
            id: DeviceId::next(),
            supports_timestamps,
        }
    }

    /// Requests an adapter without a surface. Used by the offscreen binary
    /// and GPU tests.
    pub async fn headless() -> Result<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .map_err(|err| RenderError::Device(format!("no adapter: {err}")))?;

        log::info!("Using adapter: {:?}", adapter.get_info());

        let adapter_features = adapter.features();
        let mut required_features = wgpu::Features::empty();
        if adapter_features.contains(wgpu::Features::TIMESTAMP_QUERY) {
            required_features |= wgpu::Features::TIMESTAMP_QUERY;
        } else {
            log::info!("Adapter has no timestamp query support");
        }

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("Device"),
                required_features,
                required_limits: wgpu::Limits::default(),
                experimental_features: wgpu::ExperimentalFeatures::disabled(),
                memory_hints: wgpu::MemoryHints::Performance,
                trace: wgpu::Trace::Off,
            })
            .await
            .map_err(|err| RenderError::Device(format!("device request failed: {err}")))?;

        Ok(Self::from_parts(device, queue))
    }

    pub fn id(&self) -> DeviceId {
        self.id
    }

    pub fn supports_timestamps(&self) -> bool {
        self.supports_timestamps
    }

    /// Submits `encoder` and blocks until the GPU has finished it. Stages
    /// that sample the output of earlier passes go through here.
    pub fn submit_and_wait(&self, encoder: wgpu::CommandEncoder) -> Result<()> {
        let index = self.queue.submit(Some(encoder.finish()));
        self.device
            .poll(wgpu::PollType::Wait {
                submission_index: Some(index),
                timeout: None,
            })
            .map_err(|err| RenderError::Device(format!("queue wait failed: {err}")))?;
        Ok(())
    }

    pub(crate) fn encoder(&self, label: &str) -> wgpu::CommandEncoder {
        self.device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some(label) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_ids_are_unique() {
        let a = DeviceId::next();
        let b = DeviceId::next();
        assert_ne!(a, b);
        assert!(b > a);
    }
}
