use std::sync::mpsc;

use crate::error::{RenderError, Result};
use crate::renderer::internal::context::RenderContext;

const QUERY_COUNT: u32 = 2;
const QUERY_BYTES: u64 = QUERY_COUNT as u64 * std::mem::size_of::<u64>() as u64;

/// Begin/end timestamps around one render pass.
#[derive(Debug)]
pub struct GpuTimer {
    query_set: wgpu::QuerySet,
    resolve_buffer: wgpu::Buffer,
    readback_buffer: wgpu::Buffer,
    period_ns: f32,
    resolved: bool,
}

impl GpuTimer {
    /// `None` when the device was created without `TIMESTAMP_QUERY`.
    pub fn new(context: &RenderContext) -> Option<Self> {
        if !context.supports_timestamps() {
            log::warn!("GPU timing requested but timestamp queries are unavailable; disabled");
            return None;
        }

        let device = &context.device;
        let query_set = device.create_query_set(&wgpu::QuerySetDescriptor {
            label: Some("FrameTimestamps"),
            ty: wgpu::QueryType::Timestamp,
            count: QUERY_COUNT,
        });
        let resolve_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("TimestampResolve"),
            size: QUERY_BYTES,
            usage: wgpu::BufferUsages::QUERY_RESOLVE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        let readback_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("TimestampReadback"),
            size: QUERY_BYTES,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        Some(Self {
            query_set,
            resolve_buffer,
            readback_buffer,
            period_ns: context.queue.get_timestamp_period(),
            resolved: false,
        })
    }

    pub fn pass_writes(&self) -> wgpu::RenderPassTimestampWrites<'_> {
        wgpu::RenderPassTimestampWrites {
            query_set: &self.query_set,
            beginning_of_pass_write_index: Some(0),
            end_of_pass_write_index: Some(1),
        }
    }

    /// Copies the timestamps to the mappable buffer. Record after the
    /// timed pass.
    pub fn resolve(&mut self, encoder: &mut wgpu::CommandEncoder) {
        encoder.resolve_query_set(&self.query_set, 0..QUERY_COUNT, &self.resolve_buffer, 0);
        encoder.copy_buffer_to_buffer(&self.resolve_buffer, 0, &self.readback_buffer, 0, QUERY_BYTES);
        self.resolved = true;
    }

    /// Blocks until the last resolved frame's timestamps are readable.
    /// `None` if nothing was resolved since the previous read.
    pub fn read_ms(&mut self, context: &RenderContext) -> Result<Option<f64>> {
        if !self.resolved {
            return Ok(None);
        }
        self.resolved = false;

        let slice = self.readback_buffer.slice(..);
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
            .map_err(|err| RenderError::Device(format!("timestamp readback wait failed: {err}")))?;
        receiver
            .recv()
            .map_err(|err| RenderError::Device(format!("timestamp readback dropped: {err}")))?
            .map_err(|err| RenderError::Device(format!("timestamp readback failed: {err}")))?;

        let (begin, end) = {
            let bytes = slice.get_mapped_range();
            let ticks: &[u64] = bytemuck::cast_slice(&bytes);
            (ticks[0], ticks[1])
        };
        self.readback_buffer.unmap();

        Ok(Some(ticks_to_ms(begin, end, self.period_ns)))
    }
}

fn ticks_to_ms(begin: u64, end: u64, period_ns: f32) -> f64 {
    end.saturating_sub(begin) as f64 * period_ns as f64 / 1_000_000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticks_convert_with_the_queue_period() {
        assert_eq!(ticks_to_ms(1_000, 3_000_000, 1.0), 2.999);
        assert_eq!(ticks_to_ms(0, 1_000, 0.5), 0.0005);
    }

    #[test]
    fn reversed_timestamps_clamp_to_zero() {
        assert_eq!(ticks_to_ms(10, 5, 1.0), 0.0);
    }
}
