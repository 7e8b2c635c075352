use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::error::{RenderError, Result};
use crate::renderer::internal::context::{DeviceId, RenderContext};

/// Smallest storage buffer ever allocated. Devices reject storage
/// bindings smaller than the shader-declared struct, and an empty
/// instance array still has to bind.
pub const MIN_STORAGE_BUFFER_SIZE: u64 = 256;

static NEXT_BUFFER_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a logical buffer, stable across device reallocations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(u64);

impl BufferId {
    fn next() -> Self {
        Self(NEXT_BUFFER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// First-use allocation state of a GPU object.
#[derive(Debug)]
pub enum LazyResource<H> {
    Unallocated,
    Allocated { device: DeviceId, handle: H },
}

impl<H> Default for LazyResource<H> {
    fn default() -> Self {
        Self::Unallocated
    }
}

impl<H> LazyResource<H> {
    /// Runs `create` on first use and whenever `device` differs from the
    /// device the current handle belongs to. Returns the handle and whether
    /// it was (re)allocated by this call.
    pub fn ensure_allocated(&mut self, device: DeviceId, create: impl FnOnce() -> H) -> (&H, bool) {
        let stale = match self {
            Self::Unallocated => true,
            Self::Allocated { device: owner, .. } => *owner != device,
        };
        if stale {
            *self = Self::Allocated {
                device,
                handle: create(),
            };
        }
        match self {
            Self::Allocated { handle, .. } => (handle, stale),
            Self::Unallocated => unreachable!("allocated above"),
        }
    }

    pub fn get(&self, label: &str) -> Result<&H> {
        match self {
            Self::Allocated { handle, .. } => Ok(handle),
            Self::Unallocated => Err(RenderError::uninitialized(label)),
        }
    }

    pub fn is_allocated(&self) -> bool {
        matches!(self, Self::Allocated { .. })
    }

    pub fn device(&self) -> Option<DeviceId> {
        match self {
            Self::Allocated { device, .. } => Some(*device),
            Self::Unallocated => None,
        }
    }

    /// Drops the handle; the next `ensure_allocated` recreates it.
    pub fn reset(&mut self) {
        *self = Self::Unallocated;
    }
}

/// What a [`GpuBuffer`] uploads.
#[derive(Debug, Clone)]
pub enum BufferPayload {
    /// Fixed bytes (vertex, index data). Sized to the payload.
    Static(Vec<u8>),
    /// Bytes regenerated by the owner every frame. Sized to a worst case.
    Dynamic { capacity: u64 },
}

/// Outcome of an upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferWrite {
    /// The underlying `wgpu::Buffer` changed; bind groups referencing the
    /// old one must be rebuilt.
    pub reallocated: bool,
}

/// Buffer wrapper that allocates on first upload and re-uploads its bytes
/// on every later call.
#[derive(Debug)]
pub struct GpuBuffer {
    id: BufferId,
    label: String,
    usage: wgpu::BufferUsages,
    payload: BufferPayload,
    state: Mutex<LazyResource<wgpu::Buffer>>,
}

impl GpuBuffer {
    pub fn new_static(label: impl Into<String>, usage: wgpu::BufferUsages, bytes: Vec<u8>) -> Self {
        Self::new(label.into(), usage, BufferPayload::Static(bytes))
    }

    pub fn new_dynamic(label: impl Into<String>, usage: wgpu::BufferUsages, capacity: u64) -> Self {
        Self::new(label.into(), usage, BufferPayload::Dynamic { capacity })
    }

    fn new(label: String, usage: wgpu::BufferUsages, payload: BufferPayload) -> Self {
        Self {
            id: BufferId::next(),
            label,
            usage: usage | wgpu::BufferUsages::COPY_DST,
            payload,
            state: Mutex::new(LazyResource::Unallocated),
        }
    }

    pub fn id(&self) -> BufferId {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Allocation size in bytes, including the storage minimum and copy
    /// alignment padding.
    pub fn size(&self) -> u64 {
        let requested = match &self.payload {
            BufferPayload::Static(bytes) => bytes.len() as u64,
            BufferPayload::Dynamic { capacity } => *capacity,
        };
        allocation_size(requested, self.usage)
    }

    pub fn is_allocated(&self) -> bool {
        self.lock().is_allocated()
    }

    /// Uploads the static payload, allocating first if needed.
    pub fn write_to_gpu(&self, context: &RenderContext) -> Result<BufferWrite> {
        match &self.payload {
            BufferPayload::Static(bytes) => self.upload(context, bytes),
            BufferPayload::Dynamic { .. } => self.upload(context, &[]),
        }
    }

    /// Uploads only if the buffer has no allocation on this device yet.
    /// Static geometry goes through here once per device.
    pub fn ensure_uploaded(&self, context: &RenderContext) -> Result<BufferWrite> {
        if self.lock().device() == Some(context.id()) {
            return Ok(BufferWrite { reallocated: false });
        }
        self.write_to_gpu(context)
    }

    /// Uploads `bytes` into a dynamic buffer. Overflowing the capacity is
    /// an ordering bug upstream; the buffer grows and reports reallocation.
    pub fn write_bytes(&mut self, context: &RenderContext, bytes: &[u8]) -> Result<BufferWrite> {
        if let BufferPayload::Dynamic { capacity } = &mut self.payload {
            if bytes.len() as u64 > *capacity {
                log::warn!(
                    "Growing {}: {} -> {} bytes",
                    self.label,
                    capacity,
                    bytes.len()
                );
                *capacity = bytes.len() as u64;
                self.lock().reset();
            }
        }
        self.upload(context, bytes)
    }

    fn upload(&self, context: &RenderContext, bytes: &[u8]) -> Result<BufferWrite> {
        let size = self.size();
        let mut state = self.lock();
        let (buffer, reallocated) = state.ensure_allocated(context.id(), || {
            log::debug!("Allocating {} ({} bytes)", self.label, size);
            context.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(&self.label),
                size,
                usage: self.usage,
                mapped_at_creation: false,
            })
        });

        if !bytes.is_empty() {
            let aligned = wgpu::COPY_BUFFER_ALIGNMENT as usize;
            if bytes.len() % aligned == 0 {
                context.queue.write_buffer(buffer, 0, bytes);
            } else {
                let mut padded = bytes.to_vec();
                padded.resize(bytes.len().next_multiple_of(aligned), 0);
                context.queue.write_buffer(buffer, 0, &padded);
            }
        }

        Ok(BufferWrite { reallocated })
    }

    /// The live handle. Fails if nothing was uploaded yet.
    pub fn buffer(&self) -> Result<wgpu::Buffer> {
        self.lock().get(&self.label).cloned()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LazyResource<wgpu::Buffer>> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn allocation_size(requested: u64, usage: wgpu::BufferUsages) -> u64 {
    let mut size = requested.max(wgpu::COPY_BUFFER_ALIGNMENT);
    if usage.intersects(wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::UNIFORM) {
        size = size.max(MIN_STORAGE_BUFFER_SIZE);
    }
    size.next_multiple_of(wgpu::COPY_BUFFER_ALIGNMENT)
}
