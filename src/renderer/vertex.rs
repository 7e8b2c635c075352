use bytemuck::{Pod, Zeroable};
use glam::Mat4;
use std::mem;

/// Interleaved vertex produced by the built-in primitives.
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable, Debug)]
pub struct Vertex {
    pub pos: [f32; 3],
    pub normal: [f32; 3],
    pub uv: [f32; 2],
}

#[inline]
pub fn v(pos: [f32; 3], normal: [f32; 3], uv: [f32; 2]) -> Vertex {
    Vertex { pos, normal, uv }
}

/// Per-vertex tangent frame, uploaded as a second vertex stream.
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable, Debug, Default)]
pub struct TangentFrame {
    pub tangent: [f32; 3],
    pub bitangent: [f32; 3],
}

impl TangentFrame {
    pub const ATTRS: [wgpu::VertexAttribute; 2] = wgpu::vertex_attr_array![
        3 => Float32x3,
        4 => Float32x3
    ];

    pub fn layout<'a>() -> wgpu::VertexBufferLayout<'a> {
        wgpu::VertexBufferLayout {
            array_stride: mem::size_of::<TangentFrame>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &Self::ATTRS,
        }
    }
}

/// Where position/normal/uv live inside a loader-supplied vertex stream.
/// Offsets and stride are in bytes; all three attributes are f32 vectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VertexLayout {
    pub stride: u32,
    pub position_offset: u32,
    pub normal_offset: u32,
    pub uv_offset: u32,
}

impl VertexLayout {
    /// Layout of [`Vertex`].
    pub const INTERLEAVED: Self = Self {
        stride: mem::size_of::<Vertex>() as u32,
        position_offset: 0,
        normal_offset: 12,
        uv_offset: 24,
    };

    pub fn attributes(&self) -> [wgpu::VertexAttribute; 3] {
        [
            wgpu::VertexAttribute {
                format: wgpu::VertexFormat::Float32x3,
                offset: self.position_offset as u64,
                shader_location: 0,
            },
            wgpu::VertexAttribute {
                format: wgpu::VertexFormat::Float32x3,
                offset: self.normal_offset as u64,
                shader_location: 1,
            },
            wgpu::VertexAttribute {
                format: wgpu::VertexFormat::Float32x2,
                offset: self.uv_offset as u64,
                shader_location: 2,
            },
        ]
    }

    pub fn buffer_layout<'a>(
        &self,
        attributes: &'a [wgpu::VertexAttribute],
    ) -> wgpu::VertexBufferLayout<'a> {
        wgpu::VertexBufferLayout {
            array_stride: self.stride as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes,
        }
    }

    /// Number of whole vertices in `byte_len` bytes of this layout.
    pub fn vertex_count(&self, byte_len: usize) -> u32 {
        if self.stride == 0 {
            return 0;
        }
        (byte_len / self.stride as usize) as u32
    }
}

impl Default for VertexLayout {
    fn default() -> Self {
        Self::INTERLEAVED
    }
}

/// One instance entry of a render group's storage buffer: model matrix
/// followed by the inverse-transpose normal matrix.
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable, Debug)]
pub struct InstanceRaw {
    pub model: [[f32; 4]; 4],
    pub normal: [[f32; 4]; 4],
}

impl InstanceRaw {
    pub fn from_model(model: Mat4) -> Self {
        let normal = if model.determinant().abs() > f32::EPSILON {
            model.inverse().transpose()
        } else {
            Mat4::IDENTITY
        };
        Self {
            model: model.to_cols_array_2d(),
            normal: normal.to_cols_array_2d(),
        }
    }
}
