use std::sync::Arc;

use glam::Vec3;

use super::bounds::BoundingBox;
use super::internal::buffers::{BufferId, GpuBuffer};
use super::internal::context::RenderContext;
use super::primitives::MeshData;
use super::vertex::{TangentFrame, VertexLayout};
use crate::error::{ConfigError, Result};

/// Geometry shared by any number of instances. Buffers are uploaded on
/// first use per device.
#[derive(Debug)]
pub struct Mesh {
    label: String,
    layout: VertexLayout,
    vertices: GpuBuffer,
    tangents: Option<GpuBuffer>,
    indices: Option<GpuBuffer>,
    vertex_count: u32,
    index_count: u32,
    bounds: BoundingBox,
}

impl Mesh {
    pub fn from_data(label: impl Into<String>, data: &MeshData) -> std::result::Result<Arc<Self>, ConfigError> {
        let label = label.into();
        let bounds = data.bounds().ok_or_else(|| ConfigError::EmptyGeometry {
            label: label.clone(),
        })?;

        let tangents = (data.tangents.len() == data.vertices.len())
            .then(|| bytemuck::cast_slice::<_, u8>(&data.tangents).to_vec());
        let indices = (!data.indices.is_empty()).then(|| data.indices.clone());

        Ok(Arc::new(Self::assemble(
            label,
            bytemuck::cast_slice::<_, u8>(&data.vertices).to_vec(),
            VertexLayout::INTERLEAVED,
            tangents,
            indices,
            bounds,
        )))
    }

    /// Builds a mesh from a loader-supplied vertex stream described by
    /// `layout`, with optional tangent frames and indices.
    pub fn from_raw(
        label: impl Into<String>,
        vertex_bytes: Vec<u8>,
        layout: VertexLayout,
        tangents: Option<Vec<TangentFrame>>,
        indices: Option<Vec<u32>>,
    ) -> std::result::Result<Arc<Self>, ConfigError> {
        let label = label.into();
        let count = if layout.position_offset + 12 <= layout.stride {
            layout.vertex_count(vertex_bytes.len()) as usize
        } else {
            0
        };
        let positions = (0..count).map(|i| {
            let start = i * layout.stride as usize + layout.position_offset as usize;
            let position: [f32; 3] = bytemuck::pod_read_unaligned(&vertex_bytes[start..start + 12]);
            Vec3::from(position)
        });
        let bounds = BoundingBox::from_points(positions).ok_or_else(|| ConfigError::EmptyGeometry {
            label: label.clone(),
        })?;

        let tangents = tangents
            .filter(|frames| {
                let matches = frames.len() == count;
                if !matches {
                    log::warn!(
                        "{}: {} tangent frames for {} vertices, ignoring tangents",
                        label,
                        frames.len(),
                        count
                    );
                }
                matches
            })
            .map(|frames| bytemuck::cast_slice::<_, u8>(&frames).to_vec());

        Ok(Arc::new(Self::assemble(
            label,
            vertex_bytes,
            layout,
            tangents,
            indices.filter(|indices| !indices.is_empty()),
            bounds,
        )))
    }

    fn assemble(
        label: String,
        vertex_bytes: Vec<u8>,
        layout: VertexLayout,
        tangents: Option<Vec<u8>>,
        indices: Option<Vec<u32>>,
        bounds: BoundingBox,
    ) -> Self {
        let vertex_count = layout.vertex_count(vertex_bytes.len());
        let index_count = indices.as_ref().map_or(0, |indices| indices.len() as u32);

        Self {
            vertices: GpuBuffer::new_static(
                format!("{label}Vertices"),
                wgpu::BufferUsages::VERTEX,
                vertex_bytes,
            ),
            tangents: tangents.map(|bytes| {
                GpuBuffer::new_static(
                    format!("{label}Tangents"),
                    wgpu::BufferUsages::VERTEX,
                    bytes,
                )
            }),
            indices: indices.map(|indices| {
                GpuBuffer::new_static(
                    format!("{label}Indices"),
                    wgpu::BufferUsages::INDEX,
                    bytemuck::cast_slice::<_, u8>(&indices).to_vec(),
                )
            }),
            label,
            layout,
            vertex_count,
            index_count,
            bounds,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn layout(&self) -> VertexLayout {
        self.layout
    }

    pub fn vertex_buffer_id(&self) -> BufferId {
        self.vertices.id()
    }

    pub fn tangent_buffer_id(&self) -> Option<BufferId> {
        self.tangents.as_ref().map(GpuBuffer::id)
    }

    pub fn has_tangents(&self) -> bool {
        self.tangents.is_some()
    }

    pub fn vertex_count(&self) -> u32 {
        self.vertex_count
    }

    pub fn index_count(&self) -> u32 {
        self.index_count
    }

    /// Local-space bounds.
    pub fn bounds(&self) -> BoundingBox {
        self.bounds
    }

    pub fn ensure_uploaded(&self, context: &RenderContext) -> Result<()> {
        self.vertices.ensure_uploaded(context)?;
        if let Some(tangents) = &self.tangents {
            tangents.ensure_uploaded(context)?;
        }
        if let Some(indices) = &self.indices {
            indices.ensure_uploaded(context)?;
        }
        Ok(())
    }

    pub(crate) fn vertex_buffer(&self) -> Result<wgpu::Buffer> {
        self.vertices.buffer()
    }

    pub(crate) fn tangent_buffer(&self) -> Option<Result<wgpu::Buffer>> {
        self.tangents.as_ref().map(GpuBuffer::buffer)
    }

    pub(crate) fn index_buffer(&self) -> Option<Result<wgpu::Buffer>> {
        self.indices.as_ref().map(GpuBuffer::buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::primitives;

    #[test]
    fn cube_mesh_has_tangents_and_bounds() {
        let mesh = Mesh::from_data("Cube", &primitives::cube()).unwrap();
        assert!(mesh.has_tangents());
        assert_eq!(mesh.vertex_count(), 24);
        assert_eq!(mesh.index_count(), 36);
        assert_eq!(mesh.bounds().max, Vec3::splat(0.5));
        assert_ne!(Some(mesh.vertex_buffer_id()), mesh.tangent_buffer_id());
    }

    #[test]
    fn empty_geometry_is_rejected() {
        let err = Mesh::from_data("Nothing", &MeshData::default()).unwrap_err();
        assert_eq!(
            err,
            ConfigError::EmptyGeometry {
                label: "Nothing".into()
            }
        );
    }

    #[test]
    fn raw_stream_uses_layout_offsets() {
        // position at offset 8 of a 20-byte stride.
        let layout = VertexLayout {
            stride: 20,
            position_offset: 8,
            normal_offset: 0,
            uv_offset: 0,
        };
        let mut bytes = Vec::new();
        for p in [[1.0f32, 2.0, 3.0], [-1.0, 0.0, 5.0]] {
            bytes.extend_from_slice(bytemuck::cast_slice(&[0.0f32, 0.0][..]));
            bytes.extend_from_slice(bytemuck::cast_slice(&p[..]));
        }

        let mesh = Mesh::from_raw("Raw", bytes, layout, Some(vec![TangentFrame::default()]), None).unwrap();
        assert_eq!(mesh.vertex_count(), 2);
        assert_eq!(mesh.bounds().min, Vec3::new(-1.0, 0.0, 3.0));
        assert_eq!(mesh.bounds().max, Vec3::new(1.0, 2.0, 5.0));
        assert!(!mesh.has_tangents(), "mismatched tangent count is dropped");
    }
}
