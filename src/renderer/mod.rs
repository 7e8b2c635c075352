// renderer/mod.rs
pub mod batch;
pub mod bounds;
pub mod depth;
pub mod ibl_math;
pub mod internal;
pub mod lights;
pub mod material;
pub mod mesh;
pub mod pipeline_builder;
pub mod primitives;
pub mod renderer_core;
pub mod shadow_math;
pub mod texture;
pub mod uniforms;
pub mod vertex;

pub use batch::{group_instances, GroupKey, InstanceGroup};
pub use bounds::BoundingBox;
pub use depth::FrameTargets;
pub use internal::context::{DeviceId, RenderContext};
pub use internal::environment::{EnvironmentMap, EnvironmentMapBuilder, EnvironmentSource};
pub use internal::pipeline::{PipelineCache, PipelineKey};
pub use internal::shadows::{ShadowMapBuilder, ShadowMaps};
pub use lights::{Light, LightKind, ShadowMapInfo, MAX_LIGHTS};
pub use material::{BlinnPhongMaterial, Material, PbrMaterial, ShadingModel};
pub use mesh::Mesh;
pub use pipeline_builder::PipelineBuilder;
pub use primitives::MeshData;
pub use renderer_core::{FrameStats, Renderer};
pub use texture::{FsImageLoader, ImageData, ImageLoader, PixelFormat};
pub use vertex::{InstanceRaw, TangentFrame, Vertex, VertexLayout};
