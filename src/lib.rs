pub mod error;
pub mod renderer;
pub mod scene;
pub mod settings;

pub use error::{ConfigError, RenderError, Result};
pub use renderer::{
    BlinnPhongMaterial, BoundingBox, EnvironmentMap, EnvironmentSource, FrameStats, FsImageLoader,
    ImageData, ImageLoader, Light, LightKind, Material, Mesh, PbrMaterial, RenderContext, Renderer,
    ShadingModel,
};
pub use scene::{Camera, ModelInstance, Scene};
pub use settings::{IrradianceStrategy, RenderSettings};

/// Installs the `env_logger` backend at `info` level unless `RUST_LOG`
/// overrides it. Safe to call more than once.
pub fn init_logging() {
    let _ = env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .try_init();
}
