// scene/mod.rs

pub mod camera;
pub mod instance;
pub mod scene_core;

pub use camera::Camera;
pub use instance::ModelInstance;
pub use scene_core::Scene;
