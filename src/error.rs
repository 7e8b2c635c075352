use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, RenderError>;

/// Invalid input shape detected while building a scene. Never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("environment map needs 1 equirectangular or 6 cube-face images, got {count}")]
    EnvironmentSourceCount { count: usize },
    #[error("shadow maps requested but no directional or target light casts shadows")]
    NoShadowCasters,
    #[error("invalid setting `{name}`: {reason}")]
    InvalidSetting { name: &'static str, reason: String },
    #[error("geometry `{label}` has no vertices")]
    EmptyGeometry { label: String },
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// A GPU handle was requested before its owner uploaded anything.
    /// Always a pass-ordering bug.
    #[error("resource `{label}` accessed before its first upload")]
    Uninitialized { label: String },
    #[error("failed to load image {path:?}: {message}")]
    Image { path: PathBuf, message: String },
    #[error("pipeline `{label}` failed to build: {message}")]
    Pipeline { label: String, message: String },
    #[error("bind group `{label}`: {message}")]
    Binding { label: String, message: String },
    #[error("device error: {0}")]
    Device(String),
}

impl RenderError {
    pub(crate) fn uninitialized(label: impl Into<String>) -> Self {
        Self::Uninitialized {
            label: label.into(),
        }
    }
}
