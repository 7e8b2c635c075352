use log::{info, warn};
use serde::{Deserialize, Serialize};

/// Tunable renderer surface. A UI or test harness mutates this between
/// frames; the renderer reads it when building passes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderSettings {
    #[serde(default = "RenderSettings::default_shadow_map_size")]
    pub shadow_map_size: u32,
    #[serde(default = "RenderSettings::default_aa_sample_count")]
    pub aa_sample_count: u32,
    #[serde(default = "RenderSettings::default_environment_map_size")]
    pub environment_map_size: u32,
    #[serde(default = "RenderSettings::default_irradiance_size")]
    pub irradiance_size: u32,
    #[serde(default = "RenderSettings::default_specular_mip_count")]
    pub specular_mip_count: u32,
    #[serde(default = "RenderSettings::default_brdf_lut_size")]
    pub brdf_lut_size: u32,
    #[serde(default)]
    pub irradiance_strategy: IrradianceStrategy,
    #[serde(default = "RenderSettings::default_irradiance_sample_delta")]
    pub irradiance_sample_delta: f32,
    #[serde(default = "RenderSettings::default_prefilter_sample_count")]
    pub prefilter_sample_count: u32,
    #[serde(default = "RenderSettings::default_brdf_sample_count")]
    pub brdf_sample_count: u32,
    #[serde(default)]
    pub gpu_timing: bool,
    #[serde(default = "RenderSettings::default_clear_color")]
    pub clear_color: [f64; 4],
}

/// How the diffuse irradiance cube map is integrated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IrradianceStrategy {
    /// Project the cube map onto 9 SH coefficients in a compute pass, then
    /// evaluate them per texel.
    SphericalHarmonics,
    /// Nested-angle hemisphere sampling per texel. Slow, used as reference.
    BruteForce,
}

impl Default for IrradianceStrategy {
    fn default() -> Self {
        IrradianceStrategy::SphericalHarmonics
    }
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            shadow_map_size: Self::default_shadow_map_size(),
            aa_sample_count: Self::default_aa_sample_count(),
            environment_map_size: Self::default_environment_map_size(),
            irradiance_size: Self::default_irradiance_size(),
            specular_mip_count: Self::default_specular_mip_count(),
            brdf_lut_size: Self::default_brdf_lut_size(),
            irradiance_strategy: IrradianceStrategy::default(),
            irradiance_sample_delta: Self::default_irradiance_sample_delta(),
            prefilter_sample_count: Self::default_prefilter_sample_count(),
            brdf_sample_count: Self::default_brdf_sample_count(),
            gpu_timing: false,
            clear_color: Self::default_clear_color(),
        }
    }
}

impl RenderSettings {
    pub fn load() -> Self {
        Self::load_from_path("settings.json")
    }

    pub fn load_from_path<P: AsRef<std::path::Path>>(path: P) -> Self {
        use std::fs;

        let path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str::<RenderSettings>(&contents) {
                Ok(settings) => {
                    info!("Loaded render settings from {:?}", path);
                    settings.validate()
                }
                Err(err) => {
                    warn!(
                        "Failed to parse {:?} ({}). Falling back to default render settings.",
                        path, err
                    );
                    RenderSettings::default()
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                info!(
                    "Render settings file {:?} not found. Using default settings.",
                    path
                );
                RenderSettings::default()
            }
            Err(err) => {
                warn!(
                    "Failed to read {:?} ({}). Falling back to default render settings.",
                    path, err
                );
                RenderSettings::default()
            }
        }
    }

    /// Replaces out-of-range values with defaults and clamps the specular
    /// mip count to what the environment map size can hold.
    pub fn validate(mut self) -> Self {
        if self.shadow_map_size == 0 {
            warn!("Shadow map size must be greater than zero. Using default value.");
            self.shadow_map_size = Self::default_shadow_map_size();
        }

        if !matches!(self.aa_sample_count, 1 | 4) {
            warn!(
                "AA sample count {} is not supported (expected 1 or 4). Using 1.",
                self.aa_sample_count
            );
            self.aa_sample_count = Self::default_aa_sample_count();
        }

        if self.environment_map_size == 0 {
            warn!("Environment map size must be greater than zero. Using default value.");
            self.environment_map_size = Self::default_environment_map_size();
        }

        if self.irradiance_size == 0 {
            warn!("Irradiance size must be greater than zero. Using default value.");
            self.irradiance_size = Self::default_irradiance_size();
        }

        if self.brdf_lut_size == 0 {
            warn!("BRDF LUT size must be greater than zero. Using default value.");
            self.brdf_lut_size = Self::default_brdf_lut_size();
        }

        let max_mips = max_mip_levels(self.environment_map_size);
        if self.specular_mip_count == 0 || self.specular_mip_count > max_mips {
            let clamped = self.specular_mip_count.clamp(1, max_mips);
            warn!(
                "Specular mip count {} out of range for a {}px environment map. Using {}.",
                self.specular_mip_count, self.environment_map_size, clamped
            );
            self.specular_mip_count = clamped;
        }

        if !(self.irradiance_sample_delta > 0.0) {
            warn!("Irradiance sample delta must be positive. Using default value.");
            self.irradiance_sample_delta = Self::default_irradiance_sample_delta();
        }

        if self.prefilter_sample_count == 0 {
            self.prefilter_sample_count = Self::default_prefilter_sample_count();
        }

        if self.brdf_sample_count == 0 {
            self.brdf_sample_count = Self::default_brdf_sample_count();
        }

        self
    }

    const fn default_shadow_map_size() -> u32 {
        1024
    }

    const fn default_aa_sample_count() -> u32 {
        1
    }

    const fn default_environment_map_size() -> u32 {
        512
    }

    const fn default_irradiance_size() -> u32 {
        64
    }

    const fn default_specular_mip_count() -> u32 {
        5
    }

    const fn default_brdf_lut_size() -> u32 {
        512
    }

    const fn default_irradiance_sample_delta() -> f32 {
        0.025
    }

    const fn default_prefilter_sample_count() -> u32 {
        1024
    }

    const fn default_brdf_sample_count() -> u32 {
        1024
    }

    const fn default_clear_color() -> [f64; 4] {
        [0.05, 0.07, 0.10, 1.0]
    }
}

pub(crate) fn max_mip_levels(size: u32) -> u32 {
    u32::BITS - size.max(1).leading_zeros()
}
