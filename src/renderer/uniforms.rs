use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};

/// Per-frame camera and environment data, bound in group 0.
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable, Debug)]
pub struct SceneUniform {
    pub view_proj: [[f32; 4]; 4],
    pub camera_pos: [f32; 4],
    /// x: 1 if an environment map is bound, y: max prefiltered mip level,
    /// z: environment intensity.
    pub environment: [f32; 4],
}

impl SceneUniform {
    pub fn new(view_proj: Mat4, camera_pos: Vec3) -> Self {
        Self {
            view_proj: view_proj.to_cols_array_2d(),
            camera_pos: camera_pos.extend(1.0).to_array(),
            environment: [0.0, 0.0, 1.0, 0.0],
        }
    }

    pub fn with_environment(mut self, max_mip_level: u32, intensity: f32) -> Self {
        self.environment = [1.0, max_mip_level as f32, intensity, 0.0];
        self
    }
}

impl Default for SceneUniform {
    fn default() -> Self {
        Self::new(Mat4::IDENTITY, Vec3::ZERO)
    }
}

/// View-projection of a single shadow layer, read by the depth-only pass.
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable, Debug)]
pub struct ShadowPassUniform {
    pub view_proj: [[f32; 4]; 4],
}

impl ShadowPassUniform {
    pub fn new(view_proj: Mat4) -> Self {
        Self {
            view_proj: view_proj.to_cols_array_2d(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scene_uniform_is_96_bytes() {
        // mat4x4<f32> = 64 bytes, two vec4<f32> = 32 bytes
        assert_eq!(std::mem::size_of::<SceneUniform>(), 96);
    }

    #[test]
    fn environment_flag_is_off_by_default() {
        let uniform = SceneUniform::default();
        assert_eq!(uniform.environment[0], 0.0);
        let with_env = uniform.with_environment(4, 1.0);
        assert_eq!(with_env.environment[0], 1.0);
        assert_eq!(with_env.environment[1], 4.0);
    }
}
