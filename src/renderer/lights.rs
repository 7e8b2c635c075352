use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};

pub const MAX_LIGHTS: usize = 16;

const DEFAULT_CONE_ANGLE_DEG: f32 = 45.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LightKind {
    Directional,
    Point,
    /// Spot light aimed at a target point.
    Target,
}

/// Light-space matrices written back onto a light by the shadow pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShadowMapInfo {
    /// Layer of the shared depth array this light renders into.
    pub layer: u32,
    pub view: Mat4,
    pub projection: Mat4,
}

impl ShadowMapInfo {
    pub fn view_projection(&self) -> Mat4 {
        self.projection * self.view
    }
}

/// A scene light. Position, direction and target are kept consistent:
/// on a target light, changing any one of them updates the others.
#[derive(Debug, Clone)]
pub struct Light {
    kind: LightKind,
    position: Vec3,
    direction: Vec3,
    target: Vec3,
    pub intensity: f32,
    pub ambient: Vec3,
    pub diffuse: Vec3,
    pub specular: Vec3,
    /// Full cone angle in degrees. Only target lights use it.
    pub cone_angle_deg: f32,
    pub use_shadow_map: bool,
    shadow_map: Option<ShadowMapInfo>,
}

impl Light {
    fn new(kind: LightKind, position: Vec3, direction: Vec3) -> Self {
        let direction = direction.try_normalize().unwrap_or(Vec3::NEG_Y);
        Self {
            kind,
            position,
            direction,
            target: position + direction,
            intensity: 1.0,
            ambient: Vec3::splat(0.05),
            diffuse: Vec3::ONE,
            specular: Vec3::ONE,
            cone_angle_deg: DEFAULT_CONE_ANGLE_DEG,
            use_shadow_map: false,
            shadow_map: None,
        }
    }

    pub fn directional(direction: Vec3) -> Self {
        Self::new(LightKind::Directional, Vec3::ZERO, direction)
    }

    pub fn point(position: Vec3) -> Self {
        Self::new(LightKind::Point, position, Vec3::NEG_Y)
    }

    pub fn target(position: Vec3, target: Vec3, cone_angle_deg: f32) -> Self {
        let mut light = Self::new(LightKind::Target, position, target - position);
        light.set_target(target);
        light.cone_angle_deg = cone_angle_deg;
        light
    }

    pub fn with_shadow(mut self) -> Self {
        self.use_shadow_map = true;
        self
    }

    pub fn with_intensity(mut self, intensity: f32) -> Self {
        self.intensity = intensity;
        self
    }

    pub fn with_color(mut self, color: Vec3) -> Self {
        self.diffuse = color;
        self.specular = color;
        self
    }

    pub fn kind(&self) -> LightKind {
        self.kind
    }

    pub fn position(&self) -> Vec3 {
        self.position
    }

    /// Unit direction the light travels in.
    pub fn direction(&self) -> Vec3 {
        self.direction
    }

    pub fn target_point(&self) -> Vec3 {
        self.target
    }

    /// Moves the light. A target light keeps looking at its target.
    pub fn set_position(&mut self, position: Vec3) {
        self.position = position;
        match self.kind {
            LightKind::Target => self.sync_direction_from_target(),
            _ => self.target = position + self.direction,
        }
    }

    /// Re-aims the light. A target light keeps its target distance and
    /// moves the target along the new direction.
    pub fn set_direction(&mut self, direction: Vec3) {
        let Some(direction) = direction.try_normalize() else {
            log::warn!("Ignoring zero-length light direction");
            return;
        };
        let distance = self.position.distance(self.target).max(f32::EPSILON);
        self.direction = direction;
        self.target = self.position + direction * distance;
    }

    /// Aims the light at `target`, recomputing its direction.
    pub fn set_target(&mut self, target: Vec3) {
        self.target = target;
        self.sync_direction_from_target();
    }

    fn sync_direction_from_target(&mut self) {
        match (self.target - self.position).try_normalize() {
            Some(direction) => self.direction = direction,
            None => log::warn!("Light target coincides with its position; keeping direction"),
        }
    }

    /// Point lights never cast shadows, whatever `use_shadow_map` says.
    pub fn casts_shadow(&self) -> bool {
        self.use_shadow_map && self.kind != LightKind::Point
    }

    pub fn shadow_map(&self) -> Option<&ShadowMapInfo> {
        self.shadow_map.as_ref()
    }

    pub(crate) fn set_shadow_map(&mut self, info: Option<ShadowMapInfo>) {
        self.shadow_map = info;
    }
}

/// One light in the lights storage buffer.
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable, Debug)]
pub struct LightRaw {
    /// xyz position, w kind (0 directional, 1 point, 2 target).
    pub position_kind: [f32; 4],
    /// xyz direction, w cosine of the half cone angle.
    pub direction_cutoff: [f32; 4],
    pub ambient: [f32; 4],
    /// rgb diffuse, w intensity.
    pub diffuse_intensity: [f32; 4],
    pub specular: [f32; 4],
    /// x shadow layer or -1.
    pub shadow: [i32; 4],
}

impl LightRaw {
    pub fn from_light(light: &Light) -> Self {
        let kind = match light.kind {
            LightKind::Directional => 0.0,
            LightKind::Point => 1.0,
            LightKind::Target => 2.0,
        };
        let cutoff = (light.cone_angle_deg.to_radians() * 0.5).cos();
        let layer = light
            .shadow_map
            .as_ref()
            .map(|info| info.layer as i32)
            .unwrap_or(-1);

        Self {
            position_kind: light.position.extend(kind).to_array(),
            direction_cutoff: light.direction.extend(cutoff).to_array(),
            ambient: light.ambient.extend(1.0).to_array(),
            diffuse_intensity: light.diffuse.extend(light.intensity).to_array(),
            specular: light.specular.extend(1.0).to_array(),
            shadow: [layer, 0, 0, 0],
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
pub struct LightsUniform {
    pub counts: [u32; 4],
    pub lights: [LightRaw; MAX_LIGHTS],
}

impl LightsUniform {
    pub fn from_lights(lights: &[Light]) -> Self {
        let mut uniform = Self::zeroed();
        if lights.len() > MAX_LIGHTS {
            log::warn!(
                "Scene has {} lights; only the first {} are shaded",
                lights.len(),
                MAX_LIGHTS
            );
        }

        let count = lights.len().min(MAX_LIGHTS);
        uniform.counts[0] = count as u32;
        for (dst, src) in uniform.lights.iter_mut().zip(lights).take(count) {
            *dst = LightRaw::from_light(src);
        }
        uniform
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_direction_moves_target_of_target_light() {
        let mut light = Light::target(Vec3::new(0.0, 5.0, 0.0), Vec3::ZERO, 60.0);
        light.set_direction(Vec3::new(1.0, -1.0, 0.0));

        let expected = Vec3::new(0.0, 5.0, 0.0) + Vec3::new(1.0, -1.0, 0.0).normalize() * 5.0;
        assert!(light.target_point().abs_diff_eq(expected, 1e-5));
        assert!((light.direction().length() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn set_target_recomputes_direction() {
        let mut light = Light::target(Vec3::ZERO, Vec3::X, 30.0);
        light.set_target(Vec3::new(0.0, 0.0, -4.0));
        assert!(light.direction().abs_diff_eq(Vec3::NEG_Z, 1e-6));
    }

    #[test]
    fn set_position_keeps_target_light_aimed() {
        let mut light = Light::target(Vec3::new(0.0, 3.0, 0.0), Vec3::ZERO, 30.0);
        light.set_position(Vec3::new(3.0, 0.0, 0.0));
        assert!(light.target_point().abs_diff_eq(Vec3::ZERO, 1e-6));
        assert!(light.direction().abs_diff_eq(Vec3::NEG_X, 1e-6));
    }

    #[test]
    fn point_lights_never_cast_shadows() {
        let point = Light::point(Vec3::Y).with_shadow();
        assert!(point.use_shadow_map);
        assert!(!point.casts_shadow());

        let sun = Light::directional(Vec3::NEG_Y).with_shadow();
        assert!(sun.casts_shadow());
    }

    #[test]
    fn raw_light_packs_kind_and_shadow_layer() {
        let mut light = Light::target(Vec3::ZERO, Vec3::NEG_Y, 90.0);
        light.set_shadow_map(Some(ShadowMapInfo {
            layer: 2,
            view: Mat4::IDENTITY,
            projection: Mat4::IDENTITY,
        }));
        let raw = LightRaw::from_light(&light);
        assert_eq!(raw.position_kind[3], 2.0);
        assert_eq!(raw.shadow[0], 2);
        assert!((raw.direction_cutoff[3] - 45f32.to_radians().cos()).abs() < 1e-6);

        let raw = LightRaw::from_light(&Light::point(Vec3::ONE));
        assert_eq!(raw.shadow[0], -1);
    }

    #[test]
    fn lights_uniform_caps_light_count() {
        let lights = vec![Light::point(Vec3::ZERO); MAX_LIGHTS + 3];
        let uniform = LightsUniform::from_lights(&lights);
        assert_eq!(uniform.counts[0] as usize, MAX_LIGHTS);
        assert_eq!(std::mem::size_of::<LightRaw>(), 96);
    }
}
