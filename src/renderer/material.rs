use std::hash::{Hash, Hasher};
use std::path::PathBuf;

use bitflags::bitflags;
use bytemuck::{Pod, Zeroable};

/// Tag selecting shader module and bind-group layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ShadingModel {
    BlinnPhong,
    Pbr,
}

bitflags! {
    /// Which optional maps a material samples, packed into its uniform.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct MaterialFlags: u32 {
        const BASE_COLOR_MAP = 1 << 0;
        const SPECULAR_MAP = 1 << 1;
        const METALLIC_MAP = 1 << 2;
        const ROUGHNESS_MAP = 1 << 3;
        const OCCLUSION_MAP = 1 << 4;
        const NORMAL_MAP = 1 << 5;
        const TANGENT_DATA = 1 << 6;
    }
}

type MapPath<'a> = &'a Option<PathBuf>;

// Floats compared by bit pattern so equality and hashing agree.
type BlinnPhongKey<'a> = (
    [u32; 3],
    [u32; 3],
    [u32; 3],
    u32,
    (MapPath<'a>, MapPath<'a>, MapPath<'a>),
    bool,
);
type PbrKey<'a> = (
    [u32; 3],
    [u32; 3],
    (MapPath<'a>, MapPath<'a>, MapPath<'a>),
    (MapPath<'a>, MapPath<'a>),
    bool,
);

#[derive(Debug, Clone)]
pub struct BlinnPhongMaterial {
    pub ambient: [f32; 3],
    pub diffuse: [f32; 3],
    pub specular: [f32; 3],
    pub shininess: f32,
    pub diffuse_map: Option<PathBuf>,
    pub specular_map: Option<PathBuf>,
    pub normal_map: Option<PathBuf>,
    pub use_tangent_data: bool,
}

impl Default for BlinnPhongMaterial {
    fn default() -> Self {
        Self {
            ambient: [0.1, 0.1, 0.1],
            diffuse: [0.8, 0.8, 0.8],
            specular: [0.5, 0.5, 0.5],
            shininess: 32.0,
            diffuse_map: None,
            specular_map: None,
            normal_map: None,
            use_tangent_data: false,
        }
    }
}

impl BlinnPhongMaterial {
    pub fn new(diffuse: [f32; 3]) -> Self {
        Self {
            ambient: diffuse.map(|c| c * 0.1),
            diffuse,
            ..Self::default()
        }
    }

    pub fn with_shininess(mut self, shininess: f32) -> Self {
        self.shininess = shininess.max(1.0);
        self
    }

    pub fn with_specular(mut self, specular: [f32; 3]) -> Self {
        self.specular = specular;
        self
    }

    pub fn with_diffuse_map(mut self, path: impl Into<PathBuf>) -> Self {
        self.diffuse_map = Some(path.into());
        self
    }

    pub fn with_specular_map(mut self, path: impl Into<PathBuf>) -> Self {
        self.specular_map = Some(path.into());
        self
    }

    /// Sets a normal map and requests the tangent stream it needs.
    pub fn with_normal_map(mut self, path: impl Into<PathBuf>) -> Self {
        self.normal_map = Some(path.into());
        self.use_tangent_data = true;
        self
    }

    pub fn with_tangent_data(mut self, enabled: bool) -> Self {
        self.use_tangent_data = enabled;
        self
    }

    fn key(&self) -> BlinnPhongKey<'_> {
        (
            self.ambient.map(factor_bits),
            self.diffuse.map(factor_bits),
            self.specular.map(factor_bits),
            factor_bits(self.shininess),
            (&self.diffuse_map, &self.specular_map, &self.normal_map),
            self.use_tangent_data,
        )
    }
}

#[derive(Debug, Clone)]
pub struct PbrMaterial {
    pub albedo: [f32; 3],
    pub metallic: f32,
    pub roughness: f32,
    pub ambient_occlusion: f32,
    pub albedo_map: Option<PathBuf>,
    pub metallic_map: Option<PathBuf>,
    pub roughness_map: Option<PathBuf>,
    pub occlusion_map: Option<PathBuf>,
    pub normal_map: Option<PathBuf>,
    pub use_tangent_data: bool,
}

impl Default for PbrMaterial {
    fn default() -> Self {
        Self {
            albedo: [1.0, 1.0, 1.0],
            metallic: 0.0,
            roughness: 0.5,
            ambient_occlusion: 1.0,
            albedo_map: None,
            metallic_map: None,
            roughness_map: None,
            occlusion_map: None,
            normal_map: None,
            use_tangent_data: false,
        }
    }
}

impl PbrMaterial {
    pub fn new(albedo: [f32; 3]) -> Self {
        Self {
            albedo,
            ..Self::default()
        }
    }

    pub fn with_metallic(mut self, metallic: f32) -> Self {
        self.metallic = metallic.clamp(0.0, 1.0);
        self
    }

    pub fn with_roughness(mut self, roughness: f32) -> Self {
        self.roughness = roughness.clamp(0.0, 1.0);
        self
    }

    pub fn with_ambient_occlusion(mut self, ao: f32) -> Self {
        self.ambient_occlusion = ao.clamp(0.0, 1.0);
        self
    }

    pub fn with_albedo_map(mut self, path: impl Into<PathBuf>) -> Self {
        self.albedo_map = Some(path.into());
        self
    }

    pub fn with_metallic_map(mut self, path: impl Into<PathBuf>) -> Self {
        self.metallic_map = Some(path.into());
        self
    }

    pub fn with_roughness_map(mut self, path: impl Into<PathBuf>) -> Self {
        self.roughness_map = Some(path.into());
        self
    }

    pub fn with_occlusion_map(mut self, path: impl Into<PathBuf>) -> Self {
        self.occlusion_map = Some(path.into());
        self
    }

    /// Sets a normal map and requests the tangent stream it needs.
    pub fn with_normal_map(mut self, path: impl Into<PathBuf>) -> Self {
        self.normal_map = Some(path.into());
        self.use_tangent_data = true;
        self
    }

    pub fn with_tangent_data(mut self, enabled: bool) -> Self {
        self.use_tangent_data = enabled;
        self
    }

    fn key(&self) -> PbrKey<'_> {
        (
            self.albedo.map(factor_bits),
            [self.metallic, self.roughness, self.ambient_occlusion].map(factor_bits),
            (&self.albedo_map, &self.metallic_map, &self.roughness_map),
            (&self.occlusion_map, &self.normal_map),
            self.use_tangent_data,
        )
    }
}

/// Bit pattern used for equality and hashing; `-0.0` folds into `0.0`.
fn factor_bits(value: f32) -> u32 {
    if value == 0.0 {
        0
    } else {
        value.to_bits()
    }
}

/// A surface description. Compared and hashed by value: two separately
/// built materials with identical fields are the same material.
#[derive(Debug, Clone)]
pub enum Material {
    BlinnPhong(BlinnPhongMaterial),
    Pbr(PbrMaterial),
}

impl Material {
    pub fn shading_model(&self) -> ShadingModel {
        match self {
            Material::BlinnPhong(_) => ShadingModel::BlinnPhong,
            Material::Pbr(_) => ShadingModel::Pbr,
        }
    }

    pub fn use_tangent_data(&self) -> bool {
        match self {
            Material::BlinnPhong(m) => m.use_tangent_data,
            Material::Pbr(m) => m.use_tangent_data,
        }
    }

    pub fn flags(&self) -> MaterialFlags {
        let mut flags = MaterialFlags::empty();
        let mut set = |flag, present: bool| flags.set(flag, present);
        match self {
            Material::BlinnPhong(m) => {
                set(MaterialFlags::BASE_COLOR_MAP, m.diffuse_map.is_some());
                set(MaterialFlags::SPECULAR_MAP, m.specular_map.is_some());
                set(MaterialFlags::NORMAL_MAP, m.normal_map.is_some());
                set(MaterialFlags::TANGENT_DATA, m.use_tangent_data);
            }
            Material::Pbr(m) => {
                set(MaterialFlags::BASE_COLOR_MAP, m.albedo_map.is_some());
                set(MaterialFlags::METALLIC_MAP, m.metallic_map.is_some());
                set(MaterialFlags::ROUGHNESS_MAP, m.roughness_map.is_some());
                set(MaterialFlags::OCCLUSION_MAP, m.occlusion_map.is_some());
                set(MaterialFlags::NORMAL_MAP, m.normal_map.is_some());
                set(MaterialFlags::TANGENT_DATA, m.use_tangent_data);
            }
        }
        flags
    }

    /// Texture slots in binding order, each with the solid color used when
    /// no map is given.
    pub fn texture_slots(&self) -> Vec<TextureSlot<'_>> {
        const WHITE: [u8; 4] = [255, 255, 255, 255];
        const FLAT_NORMAL: [u8; 4] = [128, 128, 255, 255];

        fn slot(path: &Option<PathBuf>, fallback: [u8; 4], srgb: bool) -> TextureSlot<'_> {
            TextureSlot {
                path: path.as_ref(),
                fallback,
                srgb,
            }
        }

        match self {
            Material::BlinnPhong(m) => vec![
                slot(&m.diffuse_map, WHITE, true),
                slot(&m.specular_map, WHITE, false),
                slot(&m.normal_map, FLAT_NORMAL, false),
            ],
            Material::Pbr(m) => vec![
                slot(&m.albedo_map, WHITE, true),
                slot(&m.metallic_map, WHITE, false),
                slot(&m.roughness_map, WHITE, false),
                slot(&m.occlusion_map, WHITE, false),
                slot(&m.normal_map, FLAT_NORMAL, false),
            ],
        }
    }

    pub fn uniform(&self) -> MaterialUniform {
        let flags = self.flags().bits();
        match self {
            Material::BlinnPhong(m) => MaterialUniform {
                color: [m.diffuse[0], m.diffuse[1], m.diffuse[2], 1.0],
                ambient: [m.ambient[0], m.ambient[1], m.ambient[2], 1.0],
                specular: [m.specular[0], m.specular[1], m.specular[2], m.shininess],
                params: [0.0; 4],
                flags: [flags, 0, 0, 0],
            },
            Material::Pbr(m) => MaterialUniform {
                color: [m.albedo[0], m.albedo[1], m.albedo[2], 1.0],
                ambient: [0.0; 4],
                specular: [0.0; 4],
                params: [m.metallic, m.roughness, m.ambient_occlusion, 0.0],
                flags: [flags, 0, 0, 0],
            },
        }
    }
}

impl Default for Material {
    fn default() -> Self {
        Material::Pbr(PbrMaterial::default())
    }
}

impl PartialEq for Material {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Material::BlinnPhong(a), Material::BlinnPhong(b)) => a.key() == b.key(),
            (Material::Pbr(a), Material::Pbr(b)) => a.key() == b.key(),
            _ => false,
        }
    }
}

impl Eq for Material {}

impl Hash for Material {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.shading_model().hash(state);
        match self {
            Material::BlinnPhong(m) => m.key().hash(state),
            Material::Pbr(m) => m.key().hash(state),
        }
    }
}

impl From<BlinnPhongMaterial> for Material {
    fn from(material: BlinnPhongMaterial) -> Self {
        Material::BlinnPhong(material)
    }
}

impl From<PbrMaterial> for Material {
    fn from(material: PbrMaterial) -> Self {
        Material::Pbr(material)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TextureSlot<'a> {
    pub path: Option<&'a PathBuf>,
    pub fallback: [u8; 4],
    pub srgb: bool,
}

/// Scalar material data. Blinn-Phong uses `color`/`ambient`/`specular`
/// (shininess in `specular.w`); PBR uses `color` and
/// `params = (metallic, roughness, ao, _)`.
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable, Debug, PartialEq)]
pub struct MaterialUniform {
    pub color: [f32; 4],
    pub ambient: [f32; 4],
    pub specular: [f32; 4],
    pub params: [f32; 4],
    pub flags: [u32; 4],
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::hash_map::DefaultHasher;

    fn hash_of(material: &Material) -> u64 {
        let mut hasher = DefaultHasher::new();
        material.hash(&mut hasher);
        hasher.finish()
    }

    #[test]
    fn identical_materials_are_equal_and_hash_alike() {
        let a: Material = PbrMaterial::new([0.9, 0.2, 0.1]).with_roughness(0.3).into();
        let b: Material = PbrMaterial::new([0.9, 0.2, 0.1]).with_roughness(0.3).into();
        assert_eq!(a, b);
        assert_eq!(hash_of(&a), hash_of(&b));
    }

    #[test]
    fn negative_zero_factors_match_positive_zero() {
        let a: Material = PbrMaterial::new([0.0, 0.5, 0.5]).with_metallic(0.0).into();
        let b: Material = PbrMaterial::new([-0.0, 0.5, 0.5]).with_metallic(-0.0).into();
        assert_eq!(a, b);
        assert_eq!(hash_of(&a), hash_of(&b));

        let c: Material = BlinnPhongMaterial::new([-0.0, 0.0, 1.0]).into();
        let d: Material = BlinnPhongMaterial::new([0.0, -0.0, 1.0]).into();
        assert_eq!(c, d);
        assert_eq!(hash_of(&c), hash_of(&d));
    }

    #[test]
    fn any_field_difference_breaks_equality() {
        let base = BlinnPhongMaterial::new([0.5, 0.5, 0.5]);
        let shinier = base.clone().with_shininess(64.0);
        let mapped = base.clone().with_diffuse_map("brick.png");
        let tangent = base.clone().with_tangent_data(true);

        let base = Material::from(base);
        assert_ne!(base, Material::from(shinier));
        assert_ne!(base, Material::from(mapped));
        assert_ne!(base, Material::from(tangent));
    }

    #[test]
    fn shading_models_never_compare_equal() {
        assert_ne!(
            Material::from(BlinnPhongMaterial::default()),
            Material::from(PbrMaterial::default())
        );
    }

    #[test]
    fn normal_map_requests_tangent_data() {
        let material = Material::from(PbrMaterial::default().with_normal_map("n.png"));
        assert!(material.use_tangent_data());
        assert!(material.flags().contains(MaterialFlags::NORMAL_MAP | MaterialFlags::TANGENT_DATA));
    }

    #[test]
    fn missing_maps_fall_back_to_solid_colors() {
        let material = Material::from(PbrMaterial::default().with_albedo_map("albedo.png"));
        let slots = material.texture_slots();
        assert_eq!(slots.len(), 5);
        assert!(slots[0].path.is_some());
        assert!(slots[1..].iter().all(|slot| slot.path.is_none()));
        assert_eq!(slots[4].fallback, [128, 128, 255, 255]);
    }

    #[test]
    fn uniform_is_80_bytes() {
        assert_eq!(std::mem::size_of::<MaterialUniform>(), 80);
    }
}
