//! Lighting for the oblique view.
//!
//! Every sample gets ambient + diffuse + specular lighting, attenuated by a
//! precomputed shadow map, then edge enhancement, a diagnostic contrast curve
//! and depth fog. Positions are in voxel index space; directions point the
//! way light or the eye ray travels.

use crate::enums::LightingModel;
use crate::slice::{ObliquePlane, Slice};
use crate::volume::Volume;
use crate::window_level::WindowLevel;

use glam::{Mat4, Vec3};
use image::{ImageBuffer, RgbaImage};
use ndarray::{Array2, Zip};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

const LUMA: Vec3 = Vec3::new(0.2126, 0.7152, 0.0722);

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Material {
    pub ambient: f32,
    pub diffuse: f32,
    pub specular: f32,
    pub shininess: f32,
    pub roughness: f32,
    pub metallic: f32,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            ambient: 0.25,
            diffuse: 0.75,
            specular: 0.3,
            shininess: 24.0,
            roughness: 0.5,
            metallic: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Light {
    /// Travel direction relative to the view: `+z` points away from the eye.
    pub direction: Vec3,
    pub color: Vec3,
    pub intensity: f32,
}

impl Default for Light {
    fn default() -> Self {
        Self {
            direction: Vec3::new(0.3, 0.4, 1.0),
            color: Vec3::ONE,
            intensity: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShadingConfig {
    pub model: LightingModel,
    pub material: Material,
    pub light: Light,
    pub shadows: bool,
    /// Brightness multiplier of fully shadowed samples.
    pub shadow_strength: f32,
    pub shadow_bias: f32,
    pub shadow_map_size: usize,
    /// Intensity treated as occluding. `None` uses the middle of the volume range.
    pub shadow_threshold: Option<f32>,
    pub edge_strength: f32,
    pub edge_low: f32,
    pub edge_high: f32,
    pub edge_color: Vec3,
    pub diagnostic_gamma: f32,
    pub min_luminance: f32,
    pub fog_color: Vec3,
    pub fog_density: f32,
}

impl Default for ShadingConfig {
    fn default() -> Self {
        Self {
            model: LightingModel::Phong,
            material: Material::default(),
            light: Light::default(),
            shadows: true,
            shadow_strength: 0.4,
            shadow_bias: 0.01,
            shadow_map_size: 128,
            shadow_threshold: None,
            edge_strength: 0.6,
            edge_low: 0.4,
            edge_high: 0.9,
            edge_color: Vec3::new(0.05, 0.05, 0.1),
            diagnostic_gamma: 0.9,
            min_luminance: 0.04,
            fog_color: Vec3::new(0.0, 0.0, 0.02),
            fog_density: 0.35,
        }
    }
}

/// Depth of the first occluding sample along each light ray, in light-space
/// NDC depth `[0, 1]`.
#[derive(Debug, Clone)]
pub struct ShadowMap {
    view_proj: Mat4,
    depth: Array2<f32>,
    bias: f32,
}

impl ShadowMap {
    /// Orthographic light-space transform enclosing the whole volume.
    pub fn light_view_proj(volume: &Volume, light_dir: Vec3) -> Mat4 {
        let dir = light_dir.try_normalize().unwrap_or(Vec3::Z);
        let half = volume.diagonal() as f32 * 0.5 + 1.0;
        let center = volume.center();
        let up = if dir.y.abs() < 0.99 { Vec3::Y } else { Vec3::Z };
        let view = Mat4::look_to_rh(center - dir * half, dir, up);
        let proj = Mat4::orthographic_rh(-half, half, -half, half, 0.0, 2.0 * half);
        proj * view
    }

    /// March the volume along the light direction from every texel.
    pub fn build(volume: &Volume, light_dir: Vec3, threshold: f32, size: usize, bias: f32) -> Self {
        let size = size.max(2);
        let view_proj = Self::light_view_proj(volume, light_dir);
        let inverse = view_proj.inverse();
        let step = 2.0 / (size - 1) as f32;

        let mut depth = Array2::<f32>::from_elem((size, size), f32::INFINITY);
        Zip::indexed(&mut depth).par_for_each(|(row, col), out| {
            let x = -1.0 + col as f32 * step;
            let y = -1.0 + row as f32 * step;
            let start = inverse.project_point3(Vec3::new(x, y, 0.0));
            let end = inverse.project_point3(Vec3::new(x, y, 1.0));
            let steps = (end - start).length().ceil().max(1.0) as usize;
            for k in 0..=steps {
                let t = k as f32 / steps as f32;
                if volume
                    .sample(start.lerp(end, t))
                    .is_some_and(|v| v >= threshold)
                {
                    *out = t;
                    break;
                }
            }
        });

        Self {
            view_proj,
            depth,
            bias,
        }
    }

    pub fn size(&self) -> usize {
        self.depth.nrows()
    }

    /// 1 when lit, 0 when occluded. Positions projecting outside the map are lit.
    pub fn lookup(&self, position: Vec3) -> f32 {
        let ndc = self.view_proj.project_point3(position);
        if !ndc.is_finite() || ndc.x.abs() > 1.0 || ndc.y.abs() > 1.0 || !(0.0..=1.0).contains(&ndc.z)
        {
            return 1.0;
        }
        let last = (self.size() - 1) as f32;
        let col = ((ndc.x + 1.0) * 0.5 * last).round() as usize;
        let row = ((ndc.y + 1.0) * 0.5 * last).round() as usize;
        match self.depth.get([row, col]) {
            Some(&occluder) if ndc.z > occluder + self.bias => 0.0,
            _ => 1.0,
        }
    }
}

pub fn smoothstep(edge0: f32, edge1: f32, x: f32) -> f32 {
    if edge1 <= edge0 {
        return if x < edge0 { 0.0 } else { 1.0 };
    }
    let t = ((x - edge0) / (edge1 - edge0)).clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

/// `1 - |n·v|`: 0 where the surface faces the eye, 1 at silhouettes.
pub fn edge_factor(normal: Vec3, view_dir: Vec3) -> f32 {
    1.0 - normal
        .normalize_or_zero()
        .dot(view_dir.normalize_or_zero())
        .abs()
        .min(1.0)
}

#[derive(Debug, Clone)]
pub struct ShadingPipeline {
    pub config: ShadingConfig,
    shadow_map: Option<ShadowMap>,
    depth_origin: Vec3,
    depth_axis: Vec3,
    depth_extent: f32,
}

impl ShadingPipeline {
    pub fn new(config: ShadingConfig) -> Self {
        Self {
            config,
            shadow_map: None,
            depth_origin: Vec3::ZERO,
            depth_axis: Vec3::Z,
            depth_extent: 1.0,
        }
    }

    /// Pipeline for the oblique viewport at `rotation`: the eye looks along
    /// the rotated plane normal and the shadow map is built for the light
    /// direction relative to that view.
    pub fn for_oblique(volume: &Volume, config: ShadingConfig, rotation: Vec3) -> Self {
        let basis = ObliquePlane::rotation_matrix(rotation);
        let view_dir = basis * Vec3::Z;
        let pipeline = Self::new(config).with_depth_range(volume, view_dir);
        if !config.shadows {
            return pipeline;
        }
        let (min, max) = volume.intensity_range();
        let threshold = config
            .shadow_threshold
            .unwrap_or((f32::from(min) + f32::from(max)) * 0.5);
        let light_dir = basis * config.light.direction;
        log::debug!("building {0}x{0} shadow map for light {light_dir:?}", config.shadow_map_size);
        pipeline.with_shadow_map(ShadowMap::build(
            volume,
            light_dir,
            threshold,
            config.shadow_map_size,
            config.shadow_bias,
        ))
    }

    pub fn with_shadow_map(mut self, shadow_map: ShadowMap) -> Self {
        self.shadow_map = Some(shadow_map);
        self
    }

    /// Normalize depth along `view_dir` across the volume diagonal.
    pub fn with_depth_range(mut self, volume: &Volume, view_dir: Vec3) -> Self {
        let axis = view_dir.try_normalize().unwrap_or(Vec3::Z);
        let extent = volume.diagonal() as f32;
        self.depth_axis = axis;
        self.depth_extent = extent;
        self.depth_origin = volume.center() - axis * extent * 0.5;
        self
    }

    pub fn shadow_map(&self) -> Option<&ShadowMap> {
        self.shadow_map.as_ref()
    }

    pub fn normalized_depth(&self, position: Vec3) -> f32 {
        ((position - self.depth_origin).dot(self.depth_axis) / self.depth_extent).clamp(0.0, 1.0)
    }

    pub fn shadow_factor(&self, position: Vec3) -> f32 {
        match (&self.shadow_map, self.config.shadows) {
            (Some(map), true) => map.lookup(position),
            _ => 1.0,
        }
    }

    /// Color of one sample. `albedo` is the base color from the transfer
    /// function; a zero `normal` is treated as facing the eye.
    pub fn shade(
        &self,
        sample_position: Vec3,
        normal: Vec3,
        view_dir: Vec3,
        light_dir: Vec3,
        material: &Material,
        albedo: Vec3,
    ) -> Vec3 {
        let v = -view_dir.try_normalize().unwrap_or(Vec3::Z);
        let l = -light_dir.try_normalize().unwrap_or(Vec3::Z);
        let n = normal.try_normalize().unwrap_or(v);
        let light = self.config.light.color * self.config.light.intensity;

        let n_dot_l = n.dot(l).max(0.0);
        let direct = match self.config.model {
            LightingModel::Phong => {
                let reflected = 2.0 * n.dot(l) * n - l;
                let specular = if n_dot_l > 0.0 {
                    reflected.dot(v).max(0.0).powf(material.shininess) * material.specular
                } else {
                    0.0
                };
                albedo * material.diffuse * n_dot_l + Vec3::splat(specular)
            }
            LightingModel::Physical => physical_brdf(n, v, l, material, albedo) * n_dot_l,
        };

        let shadow = self.shadow_factor(sample_position);
        let visibility = self.config.shadow_strength + (1.0 - self.config.shadow_strength) * shadow;
        let mut color = albedo * material.ambient + direct * light * visibility;

        let edge = smoothstep(self.config.edge_low, self.config.edge_high, edge_factor(n, v));
        color = color.lerp(self.config.edge_color, edge * self.config.edge_strength);

        color = self.apply_contrast(color);
        self.apply_fog(color, self.normalized_depth(sample_position))
    }

    /// Diagnostic gamma followed by a minimum-luminance floor.
    pub fn apply_contrast(&self, color: Vec3) -> Vec3 {
        let gamma = self.config.diagnostic_gamma.max(f32::EPSILON);
        let curved = color.clamp(Vec3::ZERO, Vec3::ONE).powf(gamma);
        let luminance = curved.dot(LUMA);
        if luminance < self.config.min_luminance {
            (curved + Vec3::splat(self.config.min_luminance - luminance)).min(Vec3::ONE)
        } else {
            curved
        }
    }

    pub fn apply_fog(&self, color: Vec3, depth: f32) -> Vec3 {
        let amount = (depth * self.config.fog_density).clamp(0.0, 1.0);
        color.lerp(self.config.fog_color, amount)
    }

    /// Shade an extracted oblique slice. The eye looks along the plane
    /// normal; the configured light direction is relative to that view.
    pub fn render_oblique(
        &self,
        volume: &Volume,
        plane: &ObliquePlane,
        slice: &Slice,
        window_level: &WindowLevel,
    ) -> RgbaImage {
        let view_dir = plane.normal();
        let configured = self.config.light.direction;
        // same as rotating the view-relative direction by the plane basis
        let light_dir = plane.u * configured.x + plane.v * configured.y + view_dir * configured.z;
        let material = self.config.material;

        let pixel_data: Vec<u8> = (0..slice.height)
            .into_par_iter()
            .flat_map_iter(|row| {
                (0..slice.width).flat_map(move |col| {
                    let position = plane.point_at(col as f32, row as f32);
                    let raw = slice.value(col, row).unwrap_or_default();
                    let albedo = Vec3::splat(window_level.apply_value(raw) as f32 / 255.0);
                    let normal = if volume.contains(position) {
                        -volume.gradient(position)
                    } else {
                        Vec3::ZERO
                    };
                    let color =
                        self.shade(position, normal, view_dir, light_dir, &material, albedo);
                    let c = (color.clamp(Vec3::ZERO, Vec3::ONE) * 255.0).round();
                    [c.x as u8, c.y as u8, c.z as u8, 255]
                })
            })
            .collect();

        ImageBuffer::from_raw(slice.width as u32, slice.height as u32, pixel_data)
            .unwrap_or_else(|| RgbaImage::new(slice.width as u32, slice.height as u32))
    }
}

/// Cook-Torrance with GGX distribution, Schlick Fresnel and Smith geometry.
fn physical_brdf(n: Vec3, v: Vec3, l: Vec3, material: &Material, albedo: Vec3) -> Vec3 {
    let h = (v + l).normalize_or_zero();
    let n_dot_v = n.dot(v).max(1e-4);
    let n_dot_l = n.dot(l).max(1e-4);
    let n_dot_h = n.dot(h).max(0.0);
    let v_dot_h = v.dot(h).max(0.0);

    let alpha = (material.roughness * material.roughness).max(1e-3);
    let alpha2 = alpha * alpha;
    let denom = n_dot_h * n_dot_h * (alpha2 - 1.0) + 1.0;
    let distribution = alpha2 / (std::f32::consts::PI * denom * denom);

    let f0 = Vec3::splat(0.04).lerp(albedo, material.metallic);
    let fresnel = f0 + (Vec3::ONE - f0) * (1.0 - v_dot_h).powi(5);

    let k = (material.roughness + 1.0).powi(2) / 8.0;
    let geometry = (n_dot_v / (n_dot_v * (1.0 - k) + k)) * (n_dot_l / (n_dot_l * (1.0 - k) + k));

    let specular = fresnel * (distribution * geometry / (4.0 * n_dot_v * n_dot_l))
        * material.specular;
    let diffuse = (Vec3::ONE - fresnel) * (1.0 - material.metallic) * albedo * material.diffuse;
    diffuse + specular
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::slice::SliceExtractor;

    fn plain() -> ShadingConfig {
        ShadingConfig {
            shadows: false,
            edge_strength: 0.0,
            diagnostic_gamma: 1.0,
            min_luminance: 0.0,
            fog_density: 0.0,
            ..ShadingConfig::default()
        }
    }

    #[test]
    fn lambert_term_follows_light_angle() {
        let pipeline = ShadingPipeline::new(plain());
        let material = Material {
            specular: 0.0,
            ..Material::default()
        };
        let albedo = Vec3::splat(0.8);
        let facing = pipeline.shade(Vec3::ZERO, -Vec3::Z, Vec3::Z, Vec3::Z, &material, albedo);
        let expected = 0.8 * (0.25 + 0.75);
        assert!((facing - Vec3::splat(expected)).length() < 1e-4);

        let away = pipeline.shade(Vec3::ZERO, -Vec3::Z, Vec3::Z, -Vec3::Z, &material, albedo);
        assert!((away - Vec3::splat(0.8 * 0.25)).length() < 1e-4);
    }

    #[test]
    fn phong_highlight_is_added() {
        let pipeline = ShadingPipeline::new(plain());
        let material = Material::default();
        let lit = pipeline.shade(Vec3::ZERO, -Vec3::Z, Vec3::Z, Vec3::Z, &material, Vec3::splat(0.2));
        assert!(lit.x > 0.2 * (0.25 + 0.75));
    }

    #[test]
    fn physical_model_is_finite_and_bounded() {
        let config = ShadingConfig {
            model: LightingModel::Physical,
            ..plain()
        };
        let pipeline = ShadingPipeline::new(config);
        let material = Material {
            metallic: 0.7,
            roughness: 0.3,
            ..Material::default()
        };
        let dir = Vec3::new(0.2, -0.3, 1.0);
        let c = pipeline.shade(Vec3::ZERO, Vec3::new(0.1, 0.2, -1.0), Vec3::Z, dir, &material, Vec3::ONE);
        assert!(c.is_finite());
        assert!(c.cmpge(Vec3::ZERO).all() && c.cmple(Vec3::ONE).all());
    }

    #[test]
    fn edge_factor_extremes() {
        assert_eq!(edge_factor(Vec3::Z, Vec3::Z), 0.0);
        assert_eq!(edge_factor(-Vec3::Z, Vec3::Z), 0.0);
        assert!((edge_factor(Vec3::X, Vec3::Z) - 1.0).abs() < 1e-6);
        assert_eq!(smoothstep(0.4, 0.9, 0.2), 0.0);
        assert_eq!(smoothstep(0.4, 0.9, 1.0), 1.0);
    }

    #[test]
    fn silhouettes_blend_toward_edge_color() {
        let config = ShadingConfig {
            edge_strength: 1.0,
            ..plain()
        };
        let pipeline = ShadingPipeline::new(config);
        let c = pipeline.shade(Vec3::ZERO, Vec3::X, Vec3::Z, Vec3::Z, &Material::default(), Vec3::ONE);
        assert!((c - config.edge_color).length() < 1e-4);
    }

    #[test]
    fn luminance_floor_keeps_dark_regions_visible() {
        let config = ShadingConfig {
            min_luminance: 0.1,
            ..plain()
        };
        let pipeline = ShadingPipeline::new(config);
        let c = pipeline.apply_contrast(Vec3::ZERO);
        assert!((c.dot(LUMA) - 0.1).abs() < 1e-4);
        let bright = pipeline.apply_contrast(Vec3::splat(0.5));
        assert_eq!(bright, Vec3::splat(0.5));
    }

    #[test]
    fn fog_grows_with_depth() {
        let config = ShadingConfig {
            fog_density: 1.0,
            fog_color: Vec3::ZERO,
            ..plain()
        };
        let pipeline = ShadingPipeline::new(config);
        assert_eq!(pipeline.apply_fog(Vec3::ONE, 0.0), Vec3::ONE);
        assert_eq!(pipeline.apply_fog(Vec3::ONE, 1.0), Vec3::ZERO);

        let volume = Volume::from_raw((8, 8, 8), (1.0, 1.0, 1.0), vec![0; 512]).unwrap();
        let pipeline = pipeline.with_depth_range(&volume, Vec3::Z);
        let near = pipeline.normalized_depth(Vec3::new(3.5, 3.5, 0.0));
        let far = pipeline.normalized_depth(Vec3::new(3.5, 3.5, 7.0));
        assert!(near < far);
    }

    fn walled_volume() -> Volume {
        // bright wall at z = 2, light travels +z
        let buffer = (0..16 * 16 * 16)
            .map(|i| if i / 256 == 2 { 1000 } else { 0 })
            .collect();
        Volume::from_raw((16, 16, 16), (1.0, 1.0, 1.0), buffer).unwrap()
    }

    #[test]
    fn shadow_map_occludes_behind_wall() {
        let volume = walled_volume();
        let map = ShadowMap::build(&volume, Vec3::Z, 500.0, 64, 0.01);
        assert_eq!(map.lookup(Vec3::new(7.5, 7.5, 10.0)), 0.0);
        assert_eq!(map.lookup(Vec3::new(7.5, 7.5, 1.0)), 1.0);
        // far outside the light frustum
        assert_eq!(map.lookup(Vec3::new(500.0, -500.0, 8.0)), 1.0);
    }

    #[test]
    fn shadowed_samples_are_dimmed() {
        let volume = walled_volume();
        let config = ShadingConfig {
            shadows: true,
            ..plain()
        };
        let map = ShadowMap::build(&volume, Vec3::Z, 500.0, 64, 0.01);
        let pipeline = ShadingPipeline::new(config).with_shadow_map(map);
        let material = Material {
            specular: 0.0,
            ..Material::default()
        };
        let lit = pipeline.shade(Vec3::new(7.5, 7.5, 1.0), -Vec3::Z, Vec3::Z, Vec3::Z, &material, Vec3::ONE);
        let dark = pipeline.shade(Vec3::new(7.5, 7.5, 10.0), -Vec3::Z, Vec3::Z, Vec3::Z, &material, Vec3::ONE);
        assert!(dark.x < lit.x);
    }

    #[test]
    fn oblique_pipeline_carries_shadow_map() {
        let volume = walled_volume();
        let config = ShadingConfig {
            shadow_map_size: 16,
            ..ShadingConfig::default()
        };
        let pipeline = ShadingPipeline::for_oblique(&volume, config, Vec3::ZERO);
        assert_eq!(pipeline.shadow_map().map(ShadowMap::size), Some(16));
        let without = ShadingPipeline::for_oblique(
            &volume,
            ShadingConfig {
                shadows: false,
                ..config
            },
            Vec3::ZERO,
        );
        assert!(without.shadow_map().is_none());
    }

    #[test]
    fn render_oblique_has_slice_dimensions() {
        let volume = walled_volume();
        let plane = ObliquePlane::for_volume(&volume, Vec3::new(0.4, 0.2, 0.0), 14);
        let slice = SliceExtractor::default().extract_oblique(&volume, &plane, 1);
        let pipeline = ShadingPipeline::new(ShadingConfig::default())
            .with_depth_range(&volume, plane.normal());
        let image = pipeline.render_oblique(&volume, &plane, &slice, &WindowLevel::new(1000.0, 500.0));
        assert_eq!(image.dimensions(), (slice.width as u32, slice.height as u32));
        assert!(image.pixels().all(|p| p.0[3] == 255));
    }
}
