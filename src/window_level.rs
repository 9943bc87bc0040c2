//! Linear window/level contrast mapping and named presets.

use std::collections::BTreeMap;

use crate::error::MprError;
use crate::slice::Slice;

use image::{GrayImage, ImageBuffer};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Smallest window width used by the transform. A window at or below zero
/// collapses to this width, which turns the mapping into a threshold at
/// `level`.
pub const WINDOW_EPSILON: f32 = 1e-3;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WindowLevel {
    pub window: f32,
    pub level: f32,
}

impl Default for WindowLevel {
    fn default() -> Self {
        Self {
            window: 400.0,
            level: 40.0,
        }
    }
}

impl WindowLevel {
    pub fn new(window: f32, level: f32) -> Self {
        if !(window > 0.0) {
            log::warn!("window width {window} is not positive, clamping to {WINDOW_EPSILON}");
        }
        Self {
            window: Self::sanitize(window),
            level,
        }
    }

    /// Window spanning the full intensity range of a volume.
    pub fn from_range(min: f32, max: f32) -> Self {
        Self::new(max - min, (max + min) * 0.5)
    }

    fn sanitize(window: f32) -> f32 {
        if window.is_finite() && window > WINDOW_EPSILON {
            window
        } else if window == f32::INFINITY {
            f32::MAX
        } else {
            WINDOW_EPSILON
        }
    }

    /// `(min, max)` raw values mapped to 0 and 255.
    pub fn range(&self) -> (f32, f32) {
        let half = Self::sanitize(self.window) * 0.5;
        (self.level - half, self.level + half)
    }

    /// Map a single raw value to display intensity.
    #[inline]
    pub fn apply_value(&self, value: f32) -> u8 {
        let (min, max) = self.range();
        let normalized = ((value - min) / (max - min)).clamp(0.0, 1.0);
        if normalized.is_nan() {
            return 0;
        }
        (normalized * 255.0).round() as u8
    }

    pub fn apply_to_buffer(&self, slice: &Slice) -> Vec<u8> {
        let contiguous = slice.data.as_standard_layout();
        let values = contiguous.as_slice().unwrap_or(&[]);
        values.par_iter().map(|&v| self.apply_value(v)).collect()
    }

    /// Map a slice into an 8-bit grayscale image of the same size.
    pub fn apply(&self, slice: &Slice) -> GrayImage {
        let pixel_data = self.apply_to_buffer(slice);
        ImageBuffer::from_raw(slice.width as u32, slice.height as u32, pixel_data)
            .unwrap_or_else(|| GrayImage::new(slice.width as u32, slice.height as u32))
    }
}

/// A named window/level pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preset {
    pub name: String,
    pub window: f32,
    pub level: f32,
    #[serde(default)]
    pub description: String,
}

impl Preset {
    pub fn new(name: &str, window: f32, level: f32, description: &str) -> Self {
        Self {
            name: name.to_owned(),
            window,
            level,
            description: description.to_owned(),
        }
    }

    pub fn window_level(&self) -> WindowLevel {
        WindowLevel::new(self.window, self.level)
    }
}

/// Presets grouped by modality, e.g. `"CT"` → `[bone, brain, ...]`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PresetCatalog {
    modalities: BTreeMap<String, Vec<Preset>>,
}

impl PresetCatalog {
    pub fn from_json(json: &str) -> Result<Self, MprError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String, MprError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// The presets commonly shipped with radiology viewers: CT tissue
    /// windows, plus full-range defaults for MR, US, XR and MG.
    pub fn builtin() -> Self {
        let mut catalog = Self::default();
        for preset in [
            Preset::new("abdomen", 400.0, 50.0, "Abdomen Soft Tissue"),
            Preset::new("bone", 1500.0, 400.0, "Bone Window"),
            Preset::new("brain", 80.0, 40.0, "Brain Tissue"),
            Preset::new("chest", 1600.0, -600.0, "Chest/Lung"),
            Preset::new("liver", 160.0, 60.0, "Liver"),
            Preset::new("mediastinum", 350.0, 50.0, "Mediastinum"),
            Preset::new("spine", 250.0, 50.0, "Spine Soft Tissue"),
            Preset::new("angio", 600.0, 300.0, "CT Angiography"),
        ] {
            catalog.insert("CT", preset);
        }
        for (name, description) in [
            ("t1", "T1 Weighted"),
            ("t2", "T2 Weighted"),
            ("flair", "FLAIR"),
            ("dwi", "Diffusion Weighted"),
            ("gre", "Gradient Echo"),
            ("stir", "STIR"),
        ] {
            catalog.insert("MR", Preset::new(name, 1000.0, 500.0, description));
        }
        for (name, description) in [
            ("chest", "Chest X-Ray"),
            ("abdomen", "Abdomen X-Ray"),
            ("bone", "Bone X-Ray"),
            ("soft_tissue", "Soft Tissue"),
        ] {
            catalog.insert("XR", Preset::new(name, 65536.0, 32768.0, description));
        }
        for (name, description) in [
            ("general", "General Ultrasound"),
            ("doppler", "Doppler Ultrasound"),
            ("cardiac", "Cardiac Ultrasound"),
        ] {
            catalog.insert("US", Preset::new(name, 256.0, 128.0, description));
        }
        for (name, description) in [
            ("standard", "Standard Mammography"),
            ("contrast", "Contrast Enhanced"),
        ] {
            catalog.insert("MG", Preset::new(name, 65536.0, 32768.0, description));
        }
        catalog
    }

    /// Add a preset, replacing one with the same name in that modality.
    pub fn insert(&mut self, modality: &str, preset: Preset) {
        let presets = self.modalities.entry(modality.to_owned()).or_default();
        match presets.iter_mut().find(|p| p.name == preset.name) {
            Some(existing) => *existing = preset,
            None => presets.push(preset),
        }
    }

    pub fn get(&self, modality: &str, name: &str) -> Option<&Preset> {
        self.modalities
            .get(modality)?
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(name))
    }

    pub fn lookup(&self, modality: &str, name: &str) -> Result<&Preset, MprError> {
        self.get(modality, name)
            .ok_or_else(|| MprError::UnknownPreset(format!("{modality}/{name}")))
    }

    pub fn modalities(&self) -> impl Iterator<Item = &str> {
        self.modalities.keys().map(String::as_str)
    }

    pub fn presets(&self, modality: &str) -> &[Preset] {
        self.modalities
            .get(modality)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enums::Orientation;
    use ndarray::Array2;

    fn slice_of(values: &[f32]) -> Slice {
        let data = Array2::from_shape_vec((1, values.len()), values.to_vec()).unwrap();
        Slice {
            width: values.len(),
            height: 1,
            data,
            orientation: Orientation::Axial,
            index: 0,
        }
    }

    #[test]
    fn maps_reference_values() {
        let wl = WindowLevel::new(100.0, 50.0);
        assert_eq!(wl.apply_value(50.0), 128);
        assert_eq!(wl.apply_value(0.0), 0);
        assert_eq!(wl.apply_value(200.0), 255);
        assert_eq!(wl.apply_value(-5000.0), 0);
    }

    #[test]
    fn apply_is_idempotent_and_monotonic() {
        let wl = WindowLevel::new(350.0, 40.0);
        let values: Vec<f32> = (-300..400).step_by(7).map(|v| v as f32).collect();
        let slice = slice_of(&values);
        let first = wl.apply(&slice);
        let second = wl.apply(&slice);
        assert_eq!(first, second);
        let mapped = first.into_raw();
        assert!(mapped.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn zero_window_thresholds_without_panicking() {
        let wl = WindowLevel {
            window: 0.0,
            level: 100.0,
        };
        let image = wl.apply(&slice_of(&[0.0, 99.0, 101.0, 1000.0]));
        assert_eq!(image.into_raw(), vec![0, 0, 255, 255]);

        let negative = WindowLevel::new(-20.0, 10.0);
        assert_eq!(negative.window, WINDOW_EPSILON);
        assert_eq!(negative.apply_value(f32::NAN), 0);
    }

    #[test]
    fn output_has_slice_dimensions() {
        let data = Array2::from_shape_fn((3, 5), |(r, c)| (r * 5 + c) as f32);
        let slice = Slice {
            width: 5,
            height: 3,
            data,
            orientation: Orientation::Coronal,
            index: 0,
        };
        let image = WindowLevel::from_range(0.0, 14.0).apply(&slice);
        assert_eq!(image.dimensions(), (5, 3));
        assert_eq!(image.get_pixel(4, 2).0[0], 255);
        assert_eq!(image.get_pixel(0, 0).0[0], 0);
    }

    #[test]
    fn builtin_catalog_has_tissue_presets() {
        let catalog = PresetCatalog::builtin();
        let bone = catalog.get("CT", "Bone").unwrap();
        assert_eq!(bone.window_level(), WindowLevel::new(1500.0, 400.0));
        assert!(catalog.lookup("CT", "elbow").is_err());
        assert!(catalog.modalities().any(|m| m == "MR"));
    }

    #[test]
    fn builtin_catalog_covers_every_modality() {
        let catalog = PresetCatalog::builtin();
        let modalities: Vec<&str> = catalog.modalities().collect();
        assert_eq!(modalities, ["CT", "MG", "MR", "US", "XR"]);
        assert_eq!(catalog.presets("CT").len(), 8);
        assert_eq!(catalog.presets("MR").len(), 6);
        assert_eq!(catalog.presets("XR").len(), 4);
        assert_eq!(catalog.presets("US").len(), 3);
        assert_eq!(catalog.presets("MG").len(), 2);
        let stir = catalog.get("MR", "STIR").unwrap();
        assert_eq!((stir.window, stir.level), (1000.0, 500.0));
        let mammo = catalog.get("MG", "standard").unwrap();
        assert_eq!((mammo.window, mammo.level), (65536.0, 32768.0));
        assert!(catalog.get("US", "doppler").is_some());
    }

    #[test]
    fn catalog_from_json() {
        let json = r#"{ "CT": [ { "name": "lung", "window": 1500, "level": -600 } ] }"#;
        let catalog = PresetCatalog::from_json(json).unwrap();
        let lung = catalog.get("CT", "lung").unwrap();
        assert_eq!(lung.level, -600.0);
        assert!(lung.description.is_empty());
        assert!(PresetCatalog::from_json("{ not json").is_err());

        let round = PresetCatalog::from_json(&catalog.to_json().unwrap()).unwrap();
        assert_eq!(round, catalog);
    }
}
