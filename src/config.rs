//! Engine configuration. Every field has a default so partial JSON documents
//! are accepted.

use std::time::Duration;

use crate::enums::SlabMode;
use crate::error::MprError;
use crate::shading::ShadingConfig;
use crate::window_level::WindowLevel;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ZoomLimits {
    pub min: f32,
    pub max: f32,
}

impl Default for ZoomLimits {
    fn default() -> Self {
        Self { min: 0.1, max: 10.0 }
    }
}

impl ZoomLimits {
    /// Never panics, even on unsanitized limits.
    pub fn clamp(&self, zoom: f32) -> f32 {
        zoom.max(self.min).min(self.max)
    }

    /// Limits that keep zoom finite and strictly positive: a non-positive or
    /// non-finite bound falls back to its default, and inverted bounds are
    /// swapped.
    pub fn sanitized(self) -> Self {
        let fallback = Self::default();
        let valid = |v: f32| v.is_finite() && v > 0.0;
        let mut limits = Self {
            min: if valid(self.min) { self.min } else { fallback.min },
            max: if valid(self.max) { self.max } else { fallback.max },
        };
        if limits.min > limits.max {
            std::mem::swap(&mut limits.min, &mut limits.max);
        }
        if limits != self {
            log::warn!("zoom limits {self:?} replaced by {limits:?}");
        }
        limits
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlayStyle {
    pub crosshair_color: [u8; 4],
    pub measurement_color: [u8; 4],
    pub draw_crosshair: bool,
}

impl Default for OverlayStyle {
    fn default() -> Self {
        Self {
            crosshair_color: [0, 200, 255, 255],
            measurement_color: [255, 220, 0, 255],
            draw_crosshair: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub zoom_limits: ZoomLimits,
    pub slab_mode: SlabMode,
    /// Intensity for oblique samples outside the volume. `None` uses the
    /// volume minimum.
    pub background: Option<f32>,
    pub synchronize: bool,
    /// Initial window/level for every viewport. `None` spans the volume range.
    pub initial_window: Option<WindowLevel>,
    /// Minimum time between two presented oblique frames while gestures
    /// are still arriving.
    pub oblique_min_interval_ms: u64,
    pub overlay: OverlayStyle,
    /// Light the oblique view instead of showing plain window/level.
    pub shade_oblique: bool,
    pub shading: ShadingConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            zoom_limits: ZoomLimits::default(),
            slab_mode: SlabMode::Maximum,
            background: None,
            synchronize: true,
            initial_window: None,
            oblique_min_interval_ms: 100,
            overlay: OverlayStyle::default(),
            shade_oblique: true,
            shading: ShadingConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn from_json(json: &str) -> Result<Self, MprError> {
        let mut config: Self = serde_json::from_str(json)?;
        config.zoom_limits = config.zoom_limits.sanitized();
        Ok(config)
    }

    pub fn oblique_min_interval(&self) -> Duration {
        Duration::from_millis(self.oblique_min_interval_ms)
    }
}
