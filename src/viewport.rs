use std::fmt;

use crate::config::{EngineConfig, ZoomLimits};
use crate::enums::{Orientation, SlabMode, SwipeDirection};
use crate::gesture::GestureOp;
use crate::slice::ObliquePlane;
use crate::volume::Volume;
use crate::window_level::WindowLevel;

use glam::{Vec2, Vec3};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ViewportId(pub u32);

/// Mutable navigation state of one view.
///
/// Screen space has its origin at the top-left of the drawable. The centre
/// sample of the slice is drawn at the screen centre offset by `pan`. At zoom
/// 1 a sample along the finer in-plane axis spans one screen pixel; the other
/// axis is stretched by the spacing ratio so the view keeps its physical
/// proportions. Flips mirror the image about the screen centre.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewportState {
    pub id: ViewportId,
    pub orientation: Orientation,
    pub pan: Vec2,
    /// Euler angles in radians; only used by oblique viewports.
    pub rotation: Vec3,
    pub window_level: WindowLevel,
    pub slab_mode: SlabMode,
    pub screen_size: Vec2,
    /// Display the window/level output inverted.
    pub invert: bool,
    pub flip_horizontal: bool,
    pub flip_vertical: bool,
    zoom: f32,
    zoom_limits: ZoomLimits,
    slice_index: usize,
    slice_count: usize,
    slab_thickness: usize,
}

impl ViewportState {
    pub fn new(
        id: ViewportId,
        orientation: Orientation,
        volume: &Volume,
        config: &EngineConfig,
    ) -> Self {
        let slice_count = volume.slice_count(orientation);
        let (width, height) = volume.slice_dimensions(orientation);
        let (min, max) = volume.intensity_range();
        let window_level = config
            .initial_window
            .unwrap_or_else(|| WindowLevel::from_range(f32::from(min), f32::from(max)));

        let zoom_limits = config.zoom_limits.sanitized();

        let mut state = Self {
            id,
            orientation,
            pan: Vec2::ZERO,
            rotation: Vec3::ZERO,
            window_level,
            slab_mode: config.slab_mode,
            screen_size: Vec2::ZERO,
            invert: false,
            flip_horizontal: false,
            flip_vertical: false,
            zoom: zoom_limits.clamp(1.0),
            zoom_limits,
            slice_index: slice_count / 2,
            slice_count,
            slab_thickness: 1,
        };
        state.screen_size = Vec2::new(width as f32, height as f32) * state.aspect(volume);
        state
    }

    pub fn zoom(&self) -> f32 {
        self.zoom
    }

    pub fn zoom_limits(&self) -> ZoomLimits {
        self.zoom_limits
    }

    pub fn set_zoom(&mut self, zoom: f32) {
        if zoom.is_finite() {
            self.zoom = self.zoom_limits.clamp(zoom);
        }
    }

    /// Multiply the zoom by `factor`. Non-positive or non-finite factors are ignored.
    pub fn zoom_by(&mut self, factor: f32) {
        if factor.is_finite() && factor > 0.0 {
            self.set_zoom(self.zoom * factor);
        }
    }

    pub fn pan_by(&mut self, delta: Vec2) {
        if delta.is_finite() {
            self.pan += delta;
        }
    }

    pub fn slice_index(&self) -> usize {
        self.slice_index
    }

    pub fn slice_count(&self) -> usize {
        self.slice_count
    }

    pub fn set_slice_index(&mut self, index: usize) {
        self.slice_index = index.min(self.slice_count.saturating_sub(1));
    }

    pub fn slab_thickness(&self) -> usize {
        self.slab_thickness
    }

    pub fn set_slab(&mut self, thickness: usize, mode: SlabMode) {
        self.slab_thickness = thickness.clamp(1, self.slice_count.max(1));
        self.slab_mode = mode;
    }

    /// Step through slices by one, or by the slab thickness. Stops at the ends.
    pub fn swipe(&mut self, direction: SwipeDirection) {
        let step = self.slab_thickness.max(1);
        let last = self.slice_count.saturating_sub(1);
        self.slice_index = match direction {
            SwipeDirection::Forward => (self.slice_index + step).min(last),
            SwipeDirection::Backward => self.slice_index.saturating_sub(step),
        };
    }

    /// Apply a normalized gesture. Taps need routing through the viewer and
    /// are handed back unchanged.
    pub fn apply(&mut self, op: GestureOp) -> Option<Vec2> {
        match op {
            GestureOp::Zoom(factor) => self.zoom_by(factor),
            GestureOp::Pan(delta) => self.pan_by(delta),
            GestureOp::Swipe(direction) => self.swipe(direction),
            GestureOp::Tap(point) => return Some(point),
        }
        None
    }

    /// Plane the oblique viewport currently shows.
    pub fn oblique_plane(&self, volume: &Volume) -> ObliquePlane {
        ObliquePlane::for_volume(volume, self.rotation, self.slice_index)
    }

    fn plane_center(volume: &Volume, orientation: Orientation) -> Vec2 {
        let (width, height) = volume.slice_dimensions(orientation);
        Vec2::new(
            (width.max(1) - 1) as f32 * 0.5,
            (height.max(1) - 1) as f32 * 0.5,
        )
    }

    /// Screen pixels per in-plane step at zoom 1. The finer axis maps to one
    /// pixel.
    pub fn aspect(&self, volume: &Volume) -> Vec2 {
        let spacing = self.in_plane_spacing(volume);
        let finest = spacing.min_element();
        if finest.is_finite() && finest > 0.0 && spacing.is_finite() {
            spacing / finest
        } else {
            Vec2::ONE
        }
    }

    fn mirror(&self, offset: Vec2) -> Vec2 {
        Vec2::new(
            if self.flip_horizontal { -offset.x } else { offset.x },
            if self.flip_vertical { -offset.y } else { offset.y },
        )
    }

    /// Undo pan, zoom and flips: screen pixel → in-plane `(col, row)`.
    pub fn screen_to_plane(&self, volume: &Volume, screen: Vec2) -> Vec2 {
        let scale = self.aspect(volume) * self.zoom;
        self.mirror((screen - self.screen_size * 0.5 - self.pan) / scale)
            + Self::plane_center(volume, self.orientation)
    }

    pub fn plane_to_screen(&self, volume: &Volume, plane: Vec2) -> Vec2 {
        let scale = self.aspect(volume) * self.zoom;
        self.mirror(plane - Self::plane_center(volume, self.orientation)) * scale
            + self.screen_size * 0.5
            + self.pan
    }

    /// In-plane `(col, row)` plus the current slice → voxel index space.
    pub fn plane_to_volume(&self, volume: &Volume, plane: Vec2) -> Vec3 {
        let depth = self.slice_index as f32;
        match self.orientation {
            Orientation::Axial => Vec3::new(plane.x, plane.y, depth),
            Orientation::Coronal => Vec3::new(plane.x, depth, plane.y),
            Orientation::Sagittal => Vec3::new(depth, plane.x, plane.y),
            Orientation::Oblique => self.oblique_plane(volume).point_at(plane.x, plane.y),
        }
    }

    pub fn volume_to_plane(&self, volume: &Volume, point: Vec3) -> Vec2 {
        match self.orientation {
            Orientation::Axial => Vec2::new(point.x, point.y),
            Orientation::Coronal => Vec2::new(point.x, point.z),
            Orientation::Sagittal => Vec2::new(point.y, point.z),
            Orientation::Oblique => self.oblique_plane(volume).plane_coords(point),
        }
    }

    pub fn screen_to_volume(&self, volume: &Volume, screen: Vec2) -> Vec3 {
        self.plane_to_volume(volume, self.screen_to_plane(volume, screen))
    }

    pub fn volume_to_screen(&self, volume: &Volume, point: Vec3) -> Vec2 {
        self.plane_to_screen(volume, self.volume_to_plane(volume, point))
    }

    /// Move this viewport's slice so that it passes through `point`.
    pub fn follow(&mut self, volume: &Volume, point: Vec3) {
        let index = match self.orientation.normal_axis() {
            Some(axis) => point[axis].round().max(0.0) as usize,
            None => ObliquePlane::index_through(volume, self.rotation, point),
        };
        self.set_slice_index(index);
    }

    /// Millimetres covered by one step along the in-plane `(col, row)` axes.
    pub fn in_plane_spacing(&self, volume: &Volume) -> Vec2 {
        let (sx, sy, sz) = volume.spacing();
        match self.orientation {
            Orientation::Axial => Vec2::new(sx, sy),
            Orientation::Coronal => Vec2::new(sx, sz),
            Orientation::Sagittal => Vec2::new(sy, sz),
            Orientation::Oblique => {
                let plane = self.oblique_plane(volume);
                Vec2::new(
                    volume.to_physical(plane.u).length(),
                    volume.to_physical(plane.v).length(),
                )
            }
        }
    }

    pub fn telemetry(&self) -> ViewportTelemetry {
        ViewportTelemetry {
            viewport: self.id,
            orientation: self.orientation,
            slice_index: self.slice_index,
            slice_count: self.slice_count,
            slab_thickness: self.slab_thickness,
            window_level: self.window_level,
            zoom: self.zoom,
        }
    }
}

/// Read-only snapshot for UI readouts.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ViewportTelemetry {
    pub viewport: ViewportId,
    pub orientation: Orientation,
    pub slice_index: usize,
    pub slice_count: usize,
    pub slab_thickness: usize,
    pub window_level: WindowLevel,
    pub zoom: f32,
}

impl fmt::Display for ViewportTelemetry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Slice {}/{}  W {:.0} L {:.0}  {:.0}%",
            self.slice_index + 1,
            self.slice_count,
            self.window_level.window,
            self.window_level.level,
            self.zoom * 100.0
        )
    }
}
