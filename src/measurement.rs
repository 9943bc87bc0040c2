use crate::enums::{MeasurementKind, Orientation};
use crate::error::MprError;
use crate::slice::Slice;
use crate::viewport::{ViewportId, ViewportState};
use crate::volume::Volume;

use std::f32::consts::PI;

use glam::{Vec2, Vec3};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegionStatistics {
    pub mean: f32,
    pub std_dev: f32,
    pub pixel_count: usize,
}

/// A finalized annotation. Immutable apart from deletion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub id: u64,
    pub kind: MeasurementKind,
    pub viewport: ViewportId,
    pub orientation: Orientation,
    /// Points as tapped, in the viewport's screen space at the time.
    pub screen_points: Vec<Vec2>,
    /// The same points in voxel index space.
    pub volume_points: Vec<Vec3>,
    pub value: f32,
    pub unit: String,
    pub label: String,
    pub statistics: Option<RegionStatistics>,
}

#[derive(Debug, Clone)]
struct Draft {
    kind: MeasurementKind,
    viewport: ViewportId,
    orientation: Orientation,
    screen_points: Vec<Vec2>,
    volume_points: Vec<Vec3>,
    plane_points: Vec<Vec2>,
    /// Millimetres per in-plane step of the viewport the points came from.
    spacing: Vec2,
}

#[derive(Debug, Default)]
pub struct MeasurementEngine {
    active: Option<Draft>,
    finished: Vec<Measurement>,
    next_id: u64,
}

impl MeasurementEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a measurement on `viewport`, discarding any unfinished one.
    pub fn begin(&mut self, kind: MeasurementKind, viewport: &ViewportState) {
        if let Some(draft) = self.active.take() {
            log::debug!("discarding unfinished {:?} measurement", draft.kind);
        }
        self.active = Some(Draft {
            kind,
            viewport: viewport.id,
            orientation: viewport.orientation,
            screen_points: Vec::new(),
            volume_points: Vec::new(),
            plane_points: Vec::new(),
            spacing: Vec2::ONE,
        });
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    pub fn active_kind(&self) -> Option<MeasurementKind> {
        self.active.as_ref().map(|d| d.kind)
    }

    pub fn active_viewport(&self) -> Option<ViewportId> {
        self.active.as_ref().map(|d| d.viewport)
    }

    /// Unfinished points in voxel index space, with their viewport.
    pub fn active_points(&self) -> Option<(ViewportId, &[Vec3])> {
        self.active
            .as_ref()
            .map(|d| (d.viewport, d.volume_points.as_slice()))
    }

    /// Record a tapped point, mapped to volume space through `viewport`'s
    /// current transform. Fixed-arity measurements ignore points beyond
    /// their count. Returns the number of points collected so far.
    pub fn add_point(
        &mut self,
        volume: &Volume,
        viewport: &ViewportState,
        screen: Vec2,
    ) -> Result<usize, MprError> {
        let draft = self.active.as_mut().ok_or(MprError::NoActiveMeasurement)?;
        if draft.viewport != viewport.id {
            return Err(MprError::MeasurementViewportMismatch {
                expected: draft.viewport,
                actual: viewport.id,
            });
        }
        if draft.kind.is_fixed_arity() && draft.screen_points.len() >= draft.kind.required_points() {
            return Ok(draft.screen_points.len());
        }

        let plane = viewport.screen_to_plane(volume, screen);
        draft.spacing = viewport.in_plane_spacing(volume);
        draft.screen_points.push(screen);
        draft.plane_points.push(plane);
        draft.volume_points.push(viewport.plane_to_volume(volume, plane));
        Ok(draft.screen_points.len())
    }

    /// Whether the active measurement has all the points it needs to complete
    /// without an explicit finalize.
    pub fn is_complete(&self) -> bool {
        self.active.as_ref().is_some_and(|d| {
            d.kind.is_fixed_arity() && d.screen_points.len() >= d.kind.required_points()
        })
    }

    /// Compute the value and store the measurement. With too few points the
    /// draft is kept so the user can continue adding points. `slice` is the
    /// slice currently shown in the measurement's viewport and feeds region
    /// statistics.
    pub fn finalize(
        &mut self,
        volume: &Volume,
        slice: Option<&Slice>,
    ) -> Result<Measurement, MprError> {
        let draft = self.active.as_ref().ok_or(MprError::NoActiveMeasurement)?;
        let required = draft.kind.required_points();
        if draft.volume_points.len() < required {
            return Err(MprError::InsufficientPoints {
                kind: draft.kind,
                required,
                actual: draft.volume_points.len(),
            });
        }

        let (value, statistics) = match draft.kind {
            MeasurementKind::Distance => (distance(volume, &draft.volume_points), None),
            MeasurementKind::Angle => (angle(volume, &draft.volume_points), None),
            MeasurementKind::Region => (
                polygon_area(volume, &draft.volume_points),
                slice.and_then(|s| polygon_statistics(s, &draft.plane_points)),
            ),
            MeasurementKind::Circle => {
                let radius = distance(volume, &draft.volume_points);
                (
                    PI * radius * radius,
                    slice.and_then(|s| circle_statistics(s, &draft.plane_points, draft.spacing)),
                )
            }
            MeasurementKind::Ellipse => {
                let axes = semi_axes(&draft.plane_points) * draft.spacing;
                (
                    PI * axes.x * axes.y,
                    slice.and_then(|s| ellipse_statistics(s, &draft.plane_points)),
                )
            }
            MeasurementKind::Probe => {
                let point = volume.clamp_index(draft.volume_points[0]);
                (volume.sample(point).unwrap_or_default(), None)
            }
        };

        let draft = self.active.take().ok_or(MprError::NoActiveMeasurement)?;
        self.next_id += 1;
        let measurement = Measurement {
            id: self.next_id,
            kind: draft.kind,
            viewport: draft.viewport,
            orientation: draft.orientation,
            label: label(draft.kind, value, statistics.as_ref()),
            unit: draft.kind.unit().to_owned(),
            screen_points: draft.screen_points,
            volume_points: draft.volume_points,
            value,
            statistics,
        };
        log::debug!("finalized measurement {}: {}", measurement.id, measurement.label);
        self.finished.push(measurement.clone());
        Ok(measurement)
    }

    pub fn cancel(&mut self) {
        self.active = None;
    }

    pub fn delete(&mut self, id: u64) -> bool {
        let before = self.finished.len();
        self.finished.retain(|m| m.id != id);
        self.finished.len() != before
    }

    pub fn measurements(&self) -> &[Measurement] {
        &self.finished
    }

    pub fn for_viewport(&self, viewport: ViewportId) -> impl Iterator<Item = &Measurement> {
        self.finished.iter().filter(move |m| m.viewport == viewport)
    }
}

fn distance(volume: &Volume, points: &[Vec3]) -> f32 {
    // spacing is applied per axis before combining
    volume.to_physical(points[1] - points[0]).length()
}

/// Angle at the middle point, in degrees.
fn angle(volume: &Volume, points: &[Vec3]) -> f32 {
    let a = volume.to_physical(points[0] - points[1]);
    let b = volume.to_physical(points[2] - points[1]);
    if a.length_squared() == 0.0 || b.length_squared() == 0.0 {
        return 0.0;
    }
    let cos = (a.dot(b) / (a.length() * b.length())).clamp(-1.0, 1.0);
    cos.acos().to_degrees()
}

/// Area of a planar polygon in physical space.
fn polygon_area(volume: &Volume, points: &[Vec3]) -> f32 {
    let physical: Vec<Vec3> = points.iter().map(|&p| volume.to_physical(p)).collect();
    let sum = physical
        .iter()
        .zip(physical.iter().cycle().skip(1))
        .fold(Vec3::ZERO, |acc, (a, b)| acc + a.cross(*b));
    sum.length() * 0.5
}

/// Even-odd rule.
fn contains(polygon: &[Vec2], point: Vec2) -> bool {
    let mut inside = false;
    let mut j = polygon.len() - 1;
    for i in 0..polygon.len() {
        let (a, b) = (polygon[i], polygon[j]);
        if (a.y > point.y) != (b.y > point.y)
            && point.x < (b.x - a.x) * (point.y - a.y) / (b.y - a.y) + a.x
        {
            inside = !inside;
        }
        j = i;
    }
    inside
}

/// Half the bounding box of two opposite corners, in plane steps.
fn semi_axes(corners: &[Vec2]) -> Vec2 {
    (corners[1] - corners[0]).abs() * 0.5
}

fn polygon_statistics(slice: &Slice, polygon: &[Vec2]) -> Option<RegionStatistics> {
    let (min, max) = polygon.iter().fold(
        (Vec2::splat(f32::MAX), Vec2::splat(f32::MIN)),
        |(lo, hi), &p| (lo.min(p), hi.max(p)),
    );
    region_statistics(slice, min, max, |p| contains(polygon, p))
}

/// Samples within the physical radius of `points[0]`. `spacing` converts
/// plane steps to millimetres so the circle stays round on anisotropic planes.
fn circle_statistics(slice: &Slice, points: &[Vec2], spacing: Vec2) -> Option<RegionStatistics> {
    let center = points[0];
    let radius = ((points[1] - center) * spacing).length();
    if radius <= 0.0 || spacing.min_element() <= 0.0 {
        return None;
    }
    let reach = Vec2::splat(radius) / spacing;
    region_statistics(slice, center - reach, center + reach, |p| {
        ((p - center) * spacing).length() <= radius
    })
}

fn ellipse_statistics(slice: &Slice, corners: &[Vec2]) -> Option<RegionStatistics> {
    let axes = semi_axes(corners);
    if axes.min_element() <= 0.0 {
        return None;
    }
    let center = (corners[0] + corners[1]) * 0.5;
    region_statistics(slice, center - axes, center + axes, |p| {
        ((p - center) / axes).length_squared() <= 1.0
    })
}

/// Mean and standard deviation of the slice samples inside `inside`,
/// scanning the `min..=max` bounding box.
fn region_statistics(
    slice: &Slice,
    min: Vec2,
    max: Vec2,
    inside: impl Fn(Vec2) -> bool,
) -> Option<RegionStatistics> {
    let clamp_col = |v: f32| v.clamp(0.0, slice.width.saturating_sub(1) as f32) as usize;
    let clamp_row = |v: f32| v.clamp(0.0, slice.height.saturating_sub(1) as f32) as usize;

    let mut values = Vec::new();
    for row in clamp_row(min.y.floor())..=clamp_row(max.y.ceil()) {
        for col in clamp_col(min.x.floor())..=clamp_col(max.x.ceil()) {
            if inside(Vec2::new(col as f32, row as f32)) {
                values.extend(slice.value(col, row));
            }
        }
    }
    if values.is_empty() {
        return None;
    }

    let n = values.len() as f64;
    let mean = values.iter().map(|&v| v as f64).sum::<f64>() / n;
    let variance = values
        .iter()
        .map(|&v| (v as f64 - mean).powi(2))
        .sum::<f64>()
        / n;
    Some(RegionStatistics {
        mean: mean as f32,
        std_dev: variance.sqrt() as f32,
        pixel_count: values.len(),
    })
}

fn label(kind: MeasurementKind, value: f32, statistics: Option<&RegionStatistics>) -> String {
    match kind {
        MeasurementKind::Distance => format!("{value:.2} mm"),
        MeasurementKind::Angle => format!("{value:.1}°"),
        MeasurementKind::Region | MeasurementKind::Circle | MeasurementKind::Ellipse => {
            match statistics {
                Some(s) => format!("{value:.2} mm² (mean {:.1}, sd {:.1})", s.mean, s.std_dev),
                None => format!("{value:.2} mm²"),
            }
        }
        MeasurementKind::Probe => format!("{value:.1}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::slice::SliceExtractor;

    fn volume(spacing: (f32, f32, f32)) -> Volume {
        let buffer = (0..10 * 10 * 10).map(|i| (i % 10) as i16).collect();
        Volume::from_raw((10, 10, 10), spacing, buffer).unwrap()
    }

    /// Zoom 1 and a 9 px screen over a 10 voxel slice: with isotropic
    /// in-plane spacing, screen and plane coordinates coincide.
    fn viewport(volume: &Volume, orientation: Orientation) -> ViewportState {
        let mut vp = ViewportState::new(ViewportId(7), orientation, volume, &EngineConfig::default());
        vp.screen_size = Vec2::new(9.0, 9.0);
        vp
    }

    #[test]
    fn distance_along_z_uses_anisotropic_spacing() {
        let volume = volume((1.0, 1.0, 2.0));
        let vp = viewport(&volume, Orientation::Coronal);
        let mut engine = MeasurementEngine::new();
        engine.begin(MeasurementKind::Distance, &vp);
        // rows are drawn two pixels tall
        engine.add_point(&volume, &vp, Vec2::new(4.0, 0.5)).unwrap();
        engine.add_point(&volume, &vp, Vec2::new(4.0, 10.5)).unwrap();
        assert!(engine.is_complete());
        let m = engine.finalize(&volume, None).unwrap();
        assert!((m.value - 10.0).abs() < 1e-4);
        assert_eq!(m.label, "10.00 mm");
        assert_eq!(m.volume_points[0].z, 2.5);
    }

    #[test]
    fn insufficient_points_keeps_draft() {
        let volume = volume((1.0, 1.0, 1.0));
        let vp = viewport(&volume, Orientation::Axial);
        let mut engine = MeasurementEngine::new();
        engine.begin(MeasurementKind::Angle, &vp);
        engine.add_point(&volume, &vp, Vec2::new(1.0, 1.0)).unwrap();
        let err = engine.finalize(&volume, None).unwrap_err();
        assert!(matches!(
            err,
            MprError::InsufficientPoints {
                kind: MeasurementKind::Angle,
                required: 3,
                actual: 1
            }
        ));
        assert!(engine.is_active());
        assert_eq!(engine.add_point(&volume, &vp, Vec2::new(2.0, 2.0)).unwrap(), 2);
    }

    #[test]
    fn right_angle() {
        let volume = volume((1.0, 1.0, 1.0));
        let vp = viewport(&volume, Orientation::Axial);
        let mut engine = MeasurementEngine::new();
        engine.begin(MeasurementKind::Angle, &vp);
        for p in [Vec2::new(5.0, 1.0), Vec2::new(1.0, 1.0), Vec2::new(1.0, 7.0)] {
            engine.add_point(&volume, &vp, p).unwrap();
        }
        let m = engine.finalize(&volume, None).unwrap();
        assert!((m.value - 90.0).abs() < 1e-3);
    }

    #[test]
    fn rectangle_area_and_statistics() {
        let volume = volume((1.0, 1.0, 1.0));
        let vp = viewport(&volume, Orientation::Axial);
        let slice = SliceExtractor::default()
            .extract(&volume, Orientation::Axial, vp.slice_index(), 1)
            .unwrap();
        let mut engine = MeasurementEngine::new();
        engine.begin(MeasurementKind::Region, &vp);
        for p in [
            Vec2::new(1.0, 1.0),
            Vec2::new(4.0, 1.0),
            Vec2::new(4.0, 5.0),
            Vec2::new(1.0, 5.0),
        ] {
            engine.add_point(&volume, &vp, p).unwrap();
        }
        assert!(!engine.is_complete());
        let m = engine.finalize(&volume, Some(&slice)).unwrap();
        assert!((m.value - 12.0).abs() < 1e-4);
        let stats = m.statistics.unwrap();
        assert!(stats.pixel_count > 0);
        assert!(stats.std_dev > 0.0);
        assert!(m.label.starts_with("12.00 mm²"));
    }

    #[test]
    fn region_area_scales_with_in_plane_spacing() {
        let volume = volume((0.5, 2.0, 3.0));
        let vp = viewport(&volume, Orientation::Axial);
        let mut engine = MeasurementEngine::new();
        engine.begin(MeasurementKind::Region, &vp);
        // rows are drawn four pixels tall
        for p in [Vec2::new(0.0, 0.0), Vec2::new(2.0, 0.0), Vec2::new(0.0, 8.0)] {
            engine.add_point(&volume, &vp, p).unwrap();
        }
        let m = engine.finalize(&volume, None).unwrap();
        // triangle of 2 voxel² at 0.5 × 2.0 mm per voxel
        assert!((m.value - 2.0).abs() < 1e-4);
    }

    #[test]
    fn circle_area_and_statistics() {
        let volume = volume((0.5, 0.5, 1.0));
        let vp = viewport(&volume, Orientation::Axial);
        let slice = SliceExtractor::default()
            .extract(&volume, Orientation::Axial, vp.slice_index(), 1)
            .unwrap();
        let mut engine = MeasurementEngine::new();
        engine.begin(MeasurementKind::Circle, &vp);
        engine.add_point(&volume, &vp, Vec2::new(4.0, 4.0)).unwrap();
        engine.add_point(&volume, &vp, Vec2::new(8.0, 4.0)).unwrap();
        assert!(engine.is_complete());
        let m = engine.finalize(&volume, Some(&slice)).unwrap();
        // 4 voxels at 0.5 mm: r = 2 mm
        assert!((m.value - PI * 4.0).abs() < 1e-4);
        assert_eq!(m.unit, "mm²");
        let stats = m.statistics.unwrap();
        // lattice points within 4 steps of the centre
        assert_eq!(stats.pixel_count, 49);
        assert!((stats.mean - 4.0).abs() < 1e-4);
    }

    #[test]
    fn circle_stays_round_on_anisotropic_planes() {
        let volume = volume((1.0, 1.0, 2.0));
        let vp = viewport(&volume, Orientation::Coronal);
        let slice = SliceExtractor::default()
            .extract(&volume, Orientation::Coronal, vp.slice_index(), 1)
            .unwrap();
        let mut engine = MeasurementEngine::new();
        engine.begin(MeasurementKind::Circle, &vp);
        let centre = vp.volume_to_screen(&volume, Vec3::new(4.0, 5.0, 4.0));
        engine.add_point(&volume, &vp, centre).unwrap();
        engine.add_point(&volume, &vp, centre + Vec2::new(2.0, 0.0)).unwrap();
        let m = engine.finalize(&volume, Some(&slice)).unwrap();
        assert!((m.value - PI * 4.0).abs() < 1e-4);
        // rows z = 3..=5 at x = 4, plus x = 2..=6 at z = 4
        assert_eq!(m.statistics.unwrap().pixel_count, 7);
    }

    #[test]
    fn ellipse_from_bounding_corners() {
        let volume = volume((1.0, 1.0, 1.0));
        let vp = viewport(&volume, Orientation::Axial);
        let slice = SliceExtractor::default()
            .extract(&volume, Orientation::Axial, vp.slice_index(), 1)
            .unwrap();
        let mut engine = MeasurementEngine::new();
        engine.begin(MeasurementKind::Ellipse, &vp);
        engine.add_point(&volume, &vp, Vec2::new(7.0, 5.0)).unwrap();
        engine.add_point(&volume, &vp, Vec2::new(1.0, 3.0)).unwrap();
        let m = engine.finalize(&volume, Some(&slice)).unwrap();
        assert!((m.value - PI * 3.0).abs() < 1e-4);
        let stats = m.statistics.unwrap();
        assert!((stats.mean - 4.0).abs() < 1e-4);
        assert!(m.label.starts_with("9.42 mm²"));
    }

    #[test]
    fn degenerate_ellipse_has_no_statistics() {
        let volume = volume((1.0, 1.0, 1.0));
        let vp = viewport(&volume, Orientation::Axial);
        let slice = SliceExtractor::default()
            .extract(&volume, Orientation::Axial, vp.slice_index(), 1)
            .unwrap();
        let mut engine = MeasurementEngine::new();
        engine.begin(MeasurementKind::Ellipse, &vp);
        engine.add_point(&volume, &vp, Vec2::new(2.0, 3.0)).unwrap();
        engine.add_point(&volume, &vp, Vec2::new(6.0, 3.0)).unwrap();
        let m = engine.finalize(&volume, Some(&slice)).unwrap();
        assert_eq!(m.value, 0.0);
        assert!(m.statistics.is_none());
    }

    #[test]
    fn oblique_region_statistics_read_the_oblique_slice() {
        let volume = volume((1.0, 1.0, 1.0));
        let mut vp = viewport(&volume, Orientation::Oblique);
        vp.rotation = Vec3::new(0.0, 0.0, std::f32::consts::FRAC_PI_2);
        let plane = vp.oblique_plane(&volume);
        vp.screen_size = Vec2::splat(plane.width as f32 - 1.0);
        let slice = SliceExtractor::default().extract_oblique(&volume, &plane, 1);

        let depth = plane.center.z;
        let mut engine = MeasurementEngine::new();
        engine.begin(MeasurementKind::Region, &vp);
        for (x, y) in [(3.0, 3.0), (6.0, 3.0), (6.0, 6.0), (3.0, 6.0)] {
            let point = Vec3::new(x, y, depth);
            engine
                .add_point(&volume, &vp, vp.volume_to_screen(&volume, point))
                .unwrap();
        }
        let m = engine.finalize(&volume, Some(&slice)).unwrap();
        assert!((m.value - 9.0).abs() < 1e-3);
        let stats = m.statistics.unwrap();
        assert!(stats.pixel_count > 0);
        // voxel value is x, and the square spans x = 3..=6
        assert!(stats.mean > 2.5 && stats.mean < 6.5, "mean {}", stats.mean);
        assert!(stats.std_dev > 0.0);
    }

    #[test]
    fn probe_reads_intensity() {
        let volume = volume((1.0, 1.0, 1.0));
        let vp = viewport(&volume, Orientation::Axial);
        let mut engine = MeasurementEngine::new();
        engine.begin(MeasurementKind::Probe, &vp);
        engine.add_point(&volume, &vp, Vec2::new(7.0, 3.0)).unwrap();
        let m = engine.finalize(&volume, None).unwrap();
        assert_eq!(m.value, 7.0);
    }

    #[test]
    fn delete_and_filter_by_viewport() {
        let volume = volume((1.0, 1.0, 1.0));
        let vp = viewport(&volume, Orientation::Axial);
        let mut engine = MeasurementEngine::new();
        engine.begin(MeasurementKind::Distance, &vp);
        engine.add_point(&volume, &vp, Vec2::ZERO).unwrap();
        engine.add_point(&volume, &vp, Vec2::ONE).unwrap();
        engine.add_point(&volume, &vp, Vec2::splat(5.0)).unwrap();
        let m = engine.finalize(&volume, None).unwrap();
        assert_eq!(m.screen_points.len(), 2);
        assert_eq!(engine.for_viewport(ViewportId(7)).count(), 1);
        assert_eq!(engine.for_viewport(ViewportId(1)).count(), 0);
        assert!(engine.delete(m.id));
        assert!(!engine.delete(m.id));
        assert!(engine.measurements().is_empty());
    }

    #[test]
    fn points_from_another_viewport_are_rejected() {
        let volume = volume((1.0, 1.0, 1.0));
        let vp = viewport(&volume, Orientation::Axial);
        let mut other = viewport(&volume, Orientation::Sagittal);
        other.id = ViewportId(8);
        let mut engine = MeasurementEngine::new();
        assert!(matches!(
            engine.add_point(&volume, &vp, Vec2::ZERO),
            Err(MprError::NoActiveMeasurement)
        ));
        engine.begin(MeasurementKind::Distance, &vp);
        assert!(engine.add_point(&volume, &other, Vec2::ZERO).is_err());
        engine.cancel();
        assert!(!engine.is_active());
    }
}
