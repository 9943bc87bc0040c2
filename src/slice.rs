use crate::enums::{Orientation, SlabMode};
use crate::error::MprError;
use crate::volume::Volume;

use glam::{EulerRot, Mat3, Vec2, Vec3};
use ndarray::{Array2, ArrayView3, Axis, Zip, s};

/// A 2D scalar plane derived from a volume. `data` is shaped `(height, width)`.
#[derive(Debug, Clone, PartialEq)]
pub struct Slice {
    pub width: usize,
    pub height: usize,
    pub data: Array2<f32>,
    pub orientation: Orientation,
    pub index: usize,
}

impl Slice {
    fn from_data(data: Array2<f32>, orientation: Orientation, index: usize) -> Self {
        let (height, width) = data.dim();
        Self {
            width,
            height,
            data,
            orientation,
            index,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn value(&self, col: usize, row: usize) -> Option<f32> {
        self.data.get([row, col]).copied()
    }
}

/// An arbitrarily oriented sampling plane in voxel index space.
///
/// `u` and `v` are the unit step vectors along columns and rows; the plane
/// centre sits in the middle of the `width × height` sample grid.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ObliquePlane {
    pub center: Vec3,
    pub u: Vec3,
    pub v: Vec3,
    pub width: usize,
    pub height: usize,
}

impl ObliquePlane {
    pub fn new(center: Vec3, u: Vec3, v: Vec3, width: usize, height: usize) -> Self {
        Self {
            center,
            u: u.normalize_or_zero(),
            v: v.normalize_or_zero(),
            width,
            height,
        }
    }

    /// Plane through `point` perpendicular to `normal`, with an arbitrary
    /// in-plane basis.
    pub fn from_point_normal(point: Vec3, normal: Vec3, width: usize, height: usize) -> Self {
        let normal = normal.try_normalize().unwrap_or(Vec3::Z);
        let u = normal.any_orthonormal_vector();
        Self::new(point, u, normal.cross(u), width, height)
    }

    /// Rotation matrix for the oblique viewport's Euler angles (radians).
    pub fn rotation_matrix(rotation: Vec3) -> Mat3 {
        Mat3::from_euler(EulerRot::XYZ, rotation.x, rotation.y, rotation.z)
    }

    /// The oblique viewport plane: the axial basis rotated by `rotation`,
    /// offset along its normal by `index` across the volume diagonal.
    pub fn for_volume(volume: &Volume, rotation: Vec3, index: usize) -> Self {
        let basis = Self::rotation_matrix(rotation);
        let size = volume.diagonal();
        let normal = basis * Vec3::Z;
        let offset = index as f32 - (size - 1) as f32 * 0.5;
        Self::new(
            volume.center() + normal * offset,
            basis * Vec3::X,
            basis * Vec3::Y,
            size,
            size,
        )
    }

    /// Index along the normal of the oblique plane that passes closest to `point`.
    pub fn index_through(volume: &Volume, rotation: Vec3, point: Vec3) -> usize {
        let normal = Self::rotation_matrix(rotation) * Vec3::Z;
        let size = volume.diagonal();
        let offset = (point - volume.center()).dot(normal) + (size - 1) as f32 * 0.5;
        offset.round().clamp(0.0, (size - 1) as f32) as usize
    }

    pub fn normal(&self) -> Vec3 {
        self.u.cross(self.v).normalize_or_zero()
    }

    fn half_extent(&self) -> Vec2 {
        Vec2::new(
            (self.width.max(1) - 1) as f32 * 0.5,
            (self.height.max(1) - 1) as f32 * 0.5,
        )
    }

    /// Volume position of the sample at `(col, row)`.
    pub fn point_at(&self, col: f32, row: f32) -> Vec3 {
        let half = self.half_extent();
        self.center + self.u * (col - half.x) + self.v * (row - half.y)
    }

    /// In-plane `(col, row)` of the orthogonal projection of `point`.
    pub fn plane_coords(&self, point: Vec3) -> Vec2 {
        let d = point - self.center;
        self.half_extent() + Vec2::new(d.dot(self.u), d.dot(self.v))
    }

    pub fn shifted(&self, distance: f32) -> Self {
        Self {
            center: self.center + self.normal() * distance,
            ..*self
        }
    }
}

/// Produces 2D slices from a volume. Pure; holds only the extraction policy.
#[derive(Debug, Clone, Copy, Default)]
pub struct SliceExtractor {
    pub slab_mode: SlabMode,
    /// Value used for oblique samples outside the volume. Defaults to the
    /// volume minimum.
    pub background: Option<f32>,
}

impl SliceExtractor {
    pub fn new(slab_mode: SlabMode, background: Option<f32>) -> Self {
        Self {
            slab_mode,
            background,
        }
    }

    pub fn background_for(&self, volume: &Volume) -> f32 {
        self.background
            .unwrap_or(volume.intensity_range().0 as f32)
    }

    /// Extract the plane at `index` along the orientation's normal. Oblique
    /// requests use the unrotated oblique plane; see [`Self::extract_oblique`]
    /// for arbitrary planes.
    pub fn extract(
        &self,
        volume: &Volume,
        orientation: Orientation,
        index: usize,
        slab_thickness: usize,
    ) -> Result<Slice, MprError> {
        self.check_index(volume, orientation, index)?;
        match orientation {
            Orientation::Oblique => {
                let plane = ObliquePlane::for_volume(volume, Vec3::ZERO, index);
                let mut slice = self.extract_oblique(volume, &plane, slab_thickness);
                slice.index = index;
                Ok(slice)
            }
            _ => Ok(self.extract_orthogonal(volume, orientation, index, slab_thickness)),
        }
    }

    fn check_index(
        &self,
        volume: &Volume,
        orientation: Orientation,
        index: usize,
    ) -> Result<(), MprError> {
        let max = volume.slice_count(orientation);
        if index >= max {
            return Err(MprError::SliceIndexOutOfRange {
                orientation,
                index,
                max,
            });
        }
        Ok(())
    }

    /// Slab bounds around `index`, clipped to `0..count`.
    pub fn slab_range(index: usize, slab_thickness: usize, count: usize) -> (usize, usize) {
        let thickness = slab_thickness.max(1);
        let lo = index.saturating_sub((thickness - 1) / 2);
        let hi = (index + thickness / 2).min(count.saturating_sub(1));
        (lo, hi)
    }

    fn extract_orthogonal(
        &self,
        volume: &Volume,
        orientation: Orientation,
        index: usize,
        slab_thickness: usize,
    ) -> Slice {
        // Array axes are (z, y, x)
        let axis = match orientation {
            Orientation::Axial => 0,
            Orientation::Coronal => 1,
            _ => 2,
        };
        let data = volume.data();

        if slab_thickness <= 1 {
            let plane = match axis {
                0 => data.slice(s![index, .., ..]),
                1 => data.slice(s![.., index, ..]),
                _ => data.slice(s![.., .., index]),
            };
            return Slice::from_data(plane.mapv(f32::from), orientation, index);
        }

        let (lo, hi) = Self::slab_range(index, slab_thickness, data.len_of(Axis(axis)));
        let slab = data.slice_axis(Axis(axis), ndarray::Slice::from(lo..hi + 1));
        let aggregated = Self::aggregate(slab, Axis(axis), self.slab_mode, hi - lo + 1);
        Slice::from_data(aggregated, orientation, index)
    }

    fn aggregate(slab: ArrayView3<i16>, axis: Axis, mode: SlabMode, count: usize) -> Array2<f32> {
        match mode {
            SlabMode::Maximum => slab
                .fold_axis(axis, i16::MIN, |acc, &v| (*acc).max(v))
                .mapv(f32::from),
            SlabMode::Minimum => slab
                .fold_axis(axis, i16::MAX, |acc, &v| (*acc).min(v))
                .mapv(f32::from),
            SlabMode::Mean => {
                // i64 accumulation keeps wide slabs of extreme values exact
                let count = count.max(1) as f64;
                slab.fold_axis(axis, 0i64, |acc, &v| acc + i64::from(v))
                    .mapv(|sum| (sum as f64 / count) as f32)
            }
        }
    }

    /// Sample an arbitrary plane with trilinear interpolation. With a slab
    /// thicker than one, parallel planes spaced one voxel apart along the
    /// normal are combined with the configured slab mode.
    pub fn extract_oblique(
        &self,
        volume: &Volume,
        plane: &ObliquePlane,
        slab_thickness: usize,
    ) -> Slice {
        let background = self.background_for(volume);
        let thickness = slab_thickness.max(1);
        let first = -(((thickness - 1) / 2) as f32);
        let offsets: Vec<f32> = (0..thickness).map(|k| first + k as f32).collect();
        let mode = self.slab_mode;

        let mut data = Array2::<f32>::zeros((plane.height, plane.width));
        Zip::indexed(&mut data).par_for_each(|(row, col), out| {
            let base = plane.point_at(col as f32, row as f32);
            let normal = plane.normal();
            let samples = offsets
                .iter()
                .map(|&d| volume.sample(base + normal * d).unwrap_or(background));
            *out = match mode {
                _ if thickness == 1 => volume.sample(base).unwrap_or(background),
                SlabMode::Maximum => samples.fold(f32::MIN, f32::max),
                SlabMode::Minimum => samples.fold(f32::MAX, f32::min),
                SlabMode::Mean => samples.sum::<f32>() / thickness as f32,
            };
        });

        Slice::from_data(data, Orientation::Oblique, 0)
    }
}
