use crate::enums::Orientation;
use crate::error::VolumeError;
use crate::interpolator::Interpolator;

use glam::{Mat3, Vec3};
use ndarray::{Array3, ArrayView3};
use rayon::prelude::*;

/// An immutable scalar volume with its physical metadata.
///
/// Voxels are stored `[z, y, x]` (depth, height, width). Positions handed to
/// and returned from the engine are in voxel index space ordered `(x, y, z)`.
#[derive(Debug, Clone)]
pub struct Volume {
    data: Array3<i16>,
    spacing: (f32, f32, f32),
    origin: Vec3,
    direction: Mat3,
    intensity_range: (i16, i16),
}

impl Volume {
    /// Wrap an already shaped array. `spacing` is `(sx, sy, sz)` in millimetres.
    pub fn new(data: Array3<i16>, spacing: (f32, f32, f32)) -> Result<Self, VolumeError> {
        let (depth, height, width) = data.dim();
        if depth == 0 || height == 0 || width == 0 {
            return Err(VolumeError::EmptyDimension((width, height, depth)));
        }
        let valid = |s: f32| s.is_finite() && s > 0.0;
        if !(valid(spacing.0) && valid(spacing.1) && valid(spacing.2)) {
            return Err(VolumeError::InvalidSpacing(spacing));
        }

        let data = if data.is_standard_layout() {
            data
        } else {
            data.as_standard_layout().to_owned()
        };
        let intensity_range = Self::compute_range(&data);

        Ok(Self {
            data,
            spacing,
            origin: Vec3::ZERO,
            direction: Mat3::IDENTITY,
            intensity_range,
        })
    }

    /// Build a volume from a flat row-major buffer where x varies fastest,
    /// then y, then z.
    pub fn from_raw(
        dim: (usize, usize, usize),
        spacing: (f32, f32, f32),
        buffer: Vec<i16>,
    ) -> Result<Self, VolumeError> {
        let (nx, ny, nz) = dim;
        let expected = nx
            .checked_mul(ny)
            .and_then(|n| n.checked_mul(nz))
            .unwrap_or(usize::MAX);
        if buffer.len() != expected {
            return Err(VolumeError::BufferLengthMismatch {
                dim,
                expected,
                actual: buffer.len(),
            });
        }
        if expected == 0 {
            return Err(VolumeError::EmptyDimension(dim));
        }
        let data = Array3::from_shape_vec((nz, ny, nx), buffer).map_err(|_| {
            VolumeError::BufferLengthMismatch {
                dim,
                expected,
                actual: 0,
            }
        })?;
        Self::new(data, spacing)
    }

    /// Attach the index → patient space affine.
    pub fn with_orientation(mut self, origin: Vec3, direction: Mat3) -> Self {
        self.origin = origin;
        self.direction = direction;
        self
    }

    fn compute_range(data: &Array3<i16>) -> (i16, i16) {
        data.as_slice()
            .map(|values| {
                values
                    .par_iter()
                    .fold(
                        || (i16::MAX, i16::MIN),
                        |(lo, hi), &v| (lo.min(v), hi.max(v)),
                    )
                    .reduce(
                        || (i16::MAX, i16::MIN),
                        |a, b| (a.0.min(b.0), a.1.max(b.1)),
                    )
            })
            .unwrap_or((0, 0))
    }

    /// Get the dimensions of the volume (depth, height, width)
    pub fn dim(&self) -> (usize, usize, usize) {
        self.data.dim()
    }

    /// Voxel counts ordered `(nx, ny, nz)`.
    pub fn extent(&self) -> (usize, usize, usize) {
        let (depth, height, width) = self.data.dim();
        (width, height, depth)
    }

    pub fn axis_len(&self, axis: usize) -> usize {
        let (nx, ny, nz) = self.extent();
        match axis {
            0 => nx,
            1 => ny,
            _ => nz,
        }
    }

    /// Get a reference to the underlying data
    pub fn data(&self) -> &Array3<i16> {
        &self.data
    }

    pub fn view(&self) -> ArrayView3<'_, i16> {
        self.data.view()
    }

    pub fn spacing(&self) -> (f32, f32, f32) {
        self.spacing
    }

    pub fn spacing_vec(&self) -> Vec3 {
        Vec3::new(self.spacing.0, self.spacing.1, self.spacing.2)
    }

    pub fn origin(&self) -> Vec3 {
        self.origin
    }

    pub fn direction(&self) -> Mat3 {
        self.direction
    }

    /// Smallest and largest voxel value.
    pub fn intensity_range(&self) -> (i16, i16) {
        self.intensity_range
    }

    pub fn voxel(&self, x: usize, y: usize, z: usize) -> Option<i16> {
        self.data.get([z, y, x]).copied()
    }

    /// Largest valid index per axis as a vector.
    pub fn max_index(&self) -> Vec3 {
        let (nx, ny, nz) = self.extent();
        Vec3::new((nx - 1) as f32, (ny - 1) as f32, (nz - 1) as f32)
    }

    /// Geometric centre of the voxel grid.
    pub fn center(&self) -> Vec3 {
        self.max_index() * 0.5
    }

    pub fn contains(&self, point: Vec3) -> bool {
        let max = self.max_index();
        point.cmpge(Vec3::ZERO).all() && point.cmple(max).all()
    }

    /// Clamp each component into `[0, dim - 1]`. NaN components collapse to 0.
    pub fn clamp_index(&self, point: Vec3) -> Vec3 {
        let max = self.max_index();
        let clamp = |v: f32, hi: f32| if v.is_nan() { 0.0 } else { v.clamp(0.0, hi) };
        Vec3::new(
            clamp(point.x, max.x),
            clamp(point.y, max.y),
            clamp(point.z, max.z),
        )
    }

    /// Scale an index-space position or offset to millimetres along the volume axes.
    pub fn to_physical(&self, index: Vec3) -> Vec3 {
        index * self.spacing_vec()
    }

    /// Map an index-space position to patient space.
    pub fn index_to_world(&self, index: Vec3) -> Vec3 {
        self.origin + self.direction * self.to_physical(index)
    }

    /// Length of the voxel grid diagonal, rounded up. Used as the size and
    /// depth range of oblique planes so that any rotation covers the volume.
    pub fn diagonal(&self) -> usize {
        let (nx, ny, nz) = self.extent();
        let d = ((nx * nx + ny * ny + nz * nz) as f64).sqrt().ceil() as usize;
        d.max(1)
    }

    /// Number of slice positions available along the orientation's normal.
    pub fn slice_count(&self, orientation: Orientation) -> usize {
        match orientation.normal_axis() {
            Some(axis) => self.axis_len(axis),
            None => self.diagonal(),
        }
    }

    /// In-plane size `(width, height)` of a slice in the given orientation.
    pub fn slice_dimensions(&self, orientation: Orientation) -> (usize, usize) {
        let (nx, ny, nz) = self.extent();
        match orientation {
            // Looking down Z-axis: X is width, Y is height
            Orientation::Axial => (nx, ny),
            // Looking down Y-axis: X is width, Z is height
            Orientation::Coronal => (nx, nz),
            // Looking down X-axis: Y is width, Z is height
            Orientation::Sagittal => (ny, nz),
            Orientation::Oblique => {
                let d = self.diagonal();
                (d, d)
            }
        }
    }

    /// Trilinear sample at an index-space point, `None` outside the grid.
    pub fn sample(&self, point: Vec3) -> Option<f32> {
        Interpolator::trilinear_interpolate(&self.data.view(), point)
    }

    /// Intensity gradient at an index-space point, per voxel step.
    pub fn gradient(&self, point: Vec3) -> Vec3 {
        Interpolator::gradient(&self.data.view(), point)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_raw_rejects_mismatched_buffer() {
        let err = Volume::from_raw((4, 4, 4), (1.0, 1.0, 1.0), vec![0; 63]).unwrap_err();
        assert_eq!(
            err,
            VolumeError::BufferLengthMismatch {
                dim: (4, 4, 4),
                expected: 64,
                actual: 63
            }
        );
    }

    #[test]
    fn from_raw_uses_x_fastest_layout() {
        let buffer: Vec<i16> = (0..24).collect();
        let volume = Volume::from_raw((2, 3, 4), (1.0, 1.0, 1.0), buffer).unwrap();
        assert_eq!(volume.extent(), (2, 3, 4));
        assert_eq!(volume.dim(), (4, 3, 2));
        assert_eq!(volume.voxel(1, 0, 0), Some(1));
        assert_eq!(volume.voxel(0, 1, 0), Some(2));
        assert_eq!(volume.voxel(0, 0, 1), Some(6));
        assert_eq!(volume.intensity_range(), (0, 23));
    }

    #[test]
    fn rejects_zero_dimension_and_bad_spacing() {
        assert!(matches!(
            Volume::from_raw((0, 4, 4), (1.0, 1.0, 1.0), vec![]),
            Err(VolumeError::EmptyDimension(_))
        ));
        assert!(matches!(
            Volume::from_raw((1, 1, 1), (1.0, 0.0, 1.0), vec![0]),
            Err(VolumeError::InvalidSpacing(_))
        ));
    }

    #[test]
    fn clamp_and_world_mapping() {
        let volume = Volume::from_raw((4, 4, 4), (0.5, 0.5, 2.0), vec![0; 64])
            .unwrap()
            .with_orientation(Vec3::new(10.0, 0.0, 0.0), Mat3::IDENTITY);
        assert_eq!(
            volume.clamp_index(Vec3::new(-1.0, 2.5, 9.0)),
            Vec3::new(0.0, 2.5, 3.0)
        );
        assert_eq!(
            volume.index_to_world(Vec3::new(2.0, 2.0, 1.0)),
            Vec3::new(11.0, 1.0, 2.0)
        );
        assert_eq!(volume.slice_count(Orientation::Oblique), 7);
        assert_eq!(volume.slice_dimensions(Orientation::Sagittal), (4, 4));
    }
}
