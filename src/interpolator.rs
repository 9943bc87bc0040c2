use glam::Vec3;
use ndarray::ArrayView3;

pub(crate) struct Interpolator;

impl Interpolator {
    /// Trilinear interpolation at a point in voxel index space `(x, y, z)`.
    ///
    /// Returns `None` when the point lies outside `[0, dim - 1]` on any axis.
    /// The volume is indexed `[z, y, x]`.
    #[inline]
    pub(crate) fn trilinear_interpolate(volume: &ArrayView3<i16>, point: Vec3) -> Option<f32> {
        let (depth, height, width) = volume.dim();
        let (x, y, z) = (point.x, point.y, point.z);
        if !(x >= 0.0 && y >= 0.0 && z >= 0.0) {
            return None;
        }
        if x > (width - 1) as f32 || y > (height - 1) as f32 || z > (depth - 1) as f32 {
            return None;
        }

        let x0 = x.floor() as usize;
        let y0 = y.floor() as usize;
        let z0 = z.floor() as usize;
        let x1 = (x0 + 1).min(width - 1);
        let y1 = (y0 + 1).min(height - 1);
        let z1 = (z0 + 1).min(depth - 1);

        let dx = x - x0 as f32;
        let dy = y - y0 as f32;
        let dz = z - z0 as f32;

        let v = |zi: usize, yi: usize, xi: usize| volume[[zi, yi, xi]] as f32;

        let c00 = v(z0, y0, x0).mul_add(1.0 - dx, v(z0, y0, x1) * dx);
        let c01 = v(z0, y1, x0).mul_add(1.0 - dx, v(z0, y1, x1) * dx);
        let c10 = v(z1, y0, x0).mul_add(1.0 - dx, v(z1, y0, x1) * dx);
        let c11 = v(z1, y1, x0).mul_add(1.0 - dx, v(z1, y1, x1) * dx);

        let c0 = c00.mul_add(1.0 - dy, c01 * dy);
        let c1 = c10.mul_add(1.0 - dy, c11 * dy);

        Some(c0.mul_add(1.0 - dz, c1 * dz))
    }

    /// Central-difference gradient at a point, clamping neighbours to the volume.
    pub(crate) fn gradient(volume: &ArrayView3<i16>, point: Vec3) -> Vec3 {
        let (depth, height, width) = volume.dim();
        let clamp = |p: Vec3| {
            Vec3::new(
                p.x.clamp(0.0, (width - 1) as f32),
                p.y.clamp(0.0, (height - 1) as f32),
                p.z.clamp(0.0, (depth - 1) as f32),
            )
        };
        let sample = |p: Vec3| Self::trilinear_interpolate(volume, clamp(p)).unwrap_or(0.0);

        Vec3::new(
            sample(point + Vec3::X) - sample(point - Vec3::X),
            sample(point + Vec3::Y) - sample(point - Vec3::Y),
            sample(point + Vec3::Z) - sample(point - Vec3::Z),
        ) * 0.5
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    fn ramp() -> Array3<i16> {
        Array3::from_shape_fn((4, 4, 4), |(z, y, x)| (x + 4 * y + 16 * z) as i16)
    }

    #[test]
    fn trilinear_matches_grid_points() {
        let data = ramp();
        let value = Interpolator::trilinear_interpolate(&data.view(), Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(value, Some(57.0));
    }

    #[test]
    fn trilinear_is_linear_on_a_ramp() {
        let data = ramp();
        let value = Interpolator::trilinear_interpolate(&data.view(), Vec3::new(0.5, 0.5, 0.5))
            .unwrap();
        assert!((value - (0.5 + 2.0 + 8.0)).abs() < 1e-4);
    }

    #[test]
    fn trilinear_rejects_points_outside() {
        let data = ramp();
        let view = data.view();
        assert_eq!(Interpolator::trilinear_interpolate(&view, Vec3::new(-0.1, 0.0, 0.0)), None);
        assert_eq!(Interpolator::trilinear_interpolate(&view, Vec3::new(0.0, 3.5, 0.0)), None);
        assert_eq!(Interpolator::trilinear_interpolate(&view, Vec3::new(f32::NAN, 0.0, 0.0)), None);
    }

    #[test]
    fn gradient_of_ramp() {
        let data = ramp();
        let g = Interpolator::gradient(&data.view(), Vec3::new(1.0, 1.0, 1.0));
        assert!((g - Vec3::new(1.0, 4.0, 16.0)).length() < 1e-4);
    }
}
