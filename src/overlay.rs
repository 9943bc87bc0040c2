//! Vector overlays (crosshair, measurements) rasterized onto a frame.
//! Volume-space points are re-projected through the viewport's current
//! transform, so overlays follow pan, zoom and slice changes.

use crate::config::OverlayStyle;
use crate::enums::MeasurementKind;
use crate::measurement::Measurement;
use crate::viewport::ViewportState;
use crate::volume::Volume;

use glam::{Vec2, Vec3};
use image::{Rgba, RgbaImage};

const MARKER_RADIUS: i64 = 2;
const CROSSHAIR_GAP: f32 = 6.0;
const CONIC_SEGMENTS: usize = 48;

fn put(image: &mut RgbaImage, x: i64, y: i64, color: Rgba<u8>) {
    if x >= 0 && y >= 0 && (x as u32) < image.width() && (y as u32) < image.height() {
        image.put_pixel(x as u32, y as u32, color);
    }
}

/// DDA line; pixels outside the image are skipped.
pub fn draw_line(image: &mut RgbaImage, a: Vec2, b: Vec2, color: Rgba<u8>) {
    if !a.is_finite() || !b.is_finite() {
        return;
    }
    let delta = b - a;
    // cap the step count so far off-screen endpoints stay cheap
    let limit = (image.width() + image.height()) as f32 * 4.0;
    let steps = delta.abs().max_element().ceil().clamp(1.0, limit) as usize;
    for i in 0..=steps {
        let p = a + delta * (i as f32 / steps as f32);
        put(image, p.x.round() as i64, p.y.round() as i64, color);
    }
}

pub fn draw_marker(image: &mut RgbaImage, p: Vec2, color: Rgba<u8>) {
    if !p.is_finite() {
        return;
    }
    let (cx, cy) = (p.x.round() as i64, p.y.round() as i64);
    for d in -MARKER_RADIUS..=MARKER_RADIUS {
        put(image, cx + d, cy, color);
        put(image, cx, cy + d, color);
    }
}

/// Full-width and full-height lines through `p`, leaving a gap around it.
pub fn draw_crosshair(image: &mut RgbaImage, p: Vec2, color: Rgba<u8>) {
    let (w, h) = (image.width() as f32, image.height() as f32);
    draw_line(image, Vec2::new(0.0, p.y), Vec2::new(p.x - CROSSHAIR_GAP, p.y), color);
    draw_line(image, Vec2::new(p.x + CROSSHAIR_GAP, p.y), Vec2::new(w - 1.0, p.y), color);
    draw_line(image, Vec2::new(p.x, 0.0), Vec2::new(p.x, p.y - CROSSHAIR_GAP), color);
    draw_line(image, Vec2::new(p.x, p.y + CROSSHAIR_GAP), Vec2::new(p.x, h - 1.0), color);
}

/// Axis-aligned ellipse outline around `center` with semi-axes `radii`.
pub fn draw_ellipse(image: &mut RgbaImage, center: Vec2, radii: Vec2, color: Rgba<u8>) {
    let outline: Vec<Vec2> = (0..=CONIC_SEGMENTS)
        .map(|i| {
            let t = i as f32 / CONIC_SEGMENTS as f32 * std::f32::consts::TAU;
            center + radii * Vec2::new(t.cos(), t.sin())
        })
        .collect();
    for pair in outline.windows(2) {
        draw_line(image, pair[0], pair[1], color);
    }
}

/// Outline of a measurement. Lines join the points, closed for regions;
/// circles and ellipses are traced in screen space, where the viewport
/// already keeps physical proportions.
pub fn draw_shape(
    image: &mut RgbaImage,
    volume: &Volume,
    viewport: &ViewportState,
    kind: MeasurementKind,
    points: &[Vec3],
    color: Rgba<u8>,
) {
    let screen: Vec<Vec2> = points
        .iter()
        .map(|&p| viewport.volume_to_screen(volume, p))
        .collect();
    for &p in &screen {
        draw_marker(image, p, color);
    }
    match (kind, screen.as_slice()) {
        (MeasurementKind::Circle, &[center, rim, ..]) => {
            draw_line(image, center, rim, color);
            draw_ellipse(image, center, Vec2::splat(center.distance(rim)), color);
        }
        (MeasurementKind::Ellipse, &[a, b, ..]) => {
            draw_ellipse(image, (a + b) * 0.5, (b - a).abs() * 0.5, color);
        }
        (MeasurementKind::Circle | MeasurementKind::Ellipse, _) => {}
        _ => {
            for pair in screen.windows(2) {
                draw_line(image, pair[0], pair[1], color);
            }
            if kind == MeasurementKind::Region && screen.len() >= 3 {
                draw_line(image, screen[screen.len() - 1], screen[0], color);
            }
        }
    }
}

pub fn draw_overlays<'a>(
    image: &mut RgbaImage,
    volume: &Volume,
    viewport: &ViewportState,
    cursor: Option<Vec3>,
    measurements: impl IntoIterator<Item = &'a Measurement>,
    draft: Option<(MeasurementKind, &[Vec3])>,
    style: &OverlayStyle,
) {
    let measurement_color = Rgba(style.measurement_color);
    for m in measurements {
        draw_shape(image, volume, viewport, m.kind, &m.volume_points, measurement_color);
    }
    if let Some((kind, points)) = draft {
        draw_shape(image, volume, viewport, kind, points, measurement_color);
    }
    if let Some(cursor) = cursor.filter(|_| style.draw_crosshair) {
        let p = viewport.volume_to_screen(volume, cursor);
        draw_crosshair(image, p, Rgba(style.crosshair_color));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RED: Rgba<u8> = Rgba([255, 0, 0, 255]);

    #[test]
    fn line_covers_endpoints() {
        let mut image = RgbaImage::new(10, 10);
        draw_line(&mut image, Vec2::new(1.0, 1.0), Vec2::new(8.0, 5.0), RED);
        assert_eq!(*image.get_pixel(1, 1), RED);
        assert_eq!(*image.get_pixel(8, 5), RED);
        assert_eq!(*image.get_pixel(0, 9), Rgba([0, 0, 0, 0]));
    }

    #[test]
    fn offscreen_geometry_is_clipped() {
        let mut image = RgbaImage::new(4, 4);
        draw_line(&mut image, Vec2::new(-1e9, 2.0), Vec2::new(1e9, 2.0), RED);
        draw_marker(&mut image, Vec2::new(-50.0, -50.0), RED);
        draw_line(&mut image, Vec2::new(f32::NAN, 0.0), Vec2::ZERO, RED);
    }

    #[test]
    fn ellipse_outline_touches_its_extremes() {
        let mut image = RgbaImage::new(40, 40);
        draw_ellipse(&mut image, Vec2::new(20.0, 20.0), Vec2::new(10.0, 5.0), RED);
        assert_eq!(*image.get_pixel(30, 20), RED);
        assert_eq!(*image.get_pixel(10, 20), RED);
        assert_eq!(*image.get_pixel(20, 25), RED);
        assert_eq!(*image.get_pixel(20, 15), RED);
        assert_eq!(*image.get_pixel(20, 20), Rgba([0, 0, 0, 0]));
    }

    #[test]
    fn crosshair_leaves_gap_at_cursor() {
        let mut image = RgbaImage::new(40, 40);
        draw_crosshair(&mut image, Vec2::new(20.0, 20.0), RED);
        assert_eq!(*image.get_pixel(0, 20), RED);
        assert_eq!(*image.get_pixel(20, 39), RED);
        assert_eq!(*image.get_pixel(20, 20), Rgba([0, 0, 0, 0]));
    }
}
