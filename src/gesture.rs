//! Translation of platform pointer/touch events into viewport operations.
//!
//! Platform layers report positions and deltas in normalized device
//! coordinates (NDC): `[-1, 1]` on both axes, `+y` up. The engine works in
//! screen pixels with `+y` down, so everything is converted against the
//! target viewport's drawable size.

use crate::enums::SwipeDirection;

use glam::Vec2;

/// A classified gesture as delivered by the host's input layer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GestureEvent {
    /// Pinch with the scale change since the previous event.
    Pinch { scale: f32 },
    /// Drag delta in NDC units.
    Drag { delta: Vec2 },
    /// Tap/click position in NDC.
    Tap { position: Vec2 },
    /// Swipe displacement in NDC units.
    Swipe { delta: Vec2 },
    /// Mouse wheel notches; positive zooms in.
    Wheel { notches: f32 },
}

/// Abstract operation consumed by [`crate::viewport::ViewportState::apply`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GestureOp {
    Zoom(f32),
    Pan(Vec2),
    Tap(Vec2),
    Swipe(SwipeDirection),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GestureInput {
    /// Swipes shorter than this (in NDC units) are ignored.
    pub min_swipe_distance: f32,
    /// Zoom factor per wheel notch.
    pub wheel_step: f32,
}

impl Default for GestureInput {
    fn default() -> Self {
        Self {
            min_swipe_distance: 0.1,
            wheel_step: 1.1,
        }
    }
}

impl GestureInput {
    pub fn ndc_to_screen(position: Vec2, viewport_size: Vec2) -> Vec2 {
        Vec2::new(
            (position.x + 1.0) * 0.5 * viewport_size.x,
            (1.0 - position.y) * 0.5 * viewport_size.y,
        )
    }

    pub fn screen_to_ndc(screen: Vec2, viewport_size: Vec2) -> Vec2 {
        Vec2::new(
            screen.x / viewport_size.x * 2.0 - 1.0,
            1.0 - screen.y / viewport_size.y * 2.0,
        )
    }

    fn ndc_delta_to_pixels(delta: Vec2, viewport_size: Vec2) -> Vec2 {
        Vec2::new(delta.x * 0.5 * viewport_size.x, -delta.y * 0.5 * viewport_size.y)
    }

    /// Normalize an event for a viewport of `viewport_size` pixels. Returns
    /// `None` for events that carry no usable operation.
    pub fn translate(&self, event: GestureEvent, viewport_size: Vec2) -> Option<GestureOp> {
        match event {
            GestureEvent::Pinch { scale } => {
                (scale.is_finite() && scale > 0.0).then_some(GestureOp::Zoom(scale))
            }
            GestureEvent::Wheel { notches } => notches
                .is_finite()
                .then(|| GestureOp::Zoom(self.wheel_step.powf(notches))),
            GestureEvent::Drag { delta } => delta
                .is_finite()
                .then(|| GestureOp::Pan(Self::ndc_delta_to_pixels(delta, viewport_size))),
            GestureEvent::Tap { position } => position
                .is_finite()
                .then(|| GestureOp::Tap(Self::ndc_to_screen(position, viewport_size))),
            GestureEvent::Swipe { delta } => self.classify_swipe(delta).map(GestureOp::Swipe),
        }
    }

    /// Up or right advances, down or left retreats; the dominant axis wins.
    fn classify_swipe(&self, delta: Vec2) -> Option<SwipeDirection> {
        if !delta.is_finite() || delta.length() < self.min_swipe_distance {
            return None;
        }
        let along = if delta.y.abs() >= delta.x.abs() {
            delta.y
        } else {
            delta.x
        };
        Some(if along > 0.0 {
            SwipeDirection::Forward
        } else {
            SwipeDirection::Backward
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SIZE: Vec2 = Vec2::new(400.0, 200.0);

    #[test]
    fn tap_converts_ndc_to_pixels() {
        let input = GestureInput::default();
        let op = input.translate(GestureEvent::Tap { position: Vec2::new(0.0, 0.0) }, SIZE);
        assert_eq!(op, Some(GestureOp::Tap(Vec2::new(200.0, 100.0))));
        let corner = input.translate(GestureEvent::Tap { position: Vec2::new(-1.0, 1.0) }, SIZE);
        assert_eq!(corner, Some(GestureOp::Tap(Vec2::ZERO)));
    }

    #[test]
    fn ndc_round_trip() {
        let screen = Vec2::new(123.0, 45.0);
        let back = GestureInput::ndc_to_screen(GestureInput::screen_to_ndc(screen, SIZE), SIZE);
        assert!((back - screen).length() < 1e-4);
    }

    #[test]
    fn drag_flips_y() {
        let op = GestureInput::default()
            .translate(GestureEvent::Drag { delta: Vec2::new(0.5, 0.5) }, SIZE);
        assert_eq!(op, Some(GestureOp::Pan(Vec2::new(100.0, -50.0))));
    }

    #[test]
    fn swipe_classification() {
        let input = GestureInput::default();
        let swipe = |x, y| input.translate(GestureEvent::Swipe { delta: Vec2::new(x, y) }, SIZE);
        assert_eq!(swipe(0.0, 0.5), Some(GestureOp::Swipe(SwipeDirection::Forward)));
        assert_eq!(swipe(0.1, -0.5), Some(GestureOp::Swipe(SwipeDirection::Backward)));
        assert_eq!(swipe(-0.6, 0.2), Some(GestureOp::Swipe(SwipeDirection::Backward)));
        assert_eq!(swipe(0.01, 0.01), None);
    }

    #[test]
    fn degenerate_pinch_is_dropped() {
        let input = GestureInput::default();
        assert_eq!(input.translate(GestureEvent::Pinch { scale: 0.0 }, SIZE), None);
        assert_eq!(input.translate(GestureEvent::Pinch { scale: f32::NAN }, SIZE), None);
        assert_eq!(
            input.translate(GestureEvent::Pinch { scale: 1.5 }, SIZE),
            Some(GestureOp::Zoom(1.5))
        );
        let wheel = input.translate(GestureEvent::Wheel { notches: 0.0 }, SIZE);
        assert_eq!(wheel, Some(GestureOp::Zoom(1.0)));
    }
}
