use thiserror::Error;

use crate::enums::{MeasurementKind, Orientation};
use crate::viewport::ViewportId;

/// Structural problems with a volume handed to the engine. The volume is
/// rejected as a whole; no partial rendering is attempted.
#[derive(Debug, Error, PartialEq)]
pub enum VolumeError {
    #[error("Voxel buffer holds {actual} samples but dimensions {dim:?} require {expected}")]
    BufferLengthMismatch {
        dim: (usize, usize, usize),
        expected: usize,
        actual: usize,
    },

    #[error("Volume dimension is zero: {0:?}")]
    EmptyDimension((usize, usize, usize)),

    #[error("Invalid voxel spacing {0:?}")]
    InvalidSpacing((f32, f32, f32)),
}

/// Returned by a drawing surface that lost its context while presenting.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("Drawing surface lost")]
pub struct SurfaceLost;

#[derive(Debug, Error)]
pub enum MprError {
    #[error(transparent)]
    Structural(#[from] VolumeError),

    #[error("Slice index {index} is outside 0..{max} for {orientation:?}")]
    SliceIndexOutOfRange {
        orientation: Orientation,
        index: usize,
        max: usize,
    },

    #[error("{kind:?} measurement needs {required} points, got {actual}")]
    InsufficientPoints {
        kind: MeasurementKind,
        required: usize,
        actual: usize,
    },

    #[error("Unknown viewport {0:?}")]
    UnknownViewport(ViewportId),

    #[error("No measurement in progress")]
    NoActiveMeasurement,

    #[error("Measurement belongs to viewport {expected:?}, point came from {actual:?}")]
    MeasurementViewportMismatch {
        expected: ViewportId,
        actual: ViewportId,
    },

    #[error("Drawing surface unavailable for viewport {0:?}")]
    RenderSurfaceUnavailable(ViewportId),

    #[error("Unknown window preset: {0}")]
    UnknownPreset(String),

    #[error("Preset catalog error: {0}")]
    Preset(#[from] serde_json::Error),

    #[error("GPU error: {0}")]
    Gpu(String),
}
