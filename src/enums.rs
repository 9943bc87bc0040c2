use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Orientation {
    Axial,
    Coronal,
    Sagittal,
    Oblique,
}

impl Orientation {
    pub const ORTHOGONAL: [Orientation; 3] =
        [Orientation::Axial, Orientation::Coronal, Orientation::Sagittal];

    /// Index of the volume axis the plane is perpendicular to, using
    /// (x, y, z) = (0, 1, 2). Oblique planes have no fixed normal axis.
    pub fn normal_axis(self) -> Option<usize> {
        match self {
            Orientation::Axial => Some(2),
            Orientation::Coronal => Some(1),
            Orientation::Sagittal => Some(0),
            Orientation::Oblique => None,
        }
    }
}

/// How adjacent slices are combined when the slab is thicker than one voxel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SlabMode {
    #[default]
    Maximum,
    Mean,
    Minimum,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum InteractionMode {
    #[default]
    Navigate,
    AnnotateDistance,
    AnnotateAngle,
    AnnotateRegion,
    AnnotateCircle,
    AnnotateEllipse,
    Probe,
}

impl InteractionMode {
    pub fn measurement_kind(self) -> Option<MeasurementKind> {
        match self {
            InteractionMode::Navigate => None,
            InteractionMode::AnnotateDistance => Some(MeasurementKind::Distance),
            InteractionMode::AnnotateAngle => Some(MeasurementKind::Angle),
            InteractionMode::AnnotateRegion => Some(MeasurementKind::Region),
            InteractionMode::AnnotateCircle => Some(MeasurementKind::Circle),
            InteractionMode::AnnotateEllipse => Some(MeasurementKind::Ellipse),
            InteractionMode::Probe => Some(MeasurementKind::Probe),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MeasurementKind {
    Distance,
    Angle,
    Region,
    /// Centre and a point on the rim.
    Circle,
    /// Two opposite corners of the bounding box.
    Ellipse,
    Probe,
}

impl MeasurementKind {
    /// Minimum number of points needed before the measurement can be finalized.
    pub fn required_points(self) -> usize {
        match self {
            MeasurementKind::Distance => 2,
            MeasurementKind::Angle => 3,
            MeasurementKind::Region => 3,
            MeasurementKind::Circle | MeasurementKind::Ellipse => 2,
            MeasurementKind::Probe => 1,
        }
    }

    /// Whether the measurement completes as soon as it has its required points.
    pub fn is_fixed_arity(self) -> bool {
        !matches!(self, MeasurementKind::Region)
    }

    pub fn unit(self) -> &'static str {
        match self {
            MeasurementKind::Distance => "mm",
            MeasurementKind::Angle => "deg",
            MeasurementKind::Region | MeasurementKind::Circle | MeasurementKind::Ellipse => "mm²",
            MeasurementKind::Probe => "value",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwipeDirection {
    Forward,
    Backward,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum LightingModel {
    #[default]
    Phong,
    Physical,
}
