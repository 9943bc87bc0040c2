//! # MPR engine
//!
//! This crate turns an already decoded 3D scalar volume into the four
//! synchronized views of a multi-planar reconstruction viewer:
//!  - Axial
//!  - Coronal
//!  - Sagittal
//!  - Oblique (arbitrarily rotated plane, optionally lit)
//!
//! The views share one 3D crosshair cursor. Tapping a view moves the cursor
//! and, when synchronization is on, re-slices the other views through it.
//! Each view has its own zoom, pan, window/level and slab (MIP, MinIP or
//! mean). Distance, angle, region and pixel probe measurements are mapped to
//! volume space as they are placed and re-projected on every frame.
//!
//! Rendering is per viewport. A render snapshots the view state, extracts the
//! slice (in parallel using rayon), maps it to display intensities, resamples
//! it through pan/zoom and draws the overlays before handing the frame to a
//! host provided [`DrawingSurface`]. Newer requests supersede older ones.
//!
//! Loading volumes from disk or the network is left to the host; any decoder
//! that can produce an `ndarray::Array3<i16>` or a flat x-fastest buffer can
//! feed the engine.
//!
//! # Examples
//!
//! ## Building a viewer and rendering the axial view
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use mpr_engine::{EngineConfig, GestureEvent, MprViewer, Volume, viewer::AXIAL};
//! # use glam::Vec2;
//! let voxels = vec![0i16; 256 * 256 * 120];
//! let volume = Volume::from_raw((256, 256, 120), (0.7, 0.7, 2.5), voxels)
//!     .expect("should have accepted a buffer matching the dimensions");
//! let mut viewer = MprViewer::new(Arc::new(volume), EngineConfig::default());
//!
//! viewer
//!     .handle_gesture(AXIAL, GestureEvent::Tap { position: Vec2::ZERO })
//!     .expect("should have placed the cursor");
//! let image = viewer
//!     .render_to_image(AXIAL)
//!     .expect("should have rendered the axial view");
//! image.save("axial.png");
//! ```

pub mod config;
pub mod crosshair;
pub mod enums;
pub mod error;
pub mod gesture;
pub mod gpu_interpolator;
mod interpolator;
pub mod measurement;
pub mod overlay;
pub mod render;
pub mod shading;
pub mod slice;
pub mod viewer;
pub mod viewport;
pub mod volume;
pub mod window_level;

pub use config::EngineConfig;
pub use enums::{InteractionMode, MeasurementKind, Orientation, SlabMode};
pub use error::{MprError, VolumeError};
pub use gesture::GestureEvent;
pub use render::{DrawingSurface, RenderFrame, RenderOutcome};
pub use viewer::MprViewer;
pub use viewport::ViewportId;
pub use volume::Volume;
pub use window_level::WindowLevel;
