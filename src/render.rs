//! Per-viewport render pipeline: extraction → transform → compositing →
//! present, with last-request-wins cancellation.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::time::Duration;

use crate::config::OverlayStyle;
use crate::enums::{MeasurementKind, Orientation};
use crate::error::{MprError, SurfaceLost};
use crate::measurement::Measurement;
use crate::overlay;
use crate::shading::ShadingPipeline;
use crate::slice::{Slice, SliceExtractor};
use crate::viewport::{ViewportId, ViewportState};
use crate::volume::Volume;

use glam::{Vec2, Vec3};
use image::{GrayImage, ImageBuffer, RgbaImage};
use rayon::prelude::*;
use web_time::{Instant, SystemTime};

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderState {
    Idle = 0,
    Extracting = 1,
    Transforming = 2,
    Compositing = 3,
    Presented = 4,
}

impl RenderState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => RenderState::Extracting,
            2 => RenderState::Transforming,
            3 => RenderState::Compositing,
            4 => RenderState::Presented,
            _ => RenderState::Idle,
        }
    }
}

/// A finished frame handed to the host's drawing surface.
#[derive(Debug, Clone)]
pub struct RenderFrame {
    pub viewport: ViewportId,
    pub pixels: RgbaImage,
    pub timestamp: SystemTime,
    pub generation: u64,
}

/// Host-owned drawable.
pub trait DrawingSurface {
    fn is_available(&self) -> bool;
    fn present(&mut self, frame: RenderFrame) -> Result<(), SurfaceLost>;
}

/// Everything one render needs, captured at request time so a render never
/// observes a half-applied state change.
#[derive(Debug, Clone)]
pub struct RenderJob<'a> {
    pub volume: &'a Volume,
    pub viewport: ViewportState,
    pub extractor: SliceExtractor,
    pub cursor: Option<Vec3>,
    pub measurements: Vec<Measurement>,
    pub draft: Option<(MeasurementKind, Vec<Vec3>)>,
    pub shading: Option<&'a ShadingPipeline>,
    pub overlay: OverlayStyle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderTicket {
    generation: u64,
}

impl RenderTicket {
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RenderOutcome {
    Presented { generation: u64, timestamp: SystemTime },
    /// A newer request arrived; this one was dropped without presenting.
    Superseded,
    /// Too soon after the previous frame; re-run with `flush` when input settles.
    Throttled,
    /// The surface is still unavailable.
    Paused,
}

#[derive(Debug)]
pub struct RenderPipeline {
    viewport: ViewportId,
    generation: AtomicU64,
    state: AtomicU8,
    paused: AtomicBool,
    throttle: Option<Duration>,
    last_presented: Mutex<Option<Instant>>,
}

impl RenderPipeline {
    pub fn new(viewport: ViewportId, throttle: Option<Duration>) -> Self {
        Self {
            viewport,
            generation: AtomicU64::new(0),
            state: AtomicU8::new(RenderState::Idle as u8),
            paused: AtomicBool::new(false),
            throttle,
            last_presented: Mutex::new(None),
        }
    }

    pub fn viewport(&self) -> ViewportId {
        self.viewport
    }

    pub fn state(&self) -> RenderState {
        RenderState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    fn set_state(&self, state: RenderState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Start a new render request, superseding every earlier ticket.
    pub fn request(&self) -> RenderTicket {
        RenderTicket {
            generation: self.generation.fetch_add(1, Ordering::AcqRel) + 1,
        }
    }

    /// Mark in-flight work as stale after a state change.
    pub fn invalidate(&self) {
        self.request();
    }

    pub fn is_current(&self, ticket: RenderTicket) -> bool {
        self.generation.load(Ordering::Acquire) == ticket.generation
    }

    fn stage(&self, ticket: RenderTicket, state: RenderState) -> bool {
        if !self.is_current(ticket) {
            log::trace!("{:?}: generation {} superseded", self.viewport, ticket.generation);
            self.set_state(RenderState::Idle);
            return false;
        }
        self.set_state(state);
        true
    }

    fn is_throttled(&self) -> bool {
        let Some(min_interval) = self.throttle else {
            return false;
        };
        let last = self
            .last_presented
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        last.is_some_and(|at| at.elapsed() < min_interval)
    }

    fn mark_presented(&self) {
        let mut last = self
            .last_presented
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *last = Some(Instant::now());
    }

    /// Surface availability gate. The first failure is reported as an error,
    /// later ones as `Paused`, until the surface comes back.
    fn check_surface(&self, surface: &dyn DrawingSurface) -> Result<bool, MprError> {
        if surface.is_available() {
            if self.paused.swap(false, Ordering::AcqRel) {
                log::info!("{:?}: drawing surface available again", self.viewport);
            }
            return Ok(true);
        }
        self.set_state(RenderState::Idle);
        if self.paused.swap(true, Ordering::AcqRel) {
            return Ok(false);
        }
        log::warn!("{:?}: drawing surface unavailable, pausing", self.viewport);
        Err(MprError::RenderSurfaceUnavailable(self.viewport))
    }

    pub fn run(
        &self,
        ticket: RenderTicket,
        job: &RenderJob<'_>,
        surface: &mut dyn DrawingSurface,
    ) -> Result<RenderOutcome, MprError> {
        if self.is_throttled() {
            return Ok(RenderOutcome::Throttled);
        }
        self.flush(ticket, job, surface)
    }

    /// Like [`Self::run`] but ignores throttling.
    pub fn flush(
        &self,
        ticket: RenderTicket,
        job: &RenderJob<'_>,
        surface: &mut dyn DrawingSurface,
    ) -> Result<RenderOutcome, MprError> {
        if !self.check_surface(&*surface)? {
            return Ok(RenderOutcome::Paused);
        }

        if !self.stage(ticket, RenderState::Extracting) {
            return Ok(RenderOutcome::Superseded);
        }
        let slice = extract(job)?;

        if !self.stage(ticket, RenderState::Transforming) {
            return Ok(RenderOutcome::Superseded);
        }
        let image = transform(job, &slice);

        if !self.stage(ticket, RenderState::Compositing) {
            return Ok(RenderOutcome::Superseded);
        }
        let pixels = composite(job, &image);

        if !self.is_current(ticket) {
            self.set_state(RenderState::Idle);
            return Ok(RenderOutcome::Superseded);
        }
        let timestamp = SystemTime::now();
        let frame = RenderFrame {
            viewport: self.viewport,
            pixels,
            timestamp,
            generation: ticket.generation,
        };
        if surface.present(frame).is_err() {
            self.paused.store(true, Ordering::Release);
            self.set_state(RenderState::Idle);
            log::warn!("{:?}: drawing surface lost while presenting", self.viewport);
            return Err(MprError::RenderSurfaceUnavailable(self.viewport));
        }
        self.set_state(RenderState::Presented);
        self.mark_presented();
        log::debug!("{:?}: presented generation {}", self.viewport, ticket.generation);
        self.set_state(RenderState::Idle);

        Ok(RenderOutcome::Presented {
            generation: ticket.generation,
            timestamp,
        })
    }
}

/// Extract the slice a viewport currently shows, honouring its slab and,
/// for oblique views, its rotation.
pub fn extract_for(
    volume: &Volume,
    viewport: &ViewportState,
    extractor: SliceExtractor,
) -> Result<Slice, MprError> {
    let extractor = SliceExtractor {
        slab_mode: viewport.slab_mode,
        ..extractor
    };
    match viewport.orientation {
        Orientation::Oblique => {
            let plane = viewport.oblique_plane(volume);
            let mut slice = extractor.extract_oblique(volume, &plane, viewport.slab_thickness());
            slice.index = viewport.slice_index();
            Ok(slice)
        }
        orientation => extractor.extract(
            volume,
            orientation,
            viewport.slice_index(),
            viewport.slab_thickness(),
        ),
    }
}

fn extract(job: &RenderJob<'_>) -> Result<Slice, MprError> {
    extract_for(job.volume, &job.viewport, job.extractor)
}

fn gray_to_rgba(gray: &GrayImage) -> RgbaImage {
    let (width, height) = gray.dimensions();
    let pixel_data: Vec<u8> = gray
        .as_raw()
        .par_iter()
        .flat_map_iter(|&v| [v, v, v, 255])
        .collect();
    ImageBuffer::from_raw(width, height, pixel_data).unwrap_or_else(|| RgbaImage::new(width, height))
}

/// Slice-resolution color image: window/level for 2D views, the lighting
/// pipeline for a shaded oblique view. Inversion applies to both.
fn transform(job: &RenderJob<'_>, slice: &Slice) -> RgbaImage {
    let vp = &job.viewport;
    let mut image = match (vp.orientation, job.shading) {
        (Orientation::Oblique, Some(shading)) => {
            let plane = vp.oblique_plane(job.volume);
            shading.render_oblique(job.volume, &plane, slice, &vp.window_level)
        }
        _ => gray_to_rgba(&vp.window_level.apply(slice)),
    };
    if vp.invert {
        image.par_chunks_mut(4).for_each(|px| {
            for c in &mut px[..3] {
                *c = 255 - *c;
            }
        });
    }
    image
}

/// Resample the slice image into screen space through pan/zoom (nearest
/// neighbour) and draw the overlays.
fn composite(job: &RenderJob<'_>, image: &RgbaImage) -> RgbaImage {
    let vp = &job.viewport;
    let width = vp.screen_size.x.max(1.0).round() as u32;
    let height = vp.screen_size.y.max(1.0).round() as u32;
    let (src_w, src_h) = image.dimensions();
    let background = [0, 0, 0, 255];

    let pixel_data: Vec<u8> = (0..height)
        .into_par_iter()
        .flat_map_iter(|y| {
            (0..width).flat_map(move |x| {
                let centre = Vec2::new(x as f32 + 0.5, y as f32 + 0.5);
                let p = vp.screen_to_plane(job.volume, centre).round();
                if p.x >= 0.0 && p.y >= 0.0 && (p.x as u32) < src_w && (p.y as u32) < src_h {
                    image.get_pixel(p.x as u32, p.y as u32).0
                } else {
                    background
                }
            })
        })
        .collect();

    let mut frame =
        ImageBuffer::from_raw(width, height, pixel_data).unwrap_or_else(|| RgbaImage::new(width, height));
    overlay::draw_overlays(
        &mut frame,
        job.volume,
        vp,
        job.cursor,
        &job.measurements,
        job.draft.as_ref().map(|(kind, points)| (*kind, points.as_slice())),
        &job.overlay,
    );
    frame
}

/// Convenience for hosts that only need the pixels of one viewport.
pub fn render_to_image(job: &RenderJob<'_>) -> Result<RgbaImage, MprError> {
    let slice = extract(job)?;
    Ok(composite(job, &transform(job, &slice)))
}
