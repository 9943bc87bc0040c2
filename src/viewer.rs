//! Top-level owner tying the volume, four viewports, the shared crosshair,
//! measurements and per-viewport render pipelines together.

use std::sync::Arc;

use crate::config::EngineConfig;
use crate::crosshair::{CrosshairCoordinator, Cursor3D};
use crate::enums::{InteractionMode, Orientation, SlabMode};
use crate::error::MprError;
use crate::gesture::{GestureEvent, GestureInput};
use crate::measurement::{Measurement, MeasurementEngine};
use crate::render::{self, DrawingSurface, RenderJob, RenderOutcome, RenderPipeline};
use crate::shading::ShadingPipeline;
use crate::slice::{Slice, SliceExtractor};
use crate::viewport::{ViewportId, ViewportState, ViewportTelemetry};
use crate::volume::Volume;
use crate::window_level::{Preset, PresetCatalog, WindowLevel};

use glam::{Vec2, Vec3};
use image::RgbaImage;
use rayon::prelude::*;

pub const AXIAL: ViewportId = ViewportId(0);
pub const CORONAL: ViewportId = ViewportId(1);
pub const SAGITTAL: ViewportId = ViewportId(2);
pub const OBLIQUE: ViewportId = ViewportId(3);

/// What a gesture did, so the host knows which readouts to refresh.
#[derive(Debug, Clone, PartialEq)]
pub enum GestureResponse {
    /// The event carried no usable operation.
    Ignored,
    /// Zoom, pan or slice change on the target viewport.
    ViewUpdated,
    CursorMoved(Cursor3D),
    PointAdded { count: usize },
    MeasurementFinished(Measurement),
}

pub struct MprViewer {
    volume: Arc<Volume>,
    config: EngineConfig,
    viewports: Vec<ViewportState>,
    pipelines: Vec<RenderPipeline>,
    crosshair: CrosshairCoordinator,
    measurements: MeasurementEngine,
    gestures: GestureInput,
    presets: PresetCatalog,
    mode: InteractionMode,
    extractor: SliceExtractor,
    shading: Option<ShadingPipeline>,
}

impl MprViewer {
    pub fn new(volume: Arc<Volume>, config: EngineConfig) -> Self {
        let orientations = [
            (AXIAL, Orientation::Axial),
            (CORONAL, Orientation::Coronal),
            (SAGITTAL, Orientation::Sagittal),
            (OBLIQUE, Orientation::Oblique),
        ];
        let viewports: Vec<ViewportState> = orientations
            .iter()
            .map(|&(id, orientation)| ViewportState::new(id, orientation, &volume, &config))
            .collect();
        let pipelines = orientations
            .iter()
            .map(|&(id, orientation)| {
                let throttle =
                    (orientation == Orientation::Oblique).then(|| config.oblique_min_interval());
                RenderPipeline::new(id, throttle)
            })
            .collect();
        let shading = config
            .shade_oblique
            .then(|| ShadingPipeline::for_oblique(&volume, config.shading, Vec3::ZERO));
        let (nx, ny, nz) = volume.extent();
        log::debug!("viewer created for {nx}x{ny}x{nz} volume");

        Self {
            crosshair: CrosshairCoordinator::new(&volume, config.synchronize),
            extractor: SliceExtractor::new(config.slab_mode, config.background),
            measurements: MeasurementEngine::new(),
            gestures: GestureInput::default(),
            presets: PresetCatalog::builtin(),
            mode: InteractionMode::Navigate,
            volume,
            config,
            viewports,
            pipelines,
            shading,
        }
    }

    pub fn volume(&self) -> &Arc<Volume> {
        &self.volume
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn viewports(&self) -> &[ViewportState] {
        &self.viewports
    }

    fn index_of(&self, id: ViewportId) -> Result<usize, MprError> {
        self.viewports
            .iter()
            .position(|vp| vp.id == id)
            .ok_or(MprError::UnknownViewport(id))
    }

    pub fn viewport(&self, id: ViewportId) -> Result<&ViewportState, MprError> {
        Ok(&self.viewports[self.index_of(id)?])
    }

    fn viewport_mut(&mut self, id: ViewportId) -> Result<&mut ViewportState, MprError> {
        let index = self.index_of(id)?;
        self.pipelines[index].invalidate();
        Ok(&mut self.viewports[index])
    }

    pub fn cursor(&self) -> Cursor3D {
        self.crosshair.cursor()
    }

    pub fn crosshair(&self) -> &CrosshairCoordinator {
        &self.crosshair
    }

    pub fn measurements(&self) -> &MeasurementEngine {
        &self.measurements
    }

    pub fn presets(&self) -> &PresetCatalog {
        &self.presets
    }

    pub fn set_presets(&mut self, presets: PresetCatalog) {
        self.presets = presets;
    }

    pub fn gesture_input_mut(&mut self) -> &mut GestureInput {
        &mut self.gestures
    }

    pub fn interaction_mode(&self) -> InteractionMode {
        self.mode
    }

    /// Switching modes drops any unfinished measurement.
    pub fn set_interaction_mode(&mut self, mode: InteractionMode) {
        if mode == self.mode {
            return;
        }
        if self.measurements.is_active() {
            log::debug!("mode change to {mode:?} cancels the unfinished measurement");
            self.measurements.cancel();
        }
        self.mode = mode;
    }

    pub fn set_synchronization(&mut self, synchronized: bool) {
        self.crosshair.set_synchronized(synchronized);
        self.invalidate_all();
    }

    fn invalidate_all(&self) {
        self.pipelines.iter().for_each(RenderPipeline::invalidate);
    }

    pub fn set_screen_size(&mut self, id: ViewportId, size: Vec2) -> Result<(), MprError> {
        self.viewport_mut(id)?.screen_size = size.max(Vec2::ONE);
        Ok(())
    }

    /// Route a gesture to `id`. Taps go to the crosshair in navigate mode and
    /// to the measurement engine in the annotate modes.
    pub fn handle_gesture(
        &mut self,
        id: ViewportId,
        event: GestureEvent,
    ) -> Result<GestureResponse, MprError> {
        let index = self.index_of(id)?;
        let size = self.viewports[index].screen_size;
        let Some(op) = self.gestures.translate(event, size) else {
            log::trace!("{id:?}: ignoring {event:?}");
            return Ok(GestureResponse::Ignored);
        };
        self.pipelines[index].invalidate();
        match self.viewports[index].apply(op) {
            None => Ok(GestureResponse::ViewUpdated),
            Some(screen) => self.handle_tap(id, screen),
        }
    }

    fn handle_tap(&mut self, id: ViewportId, screen: Vec2) -> Result<GestureResponse, MprError> {
        let Some(kind) = self.mode.measurement_kind() else {
            let cursor = self
                .crosshair
                .place_cursor(&self.volume, &mut self.viewports, id, screen)
                .ok_or(MprError::UnknownViewport(id))?;
            self.invalidate_all();
            return Ok(GestureResponse::CursorMoved(cursor));
        };

        let index = self.index_of(id)?;
        let restart = self.measurements.active_kind() != Some(kind)
            || self.measurements.active_viewport() != Some(id);
        if restart {
            self.measurements.begin(kind, &self.viewports[index]);
        }
        let count = self
            .measurements
            .add_point(&self.volume, &self.viewports[index], screen)?;
        if self.measurements.is_complete() {
            return self.finalize_measurement().map(GestureResponse::MeasurementFinished);
        }
        Ok(GestureResponse::PointAdded { count })
    }

    /// Finish the active measurement. Region statistics are taken from the
    /// slice its viewport currently shows.
    pub fn finalize_measurement(&mut self) -> Result<Measurement, MprError> {
        let id = self
            .measurements
            .active_viewport()
            .ok_or(MprError::NoActiveMeasurement)?;
        let slice = self.current_slice(id)?;
        let measurement = self.measurements.finalize(&self.volume, Some(&slice))?;
        self.pipelines[self.index_of(id)?].invalidate();
        Ok(measurement)
    }

    pub fn cancel_measurement(&mut self) {
        if let Some(id) = self.measurements.active_viewport() {
            self.measurements.cancel();
            if let Ok(index) = self.index_of(id) {
                self.pipelines[index].invalidate();
            }
        }
    }

    pub fn delete_measurement(&mut self, measurement: u64) -> bool {
        let deleted = self.measurements.delete(measurement);
        if deleted {
            self.invalidate_all();
        }
        deleted
    }

    /// Slice currently shown by `id`, with its slab applied.
    pub fn current_slice(&self, id: ViewportId) -> Result<Slice, MprError> {
        render::extract_for(&self.volume, self.viewport(id)?, self.extractor)
    }

    pub fn set_window_level(&mut self, id: ViewportId, window_level: WindowLevel) -> Result<(), MprError> {
        let window_level = WindowLevel::new(window_level.window, window_level.level);
        self.viewport_mut(id)?.window_level = window_level;
        Ok(())
    }

    /// Replaces only the target viewport's window/level.
    pub fn apply_preset(&mut self, id: ViewportId, preset: &Preset) -> Result<(), MprError> {
        log::debug!("{id:?}: applying preset {}", preset.name);
        self.set_window_level(id, preset.window_level())
    }

    pub fn apply_named_preset(
        &mut self,
        id: ViewportId,
        modality: &str,
        name: &str,
    ) -> Result<(), MprError> {
        let preset = self.presets.lookup(modality, name)?.clone();
        self.apply_preset(id, &preset)
    }

    pub fn set_slab(&mut self, id: ViewportId, thickness: usize, mode: SlabMode) -> Result<(), MprError> {
        self.viewport_mut(id)?.set_slab(thickness, mode);
        Ok(())
    }

    pub fn set_slice_index(&mut self, id: ViewportId, index: usize) -> Result<(), MprError> {
        self.viewport_mut(id)?.set_slice_index(index);
        Ok(())
    }

    pub fn set_invert(&mut self, id: ViewportId, invert: bool) -> Result<(), MprError> {
        self.viewport_mut(id)?.invert = invert;
        Ok(())
    }

    /// Mirror the view. The cursor and measurements follow, since taps are
    /// mapped through the same flipped transform.
    pub fn set_flip(&mut self, id: ViewportId, horizontal: bool, vertical: bool) -> Result<(), MprError> {
        let viewport = self.viewport_mut(id)?;
        viewport.flip_horizontal = horizontal;
        viewport.flip_vertical = vertical;
        Ok(())
    }

    /// Rotate the oblique plane (Euler angles, radians). When synchronized
    /// the plane is re-indexed through the cursor.
    pub fn set_rotation(&mut self, rotation: Vec3) -> Result<(), MprError> {
        let cursor = self.crosshair.cursor().position();
        let synchronized = self.crosshair.is_synchronized();
        let volume = Arc::clone(&self.volume);
        let viewport = self.viewport_mut(OBLIQUE)?;
        viewport.rotation = rotation;
        if synchronized {
            viewport.follow(&volume, cursor);
        }
        if self.config.shade_oblique {
            self.shading = Some(ShadingPipeline::for_oblique(
                &volume,
                self.config.shading,
                rotation,
            ));
        }
        Ok(())
    }

    /// Snapshot everything a render of `id` needs.
    fn job(&self, index: usize) -> RenderJob<'_> {
        let viewport = self.viewports[index].clone();
        let id = viewport.id;
        let cursor = self
            .crosshair
            .is_visible_in(id)
            .then(|| self.crosshair.cursor().position());
        let draft = self
            .measurements
            .active_points()
            .filter(|(owner, _)| *owner == id)
            .zip(self.measurements.active_kind())
            .map(|((_, points), kind)| (kind, points.to_vec()));
        RenderJob {
            volume: &self.volume,
            shading: self
                .shading
                .as_ref()
                .filter(|_| viewport.orientation == Orientation::Oblique),
            viewport,
            extractor: self.extractor,
            cursor,
            measurements: self.measurements.for_viewport(id).cloned().collect(),
            draft,
            overlay: self.config.overlay,
        }
    }

    pub fn render(
        &self,
        id: ViewportId,
        surface: &mut dyn DrawingSurface,
    ) -> Result<RenderOutcome, MprError> {
        let index = self.index_of(id)?;
        let pipeline = &self.pipelines[index];
        let ticket = pipeline.request();
        pipeline.run(ticket, &self.job(index), surface)
    }

    /// Render bypassing the oblique throttle, e.g. once a gesture ends.
    pub fn flush(
        &self,
        id: ViewportId,
        surface: &mut dyn DrawingSurface,
    ) -> Result<RenderOutcome, MprError> {
        let index = self.index_of(id)?;
        let pipeline = &self.pipelines[index];
        let ticket = pipeline.request();
        pipeline.flush(ticket, &self.job(index), surface)
    }

    /// Render every viewport in parallel. `surfaces[i]` belongs to the
    /// viewport at position `i` of [`Self::viewports`]; extra surfaces are
    /// left untouched.
    pub fn render_all<S>(&self, surfaces: &mut [S]) -> Vec<Result<RenderOutcome, MprError>>
    where
        S: DrawingSurface + Send,
    {
        self.pipelines
            .par_iter()
            .enumerate()
            .zip(surfaces.par_iter_mut())
            .map(|((index, pipeline), surface)| {
                let ticket = pipeline.request();
                pipeline.run(ticket, &self.job(index), surface)
            })
            .collect()
    }

    /// Pixels `id` would present, without going through a surface.
    pub fn render_to_image(&self, id: ViewportId) -> Result<RgbaImage, MprError> {
        render::render_to_image(&self.job(self.index_of(id)?))
    }

    pub fn telemetry(&self) -> Vec<ViewportTelemetry> {
        self.viewports.iter().map(ViewportState::telemetry).collect()
    }
}
