use crate::viewport::{ViewportId, ViewportState};
use crate::volume::Volume;

use glam::{Vec2, Vec3};
use serde::{Deserialize, Serialize};

/// The shared 3D cursor, in voxel index space `(x, y, z)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Cursor3D(pub Vec3);

impl Cursor3D {
    pub fn position(&self) -> Vec3 {
        self.0
    }

    /// Nearest voxel, as `(x, y, z)`.
    pub fn voxel(&self) -> (usize, usize, usize) {
        let p = self.0.round().max(Vec3::ZERO);
        (p.x as usize, p.y as usize, p.z as usize)
    }
}

/// Single source of truth for the crosshair. Owned by the viewer and handed
/// to viewport code by reference.
#[derive(Debug, Clone, PartialEq)]
pub struct CrosshairCoordinator {
    cursor: Cursor3D,
    synchronized: bool,
    origin: Option<ViewportId>,
}

impl CrosshairCoordinator {
    /// Cursor starts at the volume centre.
    pub fn new(volume: &Volume, synchronized: bool) -> Self {
        Self {
            cursor: Cursor3D(volume.center()),
            synchronized,
            origin: None,
        }
    }

    pub fn cursor(&self) -> Cursor3D {
        self.cursor
    }

    pub fn is_synchronized(&self) -> bool {
        self.synchronized
    }

    pub fn set_synchronized(&mut self, synchronized: bool) {
        self.synchronized = synchronized;
    }

    /// Viewport that placed the cursor last, if any.
    pub fn origin(&self) -> Option<ViewportId> {
        self.origin
    }

    /// Whether the crosshair belongs on `viewport`'s overlay.
    pub fn is_visible_in(&self, viewport: ViewportId) -> bool {
        self.synchronized || self.origin.is_none_or(|origin| origin == viewport)
    }

    /// Store a cursor position, clamped per axis to the volume.
    pub fn set_cursor(&mut self, volume: &Volume, position: Vec3) -> Cursor3D {
        self.cursor = Cursor3D(volume.clamp_index(position));
        self.cursor
    }

    /// Convert a screen point in `origin` to a 3D cursor and, when
    /// synchronized, re-slice every viewport with a different orientation
    /// through it. Returns `None` if `origin` is not among `viewports`.
    pub fn place_cursor(
        &mut self,
        volume: &Volume,
        viewports: &mut [ViewportState],
        origin: ViewportId,
        screen: Vec2,
    ) -> Option<Cursor3D> {
        let source = viewports.iter().find(|vp| vp.id == origin)?;
        let orientation = source.orientation;
        let cursor = self.set_cursor(volume, source.screen_to_volume(volume, screen));
        self.origin = Some(origin);
        log::trace!("cursor placed at {:?} from {origin:?}", cursor.0);

        if self.synchronized {
            viewports
                .iter_mut()
                .filter(|vp| vp.orientation != orientation)
                .for_each(|vp| vp.follow(volume, cursor.0));
        }
        Some(cursor)
    }

    /// Screen position of the cursor in `viewport`.
    pub fn project(&self, volume: &Volume, viewport: &ViewportState) -> Vec2 {
        viewport.volume_to_screen(volume, self.cursor.0)
    }
}
