//! Board/screen coordinate transforms.

use serde::{Deserialize, Serialize};

use crate::comment::Point;

/// Smallest zoom the board allows.
pub const MIN_ZOOM: f64 = 0.05;

/// Largest zoom the board allows.
pub const MAX_ZOOM: f64 = 6.0;

/// Pan and zoom of one participant's view.
///
/// `screen = board * zoom + pan`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    /// Scale factor from board to screen units.
    pub zoom: f64,
    /// Screen offset of the board origin.
    pub pan: Point,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            zoom: 1.0,
            pan: Point::default(),
        }
    }
}

impl Viewport {
    /// Create a viewport, clamping zoom to the allowed range.
    #[must_use]
    pub fn new(zoom: f64, pan: Point) -> Self {
        Self {
            zoom: clamp_zoom(zoom),
            pan,
        }
    }

    /// Map a board position to the screen.
    #[must_use]
    pub fn to_screen(&self, board: Point) -> Point {
        board * self.zoom + self.pan
    }

    /// Map a screen position back onto the board.
    #[must_use]
    pub fn to_board(&self, screen: Point) -> Point {
        (screen - self.pan) / self.zoom
    }

    /// Set the zoom, keeping the board point under `anchor` fixed on screen.
    pub fn zoom_around(&mut self, zoom: f64, anchor: Point) {
        let board_before = self.to_board(anchor);
        self.zoom = clamp_zoom(zoom);
        self.pan = anchor - board_before * self.zoom;
    }

    /// Shift the view by a screen-space delta.
    pub fn pan_by(&mut self, delta: Point) {
        self.pan += delta;
    }
}

fn clamp_zoom(zoom: f64) -> f64 {
    if zoom.is_finite() {
        zoom.clamp(MIN_ZOOM, MAX_ZOOM)
    } else {
        1.0
    }
}
