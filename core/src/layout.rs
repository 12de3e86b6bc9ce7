use serde::{Deserialize, Serialize};

use crate::grid::{GridDims, PieceId};
use crate::rng::Lcg;

pub const PUZZLE_FIT_RATIO: f32 = 0.8;
pub const PUZZLE_AREA_RATIO_MAX: f32 = 0.5;
pub const PUZZLE_AREA_MIN: f32 = 1000.0;
pub const PUZZLE_SHRINK_STEP: f32 = 0.9;
pub const PIECE_SCALE_STEP: f32 = 1.2;
pub const SCATTER_JITTER: f32 = 0.5;

/// Play area size in screen pixels.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: f32,
    pub height: f32,
}

impl Viewport {
    pub fn new(width: f32, height: f32) -> Self {
        Self {
            width: width.max(1.0),
            height: height.max(1.0),
        }
    }

    pub fn to_screen(&self, canonical: (f32, f32)) -> (f32, f32) {
        (canonical.0 * self.width, canonical.1 * self.height)
    }

    pub fn to_canonical(&self, screen: (f32, f32)) -> (f32, f32) {
        (screen.0 / self.width, screen.1 / self.height)
    }
}

impl Default for Viewport {
    fn default() -> Self {
        Self::new(1280.0, 800.0)
    }
}

/// Canonical bounds every piece position is clamped to while dragging.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlayRegion {
    pub min: f32,
    pub max: f32,
}

impl Default for PlayRegion {
    fn default() -> Self {
        Self {
            min: 0.0001,
            max: 1.5,
        }
    }
}

impl PlayRegion {
    /// Narrows `delta` so `pos + delta` stays inside the region on both axes.
    pub fn clamp_delta(&self, pos: (f32, f32), delta: (f32, f32)) -> (f32, f32) {
        (
            delta.0.max(self.min - pos.0).min(self.max - pos.0),
            delta.1.max(self.min - pos.1).min(self.max - pos.1),
        )
    }
}

/// Piece size in screen pixels.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PieceMetrics {
    pub piece_width: f32,
    pub piece_height: f32,
    pub nib_size: f32,
}

impl PieceMetrics {
    pub fn new(piece_width: f32, piece_height: f32) -> Self {
        Self {
            piece_width,
            piece_height,
            nib_size: (piece_width / 4.0).min(piece_height / 4.0),
        }
    }

    pub fn scaled(&self, factor: f32) -> Self {
        Self::new(self.piece_width * factor, self.piece_height * factor)
    }

    /// Piece size as a fraction of the viewport.
    pub fn canonical_size(&self, viewport: Viewport) -> (f32, f32) {
        (
            self.piece_width / viewport.width,
            self.piece_height / viewport.height,
        )
    }
}

/// Sizes pieces so the finished puzzle fits the viewport and keeps the image
/// aspect ratio.
pub fn fit_piece_metrics(viewport: Viewport, dims: GridDims, image_size: (u32, u32)) -> PieceMetrics {
    let cols = dims.cols as f32;
    let rows = dims.rows as f32;
    let image_w = image_size.0.max(1) as f32;
    let image_h = image_size.1.max(1) as f32;
    let (mut piece_width, mut piece_height);
    if viewport.width / cols < viewport.height / rows {
        piece_width = PUZZLE_FIT_RATIO * viewport.width / cols;
        piece_height = piece_width * (cols / rows) * (image_h / image_w);
    } else {
        piece_height = PUZZLE_FIT_RATIO * viewport.height / rows;
        piece_width = piece_height * (rows / cols) * (image_w / image_h);
    }
    let area_cap = PUZZLE_AREA_MIN.max(PUZZLE_AREA_RATIO_MAX * viewport.width * viewport.height);
    while piece_width * cols * piece_height * rows > area_cap {
        piece_width *= PUZZLE_SHRINK_STEP;
        piece_height *= PUZZLE_SHRINK_STEP;
    }
    PieceMetrics::new(piece_width, piece_height)
}

/// Screen-space box of a piece including its nib margin on every side.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PieceBox {
    pub left: f32,
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
}

impl PieceBox {
    pub fn at(canonical: (f32, f32), viewport: Viewport, metrics: PieceMetrics) -> Self {
        let (left, top) = viewport.to_screen(canonical);
        Self {
            left,
            top,
            right: left + metrics.piece_width + 2.0 * metrics.nib_size,
            bottom: top + metrics.piece_height + 2.0 * metrics.nib_size,
        }
    }
}

/// Key points of two pieces sharing an edge: the inner corner of the shared
/// edge as seen from each piece. `step` is the grid step from `mine` to
/// `theirs` (one of `(0,-1)`, `(0,1)`, `(1,0)`, `(-1,0)`).
pub fn edge_key_points(
    mine: PieceBox,
    theirs: PieceBox,
    step: (i32, i32),
    nib_size: f32,
) -> ((f32, f32), (f32, f32)) {
    let me = (
        if step.0 == -1 {
            mine.left + nib_size
        } else {
            mine.right - nib_size
        },
        if step.1 == -1 {
            mine.top + nib_size
        } else {
            mine.bottom - nib_size
        },
    );
    let other = (
        if step.0 == 1 {
            theirs.left + nib_size
        } else {
            theirs.right - nib_size
        },
        if step.1 == 1 {
            theirs.top + nib_size
        } else {
            theirs.bottom - nib_size
        },
    );
    (me, other)
}

/// Loose starting layout: each piece near its grid cell inside the unit
/// square, then shuffled between pieces.
pub fn scatter_positions(dims: GridDims, rng: &mut Lcg) -> Vec<(f32, f32)> {
    let cols = dims.cols();
    let rows = dims.rows();
    let mut positions = Vec::with_capacity(dims.piece_count());
    for y in 0..rows {
        for x in 0..cols {
            let dx = rng.next_f64() as f32 * SCATTER_JITTER;
            let dy = rng.next_f64() as f32 * SCATTER_JITTER;
            positions.push((
                (x as f32 + dx) / (cols + 1) as f32,
                (y as f32 + dy) / (rows + 1) as f32,
            ));
        }
    }
    for i in (1..positions.len()).rev() {
        let j = rng.next_index(i + 1);
        positions.swap(i, j);
    }
    positions
}

pub fn grid_step(from: PieceId, to: PieceId, cols: usize) -> (i32, i32) {
    let dx = (to % cols) as i32 - (from % cols) as i32;
    let dy = (to / cols) as i32 - (from / cols) as i32;
    (dx, dy)
}
