use serde::{Deserialize, Serialize};

pub type PieceId = usize;

pub const MIN_ROUGH_PIECES: u32 = 10;
pub const MAX_PIECES: usize = 1000;
pub const MAX_GRID_SIDE: u32 = 255;
pub const GRID_MIN_SIDE: u32 = 2;

pub const DIR_UP: usize = 0;
pub const DIR_RIGHT: usize = 1;
pub const DIR_DOWN: usize = 2;
pub const DIR_LEFT: usize = 3;
pub const DIRS: [usize; 4] = [DIR_UP, DIR_RIGHT, DIR_DOWN, DIR_LEFT];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TopologyError {
    #[error("grid must be at least 1x1, got {cols}x{rows}")]
    EmptyGrid { cols: u8, rows: u8 },
    #[error("rough piece count {0} outside {MIN_ROUGH_PIECES}..={MAX_PIECES}")]
    BadPieceCount(u32),
    #[error("image size {width}x{height} is degenerate")]
    BadImageSize { width: u32, height: u32 },
    #[error("expected {expected} nib seeds, got {found}")]
    NibSeedCount { expected: usize, found: usize },
}

/// Grid dimensions as they travel on the wire (one byte per side).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GridDims {
    pub cols: u8,
    pub rows: u8,
}

impl GridDims {
    pub fn new(cols: u8, rows: u8) -> Result<Self, TopologyError> {
        if cols == 0 || rows == 0 {
            return Err(TopologyError::EmptyGrid { cols, rows });
        }
        Ok(Self { cols, rows })
    }

    pub fn cols(&self) -> usize {
        self.cols as usize
    }

    pub fn rows(&self) -> usize {
        self.rows as usize
    }

    pub fn piece_count(&self) -> usize {
        self.cols() * self.rows()
    }

    /// Internal edges: one right edge per non-last column plus one bottom edge
    /// per non-last row, `2WH - W - H`.
    pub fn edge_count(&self) -> usize {
        let (w, h) = (self.cols(), self.rows());
        2 * w * h - w - h
    }

    pub fn col(&self, id: PieceId) -> usize {
        id % self.cols()
    }

    pub fn row(&self, id: PieceId) -> usize {
        id / self.cols()
    }

    pub fn contains(&self, id: PieceId) -> bool {
        id < self.piece_count()
    }

    pub fn neighbor(&self, id: PieceId, dir: usize) -> Option<PieceId> {
        neighbor_id(id, self.cols(), self.rows(), dir)
    }
}

pub fn neighbor_id(id: PieceId, cols: usize, rows: usize, dir: usize) -> Option<PieceId> {
    let col = id % cols;
    let row = id / cols;
    match dir {
        DIR_UP if row > 0 => Some(id - cols),
        DIR_RIGHT if col + 1 < cols => Some(id + 1),
        DIR_DOWN if row + 1 < rows => Some(id + cols),
        DIR_LEFT if col > 0 => Some(id - 1),
        _ => None,
    }
}

pub fn opposite_dir(dir: usize) -> usize {
    match dir {
        DIR_UP => DIR_DOWN,
        DIR_RIGHT => DIR_LEFT,
        DIR_DOWN => DIR_UP,
        DIR_LEFT => DIR_RIGHT,
        _ => DIR_UP,
    }
}

/// Grid offset of `id` relative to `anchor`, scaled by the piece size.
pub fn piece_local_offset(
    id: PieceId,
    anchor: PieceId,
    cols: usize,
    piece_width: f32,
    piece_height: f32,
) -> (f32, f32) {
    let col = (id % cols) as f32;
    let row = (id / cols) as f32;
    let anchor_col = (anchor % cols) as f32;
    let anchor_row = (anchor / cols) as f32;
    (
        (col - anchor_col) * piece_width,
        (row - anchor_row) * piece_height,
    )
}

fn height_for_width(width: u32, image_width: u32, image_height: u32) -> u32 {
    let raw = (width as f64 * image_height as f64 / image_width as f64).round();
    (raw as u32).clamp(GRID_MIN_SIDE, MAX_GRID_SIDE)
}

/// Picks the grid closest to `rough_count` pieces that keeps pieces roughly
/// square for the image's aspect ratio.
pub fn choose_grid(
    image_width: u32,
    image_height: u32,
    rough_count: u32,
) -> Result<GridDims, TopologyError> {
    if image_width == 0 || image_height == 0 {
        return Err(TopologyError::BadImageSize {
            width: image_width,
            height: image_height,
        });
    }
    if !(MIN_ROUGH_PIECES..=MAX_PIECES as u32).contains(&rough_count) {
        return Err(TopologyError::BadPieceCount(rough_count));
    }
    let mut best_width = GRID_MIN_SIDE;
    let mut best_diff = u32::MAX;
    for width in GRID_MIN_SIDE..=MAX_GRID_SIDE {
        let height = height_for_width(width, image_width, image_height);
        let count = width * height;
        if count as usize > MAX_PIECES {
            break;
        }
        let diff = count.abs_diff(rough_count);
        if diff < best_diff {
            best_diff = diff;
            best_width = width;
        }
    }
    let best_height = height_for_width(best_width, image_width, image_height);
    GridDims::new(best_width as u8, best_height as u8)
}
