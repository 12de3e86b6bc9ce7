use crate::layout::Viewport;

/// Local input fed into a session. Coordinates are screen pixels.
#[derive(Clone, Debug, PartialEq)]
pub enum CoreAction {
    BeginDrag { piece_id: usize, x: f32, y: f32 },
    DragMove { x: f32, y: f32 },
    DragEnd,
    /// Grow or shrink pieces by one scale step.
    ScalePieces { grow: bool },
    Resize { viewport: Viewport },
}
