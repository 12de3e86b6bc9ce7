//! Binary frames. Everything is little-endian.
//!
//! INIT    `[1,0,0,0,0,0,0,0]` + nib data + `url[;link]\0` + pad to 8 +
//!         `f32 positions[W*H*2]` + `u16 connectivity[W*H]`
//! UPDATE  `[2,0,0,0, token:u32]` + positions + connectivity
//! Actions `u32 message_id` + (`[3, piece, x_bits, y_bits]` | `[4, a, b]`)*
//!
//! The two INIT layouts cannot be told apart from the bytes alone, so the
//! decoder is told which nib mode the session runs.

use crate::grid::{GridDims, PieceId};
use crate::protocol::ImageRef;
use crate::topology::{NibMode, NibSource};

pub const OP_INIT: u8 = 1;
pub const OP_UPDATE: u8 = 2;
pub const ACTION_MOVE: u32 = 3;
pub const ACTION_CONNECT: u32 = 4;
pub const HEADER_LEN: usize = 8;
pub const FRAME_ALIGN: usize = 8;
/// Message id for batches that expect no ack.
pub const NO_ACK: u32 = 0;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("frame truncated: need {needed} bytes at offset {offset}, have {len}")]
    Truncated {
        offset: usize,
        needed: usize,
        len: usize,
    },
    #[error("unknown opcode {0}")]
    UnknownOpcode(u8),
    #[error("bad grid dimensions {cols}x{rows}")]
    BadDimensions { cols: u8, rows: u8 },
    #[error("image string is not NUL terminated")]
    MissingTerminator,
    #[error("image string is not valid UTF-8")]
    InvalidUtf8,
    #[error("image string is empty")]
    EmptyImage,
    #[error("piece {piece} out of range for {total} pieces")]
    PieceOutOfRange { piece: usize, total: usize },
    #[error("unknown action tag {0}")]
    UnknownAction(u32),
    #[error("action batch length {0} is not a multiple of 4")]
    Misaligned(usize),
    #[error("empty frame")]
    Empty,
}

/// Positions and representative-valued connectivity for every piece.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PieceState {
    pub positions: Vec<(f32, f32)>,
    pub connectivity: Vec<u16>,
}

impl PieceState {
    /// Identity connectivity: every piece alone.
    pub fn scattered(positions: Vec<(f32, f32)>) -> Self {
        let connectivity = (0..positions.len()).map(|id| id as u16).collect();
        Self {
            positions,
            connectivity,
        }
    }

    pub fn piece_count(&self) -> usize {
        self.connectivity.len()
    }

    /// Position of `id`'s group anchor.
    pub fn anchor_of(&self, id: PieceId) -> Option<(f32, f32)> {
        let rep = *self.connectivity.get(id)? as usize;
        self.positions.get(rep).copied()
    }

    fn encode_into(&self, out: &mut Vec<u8>) {
        for &(x, y) in &self.positions {
            out.extend_from_slice(&x.to_le_bytes());
            out.extend_from_slice(&y.to_le_bytes());
        }
        for &rep in &self.connectivity {
            out.extend_from_slice(&rep.to_le_bytes());
        }
    }

    fn decode_from(reader: &mut Reader<'_>, total: usize) -> Result<Self, WireError> {
        let mut positions = Vec::with_capacity(total);
        for _ in 0..total {
            positions.push((reader.f32()?, reader.f32()?));
        }
        let mut connectivity = Vec::with_capacity(total);
        for _ in 0..total {
            let rep = reader.u16()?;
            if rep as usize >= total {
                return Err(WireError::PieceOutOfRange {
                    piece: rep as usize,
                    total,
                });
            }
            connectivity.push(rep);
        }
        Ok(Self {
            positions,
            connectivity,
        })
    }
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn at(bytes: &'a [u8], pos: usize) -> Self {
        Self { bytes, pos }
    }

    fn take(&mut self, needed: usize) -> Result<&'a [u8], WireError> {
        let end = self.pos.checked_add(needed).filter(|&end| end <= self.bytes.len());
        let Some(end) = end else {
            return Err(WireError::Truncated {
                offset: self.pos,
                needed,
                len: self.bytes.len(),
            });
        };
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], WireError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, WireError> {
        Ok(self.array::<1>()?[0])
    }

    fn u16(&mut self) -> Result<u16, WireError> {
        Ok(u16::from_le_bytes(self.array()?))
    }

    fn u32(&mut self) -> Result<u32, WireError> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    fn f32(&mut self) -> Result<f32, WireError> {
        Ok(f32::from_le_bytes(self.array()?))
    }

    /// NUL-terminated UTF-8, then skip to the next frame-aligned offset.
    fn padded_str(&mut self) -> Result<&'a str, WireError> {
        let rest = &self.bytes[self.pos.min(self.bytes.len())..];
        let len = rest
            .iter()
            .position(|&byte| byte == 0)
            .ok_or(WireError::MissingTerminator)?;
        let text = std::str::from_utf8(&rest[..len]).map_err(|_| WireError::InvalidUtf8)?;
        let end = align_up(self.pos + len + 1);
        self.take(end - self.pos)?;
        Ok(text)
    }
}

fn align_up(offset: usize) -> usize {
    offset.div_ceil(FRAME_ALIGN) * FRAME_ALIGN
}

fn dims_from(cols: u8, rows: u8) -> Result<GridDims, WireError> {
    GridDims::new(cols, rows).map_err(|_| WireError::BadDimensions { cols, rows })
}

pub fn peek_opcode(bytes: &[u8]) -> Result<u8, WireError> {
    bytes.first().copied().ok_or(WireError::Empty)
}

#[derive(Debug, Clone, PartialEq)]
pub struct InitFrame {
    pub dims: GridDims,
    pub nibs: NibSource,
    pub image: ImageRef,
    pub state: PieceState,
}

impl InitFrame {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = vec![0u8; HEADER_LEN];
        out[0] = OP_INIT;
        match &self.nibs {
            NibSource::Running { seed } => {
                out.extend_from_slice(&seed.to_le_bytes());
                out.push(self.dims.cols);
                out.push(self.dims.rows);
            }
            NibSource::PerEdge { seeds } => {
                out.push(self.dims.cols);
                out.push(self.dims.rows);
                for seed in seeds {
                    out.extend_from_slice(&seed.to_le_bytes());
                }
            }
        }
        out.extend_from_slice(self.image.to_string().as_bytes());
        out.push(0);
        out.resize(align_up(out.len()), 0);
        self.state.encode_into(&mut out);
        out
    }

    pub fn decode(bytes: &[u8], mode: NibMode) -> Result<Self, WireError> {
        let op = peek_opcode(bytes)?;
        if op != OP_INIT {
            return Err(WireError::UnknownOpcode(op));
        }
        let mut reader = Reader::at(bytes, 0);
        reader.take(HEADER_LEN)?;
        let (dims, nibs) = match mode {
            NibMode::RunningSeed => {
                let seed = reader.u32()?;
                let dims = dims_from(reader.u8()?, reader.u8()?)?;
                (dims, NibSource::Running { seed })
            }
            NibMode::EdgeSeeds => {
                let dims = dims_from(reader.u8()?, reader.u8()?)?;
                let seeds = (0..dims.edge_count())
                    .map(|_| reader.u16())
                    .collect::<Result<Vec<_>, _>>()?;
                (dims, NibSource::PerEdge { seeds })
            }
        };
        let image = ImageRef::parse(reader.padded_str()?).map_err(|_| WireError::EmptyImage)?;
        let state = PieceState::decode_from(&mut reader, dims.piece_count())?;
        Ok(Self {
            dims,
            nibs,
            image,
            state,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpdateFrame {
    pub token: u32,
    pub state: PieceState,
}

impl UpdateFrame {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + self.state.piece_count() * 10);
        out.extend_from_slice(&[OP_UPDATE, 0, 0, 0]);
        out.extend_from_slice(&self.token.to_le_bytes());
        self.state.encode_into(&mut out);
        out
    }

    /// Dimensions come from the session; UPDATE frames do not carry them.
    pub fn decode(bytes: &[u8], dims: GridDims) -> Result<Self, WireError> {
        let op = peek_opcode(bytes)?;
        if op != OP_UPDATE {
            return Err(WireError::UnknownOpcode(op));
        }
        let mut reader = Reader::at(bytes, 4);
        let token = reader.u32()?;
        let state = PieceState::decode_from(&mut reader, dims.piece_count())?;
        Ok(Self { token, state })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Action {
    Move { piece: PieceId, x: f32, y: f32 },
    Connect { a: PieceId, b: PieceId },
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ActionBatch {
    pub message_id: u32,
    pub actions: Vec<Action>,
}

impl ActionBatch {
    pub fn new(message_id: u32) -> Self {
        Self {
            message_id,
            actions: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn expects_ack(&self) -> bool {
        self.message_id != NO_ACK
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut words = vec![self.message_id];
        for action in &self.actions {
            match *action {
                Action::Move { piece, x, y } => {
                    words.extend([ACTION_MOVE, piece as u32, x.to_bits(), y.to_bits()]);
                }
                Action::Connect { a, b } => {
                    words.extend([ACTION_CONNECT, a as u32, b as u32]);
                }
            }
        }
        words.iter().flat_map(|word| word.to_le_bytes()).collect()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        if bytes.is_empty() {
            return Err(WireError::Empty);
        }
        if bytes.len() % 4 != 0 {
            return Err(WireError::Misaligned(bytes.len()));
        }
        let mut reader = Reader::at(bytes, 0);
        let mut batch = ActionBatch::new(reader.u32()?);
        while reader.pos < bytes.len() {
            let action = match reader.u32()? {
                ACTION_MOVE => Action::Move {
                    piece: reader.u32()? as PieceId,
                    x: f32::from_bits(reader.u32()?),
                    y: f32::from_bits(reader.u32()?),
                },
                ACTION_CONNECT => Action::Connect {
                    a: reader.u32()? as PieceId,
                    b: reader.u32()? as PieceId,
                },
                tag => return Err(WireError::UnknownAction(tag)),
            };
            batch.actions.push(action);
        }
        Ok(batch)
    }
}
