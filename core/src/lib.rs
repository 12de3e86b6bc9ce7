pub mod action;
pub mod board;
pub mod config;
pub mod connectivity;
pub mod error;
pub mod grid;
pub mod layout;
pub mod nib;
pub mod protocol;
pub mod puzzle_id;
pub mod rng;
pub mod session;
pub mod topology;
pub mod wire;

pub use action::CoreAction;
pub use board::Board;
pub use config::SyncConfig;
pub use connectivity::Connectivity;
pub use error::SessionError;
pub use grid::{choose_grid, GridDims, PieceId, TopologyError};
pub use layout::{PieceMetrics, PlayRegion, Viewport};
pub use nib::{NibSpec, Orientation};
pub use protocol::{ClientText, ImageRef, ParseError, ServerText};
pub use puzzle_id::{is_valid_puzzle_id, PuzzleId, PuzzleIdError, PUZZLE_ID_ALPHABET, PUZZLE_ID_LEN};
pub use rng::Lcg;
pub use session::{
    HostRequest, ImageChoice, Intent, Outgoing, Phase, Session, SessionEvent, SessionSummary,
};
pub use topology::{NibMode, NibSource, Topology};
pub use wire::{Action, ActionBatch, InitFrame, PieceState, UpdateFrame, WireError};
