//! Client-side sync state machine.
//!
//! The session never touches a socket. Callers feed it socket events and
//! local input, then drain [`Session::take_outgoing`] and
//! [`Session::take_events`].

use log::{debug, info, warn};

use crate::action::CoreAction;
use crate::board::Board;
use crate::config::SyncConfig;
use crate::error::SessionError;
use crate::grid::{choose_grid, GridDims, PieceId, DIR_DOWN, DIR_LEFT, DIR_RIGHT, DIR_UP};
use crate::layout::{
    edge_key_points, fit_piece_metrics, grid_step, scatter_positions, PieceBox, PieceMetrics,
    Viewport, PIECE_SCALE_STEP,
};
use crate::protocol::{ClientText, ImageRef, ServerText};
use crate::puzzle_id::PuzzleId;
use crate::rng::Lcg;
use crate::topology::{NibMode, NibSource, Topology};
use crate::wire::{
    peek_opcode, Action, ActionBatch, InitFrame, PieceState, UpdateFrame, NO_ACK, OP_INIT,
    OP_UPDATE,
};

/// Neighbour order checked when a drag ends.
const SNAP_ORDER: [usize; 4] = [DIR_UP, DIR_DOWN, DIR_RIGHT, DIR_LEFT];
const SCATTER_SALT: u32 = 0x5ca7_7e75;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Disconnected,
    Connecting,
    AwaitingInit,
    Active { solved: bool },
}

#[derive(Clone, Debug, PartialEq)]
pub enum ImageChoice {
    Url(ImageRef),
    RandomFeatured,
    PictureOfTheDay,
}

#[derive(Clone, Debug, PartialEq)]
pub struct HostRequest {
    pub image: ImageChoice,
    /// Rough piece count; the grid is fitted to the image aspect.
    pub piece_count: u32,
    pub seed: u32,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Intent {
    Host(HostRequest),
    Join(PuzzleId),
}

#[derive(Clone, Debug, PartialEq)]
pub enum Outgoing {
    Text(ClientText),
    Binary(Vec<u8>),
}

#[derive(Clone, Debug, PartialEq)]
pub enum SessionEvent {
    PuzzleAssigned(PuzzleId),
    ImageSuggested(ImageRef),
    /// Pieces can only be cut once the image size is known; answer with
    /// [`Session::materialize`].
    ImageRequired(ImageRef),
    Ready { dims: GridDims },
    PiecesJoined { a: PieceId, b: PieceId },
    PositionsUpdated(Vec<PieceId>),
    Solved,
    Disconnected,
}

/// Snapshot of a session for inspection and tests.
#[derive(Clone, Debug, PartialEq)]
pub struct SessionSummary {
    pub phase: Phase,
    pub puzzle_id: Option<PuzzleId>,
    pub image: Option<ImageRef>,
    pub topology: Option<Topology>,
    pub state: Option<PieceState>,
    pub group_count: usize,
    pub dirty_count: usize,
    pub in_flight: Option<u32>,
}

#[derive(Clone, Debug)]
struct Puzzle {
    board: Board,
    image: ImageRef,
    metrics: PieceMetrics,
}

#[derive(Clone, Copy, Debug)]
struct Drag {
    piece: PieceId,
    last: (f32, f32),
}

#[derive(Debug)]
pub struct Session {
    config: SyncConfig,
    viewport: Viewport,
    phase: Phase,
    puzzle_id: Option<PuzzleId>,
    host_request: Option<HostRequest>,
    awaiting_suggestion: bool,
    host_image_size: Option<(u32, u32)>,
    upload_on_id: bool,
    pending: Option<InitFrame>,
    puzzle: Option<Puzzle>,
    drag: Option<Drag>,
    dirty: Vec<bool>,
    unacked: Vec<bool>,
    in_flight: Option<u32>,
    next_message_id: u32,
    last_token: u32,
    outgoing: Vec<Outgoing>,
    events: Vec<SessionEvent>,
}

impl Session {
    pub fn new(config: SyncConfig, viewport: Viewport) -> Self {
        Self {
            config,
            viewport,
            phase: Phase::Disconnected,
            puzzle_id: None,
            host_request: None,
            awaiting_suggestion: false,
            host_image_size: None,
            upload_on_id: false,
            pending: None,
            puzzle: None,
            drag: None,
            dirty: Vec::new(),
            unacked: Vec::new(),
            in_flight: None,
            next_message_id: 1,
            last_token: 0,
            outgoing: Vec::new(),
            events: Vec::new(),
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn puzzle_id(&self) -> Option<&PuzzleId> {
        self.puzzle_id.as_ref()
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    pub fn board(&self) -> Option<&Board> {
        self.puzzle.as_ref().map(|puzzle| &puzzle.board)
    }

    pub fn piece_metrics(&self) -> Option<PieceMetrics> {
        self.puzzle.as_ref().map(|puzzle| puzzle.metrics)
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.iter().any(|&dirty| dirty)
    }

    pub fn in_flight_token(&self) -> Option<u32> {
        self.in_flight
    }

    pub fn take_outgoing(&mut self) -> Vec<Outgoing> {
        std::mem::take(&mut self.outgoing)
    }

    pub fn take_events(&mut self) -> Vec<SessionEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            phase: self.phase,
            puzzle_id: self.puzzle_id.clone(),
            image: self.puzzle.as_ref().map(|puzzle| puzzle.image.clone()),
            topology: self.board().map(|board| board.topology().clone()),
            state: self.board().map(Board::state),
            group_count: self
                .board()
                .map_or(0, |board| board.connectivity().group_count()),
            dirty_count: self.dirty.iter().filter(|&&dirty| dirty).count(),
            in_flight: self.in_flight,
        }
    }

    pub fn connect(&mut self) {
        self.phase = Phase::Connecting;
    }

    /// The socket is open: ask the authority for a puzzle.
    pub fn on_open(&mut self, intent: Intent) {
        self.phase = Phase::AwaitingInit;
        match intent {
            Intent::Join(id) => {
                info!("joining puzzle {id}");
                self.outgoing.push(Outgoing::Text(ClientText::Join(id.clone())));
                self.puzzle_id = Some(id);
            }
            Intent::Host(request) => {
                match &request.image {
                    ImageChoice::Url(image) => {
                        self.events.push(SessionEvent::ImageRequired(image.clone()));
                    }
                    ImageChoice::RandomFeatured => {
                        self.awaiting_suggestion = true;
                        self.outgoing.push(Outgoing::Text(ClientText::RandomFeatured));
                    }
                    ImageChoice::PictureOfTheDay => {
                        self.awaiting_suggestion = true;
                        self.outgoing.push(Outgoing::Text(ClientText::PictureOfTheDay));
                    }
                }
                self.host_request = Some(request);
            }
        }
    }

    /// Channel closed: everything local is discarded, nothing is replayed.
    pub fn on_close(&mut self) {
        if self.phase != Phase::Disconnected {
            info!("session disconnected");
        }
        if !self.outgoing.is_empty() {
            warn!("discarding {} unsent messages", self.outgoing.len());
        }
        self.phase = Phase::Disconnected;
        self.puzzle_id = None;
        self.puzzle = None;
        self.pending = None;
        self.host_request = None;
        self.host_image_size = None;
        self.awaiting_suggestion = false;
        self.upload_on_id = false;
        self.drag = None;
        self.dirty.clear();
        self.unacked.clear();
        self.in_flight = None;
        self.last_token = 0;
        self.outgoing.clear();
        self.events.push(SessionEvent::Disconnected);
    }

    pub fn on_text(&mut self, text: &str) -> Result<(), SessionError> {
        match text.parse::<ServerText>()? {
            ServerText::Id(id) => self.on_puzzle_id(id),
            ServerText::Ack(token) => self.on_ack(token),
            ServerText::Error(message) => return Err(SessionError::RequestRejected(message)),
            ServerText::UseImage(image) => {
                if !self.awaiting_suggestion {
                    debug!("ignoring unsolicited image suggestion {image}");
                    return Ok(());
                }
                self.awaiting_suggestion = false;
                if let Some(request) = self.host_request.as_mut() {
                    request.image = ImageChoice::Url(image.clone());
                }
                self.events.push(SessionEvent::ImageSuggested(image.clone()));
                self.events.push(SessionEvent::ImageRequired(image));
            }
        }
        Ok(())
    }

    pub fn on_binary(&mut self, bytes: &[u8]) -> Result<(), SessionError> {
        match peek_opcode(bytes)? {
            OP_INIT => self.on_init(bytes),
            OP_UPDATE => self.on_update(bytes),
            op => Err(SessionError::ProtocolViolation(format!("unknown opcode {op}"))),
        }
    }

    /// Second half of the two-phase init: the image size is known, cut the
    /// pieces.
    pub fn materialize(&mut self, image_size: (u32, u32)) -> Result<(), SessionError> {
        if let Some(frame) = self.pending.take() {
            let InitFrame {
                dims,
                nibs,
                image,
                state,
            } = frame;
            let mut puzzle = self.build_puzzle(dims, &nibs, image, image_size)?;
            puzzle.board.load_state(&state);
            self.install(puzzle, false);
            return Ok(());
        }
        let Some(request) = self.host_request.take() else {
            return Err(SessionError::ProtocolViolation(
                "no puzzle waiting for an image".into(),
            ));
        };
        let image = match &request.image {
            ImageChoice::Url(image) => image.clone(),
            _ => {
                self.host_request = Some(request);
                return Err(SessionError::ProtocolViolation(
                    "image not chosen yet".into(),
                ));
            }
        };
        let dims = match choose_grid(image_size.0, image_size.1, request.piece_count) {
            Ok(dims) => dims,
            Err(err) => {
                // A corrected image size may retry.
                self.host_request = Some(request);
                return Err(err.into());
            }
        };
        match self.config.nib_mode {
            NibMode::RunningSeed => {
                let nibs = NibSource::Running { seed: request.seed };
                let mut puzzle = self.build_puzzle(dims, &nibs, image.clone(), image_size)?;
                let positions =
                    scatter_positions(dims, &mut Lcg::new(request.seed ^ SCATTER_SALT));
                puzzle.board.set_positions(&positions);
                self.install(puzzle, true);
                self.upload_on_id = true;
                self.outgoing.push(Outgoing::Text(ClientText::New {
                    cols: dims.cols,
                    rows: dims.rows,
                    image,
                    seed: Some(request.seed),
                }));
            }
            NibMode::EdgeSeeds => {
                self.host_image_size = Some(image_size);
                self.outgoing.push(Outgoing::Text(ClientText::New {
                    cols: dims.cols,
                    rows: dims.rows,
                    image,
                    seed: None,
                }));
            }
        }
        info!("hosting {}x{} puzzle", dims.cols, dims.rows);
        Ok(())
    }

    /// Local input. Anything that does not apply right now is ignored.
    pub fn handle_action(&mut self, action: CoreAction) {
        match action {
            CoreAction::BeginDrag { piece_id, x, y } => self.begin_drag(piece_id, (x, y)),
            CoreAction::DragMove { x, y } => self.drag_move((x, y)),
            CoreAction::DragEnd => self.drag_end(),
            CoreAction::ScalePieces { grow } => {
                let factor = if grow {
                    PIECE_SCALE_STEP
                } else {
                    1.0 / PIECE_SCALE_STEP
                };
                let viewport = self.viewport;
                if let Some(puzzle) = self.puzzle.as_mut() {
                    puzzle.metrics = puzzle.metrics.scaled(factor);
                    puzzle
                        .board
                        .set_piece_size(puzzle.metrics.canonical_size(viewport));
                }
            }
            CoreAction::Resize { viewport } => {
                self.viewport = viewport;
                if let Some(puzzle) = self.puzzle.as_mut() {
                    puzzle
                        .board
                        .set_piece_size(puzzle.metrics.canonical_size(viewport));
                }
            }
        }
    }

    /// Periodic work: poll the authority and flush pending moves.
    pub fn tick(&mut self) {
        if !matches!(self.phase, Phase::Active { .. }) || self.puzzle_id.is_none() {
            return;
        }
        self.outgoing.push(Outgoing::Text(ClientText::Poll));
        self.flush_moves();
    }

    fn build_puzzle(
        &self,
        dims: GridDims,
        nibs: &NibSource,
        image: ImageRef,
        image_size: (u32, u32),
    ) -> Result<Puzzle, SessionError> {
        let topology = Topology::generate(dims, nibs)?;
        let metrics = fit_piece_metrics(self.viewport, dims, image_size);
        let board = Board::new(topology, metrics.canonical_size(self.viewport));
        Ok(Puzzle {
            board,
            image,
            metrics,
        })
    }

    fn install(&mut self, puzzle: Puzzle, dirty: bool) {
        let total = puzzle.board.piece_count();
        let dims = puzzle.board.dims();
        let solved = puzzle.board.is_solved();
        self.dirty = vec![dirty; total];
        self.unacked = vec![false; total];
        self.in_flight = None;
        self.puzzle = Some(puzzle);
        self.phase = Phase::Active { solved };
        info!("puzzle ready: {}x{} ({total} pieces)", dims.cols, dims.rows);
        self.events.push(SessionEvent::Ready { dims });
        if solved {
            self.events.push(SessionEvent::Solved);
        }
    }

    fn on_puzzle_id(&mut self, id: PuzzleId) {
        info!("puzzle id {id}");
        self.puzzle_id = Some(id.clone());
        self.events.push(SessionEvent::PuzzleAssigned(id));
        if !std::mem::take(&mut self.upload_on_id) {
            return;
        }
        // Locally generated board: the authority only has scattered
        // positions, so send ours and every group we already formed.
        self.flush_moves();
        let Some(puzzle) = self.puzzle.as_ref() else {
            return;
        };
        let connectivity = puzzle.board.connectivity();
        let mut batch = ActionBatch::new(NO_ACK);
        for id in 0..connectivity.total() {
            let rep = connectivity.representative_of(id);
            if rep != id {
                batch.actions.push(Action::Connect { a: rep, b: id });
            }
        }
        if !batch.is_empty() {
            self.outgoing.push(Outgoing::Binary(batch.encode()));
        }
    }

    fn on_ack(&mut self, token: Option<u32>) {
        let Some(in_flight) = self.in_flight else {
            debug!("ack with nothing in flight");
            return;
        };
        if token.is_some_and(|token| token != in_flight) {
            debug!("ack {token:?} does not match in-flight batch {in_flight}");
            return;
        }
        self.unacked.iter_mut().for_each(|flag| *flag = false);
        self.in_flight = None;
    }

    fn on_init(&mut self, bytes: &[u8]) -> Result<(), SessionError> {
        if self.puzzle.is_some() {
            debug!("ignoring INIT for an existing board");
            return Ok(());
        }
        if self.phase != Phase::AwaitingInit {
            return Err(SessionError::ProtocolViolation(
                "INIT before a host or join request".into(),
            ));
        }
        let frame = InitFrame::decode(bytes, self.config.nib_mode)?;
        if let Some(size) = self.host_image_size.take() {
            self.pending = Some(frame);
            return self.materialize(size);
        }
        self.events.push(SessionEvent::ImageRequired(frame.image.clone()));
        self.pending = Some(frame);
        Ok(())
    }

    fn on_update(&mut self, bytes: &[u8]) -> Result<(), SessionError> {
        let Some(dims) = self.board().map(Board::dims) else {
            return Err(SessionError::ProtocolViolation(
                "UPDATE before INIT".into(),
            ));
        };
        let frame = UpdateFrame::decode(bytes, dims)?;
        if frame.token != 0 && frame.token < self.last_token {
            debug!("dropping stale update {} < {}", frame.token, self.last_token);
            return Ok(());
        }
        self.last_token = self.last_token.max(frame.token);
        let epsilon = self.config.min_update_distance;
        let drag = self.drag;
        let Some(puzzle) = self.puzzle.as_mut() else {
            return Ok(());
        };
        let board = &mut puzzle.board;
        if board.apply_connectivity(&frame.state.connectivity) {
            board.derive_all();
        }
        let mut blocked = vec![false; board.piece_count()];
        for group in board.connectivity().groups() {
            let dragged = drag.is_some_and(|drag| group.contains(&drag.piece));
            let edited = group
                .iter()
                .any(|&id| self.dirty[id] || self.unacked[id]);
            if dragged || edited {
                blocked[group[0]] = true;
            }
        }
        let moved = board.apply_positions(&frame.state, epsilon, |rep| blocked[rep]);
        if !moved.is_empty() {
            self.events.push(SessionEvent::PositionsUpdated(moved));
        }
        self.check_solved();
        Ok(())
    }

    fn begin_drag(&mut self, piece: PieceId, at: (f32, f32)) {
        if !matches!(self.phase, Phase::Active { .. }) {
            return;
        }
        let Some(puzzle) = self.puzzle.as_mut() else {
            return;
        };
        if !puzzle.board.connectivity().contains(piece) {
            return;
        }
        puzzle.board.raise_group(piece);
        self.drag = Some(Drag { piece, last: at });
    }

    fn drag_move(&mut self, at: (f32, f32)) {
        let Some(drag) = self.drag.as_mut() else {
            return;
        };
        let Some(puzzle) = self.puzzle.as_mut() else {
            return;
        };
        let delta = (
            (at.0 - drag.last.0) / self.viewport.width,
            (at.1 - drag.last.1) / self.viewport.height,
        );
        puzzle
            .board
            .translate_group(drag.piece, delta, self.config.play_region);
        drag.last = at;
    }

    fn drag_end(&mut self) {
        let Some(drag) = self.drag.take() else {
            return;
        };
        let joined = self.snap_group(drag.piece);
        let Some(puzzle) = self.puzzle.as_ref() else {
            return;
        };
        for &id in puzzle.board.connectivity().members(drag.piece) {
            self.dirty[id] = true;
        }
        if joined.is_empty() {
            return;
        }
        let mut batch = ActionBatch::new(NO_ACK);
        for &(a, b) in &joined {
            self.events.push(SessionEvent::PiecesJoined { a, b });
            batch.actions.push(Action::Connect { a, b });
        }
        if self.puzzle_id.is_some() {
            self.outgoing.push(Outgoing::Binary(batch.encode()));
        }
        self.check_solved();
    }

    /// Tests every member of `piece`'s group against its grid neighbours
    /// and merges those whose facing key points are within the connect
    /// radius. Members that join mid-way are tested too.
    fn snap_group(&mut self, piece: PieceId) -> Vec<(PieceId, PieceId)> {
        let viewport = self.viewport;
        let radius = self.config.connect_radius_px;
        let Some(puzzle) = self.puzzle.as_mut() else {
            return Vec::new();
        };
        let metrics = puzzle.metrics;
        let board = &mut puzzle.board;
        let dims = board.dims();
        let mut visited = vec![false; board.piece_count()];
        let mut joined = Vec::new();
        while !board.is_solved() {
            let next = board
                .connectivity()
                .members(piece)
                .iter()
                .copied()
                .find(|&id| !visited[id]);
            let Some(member) = next else {
                break;
            };
            visited[member] = true;
            for dir in SNAP_ORDER {
                let Some(neighbour) = dims.neighbor(member, dir) else {
                    continue;
                };
                if board.connectivity().same_group(member, neighbour) {
                    continue;
                }
                let (Some(mine), Some(theirs)) =
                    (board.position(member), board.position(neighbour))
                else {
                    continue;
                };
                let (a, b) = edge_key_points(
                    PieceBox::at(mine, viewport, metrics),
                    PieceBox::at(theirs, viewport, metrics),
                    grid_step(member, neighbour, dims.cols()),
                    metrics.nib_size,
                );
                let (dx, dy) = (a.0 - b.0, a.1 - b.1);
                if dx * dx + dy * dy < radius * radius && board.merge(member, neighbour, true) {
                    joined.push((member, neighbour));
                }
            }
        }
        joined
    }

    fn flush_moves(&mut self) {
        if self.in_flight.is_some() {
            return;
        }
        let Some(puzzle) = self.puzzle.as_ref() else {
            return;
        };
        let message_id = self.next_message_id;
        let mut batch = ActionBatch::new(message_id);
        for (id, dirty) in self.dirty.iter_mut().enumerate() {
            if !*dirty {
                continue;
            }
            let Some((x, y)) = puzzle.board.position(id) else {
                continue;
            };
            batch.actions.push(Action::Move { piece: id, x, y });
            *dirty = false;
            self.unacked[id] = true;
        }
        if batch.is_empty() {
            return;
        }
        self.next_message_id = self.next_message_id.wrapping_add(1).max(1);
        self.in_flight = Some(message_id);
        debug!("flushing {} moves as batch {message_id}", batch.actions.len());
        self.outgoing.push(Outgoing::Binary(batch.encode()));
    }

    fn check_solved(&mut self) {
        let solved = self.board().is_some_and(Board::is_solved);
        if solved && self.phase == (Phase::Active { solved: false }) {
            info!("puzzle solved");
            self.phase = Phase::Active { solved: true };
            self.events.push(SessionEvent::Solved);
        }
    }
}
