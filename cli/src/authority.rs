//! In-memory puzzle authority.
//!
//! Rooms live in one map behind a mutex. Every request is answered on the
//! connection it came from; nothing is pushed to other players, who catch up
//! by polling.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use futures_util::{SinkExt, StreamExt};
use jigsaw_core::grid::MAX_PIECES;
use jigsaw_core::layout::scatter_positions;
use jigsaw_core::protocol::PieceMove;
use jigsaw_core::topology::derive_edge_seeds;
use jigsaw_core::{
    Action, ActionBatch, ClientText, GridDims, ImageRef, InitFrame, Lcg, NibMode, NibSource,
    ParseError, PieceId, PieceState, PuzzleId, ServerText, TopologyError, UpdateFrame, WireError,
    PUZZLE_ID_ALPHABET, PUZZLE_ID_LEN,
};
use log::{debug, info, warn};
use rand::Rng;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{self, Message};

use crate::store::{self, StoreError, StoredRoom, StoredRooms};

pub const MAX_PLAYERS: usize = 20;
pub const MAX_IMAGE_LEN: usize = 255;
pub const MAX_MESSAGE_LEN: usize = 64 * 1024;
pub const ROOM_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, thiserror::Error)]
pub enum AuthorityError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("websocket: {0}")]
    WebSocket(#[from] tungstenite::Error),
    #[error("{0}")]
    Parse(#[from] ParseError),
    #[error("{0}")]
    Wire(#[from] WireError),
    #[error("{0}")]
    Topology(#[from] TopologyError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("haven't joined a puzzle")]
    NotJoined,
    #[error("puzzle {0} not found")]
    UnknownPuzzle(PuzzleId),
    #[error("too many players")]
    TooManyPlayers,
    #[error("too many pieces")]
    TooManyPieces,
    #[error("image URL too long")]
    ImageUrlTooLong,
    #[error("bad piece ID {0}")]
    BadPieceId(usize),
    #[error("no image available")]
    NoImage,
    #[error("message too large ({0} bytes)")]
    MessageTooLarge(usize),
}

impl AuthorityError {
    /// Request errors are reported to the client; the connection survives.
    pub fn is_request_error(&self) -> bool {
        !matches!(
            self,
            AuthorityError::Io(_) | AuthorityError::WebSocket(_) | AuthorityError::Store(_)
        )
    }
}

#[derive(Debug, Clone, Default)]
pub struct AuthorityConfig {
    pub nib_mode: NibMode,
    /// Candidates for `randomFeaturedWikimedia`, as `url[ link]` lines.
    pub featured: Vec<ImageRef>,
    pub picture_of_the_day: Option<ImageRef>,
    pub state_file: Option<PathBuf>,
}

impl AuthorityConfig {
    /// Reads a featured-image list: one `url [link]` per line, `#` comments.
    pub fn parse_featured(text: &str) -> Vec<ImageRef> {
        text.lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .filter_map(|line| {
                let mut parts = line.split_whitespace();
                let url = parts.next()?;
                Some(ImageRef::new(url, parts.next().map(str::to_string)))
            })
            .collect()
    }
}

#[derive(Debug, Clone)]
struct Room {
    dims: GridDims,
    nibs: NibSource,
    image: ImageRef,
    state: PieceState,
    created: SystemTime,
    revision: u32,
    players: usize,
}

impl Room {
    fn init_frame(&self) -> InitFrame {
        InitFrame {
            dims: self.dims,
            nibs: self.nibs.clone(),
            image: self.image.clone(),
            state: self.state.clone(),
        }
    }

    fn update_frame(&self) -> UpdateFrame {
        UpdateFrame {
            token: self.revision,
            state: self.state.clone(),
        }
    }

    fn check_piece(&self, piece: usize) -> Result<(), AuthorityError> {
        if piece < self.state.piece_count() {
            Ok(())
        } else {
            Err(AuthorityError::BadPieceId(piece))
        }
    }

    fn move_piece(&mut self, piece: PieceId, x: f32, y: f32) -> Result<(), AuthorityError> {
        self.check_piece(piece)?;
        self.state.positions[piece] = (x, y);
        self.revision = self.revision.wrapping_add(1);
        Ok(())
    }

    /// Every piece in `a`'s group joins `b`'s group.
    fn connect(&mut self, a: PieceId, b: PieceId) -> Result<(), AuthorityError> {
        self.check_piece(a)?;
        self.check_piece(b)?;
        let from = self.state.connectivity[a];
        let to = self.state.connectivity[b];
        for entry in &mut self.state.connectivity {
            if *entry == from {
                *entry = to;
            }
        }
        self.revision = self.revision.wrapping_add(1);
        Ok(())
    }

    fn to_stored(&self, id: &PuzzleId) -> StoredRoom {
        let (seed, edge_seeds) = match &self.nibs {
            NibSource::Running { seed } => (Some(*seed), Vec::new()),
            NibSource::PerEdge { seeds } => (None, seeds.clone()),
        };
        StoredRoom {
            id: id.to_string(),
            cols: self.dims.cols,
            rows: self.dims.rows,
            seed,
            edge_seeds,
            image: self.image.to_string(),
            positions: self
                .state
                .positions
                .iter()
                .flat_map(|&(x, y)| [x, y])
                .collect(),
            connectivity: self.state.connectivity.clone(),
            created_unix_secs: self
                .created
                .duration_since(UNIX_EPOCH)
                .map_or(0, |elapsed| elapsed.as_secs()),
            revision: self.revision,
        }
    }

    fn from_stored(stored: StoredRoom) -> Result<(PuzzleId, Room), AuthorityError> {
        let id = PuzzleId::parse(&stored.id).map_err(ParseError::from)?;
        let dims = GridDims::new(stored.cols, stored.rows)?;
        let nibs = match stored.seed {
            Some(seed) => NibSource::Running { seed },
            None => {
                if stored.edge_seeds.len() != dims.edge_count() {
                    return Err(TopologyError::NibSeedCount {
                        expected: dims.edge_count(),
                        found: stored.edge_seeds.len(),
                    }
                    .into());
                }
                NibSource::PerEdge {
                    seeds: stored.edge_seeds,
                }
            }
        };
        let positions: Vec<(f32, f32)> = stored
            .positions
            .chunks_exact(2)
            .map(|pair| (pair[0], pair[1]))
            .collect();
        if positions.len() != dims.piece_count()
            || stored.connectivity.len() != dims.piece_count()
        {
            return Err(WireError::BadDimensions {
                cols: dims.cols,
                rows: dims.rows,
            }
            .into());
        }
        let total = dims.piece_count();
        if let Some(&piece) = stored
            .connectivity
            .iter()
            .find(|&&piece| piece as usize >= total)
        {
            return Err(WireError::PieceOutOfRange {
                piece: piece as usize,
                total,
            }
            .into());
        }
        let room = Room {
            dims,
            nibs,
            image: ImageRef::parse(&stored.image)?,
            state: PieceState {
                positions,
                connectivity: stored.connectivity,
            },
            created: UNIX_EPOCH + Duration::from_secs(stored.created_unix_secs),
            revision: stored.revision,
            // Nobody is connected after a restart.
            players: 0,
        };
        Ok((id, room))
    }
}

pub struct Authority {
    config: AuthorityConfig,
    rooms: Mutex<HashMap<PuzzleId, Room>>,
}

impl Authority {
    pub fn new(config: AuthorityConfig) -> Self {
        Self {
            config,
            rooms: Mutex::new(HashMap::new()),
        }
    }

    /// Like [`Authority::new`], reloading rooms from the configured state file.
    pub fn restore(config: AuthorityConfig) -> Result<Self, AuthorityError> {
        let mut rooms = HashMap::new();
        if let Some(path) = config.state_file.as_deref() {
            if let Some(stored) = store::load(path)? {
                for room in stored.rooms {
                    match Room::from_stored(room) {
                        Ok((id, room)) => {
                            rooms.insert(id, room);
                        }
                        Err(err) => warn!("skipping stored room: {err}"),
                    }
                }
                info!("restored {} rooms from {}", rooms.len(), path.display());
            }
        }
        Ok(Self {
            config,
            rooms: Mutex::new(rooms),
        })
    }

    pub fn config(&self) -> &AuthorityConfig {
        &self.config
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.lock().await.len()
    }

    pub async fn player_count(&self, id: &PuzzleId) -> Option<usize> {
        self.rooms.lock().await.get(id).map(|room| room.players)
    }

    /// Accepts connections until the listener fails.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> Result<(), AuthorityError> {
        info!("authority listening on {}", listener.local_addr()?);
        loop {
            let (stream, peer) = listener.accept().await?;
            let authority = Arc::clone(&self);
            tokio::spawn(async move {
                match authority.handle_connection(stream).await {
                    Ok(()) => debug!("{peer} disconnected"),
                    Err(err) => debug!("{peer} dropped: {err}"),
                }
            });
        }
    }

    /// Hourly sweep of week-old rooms, persisting afterwards when a state
    /// file is configured.
    pub fn spawn_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let authority = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
            loop {
                ticker.tick().await;
                let removed = authority.sweep(SystemTime::now()).await;
                if removed > 0 {
                    info!("swept {removed} expired rooms");
                }
                if let Err(err) = authority.persist().await {
                    warn!("failed to persist rooms: {err}");
                }
            }
        })
    }

    /// Drops rooms created more than [`ROOM_TTL`] before `now`.
    pub async fn sweep(&self, now: SystemTime) -> usize {
        let mut rooms = self.rooms.lock().await;
        let before = rooms.len();
        rooms.retain(|_, room| match now.duration_since(room.created) {
            Ok(age) => age <= ROOM_TTL,
            Err(_) => true,
        });
        before - rooms.len()
    }

    pub async fn persist(&self) -> Result<(), AuthorityError> {
        let Some(path) = self.config.state_file.as_deref() else {
            return Ok(());
        };
        let snapshot = {
            let rooms = self.rooms.lock().await;
            StoredRooms::new(rooms.iter().map(|(id, room)| room.to_stored(id)).collect())
        };
        store::save(path, &snapshot)?;
        debug!("persisted {} rooms", snapshot.rooms.len());
        Ok(())
    }

    async fn handle_connection(&self, stream: TcpStream) -> Result<(), AuthorityError> {
        let ws = tokio_tungstenite::accept_async(stream).await?;
        let (mut write, mut read) = ws.split();
        let mut joined: Option<PuzzleId> = None;

        let result = async {
            while let Some(message) = read.next().await {
                let replies = match message? {
                    Message::Text(text) => self.handle_text(&mut joined, text.as_str()).await,
                    Message::Binary(bytes) => self.handle_binary(joined.as_ref(), &bytes).await,
                    Message::Close(_) => break,
                    _ => continue,
                };
                match replies {
                    Ok(replies) => {
                        for reply in replies {
                            write.send(reply).await?;
                        }
                    }
                    Err(err) if err.is_request_error() => {
                        debug!("request rejected: {err}");
                        let text = ServerText::Error(err.to_string()).to_string();
                        write.send(Message::Text(text.into())).await?;
                    }
                    Err(err) => return Err(err),
                }
            }
            Ok::<(), AuthorityError>(())
        }
        .await;

        self.leave(joined.take()).await;
        result
    }

    async fn leave(&self, joined: Option<PuzzleId>) {
        let Some(id) = joined else {
            return;
        };
        if let Some(room) = self.rooms.lock().await.get_mut(&id) {
            room.players = room.players.saturating_sub(1);
            debug!("player left {id}, {} remain", room.players);
        }
    }

    /// Handles one text frame and returns the replies for the sender.
    pub async fn handle_text(
        &self,
        joined: &mut Option<PuzzleId>,
        text: &str,
    ) -> Result<Vec<Message>, AuthorityError> {
        if text.len() > MAX_MESSAGE_LEN {
            return Err(AuthorityError::MessageTooLarge(text.len()));
        }
        match text.parse::<ClientText>()? {
            ClientText::New {
                cols,
                rows,
                image,
                seed,
            } => {
                let (id, frame) = self.create_room(cols, rows, image, seed).await?;
                self.leave(joined.replace(id.clone())).await;
                info!("created puzzle {id} ({cols}x{rows})");
                Ok(vec![
                    text_message(ServerText::Id(id)),
                    Message::Binary(frame.encode().into()),
                ])
            }
            ClientText::Join(id) => {
                if joined.as_ref() == Some(&id) {
                    let rooms = self.rooms.lock().await;
                    let room = rooms.get(&id).ok_or(AuthorityError::UnknownPuzzle(id))?;
                    return Ok(vec![Message::Binary(room.init_frame().encode().into())]);
                }
                let frame = {
                    let mut rooms = self.rooms.lock().await;
                    let room = rooms
                        .get_mut(&id)
                        .ok_or_else(|| AuthorityError::UnknownPuzzle(id.clone()))?;
                    if room.players >= MAX_PLAYERS {
                        return Err(AuthorityError::TooManyPlayers);
                    }
                    room.players += 1;
                    room.init_frame()
                };
                self.leave(joined.replace(id.clone())).await;
                debug!("player joined {id}");
                Ok(vec![Message::Binary(frame.encode().into())])
            }
            ClientText::Move(moves) => {
                self.with_room(joined.as_ref(), |room| apply_moves(room, &moves))
                    .await?;
                Ok(vec![text_message(ServerText::Ack(None))])
            }
            ClientText::Connect { a, b } => {
                self.with_room(joined.as_ref(), |room| room.connect(a, b))
                    .await?;
                Ok(Vec::new())
            }
            ClientText::Poll => {
                let frame = self
                    .with_room(joined.as_ref(), |room| Ok(room.update_frame()))
                    .await?;
                Ok(vec![Message::Binary(frame.encode().into())])
            }
            ClientText::RandomFeatured => {
                let featured = &self.config.featured;
                if featured.is_empty() {
                    return Err(AuthorityError::NoImage);
                }
                let pick = rand::rng().random_range(0..featured.len());
                Ok(vec![text_message(ServerText::UseImage(
                    featured[pick].clone(),
                ))])
            }
            ClientText::PictureOfTheDay => {
                let image = self
                    .config
                    .picture_of_the_day
                    .clone()
                    .ok_or(AuthorityError::NoImage)?;
                Ok(vec![text_message(ServerText::UseImage(image))])
            }
        }
    }

    /// Applies an action batch; acks it unless the message id is zero.
    pub async fn handle_binary(
        &self,
        joined: Option<&PuzzleId>,
        bytes: &[u8],
    ) -> Result<Vec<Message>, AuthorityError> {
        if bytes.len() > MAX_MESSAGE_LEN {
            return Err(AuthorityError::MessageTooLarge(bytes.len()));
        }
        let batch = ActionBatch::decode(bytes)?;
        self.with_room(joined, |room| {
            // Validate everything first so a bad batch changes nothing.
            for action in &batch.actions {
                match *action {
                    Action::Move { piece, .. } => room.check_piece(piece)?,
                    Action::Connect { a, b } => {
                        room.check_piece(a)?;
                        room.check_piece(b)?;
                    }
                }
            }
            for action in &batch.actions {
                match *action {
                    Action::Move { piece, x, y } => room.move_piece(piece, x, y)?,
                    Action::Connect { a, b } => room.connect(a, b)?,
                }
            }
            Ok(())
        })
        .await?;
        if batch.expects_ack() {
            Ok(vec![text_message(ServerText::Ack(Some(batch.message_id)))])
        } else {
            Ok(Vec::new())
        }
    }

    async fn with_room<T>(
        &self,
        joined: Option<&PuzzleId>,
        f: impl FnOnce(&mut Room) -> Result<T, AuthorityError>,
    ) -> Result<T, AuthorityError> {
        let id = joined.ok_or(AuthorityError::NotJoined)?;
        let mut rooms = self.rooms.lock().await;
        let room = rooms
            .get_mut(id)
            .ok_or_else(|| AuthorityError::UnknownPuzzle(id.clone()))?;
        f(room)
    }

    async fn create_room(
        &self,
        cols: u8,
        rows: u8,
        image: ImageRef,
        seed: Option<u32>,
    ) -> Result<(PuzzleId, InitFrame), AuthorityError> {
        if image.to_string().len() > MAX_IMAGE_LEN {
            return Err(AuthorityError::ImageUrlTooLong);
        }
        let dims = GridDims::new(cols, rows)?;
        if dims.piece_count() > MAX_PIECES {
            return Err(AuthorityError::TooManyPieces);
        }

        let mut rooms = self.rooms.lock().await;
        let mut rng = rand::rng();
        let nibs = match self.config.nib_mode {
            NibMode::RunningSeed => NibSource::Running {
                seed: seed.unwrap_or_else(|| rng.random()),
            },
            NibMode::EdgeSeeds => NibSource::PerEdge {
                seeds: match seed {
                    Some(seed) => derive_edge_seeds(dims, seed),
                    None => (0..dims.edge_count()).map(|_| rng.random()).collect(),
                },
            },
        };
        let positions = scatter_positions(dims, &mut Lcg::new(rng.random()));
        let room = Room {
            dims,
            nibs,
            image,
            state: PieceState::scattered(positions),
            created: SystemTime::now(),
            revision: 0,
            players: 1,
        };
        let frame = room.init_frame();
        let id = loop {
            let candidate = generate_puzzle_id(&mut rng)?;
            if !rooms.contains_key(&candidate) {
                break candidate;
            }
        };
        rooms.insert(id.clone(), room);
        Ok((id, frame))
    }
}

fn apply_moves(room: &mut Room, moves: &[PieceMove]) -> Result<(), AuthorityError> {
    for step in moves {
        room.check_piece(step.piece)?;
    }
    for step in moves {
        room.move_piece(step.piece, step.x, step.y)?;
    }
    Ok(())
}

fn text_message(text: ServerText) -> Message {
    Message::Text(text.to_string().into())
}

fn generate_puzzle_id(rng: &mut impl Rng) -> Result<PuzzleId, AuthorityError> {
    let alphabet = PUZZLE_ID_ALPHABET.as_bytes();
    let mut id = String::with_capacity(PUZZLE_ID_LEN);
    for _ in 0..PUZZLE_ID_LEN {
        let idx = rng.random_range(0..alphabet.len());
        id.push(alphabet[idx] as char);
    }
    PuzzleId::parse(&id).map_err(|err| AuthorityError::Parse(err.into()))
}
