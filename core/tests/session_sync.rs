use jigsaw_core::wire::{Action, ActionBatch, InitFrame, UpdateFrame};
use jigsaw_core::{
    ClientText, CoreAction, GridDims, HostRequest, ImageChoice, ImageRef, Intent, NibMode,
    NibSource, Outgoing, Phase, PieceState, PuzzleId, Session, SessionError, SessionEvent,
    SyncConfig, Viewport,
};

const VIEW: f32 = 1000.0;

fn image() -> ImageRef {
    ImageRef::new("https://example.org/p.jpg", Some("https://example.org".into()))
}

fn init_frame(cols: u8, rows: u8, positions: Vec<(f32, f32)>) -> InitFrame {
    InitFrame {
        dims: GridDims::new(cols, rows).unwrap(),
        nibs: NibSource::Running { seed: 5 },
        image: image(),
        state: PieceState::scattered(positions),
    }
}

fn joined(frame: &InitFrame) -> Session {
    let mut session = Session::new(SyncConfig::default(), Viewport::new(VIEW, VIEW));
    session.connect();
    session.on_open(Intent::Join(PuzzleId::parse("abcdefg").unwrap()));
    assert_eq!(
        session.take_outgoing(),
        vec![Outgoing::Text(ClientText::Join(PuzzleId::parse("abcdefg").unwrap()))]
    );
    assert_eq!(session.phase(), Phase::AwaitingInit);
    session.on_binary(&frame.encode()).unwrap();
    session
        .materialize((200 * frame.dims.cols as u32, 200 * frame.dims.rows as u32))
        .unwrap();
    session.take_events();
    session
}

fn update(token: u32, positions: Vec<(f32, f32)>) -> Vec<u8> {
    UpdateFrame {
        token,
        state: PieceState::scattered(positions),
    }
    .encode()
}

fn binaries(outgoing: &[Outgoing]) -> Vec<ActionBatch> {
    outgoing
        .iter()
        .filter_map(|msg| match msg {
            Outgoing::Binary(bytes) => Some(ActionBatch::decode(bytes).unwrap()),
            Outgoing::Text(_) => None,
        })
        .collect()
}

fn pos(session: &Session, id: usize) -> (f32, f32) {
    session.board().unwrap().position(id).unwrap()
}

/// Drags `piece` so it sits `nudge` pixels away from exactly right of `left`.
fn drag_next_to(session: &mut Session, piece: usize, left: usize, nudge: (f32, f32)) {
    let width = session.board().unwrap().piece_size().0;
    let from = pos(session, piece);
    let to = pos(session, left);
    let target = (to.0 + width, to.1);
    let start = (from.0 * VIEW, from.1 * VIEW);
    session.handle_action(CoreAction::BeginDrag {
        piece_id: piece,
        x: start.0,
        y: start.1,
    });
    session.handle_action(CoreAction::DragMove {
        x: start.0 + (target.0 - from.0) * VIEW + nudge.0,
        y: start.1 + (target.1 - from.1) * VIEW + nudge.1,
    });
    session.handle_action(CoreAction::DragEnd);
}

#[test]
fn dragging_within_radius_joins_two_pieces() {
    let frame = init_frame(2, 2, vec![(0.1, 0.1), (0.7, 0.1), (0.1, 0.8), (0.8, 0.8)]);
    let mut session = joined(&frame);
    drag_next_to(&mut session, 1, 0, (3.0, 2.0));

    let summary = session.summary();
    assert_eq!(summary.group_count, 3);
    assert_eq!(summary.phase, Phase::Active { solved: false });
    let board = session.board().unwrap();
    assert!(board.connectivity().same_group(0, 1));
    assert_eq!(board.connectivity().representative_of(0), 1);
    let (rep, member) = (pos(&session, 1), pos(&session, 0));
    assert_eq!(member, (rep.0 - board.piece_size().0, rep.1));

    let events = session.take_events();
    assert!(events.contains(&SessionEvent::PiecesJoined { a: 1, b: 0 }));
    assert!(!events.contains(&SessionEvent::Solved));
    let batches = binaries(&session.take_outgoing());
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].message_id, 0);
    assert_eq!(batches[0].actions, vec![Action::Connect { a: 1, b: 0 }]);
}

#[test]
fn dragging_outside_radius_joins_nothing() {
    let frame = init_frame(2, 1, vec![(0.1, 0.1), (0.7, 0.1)]);
    let mut session = joined(&frame);
    drag_next_to(&mut session, 1, 0, (12.0, 0.0));
    assert_eq!(session.summary().group_count, 2);
    assert!(session.is_dirty());
    assert!(binaries(&session.take_outgoing()).is_empty());
}

#[test]
fn last_join_solves_the_puzzle() {
    let frame = init_frame(2, 1, vec![(0.1, 0.1), (0.7, 0.4)]);
    let mut session = joined(&frame);
    drag_next_to(&mut session, 1, 0, (-1.0, 1.0));
    assert_eq!(session.phase(), Phase::Active { solved: true });
    assert!(session.take_events().contains(&SessionEvent::Solved));
}

#[test]
fn update_skips_groups_with_local_edits() {
    let frame = init_frame(2, 2, vec![(0.1, 0.1), (0.7, 0.1), (0.1, 0.8), (0.8, 0.8)]);
    let mut session = joined(&frame);

    session.handle_action(CoreAction::BeginDrag {
        piece_id: 0,
        x: 100.0,
        y: 100.0,
    });
    session.handle_action(CoreAction::DragMove { x: 150.0, y: 100.0 });
    session.handle_action(CoreAction::DragEnd);
    let local = pos(&session, 0);

    session
        .on_binary(&update(1, vec![(0.3, 0.3), (0.7, 0.1), (0.1, 0.8), (0.2, 0.2)]))
        .unwrap();
    assert_eq!(pos(&session, 0), local);
    assert_eq!(pos(&session, 3), (0.2, 0.2));

    // Flushed but not acknowledged: still protected.
    session.tick();
    let token = session.in_flight_token().unwrap();
    let sent = binaries(&session.take_outgoing());
    assert_eq!(
        sent[0].actions,
        vec![Action::Move {
            piece: 0,
            x: local.0,
            y: local.1
        }]
    );
    session
        .on_binary(&update(2, vec![(0.3, 0.3), (0.7, 0.1), (0.1, 0.8), (0.2, 0.2)]))
        .unwrap();
    assert_eq!(pos(&session, 0), local);

    session.on_text(&format!("ack {token}")).unwrap();
    assert_eq!(session.in_flight_token(), None);
    session
        .on_binary(&update(3, vec![(0.3, 0.3), (0.7, 0.1), (0.1, 0.8), (0.2, 0.2)]))
        .unwrap();
    assert_eq!(pos(&session, 0), (0.3, 0.3));
}

#[test]
fn update_ignores_tiny_moves_and_stale_tokens() {
    let frame = init_frame(2, 1, vec![(0.1, 0.1), (0.7, 0.1)]);
    let mut session = joined(&frame);
    session
        .on_binary(&update(5, vec![(0.105, 0.1), (0.5, 0.5)]))
        .unwrap();
    assert_eq!(pos(&session, 0), (0.1, 0.1));
    assert_eq!(pos(&session, 1), (0.5, 0.5));
    session
        .on_binary(&update(4, vec![(0.1, 0.1), (0.9, 0.9)]))
        .unwrap();
    assert_eq!(pos(&session, 1), (0.5, 0.5));
}

#[test]
fn update_merges_remote_groups() {
    let frame = init_frame(2, 1, vec![(0.1, 0.1), (0.7, 0.1)]);
    let mut session = joined(&frame);
    let bytes = UpdateFrame {
        token: 1,
        state: PieceState {
            positions: vec![(0.3, 0.3), (0.0, 0.0)],
            connectivity: vec![0, 0],
        },
    }
    .encode();
    session.on_binary(&bytes).unwrap();
    let width = session.board().unwrap().piece_size().0;
    assert_eq!(pos(&session, 0), (0.3, 0.3));
    assert_eq!(pos(&session, 1), (0.3 + width, 0.3));
    assert_eq!(session.phase(), Phase::Active { solved: true });
}

#[test]
fn update_before_init_is_a_protocol_violation() {
    let mut session = Session::new(SyncConfig::default(), Viewport::new(VIEW, VIEW));
    session.connect();
    session.on_open(Intent::Join(PuzzleId::parse("abcdefg").unwrap()));
    let err = session.on_binary(&update(1, vec![(0.0, 0.0)])).unwrap_err();
    assert!(matches!(err, SessionError::ProtocolViolation(_)));
    assert_eq!(session.phase(), Phase::AwaitingInit);
}

#[test]
fn malformed_frames_are_reported_and_ignored() {
    let frame = init_frame(2, 1, vec![(0.1, 0.1), (0.7, 0.1)]);
    let mut session = joined(&frame);
    let mut bytes = update(1, vec![(0.4, 0.4), (0.6, 0.6)]);
    let short = &bytes[..bytes.len() - 1];
    assert!(matches!(
        session.on_binary(short),
        Err(SessionError::MalformedFrame(_))
    ));
    assert!(matches!(
        session.on_binary(&[9, 0, 0, 0]),
        Err(SessionError::ProtocolViolation(_))
    ));
    assert!(session.on_text("bogus").is_err());
    bytes[0] = 2;
    session.on_binary(&bytes).unwrap();
    assert_eq!(pos(&session, 1), (0.6, 0.6));
}

#[test]
fn only_one_move_batch_in_flight() {
    let frame = init_frame(2, 1, vec![(0.1, 0.1), (0.7, 0.1)]);
    let mut session = joined(&frame);
    session.tick();
    assert_eq!(
        session.take_outgoing(),
        vec![Outgoing::Text(ClientText::Poll)]
    );

    session.handle_action(CoreAction::BeginDrag { piece_id: 1, x: 0.0, y: 0.0 });
    session.handle_action(CoreAction::DragMove { x: 0.0, y: 50.0 });
    session.handle_action(CoreAction::DragEnd);
    session.tick();
    assert_eq!(binaries(&session.take_outgoing()).len(), 1);
    let first = session.in_flight_token().unwrap();

    session.handle_action(CoreAction::BeginDrag { piece_id: 0, x: 0.0, y: 0.0 });
    session.handle_action(CoreAction::DragMove { x: 0.0, y: 50.0 });
    session.handle_action(CoreAction::DragEnd);
    session.tick();
    assert!(binaries(&session.take_outgoing()).is_empty());
    assert_eq!(session.in_flight_token(), Some(first));

    session.on_text("ack 999").unwrap();
    assert_eq!(session.in_flight_token(), Some(first));
    session.on_text("ack").unwrap();
    session.tick();
    let batches = binaries(&session.take_outgoing());
    assert_eq!(batches.len(), 1);
    assert_ne!(batches[0].message_id, first);
    assert!(matches!(batches[0].actions[0], Action::Move { piece: 0, .. }));
}

#[test]
fn running_seed_host_uploads_on_id() {
    let mut session = Session::new(SyncConfig::default(), Viewport::new(VIEW, VIEW));
    session.connect();
    session.on_open(Intent::Host(HostRequest {
        image: ImageChoice::Url(image()),
        piece_count: 12,
        seed: 77,
    }));
    assert!(session
        .take_events()
        .contains(&SessionEvent::ImageRequired(image())));
    session.materialize((400, 300)).unwrap();
    let summary = session.summary();
    let dims = summary.topology.as_ref().unwrap().dims();
    assert_eq!((dims.cols, dims.rows), (4, 3));
    assert_eq!(summary.dirty_count, 12);
    assert_eq!(
        session.take_outgoing(),
        vec![Outgoing::Text(ClientText::New {
            cols: 4,
            rows: 3,
            image: image(),
            seed: Some(77),
        })]
    );

    // The echoed INIT is ignored and polling waits for an id.
    let echo = InitFrame {
        dims,
        nibs: NibSource::Running { seed: 77 },
        image: image(),
        state: PieceState::scattered(vec![(0.0, 0.0); 12]),
    };
    session.on_binary(&echo.encode()).unwrap();
    session.tick();
    assert!(session.take_outgoing().is_empty());

    session.on_text("id: xyz2345").unwrap();
    assert!(session
        .take_events()
        .contains(&SessionEvent::PuzzleAssigned(PuzzleId::parse("xyz2345").unwrap())));
    let batches = binaries(&session.take_outgoing());
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].actions.len(), 12);
    assert!(batches[0].expects_ack());
}

#[test]
fn rejected_grid_keeps_the_host_request() {
    let mut session = Session::new(SyncConfig::default(), Viewport::new(VIEW, VIEW));
    session.connect();
    session.on_open(Intent::Host(HostRequest {
        image: ImageChoice::Url(image()),
        piece_count: 12,
        seed: 3,
    }));
    session.take_events();
    assert!(matches!(
        session.materialize((0, 300)),
        Err(SessionError::Topology(_))
    ));
    assert_eq!(session.phase(), Phase::AwaitingInit);
    assert!(session.take_outgoing().is_empty());

    session.materialize((400, 300)).unwrap();
    assert_eq!(session.phase(), Phase::Active { solved: false });
    assert!(matches!(
        session.take_outgoing().as_slice(),
        [Outgoing::Text(ClientText::New { seed: Some(3), .. })]
    ));
}

#[test]
fn edge_seed_host_builds_from_authority_init() {
    let config = SyncConfig {
        nib_mode: NibMode::EdgeSeeds,
        ..SyncConfig::default()
    };
    let mut session = Session::new(config, Viewport::new(VIEW, VIEW));
    session.connect();
    session.on_open(Intent::Host(HostRequest {
        image: ImageChoice::Url(image()),
        piece_count: 12,
        seed: 1,
    }));
    session.materialize((400, 300)).unwrap();
    assert_eq!(session.phase(), Phase::AwaitingInit);
    let sent = session.take_outgoing();
    assert!(matches!(
        &sent[..],
        [Outgoing::Text(ClientText::New { seed: None, cols: 4, rows: 3, .. })]
    ));

    session.on_text("id: xyz2345").unwrap();
    let dims = GridDims::new(4, 3).unwrap();
    let frame = InitFrame {
        dims,
        nibs: NibSource::PerEdge {
            seeds: jigsaw_core::topology::derive_edge_seeds(dims, 3),
        },
        image: image(),
        state: PieceState::scattered(vec![(0.3, 0.3); 12]),
    };
    session.on_binary(&frame.encode()).unwrap();
    assert_eq!(session.phase(), Phase::Active { solved: false });
    assert!(session
        .take_events()
        .contains(&SessionEvent::Ready { dims }));
    assert!(!session.is_dirty());
}

#[test]
fn suggested_image_and_rejections() {
    let mut session = Session::new(SyncConfig::default(), Viewport::new(VIEW, VIEW));
    session.connect();
    session.on_open(Intent::Host(HostRequest {
        image: ImageChoice::RandomFeatured,
        piece_count: 20,
        seed: 3,
    }));
    assert_eq!(
        session.take_outgoing(),
        vec![Outgoing::Text(ClientText::RandomFeatured)]
    );
    assert!(session.materialize((100, 100)).is_err());
    session
        .on_text("useImage https://w/x.jpg https://w/x")
        .unwrap();
    let suggested = ImageRef::new("https://w/x.jpg", Some("https://w/x".into()));
    let events = session.take_events();
    assert!(events.contains(&SessionEvent::ImageSuggested(suggested.clone())));
    assert!(events.contains(&SessionEvent::ImageRequired(suggested)));
    session.materialize((500, 400)).unwrap();

    assert_eq!(
        session.on_text("error too many players"),
        Err(SessionError::RequestRejected("too many players".into()))
    );
}

#[test]
fn close_tears_everything_down() {
    let frame = init_frame(2, 1, vec![(0.1, 0.1), (0.7, 0.1)]);
    let mut session = joined(&frame);
    session.handle_action(CoreAction::BeginDrag { piece_id: 0, x: 0.0, y: 0.0 });
    session.handle_action(CoreAction::DragMove { x: 5.0, y: 5.0 });
    session.handle_action(CoreAction::DragEnd);
    session.on_close();
    let summary = session.summary();
    assert_eq!(summary.phase, Phase::Disconnected);
    assert!(summary.state.is_none());
    assert_eq!(summary.dirty_count, 0);
    assert_eq!(session.take_events(), vec![SessionEvent::Disconnected]);
}

#[test]
fn resize_and_scale_keep_groups_together() {
    let frame = init_frame(2, 1, vec![(0.1, 0.1), (0.7, 0.4)]);
    let mut session = joined(&frame);
    let bytes = UpdateFrame {
        token: 1,
        state: PieceState {
            positions: vec![(0.2, 0.2), (0.0, 0.0)],
            connectivity: vec![0, 0],
        },
    }
    .encode();
    session.on_binary(&bytes).unwrap();
    session.handle_action(CoreAction::Resize {
        viewport: Viewport::new(2000.0, 1000.0),
    });
    let metrics = session.piece_metrics().unwrap();
    assert_eq!(pos(&session, 1), (0.2 + metrics.piece_width / 2000.0, 0.2));
    session.handle_action(CoreAction::ScalePieces { grow: true });
    let grown = session.piece_metrics().unwrap();
    assert!(grown.piece_width > metrics.piece_width);
    assert_eq!(pos(&session, 1), (0.2 + grown.piece_width / 2000.0, 0.2));
}
