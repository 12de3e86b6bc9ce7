//! Headless client: drives a [`Session`] over a real WebSocket.
//!
//! One task owns the session and the socket. Callers talk to it through a
//! [`ClientHandle`].

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use jigsaw_core::{
    CoreAction, Intent, Outgoing, Session, SessionError, SessionEvent, SessionSummary,
    SyncConfig, Viewport,
};
use log::{debug, info, warn};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use url::Url;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const COMMAND_QUEUE: usize = 64;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("websocket: {0}")]
    WebSocket(#[from] tungstenite::Error),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("client task stopped")]
    Closed,
    #[error("client task panicked: {0}")]
    Join(#[from] tokio::task::JoinError),
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub server: Url,
    pub intent: Intent,
    /// Pixel size reported for the puzzle image; there is no decoder here.
    pub image_size: (u32, u32),
    pub viewport: Viewport,
    pub sync: SyncConfig,
}

enum Command {
    Input(CoreAction),
    Inspect(oneshot::Sender<SessionSummary>),
    Shutdown,
}

pub struct ClientHandle {
    commands: mpsc::Sender<Command>,
    events: mpsc::UnboundedReceiver<SessionEvent>,
    task: JoinHandle<Result<(), ClientError>>,
}

impl ClientHandle {
    pub async fn send(&self, action: CoreAction) -> Result<(), ClientError> {
        self.commands
            .send(Command::Input(action))
            .await
            .map_err(|_| ClientError::Closed)
    }

    pub async fn summary(&self) -> Result<SessionSummary, ClientError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::Inspect(tx))
            .await
            .map_err(|_| ClientError::Closed)?;
        rx.await.map_err(|_| ClientError::Closed)
    }

    /// `None` once the client task has finished and every event was read.
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        self.events.recv().await
    }

    /// Skips events until `pick` returns something.
    pub async fn wait_for<T>(
        &mut self,
        mut pick: impl FnMut(&SessionEvent) -> Option<T>,
    ) -> Option<T> {
        while let Some(event) = self.events.recv().await {
            if let Some(found) = pick(&event) {
                return Some(found);
            }
        }
        None
    }

    pub async fn shutdown(self) -> Result<(), ClientError> {
        // The task may already be gone; its result says why.
        let _ = self.commands.send(Command::Shutdown).await;
        self.task.await?
    }
}

/// Opens the socket and starts the session task.
pub async fn connect(config: ClientConfig) -> Result<ClientHandle, ClientError> {
    let mut session = Session::new(config.sync.clone(), config.viewport);
    session.connect();
    let (ws, _response) = tokio_tungstenite::connect_async(config.server.as_str()).await?;
    info!("connected to {}", config.server);
    session.on_open(config.intent);

    let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE);
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let task = tokio::spawn(run(session, ws, config.image_size, command_rx, event_tx));
    Ok(ClientHandle {
        commands: command_tx,
        events: event_rx,
        task,
    })
}

async fn run(
    mut session: Session,
    ws: WsStream,
    image_size: (u32, u32),
    mut commands: mpsc::Receiver<Command>,
    events: mpsc::UnboundedSender<SessionEvent>,
) -> Result<(), ClientError> {
    let result = drive(&mut session, ws, image_size, &mut commands, &events).await;
    session.on_close();
    for event in session.take_events() {
        let _ = events.send(event);
    }
    result
}

/// Runs until either side closes or the socket fails; [`run`] tears down.
async fn drive(
    session: &mut Session,
    ws: WsStream,
    image_size: (u32, u32),
    commands: &mut mpsc::Receiver<Command>,
    events: &mpsc::UnboundedSender<SessionEvent>,
) -> Result<(), ClientError> {
    let (mut write, mut read) = ws.split();
    let mut ticker =
        tokio::time::interval(Duration::from_millis(session.config().flush_interval_ms.max(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        for message in drain(session, image_size, events) {
            write.send(message).await.map_err(connection_lost)?;
        }

        tokio::select! {
            frame = read.next() => match frame {
                Some(Ok(Message::Text(text))) => report(session.on_text(text.as_str())),
                Some(Ok(Message::Binary(bytes))) => report(session.on_binary(&bytes)),
                Some(Ok(Message::Close(frame))) => {
                    debug!("server closed: {frame:?}");
                    return Ok(());
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => return Err(connection_lost(err)),
                None => return Ok(()),
            },
            _ = ticker.tick() => session.tick(),
            command = commands.recv() => match command {
                Some(Command::Input(action)) => session.handle_action(action),
                Some(Command::Inspect(reply)) => {
                    let _ = reply.send(session.summary());
                }
                Some(Command::Shutdown) | None => {
                    for message in drain(session, image_size, events) {
                        write.send(message).await.map_err(connection_lost)?;
                    }
                    write
                        .send(Message::Close(None))
                        .await
                        .map_err(connection_lost)?;
                    return Ok(());
                }
            },
        }
    }
}

fn connection_lost(err: tungstenite::Error) -> ClientError {
    warn!("connection lost: {err}");
    ClientError::Session(SessionError::ConnectionLost)
}

/// Collects queued frames and forwards events, cutting pieces as soon as an
/// image is needed.
fn drain(
    session: &mut Session,
    image_size: (u32, u32),
    events: &mpsc::UnboundedSender<SessionEvent>,
) -> Vec<Message> {
    loop {
        let pending = session.take_events();
        if pending.is_empty() {
            break;
        }
        for event in pending {
            if let SessionEvent::ImageRequired(image) = &event {
                debug!("using {}x{} for {image}", image_size.0, image_size.1);
                report(session.materialize(image_size));
            }
            // Nobody listening is fine.
            let _ = events.send(event);
        }
    }
    session
        .take_outgoing()
        .into_iter()
        .map(|outgoing| match outgoing {
            Outgoing::Text(text) => Message::Text(text.to_string().into()),
            Outgoing::Binary(bytes) => Message::Binary(bytes.into()),
        })
        .collect()
}

fn report(result: Result<(), SessionError>) {
    match result {
        Ok(()) => {}
        Err(SessionError::RequestRejected(message)) => warn!("server rejected request: {message}"),
        Err(err) => warn!("ignoring frame: {err}"),
    }
}
