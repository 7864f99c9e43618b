// Replica side of the relay: a websocket client that mirrors the authoritative
// world by applying every event the server broadcasts.

use crate::domain::{Direction, Event, World};
use crate::interface_adapters::protocol::{DecodeError, decode, encode};

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::fmt;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, RwLock, broadcast};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{AUTHORIZATION, InvalidHeaderValue};
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const EVENT_BUFFER: usize = 256;

#[derive(Debug)]
pub enum ReplicaError {
    Ws(tungstenite::Error),
    InvalidToken(InvalidHeaderValue),
    Decode(DecodeError),
    Serialization(serde_json::Error),
    /// The server closed the connection before sending the initial snapshot.
    HandshakeClosed,
    /// The first frame was not an Init event.
    UnexpectedFirstEvent(&'static str),
}

impl fmt::Display for ReplicaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReplicaError::Ws(e) => write!(f, "websocket error: {e}"),
            ReplicaError::InvalidToken(e) => write!(f, "token is not a valid header value: {e}"),
            ReplicaError::Decode(e) => write!(f, "bad frame from server: {e}"),
            ReplicaError::Serialization(e) => write!(f, "failed to encode event: {e}"),
            ReplicaError::HandshakeClosed => f.write_str("connection closed before init"),
            ReplicaError::UnexpectedFirstEvent(kind) => {
                write!(f, "expected init as first event, got {kind}")
            }
        }
    }
}

impl std::error::Error for ReplicaError {}

impl From<tungstenite::Error> for ReplicaError {
    fn from(e: tungstenite::Error) -> Self {
        ReplicaError::Ws(e)
    }
}

/// A connected replica. The mirrored world is updated in the background.
pub struct ReplicaClient {
    player_id: String,
    world: Arc<RwLock<World>>,
    sink: Mutex<SplitSink<WsStream, Message>>,
    events: broadcast::Receiver<Event>,
    reader: JoinHandle<()>,
}

impl ReplicaClient {
    /// Connects to `url` (e.g. `ws://127.0.0.1:3000/ws`) and waits for the
    /// initial snapshot before returning.
    pub async fn connect(url: &str, token: &str) -> Result<Self, ReplicaError> {
        let mut request = url.into_client_request()?;
        let value = HeaderValue::from_str(token).map_err(ReplicaError::InvalidToken)?;
        request.headers_mut().insert(AUTHORIZATION, value);

        let (socket, _response) = tokio_tungstenite::connect_async(request).await?;
        let (sink, mut stream) = socket.split();

        let mut world = World::replica();
        let init = first_event(&mut stream).await?;
        let Event::Init { player_id, .. } = &init else {
            return Err(ReplicaError::UnexpectedFirstEvent(init.kind()));
        };
        let player_id = player_id.clone();
        if let Err(e) = world.apply_event(init) {
            warn!(error = %e, "init snapshot not applied");
        }
        info!(%player_id, units = world.len(), "replica joined");

        let world = Arc::new(RwLock::new(world));
        let (events_tx, events) = broadcast::channel(EVENT_BUFFER);
        let reader = tokio::spawn(replica_reader(stream, world.clone(), events_tx));

        Ok(Self {
            player_id,
            world,
            sink: Mutex::new(sink),
            events,
            reader,
        })
    }

    /// Id of the unit the server spawned for this connection.
    pub fn player_id(&self) -> &str {
        &self.player_id
    }

    /// Shared view of the mirrored world.
    pub fn world(&self) -> Arc<RwLock<World>> {
        self.world.clone()
    }

    pub async fn send_move(&self, direction: Direction) -> Result<(), ReplicaError> {
        self.send_event(&Event::Move {
            unit_id: self.player_id.clone(),
            direction,
        })
        .await
    }

    pub async fn send_idle(&self) -> Result<(), ReplicaError> {
        self.send_event(&Event::Idle {
            unit_id: self.player_id.clone(),
        })
        .await
    }

    pub async fn send_event(&self, event: &Event) -> Result<(), ReplicaError> {
        let text = encode(event).map_err(ReplicaError::Serialization)?;
        self.sink.lock().await.send(Message::Text(text.into())).await?;
        Ok(())
    }

    /// Next event applied after the snapshot, or `None` once the connection is gone.
    pub async fn next_event(&mut self) -> Option<Event> {
        loop {
            match self.events.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(skipped, "replica event listener lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Sends a normal close frame and waits for the server to finish the handshake.
    pub async fn close(mut self) -> Result<(), ReplicaError> {
        let frame = CloseFrame {
            code: CloseCode::Normal,
            reason: "".into(),
        };
        let result = self.sink.lock().await.send(Message::Close(Some(frame))).await;
        let _ = (&mut self.reader).await;
        result.map_err(ReplicaError::from)
    }
}

impl Drop for ReplicaClient {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

async fn first_event(stream: &mut SplitStream<WsStream>) -> Result<Event, ReplicaError> {
    while let Some(message) = stream.next().await {
        match message? {
            Message::Text(text) => {
                // Init always arrives alone; anything batched behind it is queued later.
                let line = frames(text.as_str()).next().unwrap_or_default();
                return decode(line).map_err(ReplicaError::Decode);
            }
            Message::Close(_) => break,
            _ => {}
        }
    }
    Err(ReplicaError::HandshakeClosed)
}

async fn replica_reader(
    mut stream: SplitStream<WsStream>,
    world: Arc<RwLock<World>>,
    events: broadcast::Sender<Event>,
) {
    while let Some(message) = stream.next().await {
        match message {
            Ok(Message::Text(text)) => {
                for line in frames(text.as_str()) {
                    match decode(line) {
                        Ok(event) => {
                            if let Err(e) = world.write().await.apply_event(event.clone()) {
                                debug!(error = %e, "event not applied to replica");
                            }
                            let _ = events.send(event);
                        }
                        Err(e) => warn!(error = %e, "dropping undecodable frame from server"),
                    }
                }
            }
            Ok(Message::Close(frame)) => {
                debug!(?frame, "server closed the connection");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "replica read failed");
                break;
            }
        }
    }
}

/// Splits one websocket message into event frames. Peers may coalesce
/// several frames into one message, separated by newlines.
fn frames(text: &str) -> impl Iterator<Item = &str> {
    text.split('\n').map(str::trim).filter(|line| !line.is_empty())
}
