use crate::domain::Event;
use crate::interface_adapters::auth::authorize;
use crate::interface_adapters::http::ErrorResponse;
use crate::interface_adapters::protocol::{decode, encode};
use crate::interface_adapters::state::AppState;
use crate::use_cases::{ConnectionId, RelayStats, WorldClosed, WorldHandle};

use axum::{
    Json,
    body::Bytes,
    extract::{
        State,
        ws::{CloseFrame, Message, Utf8Bytes, WebSocket, WebSocketUpgrade, close_code},
    },
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinError;
use tokio::time::{Instant, MissedTickBehavior, interval_at, timeout};
use tracing::{Instrument, debug, error, info, info_span, warn};

/// Per-connection limits and timers.
#[derive(Debug, Clone, Copy)]
pub struct ConnectionSettings {
    /// Deadline for one outbound write (a batch, a ping or a close frame).
    pub write_wait: Duration,
    /// Longest silence tolerated from the peer, pongs included.
    pub pong_wait: Duration,
    /// Keepalive ping period; must be shorter than `pong_wait`.
    pub ping_period: Duration,
    /// Largest inbound message accepted; bigger ones are fatal.
    pub max_message_size: usize,
    /// Capacity of the private outbound queue the hub fills.
    pub outbound_queue_capacity: usize,
}

#[derive(Debug)]
enum NetError {
    // Categorizes connection lifecycle failures so callers can decide policy.
    #[allow(dead_code)]
    Ws(axum::Error),
    #[allow(dead_code)]
    Serialization(serde_json::Error),
    ReadTimeout,
    WriteTimeout,
    UnsupportedFrame,
    WorldClosed,
    #[allow(dead_code)]
    Task(JoinError),
}

impl From<axum::Error> for NetError {
    fn from(e: axum::Error) -> Self {
        NetError::Ws(e)
    }
}

impl From<WorldClosed> for NetError {
    fn from(_: WorldClosed) -> Self {
        NetError::WorldClosed
    }
}

const LOG_THROTTLE: Duration = Duration::from_secs(2);

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    // Reject before anything is allocated for the connection.
    if let Err(e) = authorize(&headers, &state.auth_token) {
        info!(error = %e, "request without authorization");
        return (
            StatusCode::UNAUTHORIZED,
            Json(ErrorResponse::from(e)),
        )
            .into_response();
    }

    let max_message_size = state.connection.max_message_size;
    ws.max_message_size(max_message_size)
        .max_frame_size(max_message_size)
        .on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    // Separate connection id for correlating logs before/after a unit exists.
    let conn_id = state.conn_ids.allocate();
    let span = info_span!("conn", conn_id, unit_id = tracing::field::Empty);
    run_connection(socket, conn_id, state).instrument(span).await;
}

async fn run_connection(mut socket: WebSocket, conn_id: ConnectionId, state: Arc<AppState>) {
    let settings = state.connection;
    state.stats.connection_opened();

    // Joining registers the queue with the hub and broadcasts our Connect.
    let (outbound_tx, outbound_rx) = mpsc::channel(settings.outbound_queue_capacity);
    let joined = match state.world.join(conn_id, outbound_tx).await {
        Ok(joined) => joined,
        Err(e) => {
            error!(error = %e, "failed to add unit for connection");
            send_close(&mut socket, close_code::AWAY, "server shutting down", settings.write_wait)
                .await;
            state.stats.connection_closed();
            return;
        }
    };

    let unit_id = joined.unit.id.clone();
    tracing::Span::current().record("unit_id", unit_id.as_str());
    info!(units = joined.snapshot.len(), "client connected");

    let teardown = Teardown::new(
        conn_id,
        unit_id.clone(),
        state.world.clone(),
        state.stats.clone(),
    );

    // Init goes straight to the socket, ahead of everything already queued for us.
    let init = Event::Init {
        player_id: unit_id,
        units: joined.snapshot,
    };
    if let Err(e) = send_event(&mut socket, &init, settings.write_wait).await {
        warn!(error = ?e, "failed to send init snapshot");
        drop(socket);
        teardown.run().await;
        return;
    }

    let (sink, stream) = socket.split();
    let (close_tx, close_rx) = oneshot::channel::<CloseFrame>();
    let reader_ctx = ReadCtx {
        world: state.world.clone(),
        stats: state.stats.clone(),
        pong_wait: settings.pong_wait,
        msgs_in: 0,
        bytes_in: 0,
        dropped: 0,
        last_drop_log: Instant::now() - LOG_THROTTLE,
    };

    let mut writer = tokio::spawn(write_pump(sink, outbound_rx, close_rx, settings).in_current_span());
    let mut reader = tokio::spawn(read_pump(stream, reader_ctx).in_current_span());

    // Whichever pump stops first ends the connection; the other is stopped here.
    let outcome = tokio::select! {
        result = &mut reader => {
            let outcome = flatten(result);
            // Let the writer say goodbye, bounded by the write deadline.
            let _ = close_tx.send(close_frame_for(&outcome));
            if timeout(settings.write_wait, &mut writer).await.is_err() {
                writer.abort();
                let _ = writer.await;
            }
            outcome
        }
        result = &mut writer => {
            reader.abort();
            let _ = reader.await;
            flatten(result)
        }
    };

    // Both socket halves are dropped by now, so the connection is closed.
    match &outcome {
        Ok(()) => debug!("connection closed"),
        Err(e) => warn!(error = ?e, "connection closed with error"),
    }
    teardown.run().await;
}

fn flatten(result: Result<Result<(), NetError>, JoinError>) -> Result<(), NetError> {
    result.unwrap_or_else(|e| Err(NetError::Task(e)))
}

fn close_frame_for(outcome: &Result<(), NetError>) -> CloseFrame {
    let (code, reason) = match outcome {
        Ok(()) => (close_code::NORMAL, ""),
        Err(NetError::ReadTimeout) => (close_code::POLICY, "keepalive timeout"),
        Err(NetError::UnsupportedFrame) => (close_code::UNSUPPORTED, "binary messages not supported"),
        Err(NetError::WorldClosed) => (close_code::AWAY, "server shutting down"),
        Err(_) => (close_code::ERROR, "connection error"),
    };
    CloseFrame {
        code,
        reason: reason.into(),
    }
}

fn should_log(last: &mut Instant) -> bool {
    if last.elapsed() >= LOG_THROTTLE {
        *last = Instant::now();
        true
    } else {
        false
    }
}

async fn send_event(
    socket: &mut WebSocket,
    event: &Event,
    write_wait: Duration,
) -> Result<(), NetError> {
    let text = encode(event).map_err(NetError::Serialization)?;
    match timeout(write_wait, socket.send(Message::Text(text.into()))).await {
        Ok(result) => result.map_err(NetError::Ws),
        Err(_) => Err(NetError::WriteTimeout),
    }
}

async fn send_close(socket: &mut WebSocket, code: u16, reason: &'static str, write_wait: Duration) {
    let frame = CloseFrame {
        code,
        reason: reason.into(),
    };
    let _ = timeout(write_wait, socket.send(Message::Close(Some(frame)))).await;
}

struct ReadCtx {
    world: WorldHandle,
    stats: Arc<RelayStats>,
    pong_wait: Duration,
    msgs_in: u64,
    bytes_in: u64,
    dropped: u64,
    last_drop_log: Instant,
}

/// Reads frames until the peer goes away, relaying each valid event.
async fn read_pump(mut stream: SplitStream<WebSocket>, mut ctx: ReadCtx) -> Result<(), NetError> {
    let result = loop {
        // Any inbound frame, pongs included, refreshes the deadline.
        let incoming = match timeout(ctx.pong_wait, stream.next()).await {
            Ok(incoming) => incoming,
            Err(_) => break Err(NetError::ReadTimeout),
        };

        match incoming {
            Some(Ok(Message::Text(text))) => {
                ctx.msgs_in += 1;
                ctx.bytes_in += text.len() as u64;
                if let Err(e) = handle_text(&mut ctx, text).await {
                    break Err(e);
                }
            }
            Some(Ok(Message::Binary(_))) => break Err(NetError::UnsupportedFrame),
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
            Some(Ok(Message::Close(_))) | None => {
                info!("websocket closed");
                break Ok(());
            }
            // Oversized frames surface here as well.
            Some(Err(e)) => break Err(NetError::Ws(e)),
        }
    };

    debug!(
        msgs_in = ctx.msgs_in,
        bytes_in = ctx.bytes_in,
        dropped = ctx.dropped,
        "inbound pump stopped"
    );
    result
}

async fn handle_text(ctx: &mut ReadCtx, text: Utf8Bytes) -> Result<(), NetError> {
    let event = match decode(text.as_str()) {
        Ok(event) => event,
        Err(err) => {
            // Bad payloads cost the frame, not the connection.
            ctx.dropped += 1;
            let dropped_total = ctx.stats.frame_dropped();
            if should_log(&mut ctx.last_drop_log) {
                warn!(
                    error = %err,
                    bytes = text.len(),
                    dropped = ctx.dropped,
                    dropped_total,
                    "dropping undecodable frame"
                );
            }
            return Ok(());
        }
    };

    if is_server_only(&event) {
        ctx.stats.frame_rejected();
        if should_log(&mut ctx.last_drop_log) {
            warn!(
                kind = event.kind(),
                unit_id = event.unit_id(),
                "server-only event from client; dropping frame"
            );
        }
        return Ok(());
    }

    ctx.world.relay(event, text).await?;
    Ok(())
}

/// Init and Connect are only ever produced by the server.
fn is_server_only(event: &Event) -> bool {
    matches!(event, Event::Init { .. } | Event::Connect(_))
}

/// Writes queued frames and keepalive pings until the queue closes or the
/// connection is asked to shut down.
async fn write_pump(
    mut sink: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<Utf8Bytes>,
    mut close_rx: oneshot::Receiver<CloseFrame>,
    settings: ConnectionSettings,
) -> Result<(), NetError> {
    let mut ping = interval_at(Instant::now() + settings.ping_period, settings.ping_period);
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut msgs_out: u64 = 0;
    let mut bytes_out: u64 = 0;

    let result = loop {
        tokio::select! {
            queued = outbound.recv() => {
                let Some(first) = queued else {
                    // The hub closed the queue: this peer was evicted.
                    let frame = CloseFrame {
                        code: close_code::POLICY,
                        reason: "outbound queue overflow".into(),
                    };
                    let _ = timeout(settings.write_wait, sink.send(Message::Close(Some(frame)))).await;
                    break Ok(());
                };

                let batch = write_batch(&mut sink, &mut outbound, first, settings.outbound_queue_capacity);
                match timeout(settings.write_wait, batch).await {
                    Ok(Ok((count, bytes))) => {
                        msgs_out += count;
                        bytes_out += bytes;
                    }
                    Ok(Err(e)) => break Err(e),
                    Err(_) => break Err(NetError::WriteTimeout),
                }
            }
            _ = ping.tick() => {
                match timeout(settings.write_wait, sink.send(Message::Ping(Bytes::new()))).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => break Err(NetError::Ws(e)),
                    Err(_) => break Err(NetError::WriteTimeout),
                }
            }
            frame = &mut close_rx => {
                if let Ok(frame) = frame {
                    let _ = timeout(settings.write_wait, sink.send(Message::Close(Some(frame)))).await;
                }
                break Ok(());
            }
        }
    };

    debug!(msgs_out, bytes_out, "outbound pump stopped");
    result
}

async fn write_batch(
    sink: &mut SplitSink<WebSocket, Message>,
    outbound: &mut mpsc::Receiver<Utf8Bytes>,
    first: Utf8Bytes,
    limit: usize,
) -> Result<(u64, u64), NetError> {
    let mut count: u64 = 1;
    let mut bytes = first.len() as u64;
    sink.feed(Message::Text(first)).await?;

    // Coalesce whatever is already queued into a single flush.
    while (count as usize) < limit {
        let Ok(next) = outbound.try_recv() else {
            break;
        };
        count += 1;
        bytes += next.len() as u64;
        sink.feed(Message::Text(next)).await?;
    }

    sink.flush().await?;
    Ok((count, bytes))
}

/// Connection cleanup: unregister from the hub, drop the unit, broadcast its
/// Disconnect. Runs at most once however many times it is triggered.
struct Teardown {
    conn_id: ConnectionId,
    unit_id: String,
    world: WorldHandle,
    stats: Arc<RelayStats>,
    done: AtomicBool,
}

impl Teardown {
    fn new(
        conn_id: ConnectionId,
        unit_id: String,
        world: WorldHandle,
        stats: Arc<RelayStats>,
    ) -> Self {
        Self {
            conn_id,
            unit_id,
            world,
            stats,
            done: AtomicBool::new(false),
        }
    }

    /// Returns `false` when teardown already ran.
    async fn run(&self) -> bool {
        if self.done.swap(true, Ordering::AcqRel) {
            return false;
        }

        if let Err(e) = self.world.leave(self.conn_id, self.unit_id.clone()).await {
            warn!(error = %e, "world unavailable during teardown");
        }
        self.stats.connection_closed();
        info!("client disconnected");
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Arena, World};
    use crate::use_cases::Hub;

    fn spawn_world(stats: Arc<RelayStats>) -> WorldHandle {
        let hub = Hub::spawn(64, stats.clone());
        WorldHandle::spawn(
            World::authoritative(Arena::default()),
            hub,
            64,
            Duration::from_secs(60),
            stats,
        )
    }

    #[tokio::test]
    async fn when_teardown_is_triggered_twice_then_peers_see_one_disconnect() {
        let stats = Arc::new(RelayStats::default());
        let world = spawn_world(stats.clone());
        let (a_tx, mut a_rx) = mpsc::channel(16);
        let (b_tx, _b_rx) = mpsc::channel(16);
        world.join(1, a_tx).await.unwrap();
        let b = world.join(2, b_tx).await.unwrap();
        a_rx.recv().await.unwrap();
        a_rx.recv().await.unwrap();
        stats.connection_opened();

        let teardown = Teardown::new(2, b.unit.id.clone(), world.clone(), stats.clone());
        let (first, second) = tokio::join!(teardown.run(), teardown.run());

        assert!(first ^ second);
        let frame = a_rx.recv().await.unwrap();
        assert_eq!(
            decode(frame.as_str()).unwrap(),
            Event::Disconnect {
                unit_id: b.unit.id.clone()
            }
        );
        let units = world.snapshot().await.unwrap();
        assert!(!units.contains_key(&b.unit.id));
        assert!(a_rx.try_recv().is_err());
        assert_eq!(stats.snapshot().connections_live, 0);
    }

    #[test]
    fn when_reader_saw_binary_frame_then_close_frame_says_unsupported() {
        let frame = close_frame_for(&Err(NetError::UnsupportedFrame));

        assert_eq!(frame.code, close_code::UNSUPPORTED);
        assert_eq!(frame.reason.as_str(), "binary messages not supported");
    }

    #[test]
    fn when_client_sends_init_or_connect_then_event_is_server_only() {
        let unit = crate::domain::Unit::new("ghost", 1.0, 1.0, "elf_f");

        assert!(is_server_only(&Event::Connect(unit)));
        assert!(is_server_only(&Event::Init {
            player_id: "ghost".to_string(),
            units: Default::default(),
        }));
        assert!(!is_server_only(&Event::Idle {
            unit_id: "ghost".to_string()
        }));
        assert!(!is_server_only(&Event::Disconnect {
            unit_id: "ghost".to_string()
        }));
    }

    #[test]
    fn when_reader_timed_out_then_close_frame_is_policy() {
        let frame = close_frame_for(&Err(NetError::ReadTimeout));

        assert_eq!(frame.code, close_code::POLICY);
        assert_eq!(frame.reason.as_str(), "keepalive timeout");
    }

    #[test]
    fn when_peer_closed_cleanly_then_close_frame_is_normal() {
        let frame = close_frame_for(&Ok(()));

        assert_eq!(frame.code, close_code::NORMAL);
    }

    #[test]
    fn when_logging_twice_within_throttle_window_then_second_is_suppressed() {
        let mut last = Instant::now() - LOG_THROTTLE;

        assert!(should_log(&mut last));
        assert!(!should_log(&mut last));
    }
}
