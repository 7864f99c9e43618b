// Shared helpers for spinning up a relay per test and talking to it over raw websockets.
#![allow(dead_code)]

use futures::{SinkExt, StreamExt};
use relay_server::RelaySettings;
use relay_server::domain::Event;
use relay_server::interface_adapters::protocol::decode;
use std::time::Duration;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

pub const TEST_TOKEN: &str = "test-token";
// Upper bound for any single expected frame; keeps failing tests from hanging.
pub const RECV_TIMEOUT: Duration = Duration::from_secs(3);

pub type Socket = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

// Settings used by most tests: the real defaults with a known token.
pub fn test_settings() -> RelaySettings {
    RelaySettings::new(TEST_TOKEN)
}

// Start a relay on an ephemeral port inside the current test runtime and return its ws url.
// Each test gets its own server so unit counts never leak between tests.
pub async fn spawn_server(settings: RelaySettings) -> String {
    // Bind to an ephemeral port to avoid collisions with local services.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral test port");
    let addr = listener.local_addr().expect("get local addr");
    tokio::spawn(async move {
        relay_server::run(listener, settings)
            .await
            .expect("server failed");
    });
    // The listener is already bound, so connects queue up until the server accepts.
    format!("ws://{addr}/ws")
}

// Open a websocket with the given Authorization header value, if any.
pub async fn try_connect(url: &str, token: Option<&str>) -> Result<Socket, tungstenite::Error> {
    let mut request = url.into_client_request()?;
    if let Some(token) = token {
        request.headers_mut().insert(
            AUTHORIZATION,
            HeaderValue::from_str(token).expect("token is a valid header"),
        );
    }
    let (socket, _) = tokio_tungstenite::connect_async(request).await?;
    Ok(socket)
}

pub async fn connect(url: &str) -> Socket {
    try_connect(url, Some(TEST_TOKEN))
        .await
        .expect("authorized connect should succeed")
}

// Next text message from the server, skipping control frames.
pub async fn next_text(socket: &mut Socket) -> String {
    loop {
        let message = tokio::time::timeout(RECV_TIMEOUT, socket.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("connection ended")
            .expect("websocket error");
        match message {
            Message::Text(text) => return text.as_str().to_string(),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected message: {other:?}"),
        }
    }
}

pub async fn next_event(socket: &mut Socket) -> Event {
    let text = next_text(socket).await;
    decode(&text).expect("server sent a valid event")
}

// Returns (player_id, unit count) from the Init frame that opens every session.
pub async fn expect_init(socket: &mut Socket) -> (String, usize) {
    match next_event(socket).await {
        Event::Init { player_id, units } => (player_id, units.len()),
        other => panic!("expected init, got {other:?}"),
    }
}

pub async fn send_event(socket: &mut Socket, event: &Event) {
    let text = relay_server::interface_adapters::protocol::encode(event).expect("encode event");
    socket
        .send(Message::Text(text.into()))
        .await
        .expect("send frame");
}

// Wait for the server's close frame, skipping everything before it.
pub async fn expect_close(socket: &mut Socket) -> Option<u16> {
    loop {
        let next = tokio::time::timeout(RECV_TIMEOUT, socket.next())
            .await
            .expect("timed out waiting for close");
        match next {
            Some(Ok(Message::Close(frame))) => return frame.map(|f| u16::from(f.code)),
            Some(Ok(_)) => continue,
            Some(Err(_)) | None => return None,
        }
    }
}

// Wait until the server ends the session by any means: close frame, transport error or EOF.
// A dropped socket can surface as a broken pipe when the client flushes a pending pong.
pub async fn expect_session_end(socket: &mut Socket, within: Duration) {
    let deadline = tokio::time::Instant::now() + within;
    loop {
        let next = tokio::time::timeout_at(deadline, socket.next())
            .await
            .expect("session was not ended in time");
        match next {
            Some(Ok(Message::Close(_))) | Some(Err(_)) | None => return,
            Some(Ok(_)) => continue,
        }
    }
}

// Pull events from a replica until one matches, failing after `within`.
pub async fn wait_for_event(
    replica: &mut relay_server::ReplicaClient,
    within: Duration,
    matches: impl Fn(&Event) -> bool,
) -> Event {
    let deadline = tokio::time::Instant::now() + within;
    loop {
        let event = tokio::time::timeout_at(deadline, replica.next_event())
            .await
            .expect("timed out waiting for event")
            .expect("replica connection ended");
        if matches(&event) {
            return event;
        }
    }
}
