//! Helpers shared by the root integration test targets

#![allow(dead_code)]

use futures::{SinkExt, StreamExt};
use server::network::{HealthStatus, Server, ServerConfig, ServerHandle};
use shared::{ClientMessage, ServerMessage};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout, Instant};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

pub const STEP_TIMEOUT: Duration = Duration::from_secs(3);

pub const HEALTH_REQUEST: &[u8] =
    b"GET /health HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n";

pub fn test_config(max_players: usize) -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        broadcast_interval: Duration::from_millis(20),
        max_players,
    }
}

/// Binds on an ephemeral port and runs the server in the background
pub async fn start_server(max_players: usize) -> (SocketAddr, ServerHandle) {
    let server = Server::bind(test_config(max_players))
        .await
        .expect("bind test server");
    let addr = server.local_addr();
    let handle = server.handle();
    tokio::spawn(server.run());
    (addr, handle)
}

/// Starts a server on a specific address, retrying while the old listener winds down
pub async fn restart_server_on(addr: SocketAddr, max_players: usize) -> ServerHandle {
    let config = ServerConfig {
        port: addr.port(),
        ..test_config(max_players)
    };

    for _ in 0..100 {
        if let Ok(server) = Server::bind(config.clone()).await {
            let handle = server.handle();
            tokio::spawn(server.run());
            return handle;
        }
        sleep(Duration::from_millis(20)).await;
    }
    panic!("could not rebind {}", addr);
}

pub fn ws_url(addr: SocketAddr) -> String {
    format!("ws://{}", addr)
}

/// Raw protocol client speaking JSON frames directly
pub struct RawClient {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl RawClient {
    pub async fn connect(addr: SocketAddr) -> Self {
        let (ws, _) = tokio_tungstenite::connect_async(ws_url(addr))
            .await
            .expect("websocket connect");
        Self { ws }
    }

    /// Connects and joins, returning the client with its assigned id and welcome roster
    pub async fn join(addr: SocketAddr, name: &str) -> (Self, String, Vec<shared::PlayerSummary>) {
        let mut client = Self::connect(addr).await;
        client
            .send(&ClientMessage::Join {
                name: name.to_string(),
            })
            .await;

        match client.next_non_state().await {
            Some(ServerMessage::Welcome { your_id, players }) => (client, your_id, players),
            other => panic!("Expected welcome, got {:?}", other),
        }
    }

    pub async fn send(&mut self, message: &ClientMessage) {
        let json = message.to_json().expect("serialize client message");
        self.send_text(&json).await;
    }

    pub async fn send_text(&mut self, text: &str) {
        self.ws
            .send(Message::Text(text.to_string()))
            .await
            .expect("send frame");
    }

    /// Next protocol message, or None once the server closes the socket
    pub async fn next_message(&mut self) -> Option<ServerMessage> {
        loop {
            let frame = timeout(STEP_TIMEOUT, self.ws.next())
                .await
                .expect("timed out waiting for a frame");
            match frame {
                Some(Ok(Message::Text(text))) => {
                    return Some(ServerMessage::from_json(&text).expect("valid server message"))
                }
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return None,
                Some(Ok(_)) => continue,
            }
        }
    }

    /// Skips periodic `state` broadcasts
    pub async fn next_non_state(&mut self) -> Option<ServerMessage> {
        loop {
            match self.next_message().await {
                Some(ServerMessage::State { .. }) => continue,
                other => return other,
            }
        }
    }

    /// Waits for a `state` snapshot satisfying `check`
    pub async fn wait_for_state<F>(&mut self, mut check: F) -> Vec<shared::PlayerState>
    where
        F: FnMut(&[shared::PlayerState]) -> bool,
    {
        let deadline = Instant::now() + STEP_TIMEOUT;
        while Instant::now() < deadline {
            if let Some(ServerMessage::State { players }) = self.next_message().await {
                if check(&players) {
                    return players;
                }
            }
        }
        panic!("no matching state snapshot before deadline");
    }

    pub async fn close(mut self) {
        let _ = self.ws.close(None).await;
    }
}

/// Performs `GET /health` over a plain TCP connection
pub async fn fetch_health(addr: SocketAddr) -> HealthStatus {
    fetch_health_in_parts(addr, &[HEALTH_REQUEST], Duration::ZERO).await
}

/// Writes the request in several pieces with a pause between each
pub async fn fetch_health_in_parts(
    addr: SocketAddr,
    parts: &[&[u8]],
    pause: Duration,
) -> HealthStatus {
    let mut stream = TcpStream::connect(addr).await.expect("connect for health");
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            sleep(pause).await;
        }
        stream.write_all(part).await.expect("write health request");
    }

    let mut response = String::new();
    timeout(STEP_TIMEOUT, stream.read_to_string(&mut response))
        .await
        .expect("timed out reading health response")
        .expect("read health response");

    assert!(response.starts_with("HTTP/1.1 200 OK"), "{}", response);
    assert!(
        response.to_ascii_lowercase().contains("content-type: application/json"),
        "{}",
        response
    );
    let body = response
        .split("\r\n\r\n")
        .nth(1)
        .expect("health response body");
    serde_json::from_str(body).expect("health body is JSON")
}

/// Polls `/health` until the player count matches
pub async fn wait_for_player_count(addr: SocketAddr, expected: usize) -> HealthStatus {
    let deadline = Instant::now() + STEP_TIMEOUT;
    loop {
        let health = fetch_health(addr).await;
        if health.players == expected || Instant::now() >= deadline {
            return health;
        }
        sleep(Duration::from_millis(20)).await;
    }
}

/// Waits for the first adapter event satisfying `matches`, skipping others
pub async fn wait_for_event<F>(
    events: &mut tokio::sync::mpsc::UnboundedReceiver<client::network::ClientEvent>,
    mut matches: F,
) -> client::network::ClientEvent
where
    F: FnMut(&client::network::ClientEvent) -> bool,
{
    let deadline = Instant::now() + STEP_TIMEOUT;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match timeout(remaining, events.recv()).await {
            Ok(Some(event)) if matches(&event) => return event,
            Ok(Some(_)) => continue,
            Ok(None) => panic!("adapter event channel closed"),
            Err(_) => panic!("timed out waiting for adapter event"),
        }
    }
}
