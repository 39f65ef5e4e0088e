//! Server network layer: HTTP routing, WebSocket sessions, and the event loop
//!
//! One axum `Router` serves the listening port: `/` upgrades to a WebSocket
//! session and `/health` reports the joined player count.

use crate::broadcast::BroadcastLoop;
use crate::registry::Registry;
use crate::session::{outbound_channel, Outbound, OutboundFrame, SessionTable};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use futures::{SinkExt, StreamExt};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use shared::{BROADCAST_INTERVAL_MS, MAX_PLAYERS};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

type EventSender = mpsc::UnboundedSender<ServerEvent>;

/// Runtime parameters for the server
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub broadcast_interval: Duration,
    pub max_players: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            broadcast_interval: Duration::from_millis(BROADCAST_INTERVAL_MS),
            max_players: MAX_PLAYERS,
        }
    }
}

impl ServerConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Body of the `/health` response
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct HealthStatus {
    pub status: String,
    pub players: usize,
    #[serde(rename = "maxPlayers")]
    pub max_players: usize,
}

/// Messages sent from connection tasks to the server event loop
#[derive(Debug)]
pub enum ServerEvent {
    Connected {
        outbound: Outbound,
        reply: oneshot::Sender<String>,
    },
    TextReceived {
        id: String,
        text: String,
    },
    Disconnected {
        id: String,
    },
    HealthQuery {
        reply: oneshot::Sender<HealthStatus>,
    },
    Shutdown,
}

/// Cloneable handle for stopping a running server
#[derive(Clone)]
pub struct ServerHandle {
    events: EventSender,
}

impl ServerHandle {
    pub fn shutdown(&self) {
        let _ = self.events.send(ServerEvent::Shutdown);
    }
}

/// Authoritative server owning the registry and every session
///
/// All registry access happens inside `run`, one event at a time, so no lock
/// guards it.
pub struct Server {
    listener: Option<TcpListener>,
    local_addr: SocketAddr,
    registry: Registry,
    sessions: SessionTable,
    broadcast: BroadcastLoop,

    // Communication channels
    event_tx: EventSender,
    event_rx: mpsc::UnboundedReceiver<ServerEvent>,
}

impl Server {
    pub async fn bind(config: ServerConfig) -> Result<Self, BoxError> {
        let listener = TcpListener::bind(config.address()).await?;
        let local_addr = listener.local_addr()?;
        info!("Server listening on {}", local_addr);

        let (event_tx, event_rx) = mpsc::unbounded_channel();

        Ok(Server {
            listener: Some(listener),
            local_addr,
            registry: Registry::new(config.max_players),
            sessions: SessionTable::new(),
            broadcast: BroadcastLoop::new(config.broadcast_interval),
            event_tx,
            event_rx,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            events: self.event_tx.clone(),
        }
    }

    pub fn health(&self) -> HealthStatus {
        HealthStatus {
            status: "ok".to_string(),
            players: self.registry.len(),
            max_players: self.registry.max_players(),
        }
    }

    /// Spawns the HTTP server that answers health checks and WebSocket upgrades
    fn spawn_http(listener: TcpListener, events: EventSender) -> JoinHandle<()> {
        let app = build_router(events).into_make_service_with_connect_info::<SocketAddr>();
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                error!("HTTP server stopped: {}", e);
            }
        })
    }

    /// Applies one event from a connection task
    pub fn handle_event(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::Connected { outbound, reply } => {
                let id = self.sessions.open(outbound);
                if reply.send(id.clone()).is_err() {
                    self.sessions.close(&mut self.registry, &id);
                }
            }
            ServerEvent::TextReceived { id, text } => {
                self.sessions.handle_text(&mut self.registry, &id, &text);
            }
            ServerEvent::Disconnected { id } => {
                self.sessions.close(&mut self.registry, &id);
            }
            ServerEvent::HealthQuery { reply } => {
                let _ = reply.send(self.health());
            }
            ServerEvent::Shutdown => {}
        }
    }

    /// Main server loop coordinating connection events and broadcasts
    pub async fn run(mut self) -> Result<(), BoxError> {
        let listener = self.listener.take().ok_or("server is already running")?;
        let http = Self::spawn_http(listener, self.event_tx.clone());

        info!("Server started successfully");

        loop {
            tokio::select! {
                event = self.event_rx.recv() => {
                    match event {
                        Some(ServerEvent::Shutdown) | None => {
                            info!("Server shutting down");
                            break;
                        }
                        Some(event) => self.handle_event(event),
                    }
                },

                _ = self.broadcast.tick() => {
                    self.broadcast.run_tick(&self.registry, &self.sessions);
                },
            }
        }

        // Frees the port; open sessions close once their outbound senders drop
        http.abort();
        Ok(())
    }
}

fn build_router(events: EventSender) -> Router {
    Router::new()
        .route("/", get(upgrade))
        .route("/health", get(health))
        .with_state(events)
}

/// `GET /health`, answered by the event loop so the count matches the registry
async fn health(State(events): State<EventSender>) -> Response {
    let (reply_tx, reply_rx) = oneshot::channel();
    if events
        .send(ServerEvent::HealthQuery { reply: reply_tx })
        .is_err()
    {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }

    match reply_rx.await {
        Ok(status) => Json(status).into_response(),
        Err(_) => StatusCode::SERVICE_UNAVAILABLE.into_response(),
    }
}

async fn upgrade(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(events): State<EventSender>,
) -> Response {
    ws.on_upgrade(move |socket| async move {
        if let Err(e) = handle_socket(socket, addr, events).await {
            warn!("Connection from {} ended with error: {}", addr, e);
        }
    })
}

/// Drives one WebSocket session until either side closes it
async fn handle_socket(
    socket: WebSocket,
    addr: SocketAddr,
    events: EventSender,
) -> Result<(), BoxError> {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (out_tx, mut out_rx) = outbound_channel();

    let (reply_tx, reply_rx) = oneshot::channel();
    events
        .send(ServerEvent::Connected {
            outbound: out_tx,
            reply: reply_tx,
        })
        .map_err(|_| "server event loop stopped")?;
    let id = reply_rx.await?;
    info!("Connection {} opened from {}", id, addr);

    loop {
        tokio::select! {
            incoming = ws_rx.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        let event = ServerEvent::TextReceived { id: id.clone(), text };
                        if events.send(event).is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {} // Binary, Ping, Pong
                    Some(Err(e)) => {
                        warn!("Read error on {}: {}", id, e);
                        break;
                    }
                }
            },

            frame = out_rx.recv() => {
                match frame {
                    Some(OutboundFrame::Text(text)) => {
                        if let Err(e) = ws_tx.send(Message::Text(text.to_string())).await {
                            warn!("Write error on {}: {}", id, e);
                            break;
                        }
                    }
                    Some(OutboundFrame::Close) | None => {
                        let _ = ws_tx.send(Message::Close(None)).await;
                        break;
                    }
                }
            },
        }
    }

    info!("Connection {} closed", id);
    let _ = events.send(ServerEvent::Disconnected { id });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::ServerMessage;

    fn test_config() -> ServerConfig {
        ServerConfig {
            port: 0,
            ..ServerConfig::default()
        }
    }

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.address(), "127.0.0.1:8080");
        assert_eq!(config.broadcast_interval, Duration::from_millis(50));
        assert_eq!(config.max_players, 5);
    }

    #[test]
    fn test_health_status_wire_shape() {
        let status = HealthStatus {
            status: "ok".to_string(),
            players: 2,
            max_players: 5,
        };
        assert_eq!(
            serde_json::to_string(&status).unwrap(),
            r#"{"status":"ok","players":2,"maxPlayers":5}"#
        );
    }

    #[tokio::test]
    async fn test_health_handler_asks_event_loop() {
        let (events, mut event_rx) = mpsc::unbounded_channel();
        let answer = async move {
            match event_rx.recv().await {
                Some(ServerEvent::HealthQuery { reply }) => {
                    let _ = reply.send(HealthStatus {
                        status: "ok".to_string(),
                        players: 3,
                        max_players: 5,
                    });
                }
                other => panic!("Expected health query, got {:?}", other),
            }
        };

        let (response, ()) = tokio::join!(health(State(events)), answer);
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_health_handler_without_event_loop() {
        let (events, event_rx) = mpsc::unbounded_channel();
        drop(event_rx);

        let response = health(State(events)).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_events_drive_sessions() {
        let mut server = Server::bind(test_config()).await.unwrap();
        let (out_tx, mut out_rx) = outbound_channel();
        let (reply_tx, reply_rx) = oneshot::channel();

        server.handle_event(ServerEvent::Connected {
            outbound: out_tx,
            reply: reply_tx,
        });
        let id = reply_rx.await.unwrap();

        server.handle_event(ServerEvent::TextReceived {
            id: id.clone(),
            text: r#"{"type":"join","name":"Alice"}"#.to_string(),
        });
        match out_rx.try_recv().unwrap() {
            OutboundFrame::Text(text) => assert_eq!(
                ServerMessage::from_json(&text).unwrap(),
                ServerMessage::Welcome {
                    your_id: id.clone(),
                    players: vec![]
                }
            ),
            OutboundFrame::Close => panic!("Unexpected close"),
        }
        assert_eq!(server.health().players, 1);

        server.handle_event(ServerEvent::TextReceived {
            id: id.clone(),
            text: "garbage".to_string(),
        });
        assert_eq!(server.health().players, 1);

        let (health_tx, health_rx) = oneshot::channel();
        server.handle_event(ServerEvent::HealthQuery { reply: health_tx });
        assert_eq!(
            health_rx.await.unwrap(),
            HealthStatus {
                status: "ok".to_string(),
                players: 1,
                max_players: 5
            }
        );

        server.handle_event(ServerEvent::Disconnected { id });
        assert_eq!(server.health().players, 0);
    }

    #[tokio::test]
    async fn test_bind_to_ephemeral_port() {
        let server = Server::bind(test_config()).await.unwrap();
        assert_ne!(server.local_addr().port(), 0);
    }
}
