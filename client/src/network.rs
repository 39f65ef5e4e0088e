//! Client connection lifecycle, reconnect policy, and inbound dispatch
//!
//! `ClientSession` holds the protocol bookkeeping (status, own identity,
//! reconnect decision) with no I/O so it can be exercised directly.
//! `NetworkAdapter` wraps it in a background task that owns the WebSocket.

use futures::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use serde_json::Value;
use shared::{
    ClientMessage, MovementState, PlayerState, PlayerSummary, ServerMessage, SignalKind, Vec3,
    RECONNECT_DELAY_MS,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc::error::{TryRecvError, TrySendError};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    /// Rejected at capacity; no automatic retry follows
    Full,
}

/// Connection status as shown to the player
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdapterStatus {
    pub status: ConnectionStatus,
    pub reconnect_pending: bool,
}

impl AdapterStatus {
    pub fn disconnected() -> Self {
        Self {
            status: ConnectionStatus::Disconnected,
            reconnect_pending: false,
        }
    }

    pub fn text(&self) -> &'static str {
        match (self.status, self.reconnect_pending) {
            (ConnectionStatus::Connecting, _) => "Connecting...",
            (ConnectionStatus::Connected, _) => "Connected",
            (ConnectionStatus::Disconnected, true) => "Disconnected - reconnecting...",
            (ConnectionStatus::Disconnected, false) => "Disconnected",
            (ConnectionStatus::Full, _) => "Server full",
        }
    }
}

/// Notifications delivered to the game layer
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    StatusChanged(AdapterStatus),
    Welcome {
        your_id: String,
        players: Vec<PlayerSummary>,
    },
    PlayerJoined(PlayerSummary),
    PlayerLeft {
        id: String,
    },
    /// Remote players only; the local player's own entry is removed
    State {
        players: Vec<PlayerState>,
    },
    ServerFull,
    Signal {
        kind: SignalKind,
        from_id: String,
        payload: Value,
    },
}

/// Synchronous protocol state for one logical client
#[derive(Debug)]
pub struct ClientSession {
    name: String,
    my_id: Option<String>,
    status: ConnectionStatus,
    auto_reconnect: bool,
}

impl ClientSession {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            my_id: None,
            status: ConnectionStatus::Disconnected,
            auto_reconnect: false,
        }
    }

    pub fn begin_connect(&mut self) {
        self.status = ConnectionStatus::Connecting;
        self.auto_reconnect = true;
        self.my_id = None;
    }

    /// Called once the socket opens; the join request goes out immediately
    pub fn on_open(&self) -> ClientMessage {
        ClientMessage::Join {
            name: self.name.clone(),
        }
    }

    pub fn on_message(&mut self, message: ServerMessage) -> Option<ClientEvent> {
        match message {
            ServerMessage::Welcome { your_id, players } => {
                info!("Joined as {}", your_id);
                self.my_id = Some(your_id.clone());
                self.status = ConnectionStatus::Connected;
                Some(ClientEvent::Welcome { your_id, players })
            }
            ServerMessage::PlayerJoined { id, name, color } => {
                Some(ClientEvent::PlayerJoined(PlayerSummary { id, name, color }))
            }
            ServerMessage::PlayerLeft { id } => Some(ClientEvent::PlayerLeft { id }),
            ServerMessage::State { players } => Some(ClientEvent::State {
                players: self.filter_own(players),
            }),
            ServerMessage::ServerFull {} => {
                warn!("Server is full");
                self.status = ConnectionStatus::Full;
                self.auto_reconnect = false;
                Some(ClientEvent::ServerFull)
            }
            ServerMessage::RtcOffer { from_id, offer } => Some(ClientEvent::Signal {
                kind: SignalKind::Offer,
                from_id,
                payload: offer,
            }),
            ServerMessage::RtcAnswer { from_id, answer } => Some(ClientEvent::Signal {
                kind: SignalKind::Answer,
                from_id,
                payload: answer,
            }),
            ServerMessage::RtcIce { from_id, candidate } => Some(ClientEvent::Signal {
                kind: SignalKind::Candidate,
                from_id,
                payload: candidate,
            }),
        }
    }

    fn filter_own(&self, players: Vec<PlayerState>) -> Vec<PlayerState> {
        match &self.my_id {
            Some(my_id) => players.into_iter().filter(|p| &p.id != my_id).collect(),
            None => players,
        }
    }

    /// Records a closed connection; returns whether a reconnect should follow
    pub fn on_close(&mut self) -> bool {
        self.my_id = None;
        if self.status != ConnectionStatus::Full {
            self.status = ConnectionStatus::Disconnected;
        }
        self.auto_reconnect
    }

    /// Explicit disconnect: no automatic reconnect afterwards
    pub fn disconnect(&mut self) {
        self.status = ConnectionStatus::Disconnected;
        self.auto_reconnect = false;
        self.my_id = None;
    }

    pub fn adapter_status(&self) -> AdapterStatus {
        AdapterStatus {
            status: self.status,
            reconnect_pending: self.status == ConnectionStatus::Disconnected
                && self.auto_reconnect,
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub fn my_id(&self) -> Option<&str> {
        self.my_id.as_deref()
    }
}

#[derive(Debug, Clone)]
pub struct AdapterConfig {
    /// WebSocket URL, e.g. `ws://127.0.0.1:8080`
    pub url: String,
    pub reconnect_delay: Duration,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:8080".to_string(),
            reconnect_delay: Duration::from_millis(RECONNECT_DELAY_MS),
        }
    }
}

/// Outgoing messages the adapter may queue before further sends are dropped
pub const OUTGOING_CAPACITY: usize = 64;

/// Requests from the adapter to its driver task
#[derive(Debug)]
enum Command {
    Send(ClientMessage),
    Disconnect,
}

/// Outbound connection to the state-sync server
///
/// Sends are fire-and-forget and are dropped unless the client has joined.
/// Only the driver task writes the status; the adapter reads it.
pub struct NetworkAdapter {
    config: AdapterConfig,
    commands: Option<mpsc::Sender<Command>>,
    driver: Option<JoinHandle<()>>,
    events: mpsc::UnboundedSender<ClientEvent>,
    status: Arc<watch::Sender<AdapterStatus>>,
}

impl NetworkAdapter {
    pub fn new(config: AdapterConfig) -> (Self, mpsc::UnboundedReceiver<ClientEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let (status, _) = watch::channel(AdapterStatus::disconnected());

        let adapter = NetworkAdapter {
            config,
            commands: None,
            driver: None,
            events,
            status: Arc::new(status),
        };
        (adapter, events_rx)
    }

    /// Starts connecting as `name`, replacing any existing connection
    pub async fn connect(&mut self, name: &str) {
        self.disconnect().await;

        let (commands_tx, commands_rx) = mpsc::channel(OUTGOING_CAPACITY);
        let driver = Driver {
            url: self.config.url.clone(),
            reconnect_delay: self.config.reconnect_delay,
            session: ClientSession::new(name),
            commands: commands_rx,
            events: self.events.clone(),
            status: Arc::clone(&self.status),
        };

        self.commands = Some(commands_tx);
        self.driver = Some(tokio::spawn(driver.run()));
    }

    /// Closes the connection and cancels any pending reconnect
    ///
    /// Returns once the driver has published its final status.
    pub async fn disconnect(&mut self) {
        if let Some(commands) = self.commands.take() {
            // A full queue still ends the driver once the sender is dropped
            let _ = commands.try_send(Command::Disconnect);
        }
        if let Some(driver) = self.driver.take() {
            if let Err(e) = driver.await {
                error!("Connection task failed: {}", e);
            }
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status.borrow().status
    }

    pub fn status_text(&self) -> &'static str {
        self.status.borrow().text()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<AdapterStatus> {
        self.status.subscribe()
    }

    fn send(&self, message: ClientMessage) -> bool {
        if self.status() != ConnectionStatus::Connected {
            return false;
        }
        let Some(commands) = &self.commands else {
            return false;
        };
        match commands.try_send(Command::Send(message)) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                debug!("Outgoing queue is full, dropping message");
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    pub fn send_position(&self, position: Vec3, rotation_y: f32, state: MovementState) -> bool {
        self.send(ClientMessage::Position {
            x: position.x,
            y: position.y,
            z: position.z,
            rotation_y,
            state,
        })
    }

    pub fn send_swing(&self, active: bool, attach_point: Option<Vec3>) -> bool {
        self.send(ClientMessage::Swing {
            active,
            attach_point,
        })
    }

    pub fn send_settings(&self, name: Option<&str>, color: Option<&str>) -> bool {
        self.send(ClientMessage::Settings {
            name: name.map(str::to_string),
            color: color.map(str::to_string),
        })
    }

    pub fn send_signal(&self, kind: SignalKind, target_id: &str, payload: Value) -> bool {
        self.send(kind.into_client_message(target_id.to_string(), payload))
    }

    pub fn send_rtc_offer(&self, target_id: &str, offer: Value) -> bool {
        self.send_signal(SignalKind::Offer, target_id, offer)
    }

    pub fn send_rtc_answer(&self, target_id: &str, answer: Value) -> bool {
        self.send_signal(SignalKind::Answer, target_id, answer)
    }

    pub fn send_rtc_ice(&self, target_id: &str, candidate: Value) -> bool {
        self.send_signal(SignalKind::Candidate, target_id, candidate)
    }
}

/// Resolves once the adapter asks to stop, discarding sends made meanwhile
async fn wait_for_stop(commands: &mut mpsc::Receiver<Command>) {
    loop {
        match commands.recv().await {
            Some(Command::Send(_)) => debug!("Dropping outbound message while disconnected"),
            Some(Command::Disconnect) | None => return,
        }
    }
}

/// Background task owning the socket, the reconnect timer, and the status
struct Driver {
    url: String,
    reconnect_delay: Duration,
    session: ClientSession,
    commands: mpsc::Receiver<Command>,
    events: mpsc::UnboundedSender<ClientEvent>,
    status: Arc<watch::Sender<AdapterStatus>>,
}

impl Driver {
    async fn run(mut self) {
        loop {
            self.session.begin_connect();
            self.publish_status();

            info!("Connecting to {}...", self.url);
            let attempt = tokio::select! {
                result = tokio_tungstenite::connect_async(self.url.as_str()) => Some(result),
                _ = wait_for_stop(&mut self.commands) => None,
            };
            let stopped = match attempt {
                Some(Ok((ws, _))) => self.run_connection(ws).await,
                Some(Err(e)) => {
                    warn!("Failed to connect to {}: {}", self.url, e);
                    false
                }
                None => true,
            };
            if stopped {
                return self.stop();
            }

            let reconnect = self.session.on_close();
            self.publish_status();
            if !reconnect {
                debug!("Not reconnecting");
                wait_for_stop(&mut self.commands).await;
                return self.stop();
            }

            info!("Reconnecting in {:?}", self.reconnect_delay);
            let stopped = tokio::select! {
                _ = tokio::time::sleep(self.reconnect_delay) => false,
                _ = wait_for_stop(&mut self.commands) => true,
            };
            if stopped {
                return self.stop();
            }
        }
    }

    /// Runs one open socket; returns true if the adapter asked to stop
    async fn run_connection<S>(&mut self, ws: WebSocketStream<S>) -> bool
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let (mut ws_tx, mut ws_rx) = ws.split();

        // Anything queued before this socket opened is stale
        loop {
            match self.commands.try_recv() {
                Ok(Command::Send(_)) => continue,
                Ok(Command::Disconnect) | Err(TryRecvError::Disconnected) => return true,
                Err(TryRecvError::Empty) => break,
            }
        }

        match self.session.on_open().to_json() {
            Ok(json) => {
                if let Err(e) = ws_tx.send(Message::Text(json)).await {
                    warn!("Failed to send join request: {}", e);
                    return false;
                }
            }
            Err(e) => {
                error!("Failed to serialize join request: {}", e);
                return false;
            }
        }

        loop {
            tokio::select! {
                incoming = ws_rx.next() => {
                    match incoming {
                        Some(Ok(Message::Text(text))) => self.handle_text(&text),
                        Some(Ok(Message::Close(_))) | None => {
                            info!("Connection closed by server");
                            return false;
                        }
                        Some(Ok(_)) => {} // Binary, Ping, Pong
                        Some(Err(e)) => {
                            warn!("Connection error: {}", e);
                            return false;
                        }
                    }
                },

                command = self.commands.recv() => {
                    match command {
                        Some(Command::Send(message)) => match message.to_json() {
                            Ok(json) => {
                                if ws_tx.send(Message::Text(json)).await.is_err() {
                                    return false;
                                }
                            }
                            Err(e) => warn!("Failed to serialize outbound message: {}", e),
                        },
                        Some(Command::Disconnect) | None => {
                            let _ = ws_tx.send(Message::Close(None)).await;
                            return true;
                        }
                    }
                },
            }
        }
    }

    fn handle_text(&mut self, text: &str) {
        match ServerMessage::from_json(text) {
            Ok(message) => {
                let event = self.session.on_message(message);
                self.publish_status();
                if let Some(event) = event {
                    let _ = self.events.send(event);
                }
            }
            Err(e) => warn!("Dropping malformed server message: {}", e),
        }
    }

    fn stop(&mut self) {
        info!("Disconnected");
        self.session.disconnect();
        self.publish_status();
    }

    fn publish_status(&self) {
        let status = self.session.adapter_status();
        if self.status.send_replace(status) != status {
            debug!("Status: {}", status.text());
            let _ = self.events.send(ClientEvent::StatusChanged(status));
        }
    }
}
