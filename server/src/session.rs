//! Per-connection protocol handling and the join/leave lifecycle
//!
//! Each connection gets a `PlayerSession` that moves through
//! `Connected -> Joined -> Closed` (or straight to `Closed` when the server is
//! full). The `SessionTable` owns all sessions and applies inbound messages to
//! the registry; it is driven exclusively by the server event loop.

use crate::registry::Registry;
use crate::relay::relay_signal;
use log::{debug, info, warn};
use rand::distributions::Alphanumeric;
use rand::Rng;
use shared::{sanitize_join_name, ClientMessage, ServerMessage, SignalKind, Vec3};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

const ID_LEN: usize = 12;

/// Frames queued for a connection's writer task
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundFrame {
    Text(Arc<str>),
    Close,
}

/// Frames a session may have queued before further sends are dropped
pub const OUTBOUND_CAPACITY: usize = 64;

pub type Outbound = mpsc::Sender<OutboundFrame>;

pub fn outbound_channel() -> (Outbound, mpsc::Receiver<OutboundFrame>) {
    mpsc::channel(OUTBOUND_CAPACITY)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Connected,
    Joined,
    Closed,
}

#[derive(Debug)]
pub struct PlayerSession {
    pub id: String,
    pub phase: SessionPhase,
    outbound: Outbound,
}

impl PlayerSession {
    pub fn new(id: String, outbound: Outbound) -> Self {
        Self {
            id,
            phase: SessionPhase::Connected,
            outbound,
        }
    }

    pub fn is_joined(&self) -> bool {
        self.phase == SessionPhase::Joined
    }

    /// Queues an already-serialized frame without waiting
    ///
    /// Returns false if the connection is gone or its queue is full; the
    /// frame is dropped in both cases.
    pub fn send_text(&self, text: Arc<str>) -> bool {
        match self.outbound.try_send(OutboundFrame::Text(text)) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                debug!("Outbound queue for {} is full, dropping frame", self.id);
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    pub fn send(&self, message: &ServerMessage) -> bool {
        match message.to_json() {
            Ok(json) => self.send_text(json.into()),
            Err(e) => {
                warn!("Failed to serialize message for {}: {}", self.id, e);
                false
            }
        }
    }

    fn close(&self) {
        if let Err(TrySendError::Full(_)) = self.outbound.try_send(OutboundFrame::Close) {
            warn!("Outbound queue for {} is full, close frame dropped", self.id);
        }
    }
}

/// All live connections, keyed by identity
#[derive(Default)]
pub struct SessionTable {
    sessions: HashMap<String, PlayerSession>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new connection and returns its freshly generated identity
    pub fn open(&mut self, outbound: Outbound) -> String {
        let id = self.generate_id();
        debug!("Session {} opened", id);
        self.sessions
            .insert(id.clone(), PlayerSession::new(id.clone(), outbound));
        id
    }

    fn generate_id(&self) -> String {
        let mut rng = rand::thread_rng();
        loop {
            let id: String = (&mut rng)
                .sample_iter(&Alphanumeric)
                .take(ID_LEN)
                .map(char::from)
                .collect();
            if !self.sessions.contains_key(&id) {
                return id;
            }
        }
    }

    /// Parses one text frame and handles it
    ///
    /// Malformed frames are logged and dropped; the session stays open.
    pub fn handle_text(&mut self, registry: &mut Registry, id: &str, text: &str) {
        match ClientMessage::from_json(text) {
            Ok(message) => self.handle_message(registry, id, message),
            Err(e) => warn!("Dropping malformed message from {}: {}", id, e),
        }
    }

    pub fn handle_message(&mut self, registry: &mut Registry, id: &str, message: ClientMessage) {
        let Some(phase) = self.sessions.get(id).map(|s| s.phase) else {
            debug!("Message for unknown session {} dropped", id);
            return;
        };

        match (phase, message) {
            (SessionPhase::Connected, ClientMessage::Join { name }) => {
                self.join(registry, id, &name);
            }
            (SessionPhase::Joined, ClientMessage::Join { .. }) => {
                debug!("Ignoring repeated join from {}", id);
            }
            (
                SessionPhase::Joined,
                ClientMessage::Position {
                    x,
                    y,
                    z,
                    rotation_y,
                    state,
                },
            ) => {
                registry.update_transform(id, Vec3::new(x, y, z), rotation_y, state);
            }
            (
                SessionPhase::Joined,
                ClientMessage::Swing {
                    active,
                    attach_point,
                },
            ) => {
                registry.update_swing(id, active, attach_point);
            }
            (SessionPhase::Joined, ClientMessage::Settings { name, color }) => {
                registry.update_settings(id, name.as_deref(), color.as_deref());
            }
            (SessionPhase::Joined, ClientMessage::RtcOffer { target_id, offer }) => {
                relay_signal(self, id, &target_id, SignalKind::Offer, offer);
            }
            (SessionPhase::Joined, ClientMessage::RtcAnswer { target_id, answer }) => {
                relay_signal(self, id, &target_id, SignalKind::Answer, answer);
            }
            (
                SessionPhase::Joined,
                ClientMessage::RtcIce {
                    target_id,
                    candidate,
                },
            ) => {
                relay_signal(self, id, &target_id, SignalKind::Candidate, candidate);
            }
            // Rejected; the writer task is already closing the socket
            (SessionPhase::Closed, _) => {}
            (SessionPhase::Connected, _) => {
                debug!("Dropping message from {} before join", id);
            }
        }
    }

    fn join(&mut self, registry: &mut Registry, id: &str, requested_name: &str) {
        if !registry.can_accept_new_player() {
            info!("Server full, rejecting {}", id);
            if let Some(session) = self.sessions.get_mut(id) {
                session.send(&ServerMessage::ServerFull {});
                session.close();
                session.phase = SessionPhase::Closed;
            }
            return;
        }

        let name = sanitize_join_name(requested_name);
        let others = registry.list_summaries();
        let Some(summary) = registry.add_player(id, &name).map(|r| r.summary()) else {
            warn!("Registry refused join for {}", id);
            return;
        };

        if let Some(session) = self.sessions.get_mut(id) {
            session.phase = SessionPhase::Joined;
            session.send(&ServerMessage::Welcome {
                your_id: id.to_string(),
                players: others,
            });
        }

        info!("{} joined as {}", id, summary.name);
        self.broadcast(
            &ServerMessage::PlayerJoined {
                id: summary.id,
                name: summary.name,
                color: summary.color,
            },
            Some(id),
        );
    }

    /// Tears down a connection; joined sessions also leave the registry
    pub fn close(&mut self, registry: &mut Registry, id: &str) {
        let Some(session) = self.sessions.remove(id) else {
            return;
        };

        if session.is_joined() {
            registry.remove_player(id);
            info!("{} left", id);
            self.broadcast(&ServerMessage::PlayerLeft { id: id.to_string() }, None);
        } else {
            debug!("Session {} closed before joining", id);
        }
    }

    /// Sends to every joined session except `exclude`
    pub fn broadcast(&self, message: &ServerMessage, exclude: Option<&str>) {
        let text: Arc<str> = match message.to_json() {
            Ok(json) => json.into(),
            Err(e) => {
                warn!("Failed to serialize broadcast: {}", e);
                return;
            }
        };

        for session in self.sessions.values() {
            if !session.is_joined() || Some(session.id.as_str()) == exclude {
                continue;
            }
            session.send_text(Arc::clone(&text));
        }
    }

    /// Sends to one joined session; false if it is absent or not joined
    pub fn send_to_joined(&self, id: &str, message: &ServerMessage) -> bool {
        match self.sessions.get(id) {
            Some(session) if session.is_joined() => session.send(message),
            _ => false,
        }
    }

    pub fn send_text_to(&self, id: &str, text: Arc<str>) -> bool {
        self.sessions
            .get(id)
            .map(|session| session.send_text(text))
            .unwrap_or(false)
    }

    pub fn phase(&self, id: &str) -> Option<SessionPhase> {
        self.sessions.get(id).map(|s| s.phase)
    }

    pub fn is_joined(&self, id: &str) -> bool {
        self.phase(id) == Some(SessionPhase::Joined)
    }

    pub fn joined_ids(&self) -> Vec<String> {
        self.sessions
            .values()
            .filter(|s| s.is_joined())
            .map(|s| s.id.clone())
            .collect()
    }

    pub fn joined_count(&self) -> usize {
        self.sessions.values().filter(|s| s.is_joined()).count()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
