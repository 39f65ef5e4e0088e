//! Smoothing of remote players between snapshots
//!
//! Snapshots arrive at the broadcast rate; rendering runs faster. Each remote
//! player keeps the last reported target and a displayed value that eases
//! toward it every frame. Frame-rate independence comes from the exponential
//! blend factor `1 - e^(-rate * dt)`.

use crate::network::ClientEvent;
use shared::{MovementState, PlayerState, PlayerSummary, Vec3, SPAWN_POINT};
use std::collections::HashMap;
use std::f32::consts::{PI, TAU};

/// Height above a player's origin where the rope leaves the hand
pub const HAND_OFFSET: f32 = 1.2;

/// Wraps an angle into (-π, π]
pub fn normalize_angle(angle: f32) -> f32 {
    let wrapped = angle % TAU;
    if wrapped > PI {
        wrapped - TAU
    } else if wrapped <= -PI {
        wrapped + TAU
    } else {
        wrapped
    }
}

pub fn blend_factor(rate: f32, dt: f32) -> f32 {
    1.0 - (-rate * dt).exp()
}

/// Moves `current` toward `target` by `t` along the shorter arc
pub fn lerp_angle(current: f32, target: f32, t: f32) -> f32 {
    let delta = normalize_angle(target - current);
    normalize_angle(current + delta * t)
}

#[derive(Debug, Clone)]
pub struct RemotePlayer {
    pub id: String,
    pub name: String,
    pub color: String,
    pub state: MovementState,
    pub attach_point: Option<Vec3>,
    pub target_position: Vec3,
    pub target_yaw: f32,
    pub display_position: Vec3,
    pub display_yaw: f32,
    has_snapshot: bool,
}

impl RemotePlayer {
    fn from_summary(summary: &PlayerSummary) -> Self {
        Self {
            id: summary.id.clone(),
            name: summary.name.clone(),
            color: summary.color.clone(),
            state: MovementState::Idle,
            attach_point: None,
            target_position: SPAWN_POINT,
            target_yaw: 0.0,
            display_position: SPAWN_POINT,
            display_yaw: 0.0,
            has_snapshot: false,
        }
    }

    fn apply(&mut self, state: &PlayerState) {
        self.name = state.name.clone();
        self.color = state.color.clone();
        self.state = state.state;
        self.attach_point = state.swing_attach_point;
        self.target_position = state.position();
        self.target_yaw = normalize_angle(state.rotation_y);

        // First real position: appear there instead of sliding in from spawn
        if !self.has_snapshot {
            self.display_position = self.target_position;
            self.display_yaw = self.target_yaw;
            self.has_snapshot = true;
        }
    }

    pub fn update(&mut self, dt: f32, rate: f32) {
        let t = blend_factor(rate, dt);
        self.display_position = self.display_position.lerp(&self.target_position, t);
        self.display_yaw = lerp_angle(self.display_yaw, self.target_yaw, t);
    }

    pub fn is_swinging(&self) -> bool {
        self.state == MovementState::Swinging && self.attach_point.is_some()
    }

    /// Hand position and anchor of the rope, while swinging
    pub fn rope_segment(&self) -> Option<(Vec3, Vec3)> {
        if !self.is_swinging() {
            return None;
        }
        let anchor = self.attach_point?;
        let hand = Vec3::new(
            self.display_position.x,
            self.display_position.y + HAND_OFFSET,
            self.display_position.z,
        );
        Some((hand, anchor))
    }
}

/// Displayed state of every remote player
pub struct RemotePlayers {
    players: HashMap<String, RemotePlayer>,
    rate: f32,
}

impl RemotePlayers {
    pub fn new(rate: f32) -> Self {
        Self {
            players: HashMap::new(),
            rate,
        }
    }

    /// Feeds one network event into the view
    pub fn apply_event(&mut self, event: &ClientEvent) {
        match event {
            ClientEvent::Welcome { players, .. } => {
                self.players.clear();
                for summary in players {
                    self.on_joined(summary);
                }
            }
            ClientEvent::PlayerJoined(summary) => self.on_joined(summary),
            ClientEvent::PlayerLeft { id } => {
                self.on_left(id);
            }
            ClientEvent::State { players } => self.apply_snapshot(players),
            ClientEvent::StatusChanged(_)
            | ClientEvent::ServerFull
            | ClientEvent::Signal { .. } => {}
        }
    }

    pub fn on_joined(&mut self, summary: &PlayerSummary) {
        self.players
            .entry(summary.id.clone())
            .and_modify(|player| {
                player.name = summary.name.clone();
                player.color = summary.color.clone();
            })
            .or_insert_with(|| RemotePlayer::from_summary(summary));
    }

    pub fn on_left(&mut self, id: &str) -> bool {
        self.players.remove(id).is_some()
    }

    /// Retargets every listed player; unknown ids are added on the spot
    pub fn apply_snapshot(&mut self, players: &[PlayerState]) {
        for state in players {
            self.players
                .entry(state.id.clone())
                .or_insert_with(|| RemotePlayer::from_summary(&state.summary()))
                .apply(state);
        }
    }

    /// Advances all displayed transforms by one frame
    pub fn update(&mut self, dt: f32) {
        for player in self.players.values_mut() {
            player.update(dt, self.rate);
        }
    }

    pub fn rope_segment(&self, id: &str) -> Option<(Vec3, Vec3)> {
        self.players.get(id).and_then(RemotePlayer::rope_segment)
    }

    pub fn get(&self, id: &str) -> Option<&RemotePlayer> {
        self.players.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &RemotePlayer> {
        self.players.values()
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    pub fn clear(&mut self) {
        self.players.clear();
    }
}
