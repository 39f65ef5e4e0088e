//! In-memory registry of joined players and their latest known state
//!
//! The registry is the single source of truth for what gets broadcast. It has
//! no network or protocol knowledge: callers decide when to join, leave, or
//! update, and the registry only guards its own invariants:
//! - at most `max_players` records exist at once
//! - an identity has at most one record
//! - an attach point is only present while the movement state is swinging
//! - names and colors pass field validation before they replace old values

use log::{debug, info};
use rand::seq::SliceRandom;
use shared::{
    is_valid_color, is_valid_name, MovementState, PlayerState, PlayerSummary, Vec3,
    COLOR_PALETTE, SPAWN_POINT,
};
use std::collections::HashMap;
use std::time::Instant;

/// Latest known state of one joined player
#[derive(Debug, Clone)]
pub struct PlayerRecord {
    /// Identity of the owning session, fixed for the record's lifetime
    pub id: String,
    pub name: String,
    pub color: String,
    pub position: Vec3,
    pub rotation_y: f32,
    pub state: MovementState,
    /// Rope anchor, only meaningful while swinging
    pub attach_point: Option<Vec3>,
    /// Last time any update touched this record
    pub last_update: Instant,
}

impl PlayerRecord {
    pub fn new(id: String, name: String, color: String) -> Self {
        Self {
            id,
            name,
            color,
            position: SPAWN_POINT,
            rotation_y: 0.0,
            state: MovementState::Idle,
            attach_point: None,
            last_update: Instant::now(),
        }
    }

    pub fn summary(&self) -> PlayerSummary {
        PlayerSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            color: self.color.clone(),
        }
    }

    /// Converts the record into its `state` broadcast entry
    pub fn to_state(&self) -> PlayerState {
        let swing_attach_point = if self.state == MovementState::Swinging {
            self.attach_point
        } else {
            None
        };

        PlayerState {
            id: self.id.clone(),
            name: self.name.clone(),
            color: self.color.clone(),
            x: self.position.x,
            y: self.position.y,
            z: self.position.z,
            rotation_y: self.rotation_y,
            state: self.state,
            swing_attach_point,
        }
    }
}

/// Owns every joined player's record
///
/// Constructed once by the server and handed to the session handlers and the
/// broadcast loop; there is no global instance.
pub struct Registry {
    players: HashMap<String, PlayerRecord>,
    max_players: usize,
}

impl Registry {
    pub fn new(max_players: usize) -> Self {
        Self {
            players: HashMap::new(),
            max_players,
        }
    }

    /// True while fewer than `max_players` records exist
    pub fn can_accept_new_player(&self) -> bool {
        self.players.len() < self.max_players
    }

    /// Creates a record at the spawn point with a random palette color
    ///
    /// Returns None for an identity that already has a record, or when the
    /// registry is at capacity.
    pub fn add_player(&mut self, id: &str, name: &str) -> Option<&PlayerRecord> {
        if self.players.contains_key(id) || !self.can_accept_new_player() {
            return None;
        }

        let color = COLOR_PALETTE
            .choose(&mut rand::thread_rng())
            .unwrap_or(&COLOR_PALETTE[0])
            .to_string();

        let record = PlayerRecord::new(id.to_string(), name.to_string(), color);
        info!("Player {} ({}) added to registry", record.name, id);
        self.players.insert(id.to_string(), record);
        self.players.get(id)
    }

    /// Deletes a record; returns false if none existed
    pub fn remove_player(&mut self, id: &str) -> bool {
        if let Some(record) = self.players.remove(id) {
            info!("Player {} ({}) removed from registry", record.name, id);
            true
        } else {
            false
        }
    }

    pub fn update_transform(
        &mut self,
        id: &str,
        position: Vec3,
        rotation_y: f32,
        state: MovementState,
    ) -> bool {
        let Some(record) = self.players.get_mut(id) else {
            return false;
        };

        record.position = position;
        record.rotation_y = rotation_y;
        record.state = state;
        if state != MovementState::Swinging {
            record.attach_point = None;
        }
        record.last_update = Instant::now();
        true
    }

    pub fn update_swing(&mut self, id: &str, active: bool, attach_point: Option<Vec3>) -> bool {
        let Some(record) = self.players.get_mut(id) else {
            return false;
        };

        if active {
            record.state = MovementState::Swinging;
            record.attach_point = attach_point;
        } else {
            record.state = MovementState::Idle;
            record.attach_point = None;
        }
        record.last_update = Instant::now();
        true
    }

    /// Applies whichever of name and color are present and valid
    ///
    /// Invalid fields are ignored individually and keep their previous value.
    pub fn update_settings(&mut self, id: &str, name: Option<&str>, color: Option<&str>) -> bool {
        let Some(record) = self.players.get_mut(id) else {
            return false;
        };

        if let Some(name) = name {
            if is_valid_name(name) {
                record.name = name.trim().to_string();
            } else {
                debug!("Ignoring invalid name from {}", id);
            }
        }

        if let Some(color) = color {
            if is_valid_color(color) {
                record.color = color.to_string();
            } else {
                debug!("Ignoring invalid color {:?} from {}", color, id);
            }
        }

        record.last_update = Instant::now();
        true
    }

    /// Point-in-time copy of every record in broadcast form
    pub fn snapshot_all(&self) -> Vec<PlayerState> {
        self.players.values().map(PlayerRecord::to_state).collect()
    }

    pub fn list_summaries(&self) -> Vec<PlayerSummary> {
        self.players.values().map(PlayerRecord::summary).collect()
    }

    pub fn get(&self, id: &str) -> Option<&PlayerRecord> {
        self.players.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.players.contains_key(id)
    }

    pub fn max_players(&self) -> usize {
        self.max_players
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }
}
