//! Fixed-rate state broadcasting
//!
//! Clients update the registry whenever they like; only this loop decides when
//! state goes back out. Each tick takes one snapshot, serializes it once, and
//! hands the same frame to every joined session.

use crate::registry::Registry;
use crate::session::SessionTable;
use log::{debug, error};
use shared::ServerMessage;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, Interval, MissedTickBehavior};

pub struct BroadcastLoop {
    interval: Interval,
    ticks: u64,
}

impl BroadcastLoop {
    pub fn new(period: Duration) -> Self {
        let mut interval = interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        Self { interval, ticks: 0 }
    }

    /// Waits for the next broadcast deadline
    pub async fn tick(&mut self) {
        self.interval.tick().await;
    }

    /// Broadcasts one snapshot; returns how many sessions it was queued for
    pub fn run_tick(&mut self, registry: &Registry, sessions: &SessionTable) -> usize {
        self.ticks += 1;
        let delivered = broadcast_state(registry, sessions);

        // Periodic activity log
        if delivered > 0 && self.ticks % 200 == 0 {
            debug!(
                "Broadcast tick {}: {} recipients, {} records",
                self.ticks,
                delivered,
                registry.len()
            );
        }

        delivered
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }
}

/// Sends one shared `state` frame to every joined session
///
/// Skips all work when nobody is joined.
pub fn broadcast_state(registry: &Registry, sessions: &SessionTable) -> usize {
    let recipients = sessions.joined_ids();
    if recipients.is_empty() {
        return 0;
    }

    let message = ServerMessage::State {
        players: registry.snapshot_all(),
    };
    let frame: Arc<str> = match message.to_json() {
        Ok(json) => json.into(),
        Err(e) => {
            error!("Failed to serialize state snapshot: {}", e);
            return 0;
        }
    };

    recipients
        .iter()
        .filter(|id| sessions.send_text_to(id, Arc::clone(&frame)))
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{outbound_channel, OutboundFrame, OUTBOUND_CAPACITY};
    use shared::{ClientMessage, MovementState, Vec3, MAX_PLAYERS};
    use tokio::sync::mpsc;

    type Conn = (String, mpsc::Receiver<OutboundFrame>);

    fn connect(table: &mut SessionTable) -> Conn {
        let (tx, rx) = outbound_channel();
        (table.open(tx), rx)
    }

    fn join(table: &mut SessionTable, registry: &mut Registry, name: &str) -> Conn {
        let (id, rx) = connect(table);
        table.handle_message(
            registry,
            &id,
            ClientMessage::Join {
                name: name.to_string(),
            },
        );
        (id, rx)
    }

    fn drain(rx: &mut mpsc::Receiver<OutboundFrame>) -> Vec<OutboundFrame> {
        let mut frames = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            frames.push(frame);
        }
        frames
    }

    #[test]
    fn test_no_joined_sessions_means_no_broadcast() {
        let mut table = SessionTable::new();
        let registry = Registry::new(MAX_PLAYERS);
        let (_, mut lurker_rx) = connect(&mut table);

        assert_eq!(broadcast_state(&registry, &table), 0);
        assert!(drain(&mut lurker_rx).is_empty());
    }

    #[test]
    fn test_one_identical_frame_per_joined_session() {
        let mut table = SessionTable::new();
        let mut registry = Registry::new(MAX_PLAYERS);
        let (alice, mut alice_rx) = join(&mut table, &mut registry, "Alice");
        let (_, mut bob_rx) = join(&mut table, &mut registry, "Bob");
        let (_, mut lurker_rx) = connect(&mut table);
        drain(&mut alice_rx);
        drain(&mut bob_rx);

        registry.update_transform(&alice, Vec3::new(1.0, 0.0, 2.0), 0.0, MovementState::Walking);
        assert_eq!(broadcast_state(&registry, &table), 2);

        let alice_frames = drain(&mut alice_rx);
        let bob_frames = drain(&mut bob_rx);
        assert_eq!(alice_frames.len(), 1);
        assert_eq!(bob_frames.len(), 1);
        assert!(drain(&mut lurker_rx).is_empty());

        match (&alice_frames[0], &bob_frames[0]) {
            (OutboundFrame::Text(a), OutboundFrame::Text(b)) => {
                assert!(Arc::ptr_eq(a, b), "snapshot must be shared, not rebuilt");
                match ServerMessage::from_json(a).unwrap() {
                    ServerMessage::State { players } => {
                        assert_eq!(players.len(), 2);
                        let entry = players.iter().find(|p| p.id == alice).unwrap();
                        assert_eq!(entry.position(), Vec3::new(1.0, 0.0, 2.0));
                        assert_eq!(entry.state, MovementState::Walking);
                    }
                    other => panic!("Expected state message, got {:?}", other),
                }
            }
            other => panic!("Expected text frames, got {:?}", other),
        }
    }

    #[test]
    fn test_departed_player_absent_from_next_tick() {
        let mut table = SessionTable::new();
        let mut registry = Registry::new(MAX_PLAYERS);
        let (alice, _alice_rx) = join(&mut table, &mut registry, "Alice");
        let (_, mut bob_rx) = join(&mut table, &mut registry, "Bob");

        registry.update_swing(&alice, true, Some(Vec3::new(5.0, 10.0, 5.0)));
        table.close(&mut registry, &alice);
        drain(&mut bob_rx);

        assert_eq!(broadcast_state(&registry, &table), 1);
        match drain(&mut bob_rx).as_slice() {
            [OutboundFrame::Text(text)] => match ServerMessage::from_json(text).unwrap() {
                ServerMessage::State { players } => {
                    assert_eq!(players.len(), 1);
                    assert!(players.iter().all(|p| p.id != alice));
                }
                other => panic!("Expected state message, got {:?}", other),
            },
            other => panic!("Expected one frame, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_loop_counts_ticks() {
        let table = SessionTable::new();
        let registry = Registry::new(MAX_PLAYERS);
        let mut broadcast = BroadcastLoop::new(Duration::from_millis(5));

        broadcast.tick().await;
        assert_eq!(broadcast.run_tick(&registry, &table), 0);
        broadcast.tick().await;
        assert_eq!(broadcast.run_tick(&registry, &table), 0);
        assert_eq!(broadcast.ticks(), 2);
    }

    #[test]
    fn test_stalled_reader_does_not_hold_back_others() {
        let mut table = SessionTable::new();
        let mut registry = Registry::new(MAX_PLAYERS);
        let (_, mut stalled_rx) = join(&mut table, &mut registry, "Stalled");
        let (_, mut reader_rx) = join(&mut table, &mut registry, "Reader");
        drain(&mut stalled_rx);
        drain(&mut reader_rx);

        for _ in 0..OUTBOUND_CAPACITY {
            assert_eq!(broadcast_state(&registry, &table), 2);
            assert_eq!(drain(&mut reader_rx).len(), 1);
        }

        // The stalled queue is at capacity; its frames are dropped, not buffered
        assert_eq!(broadcast_state(&registry, &table), 1);
        assert_eq!(drain(&mut reader_rx).len(), 1);
        assert_eq!(drain(&mut stalled_rx).len(), OUTBOUND_CAPACITY);
    }
}
