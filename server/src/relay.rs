//! Pass-through routing of peer-to-peer negotiation payloads
//!
//! The relay keeps no state of its own: a payload is either delivered to the
//! named joined session, re-tagged with the sender's identity, or dropped.

use crate::session::SessionTable;
use log::debug;
use serde_json::Value;
use shared::SignalKind;

/// Forwards an opaque signaling payload from `from_id` to `target_id`
///
/// Returns whether the payload was queued for delivery. Unknown or
/// not-yet-joined targets are dropped without telling the sender.
pub fn relay_signal(
    sessions: &SessionTable,
    from_id: &str,
    target_id: &str,
    kind: SignalKind,
    payload: Value,
) -> bool {
    if !sessions.is_joined(target_id) {
        debug!(
            "Dropping {:?} from {} to absent target {}",
            kind, from_id, target_id
        );
        return false;
    }

    let message = kind.into_server_message(from_id.to_string(), payload);
    sessions.send_to_joined(target_id, &message)
}
