//! Awareness: ephemeral presence shared between collaborators.
//!
//! Who is in the workspace, which document and block their caret is in, and
//! what they have selected. Nothing here is persisted or merged into the
//! CRDT; it only travels as `SyncMessage::Awareness` payloads.
//!
//! ```text
//! local caret move
//!       │
//!       ▼
//! Awareness::set_local_cursor()   (rate-limited)
//!       │
//!       ▼
//! AwarenessMessage::Cursor ──► transport ──► remote Awareness::handle_message()
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Caret position inside a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocCursor {
    pub doc_id: String,
    pub block_id: String,
    /// Character offset inside the block's text
    pub offset: u32,
}

/// Stable display color derived from a client id.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PeerColor {
    pub r: f32,
    pub g: f32,
    pub b: f32,
}

impl PeerColor {
    /// Vivid color whose hue is derived from the id, so every collaborator
    /// sees the same color for the same peer.
    pub fn from_uuid(id: Uuid) -> Self {
        let hue = ((id.as_u128() % 360) as f32) / 360.0;
        let (r, g, b) = hsl_to_rgb(hue, 0.7, 0.6);
        Self { r, g, b }
    }

    /// `#rrggbb` form for the UI layer.
    pub fn to_hex(&self) -> String {
        let c = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
        format!("#{:02x}{:02x}{:02x}", c(self.r), c(self.g), c(self.b))
    }
}

fn hsl_to_rgb(h: f32, s: f32, l: f32) -> (f32, f32, f32) {
    let q = if l < 0.5 { l * (1.0 + s) } else { l + s - l * s };
    let p = 2.0 * l - q;
    (
        hue_to_rgb(p, q, h + 1.0 / 3.0),
        hue_to_rgb(p, q, h),
        hue_to_rgb(p, q, h - 1.0 / 3.0),
    )
}

fn hue_to_rgb(p: f32, q: f32, mut t: f32) -> f32 {
    if t < 0.0 {
        t += 1.0;
    }
    if t > 1.0 {
        t -= 1.0;
    }
    if t < 1.0 / 6.0 {
        return p + (q - p) * 6.0 * t;
    }
    if t < 1.0 / 2.0 {
        return q;
    }
    if t < 2.0 / 3.0 {
        return p + (q - p) * (2.0 / 3.0 - t) * 6.0;
    }
    p
}

/// Awareness messages sent over the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AwarenessMessage {
    Join {
        client_id: Uuid,
        user_name: String,
        color: PeerColor,
    },
    Leave {
        client_id: Uuid,
    },
    /// Caret moved, or left every document (`None`).
    Cursor {
        client_id: Uuid,
        cursor: Option<DocCursor>,
        /// Sender-side monotonic counter; older updates are ignored
        timestamp: u64,
    },
    Selection {
        client_id: Uuid,
        block_ids: Vec<String>,
    },
}

impl AwarenessMessage {
    pub fn client_id(&self) -> Uuid {
        match self {
            AwarenessMessage::Join { client_id, .. }
            | AwarenessMessage::Leave { client_id }
            | AwarenessMessage::Cursor { client_id, .. }
            | AwarenessMessage::Selection { client_id, .. } => *client_id,
        }
    }
}

/// Identity of the local collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalPeer {
    pub client_id: Uuid,
    pub user_name: String,
}

impl LocalPeer {
    pub fn new(user_name: impl Into<String>) -> Self {
        Self {
            client_id: Uuid::new_v4(),
            user_name: user_name.into(),
        }
    }
}

/// A remote collaborator as seen locally.
#[derive(Debug, Clone)]
pub struct PeerPresence {
    pub client_id: Uuid,
    pub user_name: String,
    pub color: PeerColor,
    pub cursor: Option<DocCursor>,
    pub selection: Vec<String>,
    last_update: Instant,
    last_timestamp: u64,
}

impl PeerPresence {
    fn new(client_id: Uuid, user_name: String, color: PeerColor) -> Self {
        Self {
            client_id,
            user_name,
            color,
            cursor: None,
            selection: Vec::new(),
            last_update: Instant::now(),
            last_timestamp: 0,
        }
    }

    fn update_cursor(&mut self, cursor: Option<DocCursor>, timestamp: u64) {
        if timestamp < self.last_timestamp {
            return;
        }
        self.cursor = cursor;
        self.last_timestamp = timestamp;
        self.last_update = Instant::now();
    }

    pub fn is_idle(&self, timeout: Duration) -> bool {
        self.last_update.elapsed() > timeout
    }
}

/// Presence state for one workspace: the local client plus every remote peer.
#[derive(Debug)]
pub struct Awareness {
    client_id: Uuid,
    user_name: String,
    peers: HashMap<Uuid, PeerPresence>,
    local_cursor: Option<DocCursor>,
    local_selection: Vec<String>,
    timestamp: u64,
    last_cursor_broadcast: Option<Instant>,
    cursor_interval: Duration,
    idle_timeout: Duration,
}

impl Awareness {
    pub fn new(client_id: Uuid, user_name: impl Into<String>) -> Self {
        Self {
            client_id,
            user_name: user_name.into(),
            peers: HashMap::new(),
            local_cursor: None,
            local_selection: Vec::new(),
            timestamp: 0,
            last_cursor_broadcast: None,
            cursor_interval: Duration::from_millis(33),
            idle_timeout: Duration::from_secs(30),
        }
    }

    /// Override the cursor rate limit (for testing).
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.cursor_interval = interval;
        self
    }

    pub fn client_id(&self) -> Uuid {
        self.client_id
    }

    pub fn user_name(&self) -> &str {
        &self.user_name
    }

    /// Apply a message from a remote peer. Our own echoes are ignored.
    pub fn handle_message(&mut self, msg: &AwarenessMessage) {
        if msg.client_id() == self.client_id {
            return;
        }

        match msg {
            AwarenessMessage::Join { client_id, user_name, color } => {
                self.peers
                    .insert(*client_id, PeerPresence::new(*client_id, user_name.clone(), *color));
            }
            AwarenessMessage::Leave { client_id } => {
                self.peers.remove(client_id);
            }
            AwarenessMessage::Cursor { client_id, cursor, timestamp } => {
                // Cursor before Join: the peer was here before we connected.
                let peer = self.peers.entry(*client_id).or_insert_with(|| {
                    PeerPresence::new(
                        *client_id,
                        format!("Peer-{}", &client_id.to_string()[..8]),
                        PeerColor::from_uuid(*client_id),
                    )
                });
                peer.update_cursor(cursor.clone(), *timestamp);
            }
            AwarenessMessage::Selection { client_id, block_ids } => {
                if let Some(peer) = self.peers.get_mut(client_id) {
                    peer.selection = block_ids.clone();
                    peer.last_update = Instant::now();
                }
            }
        }
    }

    /// Move the local caret. Returns the message to broadcast, or `None` when
    /// rate-limited.
    pub fn set_local_cursor(&mut self, cursor: Option<DocCursor>) -> Option<AwarenessMessage> {
        self.local_cursor = cursor;
        if let Some(last) = self.last_cursor_broadcast {
            if last.elapsed() < self.cursor_interval {
                return None;
            }
        }
        Some(self.cursor_message())
    }

    /// Broadcast the current caret regardless of rate limiting.
    pub fn cursor_message(&mut self) -> AwarenessMessage {
        self.timestamp += 1;
        self.last_cursor_broadcast = Some(Instant::now());
        AwarenessMessage::Cursor {
            client_id: self.client_id,
            cursor: self.local_cursor.clone(),
            timestamp: self.timestamp,
        }
    }

    pub fn set_local_selection(&mut self, block_ids: Vec<String>) -> AwarenessMessage {
        self.local_selection = block_ids.clone();
        AwarenessMessage::Selection {
            client_id: self.client_id,
            block_ids,
        }
    }

    pub fn join_message(&self) -> AwarenessMessage {
        AwarenessMessage::Join {
            client_id: self.client_id,
            user_name: self.user_name.clone(),
            color: PeerColor::from_uuid(self.client_id),
        }
    }

    pub fn leave_message(&self) -> AwarenessMessage {
        AwarenessMessage::Leave {
            client_id: self.client_id,
        }
    }

    pub fn peers(&self) -> &HashMap<Uuid, PeerPresence> {
        &self.peers
    }

    pub fn peer(&self, client_id: &Uuid) -> Option<&PeerPresence> {
        self.peers.get(client_id)
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    /// Peers whose caret is inside `doc_id`.
    pub fn peers_in_doc(&self, doc_id: &str) -> Vec<&PeerPresence> {
        self.peers
            .values()
            .filter(|p| p.cursor.as_ref().is_some_and(|c| c.doc_id == doc_id))
            .collect()
    }

    pub fn local_cursor(&self) -> Option<&DocCursor> {
        self.local_cursor.as_ref()
    }

    pub fn local_selection(&self) -> &[String] {
        &self.local_selection
    }

    /// Drop peers that went quiet. Returns their ids.
    pub fn cleanup_idle_peers(&mut self) -> Vec<Uuid> {
        let timeout = self.idle_timeout;
        let stale: Vec<Uuid> = self
            .peers
            .iter()
            .filter(|(_, p)| p.is_idle(timeout))
            .map(|(id, _)| *id)
            .collect();
        for id in &stale {
            self.peers.remove(id);
        }
        stale
    }

    /// Forget every remote peer, e.g. after the connection dropped.
    pub fn clear_peers(&mut self) {
        self.peers.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cursor(doc: &str, offset: u32) -> DocCursor {
        DocCursor {
            doc_id: doc.into(),
            block_id: "b1".into(),
            offset,
        }
    }

    #[test]
    fn test_join_then_leave() {
        let mut local = Awareness::new(Uuid::new_v4(), "me");
        let remote = Awareness::new(Uuid::new_v4(), "Alice");

        local.handle_message(&remote.join_message());
        assert_eq!(local.peer_count(), 1);
        assert_eq!(local.peer(&remote.client_id()).unwrap().user_name, "Alice");

        local.handle_message(&remote.leave_message());
        assert_eq!(local.peer_count(), 0);
    }

    #[test]
    fn test_own_messages_ignored() {
        let mut local = Awareness::new(Uuid::new_v4(), "me");
        let join = local.join_message();
        local.handle_message(&join);
        assert_eq!(local.peer_count(), 0);
    }

    #[test]
    fn test_stale_cursor_rejected() {
        let mut local = Awareness::new(Uuid::new_v4(), "me");
        let id = Uuid::new_v4();
        local.handle_message(&AwarenessMessage::Cursor {
            client_id: id,
            cursor: Some(cursor("d", 5)),
            timestamp: 2,
        });
        local.handle_message(&AwarenessMessage::Cursor {
            client_id: id,
            cursor: Some(cursor("d", 1)),
            timestamp: 1,
        });
        assert_eq!(local.peer(&id).unwrap().cursor.as_ref().unwrap().offset, 5);
    }

    #[test]
    fn test_cursor_rate_limit() {
        let mut local = Awareness::new(Uuid::new_v4(), "me").with_interval(Duration::from_secs(60));
        assert!(local.set_local_cursor(Some(cursor("d", 1))).is_some());
        assert!(local.set_local_cursor(Some(cursor("d", 2))).is_none());
        assert_eq!(local.local_cursor().unwrap().offset, 2);

        match local.cursor_message() {
            AwarenessMessage::Cursor { cursor, timestamp, .. } => {
                assert_eq!(cursor.unwrap().offset, 2);
                assert_eq!(timestamp, 2);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_peers_in_doc() {
        let mut local = Awareness::new(Uuid::new_v4(), "me");
        for (doc, n) in [("a", 1), ("a", 2), ("b", 3)] {
            local.handle_message(&AwarenessMessage::Cursor {
                client_id: Uuid::new_v4(),
                cursor: Some(cursor(doc, n)),
                timestamp: 1,
            });
        }
        assert_eq!(local.peers_in_doc("a").len(), 2);
        assert_eq!(local.peers_in_doc("b").len(), 1);
    }

    #[test]
    fn test_color_is_stable() {
        let id = Uuid::parse_str("550e8400-e29b-41d4-a716-446655440000").unwrap();
        assert_eq!(PeerColor::from_uuid(id), PeerColor::from_uuid(id));
        assert_eq!(PeerColor::from_uuid(id).to_hex().len(), 7);
    }
}
