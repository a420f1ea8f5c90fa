use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

use crate::models::{EditNotification, PointerPosition, PresenceUser, ReceivedMessage, SelectionEntry};

/// What applying an inbound envelope did
#[derive(Debug, Clone, PartialEq)]
pub enum Applied {
    PresenceChanged,
    PointerMoved,
    SelectionChanged,
    Edited(EditNotification),
    /// The server reported an error; nothing changed
    Diagnostic(String),
    /// Pong or unknown envelope
    Unchanged,
}

/// Presence, pointers, selections and the last remote edit of one document
#[derive(Debug, Default, Clone)]
pub struct SharedState {
    roster: Vec<PresenceUser>,
    pointers: HashMap<String, PointerPosition>,
    selections: HashMap<String, SelectionEntry>,
    last_edit: Option<EditNotification>,
}

impl SharedState {
    pub fn apply(&mut self, msg: ReceivedMessage) -> Applied {
        match msg {
            ReceivedMessage::Presence(presence) => {
                debug!("Presence snapshot with {} viewers", presence.viewers.len());
                self.roster = presence.viewers;
                Applied::PresenceChanged
            }
            ReceivedMessage::Cursor(cursor) => {
                self.pointers.insert(cursor.user_id, cursor.position);
                Applied::PointerMoved
            }
            ReceivedMessage::Selection(selection) => {
                self.selections.insert(
                    selection.user_id,
                    SelectionEntry { username: selection.username, entity_id: selection.entity_id },
                );
                Applied::SelectionChanged
            }
            ReceivedMessage::Edit(edit) => {
                let notification = EditNotification::from(edit);
                self.last_edit = Some(notification.clone());
                Applied::Edited(notification)
            }
            ReceivedMessage::Error(err) => {
                warn!("Collaboration server reported: {}", err.message);
                Applied::Diagnostic(err.message)
            }
            ReceivedMessage::Pong => Applied::Unchanged,
            ReceivedMessage::Unknown => {
                debug!("Ignoring envelope of unknown type");
                Applied::Unchanged
            }
        }
    }

    /// Drop pointer and selection entries of users missing from the roster.
    /// Returns how many entries were removed.
    pub fn prune(&mut self) -> usize {
        let present: HashSet<&str> = self.roster.iter().map(|u| u.user_id.as_str()).collect();
        let before = self.pointers.len() + self.selections.len();
        self.pointers.retain(|user_id, _| present.contains(user_id.as_str()));
        self.selections.retain(|user_id, _| present.contains(user_id.as_str()));
        before - (self.pointers.len() + self.selections.len())
    }

    pub fn clear(&mut self) {
        self.roster.clear();
        self.pointers.clear();
        self.selections.clear();
        self.last_edit = None;
    }

    pub fn roster(&self) -> &[PresenceUser] {
        &self.roster
    }

    pub fn pointers(&self) -> &HashMap<String, PointerPosition> {
        &self.pointers
    }

    pub fn selections(&self) -> &HashMap<String, SelectionEntry> {
        &self.selections
    }

    pub fn last_edit(&self) -> Option<&EditNotification> {
        self.last_edit.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::decode;

    fn apply(state: &mut SharedState, frame: &str) -> Applied {
        state.apply(decode(frame).unwrap())
    }

    #[test]
    fn presence_replaces_roster_wholesale() {
        let mut state = SharedState::default();
        apply(&mut state, r#"{"type":"presence","viewers":[{"user_id":"u1","username":"alice"},{"user_id":"u2","username":"bob","display_name":"Bob B."}]}"#);
        assert_eq!(state.roster().len(), 2);
        assert_eq!(state.roster()[1].label(), "Bob B.");

        apply(&mut state, r#"{"type":"presence","viewers":[{"user_id":"u1","username":"alice"}]}"#);
        assert_eq!(state.roster().len(), 1);
        assert_eq!(state.roster()[0].username, "alice");
    }

    #[test]
    fn cursor_and_selection_upsert_per_user() {
        let mut state = SharedState::default();
        apply(&mut state, r#"{"type":"cursor","user_id":"u1","position":{"x":1,"y":2}}"#);
        apply(&mut state, r#"{"type":"cursor","user_id":"u1","position":{"x":3,"y":4}}"#);
        assert_eq!(state.pointers()["u1"], PointerPosition { x: 3.0, y: 4.0 });

        apply(&mut state, r#"{"type":"selection","user_id":"u1","username":"alice","entity_id":"zone-1"}"#);
        assert_eq!(state.selections()["u1"].entity_id.as_deref(), Some("zone-1"));
        apply(&mut state, r#"{"type":"selection","user_id":"u1","username":"alice","entity_id":null}"#);
        assert_eq!(state.selections()["u1"].entity_id, None);
    }

    #[test]
    fn edit_keeps_only_the_latest() {
        let mut state = SharedState::default();
        apply(&mut state, r#"{"type":"edit","user_id":"u1","username":"alice","entity":"zone","action":"create","data":{},"timestamp":1}"#);
        let applied = apply(&mut state, r#"{"type":"edit","user_id":"u2","username":"bob","entity":"rack","action":"delete","data":{},"timestamp":2}"#);
        assert!(matches!(applied, Applied::Edited(ref e) if e.entity == "rack"));
        assert_eq!(state.last_edit().map(|e| e.username.as_str()), Some("bob"));
    }

    #[test]
    fn error_pong_and_unknown_change_nothing() {
        let mut state = SharedState::default();
        apply(&mut state, r#"{"type":"presence","viewers":[{"user_id":"u1","username":"alice"}]}"#);
        assert_eq!(apply(&mut state, r#"{"type":"error","message":"forbidden"}"#), Applied::Diagnostic("forbidden".into()));
        assert_eq!(apply(&mut state, r#"{"type":"pong"}"#), Applied::Unchanged);
        assert_eq!(apply(&mut state, r#"{"type":"mystery"}"#), Applied::Unchanged);
        assert_eq!(state.roster().len(), 1);
        assert!(state.pointers().is_empty());
        assert!(state.last_edit().is_none());
    }

    #[test]
    fn prune_removes_users_missing_from_roster() {
        let mut state = SharedState::default();
        apply(&mut state, r#"{"type":"presence","viewers":[{"user_id":"u1","username":"alice"},{"user_id":"u2","username":"bob"}]}"#);
        apply(&mut state, r#"{"type":"cursor","user_id":"u1","position":{"x":1,"y":1}}"#);
        apply(&mut state, r#"{"type":"cursor","user_id":"u2","position":{"x":2,"y":2}}"#);
        apply(&mut state, r#"{"type":"selection","user_id":"u2","username":"bob","entity_id":"zone-9"}"#);
        assert_eq!(state.prune(), 0);

        apply(&mut state, r#"{"type":"presence","viewers":[{"user_id":"u1","username":"alice"}]}"#);
        // Not pruned until the pass runs
        assert!(state.pointers().contains_key("u2"));
        assert_eq!(state.prune(), 2);
        assert!(state.pointers().contains_key("u1"));
        assert!(!state.pointers().contains_key("u2"));
        assert!(state.selections().is_empty());

        apply(&mut state, r#"{"type":"presence","viewers":[]}"#);
        assert_eq!(state.prune(), 1);
        assert!(state.pointers().is_empty());
    }

    #[test]
    fn clear_empties_everything() {
        let mut state = SharedState::default();
        apply(&mut state, r#"{"type":"presence","viewers":[{"user_id":"u1","username":"alice"}]}"#);
        apply(&mut state, r#"{"type":"cursor","user_id":"u1","position":{"x":1,"y":1}}"#);
        state.clear();
        assert!(state.roster().is_empty());
        assert!(state.pointers().is_empty());
    }
}
