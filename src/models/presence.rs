use serde::{Deserialize, Serialize};

/// A user currently viewing the document
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PresenceUser {
    pub user_id: String,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

impl PresenceUser {
    /// Name to show for this user, preferring the display name
    pub fn label(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.username)
    }
}

/// Latest pointer coordinates of a remote user
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct PointerPosition {
    pub x: f64,
    pub y: f64,
}

/// The entity a remote user has focused, `None` meaning nothing selected
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SelectionEntry {
    pub username: String,
    pub entity_id: Option<String>,
}

/// Moment a remote edit happened, as sent by the server
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum EditTimestamp {
    Millis(i64),
    Text(String),
}

/// Most recent remote edit. Consumers re-fetch the entity instead of applying a diff.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct EditNotification {
    pub user_id: String,
    pub username: String,
    pub entity: String,
    pub action: String,
    #[serde(default)]
    pub data: serde_json::Value,
    pub timestamp: EditTimestamp,
}
