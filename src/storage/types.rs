use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Current time as epoch milliseconds
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Author of a chat message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Message typed by the user
    User,
    /// Model reply
    Assistant,
    /// System prompt or notice
    System,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
            Role::System => write!(f, "system"),
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            "system" => Ok(Role::System),
            other => Err(format!(
                "invalid role '{}': must be one of user, assistant, system",
                other
            )),
        }
    }
}

/// A single message in a chat session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Unique message identifier
    pub id: String,
    /// Who wrote the message
    pub role: Role,
    /// Text payload
    pub content: String,
    /// Epoch milliseconds
    pub timestamp: i64,
    /// Open key-value metadata
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<BTreeMap<String, serde_json::Value>>,
}

impl ChatMessage {
    /// Create a message with a fresh id and the current timestamp
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            timestamp: now_millis(),
            metadata: None,
        }
    }

    /// Create a user message
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    /// Create an assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Create a system message
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }
}

/// A chat session as persisted locally and archived remotely
///
/// `revision` is a local counter bumped on every save. The sync layer uses
/// it to decide whether a finished upload still describes the current
/// session state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSession {
    /// Unique session identifier
    pub id: String,
    /// Display title
    pub title: String,
    /// Messages in conversation order
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    /// Creation time, epoch milliseconds
    pub created_at: i64,
    /// Last local save, epoch milliseconds
    pub updated_at: i64,
    /// Owning wallet address, used as encryption key material
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    /// CID of the last upload whose revision matched
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cid: Option<String>,
    /// Local revision counter
    #[serde(default)]
    pub revision: u64,
}

impl ChatSession {
    /// Create an empty session with a fresh id
    pub fn new(title: impl Into<String>) -> Self {
        let now = now_millis();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            title: title.into(),
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
            address: None,
            cid: None,
            revision: 0,
        }
    }

    /// Create an empty session with a caller-chosen id
    pub fn with_id(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::new(title)
        }
    }

    /// Set the owning address
    pub fn owned_by(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    /// Append a message
    pub fn push_message(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }

    /// Lower-cased owner address, if any
    pub fn owner_address(&self) -> Option<String> {
        self.address
            .as_deref()
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .map(str::to_lowercase)
    }
}

/// Side-table entry mapping a session to its last uploaded CID
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CidRecord {
    /// Content identifier returned by the archive
    pub cid: String,
    /// When the upload completed, epoch milliseconds
    pub timestamp: i64,
    /// Number of messages in the uploaded state
    pub message_count: usize,
    /// Session revision that was uploaded
    #[serde(default)]
    pub revision: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_serializes_lowercase() {
        let json = serde_json::to_string(&Role::Assistant).unwrap();
        assert_eq!(json, "\"assistant\"");
        let role: Role = serde_json::from_str("\"system\"").unwrap();
        assert_eq!(role, Role::System);
    }

    #[test]
    fn test_role_rejects_unknown_value() {
        assert!(serde_json::from_str::<Role>("\"tool\"").is_err());
        assert!("tool".parse::<Role>().is_err());
        assert_eq!("USER".parse::<Role>().unwrap(), Role::User);
    }

    #[test]
    fn test_session_uses_camel_case_fields() {
        let session = ChatSession::with_id("s1", "Hello");
        let value = serde_json::to_value(&session).unwrap();
        assert!(value.get("createdAt").is_some());
        assert!(value.get("updatedAt").is_some());
        assert!(value.get("cid").is_none());
        assert!(value.get("address").is_none());
    }

    #[test]
    fn test_session_without_revision_deserializes() {
        let json = r#"{"id":"a","title":"t","messages":[],"createdAt":1,"updatedAt":2}"#;
        let session: ChatSession = serde_json::from_str(json).unwrap();
        assert_eq!(session.revision, 0);
        assert!(session.cid.is_none());
    }

    #[test]
    fn test_owner_address_is_lowercased() {
        let session = ChatSession::new("t").owned_by("0xABCdef");
        assert_eq!(session.owner_address().as_deref(), Some("0xabcdef"));

        let blank = ChatSession::new("t").owned_by("  ");
        assert!(blank.owner_address().is_none());
    }

    #[test]
    fn test_push_message_keeps_order() {
        let mut session = ChatSession::new("t");
        session.push_message(ChatMessage::user("one"));
        session.push_message(ChatMessage::assistant("two"));
        assert_eq!(session.messages[0].content, "one");
        assert_eq!(session.messages[1].role, Role::Assistant);
    }
}
