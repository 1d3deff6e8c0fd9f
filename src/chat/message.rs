//! Wire messages exchanged with chat clients.
//!
//! Every frame is a JSON object. Chat traffic uses
//! `{type, username, content, time}`; presence uses `{type: "users", users}`.

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Display name used for system notices.
pub const SYSTEM_SENDER: &str = "System";

/// Kind of a chat message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// Plain text message. Wire name `message`.
    #[default]
    Text,
    /// Image message; content is a data URI inbound and a stored path outbound.
    Image,
    /// Server generated notice (joins, leaves).
    System,
    /// Online user list.
    Users,
}

impl MessageKind {
    /// Get the wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Text => "message",
            MessageKind::Image => "image",
            MessageKind::System => "system",
            MessageKind::Users => "users",
        }
    }

    /// Parse a wire name. Unknown names are treated as text.
    pub fn from_wire(s: &str) -> Self {
        match s {
            "image" => MessageKind::Image,
            "system" => MessageKind::System,
            "users" => MessageKind::Users,
            _ => MessageKind::Text,
        }
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Serialize for MessageKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for MessageKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(MessageKind::from_wire(&s))
    }
}

/// A chat message as logged and broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Message kind.
    #[serde(rename = "type")]
    pub kind: MessageKind,
    /// Author's display name ("System" for notices).
    pub username: String,
    /// Text, stored image path, or notice text.
    pub content: String,
    /// Server-assigned clock time (`HH:MM:SS`).
    pub time: String,
}

impl ChatMessage {
    /// Create a text message.
    pub fn text(
        username: impl Into<String>,
        content: impl Into<String>,
        time: impl Into<String>,
    ) -> Self {
        Self {
            kind: MessageKind::Text,
            username: username.into(),
            content: content.into(),
            time: time.into(),
        }
    }

    /// Create an image message whose content is the stored artifact path.
    pub fn image(
        username: impl Into<String>,
        path: impl Into<String>,
        time: impl Into<String>,
    ) -> Self {
        Self {
            kind: MessageKind::Image,
            username: username.into(),
            content: path.into(),
            time: time.into(),
        }
    }

    /// Create a system notice.
    pub fn system(content: impl Into<String>, time: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::System,
            username: SYSTEM_SENDER.to_string(),
            content: content.into(),
            time: time.into(),
        }
    }

    /// Create a join notice.
    pub fn joined(username: &str, time: impl Into<String>) -> Self {
        Self::system(format!("{username} 加入了聊天室"), time)
    }

    /// Create a leave notice.
    pub fn left(username: &str, time: impl Into<String>) -> Self {
        Self::system(format!("{username} 离开了聊天室"), time)
    }
}

/// A frame received from a client.
///
/// Every field is optional on the wire; the client-supplied `time` is ignored.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClientMessage {
    /// Requested message kind.
    #[serde(rename = "type", default)]
    pub kind: MessageKind,
    /// Declared username. Only meaningful in the identity frame.
    #[serde(default)]
    pub username: String,
    /// Text or image data URI.
    #[serde(default)]
    pub content: String,
}

impl ClientMessage {
    /// Parse a text frame.
    pub fn parse(text: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Whether the client asked to send an image.
    ///
    /// Clients may only author text and image messages; any other kind is
    /// relayed as text.
    pub fn is_image(&self) -> bool {
        self.kind == MessageKind::Image
    }
}

/// One entry of the online user list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    /// Display name.
    pub username: String,
    /// Network origin. Named `ip` on the wire.
    #[serde(rename = "ip")]
    pub origin: String,
}

/// Presence frame listing everyone online.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsersMessage {
    /// Always [`MessageKind::Users`].
    #[serde(rename = "type")]
    pub kind: MessageKind,
    /// Online users, one per origin.
    pub users: Vec<UserInfo>,
}

impl UsersMessage {
    pub fn new(users: Vec<UserInfo>) -> Self {
        Self {
            kind: MessageKind::Users,
            users,
        }
    }
}
