use crate::Message;
use serde::{Deserialize, Deserializer, Serialize};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
    System,
}

impl ChatRole {
    /// Map a stored role (`USER`, `Assistant`, `system`, ...) to a role.
    pub fn from_stored(role: &str) -> Option<Self> {
        match role.trim().to_ascii_lowercase().as_str() {
            "user" => Some(Self::User),
            "assistant" => Some(Self::Assistant),
            "system" => Some(Self::System),
            _ => None,
        }
    }

    /// Wire role name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Self::User => "User",
            Self::Assistant => "Assistant",
            Self::System => "System",
        }
    }
}

impl<'de> Deserialize<'de> for ChatRole {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        ChatRole::from_stored(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown chat role '{}'", raw)))
    }
}

/// A single entry in the authoring conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatEntry {
    pub role: ChatRole,
    pub content: String,
    #[serde(default)]
    pub timestamp: u64,
}

impl ChatEntry {
    pub fn to_message(&self) -> Message {
        match self.role {
            ChatRole::User => Message::user(&self.content),
            ChatRole::Assistant => Message::assistant(&self.content),
            ChatRole::System => Message::system(&self.content),
        }
    }
}

/// Conversation history for one workflow.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationSession {
    pub messages: Vec<ChatEntry>,
}

pub const DEFAULT_WINDOW_SIZE: usize = 5;

impl ConversationSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from stored `(role, content)` rows. Rows with an unknown role
    /// are skipped.
    pub fn from_stored<'a, I>(rows: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let messages = rows
            .into_iter()
            .filter_map(|(role, content)| match ChatRole::from_stored(role) {
                Some(role) => Some(ChatEntry {
                    role,
                    content: content.to_string(),
                    timestamp: 0,
                }),
                None => {
                    warn!(role, "Skipping message with unknown role");
                    None
                }
            })
            .collect();
        Self { messages }
    }

    pub fn push_user(&mut self, content: impl Into<String>) {
        self.push(ChatRole::User, content.into());
    }

    pub fn push_assistant(&mut self, content: impl Into<String>) {
        self.push(ChatRole::Assistant, content.into());
    }

    fn push(&mut self, role: ChatRole, content: String) {
        self.messages.push(ChatEntry {
            role,
            content,
            timestamp: now_epoch_ms(),
        });
    }

    /// Messages in the recent window (last N exchanges).
    pub fn recent_window(&self, window_size: Option<usize>) -> &[ChatEntry] {
        let n = window_size.unwrap_or(DEFAULT_WINDOW_SIZE) * 2;
        let len = self.messages.len();
        &self.messages[len.saturating_sub(n)..]
    }

    /// Render the recent window as the conversation-context block used in
    /// prompts. `None` when there is nothing to show.
    pub fn format_context(&self, window_size: Option<usize>) -> Option<String> {
        let lines: Vec<String> = self
            .recent_window(window_size)
            .iter()
            .filter(|e| !e.content.trim().is_empty())
            .map(|e| format!("{}: {}", e.role.label(), e.content.trim()))
            .collect();
        (!lines.is_empty()).then(|| lines.join("\n"))
    }
}

fn now_epoch_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
