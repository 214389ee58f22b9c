//! Wire-level request and notice types.
//!
//! These are the boundary the transport layer (WebSocket handlers, IPC)
//! serializes; the orchestration layer itself never frames bytes. Inbound
//! tags and the camelCase payload fields match the client protocol exactly.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::agent::event::Usage;
use crate::coalesce::CoalescedMessage;
use crate::session::OptionsPatch;

/// A file attached to a chat message, base64-encoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentPayload {
    pub name: String,
    #[serde(rename = "mediaType")]
    pub media_type: String,
    /// Base64-encoded content.
    pub data: String,
}

impl AttachmentPayload {
    /// Validate shape and encoding without keeping the decoded bytes.
    pub fn validate(&self) -> Result<(), String> {
        use base64::Engine as _;

        if self.name.trim().is_empty() {
            return Err("attachment name is empty".to_string());
        }
        if !self.media_type.contains('/') {
            return Err(format!("invalid media type: {}", self.media_type));
        }
        base64::engine::general_purpose::STANDARD
            .decode(&self.data)
            .map_err(|e| format!("invalid base64 data for {}: {e}", self.name))?;
        Ok(())
    }
}

/// Message body: plain text or structured content blocks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Blocks(Vec<serde_json::Value>),
}

impl MessageContent {
    pub fn is_empty(&self) -> bool {
        match self {
            MessageContent::Text(text) => text.trim().is_empty(),
            MessageContent::Blocks(blocks) => blocks.is_empty(),
        }
    }

    /// Flatten to the display text the history entry carries.
    pub fn display_text(&self) -> String {
        match self {
            MessageContent::Text(text) => text.clone(),
            MessageContent::Blocks(blocks) => blocks
                .iter()
                .map(|block| match block.get("text").and_then(|t| t.as_str()) {
                    Some(text) => text.to_string(),
                    None => block.to_string(),
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

/// One user submission, queued for the live input producer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserInput {
    /// Assigned when the input is accepted; the backend tags every event of
    /// the resulting turn with it.
    pub turn_id: String,
    pub content: MessageContent,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<AttachmentPayload>,
}

impl UserInput {
    pub fn new(content: MessageContent, attachments: Vec<AttachmentPayload>) -> Self {
        Self {
            turn_id: Uuid::new_v4().to_string(),
            content,
            attachments,
        }
    }

    pub fn text(content: impl Into<String>) -> Self {
        Self::new(MessageContent::Text(content.into()), Vec::new())
    }
}

/// Requests a connected client may send.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type")]
pub enum ClientRequest {
    #[serde(rename = "chat")]
    Chat {
        content: String,
        #[serde(rename = "sessionId", default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        attachments: Vec<AttachmentPayload>,
    },

    #[serde(rename = "setSDKOptions")]
    SetSdkOptions(OptionsPatch),

    #[serde(rename = "resume")]
    Resume {
        #[serde(rename = "sessionId")]
        session_id: String,
    },
}

/// Derived session state as broadcast to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatePayload {
    pub session_id: Option<String>,
    pub is_busy: bool,
    pub is_loading: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Notices fanned out to session subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerNotice {
    /// A history entry was created or updated.
    MessageAdded { message: CoalescedMessage },

    /// Full history snapshot; sent on subscribe and after resume.
    MessagesUpdated { messages: Vec<CoalescedMessage> },

    SessionStateChanged(SessionStatePayload),

    Error { code: String, message: String },
}
