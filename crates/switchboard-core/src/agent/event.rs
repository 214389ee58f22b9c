//! Typed events emitted by the streaming agent backend.
//!
//! The backend speaks line-delimited JSON; every line deserializes into one
//! `AgentEvent` variant at the boundary. Anything that does not match the
//! tagged union is rejected there instead of leaking dynamically-shaped
//! objects into the session layer.

use serde::{Deserialize, Serialize};

/// Token accounting reported on terminal events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// One event from the backend stream.
///
/// Stream contract: exactly one `system_init` per stream establishes (or
/// confirms) the backend session id; exactly one `result_success` or
/// `result_error` per turn ends that turn. Everything carries the `turn_id`
/// the input was submitted under, which is the merge key for coalescing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// Stream opened; the backend names the session.
    SystemInit {
        session_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        model: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        cwd: Option<String>,
    },

    /// The backend's authoritative copy of a submitted user message.
    UserEcho { turn_id: String, content: String },

    /// A streamed chunk of assistant output.
    AssistantDelta { turn_id: String, text: String },

    /// The assistant invoked a tool.
    ToolUse {
        turn_id: String,
        tool_use_id: String,
        name: String,
        input: serde_json::Value,
    },

    /// Outcome of a previously announced tool invocation.
    ToolResult {
        turn_id: String,
        tool_use_id: String,
        content: String,
        #[serde(default)]
        is_error: bool,
    },

    /// Turn finished normally.
    ResultSuccess {
        turn_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        summary: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        usage: Option<Usage>,
    },

    /// Turn finished with a backend-reported error.
    ResultError {
        turn_id: String,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        usage: Option<Usage>,
    },
}

impl AgentEvent {
    /// Whether this event ends a turn.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AgentEvent::ResultSuccess { .. } | AgentEvent::ResultError { .. }
        )
    }
}
