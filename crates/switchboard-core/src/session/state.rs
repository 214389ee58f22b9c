//! Per-session identity, state machine, and options.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Local handle for a session instance.
///
/// Distinct from the backend-assigned session id: a `SessionId` exists from
/// the moment the registry creates the session, while the backend id only
/// arrives with the first `system_init` event.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The session state machine.
///
/// `Idle -> Loading -> Busy -> Idle` on the success path; any state goes to
/// `Error` on an unrecoverable stream failure; `Loading`/`Busy` drop back to
/// `Idle` on interrupt. `Idle` is both the initial state and the terminal
/// state of every turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Loading,
    Busy,
    Error,
}

impl SessionState {
    pub fn is_loading(self) -> bool {
        matches!(self, SessionState::Loading)
    }

    pub fn is_busy(self) -> bool {
        matches!(self, SessionState::Busy)
    }
}

/// Merged backend options for a session.
///
/// Replacing options never affects an in-flight stream; the session snapshots
/// them when it opens a stream and only future streams see changes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permission_mode: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_tools: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking_level: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
}

/// Partial options record carried by `setSDKOptions`.
///
/// Only the fields present in the patch are replaced.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct OptionsPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permission_mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_tools: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking_level: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
}

impl OptionsPatch {
    /// Merge this patch into `options`, field-wise.
    pub fn apply(&self, options: &mut SessionOptions) {
        if let Some(ref v) = self.working_dir {
            options.working_dir = Some(v.clone());
        }
        if let Some(ref v) = self.permission_mode {
            options.permission_mode = Some(v.clone());
        }
        if let Some(ref v) = self.allowed_tools {
            options.allowed_tools = v.clone();
        }
        if let Some(ref v) = self.thinking_level {
            options.thinking_level = Some(v.clone());
        }
        if let Some(ref v) = self.model {
            options.model = Some(v.clone());
        }
        if let Some(ref v) = self.system_prompt {
            options.system_prompt = Some(v.clone());
        }
    }
}
