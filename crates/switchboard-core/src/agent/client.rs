//! The seam to the streaming agent backend.
//!
//! The orchestration layer never talks to a concrete backend directly; it
//! holds an `Arc<dyn AgentClient>` and drives it through this trait. A
//! stream is one continuous call spanning potentially many turns, fed by a
//! pull-driven input producer that never terminates on its own.

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;

use crate::agent::event::AgentEvent;
use crate::session::{InputQueue, SessionOptions};

/// Failures surfaced by the backend.
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("backend error: {0}")]
    Backend(String),

    #[error("transport failure: {0}")]
    Transport(String),

    #[error("no stored history for session {0}")]
    HistoryNotFound(String),
}

/// Input handed to [`AgentClient::stream`].
pub enum StreamInput {
    /// A single prompt; the stream ends after its turn completes.
    Prompt(String),

    /// A live producer. The backend pulls the next input only when it is
    /// ready for one, and the queue only ends when the session closes it.
    Queue(Arc<InputQueue>),
}

/// The sequence of events one stream call produces.
pub type EventStream = BoxStream<'static, Result<AgentEvent, AgentError>>;

/// A streaming conversational backend.
#[async_trait]
pub trait AgentClient: Send + Sync {
    /// Open one continuous stream against the backend.
    ///
    /// The returned stream yields events in emission order until the backend
    /// finishes (prompt input), the caller drops the stream, or a transport
    /// failure occurs. Options are fixed for the lifetime of the stream.
    async fn stream(
        &self,
        input: StreamInput,
        options: SessionOptions,
    ) -> Result<EventStream, AgentError>;

    /// Fetch the stored event history for a session the backend knows about.
    async fn load_history(&self, session_id: &str) -> Result<Vec<AgentEvent>, AgentError>;
}
