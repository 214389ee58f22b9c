//! # switchboard-core
//!
//! Session streaming orchestration between chat clients and a streaming
//! agent backend.
//!
//! Clients submit fire-and-forget messages; each session bridges them into
//! one continuous bidirectional stream against the backend, fans the
//! resulting events out to every subscriber in emission order, and folds
//! raw events into a stable chat history. Persisted JSONL transcripts can
//! be replayed through the same fold to resume a session.
//!
//! ## Key Concepts
//!
//! - **Session**: one conversation; owns its state machine and input queue
//! - **Turn**: one user input through to its terminal result event
//! - **Stream**: one continuous backend call spanning many turns
//! - **Coalescing**: merging partial events into displayable messages

pub mod agent;
pub mod coalesce;
pub mod protocol;
pub mod session;
pub mod transcript;

// Re-export commonly used types
pub use agent::{AgentClient, AgentError, AgentEvent, EventStream, StreamInput};
pub use coalesce::CoalescedMessage;
pub use protocol::{ClientRequest, ServerNotice, UserInput};
pub use session::{
    ConnectionId, ManagerConfig, Session, SessionError, SessionId, SessionManager, SessionOptions,
    SessionState, SubscriberId,
};
pub use transcript::TranscriptStore;
