//! The streaming agent backend boundary: event types and the client seam.

pub mod client;
pub mod event;

#[cfg(test)]
pub(crate) mod testing;

pub use client::{AgentClient, AgentError, EventStream, StreamInput};
pub use event::{AgentEvent, Usage};
