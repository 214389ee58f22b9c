//! One logical conversation against the streaming backend.
//!
//! A session owns its state machine, the input bridge, the single active
//! stream, the coalesced history, and the subscriber set. All mutation goes
//! through one mutex that is never held across an await; the consumption
//! loop runs as a background task and observes cancellation before touching
//! any further event.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::agent::client::{AgentClient, StreamInput};
use crate::agent::event::{AgentEvent, Usage};
use crate::coalesce::{self, CoalescedMessage};
use crate::protocol::{ServerNotice, SessionStatePayload, UserInput};
use crate::session::bridge::InputQueue;
use crate::session::manager::{Listener, SubscriberId};
use crate::session::state::{OptionsPatch, SessionId, SessionOptions, SessionState};

/// Validation failures reported synchronously to the originating caller.
///
/// These never mutate session state and are never broadcast.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("message content is empty")]
    EmptyMessage,

    #[error("malformed attachment: {0}")]
    MalformedAttachment(String),
}

impl SessionError {
    /// Stable code for the outbound `error` notice a transport builds from
    /// this failure.
    pub fn code(&self) -> &'static str {
        match self {
            SessionError::EmptyMessage => "empty_message",
            SessionError::MalformedAttachment(_) => "malformed_attachment",
        }
    }
}

/// Snapshot of a session for listings and diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub handle: SessionId,
    pub session_id: Option<String>,
    pub state: SessionState,
    pub message_count: usize,
    pub created_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
}

struct StreamHandle {
    token: CancellationToken,
    generation: u64,
}

struct SessionInner {
    backend_id: Option<String>,
    state: SessionState,
    options: SessionOptions,
    history: Vec<CoalescedMessage>,
    queue: Arc<InputQueue>,
    active: Option<StreamHandle>,
    subscribers: HashMap<SubscriberId, Listener>,
    summary: Option<String>,
    usage: Option<Usage>,
    last_error: Option<String>,
    last_active: DateTime<Utc>,
    generation: u64,
}

impl SessionInner {
    fn state_notice(&self) -> ServerNotice {
        ServerNotice::SessionStateChanged(SessionStatePayload {
            session_id: self.backend_id.clone(),
            is_busy: self.state.is_busy(),
            is_loading: self.state.is_loading(),
            summary: self.summary.clone(),
            usage: self.usage.clone(),
            error: self.last_error.clone(),
        })
    }

    /// Deliver a notice to every subscriber. Each listener sees notices in
    /// emission order; a dead listener is skipped and must not block
    /// delivery to the others.
    fn broadcast(&self, notice: &ServerNotice) {
        for (id, listener) in &self.subscribers {
            if listener.send(notice.clone()).is_err() {
                log::debug!("dropping notice for dead subscriber {}", id.0);
            }
        }
    }

    fn current_generation(&self) -> Option<u64> {
        self.active.as_ref().map(|h| h.generation)
    }
}

/// A single agent conversation: state machine, input queue, history, fanout.
pub struct Session {
    handle: SessionId,
    client: Arc<dyn AgentClient>,
    created_at: DateTime<Utc>,
    inner: Mutex<SessionInner>,
}

impl Session {
    pub fn new(client: Arc<dyn AgentClient>, options: SessionOptions) -> Arc<Self> {
        Arc::new(Self {
            handle: SessionId::new(),
            client,
            created_at: Utc::now(),
            inner: Mutex::new(SessionInner {
                backend_id: None,
                state: SessionState::Idle,
                options,
                history: Vec::new(),
                queue: Arc::new(InputQueue::new()),
                active: None,
                subscribers: HashMap::new(),
                summary: None,
                usage: None,
                last_error: None,
                last_active: Utc::now(),
                generation: 0,
            }),
        })
    }

    pub fn handle(&self) -> &SessionId {
        &self.handle
    }

    /// The backend-assigned session id, once `system_init` confirmed one.
    pub fn backend_id(&self) -> Option<String> {
        self.inner.lock().unwrap().backend_id.clone()
    }

    pub fn state(&self) -> SessionState {
        self.inner.lock().unwrap().state
    }

    pub fn history(&self) -> Vec<CoalescedMessage> {
        self.inner.lock().unwrap().history.clone()
    }

    pub fn options(&self) -> SessionOptions {
        self.inner.lock().unwrap().options.clone()
    }

    pub fn info(&self) -> SessionInfo {
        let inner = self.inner.lock().unwrap();
        SessionInfo {
            handle: self.handle.clone(),
            session_id: inner.backend_id.clone(),
            state: inner.state,
            message_count: inner.history.len(),
            created_at: self.created_at,
            last_active: inner.last_active,
        }
    }

    /// Submit a user message.
    ///
    /// Appends the user-role history entry synchronously, queues the input
    /// for the live producer, and opens a stream if none is active. Never
    /// opens a second stream: a send while one is running always routes
    /// through the queue.
    pub fn send(self: &Arc<Self>, input: UserInput) -> Result<(), SessionError> {
        if input.content.is_empty() {
            return Err(SessionError::EmptyMessage);
        }

        let mut inner = self.inner.lock().unwrap();
        inner.last_active = Utc::now();

        if matches!(inner.state, SessionState::Idle | SessionState::Error) {
            inner.state = SessionState::Loading;
            inner.last_error = None;
            let notice = inner.state_notice();
            inner.broadcast(&notice);
        }

        let message = CoalescedMessage::user(input.turn_id.clone(), input.content.display_text());
        inner.history.push(message.clone());
        inner.broadcast(&ServerNotice::MessageAdded { message });

        if !inner.queue.push(input.clone()) {
            // The previous queue was closed under us; start a fresh one.
            let fresh = Arc::new(InputQueue::new());
            fresh.push(input);
            inner.queue = fresh;
        }

        if inner.active.is_none() {
            inner.generation += 1;
            let generation = inner.generation;
            let token = CancellationToken::new();
            inner.active = Some(StreamHandle {
                token: token.clone(),
                generation,
            });

            let queue = Arc::clone(&inner.queue);
            let options = inner.options.clone();
            drop(inner);

            let session = Arc::clone(self);
            let _ = tokio::spawn(async move {
                session.run_stream(queue, options, token, generation).await;
            });
        }

        Ok(())
    }

    /// Cancel the active stream, keeping everything already received.
    ///
    /// Not an error: a deliberate, graceful truncation of the current turn.
    /// Interrupting an already idle session is a no-op.
    pub fn interrupt(&self) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(handle) = inner.active.take() {
            handle.token.cancel();
            // Give the cancelled producer a clean end-of-input, but keep
            // undelivered inputs for the next stream.
            let leftovers = inner.queue.close();
            let fresh = Arc::new(InputQueue::new());
            for input in leftovers {
                fresh.push(input);
            }
            inner.queue = fresh;
        }

        if matches!(inner.state, SessionState::Loading | SessionState::Busy) {
            inner.state = SessionState::Idle;
            inner.last_active = Utc::now();
            let notice = inner.state_notice();
            inner.broadcast(&notice);
        }
    }

    /// Replace this session's history with one rebuilt from stored events.
    ///
    /// Aborts any active stream, discards pending inputs, and pins the
    /// backend session id to `target`. Never fails: the caller passes an
    /// empty event list when the transcript could not be loaded.
    pub fn resume(&self, target: String, events: Vec<AgentEvent>) {
        let mut inner = self.inner.lock().unwrap();

        if let Some(handle) = inner.active.take() {
            handle.token.cancel();
        }
        let _ = inner.queue.close();
        inner.queue = Arc::new(InputQueue::new());

        inner.history = coalesce::replay(&events);
        inner.backend_id = Some(target);
        inner.state = SessionState::Idle;
        inner.summary = None;
        inner.usage = None;
        inner.last_error = None;
        inner.last_active = Utc::now();

        let snapshot = ServerNotice::MessagesUpdated {
            messages: inner.history.clone(),
        };
        inner.broadcast(&snapshot);
        let notice = inner.state_notice();
        inner.broadcast(&notice);
    }

    /// Merge an options patch. Only future streams see the change; an
    /// in-flight stream keeps the options it was opened with.
    pub fn merge_options(&self, patch: &OptionsPatch) {
        let mut inner = self.inner.lock().unwrap();
        patch.apply(&mut inner.options);
    }

    /// Whether the registry may destroy this session: nobody subscribed,
    /// nothing queued, no stream running.
    pub fn should_collect(&self) -> bool {
        let inner = self.inner.lock().unwrap();
        inner.subscribers.is_empty() && inner.queue.is_empty() && inner.active.is_none()
    }

    /// Abort the stream and close the bridge ahead of destruction.
    pub fn shutdown(&self) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(handle) = inner.active.take() {
            handle.token.cancel();
        }
        let _ = inner.queue.close();
    }

    /// Attach a listener, delivering the full snapshot before it can see
    /// any live event. Called only by the registry.
    pub(crate) fn attach_listener(&self, id: SubscriberId, listener: Listener) {
        let mut inner = self.inner.lock().unwrap();
        let _ = listener.send(ServerNotice::MessagesUpdated {
            messages: inner.history.clone(),
        });
        let _ = listener.send(inner.state_notice());
        inner.subscribers.insert(id, listener);
    }

    /// Detach a listener. Called only by the registry.
    pub(crate) fn detach_listener(&self, id: &SubscriberId) {
        let mut inner = self.inner.lock().unwrap();
        inner.subscribers.remove(id);
    }

    async fn run_stream(
        self: Arc<Self>,
        queue: Arc<InputQueue>,
        options: SessionOptions,
        token: CancellationToken,
        generation: u64,
    ) {
        let opened = tokio::select! {
            biased;
            () = token.cancelled() => None,
            res = self.client.stream(StreamInput::Queue(queue), options) => Some(res),
        };

        let mut stream = match opened {
            Some(Ok(stream)) => stream,
            Some(Err(e)) => {
                log::warn!("session {}: failed to open stream: {e}", self.handle);
                self.fail(generation, &format!("failed to open stream: {e}"));
                self.clear_active(generation);
                return;
            }
            None => {
                self.clear_active(generation);
                return;
            }
        };

        loop {
            tokio::select! {
                biased;
                () = token.cancelled() => break,
                item = stream.next() => match item {
                    Some(Ok(event)) => self.process_event(generation, event),
                    Some(Err(e)) => {
                        log::warn!("session {}: stream failed: {e}", self.handle);
                        self.fail(generation, &e.to_string());
                        break;
                    }
                    None => {
                        self.finish_idle(generation);
                        break;
                    }
                },
            }
        }

        self.clear_active(generation);
    }

    fn process_event(&self, generation: u64, event: AgentEvent) {
        let mut inner = self.inner.lock().unwrap();
        // A racing interrupt or resume may have superseded this stream while
        // the event was in flight; drop it rather than mutate stale state.
        if inner.current_generation() != Some(generation) {
            return;
        }
        inner.last_active = Utc::now();

        match &event {
            AgentEvent::SystemInit { session_id, .. } => {
                if inner.backend_id.is_none() {
                    inner.backend_id = Some(session_id.clone());
                    let notice = inner.state_notice();
                    inner.broadcast(&notice);
                }
            }
            AgentEvent::AssistantDelta { .. }
            | AgentEvent::ToolUse { .. }
            | AgentEvent::ToolResult { .. } => {
                if matches!(inner.state, SessionState::Loading | SessionState::Idle) {
                    inner.state = SessionState::Busy;
                    let notice = inner.state_notice();
                    inner.broadcast(&notice);
                }
            }
            AgentEvent::ResultSuccess { summary, usage, .. } => {
                if summary.is_some() {
                    inner.summary = summary.clone();
                }
                inner.usage = usage.clone();
                inner.last_error = None;
            }
            AgentEvent::ResultError { message, usage, .. } => {
                inner.last_error = Some(message.clone());
                inner.usage = usage.clone();
            }
            AgentEvent::UserEcho { .. } => {}
        }

        if event.is_terminal() {
            inner.state = SessionState::Idle;
            let notice = inner.state_notice();
            inner.broadcast(&notice);
        }

        if let Some(idx) = coalesce::apply(&mut inner.history, &event) {
            let message = inner.history[idx].clone();
            inner.broadcast(&ServerNotice::MessageAdded { message });
        }
    }

    /// Transport-level stream failure. The session transitions to `Error`
    /// and stays usable for a subsequent send.
    fn fail(&self, generation: u64, message: &str) {
        let mut inner = self.inner.lock().unwrap();
        if inner.current_generation() != Some(generation) {
            return;
        }
        inner.state = SessionState::Error;
        inner.last_error = Some(message.to_string());
        inner.broadcast(&ServerNotice::Error {
            code: "stream_failed".to_string(),
            message: message.to_string(),
        });
        let notice = inner.state_notice();
        inner.broadcast(&notice);
    }

    fn finish_idle(&self, generation: u64) {
        let mut inner = self.inner.lock().unwrap();
        if inner.current_generation() != Some(generation) {
            return;
        }
        if matches!(inner.state, SessionState::Loading | SessionState::Busy) {
            inner.state = SessionState::Idle;
            let notice = inner.state_notice();
            inner.broadcast(&notice);
        }
    }

    fn clear_active(&self, generation: u64) {
        let mut inner = self.inner.lock().unwrap();
        if inner.current_generation() == Some(generation) {
            inner.active = None;
        }
    }
}
