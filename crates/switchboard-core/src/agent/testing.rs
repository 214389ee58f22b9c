//! Scripted in-process backend for exercising sessions without a real agent.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::agent::client::{AgentClient, AgentError, EventStream, StreamInput};
use crate::agent::event::{AgentEvent, Usage};
use crate::protocol::UserInput;

type EventSender = mpsc::UnboundedSender<Result<AgentEvent, AgentError>>;

/// Backend that answers every input with an echo turn.
///
/// Each turn emits `user_echo`, two `assistant_delta` chunks ("re: " plus
/// the input text) and a `result_success`, except when the input text is
/// exactly "stall": that turn emits its deltas and then goes quiet without
/// a terminal result, leaving the session busy and any later inputs queued.
pub(crate) struct ScriptedClient {
    session_id: String,
    stream_calls: AtomicUsize,
    failing_streams: AtomicUsize,
    history: Mutex<HashMap<String, Vec<AgentEvent>>>,
}

impl ScriptedClient {
    pub fn new(session_id: &str) -> Self {
        Self {
            session_id: session_id.to_string(),
            stream_calls: AtomicUsize::new(0),
            failing_streams: AtomicUsize::new(0),
            history: Mutex::new(HashMap::new()),
        }
    }

    /// Make the next `n` opened streams fail with a transport error.
    pub fn failing_streams(self, n: usize) -> Self {
        self.failing_streams.store(n, Ordering::SeqCst);
        self
    }

    /// Seed a canned `load_history` answer for a session id.
    pub fn with_history(self, session_id: &str, events: Vec<AgentEvent>) -> Self {
        self.history
            .lock()
            .unwrap()
            .insert(session_id.to_string(), events);
        self
    }

    pub fn stream_calls(&self) -> usize {
        self.stream_calls.load(Ordering::SeqCst)
    }

    fn take_failure(&self) -> bool {
        self.failing_streams
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl AgentClient for ScriptedClient {
    async fn stream(
        &self,
        input: StreamInput,
        _options: crate::session::SessionOptions,
    ) -> Result<EventStream, AgentError> {
        self.stream_calls.fetch_add(1, Ordering::SeqCst);

        if self.take_failure() {
            let failure = futures::stream::iter(vec![Err(AgentError::Transport(
                "connection reset".to_string(),
            ))]);
            return Ok(failure.boxed());
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let session_id = self.session_id.clone();

        match input {
            StreamInput::Queue(queue) => {
                tokio::spawn(async move {
                    let mut inited = false;
                    while let Some(input) = queue.pull().await {
                        if !inited {
                            if send_init(&tx, &session_id).is_err() {
                                return;
                            }
                            inited = true;
                        }
                        if emit_turn(&tx, &input).is_err() {
                            return;
                        }
                        // A stalled turn never finishes; later inputs stay
                        // queued until the session tears this stream down.
                        if input.content.display_text() == "stall" {
                            futures::future::pending::<()>().await;
                        }
                    }
                });
            }
            StreamInput::Prompt(prompt) => {
                tokio::spawn(async move {
                    let input = UserInput::text(prompt);
                    if send_init(&tx, &session_id).is_ok() {
                        let _ = emit_turn(&tx, &input);
                    }
                });
            }
        }

        Ok(UnboundedReceiverStream::new(rx).boxed())
    }

    async fn load_history(&self, session_id: &str) -> Result<Vec<AgentEvent>, AgentError> {
        self.history
            .lock()
            .unwrap()
            .get(session_id)
            .cloned()
            .ok_or_else(|| AgentError::HistoryNotFound(session_id.to_string()))
    }
}

fn send_init(tx: &EventSender, session_id: &str) -> Result<(), ()> {
    tx.send(Ok(AgentEvent::SystemInit {
        session_id: session_id.to_string(),
        model: Some("scripted".to_string()),
        cwd: None,
    }))
    .map_err(|_| ())
}

fn emit_turn(tx: &EventSender, input: &UserInput) -> Result<(), ()> {
    let turn_id = input.turn_id.clone();
    let text = input.content.display_text();

    tx.send(Ok(AgentEvent::UserEcho {
        turn_id: turn_id.clone(),
        content: text.clone(),
    }))
    .map_err(|_| ())?;
    tx.send(Ok(AgentEvent::AssistantDelta {
        turn_id: turn_id.clone(),
        text: "re: ".to_string(),
    }))
    .map_err(|_| ())?;
    tx.send(Ok(AgentEvent::AssistantDelta {
        turn_id: turn_id.clone(),
        text: text.clone(),
    }))
    .map_err(|_| ())?;

    if text == "stall" {
        return Ok(());
    }

    tx.send(Ok(AgentEvent::ResultSuccess {
        turn_id,
        summary: Some(format!("answered: {text}")),
        usage: Some(Usage {
            input_tokens: text.len() as u64,
            output_tokens: 2,
        }),
    }))
    .map_err(|_| ())
}
