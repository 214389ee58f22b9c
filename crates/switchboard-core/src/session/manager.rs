//! Session registry: lookup, subscription bookkeeping, inbound routing.
//!
//! The registry owns subscriber membership (sessions only read it to
//! broadcast) and is the single place connections are mapped to sessions.
//! All configuration is resolved once at construction and passed in; the
//! registry never consults the environment on a call path.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use crate::agent::client::AgentClient;
use crate::agent::event::AgentEvent;
use crate::protocol::{ClientRequest, MessageContent, ServerNotice, UserInput};
use crate::session::session::{Session, SessionError, SessionInfo};
use crate::session::state::{SessionId, SessionOptions};
use crate::transcript::TranscriptStore;

/// Identifies one attached listener (typically one client connection).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriberId(pub String);

/// Identifies one transport connection for session affinity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub String);

/// Where a subscriber receives its notices. Unbounded so a slow consumer
/// never stalls the broadcast path; a dropped receiver is skipped.
pub type Listener = mpsc::UnboundedSender<ServerNotice>;

/// Registry configuration, resolved once at process start.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    pub transcript_root: PathBuf,
    pub default_options: SessionOptions,
}

#[derive(Default)]
struct ManagerInner {
    sessions: HashMap<SessionId, Arc<Session>>,
    connections: HashMap<ConnectionId, SessionId>,
    subscriptions: HashMap<SubscriberId, SessionId>,
}

/// Registry of live sessions plus the inbound request dispatcher.
pub struct SessionManager {
    client: Arc<dyn AgentClient>,
    store: TranscriptStore,
    default_options: SessionOptions,
    inner: Mutex<ManagerInner>,
}

impl SessionManager {
    pub fn new(client: Arc<dyn AgentClient>, config: ManagerConfig) -> Self {
        Self {
            client,
            store: TranscriptStore::new(config.transcript_root),
            default_options: config.default_options,
            inner: Mutex::new(ManagerInner::default()),
        }
    }

    /// Resolve the session for a connection, creating an idle one if needed.
    ///
    /// A `session_id` is matched against backend-confirmed ids first; when
    /// it is unknown a fresh session is created rather than failing, since
    /// the id may belong to a transcript the backend can still resume.
    pub fn get_or_create(
        &self,
        connection: &ConnectionId,
        session_id: Option<&str>,
    ) -> Arc<Session> {
        let mut inner = self.inner.lock().unwrap();

        if let Some(target) = session_id {
            if let Some(session) = inner
                .sessions
                .values()
                .find(|s| s.backend_id().as_deref() == Some(target))
                .cloned()
            {
                inner
                    .connections
                    .insert(connection.clone(), session.handle().clone());
                return session;
            }
        } else if let Some(handle) = inner.connections.get(connection) {
            if let Some(session) = inner.sessions.get(handle).cloned() {
                return session;
            }
        }

        let session = Session::new(Arc::clone(&self.client), self.default_options.clone());
        log::info!("created session {}", session.handle());
        inner
            .sessions
            .insert(session.handle().clone(), Arc::clone(&session));
        inner
            .connections
            .insert(connection.clone(), session.handle().clone());
        session
    }

    /// Attach a listener to a session. The listener receives the full
    /// history snapshot and current state before any live event.
    ///
    /// The subscription record lands under the registry lock before the
    /// listener attaches, so a concurrent unsubscribe of another listener
    /// cannot collect the session in between. If a collection already won
    /// that race the session is re-registered here.
    pub fn subscribe(&self, id: SubscriberId, session: &Arc<Session>, listener: Listener) {
        {
            let mut inner = self.inner.lock().unwrap();
            inner
                .sessions
                .entry(session.handle().clone())
                .or_insert_with(|| Arc::clone(session));
            inner.subscriptions.insert(id.clone(), session.handle().clone());
        }
        session.attach_listener(id, listener);
    }

    /// Detach a listener and collect the session if nothing keeps it alive.
    pub fn unsubscribe(&self, id: &SubscriberId) {
        let session = {
            let mut inner = self.inner.lock().unwrap();
            let Some(handle) = inner.subscriptions.remove(id) else {
                return;
            };
            inner.sessions.get(&handle).cloned()
        };

        if let Some(session) = session {
            session.detach_listener(id);
            self.collect_if_idle(&session);
        }
    }

    /// Dispatch one inbound request on behalf of a connection.
    pub async fn route_inbound(
        &self,
        connection: &ConnectionId,
        request: ClientRequest,
    ) -> Result<(), SessionError> {
        match request {
            ClientRequest::Chat {
                content,
                session_id,
                attachments,
            } => {
                let content = MessageContent::Text(content);
                if content.is_empty() {
                    return Err(SessionError::EmptyMessage);
                }
                for attachment in &attachments {
                    attachment
                        .validate()
                        .map_err(SessionError::MalformedAttachment)?;
                }

                let session = self.get_or_create(connection, session_id.as_deref());
                session.send(UserInput::new(content, attachments))
            }

            ClientRequest::SetSdkOptions(patch) => {
                let session = self.get_or_create(connection, None);
                session.merge_options(&patch);
                Ok(())
            }

            ClientRequest::Resume { session_id } => {
                let session = self.get_or_create(connection, None);
                let events = self.load_events(&session_id).await;
                session.resume(session_id, events);
                Ok(())
            }
        }
    }

    /// Snapshot of every live session.
    pub fn list(&self) -> Vec<SessionInfo> {
        let inner = self.inner.lock().unwrap();
        let mut infos: Vec<_> = inner.sessions.values().map(|s| s.info()).collect();
        infos.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        infos
    }

    /// Session ids with a transcript on disk, resumable even when no live
    /// session exists for them.
    pub fn known_transcripts(&self) -> Vec<String> {
        self.store.list()
    }

    /// Explicitly destroy a session, aborting its stream.
    pub fn remove(&self, handle: &SessionId) -> bool {
        let session = {
            let mut inner = self.inner.lock().unwrap();
            let session = inner.sessions.remove(handle);
            if session.is_some() {
                inner.connections.retain(|_, h| h != handle);
                inner.subscriptions.retain(|_, h| h != handle);
            }
            session
        };

        match session {
            Some(session) => {
                log::info!("removed session {handle}");
                session.shutdown();
                true
            }
            None => false,
        }
    }

    fn collect_if_idle(&self, session: &Arc<Session>) {
        if !session.should_collect() {
            return;
        }
        let handle = session.handle().clone();
        let mut inner = self.inner.lock().unwrap();
        // Re-check under the registry lock. The subscription map must be
        // consulted too: a racing subscribe has recorded itself there before
        // its listener is attached, and the session alone cannot see it yet.
        let still_subscribed = inner.subscriptions.values().any(|h| *h == handle);
        if !still_subscribed && session.should_collect() {
            inner.sessions.remove(&handle);
            inner.connections.retain(|_, h| *h != handle);
            log::info!("collected idle session {handle}");
            session.shutdown();
        }
    }

    /// Store-first history lookup with a backend fallback; resume degrades
    /// to an empty history rather than failing.
    async fn load_events(&self, session_id: &str) -> Vec<AgentEvent> {
        if let Some(events) = self.store.load(session_id) {
            return events;
        }
        match self.client.load_history(session_id).await {
            Ok(events) => events,
            Err(e) => {
                log::warn!("no history found for {session_id}: {e}; resuming empty");
                Vec::new()
            }
        }
    }
}
