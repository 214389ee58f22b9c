//! Push-to-pull bridge between `send()` callers and the stream's input side.
//!
//! Callers push fire-and-forget; the backend pulls the next input only when
//! it is ready to read one. The queue never completes on its own — only
//! `close` ends it, which resolves any pending `pull` to `None` so the
//! consumer gets a clean termination signal on cancellation.

use std::collections::VecDeque;
use std::sync::Mutex;

use tokio::sync::Notify;

use crate::protocol::UserInput;

#[derive(Default)]
struct QueueState {
    items: VecDeque<UserInput>,
    closed: bool,
}

/// FIFO queue of pending user inputs for one session.
#[derive(Default)]
pub struct InputQueue {
    state: Mutex<QueueState>,
    notify: Notify,
}

impl InputQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue an input without blocking.
    ///
    /// Returns `false` if the queue was already closed (the input is
    /// dropped; the caller is expected to have swapped in a fresh queue).
    pub fn push(&self, input: UserInput) -> bool {
        {
            let mut state = self.state.lock().unwrap();
            if state.closed {
                return false;
            }
            state.items.push_back(input);
        }
        self.notify.notify_one();
        true
    }

    /// Await the next input in submission order.
    ///
    /// Resolves to `None` once the queue is closed and drained.
    pub async fn pull(&self) -> Option<UserInput> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register before checking state so a close() racing this pull
            // cannot slip between the check and the await.
            notified.as_mut().enable();

            {
                let mut state = self.state.lock().unwrap();
                if let Some(input) = state.items.pop_front() {
                    return Some(input);
                }
                if state.closed {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Close the queue, waking any pending `pull`.
    ///
    /// Returns the inputs that were still queued so the caller can decide
    /// whether to carry them over to a fresh queue or discard them.
    pub fn close(&self) -> Vec<UserInput> {
        let drained = {
            let mut state = self.state.lock().unwrap();
            state.closed = true;
            state.items.drain(..).collect()
        };
        self.notify.notify_waiters();
        drained
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
