//! Session lifecycle: state machine, input bridging, registry and fanout.

mod bridge;
mod manager;
#[allow(clippy::module_inception)]
mod session;
mod state;

pub use bridge::InputQueue;
pub use manager::{ConnectionId, Listener, ManagerConfig, SessionManager, SubscriberId};
pub use session::{Session, SessionError, SessionInfo};
pub use state::{OptionsPatch, SessionId, SessionOptions, SessionState};
