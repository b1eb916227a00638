//! Session lifecycle: the connection state machine, reconnect policy, and
//! the persisted session record.

pub mod machine;
pub mod persistence;

pub use machine::{ReconnectPolicy, SessionMachine};
pub use persistence::{PersistedSessionRecord, Resume, SessionStore};
