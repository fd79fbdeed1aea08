//! Portal Session Lifecycle
//!
//! Everything that defines whether a user is signed in:
//! - [`TokenStore`] is the durable holder of the access/refresh pair
//! - [`SessionStateStore`] is the reactive `{user, is_authenticated}` record the UI reads
//! - [`SessionTerminator`] tears both down exactly once per episode and redirects to login
//!
//! The HTTP layer never depends on the terminator directly; it receives an
//! [`AuthEventSink`] at construction.

mod error;
mod notice;
mod profile;
mod sink;
mod state_store;
mod terminator;
mod token;
mod token_store;

pub use error::SessionError;
pub use notice::{LogNotifier, Notice, NoticeKind, Notifier, RecordingNotifier, TerminationReason};
pub use profile::Profile;
pub use sink::AuthEventSink;
pub use state_store::{SessionState, SessionStateStore, SESSION_SNAPSHOT_KEY};
pub use terminator::SessionTerminator;
pub use token::{fingerprint, TokenLifetimes, TokenPair};
pub use token_store::TokenStore;

pub type Result<T> = std::result::Result<T, SessionError>;
