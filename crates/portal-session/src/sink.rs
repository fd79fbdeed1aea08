//! Capability handed to the HTTP client at construction.
//!
//! The client reports session-ending events through this trait and never
//! reaches into the stores, the router or the notification layer itself.

use crate::notice::TerminationReason;

pub trait AuthEventSink: Send + Sync {
    /// Emit the user-facing notice for `reason` without tearing anything down
    fn notify(&self, reason: TerminationReason);

    /// End the session. Returns `false` when a teardown already ran for this episode.
    fn terminate(&self, reason: TerminationReason) -> bool;
}
