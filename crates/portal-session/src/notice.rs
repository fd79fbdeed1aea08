//! Session-ending reasons and the user-facing notices they produce

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Why a session was torn down. Permission failures (403) never end a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TerminationReason {
    /// Tokens vanished or expired while the UI still believed it was signed in
    Expired,
    /// A 401 arrived but there was no refresh token to exchange
    RefreshTokenMissing,
    /// The renewal endpoint rejected the refresh token or could not be reached
    RefreshFailed,
    /// Consecutive transport failures crossed the threshold on a protected route
    ConnectivityLost,
}

impl TerminationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            TerminationReason::Expired => "expired",
            TerminationReason::RefreshTokenMissing => "refresh-token-missing",
            TerminationReason::RefreshFailed => "refresh-failed",
            TerminationReason::ConnectivityLost => "connectivity-lost",
        }
    }

    pub fn notice_kind(&self) -> NoticeKind {
        match self {
            TerminationReason::Expired
            | TerminationReason::RefreshTokenMissing
            | TerminationReason::RefreshFailed => NoticeKind::SessionExpired,
            TerminationReason::ConnectivityLost => NoticeKind::ConnectionLost,
        }
    }
}

impl std::fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeKind {
    SessionExpired,
    ConnectionLost,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notice {
    pub kind: NoticeKind,
    pub reason: TerminationReason,
    pub message: String,
}

impl Notice {
    pub fn for_reason(reason: TerminationReason) -> Self {
        let kind = reason.notice_kind();
        let message = match kind {
            NoticeKind::SessionExpired => "Your session has expired. Please sign in again.",
            NoticeKind::ConnectionLost => {
                "Connection to the server was lost. Please sign in again once it is back."
            }
        };

        Self {
            kind,
            reason,
            message: message.to_string(),
        }
    }
}

/// User-facing notification channel (toast, banner, ...)
pub trait Notifier: Send + Sync {
    fn notify(&self, notice: &Notice);
}

/// Notifier for headless hosts: notices go to the log
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, notice: &Notice) {
        tracing::warn!(
            kind = ?notice.kind,
            reason = %notice.reason,
            "{}",
            notice.message
        );
    }
}

/// Keeps every notice it receives
#[derive(Debug, Clone, Default)]
pub struct RecordingNotifier {
    notices: Arc<Mutex<Vec<Notice>>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notices(&self) -> Vec<Notice> {
        self.notices.lock().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notice: &Notice) {
        self.notices.lock().push(notice.clone());
    }
}
