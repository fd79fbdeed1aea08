//! Portal Core
//!
//! Wires the session lifecycle together for the admin dashboard:
//! storage, token and session stores, the teardown path, and the API
//! client every domain service issues its requests through.

mod config;
mod error;
mod portal;

pub use config::Config;
pub use error::CoreError;
pub use portal::Portal;

// Re-export core components
pub use portal_http::{
    ApiClient, ApiError, ApiRequest, ClientOptions, ConnectivityMonitor, LoginRequest,
    LoginResponse, RefreshCoordinator,
};
pub use portal_navigation::{HistoryNavigator, NavigationError, Navigator, RouteMap};
pub use portal_session::{
    AuthEventSink, LogNotifier, Notice, NoticeKind, Notifier, Profile, RecordingNotifier,
    SessionError, SessionState, SessionStateStore, SessionTerminator, TerminationReason,
    TokenPair, TokenStore,
};
pub use portal_storage::{Database, StorageError};

pub type Result<T> = std::result::Result<T, CoreError>;

/// Initialize logging
pub fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    fmt().with_env_filter(filter).with_target(true).init();
}
