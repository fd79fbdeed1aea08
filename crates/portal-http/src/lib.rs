//! Portal API Client
//!
//! Every domain service (news, bulletins, commissions, galleries, users,
//! roles) talks to the backend through [`ApiClient`], which:
//! - attaches the current access token as a bearer credential
//! - renews an expired access token once per request and replays the call
//! - shares a single in-flight renewal between concurrent 401s
//! - counts consecutive transport failures and ends the session when the
//!   backend stays unreachable on a protected route
//!
//! Collaborators must not retry on 401 themselves.

mod auth;
mod client;
mod connectivity;
mod error;
mod interceptor;
mod refresh;
mod request;

pub use auth::{AuthEndpoints, LoginRequest, LoginResponse, RefreshRequest, RefreshResponse};
pub use client::{ApiClient, ClientOptions};
pub use connectivity::{ConnectivityMonitor, DEFAULT_CONNECTIVITY_THRESHOLD};
pub use error::ApiError;
pub use interceptor::BearerInterceptor;
pub use refresh::RefreshCoordinator;
pub use request::{ApiRequest, RetryMarker};

pub type Result<T> = std::result::Result<T, ApiError>;
