//! Portal Navigation
//!
//! Redirects issued by session teardown go through the [`Navigator`]
//! capability instead of touching a browser location directly, so the
//! session state machine runs the same way under test as in the app.
//!
//! - [`RouteMap`] knows the login entry point and which areas are protected
//! - [`HistoryNavigator`] is the in-memory navigator used by tests and headless hosts

mod error;
mod navigator;
mod route;

pub use error::NavigationError;
pub use navigator::{HistoryEntry, HistoryNavigator, NavigationKind, Navigator};
pub use route::RouteMap;

pub type Result<T> = std::result::Result<T, NavigationError>;
