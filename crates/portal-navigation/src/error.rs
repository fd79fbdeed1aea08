//! Navigation error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum NavigationError {
    #[error("Route path must be absolute: {0}")]
    RelativePath(String),

    #[error("Login path cannot be inside a protected area: {0}")]
    ProtectedLogin(String),
}
