//! Portal Storage Layer
//!
//! SQLite-backed persistence for everything that must survive a reload:
//! - the current access/refresh token pair
//! - the session state snapshot shown by the UI before the auth check runs
//!
//! All multi-column writes are transactional.

mod database;
mod error;
mod migrations;

pub use database::Database;
pub use error::StorageError;

pub type Result<T> = std::result::Result<T, StorageError>;
