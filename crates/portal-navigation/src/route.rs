//! Route classification
//!
//! The connectivity monitor only tears a session down while the user is
//! inside a protected area, and teardown redirects to the login entry point.

use serde::{Deserialize, Serialize};

use crate::error::NavigationError;
use crate::Result;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteMap {
    login_path: String,
    protected_prefixes: Vec<String>,
}

impl RouteMap {
    pub fn new(login_path: impl Into<String>, protected_prefixes: Vec<String>) -> Result<Self> {
        let login_path = normalize(&login_path.into())?;
        let protected_prefixes = protected_prefixes
            .iter()
            .map(|p| normalize(p))
            .collect::<Result<Vec<_>>>()?;

        let map = Self {
            login_path,
            protected_prefixes,
        };

        if map.is_protected(&map.login_path) {
            return Err(NavigationError::ProtectedLogin(map.login_path));
        }

        Ok(map)
    }

    pub fn login_path(&self) -> &str {
        &self.login_path
    }

    pub fn protected_prefixes(&self) -> &[String] {
        &self.protected_prefixes
    }

    /// True when `path` is the login entry point (query and fragment ignored)
    pub fn is_login(&self, path: &str) -> bool {
        matches_prefix(strip_suffixes(path), &self.login_path)
    }

    /// True when `path` falls under one of the protected prefixes
    pub fn is_protected(&self, path: &str) -> bool {
        let path = strip_suffixes(path);
        self.protected_prefixes
            .iter()
            .any(|prefix| matches_prefix(path, prefix))
    }
}

impl Default for RouteMap {
    fn default() -> Self {
        Self {
            login_path: "/login".to_string(),
            protected_prefixes: vec!["/dashboard".to_string()],
        }
    }
}

fn normalize(path: &str) -> Result<String> {
    let trimmed = path.trim();
    if !trimmed.starts_with('/') {
        return Err(NavigationError::RelativePath(path.to_string()));
    }

    let without_trailing = trimmed.trim_end_matches('/');
    if without_trailing.is_empty() {
        Ok("/".to_string())
    } else {
        Ok(without_trailing.to_string())
    }
}

fn strip_suffixes(path: &str) -> &str {
    let end = path.find(['?', '#']).unwrap_or(path.len());
    &path[..end]
}

/// Segment-aware prefix match: `/dashboard` matches `/dashboard/news` but not `/dashboards`
fn matches_prefix(path: &str, prefix: &str) -> bool {
    if prefix == "/" {
        return true;
    }
    let path = path.trim_end_matches('/');
    path == prefix
        || path
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with('/'))
}
