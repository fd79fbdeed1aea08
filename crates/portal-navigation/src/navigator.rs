//! Navigation capability
//!
//! Teardown never pokes a window location itself; it asks a [`Navigator`]
//! to replace the current entry. Hosts plug in whatever drives their router.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;

/// Maximum number of entries kept by [`HistoryNavigator`]
const MAX_HISTORY: usize = 100;

pub trait Navigator: Send + Sync {
    /// Path of the currently displayed route
    fn current_path(&self) -> String;

    /// Replace the current entry with `path` (no new history entry for back navigation)
    fn replace(&self, path: &str);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NavigationKind {
    Push,
    Replace,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub path: String,
    pub kind: NavigationKind,
    pub navigated_at: DateTime<Utc>,
}

struct NavigatorState {
    current: String,
    history: VecDeque<HistoryEntry>,
}

/// In-memory navigator that records every transition
pub struct HistoryNavigator {
    state: Arc<RwLock<NavigatorState>>,
}

impl HistoryNavigator {
    pub fn new(initial_path: impl Into<String>) -> Self {
        Self {
            state: Arc::new(RwLock::new(NavigatorState {
                current: initial_path.into(),
                history: VecDeque::new(),
            })),
        }
    }

    /// User-driven navigation (link click, address change)
    pub fn push(&self, path: &str) {
        self.record(path, NavigationKind::Push);
    }

    pub fn history(&self) -> Vec<HistoryEntry> {
        self.state.read().history.iter().cloned().collect()
    }

    /// Number of replacements issued, i.e. redirects
    pub fn replace_count(&self) -> usize {
        self.state
            .read()
            .history
            .iter()
            .filter(|e| e.kind == NavigationKind::Replace)
            .count()
    }

    fn record(&self, path: &str, kind: NavigationKind) {
        let mut state = self.state.write();
        state.current = path.to_string();
        state.history.push_back(HistoryEntry {
            path: path.to_string(),
            kind,
            navigated_at: Utc::now(),
        });
        while state.history.len() > MAX_HISTORY {
            state.history.pop_front();
        }
    }
}

impl Navigator for HistoryNavigator {
    fn current_path(&self) -> String {
        self.state.read().current.clone()
    }

    fn replace(&self, path: &str) {
        if self.state.read().current == path {
            tracing::debug!(path = %path, "Already on route, ignoring replace");
            return;
        }
        tracing::debug!(path = %path, "Replacing current route");
        self.record(path, NavigationKind::Replace);
    }
}

impl Clone for HistoryNavigator {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}
