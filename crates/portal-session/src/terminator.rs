//! Session Terminator
//!
//! Idempotent teardown. Every caller that decides the session is over
//! (refresh failure, lost connectivity, expired tokens) funnels through
//! [`SessionTerminator::terminate`]; a one-shot latch collapses concurrent
//! calls into a single teardown per episode. The latch re-arms on the next
//! sign-in.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use portal_navigation::{Navigator, RouteMap};

use crate::notice::{Notice, Notifier, TerminationReason};
use crate::sink::AuthEventSink;
use crate::state_store::SessionStateStore;
use crate::token_store::TokenStore;

pub struct SessionTerminator {
    tokens: TokenStore,
    state: SessionStateStore,
    navigator: Arc<dyn Navigator>,
    notifier: Arc<dyn Notifier>,
    routes: RouteMap,
    /// Closed once a teardown has run for the current episode
    latch: Arc<AtomicBool>,
    teardowns: Arc<AtomicU64>,
}

impl SessionTerminator {
    pub fn new(
        tokens: TokenStore,
        state: SessionStateStore,
        navigator: Arc<dyn Navigator>,
        notifier: Arc<dyn Notifier>,
        routes: RouteMap,
    ) -> Self {
        Self {
            tokens,
            state,
            navigator,
            notifier,
            routes,
            latch: Arc::new(AtomicBool::new(false)),
            teardowns: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Open the latch for a new session episode (called on sign-in)
    pub fn rearm(&self) {
        self.latch.store(false, Ordering::SeqCst);
    }

    pub fn is_latched(&self) -> bool {
        self.latch.load(Ordering::SeqCst)
    }

    /// Number of teardowns actually executed
    pub fn teardown_count(&self) -> u64 {
        self.teardowns.load(Ordering::SeqCst)
    }

    /// User-initiated sign-out: same teardown, no notice
    pub fn sign_out(&self) {
        self.latch.store(true, Ordering::SeqCst);
        tracing::info!("Signing out");
        self.clear_stores();
        self.redirect_to_login();
    }

    fn clear_stores(&self) {
        // Teardown must finish even when persistence fails
        if let Err(e) = self.tokens.clear() {
            tracing::error!(error = %e, "Failed to clear token store during teardown");
        }
        if let Err(e) = self.state.clear() {
            tracing::error!(error = %e, "Failed to clear session state during teardown");
        }
    }

    fn redirect_to_login(&self) {
        let current = self.navigator.current_path();
        if self.routes.is_login(&current) {
            tracing::debug!(path = %current, "Already on login route, skipping redirect");
            return;
        }

        tracing::info!(from = %current, to = %self.routes.login_path(), "Redirecting to login");
        self.navigator.replace(self.routes.login_path());
    }
}

impl AuthEventSink for SessionTerminator {
    fn notify(&self, reason: TerminationReason) {
        self.notifier.notify(&Notice::for_reason(reason));
    }

    fn terminate(&self, reason: TerminationReason) -> bool {
        if self.latch.swap(true, Ordering::SeqCst) {
            tracing::debug!(reason = %reason, "Teardown already ran for this episode");
            return false;
        }

        tracing::warn!(reason = %reason, "Terminating session");
        self.clear_stores();
        self.notify(reason);
        self.redirect_to_login();
        self.teardowns.fetch_add(1, Ordering::SeqCst);

        true
    }
}

impl Clone for SessionTerminator {
    fn clone(&self) -> Self {
        Self {
            tokens: self.tokens.clone(),
            state: self.state.clone(),
            navigator: Arc::clone(&self.navigator),
            notifier: Arc::clone(&self.notifier),
            routes: self.routes.clone(),
            latch: Arc::clone(&self.latch),
            teardowns: Arc::clone(&self.teardowns),
        }
    }
}
