//! Session lifecycle container
//!
//! Owns every store and the API client, and exposes the operations the
//! dashboard shell drives directly: startup, sign-in, sign-out and the
//! auth-status check.

use std::sync::Arc;
use tokio::sync::watch;

use portal_http::{ApiClient, LoginRequest};
use portal_navigation::{Navigator, RouteMap};
use portal_session::{
    AuthEventSink, Notifier, Profile, SessionState, SessionStateStore, SessionTerminator,
    TerminationReason, TokenPair, TokenStore,
};
use portal_storage::Database;

use crate::config::Config;
use crate::Result;

pub struct Portal {
    config: Config,
    db: Database,
    tokens: TokenStore,
    state: SessionStateStore,
    terminator: SessionTerminator,
    client: ApiClient,
    routes: RouteMap,
}

impl Portal {
    /// Open the configured database and wire the session lifecycle
    pub fn new(
        config: Config,
        navigator: Arc<dyn Navigator>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self> {
        config.validate()?;

        if let Some(parent) = config.database_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::open(&config.database_path)?;

        Self::with_database(config, db, navigator, notifier)
    }

    pub fn with_database(
        config: Config,
        db: Database,
        navigator: Arc<dyn Navigator>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self> {
        config.validate()?;
        let routes = config.routes()?;

        let tokens = TokenStore::new(db.clone(), config.token_lifetimes());
        let state = SessionStateStore::new(db.clone(), tokens.clone());
        let terminator = SessionTerminator::new(
            tokens.clone(),
            state.clone(),
            Arc::clone(&navigator),
            notifier,
            routes.clone(),
        );

        let sink: Arc<dyn AuthEventSink> = Arc::new(terminator.clone());
        let client = ApiClient::new(
            config.client_options(),
            tokens.clone(),
            sink,
            navigator,
            routes.clone(),
        )?;

        tracing::info!(
            api = %client.base_url(),
            login = %routes.login_path(),
            threshold = config.connectivity_threshold,
            "Portal session lifecycle ready"
        );

        Ok(Self {
            config,
            db,
            tokens,
            state,
            terminator,
            client,
            routes,
        })
    }

    /// Restore tokens and the session snapshot from the last run.
    ///
    /// An expired access token with a live refresh token is renewed before
    /// the session state is derived. A snapshot that claimed a session whose
    /// tokens are gone ends with an `Expired` teardown.
    pub async fn initialize(&self) -> Result<SessionState> {
        self.tokens.load()?;

        let mut renewal_attempted = false;
        if !self.tokens.has_access_token() && self.tokens.refresh_token().is_some() {
            renewal_attempted = true;
            tracing::info!("Access token expired since last run, renewing");
            if let Err(reason) = self.client.refresh_coordinator().refresh(None).await {
                tracing::warn!(reason = %reason, "Startup renewal failed");
            }
        }

        let restored = self.state.initialize()?;

        if restored.is_authenticated && !self.state.is_authenticated() && !renewal_attempted {
            self.terminator.terminate(TerminationReason::Expired);
        }

        Ok(self.state.state())
    }

    /// Sign in and start a new session episode
    pub async fn login(&self, email: &str, password: &str) -> Result<Profile> {
        let credentials = LoginRequest {
            email: email.to_string(),
            password: password.to_string(),
        };
        let response = self.client.login(&credentials).await?;

        let pair = TokenPair::new(response.access_token, response.refresh_token)?;
        self.terminator.rearm();
        self.tokens.replace(pair)?;
        self.client.connectivity().reset();

        let mut profile = Profile::new(email);
        profile.password_change_required = response.password_change_required;
        self.state.set_user(profile.clone())?;

        Ok(profile)
    }

    /// Local sign-out; the backend is not contacted
    pub fn logout(&self) {
        self.terminator.sign_out();
    }

    pub fn check_auth_status(&self) -> Result<bool> {
        Ok(self.state.check_auth_status()?)
    }

    pub fn is_authenticated(&self) -> bool {
        self.state.is_authenticated()
    }

    pub fn user(&self) -> Option<Profile> {
        self.state.user()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn client(&self) -> &ApiClient {
        &self.client
    }

    pub fn session(&self) -> &SessionStateStore {
        &self.state
    }

    pub fn terminator(&self) -> &SessionTerminator {
        &self.terminator
    }

    pub fn routes(&self) -> &RouteMap {
        &self.routes
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn database(&self) -> &Database {
        &self.db
    }
}
