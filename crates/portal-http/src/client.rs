//! API client
//!
//! Request pipeline:
//! 1. the interceptor attaches the current access token
//! 2. the transport executes; any response resets the connectivity counter,
//!    no response increments it
//! 3. 2xx is returned to the caller
//! 4. 401 on an unmarked request marks it, renews (single-flight) and replays it
//! 5. 403 and every other status go back to the caller untouched

use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use portal_navigation::{Navigator, RouteMap};
use portal_session::{AuthEventSink, TerminationReason, TokenStore};

use crate::auth::{AuthEndpoints, LoginRequest, LoginResponse};
use crate::connectivity::{ConnectivityMonitor, DEFAULT_CONNECTIVITY_THRESHOLD};
use crate::error::ApiError;
use crate::interceptor::BearerInterceptor;
use crate::refresh::RefreshCoordinator;
use crate::request::ApiRequest;
use crate::Result;

#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub base_url: String,
    pub timeout: Duration,
    pub connectivity_threshold: u32,
    pub endpoints: AuthEndpoints,
}

impl ClientOptions {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000/api/".to_string(),
            timeout: Duration::from_secs(30),
            connectivity_threshold: DEFAULT_CONNECTIVITY_THRESHOLD,
            endpoints: AuthEndpoints::default(),
        }
    }
}

pub struct ApiClient {
    http: reqwest::Client,
    base_url: Url,
    login_url: Url,
    interceptor: BearerInterceptor,
    refresh: RefreshCoordinator,
    connectivity: ConnectivityMonitor,
    tokens: TokenStore,
}

impl ApiClient {
    pub fn new(
        options: ClientOptions,
        tokens: TokenStore,
        sink: Arc<dyn AuthEventSink>,
        navigator: Arc<dyn Navigator>,
        routes: RouteMap,
    ) -> Result<Self> {
        let base_url = parse_base_url(&options.base_url)?;
        let login_url = join_endpoint(&base_url, &options.endpoints.login)?;
        let refresh_url = join_endpoint(&base_url, &options.endpoints.refresh)?;

        let http = reqwest::Client::builder()
            .timeout(options.timeout)
            .build()
            .map_err(ApiError::Request)?;

        let refresh = RefreshCoordinator::new(
            http.clone(),
            refresh_url,
            tokens.clone(),
            Arc::clone(&sink),
        );
        let connectivity = ConnectivityMonitor::new(
            options.connectivity_threshold,
            navigator,
            routes,
            sink,
        );

        Ok(Self {
            http,
            base_url,
            login_url,
            interceptor: BearerInterceptor::new(tokens.clone()),
            refresh,
            connectivity,
            tokens,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn tokens(&self) -> &TokenStore {
        &self.tokens
    }

    pub fn connectivity(&self) -> &ConnectivityMonitor {
        &self.connectivity
    }

    pub fn refresh_coordinator(&self) -> &RefreshCoordinator {
        &self.refresh
    }

    /// Exchange credentials for a token pair. Never routed through renewal.
    pub async fn login(&self, credentials: &LoginRequest) -> Result<LoginResponse> {
        tracing::info!(email = %credentials.email, "Signing in");

        let sent = self
            .http
            .post(self.login_url.clone())
            .json(credentials)
            .send()
            .await;
        let response = self.observe(sent)?;

        if !response.status().is_success() {
            let err = ApiError::from_response(response).await;
            tracing::warn!(error = %err, "Sign-in rejected");
            return Err(err);
        }

        response
            .json::<LoginResponse>()
            .await
            .map_err(|e| ApiError::Decode(e.to_string()))
    }

    /// Run a request through the full pipeline
    pub async fn execute(&self, mut request: ApiRequest) -> Result<Response> {
        loop {
            let mut outbound = request.build(&self.http, &self.base_url)?;
            let attached = self.interceptor.intercept(&mut outbound);

            tracing::debug!(
                request_id = %request.id(),
                method = %request.method(),
                path = %request.path(),
                retried = request.retry_marker().is_set(),
                "Sending request"
            );

            let response = self.observe(self.http.execute(outbound).await)?;
            let status = response.status();

            if status.is_success() {
                return Ok(response);
            }

            if status == StatusCode::UNAUTHORIZED && !request.retry_marker().is_set() {
                request.mark_retried();
                tracing::debug!(request_id = %request.id(), "Access token rejected");
                self.recover_session(attached.as_deref()).await?;
                continue;
            }

            tracing::debug!(
                request_id = %request.id(),
                status = %status,
                "Request returned error status"
            );
            return Err(ApiError::from_response(response).await);
        }
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.send_json(ApiRequest::get(path)).await
    }

    pub async fn post_json<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        self.send_json(ApiRequest::post(path).json(body)?).await
    }

    pub async fn put_json<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        self.send_json(ApiRequest::put(path).json(body)?).await
    }

    pub async fn patch_json<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        self.send_json(ApiRequest::patch(path).json(body)?).await
    }

    pub async fn delete(&self, path: &str) -> Result<()> {
        self.execute(ApiRequest::delete(path)).await?;
        Ok(())
    }

    async fn send_json<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T> {
        let response = self.execute(request).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| ApiError::Decode(e.to_string()))
    }

    /// Feed the transport outcome to the connectivity monitor
    fn observe(&self, sent: reqwest::Result<Response>) -> Result<Response> {
        match sent {
            Ok(response) => {
                self.connectivity.record_response();
                Ok(response)
            }
            Err(e) if e.is_builder() => Err(ApiError::Request(e)),
            Err(e) => {
                if self.connectivity.record_transport_failure() {
                    return Err(ApiError::SessionEnded(TerminationReason::ConnectivityLost));
                }
                Err(ApiError::Transport(e))
            }
        }
    }

    /// Make a valid access token available for the replay
    async fn recover_session(&self, attached: Option<&str>) -> Result<()> {
        self.refresh
            .refresh(attached)
            .await
            .map(|_| ())
            .map_err(ApiError::SessionEnded)
    }
}

impl Clone for ApiClient {
    fn clone(&self) -> Self {
        Self {
            http: self.http.clone(),
            base_url: self.base_url.clone(),
            login_url: self.login_url.clone(),
            interceptor: self.interceptor.clone(),
            refresh: self.refresh.clone(),
            connectivity: self.connectivity.clone(),
            tokens: self.tokens.clone(),
        }
    }
}

/// Base URLs always end in `/` so relative joins append instead of replacing
fn parse_base_url(raw: &str) -> Result<Url> {
    let mut url = Url::parse(raw).map_err(|e| ApiError::InvalidUrl(format!("{raw}: {e}")))?;
    if url.cannot_be_a_base() {
        return Err(ApiError::InvalidUrl(raw.to_string()));
    }
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

fn join_endpoint(base: &Url, endpoint: &str) -> Result<Url> {
    base.join(endpoint.trim_start_matches('/'))
        .map_err(|e| ApiError::InvalidUrl(format!("{endpoint}: {e}")))
}
