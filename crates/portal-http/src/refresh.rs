//! Refresh Coordinator
//!
//! On a 401 the original request is marked, the refresh token is exchanged
//! for a new pair and the request is replayed once. Renewal is single-flight:
//! every request that 401s while a renewal is pending awaits the same
//! future and therefore retries with the same pair. Two renewals racing
//! against a rotating refresh token would invalidate one another.
//!
//! A pending renewal lives only as long as someone awaits it: when the last
//! waiter is dropped (cancelled by a timeout or `select!`) the slot is
//! cleared and the next 401 starts over with whatever pair is stored then.
//!
//! ```text
//! INITIAL -> AWAITING_REFRESH -> RETRYING -> DONE
//!                  |
//!                  +-> TERMINATED (refresh-token-missing | refresh-failed)
//! ```

use futures_util::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use url::Url;

use portal_session::{fingerprint, AuthEventSink, TerminationReason, TokenPair, TokenStore};

use crate::auth::{RefreshRequest, RefreshResponse};

type RenewalResult = std::result::Result<TokenPair, TerminationReason>;
type PendingRenewal = Shared<BoxFuture<'static, RenewalResult>>;

struct InFlight {
    renewal: PendingRenewal,
    /// Refresh token the renewal was started with
    refresh_token: Option<String>,
    waiters: usize,
}

/// Registration of one caller awaiting a renewal
struct Waiter {
    slot: Arc<Mutex<Option<InFlight>>>,
    renewal: PendingRenewal,
}

impl Drop for Waiter {
    fn drop(&mut self) {
        let mut slot = self.slot.lock();
        let Some(entry) = slot.as_mut() else {
            return;
        };
        if !entry.renewal.ptr_eq(&self.renewal) {
            return;
        }

        entry.waiters -= 1;
        if entry.waiters == 0 {
            *slot = None;
        }
    }
}

pub struct RefreshCoordinator {
    http: reqwest::Client,
    refresh_url: Url,
    tokens: TokenStore,
    sink: Arc<dyn AuthEventSink>,
    /// The renewal currently awaited by one or more requests
    in_flight: Arc<Mutex<Option<InFlight>>>,
    renewals: Arc<AtomicU64>,
}

impl RefreshCoordinator {
    pub fn new(
        http: reqwest::Client,
        refresh_url: Url,
        tokens: TokenStore,
        sink: Arc<dyn AuthEventSink>,
    ) -> Self {
        Self {
            http,
            refresh_url,
            tokens,
            sink,
            in_flight: Arc::new(Mutex::new(None)),
            renewals: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Number of calls made to the renewal endpoint
    pub fn renewal_count(&self) -> u64 {
        self.renewals.load(Ordering::SeqCst)
    }

    pub fn is_refreshing(&self) -> bool {
        self.in_flight.lock().is_some()
    }

    /// Obtain a renewed pair for a request that was rejected while carrying
    /// `rejected`, joining the pending renewal if there is one.
    ///
    /// When the stored token already differs from `rejected` the pair was
    /// rotated after that request went out and is returned without a renewal.
    /// On failure the session has already been handed to the sink.
    pub async fn refresh(&self, rejected: Option<&str>) -> RenewalResult {
        let pending = {
            let mut slot = self.in_flight.lock();
            let refresh_token = self.tokens.refresh_token();

            match slot.as_mut() {
                Some(entry) if entry.refresh_token == refresh_token => {
                    tracing::debug!(waiters = entry.waiters + 1, "Joining in-flight token refresh");
                    entry.waiters += 1;
                    entry.renewal.clone()
                }
                stale => {
                    if stale.is_some() {
                        tracing::debug!("Pending refresh belongs to a replaced pair, restarting");
                    }

                    // Checked under the slot lock: a finished renewal stores its
                    // pair before its last waiter clears the slot
                    if let Some(current) = self.rotated_since(rejected) {
                        tracing::debug!("Token rotated since the request was sent");
                        return Ok(current);
                    }

                    let renewal = Self::renew(
                        self.http.clone(),
                        self.refresh_url.clone(),
                        self.tokens.clone(),
                        Arc::clone(&self.sink),
                        Arc::clone(&self.renewals),
                        refresh_token.clone(),
                    )
                    .boxed()
                    .shared();
                    *slot = Some(InFlight {
                        renewal: renewal.clone(),
                        refresh_token,
                        waiters: 1,
                    });
                    renewal
                }
            }
        };

        let _waiter = Waiter {
            slot: Arc::clone(&self.in_flight),
            renewal: pending.clone(),
        };
        pending.await
    }

    fn rotated_since(&self, rejected: Option<&str>) -> Option<TokenPair> {
        let current = self.tokens.access_token()?;
        if rejected == Some(current.as_str()) {
            return None;
        }
        self.tokens.pair()
    }

    async fn renew(
        http: reqwest::Client,
        refresh_url: Url,
        tokens: TokenStore,
        sink: Arc<dyn AuthEventSink>,
        renewals: Arc<AtomicU64>,
        refresh_token: Option<String>,
    ) -> RenewalResult {
        let Some(refresh_token) = refresh_token else {
            tracing::warn!("Access token rejected and no refresh token is stored");
            sink.terminate(TerminationReason::RefreshTokenMissing);
            return Err(TerminationReason::RefreshTokenMissing);
        };

        renewals.fetch_add(1, Ordering::SeqCst);
        tracing::info!(refresh = %fingerprint(&refresh_token), "Refreshing access token");

        let response = http
            .post(refresh_url)
            .json(&RefreshRequest {
                refresh_token: refresh_token.clone(),
            })
            .send()
            .await;

        let renewed = match response {
            Ok(response) if response.status().is_success() => {
                match response.json::<RefreshResponse>().await {
                    Ok(body) => TokenPair::new(body.access_token, body.refresh_token).ok(),
                    Err(e) => {
                        tracing::warn!(error = %e, "Refresh response body was not a token pair");
                        None
                    }
                }
            }
            Ok(response) => {
                tracing::warn!(status = %response.status(), "Refresh token rejected");
                None
            }
            Err(e) => {
                tracing::warn!(error = %e, "Refresh request failed");
                None
            }
        };

        let Some(pair) = renewed else {
            sink.terminate(TerminationReason::RefreshFailed);
            return Err(TerminationReason::RefreshFailed);
        };

        match tokens.rotate(&refresh_token, pair.clone()) {
            Ok(true) => {
                tracing::info!(access = %fingerprint(&pair.access_token), "Access token refreshed");
                Ok(pair)
            }
            // A sign-in or teardown replaced the pair while the renewal was out
            Ok(false) => tokens.pair().ok_or(TerminationReason::RefreshFailed),
            Err(e) => {
                tracing::error!(error = %e, "Failed to store renewed token pair");
                sink.terminate(TerminationReason::RefreshFailed);
                Err(TerminationReason::RefreshFailed)
            }
        }
    }
}

impl Clone for RefreshCoordinator {
    fn clone(&self) -> Self {
        Self {
            http: self.http.clone(),
            refresh_url: self.refresh_url.clone(),
            tokens: self.tokens.clone(),
            sink: Arc::clone(&self.sink),
            in_flight: Arc::clone(&self.in_flight),
            renewals: Arc::clone(&self.renewals),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use portal_session::TokenLifetimes;
    use portal_storage::Database;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[derive(Default)]
    struct RecordingSink {
        reasons: Mutex<Vec<TerminationReason>>,
    }

    impl AuthEventSink for RecordingSink {
        fn notify(&self, _reason: TerminationReason) {}

        fn terminate(&self, reason: TerminationReason) -> bool {
            self.reasons.lock().push(reason);
            true
        }
    }

    fn coordinator(
        server: &MockServer,
        tokens: TokenStore,
    ) -> (RefreshCoordinator, Arc<RecordingSink>) {
        coordinator_with_client(server, tokens, reqwest::Client::new())
    }

    fn coordinator_with_client(
        server: &MockServer,
        tokens: TokenStore,
        http: reqwest::Client,
    ) -> (RefreshCoordinator, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::default());
        let url = Url::parse(&format!("{}/auth/refresh-token", server.uri())).unwrap();
        let coordinator = RefreshCoordinator::new(http, url, tokens, sink.clone());
        (coordinator, sink)
    }

    fn tokens_with(pair: Option<(&str, &str)>) -> TokenStore {
        let tokens = TokenStore::new(
            Database::open_in_memory().unwrap(),
            TokenLifetimes::default(),
        );
        if let Some((access, refresh)) = pair {
            tokens.replace(TokenPair::new(access, refresh).unwrap()).unwrap();
        }
        tokens
    }

    #[tokio::test]
    async fn test_successful_refresh_replaces_pair() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/refresh-token"))
            .and(body_json(serde_json::json!({ "refreshToken": "r1" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "accessToken": "a2",
                "refreshToken": "r2"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let tokens = tokens_with(Some(("a1", "r1")));
        let (coordinator, sink) = coordinator(&server, tokens.clone());

        let pair = coordinator.refresh(Some("a1")).await.unwrap();
        assert_eq!(pair, TokenPair::new("a2", "r2").unwrap());
        assert_eq!(tokens.pair(), Some(pair));
        assert!(sink.reasons.lock().is_empty());
        assert!(!coordinator.is_refreshing());
    }

    #[tokio::test]
    async fn test_missing_refresh_token_terminates_without_calling() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/refresh-token"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let (coordinator, sink) = coordinator(&server, tokens_with(None));

        let result = coordinator.refresh(None).await;
        assert_eq!(result, Err(TerminationReason::RefreshTokenMissing));
        assert_eq!(*sink.reasons.lock(), vec![TerminationReason::RefreshTokenMissing]);
        assert_eq!(coordinator.renewal_count(), 0);
    }

    #[tokio::test]
    async fn test_rejected_refresh_terminates() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/refresh-token"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;

        let (coordinator, sink) = coordinator(&server, tokens_with(Some(("a1", "r1"))));

        let result = coordinator.refresh(Some("a1")).await;
        assert_eq!(result, Err(TerminationReason::RefreshFailed));
        assert_eq!(*sink.reasons.lock(), vec![TerminationReason::RefreshFailed]);
    }

    #[tokio::test]
    async fn test_server_error_on_refresh_terminates() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/refresh-token"))
            .respond_with(ResponseTemplate::new(503))
            .expect(1)
            .mount(&server)
            .await;

        let tokens = tokens_with(Some(("a1", "r1")));
        let (coordinator, sink) = coordinator(&server, tokens.clone());

        let result = coordinator.refresh(Some("a1")).await;
        assert_eq!(result, Err(TerminationReason::RefreshFailed));
        assert_eq!(*sink.reasons.lock(), vec![TerminationReason::RefreshFailed]);
        assert_eq!(tokens.access_token().as_deref(), Some("a1"));
    }

    #[tokio::test]
    async fn test_unreachable_refresh_endpoint_terminates() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/refresh-token"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
            .mount(&server)
            .await;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(100))
            .build()
            .unwrap();
        let (coordinator, sink) =
            coordinator_with_client(&server, tokens_with(Some(("a1", "r1"))), http);

        let result = coordinator.refresh(Some("a1")).await;
        assert_eq!(result, Err(TerminationReason::RefreshFailed));
        assert_eq!(*sink.reasons.lock(), vec![TerminationReason::RefreshFailed]);
        assert!(!coordinator.is_refreshing());
    }

    #[tokio::test]
    async fn test_malformed_refresh_body_terminates() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/refresh-token"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let (coordinator, sink) = coordinator(&server, tokens_with(Some(("a1", "r1"))));

        assert_eq!(
            coordinator.refresh(Some("a1")).await,
            Err(TerminationReason::RefreshFailed)
        );
        assert_eq!(sink.reasons.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_renewal() {
        let server = MockServer::start().await;
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        Mock::given(method("POST"))
            .and(path("/auth/refresh-token"))
            .respond_with(move |_: &wiremock::Request| {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                ResponseTemplate::new(200)
                    .set_delay(Duration::from_millis(150))
                    .set_body_json(serde_json::json!({
                        "accessToken": format!("a{}", n + 2),
                        "refreshToken": format!("r{}", n + 2)
                    }))
            })
            .expect(1)
            .mount(&server)
            .await;

        let (coordinator, _sink) = coordinator(&server, tokens_with(Some(("a1", "r1"))));

        let (first, second, third) = tokio::join!(
            coordinator.refresh(Some("a1")),
            coordinator.refresh(Some("a1")),
            coordinator.refresh(Some("a1"))
        );

        let first = first.unwrap();
        assert_eq!(first.access_token, "a2");
        assert_eq!(second.unwrap(), first);
        assert_eq!(third.unwrap(), first);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(coordinator.renewal_count(), 1);
    }

    #[tokio::test]
    async fn test_sequential_refreshes_each_renew() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/refresh-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "accessToken": "a2",
                "refreshToken": "r2"
            })))
            .expect(2)
            .mount(&server)
            .await;

        let (coordinator, _sink) = coordinator(&server, tokens_with(Some(("a1", "r1"))));

        coordinator.refresh(Some("a1")).await.unwrap();
        coordinator.refresh(Some("a2")).await.unwrap();
        assert_eq!(coordinator.renewal_count(), 2);
    }

    #[tokio::test]
    async fn test_rotated_token_skips_renewal() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/refresh-token"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let (coordinator, sink) = coordinator(&server, tokens_with(Some(("a2", "r2"))));

        // The request was sent with a1, the store already holds a2
        let pair = coordinator.refresh(Some("a1")).await.unwrap();
        assert_eq!(pair.access_token, "a2");
        assert_eq!(coordinator.renewal_count(), 0);
        assert!(sink.reasons.lock().is_empty());
    }

    #[tokio::test]
    async fn test_abandoned_refresh_is_not_reused() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/refresh-token"))
            .and(body_json(serde_json::json!({ "refreshToken": "r1" })))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_delay(Duration::from_millis(300))
                    .set_body_json(serde_json::json!({
                        "accessToken": "stale-a",
                        "refreshToken": "stale-r"
                    })),
            )
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/auth/refresh-token"))
            .and(body_json(serde_json::json!({ "refreshToken": "r9" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "accessToken": "a10",
                "refreshToken": "r10"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let tokens = tokens_with(Some(("a1", "r1")));
        let (coordinator, sink) = coordinator(&server, tokens.clone());

        let abandoned =
            tokio::time::timeout(Duration::from_millis(50), coordinator.refresh(Some("a1"))).await;
        assert!(abandoned.is_err());
        assert!(!coordinator.is_refreshing());

        // A new sign-in lands before the next 401
        tokens.replace(TokenPair::new("a9", "r9").unwrap()).unwrap();

        let pair = coordinator.refresh(Some("a9")).await.unwrap();
        assert_eq!(pair, TokenPair::new("a10", "r10").unwrap());
        assert_eq!(tokens.access_token().as_deref(), Some("a10"));
        assert!(sink.reasons.lock().is_empty());
    }

    #[tokio::test]
    async fn test_renewal_for_replaced_pair_does_not_overwrite() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/refresh-token"))
            .and(body_json(serde_json::json!({ "refreshToken": "r1" })))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_delay(Duration::from_millis(300))
                    .set_body_json(serde_json::json!({
                        "accessToken": "stale-a",
                        "refreshToken": "stale-r"
                    })),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/auth/refresh-token"))
            .and(body_json(serde_json::json!({ "refreshToken": "r9" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "accessToken": "a10",
                "refreshToken": "r10"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let tokens = tokens_with(Some(("a1", "r1")));
        let (coordinator, _sink) = coordinator(&server, tokens.clone());

        let (old_session, new_session) = tokio::join!(coordinator.refresh(Some("a1")), async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            tokens.replace(TokenPair::new("a9", "r9").unwrap()).unwrap();
            coordinator.refresh(Some("a9")).await
        });

        let fresh = TokenPair::new("a10", "r10").unwrap();
        assert_eq!(new_session.unwrap(), fresh);
        assert_eq!(old_session.unwrap(), fresh);
        assert_eq!(tokens.pair(), Some(fresh));
        assert_eq!(coordinator.renewal_count(), 2);
    }
}
