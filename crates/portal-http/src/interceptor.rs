//! Request Interceptor
//!
//! Attaches the current access token to every outbound request. It has no
//! failure mode and never looks at responses.

use reqwest::header::{HeaderValue, AUTHORIZATION};

use portal_session::TokenStore;

pub struct BearerInterceptor {
    tokens: TokenStore,
}

impl BearerInterceptor {
    pub fn new(tokens: TokenStore) -> Self {
        Self { tokens }
    }

    /// Set `Authorization: Bearer <token>` when a token is held, strip it otherwise.
    ///
    /// Returns the token that was attached.
    pub fn intercept(&self, request: &mut reqwest::Request) -> Option<String> {
        let headers = request.headers_mut();
        headers.remove(AUTHORIZATION);

        let token = self.tokens.access_token()?;
        match HeaderValue::from_str(&format!("Bearer {token}")) {
            Ok(mut value) => {
                value.set_sensitive(true);
                headers.insert(AUTHORIZATION, value);
                Some(token)
            }
            Err(_) => {
                tracing::warn!(
                    "Stored access token is not a valid header value, sending unauthenticated"
                );
                None
            }
        }
    }
}

impl Clone for BearerInterceptor {
    fn clone(&self) -> Self {
        Self {
            tokens: self.tokens.clone(),
        }
    }
}
