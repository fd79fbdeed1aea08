//! Outbound request description
//!
//! Requests are kept as owned data rather than a consumed builder so the
//! pipeline can rebuild and resubmit one after a token renewal.

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Method;
use serde::Serialize;
use uuid::Uuid;

use crate::error::ApiError;
use crate::Result;

/// At most one refresh-and-retry cycle per original request
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryMarker(bool);

impl RetryMarker {
    pub fn is_set(&self) -> bool {
        self.0
    }

    pub fn set(&mut self) {
        self.0 = true;
    }
}

#[derive(Debug, Clone)]
pub struct ApiRequest {
    id: Uuid,
    method: Method,
    path: String,
    query: Vec<(String, String)>,
    headers: HeaderMap,
    body: Option<serde_json::Value>,
    retry: RetryMarker,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            method,
            path: path.into(),
            query: Vec::new(),
            headers: HeaderMap::new(),
            body: None,
            retry: RetryMarker::default(),
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn header(mut self, name: &str, value: &str) -> Result<Self> {
        let header_name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| ApiError::InvalidHeader(format!("{name}: {e}")))?;
        let header_value = HeaderValue::from_str(value)
            .map_err(|e| ApiError::InvalidHeader(format!("{name}: {e}")))?;
        self.headers.insert(header_name, header_value);
        Ok(self)
    }

    pub fn json<B: Serialize>(mut self, body: &B) -> Result<Self> {
        self.body = Some(serde_json::to_value(body)?);
        Ok(self)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn retry_marker(&self) -> RetryMarker {
        self.retry
    }

    pub(crate) fn mark_retried(&mut self) {
        self.retry.set();
    }

    /// Build a fresh transport request; the bearer header is added afterwards
    pub(crate) fn build(
        &self,
        client: &reqwest::Client,
        base_url: &url::Url,
    ) -> Result<reqwest::Request> {
        let url = base_url
            .join(self.path.trim_start_matches('/'))
            .map_err(|e| ApiError::InvalidUrl(format!("{}: {e}", self.path)))?;

        let mut builder = client
            .request(self.method.clone(), url)
            .headers(self.headers.clone());

        if !self.query.is_empty() {
            builder = builder.query(&self.query);
        }
        if let Some(body) = &self.body {
            builder = builder.json(body);
        }

        builder.build().map_err(ApiError::Request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_marker() {
        let mut request = ApiRequest::get("/news");
        assert!(!request.retry_marker().is_set());

        request.mark_retried();
        assert!(request.retry_marker().is_set());
    }

    #[test]
    fn test_build_joins_base_url() {
        let client = reqwest::Client::new();
        let base = url::Url::parse("https://api.portal.gov/api/").unwrap();

        let request = ApiRequest::get("/news")
            .query("page", "2")
            .build(&client, &base)
            .unwrap();

        assert_eq!(request.url().as_str(), "https://api.portal.gov/api/news?page=2");
        assert_eq!(request.method(), Method::GET);
    }

    #[test]
    fn test_build_with_json_body() {
        let client = reqwest::Client::new();
        let base = url::Url::parse("https://api.portal.gov/").unwrap();

        let request = ApiRequest::post("/bulletins")
            .json(&serde_json::json!({ "title": "Budget hearing" }))
            .unwrap()
            .build(&client, &base)
            .unwrap();

        assert_eq!(
            request.headers().get(reqwest::header::CONTENT_TYPE).unwrap(),
            "application/json"
        );
    }

    #[test]
    fn test_rejects_invalid_header_value() {
        let result = ApiRequest::get("/news").header("x-trace", "bad\nvalue");
        assert!(result.is_err());
    }
}
