//! HTTP client for REST sources.
//!
//! [`ApiClient`] owns the full request discipline for one upstream API:
//! every call first takes a rate limiter slot, then runs under the retry
//! policy with HTTP status classification (429/5xx retryable, other non-2xx
//! fatal).

use std::sync::Arc;
use std::time::Duration;

use reqwest::{header, Client, StatusCode};
use serde_json::Value;
use tracing::debug;

use crate::etl::error::{EtlError, EtlResult};
use crate::etl::rate_limiter::RateLimiter;
use crate::etl::retry::{with_retry, RetryPolicy};

pub struct ApiClient {
    client: Client,
    base_url: String,
    api_key: Option<(String, String)>,
    limiter: Arc<RateLimiter>,
    limiter_key: String,
    policy: RetryPolicy,
}

impl ApiClient {
    pub fn new(
        base_url: impl Into<String>,
        timeout: Duration,
        limiter: Arc<RateLimiter>,
        limiter_key: impl Into<String>,
        policy: RetryPolicy,
    ) -> EtlResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("cdp/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: None,
            limiter,
            limiter_key: limiter_key.into(),
            policy,
        })
    }

    /// Attach an API key sent as a custom header on every request.
    pub fn with_api_key(mut self, header: impl Into<String>, value: impl Into<String>) -> Self {
        self.api_key = Some((header.into(), value.into()));
        self
    }

    /// GET `path` relative to the base URL and parse the body as JSON.
    /// Rate limiting and retries are applied here, not by callers.
    pub async fn get_json(&self, path: &str, query: &[(&str, String)]) -> EtlResult<Value> {
        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        with_retry(&self.policy, path, || self.fetch_once(&url, query)).await
    }

    async fn fetch_once(&self, url: &str, query: &[(&str, String)]) -> EtlResult<Value> {
        self.limiter.acquire(&self.limiter_key).await;

        let mut request = self
            .client
            .get(url)
            .query(query)
            .header(header::ACCEPT, "application/json");
        if let Some((name, value)) = &self.api_key {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request.send().await.map_err(EtlError::from)?;
        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(EtlError::retryable(format!("rate limited upstream ({url})")));
        }
        if status.is_server_error() {
            return Err(EtlError::retryable(format!("upstream {status} from {url}")));
        }
        if !status.is_success() {
            return Err(EtlError::fatal(format!("unexpected status {status} from {url}")));
        }

        debug!(url, %status, "api request succeeded");
        response.json::<Value>().await.map_err(EtlError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::etl::rate_limiter::RateLimitConfig;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(base_url: &str, max_retries: u32) -> ApiClient {
        let limiter = Arc::new(RateLimiter::new(RateLimitConfig::default()));
        let policy = RetryPolicy {
            max_retries,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
            jitter: false,
        };
        ApiClient::new(base_url, Duration::from_secs(5), limiter, "test", policy).unwrap()
    }

    #[tokio::test]
    async fn recovers_from_429_within_retry_budget() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/tickers"))
            .respond_with(ResponseTemplate::new(429))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/tickers"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"id": "btc"}])))
            .mount(&server)
            .await;

        let body = client(&server.uri(), 3).get_json("tickers", &[]).await.unwrap();
        assert_eq!(body[0]["id"], "btc");
    }

    #[tokio::test]
    async fn persistent_429_exhausts_into_fatal() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/tickers"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let err = client(&server.uri(), 2).get_json("tickers", &[]).await.unwrap_err();
        assert!(matches!(err, EtlError::Fatal(_)));
        // initial attempt + 2 retries
        assert_eq!(server.received_requests().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn client_error_is_fatal_without_retry() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/nope"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let err = client(&server.uri(), 3).get_json("nope", &[]).await.unwrap_err();
        assert!(matches!(err, EtlError::Fatal(_)));
        assert_eq!(server.received_requests().await.unwrap().len(), 1);
    }
}
