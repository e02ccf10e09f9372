//! Typed external HTTP accessors wrapping [`crate::http_client`] through a
//! [`masterclaw_core::resilience`] circuit breaker, parameterized by a base
//! URL resolved from config. Every method prepends the
//! current correlation ID header and declares its own idempotence so the
//! retry layer knows what it may safely repeat.

use masterclaw_core::resilience::CircuitBreaker;
use masterclaw_core::resilience::RetryOutcome;
use masterclaw_core::resilience::RetryPolicy;
use masterclaw_core::resilience::with_retry;
use masterclaw_protocol::McError;
use serde::Deserialize;

use crate::http_client::HttpClientError;
use crate::http_client::RequestDescriptor;
use crate::http_client::SecureHttpClient;

#[derive(Debug, Clone, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    #[serde(default)]
    pub version: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    #[serde(default)]
    pub size_bytes: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionSummary {
    pub id: String,
    pub active: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SloSnapshot {
    pub name: String,
    pub target: f64,
    pub current: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InsightReport {
    pub generated_at: String,
    pub findings: Vec<String>,
}

pub struct ServiceFacade {
    base_url: String,
    client: SecureHttpClient,
    breaker: CircuitBreaker,
    retry: RetryPolicy,
}

impl ServiceFacade {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            client: SecureHttpClient::new(),
            breaker: CircuitBreaker::new(Default::default()),
            retry: RetryPolicy::default(),
        }
    }

    /// Construct with a caller-supplied breaker, e.g. one restored from
    /// `circuits.json` so breaker state survives across CLI invocations
    /// rather than resetting to `closed` on every process start.
    pub fn with_breaker(base_url: impl Into<String>, breaker: CircuitBreaker) -> Self {
        Self {
            base_url: base_url.into(),
            client: SecureHttpClient::new(),
            breaker,
            retry: RetryPolicy::default(),
        }
    }

    /// The breaker backing this facade, so the caller can snapshot its
    /// post-call state for persistence.
    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Idempotent (safe to retry): queries `/health`. Callers use
    /// `allowPrivateIPs=true` since well-known services often live on a
    /// private network reachable only from the operator's host.
    pub async fn health(&self, correlation_id: &str) -> Result<HealthStatus, McError> {
        self.get_json("/health", correlation_id, true).await
    }

    /// Idempotent: queries `/cache/stats`.
    pub async fn cache_stats(&self, correlation_id: &str) -> Result<CacheStats, McError> {
        self.get_json("/cache/stats", correlation_id, false).await
    }

    /// Idempotent: lists active sessions.
    pub async fn sessions(&self, correlation_id: &str) -> Result<Vec<SessionSummary>, McError> {
        self.get_json("/sessions", correlation_id, false).await
    }

    /// Idempotent: current SLO snapshot.
    pub async fn slo(&self, correlation_id: &str) -> Result<Vec<SloSnapshot>, McError> {
        self.get_json("/slo", correlation_id, false).await
    }

    /// Not idempotent: triggers report generation server-side on every
    /// call, so it is never retried even on a transient failure.
    pub async fn insights(&self, correlation_id: &str) -> Result<InsightReport, McError> {
        let url = format!("{}/insights", self.base_url);
        let descriptor = RequestDescriptor::get(url).header("x-correlation-id", correlation_id);
        let response = self.client.request(descriptor).await.map_err(to_mc_error)?;
        serde_json::from_slice(&response.body)
            .map_err(|e| McError::generic(format!("malformed insights response: {e}")))
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        correlation_id: &str,
        allow_private_ips: bool,
    ) -> Result<T, McError> {
        let url = format!("{}{}", self.base_url, path);
        let outcome = with_retry(
            &self.breaker,
            &self.retry,
            || {
                let descriptor = RequestDescriptor::get(url.clone())
                    .header("x-correlation-id", correlation_id)
                    .allow_private_ips(allow_private_ips);
                let client = &self.client;
                async move { client.request(descriptor).await }
            },
            is_retryable,
        )
        .await;

        match outcome {
            Ok(response) => serde_json::from_slice(&response.body)
                .map_err(|e| McError::generic(format!("malformed response body: {e}"))),
            Err(RetryOutcome::CircuitOpen) => {
                Err(McError::circuit_open(path.to_string(), self.retry.max_delay.as_secs()))
            }
            Err(RetryOutcome::Exhausted(e)) => Err(to_mc_error(e)),
        }
    }
}

/// §4.7's retryable set: connection-level failures plus the HTTP statuses a
/// well-behaved upstream uses for transient trouble (request timeout, rate
/// limiting, and the 5xx family short of "not implemented").
const RETRYABLE_STATUSES: &[u16] = &[408, 429, 500, 502, 503, 504];

fn is_retryable(e: &HttpClientError) -> bool {
    match e {
        HttpClientError::Timeout | HttpClientError::ConnectRefused | HttpClientError::DnsFailure => true,
        HttpClientError::HttpStatus(code) => RETRYABLE_STATUSES.contains(code),
        _ => false,
    }
}

fn to_mc_error(e: HttpClientError) -> McError {
    match e {
        HttpClientError::SsrfViolation => McError::ssrf("request blocked: destination not permitted"),
        HttpClientError::HeaderInjection => McError::header_injection("rejected"),
        HttpClientError::ResponseTooLarge => McError::response_too_large(),
        HttpClientError::Timeout => McError::timeout(),
        HttpClientError::HttpStatus(429) => McError::rate_limited(RetryPolicy::default().max_delay.as_millis() as u64),
        HttpClientError::HttpStatus(code) => {
            McError::generic(format!("upstream returned unexpected status {code}"))
        }
        other => McError::generic(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::Mock;
    use wiremock::MockServer;
    use wiremock::ResponseTemplate;
    use wiremock::matchers::method;
    use wiremock::matchers::path;

    #[tokio::test]
    async fn health_parses_successful_response() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "ok",
                "version": "1.2.3",
            })))
            .mount(&server)
            .await;

        let facade = ServiceFacade::new(server.uri());
        let status = facade.health("corr-1").await.unwrap();
        assert_eq!(status.status, "ok");
    }

    #[tokio::test]
    async fn non_idempotent_insights_call_is_not_retried_on_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/insights"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;

        let facade = ServiceFacade::new(server.uri());
        let result = facade.insights("corr-1").await;
        assert!(result.is_err());
    }

    #[test]
    fn transient_statuses_and_connection_errors_are_retryable() {
        assert!(is_retryable(&HttpClientError::HttpStatus(408)));
        assert!(is_retryable(&HttpClientError::HttpStatus(429)));
        assert!(is_retryable(&HttpClientError::HttpStatus(500)));
        assert!(is_retryable(&HttpClientError::HttpStatus(502)));
        assert!(is_retryable(&HttpClientError::HttpStatus(503)));
        assert!(is_retryable(&HttpClientError::HttpStatus(504)));
        assert!(is_retryable(&HttpClientError::Timeout));
        assert!(is_retryable(&HttpClientError::ConnectRefused));
        assert!(is_retryable(&HttpClientError::DnsFailure));
        assert!(!is_retryable(&HttpClientError::HttpStatus(404)));
        assert!(!is_retryable(&HttpClientError::SsrfViolation));
    }

    #[tokio::test]
    async fn idempotent_health_call_retries_a_transient_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(503))
            .expect(4)
            .mount(&server)
            .await;

        let facade = ServiceFacade::new(server.uri());
        let err = facade.health("corr-1").await.unwrap_err();
        assert_eq!(err.exit_code, masterclaw_protocol::ExitCode::Generic);
    }

    #[tokio::test]
    async fn rate_limited_status_surfaces_as_a_typed_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let facade = ServiceFacade::new(server.uri());
        let err = facade.health("corr-1").await.unwrap_err();
        assert_eq!(err.exit_code, masterclaw_protocol::ExitCode::RateLimited);
    }
}
