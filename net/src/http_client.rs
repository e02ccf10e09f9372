//! The only path by which the core talks to other hosts: URL/header
//! validation, DNS-rebinding defense, transfer limits, and explicit
//! redirect re-validation. The client itself never retries — that is
//! [`masterclaw_core::resilience`]'s job, one layer up.

use std::net::IpAddr;
use std::net::Ipv4Addr;
use std::net::SocketAddr;
use std::time::Duration;

use regex_lite::Regex;
use reqwest::Method;
use reqwest::redirect::Policy;
use std::sync::LazyLock;
use url::Url;

const DEFAULT_MAX_RESPONSE_BYTES: u64 = 10 * 1024 * 1024;
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_REDIRECT_HOPS: u8 = 5;

static HEADER_NAME_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9-]+$").expect("valid regex"));

#[derive(thiserror::Error, Debug)]
pub enum HttpClientError {
    #[error("request blocked: destination not permitted")]
    SsrfViolation,
    #[error("header injection detected")]
    HeaderInjection,
    #[error("response exceeded the maximum allowed size")]
    ResponseTooLarge,
    #[error("request timed out")]
    Timeout,
    #[error("connection refused")]
    ConnectRefused,
    #[error("dns resolution failed")]
    DnsFailure,
    #[error("tls handshake failed")]
    TlsFailure,
    #[error("unexpected status {0}")]
    HttpStatus(u16),
    #[error("too many redirect hops")]
    TooManyRedirects,
    #[error("malformed url: {0}")]
    InvalidUrl(String),
}

pub struct RequestDescriptor {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
    pub timeout: Duration,
    pub allow_private_ips: bool,
    pub max_response_bytes: u64,
    pub correlation_id: Option<String>,
}

impl RequestDescriptor {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            url: url.into(),
            headers: Vec::new(),
            body: None,
            timeout: DEFAULT_TIMEOUT,
            allow_private_ips: false,
            max_response_bytes: DEFAULT_MAX_RESPONSE_BYTES,
            correlation_id: None,
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn allow_private_ips(mut self, allow: bool) -> Self {
        self.allow_private_ips = allow;
        self
    }
}

pub struct HttpResponseBody {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

#[derive(Clone, Default)]
pub struct SecureHttpClient;

impl SecureHttpClient {
    pub fn new() -> Self {
        Self
    }

    pub async fn request(
        &self,
        descriptor: RequestDescriptor,
    ) -> Result<HttpResponseBody, HttpClientError> {
        self.request_with_hops(descriptor, 0).await
    }

    async fn request_with_hops(
        &self,
        mut descriptor: RequestDescriptor,
        hop: u8,
    ) -> Result<HttpResponseBody, HttpClientError> {
        if hop > MAX_REDIRECT_HOPS {
            return Err(HttpClientError::TooManyRedirects);
        }

        validate_headers(&descriptor.headers)?;
        if let Some(correlation_id) = &descriptor.correlation_id {
            descriptor.headers.push(("x-correlation-id".to_string(), correlation_id.clone()));
        }

        let url = Url::parse(&descriptor.url)
            .map_err(|e| HttpClientError::InvalidUrl(e.to_string()))?;
        validate_scheme_and_host(&url)?;

        let host = url.host_str().ok_or_else(|| HttpClientError::InvalidUrl("missing host".into()))?.to_string();
        let port = url.port_or_known_default().unwrap_or(if url.scheme() == "https" { 443 } else { 80 });

        let resolved = resolve_and_validate(&host, port, descriptor.allow_private_ips).await?;

        let client = reqwest::Client::builder()
            .resolve(&host, resolved)
            .redirect(Policy::none())
            .connect_timeout(descriptor.timeout)
            .timeout(descriptor.timeout)
            .build()
            .map_err(|_| HttpClientError::TlsFailure)?;

        let mut builder = client.request(descriptor.method.clone(), url.clone());
        for (name, value) in &descriptor.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = descriptor.body.clone() {
            builder = builder.body(body);
        }

        let response = builder.send().await.map_err(classify_send_error)?;
        let status = response.status();

        if status.is_redirection() {
            if let Some(location) = response.headers().get(reqwest::header::LOCATION) {
                let location = location.to_str().map_err(|_| HttpClientError::HeaderInjection)?;
                let next_url = url
                    .join(location)
                    .map_err(|e| HttpClientError::InvalidUrl(e.to_string()))?;
                let mut next = descriptor;
                next.url = next_url.to_string();
                return Box::pin(self.request_with_hops(next, hop + 1)).await;
            }
        }

        let headers: Vec<(String, String)> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| Some((name.to_string(), value.to_str().ok()?.to_string())))
            .collect();

        let max = descriptor.max_response_bytes;
        let body = read_capped_body(response, max).await?;

        if status.as_u16() >= 400 {
            return Err(HttpClientError::HttpStatus(status.as_u16()));
        }

        Ok(HttpResponseBody { status: status.as_u16(), headers, body })
    }
}

async fn read_capped_body(
    response: reqwest::Response,
    max_bytes: u64,
) -> Result<Vec<u8>, HttpClientError> {
    use futures_util::StreamExt;

    if let Some(len) = response.content_length() {
        if len > max_bytes {
            return Err(HttpClientError::ResponseTooLarge);
        }
    }

    let mut stream = response.bytes_stream();
    let mut buffer = Vec::new();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(classify_send_error)?;
        if buffer.len() as u64 + chunk.len() as u64 > max_bytes {
            return Err(HttpClientError::ResponseTooLarge);
        }
        buffer.extend_from_slice(&chunk);
    }
    Ok(buffer)
}

fn classify_send_error(e: reqwest::Error) -> HttpClientError {
    if e.is_timeout() {
        HttpClientError::Timeout
    } else if e.is_connect() {
        HttpClientError::ConnectRefused
    } else if e.is_decode() || e.is_body() {
        HttpClientError::ResponseTooLarge
    } else {
        HttpClientError::DnsFailure
    }
}

fn validate_headers(headers: &[(String, String)]) -> Result<(), HttpClientError> {
    for (name, value) in headers {
        if !HEADER_NAME_PATTERN.is_match(name) {
            return Err(HttpClientError::HeaderInjection);
        }
        if value.contains('\r') || value.contains('\n') {
            return Err(HttpClientError::HeaderInjection);
        }
    }
    Ok(())
}

fn validate_scheme_and_host(url: &Url) -> Result<(), HttpClientError> {
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(HttpClientError::SsrfViolation);
    }
    let host = url.host_str().ok_or(HttpClientError::SsrfViolation)?;
    if host == "0.0.0.0" || host == "::" {
        return Err(HttpClientError::SsrfViolation);
    }
    if let Ok(ip) = host.parse::<IpAddr>() {
        if is_disallowed_literal(ip) {
            return Err(HttpClientError::SsrfViolation);
        }
    }
    Ok(())
}

fn is_disallowed_literal(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_unspecified(),
        IpAddr::V6(v6) => {
            if let Some(mapped) = v6.to_ipv4_mapped() {
                return mapped.is_unspecified();
            }
            v6.is_unspecified()
        }
    }
}

async fn resolve_and_validate(
    host: &str,
    port: u16,
    allow_private_ips: bool,
) -> Result<SocketAddr, HttpClientError> {
    let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host, port))
        .await
        .map_err(|_| HttpClientError::DnsFailure)?
        .collect();

    let Some(first) = addrs.first().copied() else {
        return Err(HttpClientError::DnsFailure);
    };

    if !allow_private_ips {
        for addr in &addrs {
            if is_private_or_local(addr.ip()) {
                return Err(HttpClientError::SsrfViolation);
            }
        }
    }
    Ok(first)
}

/// Covers the private/loopback/link-local ranges an SSRF rebinding attempt
/// would target, including IPv4-mapped IPv6 addresses.
fn is_private_or_local(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_private_v4(v4),
        IpAddr::V6(v6) => {
            if let Some(mapped) = v6.to_ipv4_mapped() {
                return is_private_v4(mapped);
            }
            v6.is_loopback()
                || v6.is_unspecified()
                || (v6.segments()[0] & 0xfe00) == 0xfc00 // fc00::/7 unique local
                || (v6.segments()[0] & 0xffc0) == 0xfe80 // fe80::/10 link-local
        }
    }
}

fn is_private_v4(v4: Ipv4Addr) -> bool {
    v4.is_private() || v4.is_loopback() || v4.is_link_local() || v4.is_unspecified() || v4.is_broadcast()
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
    async fn too_many_requests_is_a_typed_status_error_not_a_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/limited"))
            .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
            .mount(&server)
            .await;

        let client = SecureHttpClient::new();
        let descriptor = RequestDescriptor::get(format!("{}/limited", server.uri())).allow_private_ips(true);
        let err = client.request(descriptor).await.unwrap_err();
        assert!(matches!(err, HttpClientError::HttpStatus(429)));
    }

    #[test]
    fn rejects_disallowed_schemes() {
        let url = Url::parse("file:///etc/passwd").unwrap();
        assert!(matches!(validate_scheme_and_host(&url), Err(HttpClientError::SsrfViolation)));
    }

    #[test]
    fn rejects_unspecified_address_literals() {
        let url = Url::parse("http://0.0.0.0/").unwrap();
        assert!(matches!(validate_scheme_and_host(&url), Err(HttpClientError::SsrfViolation)));
    }

    #[test]
    fn allows_ordinary_https_host() {
        let url = Url::parse("https://example.com/status").unwrap();
        assert!(validate_scheme_and_host(&url).is_ok());
    }

    #[test]
    fn header_validation_rejects_crlf_and_bad_names() {
        assert!(validate_headers(&[("X Bad".to_string(), "v".to_string())]).is_err());
        assert!(validate_headers(&[("X-Ok".to_string(), "v\r\ninjected".to_string())]).is_err());
        assert!(validate_headers(&[("X-Ok".to_string(), "fine".to_string())]).is_ok());
    }

    #[test]
    fn private_ipv4_ranges_are_detected() {
        assert!(is_private_or_local("127.0.0.1".parse().unwrap()));
        assert!(is_private_or_local("10.0.0.5".parse().unwrap()));
        assert!(is_private_or_local("192.168.1.1".parse().unwrap()));
        assert!(is_private_or_local("169.254.1.1".parse().unwrap()));
        assert!(!is_private_or_local("93.184.216.34".parse().unwrap()));
    }

    #[test]
    fn ipv4_mapped_ipv6_private_addresses_are_detected() {
        assert!(is_private_or_local("::ffff:127.0.0.1".parse().unwrap()));
    }
}
