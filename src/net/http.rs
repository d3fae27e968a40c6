use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::StreamExt;
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;

use super::{Network, NetworkError};
use crate::config::Config;
use crate::util::parse_request_url;

const MAX_RETRIES: u32 = 3;
const MAX_RESPONSE_SIZE: usize = 10 * 1024 * 1024; // 10MB

/// [`Network`] backed by a pooled `reqwest::Client`.
///
/// - GETs retry 5xx and 429 with exponential backoff (2s, 4s, 8s by default)
/// - POSTs are sent once; a clap must never be counted twice
/// - Every request is bounded by the configured timeout
/// - Bodies over 10MB are rejected
/// - `en_cookie` is appended to every form POST
pub struct HttpNetwork {
    client: reqwest::Client,
    cookie: Option<SecretString>,
    timeout: Duration,
    backoff_base: Duration,
    reachable: AtomicBool,
}

impl HttpNetwork {
    pub fn new(config: &Config) -> Result<Self, NetworkError> {
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(4)
            .pool_idle_timeout(Duration::from_secs(30))
            .tcp_keepalive(Duration::from_secs(60))
            .timeout(config.request_timeout())
            .build()?;

        Ok(Self::with_client(
            client,
            config.en_cookie.clone().map(SecretString::from),
            config.request_timeout(),
        ))
    }

    pub fn with_client(
        client: reqwest::Client,
        cookie: Option<SecretString>,
        timeout: Duration,
    ) -> Self {
        Self {
            client,
            cookie,
            timeout,
            backoff_base: Duration::from_secs(2),
            reachable: AtomicBool::new(true),
        }
    }

    /// Override the first retry delay; later retries double it.
    pub fn with_backoff(mut self, base: Duration) -> Self {
        self.backoff_base = base;
        self
    }

    fn record(&self, outcome: &Result<reqwest::Response, NetworkError>) {
        // Any HTTP response, even an error status, means the server was reached
        let reached = outcome.is_ok();
        if self.reachable.swap(reached, Ordering::Relaxed) != reached {
            tracing::info!(reachable = reached, "Network reachability changed");
        }
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response, NetworkError> {
        let outcome = match tokio::time::timeout(self.timeout, request.send()).await {
            Err(_) => Err(NetworkError::Timeout),
            Ok(Err(e)) if e.is_timeout() => Err(NetworkError::Timeout),
            Ok(Err(e)) => Err(NetworkError::Request(e)),
            Ok(Ok(response)) => Ok(response),
        };
        self.record(&outcome);
        outcome
    }

    async fn get_with_retry(&self, url: &str) -> Result<Vec<u8>, NetworkError> {
        let url = parse_request_url(url).map_err(|e| NetworkError::InvalidUrl(e.to_string()))?;
        let mut retry_count = 0;

        loop {
            let response = self.send(self.client.get(url.clone())).await?;
            let status = response.status();

            if status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                if retry_count >= MAX_RETRIES {
                    return Err(NetworkError::HttpStatus(status.as_u16()));
                }
                let delay = self.backoff_base * 2u32.pow(retry_count);
                tracing::warn!(
                    url = %url,
                    status = %status,
                    retry = retry_count,
                    delay_ms = delay.as_millis() as u64,
                    "Transient HTTP error, backing off"
                );
                tokio::time::sleep(delay).await;
                retry_count += 1;
                continue;
            }

            if !status.is_success() {
                return Err(NetworkError::HttpStatus(status.as_u16()));
            }

            return read_limited_bytes(response, MAX_RESPONSE_SIZE).await;
        }
    }
}

impl Network for HttpNetwork {
    async fn get_bytes(&self, url: &str) -> Result<Vec<u8>, NetworkError> {
        self.get_with_retry(url).await
    }

    async fn get_json(&self, url: &str) -> Result<Value, NetworkError> {
        let bytes = self.get_with_retry(url).await?;
        serde_json::from_slice(&bytes).map_err(|e| NetworkError::InvalidJson(e.to_string()))
    }

    async fn post_form(&self, url: &str, fields: &[(&str, String)]) -> Result<Value, NetworkError> {
        let url = parse_request_url(url).map_err(|e| NetworkError::InvalidUrl(e.to_string()))?;

        let mut form: Vec<(&str, &str)> = Vec::with_capacity(fields.len() + 1);
        if let Some(cookie) = &self.cookie {
            form.push(("en_cookie", cookie.expose_secret()));
        }
        form.extend(fields.iter().map(|(k, v)| (*k, v.as_str())));

        let response = self.send(self.client.post(url.clone()).form(&form)).await?;
        let status = response.status();
        if !status.is_success() {
            tracing::debug!(url = %url, status = %status, "Form POST rejected");
            return Err(NetworkError::HttpStatus(status.as_u16()));
        }

        let bytes = read_limited_bytes(response, MAX_RESPONSE_SIZE).await?;
        serde_json::from_slice(&bytes).map_err(|e| NetworkError::InvalidJson(e.to_string()))
    }

    fn is_reachable(&self) -> bool {
        self.reachable.load(Ordering::Relaxed)
    }
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, NetworkError> {
    // Fast path: check Content-Length header
    if let Some(len) = response.content_length() {
        if len as usize > limit {
            return Err(NetworkError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(NetworkError::Request)?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(NetworkError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{any, body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn network(cookie: Option<&str>) -> HttpNetwork {
        HttpNetwork::with_client(
            reqwest::Client::new(),
            cookie.map(|c| SecretString::from(c.to_string())),
            Duration::from_secs(5),
        )
        .with_backoff(Duration::from_millis(10))
    }

    #[tokio::test]
    async fn test_get_json_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/stories"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "success": 1 })))
            .mount(&server)
            .await;

        let net = network(None);
        let value = net
            .get_json(&format!("{}/stories", server.uri()))
            .await
            .unwrap();
        assert_eq!(value, json!({ "success": 1 }));
        assert!(net.is_reachable());
    }

    #[tokio::test]
    async fn test_get_404_fails_without_retry() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let err = network(None).get_bytes(&server.uri()).await.unwrap_err();
        assert!(matches!(err, NetworkError::HttpStatus(404)));
    }

    #[tokio::test]
    async fn test_500_retries_then_fails() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .expect(4) // Initial request + 3 retries
            .mount(&server)
            .await;

        let err = network(None).get_bytes(&server.uri()).await.unwrap_err();
        assert!(matches!(err, NetworkError::HttpStatus(500)));
    }

    #[tokio::test]
    async fn test_503_retry_then_success() {
        let server = MockServer::start().await;
        Mock::given(any())
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(any())
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"jpeg".to_vec()))
            .mount(&server)
            .await;

        let bytes = network(None).get_bytes(&server.uri()).await.unwrap();
        assert_eq!(bytes, b"jpeg");
    }

    #[tokio::test]
    async fn test_invalid_json_reported() {
        let server = MockServer::start().await;
        Mock::given(any())
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let err = network(None).get_json(&server.uri()).await.unwrap_err();
        assert!(matches!(err, NetworkError::InvalidJson(_)));
    }

    #[tokio::test]
    async fn test_oversized_body_rejected() {
        let server = MockServer::start().await;
        Mock::given(any())
            .respond_with(
                ResponseTemplate::new(200).set_body_bytes(vec![0u8; MAX_RESPONSE_SIZE + 1]),
            )
            .mount(&server)
            .await;

        let err = network(None).get_bytes(&server.uri()).await.unwrap_err();
        assert!(matches!(err, NetworkError::ResponseTooLarge));
    }

    #[tokio::test]
    async fn test_post_form_includes_cookie_and_fields() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/clap"))
            .and(body_string_contains("en_cookie=secret-cookie"))
            .and(body_string_contains("blockCompany=42"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "success": 1 })))
            .expect(1)
            .mount(&server)
            .await;

        let net = network(Some("secret-cookie"));
        let reply = net
            .post_form(
                &format!("{}/clap", server.uri()),
                &[("blockCompany", "42".to_string())],
            )
            .await
            .unwrap();
        assert!(crate::net::is_success(&reply));
    }

    #[tokio::test]
    async fn test_post_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .expect(1)
            .mount(&server)
            .await;

        let err = network(None)
            .post_form(&server.uri(), &[])
            .await
            .unwrap_err();
        assert!(matches!(err, NetworkError::HttpStatus(503)));
    }

    #[tokio::test]
    async fn test_connection_failure_marks_unreachable() {
        let server = MockServer::start().await;
        let uri = server.uri();
        drop(server);

        let net = network(None);
        assert!(net.get_bytes(&uri).await.is_err());
        assert!(!net.is_reachable());
    }

    #[tokio::test]
    async fn test_invalid_url_rejected() {
        let err = network(None).get_bytes("ftp://example.com").await.unwrap_err();
        assert!(matches!(err, NetworkError::InvalidUrl(_)));
    }
}
