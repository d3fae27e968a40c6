//! Network collaborator used by the hub and carousel.
//!
//! The engine only ever sees `Ok | Err` from a [`Network`]; timeouts, retries
//! and size limits live in the [`HttpNetwork`] implementation.

mod http;

pub use http::HttpNetwork;

use std::future::Future;

use serde_json::Value;
use thiserror::Error;

/// Errors surfaced by a [`Network`] implementation.
#[derive(Debug, Error)]
pub enum NetworkError {
    /// Connection, DNS or TLS failure
    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),
    /// Non-2xx response (after retries for 5xx/429)
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    #[error("Request timed out")]
    Timeout,
    /// Response body exceeded the size cap
    #[error("Response too large")]
    ResponseTooLarge,
    #[error("Invalid JSON response: {0}")]
    InvalidJson(String),
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

/// HTTP-shaped collaborator. Implementations must be shareable across tasks.
pub trait Network: Send + Sync + 'static {
    fn get_bytes(&self, url: &str) -> impl Future<Output = Result<Vec<u8>, NetworkError>> + Send;

    fn get_json(&self, url: &str) -> impl Future<Output = Result<Value, NetworkError>> + Send;

    /// URL-encoded form POST returning a JSON body.
    fn post_form(
        &self,
        url: &str,
        fields: &[(&str, String)],
    ) -> impl Future<Output = Result<Value, NetworkError>> + Send;

    /// Whether the last request reached the server.
    fn is_reachable(&self) -> bool;
}

/// True when a JSON reply carries `"success": 1`.
pub fn is_success(reply: &Value) -> bool {
    reply.get("success").and_then(Value::as_i64) == Some(1)
}

/// Form fields of a clap submission: one story, the claps of this visit.
pub fn clap_form(story_id: &str, count: u32) -> Vec<(&'static str, String)> {
    let payload = serde_json::json!([{ "storyId": story_id, "count": count.to_string() }]);
    vec![("payload", payload.to_string())]
}

pub fn block_form(company_id: i64) -> Vec<(&'static str, String)> {
    vec![("blockCompany", company_id.to_string())]
}

/// POST a clap count. `Ok(true)` only when the server acknowledged it.
pub async fn submit_clap<N: Network>(
    network: &N,
    url: &str,
    story_id: &str,
    count: u32,
) -> Result<bool, NetworkError> {
    let reply = network.post_form(url, &clap_form(story_id, count)).await?;
    Ok(is_success(&reply))
}

/// Ask the server to stop sending stories of `company_id`.
pub async fn submit_block<N: Network>(
    network: &N,
    url: &str,
    company_id: i64,
) -> Result<bool, NetworkError> {
    let reply = network.post_form(url, &block_form(company_id)).await?;
    Ok(is_success(&reply))
}

/// Scriptable in-memory network for unit tests.
#[cfg(test)]
pub(crate) mod fake {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct FakeNetwork {
        bytes: Mutex<HashMap<String, Vec<u8>>>,
        json: Mutex<HashMap<String, Value>>,
        posts: Mutex<Vec<(String, Vec<(String, String)>)>>,
        unreachable: AtomicBool,
    }

    impl FakeNetwork {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn serve_bytes(&self, url: &str, body: &[u8]) {
            self.bytes.lock().unwrap().insert(url.to_string(), body.to_vec());
        }

        pub fn serve_json(&self, url: &str, body: Value) {
            self.json.lock().unwrap().insert(url.to_string(), body);
        }

        pub fn set_reachable(&self, reachable: bool) {
            self.unreachable.store(!reachable, Ordering::SeqCst);
        }

        pub fn posts(&self) -> Vec<(String, Vec<(String, String)>)> {
            self.posts.lock().unwrap().clone()
        }
    }

    impl Network for FakeNetwork {
        async fn get_bytes(&self, url: &str) -> Result<Vec<u8>, NetworkError> {
            if !self.is_reachable() {
                return Err(NetworkError::Timeout);
            }
            self.bytes
                .lock()
                .unwrap()
                .get(url)
                .cloned()
                .ok_or(NetworkError::HttpStatus(404))
        }

        async fn get_json(&self, url: &str) -> Result<Value, NetworkError> {
            if !self.is_reachable() {
                return Err(NetworkError::Timeout);
            }
            self.json
                .lock()
                .unwrap()
                .get(url)
                .cloned()
                .ok_or(NetworkError::HttpStatus(404))
        }

        async fn post_form(
            &self,
            url: &str,
            fields: &[(&str, String)],
        ) -> Result<Value, NetworkError> {
            if !self.is_reachable() {
                return Err(NetworkError::Timeout);
            }
            let owned = fields
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect();
            self.posts.lock().unwrap().push((url.to_string(), owned));
            self.json
                .lock()
                .unwrap()
                .get(url)
                .cloned()
                .ok_or(NetworkError::HttpStatus(404))
        }

        fn is_reachable(&self) -> bool {
            !self.unreachable.load(Ordering::SeqCst)
        }
    }
}
