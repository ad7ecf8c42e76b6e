//! HTTP client abstraction for testability

use std::time::Duration;

use crate::commons::error::{AgknowError, Result};

/// Raw response: status code and body, whatever the status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        HttpResponse {
            status,
            body: body.into(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == 200
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Trait for HTTP client operations.
///
/// Network failures (connection refused, DNS, timeout) are returned as
/// [`AgknowError::Transport`]. Non-200 statuses are NOT errors at this level:
/// the API reports application failures through the body for some versions,
/// so interpretation is left to the data-access layer.
pub trait HttpClient: Send + Sync {
    /// Performs a single GET request.
    fn get(&self, url: &str, timeout: Duration) -> Result<HttpResponse>;

    /// Performs a single POST request with a JSON body.
    fn post_json(&self, url: &str, body: &str, timeout: Duration) -> Result<HttpResponse>;
}

/// Real HTTP client implementation using reqwest.
pub struct ReqwestClient {
    client: reqwest::blocking::Client,
}

impl ReqwestClient {
    /// Creates a client. With `verify_tls = false` invalid certificates are accepted.
    pub fn new(verify_tls: bool) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .danger_accept_invalid_certs(!verify_tls)
            .build()
            .map_err(|e| AgknowError::Transport {
                url: String::new(),
                reason: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self { client })
    }

    fn read(url: &str, response: reqwest::blocking::Response) -> Result<HttpResponse> {
        let status = response.status().as_u16();
        let body = response.bytes().map_err(|e| AgknowError::Transport {
            url: url.to_string(),
            reason: format!("Failed to read response: {}", e),
        })?;
        Ok(HttpResponse::new(status, body.to_vec()))
    }
}

impl HttpClient for ReqwestClient {
    fn get(&self, url: &str, timeout: Duration) -> Result<HttpResponse> {
        tracing::debug!(target: "agknow", "GET {}", redact_key(url));
        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .map_err(|e| AgknowError::Transport {
                url: redact_key(url),
                reason: e.to_string(),
            })?;
        Self::read(url, response)
    }

    fn post_json(&self, url: &str, body: &str, timeout: Duration) -> Result<HttpResponse> {
        tracing::debug!(target: "agknow", "POST {}", redact_key(url));
        let response = self
            .client
            .post(url)
            .header("Content-type", "application/json")
            .body(body.to_string())
            .timeout(timeout)
            .send()
            .map_err(|e| AgknowError::Transport {
                url: redact_key(url),
                reason: e.to_string(),
            })?;
        Self::read(url, response)
    }
}

/// Hide the value of the `key` query parameter in logged URLs.
pub fn redact_key(url: &str) -> String {
    match url::Url::parse(url) {
        Ok(mut parsed) => {
            let pairs: Vec<(String, String)> = parsed
                .query_pairs()
                .map(|(k, v)| {
                    if k == "key" {
                        (k.into_owned(), "***".to_string())
                    } else {
                        (k.into_owned(), v.into_owned())
                    }
                })
                .collect();
            if pairs.is_empty() {
                return parsed.to_string();
            }
            parsed.query_pairs_mut().clear().extend_pairs(pairs);
            parsed.to_string()
        }
        Err(_) => url.to_string(),
    }
}
