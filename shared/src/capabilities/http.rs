use crux_http::protocol::{HttpRequest, HttpResponse, HttpResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use url::Url;

pub const MAX_URL_LENGTH: usize = 2048;
pub const MAX_RESPONSE_BODY_SIZE: usize = 16 * 1024 * 1024;
pub const MAX_TIMEOUT_MS: u64 = 300_000;
// Invalid URLs are echoed in errors; keep them short and query-free.
const ECHOED_URL_CHARS: usize = 100;

#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ValidatedUrl {
    url: String,
    host: String,
    path: String,
}

impl ValidatedUrl {
    pub fn new(url: impl Into<String>) -> Result<Self, HttpError> {
        let url = url.into();
        if url.trim().is_empty() {
            return Err(HttpError::InvalidUrl {
                url: String::new(),
                reason: "empty URL".to_string(),
            });
        }
        let parsed = Url::parse(&url).map_err(|e| HttpError::InvalidUrl {
            url: echoed(&url),
            reason: e.to_string(),
        })?;
        Self::from_url(&parsed)
    }

    /// Accepts http(s) URLs with a host, no userinfo, and at most
    /// `MAX_URL_LENGTH` bytes.
    pub fn from_url(parsed: &Url) -> Result<Self, HttpError> {
        let reject = |reason: String| HttpError::InvalidUrl {
            url: echoed(parsed.as_str()),
            reason,
        };

        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(reject(format!("unsupported scheme '{}'", parsed.scheme())));
        }
        let Some(host) = parsed.host_str() else {
            return Err(reject("no host".to_string()));
        };
        if !parsed.username().is_empty() || parsed.password().is_some() {
            return Err(reject("userinfo is not allowed".to_string()));
        }
        if parsed.as_str().len() > MAX_URL_LENGTH {
            return Err(reject(format!("longer than {MAX_URL_LENGTH} bytes")));
        }

        Ok(Self {
            url: parsed.to_string(),
            host: host.to_lowercase(),
            path: parsed.path().to_string(),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.url
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// The URL without its query string, which carries the API key.
    /// Use this form in logs.
    pub fn redacted(&self) -> &str {
        self.url.split('?').next().unwrap_or_default()
    }
}

fn echoed(url: &str) -> String {
    let visible = url.split('?').next().unwrap_or_default();
    match visible.char_indices().nth(ECHOED_URL_CHARS) {
        Some((cut, _)) => format!("{}...", &visible[..cut]),
        None => visible.to_string(),
    }
}

impl fmt::Debug for ValidatedUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ValidatedUrl").field(&self.redacted()).finish()
    }
}

/// Shell-side failures: the request never produced an HTTP status.
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
pub enum HttpError {
    #[error("rejected URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("rejected header {name}: {reason}")]
    InvalidHeader { name: String, reason: String },

    #[error("malformed request: {reason}")]
    InvalidRequest { reason: String },

    #[error("response of {size} bytes over the {max} byte limit")]
    ResponseTooLarge { size: usize, max: usize },

    #[error("could not reach {host}: {message}")]
    ConnectionError { host: String, message: String },

    #[error("no response within {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// The shell dropped the request, e.g. because the app went to background.
    #[error("request cancelled by the shell")]
    Cancelled,
}

impl HttpError {
    /// Failures a reconnect retry can fix.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            HttpError::Timeout { .. } | HttpError::ConnectionError { .. } | HttpError::Cancelled
        )
    }
}

/// Performs the core's `Http` effects. Shells plug in their own networking
/// stack here; `ReqwestTransport` covers native targets.
#[async_trait::async_trait]
pub trait HttpTransport: Send + Sync {
    async fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, HttpError>;
}

/// Converts a transport outcome into the value that resolves an `Http`
/// effect. Transient failures arrive in the core as `Io` or `Timeout`;
/// everything else as `Url`, which the core never retries.
pub fn into_http_result(result: Result<HttpResponse, HttpError>) -> HttpResult {
    match result {
        Ok(response) => HttpResult::Ok(response),
        Err(HttpError::Timeout { .. }) => HttpResult::Err(crux_http::HttpError::Timeout),
        Err(e) if e.is_retryable() => HttpResult::Err(crux_http::HttpError::Io(e.to_string())),
        Err(e) => HttpResult::Err(crux_http::HttpError::Url(e.to_string())),
    }
}

#[cfg(feature = "native-http")]
pub use self::native::ReqwestTransport;

#[cfg(feature = "native-http")]
mod native {
    use super::{
        HttpError, HttpRequest, HttpResponse, HttpTransport, ValidatedUrl, MAX_RESPONSE_BODY_SIZE,
    };
    use reqwest::header::{HeaderName, HeaderValue};
    use std::time::Duration;
    use tracing::debug;

    pub struct ReqwestTransport {
        client: reqwest::Client,
        timeout: Duration,
    }

    impl ReqwestTransport {
        pub fn new(timeout: Duration) -> Result<Self, HttpError> {
            let client = reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .map_err(|e| HttpError::InvalidRequest {
                    reason: format!("failed to build HTTP client: {e}"),
                })?;
            Ok(Self { client, timeout })
        }

        fn prepare(
            &self,
            request: &HttpRequest,
        ) -> Result<(ValidatedUrl, reqwest::RequestBuilder), HttpError> {
            if !request.method.eq_ignore_ascii_case("GET") {
                return Err(HttpError::InvalidRequest {
                    reason: format!("unsupported method {}", request.method),
                });
            }
            let url = ValidatedUrl::new(request.url.as_str())?;

            let mut builder = self.client.get(url.as_str());
            for header in &request.headers {
                let invalid = |reason: String| HttpError::InvalidHeader {
                    name: header.name.chars().take(32).collect(),
                    reason,
                };
                let name = HeaderName::from_bytes(header.name.as_bytes())
                    .map_err(|e| invalid(e.to_string()))?;
                let value =
                    HeaderValue::from_str(&header.value).map_err(|e| invalid(e.to_string()))?;
                builder = builder.header(name, value);
            }
            Ok((url, builder))
        }

        // reqwest errors embed the full URL, including the api_key query.
        fn transport_error(&self, error: reqwest::Error, url: &ValidatedUrl) -> HttpError {
            if error.is_timeout() {
                HttpError::Timeout {
                    timeout_ms: u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
                }
            } else {
                HttpError::ConnectionError {
                    host: url.host().to_string(),
                    message: error.without_url().to_string(),
                }
            }
        }
    }

    #[async_trait::async_trait]
    impl HttpTransport for ReqwestTransport {
        async fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, HttpError> {
            let (url, builder) = self.prepare(request)?;
            debug!(url = url.redacted(), "sending catalog request");

            let response = builder
                .send()
                .await
                .map_err(|e| self.transport_error(e, &url))?;
            let status = response.status().as_u16();
            let body = response
                .bytes()
                .await
                .map_err(|e| self.transport_error(e, &url))?;

            if body.len() > MAX_RESPONSE_BODY_SIZE {
                return Err(HttpError::ResponseTooLarge {
                    size: body.len(),
                    max: MAX_RESPONSE_BODY_SIZE,
                });
            }

            Ok(HttpResponse::status(status).body(body.to_vec()).build())
        }
    }
}
