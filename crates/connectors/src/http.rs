use std::time::Duration;

use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, RequestBuilder};
use serde_json::Value;

use crate::error::ConnectorError;
use crate::oauth::RefreshingToken;

// ── Constants ───────────────────────────────────────────────────────

pub(crate) const MAX_RETRIES: u32 = 3;
pub(crate) const USER_AGENT: &str = concat!("billflow/", env!("CARGO_PKG_VERSION"));
const TIMEOUT: Duration = Duration::from_secs(120);

pub(crate) fn build_http() -> Result<Client, ConnectorError> {
    Client::builder()
        .timeout(TIMEOUT)
        .user_agent(USER_AGENT)
        .build()
        .map_err(|source| ConnectorError::Http { service: "http", source })
}

/// Which failures a request may be repeated after.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryPolicy {
    /// Reads and other side-effect-free calls: transport errors, 429 and 5xx.
    Idempotent,
    /// Creates and uploads: only 429, which the server refuses before doing
    /// any work. A timeout or 5xx may already have been applied.
    ThrottleOnly,
}

/// Seconds from a numeric `Retry-After` header.
pub(crate) fn retry_after(headers: &HeaderMap) -> Option<u64> {
    headers.get(RETRY_AFTER)?.to_str().ok()?.trim().parse().ok()
}

// ── ApiClient ───────────────────────────────────────────────────────

/// JSON-over-HTTP client with retry on throttling and server errors.
///
/// Each service passes a request-building closure that is called once per
/// attempt, plus a function that pulls a readable message out of its error
/// bodies.
pub struct ApiClient {
    http: Client,
    service: &'static str,
    error_extractor: fn(&Value, u16) -> String,
}

impl ApiClient {
    pub fn new(
        service: &'static str,
        error_extractor: fn(&Value, u16) -> String,
    ) -> Result<Self, ConnectorError> {
        Ok(Self { http: build_http()?, service, error_extractor })
    }

    pub fn http(&self) -> &Client {
        &self.http
    }

    pub fn service(&self) -> &'static str {
        self.service
    }

    /// Sends a request that is safe to repeat.
    pub async fn send_json(
        &self,
        build_request: impl Fn(&Client) -> RequestBuilder,
    ) -> Result<Value, ConnectorError> {
        self.send(RetryPolicy::Idempotent, build_request).await
    }

    /// Sends with exponential backoff on the failures `policy` allows.
    /// A 429 waits for `Retry-After` when the server sends one. 401/403 fail
    /// immediately so the caller can refresh credentials.
    pub async fn send(
        &self,
        policy: RetryPolicy,
        build_request: impl Fn(&Client) -> RequestBuilder,
    ) -> Result<Value, ConnectorError> {
        let mut backoff_secs = 1u64;
        let mut attempt = 0u32;

        loop {
            let response = match build_request(&self.http).send().await {
                Ok(response) => response,
                Err(source) if policy == RetryPolicy::Idempotent && attempt < MAX_RETRIES => {
                    tracing::warn!(
                        service = self.service,
                        error = %source,
                        attempt,
                        "request failed, retrying"
                    );
                    self.backoff(backoff_secs, &mut backoff_secs, &mut attempt).await;
                    continue;
                }
                Err(source) => return Err(ConnectorError::Http { service: self.service, source }),
            };

            let status = response.status().as_u16();
            if response.status().is_success() {
                let text = response
                    .text()
                    .await
                    .map_err(|source| ConnectorError::Http { service: self.service, source })?;
                if text.trim().is_empty() {
                    return Ok(Value::Null);
                }
                return serde_json::from_str(&text)
                    .map_err(|e| ConnectorError::invalid(self.service, e.to_string()));
            }

            let wait = if status == 429 {
                retry_after(response.headers()).unwrap_or(backoff_secs)
            } else {
                backoff_secs
            };
            let body: Value = response.json().await.unwrap_or(Value::Null);
            let message = (self.error_extractor)(&body, status);

            if status == 401 || status == 403 {
                return Err(ConnectorError::Unauthorized { service: self.service, status, message });
            }
            let retryable = status == 429 || (status >= 500 && policy == RetryPolicy::Idempotent);
            if retryable && attempt < MAX_RETRIES {
                tracing::warn!(service = self.service, status, %message, attempt, wait, "retrying");
                self.backoff(wait, &mut backoff_secs, &mut attempt).await;
                continue;
            }
            return Err(ConnectorError::Status { service: self.service, status, message });
        }
    }

    /// Like [`send`](Self::send) with a bearer token. A rejected token is
    /// refreshed once and the request repeated; the server did no work on a
    /// 401, so this holds for every policy.
    pub async fn send_authorized(
        &self,
        token: &RefreshingToken,
        policy: RetryPolicy,
        build_request: impl Fn(&Client, &str) -> RequestBuilder,
    ) -> Result<Value, ConnectorError> {
        let access = token.access_token().await?;
        match self.send(policy, |http| build_request(http, &access)).await {
            Err(ConnectorError::Unauthorized { status, .. }) if status == 401 => {
                tracing::info!(service = self.service, "access token rejected, refreshing");
                token.invalidate().await;
                let access = token.access_token().await?;
                self.send(policy, |http| build_request(http, &access)).await
            }
            other => other,
        }
    }

    async fn backoff(&self, wait_secs: u64, backoff_secs: &mut u64, attempt: &mut u32) {
        tokio::time::sleep(Duration::from_secs(wait_secs)).await;
        *backoff_secs *= 2;
        *attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use reqwest::header::HeaderValue;
    use serde_json::json;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn no_extractor(_: &Value, status: u16) -> String {
        format!("HTTP {status}")
    }

    /// Serves the scripted raw responses in order, one per connection, and
    /// repeats the last one. Returns the base URL and a request counter.
    async fn scripted_server(responses: Vec<&'static str>) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();

        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else { return };
                let n = counter.fetch_add(1, Ordering::SeqCst);
                let response = responses[n.min(responses.len() - 1)];
                read_request(&mut socket).await;
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });
        (url, hits)
    }

    async fn read_request(socket: &mut tokio::net::TcpStream) {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let Ok(n) = socket.read(&mut chunk).await else { return };
            if n == 0 {
                return;
            }
            buf.extend_from_slice(&chunk[..n]);
            let text = String::from_utf8_lossy(&buf);
            if let Some(end) = text.find("\r\n\r\n") {
                let length = text[..end]
                    .lines()
                    .find_map(|l| {
                        let (name, value) = l.split_once(':')?;
                        if name.eq_ignore_ascii_case("content-length") {
                            value.trim().parse::<usize>().ok()
                        } else {
                            None
                        }
                    })
                    .unwrap_or(0);
                if buf.len() >= end + 4 + length {
                    return;
                }
            }
        }
    }

    const UNAVAILABLE: &str = "HTTP/1.1 503 Service Unavailable\r\n\
        Content-Length: 0\r\nConnection: close\r\n\r\n";
    const THROTTLED: &str = "HTTP/1.1 429 Too Many Requests\r\n\
        Retry-After: 0\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";
    const CREATED: &str = "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\n\
        Content-Length: 11\r\nConnection: close\r\n\r\n{\"Id\":\"7\"}\n";

    #[tokio::test]
    async fn create_is_not_repeated_after_server_error() {
        let (url, hits) = scripted_server(vec![UNAVAILABLE]).await;
        let api = ApiClient::new("Test", no_extractor).unwrap();

        let body = json!({"TotalAmt": 93.25});
        let result = api
            .send(RetryPolicy::ThrottleOnly, |http| http.post(format!("{url}/bill")).json(&body))
            .await;

        assert!(matches!(result, Err(ConnectorError::Status { status: 503, .. })));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn throttled_create_waits_and_retries() {
        let (url, hits) = scripted_server(vec![THROTTLED, CREATED]).await;
        let api = ApiClient::new("Test", no_extractor).unwrap();

        let body = api
            .send(RetryPolicy::ThrottleOnly, |http| {
                http.post(format!("{url}/bill")).json(&json!({}))
            })
            .await
            .unwrap();

        assert_eq!(body["Id"], "7");
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn reads_numeric_retry_after() {
        let mut headers = HeaderMap::new();
        assert_eq!(retry_after(&headers), None);
        headers.insert(RETRY_AFTER, HeaderValue::from_static("12"));
        assert_eq!(retry_after(&headers), Some(12));
        headers.insert(RETRY_AFTER, HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"));
        assert_eq!(retry_after(&headers), None);
    }
}
