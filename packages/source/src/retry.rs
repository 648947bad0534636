//! HTTP retry helpers for transient errors.
//!
//! Source fetchers call [`send_json`] instead of
//! `reqwest::RequestBuilder::send()` directly so every request gets
//! exponential backoff on timeouts, connection failures, HTTP 429, and
//! HTTP 5xx. Other 4xx responses are permanent.
//!
//! ```ignore
//! let body = retry::send_json(|| client.get(&url).query(&params)).await?;
//! ```

use std::time::Duration;

use crate::SourceError;

/// Maximum number of retry attempts for transient HTTP errors.
///
/// With exponential backoff (1s, 2s, 4s) the total wait before giving up
/// is 7 seconds, well inside one scheduling interval.
const MAX_RETRIES: u32 = 3;

/// Maximum number of full re-fetch attempts when the response body
/// cannot be decoded as JSON (truncated or garbled response).
const MAX_BODY_RETRIES: u32 = 2;

/// Maximum length of the response body preview included in error logs.
const BODY_PREVIEW_LEN: usize = 300;

/// Query parameters whose values never appear in logs or errors.
const SECRET_PARAMS: &[&str] = &["apikey", "api_key", "x_cg_demo_api_key"];

/// Sends an HTTP request and parses the response body as JSON.
///
/// `build_request` is called on each attempt because builders are
/// consumed by `.send()`.
///
/// # Errors
///
/// Returns [`SourceError`] if the request fails after all retries, the
/// server returns a non-retryable status, or the body cannot be parsed
/// as JSON after all body-decode retries.
#[allow(clippy::future_not_send)]
pub async fn send_json<F>(build_request: F) -> Result<serde_json::Value, SourceError>
where
    F: Fn() -> reqwest::RequestBuilder,
{
    let mut body_attempt = 0;

    loop {
        let response = send_inner(&build_request, MAX_RETRIES).await?;
        let url = redact_url(response.url());
        let status = response.status();

        let text = match response.text().await {
            Ok(text) => text,
            Err(e) if body_attempt < MAX_BODY_RETRIES => {
                body_attempt += 1;
                let delay = backoff(body_attempt);
                log::warn!(
                    "Response body read failed (body retry {body_attempt}/{MAX_BODY_RETRIES}), \
                     re-fetching in {delay:?}...\n  url: {url}\n  error: {e}"
                );
                tokio::time::sleep(delay).await;
                continue;
            }
            Err(e) => return Err(SourceError::Http(e.without_url())),
        };

        match serde_json::from_str(&text) {
            Ok(value) => return Ok(value),
            Err(json_err) => {
                let preview = preview(&text);
                if body_attempt < MAX_BODY_RETRIES {
                    body_attempt += 1;
                    let delay = backoff(body_attempt);
                    log::warn!(
                        "JSON parse failed (body retry {body_attempt}/{MAX_BODY_RETRIES}), \
                         re-fetching in {delay:?}...\n  \
                         url: {url}\n  \
                         status: {status}\n  \
                         received: {} bytes\n  \
                         parse error: {json_err}\n  \
                         body preview: {preview}",
                        text.len(),
                    );
                    tokio::time::sleep(delay).await;
                    continue;
                }
                log::error!(
                    "JSON parse failed after {MAX_BODY_RETRIES} retries, giving up.\n  \
                     url: {url}\n  \
                     parse error: {json_err}\n  \
                     body preview: {preview}"
                );
                return Err(SourceError::Json(json_err));
            }
        }
    }
}

/// Sends one request and parses the body as JSON whatever the status.
///
/// Error documents (a 404 `{"error": ...}`, a 429 rate-limit note) come
/// back as `Ok`. Nothing is retried.
///
/// # Errors
///
/// Returns [`SourceError::Http`] on a transport failure and
/// [`SourceError::Json`] if the body is not JSON.
#[allow(clippy::future_not_send)]
pub async fn send_json_once<F>(build_request: F) -> Result<serde_json::Value, SourceError>
where
    F: Fn() -> reqwest::RequestBuilder,
{
    let response = build_request()
        .send()
        .await
        .map_err(|e| SourceError::Http(e.without_url()))?;
    let url = redact_url(response.url());
    let status = response.status();
    if !status.is_success() {
        log::warn!("HTTP {status} from {url}, keeping the body");
    }

    let text = response
        .text()
        .await
        .map_err(|e| SourceError::Http(e.without_url()))?;

    serde_json::from_str(&text).map_err(|e| {
        log::error!(
            "JSON parse failed\n  url: {url}\n  status: {status}\n  parse error: {e}\n  \
             body preview: {}",
            preview(&text)
        );
        SourceError::Json(e)
    })
}

/// Sends the request built by `build_request`, retrying transient
/// failures up to `max_retries` times. Returns the first non-error
/// response.
#[allow(clippy::future_not_send)]
async fn send_inner<F>(build_request: &F, max_retries: u32) -> Result<reqwest::Response, SourceError>
where
    F: Fn() -> reqwest::RequestBuilder,
{
    let mut attempt = 0;

    loop {
        if attempt > 0 {
            let delay = backoff(attempt);
            log::warn!("  retry {attempt}/{max_retries} in {delay:?}...");
            tokio::time::sleep(delay).await;
        }

        match build_request().send().await {
            Err(e) => {
                if is_transient(&e) && attempt < max_retries {
                    log::warn!("  transient error: {}", e.without_url());
                    attempt += 1;
                    continue;
                }
                return Err(SourceError::Http(e.without_url()));
            }
            Ok(response) => {
                let status = response.status();
                if status.is_success() || status.is_redirection() {
                    return Ok(response);
                }

                let url = redact_url(response.url());
                if is_retryable_status(status.as_u16()) && attempt < max_retries {
                    log::warn!("  HTTP {status} from {url}");
                    attempt += 1;
                    continue;
                }

                return Err(SourceError::Status {
                    url,
                    status: status.as_u16(),
                });
            }
        }
    }
}

/// Exponential backoff: 1s, 2s, 4s, ...
fn backoff(attempt: u32) -> Duration {
    Duration::from_secs(1u64 << attempt.saturating_sub(1).min(6))
}

/// Returns `true` if the error is likely transient and worth retrying.
fn is_transient(e: &reqwest::Error) -> bool {
    e.is_timeout() || e.is_connect() || e.is_body() || e.is_request()
}

/// Throttling and server errors are worth another attempt.
const fn is_retryable_status(status: u16) -> bool {
    status == 429 || status >= 500
}

fn preview(text: &str) -> String {
    if text.len() <= BODY_PREVIEW_LEN {
        return text.to_string();
    }
    let mut end = BODY_PREVIEW_LEN;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}

/// Renders a URL with secret query values masked.
fn redact_url(url: &reqwest::Url) -> String {
    let mut redacted = url.clone();
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| {
            let value = if SECRET_PARAMS.contains(&k.as_ref()) {
                "***".to_string()
            } else {
                v.into_owned()
            };
            (k.into_owned(), value)
        })
        .collect();

    if pairs.is_empty() {
        return redacted.to_string();
    }

    redacted.query_pairs_mut().clear().extend_pairs(pairs);
    redacted.to_string()
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use super::*;

    /// Serves `response` verbatim to every connection and counts them.
    async fn serve(response: &'static str) -> (String, &'static AtomicU32) {
        let hits: &'static AtomicU32 = Box::leak(Box::new(AtomicU32::new(0)));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/coins/unknown", listener.local_addr().unwrap());

        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                hits.fetch_add(1, Ordering::SeqCst);
                let mut buf = [0_u8; 4096];
                let _ = socket.read(&mut buf).await;
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });

        (url, hits)
    }

    #[tokio::test]
    async fn single_attempt_keeps_error_payloads() {
        let (url, hits) = serve(
            "HTTP/1.1 404 Not Found\r\ncontent-type: application/json\r\n\
             content-length: 27\r\nconnection: close\r\n\r\n{\"error\":\"coin not found\"}\n",
        )
        .await;
        let client = reqwest::Client::new();

        let body = send_json_once(|| client.get(&url)).await.unwrap();

        assert_eq!(body, serde_json::json!({ "error": "coin not found" }));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn single_attempt_fails_on_non_json_body() {
        let (url, hits) = serve(
            "HTTP/1.1 502 Bad Gateway\r\ncontent-type: text/html\r\n\
             content-length: 6\r\nconnection: close\r\n\r\n<html>",
        )
        .await;
        let client = reqwest::Client::new();

        let err = send_json_once(|| client.get(&url)).await.unwrap_err();

        assert!(matches!(err, SourceError::Json(_)));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn backoff_doubles() {
        assert_eq!(backoff(1), Duration::from_secs(1));
        assert_eq!(backoff(2), Duration::from_secs(2));
        assert_eq!(backoff(3), Duration::from_secs(4));
    }

    #[test]
    fn only_throttling_and_server_errors_retry() {
        assert!(is_retryable_status(429));
        assert!(is_retryable_status(500));
        assert!(is_retryable_status(503));
        assert!(!is_retryable_status(400));
        assert!(!is_retryable_status(401));
        assert!(!is_retryable_status(404));
    }

    #[test]
    fn masks_api_key() {
        let url = reqwest::Url::parse(
            "https://www.alphavantage.co/query?function=TIME_SERIES_INTRADAY&symbol=AAPL&apikey=secret",
        )
        .unwrap();
        let redacted = redact_url(&url);
        assert!(!redacted.contains("secret"));
        assert!(redacted.contains("symbol=AAPL"));
        assert!(redacted.contains("apikey=***") || redacted.contains("apikey=%2A%2A%2A"));
    }

    #[test]
    fn leaves_plain_urls_alone() {
        let url = reqwest::Url::parse("https://api.coingecko.com/api/v3/ping").unwrap();
        assert_eq!(redact_url(&url), "https://api.coingecko.com/api/v3/ping");
    }

    #[test]
    fn preview_truncates_on_char_boundary() {
        let text = "é".repeat(BODY_PREVIEW_LEN);
        let out = preview(&text);
        assert!(out.ends_with("..."));
        assert!(out.len() <= BODY_PREVIEW_LEN + 3);
    }
}
