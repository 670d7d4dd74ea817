// HTTP client used by data stores.
//
// Wraps `reqwest::Client` with conditional GETs against the response
// cache, `Allow` bookkeeping, tolerant body decoding and a JSONP channel.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::Utc;
use reqwest::header::{
    ALLOW, CONTENT_TYPE, ETAG, HeaderName, IF_MODIFIED_SINCE, IF_NONE_MATCH, LAST_MODIFIED,
};
use reqwest::{Method, StatusCode};
use serde_json::Value;
use tracing::{debug, trace};
use url::Url;

use crate::cache::{CachedResponse, ResponseCache, cache_key, parse_allow};
use crate::error::Error;
use crate::transport::{TransportConfig, header_map};

/// Per-request headers, merged over the client's defaults.
pub type Headers = BTreeMap<String, String>;

const DEFAULT_JSONP_TIMEOUT: Duration = Duration::from_secs(30);

/// Async HTTP client shared by every store attached to the same context.
///
/// All methods return the decoded response body: JSON when the body
/// parses, a JSON string otherwise, `Null` when empty.
pub struct HttpClient {
    http: reqwest::Client,
    cache: ResponseCache,
    jsonp_timeout: Duration,
    jsonp_seq: AtomicU64,
}

impl HttpClient {
    /// Create a client from a `TransportConfig`.
    pub fn new(transport: &TransportConfig) -> Result<Self, Error> {
        let http = transport.build_client()?;
        Ok(Self {
            http,
            cache: ResponseCache::new(),
            jsonp_timeout: transport.jsonp_timeout,
            jsonp_seq: AtomicU64::new(0),
        })
    }

    /// Create a client around a pre-built `reqwest::Client`.
    pub fn with_client(http: reqwest::Client) -> Self {
        Self {
            http,
            cache: ResponseCache::new(),
            jsonp_timeout: DEFAULT_JSONP_TIMEOUT,
            jsonp_seq: AtomicU64::new(0),
        }
    }

    /// Override the JSONP timeout.
    pub fn with_jsonp_timeout(mut self, timeout: Duration) -> Self {
        self.jsonp_timeout = timeout;
        self
    }

    /// The response cache backing conditional requests.
    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    /// Whether `url` advertised `method` in a prior `Allow` header.
    pub fn allows(&self, url: &Url, method: &Method) -> Option<bool> {
        self.cache.allows(&cache_key(url), method)
    }

    // ── HTTP verbs ───────────────────────────────────────────────────

    pub async fn get(&self, url: &Url, headers: &Headers) -> Result<Value, Error> {
        self.request(Method::GET, url, None, headers).await
    }

    pub async fn post(&self, url: &Url, body: &Value, headers: &Headers) -> Result<Value, Error> {
        self.request(Method::POST, url, Some(body), headers).await
    }

    pub async fn put(&self, url: &Url, body: &Value, headers: &Headers) -> Result<Value, Error> {
        self.request(Method::PUT, url, Some(body), headers).await
    }

    pub async fn patch(&self, url: &Url, body: &Value, headers: &Headers) -> Result<Value, Error> {
        self.request(Method::PATCH, url, Some(body), headers).await
    }

    pub async fn delete(&self, url: &Url, headers: &Headers) -> Result<Value, Error> {
        self.request(Method::DELETE, url, None, headers).await
    }

    /// Issue `method` against `url`.
    ///
    /// GETs revalidate a cached response with `If-None-Match` /
    /// `If-Modified-Since` and serve the cached body on `304`. Any other
    /// successful verb silently expires the cached body for `url`.
    pub async fn request(
        &self,
        method: Method,
        url: &Url,
        body: Option<&Value>,
        headers: &Headers,
    ) -> Result<Value, Error> {
        let key = cache_key(url);
        debug!("{method} {url}");

        let mut builder = self
            .http
            .request(method.clone(), url.clone())
            .headers(header_map(headers)?);

        let cached = if method == Method::GET {
            self.cache.get(&key)
        } else {
            None
        };
        if let Some(ref entry) = cached {
            if let Some(ref etag) = entry.etag {
                builder = builder.header(IF_NONE_MATCH, etag);
            }
            if let Some(ref modified) = entry.last_modified {
                builder = builder.header(IF_MODIFIED_SINCE, modified);
            }
        }
        if let Some(body) = body {
            builder = builder.json(body);
        }

        let resp = builder.send().await?;

        if resp.status() == StatusCode::NOT_MODIFIED {
            if let Some(entry) = cached {
                trace!(%key, "serving cached body (304)");
                return Ok(entry.body);
            }
        }

        self.handle_response(&method, key, resp).await
    }

    /// Fetch `url` through a JSONP callback wrapper.
    ///
    /// Appends `{callback_param}={generated name}` to the query and expects
    /// `name(<json>)` back. Rejects with `Error::Timeout` once the JSONP
    /// timeout elapses.
    pub async fn jsonp(
        &self,
        url: &Url,
        callback_param: &str,
        headers: &Headers,
    ) -> Result<Value, Error> {
        let seq = self.jsonp_seq.fetch_add(1, Ordering::Relaxed);
        let name = format!("stowage_cb_{seq}");

        let mut target = url.clone();
        target
            .query_pairs_mut()
            .append_pair(callback_param, &name);
        debug!("JSONP {target}");

        let fut = async {
            let resp = self
                .http
                .get(target.clone())
                .headers(header_map(headers)?)
                .send()
                .await?;
            let status = resp.status();
            let text = resp.text().await?;
            if !status.is_success() {
                return Err(Error::Http {
                    status: status.as_u16(),
                    message: preview(&text).to_owned(),
                });
            }
            unwrap_jsonp(&text, &name)
        };

        tokio::time::timeout(self.jsonp_timeout, fut)
            .await
            .map_err(|_| Error::Timeout {
                timeout_secs: self.jsonp_timeout.as_secs(),
            })?
    }

    // ── Response handling ────────────────────────────────────────────

    async fn handle_response(
        &self,
        method: &Method,
        key: String,
        resp: reqwest::Response,
    ) -> Result<Value, Error> {
        let status = resp.status();
        let headers = resp.headers().clone();

        if let Some(allow) = headers.get(ALLOW).and_then(|v| v.to_str().ok()) {
            self.cache.record_allow(key.clone(), parse_allow(allow));
        }

        let text = resp.text().await?;

        if !status.is_success() {
            return Err(Error::Http {
                status: status.as_u16(),
                message: if text.is_empty() {
                    status.canonical_reason().unwrap_or("request failed").to_owned()
                } else {
                    preview(&text).to_owned()
                },
            });
        }

        let is_json = headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.contains("json"));
        let body = decode_body(&text, is_json)?;

        if *method == Method::GET {
            let header_str = |name: HeaderName| {
                headers
                    .get(name)
                    .and_then(|v| v.to_str().ok())
                    .map(String::from)
            };
            self.cache.store(
                key,
                CachedResponse {
                    body: body.clone(),
                    etag: header_str(ETAG),
                    last_modified: header_str(LAST_MODIFIED),
                    stored_at: Utc::now(),
                },
            );
        } else {
            self.cache.expire(&key, true);
        }

        Ok(body)
    }
}

/// Decode a response body. JSON content types must parse; anything else
/// falls back to a JSON string.
fn decode_body(text: &str, is_json: bool) -> Result<Value, Error> {
    if text.trim().is_empty() {
        return Ok(Value::Null);
    }
    match serde_json::from_str(text) {
        Ok(value) => Ok(value),
        Err(e) if is_json => Err(Error::Deserialization {
            message: format!("{e} (body preview: {:?})", preview(text)),
            body: text.to_owned(),
        }),
        Err(_) => Ok(Value::String(text.to_owned())),
    }
}

/// Strip `name( ... )` (optionally followed by `;`) and parse the payload.
fn unwrap_jsonp(text: &str, name: &str) -> Result<Value, Error> {
    let trimmed = text.trim().trim_end_matches(';').trim_end();
    let inner = trimmed
        .strip_prefix(name)
        .map(str::trim_start)
        .and_then(|rest| rest.strip_prefix('('))
        .and_then(|rest| rest.strip_suffix(')'))
        .ok_or_else(|| Error::Jsonp {
            message: format!("expected {name}(...), got {:?}", preview(text)),
        })?;
    serde_json::from_str(inner).map_err(|e| Error::Deserialization {
        message: e.to_string(),
        body: inner.to_owned(),
    })
}

fn preview(text: &str) -> &str {
    let mut end = text.len().min(200);
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decode_body_handles_empty_and_text() {
        assert_eq!(decode_body("", true).unwrap(), Value::Null);
        assert_eq!(decode_body("ok", false).unwrap(), json!("ok"));
        assert!(decode_body("not json", true).is_err());
        assert_eq!(decode_body("[1,2]", false).unwrap(), json!([1, 2]));
    }

    #[test]
    fn unwrap_jsonp_accepts_trailing_semicolon() {
        let value = unwrap_jsonp("cb_1({\"a\":1});\n", "cb_1").unwrap();
        assert_eq!(value, json!({"a": 1}));
    }

    #[test]
    fn unwrap_jsonp_rejects_foreign_callback() {
        let err = unwrap_jsonp("other({})", "cb_1").unwrap_err();
        assert!(matches!(err, Error::Jsonp { .. }));
    }

    #[test]
    fn preview_respects_char_boundaries() {
        let text = "é".repeat(150);
        assert!(preview(&text).len() <= 200);
    }
}
