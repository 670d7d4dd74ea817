// Shared transport configuration for building reqwest::Client instances.
//
// TLS, timeout, cookie and default-header settings live here so every
// HttpClient is built the same way.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

use crate::error::Error;

/// TLS verification mode.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TlsMode {
    /// Use the system certificate store.
    #[default]
    System,
    /// Use a custom CA certificate from the given PEM file.
    CustomCa(PathBuf),
    /// Accept any certificate (development endpoints with self-signed certs).
    DangerAcceptInvalid,
}

/// Shared transport configuration for building HTTP clients.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub tls: TlsMode,
    pub timeout: Duration,
    /// Wall-clock limit for a JSONP round-trip.
    pub jsonp_timeout: Duration,
    pub user_agent: String,
    /// Headers sent with every request.
    pub default_headers: BTreeMap<String, String>,
    /// Keep a cookie store so credentialed endpoints see their session.
    pub cookie_store: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            tls: TlsMode::System,
            timeout: Duration::from_secs(30),
            jsonp_timeout: Duration::from_secs(30),
            user_agent: format!("stowage/{}", env!("CARGO_PKG_VERSION")),
            default_headers: BTreeMap::from([("Accept".into(), "application/json".into())]),
            cookie_store: false,
        }
    }
}

impl TransportConfig {
    /// Build a `reqwest::Client` from this config.
    pub fn build_client(&self) -> Result<reqwest::Client, Error> {
        let mut builder = reqwest::Client::builder()
            .timeout(self.timeout)
            .user_agent(self.user_agent.clone())
            .default_headers(header_map(&self.default_headers)?)
            .cookie_store(self.cookie_store);

        match &self.tls {
            TlsMode::System => {}
            TlsMode::CustomCa(path) => {
                let cert_pem = std::fs::read(path)
                    .map_err(|e| Error::Tls(format!("failed to read CA cert: {e}")))?;
                let cert = reqwest::Certificate::from_pem(&cert_pem)
                    .map_err(|e| Error::Tls(format!("invalid CA cert: {e}")))?;
                builder = builder.add_root_certificate(cert);
            }
            TlsMode::DangerAcceptInvalid => {
                builder = builder.danger_accept_invalid_certs(true);
            }
        }

        builder
            .build()
            .map_err(|e| Error::Tls(format!("failed to build HTTP client: {e}")))
    }

    /// Add a default header, replacing any previous value.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.default_headers.insert(name.into(), value.into());
        self
    }
}

/// Convert a plain header table into a `HeaderMap`.
pub(crate) fn header_map(headers: &BTreeMap<String, String>) -> Result<HeaderMap, Error> {
    let mut map = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| Error::Http {
            status: 0,
            message: format!("invalid header name {name:?}: {e}"),
        })?;
        let value = HeaderValue::from_str(value).map_err(|e| Error::Http {
            status: 0,
            message: format!("invalid header value for {name}: {e}"),
        })?;
        map.insert(name, value);
    }
    Ok(map)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn default_config_accepts_json() {
        let config = TransportConfig::default();
        assert_eq!(
            config.default_headers.get("Accept").map(String::as_str),
            Some("application/json")
        );
        assert!(config.user_agent.starts_with("stowage/"));
    }

    #[test]
    fn header_map_rejects_invalid_names() {
        let headers = BTreeMap::from([("bad header".to_string(), "x".to_string())]);
        assert!(header_map(&headers).is_err());
    }

    #[test]
    fn build_client_with_extra_headers() {
        let config = TransportConfig::default().with_header("X-Trace", "on");
        assert!(config.build_client().is_ok());
    }
}
