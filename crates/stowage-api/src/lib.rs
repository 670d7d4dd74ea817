// stowage-api: async HTTP transport consumed by stowage data stores.
//
// Wraps `reqwest` with a per-URI response cache (conditional GET, expiry
// notifications), permission bits taken from `Allow` headers, and a JSONP
// channel for endpoints that only answer with a callback wrapper.

pub mod cache;
pub mod client;
pub mod error;
pub mod transport;

pub use cache::{CacheExpiry, CachedResponse, ResponseCache};
pub use client::{Headers, HttpClient};
pub use error::Error;
pub use reqwest::Method;
pub use transport::{TlsMode, TransportConfig};
