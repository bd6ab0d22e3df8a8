//! Loading of embedded image resources (logos, stamps, watermarks)
//!
//! The rasterizer resolves every `<img src>` against the document base URL
//! and classifies it before loading: `data:` URLs are decoded in-process,
//! same-origin resources are always clean, and cross-origin resources are
//! clean only when the response grants CORS access.

use crate::{Error, Result};
use base64::Engine as Base64Engine;
use std::collections::HashMap;
use std::sync::Mutex;
use url::Url;

/// Bytes of a loaded resource and whether it may be read by the document
#[derive(Debug, Clone, PartialEq)]
pub struct Resource {
    pub bytes: Vec<u8>,
    /// The response granted CORS access to the requesting origin
    pub cors_allowed: bool,
}

/// Where an image reference points, relative to the document
#[derive(Debug, Clone, PartialEq)]
pub enum ResourceRef {
    /// Inline `data:` URL with decoded bytes
    Inline(Vec<u8>),
    SameOrigin(Url),
    CrossOrigin(Url),
    /// Reference that cannot be resolved (e.g. relative without a base)
    Unresolvable(String),
}

/// Fetches resources on behalf of the rasterizer
pub trait ResourceLoader: Send + Sync {
    /// Fetch `url`. `cors` requests CORS access for a cross-origin load.
    fn fetch(&self, url: &Url, cors: bool) -> Result<Resource>;
}

/// Classify `src` against the document base URL.
pub fn classify(src: &str, base: Option<&Url>) -> ResourceRef {
    let src = src.trim();
    if src.starts_with("data:") {
        return match decode_data_url(src) {
            Some(bytes) => ResourceRef::Inline(bytes),
            None => ResourceRef::Unresolvable(src.to_string()),
        };
    }

    let resolved = match base {
        Some(b) => b.join(src),
        None => Url::parse(src),
    };
    let url = match resolved {
        Ok(u) => u,
        Err(_) => return ResourceRef::Unresolvable(src.to_string()),
    };

    match base {
        Some(b) if b.origin() == url.origin() => ResourceRef::SameOrigin(url),
        _ => ResourceRef::CrossOrigin(url),
    }
}

/// Decode a `data:[<mime>][;base64],<payload>` URL.
pub fn decode_data_url(src: &str) -> Option<Vec<u8>> {
    let rest = src.strip_prefix("data:")?;
    let (meta, payload) = rest.split_once(',')?;
    if meta.ends_with(";base64") {
        let cleaned: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
        base64::engine::general_purpose::STANDARD.decode(cleaned).ok()
    } else {
        Some(payload.as_bytes().to_vec())
    }
}

/// Loader serving a fixed set of resources, keyed by absolute URL
///
/// Used for offline rendering and tests. Unknown URLs fail with a
/// `NetworkError`, like a blocked request.
#[derive(Default)]
pub struct StaticResourceLoader {
    resources: Mutex<HashMap<String, Resource>>,
}

impl StaticResourceLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, url: &str, bytes: Vec<u8>, cors_allowed: bool) {
        self.resources
            .lock()
            .unwrap()
            .insert(url.to_string(), Resource { bytes, cors_allowed });
    }
}

impl ResourceLoader for StaticResourceLoader {
    fn fetch(&self, url: &Url, _cors: bool) -> Result<Resource> {
        self.resources
            .lock()
            .unwrap()
            .get(url.as_str())
            .cloned()
            .ok_or_else(|| Error::NetworkError(format!("request to {} was blocked", url)))
    }
}

/// Loader fetching resources over HTTP
///
/// The blocking client is built on first use, so the loader can be created
/// from async code as long as fetches run off the async workers.
#[cfg(feature = "fetch")]
pub struct HttpResourceLoader {
    client: std::sync::OnceLock<reqwest::blocking::Client>,
    origin: Option<String>,
}

#[cfg(feature = "fetch")]
impl HttpResourceLoader {
    /// `origin` is the serialized origin sent with CORS requests
    pub fn new(origin: Option<String>) -> Result<Self> {
        Ok(Self {
            client: std::sync::OnceLock::new(),
            origin,
        })
    }

    fn client(&self) -> Result<&reqwest::blocking::Client> {
        if let Some(client) = self.client.get() {
            return Ok(client);
        }
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| Error::ConfigError(format!("Failed to build HTTP client: {}", e)))?;
        Ok(self.client.get_or_init(|| client))
    }
}

/// Whether an `Access-Control-Allow-Origin` value admits `origin`
pub fn cors_grants(allow_origin: Option<&str>, origin: Option<&str>) -> bool {
    match (allow_origin.map(str::trim), origin) {
        (Some("*"), _) => true,
        (Some(allowed), Some(origin)) => allowed.eq_ignore_ascii_case(origin),
        _ => false,
    }
}

#[cfg(feature = "fetch")]
impl ResourceLoader for HttpResourceLoader {
    fn fetch(&self, url: &Url, cors: bool) -> Result<Resource> {
        let mut req = self.client()?.get(url.as_str());
        if cors {
            if let Some(origin) = &self.origin {
                req = req.header("Origin", origin.as_str());
            }
        }

        let resp = req
            .send()
            .map_err(|e| Error::NetworkError(format!("GET {} failed: {}", url, e)))?;
        if !resp.status().is_success() {
            return Err(Error::NetworkError(format!("GET {} returned {}", url, resp.status())));
        }

        let cors_allowed = cors
            && cors_grants(
                resp.headers()
                    .get("access-control-allow-origin")
                    .and_then(|v| v.to_str().ok()),
                self.origin.as_deref(),
            );
        let bytes = resp
            .bytes()
            .map_err(|e| Error::NetworkError(format!("Failed to read {}: {}", url, e)))?
            .to_vec();

        Ok(Resource { bytes, cors_allowed })
    }
}
