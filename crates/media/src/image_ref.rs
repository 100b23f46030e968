//! Cache-busting references to remote images

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use url::Url;

/// Query parameter the cache token is rendered as
pub const DEFAULT_CACHE_PARAM: &str = "timestamp";

/// A remote image paired with the token that makes it distinct from every
/// earlier fetch of the same URL.
///
/// Only [`CacheBuster::refresh`] constructs one, so the URL and the token always
/// come from the same refresh.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ImageRef {
    remote_url: String,
    owner_id: String,
    cache_token: u64,
    #[serde(skip)]
    param: Arc<str>,
}

impl ImageRef {
    pub fn remote_url(&self) -> &str {
        &self.remote_url
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    pub fn cache_token(&self) -> u64 {
        self.cache_token
    }

    /// The URL to hand to an image loader, with the cache token appended
    pub fn display_url(&self) -> String {
        match Url::parse(&self.remote_url) {
            Ok(mut url) => {
                url.query_pairs_mut()
                    .append_pair(&self.param, &self.cache_token.to_string());
                url.to_string()
            }
            Err(_) => {
                let sep = if self.remote_url.contains('?') { '&' } else { '?' };
                format!("{}{}{}={}", self.remote_url, sep, self.param, self.cache_token)
            }
        }
    }
}

/// Issues strictly increasing cache tokens.
///
/// Tokens are wall-clock milliseconds, bumped past the previous token when the
/// clock has not advanced (or went backwards).
#[derive(Debug)]
pub struct CacheBuster {
    last: AtomicU64,
    param: Arc<str>,
}

impl Default for CacheBuster {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheBuster {
    pub fn new() -> Self {
        Self::with_param(DEFAULT_CACHE_PARAM)
    }

    /// Use a different query parameter name for rendered URLs
    pub fn with_param(param: impl Into<Arc<str>>) -> Self {
        Self {
            last: AtomicU64::new(0),
            param: param.into(),
        }
    }

    /// Stamp a fresh token onto `remote_url`
    pub fn refresh(&self, remote_url: &str, owner_id: &str) -> ImageRef {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::from_secs(0))
            .as_millis() as u64;

        let mut prev = self.last.load(Ordering::Relaxed);
        let token = loop {
            let next = now.max(prev + 1);
            match self
                .last
                .compare_exchange_weak(prev, next, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => break next,
                Err(actual) => prev = actual,
            }
        };

        ImageRef {
            remote_url: remote_url.to_string(),
            owner_id: owner_id.to_string(),
            cache_token: token,
            param: self.param.clone(),
        }
    }
}
