//! Configuration options for the profile client

use std::env;
use std::time::Duration;

use profile_sync_api::ApiOptions;
use profile_sync_media::{UploadOptions, DEFAULT_CACHE_PARAM, DEFAULT_MAX_IMAGE_BYTES};

use crate::error::Error;

/// Configuration options for the profile client
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// The timeout applied to every request
    pub request_timeout: Duration,

    /// Send the token as `Bearer <token>` rather than verbatim
    pub bearer_auth: bool,

    /// Largest image accepted for upload, in bytes
    pub max_image_bytes: u64,

    /// Query parameter carrying the cache-busting token in display URLs
    pub cache_bust_param: String,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            bearer_auth: false,
            max_image_bytes: DEFAULT_MAX_IMAGE_BYTES,
            cache_bust_param: DEFAULT_CACHE_PARAM.to_string(),
        }
    }
}

impl ClientOptions {
    /// Set the request timeout
    pub fn with_request_timeout(mut self, value: Duration) -> Self {
        self.request_timeout = value;
        self
    }

    /// Set whether the token is sent with the `Bearer` scheme
    pub fn with_bearer_auth(mut self, value: bool) -> Self {
        self.bearer_auth = value;
        self
    }

    /// Set the upload size ceiling
    pub fn with_max_image_bytes(mut self, value: u64) -> Self {
        self.max_image_bytes = value;
        self
    }

    /// Set the cache-busting query parameter name
    pub fn with_cache_bust_param(mut self, value: &str) -> Self {
        self.cache_bust_param = value.to_string();
        self
    }

    /// Build options from the defaults overridden by environment variables.
    ///
    /// Recognised: `PROFILE_SYNC_TIMEOUT_SECS` (must be positive),
    /// `PROFILE_SYNC_MAX_IMAGE_BYTES`, `PROFILE_SYNC_BEARER_AUTH`,
    /// `PROFILE_SYNC_CACHE_PARAM`.
    pub fn from_env() -> Result<Self, Error> {
        let mut options = Self::default();

        if let Some(secs) = parse_var::<u64>("PROFILE_SYNC_TIMEOUT_SECS")? {
            if secs == 0 {
                return Err(Error::config("PROFILE_SYNC_TIMEOUT_SECS must be positive"));
            }
            options.request_timeout = Duration::from_secs(secs);
        }
        if let Some(bytes) = parse_var::<u64>("PROFILE_SYNC_MAX_IMAGE_BYTES")? {
            options.max_image_bytes = bytes;
        }
        if let Some(bearer) = parse_var::<bool>("PROFILE_SYNC_BEARER_AUTH")? {
            options.bearer_auth = bearer;
        }
        if let Ok(param) = env::var("PROFILE_SYNC_CACHE_PARAM") {
            if !param.trim().is_empty() {
                options.cache_bust_param = param.trim().to_string();
            }
        }

        Ok(options)
    }

    pub(crate) fn api_options(&self) -> ApiOptions {
        ApiOptions::default()
            .with_request_timeout(self.request_timeout)
            .with_bearer_auth(self.bearer_auth)
    }

    pub(crate) fn upload_options(&self) -> UploadOptions {
        UploadOptions::default().with_max_image_bytes(self.max_image_bytes)
    }
}

fn parse_var<T: std::str::FromStr>(name: &str) -> Result<Option<T>, Error> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| Error::config(format!("{} has an invalid value: {:?}", name, raw))),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // One test touches the process environment so the variables cannot race.
    #[test]
    fn options_from_env() {
        env::set_var("PROFILE_SYNC_TIMEOUT_SECS", "5");
        env::set_var("PROFILE_SYNC_MAX_IMAGE_BYTES", "1024");
        env::set_var("PROFILE_SYNC_BEARER_AUTH", "true");
        env::set_var("PROFILE_SYNC_CACHE_PARAM", "v");

        let options = ClientOptions::from_env().unwrap();
        assert_eq!(options.request_timeout, Duration::from_secs(5));
        assert_eq!(options.max_image_bytes, 1024);
        assert!(options.bearer_auth);
        assert_eq!(options.cache_bust_param, "v");

        env::set_var("PROFILE_SYNC_TIMEOUT_SECS", "0");
        assert!(matches!(ClientOptions::from_env(), Err(Error::Config(_))));
        env::set_var("PROFILE_SYNC_TIMEOUT_SECS", "5");

        env::set_var("PROFILE_SYNC_MAX_IMAGE_BYTES", "lots");
        assert!(matches!(ClientOptions::from_env(), Err(Error::Config(_))));

        for name in [
            "PROFILE_SYNC_TIMEOUT_SECS",
            "PROFILE_SYNC_MAX_IMAGE_BYTES",
            "PROFILE_SYNC_BEARER_AUTH",
            "PROFILE_SYNC_CACHE_PARAM",
        ] {
            env::remove_var(name);
        }
    }

    #[test]
    fn defaults() {
        let options = ClientOptions::default();
        assert_eq!(options.request_timeout, Duration::from_secs(30));
        assert_eq!(options.max_image_bytes, 5_000_000);
        assert!(!options.bearer_auth);
        assert_eq!(options.cache_bust_param, "timestamp");
    }
}
