//! Profile Sync Client Library
//!
//! A Rust client for a remote user-profile service, providing sign-in,
//! profile editing, photo and gallery uploads with cache-busted image
//! references, and an observable session state.

pub mod config;
pub mod error;
pub mod sync;

pub use profile_sync_api as api;
pub use profile_sync_media as media;

use std::env;
use std::sync::Arc;

use reqwest::Client;
use url::Url;

use profile_sync_api::{HttpProfileApi, ProfileApi};

use crate::config::ClientOptions;
use crate::error::{Error, Result};
use crate::sync::Synchronizer;

/// The main entry point for the profile client
#[derive(Debug, Clone)]
pub struct ProfileClient {
    /// The base URL of the profile service
    pub url: String,
    /// Client options
    pub options: ClientOptions,
    sync: Synchronizer,
}

impl ProfileClient {
    /// Create a new profile client
    ///
    /// # Arguments
    ///
    /// * `service_url` - The base URL of the profile service, without the `/api` suffix
    ///
    /// # Example
    ///
    /// ```
    /// use profile_sync::ProfileClient;
    ///
    /// let client = ProfileClient::new("https://profiles.example.com").unwrap();
    /// ```
    pub fn new(service_url: &str) -> Result<Self> {
        Self::new_with_options(service_url, ClientOptions::default())
    }

    /// Create a new profile client with custom options
    ///
    /// # Example
    ///
    /// ```
    /// use profile_sync::{ProfileClient, config::ClientOptions};
    ///
    /// let options = ClientOptions::default().with_bearer_auth(true);
    /// let client = ProfileClient::new_with_options("https://profiles.example.com", options).unwrap();
    /// ```
    pub fn new_with_options(service_url: &str, options: ClientOptions) -> Result<Self> {
        let parsed = Url::parse(service_url)
            .map_err(|e| Error::config(format!("invalid service URL {:?}: {}", service_url, e)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(Error::config(format!(
                "unsupported URL scheme: {}",
                parsed.scheme()
            )));
        }

        let api = HttpProfileApi::new_with_options(service_url, Client::new(), options.api_options());
        Ok(Self::with_api(service_url, Arc::new(api), options))
    }

    /// Create a client from `PROFILE_SYNC_URL` and the variables read by
    /// [`ClientOptions::from_env`]
    pub fn from_env() -> Result<Self> {
        let url = env::var("PROFILE_SYNC_URL")
            .map_err(|_| Error::config("PROFILE_SYNC_URL is not set"))?;
        Self::new_with_options(&url, ClientOptions::from_env()?)
    }

    /// Create a client over any [`ProfileApi`] implementation
    pub fn with_api(service_url: &str, api: Arc<dyn ProfileApi>, options: ClientOptions) -> Self {
        let sync = Synchronizer::new(api, &options);
        Self {
            url: service_url.trim_end_matches('/').to_string(),
            options,
            sync,
        }
    }

    /// Get a reference to the session synchronizer
    ///
    /// # Example
    ///
    /// ```
    /// use profile_sync::{ProfileClient, sync::Phase};
    ///
    /// let client = ProfileClient::new("https://profiles.example.com").unwrap();
    /// assert_eq!(client.sync().phase(), Phase::SignedOut);
    /// ```
    pub fn sync(&self) -> &Synchronizer {
        &self.sync
    }
}

/// A convenience module for common imports
pub mod prelude {
    pub use crate::config::ClientOptions;
    pub use crate::error::{Error, Result};
    pub use crate::sync::{Phase, ProfileView, SessionSnapshot, Synchronizer};
    pub use crate::ProfileClient;
    pub use profile_sync_api::{
        ApiError, Credential, ImageKind, NewAccount, ProfileApi, ProfileFields, ProfileSnapshot,
        Session,
    };
    pub use profile_sync_media::{
        BatchResult, GalleryItem, ImageRef, ItemStatus, LocalImage, MediaError, UploadBatch,
    };
}
