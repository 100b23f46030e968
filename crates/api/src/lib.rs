//! Remote profile service client for Rust
//!
//! This crate is the typed boundary over the profile service: authentication,
//! profile reads and updates, image uploads and the photo gallery.
//! It never retries and never caches; every call is a single round trip.

mod client;
mod envelope;
mod error;
mod fetch;
mod types;

use async_trait::async_trait;

pub use client::{ApiOptions, HttpProfileApi};
pub use error::{ApiError, Result};
pub use types::*;

/// The remote operations of the profile service.
///
/// [`HttpProfileApi`] talks to the real service; tests and embedders may supply
/// their own implementation.
#[async_trait]
pub trait ProfileApi: Send + Sync {
    /// Create a new account. Does not sign in.
    async fn register(&self, account: &NewAccount) -> Result<()>;

    /// Exchange a credential for a session
    async fn authenticate(&self, credential: &Credential) -> Result<Session>;

    /// Read a profile by user id
    async fn fetch_profile(&self, token: &str, user_id: &str) -> Result<ProfileSnapshot>;

    /// Read the profile that owns `token`
    async fn fetch_profile_by_token(&self, token: &str) -> Result<ProfileSnapshot>;

    /// Update profile fields, returning the server's echo when it sends one
    async fn mutate_profile(
        &self,
        token: &str,
        user_id: &str,
        fields: &ProfileFields,
    ) -> Result<Option<ProfileSnapshot>>;

    /// Update the profile that owns `token`
    async fn mutate_profile_by_token(
        &self,
        token: &str,
        fields: &ProfileFields,
    ) -> Result<Option<ProfileSnapshot>>;

    /// Store one image as the profile photo or as a new gallery item
    async fn upload_image(
        &self,
        token: &str,
        owner_id: &str,
        image: &ImageUpload,
        kind: ImageKind,
    ) -> Result<UploadedImage>;

    async fn list_gallery(&self, token: &str) -> Result<Vec<RemoteGalleryItem>>;

    async fn delete_gallery_item(&self, token: &str, item_id: &str) -> Result<()>;

    async fn delete_account(&self, token: &str, user_id: &str) -> Result<()>;
}
