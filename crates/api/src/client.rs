//! HTTP implementation of [`ProfileApi`]

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

use crate::envelope::{decode, Operation};
use crate::error::{ApiError, Result};
use crate::fetch::{Fetch, DEFAULT_REQUEST_TIMEOUT};
use crate::types::*;
use crate::ProfileApi;

/// Transport options for the API client
#[derive(Debug, Clone)]
pub struct ApiOptions {
    /// Upper bound for each round trip; expiry is reported as a network error
    pub request_timeout: Duration,
    /// Send `Authorization: Bearer <token>` instead of the raw token
    pub bearer_auth: bool,
}

impl Default for ApiOptions {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            bearer_auth: false,
        }
    }
}

impl ApiOptions {
    pub fn with_request_timeout(mut self, value: Duration) -> Self {
        self.request_timeout = value;
        self
    }

    pub fn with_bearer_auth(mut self, value: bool) -> Self {
        self.bearer_auth = value;
        self
    }
}

#[derive(Deserialize)]
struct LoginData {
    token: String,
    #[serde(default, rename = "userId")]
    user_id: Option<String>,
}

#[derive(Deserialize)]
struct StoredImage {
    #[serde(default, rename = "_id", alias = "id")]
    id: Option<String>,
    #[serde(alias = "profile_photo", alias = "url")]
    image_url: String,
}

/// Client for the remote profile service
#[derive(Debug, Clone)]
pub struct HttpProfileApi {
    base_url: String,
    http_client: Client,
    options: ApiOptions,
}

impl HttpProfileApi {
    /// Create a new client for the service rooted at `base_url`
    pub fn new(base_url: &str, http_client: Client) -> Self {
        Self::new_with_options(base_url, http_client, ApiOptions::default())
    }

    pub fn new_with_options(base_url: &str, http_client: Client, options: ApiOptions) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http_client,
            options,
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/api{}", self.base_url, path)
    }
}

#[async_trait]
impl ProfileApi for HttpProfileApi {
    async fn register(&self, account: &NewAccount) -> Result<()> {
        let account = account.validated()?;

        let raw = Fetch::post(&self.http_client, self.endpoint("/user/add_user"))
            .json(&account)?
            .timeout(self.options.request_timeout)
            .send()
            .await?;

        decode(Operation::Register, raw)?;
        log::info!("Registered account for {}", account.email);
        Ok(())
    }

    async fn authenticate(&self, credential: &Credential) -> Result<Session> {
        let raw = Fetch::post(&self.http_client, self.endpoint("/user/user_login"))
            .json(credential)?
            .timeout(self.options.request_timeout)
            .send()
            .await?;

        let envelope = decode(Operation::Authenticate, raw)?;
        let login: LoginData = envelope.data()?;

        let user_id = envelope
            .extra
            .get("userId")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .or(login.user_id)
            .ok_or_else(|| ApiError::network("malformed response: login without `userId`"))?;

        Ok(Session::new(login.token, user_id))
    }

    async fn fetch_profile(&self, token: &str, user_id: &str) -> Result<ProfileSnapshot> {
        let raw = Fetch::get(&self.http_client, self.endpoint("/user/userDetails"))
            .authorization(token, self.options.bearer_auth)?
            .query("userId", user_id)
            .timeout(self.options.request_timeout)
            .send()
            .await?;

        decode(Operation::FetchProfile, raw)?.data()
    }

    async fn fetch_profile_by_token(&self, token: &str) -> Result<ProfileSnapshot> {
        let raw = Fetch::get(&self.http_client, self.endpoint("/user/display"))
            .authorization(token, self.options.bearer_auth)?
            .timeout(self.options.request_timeout)
            .send()
            .await?;

        decode(Operation::FetchProfileByToken, raw)?.data()
    }

    async fn mutate_profile(
        &self,
        token: &str,
        user_id: &str,
        fields: &ProfileFields,
    ) -> Result<Option<ProfileSnapshot>> {
        let fields = fields.normalized()?;

        let raw = Fetch::put(&self.http_client, self.endpoint("/user/updateUser"))
            .authorization(token, self.options.bearer_auth)?
            .query("userId", user_id)
            .json(&fields)?
            .timeout(self.options.request_timeout)
            .send()
            .await?;

        // Servers that echo something other than a profile are still a success.
        let envelope = decode(Operation::MutateProfile, raw)?;
        Ok(envelope.data_opt::<ProfileSnapshot>().unwrap_or(None))
    }

    async fn mutate_profile_by_token(
        &self,
        token: &str,
        fields: &ProfileFields,
    ) -> Result<Option<ProfileSnapshot>> {
        let fields = fields.normalized()?;

        let raw = Fetch::put(&self.http_client, self.endpoint("/user/updateWithToken"))
            .authorization(token, self.options.bearer_auth)?
            .json(&fields)?
            .timeout(self.options.request_timeout)
            .send()
            .await?;

        let envelope = decode(Operation::MutateProfile, raw)?;
        Ok(envelope.data_opt::<ProfileSnapshot>().unwrap_or(None))
    }

    async fn upload_image(
        &self,
        token: &str,
        owner_id: &str,
        image: &ImageUpload,
        kind: ImageKind,
    ) -> Result<UploadedImage> {
        let part = Part::bytes(image.bytes.to_vec())
            .file_name(image.file_name.clone())
            .mime_str(&image.content_type)
            .map_err(|_| ApiError::UnsupportedMediaType)?;
        let form = Form::new()
            .text("userId", owner_id.to_string())
            .part(kind.field_name(), part);

        let builder = match kind {
            ImageKind::ProfilePhoto => {
                Fetch::put(&self.http_client, self.endpoint("/user/updateWithPhoto"))
            }
            ImageKind::GalleryItem => Fetch::post(&self.http_client, self.endpoint("/cart/add_cart")),
        };
        let raw = builder
            .authorization(token, self.options.bearer_auth)?
            .multipart(form)
            .timeout(self.options.request_timeout)
            .send()
            .await?;

        let stored: StoredImage = decode(Operation::UploadImage, raw)?.data()?;
        if kind == ImageKind::GalleryItem && stored.id.is_none() {
            return Err(ApiError::network("malformed response: gallery item without id"));
        }

        log::debug!("Stored {:?} {} for {}", kind, image.file_name, owner_id);
        Ok(UploadedImage {
            id: stored.id,
            remote_url: stored.image_url,
        })
    }

    async fn list_gallery(&self, token: &str) -> Result<Vec<RemoteGalleryItem>> {
        let raw = Fetch::get(&self.http_client, self.endpoint("/cart/get_cart"))
            .authorization(token, self.options.bearer_auth)?
            .timeout(self.options.request_timeout)
            .send()
            .await?;

        Ok(decode(Operation::ListGallery, raw)?
            .data_opt::<Vec<RemoteGalleryItem>>()?
            .unwrap_or_default())
    }

    async fn delete_gallery_item(&self, token: &str, item_id: &str) -> Result<()> {
        let raw = Fetch::delete(&self.http_client, self.endpoint("/cart/delete_cart"))
            .authorization(token, self.options.bearer_auth)?
            .query("cartId", item_id)
            .timeout(self.options.request_timeout)
            .send()
            .await?;

        decode(Operation::DeleteGalleryItem, raw)?;
        Ok(())
    }

    async fn delete_account(&self, token: &str, user_id: &str) -> Result<()> {
        let raw = Fetch::delete(&self.http_client, self.endpoint("/user/delete"))
            .authorization(token, self.options.bearer_auth)?
            .query("userId", user_id)
            .timeout(self.options.request_timeout)
            .send()
            .await?;

        decode(Operation::DeleteAccount, raw)?;
        Ok(())
    }
}
