//! Validation and sequential upload of user-selected images

use bytes::Bytes;
use profile_sync_api::{ApiError, ImageKind, ImageUpload, ProfileApi};
use serde::Serialize;
use std::sync::Arc;

use crate::error::{MediaError, Result, Violation, ViolationReason};
use crate::image_ref::{CacheBuster, ImageRef};
use crate::sniff::sniff_image;

/// Largest image accepted by default, in bytes
pub const DEFAULT_MAX_IMAGE_BYTES: u64 = 5_000_000;

/// An image as handed over by the local picker
#[derive(Debug, Clone)]
pub struct LocalImage {
    pub file_name: String,
    pub declared_mime: String,
    pub declared_len: u64,
    pub bytes: Bytes,
}

impl LocalImage {
    /// Create an image whose declared length is the length of `bytes`
    pub fn new(file_name: &str, declared_mime: &str, bytes: impl Into<Bytes>) -> Self {
        let bytes = bytes.into();
        Self {
            file_name: file_name.to_string(),
            declared_mime: declared_mime.to_string(),
            declared_len: bytes.len() as u64,
            bytes,
        }
    }

    pub fn with_declared_len(mut self, declared_len: u64) -> Self {
        self.declared_len = declared_len;
        self
    }
}

/// Upload options
#[derive(Debug, Clone)]
pub struct UploadOptions {
    pub max_image_bytes: u64,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            max_image_bytes: DEFAULT_MAX_IMAGE_BYTES,
        }
    }
}

impl UploadOptions {
    pub fn with_max_image_bytes(mut self, value: u64) -> Self {
        self.max_image_bytes = value;
        self
    }
}

/// An entry in the photo gallery
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GalleryItem {
    pub id: String,
    pub image: ImageRef,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemStatus {
    Pending,
    Succeeded(ImageRef),
    Failed(ApiError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadItem {
    /// Position in the original selection
    pub index: usize,
    pub file_name: String,
    /// Server id of the created gallery item
    pub item_id: Option<String>,
    pub status: ItemStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchResult {
    AllSucceeded,
    Partial,
    AllFailed,
}

/// Per-item outcome of one upload operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadBatch {
    pub kind: ImageKind,
    pub items: Vec<UploadItem>,
}

impl UploadBatch {
    pub fn result(&self) -> BatchResult {
        let succeeded = self
            .items
            .iter()
            .filter(|item| matches!(item.status, ItemStatus::Succeeded(_)))
            .count();

        if succeeded == self.items.len() {
            BatchResult::AllSucceeded
        } else if succeeded == 0 {
            BatchResult::AllFailed
        } else {
            BatchResult::Partial
        }
    }

    /// References of the successful items, in selection order
    pub fn succeeded(&self) -> impl Iterator<Item = &ImageRef> {
        self.items.iter().filter_map(|item| match &item.status {
            ItemStatus::Succeeded(image) => Some(image),
            _ => None,
        })
    }

    /// Gallery entries created by this batch, in selection order
    pub fn gallery_items(&self) -> Vec<GalleryItem> {
        self.items
            .iter()
            .filter_map(|item| match (&item.item_id, &item.status) {
                (Some(id), ItemStatus::Succeeded(image)) => Some(GalleryItem {
                    id: id.clone(),
                    image: image.clone(),
                }),
                _ => None,
            })
            .collect()
    }

    pub fn failures(&self) -> impl Iterator<Item = (&UploadItem, &ApiError)> {
        self.items.iter().filter_map(|item| match &item.status {
            ItemStatus::Failed(err) => Some((item, err)),
            _ => None,
        })
    }

    /// Whether the server rejected the session during this batch
    pub fn is_unauthorized(&self) -> bool {
        self.failures().any(|(_, err)| err.is_unauthorized())
    }
}

/// Validates a selection as a whole, then uploads it one image at a time
pub struct UploadPipeline {
    api: Arc<dyn ProfileApi>,
    buster: Arc<CacheBuster>,
    options: UploadOptions,
}

impl UploadPipeline {
    pub fn new(api: Arc<dyn ProfileApi>, buster: Arc<CacheBuster>, options: UploadOptions) -> Self {
        Self {
            api,
            buster,
            options,
        }
    }

    pub fn options(&self) -> &UploadOptions {
        &self.options
    }

    /// Check every image and encode the batch.
    ///
    /// Either all images pass, or every violation is returned together.
    pub fn validate(&self, images: &[LocalImage], kind: ImageKind) -> Result<Vec<ImageUpload>> {
        if images.is_empty() {
            return Err(MediaError::EmptyBatch);
        }
        if kind == ImageKind::ProfilePhoto && images.len() > 1 {
            return Err(MediaError::TooManyForProfilePhoto(images.len()));
        }

        let mut violations = Vec::new();
        let mut encoded = Vec::with_capacity(images.len());

        for (index, image) in images.iter().enumerate() {
            let mut violate = |reason| {
                violations.push(Violation {
                    index,
                    file_name: image.file_name.clone(),
                    reason,
                })
            };

            let actual = image.bytes.len() as u64;
            if image.declared_len != actual {
                violate(ViolationReason::LengthMismatch {
                    declared: image.declared_len,
                    actual,
                });
            }
            if actual > self.options.max_image_bytes {
                violate(ViolationReason::TooLarge {
                    size: actual,
                    limit: self.options.max_image_bytes,
                });
            }

            let declared_is_image = image
                .declared_mime
                .parse::<mime::Mime>()
                .map(|m| m.type_() == mime::IMAGE)
                .unwrap_or(false);
            match sniff_image(&image.bytes) {
                Some(content_type) if declared_is_image => encoded.push(ImageUpload {
                    file_name: image.file_name.clone(),
                    content_type: content_type.to_string(),
                    bytes: image.bytes.clone(),
                }),
                _ => violate(ViolationReason::NotAnImage {
                    declared: image.declared_mime.clone(),
                }),
            }
        }

        if !violations.is_empty() {
            log::debug!("Rejected batch of {} image(s) before upload", images.len());
            return Err(MediaError::Validation(violations));
        }
        Ok(encoded)
    }

    /// Validate `images`, then upload them in order.
    ///
    /// A failed item does not stop the batch, except `Unauthorized`: once the
    /// session is rejected the remaining items are failed without a request.
    pub async fn run(
        &self,
        token: &str,
        owner_id: &str,
        images: &[LocalImage],
        kind: ImageKind,
    ) -> Result<UploadBatch> {
        let encoded = self.validate(images, kind)?;

        let mut batch = UploadBatch {
            kind,
            items: encoded
                .iter()
                .enumerate()
                .map(|(index, image)| UploadItem {
                    index,
                    file_name: image.file_name.clone(),
                    item_id: None,
                    status: ItemStatus::Pending,
                })
                .collect(),
        };

        let mut rejected = false;
        for (item, image) in batch.items.iter_mut().zip(&encoded) {
            if rejected {
                item.status = ItemStatus::Failed(ApiError::Unauthorized);
                continue;
            }

            match self.api.upload_image(token, owner_id, image, kind).await {
                Ok(uploaded) => {
                    item.item_id = uploaded.id;
                    item.status =
                        ItemStatus::Succeeded(self.buster.refresh(&uploaded.remote_url, owner_id));
                }
                Err(err) => {
                    log::warn!("Upload of {} failed: {}", item.file_name, err);
                    rejected = err.is_unauthorized();
                    item.status = ItemStatus::Failed(err);
                }
            }
        }

        log::debug!("{:?} batch finished: {:?}", kind, batch.result());
        Ok(batch)
    }
}
