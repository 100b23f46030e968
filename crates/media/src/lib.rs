//! Image upload pipeline for the profile service
//!
//! Validates a selection of local images as a whole, uploads them one at a time
//! and stamps every stored image with a cache-busting [`ImageRef`].

mod error;
pub mod image_ref;
pub mod pipeline;
mod sniff;

pub use error::{MediaError, Result, Violation, ViolationReason};
pub use image_ref::{CacheBuster, ImageRef, DEFAULT_CACHE_PARAM};
pub use pipeline::{
    BatchResult, GalleryItem, ItemStatus, LocalImage, UploadBatch, UploadItem, UploadOptions,
    UploadPipeline, DEFAULT_MAX_IMAGE_BYTES,
};
pub use sniff::sniff_image;
