//! Upload transport.
//!
//! This module provides the HTTP sink for encoded frames: a single
//! multipart/form-data POST per frame with a fixed timeout and no retry.

pub mod upload;

pub use upload::{
    validate_endpoint_url, HttpUploader, MultipartBody, UploadReceipt, Uploader, UploaderConfig,
    DEFAULT_UPLOAD_TIMEOUT, IMAGE_CONTENT_TYPE, IMAGE_FIELD_NAME,
};
