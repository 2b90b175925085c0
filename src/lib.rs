//! s3chunk - chunked S3 multipart uploads authorized by a remote signing service

pub mod cli;
pub mod config;
pub mod s3;
pub mod upload;

pub use config::{UploadConfig, UploadSettings};
pub use upload::{MultipartUploader, UploadError, UploadListener};
