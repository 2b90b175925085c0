//! Multipart upload of one file through a remote signer
//!
//! - [`MultipartUploader`]: the initiate / upload parts / complete state machine
//! - [`UploadListener`]: typed hooks for progress and for each failure site
//! - [`PartSource`]: byte-range reads of the file being uploaded

pub mod coordinator;
pub mod error;
pub mod listener;
pub mod source;

pub use coordinator::{
    parse_upload_id, part_count, part_range, MultipartUploader, UploadReport, UploadSession,
    UploadState, UploaderBuilder,
};
pub use error::{Step, UploadError};
pub use listener::{notify_failure, Hooks, NoopListener, UploadListener};
pub use source::{FileSource, PartSource};
