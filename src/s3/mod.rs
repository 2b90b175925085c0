//! S3 wire layer: canonical strings, the remote signer and the HTTP transport
//!
//! This module provides:
//! - Canonical string construction for AWS v2-style header signatures
//! - A client for the remote signing service
//! - An async transport over hyper for the storage endpoint

pub mod signer;
pub mod transport;
pub mod types;
pub mod url;

// Re-export main types for convenience
pub use signer::{amz_date, AuthServiceSigner, RequestSigner, SignError};
pub use transport::{HyperTransport, ProgressFn, Transport, TransportError};
pub use types::{
    completion_document, CanonicalRequest, CompletedPart, SignedRequest, StorageRequest,
    StorageResponse, COMPLETE_CONTENT_TYPE,
};
