use crate::config::ConfigError;
use crate::s3::{SignError, StorageResponse, TransportError};
use hyper::StatusCode;
use thiserror::Error;

/// Network step that was in flight when a failure happened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Initiate,
    UploadPart(u32),
    Complete,
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Step::Initiate => f.write_str("initiate"),
            Step::UploadPart(n) => write!(f, "upload part {}", n),
            Step::Complete => f.write_str("complete"),
        }
    }
}

/// Upload errors. Every variant except `InvalidState` is terminal for the session.
#[derive(Error, Debug)]
pub enum UploadError {
    #[error("Unsupported environment: {0}")]
    UnsupportedEnvironment(String),

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("Network error during {step}: {source}")]
    Network {
        step: Step,
        #[source]
        source: TransportError,
    },

    #[error("Signing service error: {status} - {message}")]
    AuthSigning { status: StatusCode, message: String },

    #[error("Initiate multipart upload failed: {status} - {message}")]
    Initiate { status: StatusCode, message: String },

    #[error("Initiate response has no UploadId")]
    MissingUploadId { body: String },

    #[error("Upload of part {part_number} failed: {status} - {message}")]
    PartUpload {
        part_number: u32,
        status: StatusCode,
        message: String,
    },

    #[error("Complete multipart upload failed: {status} - {message}")]
    Complete { status: StatusCode, message: String },

    #[error("Failed to read part {part_number} from source: {source}")]
    Source {
        part_number: u32,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: String,
    },
}

impl UploadError {
    /// Map a signer failure at `step` (the storage step the signature was for)
    pub(crate) fn from_sign(step: Step, err: SignError) -> Self {
        match err {
            SignError::Network(source) => UploadError::Network { step, source },
            SignError::Rejected(response) => UploadError::AuthSigning {
                status: response.status,
                message: response.body_text(),
            },
        }
    }

    pub(crate) fn network(step: Step, source: TransportError) -> Self {
        UploadError::Network { step, source }
    }

    pub(crate) fn initiate(response: &StorageResponse) -> Self {
        UploadError::Initiate {
            status: response.status,
            message: response.body_text(),
        }
    }

    pub(crate) fn part_upload(part_number: u32, response: &StorageResponse) -> Self {
        UploadError::PartUpload {
            part_number,
            status: response.status,
            message: response.body_text(),
        }
    }

    pub(crate) fn complete(response: &StorageResponse) -> Self {
        UploadError::Complete {
            status: response.status,
            message: response.body_text(),
        }
    }

    /// HTTP status of the failed response, for the response-bearing kinds
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            UploadError::AuthSigning { status, .. }
            | UploadError::Initiate { status, .. }
            | UploadError::PartUpload { status, .. }
            | UploadError::Complete { status, .. } => Some(*status),
            UploadError::MissingUploadId { .. } => Some(StatusCode::OK),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_rejection_maps_to_auth_error() {
        let response = StorageResponse::new(StatusCode::UNAUTHORIZED, "no");
        let err = UploadError::from_sign(Step::Initiate, SignError::Rejected(response));
        assert!(matches!(err, UploadError::AuthSigning { status: StatusCode::UNAUTHORIZED, .. }));
        assert_eq!(err.status(), Some(StatusCode::UNAUTHORIZED));
    }

    #[test]
    fn test_sign_network_failure_keeps_step() {
        let err = UploadError::from_sign(
            Step::UploadPart(4),
            SignError::Network(TransportError::Connection("refused".to_string())),
        );
        assert!(matches!(err, UploadError::Network { step: Step::UploadPart(4), .. }));
        assert_eq!(err.status(), None);
        assert!(err.to_string().contains("upload part 4"));
    }

    #[test]
    fn test_part_upload_message() {
        let response = StorageResponse::new(StatusCode::SERVICE_UNAVAILABLE, "SlowDown");
        let err = UploadError::part_upload(2, &response);
        assert_eq!(
            err.to_string(),
            "Upload of part 2 failed: 503 Service Unavailable - SlowDown"
        );
    }
}
