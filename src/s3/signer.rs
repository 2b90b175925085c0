//! Client for the remote signing service
//!
//! The storage secret key never leaves the server side. For every storage
//! request the uploader builds the canonical string, asks the signing service
//! for its signature, and then sends the storage request with exactly the date
//! that was signed.

use crate::config::UploadConfig;
use crate::s3::transport::{Transport, TransportError};
use crate::s3::types::{CanonicalRequest, SignedRequest, StorageRequest, StorageResponse};
use crate::s3::url::{encode_object_key, join_url, url_encode_into};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hyper::Method;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Source of the signing timestamp
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Signing failures
#[derive(Error, Debug)]
pub enum SignError {
    #[error("Signing service unreachable: {0}")]
    Network(#[from] TransportError),

    #[error("Signing service rejected the request: {}", .0.status)]
    Rejected(StorageResponse),
}

/// Produces a signature for one storage request
#[async_trait]
pub trait RequestSigner: Send + Sync {
    /// Sign `method` against the object resource plus `suffix_to_sign`
    /// (e.g. `?uploads`). The returned date must be sent as `x-amz-date`.
    async fn sign(
        &self,
        method: Method,
        suffix_to_sign: &str,
        content_type: &str,
    ) -> Result<SignedRequest, SignError>;
}

/// Format a timestamp as an RFC 1123 GMT date (`Tue, 01 Sep 2015 13:47:40 GMT`)
pub fn amz_date(now: DateTime<Utc>) -> String {
    now.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Signs requests through `GET <auth url>/?to_sign=<canonical string>`
#[derive(Clone)]
pub struct AuthServiceSigner {
    transport: Arc<dyn Transport>,
    auth_url: String,
    auth_headers: BTreeMap<String, String>,
    bucket: String,
    encoded_key: String,
    clock: Clock,
}

impl AuthServiceSigner {
    pub fn new(
        transport: Arc<dyn Transport>,
        auth_url: impl Into<String>,
        bucket: impl Into<String>,
        object_key: &str,
    ) -> Self {
        Self {
            transport,
            auth_url: auth_url.into(),
            auth_headers: BTreeMap::new(),
            bucket: bucket.into(),
            encoded_key: encode_object_key(object_key).into_owned(),
            clock: Arc::new(Utc::now),
        }
    }

    pub fn from_config(transport: Arc<dyn Transport>, config: &UploadConfig) -> Self {
        Self::new(
            transport,
            config.auth_endpoint_url.clone(),
            config.bucket_name.clone(),
            &config.object_key,
        )
        .with_headers(config.auth_endpoint_headers.clone())
    }

    /// Extra headers sent with every signing request
    pub fn with_headers(mut self, headers: BTreeMap<String, String>) -> Self {
        self.auth_headers = headers;
        self
    }

    /// Override the timestamp source
    pub fn with_clock<F>(mut self, clock: F) -> Self
    where
        F: Fn() -> DateTime<Utc> + Send + Sync + 'static,
    {
        self.clock = Arc::new(clock);
        self
    }

    /// Canonical request for the configured bucket and object
    pub fn canonical_request(
        &self,
        method: Method,
        suffix_to_sign: &str,
        content_type: &str,
        date: String,
    ) -> CanonicalRequest {
        let mut resource_path =
            String::with_capacity(2 + self.bucket.len() + self.encoded_key.len());
        resource_path.push('/');
        resource_path.push_str(&self.bucket);
        resource_path.push('/');
        resource_path.push_str(&self.encoded_key);

        CanonicalRequest {
            method,
            content_type: content_type.to_string(),
            date,
            resource_path,
            query_to_sign: suffix_to_sign.to_string(),
        }
    }

    fn signing_url(&self, string_to_sign: &str) -> String {
        let mut path = String::with_capacity(string_to_sign.len() * 2 + 16);
        path.push_str("?to_sign=");
        url_encode_into(&mut path, string_to_sign);
        join_url(&self.auth_url, &path)
    }
}

#[async_trait]
impl RequestSigner for AuthServiceSigner {
    async fn sign(
        &self,
        method: Method,
        suffix_to_sign: &str,
        content_type: &str,
    ) -> Result<SignedRequest, SignError> {
        let date = amz_date((self.clock)());
        let canonical = self.canonical_request(method, suffix_to_sign, content_type, date);
        let string_to_sign = canonical.string_to_sign();

        let mut request = StorageRequest::new(Method::GET, self.signing_url(&string_to_sign));
        for (name, value) in &self.auth_headers {
            request = request.header(name.as_str(), value.as_str());
        }

        debug!(method = %canonical.method, suffix = suffix_to_sign, "requesting signature");
        let response = self.transport.send(request, None).await?;

        if !response.is_ok() {
            return Err(SignError::Rejected(response));
        }

        let signature = response.body_text().trim().to_string();
        Ok(SignedRequest::new(signature, canonical.date))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use hyper::StatusCode;
    use std::sync::Mutex;

    struct RecordingTransport {
        status: StatusCode,
        body: &'static str,
        seen: Mutex<Vec<StorageRequest>>,
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        async fn send(
            &self,
            request: StorageRequest,
            _progress: Option<crate::s3::transport::ProgressFn>,
        ) -> Result<StorageResponse, TransportError> {
            self.seen.lock().unwrap().push(request);
            Ok(StorageResponse::new(self.status, self.body))
        }
    }

    fn fixed_clock() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2015, 9, 1, 13, 47, 40).unwrap()
    }

    fn signer(transport: Arc<RecordingTransport>) -> AuthServiceSigner {
        AuthServiceSigner::new(transport, "http://my.com/auth_sign", "mybucket", "name_file.txt")
            .with_clock(fixed_clock)
    }

    #[test]
    fn test_amz_date_format() {
        assert_eq!(amz_date(fixed_clock()), "Tue, 01 Sep 2015 13:47:40 GMT");
    }

    #[test]
    fn test_canonical_part_string() {
        let transport = Arc::new(RecordingTransport {
            status: StatusCode::OK,
            body: "",
            seen: Mutex::new(Vec::new()),
        });
        let canonical = signer(transport).canonical_request(
            Method::PUT,
            "?partNumber=3&uploadId=XYZ",
            "",
            "Tue, 01 Sep 2015 13:47:40 GMT".to_string(),
        );
        assert_eq!(
            canonical.string_to_sign(),
            "PUT\n\n\n\nx-amz-date:Tue, 01 Sep 2015 13:47:40 GMT\n/mybucket/name_file.txt?partNumber=3&uploadId=XYZ"
        );
    }

    #[tokio::test]
    async fn test_sign_sends_encoded_string_and_headers() {
        let transport = Arc::new(RecordingTransport {
            status: StatusCode::OK,
            body: "c2lnbmF0dXJl\n",
            seen: Mutex::new(Vec::new()),
        });
        let mut headers = BTreeMap::new();
        headers.insert("X-Csrf-Token".to_string(), "t0k3n".to_string());
        let signer = signer(transport.clone()).with_headers(headers);

        let signed = signer.sign(Method::POST, "?uploads", "").await.unwrap();
        assert_eq!(signed.signature, "c2lnbmF0dXJl");
        assert_eq!(signed.date, "Tue, 01 Sep 2015 13:47:40 GMT");

        let seen = transport.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].method, Method::GET);
        assert_eq!(
            seen[0].url,
            "http://my.com/auth_sign/?to_sign=POST%0A%0A%0A%0Ax-amz-date%3ATue%2C%2001%20Sep%202015%2013%3A47%3A40%20GMT%0A%2Fmybucket%2Fname_file.txt%3Fuploads"
        );
        assert_eq!(seen[0].header_value("x-csrf-token"), Some("t0k3n"));
    }

    #[tokio::test]
    async fn test_sign_non_200_is_rejected() {
        let transport = Arc::new(RecordingTransport {
            status: StatusCode::FORBIDDEN,
            body: "denied",
            seen: Mutex::new(Vec::new()),
        });
        let err = signer(transport).sign(Method::POST, "?uploads", "").await.unwrap_err();
        match err {
            SignError::Rejected(response) => {
                assert_eq!(response.status, StatusCode::FORBIDDEN);
                assert_eq!(response.body_text(), "denied");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
