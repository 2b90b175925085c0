//! HTTP transport for the signing service and the storage endpoint
//!
//! The [`Transport`] trait is the request/response boundary the signer and the
//! upload coordinator talk through. [`HyperTransport`] is the production
//! implementation:
//! - HTTP/1.1 only, tuned idle pool
//! - TCP_NODELAY, connect timeout and keepalive
//! - native-tls (OpenSSL) for TLS
//! - request bodies streamed in 64 KiB frames so upload progress can be observed

use crate::s3::types::{StorageRequest, StorageResponse};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full, StreamBody};
use hyper::body::Frame;
use hyper::header::CONTENT_LENGTH;
use hyper::{Method, Request};
use hyper_tls::HttpsConnector;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client as HyperClient;
use hyper_util::rt::TokioExecutor;
use native_tls::TlsConnector;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Frame size used when streaming request bodies
const FRAME_SIZE: usize = 64 * 1024;

/// Default request timeout
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

/// Receives the number of request body bytes handed to the connection so far.
pub type ProgressFn = Arc<dyn Fn(u64) + Send + Sync>;

type RequestBody = BoxBody<Bytes, Infallible>;

/// Failures that produced no HTTP response at all
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("TLS setup failed: {0}")]
    Tls(#[from] native_tls::Error),
}

impl From<hyper_util::client::legacy::Error> for TransportError {
    fn from(err: hyper_util::client::legacy::Error) -> Self {
        TransportError::Connection(err.to_string())
    }
}

impl From<hyper::Error> for TransportError {
    fn from(err: hyper::Error) -> Self {
        TransportError::Connection(err.to_string())
    }
}

impl From<hyper::http::Error> for TransportError {
    fn from(err: hyper::http::Error) -> Self {
        TransportError::InvalidRequest(err.to_string())
    }
}

/// Issues one request and resolves with whatever the server answered.
///
/// Any HTTP status is `Ok`; `Err` means no response was received.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(
        &self,
        request: StorageRequest,
        progress: Option<ProgressFn>,
    ) -> Result<StorageResponse, TransportError>;
}

/// Hyper-based transport
///
/// Clone is cheap - the underlying HTTP client uses Arc internally.
#[derive(Clone)]
pub struct HyperTransport {
    client: HyperClient<HttpsConnector<HttpConnector>, RequestBody>,
    timeout: Duration,
}

impl HyperTransport {
    /// Create a transport with the default timeout.
    ///
    /// Set `S3CHUNK_INSECURE_TLS=1` to skip certificate verification.
    pub fn new() -> Result<Self, TransportError> {
        let insecure_tls = std::env::var("S3CHUNK_INSECURE_TLS")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);

        let mut http = HttpConnector::new();
        http.set_nodelay(true);
        http.enforce_http(false);
        http.set_connect_timeout(Some(Duration::from_secs(10)));
        http.set_keepalive(Some(Duration::from_secs(90)));

        let tls = if insecure_tls {
            warn!("INSECURE TLS MODE ENABLED: Certificate verification is disabled!");
            TlsConnector::builder()
                .danger_accept_invalid_certs(true)
                .danger_accept_invalid_hostnames(true)
                .build()?
        } else {
            TlsConnector::new()?
        };

        let https = HttpsConnector::from((http, tls.into()));

        let client = HyperClient::builder(TokioExecutor::new())
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(16)
            .set_host(true)
            .build(https);

        Ok(Self {
            client,
            timeout: DEFAULT_REQUEST_TIMEOUT,
        })
    }

    /// Set request timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn execute(
        &self,
        request: Request<RequestBody>,
    ) -> Result<StorageResponse, TransportError> {
        let response = self.client.request(request).await?;
        let (parts, incoming) = response.into_parts();
        let body = incoming.collect().await?.to_bytes();

        Ok(StorageResponse {
            status: parts.status,
            headers: parts.headers,
            body,
        })
    }
}

#[async_trait]
impl Transport for HyperTransport {
    async fn send(
        &self,
        request: StorageRequest,
        progress: Option<ProgressFn>,
    ) -> Result<StorageResponse, TransportError> {
        let StorageRequest {
            method,
            url,
            headers,
            body,
        } = request;

        debug!(%method, %url, bytes = body.len(), "sending request");

        let mut builder = Request::builder().method(method.clone()).uri(&url);
        for (name, value) in &headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if method != Method::GET && method != Method::HEAD {
            builder = builder.header(CONTENT_LENGTH, body.len());
        }

        let body = match progress {
            Some(progress) if !body.is_empty() => streaming_body(body, progress),
            _ => Full::new(body).boxed(),
        };
        let request = builder.body(body)?;

        match tokio::time::timeout(self.timeout, self.execute(request)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(self.timeout)),
        }
    }
}

/// Split a body into frames, reporting the bytes already handed off before
/// each frame is yielded.
fn streaming_body(body: Bytes, progress: ProgressFn) -> RequestBody {
    let total = body.len();
    let frames: Vec<Bytes> = (0..total)
        .step_by(FRAME_SIZE)
        .map(|start| body.slice(start..(start + FRAME_SIZE).min(total)))
        .collect();

    let mut handed_off = 0u64;
    let frames = stream::iter(frames).map(move |frame| {
        progress(handed_off);
        handed_off += frame.len() as u64;
        Ok::<_, Infallible>(Frame::data(frame))
    });

    BodyExt::boxed(StreamBody::new(frames))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[tokio::test]
    async fn test_streaming_body_reports_before_each_frame() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let progress: ProgressFn = Arc::new(move |n| sink.lock().unwrap().push(n));

        let data = Bytes::from(vec![7u8; FRAME_SIZE * 2 + 10]);
        let collected = streaming_body(data.clone(), progress)
            .collect()
            .await
            .unwrap()
            .to_bytes();

        assert_eq!(collected, data);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![0, FRAME_SIZE as u64, 2 * FRAME_SIZE as u64]
        );
    }

    #[test]
    fn test_transport_is_clone() {
        let transport = HyperTransport::new().unwrap();
        let _clone = transport.clone().with_timeout(Duration::from_secs(5));
    }
}
