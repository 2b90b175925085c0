//! Multipart upload state machine
//!
//! `Created -> Initiating -> UploadingPart(n) -> Completing -> Done`, with
//! `Failed` reachable from every non-terminal state.
//!
//! Every storage request is preceded by a signing request for exactly that
//! request. Only one network operation is in flight at a time. [`run`] drives
//! the steps from a flat loop with a yield point between steps, so the stack
//! depth does not grow with the number of parts.
//!
//! [`run`]: MultipartUploader::run

use crate::config::{ConfigError, UploadConfig, UploadSettings};
use crate::s3::url::{encode_object_key, join_url, url_encode_into};
use crate::s3::{
    completion_document, AuthServiceSigner, CompletedPart, HyperTransport, ProgressFn,
    RequestSigner, SignedRequest, StorageRequest, Transport, COMPLETE_CONTENT_TYPE,
};
use crate::upload::error::{Step, UploadError};
use crate::upload::listener::{notify_failure, NoopListener, UploadListener};
use crate::upload::source::PartSource;
use bytes::Bytes;
use hyper::Method;
use quick_xml::events::Event;
use quick_xml::Reader;
use serde::Serialize;
use std::fmt;
use std::fmt::Write as FmtWrite;
use std::ops::Range;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Coordinator state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadState {
    Created,
    Initiating,
    /// Uploading the given 1-based part number
    UploadingPart(u32),
    Completing,
    Done,
    Failed,
}

impl fmt::Display for UploadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UploadState::Created => f.write_str("created"),
            UploadState::Initiating => f.write_str("initiating"),
            UploadState::UploadingPart(n) => write!(f, "uploading part {}", n),
            UploadState::Completing => f.write_str("completing"),
            UploadState::Done => f.write_str("done"),
            UploadState::Failed => f.write_str("failed"),
        }
    }
}

/// Number of parts for `total_size` bytes: `max(1, ceil(total_size / part_size))`
pub fn part_count(total_size: u64, part_size: u64) -> u64 {
    total_size.div_ceil(part_size).max(1)
}

/// Byte range of 1-based `part_number`, clamped to `total_size`
pub fn part_range(part_number: u32, part_size: u64, total_size: u64) -> Range<u64> {
    let start = (u64::from(part_number) - 1)
        .saturating_mul(part_size)
        .min(total_size);
    let end = start.saturating_add(part_size).min(total_size);
    start..end
}

/// Mutable progress of one upload
#[derive(Debug, Clone)]
pub struct UploadSession {
    total_size: u64,
    part_size: u64,
    total_parts: u32,
    upload_id: Option<String>,
    current_part: u32,
    uploaded_parts: Vec<CompletedPart>,
    bytes_transferred: u64,
}

impl UploadSession {
    pub fn new(total_size: u64, part_size: u64) -> Result<Self, ConfigError> {
        if part_size == 0 {
            return Err(ConfigError::ZeroPartSize);
        }
        let parts = part_count(total_size, part_size);
        let total_parts = u32::try_from(parts)
            .map_err(|_| ConfigError::TooManyParts { parts, part_size })?;

        Ok(Self {
            total_size,
            part_size,
            total_parts,
            upload_id: None,
            current_part: 1,
            uploaded_parts: Vec::with_capacity(total_parts.min(10_000) as usize),
            bytes_transferred: 0,
        })
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    pub fn part_size(&self) -> u64 {
        self.part_size
    }

    pub fn total_parts(&self) -> u32 {
        self.total_parts
    }

    pub fn upload_id(&self) -> Option<&str> {
        self.upload_id.as_deref()
    }

    /// Next part to upload (1-based)
    pub fn current_part(&self) -> u32 {
        self.current_part
    }

    /// Uploaded parts in the order they finished
    pub fn uploaded_parts(&self) -> &[CompletedPart] {
        &self.uploaded_parts
    }

    pub fn bytes_transferred(&self) -> u64 {
        self.bytes_transferred
    }

    pub fn part_range(&self, part_number: u32) -> Range<u64> {
        part_range(part_number, self.part_size, self.total_size)
    }

    /// All parts are recorded; the only precondition for completing
    pub fn is_complete(&self) -> bool {
        self.uploaded_parts.len() == self.total_parts as usize
    }
}

/// Result of a finished upload
#[derive(Debug, Clone, Serialize)]
pub struct UploadReport {
    pub upload_id: String,
    pub object_key: String,
    pub total_bytes: u64,
    pub parts: Vec<CompletedPart>,
}

/// Drives one multipart upload of one source
pub struct MultipartUploader {
    config: Arc<UploadConfig>,
    /// Percent-encoded object key
    encoded_key: String,
    source: Arc<dyn PartSource>,
    signer: Arc<dyn RequestSigner>,
    transport: Arc<dyn Transport>,
    listener: Arc<dyn UploadListener>,
    session: UploadSession,
    state: UploadState,
}

impl MultipartUploader {
    pub fn builder() -> UploaderBuilder {
        UploaderBuilder::default()
    }

    /// Create an uploader in the `Created` state.
    ///
    /// Fails with `UnsupportedEnvironment` if the source cannot be read by
    /// range, or `Configuration` if the part layout is invalid. Both fire
    /// `on_unsupported_environment` first.
    pub fn new(
        config: UploadConfig,
        source: Arc<dyn PartSource>,
        signer: Arc<dyn RequestSigner>,
        transport: Arc<dyn Transport>,
        listener: Arc<dyn UploadListener>,
    ) -> Result<Self, UploadError> {
        if !source.is_sliceable() {
            let err = UploadError::UnsupportedEnvironment(
                "source does not support byte-range reads".to_string(),
            );
            notify_failure(listener.as_ref(), &err);
            return Err(err);
        }

        if config.max_concurrent_parts > 1 {
            warn!(
                max_concurrent_parts = config.max_concurrent_parts,
                "Parallel part uploads are not supported, uploading one part at a time"
            );
        }

        let session = UploadSession::new(source.len(), config.part_size_bytes).map_err(|e| {
            let err = UploadError::from(e);
            notify_failure(listener.as_ref(), &err);
            err
        })?;
        info!(
            key = %config.object_key,
            total_size = session.total_size,
            total_parts = session.total_parts,
            "Prepared multipart upload"
        );

        Ok(Self {
            encoded_key: encode_object_key(&config.object_key).into_owned(),
            config: Arc::new(config),
            source,
            signer,
            transport,
            listener,
            session,
            state: UploadState::Created,
        })
    }

    pub fn state(&self) -> UploadState {
        self.state
    }

    pub fn session(&self) -> &UploadSession {
        &self.session
    }

    pub fn config(&self) -> &UploadConfig {
        &self.config
    }

    /// Run the whole upload: initiate, every part, complete.
    ///
    /// Failures fire their hook once and are returned.
    pub async fn run(&mut self) -> Result<UploadReport, UploadError> {
        loop {
            match self.state {
                UploadState::Created => self.initiate().await?,
                UploadState::UploadingPart(_) | UploadState::Completing => {
                    self.upload_next_part().await?
                }
                UploadState::Done => return Ok(self.report()),
                UploadState::Initiating | UploadState::Failed => {
                    return Err(self.invalid_state("run"));
                }
            }
            self.pause().await;
        }
    }

    /// Start the multipart upload and obtain the upload id
    pub async fn initiate(&mut self) -> Result<(), UploadError> {
        if self.state != UploadState::Created {
            return Err(self.invalid_state("initiate"));
        }
        let result = self.try_initiate().await;
        self.settle(result)
    }

    /// Upload the next part, or complete the upload once every part is recorded
    pub async fn upload_next_part(&mut self) -> Result<(), UploadError> {
        if !matches!(
            self.state,
            UploadState::UploadingPart(_) | UploadState::Completing
        ) {
            return Err(self.invalid_state("upload a part"));
        }
        let result = if self.session.is_complete() {
            self.try_complete().await
        } else {
            self.try_upload_part().await
        };
        self.settle(result)
    }

    /// Send the completion document. Requires every part to be uploaded.
    pub async fn complete(&mut self) -> Result<(), UploadError> {
        let ready = matches!(
            self.state,
            UploadState::UploadingPart(_) | UploadState::Completing
        ) && self.session.is_complete();
        if !ready {
            return Err(self.invalid_state("complete"));
        }
        let result = self.try_complete().await;
        self.settle(result)
    }

    async fn try_initiate(&mut self) -> Result<(), UploadError> {
        self.state = UploadState::Initiating;
        let step = Step::Initiate;

        let signed = self.sign(step, Method::POST, "?uploads", "").await?;
        let request = self.storage_request(Method::POST, "?uploads", &signed);
        let response = self
            .transport
            .send(request, None)
            .await
            .map_err(|e| UploadError::network(step, e))?;

        if !response.is_ok() {
            return Err(UploadError::initiate(&response));
        }

        let upload_id = parse_upload_id(&response.body).ok_or_else(|| {
            UploadError::MissingUploadId {
                body: response.body_text(),
            }
        })?;

        info!(upload_id = %upload_id, "Got UploadId");
        self.session.upload_id = Some(upload_id.clone());
        self.session.current_part = 1;
        self.state = UploadState::UploadingPart(1);
        self.listener.on_upload_id_obtained(&upload_id);
        Ok(())
    }

    async fn try_upload_part(&mut self) -> Result<(), UploadError> {
        let part_number = self.session.current_part;
        let step = Step::UploadPart(part_number);
        self.state = UploadState::UploadingPart(part_number);
        let upload_id = self.require_upload_id()?;

        let range = self.session.part_range(part_number);
        let data = self
            .source
            .read_range(range.clone())
            .await
            .map_err(|source| UploadError::Source {
                part_number,
                source,
            })?;
        let part_len = data.len() as u64;

        let mut suffix_to_sign = String::with_capacity(upload_id.len() + 32);
        let _ = write!(
            suffix_to_sign,
            "?partNumber={}&uploadId={}",
            part_number, upload_id
        );
        let mut query = String::with_capacity(upload_id.len() + 32);
        let _ = write!(query, "?partNumber={}&uploadId=", part_number);
        url_encode_into(&mut query, &upload_id);

        let signed = self.sign(step, Method::PUT, &suffix_to_sign, "").await?;
        let request = self.storage_request(Method::PUT, &query, &signed).body(data);

        debug!(
            part_number,
            start = range.start,
            end = range.end,
            "Uploading part"
        );
        let response = self
            .transport
            .send(request, Some(self.in_flight_progress()))
            .await
            .map_err(|e| UploadError::network(step, e))?;

        if !response.is_ok() {
            return Err(UploadError::part_upload(part_number, &response));
        }

        let etag = response
            .header("etag")
            .map(str::to_string)
            .ok_or_else(|| UploadError::PartUpload {
                part_number,
                status: response.status,
                message: "response has no ETag header".to_string(),
            })?;

        debug!(part_number, etag = %etag, "Part uploaded");
        self.session
            .uploaded_parts
            .push(CompletedPart::new(part_number, etag.clone()));
        self.session.bytes_transferred += part_len;
        self.listener
            .on_progress(self.session.total_size, self.session.bytes_transferred);
        self.listener.on_part_uploaded(&etag, part_number);

        self.session.current_part += 1;
        self.state = if self.session.is_complete() {
            UploadState::Completing
        } else {
            UploadState::UploadingPart(self.session.current_part)
        };
        Ok(())
    }

    async fn try_complete(&mut self) -> Result<(), UploadError> {
        self.state = UploadState::Completing;
        let step = Step::Complete;
        let upload_id = self.require_upload_id()?;

        let suffix_to_sign = format!("?uploadId={}", upload_id);
        let mut query = String::with_capacity(upload_id.len() + 16);
        query.push_str("?uploadId=");
        url_encode_into(&mut query, &upload_id);

        let signed = self
            .sign(step, Method::POST, &suffix_to_sign, COMPLETE_CONTENT_TYPE)
            .await?;

        // Append order; parts are uploaded strictly in sequence
        let document = completion_document(&self.session.uploaded_parts);
        info!(parts = self.session.uploaded_parts.len(), "Completing multipart upload");

        let request = self
            .storage_request(Method::POST, &query, &signed)
            .header("Content-Type", COMPLETE_CONTENT_TYPE)
            .body(Bytes::from(document));
        let response = self
            .transport
            .send(request, None)
            .await
            .map_err(|e| UploadError::network(step, e))?;

        if !response.is_ok() {
            return Err(UploadError::complete(&response));
        }

        info!(key = %self.config.object_key, "Multipart upload complete");
        self.state = UploadState::Done;
        self.listener.on_multipart_upload_complete();
        Ok(())
    }

    async fn sign(
        &self,
        step: Step,
        method: Method,
        suffix_to_sign: &str,
        content_type: &str,
    ) -> Result<SignedRequest, UploadError> {
        self.signer
            .sign(method, suffix_to_sign, content_type)
            .await
            .map_err(|e| UploadError::from_sign(step, e))
    }

    fn storage_request(&self, method: Method, query: &str, signed: &SignedRequest) -> StorageRequest {
        let mut path = String::with_capacity(self.encoded_key.len() + query.len());
        path.push_str(&self.encoded_key);
        path.push_str(query);

        StorageRequest::new(method, join_url(&self.config.storage_endpoint_url, &path))
            .header("Authorization", signed.authorization(&self.config.access_key_id))
            .header("x-amz-date", signed.date.as_str())
    }

    /// Progress callback for the part in flight
    fn in_flight_progress(&self) -> ProgressFn {
        let listener = self.listener.clone();
        let total = self.session.total_size;
        let base = self.session.bytes_transferred;
        Arc::new(move |sent| listener.on_progress(total, base + sent))
    }

    fn require_upload_id(&self) -> Result<String, UploadError> {
        match self.session.upload_id.as_deref() {
            Some(id) if !id.is_empty() => Ok(id.to_string()),
            _ => Err(self.invalid_state("send a request without an UploadId")),
        }
    }

    fn invalid_state(&self, operation: &'static str) -> UploadError {
        UploadError::InvalidState {
            operation,
            state: self.state.to_string(),
        }
    }

    /// Terminal failures move to `Failed` and fire exactly one hook
    fn settle(&mut self, result: Result<(), UploadError>) -> Result<(), UploadError> {
        if let Err(err) = &result {
            if !matches!(err, UploadError::InvalidState { .. }) {
                warn!(state = %self.state, error = %err, "Upload failed");
                self.state = UploadState::Failed;
                notify_failure(self.listener.as_ref(), err);
            }
        }
        result
    }

    async fn pause(&self) {
        if self.config.step_delay.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(self.config.step_delay).await;
        }
    }

    fn report(&self) -> UploadReport {
        UploadReport {
            upload_id: self.session.upload_id.clone().unwrap_or_default(),
            object_key: self.config.object_key.clone(),
            total_bytes: self.session.total_size,
            parts: self.session.uploaded_parts.clone(),
        }
    }
}

/// Extract `<UploadId>` from an InitiateMultipartUploadResult body.
/// Returns `None` when absent, empty, or the body is not XML.
pub fn parse_upload_id(xml_data: &[u8]) -> Option<String> {
    let mut reader = Reader::from_reader(xml_data);
    reader.config_mut().trim_text_start = true;
    reader.config_mut().trim_text_end = true;

    let mut current_text = String::with_capacity(128);

    loop {
        match reader.read_event() {
            Ok(Event::Start(_)) => current_text.clear(),
            Ok(Event::Text(e)) => {
                current_text.clear();
                current_text.push_str(&e.unescape().ok()?);
            }
            Ok(Event::End(e)) => {
                if e.local_name().as_ref() == b"UploadId" {
                    let upload_id = std::mem::take(&mut current_text);
                    return (!upload_id.is_empty()).then_some(upload_id);
                }
                current_text.clear();
            }
            Ok(Event::Eof) => return None,
            Err(e) => {
                debug!(error = %e, "Initiate response is not valid XML");
                return None;
            }
            _ => {}
        }
    }
}

/// Builds a [`MultipartUploader`] from settings, filling in the default
/// transport, signer and listener.
#[derive(Default)]
pub struct UploaderBuilder {
    settings: UploadSettings,
    source: Option<Arc<dyn PartSource>>,
    signer: Option<Arc<dyn RequestSigner>>,
    transport: Option<Arc<dyn Transport>>,
    listener: Option<Arc<dyn UploadListener>>,
}

impl UploaderBuilder {
    pub fn settings(mut self, settings: UploadSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn source(mut self, source: Arc<dyn PartSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Defaults to [`AuthServiceSigner`] over the transport
    pub fn signer(mut self, signer: Arc<dyn RequestSigner>) -> Self {
        self.signer = Some(signer);
        self
    }

    /// Defaults to [`HyperTransport`] with the configured timeout
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn listener(mut self, listener: Arc<dyn UploadListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Validate everything and create the uploader. No network calls are made.
    ///
    /// Every setup failure fires `on_unsupported_environment` once.
    pub fn build(self) -> Result<MultipartUploader, UploadError> {
        let listener = self
            .listener
            .unwrap_or_else(|| Arc::new(NoopListener) as Arc<dyn UploadListener>);
        let rejected = |err: UploadError| {
            notify_failure(listener.as_ref(), &err);
            err
        };

        let config = self
            .settings
            .validate()
            .map_err(|e| rejected(e.into()))?;
        let source = self
            .source
            .ok_or_else(|| rejected(ConfigError::MissingSource.into()))?;

        let transport = match self.transport {
            Some(transport) => transport,
            None => {
                let transport = HyperTransport::new()
                    .map_err(|e| rejected(UploadError::UnsupportedEnvironment(e.to_string())))?
                    .with_timeout(config.request_timeout);
                Arc::new(transport) as Arc<dyn Transport>
            }
        };
        let signer = self.signer.unwrap_or_else(|| {
            Arc::new(AuthServiceSigner::from_config(transport.clone(), &config))
                as Arc<dyn RequestSigner>
        });

        MultipartUploader::new(config, source, signer, transport, listener)
    }
}
