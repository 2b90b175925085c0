//! Upload event hooks
//!
//! [`UploadListener`] has one method per event. The specific failure hooks
//! (`on_auth_error`, `on_initiate_error`, ...) fall back to
//! `on_non_success_response` by default, so overriding one suppresses the
//! generic fallback for that failure site only. Each failure reaches exactly
//! one hook.
//!
//! Hooks return `()`: they observe the upload and cannot abort it.

use crate::upload::error::UploadError;

/// Observer of one upload session
pub trait UploadListener: Send + Sync {
    fn on_upload_id_obtained(&self, _upload_id: &str) {}

    /// `etag` is the raw `ETag` response header of the part
    fn on_part_uploaded(&self, _etag: &str, _part_number: u32) {}

    fn on_multipart_upload_complete(&self) {}

    /// Fired after every uploaded part and while a part is in flight.
    /// `loaded_bytes` never decreases and reaches `total_bytes` after the last part.
    fn on_progress(&self, _total_bytes: u64, _loaded_bytes: u64) {}

    /// The uploader cannot be set up: the source cannot be read by byte
    /// range, or the configuration is incomplete or invalid
    fn on_unsupported_environment(&self, _error: &UploadError) {}

    /// No HTTP response was received
    fn on_network_error(&self, _error: &UploadError) {}

    /// Generic fallback for every non-success response without a specific override
    fn on_non_success_response(&self, _error: &UploadError) {}

    fn on_auth_error(&self, error: &UploadError) {
        self.on_non_success_response(error)
    }

    fn on_initiate_error(&self, error: &UploadError) {
        self.on_non_success_response(error)
    }

    /// Initiate returned 200 without a usable `UploadId`
    fn on_missing_upload_id_error(&self, error: &UploadError) {
        self.on_non_success_response(error)
    }

    fn on_part_upload_error(&self, error: &UploadError) {
        self.on_non_success_response(error)
    }

    fn on_complete_error(&self, error: &UploadError) {
        self.on_non_success_response(error)
    }

    /// Reading a part from the source failed
    fn on_source_error(&self, _error: &UploadError) {}
}

/// Ignores every event
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopListener;

impl UploadListener for NoopListener {}

/// Route a failure to its hook
pub fn notify_failure(listener: &dyn UploadListener, error: &UploadError) {
    match error {
        UploadError::UnsupportedEnvironment(_) | UploadError::Configuration(_) => {
            listener.on_unsupported_environment(error)
        }
        UploadError::Network { .. } => listener.on_network_error(error),
        UploadError::AuthSigning { .. } => listener.on_auth_error(error),
        UploadError::Initiate { .. } => listener.on_initiate_error(error),
        UploadError::MissingUploadId { .. } => listener.on_missing_upload_id_error(error),
        UploadError::PartUpload { .. } => listener.on_part_upload_error(error),
        UploadError::Complete { .. } => listener.on_complete_error(error),
        UploadError::Source { .. } => listener.on_source_error(error),
        // Returned to the caller only
        UploadError::InvalidState { .. } => {}
    }
}

type ErrorHook = Box<dyn Fn(&UploadError) + Send + Sync>;

/// Closure-based listener.
///
/// Unset hooks are ignored; an unset specific failure hook falls back to the
/// `non_success_response` closure.
///
/// ```ignore
/// let hooks = Hooks::new()
///     .progress(|total, loaded| println!("{loaded}/{total}"))
///     .part_upload_error(|err| eprintln!("part failed: {err}"));
/// ```
#[derive(Default)]
pub struct Hooks {
    upload_id_obtained: Option<Box<dyn Fn(&str) + Send + Sync>>,
    part_uploaded: Option<Box<dyn Fn(&str, u32) + Send + Sync>>,
    multipart_upload_complete: Option<Box<dyn Fn() + Send + Sync>>,
    progress: Option<Box<dyn Fn(u64, u64) + Send + Sync>>,
    unsupported_environment: Option<ErrorHook>,
    network_error: Option<ErrorHook>,
    non_success_response: Option<ErrorHook>,
    auth_error: Option<ErrorHook>,
    initiate_error: Option<ErrorHook>,
    missing_upload_id_error: Option<ErrorHook>,
    part_upload_error: Option<ErrorHook>,
    complete_error: Option<ErrorHook>,
    source_error: Option<ErrorHook>,
}

macro_rules! error_hook_setter {
    ($($(#[$doc:meta])* $name:ident),* $(,)?) => {
        $(
            $(#[$doc])*
            pub fn $name<F>(mut self, f: F) -> Self
            where
                F: Fn(&UploadError) + Send + Sync + 'static,
            {
                self.$name = Some(Box::new(f));
                self
            }
        )*
    };
}

impl Hooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upload_id_obtained<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.upload_id_obtained = Some(Box::new(f));
        self
    }

    pub fn part_uploaded<F>(mut self, f: F) -> Self
    where
        F: Fn(&str, u32) + Send + Sync + 'static,
    {
        self.part_uploaded = Some(Box::new(f));
        self
    }

    pub fn multipart_upload_complete<F>(mut self, f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.multipart_upload_complete = Some(Box::new(f));
        self
    }

    /// Receives `(total_bytes, loaded_bytes)`
    pub fn progress<F>(mut self, f: F) -> Self
    where
        F: Fn(u64, u64) + Send + Sync + 'static,
    {
        self.progress = Some(Box::new(f));
        self
    }

    error_hook_setter!(
        unsupported_environment,
        network_error,
        /// Generic fallback for non-success responses
        non_success_response,
        auth_error,
        initiate_error,
        missing_upload_id_error,
        part_upload_error,
        complete_error,
        source_error,
    );

    fn specific_or_fallback(&self, specific: &Option<ErrorHook>, error: &UploadError) {
        match specific {
            Some(hook) => hook(error),
            None => self.on_non_success_response(error),
        }
    }
}

impl UploadListener for Hooks {
    fn on_upload_id_obtained(&self, upload_id: &str) {
        if let Some(hook) = &self.upload_id_obtained {
            hook(upload_id);
        }
    }

    fn on_part_uploaded(&self, etag: &str, part_number: u32) {
        if let Some(hook) = &self.part_uploaded {
            hook(etag, part_number);
        }
    }

    fn on_multipart_upload_complete(&self) {
        if let Some(hook) = &self.multipart_upload_complete {
            hook();
        }
    }

    fn on_progress(&self, total_bytes: u64, loaded_bytes: u64) {
        if let Some(hook) = &self.progress {
            hook(total_bytes, loaded_bytes);
        }
    }

    fn on_unsupported_environment(&self, error: &UploadError) {
        if let Some(hook) = &self.unsupported_environment {
            hook(error);
        }
    }

    fn on_network_error(&self, error: &UploadError) {
        if let Some(hook) = &self.network_error {
            hook(error);
        }
    }

    fn on_non_success_response(&self, error: &UploadError) {
        if let Some(hook) = &self.non_success_response {
            hook(error);
        }
    }

    fn on_auth_error(&self, error: &UploadError) {
        self.specific_or_fallback(&self.auth_error, error)
    }

    fn on_initiate_error(&self, error: &UploadError) {
        self.specific_or_fallback(&self.initiate_error, error)
    }

    fn on_missing_upload_id_error(&self, error: &UploadError) {
        self.specific_or_fallback(&self.missing_upload_id_error, error)
    }

    fn on_part_upload_error(&self, error: &UploadError) {
        self.specific_or_fallback(&self.part_upload_error, error)
    }

    fn on_complete_error(&self, error: &UploadError) {
        self.specific_or_fallback(&self.complete_error, error)
    }

    fn on_source_error(&self, error: &UploadError) {
        if let Some(hook) = &self.source_error {
            hook(error);
        }
    }
}
