use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use crate::cli::args::OutputFormat;
use crate::config::{UploadSettings, DEFAULT_PART_SIZE};
use crate::upload::{
    part_count, part_range, FileSource, MultipartUploader, PartSource, UploadError,
    UploadListener, UploadReport,
};

/// Drives an indicatif progress bar from upload events
pub struct ProgressBarListener {
    pb: ProgressBar,
}

impl ProgressBarListener {
    pub fn new(total: u64, name: &str) -> Result<Self> {
        let pb = ProgressBar::new(total);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("[{elapsed_precise}] {bar:40.cyan/blue} {bytes}/{total_bytes} {msg}")?
                .progress_chars("=>-"),
        );
        pb.set_message(format!("Uploading {}", name));
        Ok(Self { pb })
    }

    pub fn hidden() -> Self {
        Self {
            pb: ProgressBar::hidden(),
        }
    }
}

impl UploadListener for ProgressBarListener {
    fn on_upload_id_obtained(&self, _upload_id: &str) {
        self.pb.set_position(0);
    }

    fn on_part_uploaded(&self, _etag: &str, part_number: u32) {
        self.pb.set_message(format!("part {} done", part_number));
    }

    fn on_multipart_upload_complete(&self) {
        self.pb.finish_with_message("complete");
    }

    fn on_progress(&self, total_bytes: u64, loaded_bytes: u64) {
        self.pb.set_length(total_bytes);
        self.pb.set_position(loaded_bytes);
    }

    fn on_unsupported_environment(&self, error: &UploadError) {
        self.pb.abandon_with_message(error.to_string());
    }

    fn on_network_error(&self, error: &UploadError) {
        self.pb.abandon_with_message(error.to_string());
    }

    fn on_non_success_response(&self, error: &UploadError) {
        self.pb.abandon_with_message(error.to_string());
    }

    fn on_source_error(&self, error: &UploadError) {
        self.pb.abandon_with_message(error.to_string());
    }
}

/// One row of `s3chunk plan`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedPart {
    pub part_number: u32,
    pub start: u64,
    pub end: u64,
    pub size: u64,
}

/// S3 accepts at most this many parts per multipart upload
pub const MAX_PARTS: u64 = 10_000;

/// Split `total_size` bytes into parts. Layouts beyond [`MAX_PARTS`] are rejected.
pub fn plan_parts(total_size: u64, part_size: u64) -> Result<Vec<PlannedPart>> {
    if part_size == 0 {
        anyhow::bail!("part size must be greater than zero");
    }
    let parts = part_count(total_size, part_size);
    if parts > MAX_PARTS {
        anyhow::bail!(
            "{} parts exceed the limit of {} parts, use a larger --part-size",
            parts,
            MAX_PARTS
        );
    }
    let parts = parts as u32;

    Ok((1..=parts)
        .map(|part_number| {
            let range = part_range(part_number, part_size, total_size);
            PlannedPart {
                part_number,
                start: range.start,
                end: range.end,
                size: range.end - range.start,
            }
        })
        .collect())
}

pub async fn execute_plan(
    file: &Path,
    part_size: Option<u64>,
    base: UploadSettings,
    format: OutputFormat,
) -> Result<()> {
    let source = FileSource::open(file)
        .await
        .context(format!("Failed to open {:?}", file))?;
    if !source.is_sliceable() {
        anyhow::bail!("{:?} is not a regular file", file);
    }

    let part_size = part_size
        .or(base.part_size_bytes)
        .unwrap_or(DEFAULT_PART_SIZE);
    let parts = plan_parts(source.len(), part_size)?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&parts)?),
        OutputFormat::Text => {
            println!(
                "{} bytes, {} part(s) of up to {} bytes",
                source.len(),
                parts.len(),
                part_size
            );
            for part in &parts {
                println!(
                    "{:>6}  {:>14}..{:<14} {:>12}",
                    part.part_number, part.start, part.end, part.size
                );
            }
        }
    }
    Ok(())
}

pub async fn execute_upload(
    file: &Path,
    key: Option<String>,
    part_size: Option<u64>,
    show_progress: bool,
    base: UploadSettings,
    format: OutputFormat,
) -> Result<UploadReport> {
    let source = FileSource::open(file)
        .await
        .context(format!("Failed to open {:?}", file))?;

    let file_name = file
        .file_name()
        .unwrap_or_default()
        .to_string_lossy()
        .into_owned();

    // Key priority: --key > config > file name
    let overrides = UploadSettings {
        object_key: key,
        part_size_bytes: part_size,
        ..Default::default()
    };
    let mut settings = overrides.or(base);
    if settings.object_key.is_none() {
        settings.object_key = Some(file_name.clone());
    }

    let listener: Arc<dyn UploadListener> = if show_progress {
        Arc::new(ProgressBarListener::new(source.len(), &file_name)?)
    } else {
        Arc::new(ProgressBarListener::hidden())
    };

    let mut uploader = MultipartUploader::builder()
        .settings(settings)
        .source(Arc::new(source))
        .listener(listener)
        .build()
        .context("Failed to prepare upload")?;

    info!(
        parts = uploader.session().total_parts(),
        key = %uploader.config().object_key,
        "Starting upload"
    );

    let report = uploader.run().await.context("Upload failed")?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Text => println!(
            "Uploaded {} ({} bytes, {} parts) as {}",
            file.display(),
            report.total_bytes,
            report.parts.len(),
            report.object_key
        ),
    }

    Ok(report)
}
