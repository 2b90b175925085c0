use anyhow::{Context, Result};
use hyper::Uri;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Default part size: 6 MiB
pub const DEFAULT_PART_SIZE: u64 = 6 * 1024 * 1024;

/// Invalid or incomplete upload configuration
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missed keys in config: {}", .0.join(", "))]
    MissingKeys(Vec<&'static str>),

    #[error("Invalid URL for {key}: {value}")]
    InvalidUrl { key: &'static str, value: String },

    #[error("part_size_bytes must be greater than zero")]
    ZeroPartSize,

    #[error("{parts} parts of {part_size} bytes exceed the part number range")]
    TooManyParts { parts: u64, part_size: u64 },

    #[error("No source file given")]
    MissingSource,
}

/// Upload settings as read from a file, the environment or the command line.
///
/// Every field is optional here; [`UploadSettings::validate`] checks the
/// mandatory ones and produces an [`UploadConfig`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadSettings {
    /// Base URL of the bucket endpoint, e.g. `https://mybucket.s3.amazonaws.com/`
    pub storage_endpoint_url: Option<String>,

    /// Destination object name. Percent-encoded with `/` kept as-is, in both
    /// the request URL and the string the signing service signs.
    pub object_key: Option<String>,

    /// Signing service URL
    pub auth_endpoint_url: Option<String>,

    /// Bucket name used in the canonical string
    pub bucket_name: Option<String>,

    /// Public credential id sent in the Authorization header
    pub access_key_id: Option<String>,

    /// Extra headers sent to the signing service (may be empty, but must be present)
    pub auth_endpoint_headers: Option<BTreeMap<String, String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub part_size_bytes: Option<u64>,

    /// Accepted for compatibility; parts are always uploaded one at a time
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_concurrent_parts: Option<usize>,

    /// Pause between steps in milliseconds (0 = just yield to the runtime)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step_delay_ms: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_timeout_secs: Option<u64>,
}

impl UploadSettings {
    /// Fill every unset field from `fallback`
    pub fn or(self, fallback: UploadSettings) -> Self {
        Self {
            storage_endpoint_url: self.storage_endpoint_url.or(fallback.storage_endpoint_url),
            object_key: self.object_key.or(fallback.object_key),
            auth_endpoint_url: self.auth_endpoint_url.or(fallback.auth_endpoint_url),
            bucket_name: self.bucket_name.or(fallback.bucket_name),
            access_key_id: self.access_key_id.or(fallback.access_key_id),
            auth_endpoint_headers: self.auth_endpoint_headers.or(fallback.auth_endpoint_headers),
            part_size_bytes: self.part_size_bytes.or(fallback.part_size_bytes),
            max_concurrent_parts: self.max_concurrent_parts.or(fallback.max_concurrent_parts),
            step_delay_ms: self.step_delay_ms.or(fallback.step_delay_ms),
            request_timeout_secs: self.request_timeout_secs.or(fallback.request_timeout_secs),
        }
    }

    /// Check mandatory keys and values, reporting every missing key at once
    pub fn validate(self) -> std::result::Result<UploadConfig, ConfigError> {
        let mut missing = Vec::new();
        macro_rules! require {
            ($field:ident) => {
                match self.$field {
                    Some(value) => value,
                    None => {
                        missing.push(stringify!($field));
                        Default::default()
                    }
                }
            };
        }

        let storage_endpoint_url: String = require!(storage_endpoint_url);
        let object_key: String = require!(object_key);
        let auth_endpoint_url: String = require!(auth_endpoint_url);
        let bucket_name: String = require!(bucket_name);
        let access_key_id: String = require!(access_key_id);
        let auth_endpoint_headers: BTreeMap<String, String> = require!(auth_endpoint_headers);

        if !missing.is_empty() {
            return Err(ConfigError::MissingKeys(missing));
        }

        check_url("storage_endpoint_url", &storage_endpoint_url)?;
        check_url("auth_endpoint_url", &auth_endpoint_url)?;

        let part_size_bytes = self.part_size_bytes.unwrap_or(DEFAULT_PART_SIZE);
        if part_size_bytes == 0 {
            return Err(ConfigError::ZeroPartSize);
        }

        Ok(UploadConfig {
            storage_endpoint_url,
            object_key,
            auth_endpoint_url,
            bucket_name,
            access_key_id,
            auth_endpoint_headers,
            part_size_bytes,
            max_concurrent_parts: self.max_concurrent_parts.unwrap_or(1).max(1),
            step_delay: Duration::from_millis(self.step_delay_ms.unwrap_or(0)),
            request_timeout: Duration::from_secs(self.request_timeout_secs.unwrap_or(300)),
        })
    }
}

fn check_url(key: &'static str, value: &str) -> std::result::Result<(), ConfigError> {
    let invalid = || ConfigError::InvalidUrl {
        key,
        value: value.to_string(),
    };
    let uri: Uri = value.parse().map_err(|_| invalid())?;
    match (uri.scheme_str(), uri.authority()) {
        (Some("http") | Some("https"), Some(_)) => Ok(()),
        _ => Err(invalid()),
    }
}

/// Validated configuration, immutable for the lifetime of an upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadConfig {
    pub storage_endpoint_url: String,
    pub object_key: String,
    pub auth_endpoint_url: String,
    pub bucket_name: String,
    pub access_key_id: String,
    pub auth_endpoint_headers: BTreeMap<String, String>,
    pub part_size_bytes: u64,
    pub max_concurrent_parts: usize,
    pub step_delay: Duration,
    pub request_timeout: Duration,
}

/// Load upload settings from a YAML file
pub fn load_from_yaml<P: AsRef<Path>>(path: P) -> Result<UploadSettings> {
    let content = std::fs::read_to_string(path.as_ref())
        .context(format!("Failed to read config file: {:?}", path.as_ref()))?;

    let settings: UploadSettings =
        serde_yaml::from_str(&content).context("Failed to parse YAML configuration")?;

    Ok(settings)
}

/// Load upload settings from environment variables
///
/// - S3CHUNK_STORAGE_ENDPOINT_URL
/// - S3CHUNK_OBJECT_KEY
/// - S3CHUNK_AUTH_ENDPOINT_URL
/// - S3CHUNK_BUCKET_NAME
/// - S3CHUNK_ACCESS_KEY_ID / AWS_ACCESS_KEY_ID
/// - S3CHUNK_AUTH_ENDPOINT_HEADERS (`name=value,name=value`)
/// - S3CHUNK_PART_SIZE_BYTES, S3CHUNK_MAX_CONCURRENT_PARTS,
///   S3CHUNK_STEP_DELAY_MS, S3CHUNK_REQUEST_TIMEOUT_SECS (optional)
///
/// Unset variables stay unset; validation reports them later.
pub fn load_from_env() -> Result<UploadSettings> {
    // Try to load .env file if it exists (don't fail if it doesn't)
    let _ = dotenvy::dotenv();

    let var = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());
    let number = |name: &str| -> Result<Option<u64>> {
        var(name)
            .map(|v| v.parse::<u64>().context(format!("{} is not a number: {}", name, v)))
            .transpose()
    };

    let auth_endpoint_headers = match std::env::var("S3CHUNK_AUTH_ENDPOINT_HEADERS") {
        Ok(raw) => Some(parse_header_list(&raw)?),
        Err(_) => None,
    };

    Ok(UploadSettings {
        storage_endpoint_url: var("S3CHUNK_STORAGE_ENDPOINT_URL"),
        object_key: var("S3CHUNK_OBJECT_KEY"),
        auth_endpoint_url: var("S3CHUNK_AUTH_ENDPOINT_URL"),
        bucket_name: var("S3CHUNK_BUCKET_NAME"),
        access_key_id: var("S3CHUNK_ACCESS_KEY_ID").or_else(|| var("AWS_ACCESS_KEY_ID")),
        auth_endpoint_headers,
        part_size_bytes: number("S3CHUNK_PART_SIZE_BYTES")?,
        max_concurrent_parts: number("S3CHUNK_MAX_CONCURRENT_PARTS")?.map(|v| v as usize),
        step_delay_ms: number("S3CHUNK_STEP_DELAY_MS")?,
        request_timeout_secs: number("S3CHUNK_REQUEST_TIMEOUT_SECS")?,
    })
}

/// Parse `name=value,name=value`; an empty string is an empty header set
pub fn parse_header_list(raw: &str) -> Result<BTreeMap<String, String>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|pair| {
            let (name, value) = pair
                .split_once('=')
                .with_context(|| format!("Header must be name=value: {}", pair))?;
            Ok((name.trim().to_string(), value.trim().to_string()))
        })
        .collect()
}

/// Load settings from the environment, overlaid by a YAML file when one is given.
///
/// Priority: config file > environment variables.
pub fn load_settings(config_path: Option<&str>) -> Result<UploadSettings> {
    let env = load_from_env()?;
    match config_path {
        Some(path) => Ok(load_from_yaml(path)?.or(env)),
        None => Ok(env),
    }
}
