//! Request, response and multipart types shared by the signer and the uploader

use bytes::Bytes;
use hyper::header::HeaderMap;
use hyper::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fmt::Write as FmtWrite;

/// Content type of the CompleteMultipartUpload request body
pub const COMPLETE_CONTENT_TYPE: &str = "application/xml; charset=UTF-8";

/// The exact request description whose signature authorizes one storage call.
///
/// Built once per request and consumed by the signer; never stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalRequest {
    pub method: Method,
    pub content_type: String,
    /// RFC 1123 date, also sent as `x-amz-date`
    pub date: String,
    /// `/<bucket>/<encoded key>`
    pub resource_path: String,
    /// Sub-resource suffix such as `?uploads`
    pub query_to_sign: String,
}

impl CanonicalRequest {
    /// Render the string-to-sign:
    /// `METHOD\n\n<content type>\n\nx-amz-date:<date>\n<resource><query>`
    pub fn string_to_sign(&self) -> String {
        let mut s = String::with_capacity(
            self.method.as_str().len()
                + self.content_type.len()
                + self.date.len()
                + self.resource_path.len()
                + self.query_to_sign.len()
                + 24,
        );
        s.push_str(self.method.as_str());
        s.push_str("\n\n");
        s.push_str(&self.content_type);
        s.push_str("\n\nx-amz-date:");
        s.push_str(&self.date);
        s.push('\n');
        s.push_str(&self.resource_path);
        s.push_str(&self.query_to_sign);
        s
    }
}

impl fmt::Display for CanonicalRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.string_to_sign())
    }
}

/// Signature handed back by the signing service, paired with the date it covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedRequest {
    pub signature: String,
    /// Must be sent verbatim as `x-amz-date`
    pub date: String,
}

impl SignedRequest {
    pub fn new(signature: String, date: String) -> Self {
        Self { signature, date }
    }

    /// `Authorization` header value for the given access key id
    pub fn authorization(&self, access_key_id: &str) -> String {
        format!("AWS {}:{}", access_key_id, self.signature)
    }
}

/// One HTTP request issued through a [`Transport`](crate::s3::Transport)
#[derive(Debug, Clone)]
pub struct StorageRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl StorageRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: Bytes::new(),
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn body(mut self, body: Bytes) -> Self {
        self.body = body;
        self
    }

    /// Look up a header value (case-insensitive)
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// A response of any status code; only connection failures are errors.
#[derive(Debug, Clone)]
pub struct StorageResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl StorageResponse {
    pub fn new(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == StatusCode::OK
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Part information for CompleteMultipartUpload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedPart {
    /// Part number (1-based)
    pub part_number: u32,
    /// ETag exactly as returned in the UploadPart response header
    pub etag: String,
}

impl CompletedPart {
    pub fn new(part_number: u32, etag: String) -> Self {
        Self { part_number, etag }
    }
}

/// Build the CompleteMultipartUpload document.
///
/// Parts are written in the order given; callers pass them in append order.
pub fn completion_document(parts: &[CompletedPart]) -> String {
    let mut xml = String::with_capacity(parts.len() * 96 + 64);
    xml.push_str("<CompleteMultipartUpload>");
    for part in parts {
        xml.push_str("<Part><PartNumber>");
        let _ = write!(xml, "{}", part.part_number);
        xml.push_str("</PartNumber><ETag>");
        xml_escape_text_into(&mut xml, &part.etag);
        xml.push_str("</ETag></Part>");
    }
    xml.push_str("</CompleteMultipartUpload>");
    xml
}

/// Escape XML text content. Quotes are left alone so quoted ETags pass through.
fn xml_escape_text_into(buf: &mut String, s: &str) {
    for ch in s.chars() {
        match ch {
            '&' => buf.push_str("&amp;"),
            '<' => buf.push_str("&lt;"),
            '>' => buf.push_str("&gt;"),
            _ => buf.push(ch),
        }
    }
}
