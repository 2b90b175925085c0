//! URL building helpers

use std::borrow::Cow;

/// Hex lookup table for percent encoding
static HEX_UPPER: &[u8; 16] = b"0123456789ABCDEF";

#[inline]
fn is_unreserved(byte: u8) -> bool {
    matches!(byte, b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~')
}

#[inline]
fn push_escaped(buf: &mut String, byte: u8) {
    buf.push('%');
    buf.push(HEX_UPPER[(byte >> 4) as usize] as char);
    buf.push(HEX_UPPER[(byte & 0xf) as usize] as char);
}

/// Encode an object key, preserving forward slashes.
/// Returns `Cow::Borrowed` when no encoding is needed.
pub fn encode_object_key(key: &str) -> Cow<'_, str> {
    if key.bytes().all(|b| is_unreserved(b) || b == b'/') {
        return Cow::Borrowed(key);
    }

    let mut result = String::with_capacity(key.len() + 32);
    for byte in key.bytes() {
        if is_unreserved(byte) || byte == b'/' {
            result.push(byte as char);
        } else {
            push_escaped(&mut result, byte);
        }
    }
    Cow::Owned(result)
}

/// Encode a query parameter value (RFC 3986) into an existing buffer
pub fn url_encode_into(buf: &mut String, s: &str) {
    for byte in s.bytes() {
        if is_unreserved(byte) {
            buf.push(byte as char);
        } else {
            push_escaped(buf, byte);
        }
    }
}

pub fn url_encode(s: &str) -> String {
    let mut buf = String::with_capacity(s.len() * 3 / 2 + 8);
    url_encode_into(&mut buf, s);
    buf
}

/// Join a base URL and a path with exactly one slash between them
pub fn join_url(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    let mut url = String::with_capacity(base.len() + 1 + path.len());
    url.push_str(base);
    url.push('/');
    url.push_str(path);
    url
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_object_key_no_encoding() {
        let result = encode_object_key("path/to/file.txt");
        assert!(matches!(result, Cow::Borrowed(_)));
        assert_eq!(result, "path/to/file.txt");
    }

    #[test]
    fn test_encode_object_key_with_encoding() {
        let result = encode_object_key("path/to/file with spaces.txt");
        assert!(matches!(result, Cow::Owned(_)));
        assert_eq!(result, "path/to/file%20with%20spaces.txt");
    }

    #[test]
    fn test_encode_object_key_keeps_slash_only() {
        // Slashes stay literal; sub-delimiters are escaped
        assert_eq!(
            encode_object_key("dir/it's (1)*!.txt"),
            "dir/it%27s%20%281%29%2A%21.txt"
        );
    }

    #[test]
    fn test_url_encode() {
        assert_eq!(url_encode("hello world"), "hello%20world");
        assert_eq!(url_encode("a/b"), "a%2Fb");
        assert_eq!(url_encode("PUT\n\n"), "PUT%0A%0A");
        assert_eq!(url_encode("x-amz-date:Tue, 01"), "x-amz-date%3ATue%2C%2001");
    }

    #[test]
    fn test_join_url_no_duplicate_slashes() {
        assert_eq!(
            join_url("https://bucket.s3.amazonaws.com/", "/ex.txt?uploads"),
            "https://bucket.s3.amazonaws.com/ex.txt?uploads"
        );
        assert_eq!(
            join_url("https://bucket.s3.amazonaws.com", "ex.txt"),
            "https://bucket.s3.amazonaws.com/ex.txt"
        );
        assert_eq!(
            join_url("http://my.com/auth_sign", "/?to_sign=abc"),
            "http://my.com/auth_sign/?to_sign=abc"
        );
    }
}
