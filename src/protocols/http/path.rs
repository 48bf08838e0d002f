//! URI path decoding and containment.
//!
//! Every path a client names is resolved relative to the served root.
//! Sanitizing works on decoded text: empty and `.` segments are dropped,
//! while `..`, backslashes and NUL bytes are refused outright rather than
//! normalized, so nothing a client sends can climb out of the root.

use percent_encoding::percent_decode_str;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathError {
    /// Percent-decoding produced invalid UTF-8.
    Encoding,
    /// A `..` segment.
    Traversal,
    /// A segment holding `\` or NUL.
    InvalidSegment(String),
}

impl fmt::Display for PathError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathError::Encoding => write!(f, "path is not valid UTF-8"),
            PathError::Traversal => write!(f, "path escapes the served root"),
            PathError::InvalidSegment(s) => write!(f, "invalid path segment {:?}", s),
        }
    }
}

impl std::error::Error for PathError {}

/// Percent-decode a URI path.
pub fn decode(raw: &str) -> Result<String, PathError> {
    percent_decode_str(raw)
        .decode_utf8()
        .map(|s| s.into_owned())
        .map_err(|_| PathError::Encoding)
}

/// Decode a form-encoded query value, where `+` stands for a space.
pub fn decode_query_value(raw: &str) -> Result<String, PathError> {
    decode(&raw.replace('+', " "))
}

/// Raw value of `key` in a query string, first match wins.
pub fn query_param<'a>(query: &'a str, key: &str) -> Option<&'a str> {
    query.split('&').find_map(|pair| {
        let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
        (k == key).then_some(v)
    })
}

/// Normalize a decoded path into a root-relative form.
///
/// The result has no leading or trailing separator and is empty for the
/// root itself.
pub fn sanitize(decoded: &str) -> Result<String, PathError> {
    let mut segments = Vec::new();
    for segment in decoded.split('/') {
        match segment {
            "" | "." => continue,
            ".." => return Err(PathError::Traversal),
            s if s.contains('\\') || s.contains('\0') => {
                return Err(PathError::InvalidSegment(s.to_string()))
            }
            s => segments.push(s),
        }
    }
    Ok(segments.join("/"))
}
