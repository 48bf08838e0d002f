//! Multipart boundary scanning.
//!
//! A body delimited by token `X` contains three marker shapes:
//!
//! ```text
//! first:  --X\r\n          (opens the first part)
//! middle: \r\n--X\r\n      (closes one part, opens the next)
//! last:   \r\n--X--\r\n    (closes the final part)
//! ```
//!
//! The scanner classifies a byte window against these markers. Windows are
//! network chunks plus whatever was carried over from the previous scan, so a
//! marker may be cut off at the end of the window; such a tail is reported as
//! a fragment and must be carried into the next scan instead of being
//! written out.

use std::fmt;

/// Longest boundary token allowed by RFC 2046.
pub const MAX_TOKEN_LEN: usize = 70;

/// Classification of a scanned window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundaryKind {
    /// No marker; the whole window is content.
    None,
    /// Window opens with the first marker.
    First,
    /// Terminal marker found.
    Last,
    /// A part separator found.
    Middle,
    /// The window ends with a prefix of the terminal marker.
    FragmentOfLast,
    /// The window ends with a prefix of a part separator.
    FragmentOfMiddle,
}

/// Scan result. `cut` is the offset into the window where content ends
/// (or, for `First`, where the part header block begins).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub kind: BoundaryKind,
    pub cut: usize,
}

impl Classification {
    fn new(kind: BoundaryKind, cut: usize) -> Self {
        Self { kind, cut }
    }
}

/// Rejected boundary tokens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BoundaryError {
    Empty,
    TooLong(usize),
    InvalidChar(char),
}

impl fmt::Display for BoundaryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BoundaryError::Empty => write!(f, "empty boundary"),
            BoundaryError::TooLong(len) => {
                write!(f, "boundary is {} bytes, limit is {}", len, MAX_TOKEN_LEN)
            }
            BoundaryError::InvalidChar(c) => write!(f, "invalid boundary character {:?}", c),
        }
    }
}

impl std::error::Error for BoundaryError {}

/// The three markers derived from a boundary token.
#[derive(Debug, Clone)]
pub struct Boundary {
    first: Vec<u8>,
    middle: Vec<u8>,
    last: Vec<u8>,
}

impl Boundary {
    /// Build markers for `token`, rejecting empty, over-long or
    /// control-character tokens.
    pub fn new(token: &str) -> Result<Self, BoundaryError> {
        if token.is_empty() {
            return Err(BoundaryError::Empty);
        }
        if token.len() > MAX_TOKEN_LEN {
            return Err(BoundaryError::TooLong(token.len()));
        }
        if let Some(c) = token.chars().find(|c| c.is_control()) {
            return Err(BoundaryError::InvalidChar(c));
        }

        let token = token.as_bytes();
        let first = [b"--".as_slice(), token, b"\r\n".as_slice()].concat();
        let middle = [b"\r\n--".as_slice(), token, b"\r\n".as_slice()].concat();
        let last = [b"\r\n--".as_slice(), token, b"--\r\n".as_slice()].concat();

        Ok(Self {
            first,
            middle,
            last,
        })
    }

    pub fn first(&self) -> &[u8] {
        &self.first
    }

    pub fn middle(&self) -> &[u8] {
        &self.middle
    }

    /// Classify a window that may open with the first marker.
    pub fn scan(&self, window: &[u8]) -> Classification {
        if window.starts_with(&self.first) {
            return Classification::new(BoundaryKind::First, self.first.len());
        }
        self.scan_body(window)
    }

    /// Classify a window inside a part body.
    ///
    /// Returns the earliest full `middle` or `last` marker; failing that,
    /// the earliest tail that is a proper prefix of `last` or `middle`.
    /// Every body marker starts with `\r`, so only those offsets are tried.
    pub fn scan_body(&self, window: &[u8]) -> Classification {
        let candidates = window
            .iter()
            .enumerate()
            .filter(|(_, b)| **b == b'\r')
            .map(|(i, _)| i);

        for i in candidates {
            let rest = &window[i..];
            if rest.starts_with(&self.middle) {
                return Classification::new(BoundaryKind::Middle, i);
            }
            if rest.starts_with(&self.last) {
                return Classification::new(BoundaryKind::Last, i);
            }
            if rest.len() < self.last.len() && self.last.starts_with(rest) {
                return Classification::new(BoundaryKind::FragmentOfLast, i);
            }
            if rest.len() < self.middle.len() && self.middle.starts_with(rest) {
                return Classification::new(BoundaryKind::FragmentOfMiddle, i);
            }
        }

        Classification::new(BoundaryKind::None, window.len())
    }
}

/// Extract the `boundary=` parameter from a `Content-Type` value.
pub fn boundary_param(content_type: &str) -> Option<&str> {
    let start = content_type.find("boundary=")? + "boundary=".len();
    let value = content_type[start..].split(';').next()?.trim();
    let value = value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value);
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

/// Offset of the blank line ending a part header block.
pub fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

/// File name from a part header block, reduced to its basename.
///
/// Browsers on some platforms send the full client path; anything up to
/// the last `/` or `\` is dropped. `.` and `..` are rejected.
pub fn part_filename(headers: &[u8]) -> Option<String> {
    const KEY: &[u8] = b"filename=\"";

    let start = headers.windows(KEY.len()).position(|w| w == KEY)? + KEY.len();
    let len = headers[start..].iter().position(|&b| b == b'"')?;
    let raw = String::from_utf8_lossy(&headers[start..start + len]);

    let name = raw
        .rsplit(|c: char| c == '/' || c == '\\')
        .find(|s| !s.is_empty())?
        .trim();

    match name {
        "" | "." | ".." => None,
        _ if name.contains('\0') => None,
        _ => Some(name.to_string()),
    }
}
