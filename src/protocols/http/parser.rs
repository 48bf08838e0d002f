//! HTTP/1.x request head parser.
//!
//! Tokenizing is done by `httparse`; this module turns the borrowed result
//! into an owned `Request` so the connection buffer can be consumed.

use std::fmt;

/// Upper bound on header fields per request.
pub const MAX_HEADERS: usize = 64;

/// Request method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Other(String),
}

impl Method {
    fn from_token(token: &str) -> Self {
        match token {
            "GET" => Method::Get,
            "POST" => Method::Post,
            other => Method::Other(other.to_string()),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Method::Get => write!(f, "GET"),
            Method::Post => write!(f, "POST"),
            Method::Other(m) => write!(f, "{}", m),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Version {
    Http10,
    Http11,
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Version::Http10 => write!(f, "HTTP/1.0"),
            Version::Http11 => write!(f, "HTTP/1.1"),
        }
    }
}

/// Parsed request head.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    pub uri: String,
    pub version: Version,
    /// Header fields in arrival order.
    pub headers: Vec<(String, String)>,
}

impl Request {
    /// First header named `name`, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// `Content-Length` as a number, if present and numeric.
    pub fn content_length(&self) -> Option<u64> {
        self.header("Content-Length")?.trim().parse().ok()
    }

    /// URI path without the query string.
    pub fn path(&self) -> &str {
        match self.uri.find('?') {
            Some(pos) => &self.uri[..pos],
            None => &self.uri,
        }
    }

    /// Query string after `?`, if any.
    pub fn query(&self) -> Option<&str> {
        self.uri.find('?').map(|pos| &self.uri[pos + 1..])
    }

    /// Whether the client asked for the connection to be closed.
    pub fn wants_close(&self) -> bool {
        match self.header("Connection") {
            Some(v) => v.eq_ignore_ascii_case("close"),
            None => self.version == Version::Http10,
        }
    }
}

/// Parse result.
#[derive(Debug)]
pub enum ParseResult {
    /// Request head with the number of bytes it occupied.
    Complete(Request, usize),
    /// The blank line ending the head has not arrived yet.
    Incomplete,
    Error(ParseError),
}

/// Malformed request heads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    Syntax(httparse::Error),
    /// A header value is not valid UTF-8.
    Encoding(String),
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::Syntax(e) => write!(f, "malformed request: {}", e),
            ParseError::Encoding(name) => write!(f, "header {} is not valid UTF-8", name),
        }
    }
}

impl std::error::Error for ParseError {}

/// Parse a request head from the start of `input`.
pub fn parse(input: &[u8]) -> ParseResult {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut raw = httparse::Request::new(&mut headers);

    let consumed = match raw.parse(input) {
        Ok(httparse::Status::Complete(n)) => n,
        Ok(httparse::Status::Partial) => return ParseResult::Incomplete,
        Err(e) => return ParseResult::Error(ParseError::Syntax(e)),
    };

    // Complete implies method, path and version are present
    let (Some(method), Some(uri), Some(version)) = (raw.method, raw.path, raw.version) else {
        return ParseResult::Error(ParseError::Syntax(httparse::Error::Token));
    };

    let mut fields = Vec::with_capacity(raw.headers.len());
    for h in raw.headers.iter() {
        match std::str::from_utf8(h.value) {
            Ok(v) => fields.push((h.name.to_string(), v.to_string())),
            Err(_) => return ParseResult::Error(ParseError::Encoding(h.name.to_string())),
        }
    }

    let request = Request {
        method: Method::from_token(method),
        uri: uri.to_string(),
        version: if version == 0 {
            Version::Http10
        } else {
            Version::Http11
        },
        headers: fields,
    };
    ParseResult::Complete(request, consumed)
}
