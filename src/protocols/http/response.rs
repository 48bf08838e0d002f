//! Response formatting.
//!
//! Every reply is a status line, `Content-Type` and `Content-Length`
//! (plus `Connection: close` when the server will hang up) followed by the
//! body. Pages are small enough to build in memory; file bodies are
//! streamed by the server after the head built here.

use crate::protocols::http::listing::DirEntry;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use std::fmt::{self, Write as _};
use std::io::{self, Read};

/// Characters escaped in generated hrefs and query values.
const HREF: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Same as `HREF` but keeps `/` so nested paths stay readable.
const QUERY_PATH: &AsciiSet = &HREF.remove(b'/');

/// Width of the name column in listings.
const NAME_COLUMN: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    BadRequest,
    NotFound,
    InternalServerError,
    NotImplemented,
}

impl Status {
    pub fn code(&self) -> u16 {
        match self {
            Status::Ok => 200,
            Status::BadRequest => 400,
            Status::NotFound => 404,
            Status::InternalServerError => 500,
            Status::NotImplemented => 501,
        }
    }

    pub fn reason(&self) -> &'static str {
        match self {
            Status::Ok => "OK",
            Status::BadRequest => "Bad Request",
            Status::NotFound => "Not Found",
            Status::InternalServerError => "Internal Server Error",
            Status::NotImplemented => "Not Implemented",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code(), self.reason())
    }
}

/// Content type for a file name, by extension.
pub fn content_type(file_name: &str) -> &'static str {
    let ext = match file_name.rsplit_once('.') {
        Some((_, ext)) => ext.to_ascii_lowercase(),
        None => return "application/octet-stream",
    };
    match ext.as_str() {
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "txt" | "log" | "c" | "cpp" | "h" => "text/plain",
        "js" => "application/x-javascript",
        "png" => "application/x-png",
        "jpg" | "jpeg" | "jpe" => "image/jpeg",
        "gif" => "image/gif",
        "ico" => "image/x-icon",
        "doc" | "docx" => "application/msword",
        "ppt" | "pptx" => "application/x-ppt",
        "xls" | "xlsx" => "application/x-xls",
        "mp4" => "video/mpeg4",
        "mp3" => "audio/mp3",
        _ => "application/octet-stream",
    }
}

/// Response head for a body of `content_length` bytes.
pub fn head(status: Status, content_type: &str, content_length: u64, close: bool) -> Vec<u8> {
    let mut out = format!(
        "HTTP/1.1 {}\r\nContent-Type: {}\r\nContent-Length: {}\r\n",
        status, content_type, content_length
    );
    if close {
        out.push_str("Connection: close\r\n");
    }
    out.push_str("\r\n");
    out.into_bytes()
}

/// Minimal HTML page carrying only `title`.
pub fn message_page(title: &str) -> String {
    let title = escape_html(title);
    format!(
        "<html>\r\n<head><title>{t}</title></head>\r\n<body bgcolor=\"white\">\r\n\
         <center><h1>{t}</h1></center>\r\n</body></html>",
        t = title
    )
}

fn page(status: Status, body: String, close: bool) -> Vec<u8> {
    let mut out = head(status, "text/html", body.len() as u64, close);
    out.extend_from_slice(body.as_bytes());
    out
}

/// Complete error reply.
pub fn error(status: Status, close: bool) -> Vec<u8> {
    page(status, message_page(&status.to_string()), close)
}

/// Upload outcome page. Both outcomes are sent with 200.
pub fn upload_result(ok: bool, close: bool) -> Vec<u8> {
    let title = if ok { "Upload completed" } else { "Upload failed" };
    page(Status::Ok, message_page(title), close)
}

/// Index page for the root-relative directory `path` ("" for the root).
pub fn listing(path: &str, entries: &[DirEntry], close: bool) -> Vec<u8> {
    let shown = escape_html(path);
    let action = utf8_percent_encode(path, QUERY_PATH);

    let mut body = String::new();
    let _ = write!(
        body,
        "<html>\r\n<head>\r\n<meta charset=\"utf-8\">\r\n<title>Index of /{p}</title>\r\n</head>\r\n\
         <body bgcolor=\"white\">\r\n<h1>Index of /{p}</h1><hr>\r\n\
         <form action=\"/upload?path={a}\" method=\"post\" enctype=\"multipart/form-data\">\r\n\
         <input type=\"file\" name=\"file\" multiple=\"true\" />\r\n\
         <input type=\"submit\" value=\"Upload\" /></form><hr><pre>\r\n",
        p = shown,
        a = action
    );

    if !path.is_empty() {
        body.push_str("<a href=\"../\">../</a>\r\n");
    }
    for entry in entries {
        listing_line(&mut body, entry);
    }

    body.push_str("</pre><hr></body></html>");
    page(Status::Ok, body, close)
}

fn listing_line(body: &mut String, entry: &DirEntry) {
    let suffix = if entry.is_dir { "/" } else { "" };
    let href = utf8_percent_encode(&entry.name, HREF);
    let label = format!("{}{}", entry.name, suffix);
    let padding = NAME_COLUMN.saturating_sub(label.chars().count()).max(1);

    let modified = entry
        .modified
        .map(|t| t.format("%d-%b-%Y %H:%M").to_string())
        .unwrap_or_else(|| "-".to_string());
    let size = if entry.is_dir {
        "-".to_string()
    } else {
        entry.size.to_string()
    };

    let _ = write!(
        body,
        "<a href=\"{}{}\">{}</a>{}{:<17} {:>20}\r\n",
        href,
        suffix,
        escape_html(&label),
        " ".repeat(padding),
        modified,
        size
    );
}

/// Head for a file download plus the first chunk of its body.
///
/// Returns the bytes to send and how many body bytes were read from
/// `reader`.
pub fn file_head<R: Read>(
    name: &str,
    reader: &mut R,
    total: u64,
    chunk: usize,
    close: bool,
) -> io::Result<(Vec<u8>, u64)> {
    let mut out = head(Status::Ok, content_type(name), total, close);
    let want = total.min(chunk as u64);
    let loaded = reader.by_ref().take(want).read_to_end(&mut out)? as u64;
    Ok((out, loaded))
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}
