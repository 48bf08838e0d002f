//! Protocol implementations.
//!
//! - `http`: HTTP/1.x head parsing, multipart uploads and response
//!   formatting for the file server

pub mod http;
