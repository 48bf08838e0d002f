//! HTTP/1.x file server protocol.
//!
//! Parsing and formatting only; the server drives these from reactor
//! callbacks and owns all sockets.

pub mod listing;
pub mod multipart;
pub mod parser;
pub mod path;
pub mod response;
pub mod upload;

pub use parser::{parse, ParseError, ParseResult, Request};
pub use response::Status;
