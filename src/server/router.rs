//! Request routing.
//!
//! Maps a parsed request to what the server should do with it. Every path
//! is resolved under the served root; nothing here touches sockets.

use crate::protocols::http::multipart::{self, Boundary};
use crate::protocols::http::parser::{Method, Request};
use crate::protocols::http::path;
use crate::protocols::http::Status;
use std::path::{Path, PathBuf};
use tracing::debug;

/// URI prefix reserved for multipart uploads.
pub const UPLOAD_PREFIX: &str = "/upload";

#[derive(Debug)]
pub enum Action {
    /// Index page for `dir`; `display` is the root-relative path.
    Listing { dir: PathBuf, display: String },
    Download { file: PathBuf },
    Upload {
        dir: PathBuf,
        boundary: Boundary,
        total: u64,
    },
    Reject(Status),
}

pub fn route(req: &Request, root: &Path) -> Action {
    if req.path().starts_with(UPLOAD_PREFIX) {
        return route_upload(req, root);
    }

    if req.method != Method::Get {
        debug!(method = %req.method, "Unsupported method");
        return Action::Reject(Status::NotImplemented);
    }

    let relative = match path::decode(req.path()).and_then(|p| path::sanitize(&p)) {
        Ok(p) => p,
        Err(e) => {
            debug!(uri = %req.uri, error = %e, "Rejected path");
            return Action::Reject(Status::BadRequest);
        }
    };

    if req.path().ends_with('/') {
        Action::Listing {
            dir: root.join(&relative),
            display: relative,
        }
    } else {
        Action::Download {
            file: root.join(&relative),
        }
    }
}

fn route_upload(req: &Request, root: &Path) -> Action {
    if req.method != Method::Post {
        return Action::Reject(Status::NotImplemented);
    }

    let total = match req.content_length() {
        Some(n) if n > 0 => n,
        _ => {
            debug!("Upload without a usable Content-Length");
            return Action::Reject(Status::NotImplemented);
        }
    };

    let boundary = match req
        .header("Content-Type")
        .and_then(multipart::boundary_param)
        .map(Boundary::new)
    {
        Some(Ok(b)) => b,
        Some(Err(e)) => {
            debug!(error = %e, "Invalid multipart boundary");
            return Action::Reject(Status::NotImplemented);
        }
        None => {
            debug!("Upload without a multipart boundary");
            return Action::Reject(Status::NotImplemented);
        }
    };

    let raw = req
        .query()
        .and_then(|q| path::query_param(q, "path"))
        .unwrap_or("");
    let relative = match path::decode_query_value(raw).and_then(|p| path::sanitize(&p)) {
        Ok(p) => p,
        Err(e) => {
            debug!(path = raw, error = %e, "Rejected upload target");
            return Action::Reject(Status::BadRequest);
        }
    };

    let dir = root.join(relative);
    if !dir.is_dir() {
        return Action::Reject(Status::NotFound);
    }

    Action::Upload {
        dir,
        boundary,
        total,
    }
}
