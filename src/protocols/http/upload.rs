//! Streaming multipart upload sink.
//!
//! Body bytes arrive in arbitrary chunks. Each chunk is appended to the
//! carry window left over from the previous call and the window is scanned
//! for boundary markers:
//!
//! ```text
//! Preamble ──first──▶ PartHeaders ──CRLFCRLF──▶ PartBody ──middle──▶ PartHeaders
//!                                                   │
//!                                                   └──last──▶ Complete
//! ```
//!
//! Content that is known not to contain a marker is written to the target
//! file immediately; a trailing marker fragment stays in the carry window.
//! The window therefore holds at most a part header block (bounded by
//! `max_carry`) or a marker prefix, never the file contents.

use crate::protocols::http::multipart::{self, Boundary, BoundaryKind};
use bytes::{Buf, BytesMut};
use std::fmt;
use std::fs::{self, File};
use std::io::{self, Write};
use std::mem;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Upload failures.
#[derive(Debug)]
pub enum UploadError {
    Io(io::Error),
    /// A part header block carries no usable `filename`.
    MissingFilename,
    /// A part header block exceeds the carry limit.
    HeadersTooLarge,
    /// More bytes were fed than the declared content length.
    Overflow,
    /// The body ended without a terminal boundary.
    Truncated,
}

impl fmt::Display for UploadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UploadError::Io(e) => write!(f, "upload I/O error: {}", e),
            UploadError::MissingFilename => write!(f, "no filename in form data"),
            UploadError::HeadersTooLarge => write!(f, "part headers too large"),
            UploadError::Overflow => write!(f, "body longer than Content-Length"),
            UploadError::Truncated => write!(f, "body ended before the terminal boundary"),
        }
    }
}

impl std::error::Error for UploadError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            UploadError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for UploadError {
    fn from(e: io::Error) -> Self {
        UploadError::Io(e)
    }
}

enum Part {
    Preamble,
    Headers,
    Body { file: File, written: u64 },
    Complete,
}

/// Outcome of one parsing step over the window.
enum Step {
    /// State changed, scan the window again.
    Again(Part),
    /// Window exhausted or holds only a fragment.
    NeedMore(Part),
}

/// Transfer context for one multipart request body.
pub struct Upload {
    boundary: Boundary,
    dir: PathBuf,
    total: u64,
    received: u64,
    carry: BytesMut,
    max_carry: usize,
    part: Part,
    /// File of the part being written, removed on abort.
    current: Option<PathBuf>,
    stored: Vec<PathBuf>,
}

impl Upload {
    /// Start an upload of `total` body bytes into `dir`.
    pub fn new(dir: PathBuf, boundary: Boundary, total: u64, max_carry: usize) -> Self {
        Self {
            boundary,
            dir,
            total,
            received: 0,
            carry: BytesMut::new(),
            max_carry,
            part: Part::Preamble,
            current: None,
            stored: Vec::new(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn received(&self) -> u64 {
        self.received
    }

    pub fn remaining(&self) -> u64 {
        self.total - self.received
    }

    /// Whether the terminal boundary has been seen.
    pub fn is_complete(&self) -> bool {
        matches!(self.part, Part::Complete)
    }

    /// Bytes held back for the next scan.
    pub fn carried(&self) -> usize {
        self.carry.len()
    }

    /// Consume the next chunk of the body.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<(), UploadError> {
        if chunk.len() as u64 > self.remaining() {
            return Err(UploadError::Overflow);
        }
        self.received += chunk.len() as u64;

        let mut window = mem::take(&mut self.carry);
        window.extend_from_slice(chunk);

        loop {
            let part = mem::replace(&mut self.part, Part::Complete);
            match self.step(part, &mut window)? {
                Step::Again(part) => self.part = part,
                Step::NeedMore(part) => {
                    self.part = part;
                    break;
                }
            }
        }

        if window.len() > self.max_carry {
            return Err(UploadError::HeadersTooLarge);
        }
        self.carry = window;
        Ok(())
    }

    fn step(&mut self, part: Part, window: &mut BytesMut) -> Result<Step, UploadError> {
        match part {
            Part::Preamble => Ok(self.skip_preamble(window)),
            Part::Headers => self.open_part(window),
            Part::Body { file, written } => self.write_body(file, written, window),
            Part::Complete => {
                // Epilogue after the terminal boundary
                window.clear();
                Ok(Step::NeedMore(Part::Complete))
            }
        }
    }

    fn skip_preamble(&mut self, window: &mut BytesMut) -> Step {
        let first = self.boundary.first();
        if window.len() < first.len() && first.starts_with(window) {
            return Step::NeedMore(Part::Preamble);
        }

        let c = self.boundary.scan(window);
        match c.kind {
            BoundaryKind::First => {
                window.advance(c.cut);
                Step::Again(Part::Headers)
            }
            BoundaryKind::Middle => {
                window.advance(c.cut + self.boundary.middle().len());
                Step::Again(Part::Headers)
            }
            BoundaryKind::Last => {
                window.clear();
                Step::NeedMore(Part::Complete)
            }
            BoundaryKind::FragmentOfLast | BoundaryKind::FragmentOfMiddle => {
                window.advance(c.cut);
                Step::NeedMore(Part::Preamble)
            }
            BoundaryKind::None => {
                window.clear();
                Step::NeedMore(Part::Preamble)
            }
        }
    }

    fn open_part(&mut self, window: &mut BytesMut) -> Result<Step, UploadError> {
        let Some(end) = multipart::find_header_end(window) else {
            return Ok(Step::NeedMore(Part::Headers));
        };

        let name = multipart::part_filename(&window[..end]).ok_or(UploadError::MissingFilename)?;
        let path = self.dir.join(name);
        let file = File::create(&path)?;
        info!(path = %path.display(), "Receiving file");

        self.current = Some(path);
        window.advance(end + 4);
        Ok(Step::Again(Part::Body { file, written: 0 }))
    }

    fn write_body(
        &mut self,
        mut file: File,
        mut written: u64,
        window: &mut BytesMut,
    ) -> Result<Step, UploadError> {
        let c = self.boundary.scan_body(window);

        file.write_all(&window[..c.cut])?;
        written += c.cut as u64;
        window.advance(c.cut);

        match c.kind {
            // Content, or a marker fragment left in the window
            BoundaryKind::None
            | BoundaryKind::First
            | BoundaryKind::FragmentOfLast
            | BoundaryKind::FragmentOfMiddle => Ok(Step::NeedMore(Part::Body { file, written })),
            BoundaryKind::Middle => {
                self.close_part(file, written)?;
                window.advance(self.boundary.middle().len());
                Ok(Step::Again(Part::Headers))
            }
            BoundaryKind::Last => {
                self.close_part(file, written)?;
                window.clear();
                Ok(Step::NeedMore(Part::Complete))
            }
        }
    }

    fn close_part(&mut self, file: File, written: u64) -> io::Result<()> {
        file.sync_all()?;
        drop(file);
        if let Some(path) = self.current.take() {
            debug!(path = %path.display(), bytes = written, "File stored");
            self.stored.push(path);
        }
        Ok(())
    }

    /// Finish after the whole body was fed, returning the stored files.
    pub fn finish(self) -> Result<Vec<PathBuf>, UploadError> {
        if self.remaining() > 0 || !self.is_complete() {
            self.abort();
            return Err(UploadError::Truncated);
        }
        Ok(self.stored)
    }

    /// Drop the upload, removing a partially written file.
    pub fn abort(self) {
        let Upload { part, current, .. } = self;
        // Close before removing
        drop(part);
        if let Some(path) = current {
            match fs::remove_file(&path) {
                Ok(()) => debug!(path = %path.display(), "Removed partial upload"),
                Err(e) => debug!(path = %path.display(), error = %e, "Failed to remove partial upload"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOUNDARY: &str = "----WebKitFormBoundaryOG3Viw9MEZcexbvT";

    fn body(parts: &[(&str, &[u8])]) -> Vec<u8> {
        let mut out = Vec::new();
        for (name, content) in parts {
            out.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
            out.extend_from_slice(
                format!(
                    "Content-Disposition: form-data; name=\"file\"; filename=\"{}\"\r\n\
                     Content-Type: application/octet-stream\r\n\r\n",
                    name
                )
                .as_bytes(),
            );
            out.extend_from_slice(content);
            out.extend_from_slice(b"\r\n");
        }
        out.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
        out
    }

    fn upload(dir: &Path, total: usize) -> Upload {
        Upload::new(
            dir.to_path_buf(),
            Boundary::new(BOUNDARY).unwrap(),
            total as u64,
            1024,
        )
    }

    fn run(dir: &Path, data: &[u8], chunks: &[usize]) -> Result<Vec<PathBuf>, UploadError> {
        let mut upload = upload(dir, data.len());
        let mut offset = 0;
        for &size in chunks {
            let end = (offset + size).min(data.len());
            upload.feed(&data[offset..end])?;
            assert_eq!(upload.received(), end as u64);
            offset = end;
        }
        if offset < data.len() {
            upload.feed(&data[offset..])?;
        }
        upload.finish()
    }

    #[test]
    fn test_single_part_single_chunk() {
        let dir = tempfile::tempdir().unwrap();
        let data = body(&[("a.txt", b"hello")]);

        let stored = run(dir.path(), &data, &[data.len()]).unwrap();
        assert_eq!(stored, vec![dir.path().join("a.txt")]);
        assert_eq!(fs::read(dir.path().join("a.txt")).unwrap(), b"hello");
    }

    #[test]
    fn test_every_split_point_yields_identical_file() {
        let content: Vec<u8> = (0..600u32).map(|i| (i % 251) as u8).collect();
        let data = body(&[("blob.bin", &content)]);

        for split in 1..data.len() {
            let dir = tempfile::tempdir().unwrap();
            run(dir.path(), &data, &[split]).unwrap();
            let stored = fs::read(dir.path().join("blob.bin")).unwrap();
            assert_eq!(stored, content, "split at {}", split);
        }
    }

    #[test]
    fn test_tiny_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let content = b"line one\r\nline two\r\n--not a boundary\r\n";
        let data = body(&[("t.txt", content)]);

        let chunks = vec![3; data.len() / 3 + 1];
        run(dir.path(), &data, &chunks).unwrap();
        assert_eq!(fs::read(dir.path().join("t.txt")).unwrap(), content);
    }

    #[test]
    fn test_multiple_parts() {
        let dir = tempfile::tempdir().unwrap();
        let data = body(&[("one.txt", b"first"), ("two.txt", b"second\r\n")]);

        let stored = run(dir.path(), &data, &[17, 40, 9]).unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(fs::read(dir.path().join("one.txt")).unwrap(), b"first");
        assert_eq!(fs::read(dir.path().join("two.txt")).unwrap(), b"second\r\n");
    }

    #[test]
    fn test_carry_stays_bounded() {
        let dir = tempfile::tempdir().unwrap();
        let content = vec![b'z'; 64 * 1024];
        let data = body(&[("big.bin", &content)]);

        let mut upload = upload(dir.path(), data.len());
        for chunk in data.chunks(4096) {
            upload.feed(chunk).unwrap();
            assert!(upload.carried() <= 1024);
        }
        upload.finish().unwrap();
        assert_eq!(fs::read(dir.path().join("big.bin")).unwrap().len(), content.len());
    }

    #[test]
    fn test_missing_filename() {
        let dir = tempfile::tempdir().unwrap();
        let data = format!(
            "--{b}\r\nContent-Disposition: form-data; name=\"note\"\r\n\r\nhi\r\n--{b}--\r\n",
            b = BOUNDARY
        );
        let mut upload = upload(dir.path(), data.len());
        assert!(matches!(
            upload.feed(data.as_bytes()),
            Err(UploadError::MissingFilename)
        ));
    }

    #[test]
    fn test_truncated_body_removes_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let data = body(&[("cut.txt", b"never finished")]);
        let mut upload = upload(dir.path(), data.len() + 10);

        upload.feed(&data[..data.len() - 20]).unwrap();
        assert!(dir.path().join("cut.txt").exists());

        assert!(matches!(upload.finish(), Err(UploadError::Truncated)));
        assert!(!dir.path().join("cut.txt").exists());
    }

    #[test]
    fn test_overflow_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut upload = upload(dir.path(), 4);
        assert!(matches!(upload.feed(b"12345"), Err(UploadError::Overflow)));
    }

    #[test]
    fn test_oversized_part_headers() {
        let dir = tempfile::tempdir().unwrap();
        let mut data = format!("--{}\r\nX-Padding: ", BOUNDARY).into_bytes();
        data.extend(std::iter::repeat(b'p').take(2048));
        let mut upload = upload(dir.path(), data.len() + 100);
        assert!(matches!(
            upload.feed(&data),
            Err(UploadError::HeadersTooLarge)
        ));
    }

    #[test]
    fn test_preamble_and_epilogue_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let mut data = b"This is a preamble.".to_vec();
        data.extend_from_slice(b"\r\n");
        data.extend_from_slice(&body(&[("p.txt", b"payload")]));
        data.extend_from_slice(b"epilogue text");

        run(dir.path(), &data, &[5, 30]).unwrap();
        assert_eq!(fs::read(dir.path().join("p.txt")).unwrap(), b"payload");
    }

    #[test]
    fn test_existing_file_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("r.txt"), b"old contents that are longer").unwrap();
        let data = body(&[("r.txt", b"new")]);

        run(dir.path(), &data, &[data.len()]).unwrap();
        assert_eq!(fs::read(dir.path().join("r.txt")).unwrap(), b"new");
    }
}
