//! Outbound transfers.
//!
//! A reply is written across as many write-readiness callbacks as the
//! socket needs. Each callback flushes at most one chunk; file bodies are
//! loaded one chunk at a time so a large download never sits in memory.

use crate::protocols::http::response::{self, Status};
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

/// Bytes queued for the socket and how many of them were written.
#[derive(Debug)]
pub struct Outbound {
    data: Vec<u8>,
    written: usize,
}

impl Outbound {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data, written: 0 }
    }

    /// Write until the buffer is drained or the socket would block.
    /// Returns true once everything was written.
    fn write_to<W: Write>(&mut self, w: &mut W) -> io::Result<bool> {
        while self.written < self.data.len() {
            match w.write(&self.data[self.written..]) {
                Ok(0) => return Err(io::Error::new(io::ErrorKind::WriteZero, "write returned 0")),
                Ok(n) => self.written += n,
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(true)
    }
}

/// A file being streamed to the client.
#[derive(Debug)]
pub struct FileStream {
    file: File,
    path: PathBuf,
    total: u64,
    /// Body bytes loaded from the file so far.
    offset: u64,
    chunk: Outbound,
    chunk_size: usize,
}

impl FileStream {
    /// Open `path` and prepare the head plus the first body chunk.
    ///
    /// Directories are reported as `NotFound`.
    pub fn open(path: &Path, chunk_size: usize, close: bool) -> io::Result<Self> {
        let mut file = File::open(path)?;
        let meta = file.metadata()?;
        if !meta.is_file() {
            return Err(io::Error::new(io::ErrorKind::NotFound, "not a regular file"));
        }

        let total = meta.len();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let (head, loaded) = response::file_head(&name, &mut file, total, chunk_size, close)?;

        Ok(Self {
            file,
            path: path.to_path_buf(),
            total,
            offset: loaded,
            chunk: Outbound::new(head),
            chunk_size,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Percentage of the body loaded so far.
    pub fn progress(&self) -> u64 {
        if self.total == 0 {
            100
        } else {
            self.offset * 100 / self.total
        }
    }

    /// Replace the drained chunk with the next one from the file.
    fn load_next(&mut self) -> io::Result<()> {
        let want = (self.total - self.offset).min(self.chunk_size as u64);
        let mut data = std::mem::take(&mut self.chunk.data);
        data.clear();

        let n = Read::by_ref(&mut self.file).take(want).read_to_end(&mut data)? as u64;
        if n < want {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "file shrank while being sent",
            ));
        }

        self.offset += n;
        self.chunk = Outbound::new(data);
        Ok(())
    }
}

/// Result of one flush attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flush {
    /// More to send; wait for the next write readiness.
    Pending,
    Done,
}

/// What a connection is sending.
#[derive(Debug)]
pub enum Reply {
    Listing(Outbound),
    File(FileStream),
    Error(Status, Outbound),
    UploadAck(bool, Outbound),
}

impl Reply {
    pub fn listing(bytes: Vec<u8>) -> Self {
        Reply::Listing(Outbound::new(bytes))
    }

    pub fn error(status: Status, close: bool) -> Self {
        Reply::Error(status, Outbound::new(response::error(status, close)))
    }

    pub fn upload_ack(ok: bool, close: bool) -> Self {
        Reply::UploadAck(ok, Outbound::new(response::upload_result(ok, close)))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Reply::Listing(_) => "listing",
            Reply::File(_) => "file",
            Reply::Error(..) => "error",
            Reply::UploadAck(true, _) => "upload-completed",
            Reply::UploadAck(false, _) => "upload-failed",
        }
    }

    pub fn status(&self) -> Status {
        match self {
            Reply::Error(status, _) => *status,
            _ => Status::Ok,
        }
    }

    /// Flush at most one chunk.
    pub fn write_to<W: Write>(&mut self, w: &mut W) -> io::Result<Flush> {
        match self {
            Reply::Listing(out) | Reply::Error(_, out) | Reply::UploadAck(_, out) => {
                Ok(if out.write_to(w)? {
                    Flush::Done
                } else {
                    Flush::Pending
                })
            }
            Reply::File(stream) => {
                if !stream.chunk.write_to(w)? {
                    return Ok(Flush::Pending);
                }
                if stream.offset == stream.total {
                    return Ok(Flush::Done);
                }
                stream.load_next()?;
                Ok(Flush::Pending)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Writer accepting at most `limit` bytes per call, then blocking
    /// after `budget` calls.
    struct Throttled {
        out: Vec<u8>,
        limit: usize,
        budget: usize,
    }

    impl Write for Throttled {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.budget == 0 {
                return Err(io::ErrorKind::WouldBlock.into());
            }
            self.budget -= 1;
            let n = buf.len().min(self.limit);
            self.out.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn body(out: &[u8]) -> &[u8] {
        let end = out.windows(4).position(|w| w == b"\r\n\r\n").unwrap();
        &out[end + 4..]
    }

    #[test]
    fn test_page_partial_writes() {
        let mut reply = Reply::error(Status::NotFound, true);
        let mut w = Throttled {
            out: Vec::new(),
            limit: 10,
            budget: 2,
        };

        assert_eq!(reply.write_to(&mut w).unwrap(), Flush::Pending);
        assert_eq!(w.out.len(), 20);

        w.budget = usize::MAX;
        assert_eq!(reply.write_to(&mut w).unwrap(), Flush::Done);
        assert_eq!(w.out, response::error(Status::NotFound, true));
    }

    #[test]
    fn test_file_stream_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.bin");
        let content: Vec<u8> = (0..10_000u32).map(|i| (i % 253) as u8).collect();
        std::fs::write(&path, &content).unwrap();

        let stream = FileStream::open(&path, 4096, false).unwrap();
        assert_eq!(stream.total(), 10_000);
        assert_eq!(stream.offset(), 4096);

        let mut offsets = vec![stream.offset()];
        let mut reply = Reply::File(stream);
        let mut w = Throttled {
            out: Vec::new(),
            limit: 1000,
            budget: usize::MAX,
        };

        loop {
            let flush = reply.write_to(&mut w).unwrap();
            if let Reply::File(s) = &reply {
                offsets.push(s.offset());
            }
            if flush == Flush::Done {
                break;
            }
        }

        // Every pending cycle loaded a chunk; the final one only drained it
        assert_eq!(offsets, vec![4096, 8192, 10_000, 10_000]);
        let loads = &offsets[..offsets.len() - 1];
        assert!(loads.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(body(&w.out), &content[..]);
    }

    #[test]
    fn test_file_stream_would_block() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("small.txt");
        std::fs::write(&path, b"hello world").unwrap();

        let mut reply = Reply::File(FileStream::open(&path, 4096, false).unwrap());
        let mut w = Throttled {
            out: Vec::new(),
            limit: 5,
            budget: 1,
        };
        assert_eq!(reply.write_to(&mut w).unwrap(), Flush::Pending);

        w.budget = usize::MAX;
        assert_eq!(reply.write_to(&mut w).unwrap(), Flush::Done);
        assert_eq!(body(&w.out), b"hello world");
    }

    #[test]
    fn test_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty");
        std::fs::write(&path, b"").unwrap();

        let mut reply = Reply::File(FileStream::open(&path, 4096, true).unwrap());
        let mut out = Vec::new();
        assert_eq!(reply.write_to(&mut out).unwrap(), Flush::Done);
        assert!(String::from_utf8(out).unwrap().contains("Content-Length: 0\r\n"));
    }

    #[test]
    fn test_open_rejects_directory() {
        let dir = tempfile::tempdir().unwrap();
        let err = FileStream::open(dir.path(), 4096, false).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);

        let err = FileStream::open(&dir.path().join("missing"), 4096, false).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
