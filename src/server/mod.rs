//! File server over the readiness reactor.
//!
//! The listener holds a persistent read interest; each accepted connection
//! gets a persistent read interest and a persistent error interest. Replies
//! are sent from a one-shot write interest that re-registers itself until
//! the reply is flushed, so one large transfer never starves the others.
//!
//! Callbacks own their error handling: any connection-fatal failure closes
//! that connection and the loop carries on.

mod connection;
mod router;
mod transfer;

use crate::config::Config;
use crate::protocols::http::multipart::Boundary;
use crate::protocols::http::upload::Upload;
use crate::protocols::http::{listing, parser, response, ParseResult, Request, Status};
use crate::runtime::{listener, EventKind, Handle, Reactor, RegistryError};
use bytes::Buf;
use connection::{Connection, ConnectionTable, Phase};
use mio::net::{TcpListener, TcpStream};
use router::Action;
use std::io::{self, Read};
use std::mem;
use std::net::SocketAddr;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};
use transfer::{FileStream, Flush, Reply};

/// Per-request limits and the served root.
#[derive(Debug, Clone)]
pub struct Settings {
    pub root: PathBuf,
    pub buffer_size: usize,
    pub max_header_size: usize,
}

impl Settings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            root: config.root.clone(),
            buffer_size: config.buffer_size,
            max_header_size: config.max_header_size,
        }
    }
}

/// Application state handed to every reactor callback.
pub struct Server {
    settings: Settings,
    listener: TcpListener,
    connections: ConnectionTable,
    /// Read buffer shared by all connections.
    scratch: Vec<u8>,
}

impl Server {
    pub fn new(listener: TcpListener, settings: Settings, max_connections: usize) -> Self {
        let scratch = vec![0; settings.buffer_size];
        Self {
            settings,
            listener,
            connections: ConnectionTable::new(max_connections),
            scratch,
        }
    }

    /// Bind the listening socket described by `config`.
    pub fn bind(config: &Config) -> io::Result<Self> {
        let listener = listener::bind(config.host, config.port)?;
        Ok(Self::new(
            listener,
            Settings::from_config(config),
            config.max_connections,
        ))
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Attach the listener to `reactor` and start accepting.
    pub fn start(&self, reactor: &mut Reactor<Server>) -> io::Result<Handle> {
        let handle = reactor.attach(self.listener.as_raw_fd());
        reactor.register(handle, EventKind::Read, true, on_accept)?;
        Ok(handle)
    }
}

/// Serve `config.root` until the reactor fails.
pub fn run(config: Config) -> io::Result<()> {
    let mut server = Server::bind(&config)?;
    let mut reactor = Reactor::new(
        config.max_connections + 1,
        Duration::from_millis(config.poll_timeout_ms),
    )?;
    server.start(&mut reactor)?;

    info!(
        addr = %server.local_addr()?,
        root = %config.root.display(),
        "Listening"
    );

    reactor.run(&mut server)
}

fn on_accept(reactor: &mut Reactor<Server>, server: &mut Server, _handle: Handle) {
    loop {
        match server.listener.accept() {
            Ok((stream, peer)) => admit(reactor, server, stream, peer),
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                error!(error = %e, "Accept error");
                break;
            }
        }
    }
}

fn admit(reactor: &mut Reactor<Server>, server: &mut Server, stream: TcpStream, peer: SocketAddr) {
    if server.connections.is_full() {
        warn!(%peer, "Connection limit reached");
        return;
    }

    let handle = reactor.attach(stream.as_raw_fd());
    let registered = reactor
        .register(handle, EventKind::Read, true, on_readable)
        .and_then(|()| reactor.register(handle, EventKind::Error, true, on_error));
    if let Err(e) = registered {
        warn!(%peer, error = %e, "Rejecting connection");
        reactor.detach(handle);
        return;
    }

    if server
        .connections
        .insert(handle, Connection::new(stream, peer))
        .is_err()
    {
        reactor.detach(handle);
        return;
    }
    debug!(
        %handle,
        %peer,
        connections = server.connections.len(),
        attached = reactor.attached(),
        "Accepted connection"
    );
}

fn on_error(reactor: &mut Reactor<Server>, server: &mut Server, handle: Handle) {
    debug!(%handle, "Socket error");
    close(reactor, server, handle);
}

fn on_readable(reactor: &mut Reactor<Server>, server: &mut Server, handle: Handle) {
    let Some(conn) = server.connections.get_mut(handle) else {
        return;
    };
    let read: fn(&mut Reactor<Server>, &mut Server, Handle) = match conn.phase {
        Phase::Idle | Phase::ReadingHead => read_head,
        Phase::StreamingUpload(_) => read_upload,
        Phase::Writing(_) => read_while_writing,
    };
    read(reactor, server, handle);
}

/// Read until a complete head is parsed or the socket would block.
fn read_head(reactor: &mut Reactor<Server>, server: &mut Server, handle: Handle) {
    loop {
        // Bytes stashed earlier may already hold a full request
        if process_head(reactor, server, handle) {
            return;
        }

        let Some(conn) = server.connections.get_mut(handle) else {
            return;
        };
        match conn.stream.read(&mut server.scratch) {
            Ok(0) => {
                debug!(%handle, "Connection closed by peer");
                close(reactor, server, handle);
                return;
            }
            Ok(n) => {
                conn.pending.extend_from_slice(&server.scratch[..n]);
                conn.phase = Phase::ReadingHead;
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return,
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                debug!(%handle, error = %e, "Read failed");
                close(reactor, server, handle);
                return;
            }
        }
    }
}

/// Try to parse a head from the pending bytes. Returns true when the
/// connection left the head-reading phases (or is gone).
fn process_head(reactor: &mut Reactor<Server>, server: &mut Server, handle: Handle) -> bool {
    let Some(conn) = server.connections.get_mut(handle) else {
        return true;
    };
    if conn.pending.is_empty() {
        return false;
    }

    match parser::parse(&conn.pending) {
        ParseResult::Incomplete => {
            if conn.pending.len() <= server.settings.max_header_size {
                return false;
            }
            warn!(%handle, size = conn.pending.len(), "Request head too large");
            reply(reactor, server, handle, Reply::error(Status::BadRequest, true), true);
            true
        }
        ParseResult::Error(e) => {
            debug!(%handle, error = %e, "Malformed request");
            reply(reactor, server, handle, Reply::error(Status::BadRequest, true), true);
            true
        }
        ParseResult::Complete(req, consumed) => {
            conn.pending.advance(consumed);
            dispatch_request(reactor, server, handle, req);
            true
        }
    }
}

fn dispatch_request(reactor: &mut Reactor<Server>, server: &mut Server, handle: Handle, req: Request) {
    let close = req.wants_close();
    info!(%handle, method = %req.method, uri = %req.uri, "Request");

    let out = match router::route(&req, &server.settings.root) {
        Action::Listing { dir, display } => listing_reply(&dir, &display, close),
        Action::Download { file } => download_reply(&file, server.settings.buffer_size, close),
        Action::Upload {
            dir,
            boundary,
            total,
        } => {
            start_upload(reactor, server, handle, dir, boundary, total, close);
            return;
        }
        Action::Reject(status) => Reply::error(status, true),
    };

    let close = close || matches!(out, Reply::Error(..));
    reply(reactor, server, handle, out, close);
}

fn listing_reply(dir: &Path, display: &str, close: bool) -> Reply {
    match listing::read_entries(dir) {
        Ok(entries) => Reply::listing(response::listing(display, &entries, close)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Reply::error(Status::NotFound, true),
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "Failed to list directory");
            Reply::error(Status::InternalServerError, true)
        }
    }
}

fn download_reply(file: &Path, chunk_size: usize, close: bool) -> Reply {
    match FileStream::open(file, chunk_size, close) {
        Ok(stream) => {
            info!(path = %stream.path().display(), size = stream.total(), "Sending file");
            Reply::File(stream)
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Reply::error(Status::NotFound, true),
        Err(e) => {
            warn!(path = %file.display(), error = %e, "Failed to open file");
            Reply::error(Status::NotImplemented, true)
        }
    }
}

fn start_upload(
    reactor: &mut Reactor<Server>,
    server: &mut Server,
    handle: Handle,
    dir: PathBuf,
    boundary: Boundary,
    total: u64,
    close: bool,
) {
    let Some(conn) = server.connections.get_mut(handle) else {
        return;
    };
    info!(%handle, dir = %dir.display(), total, "Upload started");

    let mut upload = Upload::new(dir, boundary, total, 2 * server.settings.buffer_size);

    // Body bytes that arrived together with the head
    let take = conn.pending.len().min(total as usize);
    let early = conn.pending.split_to(take);
    let fed = upload.feed(&early);

    conn.close_after = close;
    conn.phase = Phase::StreamingUpload(Box::new(upload));

    if let Err(e) = fed {
        warn!(%handle, error = %e, "Upload failed");
        fail_upload(reactor, server, handle);
        return;
    }
    read_upload(reactor, server, handle);
}

/// Feed body chunks to the upload sink until the body is complete or the
/// socket would block.
fn read_upload(reactor: &mut Reactor<Server>, server: &mut Server, handle: Handle) {
    loop {
        let Some(conn) = server.connections.get_mut(handle) else {
            return;
        };
        let Phase::StreamingUpload(upload) = &mut conn.phase else {
            return;
        };

        let remaining = upload.remaining();
        if remaining == 0 {
            finish_upload(reactor, server, handle);
            return;
        }

        let want = remaining.min(server.scratch.len() as u64) as usize;
        match conn.stream.read(&mut server.scratch[..want]) {
            Ok(0) => {
                warn!(%handle, received = upload.received(), total = upload.total(), "Peer closed during upload");
                close(reactor, server, handle);
                return;
            }
            Ok(n) => {
                if let Err(e) = upload.feed(&server.scratch[..n]) {
                    warn!(%handle, error = %e, "Upload failed");
                    fail_upload(reactor, server, handle);
                    return;
                }
                trace!(
                    %handle,
                    progress = upload.received() * 100 / upload.total(),
                    carried = upload.carried(),
                    "Upload progress"
                );
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return,
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                debug!(%handle, error = %e, "Read failed");
                close(reactor, server, handle);
                return;
            }
        }
    }
}

fn finish_upload(reactor: &mut Reactor<Server>, server: &mut Server, handle: Handle) {
    let Some(conn) = server.connections.get_mut(handle) else {
        return;
    };
    let Phase::StreamingUpload(upload) = mem::replace(&mut conn.phase, Phase::Idle) else {
        return;
    };
    let close = conn.close_after;
    let dir = upload.dir().to_path_buf();

    match upload.finish() {
        Ok(files) => {
            info!(%handle, dir = %dir.display(), files = files.len(), "Upload complete");
            reply(reactor, server, handle, Reply::upload_ack(true, close), close);
        }
        Err(e) => {
            warn!(%handle, dir = %dir.display(), error = %e, "Upload failed");
            reply(reactor, server, handle, Reply::upload_ack(false, close), close);
        }
    }
}

/// Abandon an upload whose body has not been fully read. The connection is
/// closed after the failure page since the rest of the body is unparsed.
fn fail_upload(reactor: &mut Reactor<Server>, server: &mut Server, handle: Handle) {
    let Some(conn) = server.connections.get_mut(handle) else {
        return;
    };
    if let Phase::StreamingUpload(upload) = mem::replace(&mut conn.phase, Phase::Idle) {
        upload.abort();
    }
    reply(reactor, server, handle, Reply::upload_ack(false, true), true);
}

/// Stash input that arrives while a reply is being sent.
fn read_while_writing(reactor: &mut Reactor<Server>, server: &mut Server, handle: Handle) {
    loop {
        let Some(conn) = server.connections.get_mut(handle) else {
            return;
        };

        let limit = server.settings.max_header_size;
        if conn.pending.len() > limit {
            // Paused until the reply is done
            reactor.remove(handle, EventKind::Read);
            return;
        }
        let want = (limit + 1 - conn.pending.len()).min(server.scratch.len());

        match conn.stream.read(&mut server.scratch[..want]) {
            Ok(0) => {
                // Finish the reply, then hang up
                conn.close_after = true;
                reactor.remove(handle, EventKind::Read);
                return;
            }
            Ok(n) => conn.pending.extend_from_slice(&server.scratch[..n]),
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return,
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                debug!(%handle, error = %e, "Read failed");
                close(reactor, server, handle);
                return;
            }
        }
    }
}

/// Enter the writing phase and arm a one-shot write interest.
fn reply(reactor: &mut Reactor<Server>, server: &mut Server, handle: Handle, out: Reply, close: bool) {
    let Some(conn) = server.connections.get_mut(handle) else {
        return;
    };
    debug!(%handle, kind = out.kind(), status = %out.status(), close, "Replying");
    conn.close_after = close;
    conn.phase = Phase::Writing(out);
    arm_write(reactor, server, handle);
}

fn arm_write(reactor: &mut Reactor<Server>, server: &mut Server, handle: Handle) {
    match reactor.register(handle, EventKind::Write, false, on_writable) {
        Ok(()) | Err(RegistryError::AlreadyExists) => {}
        Err(e) => {
            warn!(%handle, error = %e, "Cannot schedule write");
            close(reactor, server, handle);
        }
    }
}

fn on_writable(reactor: &mut Reactor<Server>, server: &mut Server, handle: Handle) {
    let Some(conn) = server.connections.get_mut(handle) else {
        return;
    };
    let Phase::Writing(reply) = &mut conn.phase else {
        return;
    };

    match reply.write_to(&mut conn.stream) {
        Ok(Flush::Pending) => {
            if let Reply::File(stream) = reply {
                trace!(
                    %handle,
                    sent = stream.offset(),
                    progress = stream.progress(),
                    "Download progress"
                );
            }
            arm_write(reactor, server, handle);
        }
        Ok(Flush::Done) => finish_reply(reactor, server, handle),
        Err(e) => {
            debug!(%handle, error = %e, "Write failed");
            close(reactor, server, handle);
        }
    }
}

fn finish_reply(reactor: &mut Reactor<Server>, server: &mut Server, handle: Handle) {
    let Some(conn) = server.connections.get_mut(handle) else {
        return;
    };
    if conn.close_after {
        close(reactor, server, handle);
        return;
    }

    conn.phase = Phase::Idle;
    if reactor.find(handle, EventKind::Read).is_none() {
        // Reading was paused while the reply was written
        if let Err(e) = reactor.register(handle, EventKind::Read, true, on_readable) {
            warn!(%handle, error = %e, "Cannot resume reading");
            close(reactor, server, handle);
            return;
        }
    }

    // Serve anything that arrived while writing
    read_head(reactor, server, handle);
}

/// Tear down a connection: purge its interests, then drop the socket and
/// any open file.
fn close(reactor: &mut Reactor<Server>, server: &mut Server, handle: Handle) {
    let Some(conn) = server.connections.remove(handle) else {
        return;
    };
    reactor.detach(handle);

    let peer = conn.peer;
    let phase = conn.phase.name();
    if let Phase::StreamingUpload(upload) = conn.phase {
        upload.abort();
    }
    debug!(
        %handle,
        %peer,
        phase,
        connections = server.connections.len(),
        "Connection closed"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::io::Write;
    use std::net::Ipv4Addr;
    use std::thread::{self, JoinHandle};
    use std::time::Instant;

    const BOUNDARY: &str = "----WebKitFormBoundaryOG3Viw9MEZcexbvT";

    struct Harness {
        reactor: Reactor<Server>,
        server: Server,
        addr: SocketAddr,
        root: tempfile::TempDir,
    }

    fn harness() -> Harness {
        let root = tempfile::tempdir().unwrap();
        let listener = listener::bind(Ipv4Addr::LOCALHOST.into(), 0).unwrap();
        let settings = Settings {
            root: root.path().canonicalize().unwrap(),
            buffer_size: 8192,
            max_header_size: 16 * 1024,
        };
        let server = Server::new(listener, settings, 16);
        let mut reactor = Reactor::new(17, Duration::from_millis(10)).unwrap();
        server.start(&mut reactor).unwrap();
        let addr = server.local_addr().unwrap();
        Harness {
            reactor,
            server,
            addr,
            root,
        }
    }

    impl Harness {
        /// Drive the reactor until every client thread is done.
        fn pump<T>(&mut self, clients: Vec<JoinHandle<T>>) -> Vec<T> {
            let deadline = Instant::now() + Duration::from_secs(20);
            while !clients.iter().all(|c| c.is_finished()) {
                assert!(Instant::now() < deadline, "clients did not finish");
                self.reactor.poll_once(&mut self.server).unwrap();
            }
            clients.into_iter().map(|c| c.join().unwrap()).collect()
        }

        fn exchange(&mut self, request: Vec<u8>) -> Vec<u8> {
            let client = send(self.addr, request);
            self.pump(vec![client]).remove(0)
        }
    }

    /// Send `request` and read until the server closes.
    fn send(addr: SocketAddr, request: Vec<u8>) -> JoinHandle<Vec<u8>> {
        thread::spawn(move || {
            let mut stream = std::net::TcpStream::connect(addr).unwrap();
            stream.write_all(&request).unwrap();
            let mut out = Vec::new();
            stream.read_to_end(&mut out).unwrap();
            out
        })
    }

    fn get(path: &str) -> Vec<u8> {
        format!("GET {} HTTP/1.1\r\nHost: test\r\nConnection: close\r\n\r\n", path).into_bytes()
    }

    fn upload_request(target: &str, files: &[(&str, &[u8])]) -> Vec<u8> {
        let mut body = Vec::new();
        for (name, content) in files {
            body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
            body.extend_from_slice(
                format!(
                    "Content-Disposition: form-data; name=\"file\"; filename=\"{}\"\r\n\
                     Content-Type: application/octet-stream\r\n\r\n",
                    name
                )
                .as_bytes(),
            );
            body.extend_from_slice(content);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());

        let mut request = format!(
            "POST {} HTTP/1.1\r\nHost: test\r\nConnection: close\r\n\
             Content-Type: multipart/form-data; boundary={}\r\nContent-Length: {}\r\n\r\n",
            target,
            BOUNDARY,
            body.len()
        )
        .into_bytes();
        request.extend_from_slice(&body);
        request
    }

    /// Split a response into status line, head and body.
    fn split(response: &[u8]) -> (String, String, Vec<u8>) {
        let end = response
            .windows(4)
            .position(|w| w == b"\r\n\r\n")
            .expect("no head in response");
        let head = String::from_utf8(response[..end].to_vec()).unwrap();
        let status = head.lines().next().unwrap().to_string();
        (status, head, response[end + 4..].to_vec())
    }

    #[test]
    fn test_root_listing() {
        let mut h = harness();
        fs::write(h.root.path().join("a.txt"), b"hi").unwrap();
        fs::create_dir(h.root.path().join("sub")).unwrap();

        let response = h.exchange(get("/"));
        let (status, head, body) = split(&response);
        assert_eq!(status, "HTTP/1.1 200 OK");
        assert!(head.contains("Content-Type: text/html"));
        assert!(head.contains(&format!("Content-Length: {}", body.len())));

        let body = String::from_utf8(body).unwrap();
        assert!(body.contains("Index of /"));
        assert!(body.contains("<a href=\"sub/\">sub/</a>"));
        assert!(body.contains("<a href=\"a.txt\">a.txt</a>"));
    }

    #[test]
    fn test_download_large_file() {
        let mut h = harness();
        let content: Vec<u8> = (0..300_000u32).map(|i| (i % 241) as u8).collect();
        fs::create_dir(h.root.path().join("data")).unwrap();
        fs::write(h.root.path().join("data/blob.bin"), &content).unwrap();

        let response = h.exchange(get("/data/blob.bin"));
        let (status, head, body) = split(&response);
        assert_eq!(status, "HTTP/1.1 200 OK");
        assert!(head.contains("Content-Type: application/octet-stream"));
        assert!(head.contains("Content-Length: 300000"));
        assert_eq!(body, content);
    }

    #[test]
    fn test_concurrent_downloads() {
        let mut h = harness();
        let content = vec![b'x'; 200_000];
        fs::write(h.root.path().join("x.bin"), &content).unwrap();

        let clients = (0..4).map(|_| send(h.addr, get("/x.bin"))).collect();
        for response in h.pump(clients) {
            let (status, _, body) = split(&response);
            assert_eq!(status, "HTTP/1.1 200 OK");
            assert_eq!(body.len(), content.len());
        }
    }

    #[test]
    fn test_upload_into_subdirectory() {
        let mut h = harness();
        fs::create_dir(h.root.path().join("inbox")).unwrap();
        let big: Vec<u8> = (0..50_000u32).map(|i| (i % 13) as u8).collect();

        let request = upload_request("/upload?path=inbox", &[("a.txt", b"hello"), ("big.bin", &big)]);
        let response = h.exchange(request);
        let (status, _, body) = split(&response);
        assert_eq!(status, "HTTP/1.1 200 OK");
        assert!(String::from_utf8(body).unwrap().contains("Upload completed"));

        assert_eq!(fs::read(h.root.path().join("inbox/a.txt")).unwrap(), b"hello");
        assert_eq!(fs::read(h.root.path().join("inbox/big.bin")).unwrap(), big);
    }

    #[test]
    fn test_upload_without_content_length() {
        let mut h = harness();
        let request = format!(
            "POST /upload HTTP/1.1\r\nContent-Type: multipart/form-data; boundary={}\r\n\r\n",
            BOUNDARY
        );
        let response = h.exchange(request.into_bytes());
        let (status, head, _) = split(&response);
        assert_eq!(status, "HTTP/1.1 501 Not Implemented");
        assert!(head.contains("Connection: close"));
    }

    #[test]
    fn test_upload_without_filename_fails() {
        let mut h = harness();
        let body = format!(
            "--{b}\r\nContent-Disposition: form-data; name=\"note\"\r\n\r\nhi\r\n--{b}--\r\n",
            b = BOUNDARY
        );
        let request = format!(
            "POST /upload HTTP/1.1\r\nContent-Type: multipart/form-data; boundary={}\r\n\
             Content-Length: {}\r\n\r\n{}",
            BOUNDARY,
            body.len(),
            body
        );
        let response = h.exchange(request.into_bytes());
        let (status, _, body) = split(&response);
        assert_eq!(status, "HTTP/1.1 200 OK");
        assert!(String::from_utf8(body).unwrap().contains("Upload failed"));
    }

    #[test]
    fn test_not_found_and_bad_requests() {
        let mut h = harness();
        fs::create_dir(h.root.path().join("dir")).unwrap();

        for (request, expected) in [
            (get("/missing.txt"), "HTTP/1.1 404 Not Found"),
            (get("/dir"), "HTTP/1.1 404 Not Found"),
            (get("/nowhere/"), "HTTP/1.1 404 Not Found"),
            (get("/../etc/passwd"), "HTTP/1.1 400 Bad Request"),
            (b"GARBAGE\r\n\r\n".to_vec(), "HTTP/1.1 400 Bad Request"),
            (
                b"DELETE /a HTTP/1.1\r\n\r\n".to_vec(),
                "HTTP/1.1 501 Not Implemented",
            ),
        ] {
            let response = h.exchange(request);
            let (status, _, _) = split(&response);
            assert_eq!(status, expected);
        }
        assert_eq!(h.server.connections.len(), 0);
    }

    #[test]
    fn test_oversized_head() {
        let mut h = harness();
        let limit = h.server.settings.max_header_size;
        let mut request = b"GET / HTTP/1.1\r\nX-Fill: ".to_vec();
        request.resize(limit + 100, b'a');

        let response = h.exchange(request);
        let (status, head, _) = split(&response);
        assert_eq!(status, "HTTP/1.1 400 Bad Request");
        assert!(head.contains("Connection: close"));
        assert_eq!(h.server.connections.len(), 0);
    }

    #[test]
    fn test_empty_root_listing() {
        let mut h = harness();

        let response = h.exchange(get("/"));
        let (status, _, body) = split(&response);
        assert_eq!(status, "HTTP/1.1 200 OK");

        let body = String::from_utf8(body).unwrap();
        assert!(body.contains("Index of /"));
        assert_eq!(body.matches("<a ").count(), 0);
    }

    #[test]
    fn test_upload_boundary_split_across_reads() {
        let mut h = harness();
        let request = upload_request("/upload", &[("split.txt", b"hello")]);

        // The terminal boundary arrives in two separate segments
        let client = thread::spawn({
            let addr = h.addr;
            move || {
                let mut stream = std::net::TcpStream::connect(addr).unwrap();
                let cut = request.len() - 6;
                stream.write_all(&request[..cut]).unwrap();
                stream.flush().unwrap();
                thread::sleep(Duration::from_millis(200));
                stream.write_all(&request[cut..]).unwrap();
                let mut out = Vec::new();
                stream.read_to_end(&mut out).unwrap();
                out
            }
        });

        let response = h.pump(vec![client]).remove(0);
        let (status, _, body) = split(&response);
        assert_eq!(status, "HTTP/1.1 200 OK");
        assert!(String::from_utf8(body).unwrap().contains("Upload completed"));
        assert_eq!(fs::read(h.root.path().join("split.txt")).unwrap(), b"hello");
    }

    #[test]
    fn test_keep_alive_serves_stashed_request() {
        let mut h = harness();
        fs::write(h.root.path().join("one.txt"), b"first").unwrap();
        fs::write(h.root.path().join("two.txt"), b"second").unwrap();

        let mut request = b"GET /one.txt HTTP/1.1\r\nHost: test\r\n\r\n".to_vec();
        request.extend_from_slice(&get("/two.txt"));

        let response = h.exchange(request);
        let text = String::from_utf8(response).unwrap();
        let first = text.find("first").unwrap();
        let second = text.find("second").unwrap();
        assert!(first < second);
        assert_eq!(text.matches("HTTP/1.1 200 OK").count(), 2);
    }
}
