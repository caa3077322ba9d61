//! Forward-proxy replay sessions.
//!
//! One task per accepted connection. A session cycles through
//! awaiting-request → request-parsed → responding for as long as the client
//! keeps the connection open. `CONNECT host:port` establishes the authority
//! that later origin-form requests on the same connection resolve against;
//! the tunnel carries plain HTTP (TLS termination is out of scope). Misses
//! and retrieval failures both answer with the literal 404 below and leave
//! the connection open.

use std::sync::Arc;

use memchr::memmem;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use crate::error::{ReplayError, Result};
use crate::index::ReplayIndex;
use crate::response::reconstruct;
use crate::uri::{absolute_record_uri, canonical_record_uri};

const NOT_FOUND_BODY: &str = "URL not found in archives.";
const CONNECT_ESTABLISHED: &[u8] = b"HTTP/1.0 200 Connection established\r\n\r\n";
const MAX_REQUEST_HEADERS: usize = 64;
const READ_CHUNK: usize = 4096;

/// The literal miss response: body plus trailing CRLF, with the declared
/// length covering both.
#[must_use]
pub fn not_found_bytes() -> Vec<u8> {
    format!(
        "HTTP/1.0 404 Not Found\r\nConnection: keep-alive\r\nContent-Type: text/plain\r\nContent-Length: {}\r\n\r\n{NOT_FOUND_BODY}\r\n",
        NOT_FOUND_BODY.len() + 2
    )
    .into_bytes()
}

/// Accept loop: one spawned session per connection, all sharing the
/// read-only index.
pub async fn serve(listener: TcpListener, index: Arc<ReplayIndex>) -> Result<()> {
    loop {
        let (stream, peer) = listener.accept().await?;
        tracing::debug!(%peer, "accepted connection");
        let index = index.clone();
        tokio::spawn(async move {
            let mut session = ReplaySession::new(index);
            if let Err(err) = session.run(stream).await {
                tracing::debug!(%peer, error = %err, "session closed");
            }
        });
    }
}

#[derive(Debug)]
struct ParsedRequest {
    method: String,
    target: String,
    host: Option<String>,
    content_length: usize,
}

/// Per-connection protocol state. The only thing carried across requests is
/// the authority established by CONNECT.
pub struct ReplaySession {
    index: Arc<ReplayIndex>,
    authority: Option<String>,
}

impl ReplaySession {
    #[must_use]
    pub fn new(index: Arc<ReplayIndex>) -> Self {
        Self {
            index,
            authority: None,
        }
    }

    /// Drives the connection until the client disconnects or a protocol
    /// error makes the byte stream unusable.
    pub async fn run(&mut self, mut stream: TcpStream) -> Result<()> {
        let mut buf: Vec<u8> = Vec::with_capacity(READ_CHUNK);
        loop {
            let head_end = match read_request_head(&mut stream, &mut buf).await? {
                Some(end) => end,
                None => return Ok(()), // client closed between requests
            };
            let request = parse_request_head(&buf[..head_end])?;
            drain_request_body(&mut stream, &mut buf, head_end, request.content_length).await?;

            if request.method.eq_ignore_ascii_case("CONNECT") {
                tracing::debug!(authority = %request.target, "tunnel established");
                self.authority = Some(request.target);
                stream.write_all(CONNECT_ESTABLISHED).await?;
                continue;
            }

            match self.record_uri_for(&request) {
                Some(uri) => self.respond(&mut stream, &uri).await?,
                None => {
                    tracing::info!(target = %request.target, "no authority for request");
                    stream.write_all(&not_found_bytes()).await?;
                }
            }
        }
    }

    /// Canonical record URI for a parsed request: absolute-form targets are
    /// used as-is, origin-form targets merge with the tunnel authority (or,
    /// failing that, the Host header on port 80 semantics).
    fn record_uri_for(&self, request: &ParsedRequest) -> Option<String> {
        if request.target.contains("://") {
            return Some(absolute_record_uri(&request.target));
        }
        if let Some(authority) = &self.authority {
            return Some(canonical_record_uri(authority, &request.target));
        }
        request
            .host
            .as_ref()
            .map(|host| absolute_record_uri(&format!("http://{host}{}", request.target)))
    }

    async fn respond(&self, stream: &mut TcpStream, record_uri: &str) -> Result<()> {
        let Some(pointer) = self.index.find_response(record_uri) else {
            tracing::info!(uri = %record_uri, "miss");
            stream.write_all(&not_found_bytes()).await?;
            return Ok(());
        };
        let reconstructed = self
            .index
            .fetch(pointer)
            .and_then(|record| reconstruct(&record.block));
        match reconstructed {
            Ok(response) => {
                tracing::debug!(uri = %record_uri, offset = pointer.offset, "replaying record");
                stream.write_all(&response.to_bytes()).await?;
            }
            Err(err) => {
                // Fatal for this request only; the session keeps serving.
                tracing::warn!(uri = %record_uri, error = %err, "retrieval failed");
                stream.write_all(&not_found_bytes()).await?;
            }
        }
        Ok(())
    }
}

/// Reads from the stream until `buf` holds a complete request head, returning
/// the index one past the blank line. `None` means the client closed with no
/// pending request.
async fn read_request_head(stream: &mut TcpStream, buf: &mut Vec<u8>) -> Result<Option<usize>> {
    loop {
        if let Some(idx) = memmem::find(buf, b"\r\n\r\n") {
            return Ok(Some(idx + 4));
        }
        let mut chunk = [0u8; READ_CHUNK];
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            if buf.is_empty() {
                return Ok(None);
            }
            return Err(ReplayError::InvalidRequest {
                reason: "connection closed mid-request".to_string(),
            });
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

fn parse_request_head(head: &[u8]) -> Result<ParsedRequest> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_REQUEST_HEADERS];
    let mut req = httparse::Request::new(&mut headers);
    match req.parse(head) {
        Ok(httparse::Status::Complete(_)) => {}
        Ok(httparse::Status::Partial) => {
            return Err(ReplayError::InvalidRequest {
                reason: "incomplete request head".to_string(),
            });
        }
        Err(err) => {
            return Err(ReplayError::InvalidRequest {
                reason: err.to_string(),
            });
        }
    }
    let method = req
        .method
        .ok_or_else(|| ReplayError::InvalidRequest {
            reason: "missing method".to_string(),
        })?
        .to_string();
    let target = req
        .path
        .ok_or_else(|| ReplayError::InvalidRequest {
            reason: "missing request target".to_string(),
        })?
        .to_string();
    let mut host = None;
    let mut content_length = 0usize;
    for header in req.headers.iter() {
        if header.name.eq_ignore_ascii_case("host") {
            host = Some(String::from_utf8_lossy(header.value).trim().to_string());
        } else if header.name.eq_ignore_ascii_case("content-length") {
            content_length = String::from_utf8_lossy(header.value)
                .trim()
                .parse()
                .unwrap_or(0);
        }
    }
    Ok(ParsedRequest {
        method,
        target,
        host,
        content_length,
    })
}

/// Discards the request body so keep-alive framing survives, then removes the
/// whole request from the buffer.
async fn drain_request_body(
    stream: &mut TcpStream,
    buf: &mut Vec<u8>,
    head_end: usize,
    content_length: usize,
) -> Result<()> {
    let buffered_body = buf.len() - head_end;
    if buffered_body < content_length {
        let mut remaining = content_length - buffered_body;
        let mut chunk = [0u8; READ_CHUNK];
        while remaining > 0 {
            let n = stream.read(&mut chunk[..remaining.min(READ_CHUNK)]).await?;
            if n == 0 {
                return Err(ReplayError::InvalidRequest {
                    reason: "connection closed mid-body".to_string(),
                });
            }
            remaining -= n;
        }
        buf.drain(..);
    } else {
        buf.drain(..head_end + content_length);
    }
    Ok(())
}
