//! WARC container decoding.
//!
//! A container file is a sequence of WARC records, either stored plain or
//! gzip-compressed with one gzip member per record. The reader memory-maps
//! the file read-only and walks it in place; offsets handed out (and accepted
//! by [`WarcReader::record_at`]) are byte positions in the file as stored on
//! disk, i.e. compressed positions for `.warc.gz` containers.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use flate2::bufread::GzDecoder;
use memchr::memmem;
use memmap2::Mmap;

use crate::error::{ReplayError, Result};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Value of the `WARC-Type` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordKind {
    Response,
    Request,
    Warcinfo,
    Revisit,
    Metadata,
    Resource,
    Conversion,
    Continuation,
    Other(String),
}

impl RecordKind {
    #[must_use]
    pub fn from_warc_type(value: &str) -> Self {
        match value.trim() {
            "response" => Self::Response,
            "request" => Self::Request,
            "warcinfo" => Self::Warcinfo,
            "revisit" => Self::Revisit,
            "metadata" => Self::Metadata,
            "resource" => Self::Resource,
            "conversion" => Self::Conversion,
            "continuation" => Self::Continuation,
            other => Self::Other(other.to_string()),
        }
    }

    /// Only response records participate in replay matching.
    #[must_use]
    pub fn is_response(&self) -> bool {
        matches!(self, Self::Response)
    }

    #[must_use]
    pub fn label(&self) -> &str {
        match self {
            Self::Response => "response",
            Self::Request => "request",
            Self::Warcinfo => "warcinfo",
            Self::Revisit => "revisit",
            Self::Metadata => "metadata",
            Self::Resource => "resource",
            Self::Conversion => "conversion",
            Self::Continuation => "continuation",
            Self::Other(s) => s,
        }
    }
}

/// One fully decoded record, including its content block.
#[derive(Debug, Clone)]
pub struct WarcRecord {
    /// Byte position of the record in its source file.
    pub offset: u64,
    pub kind: RecordKind,
    pub target_uri: Option<String>,
    pub content_type: Option<String>,
    /// All named headers in file order.
    pub headers: Vec<(String, String)>,
    /// The content block, e.g. raw HTTP response bytes for response records.
    pub block: Vec<u8>,
}

/// Streaming reader over a single container file.
///
/// Iterating yields every record in file order; records that fail to decode
/// yield an `Err` item and the reader resynchronizes on the next record
/// boundary so the scan can continue.
pub struct WarcReader {
    map: Mmap,
    path: PathBuf,
    compressed: bool,
    pos: usize,
}

impl WarcReader {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        // Mapping is read-only and the file is never mutated by this process.
        let map = unsafe { Mmap::map(&file)? };
        let compressed = map.len() >= 2 && map[..2] == GZIP_MAGIC;
        Ok(Self {
            map,
            path,
            compressed,
            pos: 0,
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn is_compressed(&self) -> bool {
        self.compressed
    }

    /// Decodes exactly one record starting at `offset` without touching the
    /// iteration cursor. This is the retrieval path: the caller opens a fresh
    /// reader, fetches one record, and drops the handle.
    pub fn record_at(&self, offset: u64) -> Result<WarcRecord> {
        let start = usize::try_from(offset).map_err(|_| self.retrieval_err(offset, "offset out of range"))?;
        if start >= self.map.len() {
            return Err(self.retrieval_err(offset, "offset beyond end of file"));
        }
        let (record, _) = self
            .decode_at(start)
            .map_err(|err| self.retrieval_err(offset, &err.to_string()))?;
        Ok(record)
    }

    /// Decodes the record at `start`, returning it plus the number of stored
    /// bytes it occupies.
    fn decode_at(&self, start: usize) -> Result<(WarcRecord, usize)> {
        if self.compressed {
            let before = &self.map[start..];
            let mut decoder = GzDecoder::new(before);
            let mut plain = Vec::new();
            decoder
                .read_to_end(&mut plain)
                .map_err(|err| self.record_err(start, &format!("gzip member: {err}")))?;
            let consumed = before.len() - decoder.into_inner().len();
            if consumed == 0 {
                return Err(self.record_err(start, "empty gzip member"));
            }
            let (record, _) = self.parse_record(&plain, start)?;
            Ok((record, consumed))
        } else {
            self.parse_record(&self.map[start..], start)
        }
    }

    fn parse_record(&self, bytes: &[u8], offset: usize) -> Result<(WarcRecord, usize)> {
        if !bytes.starts_with(b"WARC/") {
            return Err(self.record_err(offset, "missing WARC version line"));
        }
        let head_end = memmem::find(bytes, b"\r\n\r\n")
            .ok_or_else(|| self.record_err(offset, "unterminated record header"))?;
        let head = std::str::from_utf8(&bytes[..head_end])
            .map_err(|_| self.record_err(offset, "record header is not utf-8"))?;

        let mut headers: Vec<(String, String)> = Vec::new();
        for line in head.split("\r\n").skip(1) {
            if let Some(rest) = line.strip_prefix(|c: char| c == ' ' || c == '\t') {
                // Continuation line folds into the previous header value.
                if let Some(last) = headers.last_mut() {
                    last.1.push(' ');
                    last.1.push_str(rest.trim());
                }
                continue;
            }
            let Some((name, value)) = line.split_once(':') else {
                return Err(self.record_err(offset, "malformed record header line"));
            };
            headers.push((name.trim().to_string(), value.trim().to_string()));
        }

        let header = |name: &str| {
            headers
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(name))
                .map(|(_, v)| v.clone())
        };
        let length: usize = header("Content-Length")
            .ok_or_else(|| self.record_err(offset, "record without Content-Length"))?
            .parse()
            .map_err(|_| self.record_err(offset, "unparseable Content-Length"))?;

        let block_start = head_end + 4;
        let block_end = block_start
            .checked_add(length)
            .filter(|end| *end <= bytes.len())
            .ok_or_else(|| self.record_err(offset, "content block truncated"))?;
        let block = bytes[block_start..block_end].to_vec();

        // Records are separated by two CRLFs; tolerate however many follow.
        let mut consumed = block_end;
        while bytes[consumed..].starts_with(b"\r\n") {
            consumed += 2;
        }

        let kind = header("WARC-Type")
            .map(|v| RecordKind::from_warc_type(&v))
            .unwrap_or_else(|| RecordKind::Other(String::new()));

        Ok((
            WarcRecord {
                offset: offset as u64,
                kind,
                target_uri: header("WARC-Target-URI"),
                content_type: header("Content-Type"),
                headers,
                block,
            },
            consumed,
        ))
    }

    /// Advances to the next plausible record boundary after a decode error.
    fn resync(&mut self) {
        let from = self.pos + 1;
        if from >= self.map.len() {
            self.pos = self.map.len();
            return;
        }
        let next = if self.compressed {
            memmem::find(&self.map[from..], &[0x1f, 0x8b, 0x08]).map(|idx| from + idx)
        } else {
            memmem::find(&self.map[from..], b"\r\nWARC/").map(|idx| from + idx + 2)
        };
        self.pos = next.unwrap_or(self.map.len());
    }

    fn record_err(&self, offset: usize, reason: &str) -> ReplayError {
        ReplayError::InvalidRecord {
            file: self.path.clone(),
            offset: offset as u64,
            reason: reason.to_string(),
        }
    }

    fn retrieval_err(&self, offset: u64, reason: &str) -> ReplayError {
        ReplayError::Retrieval {
            file: self.path.clone(),
            offset,
            reason: reason.to_string(),
        }
    }
}

impl Iterator for WarcReader {
    type Item = Result<WarcRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.map.len() {
            return None;
        }
        match self.decode_at(self.pos) {
            Ok((record, consumed)) => {
                self.pos += consumed;
                Some(Ok(record))
            }
            Err(err) => {
                self.resync();
                Some(Err(err))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    pub(crate) fn record_bytes(kind: &str, uri: &str, block: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        write!(
            out,
            "WARC/1.0\r\nWARC-Type: {kind}\r\nWARC-Record-ID: <urn:uuid:0>\r\n\
             WARC-Target-URI: {uri}\r\nContent-Type: application/http;msgtype={kind}\r\n\
             Content-Length: {}\r\n\r\n",
            block.len()
        )
        .expect("write record head");
        out.extend_from_slice(block);
        out.extend_from_slice(b"\r\n\r\n");
        out
    }

    pub(crate) fn gzip_member(bytes: &[u8]) -> Vec<u8> {
        let mut enc = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        enc.write_all(bytes).expect("gzip write");
        enc.finish().expect("gzip finish")
    }

    fn write_temp(bytes: &[u8]) -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("fixture.warc");
        std::fs::write(&path, bytes).expect("write fixture");
        (dir, path)
    }

    #[test]
    fn scans_plain_container() {
        let mut bytes = record_bytes("response", "http://example.com/a", b"HTTP/1.1 200 OK\r\n\r\nhi");
        let second_offset = bytes.len() as u64;
        bytes.extend(record_bytes("request", "http://example.com/a", b"GET /a HTTP/1.1\r\n\r\n"));
        let (_dir, path) = write_temp(&bytes);

        let records: Vec<_> = WarcReader::open(&path)
            .expect("open")
            .collect::<Result<Vec<_>>>()
            .expect("decode all");
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].offset, 0);
        assert!(records[0].kind.is_response());
        assert_eq!(records[0].target_uri.as_deref(), Some("http://example.com/a"));
        assert_eq!(records[0].block, b"HTTP/1.1 200 OK\r\n\r\nhi");
        assert_eq!(records[1].offset, second_offset);
        assert_eq!(records[1].kind, RecordKind::Request);
    }

    #[test]
    fn scans_gzip_container_with_member_offsets() {
        let first = gzip_member(&record_bytes("response", "http://a/", b"HTTP/1.1 200 OK\r\n\r\nA"));
        let second = gzip_member(&record_bytes("response", "http://b/", b"HTTP/1.1 200 OK\r\n\r\nB"));
        let second_offset = first.len() as u64;
        let mut bytes = first;
        bytes.extend(&second);
        let (_dir, path) = write_temp(&bytes);

        let reader = WarcReader::open(&path).expect("open");
        assert!(reader.is_compressed());
        let records: Vec<_> = reader.collect::<Result<Vec<_>>>().expect("decode all");
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].offset, second_offset);

        // A fresh handle can decode one record straight from the offset.
        let fetched = WarcReader::open(&path)
            .expect("reopen")
            .record_at(second_offset)
            .expect("record at offset");
        assert_eq!(fetched.target_uri.as_deref(), Some("http://b/"));
        assert_eq!(fetched.block, b"HTTP/1.1 200 OK\r\n\r\nB");
    }

    #[test]
    fn resyncs_after_corrupt_record() {
        let mut bytes = record_bytes("response", "http://ok/first", b"HTTP/1.1 200 OK\r\n\r\n1");
        bytes.extend_from_slice(b"GARBAGE NOT A RECORD\r\n\r\n");
        bytes.extend(record_bytes("response", "http://ok/second", b"HTTP/1.1 200 OK\r\n\r\n2"));
        let (_dir, path) = write_temp(&bytes);

        let items: Vec<_> = WarcReader::open(&path).expect("open").collect();
        let ok: Vec<_> = items.iter().filter(|r| r.is_ok()).collect();
        let err_count = items.iter().filter(|r| r.is_err()).count();
        assert_eq!(ok.len(), 2);
        assert!(err_count >= 1);
    }

    #[test]
    fn record_at_bad_offset_is_a_retrieval_error() {
        let bytes = record_bytes("response", "http://x/", b"HTTP/1.1 200 OK\r\n\r\nx");
        let (_dir, path) = write_temp(&bytes);
        let reader = WarcReader::open(&path).expect("open");
        let err = reader.record_at(7).expect_err("mid-record offset");
        assert!(matches!(err, ReplayError::Retrieval { .. }));
        let err = reader.record_at(1 << 40).expect_err("past end");
        assert!(matches!(err, ReplayError::Retrieval { .. }));
    }
}
