//! In-memory index of record pointers, built once at startup.

use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::uri::uri_equals;
use crate::warc::{RecordKind, WarcReader, WarcRecord};

/// Lightweight reference to one archived record: enough to find it again,
/// nothing more. Pointers are immutable once built.
#[derive(Debug, Clone)]
pub struct RecordPointer {
    /// Raw capture URI, stored as-is (no validation, no dedup).
    pub uri: Option<String>,
    /// Byte position of the record within `source_file`.
    pub offset: u64,
    pub kind: RecordKind,
    pub source_file: PathBuf,
}

/// All pointers from the scanned containers, plus the response-only view used
/// for matching. Append-only during [`ReplayIndex::build`], read-only after.
#[derive(Debug, Default)]
pub struct ReplayIndex {
    pointers: Vec<RecordPointer>,
    responses: Vec<usize>,
}

impl ReplayIndex {
    /// Scans every container end-to-end. Individual records that fail to
    /// decode are logged and skipped; the scan continues.
    pub fn build(container_files: &[PathBuf]) -> Result<Self> {
        let mut index = Self::default();
        for path in container_files {
            index.load_container(path)?;
        }
        Ok(index)
    }

    fn load_container(&mut self, path: &Path) -> Result<()> {
        let reader = WarcReader::open(path)?;
        let mut loaded = 0usize;
        let mut skipped = 0usize;
        for item in reader {
            match item {
                Ok(record) => {
                    self.push(RecordPointer {
                        uri: record.target_uri.clone(),
                        offset: record.offset,
                        kind: record.kind.clone(),
                        source_file: path.to_path_buf(),
                    });
                    loaded += 1;
                }
                Err(err) => {
                    tracing::warn!(file = %path.display(), error = %err, "skipping undecodable record");
                    skipped += 1;
                }
            }
        }
        tracing::info!(file = %path.display(), loaded, skipped, "container scanned");
        Ok(())
    }

    fn push(&mut self, pointer: RecordPointer) {
        if pointer.kind.is_response() {
            self.responses.push(self.pointers.len());
        }
        self.pointers.push(pointer);
    }

    /// Every pointer, in scan order.
    #[must_use]
    pub fn pointers(&self) -> &[RecordPointer] {
        &self.pointers
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.pointers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pointers.is_empty()
    }

    #[must_use]
    pub fn response_count(&self) -> usize {
        self.responses.len()
    }

    /// First response pointer whose stored URI matches `request_uri` with the
    /// scheme ignored. Linear scan in insertion order, so duplicate captures
    /// resolve to the earliest one.
    #[must_use]
    pub fn find_response(&self, request_uri: &str) -> Option<&RecordPointer> {
        self.responses
            .iter()
            .map(|&idx| &self.pointers[idx])
            .find(|pointer| {
                pointer
                    .uri
                    .as_deref()
                    .is_some_and(|stored| uri_equals(stored, request_uri, true))
            })
    }

    /// Fetches the full record behind a pointer. Opens a fresh handle on the
    /// container, decodes exactly one record at the stored offset, and drops
    /// the handle before returning.
    pub fn fetch(&self, pointer: &RecordPointer) -> Result<WarcRecord> {
        fetch_record(&pointer.source_file, pointer.offset)
    }
}

/// Standalone retrieval by file and offset; see [`ReplayIndex::fetch`].
pub fn fetch_record(source_file: &Path, offset: u64) -> Result<WarcRecord> {
    WarcReader::open(source_file)?.record_at(offset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn record(kind: &str, uri: &str, block: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        write!(
            out,
            "WARC/1.0\r\nWARC-Type: {kind}\r\nWARC-Target-URI: {uri}\r\n\
             Content-Type: application/http;msgtype={kind}\r\nContent-Length: {}\r\n\r\n",
            block.len()
        )
        .expect("head");
        out.extend_from_slice(block);
        out.extend_from_slice(b"\r\n\r\n");
        out
    }

    fn container(records: &[Vec<u8>]) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("capture.warc");
        let mut bytes = Vec::new();
        for r in records {
            bytes.extend_from_slice(r);
        }
        std::fs::write(&path, bytes).expect("write container");
        (dir, path)
    }

    #[test]
    fn only_responses_enter_the_match_view() {
        let (_dir, path) = container(&[
            record("warcinfo", "warcinfo:/capture.warc", b"software: test\r\n"),
            record("request", "http://example.com/", b"GET / HTTP/1.1\r\n\r\n"),
            record("response", "http://example.com/", b"HTTP/1.1 200 OK\r\n\r\nok"),
            record("metadata", "http://example.com/", b"via: crawler"),
        ]);
        let index = ReplayIndex::build(&[path]).expect("build");
        assert_eq!(index.len(), 4);
        assert_eq!(index.response_count(), 1);
        assert!(index.find_response("https://example.com/").is_some());
        assert!(index.find_response("https://example.com/missing").is_none());
    }

    #[test]
    fn lookup_is_order_stable_for_duplicate_uris() {
        let (_dir, path) = container(&[
            record("response", "http://dup.example/page", b"HTTP/1.1 200 OK\r\n\r\nfirst"),
            record("response", "http://dup.example/page", b"HTTP/1.1 200 OK\r\n\r\nsecond"),
        ]);
        let index = ReplayIndex::build(&[path]).expect("build");
        let hit = index
            .find_response("https://dup.example/page")
            .expect("duplicate uri matches");
        assert_eq!(hit.offset, 0);
        let fetched = index.fetch(hit).expect("fetch");
        assert!(fetched.block.ends_with(b"first"));
    }

    #[test]
    fn build_survives_corrupt_records() {
        let good_a = record("response", "http://a/", b"HTTP/1.1 200 OK\r\n\r\nA");
        let garbage = b"NOT A RECORD AT ALL\r\n\r\n".to_vec();
        let good_b = record("response", "http://b/", b"HTTP/1.1 200 OK\r\n\r\nB");
        let (_dir, path) = container(&[good_a, garbage, good_b]);

        let index = ReplayIndex::build(&[path]).expect("build tolerates bad records");
        assert_eq!(index.response_count(), 2);
        assert!(index.find_response("http://b/").is_some());
    }

    #[test]
    fn fetch_roundtrips_through_stored_offset() {
        let (_dir, path) = container(&[
            record("response", "http://one/", b"HTTP/1.1 200 OK\r\n\r\none"),
            record("response", "http://two/", b"HTTP/1.1 200 OK\r\n\r\ntwo"),
        ]);
        let index = ReplayIndex::build(&[path]).expect("build");
        let pointer = index.find_response("http://two/").expect("hit");
        assert!(pointer.offset > 0);
        let rec = index.fetch(pointer).expect("fetch");
        assert_eq!(rec.target_uri.as_deref(), Some("http://two/"));
        assert_eq!(rec.offset, pointer.offset);
    }
}
