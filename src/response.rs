//! Reconstruction of archived HTTP responses into live wire format.
//!
//! The archived status line and header casing/order are preserved. Headers
//! that would interfere with live delivery (framing, caching, validators) are
//! dropped from the live set, but every original header survives verbatim
//! under the `X-Archive-Orig-` prefix, so nothing is lost. Framing is
//! recomputed: a fresh `Content-Length` from the decoded body, and
//! `Connection: keep-alive`.

use memchr::memmem;

use crate::error::{ReplayError, Result};

/// Prefix applied to every archived header when it is re-emitted.
pub const ARCHIVE_HEADER_PREFIX: &str = "X-Archive-Orig-";

/// Headers excluded from the live header block (case-insensitive).
const FILTERED_HEADERS: [&str; 7] = [
    "connection",
    "content-length",
    "cache-control",
    "accept-ranges",
    "etag",
    "last-modified",
    "transfer-encoding",
];

const MAX_HEADERS: usize = 128;

/// An outgoing response ready to serialize: status line, ordered headers and
/// the decoded body.
#[derive(Debug, Clone)]
pub struct ReconstructedResponse {
    pub status_line: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl ReconstructedResponse {
    /// Serializes to wire format: status line, CRLF-separated headers, blank
    /// line, body bytes verbatim.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.body.len() + 512);
        out.extend_from_slice(self.status_line.as_bytes());
        out.extend_from_slice(b"\r\n");
        let lines: Vec<String> = self
            .headers
            .iter()
            .map(|(k, v)| format!("{k}: {v}"))
            .collect();
        out.extend_from_slice(lines.join("\r\n").as_bytes());
        out.extend_from_slice(b"\r\n\r\n");
        out.extend_from_slice(&self.body);
        out
    }
}

/// Parses archived raw response bytes and rebuilds the outgoing response per
/// the filtering policy above.
pub fn reconstruct(raw: &[u8]) -> Result<ReconstructedResponse> {
    let mut parsed_headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut parsed = httparse::Response::new(&mut parsed_headers);
    let head_len = match parsed.parse(raw) {
        Ok(httparse::Status::Complete(n)) => n,
        Ok(httparse::Status::Partial) => {
            return Err(ReplayError::InvalidResponse {
                reason: "truncated response head".to_string(),
            });
        }
        Err(err) => {
            return Err(ReplayError::InvalidResponse {
                reason: err.to_string(),
            });
        }
    };

    let version = match parsed.version {
        Some(0) => "HTTP/1.0",
        _ => "HTTP/1.1",
    };
    let code = parsed.code.ok_or_else(|| ReplayError::InvalidResponse {
        reason: "missing status code".to_string(),
    })?;
    let reason = parsed.reason.unwrap_or("");
    let status_line = format!("{version} {code} {reason}");

    let archived: Vec<(String, String)> = parsed
        .headers
        .iter()
        .map(|h| {
            (
                h.name.to_string(),
                String::from_utf8_lossy(h.value).into_owned(),
            )
        })
        .collect();

    let body = decode_body(&archived, &raw[head_len..])?;

    let mut live: Vec<(String, String)> = Vec::with_capacity(archived.len() + 2);
    let mut originals: Vec<(String, String)> = Vec::with_capacity(archived.len());
    for (name, value) in &archived {
        let lowered = name.to_ascii_lowercase();
        if !FILTERED_HEADERS.contains(&lowered.as_str()) {
            live.push((name.clone(), value.clone()));
        }
        originals.push((format!("{ARCHIVE_HEADER_PREFIX}{name}"), value.clone()));
    }
    live.push(("Content-Length".to_string(), body.len().to_string()));
    live.push(("Connection".to_string(), "keep-alive".to_string()));
    live.extend(originals);

    Ok(ReconstructedResponse {
        status_line,
        headers: live,
        body,
    })
}

fn header_value<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// Decodes the archived body: chunked transfer coding is unwrapped,
/// Content-Length bodies are bounded by the declared length, anything else is
/// taken to end of record.
fn decode_body(headers: &[(String, String)], rest: &[u8]) -> Result<Vec<u8>> {
    if header_value(headers, "transfer-encoding")
        .is_some_and(|v| v.to_ascii_lowercase().contains("chunked"))
    {
        return decode_chunked(rest);
    }
    if let Some(declared) = header_value(headers, "content-length").and_then(|v| v.trim().parse::<usize>().ok()) {
        return Ok(rest[..declared.min(rest.len())].to_vec());
    }
    Ok(rest.to_vec())
}

fn decode_chunked(data: &[u8]) -> Result<Vec<u8>> {
    let invalid = |reason: &str| ReplayError::InvalidResponse {
        reason: reason.to_string(),
    };
    let mut out = Vec::new();
    let mut pos = 0usize;
    loop {
        let line_end =
            memmem::find(&data[pos..], b"\r\n").ok_or_else(|| invalid("missing chunk size line"))?;
        let size_line = std::str::from_utf8(&data[pos..pos + line_end])
            .map_err(|_| invalid("chunk size line is not utf-8"))?;
        let size_token = size_line.split(';').next().unwrap_or("").trim();
        let size = usize::from_str_radix(size_token, 16)
            .map_err(|_| invalid("unparseable chunk size"))?;
        pos += line_end + 2;
        if size == 0 {
            // Trailers, if any, are not carried over.
            break;
        }
        let end = pos
            .checked_add(size)
            .filter(|e| *e <= data.len())
            .ok_or_else(|| invalid("chunk data truncated"))?;
        out.extend_from_slice(&data[pos..end]);
        pos = end;
        if data[pos..].starts_with(b"\r\n") {
            pos += 2;
        }
    }
    Ok(out)
}
