//! Reader for the columnar CDX text index format.
//!
//! A CDX file starts with a header line whose first token is the literal
//! `CDX`, followed by single-letter field codes declaring the column order.
//! Every following line carries whitespace-separated values mapped
//! positionally onto those codes. This is an offline inspection tool; the
//! live replay path never consults it.

use std::fs;
use std::io::Read;
use std::path::Path;

use flate2::bufread::GzDecoder;

use crate::error::{ReplayError, Result};

/// Known single-letter codes and the entry fields they populate.
pub const CDX_FIELDS: [(&str, &str); 11] = [
    ("N", "massaged_url"),
    ("b", "date"),
    ("a", "original_url"),
    ("m", "mime_type"),
    ("s", "response_code"),
    ("k", "new_style_checksum"),
    ("r", "redirect"),
    ("M", "meta_tags"),
    ("S", "compressed_record_size"),
    ("V", "compressed_arc_file_offset"),
    ("g", "file_name"),
];

/// Placeholder emitted for unknown codes and unpopulated fields.
pub const CDX_PLACEHOLDER: &str = "-";

/// One parsed capture description. Fields that were absent from the parsed
/// line (or whose code was never declared) stay `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CdxEntry {
    pub massaged_url: Option<String>,
    pub date: Option<String>,
    pub original_url: Option<String>,
    pub mime_type: Option<String>,
    pub response_code: Option<String>,
    pub new_style_checksum: Option<String>,
    pub redirect: Option<String>,
    pub meta_tags: Option<String>,
    pub compressed_record_size: Option<String>,
    pub compressed_arc_file_offset: Option<String>,
    pub file_name: Option<String>,
}

impl CdxEntry {
    /// Builds an entry from positional (code, value) pairs. A code repeated
    /// in the pairs overwrites the earlier value, matching how a duplicate
    /// header column wins in declaration order.
    #[must_use]
    pub fn from_fields<'a, I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut entry = Self::default();
        for (code, value) in pairs {
            entry.set(code, value);
        }
        entry
    }

    fn set(&mut self, code: &str, value: &str) {
        let slot = match code {
            "N" => &mut self.massaged_url,
            "b" => &mut self.date,
            "a" => &mut self.original_url,
            "m" => &mut self.mime_type,
            "s" => &mut self.response_code,
            "k" => &mut self.new_style_checksum,
            "r" => &mut self.redirect,
            "M" => &mut self.meta_tags,
            "S" => &mut self.compressed_record_size,
            "V" => &mut self.compressed_arc_file_offset,
            "g" => &mut self.file_name,
            _ => return,
        };
        *slot = Some(value.to_string());
    }

    /// Field value for a code, if the code is known and populated.
    #[must_use]
    pub fn get(&self, code: &str) -> Option<&str> {
        let slot = match code {
            "N" => &self.massaged_url,
            "b" => &self.date,
            "a" => &self.original_url,
            "m" => &self.mime_type,
            "s" => &self.response_code,
            "k" => &self.new_style_checksum,
            "r" => &self.redirect,
            "M" => &self.meta_tags,
            "S" => &self.compressed_record_size,
            "V" => &self.compressed_arc_file_offset,
            "g" => &self.file_name,
            _ => return None,
        };
        slot.as_deref()
    }

    /// Serializes the entry in an arbitrary field order. Unknown codes and
    /// unpopulated fields render as [`CDX_PLACEHOLDER`].
    #[must_use]
    pub fn to_line<S: AsRef<str>>(&self, field_order: &[S]) -> String {
        field_order
            .iter()
            .map(|code| self.get(code.as_ref()).unwrap_or(CDX_PLACEHOLDER))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Parses a header line into the declared field order. The first token must
/// be the literal `CDX`.
pub fn parse_field_order(line: &str) -> Result<Vec<String>> {
    let mut tokens = line.split_whitespace();
    if tokens.next() != Some("CDX") {
        return Err(ReplayError::MalformedCdxHeader);
    }
    Ok(tokens.map(str::to_string).collect())
}

/// Renders a field order back into a header line (with the leading space the
/// original writers emit).
#[must_use]
pub fn field_order_to_line<S: AsRef<str>>(field_order: &[S]) -> String {
    let codes: Vec<&str> = field_order.iter().map(AsRef::as_ref).collect();
    format!(" CDX {}", codes.join(" "))
}

/// Line-oriented CDX parser; feed it lines (or whole files) and collect the
/// parsed entries.
#[derive(Debug, Default)]
pub struct CdxReader {
    field_order: Option<Vec<String>>,
    pub entries: Vec<CdxEntry>,
}

impl CdxReader {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn field_order(&self) -> Option<&[String]> {
        self.field_order.as_deref()
    }

    /// Reads a whole file, transparently decompressing when `use_gz` is set
    /// or the file name ends in `.gz`.
    pub fn parse_file(&mut self, path: impl AsRef<Path>, use_gz: bool) -> Result<()> {
        let path = path.as_ref();
        let raw = fs::read(path)?;
        let gzipped = use_gz
            || path
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("gz"));
        let text = if gzipped {
            let mut decoded = String::new();
            GzDecoder::new(raw.as_slice()).read_to_string(&mut decoded)?;
            decoded
        } else {
            String::from_utf8_lossy(&raw).into_owned()
        };
        for line in text.lines() {
            self.line_received(line)?;
        }
        Ok(())
    }

    /// Consumes one line: the first non-empty line is the header, everything
    /// after is a data line.
    pub fn line_received(&mut self, line: &str) -> Result<()> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(());
        }
        match &self.field_order {
            None => {
                let order = parse_field_order(line)?;
                let mut seen = order.clone();
                seen.sort();
                seen.dedup();
                if seen.len() < order.len() {
                    tracing::warn!("cdx header has duplicate codes; later columns win");
                }
                self.field_order = Some(order);
            }
            Some(order) => {
                let entry = Self::parse_entry_line(order, line);
                self.entries.push(entry);
            }
        }
        Ok(())
    }

    /// Maps a data line's values onto the field order. Short lines leave
    /// trailing fields absent; excess values are dropped.
    #[must_use]
    pub fn parse_entry_line(field_order: &[String], line: &str) -> CdxEntry {
        CdxEntry::from_fields(
            field_order
                .iter()
                .map(String::as_str)
                .zip(line.split_whitespace()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loaded(header: &str, lines: &[&str]) -> CdxReader {
        let mut reader = CdxReader::new();
        reader.line_received(header).expect("header");
        for line in lines {
            reader.line_received(line).expect("data line");
        }
        reader
    }

    #[test]
    fn parses_field_order() {
        let order = parse_field_order(" CDX N b a m s k r M S V g").expect("order");
        assert_eq!(order, vec!["N", "b", "a", "m", "s", "k", "r", "M", "S", "V", "g"]);
    }

    #[test]
    fn header_without_cdx_token_fails() {
        let err = parse_field_order(" N b a m s k r M S V g").expect_err("no CDX token");
        assert!(matches!(err, ReplayError::MalformedCdxHeader));
        assert!(matches!(
            parse_field_order(""),
            Err(ReplayError::MalformedCdxHeader)
        ));
    }

    #[test]
    fn roundtrips_with_parse_order() {
        let line = "1 2 3 4 5 6 7 8 9 10 11";
        let reader = loaded(" CDX N b a m s k r M S V g", &[line]);
        let order = reader.field_order().expect("order");
        assert_eq!(reader.entries[0].to_line(order), line);
    }

    #[test]
    fn duplicate_codes_later_wins() {
        let reader = loaded(" CDX N b a m s M r M V V N", &["1 2 3 4 5 6 7 8 9 10 11"]);
        let order = reader.field_order().expect("order");
        assert_eq!(
            reader.entries[0].to_line(order),
            "11 2 3 4 5 8 7 8 10 10 11"
        );
    }

    #[test]
    fn short_field_order_drops_excess_values() {
        let reader = loaded(" CDX N b a m s k", &["1 2 3 4 5 6 7 8 9 10 11"]);
        let order = reader.field_order().expect("order");
        assert_eq!(reader.entries[0].to_line(order), "1 2 3 4 5 6");
    }

    #[test]
    fn short_data_line_pads_with_placeholder() {
        let reader = loaded(" CDX N b a m s k r M S V g", &["1 2 3 4 5 6 7 8 9"]);
        let order = reader.field_order().expect("order");
        assert_eq!(reader.entries[0].to_line(order), "1 2 3 4 5 6 7 8 9 - -");
    }

    #[test]
    fn unknown_codes_render_placeholder() {
        let reader = loaded(" CDX N b z m s q r X S V x", &["1 2 3 4 5 6 7 8 9 10 11"]);
        let order = reader.field_order().expect("order");
        assert_eq!(reader.entries[0].to_line(order), "1 2 - 4 5 - 7 - 9 10 -");
    }

    #[test]
    fn unknown_code_in_requested_order_renders_placeholder() {
        let reader = loaded(" CDX N b z", &["1 2 3"]);
        let entry = &reader.entries[0];
        assert_eq!(entry.to_line(&["N", "b", "z", "q"]), "1 2 - -");
    }

    #[test]
    fn sample_line_fields_land_in_named_slots() {
        let header = " CDX N b a m s k r M S V g";
        let line = "warcinfo:/wikipedia.warc.gz/archive-commons.0.0.1-SNAPSHOT-201202102659-python \
                    20131109194250 \
                    warcinfo:/wikipedia.warc.gz/archive-commons.0.0.1-SNAPSHOT-20120112102659-python \
                    warc-info - 2IGTQCWS2K2D3QYFZZZUCMIHHVSXMYGU - - 338 0 wikipedia.warc.gz";
        let reader = loaded(header, &[line]);
        let entry = &reader.entries[0];
        assert_eq!(entry.date.as_deref(), Some("20131109194250"));
        assert_eq!(entry.mime_type.as_deref(), Some("warc-info"));
        assert_eq!(entry.response_code.as_deref(), Some("-"));
        assert_eq!(entry.compressed_record_size.as_deref(), Some("338"));
        assert_eq!(entry.compressed_arc_file_offset.as_deref(), Some("0"));
        assert_eq!(entry.file_name.as_deref(), Some("wikipedia.warc.gz"));
        let order = reader.field_order().expect("order");
        assert_eq!(entry.to_line(order), line.split_whitespace().collect::<Vec<_>>().join(" "));
    }

    #[test]
    fn header_line_roundtrip() {
        let order = parse_field_order(" CDX N b a").expect("order");
        assert_eq!(field_order_to_line(&order), " CDX N b a");
    }
}
