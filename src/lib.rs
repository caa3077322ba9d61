#![deny(clippy::all, clippy::pedantic)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
#![allow(clippy::module_name_repetitions)]
//
// Documentation lints: internal helpers are mostly self-documenting; public
// APIs still carry proper docs.
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]
//
// Cast safety: offsets and lengths are bounded by mapped file sizes.
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_lossless)]

//! Replay archived HTTP traffic out of WARC container files.
//!
//! The crate indexes one or more `.warc` / `.warc.gz` containers at startup
//! and serves their captured responses back through an HTTP forward proxy:
//! point a client's proxy setting at it and browse the archive as if it were
//! live. A small standalone reader for the columnar CDX index format rides
//! along for offline inspection.

pub mod cdx;
pub mod error;
pub mod index;
pub mod proxy;
pub mod response;
pub mod uri;
pub mod warc;

pub use cdx::{CdxEntry, CdxReader};
pub use error::{ReplayError, Result};
pub use index::{RecordPointer, ReplayIndex};
pub use proxy::{serve, ReplaySession};
pub use response::{reconstruct, ReconstructedResponse};
pub use uri::RecordUri;
pub use warc::{RecordKind, WarcReader, WarcRecord};

/// Current crate version.
pub const WARC_REPLAY_VERSION: &str = env!("CARGO_PKG_VERSION");
