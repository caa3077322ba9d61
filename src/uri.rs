//! URI splitting, matching and canonicalization for replay lookups.
//!
//! The matcher intentionally performs no normalization beyond the split
//! itself: no dot-segment removal, no percent-decoding, no trailing-slash
//! equivalence. Two URIs are equal when their reassembled forms are equal,
//! optionally with the scheme cleared on both sides. Capture URIs are stored
//! as-is, so the parser never fails; whatever it cannot place in a component
//! stays in the path and still compares byte-for-byte.

/// A URI broken into the components the matcher compares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordUri {
    pub scheme: Option<String>,
    pub netloc: String,
    pub path: String,
    pub query: Option<String>,
    pub fragment: Option<String>,
}

impl RecordUri {
    /// Splits `input` into components. Infallible: unrecognized shapes end up
    /// entirely in `path`.
    #[must_use]
    pub fn parse(input: &str) -> Self {
        let (rest, fragment) = match input.split_once('#') {
            Some((head, frag)) => (head, Some(frag.to_string())),
            None => (input, None),
        };
        let (rest, query) = match rest.split_once('?') {
            Some((head, q)) => (head, Some(q.to_string())),
            None => (rest, None),
        };
        let (scheme, rest) = match rest.split_once("://") {
            Some((s, tail)) if !s.is_empty() && s.chars().all(is_scheme_char) => {
                (Some(s.to_string()), tail)
            }
            _ => (None, rest),
        };
        let (netloc, path) = if scheme.is_some() {
            match rest.find('/') {
                Some(idx) => (rest[..idx].to_string(), rest[idx..].to_string()),
                None => (rest.to_string(), String::new()),
            }
        } else {
            (String::new(), rest.to_string())
        };
        Self {
            scheme,
            netloc,
            path,
            query,
            fragment,
        }
    }

    /// Reassembles the URI. With `include_scheme` false the scheme slot is
    /// left empty on purpose so scheme-ignored comparisons stay symmetric.
    #[must_use]
    pub fn assemble(&self, include_scheme: bool) -> String {
        let mut out = String::new();
        if include_scheme {
            if let Some(scheme) = &self.scheme {
                out.push_str(scheme);
            }
        }
        out.push_str("://");
        out.push_str(&self.netloc);
        out.push_str(&self.path);
        if let Some(query) = &self.query {
            out.push('?');
            out.push_str(query);
        }
        if let Some(fragment) = &self.fragment {
            out.push('#');
            out.push_str(fragment);
        }
        out
    }

    /// Host portion of the netloc, without any `:port` suffix.
    #[must_use]
    pub fn host(&self) -> &str {
        match self.netloc.rsplit_once(':') {
            Some((host, port)) if port.chars().all(|c| c.is_ascii_digit()) => host,
            _ => &self.netloc,
        }
    }

    /// Explicit port in the netloc, if any.
    #[must_use]
    pub fn port(&self) -> Option<u16> {
        let (_, port) = self.netloc.rsplit_once(':')?;
        port.parse().ok()
    }
}

impl std::fmt::Display for RecordUri {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.assemble(true))
    }
}

fn is_scheme_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.')
}

/// Exact comparison of two URIs after splitting and reassembly, optionally
/// clearing the scheme on both sides first.
#[must_use]
pub fn uri_equals(a: &str, b: &str, ignore_scheme: bool) -> bool {
    let ua = RecordUri::parse(a);
    let ub = RecordUri::parse(b);
    ua.assemble(!ignore_scheme) == ub.assemble(!ignore_scheme)
}

fn default_port(scheme: &str) -> u16 {
    // Same rule the capture side used: everything that is not plain http
    // defaults to 443.
    if scheme == "http" { 80 } else { 443 }
}

/// Rebuilds an absolute request target, dropping the port when it is the
/// default for the URI's scheme. Ports that are not the default are kept.
#[must_use]
pub fn absolute_record_uri(target: &str) -> String {
    let mut uri = RecordUri::parse(target);
    let scheme = uri.scheme.clone().unwrap_or_else(|| "http".to_string());
    if uri.port() == Some(default_port(&scheme)) {
        uri.netloc = uri.host().to_string();
    }
    uri.assemble(true)
}

/// Derives the canonical record URI for an origin-form request inside an
/// established tunnel: the CONNECT authority contributes scheme and netloc,
/// the request target contributes path, query and fragment.
///
/// The scheme is inferred from the tunnel port (80 is http, anything else
/// https), and the port is elided when it is that scheme's default.
#[must_use]
pub fn canonical_record_uri(authority: &str, target: &str) -> String {
    let request = RecordUri::parse(target);
    let (host, port) = match authority.rsplit_once(':') {
        Some((host, port)) => (host, port.parse::<u16>().ok()),
        None => (authority, None),
    };
    let scheme = match port {
        Some(80) => "http",
        _ => "https",
    };
    let netloc = match port {
        Some(p) if p != default_port(scheme) => authority.to_string(),
        _ => host.to_string(),
    };
    let merged = RecordUri {
        scheme: Some(scheme.to_string()),
        netloc,
        path: request.path,
        query: request.query,
        fragment: request.fragment,
    };
    merged.assemble(true)
}
