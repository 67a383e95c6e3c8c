//! Request path → output file name mapping.
//!
//! Every backend stores a page under the name returned by [`resolve`]. The
//! mapping is pure and deterministic, which is what makes re-publishing
//! overwrite the previous output instead of leaving a second copy next to it.
//!
//! ```text
//! /blog/        text/html         →  blog/index.html
//! /feed/        application/json  →  feed/index.json
//! /style.css    text/css          →  style.css        (file-style, verbatim)
//! /             text/plain        →  index.txt
//! ```
//!
//! ## Directory-style paths
//!
//! A path ending in `/` has no file name of its own, so one is synthesized:
//! `index` plus an extension picked from the response's MIME type. The
//! extension comes from [`COMMON_MIME_EXTENSIONS`] first, then from
//! `mime_guess`, then defaults to `.html`.
//!
//! The override table exists because the generic lookup returns the *first*
//! known extension for a type, and for several common types that first entry
//! is surprising (`text/plain` knows about a dozen extensions). Types listed in
//! the table never reach the generic lookup.

/// Extensions for the MIME types a site is certain to serve.
///
/// Consulted before the generic `mime_guess` lookup.
pub const COMMON_MIME_EXTENSIONS: &[(&str, &str)] = &[
    ("text/plain", ".txt"),
    ("text/html", ".html"),
    ("text/javascript", ".js"),
    ("application/javascript", ".js"),
    ("text/json", ".json"),
    ("application/json", ".json"),
    ("text/css", ".css"),
    ("text/xml", ".xml"),
    ("application/xml", ".xml"),
    ("application/rss+xml", ".xml"),
    ("application/atom+xml", ".xml"),
];

/// Extension used when nothing else matches.
pub const DEFAULT_EXTENSION: &str = ".html";

/// Strip parameters (`; charset=...`) and normalize case.
pub fn mime_essence(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

/// Look up an extension in the override table only.
pub fn table_extension(mime: &str) -> Option<&'static str> {
    COMMON_MIME_EXTENSIONS
        .iter()
        .find(|(m, _)| *m == mime)
        .map(|(_, ext)| *ext)
}

/// Extension (with leading dot) for a full `Content-Type` value.
pub fn extension_for(content_type: &str) -> String {
    let mime = mime_essence(content_type);
    if let Some(ext) = table_extension(&mime) {
        return ext.to_string();
    }
    mime_guess::get_mime_extensions_str(&mime)
        .and_then(|exts| exts.first())
        .map(|ext| format!(".{ext}"))
        .unwrap_or_else(|| DEFAULT_EXTENSION.to_string())
}

/// File name synthesized for a directory-style path: `index` + extension.
pub fn index_name(content_type: &str) -> String {
    format!("index{}", extension_for(content_type))
}

/// Map a request path and its content type to a root-relative output path.
///
/// A single leading `/` is stripped. File-style paths (no trailing `/`) are
/// returned verbatim regardless of content type.
pub fn resolve(path: &str, content_type: &str) -> String {
    let relative = path.strip_prefix('/').unwrap_or(path);
    if !relative.is_empty() && !relative.ends_with('/') {
        return relative.to_string();
    }
    format!("{relative}{}", index_name(content_type))
}
