//! Display names and on-disk filenames derived from sources.
//!
//! `alias_from_url` produces the human title shown in the queue when the
//! caller gives none; `derive_filename` produces the name the finished
//! artifact is saved under.

mod alias;
mod disposition;
mod sanitize;

pub use alias::alias_from_url;
pub use disposition::parse_content_disposition_filename;
pub use sanitize::sanitize_filename_for_linux;

/// Fallback when neither the header nor the URL path yields a usable name.
pub const DEFAULT_FILENAME: &str = "download.bin";

/// Last non-empty path segment of `url`, or `None` for root/unparseable URLs.
pub fn last_path_segment(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    let segment = parsed.path_segments()?.filter(|s| !s.is_empty()).last()?;
    if segment == "." || segment == ".." {
        return None;
    }
    Some(segment.to_string())
}

/// Filename for saving a transfer: Content-Disposition wins over the URL path.
pub fn derive_filename(url: &str, content_disposition: Option<&str>) -> String {
    let candidate = content_disposition
        .and_then(parse_content_disposition_filename)
        .filter(|s| !s.is_empty())
        .or_else(|| last_path_segment(url));

    match candidate.map(|c| sanitize_filename_for_linux(&c)) {
        Some(name) if !name.is_empty() && name != "." && name != ".." => name,
        _ => DEFAULT_FILENAME.to_string(),
    }
}
