//! Human-readable titles from source URL slugs.

use super::last_path_segment;

const UNKNOWN_ALIAS: &str = "Unknown";

/// Turns a slug such as `/cyberpunk-2077-v2-1-free-download.rar` into a
/// title ("Cyberpunk"). Release noise is cut at the first `-free-download`,
/// `-build-<n>`, `-rip` or `-<n>`/`-v<n>` suffix.
pub fn alias_from_url(url: &str) -> String {
    let Some(segment) = last_path_segment(url) else {
        return UNKNOWN_ALIAS.to_string();
    };

    let mut slug = strip_extension(&segment.to_lowercase()).to_string();
    for marker in ["free-download", "-build-", "-rip"] {
        if let Some(idx) = slug.find(marker) {
            slug.truncate(idx);
        }
    }
    if let Some(idx) = version_suffix_start(&slug) {
        slug.truncate(idx);
    }

    let title = slug
        .split(|c: char| c == '-' || c == '_' || c.is_whitespace())
        .filter(|w| !w.is_empty())
        .map(capitalize)
        .collect::<Vec<_>>()
        .join(" ");
    if title.is_empty() {
        UNKNOWN_ALIAS.to_string()
    } else {
        title
    }
}

fn strip_extension(name: &str) -> &str {
    match name.rsplit_once('.') {
        Some((stem, ext))
            if !stem.is_empty()
                && (1..=5).contains(&ext.len())
                && ext.chars().all(|c| c.is_ascii_alphanumeric()) =>
        {
            stem
        }
        _ => name,
    }
}

/// Byte index of the first `-<digit>` or `-v<digit>` in `slug`.
fn version_suffix_start(slug: &str) -> Option<usize> {
    slug.match_indices('-').map(|(i, _)| i).find(|&i| {
        let rest = &slug[i + 1..];
        let rest = rest.strip_prefix('v').unwrap_or(rest);
        rest.chars().next().is_some_and(|c| c.is_ascii_digit())
    })
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
