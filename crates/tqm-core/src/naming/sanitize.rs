//! Linux-safe filename sanitization.

const NAME_MAX: usize = 255;

/// Replaces path separators, NUL, whitespace and control characters with a
/// single `_`, trims dots/underscores at both ends and caps the length at
/// NAME_MAX bytes on a char boundary.
pub fn sanitize_filename_for_linux(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        let unsafe_char = c == '/' || c == '\\' || c.is_control() || c.is_whitespace();
        if unsafe_char {
            if !out.ends_with('_') {
                out.push('_');
            }
        } else if c == '_' && out.ends_with('_') {
            continue;
        } else {
            out.push(c);
        }
    }

    let trimmed = out.trim_matches(|c| c == '.' || c == '_');
    let mut end = trimmed.len().min(NAME_MAX);
    while !trimmed.is_char_boundary(end) {
        end -= 1;
    }
    trimmed[..end].to_string()
}
