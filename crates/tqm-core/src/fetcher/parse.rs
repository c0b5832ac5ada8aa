//! Parse HTTP response header lines collected by curl.

use super::Probe;

/// Status code of an `HTTP/x.y NNN reason` line.
pub(crate) fn parse_status_line(line: &str) -> Option<u32> {
    let rest = line.trim().strip_prefix("HTTP/")?;
    rest.split_whitespace().nth(1)?.parse().ok()
}

/// Parse collected header lines into a `Probe`. When redirects were followed
/// the lines of every hop are present; only the last response counts.
pub(crate) fn parse_headers(lines: &[String]) -> Probe {
    let mut probe = Probe::default();

    for line in lines {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if parse_status_line(line).is_some() {
            probe = Probe::default();
            continue;
        }
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let name = name.trim();
        let value = value.trim();
        if name.eq_ignore_ascii_case("content-length") {
            if let Ok(n) = value.parse::<u64>() {
                probe.total_size = Some(n);
            }
        } else if name.eq_ignore_ascii_case("accept-ranges") {
            probe.accept_ranges = value.eq_ignore_ascii_case("bytes");
        } else if name.eq_ignore_ascii_case("content-disposition") {
            probe.content_disposition = Some(value.to_string());
        }
    }

    probe
}
