//! Minimal HTTP/1.1 server for integration tests: HEAD probe and `Range` GET
//! over one static body, with switches for the server quirks a transfer has
//! to survive.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RangeServerOptions {
    /// If false, HEAD returns 405 (servers that block HEAD).
    pub head_allowed: bool,
    /// If false, GET ignores Range and always returns 200 with the full body.
    pub support_ranges: bool,
    /// Sent as `Content-Disposition` on HEAD and GET when set.
    pub disposition: Option<String>,
    /// Every request is answered with this status and no body.
    pub fail_with: Option<u16>,
    /// Body is written in chunks of this size with `chunk_delay` between them.
    pub chunk_size: usize,
    pub chunk_delay: Duration,
}

impl Default for RangeServerOptions {
    fn default() -> Self {
        Self {
            head_allowed: true,
            support_ranges: true,
            disposition: None,
            fail_with: None,
            chunk_size: 64 * 1024,
            chunk_delay: Duration::ZERO,
        }
    }
}

/// A running server. `url` points at `/files/<name>`.
pub struct RangeServer {
    pub url: String,
    /// Start offset of every GET; `None` for GETs without a Range header.
    gets: Arc<Mutex<Vec<Option<u64>>>>,
}

impl RangeServer {
    pub fn get_offsets(&self) -> Vec<Option<u64>> {
        self.gets.lock().unwrap().clone()
    }
}

pub fn start(name: &str, body: Vec<u8>) -> RangeServer {
    start_with_options(name, body, RangeServerOptions::default())
}

/// Serve `body` from a background thread until the process exits.
pub fn start_with_options(name: &str, body: Vec<u8>, opts: RangeServerOptions) -> RangeServer {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().unwrap().port();
    let body = Arc::new(body);
    let opts = Arc::new(opts);
    let gets = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&gets);
    thread::spawn(move || {
        for stream in listener.incoming().flatten() {
            let body = Arc::clone(&body);
            let opts = Arc::clone(&opts);
            let seen = Arc::clone(&seen);
            thread::spawn(move || handle(stream, &body, &opts, &seen));
        }
    });
    RangeServer {
        url: format!("http://127.0.0.1:{}/files/{}", port, name),
        gets,
    }
}

fn handle(
    mut stream: TcpStream,
    body: &[u8],
    opts: &RangeServerOptions,
    seen: &Mutex<Vec<Option<u64>>>,
) {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(2)));
    let _ = stream.set_write_timeout(Some(Duration::from_secs(5)));
    let mut buf = [0u8; 8192];
    let n = match stream.read(&mut buf) {
        Ok(0) | Err(_) => return,
        Ok(n) => n,
    };
    let Ok(request) = std::str::from_utf8(&buf[..n]) else {
        return;
    };
    let (method, range_start) = parse_request(request);

    if let Some(code) = opts.fail_with {
        let _ = write!(stream, "HTTP/1.1 {} Failed\r\nContent-Length: 0\r\n\r\n", code);
        return;
    }

    let total = body.len() as u64;
    let mut extra = String::new();
    if opts.support_ranges {
        extra.push_str("Accept-Ranges: bytes\r\n");
    }
    if let Some(d) = &opts.disposition {
        extra.push_str(&format!("Content-Disposition: {}\r\n", d));
    }

    if method.eq_ignore_ascii_case("HEAD") {
        if !opts.head_allowed {
            let _ = stream.write_all(b"HTTP/1.1 405 Method Not Allowed\r\nContent-Length: 0\r\n\r\n");
            return;
        }
        let _ = write!(
            stream,
            "HTTP/1.1 200 OK\r\nContent-Length: {}\r\n{}\r\n",
            total, extra
        );
        return;
    }
    if !method.eq_ignore_ascii_case("GET") {
        let _ = stream.write_all(b"HTTP/1.1 405 Method Not Allowed\r\nContent-Length: 0\r\n\r\n");
        return;
    }

    seen.lock().unwrap().push(range_start);
    let (status, slice) = match range_start {
        Some(start) if opts.support_ranges => {
            if start >= total {
                let _ = write!(
                    stream,
                    "HTTP/1.1 416 Range Not Satisfiable\r\nContent-Range: bytes */{}\r\nContent-Length: 0\r\n\r\n",
                    total
                );
                return;
            }
            extra.push_str(&format!(
                "Content-Range: bytes {}-{}/{}\r\n",
                start,
                total - 1,
                total
            ));
            ("206 Partial Content", &body[start as usize..])
        }
        _ => ("200 OK", body),
    };
    if write!(
        stream,
        "HTTP/1.1 {}\r\nContent-Length: {}\r\n{}\r\n",
        status,
        slice.len(),
        extra
    )
    .is_err()
    {
        return;
    }
    for chunk in slice.chunks(opts.chunk_size.max(1)) {
        if stream.write_all(chunk).is_err() {
            return;
        }
        if !opts.chunk_delay.is_zero() {
            thread::sleep(opts.chunk_delay);
        }
    }
}

/// Returns the method and the start of a `Range: bytes=N-` header.
fn parse_request(request: &str) -> (&str, Option<u64>) {
    let mut lines = request.lines();
    let method = lines
        .next()
        .and_then(|l| l.split_whitespace().next())
        .unwrap_or("");
    let range = lines
        .take_while(|l| !l.trim().is_empty())
        .filter_map(|l| l.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("range"))
        .and_then(|(_, value)| value.trim().strip_prefix("bytes="))
        .and_then(|spec| spec.split('-').next())
        .and_then(|start| start.trim().parse::<u64>().ok());
    (method, range)
}

/// A server that accepts connections and never answers. Returns a URL under it.
pub fn start_silent(name: &str) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().unwrap().port();
    thread::spawn(move || {
        let mut held = Vec::new();
        for stream in listener.incoming().flatten() {
            held.push(stream);
        }
    });
    format!("http://127.0.0.1:{}/files/{}", port, name)
}
