//! libcurl transport: HEAD probe and `Range` GET.

use std::cell::Cell;
use std::str;
use std::time::Duration;

use super::parse::{parse_headers, parse_status_line};
use super::{FetchSink, Fetcher, Probe};
use crate::control::WorkerControl;
use crate::error::TransferError;

/// Curl-backed fetcher. One easy handle per call; no state between calls.
#[derive(Debug, Clone)]
pub struct CurlFetcher {
    pub connect_timeout: Duration,
    pub user_agent: String,
}

impl Default for CurlFetcher {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            user_agent: concat!("tqm/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

fn curl_err(e: curl::Error) -> TransferError {
    if e.is_operation_timedout() {
        return TransferError::Transport {
            message: format!("timed out: {}", e),
            http_status: Some(408),
        };
    }
    TransferError::transport(e.to_string())
}

impl CurlFetcher {
    fn easy(&self, source: &str) -> Result<curl::easy::Easy, TransferError> {
        let mut easy = curl::easy::Easy::new();
        easy.url(source).map_err(curl_err)?;
        easy.follow_location(true).map_err(curl_err)?;
        easy.max_redirections(10).map_err(curl_err)?;
        easy.connect_timeout(self.connect_timeout).map_err(curl_err)?;
        easy.useragent(&self.user_agent).map_err(curl_err)?;
        Ok(easy)
    }
}

impl Fetcher for CurlFetcher {
    fn probe(&self, source: &str, control: &WorkerControl) -> Result<Probe, TransferError> {
        let mut headers: Vec<String> = Vec::new();
        let mut easy = self.easy(source)?;
        easy.nobody(true).map_err(curl_err)?;
        easy.timeout(Duration::from_secs(60)).map_err(curl_err)?;
        easy.progress(true).map_err(curl_err)?;
        let performed = {
            let mut transfer = easy.transfer();
            transfer
                .header_function(|data| {
                    if let Ok(s) = str::from_utf8(data) {
                        headers.push(s.trim_end().to_string());
                    }
                    true
                })
                .map_err(curl_err)?;
            transfer
                .progress_function(|_, _, _, _| control.stop_reason().is_none())
                .map_err(curl_err)?;
            transfer.perform()
        };
        if control.stop_reason().is_some() {
            return Err(TransferError::Stopped);
        }
        performed.map_err(curl_err)?;

        let code = easy.response_code().map_err(curl_err)?;
        // Some servers refuse HEAD; the GET still works, we just lack a size.
        if code == 405 || code == 501 {
            tracing::debug!(code, "HEAD not allowed, continuing without probe");
            return Ok(Probe::default());
        }
        if code != 0 && !(200..300).contains(&code) {
            return Err(TransferError::http(code));
        }
        Ok(parse_headers(&headers))
    }

    fn fetch(
        &self,
        source: &str,
        offset: u64,
        control: &WorkerControl,
        sink: &mut dyn FetchSink,
    ) -> Result<(), TransferError> {
        let mut easy = self.easy(source)?;
        if offset > 0 {
            easy.range(&format!("{}-", offset)).map_err(curl_err)?;
        }
        // Progress callback runs about once a second even on a stalled link.
        easy.progress(true).map_err(curl_err)?;

        let status: Cell<Option<u32>> = Cell::new(None);
        let mut started = false;
        // The sink's error, kept so it wins over curl's generic "write error".
        let mut sink_err: Option<TransferError> = None;

        let performed = {
            let mut transfer = easy.transfer();
            transfer
                .header_function(|data| {
                    if let Some(code) = str::from_utf8(data).ok().and_then(parse_status_line) {
                        status.set(Some(code));
                    }
                    true
                })
                .map_err(curl_err)?;
            transfer
                .write_function(|data| {
                    if !started {
                        started = true;
                        let begin = match status.get() {
                            Some(206) | None => sink.begin(offset),
                            Some(code) if (200..300).contains(&code) => {
                                if offset > 0 {
                                    tracing::debug!("source ignored range, restarting at 0");
                                }
                                sink.begin(0)
                            }
                            Some(code) => Err(TransferError::http(code)),
                        };
                        if let Err(e) = begin {
                            sink_err = Some(e);
                            return Ok(0);
                        }
                    }
                    match sink.chunk(data) {
                        Ok(()) => Ok(data.len()),
                        Err(e) => {
                            sink_err = Some(e);
                            Ok(0)
                        }
                    }
                })
                .map_err(curl_err)?;
            transfer
                .progress_function(|_, _, _, _| control.stop_reason().is_none())
                .map_err(curl_err)?;
            transfer.perform()
        };

        if let Some(e) = sink_err {
            return Err(e);
        }
        if control.stop_reason().is_some() {
            return Err(TransferError::Stopped);
        }
        performed.map_err(curl_err)?;

        let code = easy.response_code().map_err(curl_err)?;
        if code >= 300 {
            return Err(TransferError::http(code));
        }
        if !started {
            // Empty body: still tell the sink where it stands.
            let at = if code == 206 || code == 0 { offset } else { 0 };
            sink.begin(at)?;
        }
        Ok(())
    }
}
