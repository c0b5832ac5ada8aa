//! Resumable byte transport for one source.
//!
//! The scheduler's worker only talks to the `Fetcher` trait. `CurlFetcher`
//! is the libcurl implementation (http, https and file URLs).

mod http;
mod parse;

pub use http::CurlFetcher;

use crate::control::WorkerControl;
use crate::error::TransferError;

/// Metadata learned before fetching.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Probe {
    /// Total size, when the source reports one.
    pub total_size: Option<u64>,
    /// Source honours byte ranges, so a partial artifact can be continued.
    pub accept_ranges: bool,
    /// Raw `Content-Disposition` value, used for the on-disk filename.
    pub content_disposition: Option<String>,
}

/// Receives the body of a fetch.
pub trait FetchSink {
    /// Called once before the first chunk with the offset the body starts
    /// at: the requested offset, or 0 when the source ignored the range.
    fn begin(&mut self, offset: u64) -> Result<(), TransferError>;

    /// One received buffer. An error aborts the fetch and is returned from it.
    fn chunk(&mut self, data: &[u8]) -> Result<(), TransferError>;
}

pub trait Fetcher: Send + Sync {
    /// Learn size, range support and filename hints. Blocking, and subject to
    /// the same stop contract as `fetch`.
    fn probe(&self, source: &str, control: &WorkerControl) -> Result<Probe, TransferError>;

    /// Stream `source` from byte `offset` into `sink`. Blocking; runs on the
    /// worker thread. Must return `Stopped` soon after `control` asks for a
    /// stop, even while no data arrives.
    fn fetch(
        &self,
        source: &str,
        offset: u64,
        control: &WorkerControl,
        sink: &mut dyn FetchSink,
    ) -> Result<(), TransferError>;
}
