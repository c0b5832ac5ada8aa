//! Single-active-job transfer queue manager: an ordered queue of sources,
//! at most one of them fetching at a time, with pause/resume, demotion,
//! promotion and cache-backed resume.

pub mod config;
pub mod logging;

pub mod api;
pub mod archiver;
pub mod cache;
pub mod control;
pub mod error;
pub mod events;
pub mod fetcher;
pub mod limiter;
pub mod naming;
pub mod progress;
pub mod queue;
pub mod queue_db;
pub mod retry;
pub mod scheduler;
pub mod storage;
pub mod transfer;
