//! HTTP transport and the concurrent segment download engine.

mod client;
mod engine;
mod error;
mod retry;

pub use client::{HttpClient, TextResponse};
pub use engine::{DEFAULT_WORKERS, DownloadRun, EngineError, MAX_WORKERS, SegmentDownloader};
pub use error::FetchError;
pub use retry::{
    DEFAULT_MAX_ATTEMPTS, FailureType, RetryDecision, RetryPolicy, classify_error,
};
