//! m3uget core library.
//!
//! Downloads segmented media streams described by M3U-style playlists:
//! resolves a starting URL (page, master playlist, or media playlist) down
//! to one media playlist, fetches its segments concurrently into a
//! resumable cache, tails still-running broadcasts, and assembles the
//! segments into one output file.
//!
//! # Architecture
//!
//! - [`playlist`] - Playlist data model and the pure text parser
//! - [`input`] - Bare-URL and pasted-cURL request ingestion
//! - [`resolver`] - Source resolution pipeline and host token exchanges
//! - [`session`] - Checkpoint persistence and cache-directory layout
//! - [`download`] - HTTP transport, retry policy, and the worker pool
//! - [`live`] - Live playlist tailing
//! - [`assemble`] - Direct, incremental, and transcoded assembly
//! - [`orchestrator`] - The run lifecycle tying everything together
//! - [`ui`] - The interaction boundary the core calls out to

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod assemble;
pub mod download;
pub mod input;
pub mod live;
pub mod orchestrator;
pub mod playlist;
pub mod resolver;
pub mod session;
pub mod ui;

// Re-export commonly used types
pub use download::{
    DEFAULT_MAX_ATTEMPTS, DEFAULT_WORKERS, EngineError, FetchError, HttpClient, MAX_WORKERS,
    RetryPolicy, SegmentDownloader,
};
pub use input::{InputError, RequestInput, parse_request};
pub use orchestrator::{DownloadOrchestrator, RunError, RunOutcome, RunRequest};
pub use playlist::{ParseError, Playlist, Segment, SegmentMeta};
pub use session::{AssemblyMode, CacheDir, DownloadSession, SessionError};
pub use ui::{ConsoleUi, SilentUi, Ui};
