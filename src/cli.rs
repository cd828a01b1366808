//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::Parser;

use m3uget::{DEFAULT_MAX_ATTEMPTS, DEFAULT_WORKERS};

/// Download a segmented media stream to a single file.
///
/// Accepts a playlist URL, a watch-page URL for a supported host, or a full
/// cURL command copied from a browser's network tab.
#[derive(Parser, Debug)]
#[command(name = "m3uget")]
#[command(author, version, about)]
pub struct Args {
    /// Playlist/page URL or a full cURL command (prompted for when omitted)
    pub source: Option<String>,

    /// Output file path (prompted for when omitted)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Concurrent download workers (1-32)
    #[arg(short = 'w', long, default_value_t = DEFAULT_WORKERS as u8, value_parser = clap::value_parser!(u8).range(1..=32))]
    pub workers: u8,

    /// Maximum retries per segment for transient failures (0-10)
    #[arg(short = 'r', long, default_value_t = (DEFAULT_MAX_ATTEMPTS - 1) as u8, value_parser = clap::value_parser!(u8).range(0..=10))]
    pub max_retries: u8,

    /// Extra request header as "Name: value" (repeatable)
    #[arg(short = 'H', long = "header")]
    pub header: Vec<String>,

    /// Treat the source as a live broadcast even if resolution does not
    #[arg(long)]
    pub live: bool,

    /// Append segments to the output while downloading
    #[arg(long)]
    pub live_assemble: bool,

    /// Pipe segments through ffmpeg for container remuxing
    #[arg(long)]
    pub ffmpeg: bool,

    /// Keep the cache directory after a successful download
    #[arg(long)]
    pub keep_cache: bool,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,
}
