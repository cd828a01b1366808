//! Concurrent segment download engine.
//!
//! A fixed pool of workers each owns a private job queue; segments are
//! routed to queues by `index % workers`, so a segment's worker is a pure
//! function of its ordinal and a resumed run routes identically. Workers
//! report results over one shared completion channel that the run loop
//! drains, updating progress and feeding the incremental assembler.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use super::client::HttpClient;
use super::error::FetchError;
use super::retry::{RetryDecision, RetryPolicy, classify_error};
use crate::assemble::{AssembleError, IncrementalWriter};
use crate::playlist::Segment;
use crate::session::CacheDir;
use crate::ui::Ui;

/// Default worker pool size.
pub const DEFAULT_WORKERS: usize = 6;

/// Upper bound on the worker pool size.
pub const MAX_WORKERS: usize = 32;

/// How long the run loop waits on the completion channel before polling for
/// cancellation.
const CANCEL_POLL: Duration = Duration::from_millis(200);

/// Errors produced by the download engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The requested worker count is outside the accepted range.
    #[error("invalid worker count {value}, expected 1..={MAX_WORKERS}")]
    InvalidWorkerCount {
        /// The rejected value.
        value: usize,
    },

    /// A segment failed all its attempts.
    #[error("segment {index} failed after {attempts} attempt(s): {source}")]
    SegmentFailed {
        /// The segment ordinal.
        index: usize,
        /// How many attempts were made.
        attempts: u32,
        /// The final attempt's error.
        #[source]
        source: FetchError,
    },

    /// The user cancelled the download.
    #[error("download cancelled")]
    Cancelled,

    /// Incremental assembly failed while the download was running.
    #[error(transparent)]
    Assemble(#[from] AssembleError),

    /// All workers exited while completions were still expected.
    #[error("worker pool shut down unexpectedly")]
    ChannelClosed,
}

/// Work item on a worker's queue.
enum Job {
    /// Fetch one segment into the cache.
    Fetch {
        segment: Segment,
        headers: Arc<BTreeMap<String, String>>,
        cookies: Arc<BTreeMap<String, String>>,
    },
    /// Drain and exit.
    Shutdown,
}

/// One worker's report for one segment.
struct Completion {
    index: usize,
    attempts: u32,
    result: Result<u64, FetchError>,
}

/// Configuration for a download run: pool size and retry policy.
#[derive(Debug, Clone)]
pub struct SegmentDownloader {
    client: HttpClient,
    workers: usize,
    retry: RetryPolicy,
}

impl SegmentDownloader {
    /// Creates a downloader with the given pool size.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidWorkerCount`] when `workers` is zero or
    /// exceeds [`MAX_WORKERS`].
    pub fn new(
        client: HttpClient,
        workers: usize,
        retry: RetryPolicy,
    ) -> Result<Self, EngineError> {
        if workers == 0 || workers > MAX_WORKERS {
            return Err(EngineError::InvalidWorkerCount { value: workers });
        }
        Ok(Self {
            client,
            workers,
            retry,
        })
    }

    /// Spawns the worker pool and returns the running engine.
    ///
    /// `headers` and `cookies` are attached to every segment request until
    /// replaced via [`DownloadRun::set_cookies`].
    #[must_use]
    pub fn start(
        &self,
        cache: CacheDir,
        headers: BTreeMap<String, String>,
        cookies: BTreeMap<String, String>,
    ) -> DownloadRun {
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();
        let stop = Arc::new(AtomicBool::new(false));
        let mut senders = Vec::with_capacity(self.workers);
        let mut handles = Vec::with_capacity(self.workers);

        for worker in 0..self.workers {
            let (tx, rx) = mpsc::unbounded_channel();
            senders.push(tx);
            handles.push(tokio::spawn(worker_loop(
                worker,
                rx,
                completion_tx.clone(),
                self.client.clone(),
                self.retry.clone(),
                cache.clone(),
                Arc::clone(&stop),
            )));
        }
        debug!(workers = self.workers, "worker pool started");

        DownloadRun {
            senders,
            completions: completion_rx,
            handles,
            stop,
            cache,
            headers: Arc::new(headers),
            cookies: Arc::new(cookies),
            outstanding: 0,
            completed: 0,
            total: 0,
            bytes: 0,
            started: Instant::now(),
        }
    }
}

/// A running worker pool plus the bookkeeping to drive it.
pub struct DownloadRun {
    senders: Vec<mpsc::UnboundedSender<Job>>,
    completions: mpsc::UnboundedReceiver<Completion>,
    handles: Vec<JoinHandle<()>>,
    stop: Arc<AtomicBool>,
    cache: CacheDir,
    headers: Arc<BTreeMap<String, String>>,
    cookies: Arc<BTreeMap<String, String>>,
    outstanding: usize,
    completed: u64,
    total: u64,
    bytes: u64,
    started: Instant,
}

impl DownloadRun {
    /// Queues segments for download, skipping ones already cached.
    ///
    /// Cached segments still count toward progress totals.
    pub fn enqueue(&mut self, segments: &[Segment]) {
        for segment in segments {
            self.total += 1;
            if self.cache.has_segment(segment.index) {
                self.completed += 1;
                continue;
            }
            let worker = segment.index % self.senders.len();
            let job = Job::Fetch {
                segment: segment.clone(),
                headers: Arc::clone(&self.headers),
                cookies: Arc::clone(&self.cookies),
            };
            if self.senders[worker].send(job).is_ok() {
                self.outstanding += 1;
            }
        }
    }

    /// Replaces the cookie map attached to future jobs, e.g. after a live
    /// playlist refresh updated the session cookies.
    pub fn set_cookies(&mut self, cookies: BTreeMap<String, String>) {
        self.cookies = Arc::new(cookies);
    }

    /// How many segments have been queued in total.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Whether any queued segment is still in flight.
    #[must_use]
    pub fn has_outstanding(&self) -> bool {
        self.outstanding > 0
    }

    /// Waits for every outstanding segment to complete.
    ///
    /// Progress is reported to `ui` per completion; when an incremental
    /// writer is supplied, contiguous completed segments are appended to the
    /// output as they arrive. Cancellation is polled between completions.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] when a segment exhausts its attempts, the
    /// user cancels, or incremental assembly fails.
    #[instrument(skip_all)]
    pub async fn drain(
        &mut self,
        ui: &dyn Ui,
        incremental: &mut Option<IncrementalWriter>,
    ) -> Result<(), EngineError> {
        while self.outstanding > 0 {
            if ui.cancelled() {
                return Err(EngineError::Cancelled);
            }
            let completion =
                match tokio::time::timeout(CANCEL_POLL, self.completions.recv()).await {
                    Ok(Some(completion)) => completion,
                    Ok(None) => return Err(EngineError::ChannelClosed),
                    Err(_) => continue,
                };

            self.outstanding -= 1;
            match completion.result {
                Ok(bytes) => {
                    self.completed += 1;
                    self.bytes += bytes;
                }
                Err(source) => {
                    return Err(EngineError::SegmentFailed {
                        index: completion.index,
                        attempts: completion.attempts,
                        source,
                    });
                }
            }

            ui.progress(&self.progress_label(), self.completed, self.total);
            if let Some(writer) = incremental.as_mut() {
                writer.advance(&self.cache).await?;
            }
        }
        Ok(())
    }

    /// Stops the pool and waits for the workers to exit.
    ///
    /// The stop flag is raised before the sentinels go out, so jobs still
    /// sitting on worker queues are discarded rather than fetched. A fetch
    /// already past its last stop check finishes first.
    pub async fn shutdown(mut self) {
        self.stop.store(true, Ordering::SeqCst);
        for sender in &self.senders {
            let _ = sender.send(Job::Shutdown);
        }
        self.senders.clear();
        for handle in self.handles.drain(..) {
            let _ = handle.await;
        }
        info!(
            completed = self.completed,
            bytes = self.bytes,
            "worker pool stopped"
        );
    }

    fn progress_label(&self) -> String {
        let elapsed = self.started.elapsed().as_secs_f64();
        if self.completed == 0 || elapsed < 1.0 {
            return "Downloading".to_string();
        }
        let rate = self.completed as f64 / elapsed;
        let remaining = self.total.saturating_sub(self.completed) as f64 / rate;
        format!("Downloading (eta {})", format_duration(remaining as u64))
    }
}

fn format_duration(seconds: u64) -> String {
    if seconds >= 3600 {
        format!("{}h{:02}m", seconds / 3600, (seconds % 3600) / 60)
    } else if seconds >= 60 {
        format!("{}m{:02}s", seconds / 60, seconds % 60)
    } else {
        format!("{seconds}s")
    }
}

/// One worker: pull jobs off the private queue until shutdown. Fetch jobs
/// still queued when the stop flag is raised are discarded unfetched.
async fn worker_loop(
    worker: usize,
    mut jobs: mpsc::UnboundedReceiver<Job>,
    completions: mpsc::UnboundedSender<Completion>,
    client: HttpClient,
    retry: RetryPolicy,
    cache: CacheDir,
    stop: Arc<AtomicBool>,
) {
    while let Some(job) = jobs.recv().await {
        match job {
            Job::Shutdown => break,
            Job::Fetch {
                segment,
                headers,
                cookies,
            } => {
                if stop.load(Ordering::SeqCst) {
                    debug!(worker, index = segment.index, "discarding queued segment");
                    continue;
                }
                let (attempts, result) =
                    fetch_with_retry(&client, &retry, &cache, &segment, &headers, &cookies, &stop)
                        .await;
                let completion = Completion {
                    index: segment.index,
                    attempts,
                    result,
                };
                if completions.send(completion).is_err() {
                    break;
                }
            }
        }
    }
    debug!(worker, "worker exited");
}

/// Fetches one segment into the cache, retrying transient failures per the
/// policy. Returns the number of attempts made alongside the final result.
/// A raised stop flag ends the retry loop instead of sleeping out a backoff.
async fn fetch_with_retry(
    client: &HttpClient,
    retry: &RetryPolicy,
    cache: &CacheDir,
    segment: &Segment,
    headers: &BTreeMap<String, String>,
    cookies: &BTreeMap<String, String>,
    stop: &AtomicBool,
) -> (u32, Result<u64, FetchError>) {
    let staging = cache.staging_path(segment.index);
    let destination = cache.segment_path(segment.index);
    let mut attempt: u32 = 1;

    loop {
        match client
            .fetch_to_file(&segment.url, headers, cookies, &staging, &destination)
            .await
        {
            Ok(bytes) => return (attempt, Ok(bytes)),
            Err(error) => {
                // A failed attempt must not leave a partial staging file.
                if let Err(e) = tokio::fs::remove_file(&staging).await {
                    if e.kind() != std::io::ErrorKind::NotFound {
                        warn!(path = %staging.display(), error = %e, "failed to remove staging file");
                    }
                }

                match retry.should_retry(classify_error(&error), attempt) {
                    RetryDecision::Retry { delay, attempt: next } => {
                        if stop.load(Ordering::SeqCst) {
                            return (attempt, Err(error));
                        }
                        warn!(
                            index = segment.index,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %error,
                            "segment fetch failed, retrying"
                        );
                        tokio::time::sleep(delay).await;
                        attempt = next;
                    }
                    RetryDecision::DoNotRetry { reason } => {
                        debug!(index = segment.index, attempt, %reason, "giving up on segment");
                        return (attempt, Err(error));
                    }
                }
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_count_bounds() {
        let client = HttpClient::new();
        assert!(matches!(
            SegmentDownloader::new(client.clone(), 0, RetryPolicy::default()),
            Err(EngineError::InvalidWorkerCount { value: 0 })
        ));
        assert!(matches!(
            SegmentDownloader::new(client.clone(), MAX_WORKERS + 1, RetryPolicy::default()),
            Err(EngineError::InvalidWorkerCount { .. })
        ));
        assert!(SegmentDownloader::new(client, DEFAULT_WORKERS, RetryPolicy::default()).is_ok());
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(5), "5s");
        assert_eq!(format_duration(65), "1m05s");
        assert_eq!(format_duration(3700), "1h01m");
    }

    #[tokio::test]
    async fn test_enqueue_skips_cached_segments() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CacheDir::at(dir.path());
        std::fs::write(cache.segment_path(0), b"cached").unwrap();

        let downloader =
            SegmentDownloader::new(HttpClient::new(), 2, RetryPolicy::default()).unwrap();
        let mut run = downloader.start(cache, BTreeMap::new(), BTreeMap::new());
        run.enqueue(&[
            Segment::new("https://example.com/0.ts", 0),
            Segment::new("https://example.com/1.ts", 1),
        ]);

        assert_eq!(run.total(), 2);
        assert_eq!(run.completed, 1);
        assert_eq!(run.outstanding, 1);
        // Dropping the run tears the pool down with the runtime.
        drop(run);
    }
}
