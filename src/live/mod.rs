//! Live tailing: keep re-fetching a media playlist while the broadcast is
//! running, appending newly published segments to the download.
//!
//! Each round drains the current segment set, waits one poll interval,
//! re-fetches the playlist, and appends the suffix of segments whose URLs
//! are not yet known. A refresh that discovers nothing new means the
//! broadcast ended.

use std::time::Duration;

use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, info, instrument};
use url::Url;

use crate::assemble::IncrementalWriter;
use crate::download::{DownloadRun, EngineError, FetchError, HttpClient};
use crate::playlist::{self, ParseError, Playlist};
use crate::session::{CacheDir, DownloadSession, SessionError};
use crate::ui::Ui;

/// Poll interval bounds.
const MIN_POLL: Duration = Duration::from_secs(2);
const MAX_POLL: Duration = Duration::from_secs(10);

/// Fallback when the playlist declares no target duration.
const DEFAULT_POLL: Duration = Duration::from_secs(5);

/// Granularity of cancellation polls while sleeping between refreshes.
const CANCEL_POLL: Duration = Duration::from_millis(200);

/// Errors produced while tailing a live playlist.
#[derive(Debug, Error)]
pub enum TailError {
    /// The download engine failed or was cancelled.
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// A playlist re-fetch failed.
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// A re-fetched playlist could not be parsed.
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// The refreshed session could not be persisted.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// The session carries no playlist to extend.
    #[error("session has no resolved playlist to tail")]
    MissingPlaylist,
}

/// Picks the refresh interval for a playlist: half the target segment
/// duration, clamped to the poll bounds.
#[must_use]
pub fn poll_interval(playlist: &Playlist) -> Duration {
    match playlist.target_duration() {
        Some(target) if target > 0.0 => {
            Duration::from_secs_f64(target / 2.0).clamp(MIN_POLL, MAX_POLL)
        }
        _ => DEFAULT_POLL,
    }
}

/// Drives the drain/refresh loop for a livestream session.
pub struct LiveTailer {
    client: HttpClient,
    cache: CacheDir,
    poll: Duration,
}

impl LiveTailer {
    /// Creates a tailer with the given refresh interval.
    #[must_use]
    pub fn new(client: HttpClient, cache: CacheDir, poll: Duration) -> Self {
        Self {
            client,
            cache,
            poll,
        }
    }

    /// Sleeps one poll interval, waking early on cancellation.
    async fn pause(&self, ui: &dyn Ui) -> Result<(), TailError> {
        let mut remaining = self.poll;
        while !remaining.is_zero() {
            if ui.cancelled() {
                return Err(EngineError::Cancelled.into());
            }
            let step = remaining.min(CANCEL_POLL);
            sleep(step).await;
            remaining -= step;
        }
        Ok(())
    }

    /// Runs the tail loop until the broadcast ends.
    ///
    /// Returns once a refresh discovers no new segments, after the final
    /// drain. The session is re-persisted after every refresh so a crash
    /// resumes with everything discovered so far.
    ///
    /// # Errors
    ///
    /// Returns [`TailError`] on engine failure, cancellation, fetch or
    /// parse failure, or checkpoint write failure.
    #[instrument(skip_all, fields(url = %session.m3u_url))]
    pub async fn follow(
        &self,
        session: &mut DownloadSession,
        run: &mut DownloadRun,
        ui: &dyn Ui,
        incremental: &mut Option<IncrementalWriter>,
    ) -> Result<(), TailError> {
        loop {
            run.drain(ui, incremental).await?;
            self.pause(ui).await?;

            let response = self
                .client
                .get_text(&session.m3u_url, &session.headers, &mut session.cookies)
                .await?;
            let base = Url::parse(&response.final_url)
                .map_err(|_| FetchError::invalid_url(&response.final_url))?;
            let fresh = playlist::parse(&response.body, &base)?;

            let playlist = session.playlist.as_mut().ok_or(TailError::MissingPlaylist)?;
            let appended = playlist.extend_from_refresh(&fresh);
            session.save(&self.cache)?;

            if appended.is_empty() {
                info!(total = run.total(), "no new segments, broadcast ended");
                return Ok(());
            }

            debug!(new = appended.len(), "refresh discovered segments");
            run.set_cookies(session.cookies.clone());
            run.enqueue(&appended);
        }
    }
}
