//! Top-level run lifecycle: checkpoint loading, resolution, downloading,
//! live tailing, assembly, and cache cleanup.
//!
//! One orchestrator instance owns one output path's cache directory for the
//! duration of a run. Cancellation is an outcome, not an error: every phase
//! maps a user cancellation to [`RunOutcome::Cancelled`] with the cache left
//! intact for resume.

use std::collections::BTreeMap;
use std::path::PathBuf;

use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::assemble::{self, AssembleError, IncrementalWriter};
use crate::download::{
    DownloadRun, EngineError, HttpClient, RetryPolicy, SegmentDownloader,
};
use crate::live::{LiveTailer, TailError, poll_interval};
use crate::resolver::{ResolveError, ResolverRegistry, build_default_registry, resolve_source};
use crate::session::{AssemblyMode, CacheDir, DownloadSession, SessionError};
use crate::ui::Ui;

/// Errors that can end a run in failure.
#[derive(Debug, Error)]
pub enum RunError {
    /// Source resolution failed.
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    /// The download engine failed.
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// Live tailing failed.
    #[error(transparent)]
    Tail(#[from] TailError),

    /// Assembly failed.
    #[error(transparent)]
    Assemble(#[from] AssembleError),

    /// Checkpoint or cache-directory I/O failed.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// A session reached the download phase without a resolved playlist.
    #[error("no resolved playlist available for downloading")]
    MissingPlaylist,
}

impl RunError {
    /// Whether this error is really a user cancellation in disguise.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            Self::Resolve(ResolveError::Cancelled)
                | Self::Engine(EngineError::Cancelled)
                | Self::Tail(TailError::Engine(EngineError::Cancelled))
                | Self::Assemble(AssembleError::Cancelled)
        )
    }
}

/// How a run ended when it did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// The output file was written; carries its path.
    Completed(PathBuf),
    /// The user cancelled; the cache was kept for resume.
    Cancelled,
}

/// Everything one run needs, assembled by the caller.
#[derive(Debug, Clone)]
pub struct RunRequest {
    /// The starting URL (page, master playlist, or media playlist).
    pub url: String,
    /// Request headers with lower-cased names.
    pub headers: BTreeMap<String, String>,
    /// The output file path.
    pub output: PathBuf,
    /// Worker pool size.
    pub workers: usize,
    /// Retries per segment after the initial attempt.
    pub max_retries: u32,
    /// Force incremental assembly for a non-live source.
    pub live_assemble: bool,
    /// Pipe segments through the external transcoder.
    pub ffmpeg: bool,
    /// Keep the cache directory after success.
    pub keep_cache: bool,
    /// Treat the source as live even if resolution does not say so.
    pub livestream_hint: bool,
}

/// Drives one download from URL to output file.
pub struct DownloadOrchestrator {
    client: HttpClient,
    registry: ResolverRegistry,
}

impl Default for DownloadOrchestrator {
    fn default() -> Self {
        Self::new()
    }
}

impl DownloadOrchestrator {
    /// Creates an orchestrator with the default host resolvers.
    #[must_use]
    pub fn new() -> Self {
        Self::with_registry(build_default_registry())
    }

    /// Creates an orchestrator with a custom resolver registry.
    #[must_use]
    pub fn with_registry(registry: ResolverRegistry) -> Self {
        Self {
            client: HttpClient::new(),
            registry,
        }
    }

    /// Loads the checkpoint or resolves the source from scratch.
    ///
    /// Returns `Ok(None)` when the user cancelled during resolution.
    async fn prepare_session(
        &self,
        request: &RunRequest,
        cache: &CacheDir,
        ui: &dyn Ui,
    ) -> Result<Option<DownloadSession>, RunError> {
        if let Some(session) = DownloadSession::load(cache)? {
            if session.playlist.is_some() {
                info!(url = %session.m3u_url, "resuming from checkpoint");
                return Ok(Some(session));
            }
            warn!("checkpoint has no playlist, resolving from scratch");
        }

        let mut session = DownloadSession {
            headers: request.headers.clone(),
            m3u_url: request.url.clone(),
            livestream: request.livestream_hint,
            live_assemble: request.live_assemble,
            ffmpeg: request.ffmpeg,
            keep_cache: request.keep_cache,
            ..DownloadSession::default()
        };

        let resolved = match resolve_source(
            &request.url,
            &self.registry,
            &self.client,
            &session.headers,
            &mut session.cookies,
            ui,
            request.livestream_hint,
        )
        .await
        {
            Ok(resolved) => resolved,
            Err(ResolveError::Cancelled) => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        session.m3u_url = resolved.playlist_url;
        session.livestream = resolved.livestream;
        session.playlist = Some(resolved.playlist);
        session.save(cache)?;
        Ok(Some(session))
    }

    /// Downloads every segment, tailing the playlist when the session is
    /// live. Returns the shut-down engine state alongside any failure so
    /// the caller can decide what cancellation means.
    async fn download_all(
        &self,
        session: &mut DownloadSession,
        run: &mut DownloadRun,
        cache: &CacheDir,
        ui: &dyn Ui,
        incremental: &mut Option<IncrementalWriter>,
    ) -> Result<(), RunError> {
        if session.livestream {
            let poll = match session.playlist.as_ref() {
                Some(playlist) => poll_interval(playlist),
                None => return Err(RunError::MissingPlaylist),
            };
            let tailer = LiveTailer::new(self.client.clone(), cache.clone(), poll);
            tailer.follow(session, run, ui, incremental).await?;
        } else {
            run.drain(ui, incremental).await?;
        }
        Ok(())
    }

    /// Runs the full lifecycle for one request.
    ///
    /// # Errors
    ///
    /// Returns [`RunError`] on failure; the cache directory is retained.
    /// User cancellation is reported as [`RunOutcome::Cancelled`], never as
    /// an error.
    #[instrument(skip_all, fields(url = %request.url, output = %request.output.display()))]
    pub async fn run(&self, request: RunRequest, ui: &dyn Ui) -> Result<RunOutcome, RunError> {
        let cache = CacheDir::for_output(&request.output);
        cache.ensure()?;

        let Some(mut session) = self.prepare_session(&request, &cache, ui).await? else {
            return Ok(RunOutcome::Cancelled);
        };

        let segments = match &session.playlist {
            Some(playlist) => playlist.segments.clone(),
            None => return Err(RunError::MissingPlaylist),
        };
        let mode = session.assembly_mode();

        let retry = RetryPolicy::with_max_attempts(request.max_retries + 1);
        let downloader = SegmentDownloader::new(self.client.clone(), request.workers, retry)?;
        let mut run = downloader.start(
            cache.clone(),
            session.headers.clone(),
            session.cookies.clone(),
        );

        let mut incremental = if mode == AssemblyMode::LiveIncremental {
            Some(IncrementalWriter::create(&request.output).await?)
        } else {
            None
        };

        run.enqueue(&segments);
        let downloaded = self
            .download_all(&mut session, &mut run, &cache, ui, &mut incremental)
            .await;
        let total = session
            .playlist
            .as_ref()
            .map_or(segments.len(), |p| p.segments.len());
        run.shutdown().await;

        if let Err(error) = downloaded {
            if error.is_cancelled() {
                info!("run cancelled during download");
                return Ok(RunOutcome::Cancelled);
            }
            return Err(error);
        }

        let assembled: Result<(), AssembleError> = match mode {
            AssemblyMode::Direct => {
                assemble::assemble_direct(&cache, total, &request.output, ui).await
            }
            AssemblyMode::LiveIncremental => match incremental.take() {
                Some(writer) => writer.finish(total, &cache).await,
                None => Ok(()),
            },
            AssemblyMode::ExternalTranscode => {
                assemble::assemble_transcode(&cache, total, &request.output, ui).await
            }
        };
        match assembled {
            Ok(()) => {}
            Err(AssembleError::Cancelled) => {
                info!("run cancelled during assembly");
                return Ok(RunOutcome::Cancelled);
            }
            Err(e) => return Err(e.into()),
        }

        if session.keep_cache {
            info!(path = %cache.path().display(), "keeping cache directory");
        } else {
            cache.remove();
        }

        ui.notify(&format!(
            "Finished saving video: {}",
            request.output.display()
        ));
        Ok(RunOutcome::Completed(request.output))
    }
}
