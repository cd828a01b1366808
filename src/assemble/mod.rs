//! Turning cached segments into the final output file.
//!
//! Three strategies share the cache layout: direct concatenation after the
//! download finishes, incremental appending that keeps a partial output
//! playable while a broadcast is still running, and piping the concatenated
//! stream through an external transcoder.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use thiserror::Error;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

use crate::session::CacheDir;
use crate::ui::Ui;

/// The external transcoder invoked for container remuxing.
const TRANSCODER: &str = "ffmpeg";

/// Errors produced while assembling the output file.
#[derive(Debug, Error)]
pub enum AssembleError {
    /// File system error reading a cached segment or writing the output.
    #[error("IO error at {path}: {source}")]
    Io {
        /// The path where the error occurred.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The external transcoder could not be started.
    #[error("failed to start {program}: {source}")]
    Spawn {
        /// The program that failed to start.
        program: String,
        /// The underlying spawn error.
        #[source]
        source: std::io::Error,
    },

    /// The external transcoder exited with a failure status.
    #[error("transcoder exited with status {status}: {stderr}")]
    Transcode {
        /// The exit code, or -1 when killed by a signal.
        status: i32,
        /// Captured standard error output.
        stderr: String,
    },

    /// A segment expected in the cache was not there.
    #[error("segment {index} missing from cache at {path}")]
    MissingSegment {
        /// The segment ordinal.
        index: usize,
        /// The cache path that was expected to exist.
        path: PathBuf,
    },

    /// The user cancelled mid-assembly.
    #[error("assembly cancelled")]
    Cancelled,
}

impl AssembleError {
    fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    fn missing(index: usize, path: impl Into<PathBuf>) -> Self {
        Self::MissingSegment {
            index,
            path: path.into(),
        }
    }
}

/// Copies one cached segment into `sink`, mapping a missing file to
/// [`AssembleError::MissingSegment`].
async fn append_segment<W>(cache: &CacheDir, index: usize, sink: &mut W) -> Result<u64, AssembleError>
where
    W: tokio::io::AsyncWrite + Unpin,
{
    let path = cache.segment_path(index);
    let mut file = match File::open(&path).await {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(AssembleError::missing(index, path));
        }
        Err(e) => return Err(AssembleError::io(path, e)),
    };
    tokio::io::copy(&mut file, sink)
        .await
        .map_err(|e| AssembleError::io(path, e))
}

/// Concatenates segments `0..count` into `output` in one pass.
///
/// # Errors
///
/// Returns [`AssembleError`] when a segment is missing from the cache, on
/// I/O failure, or when the user cancels.
#[instrument(skip(cache, ui), fields(output = %output.display(), count))]
pub async fn assemble_direct(
    cache: &CacheDir,
    count: usize,
    output: &Path,
    ui: &dyn Ui,
) -> Result<(), AssembleError> {
    let mut file = File::create(output)
        .await
        .map_err(|e| AssembleError::io(output, e))?;

    for index in 0..count {
        if ui.cancelled() {
            return Err(AssembleError::Cancelled);
        }
        append_segment(cache, index, &mut file).await?;
        ui.progress("Assembling", (index + 1) as u64, count as u64);
    }
    file.flush()
        .await
        .map_err(|e| AssembleError::io(output, e))?;

    info!(count, output = %output.display(), "assembled output");
    Ok(())
}

/// Appends segments to the output as their downloads complete, so the
/// partial file stays playable while a broadcast is still running.
///
/// The writer tracks a cursor of how many segments have been appended;
/// [`advance`](Self::advance) appends every contiguous cached segment from
/// the cursor onward and is safe to call after each completion.
#[derive(Debug)]
pub struct IncrementalWriter {
    file: File,
    output: PathBuf,
    cursor: usize,
}

impl IncrementalWriter {
    /// Creates (truncating) the output file and an appender positioned at
    /// segment zero.
    ///
    /// # Errors
    ///
    /// Returns [`AssembleError::Io`] when the output cannot be created.
    pub async fn create(output: &Path) -> Result<Self, AssembleError> {
        let file = File::create(output)
            .await
            .map_err(|e| AssembleError::io(output, e))?;
        Ok(Self {
            file,
            output: output.to_path_buf(),
            cursor: 0,
        })
    }

    /// How many segments have been appended so far.
    #[must_use]
    pub fn appended(&self) -> usize {
        self.cursor
    }

    /// Appends every contiguous cached segment starting at the cursor.
    ///
    /// Stops at the first gap; completions arriving out of order simply wait
    /// in the cache until the gap fills.
    ///
    /// # Errors
    ///
    /// Returns [`AssembleError::Io`] on read or write failure.
    pub async fn advance(&mut self, cache: &CacheDir) -> Result<usize, AssembleError> {
        let start = self.cursor;
        while cache.has_segment(self.cursor) {
            append_segment(cache, self.cursor, &mut self.file).await?;
            self.cursor += 1;
        }
        if self.cursor > start {
            self.file
                .flush()
                .await
                .map_err(|e| AssembleError::io(&self.output, e))?;
            debug!(from = start, to = self.cursor, "appended segments");
        }
        Ok(self.cursor - start)
    }

    /// Appends everything up to `total` and closes out the writer.
    ///
    /// # Errors
    ///
    /// Returns [`AssembleError::MissingSegment`] when a gap remains after
    /// the final advance, or [`AssembleError::Io`] on write failure.
    pub async fn finish(mut self, total: usize, cache: &CacheDir) -> Result<(), AssembleError> {
        self.advance(cache).await?;
        if self.cursor < total {
            return Err(AssembleError::missing(
                self.cursor,
                cache.segment_path(self.cursor),
            ));
        }
        self.file
            .flush()
            .await
            .map_err(|e| AssembleError::io(&self.output, e))?;
        info!(total, output = %self.output.display(), "incremental assembly complete");
        Ok(())
    }
}

/// Pipes segments `0..count` through the external transcoder into `output`.
///
/// The transcoder copies streams without re-encoding; this exists for
/// container remuxing (e.g. transport-stream segments into an MP4).
///
/// # Errors
///
/// Returns [`AssembleError`] when the transcoder cannot be spawned, exits
/// with a failure status, a segment is missing, or the user cancels.
#[instrument(skip(cache, ui), fields(output = %output.display(), count))]
pub async fn assemble_transcode(
    cache: &CacheDir,
    count: usize,
    output: &Path,
    ui: &dyn Ui,
) -> Result<(), AssembleError> {
    assemble_transcode_with(TRANSCODER, cache, count, output, ui).await
}

async fn assemble_transcode_with(
    program: &str,
    cache: &CacheDir,
    count: usize,
    output: &Path,
    ui: &dyn Ui,
) -> Result<(), AssembleError> {
    let mut child = Command::new(program)
        .args(["-hide_banner", "-loglevel", "error", "-i", "pipe:0", "-c", "copy", "-y"])
        .arg(output)
        .stdin(Stdio::piped())
        .stderr(Stdio::piped())
        .stdout(Stdio::null())
        .spawn()
        .map_err(|e| AssembleError::Spawn {
            program: program.to_string(),
            source: e,
        })?;

    // Drain stderr concurrently so the child never blocks on a full pipe.
    let stderr_task = child.stderr.take().map(|mut stderr| {
        tokio::spawn(async move {
            let mut text = String::new();
            let _ = stderr.read_to_string(&mut text).await;
            text
        })
    });

    let feed_result = match child.stdin.take() {
        Some(mut stdin) => {
            let mut result = Ok(());
            for index in 0..count {
                if ui.cancelled() {
                    result = Err(AssembleError::Cancelled);
                    break;
                }
                if let Err(e) = append_segment(cache, index, &mut stdin).await {
                    result = Err(e);
                    break;
                }
                ui.progress("Transcoding", (index + 1) as u64, count as u64);
            }
            drop(stdin);
            result
        }
        None => Ok(()),
    };

    let status = child.wait().await.map_err(|e| AssembleError::Spawn {
        program: program.to_string(),
        source: e,
    })?;
    let stderr = match stderr_task {
        Some(task) => task.await.unwrap_or_default(),
        None => String::new(),
    };

    // A child that dies mid-feed closes its stdin pipe, failing the feed
    // with a broken pipe; the exit status carries the real diagnostic, so
    // it is reported ahead of any feed error.
    if !status.success() {
        warn!(status = status.code(), "transcoder failed");
        return Err(AssembleError::Transcode {
            status: status.code().unwrap_or(-1),
            stderr: stderr.trim().to_string(),
        });
    }
    feed_result?;

    info!(count, output = %output.display(), "transcode complete");
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::os::unix::fs::PermissionsExt;

    use super::*;
    use crate::ui::SilentUi;

    fn seed(cache: &CacheDir, index: usize, bytes: &[u8]) {
        std::fs::write(cache.segment_path(index), bytes).unwrap();
    }

    fn fake_transcoder(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("fake-transcoder");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        let mut perms = std::fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();
        path
    }

    #[tokio::test]
    async fn test_assemble_direct_concatenates_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CacheDir::at(dir.path().join("cache"));
        cache.ensure().unwrap();
        seed(&cache, 0, b"aaa");
        seed(&cache, 1, b"bb");
        seed(&cache, 2, b"c");

        let output = dir.path().join("out.ts");
        assemble_direct(&cache, 3, &output, &SilentUi).await.unwrap();

        assert_eq!(std::fs::read(&output).unwrap(), b"aaabbc");
    }

    #[tokio::test]
    async fn test_assemble_direct_reports_missing_segment() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CacheDir::at(dir.path().join("cache"));
        cache.ensure().unwrap();
        seed(&cache, 0, b"aaa");

        let output = dir.path().join("out.ts");
        let error = assemble_direct(&cache, 2, &output, &SilentUi)
            .await
            .unwrap_err();
        assert!(matches!(error, AssembleError::MissingSegment { index: 1, .. }));
    }

    #[tokio::test]
    async fn test_incremental_writer_stops_at_gaps() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CacheDir::at(dir.path().join("cache"));
        cache.ensure().unwrap();
        let output = dir.path().join("out.ts");
        let mut writer = IncrementalWriter::create(&output).await.unwrap();

        seed(&cache, 0, b"a");
        seed(&cache, 2, b"c");
        assert_eq!(writer.advance(&cache).await.unwrap(), 1);
        assert_eq!(writer.appended(), 1);
        assert_eq!(std::fs::read(&output).unwrap(), b"a");

        // Filling the gap releases everything contiguous behind it.
        seed(&cache, 1, b"b");
        assert_eq!(writer.advance(&cache).await.unwrap(), 2);
        assert_eq!(std::fs::read(&output).unwrap(), b"abc");

        writer.finish(3, &cache).await.unwrap();
    }

    #[tokio::test]
    async fn test_transcode_success_consumes_all_segments() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CacheDir::at(dir.path().join("cache"));
        cache.ensure().unwrap();
        seed(&cache, 0, b"aaa");
        seed(&cache, 1, b"bb");

        let program = fake_transcoder(dir.path(), "cat >/dev/null");
        let output = dir.path().join("out.mp4");
        assemble_transcode_with(program.to_str().unwrap(), &cache, 2, &output, &SilentUi)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_transcode_failure_surfaces_exit_status_and_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CacheDir::at(dir.path().join("cache"));
        cache.ensure().unwrap();
        // Larger than the pipe buffer so the feed fails with a broken pipe
        // once the child is gone, instead of completing silently.
        seed(&cache, 0, &vec![0u8; 256 * 1024]);

        let program = fake_transcoder(dir.path(), "echo 'pipe:0: invalid data' >&2\nexit 1");
        let output = dir.path().join("out.mp4");
        let error =
            assemble_transcode_with(program.to_str().unwrap(), &cache, 1, &output, &SilentUi)
                .await
                .unwrap_err();
        match error {
            AssembleError::Transcode { status, stderr } => {
                assert_eq!(status, 1);
                assert!(stderr.contains("invalid data"), "stderr was: {stderr}");
            }
            other => panic!("expected a transcode error, got: {other}"),
        }
    }

    #[tokio::test]
    async fn test_transcode_missing_program_reports_spawn_error() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CacheDir::at(dir.path().join("cache"));
        cache.ensure().unwrap();

        let output = dir.path().join("out.mp4");
        let error = assemble_transcode_with(
            dir.path().join("no-such-transcoder").to_str().unwrap(),
            &cache,
            0,
            &output,
            &SilentUi,
        )
        .await
        .unwrap_err();
        assert!(matches!(error, AssembleError::Spawn { .. }));
    }

    #[tokio::test]
    async fn test_incremental_finish_rejects_gap() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CacheDir::at(dir.path().join("cache"));
        cache.ensure().unwrap();
        let output = dir.path().join("out.ts");
        let mut writer = IncrementalWriter::create(&output).await.unwrap();

        seed(&cache, 0, b"a");
        writer.advance(&cache).await.unwrap();
        let error = writer.finish(2, &cache).await.unwrap_err();
        assert!(matches!(error, AssembleError::MissingSegment { index: 1, .. }));
    }
}
